use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const CATEGORIES_FILE: &str = "image_categories.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
    Square,
}

impl Orientation {
    pub fn of(width: u32, height: u32) -> Self {
        match width.cmp(&height) {
            std::cmp::Ordering::Greater => Self::Landscape,
            std::cmp::Ordering::Less => Self::Portrait,
            std::cmp::Ordering::Equal => Self::Square,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Landscape => "LANDSCAPE",
            Self::Portrait => "PORTRAIT",
            Self::Square => "SQUARE",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label().to_ascii_lowercase())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "landscape" | "horizontal" => Ok(Self::Landscape),
            "portrait" | "vertical" => Ok(Self::Portrait),
            "square" => Ok(Self::Square),
            other => Err(format!("unknown orientation '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub aspect_ratio: String,
    pub width: u32,
    pub height: u32,
    pub reference_dir: PathBuf,
    #[serde(default)]
    pub styles: Vec<StyleSpec>,
}

impl CategorySpec {
    /// Frame to request. An explicit orientation re-arranges the configured
    /// dimensions; without one the category size is used as is.
    pub fn target_dims(&self, orientation: Option<Orientation>) -> (u32, u32) {
        let long = self.width.max(self.height);
        let short = self.width.min(self.height);
        match orientation {
            None => (self.width, self.height),
            Some(Orientation::Landscape) => (long, short),
            Some(Orientation::Portrait) => (short, long),
            Some(Orientation::Square) => (short, short),
        }
    }

    /// Aspect label for a frame; the configured label when the frame is the
    /// configured one.
    pub fn aspect_label(&self, width: u32, height: u32) -> String {
        if (width, height) == (self.width, self.height) {
            return self.aspect_ratio.clone();
        }
        let divisor = gcd(width, height).max(1);
        format!("{}:{}", width / divisor, height / divisor)
    }

    pub fn style(&self, style_id: &str) -> Option<&StyleSpec> {
        self.styles.iter().find(|style| style.id == style_id)
    }

    pub fn frame(&self, orientation: Option<Orientation>) -> Frame {
        let (width, height) = self.target_dims(orientation);
        Frame {
            width,
            height,
            aspect_ratio: self.aspect_label(width, height),
        }
    }
}

/// Output frame of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: String,
}

impl Frame {
    pub fn orientation(&self) -> Orientation {
        Orientation::of(self.width, self.height)
    }

    pub fn ratio(&self) -> f64 {
        if self.height == 0 {
            return 1.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCatalog {
    categories: IndexMap<String, CategorySpec>,
}

impl CategoryCatalog {
    pub fn new(categories: IndexMap<String, CategorySpec>) -> Self {
        Self { categories }
    }

    /// Reads `image_categories.yaml`; a missing file yields the built-in set.
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let path = config_dir.join(CATEGORIES_FILE);
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "category file not found; using built-in catalog"
            );
            return Ok(Self::builtin());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("invalid categories {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let catalog: Self = serde_yaml::from_str(raw)?;
        for (id, spec) in &catalog.categories {
            if spec.width == 0 || spec.height == 0 {
                bail!("category '{id}' must have non-zero width and height");
            }
        }
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> anyhow::Result<&CategorySpec> {
        self.categories
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("Unknown category: {id}"))
    }

    pub fn list(&self) -> impl Iterator<Item = (&str, &CategorySpec)> {
        self.categories
            .iter()
            .map(|(id, spec)| (id.as_str(), spec))
    }

    pub fn ids(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn reference_images_dir(&self, base_dir: &Path, id: &str) -> anyhow::Result<PathBuf> {
        Ok(base_dir.join(&self.get(id)?.reference_dir).join("images"))
    }

    pub fn style_template(&self, id: &str, style_id: &str) -> anyhow::Result<Option<&str>> {
        Ok(self
            .get(id)?
            .style(style_id)
            .and_then(|style| style.prompt_template.as_deref())
            .map(str::trim)
            .filter(|template| !template.is_empty()))
    }

    pub fn builtin() -> Self {
        let mut categories = IndexMap::new();
        let mut insert = |id: &str,
                          name: &str,
                          description: &str,
                          aspect_ratio: &str,
                          width: u32,
                          height: u32,
                          styles: Vec<StyleSpec>| {
            categories.insert(
                id.to_string(),
                CategorySpec {
                    name: name.to_string(),
                    description: description.to_string(),
                    aspect_ratio: aspect_ratio.to_string(),
                    width,
                    height,
                    reference_dir: PathBuf::from("references").join(id),
                    styles,
                },
            );
        };

        insert(
            "subtopic_cover",
            "Subtopic Cover",
            "Minimal geometric cover art for a maths subtopic",
            "16:9",
            1920,
            1080,
            vec![
                StyleSpec {
                    id: "original".to_string(),
                    name: "Original".to_string(),
                    prompt_template: None,
                },
                StyleSpec {
                    id: "blueprint".to_string(),
                    name: "Blueprint".to_string(),
                    prompt_template: Some(BLUEPRINT_STYLE.to_string()),
                },
            ],
        );
        insert(
            "tutero_ai",
            "Tutero AI",
            "The Tutero AI character placed in a learning context",
            "3:4",
            1536,
            2048,
            Vec::new(),
        );
        insert(
            "classroom_activity",
            "Classroom Activity",
            "The Tutero AI character helping students with an activity",
            "3:4",
            1536,
            2048,
            Vec::new(),
        );
        insert(
            "context_introduction",
            "Context Introduction",
            "A real-world scene that introduces a problem context",
            "16:9",
            1920,
            1080,
            Vec::new(),
        );
        Self { categories }
    }
}

const BLUEPRINT_STYLE: &str = "\
- Technical blueprint aesthetic: deep navy background with crisp white and pale cyan line work
- Thin, precise strokes; construction lines allowed but no annotations
- Flat, two-dimensional drafting look with subtle grid texture
- High contrast, calm and orderly composition";

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_lists_categories_in_order() {
        let catalog = CategoryCatalog::builtin();
        assert_eq!(
            catalog.ids(),
            vec![
                "subtopic_cover",
                "tutero_ai",
                "classroom_activity",
                "context_introduction"
            ]
        );
    }

    #[test]
    fn unknown_category_reports_its_id() {
        let catalog = CategoryCatalog::builtin();
        let err = catalog.get("posters").err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Unknown category: posters"));
    }

    #[test]
    fn yaml_catalog_preserves_file_order_and_styles() -> anyhow::Result<()> {
        let raw = r#"
categories:
  zeta:
    name: Zeta
    aspect_ratio: "1:1"
    width: 512
    height: 512
    reference_dir: refs/zeta
  alpha:
    name: Alpha
    description: first letter
    aspect_ratio: "16:9"
    width: 1600
    height: 900
    reference_dir: refs/alpha
    styles:
      - id: original
        name: Original
      - id: chalk
        name: Chalk
        prompt_template: "  chalkboard lines  "
"#;
        let catalog = CategoryCatalog::from_yaml_str(raw)?;
        assert_eq!(catalog.ids(), vec!["zeta", "alpha"]);
        assert_eq!(
            catalog.style_template("alpha", "chalk")?,
            Some("chalkboard lines")
        );
        assert_eq!(catalog.style_template("alpha", "original")?, None);
        assert_eq!(catalog.style_template("alpha", "missing")?, None);
        assert_eq!(
            catalog.reference_images_dir(Path::new("/base"), "zeta")?,
            PathBuf::from("/base/refs/zeta/images")
        );
        Ok(())
    }

    #[test]
    fn zero_sized_category_is_rejected() {
        let raw = "categories:\n  bad:\n    name: Bad\n    aspect_ratio: \"1:1\"\n    width: 0\n    height: 10\n    reference_dir: x\n";
        assert!(CategoryCatalog::from_yaml_str(raw).is_err());
    }

    #[test]
    fn orientation_rearranges_configured_dimensions() -> anyhow::Result<()> {
        let catalog = CategoryCatalog::builtin();
        let cover = catalog.get("subtopic_cover")?;
        assert_eq!(cover.target_dims(None), (1920, 1080));
        assert_eq!(cover.target_dims(Some(Orientation::Portrait)), (1080, 1920));
        assert_eq!(cover.target_dims(Some(Orientation::Landscape)), (1920, 1080));
        assert_eq!(cover.target_dims(Some(Orientation::Square)), (1080, 1080));
        assert_eq!(cover.aspect_label(1920, 1080), "16:9");
        assert_eq!(cover.aspect_label(1080, 1920), "9:16");
        assert_eq!(cover.aspect_label(1080, 1080), "1:1");
        Ok(())
    }

    #[test]
    fn frame_follows_requested_orientation() -> anyhow::Result<()> {
        let catalog = CategoryCatalog::builtin();
        let robot = catalog.get("tutero_ai")?;
        let frame = robot.frame(None);
        assert_eq!((frame.width, frame.height), (1536, 2048));
        assert_eq!(frame.aspect_ratio, "3:4");
        assert_eq!(frame.orientation(), Orientation::Portrait);

        let wide = robot.frame(Some(Orientation::Landscape));
        assert_eq!(wide.aspect_ratio, "4:3");
        assert!((wide.ratio() - 4.0 / 3.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn orientation_parses_and_classifies() {
        assert_eq!("Portrait".parse::<Orientation>(), Ok(Orientation::Portrait));
        assert_eq!("horizontal".parse::<Orientation>(), Ok(Orientation::Landscape));
        assert!("diagonal".parse::<Orientation>().is_err());
        assert_eq!(Orientation::of(10, 5), Orientation::Landscape);
        assert_eq!(Orientation::of(5, 10), Orientation::Portrait);
        assert_eq!(Orientation::of(7, 7), Orientation::Square);
    }

    #[test]
    fn shipped_catalog_matches_builtin() -> anyhow::Result<()> {
        let config_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
        let shipped = CategoryCatalog::load(&config_dir)?;
        let builtin = CategoryCatalog::builtin();
        assert_eq!(shipped.ids(), builtin.ids());
        for id in builtin.ids() {
            assert_eq!(shipped.get(&id)?.frame(None), builtin.get(&id)?.frame(None));
        }
        assert_eq!(
            shipped.style_template("subtopic_cover", "blueprint")?,
            builtin.style_template("subtopic_cover", "blueprint")?
        );
        Ok(())
    }
}
