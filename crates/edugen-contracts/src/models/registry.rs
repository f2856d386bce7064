use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const FLASH_MODEL: &str = "google/gemini-2.5-flash-image-preview";
pub const PRO_MODEL: &str = "google/gemini-3-pro-image-preview";
/// Default model for refinements.
pub const REFINE_MODEL: &str = "google/gemini-2.5-flash-image";
/// Any model named with this prefix renders locally.
pub const DRYRUN_PREFIX: &str = "dryrun-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Flash,
    Pro,
}

impl ModelTier {
    pub fn model_name(self) -> &'static str {
        match self {
            Self::Flash => FLASH_MODEL,
            Self::Pro => PRO_MODEL,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash => f.write_str("flash"),
            Self::Pro => f.write_str("pro"),
        }
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "flash" => Ok(Self::Flash),
            "pro" => Ok(Self::Pro),
            other => Err(format!("unknown model tier '{other}' (expected flash or pro)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub tier: Option<ModelTier>,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    /// Last path segment, e.g. `gemini-3-pro-image-preview`.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    /// Registered spec, or a dryrun spec for any `dryrun-*` name.
    pub fn resolve(&self, name: &str) -> Option<ModelSpec> {
        if let Some(model) = self.get(name) {
            return Some(model.clone());
        }
        name.starts_with(DRYRUN_PREFIX).then(|| ModelSpec {
            name: name.to_string(),
            provider: "dryrun".to_string(),
            tier: None,
            capabilities: vec!["image".to_string(), "edit".to_string()],
        })
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        self.resolve(name).filter(|model| model.supports(capability))
    }

    /// Unknown names are treated as OpenRouter image models so new releases
    /// can be used without a registry update.
    pub fn resolve_or_openrouter(&self, name: &str) -> ModelSpec {
        self.resolve(name).unwrap_or_else(|| ModelSpec {
            name: name.to_string(),
            provider: "openrouter".to_string(),
            tier: None,
            capabilities: vec!["image".to_string(), "edit".to_string()],
        })
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, tier: Option<ModelTier>, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                tier,
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert(FLASH_MODEL, "openrouter", Some(ModelTier::Flash), &["image", "edit"]);
    insert(PRO_MODEL, "openrouter", Some(ModelTier::Pro), &["image", "edit"]);
    insert(
        REFINE_MODEL,
        "openrouter",
        Some(ModelTier::Flash),
        &["image", "edit"],
    );
    insert("dryrun-image-1", "dryrun", None, &["image", "edit"]);

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_parse_case_insensitively() {
        assert_eq!("FLASH".parse::<ModelTier>(), Ok(ModelTier::Flash));
        assert_eq!(" pro ".parse::<ModelTier>(), Ok(ModelTier::Pro));
        assert!("ultra".parse::<ModelTier>().is_err());
        assert_eq!(ModelTier::Pro.to_string(), "pro");
    }

    #[test]
    fn default_registry_resolves_tier_models() {
        let registry = ModelRegistry::new(None);
        let flash = registry.get(FLASH_MODEL).cloned();
        assert_eq!(flash.as_ref().map(|m| m.provider.as_str()), Some("openrouter"));
        assert_eq!(flash.and_then(|m| m.tier), Some(ModelTier::Flash));
        assert_eq!(
            registry.get("dryrun-image-1").map(|m| m.provider.as_str()),
            Some("dryrun")
        );
    }

    #[test]
    fn any_dryrun_name_routes_locally() {
        let registry = ModelRegistry::new(None);
        let spec = registry.resolve_or_openrouter("dryrun-sketch");
        assert_eq!(spec.provider, "dryrun");
        assert_eq!(spec.name, "dryrun-sketch");
        assert!(registry.ensure("dryrun-sketch", "edit").is_some());
        assert!(registry.resolve("sketch-dryrun").is_none());
    }

    #[test]
    fn unregistered_model_routes_to_openrouter() {
        let registry = ModelRegistry::new(None);
        let spec = registry.resolve_or_openrouter("black-forest-labs/flux-2");
        assert_eq!(spec.provider, "openrouter");
        assert_eq!(spec.short_name(), "flux-2");
        assert!(spec.supports("image"));
    }
}
