use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::util::{file_to_data_url, mime_for_path, push_unique_warning, truncate_text};

pub const MAX_SYSTEM_REFERENCES: usize = 2;

/// Character references for a category, as data URLs. At most
/// [`MAX_SYSTEM_REFERENCES`] files, taken in name order.
pub fn load_system_references(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "reference directory not found");
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|row| row.path()))
            .filter(|path| path.is_file() && mime_for_path(path).is_some())
            .collect(),
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "reference directory unreadable");
            return Vec::new();
        }
    };
    if files.is_empty() {
        tracing::warn!(dir = %dir.display(), "no reference images found");
        return Vec::new();
    }
    files.sort();

    let mut urls = Vec::new();
    for path in files.iter().take(MAX_SYSTEM_REFERENCES) {
        match file_to_data_url(path) {
            Ok(url) => {
                tracing::debug!(file = %path.display(), "loaded reference image");
                urls.push(url);
            }
            Err(err) => {
                tracing::warn!(
                    file = %path.display(),
                    error = %err,
                    "failed to load reference image"
                );
            }
        }
    }
    tracing::info!(count = urls.len(), dir = %dir.display(), "loaded reference images");
    urls
}

/// Accepts an http(s) URL, an image data URL, a local file, or raw base64.
pub fn image_input_to_url(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("image input value is empty");
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("data:image/")
    {
        return Ok(trimmed.to_string());
    }
    let path = PathBuf::from(trimmed);
    if path.is_file() {
        return file_to_data_url(&path);
    }
    if BASE64.decode(trimmed.as_bytes()).is_ok() {
        return Ok(format!("data:image/png;base64,{trimmed}"));
    }
    bail!(
        "image input '{}' must be a URL, data URL, local file path, or base64 image bytes",
        truncate_text(trimmed, 80)
    );
}

/// Resolves user references in order; unusable entries are dropped with a
/// warning instead of failing the request.
pub fn resolve_user_references(values: &[String], warnings: &mut Vec<String>) -> Vec<String> {
    let mut urls = Vec::new();
    for (idx, value) in values.iter().enumerate() {
        match image_input_to_url(value) {
            Ok(url) => urls.push(url),
            Err(err) => push_unique_warning(
                warnings,
                format!(
                    "dropped user reference [{idx}]: {}",
                    truncate_text(&err.to_string(), 220)
                ),
            ),
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_references_are_capped_and_sorted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(temp.path().join("c.png"), b"c")?;
        std::fs::write(temp.path().join("a.JPG"), b"a")?;
        std::fs::write(temp.path().join("b.gif"), b"b")?;
        std::fs::write(temp.path().join("notes.txt"), b"skip")?;

        let urls = load_system_references(temp.path());
        assert_eq!(
            urls,
            vec![
                "data:image/jpeg;base64,YQ==".to_string(),
                "data:image/gif;base64,Yg==".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn missing_or_empty_reference_dir_yields_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        assert!(load_system_references(&temp.path().join("absent")).is_empty());
        std::fs::write(temp.path().join("readme.md"), b"x")?;
        assert!(load_system_references(temp.path()).is_empty());
        Ok(())
    }

    #[test]
    fn image_inputs_resolve_by_kind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("mood.png");
        std::fs::write(&file, b"png")?;

        assert_eq!(
            image_input_to_url(" https://cdn.example/a.png ")?,
            "https://cdn.example/a.png"
        );
        assert_eq!(
            image_input_to_url("data:image/webp;base64,AAAA")?,
            "data:image/webp;base64,AAAA"
        );
        assert_eq!(
            image_input_to_url(&file.to_string_lossy())?,
            "data:image/png;base64,cG5n"
        );
        assert_eq!(image_input_to_url("cG5n")?, "data:image/png;base64,cG5n");
        assert!(image_input_to_url("   ").is_err());
        assert!(image_input_to_url("not base64 at all!").is_err());
        Ok(())
    }

    #[test]
    fn unusable_user_references_become_warnings() {
        let mut warnings = Vec::new();
        let urls = resolve_user_references(
            &["https://cdn.example/a.png".to_string(), "???".to_string()],
            &mut warnings,
        );
        assert_eq!(urls, vec!["https://cdn.example/a.png".to_string()]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("dropped user reference [1]"));
    }
}
