use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "default_config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub generation: GenerationConfig,
    pub output: OutputConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub max_retries: u32,
    /// Seconds between retry attempts.
    pub retry_delay: f64,
    /// Request timeout in seconds.
    pub timeout: f64,
    pub download_timeout: f64,
    pub http_referer: String,
    pub app_title: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            max_retries: 3,
            retry_delay: 2.0,
            timeout: 120.0,
            download_timeout: 30.0,
            http_referer: "http://localhost:8080".to_string(),
            app_title: "Educational Image Generator".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub images_per_prompt: u32,
    pub dry_run: bool,
    pub max_parallel: u32,
    pub request_spacing_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            images_per_prompt: 4,
            dry_run: false,
            max_parallel: 2,
            request_spacing_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
    pub save_metadata: bool,
    pub history_file: PathBuf,
    pub history_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("output/generated_images"),
            save_metadata: true,
            history_file: PathBuf::from("history.json"),
            history_limit: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub check_aspect_ratio: bool,
    pub aspect_ratio_tolerance: f64,
    pub min_file_size: u64,
    pub max_file_size: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_aspect_ratio: true,
            aspect_ratio_tolerance: 0.05,
            min_file_size: 10 * 1024,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `default_config.yaml` from `config_dir`, falling back to defaults
    /// when the file does not exist.
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let path = config_dir.join(DEFAULT_CONFIG_FILE);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found; using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn is_dry_run(&self) -> bool {
        dry_run_override(env::var("DRY_RUN").ok().as_deref()).unwrap_or(self.generation.dry_run)
    }

    /// Key from the environment: `OPENROUTER_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        non_empty_env("OPENROUTER_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    /// A non-blank key supplied with the request wins over the environment.
    pub fn resolve_api_key(&self, provided: Option<&str>) -> Option<String> {
        provided
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| self.api_key())
    }

    /// Output directory resolved against `base_dir`; created if missing.
    pub fn output_dir(&self, base_dir: &Path) -> anyhow::Result<PathBuf> {
        let dir = if self.output.base_dir.is_absolute() {
            self.output.base_dir.clone()
        } else {
            base_dir.join(&self.output.base_dir)
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating {}", dir.display()))?;
        Ok(dir)
    }

    pub fn history_path(&self, output_dir: &Path) -> PathBuf {
        if self.output.history_file.is_absolute() {
            return self.output.history_file.clone();
        }
        output_dir.join(&self.output.history_file)
    }
}

/// `Some(true)` only for the accepted truthy spellings; anything else defers
/// to the config file.
pub fn dry_run_override(value: Option<&str>) -> Option<bool> {
    let lowered = value?.trim().to_ascii_lowercase();
    matches!(lowered.as_str(), "true" | "1" | "yes").then_some(true)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_keys() -> anyhow::Result<()> {
        let config = AppConfig::from_yaml_str(
            "api:\n  max_retries: 1\nvalidation:\n  aspect_ratio_tolerance: 0.1\n",
        )?;
        assert_eq!(config.api.max_retries, 1);
        assert_eq!(config.api.timeout, 120.0);
        assert_eq!(config.validation.aspect_ratio_tolerance, 0.1);
        assert_eq!(config.validation.min_file_size, 10240);
        assert_eq!(config.generation.images_per_prompt, 4);
        assert!(config.output.save_metadata);
        Ok(())
    }

    #[test]
    fn missing_config_file_yields_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = AppConfig::load(temp.path())?;
        assert_eq!(config, AppConfig::default());
        Ok(())
    }

    #[test]
    fn load_reads_yaml_from_config_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        std::fs::write(
            temp.path().join(DEFAULT_CONFIG_FILE),
            "generation:\n  images_per_prompt: 2\n  dry_run: true\n",
        )?;
        let config = AppConfig::load(temp.path())?;
        assert_eq!(config.generation.images_per_prompt, 2);
        assert!(config.generation.dry_run);
        Ok(())
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(AppConfig::from_yaml_str("api: [unclosed").is_err());
    }

    #[test]
    fn dry_run_override_accepts_truthy_spellings_only() {
        assert_eq!(dry_run_override(Some("TRUE")), Some(true));
        assert_eq!(dry_run_override(Some(" yes ")), Some(true));
        assert_eq!(dry_run_override(Some("1")), Some(true));
        assert_eq!(dry_run_override(Some("false")), None);
        assert_eq!(dry_run_override(Some("")), None);
        assert_eq!(dry_run_override(None), None);
    }

    #[test]
    fn provided_key_wins_when_not_blank() {
        let config = AppConfig::default();
        assert_eq!(
            config.resolve_api_key(Some("  sk-request  ")).as_deref(),
            Some("sk-request")
        );
    }

    #[test]
    fn output_dir_is_created_relative_to_base() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = AppConfig::default();
        let dir = config.output_dir(temp.path())?;
        assert!(dir.ends_with("output/generated_images"));
        assert!(dir.is_dir());
        assert_eq!(config.history_path(&dir), dir.join("history.json"));
        Ok(())
    }

    #[test]
    fn shipped_config_matches_defaults() -> anyhow::Result<()> {
        let config_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
        assert_eq!(AppConfig::load(&config_dir)?, AppConfig::default());
        Ok(())
    }
}
