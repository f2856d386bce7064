use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Outcome of one requested image. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedImage {
    pub index: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SavedImage {
    pub fn failed(index: usize, model: Option<String>, error: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            filename: None,
            filepath: None,
            size_bytes: None,
            model,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationDetails {
    pub validation_passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio_match: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio_difference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_kb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub filename: String,
    pub passed: bool,
    pub details: ValidationDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub success_rate: String,
    pub results: Vec<ValidationResult>,
}

/// Result of a generate or refine request, persisted as
/// `session_<session_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub success: bool,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
    pub category: String,
    pub user_input: String,
    pub prompt: String,
    pub total_requested: usize,
    pub total_generated: usize,
    pub images: Vec<SavedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
    #[serde(default)]
    pub models_used: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

pub fn session_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("session_{session_id}.json"))
}

pub fn write_session(dir: &Path, session: &SessionMetadata) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = session_path(dir, &session.session_id);
    std::fs::write(&path, serde_json::to_string_pretty(session)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(path)
}

pub fn read_session(dir: &Path, session_id: &str) -> anyhow::Result<SessionMetadata> {
    let path = session_path(dir, session_id);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Session not found: {session_id}"))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid session file {}", path.display()))
}
