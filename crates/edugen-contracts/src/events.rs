use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

pub type EventPayload = Map<String, Value>;

pub const GENERATION_STARTED: &str = "generation_started";
pub const GENERATION_PROGRESS: &str = "generation_progress";
pub const IMAGE_GENERATED: &str = "image_generated";
pub const GENERATION_COMPLETE: &str = "generation_complete";
pub const GENERATION_ERROR: &str = "generation_error";

/// Append-only writer for `events.jsonl`.
///
/// Every line carries `type`, `session_id` and `ts`; the caller payload is
/// merged last and may override them. Clones share one file lock so worker
/// threads can emit concurrently without interleaving lines.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Returns a writer on the same file tagged with another session id.
    pub fn for_session(&self, session_id: impl Into<String>) -> Self {
        Self::new(self.inner.path.clone(), session_id)
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    pub fn progress(&self, current: u64, total: u64, status: &str) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("current".to_string(), json!(current));
        payload.insert("total".to_string(), json!(total));
        payload.insert("status".to_string(), Value::String(status.to_string()));
        payload.insert("percentage".to_string(), json!(percentage(current, total)));
        self.emit(GENERATION_PROGRESS, payload)
    }
}

/// Integer percentage, truncated like the web client expects.
pub fn percentage(current: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (current.min(total) * 100) / total
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("category".to_string(), json!("tutero_ai"));
        let emitted = writer.emit(GENERATION_STARTED, payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("generation_started"));
        assert_eq!(parsed["session_id"], json!("session-123"));
        assert_eq!(parsed["category"], json!("tutero_ai"));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-123");

        let mut payload = EventPayload::new();
        payload.insert("session_id".to_string(), json!("other"));
        let emitted = writer.emit(IMAGE_GENERATED, payload)?;

        assert_eq!(emitted["session_id"], json!("other"));
        assert_eq!(emitted["type"], json!("image_generated"));
        Ok(())
    }

    #[test]
    fn progress_reports_truncated_percentage() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "s");

        writer.progress(1, 6, "Generating images...")?;
        writer.progress(6, 6, "Complete!")?;

        let content = fs::read_to_string(&path)?;
        let rows: Vec<Value> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["percentage"], json!(16));
        assert_eq!(rows[0]["status"], json!("Generating images..."));
        assert_eq!(rows[1]["percentage"], json!(100));
        Ok(())
    }

    #[test]
    fn percentage_handles_zero_total() {
        assert_eq!(percentage(3, 0), 0);
        assert_eq!(percentage(9, 4), 100);
    }
}
