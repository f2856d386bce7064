//! Local generation history.
//!
//! A record is opened with one pending slot per requested image before any
//! provider call is made. Completions fill slots by index in whatever order
//! they arrive; a slot that already reached a terminal state is never
//! overwritten, so a late or duplicated completion cannot clobber a newer
//! result. Saving merges with the file on disk by record id, and per slot
//! prefers terminal states over pending ones, so two stores sharing a file
//! keep each other's progress. A record that was saved and has since
//! disappeared from the file was removed by another store; it reports
//! `Unknown` and is never written back.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HISTORY_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Pending,
    Ready {
        filename: String,
        path: String,
        size_bytes: u64,
    },
    Failed {
        error: String,
    },
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Terminal result delivered for a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Ready {
        filename: String,
        path: String,
        size_bytes: u64,
    },
    Failed {
        error: String,
    },
}

impl From<SlotOutcome> for SlotState {
    fn from(outcome: SlotOutcome) -> Self {
        match outcome {
            SlotOutcome::Ready {
                filename,
                path,
                size_bytes,
            } => Self::Ready {
                filename,
                path,
                size_bytes,
            },
            SlotOutcome::Failed { error } => Self::Failed { error },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub instructions: String,
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySlot {
    pub index: usize,
    pub model: String,
    pub state: SlotState,
    #[serde(default)]
    pub revisions: Vec<Revision>,
}

impl HistorySlot {
    /// Path of the image currently shown for this slot: the latest revision,
    /// else the generated image.
    pub fn current_path(&self) -> Option<&str> {
        if let Some(revision) = self.revisions.last() {
            return Some(revision.path.as_str());
        }
        match &self.state {
            SlotState::Ready { path, .. } => Some(path.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Partial,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub session_id: String,
    pub category: String,
    pub user_input: String,
    #[serde(default)]
    pub style: Option<String>,
    pub prompt: String,
    pub created_at: String,
    pub updated_at: String,
    pub slots: Vec<HistorySlot>,
}

impl HistoryRecord {
    /// New record with one pending slot per model entry.
    pub fn pending(
        session_id: impl Into<String>,
        category: impl Into<String>,
        user_input: impl Into<String>,
        style: Option<String>,
        prompt: impl Into<String>,
        models: &[String],
    ) -> Self {
        let now = now_utc_iso();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            category: category.into(),
            user_input: user_input.into(),
            style,
            prompt: prompt.into(),
            created_at: now.clone(),
            updated_at: now,
            slots: models
                .iter()
                .enumerate()
                .map(|(index, model)| HistorySlot {
                    index,
                    model: model.clone(),
                    state: SlotState::Pending,
                    revisions: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn status(&self) -> RecordStatus {
        let pending = self
            .slots
            .iter()
            .filter(|slot| !slot.state.is_terminal())
            .count();
        if pending == self.slots.len() && pending > 0 {
            return RecordStatus::Pending;
        }
        if pending > 0 {
            return RecordStatus::Partial;
        }
        let all_failed = !self.slots.is_empty()
            && self
                .slots
                .iter()
                .all(|slot| matches!(slot.state, SlotState::Failed { .. }));
        if all_failed {
            RecordStatus::Failed
        } else {
            RecordStatus::Complete
        }
    }

    pub fn ready_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Ready { .. }))
            .count()
    }
}

/// Result of applying a completion to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotUpdate {
    Applied,
    /// The slot already holds a terminal result (or cannot take a revision).
    Stale,
    /// No such record or slot; it may have been removed meanwhile.
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryFile {
    schema_version: u64,
    #[serde(default)]
    records: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    records: Vec<HistoryRecord>,
    /// Ids present in the file as of the last read or write.
    persisted_ids: Vec<String>,
    dirty_ids: Vec<String>,
    removed_ids: Vec<String>,
    cleared: bool,
}

impl HistoryStore {
    pub fn open(path: impl Into<PathBuf>, limit: usize) -> Self {
        let path = path.into();
        let records = read_records(&path);
        Self {
            path,
            limit,
            persisted_ids: record_ids(&records),
            records,
            dirty_ids: Vec::new(),
            removed_ids: Vec::new(),
            cleared: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file, keeping nothing that has not been saved.
    pub fn reload(&mut self) {
        self.records = read_records(&self.path);
        self.persisted_ids = record_ids(&self.records);
        self.dirty_ids.clear();
        self.removed_ids.clear();
        self.cleared = false;
    }

    pub fn begin(&mut self, record: HistoryRecord) -> anyhow::Result<()> {
        if self.records.iter().any(|existing| existing.id == record.id) {
            bail!("history record '{}' already exists", record.id);
        }
        let id = record.id.clone();
        self.records.push(record);
        self.mark_dirty(&id);
        self.save()
    }

    pub fn complete_slot(
        &mut self,
        record_id: &str,
        index: usize,
        outcome: SlotOutcome,
    ) -> anyhow::Result<SlotUpdate> {
        if self.removed_elsewhere(record_id) {
            return Ok(SlotUpdate::Unknown);
        }
        let Some(record) = self.records.iter_mut().find(|row| row.id == record_id) else {
            return Ok(SlotUpdate::Unknown);
        };
        let Some(slot) = record.slots.iter_mut().find(|slot| slot.index == index) else {
            return Ok(SlotUpdate::Unknown);
        };
        if slot.state.is_terminal() {
            tracing::debug!(record_id, index, "ignoring completion for settled slot");
            return Ok(SlotUpdate::Stale);
        }
        slot.state = outcome.into();
        record.updated_at = now_utc_iso();
        self.mark_dirty(record_id);
        self.save()?;
        Ok(SlotUpdate::Applied)
    }

    pub fn add_revision(
        &mut self,
        record_id: &str,
        index: usize,
        revision: Revision,
    ) -> anyhow::Result<SlotUpdate> {
        if self.removed_elsewhere(record_id) {
            return Ok(SlotUpdate::Unknown);
        }
        let Some(record) = self.records.iter_mut().find(|row| row.id == record_id) else {
            return Ok(SlotUpdate::Unknown);
        };
        let Some(slot) = record.slots.iter_mut().find(|slot| slot.index == index) else {
            return Ok(SlotUpdate::Unknown);
        };
        if !matches!(slot.state, SlotState::Ready { .. }) {
            return Ok(SlotUpdate::Stale);
        }
        slot.revisions.push(revision);
        record.updated_at = now_utc_iso();
        self.mark_dirty(record_id);
        self.save()?;
        Ok(SlotUpdate::Applied)
    }

    pub fn get(&self, record_id: &str) -> Option<&HistoryRecord> {
        self.records.iter().find(|row| row.id == record_id)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<&HistoryRecord> {
        let mut rows: Vec<&HistoryRecord> = self.records.iter().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn remove(&mut self, record_id: &str) -> anyhow::Result<bool> {
        let before = self.records.len();
        self.records.retain(|row| row.id != record_id);
        if self.records.len() == before {
            return Ok(false);
        }
        self.dirty_ids.retain(|id| id != record_id);
        if !self.removed_ids.iter().any(|id| id == record_id) {
            self.removed_ids.push(record_id.to_string());
        }
        self.save()?;
        Ok(true)
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.records.clear();
        self.dirty_ids.clear();
        self.removed_ids.clear();
        self.cleared = true;
        self.save()
    }

    pub fn save(&mut self) -> anyhow::Result<()> {
        let mut merged = if self.cleared {
            Vec::new()
        } else {
            read_records(&self.path)
        };
        merged.retain(|row| !self.removed_ids.contains(&row.id));

        for id in &self.dirty_ids {
            let Some(ours) = self.records.iter().find(|row| &row.id == id) else {
                continue;
            };
            match merged.iter_mut().find(|row| &row.id == id) {
                Some(theirs) => *theirs = merge_record(ours, theirs),
                // Saved before and gone now: another writer removed it.
                None if !self.cleared && self.persisted_ids.contains(id) => {
                    tracing::debug!(record_id = %id, "not restoring removed history record");
                }
                None => merged.push(ours.clone()),
            }
        }

        if self.limit > 0 && merged.len() > self.limit {
            merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            let excess = merged.len() - self.limit;
            merged.drain(..excess);
        }

        write_records(&self.path, &merged)?;
        self.persisted_ids = record_ids(&merged);
        self.records = merged;
        self.dirty_ids.clear();
        self.removed_ids.clear();
        self.cleared = false;
        Ok(())
    }

    /// Drops a saved record that is no longer in the file, e.g. after a
    /// `remove` or `clear` through another store.
    fn removed_elsewhere(&mut self, record_id: &str) -> bool {
        if !self.persisted_ids.iter().any(|id| id == record_id) {
            return false;
        }
        if read_records(&self.path).iter().any(|row| row.id == record_id) {
            return false;
        }
        tracing::debug!(record_id, "history record removed by another writer");
        self.records.retain(|row| row.id != record_id);
        self.dirty_ids.retain(|id| id != record_id);
        self.persisted_ids.retain(|id| id != record_id);
        true
    }

    fn mark_dirty(&mut self, record_id: &str) {
        if !self.dirty_ids.iter().any(|id| id == record_id) {
            self.dirty_ids.push(record_id.to_string());
        }
    }
}

/// Our copy wins except where the other writer settled a slot we still see
/// as pending, or recorded more revisions.
fn merge_record(ours: &HistoryRecord, theirs: &HistoryRecord) -> HistoryRecord {
    let mut merged = ours.clone();
    for slot in &mut merged.slots {
        let Some(other) = theirs.slots.iter().find(|row| row.index == slot.index) else {
            continue;
        };
        if !slot.state.is_terminal() && other.state.is_terminal() {
            slot.state = other.state.clone();
        }
        if other.revisions.len() > slot.revisions.len() {
            slot.revisions = other.revisions.clone();
        }
    }
    if theirs.updated_at > merged.updated_at {
        merged.updated_at = theirs.updated_at.clone();
    }
    merged
}

fn record_ids(records: &[HistoryRecord]) -> Vec<String> {
    records.iter().map(|row| row.id.clone()).collect()
}

fn read_records(path: &Path) -> Vec<HistoryRecord> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(file) = serde_json::from_str::<HistoryFile>(&raw) else {
        tracing::warn!(path = %path.display(), "unreadable history file; starting empty");
        return Vec::new();
    };
    let mut records: Vec<HistoryRecord> = Vec::new();
    for item in file.records {
        if let Ok(record) = serde_json::from_value::<HistoryRecord>(item) {
            if !records.iter().any(|existing| existing.id == record.id) {
                records.push(record);
            }
        }
    }
    records
}

fn write_records(path: &Path, records: &[HistoryRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = HistoryFile {
        schema_version: HISTORY_SCHEMA_VERSION,
        records: records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()?,
    };
    std::fs::write(path, serde_json::to_string_pretty(&file)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
