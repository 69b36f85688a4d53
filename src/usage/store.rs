use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::platform::atomic_write;
use crate::usage::ledger::UsageLedger;

/// Current record version
const RECORD_VERSION: &str = "1.0";

/// Persisted usage document for one student
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUsageRecord {
    pub version: String,
    pub student_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    pub usage: UsageLedger,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentUsageRecord {
    /// Create a record with an empty ledger
    pub fn new(student_id: &str, student_name: Option<String>, daily_limit_seconds: i64, now: DateTime<Utc>) -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            student_id: student_id.to_string(),
            student_name,
            usage: UsageLedger::new(daily_limit_seconds),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stamp the record as modified
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Durable storage of student usage records
///
/// Implementations do not serialize concurrent read-modify-write cycles;
/// callers that need that hold a per-student lock around load and save.
pub trait LedgerStore: Send + Sync {
    /// Load a student's record, `None` if there is none
    fn load(&self, student_id: &str) -> Result<Option<StudentUsageRecord>>;

    /// Insert or replace a student's record
    fn save(&self, record: &StudentUsageRecord) -> Result<()>;

    /// Delete a student's record, returning whether one existed
    fn delete(&self, student_id: &str) -> Result<bool>;

    /// Ids of every stored student
    fn list(&self) -> Result<Vec<String>>;
}

/// One pretty-printed JSON document per student in a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, student_id: &str) -> Result<PathBuf> {
        validate_student_id(student_id)?;
        Ok(self.dir.join(format!("{}.json", student_id)))
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self, student_id: &str) -> Result<Option<StudentUsageRecord>> {
        let path = self.record_path(student_id)?;

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read usage record: {}", path.display()))?;

        let record: StudentUsageRecord = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse usage record: {}", path.display()))?;

        if record.version != RECORD_VERSION {
            anyhow::bail!(
                "Unsupported usage record version {} (expected {}): {}",
                record.version,
                RECORD_VERSION,
                path.display()
            );
        }

        Ok(Some(record))
    }

    fn save(&self, record: &StudentUsageRecord) -> Result<()> {
        let path = self.record_path(&record.student_id)?;

        let content = serde_json::to_string_pretty(record)
            .context("Failed to serialize usage record")?;

        atomic_write(&path, content.as_bytes())
            .with_context(|| format!("Failed to write usage record: {}", path.display()))?;

        Ok(())
    }

    fn delete(&self, student_id: &str) -> Result<bool> {
        let path = self.record_path(student_id)?;

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete usage record: {}", path.display()))?;

        Ok(true)
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read data directory: {}", self.dir.display()))?;

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to read data directory: {}", self.dir.display()))?
                .path();

            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_student_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Map-backed store for tests and throwaway runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StudentUsageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StudentUsageRecord>>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self, student_id: &str) -> Result<Option<StudentUsageRecord>> {
        Ok(self.records()?.get(student_id).cloned())
    }

    fn save(&self, record: &StudentUsageRecord) -> Result<()> {
        self.records()?
            .insert(record.student_id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, student_id: &str) -> Result<bool> {
        Ok(self.records()?.remove(student_id).is_some())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.records()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Check that a student id is safe to use as a file name
pub fn validate_student_id(student_id: &str) -> Result<()> {
    if student_id.is_empty() {
        anyhow::bail!("Student ID cannot be empty");
    }

    if student_id.starts_with('.') {
        anyhow::bail!("Student ID cannot start with '.': {}", student_id);
    }

    if !student_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        anyhow::bail!(
            "Student ID may only contain letters, digits, '-', '_' and '.': {}",
            student_id
        );
    }

    Ok(())
}
