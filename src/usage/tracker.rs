use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{RetentionSettings, UsageSettings};
use crate::usage::engine::UsageEngine;
use crate::usage::enforcement::{Admission, MessageRole, UsageGate};
use crate::usage::ledger::UsageStatus;
use crate::usage::store::{LedgerStore, StudentUsageRecord};

/// Applies student events to stored ledgers
///
/// Every mutating event is a load, engine update and save cycle run under a
/// per-student lock, so events for one student never interleave inside this
/// process. Separate processes sharing a store are not coordinated: the last
/// save wins and increments from the other writer can be lost.
pub struct UsageTracker<Tz: TimeZone> {
    store: Arc<dyn LedgerStore>,
    engine: UsageEngine<Tz>,
    settings: UsageSettings,
    retention: RetentionSettings,
    student_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<Tz: TimeZone> UsageTracker<Tz> {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        engine: UsageEngine<Tz>,
        settings: UsageSettings,
        retention: RetentionSettings,
    ) -> Self {
        Self {
            store,
            engine,
            settings,
            retention,
            student_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn retention(&self) -> &RetentionSettings {
        &self.retention
    }

    /// Student logged in: create the ledger on first sight, refresh the name
    /// and prune old history
    pub async fn login(
        &self,
        student_id: &str,
        student_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UsageStatus> {
        let (record, created) = self
            .with_student_lock(student_id, || {
                let (mut record, created) = match self.store.load(student_id)? {
                    Some(record) => (record, false),
                    None => (
                        StudentUsageRecord::new(
                            student_id,
                            student_name.map(str::to_string),
                            self.settings.daily_limit_seconds,
                            now,
                        ),
                        true,
                    ),
                };

                if let Some(name) = student_name {
                    record.student_name = Some(name.to_string());
                }

                self.prune_record(&mut record, now);
                record.touch(now);
                self.store.save(&record)?;

                Ok((record, created))
            })
            .await?;

        let status = self.engine.usage_status(&record.usage, now);
        info!(
            student_id = %student_id,
            created,
            used = status.used_seconds,
            remaining = status.remaining_seconds,
            "Student logged in"
        );
        Ok(status)
    }

    /// Client heartbeat: credit the open session up to `now`, add the
    /// heartbeat's own seconds and reopen the session
    ///
    /// `seconds` falls back to the configured default and is clamped to
    /// `[0, heartbeat_max_seconds]`.
    pub async fn heartbeat(
        &self,
        student_id: &str,
        seconds: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<UsageStatus> {
        let seconds = self.clamp_heartbeat(seconds);

        let record = self
            .update(student_id, now, |engine, record| {
                let credited = engine.stop_session_and_accrue(&mut record.usage, now);
                engine.increment_usage(&mut record.usage, seconds, now);
                engine.start_session_if_needed(&mut record.usage, now);
                debug!(
                    student_id = %record.student_id,
                    session_seconds = credited,
                    heartbeat_seconds = seconds,
                    "Heartbeat accrued"
                );
            })
            .await?;

        Ok(self.engine.usage_status(&record.usage, now))
    }

    /// Student left: credit and close the open session
    pub async fn end_session(&self, student_id: &str, now: DateTime<Utc>) -> Result<UsageStatus> {
        let record = self
            .update(student_id, now, |engine, record| {
                let credited = engine.stop_session_and_accrue(&mut record.usage, now);
                info!(
                    student_id = %record.student_id,
                    credited,
                    "Session ended"
                );
            })
            .await?;

        Ok(self.engine.usage_status(&record.usage, now))
    }

    /// Today's usage for a student
    pub async fn status(&self, student_id: &str, now: DateTime<Utc>) -> Result<UsageStatus> {
        let record = self.load_existing(student_id)?;
        Ok(self.engine.usage_status(&record.usage, now))
    }

    /// Whether a chat message from `role` may be sent now
    pub async fn admit_message(
        &self,
        student_id: &str,
        role: MessageRole,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let status = self.status(student_id, now).await?;
        Ok(UsageGate::admit(student_id, role, status))
    }

    /// Administrative reset of today's usage
    pub async fn reset_today(&self, student_id: &str, now: DateTime<Utc>) -> Result<UsageStatus> {
        let record = self
            .update(student_id, now, |engine, record| {
                engine.reset_today(&mut record.usage, now);
            })
            .await?;

        info!(student_id = %student_id, "Reset today's usage");
        Ok(self.engine.usage_status(&record.usage, now))
    }

    /// Administrative change of a student's daily cap
    ///
    /// Negative values clamp to zero. Days already recorded keep their
    /// totals.
    pub async fn set_daily_limit(
        &self,
        student_id: &str,
        limit_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<UsageStatus> {
        let limit_seconds = limit_seconds.max(0);

        let record = self
            .update(student_id, now, |_, record| {
                record.usage.daily_limit_seconds = limit_seconds;
            })
            .await?;

        info!(student_id = %student_id, limit_seconds, "Daily limit updated");
        Ok(self.engine.usage_status(&record.usage, now))
    }

    /// Recorded days for a student, newest first
    pub async fn history(&self, student_id: &str) -> Result<Vec<(String, i64)>> {
        let record = self.load_existing(student_id)?;
        Ok(record
            .usage
            .days_newest_first()
            .into_iter()
            .map(|(day, seconds)| (day.to_string(), seconds))
            .collect())
    }

    /// Retention pass over every stored student
    ///
    /// A student whose record cannot be processed is logged and skipped.
    /// Returns the number of day buckets removed.
    pub async fn prune_all(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = self.retention_cutoff(now) else {
            debug!("Retention disabled, keeping all usage history");
            return Ok(0);
        };

        let mut removed_total = 0;
        for student_id in self.store.list()? {
            match self.prune_student(&student_id, cutoff, now).await {
                Ok(removed) => removed_total += removed,
                Err(e) => warn!(student_id = %student_id, "Failed to prune usage: {:#}", e),
            }
        }

        info!(
            removed = removed_total,
            cutoff = %cutoff,
            "Retention pass complete"
        );
        Ok(removed_total)
    }

    /// Oldest instant still retained, `None` when retention is disabled
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.retention.days == 0 {
            return None;
        }
        now.checked_sub_signed(Duration::days(i64::from(self.retention.days)))
    }

    async fn prune_student(
        &self,
        student_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.with_student_lock(student_id, || {
            let Some(mut record) = self.store.load(student_id)? else {
                return Ok(0);
            };

            let removed = self.engine.prune_older_than(&mut record.usage, cutoff);
            if removed > 0 {
                record.touch(now);
                self.store.save(&record)?;
                debug!(student_id = %student_id, removed, "Pruned usage history");
            }

            Ok(removed)
        })
        .await
    }

    /// Locked load, mutate and save of an existing student's record
    async fn update<F>(&self, student_id: &str, now: DateTime<Utc>, apply: F) -> Result<StudentUsageRecord>
    where
        F: FnOnce(&UsageEngine<Tz>, &mut StudentUsageRecord),
    {
        self.with_student_lock(student_id, || {
            let mut record = self.load_existing(student_id)?;
            apply(&self.engine, &mut record);
            self.prune_record(&mut record, now);
            record.touch(now);

            self.store
                .save(&record)
                .with_context(|| format!("Failed to save usage for student: {}", student_id))?;

            Ok(record)
        })
        .await
    }

    fn load_existing(&self, student_id: &str) -> Result<StudentUsageRecord> {
        self.store
            .load(student_id)?
            .with_context(|| format!("Student not found: {}", student_id))
    }

    fn prune_record(&self, record: &mut StudentUsageRecord, now: DateTime<Utc>) {
        if let Some(cutoff) = self.retention_cutoff(now) {
            self.engine.prune_older_than(&mut record.usage, cutoff);
        }
    }

    fn clamp_heartbeat(&self, seconds: Option<i64>) -> i64 {
        seconds
            .unwrap_or(self.settings.heartbeat_default_seconds)
            .clamp(0, self.settings.heartbeat_max_seconds.max(0))
    }

    /// Run `f` while holding the student's lock
    ///
    /// The lock entry is dropped from the registry once no other event holds
    /// or waits on it.
    async fn with_student_lock<T, F>(&self, student_id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock = self.student_lock(student_id).await;
        let result = {
            let _guard = lock.lock().await;
            f()
        };
        self.release_student_lock(student_id, lock).await;
        result
    }

    async fn student_lock(&self, student_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.student_locks.lock().await;
        locks
            .entry(student_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_student_lock(&self, student_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);

        let mut locks = self.student_locks.lock().await;
        if locks
            .get(student_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(student_id);
        }
    }
}
