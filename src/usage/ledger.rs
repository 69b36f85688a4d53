use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default per-day cap: 30 minutes
pub const DEFAULT_DAILY_LIMIT_SECONDS: i64 = 30 * 60;

/// Format of the day-keys in `daily_usage_seconds`
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Daily usage ledger for a single student
///
/// Field names follow the stored document shape, so a ledger written by any
/// caller deserializes without a mapping layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLedger {
    /// Accrued seconds keyed by local calendar day (YYYY-MM-DD)
    #[serde(default)]
    pub daily_usage_seconds: HashMap<String, i64>,

    /// Cap applied independently to each day-key
    #[serde(default = "default_daily_limit")]
    pub daily_limit_seconds: i64,

    /// Start of the open session, if any
    #[serde(default)]
    pub active_session_started_at: Option<DateTime<Utc>>,
}

fn default_daily_limit() -> i64 {
    DEFAULT_DAILY_LIMIT_SECONDS
}

impl UsageLedger {
    /// Create an empty ledger with the given cap
    pub fn new(daily_limit_seconds: i64) -> Self {
        Self {
            daily_usage_seconds: HashMap::new(),
            daily_limit_seconds,
            active_session_started_at: None,
        }
    }

    /// Whether a session is currently open
    pub fn has_active_session(&self) -> bool {
        self.active_session_started_at.is_some()
    }

    /// Day buckets sorted newest first
    pub fn days_newest_first(&self) -> Vec<(&str, i64)> {
        let mut days: Vec<(&str, i64)> = self
            .daily_usage_seconds
            .iter()
            .map(|(day, seconds)| (day.as_str(), (*seconds).max(0)))
            .collect();
        days.sort_by(|a, b| b.0.cmp(a.0));
        days
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_LIMIT_SECONDS)
    }
}

/// Snapshot of a student's usage for one day
///
/// The minute fields mirror the second fields for display, rounded to the
/// nearest minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStatus {
    pub used_seconds: i64,
    pub remaining_seconds: i64,
    pub limit_seconds: i64,
    pub used_minutes: i64,
    pub remaining_minutes: i64,
    pub limit_minutes: i64,
}

impl UsageStatus {
    /// Build a status from second values, clamping each to zero
    pub fn new(used_seconds: i64, remaining_seconds: i64, limit_seconds: i64) -> Self {
        let used_seconds = used_seconds.max(0);
        let remaining_seconds = remaining_seconds.max(0);
        let limit_seconds = limit_seconds.max(0);

        Self {
            used_seconds,
            remaining_seconds,
            limit_seconds,
            used_minutes: round_minutes(used_seconds),
            remaining_minutes: round_minutes(remaining_seconds),
            limit_minutes: round_minutes(limit_seconds),
        }
    }

    /// Whether the day's allowance is used up
    pub fn is_exhausted(&self) -> bool {
        self.remaining_seconds <= 0
    }
}

/// Round non-negative seconds to the nearest minute, halves up
fn round_minutes(seconds: i64) -> i64 {
    (seconds + 30) / 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ledger_is_empty() {
        let ledger = UsageLedger::default();
        assert!(ledger.daily_usage_seconds.is_empty());
        assert_eq!(ledger.daily_limit_seconds, 1800);
        assert!(!ledger.has_active_session());
    }

    #[test]
    fn test_deserialize_document_shape() {
        let json = r#"{
            "dailyUsageSeconds": {"2024-01-01": 120},
            "dailyLimitSeconds": 900,
            "activeSessionStartedAt": "2024-01-01T10:00:00Z"
        }"#;

        let ledger: UsageLedger = serde_json::from_str(json).unwrap();
        assert_eq!(ledger.daily_usage_seconds.get("2024-01-01"), Some(&120));
        assert_eq!(ledger.daily_limit_seconds, 900);
        assert!(ledger.has_active_session());
    }

    #[test]
    fn test_deserialize_missing_fields_uses_defaults() {
        let ledger: UsageLedger = serde_json::from_str("{}").unwrap();
        assert_eq!(ledger, UsageLedger::default());
    }

    #[test]
    fn test_days_newest_first() {
        let mut ledger = UsageLedger::default();
        ledger.daily_usage_seconds.insert("2024-01-02".to_string(), 20);
        ledger.daily_usage_seconds.insert("2023-12-31".to_string(), 5);
        ledger.daily_usage_seconds.insert("2024-01-10".to_string(), -3);

        let days = ledger.days_newest_first();
        assert_eq!(
            days,
            vec![("2024-01-10", 0), ("2024-01-02", 20), ("2023-12-31", 5)]
        );
    }

    #[test]
    fn test_status_minute_mirrors() {
        let status = UsageStatus::new(90, 1710, 1800);
        assert_eq!(status.used_minutes, 2);
        assert_eq!(status.remaining_minutes, 29);
        assert_eq!(status.limit_minutes, 30);
        assert!(!status.is_exhausted());

        let status = UsageStatus::new(29, 0, 1800);
        assert_eq!(status.used_minutes, 0);
        assert!(status.is_exhausted());
    }

    #[test]
    fn test_status_clamps_negative_values() {
        let status = UsageStatus::new(-5, -10, -1);
        assert_eq!(status.used_seconds, 0);
        assert_eq!(status.remaining_seconds, 0);
        assert_eq!(status.limit_seconds, 0);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let value = serde_json::to_value(UsageStatus::new(60, 1740, 1800)).unwrap();
        assert_eq!(value["usedSeconds"], 60);
        assert_eq!(value["remainingSeconds"], 1740);
        assert_eq!(value["limitSeconds"], 1800);
        assert_eq!(value["limitMinutes"], 30);
    }
}
