use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::debug;

use crate::usage::ledger::{DAY_KEY_FORMAT, UsageLedger, UsageStatus};

/// Daily usage accounting over a [`UsageLedger`]
///
/// The engine holds no clock and performs no I/O: every operation takes the
/// ledger and the caller's "now", and the caller persists the result. The
/// time zone decides what "local" means for day-keys and midnight
/// boundaries.
///
/// None of the operations fail. Out-of-range input is clamped: non-positive
/// increments are ignored, missing or negative buckets read as zero and
/// remaining time never drops below zero.
#[derive(Debug, Clone)]
pub struct UsageEngine<Tz: TimeZone> {
    tz: Tz,
}

impl Default for UsageEngine<Local> {
    fn default() -> Self {
        Self::new(Local)
    }
}

impl<Tz: TimeZone> UsageEngine<Tz> {
    /// Create an engine whose days follow `tz`
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Local calendar date of `timestamp` formatted as YYYY-MM-DD
    pub fn day_key(&self, timestamp: DateTime<Utc>) -> String {
        self.local_date(timestamp).format(DAY_KEY_FORMAT).to_string()
    }

    /// Seconds accrued on `now`'s local day
    pub fn used_seconds(&self, ledger: &UsageLedger, now: DateTime<Utc>) -> i64 {
        ledger
            .daily_usage_seconds
            .get(&self.day_key(now))
            .copied()
            .unwrap_or(0)
            .max(0)
    }

    /// Seconds left before `now`'s local day hits the cap
    pub fn remaining_seconds(&self, ledger: &UsageLedger, now: DateTime<Utc>) -> i64 {
        (ledger.daily_limit_seconds.max(0) - self.used_seconds(ledger, now)).max(0)
    }

    /// Used, remaining and limit for one `now` snapshot
    pub fn usage_status(&self, ledger: &UsageLedger, now: DateTime<Utc>) -> UsageStatus {
        let used = self.used_seconds(ledger, now);
        let limit = ledger.daily_limit_seconds.max(0);
        UsageStatus::new(used, limit - used, limit)
    }

    /// Add `seconds` to `now`'s local day, truncated at the cap
    ///
    /// Returns the new used total for that day. Seconds beyond the cap are
    /// discarded.
    pub fn increment_usage(&self, ledger: &mut UsageLedger, seconds: i64, now: DateTime<Utc>) -> i64 {
        let prior = self.used_seconds(ledger, now);
        if seconds <= 0 {
            return prior;
        }

        let limit = ledger.daily_limit_seconds.max(0);
        let allowed = seconds.min(limit - prior).max(0);
        let next = prior + allowed;

        ledger.daily_usage_seconds.insert(self.day_key(now), next);
        next
    }

    /// Open a session at `now` unless one is already open
    pub fn start_session_if_needed(&self, ledger: &mut UsageLedger, now: DateTime<Utc>) {
        if ledger.active_session_started_at.is_none() {
            ledger.active_session_started_at = Some(now);
        }
    }

    /// Close the open session, crediting its duration day by day
    ///
    /// The session is split at every local midnight between its start and
    /// `now`; each piece is capped against its own day. A `now` at or before
    /// the session start clears the session without crediting anything.
    /// Returns the seconds actually credited.
    pub fn stop_session_and_accrue(&self, ledger: &mut UsageLedger, now: DateTime<Utc>) -> i64 {
        let Some(start) = ledger.active_session_started_at.take() else {
            return 0;
        };

        if now <= start {
            debug!(
                session_start = %start,
                now = %now,
                "Dropping session that ends before it starts"
            );
            return 0;
        }

        let mut credited = 0;
        let mut cursor = start;
        while cursor < now {
            let segment_end = self.next_local_midnight_after(cursor).min(now);
            let segment_seconds = (segment_end - cursor).num_seconds();

            let before = self.used_seconds(ledger, cursor);
            let after = self.increment_usage(ledger, segment_seconds, cursor);
            credited += after - before;

            cursor = segment_end;
        }

        credited
    }

    /// Zero `now`'s local day and close any open session
    ///
    /// Other days are left untouched.
    pub fn reset_today(&self, ledger: &mut UsageLedger, now: DateTime<Utc>) {
        ledger.daily_usage_seconds.insert(self.day_key(now), 0);
        ledger.active_session_started_at = None;
    }

    /// Drop every day whose local midnight is strictly before `cutoff`
    ///
    /// Keys that are not valid dates are kept. Returns the number of days
    /// removed.
    pub fn prune_older_than(&self, ledger: &mut UsageLedger, cutoff: DateTime<Utc>) -> usize {
        let before = ledger.daily_usage_seconds.len();

        ledger.daily_usage_seconds.retain(|key, _| {
            match NaiveDate::parse_from_str(key, DAY_KEY_FORMAT) {
                Ok(date) => self
                    .start_of_local_day(date)
                    .is_none_or(|midnight| midnight >= cutoff),
                Err(_) => true,
            }
        });

        before - ledger.daily_usage_seconds.len()
    }

    /// First instant of the local day following `instant`'s local day
    pub fn next_local_midnight_after(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.local_date(instant)
            .succ_opt()
            .and_then(|next_day| self.start_of_local_day(next_day))
            .filter(|midnight| *midnight > instant)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// First existing local instant of `date`
    ///
    /// Where a DST change skips local midnight, the day starts at the first
    /// local minute that exists.
    pub fn start_of_local_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = date.and_time(NaiveTime::MIN);

        (0..=24 * 60).find_map(|minute| {
            let local = midnight.checked_add_signed(Duration::minutes(minute))?;
            self.tz
                .from_local_datetime(&local)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
        })
    }

    fn local_date(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.tz).date_naive()
    }
}
