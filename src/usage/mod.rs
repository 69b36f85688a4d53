//! Daily usage accounting for tutoring-chat students
//!
//! This module provides functionality to:
//! - Accrue conversation time into local-day buckets, capped per day
//! - Split sessions that cross local midnight
//! - Persist one usage document per student
//! - Gate chat messages once the day's time is used up
//! - Prune history outside the retention window

pub mod engine;
pub mod enforcement;
pub mod ledger;
pub mod retention;
pub mod store;
pub mod tracker;
pub mod zone;

pub use engine::UsageEngine;
pub use enforcement::{Admission, MessageRole, UsageGate, LIMIT_REACHED_MESSAGE};
pub use ledger::{UsageLedger, UsageStatus, DEFAULT_DAILY_LIMIT_SECONDS};
pub use retention::RetentionScheduler;
pub use store::{JsonFileStore, LedgerStore, MemoryStore, StudentUsageRecord};
pub use tracker::UsageTracker;
pub use zone::DayZone;
