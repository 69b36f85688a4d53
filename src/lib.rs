//! Tutor Usage - daily conversation-time accounting for tutoring-chat students
//!
//! The accounting core is [`usage::UsageEngine`], a pure state machine over a
//! student's [`usage::UsageLedger`]. [`usage::UsageTracker`] wraps it with
//! storage, per-student serialization and the login/heartbeat/reset events
//! the chat backend raises.

pub mod config;
pub mod platform;
pub mod usage;

pub use crate::config::Config;
pub use crate::usage::{
    Admission, DayZone, JsonFileStore, LedgerStore, MemoryStore, MessageRole, RetentionScheduler,
    UsageEngine, UsageLedger, UsageStatus, UsageTracker,
};
