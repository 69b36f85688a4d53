use serde::{Deserialize, Serialize};
use tracing::info;

use crate::usage::ledger::UsageStatus;

/// Message shown to a student whose daily time is used up
pub const LIMIT_REACHED_MESSAGE: &str = "Daily usage limit reached. Please come back tomorrow.";

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Outcome of checking a message against the daily limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed(UsageStatus),
    LimitReached(UsageStatus),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Usage snapshot the decision was made on
    pub fn status(&self) -> UsageStatus {
        match self {
            Self::Allowed(status) | Self::LimitReached(status) => *status,
        }
    }

    /// Denial message, if the message was refused
    pub fn denial_message(&self) -> Option<&'static str> {
        match self {
            Self::Allowed(_) => None,
            Self::LimitReached(_) => Some(LIMIT_REACHED_MESSAGE),
        }
    }
}

/// Decides whether a chat message may go through
///
/// Only student messages are gated; assistant replies to an admitted prompt
/// are always stored.
pub struct UsageGate;

impl UsageGate {
    pub fn admit(student_id: &str, role: MessageRole, status: UsageStatus) -> Admission {
        if role == MessageRole::User && status.is_exhausted() {
            info!(
                student_id = %student_id,
                used = status.used_seconds,
                limit = status.limit_seconds,
                "Daily usage limit reached, refusing message"
            );
            return Admission::LimitReached(status);
        }

        Admission::Allowed(status)
    }
}
