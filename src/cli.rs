use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tutor_usage::MessageRole;

/// Tutor Usage
///
/// Tracks, caps and resets each student's daily conversation time.
#[derive(Parser, Debug)]
#[command(name = "tutor-usage")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (platform default when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of student usage documents (overrides the config file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Evaluate at this instant instead of the current time (RFC 3339)
    #[arg(long, global = true, value_parser = parse_instant)]
    pub at: Option<DateTime<Utc>>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example configuration file
    Init {
        /// Where to write the file (defaults to --config or the platform path)
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Record a login, creating the student's ledger on first sight
    Login {
        student_id: String,

        /// Display name to store with the ledger
        #[arg(long)]
        name: Option<String>,
    },
    /// Record a client heartbeat
    Heartbeat {
        student_id: String,

        /// Seconds to credit (config default when omitted)
        #[arg(long, allow_negative_numbers = true)]
        seconds: Option<i64>,
    },
    /// Close the open session and credit its time
    EndSession { student_id: String },
    /// Show today's usage
    Status {
        student_id: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Check whether a message may be sent (exit code 2 when refused)
    Check {
        student_id: String,

        #[arg(long, value_enum, default_value_t = RoleArg::User)]
        role: RoleArg,
    },
    /// Reset today's usage and close any open session
    Reset { student_id: String },
    /// Change a student's daily limit
    SetLimit {
        student_id: String,

        /// New limit in minutes
        #[arg(long)]
        minutes: u32,
    },
    /// Show recorded days, newest first
    History { student_id: String },
    /// Prune history outside the retention window once
    Prune,
    /// Run the retention scheduler until interrupted
    Daemon,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleArg {
    User,
    Assistant,
}

impl From<RoleArg> for MessageRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => MessageRole::User,
            RoleArg::Assistant => MessageRole::Assistant,
        }
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", value, e))
}
