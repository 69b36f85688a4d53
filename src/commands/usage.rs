use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use tutor_usage::config::{get_config_path, load_config_or_default, Config, EXAMPLE_CONFIG};
use tutor_usage::usage::{
    Admission, DayZone, JsonFileStore, MessageRole, RetentionScheduler, UsageEngine, UsageStatus,
    UsageTracker,
};

use super::utils::format_seconds;
use crate::cli::{Args, Commands};

/// Exit code of `check` when the message is refused
const EXIT_LIMIT_REACHED: i32 = 2;

/// Run a parsed command line
pub async fn run_command(args: Args) -> Result<()> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };
    let now = args.at.unwrap_or_else(Utc::now);

    match args.command {
        Commands::Init { output, force } => init(output.unwrap_or(config_path), force),
        command => {
            let config = load_config_or_default(&config_path)?;
            let tracker = build_tracker(&config, args.data_dir.as_deref())?;
            run_usage_command(command, &config, tracker, now).await
        }
    }
}

async fn run_usage_command(
    command: Commands,
    config: &Config,
    tracker: Arc<UsageTracker<DayZone>>,
    now: DateTime<Utc>,
) -> Result<()> {
    match command {
        Commands::Init { .. } => anyhow::bail!("init does not use the usage store"),
        Commands::Login { student_id, name } => {
            let status = tracker.login(&student_id, name.as_deref(), now).await?;
            print_status(&student_id, &status, false)
        }
        Commands::Heartbeat { student_id, seconds } => {
            let status = tracker.heartbeat(&student_id, seconds, now).await?;
            print_status(&student_id, &status, false)
        }
        Commands::EndSession { student_id } => {
            let status = tracker.end_session(&student_id, now).await?;
            print_status(&student_id, &status, false)
        }
        Commands::Status { student_id, json } => {
            let status = tracker.status(&student_id, now).await?;
            print_status(&student_id, &status, json)
        }
        Commands::Check { student_id, role } => {
            let admission = check(&tracker, &student_id, role.into(), now).await?;
            if !admission.is_allowed() {
                std::process::exit(EXIT_LIMIT_REACHED);
            }
            Ok(())
        }
        Commands::Reset { student_id } => {
            let status = tracker.reset_today(&student_id, now).await?;
            println!("✓ Reset today's usage for {}", student_id);
            print_status(&student_id, &status, false)
        }
        Commands::SetLimit { student_id, minutes } => {
            let status = tracker
                .set_daily_limit(&student_id, i64::from(minutes) * 60, now)
                .await?;
            println!("✓ Daily limit for {} set to {} minutes", student_id, minutes);
            print_status(&student_id, &status, false)
        }
        Commands::History { student_id } => history(&tracker, &student_id).await,
        Commands::Prune => {
            let removed = tracker.prune_all(now).await?;
            println!("✓ Removed {} day(s) of usage history", removed);
            Ok(())
        }
        Commands::Daemon => daemon(tracker, config.retention.interval_seconds).await,
    }
}

/// Build a file-backed tracker from configuration
pub fn build_tracker(
    config: &Config,
    data_dir: Option<&Path>,
) -> Result<Arc<UsageTracker<DayZone>>> {
    let data_dir = match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => config.storage.resolve_data_dir()?,
    };
    debug!("Using data directory: {}", data_dir.display());

    Ok(Arc::new(UsageTracker::new(
        Arc::new(JsonFileStore::new(data_dir)),
        UsageEngine::new(config.usage.timezone),
        config.usage.clone(),
        config.retention.clone(),
    )))
}

/// Write the example configuration file
pub fn init(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            output.display()
        );
    }

    tutor_usage::platform::atomic_write(&output, EXAMPLE_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", output.display()))?;

    println!("✓ Created configuration file: {}", output.display());
    println!("\nEdit this file to set the daily limit, day boundary and retention window.");

    Ok(())
}

/// Decide whether a message may be sent and report the outcome
pub async fn check(
    tracker: &UsageTracker<DayZone>,
    student_id: &str,
    role: MessageRole,
    now: DateTime<Utc>,
) -> Result<Admission> {
    let admission = tracker.admit_message(student_id, role, now).await?;

    match admission.denial_message() {
        Some(message) => println!("✗ {}", message),
        None => println!(
            "✓ Allowed ({} remaining today)",
            format_seconds(admission.status().remaining_seconds)
        ),
    }

    Ok(admission)
}

async fn history(tracker: &UsageTracker<DayZone>, student_id: &str) -> Result<()> {
    let days = tracker.history(student_id).await?;

    println!("\n=== Usage History for {} ===\n", student_id);

    if days.is_empty() {
        println!("No usage recorded");
        return Ok(());
    }

    for (day, seconds) in days {
        println!("  {}  {}", day, format_seconds(seconds));
    }
    println!();

    Ok(())
}

async fn daemon(tracker: Arc<UsageTracker<DayZone>>, interval_seconds: u64) -> Result<()> {
    let scheduler = RetentionScheduler::new(tracker, interval_seconds);
    let handle = scheduler.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown requested");
    scheduler.stop().await;
    handle.abort();

    Ok(())
}

fn print_status(student_id: &str, status: &UsageStatus, json: bool) -> Result<()> {
    if json {
        let content = serde_json::to_string_pretty(status)
            .context("Failed to serialize usage status")?;
        println!("{}", content);
        return Ok(());
    }

    println!("Student: {}", student_id);
    println!("  Used today: {}", format_seconds(status.used_seconds));
    println!("  Remaining:  {}", format_seconds(status.remaining_seconds));
    println!("  Daily limit: {}", format_seconds(status.limit_seconds));
    if status.is_exhausted() {
        println!("  Status: LIMIT REACHED");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use clap::Parser;
    use chrono::TimeZone;
    use predicates::prelude::*;

    fn with_common(cmd: &[&str], common: &[&str]) -> Args {
        let argv = std::iter::once("tutor-usage")
            .chain(cmd.iter().copied())
            .chain(common.iter().copied());
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_init_writes_example_config() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = temp.child("config.yaml");

        init(config.path().to_path_buf(), false).unwrap();
        config.assert(predicate::path::is_file());
        assert_eq!(std::fs::read_to_string(config.path()).unwrap(), EXAMPLE_CONFIG);

        assert!(init(config.path().to_path_buf(), false).is_err());
        init(config.path().to_path_buf(), true).unwrap();
    }

    #[tokio::test]
    async fn test_commands_share_data_dir() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = temp.child("config.yaml");
        config
            .write_str("usage:\n  timezone: utc\n  daily_limit_seconds: 600\n")
            .unwrap();
        let data = temp.child("students");

        let common = [
            "--config",
            config.path().to_str().unwrap(),
            "--data-dir",
            data.path().to_str().unwrap(),
            "--at",
            "2024-01-01T10:00:00Z",
        ];

        run_command(with_common(&["login", "s-45", "--name", "Ada"], &common)).await.unwrap();
        run_command(with_common(&["heartbeat", "s-45", "--seconds", "120"], &common)).await.unwrap();
        data.child("s-45.json").assert(predicate::path::is_file());

        let cfg = load_config_or_default(config.path()).unwrap();
        let tracker = build_tracker(&cfg, Some(data.path())).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        let status = tracker.status("s-45", now).await.unwrap();
        assert_eq!(status.used_seconds, 120);
        assert_eq!(status.limit_seconds, 600);

        run_command(with_common(&["reset", "s-45"], &common)).await.unwrap();
        assert_eq!(tracker.status("s-45", now).await.unwrap().used_seconds, 0);
    }

    #[tokio::test]
    async fn test_check_reports_refusal() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.usage.timezone = DayZone::Utc;
        let tracker = build_tracker(&config, Some(temp.path())).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        tracker.login("s-1", None, now).await.unwrap();
        assert!(check(&tracker, "s-1", MessageRole::User, now).await.unwrap().is_allowed());

        tracker.set_daily_limit("s-1", 0, now).await.unwrap();
        let admission = check(&tracker, "s-1", MessageRole::User, now).await.unwrap();
        assert!(!admission.is_allowed());
    }

    #[tokio::test]
    async fn test_status_for_unknown_student_fails() {
        let temp = tempfile::tempdir().unwrap();
        let tracker = build_tracker(&Config::default(), Some(temp.path())).unwrap();

        assert!(tracker.status("nobody", Utc::now()).await.is_err());
    }
}
