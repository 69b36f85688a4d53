use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use crate::usage::tracker::UsageTracker;

/// Periodically prunes usage history older than the retention window
pub struct RetentionScheduler<Tz: TimeZone> {
    tracker: Arc<UsageTracker<Tz>>,
    interval: Duration,
    running: Arc<Mutex<bool>>,
}

impl<Tz> RetentionScheduler<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
{
    pub fn new(tracker: Arc<UsageTracker<Tz>>, interval_secs: u64) -> Self {
        Self {
            tracker,
            interval: Duration::from_secs(interval_secs.max(1)),
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// Start the pruning loop; the first pass runs immediately
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        let mut running = self.running.lock().await;
        if *running {
            anyhow::bail!("Retention scheduler is already running");
        }
        *running = true;
        drop(running);

        info!(
            "Starting retention scheduler (every {} seconds, keeping {} days)",
            self.interval.as_secs(),
            self.tracker.retention().days
        );

        let tracker = self.tracker.clone();
        let running = self.running.clone();
        let period = self.interval;

        Ok(tokio::spawn(async move {
            let mut interval = time::interval(period);

            loop {
                interval.tick().await;

                if !*running.lock().await {
                    info!("Retention scheduler stopped");
                    break;
                }

                match tracker.prune_all(Utc::now()).await {
                    Ok(removed) => debug!(removed, "Retention pass finished"),
                    Err(e) => error!("Error in retention pass: {:#}", e),
                }
            }
        }))
    }

    /// Ask the loop to exit before its next pass
    pub async fn stop(&self) {
        *self.running.lock().await = false;
        info!("Stopping retention scheduler");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetentionSettings, UsageSettings};
    use crate::usage::engine::UsageEngine;
    use crate::usage::store::{LedgerStore, MemoryStore, StudentUsageRecord};

    fn make_tracker(store: Arc<MemoryStore>) -> Arc<UsageTracker<Utc>> {
        Arc::new(UsageTracker::new(
            store,
            UsageEngine::new(Utc),
            UsageSettings::default(),
            RetentionSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_first_pass_prunes_immediately() {
        let store = Arc::new(MemoryStore::new());
        let mut record = StudentUsageRecord::new("s-1", None, 1800, Utc::now());
        record.usage.daily_usage_seconds.insert("2020-01-01".to_string(), 100);
        store.save(&record).unwrap();

        let scheduler = RetentionScheduler::new(make_tracker(store.clone()), 3600);
        let handle = scheduler.start().await.unwrap();

        time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        handle.abort();

        let record = store.load("s-1").unwrap().unwrap();
        assert!(record.usage.daily_usage_seconds.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let scheduler = RetentionScheduler::new(make_tracker(Arc::new(MemoryStore::new())), 3600);

        let handle = scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        assert!(scheduler.start().await.is_err());

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        handle.abort();
    }
}
