//! Periodic timestamp records

use crate::server::shutdown::ShutdownListener;
use crate::server::LogStore;
use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error};

/// Layout of a timestamp record, terminated by the record delimiter
pub const TIMESTAMP_FORMAT: &str = "timestamp: %a, %d %b %Y %H:%M:%S %z\n";

/// Render `now` as a timestamp record
pub fn format_timestamp<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Appends a local wall-clock record to the log on a fixed period
pub struct TimestampEmitter {
    store: Arc<LogStore>,
    period: Duration,
}

impl TimestampEmitter {
    /// Create an emitter writing into `store` every `period`
    pub fn new(store: Arc<LogStore>, period: Duration) -> Self {
        Self { store, period }
    }

    /// Run until shutdown is requested. The first record is written
    /// immediately. Returns the number of records written.
    pub async fn run(self, mut shutdown: ShutdownListener) -> u64 {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut written = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let record = format_timestamp(&Local::now());
                    match self.store.append(record.as_bytes()).await {
                        Ok(()) => {
                            written += 1;
                            debug!(record = record.trim_end(), "Timestamp appended");
                        }
                        Err(e) => error!(error = %e, "Failed to append timestamp"),
                    }
                }
            }
        }

        debug!(records = written, "Timestamp emitter stopped");
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::shutdown::ShutdownCoordinator;
    use chrono::{FixedOffset, Utc};
    use tempfile::tempdir;
    use tokio::time::{sleep, timeout};

    #[test]
    fn test_format_timestamp_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(
            format_timestamp(&at),
            "timestamp: Tue, 05 Mar 2024 07:08:09 +0000\n"
        );

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let at = offset.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            format_timestamp(&at),
            "timestamp: Sun, 31 Dec 2023 23:59:59 +0200\n"
        );
    }

    #[tokio::test]
    async fn test_emitter_appends_until_shutdown() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(
            LogStore::open_path(temp_dir.path().join("data"), false)
                .await
                .unwrap(),
        );
        let coordinator = ShutdownCoordinator::new();

        let emitter = TimestampEmitter::new(Arc::clone(&store), Duration::from_millis(30));
        let task = tokio::spawn(emitter.run(coordinator.subscribe()));

        sleep(Duration::from_millis(100)).await;
        coordinator.handle().trigger();

        let written = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(written >= 2, "expected several records, got {}", written);

        let contents = store.read_all().await.unwrap();
        let text = String::from_utf8(contents.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len() as u64, written);
        assert!(lines.iter().all(|line| line.starts_with("timestamp: ")));

        // The store stays open; closing it is the coordinator's job
        assert!(store.is_open().await);
    }

    #[tokio::test]
    async fn test_emitter_keeps_running_after_store_errors() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(
            LogStore::open_path(temp_dir.path().join("data"), false)
                .await
                .unwrap(),
        );
        store.close(false).await.unwrap();
        let coordinator = ShutdownCoordinator::new();

        let emitter = TimestampEmitter::new(Arc::clone(&store), Duration::from_millis(10));
        let task = tokio::spawn(emitter.run(coordinator.subscribe()));

        sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        coordinator.handle().trigger();

        let written = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(written, 0);
    }
}
