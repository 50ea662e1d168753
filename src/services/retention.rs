//! Background retention sweep.
//!
//! Runs on its own timer, independent of request traffic. The bundle index
//! expires its records through TTLs computed at write time, so a bundle may
//! briefly outlive its files or the other way round.

use crate::services::{
    kv_store::KeyValueStore,
    storage_service::{LogStorage, SweepError, SweepReport},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RetentionSweeper {
    storage: LogStorage,
    index_store: Arc<dyn KeyValueStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        storage: LogStorage,
        index_store: Arc<dyn KeyValueStore>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            index_store,
            retention,
            interval,
        }
    }

    /// Start the sweep loop. The first pass runs immediately; the loop
    /// exits once `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => self.tick().await,
                }
            }
        })
    }

    async fn tick(&self) {
        match self.run_once().await {
            Ok(report) => tracing::info!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                "retention sweep completed"
            ),
            Err(err) => tracing::error!(error = %err, "retention sweep failed"),
        }

        match self.index_store.purge_expired().await {
            Ok(purged) => tracing::debug!(purged, "purged expired index entries"),
            Err(err) => tracing::error!(error = %err, "failed to purge expired index entries"),
        }
    }

    /// One pass: delete stored files older than the retention window.
    pub async fn run_once(&self) -> Result<SweepReport, SweepError> {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        self.storage.remove_expired(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        kv_store::MemoryKvStore, promotion::PromoteStrategy,
        storage_service::tests::storage_in,
    };
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn age(path: &std::path::Path, by: Duration) {
        let file = std::fs::File::open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn run_once_removes_only_files_past_retention() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir, PromoteStrategy::Copy).await;
        let sweeper = RetentionSweeper::new(
            storage.clone(),
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );

        let expired = storage.storage_dir().join("expired");
        let retained = storage.storage_dir().join("retained");
        std::fs::write(&expired, b"old").unwrap();
        std::fs::write(&retained, b"new").unwrap();
        age(&expired, Duration::from_secs(7200));
        age(&retained, Duration::from_secs(60));

        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!expired.exists());
        assert!(retained.exists());
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_and_stops_on_cancel() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir, PromoteStrategy::Copy).await;
        let expired = storage.storage_dir().join("expired");
        std::fs::write(&expired, b"old").unwrap();
        age(&expired, Duration::from_secs(7200));

        let shutdown = CancellationToken::new();
        let handle = RetentionSweeper::new(
            storage,
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .spawn(shutdown.clone());

        for _ in 0..200 {
            if !expired.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!expired.exists());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn failing_tick_does_not_stop_the_loop() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir, PromoteStrategy::Copy).await;
        let storage_dir = storage.storage_dir().to_path_buf();
        std::fs::remove_dir(&storage_dir).unwrap();

        let shutdown = CancellationToken::new();
        let handle = RetentionSweeper::new(
            storage,
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(3600),
            Duration::from_millis(10),
        )
        .spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::create_dir(&storage_dir).unwrap();
        let expired = storage_dir.join("expired");
        std::fs::write(&expired, b"old").unwrap();
        age(&expired, Duration::from_secs(7200));

        for _ in 0..200 {
            if !expired.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!expired.exists());
        assert!(!handle.is_finished());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
