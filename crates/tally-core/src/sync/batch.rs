//! Windowed fan-out over many enrollments

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::models::BatchSyncSummary;

use super::EnrollmentSyncer;

/// Enrollments synced concurrently per window
pub const DEFAULT_SYNC_WINDOW: usize = 5;

/// Syncs enrollments in fixed-size windows
///
/// Every enrollment in a window is started together and the window is fully
/// settled before the next one starts. One failure never cancels the others.
#[derive(Clone)]
pub struct BatchSyncCoordinator {
    db: Database,
    syncer: Arc<dyn EnrollmentSyncer>,
    window: usize,
}

impl BatchSyncCoordinator {
    pub fn new(db: Database, syncer: Arc<dyn EnrollmentSyncer>) -> Self {
        Self {
            db,
            syncer,
            window: DEFAULT_SYNC_WINDOW,
        }
    }

    /// Override the window size (values below 1 are treated as 1)
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Sync the given enrollments and report how many succeeded
    pub async fn sync_many(&self, enrollment_ids: &[i64]) -> BatchSyncSummary {
        let mut summary = BatchSyncSummary {
            total: enrollment_ids.len(),
            ..Default::default()
        };

        for chunk in enrollment_ids.chunks(self.window) {
            let handles: Vec<_> = chunk
                .iter()
                .map(|&id| {
                    let syncer = Arc::clone(&self.syncer);
                    (id, tokio::spawn(async move { syncer.sync_enrollment(id).await }))
                })
                .collect();

            for (id, handle) in handles {
                match handle.await {
                    Ok(Ok(_)) => summary.synced += 1,
                    Ok(Err(e)) => {
                        warn!(enrollment_id = id, "Enrollment sync failed: {}", e);
                        summary.failed += 1;
                    }
                    Err(e) => {
                        error!(enrollment_id = id, "Enrollment sync task panicked: {}", e);
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            synced = summary.synced,
            failed = summary.failed,
            total = summary.total,
            "Batch sync finished"
        );
        summary
    }

    /// Sync every enrollment that isn't disconnected
    pub async fn sync_all_active(&self) -> Result<BatchSyncSummary> {
        let ids = self.db.list_active_enrollment_ids()?;
        Ok(self.sync_many(&ids).await)
    }

    /// Sync one user's enrollments that aren't disconnected
    pub async fn sync_user(&self, user_id: &str) -> Result<BatchSyncSummary> {
        let ids = self.db.list_active_enrollment_ids_for_user(user_id)?;
        Ok(self.sync_many(&ids).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::SyncResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails configured IDs and tracks peak concurrency
    #[derive(Default)]
    struct ScriptedSyncer {
        failing: Vec<i64>,
        panicking: Vec<i64>,
        running: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl EnrollmentSyncer for ScriptedSyncer {
        async fn sync_enrollment(&self, enrollment_id: i64) -> Result<SyncResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(enrollment_id);

            if self.panicking.contains(&enrollment_id) {
                panic!("sync blew up");
            }
            if self.failing.contains(&enrollment_id) {
                return Err(Error::NotFound(format!("Enrollment {}", enrollment_id)));
            }
            Ok(SyncResult::default())
        }
    }

    fn coordinator(syncer: Arc<ScriptedSyncer>, window: usize) -> BatchSyncCoordinator {
        BatchSyncCoordinator::new(Database::in_memory().unwrap(), syncer).with_window(window)
    }

    #[tokio::test]
    async fn test_settles_all_with_failure_in_middle() {
        let syncer = Arc::new(ScriptedSyncer {
            failing: vec![2],
            ..Default::default()
        });

        let summary = coordinator(syncer.clone(), 2).sync_many(&[1, 2, 3]).await;

        assert_eq!(
            summary,
            BatchSyncSummary {
                synced: 2,
                failed: 1,
                total: 3
            }
        );
        let mut seen = syncer.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_window_bounds_concurrency() {
        let syncer = Arc::new(ScriptedSyncer::default());
        let ids: Vec<i64> = (1..=12).collect();

        let summary = coordinator(syncer.clone(), 5).sync_many(&ids).await;

        assert_eq!(summary.synced, 12);
        assert!(syncer.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_panic_counts_as_failure() {
        let syncer = Arc::new(ScriptedSyncer {
            panicking: vec![1],
            ..Default::default()
        });

        let summary = coordinator(syncer, 3).sync_many(&[1, 2]).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.synced, 1);
    }

    #[tokio::test]
    async fn test_empty_and_zero_window() {
        let syncer = Arc::new(ScriptedSyncer::default());
        let coordinator = coordinator(syncer, 0);
        assert_eq!(coordinator.window(), 1);
        assert_eq!(coordinator.sync_many(&[]).await, BatchSyncSummary::default());
    }
}
