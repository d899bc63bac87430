//! Background task scheduler for periodic batch sync
//!
//! Provides optional scheduled sync that can be enabled via environment
//! variables:
//!
//! - `TALLY_SYNC_INTERVAL_HOURS`: Interval in hours (e.g., "6")
//!
//! Each run syncs every active enrollment through the batch coordinator, so
//! webhook deliveries that were dropped or failed are reconciled here.

use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use tally_core::BatchSyncCoordinator;

/// Configuration for scheduled sync
#[derive(Debug, Clone)]
pub struct SyncScheduleConfig {
    /// Interval between batch syncs in hours
    pub interval_hours: u64,
}

impl SyncScheduleConfig {
    /// Parse configuration from environment variables
    ///
    /// Returns None if scheduling is not configured (TALLY_SYNC_INTERVAL_HOURS not set)
    pub fn from_env() -> Option<Self> {
        let interval_hours: u64 = std::env::var("TALLY_SYNC_INTERVAL_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())?;

        if interval_hours == 0 {
            warn!("TALLY_SYNC_INTERVAL_HOURS is 0, scheduled sync disabled");
            return None;
        }

        Some(Self { interval_hours })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }
}

/// Start the sync scheduler as a background task
///
/// This function spawns a tokio task that runs indefinitely, syncing all
/// active enrollments at the configured interval.
pub fn start_sync_scheduler(coordinator: BatchSyncCoordinator, config: SyncScheduleConfig) {
    info!(
        "Starting sync scheduler: every {} hours, window {}",
        config.interval_hours,
        coordinator.window()
    );

    tokio::spawn(async move {
        let mut ticker = interval(config.interval());

        // Skip the first immediate tick - startup shouldn't trigger a full sync
        ticker.tick().await;

        loop {
            ticker.tick().await;

            info!("Running scheduled sync...");

            match coordinator.sync_all_active().await {
                Ok(summary) => {
                    info!(
                        "Scheduled sync completed: {} synced, {} failed, {} total",
                        summary.synced, summary.failed, summary.total
                    );
                }
                Err(e) => {
                    error!("Scheduled sync failed: {}", e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases share one test so they don't race on the same variable
    #[test]
    fn test_config_from_env() {
        std::env::remove_var("TALLY_SYNC_INTERVAL_HOURS");
        assert!(SyncScheduleConfig::from_env().is_none());

        std::env::set_var("TALLY_SYNC_INTERVAL_HOURS", "0");
        assert!(SyncScheduleConfig::from_env().is_none());

        std::env::set_var("TALLY_SYNC_INTERVAL_HOURS", "6");
        let config = SyncScheduleConfig::from_env().unwrap();
        assert_eq!(config.interval(), Duration::from_secs(6 * 3600));

        std::env::remove_var("TALLY_SYNC_INTERVAL_HOURS");
    }
}
