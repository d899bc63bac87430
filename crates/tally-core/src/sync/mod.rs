//! Enrollment synchronization
//!
//! - `EnrollmentSyncOrchestrator` connects enrollments and syncs one at a time
//! - `BatchSyncCoordinator` fans out over many enrollments in fixed windows

mod batch;
mod orchestrator;

pub use batch::{BatchSyncCoordinator, DEFAULT_SYNC_WINDOW};
pub use orchestrator::{ConnectOutcome, EnrollmentSyncOrchestrator, SYNC_LOOKBACK_DAYS};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::SyncResult;

/// Anything that can sync a single enrollment by ID
#[async_trait]
pub trait EnrollmentSyncer: Send + Sync {
    async fn sync_enrollment(&self, enrollment_id: i64) -> Result<SyncResult>;
}
