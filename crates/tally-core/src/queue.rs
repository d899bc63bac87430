//! Bounded in-process job queue for background sync work
//!
//! Webhook deliveries and freshly connected enrollments are handed to a single
//! background worker so request handlers can respond immediately. Delivery is
//! at-most-once: a full queue drops the job with a warning, and nothing is
//! persisted across restarts. The periodic batch sync picks up anything lost.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Default number of jobs buffered before new ones are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Work item for the background worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncJob {
    /// First sync after an enrollment is connected
    InitialSync { enrollment_id: i64 },
    /// A verified provider webhook event
    Webhook {
        event_type: String,
        provider_enrollment_id: String,
    },
}

impl SyncJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialSync { .. } => "initial_sync",
            Self::Webhook { .. } => "webhook",
        }
    }
}

/// Executes jobs taken off the queue
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: SyncJob) -> Result<()>;
}

/// Sending half of the job queue; cheap to clone
#[derive(Clone)]
pub struct SyncQueue {
    sender: mpsc::Sender<SyncJob>,
}

impl SyncQueue {
    /// Create a queue holding at most `capacity` pending jobs
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<SyncJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue without waiting; returns false if the job was dropped
    pub fn enqueue(&self, job: SyncJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(job = job.kind(), "Sync queue full, dropping job: {:?}", job);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(job = job.kind(), "Sync worker stopped, dropping job: {:?}", job);
                false
            }
        }
    }
}

/// Start the background worker; it exits once every `SyncQueue` is dropped
pub fn spawn_worker(
    mut receiver: mpsc::Receiver<SyncJob>,
    handler: Arc<dyn JobHandler>,
) -> JoinHandle<()> {
    info!("Starting sync worker");

    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let kind = job.kind();
            debug!(job = kind, "Running job");

            if let Err(e) = handler.run(job).await {
                error!(job = kind, "Background job failed: {}", e);
            }
        }

        info!("Sync worker stopped");
    })
}
