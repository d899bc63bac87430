//! Tally Core Library
//!
//! Shared functionality for the Tally banking-data pipeline:
//! - Database access and migrations (SQLite, optional SQLCipher)
//! - Banking-data provider client (mTLS HTTP, plus an in-process mock)
//! - Enrollment connect/sync and windowed batch sync
//! - Signed webhook verification and a bounded background job queue
//! - Idempotent transaction ingestion
//! - Categorization chain (rules, then a pluggable AI backend)
//! - Transfer pairing and subscription detection

pub mod accounts;
pub mod ai;
pub mod categorize;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod provider;
pub mod queue;
pub mod subscriptions;
pub mod sync;
pub mod transfers;
pub mod webhook;

/// Test utilities including mock provider and Ollama servers
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIBackend, AIClient, MockBackend, OllamaBackend};
pub use categorize::{
    AiStrategy, CategorizationPipeline, CategorizationResult, CategorizationStrategy,
    RuleStrategy,
};
pub use db::{Database, IngestOutcome, NewEnrollment};
pub use error::{Error, ProviderError, ProviderErrorKind, Result};
pub use ingest::TransactionIngestor;
pub use provider::{HttpProvider, MockProvider, Provider, ProviderConfig};
pub use queue::{spawn_worker, JobHandler, SyncJob, SyncQueue, DEFAULT_QUEUE_CAPACITY};
pub use subscriptions::{DetectedSubscription, SubscriptionDetector};
pub use sync::{
    BatchSyncCoordinator, ConnectOutcome, EnrollmentSyncOrchestrator, EnrollmentSyncer,
    DEFAULT_SYNC_WINDOW,
};
pub use transfers::TransferPair;
pub use webhook::{verify_signature, WebhookProcessor};
