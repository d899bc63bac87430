//! Provider webhook verification and dispatch
//!
//! Deliveries are signed with HMAC-SHA256 over `"{t}.{body}"` and carry a
//! header of the form `t=<unix-ts>,v1=<hex digest>[,v1=<hex digest>...]`.
//! Verified events are queued and handled by the background worker; the
//! HTTP caller is acknowledged before any sync work runs.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::EnrollmentStatus;
use crate::queue::{JobHandler, SyncJob};
use crate::sync::EnrollmentSyncOrchestrator;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_ENROLLMENT_DISCONNECTED: &str = "enrollment.disconnected";
pub const EVENT_TRANSACTIONS_PROCESSED: &str = "transactions.processed";

/// Dispatch target for a webhook event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Disconnected,
    TransactionsUpdated,
    Unknown(String),
}

impl WebhookEvent {
    pub fn parse(event_type: &str) -> Self {
        match event_type.trim() {
            EVENT_ENROLLMENT_DISCONNECTED => Self::Disconnected,
            EVENT_TRANSACTIONS_PROCESSED => Self::TransactionsUpdated,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Webhook request body; only the fields needed for dispatch
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub payload: Option<WebhookBodyPayload>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookBodyPayload {
    pub enrollment_id: Option<String>,
}

impl WebhookBody {
    /// Parse a raw body into (event type, provider enrollment id)
    pub fn parse(raw_body: &[u8]) -> Result<(String, String)> {
        let body: WebhookBody = serde_json::from_slice(raw_body)
            .map_err(|e| Error::validation("body", &e.to_string()))?;

        let event_type = body
            .event_type
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::validation("type", "missing"))?;
        let enrollment_id = body
            .payload
            .and_then(|p| p.enrollment_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::validation("payload.enrollment_id", "missing"))?;

        Ok((event_type, enrollment_id))
    }
}

fn digest(secret: &str, timestamp: &str, raw_body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Compute the hex signature for a payload
pub fn sign(secret: &str, timestamp: &str, raw_body: &[u8]) -> Option<String> {
    digest(secret, timestamp, raw_body).map(hex::encode)
}

/// Check a delivery's signature header against one secret
///
/// Fails closed: a missing secret, missing header, missing `t` or `v1`, or
/// a digest that doesn't match all return false. Digests are compared in
/// constant time. Any one matching `v1` is accepted, so the provider can
/// sign with old and new secrets during rotation.
pub fn verify_signature(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: Option<&str>,
) -> bool {
    let (Some(header), Some(secret)) = (signature_header, secret) else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }

    let mut timestamp = None;
    let mut digests = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value.trim()),
            Some(("v1", value)) => digests.push(value.trim()),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp.filter(|t| !t.is_empty()) else {
        return false;
    };

    let Some(expected) = digest(secret, timestamp, raw_body) else {
        return false;
    };

    digests.into_iter().any(|candidate| match hex::decode(candidate) {
        Ok(provided) => bool::from(expected.as_slice().ct_eq(provided.as_slice())),
        Err(_) => false,
    })
}

/// Applies verified webhook events and runs queued sync jobs
#[derive(Clone)]
pub struct WebhookProcessor {
    orchestrator: EnrollmentSyncOrchestrator,
}

impl WebhookProcessor {
    pub fn new(orchestrator: EnrollmentSyncOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Apply one verified event
    ///
    /// Safe to repeat: disconnecting twice is a no-op and syncing is
    /// idempotent. Unknown event types and unknown enrollments are logged
    /// and ignored.
    pub async fn handle(&self, event_type: &str, provider_enrollment_id: &str) -> Result<()> {
        let event = WebhookEvent::parse(event_type);
        if let WebhookEvent::Unknown(other) = &event {
            info!(event_type = %other, "Ignoring unhandled webhook event");
            return Ok(());
        }

        let db = self.orchestrator.db();
        let Some(enrollment) = db.get_enrollment_by_provider_id(provider_enrollment_id)? else {
            warn!(
                provider_enrollment_id,
                event_type, "Webhook for unknown enrollment"
            );
            return Ok(());
        };

        match event {
            WebhookEvent::Disconnected => {
                if enrollment.status != EnrollmentStatus::Disconnected {
                    db.set_enrollment_status(enrollment.id, EnrollmentStatus::Disconnected)?;
                    info!(enrollment_id = enrollment.id, "Enrollment disconnected by provider");
                }
            }
            WebhookEvent::TransactionsUpdated => {
                if enrollment.status == EnrollmentStatus::Disconnected {
                    debug!(
                        enrollment_id = enrollment.id,
                        "Skipping sync for disconnected enrollment"
                    );
                    return Ok(());
                }
                let result = self.orchestrator.sync_transactions(enrollment.id).await?;
                info!(
                    enrollment_id = enrollment.id,
                    transactions = result.transactions_ingested,
                    "Webhook sync complete"
                );
            }
            WebhookEvent::Unknown(_) => {}
        }

        Ok(())
    }
}

#[async_trait]
impl JobHandler for WebhookProcessor {
    async fn run(&self, job: SyncJob) -> Result<()> {
        match job {
            SyncJob::Webhook {
                event_type,
                provider_enrollment_id,
            } => self.handle(&event_type, &provider_enrollment_id).await,
            SyncJob::InitialSync { enrollment_id } => self
                .orchestrator
                .sync_transactions(enrollment_id)
                .await
                .map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::CategorizationPipeline;
    use crate::db::Database;
    use crate::ingest::TransactionIngestor;
    use crate::provider::MockProvider;
    use crate::test_utils::fixtures::{raw_account, raw_balance, raw_transaction};
    use std::sync::Arc;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"transactions.processed","payload":{"enrollment_id":"enr_1"}}"#;

    fn header(secret: &str, t: &str, body: &[u8]) -> String {
        format!("t={},v1={}", t, sign(secret, t, body).unwrap())
    }

    #[test]
    fn test_valid_signature() {
        let h = header(SECRET, "1700000000", BODY);
        assert!(verify_signature(BODY, Some(&h), Some(SECRET)));
    }

    #[test]
    fn test_signature_rejections() {
        let h = header(SECRET, "1700000000", BODY);

        // Wrong secret
        assert!(!verify_signature(BODY, Some(&h), Some("other")));
        // Tampered body
        assert!(!verify_signature(b"{\"type\":\"x\"}", Some(&h), Some(SECRET)));
        // Tampered timestamp
        let tampered = h.replace("1700000000", "1700000001");
        assert!(!verify_signature(BODY, Some(&tampered), Some(SECRET)));
        // Missing v1
        assert!(!verify_signature(BODY, Some("t=1700000000"), Some(SECRET)));
        // Missing t
        let digest = sign(SECRET, "1700000000", BODY).unwrap();
        assert!(!verify_signature(BODY, Some(&format!("v1={}", digest)), Some(SECRET)));
        // Missing header or secret
        assert!(!verify_signature(BODY, None, Some(SECRET)));
        assert!(!verify_signature(BODY, Some(&h), None));
        assert!(!verify_signature(BODY, Some(&h), Some("")));
        // Not hex
        assert!(!verify_signature(BODY, Some("t=1,v1=zz"), Some(SECRET)));
    }

    #[test]
    fn test_any_v1_matches() {
        let good = sign(SECRET, "42", BODY).unwrap();
        let h = format!("t=42, v1={}, v1={}", "00".repeat(32), good);
        assert!(verify_signature(BODY, Some(&h), Some(SECRET)));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(
            WebhookBody::parse(BODY).unwrap(),
            ("transactions.processed".to_string(), "enr_1".to_string())
        );
        assert!(matches!(
            WebhookBody::parse(br#"{"payload":{"enrollment_id":"enr_1"}}"#),
            Err(Error::Validation { ref field, .. }) if field == "type"
        ));
        assert!(matches!(
            WebhookBody::parse(br#"{"type":"webhook.test","payload":{}}"#),
            Err(Error::Validation { ref field, .. }) if field == "payload.enrollment_id"
        ));
        assert!(WebhookBody::parse(b"not json").is_err());
    }

    #[test]
    fn test_event_parse() {
        assert_eq!(WebhookEvent::parse("enrollment.disconnected"), WebhookEvent::Disconnected);
        assert_eq!(
            WebhookEvent::parse("transactions.processed"),
            WebhookEvent::TransactionsUpdated
        );
        assert_eq!(
            WebhookEvent::parse("webhook.test"),
            WebhookEvent::Unknown("webhook.test".to_string())
        );
    }

    async fn connected() -> (Database, Arc<MockProvider>, WebhookProcessor, i64) {
        let db = Database::in_memory().unwrap();
        let provider = Arc::new(MockProvider::new());
        provider.add_account("tok", raw_account("acc_1", "depository"), raw_balance("acc_1", "10.00"));
        let ingestor = TransactionIngestor::new(db.clone(), CategorizationPipeline::new(Vec::new()));
        let orchestrator = EnrollmentSyncOrchestrator::new(db.clone(), provider.clone(), ingestor);
        let id = orchestrator
            .connect("alice@example.com", "tok", "enr_1", None)
            .await
            .unwrap()
            .enrollment
            .id;
        (db, provider, WebhookProcessor::new(orchestrator), id)
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (db, _, processor, id) = connected().await;

        processor.handle(EVENT_ENROLLMENT_DISCONNECTED, "enr_1").await.unwrap();
        processor.handle(EVENT_ENROLLMENT_DISCONNECTED, "enr_1").await.unwrap();

        let enrollment = db.get_enrollment(id).unwrap().unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_transactions_event_syncs_once_per_row() {
        let (db, provider, processor, _) = connected().await;
        provider.upsert_transaction(raw_transaction("t1", "acc_1", "-9.99", "2024-03-01", None));

        processor.handle(EVENT_TRANSACTIONS_PROCESSED, "enr_1").await.unwrap();
        processor.handle(EVENT_TRANSACTIONS_PROCESSED, "enr_1").await.unwrap();

        assert_eq!(db.list_transactions("alice@example.com", None, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_and_enrollment_ignored() {
        let (_, provider, processor, _) = connected().await;
        let calls = provider.call_count();

        processor.handle("webhook.test", "enr_1").await.unwrap();
        processor.handle(EVENT_TRANSACTIONS_PROCESSED, "enr_missing").await.unwrap();

        assert_eq!(provider.call_count(), calls);
    }

    #[tokio::test]
    async fn test_job_handler_runs_initial_sync() {
        let (db, provider, processor, id) = connected().await;
        provider.upsert_transaction(raw_transaction("t1", "acc_1", "-1.00", "2024-03-01", None));

        processor
            .run(SyncJob::InitialSync { enrollment_id: id })
            .await
            .unwrap();

        assert!(db.get_enrollment(id).unwrap().unwrap().last_synced_at.is_some());
    }
}
