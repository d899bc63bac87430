//! Provider webhook receiver

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{AppError, AppState, MAX_BODY_SIZE};
use tally_core::webhook::{verify_signature, WebhookBody};
use tally_core::SyncJob;

/// Header carrying `t=<unix-ts>,v1=<hex-hmac-sha256>`
pub const SIGNATURE_HEADER: &str = "teller-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// POST /webhooks/provider - Accept a signed provider event
///
/// The delivery is acknowledged once verified and queued; the work itself
/// runs on the background worker. A job dropped because the queue is full
/// is still acknowledged, and the next batch sync picks up the change.
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(AppError::bad_request("Webhook body too large"));
    }

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let verified = state
        .config
        .webhook_secrets
        .iter()
        .any(|secret| verify_signature(&body, signature, Some(secret)));

    if !verified {
        warn!(
            has_signature = signature.is_some(),
            "Rejected webhook with invalid signature"
        );
        return Err(AppError::unauthorized("Invalid webhook signature"));
    }

    let (event_type, provider_enrollment_id) = WebhookBody::parse(&body)?;

    let queued = state.queue.enqueue(SyncJob::Webhook {
        event_type: event_type.clone(),
        provider_enrollment_id: provider_enrollment_id.clone(),
    });

    info!(
        event = %event_type,
        enrollment = %provider_enrollment_id,
        queued,
        "Webhook accepted"
    );

    Ok(Json(WebhookAck { received: true }))
}
