//! Sync trigger handlers

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Extension, Json};
use tracing::{info, warn};

use crate::{bearer_token, secret_matches, AppError, AppState, AuthUser};
use tally_core::models::BatchSyncSummary;

/// POST /api/cron/sync - Batch sync every active enrollment
///
/// Guarded by `TALLY_CRON_SECRET` as a bearer token rather than an API key.
/// Individual enrollment failures show up in the counts, never as an error.
pub async fn cron_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BatchSyncSummary>, AppError> {
    let authorized = match (&state.config.cron_secret, bearer_token(&headers)) {
        (Some(expected), Some(provided)) => secret_matches(provided, expected),
        _ => false,
    };
    if !authorized {
        warn!("Rejected cron sync with missing or invalid secret");
        return Err(AppError::unauthorized("Invalid cron secret"));
    }

    let summary = state.coordinator.sync_all_active().await?;
    info!(
        synced = summary.synced,
        failed = summary.failed,
        total = summary.total,
        "Cron sync finished"
    );

    Ok(Json(summary))
}

/// POST /api/sync - Sync the caller's active enrollments
pub async fn sync_user(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<BatchSyncSummary>, AppError> {
    let summary = state.coordinator.sync_user(&user).await?;
    Ok(Json(summary))
}
