//! Subscription handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::parse_json;
use crate::{AppError, AppState, AuthUser, SuccessResponse};
use tally_core::models::OverrideKind;
use tally_core::DetectedSubscription;

/// Request body for forcing a merchant in or out of subscriptions
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    #[serde(default)]
    pub merchant_name: String,
    pub kind: OverrideKind,
}

#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    pub merchant_name: String,
    pub kind: OverrideKind,
    /// Recurring flag now stored on the merchant's transactions
    pub is_recurring: bool,
}

/// GET /api/subscriptions - Merchants the caller is charged for on a schedule
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<DetectedSubscription>>, AppError> {
    let subscriptions = state.detector.list_subscriptions(&user)?;
    Ok(Json(subscriptions))
}

/// POST /api/subscriptions/overrides - Include or exclude a merchant
pub async fn add_subscription_override(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<OverrideResponse>, AppError> {
    let req: OverrideRequest = parse_json(&body)?;

    let is_recurring = state
        .detector
        .add_subscription_override(&user, &req.merchant_name, req.kind)?;

    info!(user = %user, merchant = %req.merchant_name, kind = req.kind.as_str(), "Subscription override set");

    Ok(Json(OverrideResponse {
        merchant_name: req.merchant_name.trim().to_string(),
        kind: req.kind,
        is_recurring,
    }))
}

/// DELETE /api/subscriptions/overrides/:merchant - Return a merchant to detection
pub async fn remove_subscription_override(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(merchant): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.detector.remove_subscription_override(&user, &merchant)? {
        return Err(AppError::not_found(&format!(
            "No subscription override for {}",
            merchant
        )));
    }

    info!(user = %user, merchant = %merchant, "Subscription override removed");

    Ok(Json(SuccessResponse { success: true }))
}
