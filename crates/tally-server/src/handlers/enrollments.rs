//! Enrollment handlers

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Extension, Json};
use serde::Deserialize;

use super::parse_json;
use crate::{AppError, AppState, AuthUser};
use tally_core::models::Enrollment;
use tally_core::ConnectOutcome;

/// Request body for connecting an enrollment
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub enrollment_id: String,
    pub institution_name: Option<String>,
}

/// GET /api/enrollments - List the caller's enrollments
pub async fn list_enrollments(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<Enrollment>>, AppError> {
    let enrollments = state.db.list_enrollments(Some(&user))?;
    Ok(Json(enrollments))
}

/// POST /api/enrollments/connect - Store a provider enrollment and its accounts
///
/// The initial transaction sync is queued, not awaited.
pub async fn connect_enrollment(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    body: Bytes,
) -> Result<Json<ConnectOutcome>, AppError> {
    let req: ConnectRequest = parse_json(&body)?;

    if req.access_token.trim().is_empty() {
        return Err(AppError::invalid_field("accessToken", "must not be empty"));
    }
    if req.enrollment_id.trim().is_empty() {
        return Err(AppError::invalid_field("enrollmentId", "must not be empty"));
    }

    let outcome = state
        .orchestrator
        .connect(
            &user,
            req.access_token.trim(),
            req.enrollment_id.trim(),
            req.institution_name.as_deref(),
        )
        .await?;

    Ok(Json(outcome))
}
