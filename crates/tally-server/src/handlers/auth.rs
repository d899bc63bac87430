//! Authentication-related handlers

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Serialize;

use crate::{AppState, AuthUser};

/// Response for the /api/me endpoint
#[derive(Serialize)]
pub struct MeResponse {
    /// The authenticated user's identifier
    pub user: String,
    /// How the user was authenticated
    pub auth_method: &'static str,
}

/// GET /api/me - The currently authenticated user
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Json<MeResponse> {
    let auth_method = if state.config.require_auth {
        "api_key"
    } else {
        "none"
    };

    Json(MeResponse { user, auth_method })
}
