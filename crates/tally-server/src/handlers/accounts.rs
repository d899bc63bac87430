//! Account handlers

use std::sync::Arc;

use axum::{extract::State, Extension, Json};

use crate::{AppError, AppState, AuthUser};
use tally_core::models::Account;

/// GET /api/accounts - List accounts across the caller's enrollments
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<Vec<Account>>, AppError> {
    let accounts = state.db.list_accounts_for_user(&user)?;
    Ok(Json(accounts))
}
