//! Transaction handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::parse_json;
use crate::{AppError, AppState, AuthUser, MAX_PAGE_LIMIT};
use tally_core::models::{Transaction, TransactionEdit};

/// Query parameters for listing transactions
#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub account_id: Option<i64>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub transactions: Vec<Transaction>,
    pub limit: i64,
    pub offset: i64,
}

/// GET /api/transactions - List the caller's transactions, newest first
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(params): Query<TransactionQuery>,
) -> Result<Json<TransactionResponse>, AppError> {
    // Input validation: clamp pagination parameters
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);

    let transactions = state
        .db
        .list_transactions(&user, params.account_id, limit, offset)?;

    Ok(Json(TransactionResponse {
        transactions,
        limit,
        offset,
    }))
}

/// Load a transaction only if the caller owns it
///
/// Someone else's transaction is reported as missing.
fn owned_transaction(state: &AppState, user: &str, id: i64) -> Result<Transaction, AppError> {
    let not_found = || AppError::not_found(&format!("Transaction {} not found", id));

    let transaction = state.db.get_transaction(id)?.ok_or_else(not_found)?;
    let owner = state.db.get_account_owner(transaction.account_id)?;
    if owner.as_deref() != Some(user) {
        return Err(not_found());
    }

    Ok(transaction)
}

/// GET /api/transactions/:id - Get a single transaction
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(owned_transaction(&state, &user, id)?))
}

/// PATCH /api/transactions/:id - Edit the user-owned fields
///
/// Accepts `category`, `subcategory`, `note` and `is_excluded`. A category
/// set here becomes a user override that later syncs leave alone; `null`
/// clears it.
pub async fn update_transaction(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<Json<Transaction>, AppError> {
    let edit: TransactionEdit = parse_json(&body)?;
    owned_transaction(&state, &user, id)?;

    if let Some(Some(category)) = &edit.category {
        if category.trim().is_empty() {
            return Err(AppError::invalid_field("category", "must not be empty"));
        }
    }

    let updated = state
        .db
        .update_transaction_user_fields(id, &edit)?
        .ok_or_else(|| AppError::not_found(&format!("Transaction {} not found", id)))?;

    info!(user = %user, transaction_id = id, "Transaction edited");

    Ok(Json(updated))
}
