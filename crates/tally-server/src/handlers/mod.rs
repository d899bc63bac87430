//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod accounts;
pub mod auth;
pub mod enrollments;
pub mod subscriptions;
pub mod sync;
pub mod transactions;
pub mod webhooks;

// Re-export all handlers for use in router
pub use accounts::*;
pub use auth::*;
pub use enrollments::*;
pub use subscriptions::*;
pub use sync::*;
pub use transactions::*;
pub use webhooks::*;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::AppError;

/// Decode a JSON request body, reporting malformed input as a 400
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(&format!("Invalid JSON: {}", e)))
}
