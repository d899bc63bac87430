//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed caller input, surfaced as a 4xx with the offending field
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Not expected under idempotent upserts; seeing one means a data-integrity bug
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// True when the provider rejected the enrollment's credential
    pub fn is_provider_auth(&self) -> bool {
        matches!(self, Self::Provider(e) if e.kind == ProviderErrorKind::Auth)
    }
}

/// Whether a provider failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Expired or revoked credential; the enrollment must be reconnected
    Auth,
    /// Timeouts, connection failures, rate limits, 5xx
    Transient,
}

/// Failure reported by (or while talking to) the banking-data provider
#[derive(Error, Debug, Clone)]
#[error("Provider error ({kind:?}, status {status:?}, code {code:?}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Auth,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Classify an upstream HTTP error response
    pub fn from_status(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        let auth_code = code
            .as_deref()
            .map(|c| c.starts_with("enrollment.disconnected") || c == "unauthorized")
            .unwrap_or(false);
        let kind = if status == 401 || status == 403 || auth_code {
            ProviderErrorKind::Auth
        } else {
            ProviderErrorKind::Transient
        };
        Self {
            kind,
            status: Some(status),
            code,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
