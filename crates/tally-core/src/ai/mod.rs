//! Pluggable local AI backend abstraction
//!
//! Backs the AI categorization strategy. All backends run locally.
//!
//! # Architecture
//!
//! - `AIBackend` trait: the operations a backend provides
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `OllamaBackend`, `MockBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_BACKEND`: Backend to use (ollama, mock). Default: ollama
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Default model name (default: llama3.2)

mod mock;
mod ollama;
pub mod parsing;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Category suggested by a model for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCategory {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    /// Self-reported; callers clamp into [0, 1]
    pub confidence: f64,
}

/// Trait defining the interface for all AI backends
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Suggest a category from a transaction's bank description and merchant
    async fn categorize_transaction(
        &self,
        description: &str,
        merchant: Option<&str>,
    ) -> Result<AiCategory>;

    /// Check if the backend is available
    async fn health_check(&self) -> bool;

    /// Get the model name (for logging)
    fn model(&self) -> &str;
}

/// Concrete AI client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum AIClient {
    /// Ollama backend (HTTP API)
    Ollama(OllamaBackend),
    /// Mock backend for testing
    Mock(MockBackend),
}

impl AIClient {
    /// Create an AI client from environment variables
    ///
    /// Returns None if the required environment variables are not set.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("AI_BACKEND").unwrap_or_else(|_| "ollama".to_string());

        match backend.to_lowercase().as_str() {
            "ollama" => OllamaBackend::from_env().map(AIClient::Ollama),
            "mock" => Some(AIClient::Mock(MockBackend::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown AI_BACKEND, falling back to ollama");
                OllamaBackend::from_env().map(AIClient::Ollama)
            }
        }
    }
}

// Implement AIBackend for AIClient by delegating to the inner backend
#[async_trait]
impl AIBackend for AIClient {
    async fn categorize_transaction(
        &self,
        description: &str,
        merchant: Option<&str>,
    ) -> Result<AiCategory> {
        match self {
            AIClient::Ollama(b) => b.categorize_transaction(description, merchant).await,
            AIClient::Mock(b) => b.categorize_transaction(description, merchant).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AIClient::Ollama(b) => b.health_check().await,
            AIClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AIClient::Ollama(b) => b.model(),
            AIClient::Mock(b) => b.model(),
        }
    }
}
