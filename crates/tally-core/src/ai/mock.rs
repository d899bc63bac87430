//! Mock backend for testing
//!
//! Predictable answers for well-known merchants, a call counter, and an
//! optional failure mode for exercising degradation paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{AIBackend, AiCategory};

/// Mock AI backend for testing
#[derive(Clone, Default)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    /// Fail every categorization call
    pub failing: bool,
    calls: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    /// Create a mock backend whose calls always fail
    pub fn failing() -> Self {
        Self {
            healthy: false,
            failing: true,
            ..Default::default()
        }
    }

    /// Number of categorization calls made (shared across clones)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn categorize_transaction(
        &self,
        description: &str,
        merchant: Option<&str>,
    ) -> Result<AiCategory> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing {
            return Err(Error::InvalidData("mock backend failure".into()));
        }

        let text = format!("{} {}", description, merchant.unwrap_or("")).to_uppercase();
        let (category, subcategory, confidence) = match text.as_str() {
            t if t.contains("NETFLIX") || t.contains("SPOTIFY") => {
                ("Entertainment", Some("Streaming"), 0.9)
            }
            t if t.contains("STARBUCKS") => ("Food & Drink", Some("Coffee"), 0.85),
            t if t.contains("WHOLE FOODS") || t.contains("WHOLEFDS") => ("Groceries", None, 0.85),
            t if t.contains("UBER") || t.contains("SHELL") => ("Transport", None, 0.8),
            t if t.contains("AMAZON") => ("Shopping", None, 0.7),
            _ => ("Other", None, 0.3),
        };

        Ok(AiCategory {
            category: category.to_string(),
            subcategory: subcategory.map(str::to_string),
            confidence,
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }
}
