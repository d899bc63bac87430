//! Transaction categorization
//!
//! An ordered chain of strategies; the first to produce a category wins.
//! Provider-supplied categories and user overrides are authoritative and
//! bypass the chain entirely.
//!
//! Default order:
//! 1. User-defined rules (deterministic, highest priority first)
//! 2. AI backend (best effort; failures and timeouts degrade to no result)

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::ai::{AIBackend, AIClient};
use crate::db::Database;
use crate::error::Result;
use crate::models::{
    CategoryAssignment, CategoryRule, CategorySource, ConfidenceScore, PatternType, Transaction,
};

/// Default upper bound on one AI categorization call
pub const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(10);

/// Category produced by a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizationResult {
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence: Option<ConfidenceScore>,
}

/// One link in the categorization chain
#[async_trait]
pub trait CategorizationStrategy: Send + Sync {
    /// Source recorded on transactions this strategy categorizes
    fn source(&self) -> CategorySource;

    /// `Ok(None)` passes the transaction to the next strategy
    async fn categorize(&self, transaction: &Transaction) -> Result<Option<CategorizationResult>>;
}

/// Check if text matches a rule pattern
///
/// `Contains` is case-insensitive and supports pipe-separated alternatives;
/// `Exact` is case-insensitive; `Regex` is tried against the text as-is and
/// uppercased.
pub fn pattern_matches(text: &str, pattern: &str, pattern_type: PatternType) -> Result<bool> {
    let text_upper = text.to_uppercase();

    match pattern_type {
        PatternType::Contains => Ok(pattern
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .any(|p| text_upper.contains(&p.to_uppercase()))),
        PatternType::Regex => {
            let re = Regex::new(pattern)?;
            Ok(re.is_match(text) || re.is_match(&text_upper))
        }
        PatternType::Exact => Ok(text_upper.trim() == pattern.trim().to_uppercase()),
    }
}

/// Categorizes using the stored rule set
pub struct RuleStrategy {
    db: Database,
}

impl RuleStrategy {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn first_match<'a>(
        rules: &'a [CategoryRule],
        transaction: &Transaction,
    ) -> Result<Option<&'a CategoryRule>> {
        for rule in rules {
            let merchant_hit = match transaction.merchant_name.as_deref() {
                Some(merchant) => pattern_matches(merchant, &rule.pattern, rule.pattern_type)?,
                None => false,
            };
            if merchant_hit || pattern_matches(&transaction.name, &rule.pattern, rule.pattern_type)? {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CategorizationStrategy for RuleStrategy {
    fn source(&self) -> CategorySource {
        CategorySource::Rule
    }

    async fn categorize(&self, transaction: &Transaction) -> Result<Option<CategorizationResult>> {
        let rules = self.db.list_category_rules()?;

        Ok(Self::first_match(&rules, transaction)?.map(|rule| {
            debug!(rule_id = rule.id, transaction_id = transaction.id, "Rule matched");
            CategorizationResult {
                category: rule.category.clone(),
                subcategory: rule.subcategory.clone(),
                confidence: Some(rule.confidence),
            }
        }))
    }
}

/// Categorizes with the AI backend
///
/// Never fails: backend errors and timeouts yield `Ok(None)`.
pub struct AiStrategy {
    client: AIClient,
    timeout: Duration,
}

impl AiStrategy {
    pub fn new(client: AIClient) -> Self {
        Self {
            client,
            timeout: DEFAULT_AI_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CategorizationStrategy for AiStrategy {
    fn source(&self) -> CategorySource {
        CategorySource::Ai
    }

    async fn categorize(&self, transaction: &Transaction) -> Result<Option<CategorizationResult>> {
        let call = self
            .client
            .categorize_transaction(&transaction.name, transaction.merchant_name.as_deref());

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(suggestion)) => Ok(Some(CategorizationResult {
                category: suggestion.category,
                subcategory: suggestion.subcategory,
                confidence: Some(ConfidenceScore::new(suggestion.confidence)),
            })),
            Ok(Err(e)) => {
                warn!(
                    transaction_id = transaction.id,
                    model = self.client.model(),
                    "AI categorization failed: {}",
                    e
                );
                Ok(None)
            }
            Err(_) => {
                warn!(
                    transaction_id = transaction.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "AI categorization timed out"
                );
                Ok(None)
            }
        }
    }
}

/// Ordered chain of categorization strategies
pub struct CategorizationPipeline {
    strategies: Vec<Box<dyn CategorizationStrategy>>,
}

impl CategorizationPipeline {
    pub fn new(strategies: Vec<Box<dyn CategorizationStrategy>>) -> Self {
        Self { strategies }
    }

    /// Rules first, then the AI backend when one is configured
    pub fn standard(db: Database, ai: Option<AIClient>) -> Self {
        let mut strategies: Vec<Box<dyn CategorizationStrategy>> =
            vec![Box::new(RuleStrategy::new(db))];
        if let Some(client) = ai {
            strategies.push(Box::new(AiStrategy::new(client)));
        }
        Self::new(strategies)
    }

    /// Run the chain; `Ok(None)` when skipped or when no strategy answers
    pub async fn categorize(&self, transaction: &Transaction) -> Result<Option<CategoryAssignment>> {
        if matches!(
            transaction.category_source(),
            Some(CategorySource::Provider) | Some(CategorySource::UserOverride)
        ) {
            return Ok(None);
        }

        for strategy in &self.strategies {
            if let Some(result) = strategy.categorize(transaction).await? {
                return Ok(Some(CategoryAssignment {
                    category: result.category,
                    subcategory: result.subcategory,
                    confidence: result.confidence,
                    source: strategy.source(),
                }));
            }
        }

        Ok(None)
    }
}
