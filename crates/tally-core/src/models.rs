//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An amount in a single currency
///
/// Immutable; arithmetic across mismatched currencies is an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self {
        Self {
            amount,
            currency: currency.to_uppercase(),
        }
    }

    pub fn zero(currency: &str) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    pub fn abs(&self) -> Self {
        Self::new(self.amount.abs(), &self.currency)
    }

    pub fn negate(&self) -> Self {
        Self::new(-self.amount, &self.currency)
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount + other.amount, &self.currency))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount - other.amount, &self.currency))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<()> {
        if self.currency != other.currency {
            return Err(Error::InvalidData(format!(
                "Currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Categorization certainty, always within [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfidenceScore(f64);

impl ConfidenceScore {
    /// Clamp into [0, 1]; NaN becomes 0
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Enrollment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    /// Last sync partially failed; some accounts could not be refreshed
    Degraded,
    /// Credential expired or revoked; requires the user to reconnect
    Disconnected,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "degraded" => Ok(Self::Degraded),
            "disconnected" => Ok(Self::Disconnected),
            _ => Err(format!("Unknown enrollment status: {}", s)),
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's linked connection to one institution through the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: String,
    pub provider_enrollment_id: String,
    /// Provider access credential; never serialized into API responses
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub institution_name: Option<String>,
    pub status: EnrollmentStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Kind of account, with the fields only that kind carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountKind {
    Bank,
    CreditCard {
        /// Credit limit, when the provider reports one
        limit: Option<Money>,
    },
    Investment,
    Loan,
    Generic,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::CreditCard { .. } => "credit_card",
            Self::Investment => "investment",
            Self::Loan => "loan",
            Self::Generic => "generic",
        }
    }

    pub fn limit(&self) -> Option<&Money> {
        match self {
            Self::CreditCard { limit } => limit.as_ref(),
            _ => None,
        }
    }
}

/// A financial account owned by one enrollment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub enrollment_id: i64,
    pub provider_account_id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: AccountKind,
    pub subtype: Option<String>,
    pub mask: Option<String>,
    pub current_balance: Option<Money>,
    pub available_balance: Option<Money>,
    pub currency: String,
    pub is_hidden: bool,
}

/// Account values as produced by the factory, before a row id exists
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub enrollment_id: i64,
    pub provider_account_id: String,
    pub name: String,
    pub kind: AccountKind,
    pub subtype: Option<String>,
    pub mask: Option<String>,
    pub current_balance: Option<Money>,
    pub available_balance: Option<Money>,
    pub currency: String,
}

/// Where a transaction's category came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategorySource {
    Provider,
    Ai,
    Rule,
    UserOverride,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Ai => "ai",
            Self::Rule => "rule",
            Self::UserOverride => "user_override",
        }
    }
}

impl std::str::FromStr for CategorySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provider" => Ok(Self::Provider),
            "ai" => Ok(Self::Ai),
            "rule" => Ok(Self::Rule),
            "user_override" => Ok(Self::UserOverride),
            _ => Err(format!("Unknown category source: {}", s)),
        }
    }
}

impl std::fmt::Display for CategorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A category together with its provenance
///
/// Transactions hold `Option<CategoryAssignment>`, so a category never exists
/// without a source and a source never exists without a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAssignment {
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence: Option<ConfidenceScore>,
    pub source: CategorySource,
}

/// Post-ingestion enrichment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Categorized,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Categorized => "categorized",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "categorized" => Ok(Self::Categorized),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown processing status: {}", s)),
        }
    }
}

/// A transaction on one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    /// Idempotency key, unique per account
    pub provider_transaction_id: String,
    /// Negative = outflow, positive = inflow
    pub amount: Decimal,
    pub currency: String,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    pub category: Option<CategoryAssignment>,
    /// Provider-reported status (e.g. "posted", "pending")
    pub provider_status: Option<String>,
    pub running_balance: Option<Decimal>,
    pub is_transfer: bool,
    pub linked_transfer_id: Option<i64>,
    pub is_pending: bool,
    pub is_recurring: bool,
    pub is_excluded: bool,
    pub note: Option<String>,
    pub processing_status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn money(&self) -> Money {
        Money::new(self.amount, &self.currency)
    }

    pub fn category_source(&self) -> Option<CategorySource> {
        self.category.as_ref().map(|c| c.source)
    }
}

/// A transaction to be inserted (before DB insertion)
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub provider_transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    /// Provider-supplied category, if any
    pub provider_category: Option<String>,
    pub provider_status: Option<String>,
    pub running_balance: Option<Decimal>,
    pub is_pending: bool,
}

/// User-owned edits to a transaction; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionEdit {
    /// `Some(None)` clears the override
    #[serde(default, with = "double_option")]
    pub category: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub subcategory: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub note: Option<Option<String>>,
    pub is_excluded: Option<bool>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Deserialize::deserialize(deserializer).map(Some)
    }
}

/// Pattern matching mode for categorization rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Contains,
    Regex,
    Exact,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::Exact => "exact",
        }
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            "exact" => Ok(Self::Exact),
            _ => Err(format!("Unknown pattern type: {}", s)),
        }
    }
}

/// A user-defined categorization rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub id: i64,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence: ConfidenceScore,
    /// Higher wins
    pub priority: i32,
}

/// Direction of a user's subscription override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    /// Always treat the merchant as a subscription
    Include,
    /// Never treat the merchant as a subscription
    Exclude,
}

impl OverrideKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
        }
    }
}

impl std::str::FromStr for OverrideKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            _ => Err(format!("Unknown override kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionOverride {
    pub user_id: String,
    pub merchant_name: String,
    pub kind: OverrideKind,
    pub created_at: DateTime<Utc>,
}

/// Outcome of syncing one enrollment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub accounts_updated: usize,
    pub transactions_ingested: usize,
}

/// Aggregate outcome of a batch sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSyncSummary {
    pub synced: usize,
    pub failed: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_money_same_currency_arithmetic() {
        let a = Money::new(dec("10.50"), "usd");
        let b = Money::new(dec("2.25"), "USD");
        assert_eq!(a.checked_add(&b).unwrap().amount(), dec("12.75"));
        assert_eq!(a.checked_sub(&b).unwrap().amount(), dec("8.25"));
        assert_eq!(a.currency(), "USD");
    }

    #[test]
    fn test_money_currency_mismatch() {
        let a = Money::new(dec("10"), "USD");
        let b = Money::new(dec("10"), "EUR");
        assert!(a.checked_add(&b).is_err());
        assert!(a.checked_sub(&b).is_err());
    }

    #[test]
    fn test_money_sign_helpers() {
        let m = Money::new(dec("-45.00"), "USD");
        assert!(m.is_negative());
        assert_eq!(m.abs().amount(), dec("45.00"));
        assert_eq!(m.negate().amount(), dec("45.00"));
        assert!(!Money::zero("USD").is_negative());
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(ConfidenceScore::new(1.7).value(), 1.0);
        assert_eq!(ConfidenceScore::new(-0.2).value(), 0.0);
        assert_eq!(ConfidenceScore::new(f64::NAN).value(), 0.0);
        assert_eq!(ConfidenceScore::new(0.95).value(), 0.95);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            EnrollmentStatus::Active,
            EnrollmentStatus::Degraded,
            EnrollmentStatus::Disconnected,
        ] {
            assert_eq!(status.as_str().parse::<EnrollmentStatus>().unwrap(), status);
        }
        assert!("paused".parse::<EnrollmentStatus>().is_err());
    }

    #[test]
    fn test_transaction_edit_distinguishes_clear_from_absent() {
        let edit: TransactionEdit =
            serde_json::from_str(r#"{"note": null, "is_excluded": true}"#).unwrap();
        assert_eq!(edit.note, Some(None));
        assert_eq!(edit.category, None);
        assert_eq!(edit.is_excluded, Some(true));
    }
}
