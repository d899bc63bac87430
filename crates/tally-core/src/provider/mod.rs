//! Banking-data provider client abstraction
//!
//! The provider supplies accounts, balances and transactions for an
//! enrollment's access token. A single client value is built at startup and
//! shared as `Arc<dyn Provider>`; nothing here is global.
//!
//! # Configuration
//!
//! Environment variables (see `ProviderConfig::from_env`):
//! - `TALLY_PROVIDER_URL`: API base URL (default: https://api.teller.io)
//! - `TALLY_PROVIDER_CERT`: Path to the client certificate PEM (mTLS)
//! - `TALLY_PROVIDER_KEY`: Path to the client private key PEM (mTLS)
//! - `TALLY_PROVIDER_TIMEOUT_SECS`: Per-request timeout (default: 30)

mod http;
mod mock;

pub use http::HttpProvider;
pub use mock::MockProvider;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.teller.io";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Account as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAccount {
    pub id: String,
    pub enrollment_id: String,
    pub name: String,
    /// Free-text account type (e.g. "depository", "credit")
    #[serde(rename = "type")]
    pub account_type: String,
    pub subtype: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub last_four: Option<String>,
    pub institution: Option<RawInstitution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInstitution {
    pub id: String,
    pub name: String,
}

/// Balance snapshot for one account
///
/// Either value may be absent; absence is preserved rather than read as zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawBalance {
    pub account_id: String,
    #[serde(default)]
    pub ledger: Option<Decimal>,
    #[serde(default)]
    pub available: Option<Decimal>,
    /// Credit limit, for card accounts that report one
    #[serde(default)]
    pub limit: Option<Decimal>,
}

/// Transaction as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub id: String,
    pub account_id: String,
    /// Signed; negative is money leaving the account
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: String,
    /// "posted" or "pending"
    pub status: String,
    #[serde(default)]
    pub running_balance: Option<Decimal>,
    #[serde(default)]
    pub details: RawTransactionDetails,
}

impl RawTransaction {
    pub fn is_pending(&self) -> bool {
        self.status.eq_ignore_ascii_case("pending")
    }

    /// Counterparty name, when the provider resolved one
    pub fn merchant_name(&self) -> Option<&str> {
        self.details
            .counterparty
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .filter(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawTransactionDetails {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub counterparty: Option<RawCounterparty>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawCounterparty {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub counterparty_type: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Client for the banking-data provider
///
/// Implementations report failures as `Error::Provider`, classifying revoked
/// or expired credentials as auth failures and everything else (timeouts,
/// connection errors, 5xx, rate limits) as transient.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Accounts visible to an enrollment's access token
    async fn fetch_accounts(&self, access_token: &str) -> Result<Vec<RawAccount>>;

    /// Current balances for one account
    async fn fetch_balances(&self, access_token: &str, account_id: &str) -> Result<RawBalance>;

    /// Transactions for one account, on or after `since` (full history when None)
    async fn fetch_transactions(
        &self,
        access_token: &str,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RawTransaction>>;
}

/// Connection settings for `HttpProvider`
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Client certificate PEM path; mTLS is enabled when both paths are set
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            cert_path: None,
            key_path: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ProviderConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let timeout_secs = std::env::var("TALLY_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            base_url: std::env::var("TALLY_PROVIDER_URL")
                .unwrap_or_else(|_| DEFAULT_PROVIDER_URL.to_string()),
            cert_path: std::env::var("TALLY_PROVIDER_CERT").ok().map(PathBuf::from),
            key_path: std::env::var("TALLY_PROVIDER_KEY").ok().map(PathBuf::from),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}
