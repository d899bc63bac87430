//! HTTP provider client
//!
//! Talks to a Teller-style REST API: the enrollment access token is sent as
//! the basic-auth username and the client authenticates itself with an mTLS
//! certificate.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Identity, Response};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, ProviderError, Result};

use super::{Provider, ProviderConfig, RawAccount, RawBalance, RawTransaction};

/// Provider client built once at startup and shared
#[derive(Clone)]
pub struct HttpProvider {
    http_client: Client,
    base_url: String,
}

/// Error body returned by the provider
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl HttpProvider {
    /// Build the client, loading the mTLS identity when configured
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout);

        match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => {
                let mut pem = std::fs::read(cert)?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key)?);
                let identity = Identity::from_pem(&pem)?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(Error::validation(
                    "provider certificate",
                    "TALLY_PROVIDER_CERT and TALLY_PROVIDER_KEY must be set together",
                ))
            }
        }

        Ok(Self {
            http_client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(&ProviderConfig::from_env())
    }

    async fn get(&self, access_token: &str, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Provider request");

        let response = self
            .http_client
            .get(&url)
            .basic_auth(access_token, Some(""))
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error.code, envelope.error.message),
            Err(_) => (None, None),
        };

        Err(ProviderError::from_status(
            status,
            code,
            message.unwrap_or_else(|| format!("Provider returned HTTP {}", status)),
        )
        .into())
    }
}

/// Timeouts and connection failures are transient
fn transport_error(e: reqwest::Error) -> Error {
    let message = if e.is_timeout() {
        format!("Provider request timed out: {}", e)
    } else {
        format!("Provider request failed: {}", e)
    };
    ProviderError::transient(message).into()
}

/// A malformed success body is not worth retrying differently from a 5xx
fn decode_error(e: reqwest::Error) -> Error {
    ProviderError::transient(format!("Invalid provider response: {}", e)).into()
}

#[async_trait]
impl Provider for HttpProvider {
    async fn fetch_accounts(&self, access_token: &str) -> Result<Vec<RawAccount>> {
        let response = self.get(access_token, "/accounts", &[]).await?;
        response.json().await.map_err(decode_error)
    }

    async fn fetch_balances(&self, access_token: &str, account_id: &str) -> Result<RawBalance> {
        let path = format!("/accounts/{}/balances", account_id);
        let response = self.get(access_token, &path, &[]).await?;
        response.json().await.map_err(decode_error)
    }

    async fn fetch_transactions(
        &self,
        access_token: &str,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RawTransaction>> {
        let path = format!("/accounts/{}/transactions", account_id);
        let query: Vec<(&str, String)> = since
            .map(|d| vec![("start_date", d.to_string())])
            .unwrap_or_default();

        let response = self.get(access_token, &path, &query).await?;
        let transactions: Vec<RawTransaction> = response.json().await.map_err(decode_error)?;

        // Not every deployment honors start_date
        Ok(match since {
            Some(since) => transactions.into_iter().filter(|t| t.date >= since).collect(),
            None => transactions,
        })
    }
}
