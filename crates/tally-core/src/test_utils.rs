//! Test utilities for tally-core
//!
//! Payload fixtures, plus mock provider and Ollama HTTP servers that exercise
//! the real HTTP clients in development and integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{Json, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::provider::{RawAccount, RawBalance, RawTransaction};

/// Provider payload builders
pub mod fixtures {
    use chrono::NaiveDate;

    use crate::provider::{
        RawAccount, RawBalance, RawCounterparty, RawInstitution, RawTransaction,
        RawTransactionDetails,
    };

    pub fn raw_account(id: &str, account_type: &str) -> RawAccount {
        RawAccount {
            id: id.to_string(),
            enrollment_id: "enr_1".to_string(),
            name: format!("{} account", account_type),
            account_type: account_type.to_string(),
            subtype: None,
            currency: "USD".to_string(),
            last_four: Some("4242".to_string()),
            institution: Some(RawInstitution {
                id: "test_bank".to_string(),
                name: "Test Bank".to_string(),
            }),
        }
    }

    pub fn raw_balance(account_id: &str, ledger: &str) -> RawBalance {
        let ledger = ledger.parse().ok();
        RawBalance {
            account_id: account_id.to_string(),
            ledger,
            available: ledger,
            limit: None,
        }
    }

    /// A posted transaction; `merchant` becomes the counterparty
    pub fn raw_transaction(
        id: &str,
        account_id: &str,
        amount: &str,
        date: &str,
        merchant: Option<&str>,
    ) -> RawTransaction {
        RawTransaction {
            id: id.to_string(),
            account_id: account_id.to_string(),
            amount: amount.parse().unwrap_or_default(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap_or_default(),
            description: merchant.unwrap_or("CARD PURCHASE").to_uppercase(),
            status: "posted".to_string(),
            running_balance: None,
            details: RawTransactionDetails {
                category: None,
                counterparty: merchant.map(|name| RawCounterparty {
                    name: Some(name.to_string()),
                    counterparty_type: Some("organization".to_string()),
                }),
            },
        }
    }
}

#[derive(Default)]
struct ProviderData {
    accounts: HashMap<String, Vec<RawAccount>>,
    balances: HashMap<String, RawBalance>,
    transactions: HashMap<String, Vec<RawTransaction>>,
    /// Access tokens answered with 401 `enrollment.disconnected`
    revoked: Vec<String>,
}

type SharedData = Arc<Mutex<ProviderData>>;

/// Mock banking-data provider speaking the provider's REST shape
pub struct MockProviderServer {
    addr: SocketAddr,
    data: SharedData,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockProviderServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let data = SharedData::default();
        let app = Router::new()
            .route("/accounts", get(handle_accounts))
            .route("/accounts/:id/balances", get(handle_balances))
            .route("/accounts/:id/transactions", get(handle_transactions))
            .with_state(data.clone());

        let (addr, shutdown_tx) = serve(app).await;
        Self {
            addr,
            data,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn add_account(&self, access_token: &str, account: RawAccount, balance: RawBalance) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.balances.insert(account.id.clone(), balance);
        data.accounts
            .entry(access_token.to_string())
            .or_default()
            .push(account);
    }

    pub fn add_transaction(&self, transaction: RawTransaction) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.transactions
            .entry(transaction.account_id.clone())
            .or_default()
            .push(transaction);
    }

    /// Answer every request for this token with an auth failure
    pub fn revoke(&self, access_token: &str) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.revoked.push(access_token.to_string());
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockProviderServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": { "code": code, "message": message } })),
    )
        .into_response()
}

/// Username from a basic-auth header; the provider client sends the token there
fn basic_username(header: &str) -> Option<String> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let username = decoded.split(':').next().unwrap_or_default();
    Some(username.to_string())
}

/// Resolve the access token, rejecting revoked ones
fn authorize(headers: &HeaderMap, data: &ProviderData) -> Result<String, Response> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(basic_username)
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "unauthorized", "missing credentials"))?;

    if data.revoked.contains(&token) {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "enrollment.disconnected.credentials_invalid",
            "credentials revoked",
        ));
    }
    Ok(token)
}

async fn handle_accounts(State(data): State<SharedData>, headers: HeaderMap) -> Response {
    let data = data.lock().unwrap_or_else(PoisonError::into_inner);
    let token = match authorize(&headers, &data) {
        Ok(token) => token,
        Err(response) => return response,
    };

    match data.accounts.get(&token) {
        Some(accounts) => Json(accounts.clone()).into_response(),
        None => error_response(StatusCode::UNAUTHORIZED, "unauthorized", "unknown token"),
    }
}

async fn handle_balances(
    State(data): State<SharedData>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let data = data.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(response) = authorize(&headers, &data) {
        return response;
    }

    match data.balances.get(&account_id) {
        Some(balance) => Json(balance.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_found", "unknown account"),
    }
}

#[derive(Debug, Deserialize)]
struct TransactionsQuery {
    start_date: Option<NaiveDate>,
}

async fn handle_transactions(
    State(data): State<SharedData>,
    Path(account_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
    headers: HeaderMap,
) -> Response {
    let data = data.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(response) = authorize(&headers, &data) {
        return response;
    }

    let transactions: Vec<RawTransaction> = data
        .transactions
        .get(&account_id)
        .map(|list| {
            list.iter()
                .filter(|t| query.start_date.map_or(true, |since| t.date >= since))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Json(transactions).into_response()
}

/// Mock Ollama server answering categorization prompts
pub struct MockOllamaServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOllamaServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/api/tags", get(handle_tags))
            .route("/api/generate", post(handle_generate));

        let (addr, shutdown_tx) = serve(app).await;
        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ollama tags endpoint response (health check)
async fn handle_tags() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "models": [{ "name": "llama3.2:latest" }] }))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    model: String,
    response: String,
    done: bool,
}

/// Ollama generate endpoint; wraps the JSON answer in chatter like real models do
async fn handle_generate(Json(request): Json<GenerateRequest>) -> Json<GenerateResponse> {
    let prompt = request.prompt.to_uppercase();
    let (category, subcategory, confidence) = if prompt.contains("NETFLIX") {
        ("Entertainment", "Streaming", 0.92)
    } else if prompt.contains("STARBUCKS") {
        ("Food & Drink", "Coffee", 0.88)
    } else {
        ("Other", "", 0.4)
    };

    Json(GenerateResponse {
        model: request.model,
        response: format!(
            r#"Here is the category: {{"category": "{}", "subcategory": "{}", "confidence": {}}}"#,
            category, subcategory, confidence
        ),
        done: true,
    })
}
