//! Enrollment connect and sync

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::accounts::create_from_provider;
use crate::db::{Database, NewEnrollment};
use crate::error::{Error, Result};
use crate::ingest::TransactionIngestor;
use crate::models::{Account, Enrollment, EnrollmentStatus, SyncResult};
use crate::provider::{Provider, RawAccount, RawBalance};
use crate::queue::{SyncJob, SyncQueue};

use super::EnrollmentSyncer;

/// Days re-fetched before the last sync so pending items that post late are refreshed
pub const SYNC_LOOKBACK_DAYS: i64 = 7;

/// Outcome of connecting an enrollment
#[derive(Debug, Clone, Serialize)]
pub struct ConnectOutcome {
    pub enrollment: Enrollment,
    pub accounts: Vec<Account>,
    /// Whether the initial sync was handed to the background worker
    pub sync_queued: bool,
}

/// Connects enrollments and pulls their accounts and transactions
#[derive(Clone)]
pub struct EnrollmentSyncOrchestrator {
    db: Database,
    provider: Arc<dyn Provider>,
    ingestor: TransactionIngestor,
    queue: Option<SyncQueue>,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(())
}

impl EnrollmentSyncOrchestrator {
    pub fn new(db: Database, provider: Arc<dyn Provider>, ingestor: TransactionIngestor) -> Self {
        Self {
            db,
            provider,
            ingestor,
            queue: None,
        }
    }

    /// Hand initial syncs to a background worker instead of leaving them to the caller
    pub fn with_queue(mut self, queue: SyncQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Register a provider enrollment for a user
    ///
    /// Accounts and balances are fetched before anything is written, so a
    /// provider failure leaves no partial enrollment behind. The enrollment
    /// and its accounts are then stored in one transaction.
    pub async fn connect(
        &self,
        user_id: &str,
        access_token: &str,
        provider_enrollment_id: &str,
        institution_name: Option<&str>,
    ) -> Result<ConnectOutcome> {
        require("user_id", user_id)?;
        require("access_token", access_token)?;
        require("enrollment_id", provider_enrollment_id)?;

        let raw_accounts = self.provider.fetch_accounts(access_token).await?;

        let mut fetched = Vec::with_capacity(raw_accounts.len());
        for raw in raw_accounts {
            let balance = self.fetch_balance(access_token, &raw).await?;
            fetched.push((raw, balance));
        }

        let institution_name = institution_name
            .map(str::to_string)
            .or_else(|| {
                fetched
                    .iter()
                    .find_map(|(raw, _)| raw.institution.as_ref().map(|i| i.name.clone()))
            });

        let new = NewEnrollment {
            user_id: user_id.to_string(),
            provider_enrollment_id: provider_enrollment_id.to_string(),
            access_token: access_token.to_string(),
            institution_name,
        };

        let (enrollment, accounts) = self.db.create_enrollment(&new, |enrollment_id| {
            fetched
                .iter()
                .map(|(raw, balance)| create_from_provider(raw, balance.as_ref(), enrollment_id))
                .collect()
        })?;

        info!(
            enrollment_id = enrollment.id,
            user_id = %enrollment.user_id,
            accounts = accounts.len(),
            "Connected enrollment"
        );

        let sync_queued = match &self.queue {
            Some(queue) => queue.enqueue(SyncJob::InitialSync {
                enrollment_id: enrollment.id,
            }),
            None => false,
        };

        Ok(ConnectOutcome {
            enrollment,
            accounts,
            sync_queued,
        })
    }

    /// Pull accounts, balances and transactions for one enrollment
    ///
    /// A rejected credential marks the enrollment DISCONNECTED and the error
    /// is returned. Other whole-enrollment provider failures are returned with
    /// the status unchanged. Per-account failures don't stop the sync; the
    /// enrollment ends DEGRADED instead of ACTIVE, and when an account's
    /// transactions were skipped the cursor stays put so the next sync asks
    /// for the same range again.
    pub async fn sync_transactions(&self, enrollment_id: i64) -> Result<SyncResult> {
        let enrollment = self
            .db
            .get_enrollment(enrollment_id)?
            .ok_or_else(|| Error::NotFound(format!("Enrollment {}", enrollment_id)))?;

        if enrollment.status == EnrollmentStatus::Disconnected {
            return Err(Error::Unauthorized(format!(
                "Enrollment {} is disconnected and must be reconnected",
                enrollment_id
            )));
        }

        let started_at = Utc::now();
        let since = sync_since(&enrollment);
        let token = enrollment.access_token.as_str();

        let raw_accounts = match self.provider.fetch_accounts(token).await {
            Ok(accounts) => accounts,
            Err(e) => return Err(self.on_provider_error(&enrollment, e)),
        };

        let mut result = SyncResult::default();
        let mut degraded = false;
        let mut missed_transactions = false;

        for raw in &raw_accounts {
            let balance = match self.fetch_balance(token, raw).await {
                Ok(balance) => balance,
                Err(e) => return Err(self.on_provider_error(&enrollment, e)),
            };
            degraded |= balance.is_none();

            let new = create_from_provider(raw, balance.as_ref(), enrollment.id);
            let account = self
                .db
                .upsert_accounts(std::slice::from_ref(&new))?
                .into_iter()
                .next()
                .ok_or_else(|| Error::NotFound(format!("Account {}", raw.id)))?;
            result.accounts_updated += 1;

            let transactions = match self.provider.fetch_transactions(token, &raw.id, since).await {
                Ok(transactions) => transactions,
                Err(e) if e.is_provider_auth() => return Err(self.on_provider_error(&enrollment, e)),
                Err(e) => {
                    warn!(
                        enrollment_id = enrollment.id,
                        account = %raw.id,
                        "Skipping account transactions: {}",
                        e
                    );
                    degraded = true;
                    missed_transactions = true;
                    continue;
                }
            };

            for raw_tx in &transactions {
                self.ingestor
                    .ingest_for(&account, &enrollment.user_id, raw_tx)
                    .await?;
                result.transactions_ingested += 1;
            }
            debug!(
                enrollment_id = enrollment.id,
                account_id = account.id,
                transactions = transactions.len(),
                "Synced account"
            );
        }

        let status = if degraded {
            EnrollmentStatus::Degraded
        } else {
            EnrollmentStatus::Active
        };
        let synced_from = (!missed_transactions).then_some(started_at);
        if !self
            .db
            .mark_enrollment_synced(enrollment.id, synced_from, status)?
        {
            warn!(
                enrollment_id = enrollment.id,
                "Enrollment disconnected during sync, keeping disconnected status"
            );
        }

        info!(
            enrollment_id = enrollment.id,
            accounts = result.accounts_updated,
            transactions = result.transactions_ingested,
            status = %status,
            "Enrollment sync complete"
        );

        Ok(result)
    }

    /// Balance for one account; transient failures yield None, auth failures propagate
    async fn fetch_balance(&self, token: &str, raw: &RawAccount) -> Result<Option<RawBalance>> {
        match self.provider.fetch_balances(token, &raw.id).await {
            Ok(balance) => Ok(Some(balance)),
            Err(e) if e.is_provider_auth() => Err(e),
            Err(e @ Error::Provider(_)) => {
                warn!(account = %raw.id, "Balance unavailable: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn on_provider_error(&self, enrollment: &Enrollment, error: Error) -> Error {
        if error.is_provider_auth() {
            warn!(
                enrollment_id = enrollment.id,
                "Provider rejected credential, marking enrollment disconnected: {}",
                error
            );
            if let Err(e) = self
                .db
                .set_enrollment_status(enrollment.id, EnrollmentStatus::Disconnected)
            {
                warn!(enrollment_id = enrollment.id, "Failed to record disconnect: {}", e);
            }
        }
        error
    }
}

/// Earliest transaction date to request: full history on the first sync
fn sync_since(enrollment: &Enrollment) -> Option<NaiveDate> {
    enrollment
        .last_synced_at
        .map(|at| at.date_naive() - Duration::days(SYNC_LOOKBACK_DAYS))
}

#[async_trait]
impl EnrollmentSyncer for EnrollmentSyncOrchestrator {
    async fn sync_enrollment(&self, enrollment_id: i64) -> Result<SyncResult> {
        self.sync_transactions(enrollment_id).await
    }
}
