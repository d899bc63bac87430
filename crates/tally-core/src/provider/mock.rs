//! In-process provider for tests and development
//!
//! Scripted per access token (accounts) and per provider account id
//! (balances, transactions). Failures can be injected for either key.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{ProviderError, Result};

use super::{Provider, RawAccount, RawBalance, RawTransaction};

#[derive(Default)]
struct MockState {
    accounts: HashMap<String, Vec<RawAccount>>,
    balances: HashMap<String, RawBalance>,
    transactions: HashMap<String, Vec<RawTransaction>>,
    /// Keyed by access token or provider account id
    failures: HashMap<String, ProviderError>,
    calls: usize,
}

/// Mock provider with scriptable data and failures
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an account (and its balance) under an access token
    pub fn add_account(&self, access_token: &str, account: RawAccount, balance: RawBalance) {
        let mut state = self.state();
        state.balances.insert(account.id.clone(), balance);
        state
            .accounts
            .entry(access_token.to_string())
            .or_default()
            .push(account);
    }

    /// Replace an account's balance
    pub fn set_balance(&self, balance: RawBalance) {
        self.state()
            .balances
            .insert(balance.account_id.clone(), balance);
    }

    /// Add or replace (by id) a transaction on an account
    pub fn upsert_transaction(&self, transaction: RawTransaction) {
        let mut state = self.state();
        let list = state
            .transactions
            .entry(transaction.account_id.clone())
            .or_default();
        match list.iter_mut().find(|t| t.id == transaction.id) {
            Some(existing) => *existing = transaction,
            None => list.push(transaction),
        }
    }

    /// Make every call for this token or account id fail
    pub fn fail(&self, key: &str, error: ProviderError) {
        self.state().failures.insert(key.to_string(), error);
    }

    pub fn clear_failure(&self, key: &str) {
        self.state().failures.remove(key);
    }

    /// Total number of provider calls made
    pub fn call_count(&self) -> usize {
        self.state().calls
    }

    fn check(&self, keys: &[&str]) -> Result<()> {
        let mut state = self.state();
        state.calls += 1;
        for key in keys {
            if let Some(error) = state.failures.get(*key) {
                return Err(error.clone().into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn fetch_accounts(&self, access_token: &str) -> Result<Vec<RawAccount>> {
        self.check(&[access_token])?;
        match self.state().accounts.get(access_token) {
            Some(accounts) => Ok(accounts.clone()),
            None => Err(ProviderError::from_status(401, None, "Unknown access token").into()),
        }
    }

    async fn fetch_balances(&self, access_token: &str, account_id: &str) -> Result<RawBalance> {
        self.check(&[access_token, account_id])?;
        Ok(self
            .state()
            .balances
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| RawBalance {
                account_id: account_id.to_string(),
                ..Default::default()
            }))
    }

    async fn fetch_transactions(
        &self,
        access_token: &str,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RawTransaction>> {
        self.check(&[access_token, account_id])?;
        Ok(self
            .state()
            .transactions
            .get(account_id)
            .map(|list| {
                list.iter()
                    .filter(|t| since.map_or(true, |since| t.date >= since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
