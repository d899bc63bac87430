//! Transfer detection
//!
//! Pairs offsetting transactions across one user's accounts: equal magnitude,
//! opposite sign, different accounts, dates within a small window.

use std::collections::HashSet;

use chrono::Duration;
use serde::Serialize;

use crate::models::{Account, Transaction};

/// Maximum days between the two legs of a transfer
pub const TRANSFER_WINDOW_DAYS: i64 = 2;

/// Two transactions representing one movement between a user's own accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferPair {
    pub outflow_id: i64,
    pub inflow_id: i64,
}

fn offsets(a: &Transaction, b: &Transaction) -> bool {
    a.account_id != b.account_id
        && a.currency == b.currency
        && !a.amount.is_zero()
        && a.amount == -b.amount
        && (a.date - b.date).num_days().abs() <= TRANSFER_WINDOW_DAYS
}

/// Find transfer pairs among `transactions` that belong to `accounts`
///
/// Transactions already marked as transfers are ignored. Each transaction is
/// matched at most once. Transactions are considered in slice order (callers
/// pass insertion order); for each, the candidate with the smallest date gap
/// wins, then the earliest-dated, then the earliest in slice order.
pub fn detect(transactions: &[Transaction], accounts: &[Account]) -> Vec<TransferPair> {
    let account_ids: HashSet<i64> = accounts.iter().map(|a| a.id).collect();
    let eligible: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| account_ids.contains(&t.account_id))
        .filter(|t| !t.is_transfer && t.linked_transfer_id.is_none())
        .collect();

    let mut matched = vec![false; eligible.len()];
    let mut pairs = Vec::new();

    for i in 0..eligible.len() {
        if matched[i] {
            continue;
        }
        let tx = eligible[i];

        let best = eligible
            .iter()
            .enumerate()
            .filter(|&(j, other)| j != i && !matched[j] && offsets(tx, other))
            .min_by_key(|&(j, other)| ((tx.date - other.date).num_days().abs(), other.date, j));

        if let Some((j, other)) = best {
            matched[i] = true;
            matched[j] = true;
            pairs.push(if tx.amount.is_sign_negative() {
                TransferPair {
                    outflow_id: tx.id,
                    inflow_id: other.id,
                }
            } else {
                TransferPair {
                    outflow_id: other.id,
                    inflow_id: tx.id,
                }
            });
        }
    }

    pairs
}

/// Date range of candidates that could pair with a transaction on `date`
pub fn candidate_window(date: chrono::NaiveDate) -> (chrono::NaiveDate, chrono::NaiveDate) {
    let window = Duration::days(TRANSFER_WINDOW_DAYS);
    (date - window, date + window)
}
