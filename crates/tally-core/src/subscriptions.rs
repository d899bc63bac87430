//! Subscription detection
//!
//! A merchant is recurring for a user when it charges them at least
//! `MIN_CHARGES` times at a roughly monthly interval with a stable amount.
//! A user override for the merchant always beats the heuristic.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{OverrideKind, Transaction};

/// Fewest charges that can establish a pattern (2 could be coincidence)
pub const MIN_CHARGES: usize = 3;

/// Allowed deviation from the median amount, as a fraction
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

const MONTHLY_INTERVAL_DAYS: i64 = 30;
const MONTHLY_TOLERANCE_DAYS: i64 = 7;

/// Share of intervals that must look monthly
const INTERVAL_CONSISTENCY: f64 = 0.7;

/// A merchant currently treated as a subscription for a user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedSubscription {
    pub merchant_name: String,
    pub charge_count: usize,
    /// Median charge, positive
    pub typical_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub first_charged: Option<NaiveDate>,
    pub last_charged: Option<NaiveDate>,
    /// True when an include override, not the heuristic, made it recurring
    pub overridden: bool,
}

fn median(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / Decimal::TWO)
    } else {
        Some(sorted[mid])
    }
}

/// Charges that count toward a pattern: outflows that aren't transfers
fn charges(transactions: &[Transaction]) -> Vec<&Transaction> {
    let mut charges: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.amount.is_sign_negative() && !t.amount.is_zero() && !t.is_transfer)
        .collect();
    charges.sort_by_key(|t| (t.date, t.id));
    charges
}

/// Whether charges form a monthly, stable-amount pattern
pub fn is_recurring_pattern(transactions: &[Transaction]) -> bool {
    let charges = charges(transactions);
    if charges.len() < MIN_CHARGES {
        return false;
    }

    let amounts: Vec<Decimal> = charges.iter().map(|t| t.amount.abs()).collect();
    let Some(median_amount) = median(&amounts) else {
        return false;
    };
    if median_amount < Decimal::new(1, 2) {
        return false;
    }

    let tolerance = median_amount * AMOUNT_TOLERANCE;
    if !amounts.iter().all(|a| (*a - median_amount).abs() <= tolerance) {
        return false;
    }

    let intervals: Vec<i64> = charges
        .windows(2)
        .map(|w| (w[1].date - w[0].date).num_days())
        .collect();

    let consistent = intervals
        .iter()
        .filter(|&&days| (days - MONTHLY_INTERVAL_DAYS).abs() <= MONTHLY_TOLERANCE_DAYS)
        .count();

    consistent as f64 / intervals.len() as f64 >= INTERVAL_CONSISTENCY
}

/// Recurring-merchant inference with user overrides
#[derive(Clone)]
pub struct SubscriptionDetector {
    db: Database,
}

impl SubscriptionDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Decide whether a merchant is recurring for a user and store the flag
    /// on all of their transactions at that merchant
    pub fn evaluate_merchant(&self, user_id: &str, merchant_name: &str) -> Result<bool> {
        let recurring = match self.db.get_subscription_override(user_id, merchant_name)? {
            Some(OverrideKind::Include) => true,
            Some(OverrideKind::Exclude) => false,
            None => {
                let transactions = self.db.list_merchant_transactions(user_id, merchant_name)?;
                is_recurring_pattern(&transactions)
            }
        };

        let updated = self
            .db
            .set_recurring_for_merchant(user_id, merchant_name, recurring)?;
        debug!(merchant = %merchant_name, recurring, updated, "Evaluated merchant");

        Ok(recurring)
    }

    /// Force a merchant in or out of the user's subscriptions
    ///
    /// Takes effect immediately; returns the resulting recurring flag.
    pub fn add_subscription_override(
        &self,
        user_id: &str,
        merchant_name: &str,
        kind: OverrideKind,
    ) -> Result<bool> {
        let merchant_name = merchant_name.trim();
        if merchant_name.is_empty() {
            return Err(Error::validation("merchantName", "must not be empty"));
        }

        self.db
            .upsert_subscription_override(user_id, merchant_name, kind)?;
        self.evaluate_merchant(user_id, merchant_name)
    }

    /// Drop a user's override and fall back to the heuristic
    ///
    /// Returns false when there was no override.
    pub fn remove_subscription_override(&self, user_id: &str, merchant_name: &str) -> Result<bool> {
        let merchant_name = merchant_name.trim();
        let removed = self
            .db
            .delete_subscription_override(user_id, merchant_name)?;
        if removed {
            self.evaluate_merchant(user_id, merchant_name)?;
        }
        Ok(removed)
    }

    /// Merchants currently treated as subscriptions for a user
    pub fn list_subscriptions(&self, user_id: &str) -> Result<Vec<DetectedSubscription>> {
        let mut subscriptions = Vec::new();

        for merchant in self.db.list_user_merchants(user_id)? {
            let override_kind = self.db.get_subscription_override(user_id, &merchant)?;
            if override_kind == Some(OverrideKind::Exclude) {
                continue;
            }

            let transactions = self.db.list_merchant_transactions(user_id, &merchant)?;
            let overridden = override_kind == Some(OverrideKind::Include);
            if !overridden && !is_recurring_pattern(&transactions) {
                continue;
            }

            let charges = charges(&transactions);
            let amounts: Vec<Decimal> = charges.iter().map(|t| t.amount.abs()).collect();

            subscriptions.push(DetectedSubscription {
                merchant_name: merchant,
                charge_count: charges.len(),
                typical_amount: median(&amounts),
                currency: charges.last().map(|t| t.currency.clone()),
                first_charged: charges.first().map(|t| t.date),
                last_charged: charges.last().map(|t| t.date),
                overridden,
            });
        }

        Ok(subscriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewEnrollment;
    use crate::models::{AccountKind, NewAccount, NewTransaction, ProcessingStatus};
    use chrono::Utc;

    fn tx(id: i64, amount: &str, date: &str) -> Transaction {
        Transaction {
            id,
            account_id: 1,
            provider_transaction_id: format!("txn_{}", id),
            amount: amount.parse().unwrap(),
            currency: "USD".to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            name: "NETFLIX.COM".to_string(),
            merchant_name: Some("Netflix".to_string()),
            category: None,
            provider_status: None,
            running_balance: None,
            is_transfer: false,
            linked_transfer_id: None,
            is_pending: false,
            is_recurring: false,
            is_excluded: false,
            note: None,
            processing_status: ProcessingStatus::Categorized,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_monthly_stable_charges_are_recurring() {
        let txs = vec![
            tx(1, "-15.99", "2024-01-15"),
            tx(2, "-15.99", "2024-02-15"),
            tx(3, "-15.99", "2024-03-15"),
        ];
        assert!(is_recurring_pattern(&txs));
    }

    #[test]
    fn test_two_charges_are_not_enough() {
        let txs = vec![tx(1, "-15.99", "2024-01-15"), tx(2, "-15.99", "2024-02-15")];
        assert!(!is_recurring_pattern(&txs));
    }

    #[test]
    fn test_amount_tolerance() {
        // 16.49 is ~3% above the median 15.99
        let within = vec![
            tx(1, "-15.99", "2024-01-15"),
            tx(2, "-15.99", "2024-02-15"),
            tx(3, "-16.49", "2024-03-15"),
        ];
        assert!(is_recurring_pattern(&within));

        let outside = vec![
            tx(1, "-15.99", "2024-01-15"),
            tx(2, "-15.99", "2024-02-15"),
            tx(3, "-22.99", "2024-03-15"),
        ];
        assert!(!is_recurring_pattern(&outside));
    }

    #[test]
    fn test_irregular_intervals_rejected() {
        let weekly = vec![
            tx(1, "-5.00", "2024-01-01"),
            tx(2, "-5.00", "2024-01-08"),
            tx(3, "-5.00", "2024-01-15"),
        ];
        assert!(!is_recurring_pattern(&weekly));

        let erratic = vec![
            tx(1, "-9.99", "2024-01-01"),
            tx(2, "-9.99", "2024-01-03"),
            tx(3, "-9.99", "2024-03-20"),
        ];
        assert!(!is_recurring_pattern(&erratic));
    }

    #[test]
    fn test_refunds_and_transfers_ignored() {
        let mut transfer = tx(3, "-15.99", "2024-03-15");
        transfer.is_transfer = true;
        let txs = vec![
            tx(1, "-15.99", "2024-01-15"),
            tx(2, "15.99", "2024-02-15"),
            transfer,
        ];
        assert!(!is_recurring_pattern(&txs));
    }

    #[test]
    fn test_median() {
        let d = |s: &str| s.parse::<Decimal>().unwrap();
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[d("3"), d("1"), d("2")]), Some(d("2")));
        assert_eq!(median(&[d("1"), d("2"), d("3"), d("4")]), Some(d("2.5")));
    }

    fn seeded_db(dates: &[&str]) -> (Database, i64) {
        let db = Database::in_memory().unwrap();
        let enrollment = NewEnrollment {
            user_id: "alice@example.com".to_string(),
            provider_enrollment_id: "enr_1".to_string(),
            access_token: "token".to_string(),
            institution_name: None,
        };
        let (_, accounts) = db
            .create_enrollment(&enrollment, |id| {
                vec![NewAccount {
                    enrollment_id: id,
                    provider_account_id: "acc_1".to_string(),
                    name: "Checking".to_string(),
                    kind: AccountKind::Bank,
                    subtype: None,
                    mask: None,
                    current_balance: None,
                    available_balance: None,
                    currency: "USD".to_string(),
                }]
            })
            .unwrap();

        for (i, date) in dates.iter().enumerate() {
            db.upsert_provider_transaction(&NewTransaction {
                account_id: accounts[0].id,
                provider_transaction_id: format!("txn_{}", i),
                amount: "-15.99".parse().unwrap(),
                currency: "USD".to_string(),
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                name: "NETFLIX.COM".to_string(),
                merchant_name: Some("Netflix".to_string()),
                provider_category: None,
                provider_status: None,
                running_balance: None,
                is_pending: false,
            })
            .unwrap();
        }

        (db, accounts[0].id)
    }

    #[test]
    fn test_evaluate_merchant_flags_transactions() {
        let (db, account_id) = seeded_db(&["2024-01-15", "2024-02-15", "2024-03-15"]);
        let detector = SubscriptionDetector::new(db.clone());

        assert!(detector
            .evaluate_merchant("alice@example.com", "Netflix")
            .unwrap());
        let tx = db.find_transaction(account_id, "txn_0").unwrap().unwrap();
        assert!(tx.is_recurring);

        let subs = detector.list_subscriptions("alice@example.com").unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].charge_count, 3);
        assert_eq!(subs[0].typical_amount, Some("15.99".parse().unwrap()));
        assert!(!subs[0].overridden);
    }

    #[test]
    fn test_merchant_case_variants_listed_once() {
        let (db, account_id) = seeded_db(&["2024-01-15", "2024-02-15", "2024-03-15"]);
        db.upsert_provider_transaction(&NewTransaction {
            account_id,
            provider_transaction_id: "txn_upper".to_string(),
            amount: "-15.99".parse().unwrap(),
            currency: "USD".to_string(),
            date: NaiveDate::parse_from_str("2024-04-15", "%Y-%m-%d").unwrap(),
            name: "NETFLIX.COM".to_string(),
            merchant_name: Some("NETFLIX".to_string()),
            provider_category: None,
            provider_status: None,
            running_balance: None,
            is_pending: false,
        })
        .unwrap();

        let subs = SubscriptionDetector::new(db)
            .list_subscriptions("alice@example.com")
            .unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].charge_count, 4);
    }

    #[test]
    fn test_exclude_override_beats_heuristic() {
        let (db, account_id) = seeded_db(&["2024-01-15", "2024-02-15", "2024-03-15"]);
        let detector = SubscriptionDetector::new(db.clone());
        detector
            .evaluate_merchant("alice@example.com", "Netflix")
            .unwrap();

        let recurring = detector
            .add_subscription_override("alice@example.com", "netflix", OverrideKind::Exclude)
            .unwrap();
        assert!(!recurring);
        assert!(!db.find_transaction(account_id, "txn_2").unwrap().unwrap().is_recurring);
        assert!(detector.list_subscriptions("alice@example.com").unwrap().is_empty());

        // Removing the override restores the heuristic result
        assert!(detector
            .remove_subscription_override("alice@example.com", "Netflix")
            .unwrap());
        assert!(db.find_transaction(account_id, "txn_2").unwrap().unwrap().is_recurring);
    }

    #[test]
    fn test_include_override_beats_heuristic() {
        let (db, account_id) = seeded_db(&["2024-01-15"]);
        let detector = SubscriptionDetector::new(db.clone());

        assert!(!detector
            .evaluate_merchant("alice@example.com", "Netflix")
            .unwrap());
        assert!(detector
            .add_subscription_override("alice@example.com", "Netflix", OverrideKind::Include)
            .unwrap());
        assert!(db.find_transaction(account_id, "txn_0").unwrap().unwrap().is_recurring);

        let subs = detector.list_subscriptions("alice@example.com").unwrap();
        assert_eq!(subs.len(), 1);
        assert!(subs[0].overridden);

        assert!(!detector
            .remove_subscription_override("alice@example.com", "Hulu")
            .unwrap());
        assert!(matches!(
            detector.add_subscription_override("alice@example.com", " ", OverrideKind::Include),
            Err(Error::Validation { .. })
        ));
    }
}
