//! Idempotent transaction ingestion
//!
//! Stores one provider transaction keyed on (account, provider id), then runs
//! enrichment: categorization, transfer detection, subscription detection.
//! Enrichment failures mark the row FAILED instead of dropping it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::categorize::CategorizationPipeline;
use crate::db::{Database, IngestOutcome};
use crate::error::{Error, Result};
use crate::models::{Account, NewTransaction, ProcessingStatus, Transaction};
use crate::provider::RawTransaction;
use crate::subscriptions::SubscriptionDetector;
use crate::transfers::{self, candidate_window};

/// Convert a provider transaction for storage on `account`
pub fn to_new_transaction(account: &Account, raw: &RawTransaction) -> NewTransaction {
    NewTransaction {
        account_id: account.id,
        provider_transaction_id: raw.id.clone(),
        amount: raw.amount,
        currency: account.currency.clone(),
        date: raw.date,
        name: raw.description.trim().to_string(),
        merchant_name: raw.merchant_name().map(|m| m.trim().to_string()),
        provider_category: raw
            .details
            .category
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        provider_status: Some(raw.status.to_lowercase()),
        running_balance: raw.running_balance,
        is_pending: raw.is_pending(),
    }
}

/// Stores provider transactions and drives the enrichment chain
#[derive(Clone)]
pub struct TransactionIngestor {
    db: Database,
    categorizer: Arc<CategorizationPipeline>,
    subscriptions: SubscriptionDetector,
}

impl TransactionIngestor {
    pub fn new(db: Database, categorizer: CategorizationPipeline) -> Self {
        let subscriptions = SubscriptionDetector::new(db.clone());
        Self {
            db,
            categorizer: Arc::new(categorizer),
            subscriptions,
        }
    }

    /// Ingest one transaction for an account by ID
    pub async fn ingest(&self, account_id: i64, raw: &RawTransaction) -> Result<Transaction> {
        let account = self
            .db
            .get_account(account_id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", account_id)))?;
        let user_id = self
            .db
            .get_account_owner(account_id)?
            .ok_or_else(|| Error::NotFound(format!("Owner of account {}", account_id)))?;

        self.ingest_for(&account, &user_id, raw).await
    }

    /// Ingest one transaction when the account and its owner are already loaded
    ///
    /// Storage errors propagate. Enrichment errors are recorded as FAILED on
    /// the stored row, which is returned normally. A row that is re-ingested
    /// after an earlier enrichment failure gets another enrichment attempt.
    pub async fn ingest_for(
        &self,
        account: &Account,
        user_id: &str,
        raw: &RawTransaction,
    ) -> Result<Transaction> {
        let new = to_new_transaction(account, raw);
        let outcome = self.db.upsert_provider_transaction(&new)?;

        let transaction = match outcome {
            IngestOutcome::Updated(tx) if tx.processing_status == ProcessingStatus::Categorized => {
                debug!(transaction_id = tx.id, "Refreshed existing transaction");
                return Ok(tx);
            }
            IngestOutcome::Inserted(tx) | IngestOutcome::Updated(tx) => tx,
        };

        let status = match self.enrich(&transaction, user_id).await {
            Ok(()) => ProcessingStatus::Categorized,
            Err(e) => {
                warn!(
                    transaction_id = transaction.id,
                    provider_transaction_id = %transaction.provider_transaction_id,
                    "Transaction enrichment failed: {}",
                    e
                );
                ProcessingStatus::Failed
            }
        };
        self.db.set_processing_status(transaction.id, status)?;

        self.db
            .get_transaction(transaction.id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction.id)))
    }

    async fn enrich(&self, transaction: &Transaction, user_id: &str) -> Result<()> {
        if let Some(assignment) = self.categorizer.categorize(transaction).await? {
            self.db
                .set_transaction_category(transaction.id, &assignment)?;
        }

        if !transaction.is_transfer {
            self.detect_transfers(transaction, user_id)?;
        }

        if let Some(merchant) = transaction.merchant_name.as_deref() {
            self.subscriptions.evaluate_merchant(user_id, merchant)?;
        }

        Ok(())
    }

    /// Pair unmatched transactions around this one's date across the user's accounts
    fn detect_transfers(&self, transaction: &Transaction, user_id: &str) -> Result<()> {
        let (from, to) = candidate_window(transaction.date);
        let candidates = self.db.list_transfer_candidates(user_id, from, to)?;
        let accounts = self.db.list_accounts_for_user(user_id)?;

        for pair in transfers::detect(&candidates, &accounts) {
            if self.db.link_transfer_pair(pair.outflow_id, pair.inflow_id)? {
                debug!(
                    outflow_id = pair.outflow_id,
                    inflow_id = pair.inflow_id,
                    "Linked transfer pair"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AIClient, MockBackend};
    use crate::categorize::{CategorizationResult, CategorizationStrategy};
    use crate::db::NewEnrollment;
    use crate::models::{AccountKind, CategorySource, NewAccount, TransactionEdit};
    use crate::provider::{RawCounterparty, RawTransactionDetails};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    fn raw(id: &str, account: &str, amount: &str, date: &str, merchant: Option<&str>) -> RawTransaction {
        RawTransaction {
            id: id.to_string(),
            account_id: account.to_string(),
            amount: amount.parse().unwrap(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: format!("{} PURCHASE", merchant.unwrap_or("ONLINE")),
            status: "pending".to_string(),
            running_balance: None,
            details: RawTransactionDetails {
                category: None,
                counterparty: merchant.map(|m| RawCounterparty {
                    name: Some(m.to_string()),
                    counterparty_type: Some("organization".to_string()),
                }),
            },
        }
    }

    fn setup(
        categorizer: impl FnOnce(&Database) -> CategorizationPipeline,
    ) -> (Database, TransactionIngestor, Vec<Account>) {
        let db = Database::in_memory().unwrap();
        let enrollment = NewEnrollment {
            user_id: "alice@example.com".to_string(),
            provider_enrollment_id: "enr_1".to_string(),
            access_token: "token".to_string(),
            institution_name: None,
        };
        let (_, accounts) = db
            .create_enrollment(&enrollment, |id| {
                ["acc_a", "acc_b"]
                    .iter()
                    .map(|p| NewAccount {
                        enrollment_id: id,
                        provider_account_id: p.to_string(),
                        name: p.to_string(),
                        kind: AccountKind::Bank,
                        subtype: None,
                        mask: None,
                        current_balance: None,
                        available_balance: None,
                        currency: "USD".to_string(),
                    })
                    .collect()
            })
            .unwrap();
        let ingestor = TransactionIngestor::new(db.clone(), categorizer(&db));
        (db, ingestor, accounts)
    }

    fn ai_pipeline(db: &Database) -> CategorizationPipeline {
        CategorizationPipeline::standard(db.clone(), Some(AIClient::Mock(MockBackend::new())))
    }

    #[tokio::test]
    async fn test_new_transaction_is_enriched() {
        let (db, ingestor, accounts) = setup(ai_pipeline);

        let tx = ingestor
            .ingest(accounts[0].id, &raw("t1", "acc_a", "-15.99", "2024-03-01", Some("Netflix")))
            .await
            .unwrap();

        assert_eq!(tx.processing_status, ProcessingStatus::Categorized);
        let category = tx.category.unwrap();
        assert_eq!(category.source, CategorySource::Ai);
        assert_eq!(category.category, "Entertainment");
        assert!(tx.is_pending);
        assert_eq!(tx.currency, "USD");
        assert!(db.find_transaction(accounts[0].id, "t1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reingest_preserves_user_fields() {
        let (db, ingestor, accounts) = setup(|_| CategorizationPipeline::new(Vec::new()));
        let pending = raw("t1", "acc_a", "-15.99", "2024-03-01", Some("Netflix"));

        let tx = ingestor.ingest(accounts[0].id, &pending).await.unwrap();
        db.update_transaction_user_fields(
            tx.id,
            &TransactionEdit {
                category: Some(Some("Streaming".to_string())),
                note: Some(Some("shared".to_string())),
                is_excluded: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let mut posted = pending.clone();
        posted.status = "posted".to_string();
        posted.amount = "-16.99".parse().unwrap();
        let again = ingestor.ingest(accounts[0].id, &posted).await.unwrap();

        assert_eq!(again.id, tx.id);
        assert!(!again.is_pending);
        assert_eq!(again.amount, "-16.99".parse().unwrap());
        assert_eq!(again.note.as_deref(), Some("shared"));
        assert!(again.is_excluded);
        let category = again.category.unwrap();
        assert_eq!(category.category, "Streaming");
        assert_eq!(category.source, CategorySource::UserOverride);
        assert_eq!(db.list_transactions("alice@example.com", None, 100, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_category_is_kept() {
        let backend = MockBackend::new();
        let (_, ingestor, accounts) = setup(|db| {
            CategorizationPipeline::standard(db.clone(), Some(AIClient::Mock(backend.clone())))
        });

        let mut with_category = raw("t1", "acc_a", "-8.00", "2024-03-01", Some("Starbucks"));
        with_category.details.category = Some("dining".to_string());

        let tx = ingestor.ingest(accounts[0].id, &with_category).await.unwrap();
        let category = tx.category.unwrap();
        assert_eq!(category.source, CategorySource::Provider);
        assert_eq!(category.category, "dining");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_transfer_pair_linked_symmetrically() {
        let (db, ingestor, accounts) = setup(|_| CategorizationPipeline::new(Vec::new()));

        let out = ingestor
            .ingest(accounts[0].id, &raw("t1", "acc_a", "-45.00", "2024-03-01", None))
            .await
            .unwrap();
        let inn = ingestor
            .ingest(accounts[1].id, &raw("t2", "acc_b", "45.00", "2024-03-02", None))
            .await
            .unwrap();

        let out = db.get_transaction(out.id).unwrap().unwrap();
        assert!(out.is_transfer && inn.is_transfer);
        assert_eq!(out.linked_transfer_id, Some(inn.id));
        assert_eq!(inn.linked_transfer_id, Some(out.id));

        // A third matching leg finds nothing left to pair with
        let third = ingestor
            .ingest(accounts[1].id, &raw("t3", "acc_b", "45.00", "2024-03-02", None))
            .await
            .unwrap();
        assert!(!third.is_transfer);
    }

    struct Broken;

    #[async_trait]
    impl CategorizationStrategy for Broken {
        fn source(&self) -> CategorySource {
            CategorySource::Rule
        }

        async fn categorize(&self, _: &Transaction) -> Result<Option<CategorizationResult>> {
            Err(Error::InvalidData("rule store unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_enrichment_failure_marks_failed_then_retries() {
        let (db, ingestor, accounts) = setup(|_| CategorizationPipeline::new(vec![Box::new(Broken)]));
        let payload = raw("t1", "acc_a", "-3.50", "2024-03-01", Some("Corner Store"));

        let tx = ingestor.ingest(accounts[0].id, &payload).await.unwrap();
        assert_eq!(tx.processing_status, ProcessingStatus::Failed);
        assert!(db.find_transaction(accounts[0].id, "t1").unwrap().is_some());

        let healthy = TransactionIngestor::new(db.clone(), CategorizationPipeline::new(Vec::new()));
        let tx = healthy.ingest(accounts[0].id, &payload).await.unwrap();
        assert_eq!(tx.processing_status, ProcessingStatus::Categorized);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (_, ingestor, _) = setup(|_| CategorizationPipeline::new(Vec::new()));
        let result = ingestor
            .ingest(999, &raw("t1", "acc_x", "-1", "2024-03-01", None))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_to_new_transaction() {
        let account = Account {
            id: 3,
            enrollment_id: 1,
            provider_account_id: "acc_a".to_string(),
            name: "Checking".to_string(),
            kind: AccountKind::Bank,
            subtype: None,
            mask: None,
            current_balance: None,
            available_balance: None,
            currency: "EUR".to_string(),
            is_hidden: false,
        };
        let mut payload = raw("t9", "acc_a", "-2.00", "2024-03-01", Some("  Cafe  "));
        payload.status = "Posted".to_string();
        payload.details.category = Some(" ".to_string());

        let new = to_new_transaction(&account, &payload);
        assert_eq!(new.account_id, 3);
        assert_eq!(new.currency, "EUR");
        assert_eq!(new.merchant_name.as_deref(), Some("Cafe"));
        assert!(new.provider_category.is_none());
        assert_eq!(new.provider_status.as_deref(), Some("posted"));
        assert!(!new.is_pending);
    }
}
