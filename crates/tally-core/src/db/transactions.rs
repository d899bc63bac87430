//! Transaction operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::{decimal_column, optional_decimal_column, parse_datetime, Database};
use crate::error::Result;
use crate::models::{
    CategoryAssignment, CategorySource, ConfidenceScore, NewTransaction, ProcessingStatus,
    Transaction, TransactionEdit,
};

/// Result of storing a provider transaction
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// First sighting; the row is PENDING and needs enrichment
    Inserted(Transaction),
    /// Already stored; only provider-mutable fields were refreshed
    Updated(Transaction),
}

impl IngestOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Self::Inserted(tx) | Self::Updated(tx) => tx,
        }
    }
}

const TX_COLUMNS: &str = "t.id, t.account_id, t.provider_transaction_id, t.amount, t.currency, \
     t.date, t.name, t.merchant_name, t.category, t.subcategory, t.category_confidence, \
     t.category_source, t.provider_status, t.running_balance, t.is_transfer, t.linked_transfer_id, \
     t.is_pending, t.is_recurring, t.is_excluded, t.note, t.processing_status, t.created_at";

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let date_str: String = row.get(5)?;
    let category: Option<String> = row.get(8)?;
    let confidence: Option<f64> = row.get(10)?;
    let source_str: Option<String> = row.get(11)?;
    let status_str: String = row.get(20)?;
    let created_at: String = row.get(21)?;

    let category = match (category, source_str.and_then(|s| s.parse::<CategorySource>().ok())) {
        (Some(category), Some(source)) => Some(CategoryAssignment {
            category,
            subcategory: row.get(9)?,
            confidence: confidence.map(ConfidenceScore::new),
            source,
        }),
        _ => None,
    };

    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        provider_transaction_id: row.get(2)?,
        amount: decimal_column(row, 3)?,
        currency: row.get(4)?,
        date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").unwrap_or_default(),
        name: row.get(6)?,
        merchant_name: row.get(7)?,
        category,
        provider_status: row.get(12)?,
        running_balance: optional_decimal_column(row, 13)?,
        is_transfer: row.get(14)?,
        linked_transfer_id: row.get(15)?,
        is_pending: row.get(16)?,
        is_recurring: row.get(17)?,
        is_excluded: row.get(18)?,
        note: row.get(19)?,
        processing_status: status_str.parse().unwrap_or(ProcessingStatus::Pending),
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Store a provider transaction idempotently on (account_id, provider_transaction_id)
    ///
    /// A new row starts PENDING. An existing row only has its provider-mutable
    /// fields refreshed (amount, date, status, running balance, pending flag);
    /// category overrides, notes and exclusions are never touched. A provider
    /// category only replaces a category that is absent or itself provider-sourced.
    pub fn upsert_provider_transaction(&self, new: &NewTransaction) -> Result<IngestOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let provider_source = new
            .provider_category
            .as_ref()
            .map(|_| CategorySource::Provider.as_str());

        let inserted = tx.execute(
            r#"
            INSERT INTO transactions (account_id, provider_transaction_id, amount, currency, date, name,
                                      merchant_name, category, category_source, provider_status,
                                      running_balance, is_pending, processing_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')
            ON CONFLICT(account_id, provider_transaction_id) DO NOTHING
            "#,
            params![
                new.account_id,
                new.provider_transaction_id,
                new.amount.to_string(),
                new.currency,
                new.date.to_string(),
                new.name,
                new.merchant_name,
                new.provider_category,
                provider_source,
                new.provider_status,
                new.running_balance.map(|b| b.to_string()),
                new.is_pending,
            ],
        )?;

        if inserted == 0 {
            tx.execute(
                r#"
                UPDATE transactions SET
                    amount = ?1,
                    date = ?2,
                    provider_status = ?3,
                    running_balance = ?4,
                    is_pending = ?5,
                    category = CASE
                        WHEN ?6 IS NOT NULL AND (category_source IS NULL OR category_source = 'provider') THEN ?6
                        ELSE category END,
                    category_source = CASE
                        WHEN ?6 IS NOT NULL AND (category_source IS NULL OR category_source = 'provider') THEN 'provider'
                        ELSE category_source END,
                    updated_at = CURRENT_TIMESTAMP
                WHERE account_id = ?7 AND provider_transaction_id = ?8
                "#,
                params![
                    new.amount.to_string(),
                    new.date.to_string(),
                    new.provider_status,
                    new.running_balance.map(|b| b.to_string()),
                    new.is_pending,
                    new.provider_category,
                    new.account_id,
                    new.provider_transaction_id,
                ],
            )?;
        }

        let stored = tx.query_row(
            &format!(
                "SELECT {} FROM transactions t WHERE t.account_id = ? AND t.provider_transaction_id = ?",
                TX_COLUMNS
            ),
            params![new.account_id, new.provider_transaction_id],
            row_to_transaction,
        )?;

        tx.commit()?;

        Ok(if inserted > 0 {
            IngestOutcome::Inserted(stored)
        } else {
            IngestOutcome::Updated(stored)
        })
    }

    /// Look up a transaction by its idempotency key
    pub fn find_transaction(
        &self,
        account_id: i64,
        provider_transaction_id: &str,
    ) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let transaction = conn
            .query_row(
                &format!(
                    "SELECT {} FROM transactions t WHERE t.account_id = ? AND t.provider_transaction_id = ?",
                    TX_COLUMNS
                ),
                params![account_id, provider_transaction_id],
                row_to_transaction,
            )
            .optional()?;
        Ok(transaction)
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let transaction = conn
            .query_row(
                &format!("SELECT {} FROM transactions t WHERE t.id = ?", TX_COLUMNS),
                params![id],
                row_to_transaction,
            )
            .optional()?;
        Ok(transaction)
    }

    /// List a user's transactions, newest first
    pub fn list_transactions(
        &self,
        user_id: &str,
        account_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions t
             JOIN accounts a ON a.id = t.account_id
             JOIN enrollments e ON e.id = a.enrollment_id
             WHERE e.user_id = ?1 AND (?2 IS NULL OR t.account_id = ?2)
             ORDER BY t.date DESC, t.id DESC
             LIMIT ?3 OFFSET ?4",
            TX_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(params![user_id, account_id, limit, offset], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Write a computed category (rule or AI)
    pub fn set_transaction_category(&self, id: i64, assignment: &CategoryAssignment) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE transactions SET category = ?, subcategory = ?, category_confidence = ?, category_source = ?,
                    updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![
                assignment.category,
                assignment.subcategory,
                assignment.confidence.map(|c| c.value()),
                assignment.source.as_str(),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn set_processing_status(&self, id: i64, status: ProcessingStatus) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE transactions SET processing_status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    /// Unmatched transactions across a user's accounts within a date range,
    /// in insertion order
    pub fn list_transfer_candidates(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions t
             JOIN accounts a ON a.id = t.account_id
             JOIN enrollments e ON e.id = a.enrollment_id
             WHERE e.user_id = ? AND t.is_transfer = 0 AND t.date BETWEEN ? AND ?
             ORDER BY t.id",
            TX_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(
                params![user_id, from.to_string(), to.to_string()],
                row_to_transaction,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Link two transactions as a transfer pair, both sides or neither
    ///
    /// Returns false (and changes nothing) when either side is already a
    /// transfer or the IDs are equal.
    pub fn link_transfer_pair(&self, a: i64, b: i64) -> Result<bool> {
        if a == b {
            return Ok(false);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let link = |id: i64, other: i64| {
            tx.execute(
                "UPDATE transactions SET is_transfer = 1, linked_transfer_id = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ? AND is_transfer = 0 AND linked_transfer_id IS NULL",
                params![other, id],
            )
        };

        if link(a, b)? != 1 || link(b, a)? != 1 {
            // Dropping `tx` rolls back
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    /// A user's transactions at one merchant, oldest first
    pub fn list_merchant_transactions(
        &self,
        user_id: &str,
        merchant_name: &str,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions t
             JOIN accounts a ON a.id = t.account_id
             JOIN enrollments e ON e.id = a.enrollment_id
             WHERE e.user_id = ? AND t.merchant_name = ? COLLATE NOCASE
             ORDER BY t.date, t.id",
            TX_COLUMNS
        ))?;

        let transactions = stmt
            .query_map(params![user_id, merchant_name], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Distinct merchant names across a user's transactions, ignoring case
    pub fn list_user_merchants(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT MIN(t.merchant_name) FROM transactions t
             JOIN accounts a ON a.id = t.account_id
             JOIN enrollments e ON e.id = a.enrollment_id
             WHERE e.user_id = ? AND t.merchant_name IS NOT NULL
             GROUP BY t.merchant_name COLLATE NOCASE
             ORDER BY 1 COLLATE NOCASE",
        )?;

        let merchants = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(merchants)
    }

    /// Set the recurring flag on all of a user's transactions at a merchant
    pub fn set_recurring_for_merchant(
        &self,
        user_id: &str,
        merchant_name: &str,
        is_recurring: bool,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE transactions SET is_recurring = ?, updated_at = CURRENT_TIMESTAMP
             WHERE merchant_name = ? COLLATE NOCASE
               AND account_id IN (
                   SELECT a.id FROM accounts a JOIN enrollments e ON e.id = a.enrollment_id
                   WHERE e.user_id = ?)",
            params![is_recurring, merchant_name, user_id],
        )?;
        Ok(updated)
    }

    /// Apply user edits; returns None if the transaction doesn't exist
    ///
    /// Setting a category records it as a USER_OVERRIDE with full confidence.
    /// Clearing it removes category, subcategory and source together.
    pub fn update_transaction_user_fields(
        &self,
        id: i64,
        edit: &TransactionEdit,
    ) -> Result<Option<Transaction>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        match &edit.category {
            Some(Some(category)) => {
                tx.execute(
                    "UPDATE transactions SET category = ?, category_source = ?, category_confidence = 1.0,
                            subcategory = NULL
                     WHERE id = ?",
                    params![category, CategorySource::UserOverride.as_str(), id],
                )?;
            }
            Some(None) => {
                tx.execute(
                    "UPDATE transactions SET category = NULL, subcategory = NULL, category_source = NULL,
                            category_confidence = NULL
                     WHERE id = ?",
                    params![id],
                )?;
            }
            None => {}
        }

        if let Some(subcategory) = &edit.subcategory {
            // A subcategory only exists beneath a category
            tx.execute(
                "UPDATE transactions SET subcategory = ? WHERE id = ? AND category IS NOT NULL",
                params![subcategory, id],
            )?;
        }

        if let Some(note) = &edit.note {
            tx.execute(
                "UPDATE transactions SET note = ? WHERE id = ?",
                params![note, id],
            )?;
        }

        if let Some(is_excluded) = edit.is_excluded {
            tx.execute(
                "UPDATE transactions SET is_excluded = ? WHERE id = ?",
                params![is_excluded, id],
            )?;
        }

        tx.execute(
            "UPDATE transactions SET updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![id],
        )?;

        let updated = tx
            .query_row(
                &format!("SELECT {} FROM transactions t WHERE t.id = ?", TX_COLUMNS),
                params![id],
                row_to_transaction,
            )
            .optional()?;

        tx.commit()?;
        Ok(updated)
    }
}
