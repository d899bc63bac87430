//! Account operations

use rusqlite::{params, Connection, OptionalExtension};

use super::{optional_decimal_column, Database};
use crate::error::Result;
use crate::models::{Account, AccountKind, Money, NewAccount};

const ACCOUNT_COLUMNS: &str = "a.id, a.enrollment_id, a.provider_account_id, a.name, a.kind, \
     a.subtype, a.mask, a.currency, a.current_balance, a.available_balance, a.credit_limit, a.is_hidden";

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let kind_str: String = row.get(4)?;
    let currency: String = row.get(7)?;
    let money = |amount: Option<rust_decimal::Decimal>| amount.map(|a| Money::new(a, &currency));

    let current = optional_decimal_column(row, 8)?;
    let available = optional_decimal_column(row, 9)?;
    let limit = optional_decimal_column(row, 10)?;

    let kind = match kind_str.as_str() {
        "bank" => AccountKind::Bank,
        "credit_card" => AccountKind::CreditCard {
            limit: money(limit),
        },
        "investment" => AccountKind::Investment,
        "loan" => AccountKind::Loan,
        _ => AccountKind::Generic,
    };

    Ok(Account {
        id: row.get(0)?,
        enrollment_id: row.get(1)?,
        provider_account_id: row.get(2)?,
        name: row.get(3)?,
        kind,
        subtype: row.get(5)?,
        mask: row.get(6)?,
        current_balance: money(current),
        available_balance: money(available),
        currency: currency.clone(),
        is_hidden: row.get(11)?,
    })
}

/// Insert or refresh one account inside an open connection or transaction
///
/// Keyed on (enrollment_id, provider_account_id); `is_hidden` is user-owned and kept.
/// A missing balance keeps the last stored value.
pub(super) fn upsert_account_in(conn: &Connection, account: &NewAccount) -> Result<Account> {
    let amount = |m: Option<&Money>| m.map(|m| m.amount().to_string());

    conn.execute(
        r#"
        INSERT INTO accounts (enrollment_id, provider_account_id, name, kind, subtype, mask, currency,
                              current_balance, available_balance, credit_limit)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(enrollment_id, provider_account_id) DO UPDATE SET
            name = excluded.name,
            kind = excluded.kind,
            subtype = excluded.subtype,
            mask = excluded.mask,
            currency = excluded.currency,
            current_balance = COALESCE(excluded.current_balance, accounts.current_balance),
            available_balance = COALESCE(excluded.available_balance, accounts.available_balance),
            credit_limit = COALESCE(excluded.credit_limit, accounts.credit_limit),
            updated_at = CURRENT_TIMESTAMP
        "#,
        params![
            account.enrollment_id,
            account.provider_account_id,
            account.name,
            account.kind.as_str(),
            account.subtype,
            account.mask,
            account.currency,
            amount(account.current_balance.as_ref()),
            amount(account.available_balance.as_ref()),
            amount(account.kind.limit()),
        ],
    )?;

    let stored = conn.query_row(
        &format!(
            "SELECT {} FROM accounts a WHERE a.enrollment_id = ? AND a.provider_account_id = ?",
            ACCOUNT_COLUMNS
        ),
        params![account.enrollment_id, account.provider_account_id],
        row_to_account,
    )?;

    Ok(stored)
}

impl Database {
    /// Insert or refresh a set of accounts atomically
    pub fn upsert_accounts(&self, accounts: &[NewAccount]) -> Result<Vec<Account>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let stored = accounts
            .iter()
            .map(|account| upsert_account_in(&tx, account))
            .collect::<Result<Vec<_>>>()?;

        tx.commit()?;
        Ok(stored)
    }

    /// Get an account by ID
    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts a WHERE a.id = ?", ACCOUNT_COLUMNS),
                params![id],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// List the accounts owned by one enrollment
    pub fn list_accounts_for_enrollment(&self, enrollment_id: i64) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts a WHERE a.enrollment_id = ? ORDER BY a.id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![enrollment_id], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// List every account across a user's enrollments
    pub fn list_accounts_for_user(&self, user_id: &str) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts a
             JOIN enrollments e ON e.id = a.enrollment_id
             WHERE e.user_id = ?
             ORDER BY a.id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![user_id], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Owning user of an account, via its enrollment
    pub fn get_account_owner(&self, account_id: i64) -> Result<Option<String>> {
        let conn = self.conn()?;
        let owner = conn
            .query_row(
                "SELECT e.user_id FROM accounts a JOIN enrollments e ON e.id = a.enrollment_id WHERE a.id = ?",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }
}
