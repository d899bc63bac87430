//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `enrollments` - Enrollment lifecycle (connect, status, sync cursor)
//! - `accounts` - Provider account upserts and balances
//! - `transactions` - Idempotent transaction storage, transfer links, user edits
//! - `rules` - User-defined categorization rules
//! - `subscriptions` - Recurring flags and per-user subscription overrides

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod enrollments;
mod rules;
mod subscriptions;
mod transactions;

pub use enrollments::NewEnrollment;
pub use transactions::IngestOutcome;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// Default database location: `<local data dir>/tally/tally.db`, or
/// `tally.db` in the working directory when the platform has none
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tally").join("tally.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("tally.db"))
}

/// Per-connection settings; concurrent sync tasks wait on the write lock
/// instead of failing with SQLITE_BUSY
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-fx";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Format a timestamp the way SQLite's CURRENT_TIMESTAMP does
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Read a decimal stored as TEXT
pub(crate) fn decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let s: String = row.get(idx)?;
    s.parse::<Decimal>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn optional_decimal_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<Decimal>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        s.parse::<Decimal>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `TALLY_DB_KEY` environment variable to be set. The database
    /// stores provider access tokens, so an unencrypted database must be
    /// requested explicitly with `new_unencrypted()`.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: development and testing only.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Key must be set on every new connection
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                conn.execute_batch(CONNECTION_PRAGMAS)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager = manager.with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block writers (webhook worker + scheduler + API)
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Enrollments (a user's link to one institution through the provider)
            CREATE TABLE IF NOT EXISTS enrollments (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider_enrollment_id TEXT NOT NULL UNIQUE,
                access_token TEXT NOT NULL,
                institution_name TEXT,
                status TEXT NOT NULL DEFAULT 'active',     -- active, degraded, disconnected
                last_synced_at DATETIME,                   -- start time of last successful sync
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_enrollments_user ON enrollments(user_id);
            CREATE INDEX IF NOT EXISTS idx_enrollments_status ON enrollments(status);

            -- Accounts (never re-parented to another enrollment)
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                enrollment_id INTEGER NOT NULL REFERENCES enrollments(id),
                provider_account_id TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,                        -- bank, credit_card, investment, loan, generic
                subtype TEXT,
                mask TEXT,
                currency TEXT NOT NULL,
                current_balance TEXT,                      -- decimal text, NULL when not reported
                available_balance TEXT,
                credit_limit TEXT,                         -- credit_card only
                is_hidden BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(enrollment_id, provider_account_id)
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_enrollment ON accounts(enrollment_id);

            -- Transactions; (account_id, provider_transaction_id) is the idempotency key
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                provider_transaction_id TEXT NOT NULL,
                amount TEXT NOT NULL,                      -- signed decimal text, negative = outflow
                currency TEXT NOT NULL,
                date DATE NOT NULL,
                name TEXT NOT NULL,
                merchant_name TEXT,
                category TEXT,
                subcategory TEXT,
                category_confidence REAL,
                category_source TEXT,                      -- provider, ai, rule, user_override
                provider_status TEXT,
                running_balance TEXT,
                is_transfer BOOLEAN NOT NULL DEFAULT 0,
                linked_transfer_id INTEGER REFERENCES transactions(id),
                is_pending BOOLEAN NOT NULL DEFAULT 0,
                is_recurring BOOLEAN NOT NULL DEFAULT 0,
                is_excluded BOOLEAN NOT NULL DEFAULT 0,
                note TEXT,
                processing_status TEXT NOT NULL DEFAULT 'pending',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(account_id, provider_transaction_id),
                CHECK ((category IS NULL) = (category_source IS NULL)),
                CHECK (linked_transfer_id IS NULL OR linked_transfer_id <> id)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_merchant ON transactions(merchant_name);
            CREATE INDEX IF NOT EXISTS idx_transactions_linked ON transactions(linked_transfer_id);

            -- Category rules (user-defined, highest priority first)
            CREATE TABLE IF NOT EXISTS category_rules (
                id INTEGER PRIMARY KEY,
                pattern TEXT NOT NULL,
                pattern_type TEXT NOT NULL DEFAULT 'contains',
                category TEXT NOT NULL,
                subcategory TEXT,
                confidence REAL NOT NULL DEFAULT 0.95,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_category_rules_priority ON category_rules(priority DESC);

            -- Subscription overrides (user decision beats the heuristic)
            CREATE TABLE IF NOT EXISTS subscription_overrides (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                merchant_name TEXT NOT NULL COLLATE NOCASE,
                kind TEXT NOT NULL,                        -- include, exclude
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, merchant_name)
            );
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
