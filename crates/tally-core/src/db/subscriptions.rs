//! Subscription override operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{OverrideKind, SubscriptionOverride};

impl Database {
    /// Insert or replace a user's override for a merchant
    pub fn upsert_subscription_override(
        &self,
        user_id: &str,
        merchant_name: &str,
        kind: OverrideKind,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subscription_overrides (user_id, merchant_name, kind) VALUES (?, ?, ?)
             ON CONFLICT(user_id, merchant_name) DO UPDATE SET kind = excluded.kind",
            params![user_id, merchant_name, kind.as_str()],
        )?;
        Ok(())
    }

    /// Remove an override; returns false if none existed
    pub fn delete_subscription_override(&self, user_id: &str, merchant_name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM subscription_overrides WHERE user_id = ? AND merchant_name = ?",
            params![user_id, merchant_name],
        )?;
        Ok(deleted > 0)
    }

    pub fn get_subscription_override(
        &self,
        user_id: &str,
        merchant_name: &str,
    ) -> Result<Option<OverrideKind>> {
        let conn = self.conn()?;
        let kind: Option<String> = conn
            .query_row(
                "SELECT kind FROM subscription_overrides WHERE user_id = ? AND merchant_name = ?",
                params![user_id, merchant_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(kind.and_then(|k| k.parse().ok()))
    }

    pub fn list_subscription_overrides(&self, user_id: &str) -> Result<Vec<SubscriptionOverride>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, merchant_name, kind, created_at FROM subscription_overrides
             WHERE user_id = ? ORDER BY merchant_name",
        )?;

        let overrides = stmt
            .query_map(params![user_id], |row| {
                let kind: String = row.get(2)?;
                let created_at: String = row.get(3)?;
                Ok(SubscriptionOverride {
                    user_id: row.get(0)?,
                    merchant_name: row.get(1)?,
                    kind: kind.parse().unwrap_or(OverrideKind::Exclude),
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(overrides)
    }
}
