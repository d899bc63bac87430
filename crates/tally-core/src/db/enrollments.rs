//! Enrollment operations

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::accounts::upsert_account_in;
use super::{format_datetime, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Account, Enrollment, EnrollmentStatus, NewAccount};

/// Enrollment values supplied at connect time
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub user_id: String,
    pub provider_enrollment_id: String,
    pub access_token: String,
    pub institution_name: Option<String>,
}

const ENROLLMENT_COLUMNS: &str = "id, user_id, provider_enrollment_id, access_token, \
     institution_name, status, last_synced_at, created_at";

fn row_to_enrollment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Enrollment> {
    let status_str: String = row.get(5)?;
    let last_synced: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(Enrollment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider_enrollment_id: row.get(2)?,
        access_token: row.get(3)?,
        institution_name: row.get(4)?,
        status: status_str.parse().unwrap_or(EnrollmentStatus::Active),
        last_synced_at: last_synced.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Persist an enrollment and its accounts in one transaction
    ///
    /// `build_accounts` receives the local enrollment id. Reconnecting an
    /// existing provider enrollment refreshes its credential and reactivates
    /// it; a provider enrollment owned by another user is a conflict.
    pub fn create_enrollment<F>(
        &self,
        new: &NewEnrollment,
        build_accounts: F,
    ) -> Result<(Enrollment, Vec<Account>)>
    where
        F: FnOnce(i64) -> Vec<NewAccount>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT user_id FROM enrollments WHERE provider_enrollment_id = ?",
                params![new.provider_enrollment_id],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(owner) = owner {
            if owner != new.user_id {
                return Err(Error::Conflict(format!(
                    "Enrollment {} belongs to another user",
                    new.provider_enrollment_id
                )));
            }
        }

        tx.execute(
            r#"
            INSERT INTO enrollments (user_id, provider_enrollment_id, access_token, institution_name, status)
            VALUES (?, ?, ?, ?, 'active')
            ON CONFLICT(provider_enrollment_id) DO UPDATE SET
                access_token = excluded.access_token,
                institution_name = COALESCE(excluded.institution_name, enrollments.institution_name),
                status = 'active',
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                new.user_id,
                new.provider_enrollment_id,
                new.access_token,
                new.institution_name,
            ],
        )?;

        let enrollment = tx.query_row(
            &format!(
                "SELECT {} FROM enrollments WHERE provider_enrollment_id = ?",
                ENROLLMENT_COLUMNS
            ),
            params![new.provider_enrollment_id],
            row_to_enrollment,
        )?;

        let accounts = build_accounts(enrollment.id)
            .iter()
            .map(|account| upsert_account_in(&tx, account))
            .collect::<Result<Vec<_>>>()?;

        tx.commit()?;
        Ok((enrollment, accounts))
    }

    /// Get an enrollment by local ID
    pub fn get_enrollment(&self, id: i64) -> Result<Option<Enrollment>> {
        let conn = self.conn()?;
        let enrollment = conn
            .query_row(
                &format!("SELECT {} FROM enrollments WHERE id = ?", ENROLLMENT_COLUMNS),
                params![id],
                row_to_enrollment,
            )
            .optional()?;
        Ok(enrollment)
    }

    /// Get an enrollment by the provider's enrollment ID (webhook lookups)
    pub fn get_enrollment_by_provider_id(
        &self,
        provider_enrollment_id: &str,
    ) -> Result<Option<Enrollment>> {
        let conn = self.conn()?;
        let enrollment = conn
            .query_row(
                &format!(
                    "SELECT {} FROM enrollments WHERE provider_enrollment_id = ?",
                    ENROLLMENT_COLUMNS
                ),
                params![provider_enrollment_id],
                row_to_enrollment,
            )
            .optional()?;
        Ok(enrollment)
    }

    /// List enrollments, optionally for one user
    pub fn list_enrollments(&self, user_id: Option<&str>) -> Result<Vec<Enrollment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM enrollments WHERE (?1 IS NULL OR user_id = ?1) ORDER BY id",
            ENROLLMENT_COLUMNS
        ))?;

        let enrollments = stmt
            .query_map(params![user_id], row_to_enrollment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(enrollments)
    }

    /// IDs of every enrollment eligible for sync (not disconnected)
    pub fn list_active_enrollment_ids(&self) -> Result<Vec<i64>> {
        self.syncable_enrollment_ids(None)
    }

    /// IDs of one user's enrollments eligible for sync
    pub fn list_active_enrollment_ids_for_user(&self, user_id: &str) -> Result<Vec<i64>> {
        self.syncable_enrollment_ids(Some(user_id))
    }

    fn syncable_enrollment_ids(&self, user_id: Option<&str>) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM enrollments
             WHERE status <> 'disconnected' AND (?1 IS NULL OR user_id = ?1)
             ORDER BY id",
        )?;

        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;

        Ok(ids)
    }

    /// Set enrollment status; returns false when the enrollment doesn't exist
    pub fn set_enrollment_status(&self, id: i64, status: EnrollmentStatus) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE enrollments SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![status.as_str(), id],
        )?;
        Ok(updated > 0)
    }

    /// Record a finished sync and set the resulting status
    ///
    /// The cursor only moves when `synced_from` is given; pass None when some
    /// account's transactions weren't fetched. An enrollment disconnected
    /// while the sync ran stays disconnected. Returns false when nothing was
    /// written.
    pub fn mark_enrollment_synced(
        &self,
        id: i64,
        synced_from: Option<DateTime<Utc>>,
        status: EnrollmentStatus,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE enrollments
             SET last_synced_at = COALESCE(?, last_synced_at),
                 status = ?,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND status <> ?",
            params![
                synced_from.as_ref().map(format_datetime),
                status.as_str(),
                id,
                EnrollmentStatus::Disconnected.as_str()
            ],
        )?;
        Ok(updated > 0)
    }
}
