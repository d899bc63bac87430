//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_account(enrollment_id: i64, provider_id: &str) -> NewAccount {
        NewAccount {
            enrollment_id,
            provider_account_id: provider_id.to_string(),
            name: format!("Account {}", provider_id),
            kind: AccountKind::Bank,
            subtype: Some("checking".to_string()),
            mask: Some("1234".to_string()),
            current_balance: Some(Money::new(dec("100.00"), "USD")),
            available_balance: None,
            currency: "USD".to_string(),
        }
    }

    fn enroll(db: &Database, user: &str, provider_id: &str, accounts: &[&str]) -> (Enrollment, Vec<Account>) {
        let new = NewEnrollment {
            user_id: user.to_string(),
            provider_enrollment_id: provider_id.to_string(),
            access_token: "token_abc".to_string(),
            institution_name: Some("First Bank".to_string()),
        };
        db.create_enrollment(&new, |id| {
            accounts.iter().map(|a| new_account(id, a)).collect()
        })
        .unwrap()
    }

    fn new_tx(account_id: i64, provider_id: &str, amount: &str, on: &str) -> NewTransaction {
        NewTransaction {
            account_id,
            provider_transaction_id: provider_id.to_string(),
            amount: dec(amount),
            currency: "USD".to_string(),
            date: date(on),
            name: "NETFLIX.COM".to_string(),
            merchant_name: Some("Netflix".to_string()),
            provider_category: None,
            provider_status: Some("pending".to_string()),
            running_balance: None,
            is_pending: true,
        }
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_enrollments(None).unwrap().is_empty());
        assert!(db.list_active_enrollment_ids().unwrap().is_empty());
    }

    #[test]
    fn test_create_enrollment_with_accounts() {
        let db = Database::in_memory().unwrap();
        let (enrollment, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1", "acc_2"]);

        assert_eq!(enrollment.status, EnrollmentStatus::Active);
        assert_eq!(enrollment.user_id, "alice@example.com");
        assert!(enrollment.last_synced_at.is_none());
        assert_eq!(accounts.len(), 2);
        assert!(accounts.iter().all(|a| a.enrollment_id == enrollment.id));
        assert_eq!(
            accounts[0].current_balance,
            Some(Money::new(dec("100.00"), "USD"))
        );
        assert_eq!(accounts[0].available_balance, None);
    }

    #[test]
    fn test_reconnect_reuses_rows() {
        let db = Database::in_memory().unwrap();
        let (first, _) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);
        db.set_enrollment_status(first.id, EnrollmentStatus::Disconnected)
            .unwrap();

        let (second, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, EnrollmentStatus::Active);
        assert_eq!(accounts.len(), 1);
        assert_eq!(db.list_accounts_for_enrollment(first.id).unwrap().len(), 1);
    }

    #[test]
    fn test_enrollment_owned_by_other_user_conflicts() {
        let db = Database::in_memory().unwrap();
        enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);

        let new = NewEnrollment {
            user_id: "mallory@example.com".to_string(),
            provider_enrollment_id: "enr_1".to_string(),
            access_token: "stolen".to_string(),
            institution_name: None,
        };
        let result = db.create_enrollment(&new, |_| Vec::new());
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_upsert_accounts_updates_in_place() {
        let db = Database::in_memory().unwrap();
        let (enrollment, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);

        let mut refreshed = new_account(enrollment.id, "acc_1");
        refreshed.current_balance = Some(Money::new(dec("55.10"), "USD"));
        refreshed.kind = AccountKind::CreditCard {
            limit: Some(Money::new(dec("5000"), "USD")),
        };
        let stored = db.upsert_accounts(&[refreshed]).unwrap();

        assert_eq!(stored[0].id, accounts[0].id);
        assert_eq!(stored[0].current_balance.as_ref().unwrap().amount(), dec("55.10"));
        assert_eq!(stored[0].kind.limit().unwrap().amount(), dec("5000"));
        assert_eq!(db.list_accounts_for_user("alice@example.com").unwrap().len(), 1);
    }

    #[test]
    fn test_syncable_enrollments_exclude_disconnected() {
        let db = Database::in_memory().unwrap();
        let (a, _) = enroll(&db, "alice@example.com", "enr_a", &[]);
        let (b, _) = enroll(&db, "alice@example.com", "enr_b", &[]);
        let (c, _) = enroll(&db, "bob@example.com", "enr_c", &[]);

        db.set_enrollment_status(b.id, EnrollmentStatus::Disconnected)
            .unwrap();
        db.set_enrollment_status(c.id, EnrollmentStatus::Degraded)
            .unwrap();

        assert_eq!(db.list_active_enrollment_ids().unwrap(), vec![a.id, c.id]);
        assert_eq!(
            db.list_active_enrollment_ids_for_user("alice@example.com")
                .unwrap(),
            vec![a.id]
        );
        assert!(!db.set_enrollment_status(999, EnrollmentStatus::Active).unwrap());
    }

    #[test]
    fn test_mark_enrollment_synced() {
        let db = Database::in_memory().unwrap();
        let (enrollment, _) = enroll(&db, "alice@example.com", "enr_1", &[]);
        let started = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();

        assert!(db
            .mark_enrollment_synced(enrollment.id, Some(started), EnrollmentStatus::Active)
            .unwrap());

        let stored = db.get_enrollment(enrollment.id).unwrap().unwrap();
        assert_eq!(stored.last_synced_at, Some(started));
        assert_eq!(stored.status, EnrollmentStatus::Active);
        assert!(db.get_enrollment_by_provider_id("enr_1").unwrap().is_some());

        // Without a cursor only the status changes
        assert!(db
            .mark_enrollment_synced(enrollment.id, None, EnrollmentStatus::Degraded)
            .unwrap());
        let stored = db.get_enrollment(enrollment.id).unwrap().unwrap();
        assert_eq!(stored.last_synced_at, Some(started));
        assert_eq!(stored.status, EnrollmentStatus::Degraded);
    }

    #[test]
    fn test_mark_enrollment_synced_keeps_disconnect() {
        let db = Database::in_memory().unwrap();
        let (enrollment, _) = enroll(&db, "alice@example.com", "enr_1", &[]);
        db.set_enrollment_status(enrollment.id, EnrollmentStatus::Disconnected)
            .unwrap();

        let written = db
            .mark_enrollment_synced(enrollment.id, Some(chrono::Utc::now()), EnrollmentStatus::Active)
            .unwrap();
        assert!(!written);

        let stored = db.get_enrollment(enrollment.id).unwrap().unwrap();
        assert_eq!(stored.status, EnrollmentStatus::Disconnected);
        assert!(stored.last_synced_at.is_none());
    }

    #[test]
    fn test_upsert_provider_transaction_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let (_, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);
        let account_id = accounts[0].id;

        let first = db
            .upsert_provider_transaction(&new_tx(account_id, "txn_1", "-15.99", "2024-03-01"))
            .unwrap();
        assert!(matches!(first, IngestOutcome::Inserted(_)));
        assert_eq!(
            first.transaction().processing_status,
            ProcessingStatus::Pending
        );

        let mut posted = new_tx(account_id, "txn_1", "-16.49", "2024-03-02");
        posted.is_pending = false;
        posted.provider_status = Some("posted".to_string());
        let second = db.upsert_provider_transaction(&posted).unwrap();

        let IngestOutcome::Updated(tx) = second else {
            panic!("expected update");
        };
        assert_eq!(tx.id, first.transaction().id);
        assert_eq!(tx.amount, dec("-16.49"));
        assert!(!tx.is_pending);
        assert_eq!(tx.provider_status.as_deref(), Some("posted"));

        let conn = db.conn().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_provider_update_keeps_user_edits() {
        let db = Database::in_memory().unwrap();
        let (_, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);
        let account_id = accounts[0].id;

        let mut new = new_tx(account_id, "txn_1", "-15.99", "2024-03-01");
        new.provider_category = Some("entertainment".to_string());
        let tx = db.upsert_provider_transaction(&new).unwrap();
        let id = tx.transaction().id;

        let edit = TransactionEdit {
            category: Some(Some("Streaming".to_string())),
            note: Some(Some("family plan".to_string())),
            is_excluded: Some(true),
            ..Default::default()
        };
        db.update_transaction_user_fields(id, &edit).unwrap();

        new.is_pending = false;
        new.provider_category = Some("general".to_string());
        let updated = db.upsert_provider_transaction(&new).unwrap();
        let tx = updated.transaction();

        let category = tx.category.as_ref().unwrap();
        assert_eq!(category.category, "Streaming");
        assert_eq!(category.source, CategorySource::UserOverride);
        assert_eq!(tx.note.as_deref(), Some("family plan"));
        assert!(tx.is_excluded);
        assert!(!tx.is_pending);
    }

    #[test]
    fn test_clearing_category_clears_source() {
        let db = Database::in_memory().unwrap();
        let (_, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);
        let tx = db
            .upsert_provider_transaction(&new_tx(accounts[0].id, "txn_1", "-5", "2024-03-01"))
            .unwrap();
        let id = tx.transaction().id;

        let set = TransactionEdit {
            category: Some(Some("Coffee".to_string())),
            subcategory: Some(Some("Cafes".to_string())),
            ..Default::default()
        };
        let stored = db.update_transaction_user_fields(id, &set).unwrap().unwrap();
        assert_eq!(
            stored.category.as_ref().unwrap().subcategory.as_deref(),
            Some("Cafes")
        );

        let clear = TransactionEdit {
            category: Some(None),
            ..Default::default()
        };
        let stored = db.update_transaction_user_fields(id, &clear).unwrap().unwrap();
        assert!(stored.category.is_none());

        let conn = db.conn().unwrap();
        let source: Option<String> = conn
            .query_row(
                "SELECT category_source FROM transactions WHERE id = ?",
                [id],
                |row| row.get(0),
            )
            .unwrap();
        assert!(source.is_none());

        assert!(db
            .update_transaction_user_fields(999, &TransactionEdit::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_category_source_constraint_enforced() {
        let db = Database::in_memory().unwrap();
        let (_, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);
        let tx = db
            .upsert_provider_transaction(&new_tx(accounts[0].id, "txn_1", "-5", "2024-03-01"))
            .unwrap();

        let conn = db.conn().unwrap();
        let result = conn.execute(
            "UPDATE transactions SET category = 'x' WHERE id = ?",
            [tx.transaction().id],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_link_transfer_pair_symmetric_and_exclusive() {
        let db = Database::in_memory().unwrap();
        let (_, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_a", "acc_b"]);

        let out = db
            .upsert_provider_transaction(&new_tx(accounts[0].id, "t1", "-45.00", "2024-03-01"))
            .unwrap();
        let inn = db
            .upsert_provider_transaction(&new_tx(accounts[1].id, "t2", "45.00", "2024-03-02"))
            .unwrap();
        let third = db
            .upsert_provider_transaction(&new_tx(accounts[1].id, "t3", "45.00", "2024-03-02"))
            .unwrap();
        let (a, b, c) = (
            out.transaction().id,
            inn.transaction().id,
            third.transaction().id,
        );

        assert!(db.link_transfer_pair(a, b).unwrap());
        let ta = db.get_transaction(a).unwrap().unwrap();
        let tb = db.get_transaction(b).unwrap().unwrap();
        assert!(ta.is_transfer && tb.is_transfer);
        assert_eq!(ta.linked_transfer_id, Some(b));
        assert_eq!(tb.linked_transfer_id, Some(a));

        // Already matched; the second link must not half-apply
        assert!(!db.link_transfer_pair(c, a).unwrap());
        let tc = db.get_transaction(c).unwrap().unwrap();
        assert!(!tc.is_transfer);
        assert!(tc.linked_transfer_id.is_none());

        assert!(!db.link_transfer_pair(c, c).unwrap());

        let candidates = db
            .list_transfer_candidates("alice@example.com", date("2024-02-28"), date("2024-03-05"))
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, c);
    }

    #[test]
    fn test_recurring_flags_scoped_to_user() {
        let db = Database::in_memory().unwrap();
        let (_, alice) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);
        let (_, bob) = enroll(&db, "bob@example.com", "enr_2", &["acc_2"]);

        db.upsert_provider_transaction(&new_tx(alice[0].id, "t1", "-15.99", "2024-01-01"))
            .unwrap();
        db.upsert_provider_transaction(&new_tx(bob[0].id, "t2", "-15.99", "2024-01-01"))
            .unwrap();

        let updated = db
            .set_recurring_for_merchant("alice@example.com", "NETFLIX", true)
            .unwrap();
        assert_eq!(updated, 1);

        let bob_tx = db.find_transaction(bob[0].id, "t2").unwrap().unwrap();
        assert!(!bob_tx.is_recurring);
        assert_eq!(
            db.list_user_merchants("alice@example.com").unwrap(),
            vec!["Netflix".to_string()]
        );
    }

    #[test]
    fn test_user_merchants_ignore_case() {
        let db = Database::in_memory().unwrap();
        let (_, accounts) = enroll(&db, "alice@example.com", "enr_1", &["acc_1"]);

        let mut shouting = new_tx(accounts[0].id, "t1", "-15.99", "2024-01-01");
        shouting.merchant_name = Some("NETFLIX".to_string());
        db.upsert_provider_transaction(&shouting).unwrap();
        db.upsert_provider_transaction(&new_tx(accounts[0].id, "t2", "-15.99", "2024-02-01"))
            .unwrap();
        let mut other = new_tx(accounts[0].id, "t3", "-9.99", "2024-02-03");
        other.merchant_name = Some("hulu".to_string());
        db.upsert_provider_transaction(&other).unwrap();

        let merchants = db.list_user_merchants("alice@example.com").unwrap();
        assert_eq!(merchants.len(), 2);
        assert_eq!(merchants[0], "hulu");
        assert!(merchants[1].eq_ignore_ascii_case("netflix"));
    }

    #[test]
    fn test_subscription_overrides() {
        let db = Database::in_memory().unwrap();
        db.upsert_subscription_override("alice@example.com", "Netflix", OverrideKind::Exclude)
            .unwrap();
        db.upsert_subscription_override("alice@example.com", "netflix", OverrideKind::Include)
            .unwrap();

        let overrides = db.list_subscription_overrides("alice@example.com").unwrap();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].kind, OverrideKind::Include);
        assert_eq!(
            db.get_subscription_override("alice@example.com", "NETFLIX")
                .unwrap(),
            Some(OverrideKind::Include)
        );
        assert!(db
            .get_subscription_override("bob@example.com", "Netflix")
            .unwrap()
            .is_none());

        assert!(db
            .delete_subscription_override("alice@example.com", "Netflix")
            .unwrap());
        assert!(!db
            .delete_subscription_override("alice@example.com", "Netflix")
            .unwrap());
    }

    #[test]
    fn test_category_rules_ordering_and_validation() {
        let db = Database::in_memory().unwrap();
        db.add_category_rule("COFFEE", PatternType::Contains, "Food", None, ConfidenceScore::new(0.9), 0)
            .unwrap();
        db.add_category_rule("^SHELL", PatternType::Regex, "Transport", Some("Fuel"), ConfidenceScore::new(0.95), 10)
            .unwrap();

        let rules = db.list_category_rules().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].category, "Transport");
        assert_eq!(rules[0].pattern_type, PatternType::Regex);

        assert!(matches!(
            db.add_category_rule("([", PatternType::Regex, "X", None, ConfidenceScore::new(1.0), 0),
            Err(Error::Regex(_))
        ));
        assert!(matches!(
            db.add_category_rule(" ", PatternType::Contains, "X", None, ConfidenceScore::new(1.0), 0),
            Err(Error::Validation { .. })
        ));

        assert!(db.delete_category_rule(rules[1].id).unwrap());
        assert_eq!(db.list_category_rules().unwrap().len(), 1);
    }

    #[test]
    fn test_encrypted_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new_with_key(path, Some("test-passphrase")).unwrap();
            enroll(&db, "alice", "enr_1", &["acc_1"]);
            assert_eq!(db.list_enrollments(None).unwrap().len(), 1);
        }

        // Reopen with the same key
        {
            let db = Database::new_with_key(path, Some("test-passphrase")).unwrap();
            assert_eq!(db.list_enrollments(None).unwrap().len(), 1);
        }

        assert!(
            Database::new_with_key(path, None).is_err(),
            "Should fail to open encrypted db without key"
        );
        assert!(
            Database::new_with_key(path, Some("wrong-passphrase")).is_err(),
            "Should fail to open encrypted db with wrong key"
        );
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let key1 = derive_key("my-secret").unwrap();
        let key2 = derive_key("my-secret").unwrap();
        assert_eq!(key1, key2);
        assert_ne!(key1, derive_key("other-secret").unwrap());
    }
}
