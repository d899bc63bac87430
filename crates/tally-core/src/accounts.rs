//! Provider account mapping
//!
//! Turns provider account and balance payloads into typed account records.
//! Pure: no I/O, and identical inputs always produce identical output.

use crate::models::{AccountKind, Money, NewAccount};
use crate::provider::{RawAccount, RawBalance};

/// Map the provider's free-text account type onto an account kind
///
/// Unrecognized types become `Generic`; this never fails.
pub fn map_account_kind(account_type: &str, limit: Option<Money>) -> AccountKind {
    match account_type.trim().to_lowercase().as_str() {
        "depository" | "checking" | "savings" | "bank" => AccountKind::Bank,
        "credit" | "credit_card" | "credit card" => AccountKind::CreditCard { limit },
        "investment" | "brokerage" => AccountKind::Investment,
        "loan" | "mortgage" => AccountKind::Loan,
        _ => AccountKind::Generic,
    }
}

/// Build an account for `enrollment_id` from provider payloads
///
/// Balance fields that the provider omits stay `None` rather than zero.
pub fn create_from_provider(
    raw: &RawAccount,
    balance: Option<&RawBalance>,
    enrollment_id: i64,
) -> NewAccount {
    let currency = raw.currency.to_uppercase();
    let money = |amount: Option<rust_decimal::Decimal>| amount.map(|a| Money::new(a, &currency));

    let limit = money(balance.and_then(|b| b.limit));

    NewAccount {
        enrollment_id,
        provider_account_id: raw.id.clone(),
        name: raw.name.clone(),
        kind: map_account_kind(&raw.account_type, limit),
        subtype: raw.subtype.clone(),
        mask: raw.last_four.clone(),
        current_balance: money(balance.and_then(|b| b.ledger)),
        available_balance: money(balance.and_then(|b| b.available)),
        currency: currency.clone(),
    }
}
