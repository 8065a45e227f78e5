use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::dispatch::{announce_wallet, notify_best_effort};
use crate::engine::parties::ensure_role;
use crate::engine::pricing::round_money;
use crate::error::AppError;
use crate::integrations::notifier::Notification;
use crate::models::party::Role;
use crate::models::wallet::{
    PaymentMeta, PaymentMethod, Transaction, TransactionStatus, Wallet, WithdrawalDecision,
};
use crate::state::AppState;

/// Raw payment details as submitted. Only [`PaymentMeta`] is ever stored.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetails {
    pub method: PaymentMethod,
    pub card_number: Option<String>,
    pub reference: Option<String>,
}

/// Format-level checks only; no funds are captured here.
pub fn validate_payment(details: &PaymentDetails) -> Result<PaymentMeta, AppError> {
    let masked_card = match details.method {
        PaymentMethod::Card => {
            let digits: String = details
                .card_number
                .as_deref()
                .unwrap_or_default()
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect();
            if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(AppError::Validation(
                    "card number must be 12 to 19 digits".to_string(),
                ));
            }
            Some(format!("**** {}", &digits[digits.len() - 4..]))
        }
        PaymentMethod::BankTransfer | PaymentMethod::MobileWallet => None,
    };

    let reference = match details.reference.as_deref().map(str::trim) {
        Some(reference) if !reference.is_empty() => reference.to_string(),
        _ => format!("PAY-{}", Uuid::new_v4().simple()),
    };

    Ok(PaymentMeta {
        method: details.method,
        reference,
        masked_card,
    })
}

pub fn wallet_for(state: &AppState, user_id: i64, role: Role) -> Result<Wallet, AppError> {
    ensure_role(state, user_id, role)?;
    Ok(state.ledger.get_or_create_wallet(user_id, role))
}

pub fn get_wallet(state: &AppState, wallet_id: i64) -> Result<Wallet, AppError> {
    state.ledger.wallet(wallet_id)
}

pub fn list_transactions(state: &AppState, wallet_id: i64) -> Result<Vec<Transaction>, AppError> {
    state.ledger.transactions(wallet_id)
}

/// Funds a customer wallet.
pub fn top_up(
    state: &AppState,
    wallet_id: i64,
    amount: Decimal,
    payment: &PaymentDetails,
) -> Result<(Wallet, Transaction), AppError> {
    let wallet = state.ledger.wallet(wallet_id)?;
    if wallet.role != Role::Customer {
        return Err(AppError::Validation(format!(
            "wallet {wallet_id} belongs to a {} and cannot be topped up",
            wallet.role
        )));
    }

    let meta = validate_payment(payment)?;
    let amount = round_money(amount);
    let (wallet, transaction) = state.ledger.credit(
        wallet_id,
        amount,
        format!("Wallet top-up ({})", meta.reference),
        None,
        Some(meta),
    )?;

    info!(wallet_id, amount = %amount, "wallet topped up");
    announce_wallet(state, &wallet);
    Ok((wallet, transaction))
}

pub fn request_withdrawal(
    state: &AppState,
    wallet_id: i64,
    amount: Decimal,
    payment: Option<&PaymentDetails>,
) -> Result<Transaction, AppError> {
    let meta = payment.map(validate_payment).transpose()?;
    let amount = round_money(amount);
    let transaction = state
        .ledger
        .request_withdrawal(wallet_id, amount, None, meta)?;

    info!(
        wallet_id,
        transaction_id = transaction.id,
        amount = %amount,
        "withdrawal requested"
    );
    Ok(transaction)
}

/// Approves or rejects a pending withdrawal and tells the wallet owner.
pub fn review_withdrawal(
    state: &AppState,
    transaction_id: i64,
    decision: WithdrawalDecision,
) -> Result<Transaction, AppError> {
    let (wallet, transaction) = state.ledger.review_withdrawal(transaction_id, decision)?;

    info!(
        transaction_id,
        wallet_id = wallet.id,
        decision = ?decision,
        "withdrawal reviewed"
    );

    if transaction.status == TransactionStatus::Completed {
        announce_wallet(state, &wallet);
    }

    let (title, body) = match decision {
        WithdrawalDecision::Approved => (
            "Withdrawal approved",
            format!("Your withdrawal of {} has been approved", transaction.amount),
        ),
        WithdrawalDecision::Rejected => (
            "Withdrawal rejected",
            format!("Your withdrawal of {} was rejected", transaction.amount),
        ),
    };
    notify_best_effort(
        state,
        Notification {
            user_id: wallet.user_id,
            role: wallet.role,
            title: title.to_string(),
            body,
            data: json!({
                "type": "withdrawal",
                "transaction_id": transaction.id,
                "status": transaction.status,
            }),
        },
    );

    Ok(transaction)
}
