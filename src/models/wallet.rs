use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::party::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub role: Role,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    MobileWallet,
}

/// Format-checked payment metadata. Only the card suffix is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMeta {
    pub method: PaymentMethod,
    pub reference: String,
    pub masked_card: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalDecision {
    Approved,
    Rejected,
}

/// Ledger entry. `amount` is always a positive magnitude.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub wallet_id: i64,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub order_id: Option<i64>,
    pub payment: Option<PaymentMeta>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
