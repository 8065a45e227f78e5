use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::party::Role;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationAction {
    Proposal,
    Acceptance,
    Rejection,
    Counter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalResponse {
    Accept,
    Reject,
}

/// One protocol step. Rows are appended, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationLog {
    pub id: i64,
    pub order_id: i64,
    pub sender_role: Role,
    pub courier_id: i64,
    pub action: NegotiationAction,
    pub price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}
