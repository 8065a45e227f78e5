use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::rest::ApiResponse;
use crate::engine::parties::get_party;
use crate::engine::wallets::{
    get_wallet, list_transactions, request_withdrawal, review_withdrawal, top_up, wallet_for,
    PaymentDetails,
};
use crate::error::AppError;
use crate::models::wallet::{Transaction, Wallet, WithdrawalDecision};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/parties/:id/wallet", get(wallet_of_party))
        .route("/wallets/:id", get(fetch))
        .route("/wallets/:id/transactions", get(transactions))
        .route("/wallets/:id/top-up", post(fund))
        .route("/wallets/:id/withdrawals", post(withdraw))
        .route("/withdrawals/:id/review", post(review))
}

#[derive(Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
    pub payment: PaymentDetails,
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
    pub payment: Option<PaymentDetails>,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub decision: WithdrawalDecision,
}

#[derive(Serialize)]
pub struct TopUpResult {
    pub wallet: Wallet,
    pub transaction: Transaction,
}

async fn wallet_of_party(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Wallet>>, AppError> {
    let role = get_party(&state, id)?.role();
    let wallet = wallet_for(&state, id, role)?;
    Ok(ApiResponse::ok("wallet found", wallet))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Wallet>>, AppError> {
    let wallet = get_wallet(&state, id)?;
    Ok(ApiResponse::ok("wallet found", wallet))
}

async fn transactions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<Transaction>>>, AppError> {
    let list = list_transactions(&state, id)?;
    Ok(ApiResponse::ok(format!("{} transactions", list.len()), list))
}

async fn fund(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<TopUpRequest>,
) -> Result<Json<ApiResponse<TopUpResult>>, AppError> {
    let (wallet, transaction) = top_up(&state, id, payload.amount, &payload.payment)?;
    Ok(ApiResponse::ok(
        "wallet topped up",
        TopUpResult {
            wallet,
            transaction,
        },
    ))
}

async fn withdraw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<WithdrawRequest>,
) -> Result<Json<ApiResponse<Transaction>>, AppError> {
    let transaction = request_withdrawal(&state, id, payload.amount, payload.payment.as_ref())?;
    Ok(ApiResponse::ok("withdrawal pending review", transaction))
}

async fn review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<ApiResponse<Transaction>>, AppError> {
    let transaction = review_withdrawal(&state, id, payload.decision)?;
    let message = match payload.decision {
        WithdrawalDecision::Approved => "withdrawal approved",
        WithdrawalDecision::Rejected => "withdrawal rejected",
    };
    Ok(ApiResponse::ok(message, transaction))
}
