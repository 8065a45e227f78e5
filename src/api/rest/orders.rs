use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::rest::ApiResponse;
use crate::engine::negotiation::{propose_price, respond_to_proposal};
use crate::engine::orders::{
    self, accept_order, cancel_order, create_promo_code, nearby_orders, negotiation_log,
    rate_order, update_destination_progress, update_status, CreateOrder, NearbyOrder, StatusUpdate,
};
use crate::engine::parties::validate_point;
use crate::engine::pricing::{price_options, PriceEstimate};
use crate::error::AppError;
use crate::models::negotiation::{NegotiationLog, ProposalResponse};
use crate::models::order::{
    DestinationProgress, Order, OrderStatus, ProofAttachment, Rating, ServiceTier, Stop,
};
use crate::models::party::GeoPoint;
use crate::models::promo::{DiscountType, PromoCode};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/accept", post(accept))
        .route("/orders/:id/status", patch(change_status))
        .route("/orders/:id/cancel", post(cancel))
        .route("/orders/:id/progress", post(advance_destination))
        .route("/orders/:id/rating", post(rate))
        .route("/orders/:id/proposals", post(propose))
        .route("/orders/:id/proposals/respond", post(respond))
        .route("/orders/:id/negotiation", get(list_negotiation))
        .route("/dispatch/nearby-orders", get(list_nearby_orders))
        .route("/pricing/estimate", get(estimate))
        .route("/promo-codes", post(create_promo))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: i64,
    pub pickup: GeoPoint,
    pub pickup_address: Option<String>,
    pub dropoff: GeoPoint,
    pub dropoff_address: Option<String>,
    #[serde(default)]
    pub stops: Vec<Stop>,
    pub details: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub tier: ServiceTier,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub promo_code: Option<String>,
}

/// The creating customer is the only caller ever shown the verification code.
#[derive(Serialize)]
pub struct CreatedOrder {
    #[serde(flatten)]
    pub order: Order,
    pub verification_code: String,
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub courier_id: i64,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
    pub verification_code: Option<String>,
    pub proof: Option<ProofAttachment>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor_id: i64,
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub customer_id: i64,
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct ProposeRequest {
    pub courier_id: i64,
    pub price: Decimal,
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub courier_id: i64,
    pub response: ProposalResponse,
}

#[derive(Deserialize)]
pub struct CreatePromoRequest {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    #[serde(default)]
    pub min_order_value: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_limit: u32,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct EstimateQuery {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
}

async fn create(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<CreatedOrder>>, AppError> {
    let order = orders::create_order(
        &state,
        CreateOrder {
            customer_id: payload.customer_id,
            pickup: Stop {
                location: payload.pickup,
                address: payload.pickup_address,
            },
            dropoff: Stop {
                location: payload.dropoff,
                address: payload.dropoff_address,
            },
            stops: payload.stops,
            details: payload.details,
            price: payload.price,
            tier: payload.tier,
            scheduled_at: payload.scheduled_at,
            promo_code: payload.promo_code,
        },
    )?;

    Ok(ApiResponse::ok(
        format!("order {} created", order.order_code),
        CreatedOrder {
            verification_code: order.verification_code.clone(),
            order,
        },
    ))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = orders::get_order(&state, id)?;
    Ok(ApiResponse::ok("order found", order))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<AcceptRequest>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = accept_order(&state, id, payload.courier_id)?;
    Ok(ApiResponse::ok("order accepted", order))
}

async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = update_status(
        &state,
        id,
        StatusUpdate {
            status: payload.status,
            verification_code: payload.verification_code,
            proof: payload.proof,
        },
    )?;

    Ok(ApiResponse::ok(format!("order is now {}", order.status), order))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = cancel_order(&state, id, payload.actor_id)?;
    Ok(ApiResponse::ok("order cancelled", order))
}

async fn advance_destination(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<DestinationProgress>>, AppError> {
    let progress = update_destination_progress(&state, id)?;
    let message = match &progress {
        DestinationProgress::Advanced { index, .. } => format!("moved to stop {index}"),
        DestinationProgress::Finished { .. } => "all stops reached".to_string(),
    };
    Ok(ApiResponse::ok(message, progress))
}

async fn rate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<RateRequest>,
) -> Result<Json<ApiResponse<Rating>>, AppError> {
    let rating = rate_order(
        &state,
        id,
        payload.customer_id,
        payload.rating,
        payload.comment,
    )?;
    Ok(ApiResponse::ok("thanks for rating", rating))
}

async fn propose(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<ProposeRequest>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = propose_price(&state, id, payload.courier_id, payload.price)?;
    Ok(ApiResponse::ok("price proposed", order))
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    let order = respond_to_proposal(&state, id, payload.courier_id, payload.response)?;
    let message = match payload.response {
        ProposalResponse::Accept => "proposal accepted",
        ProposalResponse::Reject => "proposal rejected",
    };
    Ok(ApiResponse::ok(message, order))
}

async fn list_negotiation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<NegotiationLog>>>, AppError> {
    let log = negotiation_log(&state, id)?;
    Ok(ApiResponse::ok(format!("{} negotiation steps", log.len()), log))
}

async fn list_nearby_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<ApiResponse<Vec<NearbyOrder>>>, AppError> {
    let point = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    validate_point(&point)?;

    let radius_km = query.radius_km.unwrap_or(state.config.dispatch_radius_km);
    let found = nearby_orders(&state, &point, radius_km);
    Ok(ApiResponse::ok(format!("{} waiting orders nearby", found.len()), found))
}

async fn estimate(
    Query(query): Query<EstimateQuery>,
) -> Result<Json<ApiResponse<PriceEstimate>>, AppError> {
    let pickup = GeoPoint {
        lat: query.pickup_lat,
        lng: query.pickup_lng,
    };
    let dropoff = GeoPoint {
        lat: query.dropoff_lat,
        lng: query.dropoff_lng,
    };
    validate_point(&pickup)?;
    validate_point(&dropoff)?;

    Ok(ApiResponse::ok("price estimate", price_options(&pickup, &dropoff)))
}

async fn create_promo(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePromoRequest>,
) -> Result<Json<ApiResponse<PromoCode>>, AppError> {
    let promo = create_promo_code(
        &state,
        PromoCode {
            code: payload.code,
            discount_type: payload.discount_type,
            discount_value: payload.discount_value,
            max_discount: payload.max_discount,
            min_order_value: payload.min_order_value,
            expires_at: payload.expires_at,
            usage_limit: payload.usage_limit,
            used_count: 0,
            active: true,
        },
    )?;
    Ok(ApiResponse::ok(format!("promo code {} created", promo.code), promo))
}
