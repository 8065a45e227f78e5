use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::api::rest::ApiResponse;
use crate::engine::orders::{active_orders, order_history};
use crate::engine::parties::{
    get_party, nearby_available_couriers, register_party, update_courier_availability,
    update_courier_location, validate_point, Registration,
};
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::party::{GeoPoint, NearbyCourier, Party, Role};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/parties", post(register))
        .route("/parties/:id", get(fetch))
        .route("/parties/:id/orders/active", get(list_active))
        .route("/parties/:id/orders/history", get(list_history))
        .route("/couriers/:id/location", patch(change_location))
        .route("/couriers/:id/availability", patch(change_availability))
        .route("/dispatch/nearby-couriers", get(list_nearby_couriers))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub referral_code: Option<String>,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub available: bool,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<Party>>, AppError> {
    let party = register_party(
        &state,
        Registration {
            name: payload.name,
            phone: payload.phone,
            role: payload.role,
            referred_by: payload.referral_code,
            location: payload.location,
        },
    )?;

    Ok(ApiResponse::ok(format!("{} registered", party.role()), party))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Party>>, AppError> {
    let party = get_party(&state, id)?;
    Ok(ApiResponse::ok("party found", party))
}

async fn list_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<Order>>>, AppError> {
    let role = get_party(&state, id)?.role();
    let orders = active_orders(&state, id, role);
    Ok(ApiResponse::ok(format!("{} active orders", orders.len()), orders))
}

async fn list_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<Order>>>, AppError> {
    let role = get_party(&state, id)?.role();
    let orders = order_history(&state, id, role);
    Ok(ApiResponse::ok(format!("{} past orders", orders.len()), orders))
}

async fn change_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<ApiResponse<Party>>, AppError> {
    let party = update_courier_location(&state, id, payload.location)?;
    Ok(ApiResponse::ok("location updated", party))
}

async fn change_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<ApiResponse<Party>>, AppError> {
    let party = update_courier_availability(&state, id, payload.available)?;
    let message = if payload.available {
        "courier is available"
    } else {
        "courier is offline"
    };
    Ok(ApiResponse::ok(message, party))
}

async fn list_nearby_couriers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<ApiResponse<Vec<NearbyCourier>>>, AppError> {
    let point = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    validate_point(&point)?;

    let radius_km = query.radius_km.unwrap_or(state.config.dispatch_radius_km);
    let couriers = nearby_available_couriers(&state, &point, radius_km);
    Ok(ApiResponse::ok(
        format!("{} couriers nearby", couriers.len()),
        couriers,
    ))
}
