use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::api::rest::ApiResponse;
use crate::engine::route::compute_route;
use crate::error::AppError;
use crate::models::party::GeoPoint;
use crate::models::route::RouteStop;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/couriers/:id/route", get(route_for_courier))
}

/// Current position; both halves must be given together.
#[derive(Deserialize)]
pub struct RouteQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

async fn route_for_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<RouteQuery>,
) -> Result<Json<ApiResponse<Vec<RouteStop>>>, AppError> {
    let current = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        (None, None) => None,
        _ => {
            return Err(AppError::Validation(
                "lat and lng must be given together".to_string(),
            ));
        }
    };

    let route = compute_route(&state, id, current)?;
    Ok(ApiResponse::ok(format!("{} stops", route.len()), route))
}
