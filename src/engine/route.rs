//! Stop sequencing for a courier's active orders.
//!
//! Greedy nearest-neighbour with pickup-before-dropoff precedence. The result
//! is not an optimal tour; it is cheap to compute on every request and stable
//! for the handful of orders one courier can hold.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, warn};

use crate::engine::parties::{ensure_role, validate_point};
use crate::error::AppError;
use crate::geo::DistanceMetric;
use crate::models::order::{Order, OrderStatus};
use crate::models::party::{GeoPoint, Role};
use crate::models::route::{RouteStop, StopPoint, StopType};
use crate::state::AppState;

/// Expands orders into their pickup and dropoff stops.
///
/// A pickup counts as completed once the order has moved past `accepted`.
/// Dropoffs are never pre-completed. Orders a courier does not hold are skipped.
pub fn expand_stops(orders: &[Order]) -> Vec<StopPoint> {
    orders
        .iter()
        .filter(|order| order.status.is_courier_active())
        .flat_map(|order| {
            [
                StopPoint {
                    order_id: order.id,
                    stop_type: StopType::Pickup,
                    location: order.pickup.location,
                    completed: order.status != OrderStatus::Accepted,
                },
                StopPoint {
                    order_id: order.id,
                    stop_type: StopType::Dropoff,
                    location: order.dropoff.location,
                    completed: false,
                },
            ]
        })
        .collect()
}

pub fn plan_route(start: GeoPoint, stops: &[StopPoint], metric: DistanceMetric) -> Vec<RouteStop> {
    let mut remaining: Vec<&StopPoint> = stops.iter().filter(|stop| !stop.completed).collect();

    // Orders whose parcel is already on board, or whose pickup has no pending stop.
    let pending_pickups: HashSet<i64> = remaining
        .iter()
        .filter(|stop| stop.stop_type == StopType::Pickup)
        .map(|stop| stop.order_id)
        .collect();
    let mut picked_up: HashSet<i64> = remaining
        .iter()
        .filter(|stop| stop.stop_type == StopType::Dropoff)
        .map(|stop| stop.order_id)
        .filter(|order_id| !pending_pickups.contains(order_id))
        .collect();

    let mut position = start;
    let mut route = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .enumerate()
            .filter(|(_, stop)| match stop.stop_type {
                StopType::Pickup => true,
                StopType::Dropoff => picked_up.contains(&stop.order_id),
            })
            .map(|(idx, stop)| (idx, metric.distance_km(&position, &stop.location)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        // Pickups are always eligible, so a blocked dropoff never stalls the plan.
        let Some((idx, distance_km)) = next else {
            warn!(remaining = remaining.len(), "no eligible stop left in route plan");
            break;
        };

        let stop = remaining.swap_remove(idx);
        if stop.stop_type == StopType::Pickup {
            picked_up.insert(stop.order_id);
        }
        position = stop.location;
        route.push(RouteStop {
            order_id: stop.order_id,
            stop_type: stop.stop_type,
            location: stop.location,
            distance_km,
        });
    }

    route
}

/// Plans the stop sequence for everything `courier_id` currently holds,
/// starting from `current` or, failing that, the courier's last known location.
pub fn compute_route(
    state: &AppState,
    courier_id: i64,
    current: Option<GeoPoint>,
) -> Result<Vec<RouteStop>, AppError> {
    let started = Instant::now();
    let result = plan_for_courier(state, courier_id, current);

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .route_computation_seconds
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());

    result
}

fn plan_for_courier(
    state: &AppState,
    courier_id: i64,
    current: Option<GeoPoint>,
) -> Result<Vec<RouteStop>, AppError> {
    ensure_role(state, courier_id, Role::Courier)?;

    let start = match current {
        Some(point) => {
            validate_point(&point)?;
            point
        }
        None => state
            .parties
            .get(&courier_id)
            .and_then(|party| party.as_courier().and_then(|courier| courier.location))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "courier {courier_id} has no known location; pass the current position"
                ))
            })?,
    };

    let orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| {
            entry.value().courier_id == Some(courier_id) && entry.value().status.is_courier_active()
        })
        .map(|entry| entry.value().clone())
        .collect();

    let stops = expand_stops(&orders);
    let route = plan_route(start, &stops, state.config.route_distance_metric);
    debug!(
        courier_id,
        orders = orders.len(),
        stops = route.len(),
        "route computed"
    );
    Ok(route)
}
