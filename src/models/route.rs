use serde::{Deserialize, Serialize};

use crate::models::party::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    Pickup,
    Dropoff,
}

/// A pickup or dropoff derived from an active order. Computed per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopPoint {
    pub order_id: i64,
    pub stop_type: StopType,
    pub location: GeoPoint,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub order_id: i64,
    pub stop_type: StopType,
    pub location: GeoPoint,
    /// Leg length from the previous position.
    pub distance_km: f64,
}
