use serde::Serialize;

use crate::geo::haversine_km;
use crate::models::party::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeofenceVerdict {
    pub allowed: bool,
    pub distance_km: Option<f64>,
    pub radius_km: Option<f64>,
}

pub trait Geofence: Send + Sync {
    fn check(&self, point: &GeoPoint) -> GeofenceVerdict;
}

/// Circular operating area. With no centre or radius configured every point is allowed.
#[derive(Debug, Clone, Default)]
pub struct RadiusGeofence {
    center: Option<GeoPoint>,
    radius_km: Option<f64>,
}

impl RadiusGeofence {
    pub fn new(center: Option<GeoPoint>, radius_km: Option<f64>) -> Self {
        Self { center, radius_km }
    }
}

impl Geofence for RadiusGeofence {
    fn check(&self, point: &GeoPoint) -> GeofenceVerdict {
        match (self.center, self.radius_km) {
            (Some(center), Some(radius_km)) => {
                let distance_km = haversine_km(point, &center);
                GeofenceVerdict {
                    allowed: distance_km <= radius_km,
                    distance_km: Some(distance_km),
                    radius_km: Some(radius_km),
                }
            }
            _ => GeofenceVerdict {
                allowed: true,
                distance_km: None,
                radius_km: None,
            },
        }
    }
}
