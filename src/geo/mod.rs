use std::str::FromStr;

use crate::models::party::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Equirectangular projection. Only accurate over small service areas.
pub fn planar_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let mean_lat = ((a.lat + b.lat) / 2.0).to_radians();
    let x = (b.lng - a.lng).to_radians() * mean_lat.cos();
    let y = (b.lat - a.lat).to_radians();

    EARTH_RADIUS_KM * (x * x + y * y).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    #[default]
    Haversine,
    Planar,
}

impl DistanceMetric {
    pub fn distance_km(self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        match self {
            DistanceMetric::Haversine => haversine_km(a, b),
            DistanceMetric::Planar => planar_km(a, b),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "haversine" => Ok(DistanceMetric::Haversine),
            "planar" => Ok(DistanceMetric::Planar),
            other => Err(format!("unknown distance metric '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, planar_km, DistanceMetric};
    use crate::models::party::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 30.0444,
            lng: 31.2357,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn planar_tracks_haversine_inside_a_city() {
        let tahrir = GeoPoint {
            lat: 30.0444,
            lng: 31.2357,
        };
        let zamalek = GeoPoint {
            lat: 30.0609,
            lng: 31.2197,
        };
        let exact = haversine_km(&tahrir, &zamalek);
        let approx = planar_km(&tahrir, &zamalek);
        assert!((exact - approx).abs() < 0.01);
    }

    #[test]
    fn metric_parses_from_config_values() {
        assert_eq!("planar".parse::<DistanceMetric>(), Ok(DistanceMetric::Planar));
        assert_eq!(
            " Haversine ".parse::<DistanceMetric>(),
            Ok(DistanceMetric::Haversine)
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
