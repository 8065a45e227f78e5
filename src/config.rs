use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::AppError;
use crate::geo::DistanceMetric;
use crate::models::party::GeoPoint;

/// How a second courier's price proposal is treated while another one is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalPolicy {
    /// One pending proposal per order; other couriers get `ProposalInProgress`.
    Exclusive,
    /// Every courier may hold one standing offer; the customer picks one.
    Open,
}

impl FromStr for ProposalPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exclusive" => Ok(ProposalPolicy::Exclusive),
            "open" => Ok(ProposalPolicy::Open),
            other => Err(format!("unknown proposal policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub platform_commission_rate: Decimal,
    pub max_active_orders: u8,
    pub dispatch_radius_km: f64,
    pub referral_reward: Decimal,
    pub max_verification_attempts: u8,
    pub route_distance_metric: DistanceMetric,
    pub proposal_policy: ProposalPolicy,
    pub operation_center: Option<GeoPoint>,
    pub operation_radius_km: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            platform_commission_rate: Decimal::new(10, 2),
            max_active_orders: 4,
            dispatch_radius_km: 5.0,
            referral_reward: Decimal::new(1000, 2),
            max_verification_attempts: 5,
            route_distance_metric: DistanceMetric::Haversine,
            proposal_policy: ProposalPolicy::Exclusive,
            operation_center: None,
            operation_radius_km: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let platform_commission_rate: Decimal =
            parse_or_default("PLATFORM_COMMISSION_RATE", defaults.platform_commission_rate)?;
        if platform_commission_rate < Decimal::ZERO || platform_commission_rate > Decimal::ONE {
            return Err(AppError::Internal(format!(
                "invalid PLATFORM_COMMISSION_RATE: {platform_commission_rate} is outside [0, 1]"
            )));
        }

        let operation_center = match env::var("OPERATION_CENTER") {
            Ok(raw) => Some(parse_point(&raw).map_err(|err| {
                AppError::Internal(format!("invalid OPERATION_CENTER: {err}"))
            })?),
            Err(_) => None,
        };
        let operation_radius_km = match env::var("OPERATION_RADIUS_KM") {
            Ok(raw) => Some(raw.parse::<f64>().map_err(|err| {
                AppError::Internal(format!("invalid OPERATION_RADIUS_KM: {err}"))
            })?),
            Err(_) => None,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_or_default("LOG_FORMAT", defaults.log_format)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            platform_commission_rate,
            max_active_orders: parse_or_default("MAX_ACTIVE_ORDERS", defaults.max_active_orders)?,
            dispatch_radius_km: parse_or_default(
                "DISPATCH_RADIUS_KM",
                defaults.dispatch_radius_km,
            )?,
            referral_reward: parse_or_default("REFERRAL_REWARD", defaults.referral_reward)?,
            max_verification_attempts: parse_or_default(
                "MAX_VERIFICATION_ATTEMPTS",
                defaults.max_verification_attempts,
            )?,
            route_distance_metric: parse_or_default(
                "ROUTE_DISTANCE_METRIC",
                defaults.route_distance_metric,
            )?,
            proposal_policy: parse_or_default("PROPOSAL_POLICY", defaults.proposal_policy)?,
            operation_center,
            operation_radius_km,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

/// Parses `"lat,lng"`.
fn parse_point(raw: &str) -> Result<GeoPoint, String> {
    let (lat, lng) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected 'lat,lng', got '{raw}'"))?;
    let lat = lat.trim().parse::<f64>().map_err(|err| err.to_string())?;
    let lng = lng.trim().parse::<f64>().map_err(|err| err.to_string())?;
    Ok(GeoPoint { lat, lng })
}

#[cfg(test)]
mod tests {
    use super::{parse_point, ProposalPolicy};

    #[test]
    fn parses_operation_center() {
        let point = parse_point(" 30.0444, 31.2357 ").unwrap();
        assert_eq!(point.lat, 30.0444);
        assert_eq!(point.lng, 31.2357);
        assert!(parse_point("30.0444").is_err());
    }

    #[test]
    fn proposal_policy_is_case_insensitive() {
        assert_eq!("OPEN".parse::<ProposalPolicy>(), Ok(ProposalPolicy::Open));
        assert!("first-come".parse::<ProposalPolicy>().is_err());
    }
}
