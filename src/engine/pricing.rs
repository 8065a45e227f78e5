use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::order::ServiceTier;
use crate::models::party::GeoPoint;
use crate::models::promo::{DiscountType, PromoCode};

const BASE_FARE: i64 = 15;
const COST_PER_KM: i64 = 3;
const MIN_FARE: i64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct TierQuote {
    pub tier: ServiceTier,
    pub name: &'static str,
    pub price: Decimal,
    pub eta_multiplier: f64,
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceEstimate {
    pub distance_km: f64,
    pub tiers: Vec<TierQuote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromoApplication {
    pub discount: Decimal,
    pub final_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionSplit {
    pub commission: Decimal,
    pub courier_net: Decimal,
}

/// Half-up to cents, always carried at scale 2 so amounts render as `90.00`.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

fn round_whole(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Quotes all three service tiers for a straight-line trip.
pub fn price_options(pickup: &GeoPoint, dropoff: &GeoPoint) -> PriceEstimate {
    let distance_km = (haversine_km(pickup, dropoff) * 100.0).round() / 100.0;
    let distance = Decimal::from_f64(distance_km).unwrap_or(Decimal::ZERO);

    let raw = (Decimal::from(BASE_FARE) + distance * Decimal::from(COST_PER_KM))
        .max(Decimal::from(MIN_FARE));

    let quote = |tier: ServiceTier, name: &'static str, factor: Decimal, eta_multiplier: f64| {
        TierQuote {
            tier,
            name,
            price: round_whole(raw * factor),
            eta_multiplier,
            priority: tier.priority(),
        }
    };

    PriceEstimate {
        distance_km,
        tiers: vec![
            quote(ServiceTier::Economic, "Economic", Decimal::new(9, 1), 1.5),
            quote(ServiceTier::Standard, "Standard", Decimal::ONE, 1.0),
            quote(ServiceTier::Fast, "Fast", Decimal::new(13, 1), 0.8),
        ],
    }
}

/// Checks the promo's eligibility rules and computes the discounted price.
pub fn apply_promo(
    base: Decimal,
    promo: &PromoCode,
    now: DateTime<Utc>,
) -> Result<PromoApplication, AppError> {
    if !promo.active {
        return Err(AppError::Validation(format!(
            "promo code {} is not active",
            promo.code
        )));
    }
    if promo.expires_at.is_some_and(|expires_at| expires_at <= now) {
        return Err(AppError::Validation(format!(
            "promo code {} has expired",
            promo.code
        )));
    }
    if promo.used_count >= promo.usage_limit {
        return Err(AppError::Validation(format!(
            "promo code {} has reached its usage limit",
            promo.code
        )));
    }
    if base < promo.min_order_value {
        return Err(AppError::Validation(format!(
            "promo code {} requires an order of at least {}",
            promo.code, promo.min_order_value
        )));
    }

    let mut discount = match promo.discount_type {
        DiscountType::Percentage => {
            let raw = base * promo.discount_value / Decimal::ONE_HUNDRED;
            match promo.max_discount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::Fixed => promo.discount_value,
    };
    discount = round_money(discount.max(Decimal::ZERO).min(base));

    Ok(PromoApplication {
        discount,
        final_price: round_money((base - discount).max(Decimal::ZERO)),
    })
}

pub fn split_commission(price: Decimal, rate: Decimal) -> CommissionSplit {
    let commission = round_money(price * rate);
    CommissionSplit {
        commission,
        courier_net: round_money(price - commission),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{apply_promo, price_options, split_commission};
    use crate::error::AppError;
    use crate::models::order::ServiceTier;
    use crate::models::party::GeoPoint;
    use crate::models::promo::{DiscountType, PromoCode};

    fn promo(discount_type: DiscountType, value: i64) -> PromoCode {
        PromoCode {
            code: "WELCOME".to_string(),
            discount_type,
            discount_value: Decimal::from(value),
            max_discount: None,
            min_order_value: Decimal::ZERO,
            expires_at: None,
            usage_limit: 100,
            used_count: 0,
            active: true,
        }
    }

    #[test]
    fn short_trips_pay_the_minimum_fare() {
        let p = GeoPoint {
            lat: 30.0444,
            lng: 31.2357,
        };
        let estimate = price_options(&p, &p);

        assert_eq!(estimate.distance_km, 0.0);
        let standard = estimate
            .tiers
            .iter()
            .find(|quote| quote.tier == ServiceTier::Standard)
            .unwrap();
        assert_eq!(standard.price, Decimal::from(20));
        assert_eq!(estimate.tiers[0].price, Decimal::from(18));
        assert_eq!(estimate.tiers[2].price, Decimal::from(26));
    }

    #[test]
    fn longer_trips_scale_with_distance() {
        let pickup = GeoPoint { lat: 0.0, lng: 0.0 };
        let dropoff = GeoPoint { lat: 0.0, lng: 0.1 };
        let estimate = price_options(&pickup, &dropoff);

        // ~11.12 km -> 15 + 33.36 = 48.36
        assert!((estimate.distance_km - 11.12).abs() < 0.01);
        assert_eq!(estimate.tiers[1].price, Decimal::from(48));
        assert_eq!(estimate.tiers[2].price, Decimal::from(63));
    }

    #[test]
    fn percentage_promo_respects_its_cap() {
        let mut code = promo(DiscountType::Percentage, 50);
        code.max_discount = Some(Decimal::from(20));

        let applied = apply_promo(Decimal::from(100), &code, Utc::now()).unwrap();
        assert_eq!(applied.discount, Decimal::from(20));
        assert_eq!(applied.final_price, Decimal::from(80));
    }

    #[test]
    fn fixed_promo_never_drives_the_price_negative() {
        let code = promo(DiscountType::Fixed, 50);
        let applied = apply_promo(Decimal::from(30), &code, Utc::now()).unwrap();
        assert_eq!(applied.final_price, Decimal::ZERO);
        assert_eq!(applied.discount, Decimal::from(30));
    }

    #[test]
    fn expired_or_exhausted_promos_are_refused() {
        let mut expired = promo(DiscountType::Fixed, 5);
        expired.expires_at = Some(Utc::now() - Duration::hours(1));
        assert!(matches!(
            apply_promo(Decimal::from(40), &expired, Utc::now()),
            Err(AppError::Validation(_))
        ));

        let mut exhausted = promo(DiscountType::Fixed, 5);
        exhausted.used_count = exhausted.usage_limit;
        assert!(matches!(
            apply_promo(Decimal::from(40), &exhausted, Utc::now()),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn ten_percent_commission_on_one_hundred() {
        let split = split_commission(Decimal::from(100), Decimal::new(10, 2));
        assert_eq!(split.commission, Decimal::new(1000, 2));
        assert_eq!(split.courier_net, Decimal::new(9000, 2));
    }

    #[test]
    fn commission_rounds_to_cents() {
        let split = split_commission(Decimal::new(3333, 2), Decimal::new(10, 2));
        assert_eq!(split.commission, Decimal::new(333, 2));
        assert_eq!(split.courier_net, Decimal::new(3000, 2));
    }
}
