use chrono::Utc;
use rand::Rng;
use tracing::info;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::party::{
    CourierProfile, CustomerProfile, GeoPoint, NearbyCourier, Party, PartyProfile, Role,
};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub referred_by: Option<String>,
    pub location: Option<GeoPoint>,
}

pub fn generate_referral_code() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..=0xFF_FFFF);
    format!("MS-{suffix:06X}")
}

pub fn register_party(state: &AppState, registration: Registration) -> Result<Party, AppError> {
    let name = registration.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if let Some(location) = &registration.location {
        validate_point(location)?;
    }

    let referred_by = match registration.referred_by.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Some(resolve_referral_code(state, code)?),
        _ => None,
    };

    let profile = match registration.role {
        Role::Customer => PartyProfile::Customer(CustomerProfile::default()),
        Role::Courier => PartyProfile::Courier(CourierProfile {
            location: registration.location,
            ..CourierProfile::default()
        }),
    };

    let party = Party {
        id: state.next_party_id(),
        name: name.to_string(),
        phone: registration.phone,
        referral_code: generate_referral_code(),
        referred_by,
        profile,
        created_at: Utc::now(),
    };

    state.parties.insert(party.id, party.clone());
    info!(party_id = party.id, role = %party.role(), "party registered");

    Ok(party)
}

fn resolve_referral_code(state: &AppState, code: &str) -> Result<i64, AppError> {
    state
        .parties
        .iter()
        .find(|entry| entry.value().referral_code.eq_ignore_ascii_case(code))
        .map(|entry| *entry.key())
        .ok_or_else(|| AppError::Validation(format!("unknown referral code {code}")))
}

pub fn get_party(state: &AppState, id: i64) -> Result<Party, AppError> {
    state
        .parties
        .get(&id)
        .map(|party| party.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("party {id} not found")))
}

/// Fails unless `id` names a registered party with `role`.
pub fn ensure_role(state: &AppState, id: i64, role: Role) -> Result<(), AppError> {
    let party = state
        .parties
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("{role} {id} not found")))?;

    if party.role() != role {
        return Err(AppError::Validation(format!("party {id} is not a {role}")));
    }
    Ok(())
}

pub fn update_courier_location(
    state: &AppState,
    id: i64,
    location: GeoPoint,
) -> Result<Party, AppError> {
    validate_point(&location)?;

    let mut party = state
        .parties
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
    let courier = party
        .as_courier_mut()
        .ok_or_else(|| AppError::Validation(format!("party {id} is not a courier")))?;
    courier.location = Some(location);

    Ok(party.clone())
}

pub fn update_courier_availability(
    state: &AppState,
    id: i64,
    available: bool,
) -> Result<Party, AppError> {
    let mut party = state
        .parties
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;
    let courier = party
        .as_courier_mut()
        .ok_or_else(|| AppError::Validation(format!("party {id} is not a courier")))?;
    courier.available = available;

    info!(courier_id = id, available, "courier availability changed");
    Ok(party.clone())
}

/// Available couriers with a known position inside `radius_km`, nearest first.
pub fn nearby_available_couriers(
    state: &AppState,
    point: &GeoPoint,
    radius_km: f64,
) -> Vec<NearbyCourier> {
    let mut couriers: Vec<NearbyCourier> = state
        .parties
        .iter()
        .filter_map(|entry| {
            let party = entry.value();
            let courier = party.as_courier()?;
            if !courier.available {
                return None;
            }

            let location = courier.location?;
            let distance_km = haversine_km(point, &location);
            (distance_km <= radius_km).then(|| NearbyCourier {
                id: party.id,
                name: party.name.clone(),
                location,
                rating: courier.rating,
                distance_km,
            })
        })
        .collect();

    couriers.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    couriers
}

/// Takes one of the customer's concurrent-order slots.
pub(crate) fn reserve_customer_slot(state: &AppState, customer_id: i64) -> Result<(), AppError> {
    let max = state.config.max_active_orders;
    let mut party = state
        .parties
        .get_mut(&customer_id)
        .ok_or_else(|| AppError::NotFound(format!("customer {customer_id} not found")))?;
    let customer = party
        .as_customer_mut()
        .ok_or_else(|| AppError::Validation(format!("party {customer_id} is not a customer")))?;

    if customer.active_orders >= max {
        return Err(AppError::LimitExceeded(format!(
            "customer {customer_id} already has {max} active orders"
        )));
    }
    customer.active_orders += 1;
    Ok(())
}

/// Takes one of the courier's concurrent-order slots.
pub(crate) fn reserve_courier_slot(state: &AppState, courier_id: i64) -> Result<(), AppError> {
    let max = state.config.max_active_orders;
    let mut party = state
        .parties
        .get_mut(&courier_id)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
    let courier = party
        .as_courier_mut()
        .ok_or_else(|| AppError::Validation(format!("party {courier_id} is not a courier")))?;

    if courier.active_orders >= max {
        return Err(AppError::LimitExceeded(format!(
            "courier {courier_id} already has {max} active orders"
        )));
    }
    courier.active_orders += 1;
    Ok(())
}

pub(crate) fn release_customer_slot(state: &AppState, customer_id: i64, delivered: bool) {
    if let Some(mut party) = state.parties.get_mut(&customer_id) {
        if let Some(customer) = party.as_customer_mut() {
            customer.active_orders = customer.active_orders.saturating_sub(1);
            if delivered {
                customer.delivered_orders += 1;
            }
        }
    }
}

pub(crate) fn release_courier_slot(state: &AppState, courier_id: i64) {
    if let Some(mut party) = state.parties.get_mut(&courier_id) {
        if let Some(courier) = party.as_courier_mut() {
            courier.active_orders = courier.active_orders.saturating_sub(1);
        }
    }
}

pub fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    let lat_ok = point.lat.is_finite() && (-90.0..=90.0).contains(&point.lat);
    let lng_ok = point.lng.is_finite() && (-180.0..=180.0).contains(&point.lng);
    if !lat_ok || !lng_ok {
        return Err(AppError::Validation(format!(
            "coordinates ({}, {}) are out of range",
            point.lat, point.lng
        )));
    }
    Ok(())
}
