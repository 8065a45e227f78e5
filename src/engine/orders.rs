//! The order lifecycle: waiting → accepted → picked_up → in_delivery → delivered,
//! with cancellation possible from any non-terminal status.
//!
//! Every write to an order happens while holding that order's map entry, which
//! serializes concurrent acceptance and status updates on the same order.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::engine::dispatch::{
    announce_new_order, announce_status, announce_wallet, notify_best_effort,
};
use crate::engine::ledger::{DeliverySettlement, ReferralReward, SettlementReceipt};
use crate::engine::parties::{
    ensure_role, release_courier_slot, release_customer_slot, reserve_courier_slot,
    reserve_customer_slot, validate_point,
};
use crate::engine::pricing::{apply_promo, round_money, split_commission, PromoApplication};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::integrations::events::{DomainEvent, Topic};
use crate::integrations::notifier::Notification;
use crate::models::negotiation::NegotiationLog;
use crate::models::order::{
    order_code, DestinationProgress, NegotiationStatus, Order, OrderStatus, ProofAttachment,
    Rating, ServiceTier, Stop,
};
use crate::models::party::{GeoPoint, Role};
use crate::models::promo::{DiscountType, PromoCode};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_id: i64,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub stops: Vec<Stop>,
    pub details: Option<String>,
    pub price: Decimal,
    pub tier: ServiceTier,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    pub verification_code: Option<String>,
    pub proof: Option<ProofAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyOrder {
    #[serde(flatten)]
    pub order: Order,
    pub distance_km: f64,
}

fn generate_verification_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}

fn normalize_promo_code(raw: Option<&str>) -> Option<String> {
    raw.map(|code| code.trim().to_ascii_uppercase())
        .filter(|code| !code.is_empty())
}

pub fn create_order(state: &AppState, request: CreateOrder) -> Result<Order, AppError> {
    if request.price < Decimal::ZERO {
        return Err(AppError::Validation("price cannot be negative".to_string()));
    }
    validate_point(&request.pickup.location)?;
    validate_point(&request.dropoff.location)?;
    for stop in &request.stops {
        validate_point(&stop.location)?;
    }
    ensure_role(state, request.customer_id, Role::Customer)?;

    for (label, point) in [
        ("pickup", &request.pickup.location),
        ("dropoff", &request.dropoff.location),
    ] {
        let verdict = state.geofence.check(point);
        if !verdict.allowed {
            return Err(AppError::OutOfBounds(format!(
                "{label} ({}, {}) is outside the service area",
                point.lat, point.lng
            )));
        }
    }

    reserve_customer_slot(state, request.customer_id)?;

    let promo_code = normalize_promo_code(request.promo_code.as_deref());
    let pricing = match &promo_code {
        Some(code) => match consume_promo(state, code, request.price) {
            Ok(applied) => applied,
            Err(err) => {
                release_customer_slot(state, request.customer_id, false);
                return Err(err);
            }
        },
        None => PromoApplication {
            discount: Decimal::ZERO,
            final_price: round_money(request.price),
        },
    };

    let id = state.next_order_id();
    let now = Utc::now();
    let order = Order {
        id,
        order_code: order_code(id, now),
        customer_id: request.customer_id,
        courier_id: None,
        pickup: request.pickup,
        dropoff: request.dropoff,
        stops: request.stops,
        details: request.details,
        price: pricing.final_price,
        discount: pricing.discount,
        proposed_price: None,
        promo_code,
        tier: request.tier,
        priority: request.tier.priority(),
        status: OrderStatus::Waiting,
        negotiation_status: NegotiationStatus::None,
        offers: Vec::new(),
        verification_code: generate_verification_code(),
        failed_verification_attempts: 0,
        pickup_proof: None,
        delivery_proof: None,
        current_destination_index: 0,
        scheduled_at: request.scheduled_at,
        accepted_at: None,
        delivered_at: None,
        cancelled_at: None,
        created_at: now,
    };

    state.orders.insert(id, order.clone());
    info!(
        order_id = id,
        customer_id = order.customer_id,
        price = %order.price,
        "order created"
    );

    announce_new_order(state, &order);
    Ok(order)
}

/// Validates the promo and counts one use of it under the promo's own entry lock.
fn consume_promo(
    state: &AppState,
    code: &str,
    base: Decimal,
) -> Result<PromoApplication, AppError> {
    let mut promo = state
        .promo_codes
        .get_mut(code)
        .ok_or_else(|| AppError::Validation(format!("unknown promo code {code}")))?;

    let applied = apply_promo(base, &promo, Utc::now())?;
    promo.used_count += 1;
    Ok(applied)
}

pub fn create_promo_code(state: &AppState, mut promo: PromoCode) -> Result<PromoCode, AppError> {
    promo.code = promo.code.trim().to_ascii_uppercase();
    if promo.code.is_empty() {
        return Err(AppError::Validation("promo code cannot be empty".to_string()));
    }
    if promo.discount_value <= Decimal::ZERO {
        return Err(AppError::Validation(
            "discount value must be positive".to_string(),
        ));
    }
    if promo.discount_type == DiscountType::Percentage
        && promo.discount_value > Decimal::ONE_HUNDRED
    {
        return Err(AppError::Validation(
            "percentage discount cannot exceed 100".to_string(),
        ));
    }

    match state.promo_codes.entry(promo.code.clone()) {
        Entry::Occupied(_) => Err(AppError::Validation(format!(
            "promo code {} already exists",
            promo.code
        ))),
        Entry::Vacant(slot) => {
            slot.insert(promo.clone());
            Ok(promo)
        }
    }
}

pub fn get_order(state: &AppState, order_id: i64) -> Result<Order, AppError> {
    state
        .orders
        .get(&order_id)
        .map(|order| order.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

/// Assigns a waiting order to `courier_id` at its listed price.
///
/// The status check and the assignment happen under the order's entry lock, so
/// exactly one of any number of racing couriers wins; the rest get `AlreadyTaken`.
pub fn accept_order(state: &AppState, order_id: i64, courier_id: i64) -> Result<Order, AppError> {
    ensure_role(state, courier_id, Role::Courier)?;

    let accepted = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status != OrderStatus::Waiting {
            state.metrics.accept_conflicts_total.inc();
            return Err(AppError::AlreadyTaken(order_id));
        }

        reserve_courier_slot(state, courier_id)?;

        order.courier_id = Some(courier_id);
        order.status = OrderStatus::Accepted;
        order.accepted_at = Some(Utc::now());
        // A direct acceptance at the listed price supersedes any standing offers.
        if order.negotiation_status == NegotiationStatus::CourierProposal {
            order.negotiation_status = NegotiationStatus::None;
        }
        order.proposed_price = None;
        order.offers.clear();
        order.clone()
    };

    info!(order_id, courier_id, "order accepted");
    announce_status(state, &accepted);
    Ok(accepted)
}

/// Moves an order one step forward. `accepted` is only reachable through
/// [`accept_order`] or an accepted proposal; `cancelled` delegates to cancellation.
pub fn update_status(
    state: &AppState,
    order_id: i64,
    update: StatusUpdate,
) -> Result<Order, AppError> {
    if update.status == OrderStatus::Cancelled {
        return cancel(state, order_id, None);
    }

    let (updated, receipt) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status.next() != Some(update.status) || update.status == OrderStatus::Accepted {
            return Err(AppError::InvalidState(format!(
                "order {order_id} cannot move from {} to {}",
                order.status, update.status
            )));
        }

        let receipt = match update.status {
            OrderStatus::PickedUp => {
                if update.proof.is_some() {
                    order.pickup_proof = update.proof;
                }
                order.status = OrderStatus::PickedUp;
                None
            }
            OrderStatus::InDelivery => {
                order.status = OrderStatus::InDelivery;
                None
            }
            OrderStatus::Delivered => Some(deliver(
                state,
                &mut order,
                update.verification_code.as_deref(),
                update.proof,
            )?),
            other => {
                return Err(AppError::InvalidState(format!(
                    "order {order_id} cannot move to {other} through a status update"
                )));
            }
        };

        (order.clone(), receipt)
    };

    announce_status(state, &updated);
    if let Some(receipt) = receipt {
        announce_settlement(state, &updated, &receipt);
    }
    Ok(updated)
}

/// Verifies the code and settles the delivery. Runs with the order entry held.
///
/// The ledger write is the only fallible step after verification; the party
/// counters and the order itself change only once it has succeeded.
fn deliver(
    state: &AppState,
    order: &mut Order,
    verification_code: Option<&str>,
    proof: Option<ProofAttachment>,
) -> Result<SettlementReceipt, AppError> {
    if order.failed_verification_attempts >= state.config.max_verification_attempts {
        return Err(AppError::VerificationLocked(order.id));
    }
    if verification_code.map(str::trim) != Some(order.verification_code.as_str()) {
        order.failed_verification_attempts += 1;
        warn!(
            order_id = order.id,
            attempts = order.failed_verification_attempts,
            "delivery verification failed"
        );
        return Err(AppError::BadVerificationCode);
    }

    let courier_id = order.courier_id.ok_or_else(|| {
        AppError::InvalidState(format!("order {} has no courier assigned", order.id))
    })?;

    let split = split_commission(order.price, state.config.platform_commission_rate);

    // Referral links never change after registration, so they can be read
    // before the customer row is locked.
    let (referee_name, referrer_role) = {
        let customer = state
            .parties
            .get(&order.customer_id)
            .ok_or_else(|| AppError::Internal(format!("customer {} missing", order.customer_id)))?;
        let referrer = customer.referred_by;
        let name = customer.name.clone();
        drop(customer);
        let role = referrer.and_then(|id| state.parties.get(&id).map(|p| (id, p.role())));
        (name, role)
    };

    let receipt = {
        let mut customer = state
            .parties
            .get_mut(&order.customer_id)
            .ok_or_else(|| AppError::Internal(format!("customer {} missing", order.customer_id)))?;
        let profile = customer.as_customer_mut().ok_or_else(|| {
            AppError::Internal(format!("party {} is not a customer", order.customer_id))
        })?;

        let first_delivery = profile.delivered_orders == 0;
        let referral = match referrer_role {
            Some((referrer_id, referrer_role)) if first_delivery => Some(ReferralReward {
                referrer_id,
                referrer_role,
                amount: state.config.referral_reward,
                referee_name,
            }),
            _ => None,
        };

        let receipt = state.ledger.settle_delivery(&DeliverySettlement {
            order_id: order.id,
            order_code: order.order_code.clone(),
            courier_id,
            courier_net: split.courier_net,
            referral,
        })?;

        profile.active_orders = profile.active_orders.saturating_sub(1);
        profile.delivered_orders += 1;
        receipt
    };
    release_courier_slot(state, courier_id);

    order.status = OrderStatus::Delivered;
    order.delivered_at = Some(Utc::now());
    if proof.is_some() {
        order.delivery_proof = proof;
    }

    state.metrics.settlements_total.inc();
    if let Some(commission) = split.commission.to_f64() {
        state.metrics.settled_commission_total.inc_by(commission);
    }
    info!(
        order_id = order.id,
        courier_id,
        commission = %split.commission,
        courier_net = %split.courier_net,
        "delivery settled"
    );

    Ok(receipt)
}

fn announce_settlement(state: &AppState, order: &Order, receipt: &SettlementReceipt) {
    announce_wallet(state, &receipt.courier_wallet);
    if let Some(credit) = &receipt.courier_credit {
        notify_best_effort(
            state,
            Notification {
                user_id: receipt.courier_wallet.user_id,
                role: Role::Courier,
                title: "Earnings credited".to_string(),
                body: format!("{} added for order {}", credit.amount, order.order_code),
                data: json!({ "type": "earning", "order_id": order.id }),
            },
        );
    }

    if let Some((wallet, reward)) = &receipt.referral {
        announce_wallet(state, wallet);
        notify_best_effort(
            state,
            Notification {
                user_id: wallet.user_id,
                role: wallet.role,
                title: "Referral reward".to_string(),
                body: format!("{} added to your wallet", reward.amount),
                data: json!({ "type": "referral_reward" }),
            },
        );
    }
}

/// Cancels on behalf of `actor_id`, who must be the customer or the assigned courier.
pub fn cancel_order(state: &AppState, order_id: i64, actor_id: i64) -> Result<Order, AppError> {
    cancel(state, order_id, Some(actor_id))
}

fn cancel(state: &AppState, order_id: i64, actor_id: Option<i64>) -> Result<Order, AppError> {
    let cancelled = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "order {order_id} is already {}",
                order.status
            )));
        }

        let courier_holds_order = order.status.is_courier_active();
        if let Some(actor_id) = actor_id {
            let is_customer = actor_id == order.customer_id;
            let is_courier = courier_holds_order && order.courier_id == Some(actor_id);
            if !is_customer && !is_courier {
                return Err(AppError::Validation(format!(
                    "party {actor_id} may not cancel order {order_id}"
                )));
            }
        }

        release_customer_slot(state, order.customer_id, false);
        if courier_holds_order {
            if let Some(courier_id) = order.courier_id {
                release_courier_slot(state, courier_id);
            }
        } else {
            // Drop the soft hold left by a pending proposal.
            order.courier_id = None;
        }

        order.status = OrderStatus::Cancelled;
        order.cancelled_at = Some(Utc::now());
        order.offers.clear();
        order.proposed_price = None;
        if order.negotiation_status == NegotiationStatus::CourierProposal {
            order.negotiation_status = NegotiationStatus::None;
        }
        order.clone()
    };

    info!(order_id, actor_id = ?actor_id, "order cancelled");
    announce_status(state, &cancelled);
    Ok(cancelled)
}

/// Advances a multi-stop order to its next stop, or reports that it is finished.
/// Only orders a courier is currently working on can progress.
pub fn update_destination_progress(
    state: &AppState,
    order_id: i64,
) -> Result<DestinationProgress, AppError> {
    let progress = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if !order.status.is_courier_active() {
            return Err(AppError::InvalidState(format!(
                "order {order_id} is {} and has no stops in progress",
                order.status
            )));
        }

        let index = order.current_destination_index;
        if index + 1 >= order.stops.len() {
            return Ok(DestinationProgress::Finished { index });
        }

        order.current_destination_index = index + 1;
        DestinationProgress::Advanced {
            index: index + 1,
            next: order.stops[index + 1].clone(),
        }
    };

    if let DestinationProgress::Advanced { index, .. } = &progress {
        state.publisher.publish(
            Topic::Order(order_id),
            DomainEvent::RouteProgress {
                order_id,
                index: *index,
                finished: false,
            },
        );
    }
    Ok(progress)
}

pub fn rate_order(
    state: &AppState,
    order_id: i64,
    customer_id: i64,
    rating: u8,
    comment: Option<String>,
) -> Result<Rating, AppError> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::Validation(format!(
            "rating must be between 1 and 5, got {rating}"
        )));
    }

    let order = get_order(state, order_id)?;
    if order.customer_id != customer_id {
        return Err(AppError::Validation(format!(
            "customer {customer_id} did not place order {order_id}"
        )));
    }
    if order.status != OrderStatus::Delivered {
        return Err(AppError::InvalidState(format!(
            "order {order_id} can only be rated once delivered"
        )));
    }
    let courier_id = order.courier_id.ok_or_else(|| {
        AppError::InvalidState(format!("order {order_id} has no courier to rate"))
    })?;

    let record = Rating {
        order_id,
        customer_id,
        courier_id,
        rating,
        comment,
        created_at: Utc::now(),
    };

    match state.ratings.entry(order_id) {
        Entry::Occupied(_) => {
            return Err(AppError::InvalidState(format!(
                "order {order_id} has already been rated"
            )));
        }
        Entry::Vacant(slot) => {
            slot.insert(record.clone());
        }
    }

    if let Some(mut party) = state.parties.get_mut(&courier_id) {
        if let Some(courier) = party.as_courier_mut() {
            let total = courier.rating * f64::from(courier.rating_count) + f64::from(rating);
            courier.rating_count += 1;
            courier.rating = total / f64::from(courier.rating_count);
        }
    }

    info!(order_id, courier_id, rating, "order rated");
    Ok(record)
}

/// Waiting orders inside `radius_km`, highest priority first, then nearest.
pub fn nearby_orders(state: &AppState, point: &GeoPoint, radius_km: f64) -> Vec<NearbyOrder> {
    let mut orders: Vec<NearbyOrder> = state
        .orders
        .iter()
        .filter(|entry| entry.value().status == OrderStatus::Waiting)
        .filter_map(|entry| {
            let order = entry.value();
            let distance_km = haversine_km(point, &order.pickup.location);
            (distance_km <= radius_km).then(|| NearbyOrder {
                order: order.clone(),
                distance_km,
            })
        })
        .collect();

    orders.sort_by(|a, b| {
        b.order
            .priority
            .cmp(&a.order.priority)
            .then(a.distance_km.total_cmp(&b.distance_km))
    });
    orders
}

fn orders_for(state: &AppState, party_id: i64, role: Role) -> Vec<Order> {
    state
        .orders
        .iter()
        .filter(|entry| match role {
            Role::Customer => entry.value().customer_id == party_id,
            Role::Courier => entry.value().courier_id == Some(party_id),
        })
        .map(|entry| entry.value().clone())
        .collect()
}

pub fn active_orders(state: &AppState, party_id: i64, role: Role) -> Vec<Order> {
    let mut orders: Vec<Order> = orders_for(state, party_id, role)
        .into_iter()
        .filter(|order| match role {
            Role::Customer => order.status.is_customer_active(),
            Role::Courier => order.status.is_courier_active(),
        })
        .collect();
    orders.sort_by_key(|order| order.id);
    orders
}

/// Delivered and cancelled orders, newest first.
pub fn order_history(state: &AppState, party_id: i64, role: Role) -> Vec<Order> {
    let mut orders: Vec<Order> = orders_for(state, party_id, role)
        .into_iter()
        .filter(|order| order.status.is_terminal())
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    orders
}

pub fn negotiation_log(state: &AppState, order_id: i64) -> Result<Vec<NegotiationLog>, AppError> {
    if !state.orders.contains_key(&order_id) {
        return Err(AppError::NotFound(format!("order {order_id} not found")));
    }
    Ok(state
        .negotiation_logs
        .get(&order_id)
        .map(|log| log.value().clone())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::{
        accept_order, active_orders, cancel_order, create_order, create_promo_code, get_order,
        nearby_orders, order_history, rate_order, update_destination_progress, update_status,
        CreateOrder, StatusUpdate,
    };
    use crate::config::Config;
    use crate::error::AppError;
    use crate::integrations::events::{DomainEvent, Topic};
    use crate::models::order::{DestinationProgress, OrderStatus, ProofAttachment, Stop};
    use crate::models::party::{GeoPoint, PartyProfile, Role};
    use crate::models::promo::{DiscountType, PromoCode};
    use crate::state::AppState;
    use crate::testing::{
        courier, customer, customer_referred_by, order_request, FixedGeofence,
        RecordingNotifier, RecordingPublisher,
    };

    fn deliver_to_door(state: &AppState, order_id: i64) {
        for status in [OrderStatus::PickedUp, OrderStatus::InDelivery] {
            update_status(
                state,
                order_id,
                StatusUpdate {
                    status,
                    verification_code: None,
                    proof: None,
                },
            )
            .unwrap();
        }
    }

    fn delivered_update(code: &str) -> StatusUpdate {
        StatusUpdate {
            status: OrderStatus::Delivered,
            verification_code: Some(code.to_string()),
            proof: Some(ProofAttachment {
                uri: "s3://proofs/door.jpg".to_string(),
                mime_type: Some("image/jpeg".to_string()),
                note: None,
            }),
        }
    }

    #[test]
    fn new_order_is_waiting_with_code_and_verification() {
        let publisher = Arc::new(RecordingPublisher::default());
        let state = AppState::new(Config::default()).with_publisher(publisher.clone());
        let customer_id = customer(&state);

        let order = create_order(&state, order_request(customer_id, 100)).unwrap();

        assert_eq!(order.status, OrderStatus::Waiting);
        assert!(order.order_code.starts_with("MSR-"));
        assert!(order.order_code.ends_with(&format!("-{:04}", order.id)));
        assert_eq!(order.verification_code.len(), 4);
        assert!(order.verification_code.chars().all(|c| c.is_ascii_digit()));
        assert!(publisher
            .topics()
            .contains(&Topic::CourierBroadcast));
    }

    #[test]
    fn fifth_active_order_is_refused_and_not_stored() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        for _ in 0..4 {
            create_order(&state, order_request(customer_id, 50)).unwrap();
        }

        let err = create_order(&state, order_request(customer_id, 50)).unwrap_err();
        assert!(matches!(err, AppError::LimitExceeded(_)));
        assert_eq!(state.orders.len(), 4);
    }

    #[test]
    fn cancelling_frees_a_customer_slot() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let first = create_order(&state, order_request(customer_id, 50)).unwrap();
        for _ in 0..3 {
            create_order(&state, order_request(customer_id, 50)).unwrap();
        }

        cancel_order(&state, first.id, customer_id).unwrap();
        create_order(&state, order_request(customer_id, 50)).unwrap();
    }

    #[test]
    fn orders_outside_the_geofence_are_refused() {
        let state = AppState::new(Config::default())
            .with_geofence(Arc::new(FixedGeofence { allowed: false }));
        let customer_id = customer(&state);

        let err = create_order(&state, order_request(customer_id, 50)).unwrap_err();
        assert!(matches!(err, AppError::OutOfBounds(_)));
        assert!(state.orders.is_empty());
    }

    #[test]
    fn promo_discount_is_applied_and_counted() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        create_promo_code(
            &state,
            PromoCode {
                code: "save20".to_string(),
                discount_type: DiscountType::Percentage,
                discount_value: Decimal::from(20),
                max_discount: None,
                min_order_value: Decimal::ZERO,
                expires_at: None,
                usage_limit: 1,
                used_count: 0,
                active: true,
            },
        )
        .unwrap();

        let mut request = order_request(customer_id, 100);
        request.promo_code = Some(" SAVE20 ".to_string());
        let order = create_order(&state, request).unwrap();
        assert_eq!(order.price, Decimal::from(80));
        assert_eq!(order.discount, Decimal::from(20));

        let mut again = order_request(customer_id, 100);
        again.promo_code = Some("SAVE20".to_string());
        assert!(matches!(
            create_order(&state, again),
            Err(AppError::Validation(_))
        ));
        // The failed attempt must not keep a customer slot.
        match &state.parties.get(&customer_id).unwrap().profile {
            PartyProfile::Customer(profile) => assert_eq!(profile.active_orders, 1),
            PartyProfile::Courier(_) => unreachable!(),
        }
    }

    #[test]
    fn accepting_a_taken_order_reports_already_taken() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let first = courier(&state, 30.05, 31.23);
        let second = courier(&state, 30.05, 31.24);
        let order = create_order(&state, order_request(customer_id, 60)).unwrap();

        let accepted = accept_order(&state, order.id, first).unwrap();
        assert_eq!(accepted.courier_id, Some(first));
        assert!(accepted.accepted_at.is_some());

        let err = accept_order(&state, order.id, second).unwrap_err();
        assert!(matches!(err, AppError::AlreadyTaken(id) if id == order.id));
        assert_eq!(get_order(&state, order.id).unwrap().courier_id, Some(first));
    }

    #[test]
    fn courier_cannot_hold_more_than_four_orders() {
        let state = AppState::new(Config::default());
        let courier_id = courier(&state, 30.05, 31.23);
        let mut orders = Vec::new();
        for _ in 0..2 {
            let customer_id = customer(&state);
            for _ in 0..3 {
                orders.push(create_order(&state, order_request(customer_id, 40)).unwrap());
            }
        }

        for order in &orders[..4] {
            accept_order(&state, order.id, courier_id).unwrap();
        }
        let err = accept_order(&state, orders[4].id, courier_id).unwrap_err();
        assert!(matches!(err, AppError::LimitExceeded(_)));
        assert_eq!(
            get_order(&state, orders[4].id).unwrap().status,
            OrderStatus::Waiting
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_concurrent_acceptance_wins() {
        let state = Arc::new(AppState::new(Config::default()));
        let customer_id = customer(&state);
        let order_id = create_order(&state, order_request(customer_id, 75)).unwrap().id;
        let couriers: Vec<i64> = (0..16)
            .map(|i| courier(&state, 30.0 + f64::from(i) * 0.001, 31.2))
            .collect();

        let handles: Vec<_> = couriers
            .iter()
            .map(|&courier_id| {
                let state = state.clone();
                tokio::spawn(async move { accept_order(&state, order_id, courier_id) })
            })
            .collect();

        let mut winners = Vec::new();
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(order) => winners.push(order.courier_id),
                Err(AppError::AlreadyTaken(_)) => losers += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(losers, couriers.len() - 1);
        let stored = get_order(&state, order_id).unwrap();
        assert_eq!(stored.status, OrderStatus::Accepted);
        assert_eq!(Some(stored.courier_id), winners.first().copied());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pickups_advance_the_order_once() {
        let state = Arc::new(AppState::new(Config::default()));
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order_id = create_order(&state, order_request(customer_id, 75)).unwrap().id;
        accept_order(&state, order_id, courier_id).unwrap();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move {
                    update_status(
                        &state,
                        order_id,
                        StatusUpdate {
                            status: OrderStatus::PickedUp,
                            verification_code: None,
                            proof: None,
                        },
                    )
                })
            })
            .collect();

        let mut advanced = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(order) => {
                    assert_eq!(order.status, OrderStatus::PickedUp);
                    advanced += 1;
                }
                Err(AppError::InvalidState(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(advanced, 1);
        assert_eq!(
            get_order(&state, order_id).unwrap().status,
            OrderStatus::PickedUp
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_settle_exactly_once() {
        let state = Arc::new(AppState::new(Config::default()));
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order_id = create_order(&state, order_request(customer_id, 100)).unwrap().id;
        accept_order(&state, order_id, courier_id).unwrap();
        deliver_to_door(&state, order_id);
        let code = get_order(&state, order_id).unwrap().verification_code;

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let state = state.clone();
                let update = delivered_update(&code);
                tokio::spawn(async move { update_status(&state, order_id, update) })
            })
            .collect();

        let mut delivered = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(order) => {
                    assert_eq!(order.status, OrderStatus::Delivered);
                    delivered += 1;
                }
                Err(AppError::InvalidState(_)) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(delivered, 1);
        assert_eq!(refused, 11);

        let wallet = state.ledger.get_or_create_wallet(courier_id, Role::Courier);
        assert_eq!(wallet.balance, Decimal::new(9000, 2));
        let log = state.ledger.transactions(wallet.id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].order_id, Some(order_id));
        assert!(active_orders(&state, courier_id, Role::Courier).is_empty());
    }

    #[test]
    fn status_never_skips_or_regresses() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order = create_order(&state, order_request(customer_id, 60)).unwrap();

        let skip = update_status(
            &state,
            order.id,
            StatusUpdate {
                status: OrderStatus::PickedUp,
                verification_code: None,
                proof: None,
            },
        );
        assert!(matches!(skip, Err(AppError::InvalidState(_))));

        accept_order(&state, order.id, courier_id).unwrap();
        deliver_to_door(&state, order.id);
        let code = get_order(&state, order.id).unwrap().verification_code;
        update_status(&state, order.id, delivered_update(&code)).unwrap();

        for status in OrderStatus::ALL {
            let attempt = update_status(
                &state,
                order.id,
                StatusUpdate {
                    status,
                    verification_code: Some(code.clone()),
                    proof: None,
                },
            );
            assert!(attempt.is_err(), "delivered order moved to {status}");
        }
        assert_eq!(
            get_order(&state, order.id).unwrap().status,
            OrderStatus::Delivered
        );
    }

    #[test]
    fn wrong_verification_code_leaves_status_unchanged() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order = create_order(&state, order_request(customer_id, 60)).unwrap();
        accept_order(&state, order.id, courier_id).unwrap();
        deliver_to_door(&state, order.id);
        state.orders.get_mut(&order.id).unwrap().verification_code = "1234".to_string();

        let err = update_status(&state, order.id, delivered_update("9999")).unwrap_err();
        assert!(matches!(err, AppError::BadVerificationCode));
        assert_eq!(
            get_order(&state, order.id).unwrap().status,
            OrderStatus::InDelivery
        );
        let wallet = state.ledger.get_or_create_wallet(courier_id, Role::Courier);
        assert!(state.ledger.transactions(wallet.id).unwrap().is_empty());
    }

    #[test]
    fn repeated_bad_codes_lock_verification() {
        let config = Config {
            max_verification_attempts: 2,
            ..Config::default()
        };
        let state = AppState::new(config);
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order = create_order(&state, order_request(customer_id, 60)).unwrap();
        accept_order(&state, order.id, courier_id).unwrap();
        deliver_to_door(&state, order.id);
        let code = get_order(&state, order.id).unwrap().verification_code;
        let wrong = if code == "0000" { "1111" } else { "0000" };

        for _ in 0..2 {
            assert!(matches!(
                update_status(&state, order.id, delivered_update(wrong)),
                Err(AppError::BadVerificationCode)
            ));
        }
        assert!(matches!(
            update_status(&state, order.id, delivered_update(&code)),
            Err(AppError::VerificationLocked(_))
        ));
    }

    #[test]
    fn delivery_credits_courier_net_of_commission() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order = create_order(&state, order_request(customer_id, 100)).unwrap();
        accept_order(&state, order.id, courier_id).unwrap();
        deliver_to_door(&state, order.id);
        let code = get_order(&state, order.id).unwrap().verification_code;

        let delivered = update_status(&state, order.id, delivered_update(&code)).unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert!(delivered.delivery_proof.is_some());

        let wallet = state.ledger.get_or_create_wallet(courier_id, Role::Courier);
        assert_eq!(wallet.balance, Decimal::new(9000, 2));
        let log = state.ledger.transactions(wallet.id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].amount, Decimal::new(9000, 2));
        assert_eq!(log[0].order_id, Some(order.id));

        assert!(active_orders(&state, courier_id, Role::Courier).is_empty());
        assert_eq!(order_history(&state, customer_id, Role::Customer).len(), 1);
    }

    #[test]
    fn first_delivery_rewards_the_referrer_once() {
        let state = AppState::new(Config::default());
        let referrer_id = customer(&state);
        let customer_id = customer_referred_by(&state, referrer_id);
        let courier_id = courier(&state, 30.05, 31.23);

        for _ in 0..2 {
            let order = create_order(&state, order_request(customer_id, 50)).unwrap();
            accept_order(&state, order.id, courier_id).unwrap();
            deliver_to_door(&state, order.id);
            let code = get_order(&state, order.id).unwrap().verification_code;
            update_status(&state, order.id, delivered_update(&code)).unwrap();
        }

        let wallet = state.ledger.get_or_create_wallet(referrer_id, Role::Customer);
        assert_eq!(wallet.balance, Decimal::from(10));
        assert_eq!(state.ledger.transactions(wallet.id).unwrap().len(), 1);
    }

    #[test]
    fn notifier_failures_do_not_fail_the_transition() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let state = AppState::new(Config::default()).with_notifier(notifier.clone());
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.0444, 31.2357);

        let order = create_order(&state, order_request(customer_id, 60)).unwrap();
        accept_order(&state, order.id, courier_id).unwrap();

        assert!(notifier.count() >= 2);
        assert!(state.metrics.notifications_failed_total.get() >= 2);
    }

    #[test]
    fn destination_progress_is_idempotent_at_the_last_stop() {
        let publisher = Arc::new(RecordingPublisher::default());
        let state = AppState::new(Config::default()).with_publisher(publisher.clone());
        let customer_id = customer(&state);
        let mut request = order_request(customer_id, 60);
        request.stops = vec![
            Stop {
                location: GeoPoint {
                    lat: 30.05,
                    lng: 31.24,
                },
                address: Some("First stop".to_string()),
            },
            Stop {
                location: GeoPoint {
                    lat: 30.06,
                    lng: 31.25,
                },
                address: Some("Second stop".to_string()),
            },
        ];
        let order = create_order(&state, request).unwrap();
        let courier_id = courier(&state, 30.0444, 31.2357);
        accept_order(&state, order.id, courier_id).unwrap();

        let advanced = update_destination_progress(&state, order.id).unwrap();
        assert!(matches!(advanced, DestinationProgress::Advanced { index: 1, .. }));

        let published = publisher.events().len();
        for _ in 0..3 {
            assert_eq!(
                update_destination_progress(&state, order.id).unwrap(),
                DestinationProgress::Finished { index: 1 }
            );
        }
        assert_eq!(publisher.events().len(), published);
        assert_eq!(
            get_order(&state, order.id).unwrap().current_destination_index,
            1
        );
    }

    fn three_stop_request(customer_id: i64) -> CreateOrder {
        let mut request = order_request(customer_id, 60);
        request.stops = [(30.05, 31.24), (30.06, 31.25), (30.07, 31.26)]
            .into_iter()
            .map(|(lat, lng)| Stop {
                location: GeoPoint { lat, lng },
                address: None,
            })
            .collect();
        request
    }

    fn assert_progress_refused(state: &AppState, order_id: i64) {
        assert!(matches!(
            update_destination_progress(state, order_id),
            Err(AppError::InvalidState(_))
        ));
        assert_eq!(
            get_order(state, order_id).unwrap().current_destination_index,
            0
        );
    }

    #[test]
    fn waiting_orders_cannot_progress() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let order = create_order(&state, three_stop_request(customer_id)).unwrap();

        assert_progress_refused(&state, order.id);
    }

    #[test]
    fn delivered_orders_cannot_progress() {
        let publisher = Arc::new(RecordingPublisher::default());
        let state = AppState::new(Config::default()).with_publisher(publisher.clone());
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order = create_order(&state, three_stop_request(customer_id)).unwrap();
        accept_order(&state, order.id, courier_id).unwrap();
        deliver_to_door(&state, order.id);
        let code = get_order(&state, order.id).unwrap().verification_code;
        update_status(&state, order.id, delivered_update(&code)).unwrap();

        let published = publisher.events().len();
        assert_progress_refused(&state, order.id);
        assert_eq!(publisher.events().len(), published);
    }

    #[test]
    fn cancelled_orders_cannot_progress() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let order = create_order(&state, three_stop_request(customer_id)).unwrap();
        cancel_order(&state, order.id, customer_id).unwrap();

        assert_progress_refused(&state, order.id);
    }

    #[test]
    fn rating_requires_delivery_and_happens_once() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order = create_order(&state, order_request(customer_id, 60)).unwrap();
        accept_order(&state, order.id, courier_id).unwrap();

        assert!(matches!(
            rate_order(&state, order.id, customer_id, 4, None),
            Err(AppError::InvalidState(_))
        ));

        deliver_to_door(&state, order.id);
        let code = get_order(&state, order.id).unwrap().verification_code;
        update_status(&state, order.id, delivered_update(&code)).unwrap();

        assert!(matches!(
            rate_order(&state, order.id, customer_id, 6, None),
            Err(AppError::Validation(_))
        ));
        rate_order(&state, order.id, customer_id, 4, Some("quick".to_string())).unwrap();
        assert!(matches!(
            rate_order(&state, order.id, customer_id, 5, None),
            Err(AppError::InvalidState(_))
        ));

        let party = state.parties.get(&courier_id).unwrap();
        let profile = party.as_courier().unwrap();
        assert_eq!(profile.rating_count, 1);
        assert_eq!(profile.rating, 4.0);
    }

    #[test]
    fn nearby_orders_put_fast_tier_first() {
        let state = AppState::new(Config::default());
        let customer_id = customer(&state);
        let standard = create_order(&state, order_request(customer_id, 60)).unwrap();
        let mut fast_request = order_request(customer_id, 60);
        fast_request.tier = crate::models::order::ServiceTier::Fast;
        let fast = create_order(&state, fast_request).unwrap();

        let found = nearby_orders(
            &state,
            &GeoPoint {
                lat: 30.0444,
                lng: 31.2357,
            },
            10.0,
        );
        let ids: Vec<i64> = found.iter().map(|nearby| nearby.order.id).collect();
        assert_eq!(ids, vec![fast.id, standard.id]);
    }

    #[test]
    fn status_changes_reach_the_order_topic() {
        let publisher = Arc::new(RecordingPublisher::default());
        let state = AppState::new(Config::default()).with_publisher(publisher.clone());
        let customer_id = customer(&state);
        let courier_id = courier(&state, 30.05, 31.23);
        let order = create_order(&state, order_request(customer_id, 60)).unwrap();
        accept_order(&state, order.id, courier_id).unwrap();

        assert!(publisher.events().iter().any(|(topic, event)| {
            *topic == Topic::Order(order.id)
                && matches!(
                    event,
                    DomainEvent::OrderStatusChanged {
                        status: OrderStatus::Accepted,
                        ..
                    }
                )
        }));
    }
}
