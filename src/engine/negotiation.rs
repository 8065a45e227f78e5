//! Courier-proposes / customer-responds price setting on a waiting order.
//!
//! Under [`ProposalPolicy::Exclusive`] one courier's proposal holds the order
//! until it is answered. Under [`ProposalPolicy::Open`] each courier keeps one
//! standing offer and the customer picks which one to accept.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;

use crate::config::ProposalPolicy;
use crate::engine::dispatch::{announce_status, notify_best_effort};
use crate::engine::parties::{ensure_role, reserve_courier_slot};
use crate::engine::pricing::round_money;
use crate::error::AppError;
use crate::integrations::events::{DomainEvent, Topic};
use crate::integrations::notifier::Notification;
use crate::models::negotiation::{NegotiationAction, NegotiationLog, ProposalResponse};
use crate::models::order::{NegotiationStatus, Order, OrderStatus, PriceOffer};
use crate::models::party::Role;
use crate::state::AppState;

pub(crate) fn append_log(
    state: &AppState,
    order_id: i64,
    sender_role: Role,
    courier_id: i64,
    action: NegotiationAction,
    price: Option<Decimal>,
) -> NegotiationLog {
    let entry = NegotiationLog {
        id: state.next_log_id(),
        order_id,
        sender_role,
        courier_id,
        action,
        price,
        created_at: Utc::now(),
    };
    state
        .negotiation_logs
        .entry(order_id)
        .or_default()
        .push(entry.clone());
    entry
}

fn publish_negotiation(state: &AppState, order: &Order, entry: &NegotiationLog) {
    let event = DomainEvent::NegotiationUpdated {
        order_id: order.id,
        courier_id: entry.courier_id,
        action: entry.action,
        price: entry.price,
    };
    state.publisher.publish(Topic::Order(order.id), event.clone());
    state.publisher.publish(Topic::User(order.customer_id), event.clone());
    state.publisher.publish(Topic::User(entry.courier_id), event);
}

pub fn propose_price(
    state: &AppState,
    order_id: i64,
    courier_id: i64,
    price: Decimal,
) -> Result<Order, AppError> {
    if price <= Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "proposed price must be positive, got {price}"
        )));
    }
    let price = round_money(price);
    ensure_role(state, courier_id, Role::Courier)?;

    let (order, entry) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status != OrderStatus::Waiting {
            return Err(AppError::InvalidState(format!(
                "cannot propose a price on order {order_id} while it is {}",
                order.status
            )));
        }

        let pending_from_other = order.negotiation_status == NegotiationStatus::CourierProposal
            && order.courier_id.is_some_and(|holder| holder != courier_id);
        if state.config.proposal_policy == ProposalPolicy::Exclusive && pending_from_other {
            return Err(AppError::ProposalInProgress(order_id));
        }

        let offer = PriceOffer {
            courier_id,
            price,
            proposed_at: Utc::now(),
        };
        match order.offers.iter_mut().find(|o| o.courier_id == courier_id) {
            Some(existing) => *existing = offer,
            None => order.offers.push(offer),
        }

        order.proposed_price = Some(price);
        order.negotiation_status = NegotiationStatus::CourierProposal;
        order.courier_id = Some(courier_id);

        let entry = append_log(
            state,
            order_id,
            Role::Courier,
            courier_id,
            NegotiationAction::Proposal,
            Some(price),
        );
        (order.clone(), entry)
    };

    info!(order_id, courier_id, price = %price, "price proposed");
    publish_negotiation(state, &order, &entry);
    notify_best_effort(
        state,
        Notification {
            user_id: order.customer_id,
            role: Role::Customer,
            title: "New price offer".to_string(),
            body: format!("A courier offered {price} for order {}", order.order_code),
            data: json!({
                "type": "price_proposal",
                "order_id": order_id,
                "courier_id": courier_id,
                "price": price,
            }),
        },
    );

    Ok(order)
}

/// The customer's answer to `courier_id`'s standing offer.
pub fn respond_to_proposal(
    state: &AppState,
    order_id: i64,
    courier_id: i64,
    response: ProposalResponse,
) -> Result<Order, AppError> {
    let (order, entry) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status != OrderStatus::Waiting
            || order.negotiation_status != NegotiationStatus::CourierProposal
        {
            return Err(AppError::InvalidState(format!(
                "order {order_id} has no pending proposal"
            )));
        }

        let position = order
            .offers
            .iter()
            .position(|offer| offer.courier_id == courier_id)
            .ok_or_else(|| {
                AppError::InvalidState(format!(
                    "courier {courier_id} has no pending proposal on order {order_id}"
                ))
            })?;

        let entry = match response {
            ProposalResponse::Accept => {
                reserve_courier_slot(state, courier_id)?;

                let offer = order.offers.remove(position);
                order.price = offer.price;
                order.proposed_price = Some(offer.price);
                order.status = OrderStatus::Accepted;
                order.negotiation_status = NegotiationStatus::Accepted;
                order.courier_id = Some(courier_id);
                order.accepted_at = Some(Utc::now());
                order.offers.clear();

                append_log(
                    state,
                    order_id,
                    Role::Customer,
                    courier_id,
                    NegotiationAction::Acceptance,
                    Some(offer.price),
                )
            }
            ProposalResponse::Reject => {
                order.offers.remove(position);
                match order.offers.iter().max_by_key(|offer| offer.proposed_at).cloned() {
                    Some(latest) => {
                        order.proposed_price = Some(latest.price);
                        order.courier_id = Some(latest.courier_id);
                    }
                    None => {
                        order.proposed_price = None;
                        order.courier_id = None;
                        order.negotiation_status = NegotiationStatus::None;
                    }
                }

                append_log(
                    state,
                    order_id,
                    Role::Customer,
                    courier_id,
                    NegotiationAction::Rejection,
                    None,
                )
            }
        };
        (order.clone(), entry)
    };

    info!(order_id, courier_id, response = ?response, "proposal answered");
    publish_negotiation(state, &order, &entry);

    let (title, body) = match response {
        ProposalResponse::Accept => (
            "Offer accepted",
            format!("Your offer of {} for order {} was accepted", order.price, order.order_code),
        ),
        ProposalResponse::Reject => (
            "Offer declined",
            format!("Your offer for order {} was declined", order.order_code),
        ),
    };
    notify_best_effort(
        state,
        Notification {
            user_id: courier_id,
            role: Role::Courier,
            title: title.to_string(),
            body,
            data: json!({ "type": "proposal_response", "order_id": order_id }),
        },
    );
    if response == ProposalResponse::Accept {
        announce_status(state, &order);
    }

    Ok(order)
}
