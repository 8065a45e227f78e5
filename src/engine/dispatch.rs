//! Fan-out that accompanies state changes: pushes to interested parties,
//! real-time events and aggregate stats. Nothing here can fail the change
//! that triggered it.

use serde_json::json;
use tracing::{info, warn};

use crate::engine::parties::nearby_available_couriers;
use crate::integrations::events::{DomainEvent, Topic};
use crate::integrations::notifier::Notification;
use crate::models::order::{Order, OrderStatus};
use crate::models::party::Role;
use crate::models::wallet::Wallet;
use crate::state::AppState;

pub fn notify_best_effort(state: &AppState, notification: Notification) {
    if !state.notifier.notify(&notification) {
        state.metrics.notifications_failed_total.inc();
        warn!(
            user_id = notification.user_id,
            role = %notification.role,
            title = %notification.title,
            "push notification not delivered"
        );
    }
}

/// Tells nearby available couriers about a freshly created order.
pub fn announce_new_order(state: &AppState, order: &Order) {
    state.metrics.orders_created_total.inc();
    state.metrics.active_orders.inc();

    let couriers = nearby_available_couriers(
        state,
        &order.pickup.location,
        state.config.dispatch_radius_km,
    );

    for courier in &couriers {
        notify_best_effort(
            state,
            Notification {
                user_id: courier.id,
                role: Role::Courier,
                title: "New delivery request nearby".to_string(),
                body: format!(
                    "Order {} is {:.1} km away, {} offered",
                    order.order_code, courier.distance_km, order.price
                ),
                data: json!({ "type": "new_order", "order_id": order.id }),
            },
        );
    }

    state.publisher.publish(
        Topic::CourierBroadcast,
        DomainEvent::NewOrder {
            order_id: order.id,
            order_code: order.order_code.clone(),
            pickup: order.pickup.location,
            dropoff: order.dropoff.location,
            price: order.price,
            priority: order.priority,
        },
    );

    info!(
        order_id = order.id,
        priority = order.priority,
        notified_couriers = couriers.len(),
        "new order dispatched"
    );
}

/// Publishes a status change and tells the customer about it.
pub fn announce_status(state: &AppState, order: &Order) {
    state
        .metrics
        .order_transitions_total
        .with_label_values(&[order.status.as_str()])
        .inc();
    if order.status.is_terminal() {
        state.metrics.active_orders.dec();
    }

    let event = DomainEvent::OrderStatusChanged {
        order_id: order.id,
        status: order.status,
        courier_id: order.courier_id,
    };
    state.publisher.publish(Topic::Order(order.id), event.clone());
    state.publisher.publish(Topic::User(order.customer_id), event);

    let body = match order.status {
        OrderStatus::Waiting => "Your order is waiting for a courier".to_string(),
        OrderStatus::Accepted => "A courier accepted your order".to_string(),
        OrderStatus::PickedUp => "Your order has been picked up".to_string(),
        OrderStatus::InDelivery => "Your order is on its way".to_string(),
        OrderStatus::Delivered => "Your order has been delivered".to_string(),
        OrderStatus::Cancelled => "Your order was cancelled".to_string(),
    };
    notify_best_effort(
        state,
        Notification {
            user_id: order.customer_id,
            role: Role::Customer,
            title: format!("Order {}", order.order_code),
            body,
            data: json!({
                "type": "order_status",
                "order_id": order.id,
                "status": order.status,
            }),
        },
    );

    info!(order_id = order.id, status = %order.status, "order status changed");
}

pub fn announce_wallet(state: &AppState, wallet: &Wallet) {
    state.publisher.publish(
        Topic::User(wallet.user_id),
        DomainEvent::WalletUpdated {
            wallet_id: wallet.id,
            user_id: wallet.user_id,
            balance: wallet.balance,
        },
    );
}
