//! Collaborator doubles and fixtures shared by the unit tests.

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::engine::orders::CreateOrder;
use crate::engine::parties::{register_party, Registration};
use crate::integrations::events::{DomainEvent, EventPublisher, Topic};
use crate::integrations::geofence::{Geofence, GeofenceVerdict};
use crate::integrations::notifier::{Notification, Notifier};
use crate::models::order::{ServiceTier, Stop};
use crate::models::party::{GeoPoint, Role};
use crate::state::AppState;

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(Topic, DomainEvent)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(Topic, DomainEvent)> {
        self.events.lock().clone()
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.events.lock().iter().map(|(topic, _)| topic.clone()).collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, topic: Topic, event: DomainEvent) {
        self.events.lock().push((topic, event));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Records every push and reports each one as undeliverable.
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> bool {
        self.sent.lock().push(notification.clone());
        !self.fail
    }
}

pub struct FixedGeofence {
    pub allowed: bool,
}

impl Geofence for FixedGeofence {
    fn check(&self, _point: &GeoPoint) -> GeofenceVerdict {
        GeofenceVerdict {
            allowed: self.allowed,
            distance_km: None,
            radius_km: None,
        }
    }
}

fn register(
    state: &AppState,
    name: &str,
    role: Role,
    referred_by: Option<String>,
    location: Option<GeoPoint>,
) -> i64 {
    register_party(
        state,
        Registration {
            name: name.to_string(),
            phone: None,
            role,
            referred_by,
            location,
        },
    )
    .expect("register test party")
    .id
}

pub fn customer(state: &AppState) -> i64 {
    register(state, "Customer", Role::Customer, None, None)
}

pub fn customer_referred_by(state: &AppState, referrer_id: i64) -> i64 {
    let code = state
        .parties
        .get(&referrer_id)
        .map(|party| party.referral_code.clone())
        .expect("referrer exists");
    register(state, "Invited customer", Role::Customer, Some(code), None)
}

pub fn courier(state: &AppState, lat: f64, lng: f64) -> i64 {
    register(state, "Courier", Role::Courier, None, Some(GeoPoint { lat, lng }))
}

/// A downtown Cairo trip of roughly 2 km.
pub fn order_request(customer_id: i64, price: i64) -> CreateOrder {
    CreateOrder {
        customer_id,
        pickup: Stop {
            location: GeoPoint {
                lat: 30.0444,
                lng: 31.2357,
            },
            address: Some("Tahrir Square".to_string()),
        },
        dropoff: Stop {
            location: GeoPoint {
                lat: 30.0626,
                lng: 31.2497,
            },
            address: Some("Ramses Station".to_string()),
        },
        stops: Vec::new(),
        details: None,
        price: Decimal::from(price),
        tier: ServiceTier::Standard,
        scheduled_at: None,
        promo_code: None,
    }
}
