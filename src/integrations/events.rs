use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::negotiation::NegotiationAction;
use crate::models::order::OrderStatus;
use crate::models::party::GeoPoint;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Topic {
    Order(i64),
    User(i64),
    CourierBroadcast,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Order(id) => write!(f, "order:{id}"),
            Topic::User(id) => write!(f, "user:{id}"),
            Topic::CourierBroadcast => f.write_str("courier-broadcast"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw == "courier-broadcast" {
            return Ok(Topic::CourierBroadcast);
        }

        let (kind, id) = raw
            .split_once(':')
            .ok_or_else(|| format!("unknown topic '{raw}'"))?;
        let id = id
            .parse::<i64>()
            .map_err(|err| format!("invalid id in topic '{raw}': {err}"))?;

        match kind {
            "order" => Ok(Topic::Order(id)),
            "user" => Ok(Topic::User(id)),
            _ => Err(format!("unknown topic '{raw}'")),
        }
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

impl TryFrom<String> for Topic {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    NewOrder {
        order_id: i64,
        order_code: String,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        price: Decimal,
        priority: u8,
    },
    OrderStatusChanged {
        order_id: i64,
        status: OrderStatus,
        courier_id: Option<i64>,
    },
    NegotiationUpdated {
        order_id: i64,
        courier_id: i64,
        action: NegotiationAction,
        price: Option<Decimal>,
    },
    WalletUpdated {
        wallet_id: i64,
        user_id: i64,
        balance: Decimal,
    },
    RouteProgress {
        order_id: i64,
        index: usize,
        finished: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub topic: Topic,
    pub event: DomainEvent,
    pub emitted_at: DateTime<Utc>,
}

/// Fire-and-forget real-time fan-out. Publishing never fails the caller.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: Topic, event: DomainEvent);
}

pub struct BroadcastPublisher {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastPublisher {
    pub fn new(tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, topic: Topic, event: DomainEvent) {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            topic,
            event,
            emitted_at: Utc::now(),
        };

        if let Err(err) = self.tx.send(envelope) {
            trace!(topic = %err.0.topic, "event dropped: no subscribers");
        }
    }
}
