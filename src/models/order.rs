use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::party::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Waiting,
    Accepted,
    PickedUp,
    InDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Waiting,
        OrderStatus::Accepted,
        OrderStatus::PickedUp,
        OrderStatus::InDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Waiting => "waiting",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InDelivery => "in_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// The only forward step out of this status, if any.
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Waiting => Some(OrderStatus::Accepted),
            OrderStatus::Accepted => Some(OrderStatus::PickedUp),
            OrderStatus::PickedUp => Some(OrderStatus::InDelivery),
            OrderStatus::InDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Counts against a courier's concurrent-order cap.
    pub fn is_courier_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted | OrderStatus::PickedUp | OrderStatus::InDelivery
        )
    }

    /// Counts against a customer's concurrent-order cap.
    pub fn is_customer_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    None,
    CourierProposal,
    CustomerCounter,
    Accepted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Economic,
    #[default]
    Standard,
    Fast,
}

impl ServiceTier {
    /// Dispatch priority, higher is dispatched first.
    pub fn priority(self) -> u8 {
        match self {
            ServiceTier::Economic => 1,
            ServiceTier::Standard => 2,
            ServiceTier::Fast => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub location: GeoPoint,
    pub address: Option<String>,
}

/// Opaque attachment metadata captured at pickup or delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofAttachment {
    pub uri: String,
    pub mime_type: Option<String>,
    pub note: Option<String>,
}

/// A standing courier price offer on a waiting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOffer {
    pub courier_id: i64,
    pub price: Decimal,
    pub proposed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_code: String,
    pub customer_id: i64,
    pub courier_id: Option<i64>,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub stops: Vec<Stop>,
    pub details: Option<String>,
    pub price: Decimal,
    pub discount: Decimal,
    pub proposed_price: Option<Decimal>,
    pub promo_code: Option<String>,
    pub tier: ServiceTier,
    pub priority: u8,
    pub status: OrderStatus,
    pub negotiation_status: NegotiationStatus,
    #[serde(skip_serializing)]
    pub offers: Vec<PriceOffer>,
    #[serde(skip_serializing)]
    pub verification_code: String,
    #[serde(skip_serializing)]
    pub failed_verification_attempts: u8,
    pub pickup_proof: Option<ProofAttachment>,
    pub delivery_proof: Option<ProofAttachment>,
    pub current_destination_index: usize,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Builds the human-readable code `MSR-YYYYMMDD-####` for a freshly inserted order.
pub fn order_code(id: i64, created_at: DateTime<Utc>) -> String {
    format!("MSR-{}-{:04}", created_at.format("%Y%m%d"), id)
}

/// Result of advancing a multi-stop order to its next destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "progress", rename_all = "snake_case")]
pub enum DestinationProgress {
    Advanced { index: usize, next: Stop },
    Finished { index: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub order_id: i64,
    pub customer_id: i64,
    pub courier_id: i64,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
