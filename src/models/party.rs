use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Courier,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Customer => f.write_str("customer"),
            Role::Courier => f.write_str("courier"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// Orders in waiting, accepted, picked_up or in_delivery.
    pub active_orders: u8,
    pub delivered_orders: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierProfile {
    pub location: Option<GeoPoint>,
    pub available: bool,
    pub rating: f64,
    pub rating_count: u32,
    /// Orders in accepted, picked_up or in_delivery.
    pub active_orders: u8,
}

impl Default for CourierProfile {
    fn default() -> Self {
        Self {
            location: None,
            available: true,
            rating: 5.0,
            rating_count: 0,
            active_orders: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum PartyProfile {
    Customer(CustomerProfile),
    Courier(CourierProfile),
}

/// A customer or a courier. The role-specific attributes live in `profile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub profile: PartyProfile,
    pub created_at: DateTime<Utc>,
}

impl Party {
    pub fn role(&self) -> Role {
        match self.profile {
            PartyProfile::Customer(_) => Role::Customer,
            PartyProfile::Courier(_) => Role::Courier,
        }
    }

    pub fn as_courier(&self) -> Option<&CourierProfile> {
        match &self.profile {
            PartyProfile::Courier(profile) => Some(profile),
            PartyProfile::Customer(_) => None,
        }
    }

    pub fn as_courier_mut(&mut self) -> Option<&mut CourierProfile> {
        match &mut self.profile {
            PartyProfile::Courier(profile) => Some(profile),
            PartyProfile::Customer(_) => None,
        }
    }

    pub fn as_customer_mut(&mut self) -> Option<&mut CustomerProfile> {
        match &mut self.profile {
            PartyProfile::Customer(profile) => Some(profile),
            PartyProfile::Courier(_) => None,
        }
    }
}

/// Result of a nearby-courier lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyCourier {
    pub id: i64,
    pub name: String,
    pub location: GeoPoint,
    pub rating: f64,
    pub distance_km: f64,
}
