use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent (0-100) for `Percentage`, currency amount for `Fixed`.
    pub discount_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub min_order_value: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_limit: u32,
    pub used_count: u32,
    pub active: bool,
}
