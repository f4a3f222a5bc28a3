use serde::{Deserialize, Serialize};

use crate::auth::Role;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartSnapshot {
    pub user_id: String,
    #[serde(default)]
    pub lines: Vec<CartLine>,
    pub total_cents: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderSummary {
    pub order_id: String,
    pub user_id: String,
    pub status: String,
    pub total_cents: i64,
    pub placed_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivery_id: String,
    pub order_id: String,
    pub user_id: String,
    pub status: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
    pub updated_at_ms: i64,
}

/// Read-only snapshot of a customer shown next to a support conversation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportContext {
    pub profile: Option<UserProfile>,
    pub cart: Option<CartSnapshot>,
    pub orders: Vec<OrderSummary>,
    pub deliveries: Vec<DeliverySummary>,
    pub wishlist_product_ids: Vec<String>,
}

impl SupportContext {
    pub fn empty() -> Self {
        Self::default()
    }
}
