use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod locale;
pub mod saga;

pub use saga::*;

pub const ORDER_PLACED: &str = "OrderPlaced";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Display order used by the dashboard and exports.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Đang chờ",
            OrderStatus::Processing => "Đang xử lý",
            OrderStatus::Shipped => "Đang giao",
            OrderStatus::Delivered => "Đã giao",
            OrderStatus::Cancelled => "Đã hủy",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// One cart line as read at checkout, priced with the product price at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub price: BigDecimal,
}

impl SnapshotLine {
    pub fn line_total(&self) -> BigDecimal {
        &self.price * BigDecimal::from(self.quantity)
    }
}

pub fn order_total(lines: &[SnapshotLine]) -> BigDecimal {
    lines
        .iter()
        .fold(BigDecimal::from(0), |sum, line| sum + line.line_total())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub order_id: Uuid,
    pub customer_name: String,
    pub total: BigDecimal,
    pub items: Vec<OrderPlacedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedItem {
    pub name: String,
    pub quantity: i32,
    pub price: BigDecimal,
}

impl OrderPlaced {
    pub fn new(order_id: Uuid, customer_name: &str, lines: &[SnapshotLine]) -> Self {
        Self {
            order_id,
            customer_name: customer_name.to_string(),
            total: order_total(lines),
            items: lines
                .iter()
                .map(|line| OrderPlacedItem {
                    name: line.product_name.clone(),
                    quantity: line.quantity,
                    price: line.price.clone(),
                })
                .collect(),
        }
    }

    pub fn short_id(&self) -> String {
        self.order_id.simple().to_string()[..8].to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(aggregate_id: Uuid, event_type: &str, event_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            event_type: event_type.to_string(),
            event_data,
            processed: false,
            created_at: Utc::now(),
        }
    }

    pub fn order_placed(event: &OrderPlaced) -> serde_json::Result<Self> {
        Ok(Self::new(event.order_id, ORDER_PLACED, serde_json::to_value(event)?))
    }
}
