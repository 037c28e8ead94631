use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub stock: i32,
    pub category: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct NewCartItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A cart line joined with its product, as shown to the shopper.
#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub line_total: BigDecimal,
}

impl CartLineView {
    pub fn new(line: CartItem, product: Product) -> Self {
        Self {
            id: line.id,
            product_id: product.id,
            line_total: &product.price * BigDecimal::from(line.quantity),
            name: product.name,
            price: product.price,
            image_url: product.image_url,
            quantity: line.quantity,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total: BigDecimal,
    pub status: String,
    pub customer_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub district: Option<String>,
    pub ward: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total: BigDecimal,
    pub status: String,
    pub customer_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub district: Option<String>,
    pub ward: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::order_items)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct NewOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
}

impl NewOrderItem {
    pub fn from_snapshot(order_id: Uuid, line: &SnapshotLine) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: line.product_id,
            quantity: line.quantity,
            price: line.price.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub price: BigDecimal,
}

impl OrderItemView {
    pub fn new(item: OrderItem, product_name: Option<String>) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name,
            quantity: item.quantity,
            price: item.price,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItemView>,
}

/// The columns the dashboard needs from `orders`.
#[derive(Debug, Clone, Queryable)]
pub struct OrderSummary {
    pub total: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct SoldItem {
    pub product_name: Option<String>,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::checkout_sagas)]
pub struct DbCheckoutSaga {
    pub id: Uuid,
    pub user_id: Uuid,
    pub idempotency_key: String,
    pub steps: serde_json::Value,
    pub current_step: i32,
    pub status: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&CheckoutSaga> for DbCheckoutSaga {
    type Error = anyhow::Error;

    fn try_from(saga: &CheckoutSaga) -> Result<Self, Self::Error> {
        Ok(Self {
            id: saga.id,
            user_id: saga.user_id,
            idempotency_key: saga.idempotency_key.clone(),
            steps: serde_json::to_value(&saga.steps)?,
            current_step: i32::try_from(saga.current_step)?,
            status: saga.status.as_str().to_string(),
            context: serde_json::to_value(&saga.context)?,
            created_at: saga.created_at,
            updated_at: saga.updated_at,
        })
    }
}

impl TryFrom<DbCheckoutSaga> for CheckoutSaga {
    type Error = anyhow::Error;

    fn try_from(db_saga: DbCheckoutSaga) -> Result<Self, Self::Error> {
        let steps: Vec<SagaStep> = serde_json::from_value(db_saga.steps)?;
        let status = SagaStatus::parse(&db_saga.status)
            .ok_or_else(|| anyhow::anyhow!("unknown saga status {}", db_saga.status))?;
        let context: CheckoutContext = serde_json::from_value(db_saga.context)?;

        Ok(Self {
            id: db_saga.id,
            user_id: db_saga.user_id,
            idempotency_key: db_saga.idempotency_key,
            steps,
            current_step: usize::try_from(db_saga.current_step)?,
            status,
            context,
            created_at: db_saga.created_at,
            updated_at: db_saga.updated_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<DbOutboxEvent> for OutboxEvent {
    fn from(row: DbOutboxEvent) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            event_data: row.event_data,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<&OutboxEvent> for NewOutboxEvent {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type.clone(),
            event_data: event.event_data.clone(),
            created_at: event.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_survives_a_database_round_trip() {
        let mut saga = CheckoutSaga::new(
            Uuid::new_v4(),
            "key-1",
            CheckoutContext {
                order_id: Uuid::new_v4(),
                total: BigDecimal::from(250_000),
                lines: vec![SnapshotLine {
                    product_id: Uuid::new_v4(),
                    product_name: "A".to_string(),
                    quantity: 2,
                    price: BigDecimal::from(100_000),
                }],
            },
        );
        saga.advance_step();
        saga.set_status(SagaStatus::InProgress);

        let row = DbCheckoutSaga::try_from(&saga).unwrap();
        assert_eq!(row.status, "InProgress");
        assert_eq!(row.current_step, 1);

        let restored = CheckoutSaga::try_from(row).unwrap();
        assert_eq!(restored, saga);
    }

    #[test]
    fn unknown_saga_status_is_rejected() {
        let saga = CheckoutSaga::new(
            Uuid::new_v4(),
            "key-2",
            CheckoutContext {
                order_id: Uuid::new_v4(),
                total: BigDecimal::from(0),
                lines: Vec::new(),
            },
        );
        let mut row = DbCheckoutSaga::try_from(&saga).unwrap();
        row.status = "Approved".to_string();

        assert!(CheckoutSaga::try_from(row).is_err());
    }

    #[test]
    fn cart_line_view_prices_the_line() {
        let product = Product {
            id: Uuid::new_v4(),
            name: "Màn hình 27\"".to_string(),
            description: None,
            price: BigDecimal::from(4_500_000),
            stock: 3,
            category: "monitor".to_string(),
            image_url: None,
            created_at: Utc::now(),
        };
        let line = CartItem {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            product_id: product.id,
            quantity: 2,
            created_at: Utc::now(),
        };

        let view = CartLineView::new(line, product);
        assert_eq!(view.line_total, BigDecimal::from(9_000_000));
    }
}
