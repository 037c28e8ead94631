//! The record store behind every storefront operation.
//!
//! `PgStore` is the production implementation. Tests run the same flows
//! against `MemoryStore`, which can inject failures and delays per operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{CheckoutSaga, OrderStatus, OutboxEvent, Role, SnapshotLine};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

#[cfg(test)]
pub mod memory;
pub mod pg;

pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_products(&self, category: Option<&str>) -> StoreResult<Vec<Product>>;
    async fn get_product(&self, product_id: Uuid) -> StoreResult<Option<Product>>;

    async fn cart_lines(&self, user_id: Uuid) -> StoreResult<Vec<CartLineView>>;
    /// Insert or overwrite the quantity of the (user, product) line.
    async fn upsert_cart_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> StoreResult<CartItem>;
    async fn update_cart_quantity(
        &self,
        user_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<CartItem>>;
    async fn remove_cart_line(&self, user_id: Uuid, line_id: Uuid) -> StoreResult<bool>;
    async fn cart_snapshot(&self, user_id: Uuid) -> StoreResult<Vec<SnapshotLine>>;
    async fn clear_cart(&self, user_id: Uuid, product_ids: &[Uuid]) -> StoreResult<usize>;
    async fn restore_cart(&self, user_id: Uuid, lines: &[SnapshotLine]) -> StoreResult<()>;

    async fn find_order_by_key(&self, user_id: Uuid, key: &str) -> StoreResult<Option<Order>>;
    /// Fails with `StoreError::Conflict` when (user, idempotency key) already exists.
    async fn insert_order(&self, order: &NewOrder) -> StoreResult<Order>;
    async fn delete_order(&self, order_id: Uuid) -> StoreResult<()>;
    async fn insert_order_items(&self, items: &[NewOrderItem]) -> StoreResult<()>;
    async fn delete_order_items(&self, order_id: Uuid) -> StoreResult<()>;
    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<OrderWithItems>>;
    async fn all_orders(&self) -> StoreResult<Vec<OrderWithItems>>;
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> StoreResult<Option<Order>>;
    async fn order_summaries(&self) -> StoreResult<Vec<OrderSummary>>;
    async fn sold_items(&self) -> StoreResult<Vec<SoldItem>>;

    async fn has_role(&self, user_id: Uuid, role: Role) -> StoreResult<bool>;

    async fn save_saga(&self, saga: &CheckoutSaga) -> StoreResult<()>;
    /// Every saga started for this (user, idempotency key), oldest first.
    async fn sagas_for_key(&self, user_id: Uuid, key: &str) -> StoreResult<Vec<CheckoutSaga>>;
    async fn stale_sagas(&self, updated_before: DateTime<Utc>) -> StoreResult<Vec<CheckoutSaga>>;

    async fn enqueue_event(&self, event: &OutboxEvent) -> StoreResult<()>;
    /// Unprocessed outbox events, oldest first.
    async fn pending_events(&self, limit: i64) -> StoreResult<Vec<OutboxEvent>>;
    async fn mark_event_processed(&self, event_id: Uuid) -> StoreResult<()>;
}
