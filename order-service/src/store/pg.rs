use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::upsert::excluded;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::{CheckoutSaga, OrderStatus, OutboxEvent, Role, SagaStatus, SnapshotLine};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult};
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Adds a server-side `statement_timeout` a little under `limit` to a Postgres URL.
///
/// A statement the caller stopped waiting for is then cancelled by the server
/// rather than committing after its saga has already been compensated.
pub fn with_statement_timeout(url: &str, limit: Duration) -> String {
    let millis = (limit.as_millis() * 4 / 5).max(1);
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}options=-c%20statement_timeout%3D{}", url, separator, millis)
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Conflict,
            DieselError::NotFound => StoreError::NotFound,
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

async fn load_orders(
    conn: &mut AsyncPgConnection,
    user_id: Option<Uuid>,
) -> StoreResult<Vec<OrderWithItems>> {
    let orders: Vec<Order> = match user_id {
        Some(user_id) => {
            orders::table
                .filter(orders::user_id.eq(user_id))
                .order(orders::created_at.desc())
                .select(Order::as_select())
                .load(conn)
                .await?
        }
        None => {
            orders::table
                .order(orders::created_at.desc())
                .select(Order::as_select())
                .load(conn)
                .await?
        }
    };

    let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
    let items: Vec<(OrderItem, Option<String>)> = order_items::table
        .left_join(products::table)
        .filter(order_items::order_id.eq_any(&order_ids))
        .select((OrderItem::as_select(), products::name.nullable()))
        .load(conn)
        .await?;

    let mut by_order: HashMap<Uuid, Vec<OrderItemView>> = HashMap::new();
    for (item, product_name) in items {
        by_order
            .entry(item.order_id)
            .or_default()
            .push(OrderItemView::new(item, product_name));
    }

    Ok(orders
        .into_iter()
        .map(|order| OrderWithItems {
            items: by_order.remove(&order.id).unwrap_or_default(),
            order,
        })
        .collect())
}

#[async_trait]
impl RecordStore for PgStore {
    async fn list_products(&self, category: Option<&str>) -> StoreResult<Vec<Product>> {
        let mut conn = self.conn().await?;
        let rows = match category {
            Some(category) => {
                products::table
                    .filter(products::category.eq(category))
                    .order(products::created_at.desc())
                    .select(Product::as_select())
                    .load(&mut conn)
                    .await?
            }
            None => {
                products::table
                    .order(products::created_at.desc())
                    .select(Product::as_select())
                    .load(&mut conn)
                    .await?
            }
        };
        Ok(rows)
    }

    async fn get_product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        let mut conn = self.conn().await?;
        let product = products::table
            .find(product_id)
            .select(Product::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn cart_lines(&self, user_id: Uuid) -> StoreResult<Vec<CartLineView>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(CartItem, Product)> = cart_items::table
            .inner_join(products::table)
            .filter(cart_items::user_id.eq(user_id))
            .order(cart_items::created_at.asc())
            .select((CartItem::as_select(), Product::as_select()))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(line, product)| CartLineView::new(line, product))
            .collect())
    }

    async fn upsert_cart_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> StoreResult<CartItem> {
        let mut conn = self.conn().await?;
        let new_line = NewCartItem {
            id: Uuid::new_v4(),
            user_id,
            product_id,
            quantity,
        };

        let line = diesel::insert_into(cart_items::table)
            .values(&new_line)
            .on_conflict((cart_items::user_id, cart_items::product_id))
            .do_update()
            .set(cart_items::quantity.eq(excluded(cart_items::quantity)))
            .returning(CartItem::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(line)
    }

    async fn update_cart_quantity(
        &self,
        user_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<CartItem>> {
        let mut conn = self.conn().await?;
        let line = diesel::update(
            cart_items::table
                .filter(cart_items::id.eq(line_id))
                .filter(cart_items::user_id.eq(user_id)),
        )
        .set(cart_items::quantity.eq(quantity))
        .returning(CartItem::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;
        Ok(line)
    }

    async fn remove_cart_line(&self, user_id: Uuid, line_id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            cart_items::table
                .filter(cart_items::id.eq(line_id))
                .filter(cart_items::user_id.eq(user_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }

    async fn cart_snapshot(&self, user_id: Uuid) -> StoreResult<Vec<SnapshotLine>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(Uuid, String, i32, BigDecimal)> = cart_items::table
            .inner_join(products::table)
            .filter(cart_items::user_id.eq(user_id))
            .order(cart_items::created_at.asc())
            .select((
                cart_items::product_id,
                products::name,
                cart_items::quantity,
                products::price,
            ))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(product_id, product_name, quantity, price)| SnapshotLine {
                product_id,
                product_name,
                quantity,
                price,
            })
            .collect())
    }

    async fn clear_cart(&self, user_id: Uuid, product_ids: &[Uuid]) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            cart_items::table
                .filter(cart_items::user_id.eq(user_id))
                .filter(cart_items::product_id.eq_any(product_ids)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted)
    }

    async fn restore_cart(&self, user_id: Uuid, lines: &[SnapshotLine]) -> StoreResult<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let rows: Vec<NewCartItem> = lines
            .iter()
            .map(|line| NewCartItem {
                id: Uuid::new_v4(),
                user_id,
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect();

        diesel::insert_into(cart_items::table)
            .values(&rows)
            .on_conflict((cart_items::user_id, cart_items::product_id))
            .do_update()
            .set(cart_items::quantity.eq(excluded(cart_items::quantity)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn find_order_by_key(&self, user_id: Uuid, key: &str) -> StoreResult<Option<Order>> {
        let mut conn = self.conn().await?;
        let order = orders::table
            .filter(orders::user_id.eq(user_id))
            .filter(orders::idempotency_key.eq(key))
            .select(Order::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn insert_order(&self, order: &NewOrder) -> StoreResult<Order> {
        let mut conn = self.conn().await?;
        let order = diesel::insert_into(orders::table)
            .values(order)
            .returning(Order::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(order)
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::delete(orders::table.filter(orders::id.eq(order_id)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_order_items(&self, items: &[NewOrderItem]) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(order_items::table)
            .values(items)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_order_items(&self, order_id: Uuid) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::delete(order_items::table.filter(order_items::order_id.eq(order_id)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<OrderWithItems>> {
        let mut conn = self.conn().await?;
        load_orders(&mut conn, Some(user_id)).await
    }

    async fn all_orders(&self) -> StoreResult<Vec<OrderWithItems>> {
        let mut conn = self.conn().await?;
        load_orders(&mut conn, None).await
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> StoreResult<Option<Order>> {
        let mut conn = self.conn().await?;
        let order = diesel::update(orders::table.filter(orders::id.eq(order_id)))
            .set((
                orders::status.eq(status.as_str()),
                orders::updated_at.eq(Utc::now()),
            ))
            .returning(Order::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn order_summaries(&self) -> StoreResult<Vec<OrderSummary>> {
        let mut conn = self.conn().await?;
        let rows = orders::table
            .order(orders::created_at.asc())
            .select((orders::total, orders::status, orders::created_at))
            .load::<OrderSummary>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn sold_items(&self) -> StoreResult<Vec<SoldItem>> {
        let mut conn = self.conn().await?;
        let rows = order_items::table
            .left_join(products::table)
            .select((
                products::name.nullable(),
                order_items::quantity,
                order_items::price,
            ))
            .load::<SoldItem>(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn has_role(&self, user_id: Uuid, role: Role) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let found = diesel::select(diesel::dsl::exists(
            user_roles::table
                .filter(user_roles::user_id.eq(user_id))
                .filter(user_roles::role.eq(role.as_str())),
        ))
        .get_result::<bool>(&mut conn)
        .await?;
        Ok(found)
    }

    async fn save_saga(&self, saga: &CheckoutSaga) -> StoreResult<()> {
        let row = DbCheckoutSaga::try_from(saga).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut conn = self.conn().await?;
        diesel::insert_into(checkout_sagas::table)
            .values(&row)
            .on_conflict(checkout_sagas::id)
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn sagas_for_key(&self, user_id: Uuid, key: &str) -> StoreResult<Vec<CheckoutSaga>> {
        let mut conn = self.conn().await?;
        let rows = checkout_sagas::table
            .filter(checkout_sagas::user_id.eq(user_id))
            .filter(checkout_sagas::idempotency_key.eq(key))
            .order(checkout_sagas::created_at.asc())
            .select(DbCheckoutSaga::as_select())
            .load(&mut conn)
            .await?;

        rows.into_iter()
            .map(|row| CheckoutSaga::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string())))
            .collect()
    }

    async fn stale_sagas(&self, updated_before: DateTime<Utc>) -> StoreResult<Vec<CheckoutSaga>> {
        let unsettled: Vec<&str> = SagaStatus::UNSETTLED.iter().map(|s| s.as_str()).collect();
        let mut conn = self.conn().await?;
        let rows = checkout_sagas::table
            .filter(checkout_sagas::status.eq_any(unsettled))
            .filter(checkout_sagas::updated_at.lt(updated_before))
            .order(checkout_sagas::updated_at.asc())
            .limit(100)
            .select(DbCheckoutSaga::as_select())
            .load(&mut conn)
            .await?;

        rows.into_iter()
            .map(|row| CheckoutSaga::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string())))
            .collect()
    }

    async fn enqueue_event(&self, event: &OutboxEvent) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(outbox_events::table)
            .values(NewOutboxEvent::from(event))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn pending_events(&self, limit: i64) -> StoreResult<Vec<OutboxEvent>> {
        let mut conn = self.conn().await?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::update(outbox_events::table.filter(outbox_events::id.eq(event_id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
