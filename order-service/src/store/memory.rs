use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use shared::{CheckoutSaga, OrderStatus, OutboxEvent, Role, SnapshotLine};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{RecordStore, StoreError, StoreResult};
use crate::models::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CartSnapshot,
    InsertOrder,
    InsertOrderItems,
    ClearCart,
    RestoreCart,
    DeleteOrder,
    DeleteOrderItems,
    SaveSaga,
    EnqueueEvent,
    MarkEventProcessed,
}

#[derive(Default)]
struct Tables {
    products: Vec<Product>,
    cart_items: Vec<CartItem>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
    roles: HashSet<(Uuid, &'static str)>,
    sagas: HashMap<Uuid, CheckoutSaga>,
    events: Vec<OutboxEvent>,
}

/// In-process record store with per-operation failure and delay injection.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: Mutex<HashSet<Op>>,
    stalls: Mutex<HashMap<Op, Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    pub fn stall(&self, op: Op, delay: Duration) {
        self.stalls.lock().unwrap().insert(op, delay);
    }

    pub fn unstall(&self, op: Op) {
        self.stalls.lock().unwrap().remove(&op);
    }

    async fn enter(&self, op: Op) -> StoreResult<()> {
        let delay = self.stalls.lock().unwrap().get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&op) {
            return Err(StoreError::Unavailable(format!("injected failure in {:?}", op)));
        }
        Ok(())
    }

    pub fn add_product(&self, name: &str, price: i64) -> Uuid {
        let product = Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            price: BigDecimal::from(price),
            stock: 10,
            category: "monitor".to_string(),
            image_url: None,
            created_at: Utc::now(),
        };
        let id = product.id;
        self.tables().products.push(product);
        id
    }

    pub fn set_price(&self, product_id: Uuid, price: i64) {
        let mut tables = self.tables();
        if let Some(product) = tables.products.iter_mut().find(|p| p.id == product_id) {
            product.price = BigDecimal::from(price);
        }
    }

    pub fn grant(&self, user_id: Uuid, role: Role) {
        self.tables().roles.insert((user_id, role.as_str()));
    }

    pub fn put_cart_line(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        let mut tables = self.tables();
        upsert_line(&mut tables, user_id, product_id, quantity);
    }

    /// Seed an order directly, bypassing checkout.
    pub fn seed_order(
        &self,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        items: &[(Uuid, i32, i64)],
    ) -> Uuid {
        let order_id = Uuid::new_v4();
        let total = items.iter().fold(BigDecimal::from(0), |sum, (_, quantity, price)| {
            sum + BigDecimal::from(*price) * BigDecimal::from(*quantity)
        });
        let mut tables = self.tables();
        tables.orders.push(Order {
            id: order_id,
            user_id: Uuid::new_v4(),
            total,
            status: status.as_str().to_string(),
            customer_name: "Seed".to_string(),
            phone: "0900000000".to_string(),
            address: "1 Seed St".to_string(),
            city: "Hà Nội".to_string(),
            district: None,
            ward: None,
            notes: None,
            idempotency_key: order_id.to_string(),
            created_at,
            updated_at: created_at,
        });
        for (product_id, quantity, price) in items {
            tables.order_items.push(OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: *product_id,
                quantity: *quantity,
                price: BigDecimal::from(*price),
            });
        }
        order_id
    }

    pub fn orders(&self) -> Vec<Order> {
        self.tables().orders.clone()
    }

    pub fn order_items(&self) -> Vec<OrderItem> {
        self.tables().order_items.clone()
    }

    pub fn cart(&self, user_id: Uuid) -> Vec<CartItem> {
        self.tables()
            .cart_items
            .iter()
            .filter(|line| line.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn sagas(&self) -> Vec<CheckoutSaga> {
        self.tables().sagas.values().cloned().collect()
    }

    pub fn events(&self) -> Vec<OutboxEvent> {
        self.tables().events.clone()
    }
}

fn upsert_line(tables: &mut Tables, user_id: Uuid, product_id: Uuid, quantity: i32) -> CartItem {
    if let Some(line) = tables
        .cart_items
        .iter_mut()
        .find(|line| line.user_id == user_id && line.product_id == product_id)
    {
        line.quantity = quantity;
        return line.clone();
    }

    let line = CartItem {
        id: Uuid::new_v4(),
        user_id,
        product_id,
        quantity,
        created_at: Utc::now(),
    };
    tables.cart_items.push(line.clone());
    line
}

fn with_items(tables: &Tables, order: &Order) -> OrderWithItems {
    let items = tables
        .order_items
        .iter()
        .filter(|item| item.order_id == order.id)
        .map(|item| {
            let name = tables
                .products
                .iter()
                .find(|p| p.id == item.product_id)
                .map(|p| p.name.clone());
            OrderItemView::new(item.clone(), name)
        })
        .collect();
    OrderWithItems {
        order: order.clone(),
        items,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_products(&self, category: Option<&str>) -> StoreResult<Vec<Product>> {
        let tables = self.tables();
        let mut products: Vec<Product> = tables
            .products
            .iter()
            .filter(|p| category.map_or(true, |c| p.category == c))
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn get_product(&self, product_id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self
            .tables()
            .products
            .iter()
            .find(|p| p.id == product_id)
            .cloned())
    }

    async fn cart_lines(&self, user_id: Uuid) -> StoreResult<Vec<CartLineView>> {
        let tables = self.tables();
        Ok(tables
            .cart_items
            .iter()
            .filter(|line| line.user_id == user_id)
            .filter_map(|line| {
                tables
                    .products
                    .iter()
                    .find(|p| p.id == line.product_id)
                    .map(|p| CartLineView::new(line.clone(), p.clone()))
            })
            .collect())
    }

    async fn upsert_cart_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> StoreResult<CartItem> {
        let mut tables = self.tables();
        Ok(upsert_line(&mut tables, user_id, product_id, quantity))
    }

    async fn update_cart_quantity(
        &self,
        user_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<CartItem>> {
        let mut tables = self.tables();
        Ok(tables
            .cart_items
            .iter_mut()
            .find(|line| line.id == line_id && line.user_id == user_id)
            .map(|line| {
                line.quantity = quantity;
                line.clone()
            }))
    }

    async fn remove_cart_line(&self, user_id: Uuid, line_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables();
        let before = tables.cart_items.len();
        tables
            .cart_items
            .retain(|line| !(line.id == line_id && line.user_id == user_id));
        Ok(tables.cart_items.len() < before)
    }

    async fn cart_snapshot(&self, user_id: Uuid) -> StoreResult<Vec<SnapshotLine>> {
        self.enter(Op::CartSnapshot).await?;
        let tables = self.tables();
        Ok(tables
            .cart_items
            .iter()
            .filter(|line| line.user_id == user_id)
            .filter_map(|line| {
                tables
                    .products
                    .iter()
                    .find(|p| p.id == line.product_id)
                    .map(|p| SnapshotLine {
                        product_id: p.id,
                        product_name: p.name.clone(),
                        quantity: line.quantity,
                        price: p.price.clone(),
                    })
            })
            .collect())
    }

    async fn clear_cart(&self, user_id: Uuid, product_ids: &[Uuid]) -> StoreResult<usize> {
        self.enter(Op::ClearCart).await?;
        let mut tables = self.tables();
        let before = tables.cart_items.len();
        tables
            .cart_items
            .retain(|line| !(line.user_id == user_id && product_ids.contains(&line.product_id)));
        Ok(before - tables.cart_items.len())
    }

    async fn restore_cart(&self, user_id: Uuid, lines: &[SnapshotLine]) -> StoreResult<()> {
        self.enter(Op::RestoreCart).await?;
        let mut tables = self.tables();
        for line in lines {
            upsert_line(&mut tables, user_id, line.product_id, line.quantity);
        }
        Ok(())
    }

    async fn find_order_by_key(&self, user_id: Uuid, key: &str) -> StoreResult<Option<Order>> {
        Ok(self
            .tables()
            .orders
            .iter()
            .find(|o| o.user_id == user_id && o.idempotency_key == key)
            .cloned())
    }

    async fn insert_order(&self, order: &NewOrder) -> StoreResult<Order> {
        self.enter(Op::InsertOrder).await?;
        let mut tables = self.tables();
        if tables
            .orders
            .iter()
            .any(|o| o.user_id == order.user_id && o.idempotency_key == order.idempotency_key)
        {
            return Err(StoreError::Conflict);
        }

        let now = Utc::now();
        let row = Order {
            id: order.id,
            user_id: order.user_id,
            total: order.total.clone(),
            status: order.status.clone(),
            customer_name: order.customer_name.clone(),
            phone: order.phone.clone(),
            address: order.address.clone(),
            city: order.city.clone(),
            district: order.district.clone(),
            ward: order.ward.clone(),
            notes: order.notes.clone(),
            idempotency_key: order.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.orders.push(row.clone());
        Ok(row)
    }

    async fn delete_order(&self, order_id: Uuid) -> StoreResult<()> {
        self.enter(Op::DeleteOrder).await?;
        let mut tables = self.tables();
        tables.orders.retain(|o| o.id != order_id);
        tables.order_items.retain(|i| i.order_id != order_id);
        Ok(())
    }

    async fn insert_order_items(&self, items: &[NewOrderItem]) -> StoreResult<()> {
        self.enter(Op::InsertOrderItems).await?;
        let mut tables = self.tables();
        for item in items {
            tables.order_items.push(OrderItem {
                id: item.id,
                order_id: item.order_id,
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price.clone(),
            });
        }
        Ok(())
    }

    async fn delete_order_items(&self, order_id: Uuid) -> StoreResult<()> {
        self.enter(Op::DeleteOrderItems).await?;
        self.tables().order_items.retain(|i| i.order_id != order_id);
        Ok(())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<OrderWithItems>> {
        let tables = self.tables();
        let mut orders: Vec<OrderWithItems> = tables
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .map(|o| with_items(&tables, o))
            .collect();
        orders.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));
        Ok(orders)
    }

    async fn all_orders(&self) -> StoreResult<Vec<OrderWithItems>> {
        let tables = self.tables();
        let mut orders: Vec<OrderWithItems> =
            tables.orders.iter().map(|o| with_items(&tables, o)).collect();
        orders.sort_by(|a, b| b.order.created_at.cmp(&a.order.created_at));
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> StoreResult<Option<Order>> {
        let mut tables = self.tables();
        Ok(tables.orders.iter_mut().find(|o| o.id == order_id).map(|o| {
            o.status = status.as_str().to_string();
            o.updated_at = Utc::now();
            o.clone()
        }))
    }

    async fn order_summaries(&self) -> StoreResult<Vec<OrderSummary>> {
        Ok(self
            .tables()
            .orders
            .iter()
            .map(|o| OrderSummary {
                total: o.total.clone(),
                status: o.status.clone(),
                created_at: o.created_at,
            })
            .collect())
    }

    async fn sold_items(&self) -> StoreResult<Vec<SoldItem>> {
        let tables = self.tables();
        Ok(tables
            .order_items
            .iter()
            .map(|item| SoldItem {
                product_name: tables
                    .products
                    .iter()
                    .find(|p| p.id == item.product_id)
                    .map(|p| p.name.clone()),
                quantity: item.quantity,
                price: item.price.clone(),
            })
            .collect())
    }

    async fn has_role(&self, user_id: Uuid, role: Role) -> StoreResult<bool> {
        Ok(self.tables().roles.contains(&(user_id, role.as_str())))
    }

    async fn save_saga(&self, saga: &CheckoutSaga) -> StoreResult<()> {
        self.enter(Op::SaveSaga).await?;
        self.tables().sagas.insert(saga.id, saga.clone());
        Ok(())
    }

    async fn sagas_for_key(&self, user_id: Uuid, key: &str) -> StoreResult<Vec<CheckoutSaga>> {
        let mut sagas: Vec<CheckoutSaga> = self
            .tables()
            .sagas
            .values()
            .filter(|saga| saga.user_id == user_id && saga.idempotency_key == key)
            .cloned()
            .collect();
        sagas.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sagas)
    }

    async fn stale_sagas(&self, updated_before: DateTime<Utc>) -> StoreResult<Vec<CheckoutSaga>> {
        Ok(self
            .tables()
            .sagas
            .values()
            .filter(|saga| saga.is_stale(updated_before))
            .cloned()
            .collect())
    }

    async fn enqueue_event(&self, event: &OutboxEvent) -> StoreResult<()> {
        self.enter(Op::EnqueueEvent).await?;
        self.tables().events.push(event.clone());
        Ok(())
    }

    async fn pending_events(&self, limit: i64) -> StoreResult<Vec<OutboxEvent>> {
        let mut pending: Vec<OutboxEvent> = self
            .tables()
            .events
            .iter()
            .filter(|event| !event.processed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn mark_event_processed(&self, event_id: Uuid) -> StoreResult<()> {
        self.enter(Op::MarkEventProcessed).await?;
        let mut tables = self.tables();
        match tables.events.iter_mut().find(|event| event.id == event_id) {
            Some(event) => {
                event.processed = true;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}
