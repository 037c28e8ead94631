use bigdecimal::BigDecimal;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use shared::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{NewOrder, NewOrderItem, Order};
use crate::store::{RecordStore, StoreError, StoreResult};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(String),
    #[error("cart is empty")]
    EmptyCart,
    #[error("a checkout is already in progress for this user")]
    InProgress,
    #[error("checkout step {0:?} timed out")]
    Timeout(CommandType),
    #[error("checkout was cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShippingDetails {
    pub customer_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ShippingDetails {
    /// Trims every field, rejects blank required fields and drops blank optional ones.
    pub fn validate(&self) -> Result<ShippingDetails, CheckoutError> {
        let required = [
            ("customer_name", &self.customer_name),
            ("phone", &self.phone),
            ("address", &self.address),
            ("city", &self.city),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(CheckoutError::Validation(format!(
                "missing shipping fields: {}",
                missing.join(", ")
            )));
        }

        let optional = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Ok(ShippingDetails {
            customer_name: self.customer_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            address: self.address.trim().to_string(),
            city: self.city.trim().to_string(),
            district: optional(&self.district),
            ward: optional(&self.ward),
            notes: optional(&self.notes),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    /// Client-generated id of this submission, reused on retries.
    pub submission_id: Uuid,
    #[serde(flatten)]
    pub shipping: ShippingDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub total: BigDecimal,
    pub replayed: bool,
}

struct InFlight<'a> {
    users: &'a DashSet<Uuid>,
    user_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.users.remove(&self.user_id);
    }
}

pub struct CheckoutPipeline {
    store: Arc<dyn RecordStore>,
    in_flight: DashSet<Uuid>,
    step_timeout: Duration,
}

impl CheckoutPipeline {
    pub fn new(store: Arc<dyn RecordStore>, step_timeout: Duration) -> Self {
        Self {
            store,
            in_flight: DashSet::new(),
            step_timeout,
        }
    }

    fn acquire(&self, user_id: Uuid) -> Result<InFlight<'_>, CheckoutError> {
        if !self.in_flight.insert(user_id) {
            return Err(CheckoutError::InProgress);
        }
        Ok(InFlight {
            users: &self.in_flight,
            user_id,
        })
    }

    async fn timed<T>(
        &self,
        command: CommandType,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> Result<T, CheckoutError> {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(result) => result.map_err(CheckoutError::from),
            Err(_) => Err(CheckoutError::Timeout(command)),
        }
    }

    pub async fn place_order(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
        cancel: &CancellationToken,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let _guard = self.acquire(user_id)?;
        let key = request.submission_id.to_string();

        if let Some(replay) = self.settle_earlier_attempts(user_id, &key).await? {
            return Ok(replay);
        }

        let shipping = request.shipping.validate()?;
        let lines = self.store.cart_snapshot(user_id).await?;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let context = CheckoutContext {
            order_id: Uuid::new_v4(),
            total: order_total(&lines),
            lines,
        };
        let mut saga = CheckoutSaga::new(user_id, &key, context);
        self.store.save_saga(&saga).await?;
        saga.set_status(SagaStatus::InProgress);

        while let Some(step) = saga.next_step().cloned() {
            if cancel.is_cancelled() {
                return Err(self.abort(&mut saga, CheckoutError::Cancelled).await);
            }

            match self.execute_step(&saga, &shipping, step.command_type).await {
                Ok(()) => {
                    saga.advance_step();
                    let saved = self
                        .timed(step.command_type, self.store.save_saga(&saga))
                        .await;
                    if let Err(e) = saved {
                        return Err(self.abort(&mut saga, e).await);
                    }
                    info!("Saga {} completed step {:?}", saga.id, step.command_type);
                }
                Err(CheckoutError::Store(StoreError::Conflict))
                    if step.command_type == CommandType::CreateOrder =>
                {
                    return self.collapse_duplicate(&mut saga).await;
                }
                Err(e) => return Err(self.abort(&mut saga, e).await),
            }
        }

        saga.set_status(SagaStatus::Completed);
        let saved = self
            .timed(CommandType::ClearCart, self.store.save_saga(&saga))
            .await;
        if let Err(e) = saved {
            return Err(self.abort(&mut saga, e).await);
        }
        info!(
            "Saga {} completed, order {} placed for user {}",
            saga.id, saga.context.order_id, user_id
        );

        self.notify(&saga, &shipping).await;

        Ok(CheckoutOutcome {
            order_id: saga.context.order_id,
            total: saga.context.total.clone(),
            replayed: false,
        })
    }

    async fn execute_step(
        &self,
        saga: &CheckoutSaga,
        shipping: &ShippingDetails,
        command: CommandType,
    ) -> Result<(), CheckoutError> {
        let context = &saga.context;
        match command {
            CommandType::CreateOrder => {
                let new_order = NewOrder {
                    id: context.order_id,
                    user_id: saga.user_id,
                    total: context.total.clone(),
                    status: OrderStatus::Pending.as_str().to_string(),
                    customer_name: shipping.customer_name.clone(),
                    phone: shipping.phone.clone(),
                    address: shipping.address.clone(),
                    city: shipping.city.clone(),
                    district: shipping.district.clone(),
                    ward: shipping.ward.clone(),
                    notes: shipping.notes.clone(),
                    idempotency_key: saga.idempotency_key.clone(),
                };
                self.timed(command, self.store.insert_order(&new_order)).await?;
            }
            CommandType::CreateOrderItems => {
                let items: Vec<NewOrderItem> = context
                    .lines
                    .iter()
                    .map(|line| NewOrderItem::from_snapshot(context.order_id, line))
                    .collect();
                self.timed(command, self.store.insert_order_items(&items)).await?;
            }
            CommandType::ClearCart => {
                let product_ids: Vec<Uuid> =
                    context.lines.iter().map(|line| line.product_id).collect();
                self.timed(command, self.store.clear_cart(saga.user_id, &product_ids))
                    .await?;
            }
            other => {
                return Err(StoreError::Corrupt(format!(
                    "saga {} holds {:?} as a forward step",
                    saga.id, other
                ))
                .into())
            }
        }
        Ok(())
    }

    /// Looks at earlier sagas for this submission before starting a new one.
    ///
    /// An order is replayed only when the saga that created it completed. An order
    /// whose saga is still running elsewhere is reported as in progress. Failed
    /// attempts, and orders left behind by a write that landed after its saga
    /// gave up, are rolled back here so the retry starts from a clean state.
    async fn settle_earlier_attempts(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<CheckoutOutcome>, CheckoutError> {
        let earlier = self.store.sagas_for_key(user_id, key).await?;
        let existing = self.store.find_order_by_key(user_id, key).await?;

        if let Some(order) = &existing {
            let owner = owning_saga(&earlier, order)?;
            match owner.status {
                SagaStatus::Completed => {
                    info!("Checkout {} already produced order {}", key, order.id);
                    return Ok(Some(CheckoutOutcome {
                        order_id: order.id,
                        total: order.total.clone(),
                        replayed: true,
                    }));
                }
                SagaStatus::Failed | SagaStatus::Compensated => {}
                _ => return Err(CheckoutError::InProgress),
            }
        }

        let leftover = existing.map(|order| order.id);
        for mut saga in earlier {
            let orphaned = leftover == Some(saga.context.order_id);
            if saga.status == SagaStatus::Failed || orphaned {
                warn!("Rolling back earlier attempt {} of checkout {}", saga.id, key);
                roll_back(self.store.as_ref(), &mut saga).await?;
            }
        }
        Ok(None)
    }

    /// Another submission with the same key created the order first.
    ///
    /// This saga wrote nothing, so it settles without compensating. The other
    /// order is returned only once its own saga has completed.
    async fn collapse_duplicate(
        &self,
        saga: &mut CheckoutSaga,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        saga.set_status(SagaStatus::Compensated);
        if let Err(e) = self.store.save_saga(saga).await {
            warn!("Failed to settle duplicate saga {}: {}", saga.id, e);
        }

        let existing = self
            .store
            .find_order_by_key(saga.user_id, &saga.idempotency_key)
            .await?
            .ok_or(StoreError::NotFound)?;
        let earlier = self
            .store
            .sagas_for_key(saga.user_id, &saga.idempotency_key)
            .await?;
        if owning_saga(&earlier, &existing)?.status != SagaStatus::Completed {
            info!(
                "Saga {} lost the race to order {}, which is not settled yet",
                saga.id, existing.id
            );
            return Err(CheckoutError::InProgress);
        }

        info!(
            "Saga {} collapsed into existing order {}",
            saga.id, existing.id
        );
        Ok(CheckoutOutcome {
            order_id: existing.id,
            total: existing.total,
            replayed: true,
        })
    }

    async fn abort(&self, saga: &mut CheckoutSaga, cause: CheckoutError) -> CheckoutError {
        error!(
            "Saga {} failed at step {}: {}",
            saga.id, saga.current_step, cause
        );

        // The write of a timed-out step may still commit after we stop waiting.
        let timed_out = matches!(cause, CheckoutError::Timeout(_));
        saga.set_status(SagaStatus::Compensating);
        if let Err(e) = self.store.save_saga(saga).await {
            error!("Failed to record compensation for saga {}: {}", saga.id, e);
        }

        let steps = saga.get_compensation_steps(timed_out);
        let status = match run_compensations(self.store.as_ref(), saga, &steps).await {
            Ok(()) if timed_out => {
                warn!("Saga {} timed out, leaving it for recovery to repeat", saga.id);
                SagaStatus::Failed
            }
            Ok(()) => SagaStatus::Compensated,
            Err(e) => {
                error!("Compensation failed for saga {}: {}", saga.id, e);
                SagaStatus::Failed
            }
        };
        saga.set_status(status);
        if let Err(e) = self.store.save_saga(saga).await {
            error!("Failed to record final state of saga {}: {}", saga.id, e);
        }

        cause
    }

    async fn notify(&self, saga: &CheckoutSaga, shipping: &ShippingDetails) {
        let placed = OrderPlaced::new(
            saga.context.order_id,
            &shipping.customer_name,
            &saga.context.lines,
        );
        let event = match OutboxEvent::order_placed(&placed) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to encode OrderPlaced for {}: {}", placed.order_id, e);
                return;
            }
        };

        if let Err(e) = self.store.enqueue_event(&event).await {
            warn!("Failed to enqueue notification for order {}: {}", placed.order_id, e);
        }
    }
}

fn owning_saga<'a>(sagas: &'a [CheckoutSaga], order: &Order) -> StoreResult<&'a CheckoutSaga> {
    sagas
        .iter()
        .find(|saga| saga.context.order_id == order.id)
        .ok_or_else(|| StoreError::Corrupt(format!("order {} has no checkout saga", order.id)))
}

/// Undoes every step the saga may have applied, including the one in flight,
/// and records the outcome. A saga whose compensation fails is left `Failed`.
pub async fn roll_back(store: &dyn RecordStore, saga: &mut CheckoutSaga) -> StoreResult<()> {
    let steps = saga.get_compensation_steps(true);
    saga.set_status(SagaStatus::Compensating);
    store.save_saga(saga).await?;

    let result = run_compensations(store, saga, &steps).await;
    saga.set_status(if result.is_ok() {
        SagaStatus::Compensated
    } else {
        SagaStatus::Failed
    });
    if let Err(e) = store.save_saga(saga).await {
        error!("Failed to record rollback of saga {}: {}", saga.id, e);
    }
    result
}

/// Runs compensations in the given order, stopping at the first failure.
///
/// Every compensation is idempotent so a failed run can be repeated by recovery.
pub async fn run_compensations(
    store: &dyn RecordStore,
    saga: &CheckoutSaga,
    steps: &[CommandType],
) -> StoreResult<()> {
    let context = &saga.context;
    for command in steps {
        match command {
            CommandType::RestoreCart => store.restore_cart(saga.user_id, &context.lines).await?,
            CommandType::DeleteOrderItems => store.delete_order_items(context.order_id).await?,
            CommandType::DeleteOrder => store.delete_order(context.order_id).await?,
            other => {
                warn!("Skipping non-compensating command {:?} in saga {}", other, saga.id);
                continue;
            }
        }
        info!("Saga {} compensated with {:?}", saga.id, command);
    }
    Ok(())
}
