use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SnapshotLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    CreateOrder,
    CreateOrderItems,
    ClearCart,
    DeleteOrder,
    DeleteOrderItems,
    RestoreCart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub command_type: CommandType,
    pub compensation_type: Option<CommandType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    Started,
    InProgress,
    Completed,
    Compensating,
    Compensated,
    Failed,
}

impl SagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "Started",
            SagaStatus::InProgress => "InProgress",
            SagaStatus::Completed => "Completed",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Started" => Some(SagaStatus::Started),
            "InProgress" => Some(SagaStatus::InProgress),
            "Completed" => Some(SagaStatus::Completed),
            "Compensating" => Some(SagaStatus::Compensating),
            "Compensated" => Some(SagaStatus::Compensated),
            "Failed" => Some(SagaStatus::Failed),
            _ => None,
        }
    }

    /// Statuses a crashed or failed checkout can be left in.
    pub const UNSETTLED: [SagaStatus; 4] = [
        SagaStatus::Started,
        SagaStatus::InProgress,
        SagaStatus::Compensating,
        SagaStatus::Failed,
    ];

    pub fn is_settled(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutContext {
    /// Generated before the order row is written so compensation can target it.
    pub order_id: Uuid,
    pub total: BigDecimal,
    pub lines: Vec<SnapshotLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSaga {
    pub id: Uuid,
    pub user_id: Uuid,
    pub idempotency_key: String,
    pub steps: Vec<SagaStep>,
    pub current_step: usize,
    pub status: SagaStatus,
    pub context: CheckoutContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSaga {
    pub fn new(user_id: Uuid, idempotency_key: &str, context: CheckoutContext) -> Self {
        let steps = vec![
            SagaStep {
                command_type: CommandType::CreateOrder,
                compensation_type: Some(CommandType::DeleteOrder),
            },
            SagaStep {
                command_type: CommandType::CreateOrderItems,
                compensation_type: Some(CommandType::DeleteOrderItems),
            },
            SagaStep {
                command_type: CommandType::ClearCart,
                compensation_type: Some(CommandType::RestoreCart),
            },
        ];

        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            idempotency_key: idempotency_key.to_string(),
            steps,
            current_step: 0,
            status: SagaStatus::Started,
            context,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn next_step(&self) -> Option<&SagaStep> {
        self.steps.get(self.current_step)
    }

    pub fn advance_step(&mut self) {
        if self.current_step < self.steps.len() {
            self.current_step += 1;
            self.touch();
        }
    }

    pub fn set_status(&mut self, status: SagaStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Compensations for the completed steps, most recent first.
    ///
    /// With `include_in_flight` the step at `current_step` is treated as possibly
    /// applied, which is the case after a timeout or a crash.
    pub fn get_compensation_steps(&self, include_in_flight: bool) -> Vec<CommandType> {
        let end = if include_in_flight {
            (self.current_step + 1).min(self.steps.len())
        } else {
            self.current_step
        };

        self.steps[..end]
            .iter()
            .rev()
            .filter_map(|step| step.compensation_type)
            .collect()
    }

    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        !self.status.is_settled() && self.updated_at < cutoff
    }
}
