use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::checkout::roll_back;
use crate::store::RecordStore;

/// Compensates checkouts that were left unsettled by a crash or a failed compensation.
pub struct SagaRecovery {
    store: Arc<dyn RecordStore>,
    grace: chrono::Duration,
    every: Duration,
}

impl SagaRecovery {
    pub fn new(store: Arc<dyn RecordStore>, grace: chrono::Duration, every: Duration) -> Self {
        Self {
            store,
            grace,
            every,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.every);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Saga recovery stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            match self.recover_stale().await {
                Ok(0) => {}
                Ok(count) => info!("Recovered {} stale checkout sagas", count),
                Err(e) => error!("Error recovering checkout sagas: {}", e),
            }
        }
    }

    /// Returns how many sagas were settled in this pass.
    pub async fn recover_stale(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now() - self.grace;
        let stale = self.store.stale_sagas(cutoff).await?;

        let mut settled = 0;
        for mut saga in stale {
            // A crash or a timeout may have left the step at current_step applied.
            match roll_back(self.store.as_ref(), &mut saga).await {
                Ok(()) => settled += 1,
                Err(e) => error!("Recovery of saga {} failed: {}", saga.id, e),
            }
        }

        Ok(settled)
    }
}
