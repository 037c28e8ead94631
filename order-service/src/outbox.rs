use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::OutboxEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::store::RecordStore;

const BATCH_SIZE: i64 = 100;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        let record = FutureRecord::to(topic).payload(payload).key(key);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;
        Ok(())
    }
}

/// Relays committed outbox events to the event topic, oldest first.
///
/// An event is marked processed only after the broker acknowledged it, so a
/// failed publish is retried on the next tick. Consumers must tolerate duplicates.
pub struct OutboxProcessor {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    every: Duration,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn EventPublisher>,
        topic: String,
        every: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            topic,
            every,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.every);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Outbox processor stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            if let Err(e) = self.relay_pending().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Returns how many events reached the broker in this pass.
    pub async fn relay_pending(&self) -> Result<usize> {
        let pending = self.store.pending_events(BATCH_SIZE).await?;

        let mut relayed = 0;
        for event in pending {
            if let Err(e) = self.publish(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }
            self.store.mark_event_processed(event.id).await?;
            relayed += 1;

            info!(
                "Published {} event {} for order {}",
                event.event_type, event.id, event.aggregate_id
            );
        }

        Ok(relayed)
    }

    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        self.publisher.publish(&self.topic, &key, &payload).await
    }
}
