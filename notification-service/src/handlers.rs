use anyhow::Result;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use shared::OrderPlaced;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ledger::NotificationLedger;
use crate::mailer::{Email, Mailer};

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Sent(usize),
    AlreadyNotified,
    NoRecipients,
    Failed,
}

pub struct EventHandler {
    ledger: Arc<dyn NotificationLedger>,
    mailer: Arc<dyn Mailer>,
    from: String,
}

impl EventHandler {
    pub fn new(ledger: Arc<dyn NotificationLedger>, mailer: Arc<dyn Mailer>, from: String) -> Self {
        Self {
            ledger,
            mailer,
            from,
        }
    }

    pub async fn run(&self, consumer: StreamConsumer, shutdown: CancellationToken) {
        let mut message_stream = consumer.stream();

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Notification consumer stopped");
                    return;
                }
                message = message_stream.next() => match message {
                    Some(message) => message,
                    None => return,
                },
            };

            match message {
                Ok(m) => {
                    match m.payload_view::<str>() {
                        Some(Ok(json_str)) => {
                            if let Err(e) = self.handle_payload(json_str).await {
                                error!("Error handling order event: {}", e);
                            }
                        }
                        Some(Err(e)) => error!("Error parsing payload: {}", e),
                        None => warn!("Skipping message without payload"),
                    }
                    // Delivery is best-effort: the offset moves on even when the email failed.
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    pub async fn handle_payload(&self, json_str: &str) -> Result<Outcome> {
        let event: OrderPlaced = serde_json::from_str(json_str)?;
        self.notify_admins(&event).await
    }

    pub async fn notify_admins(&self, event: &OrderPlaced) -> Result<Outcome> {
        if self.ledger.is_processed(event.order_id).await? {
            info!("Order {} already announced, skipping", event.order_id);
            return Ok(Outcome::AlreadyNotified);
        }

        let recipients = self.ledger.admin_emails().await?;
        if recipients.is_empty() {
            warn!("No admin emails found for order {}", event.order_id);
            return Ok(Outcome::NoRecipients);
        }

        let count = recipients.len();
        let email = Email::order_placed(event, &self.from, recipients)?;
        if let Err(e) = self.mailer.send(&email).await {
            error!("Failed to email admins about order {}: {}", event.order_id, e);
            return Ok(Outcome::Failed);
        }

        self.ledger.mark_processed(event.order_id, count).await?;
        info!("Notified {} admins about order {}", count, event.order_id);
        Ok(Outcome::Sent(count))
    }
}
