use askama::Template;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::Serialize;
use shared::locale::format_vnd;
use shared::OrderPlaced;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("email API rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("email template failed to render: {0}")]
    Template(#[from] askama::Error),
}

struct OrderRow {
    name: String,
    quantity: i32,
    price: String,
    line_total: String,
}

#[derive(Template)]
#[template(path = "email/order_placed.html")]
struct OrderPlacedHtml<'a> {
    short_id: &'a str,
    customer: &'a str,
    rows: &'a [OrderRow],
    total: &'a str,
}

#[derive(Template)]
#[template(path = "email/order_placed.txt")]
struct OrderPlacedText<'a> {
    short_id: &'a str,
    customer: &'a str,
    rows: &'a [OrderRow],
    total: &'a str,
}

/// A message in the shape the Resend `POST /emails` endpoint takes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl Email {
    pub fn order_placed(
        event: &OrderPlaced,
        from: &str,
        to: Vec<String>,
    ) -> Result<Self, MailerError> {
        let short_id = event.short_id();
        let total = format_vnd(&event.total);
        let rows: Vec<OrderRow> = event
            .items
            .iter()
            .map(|item| OrderRow {
                name: item.name.clone(),
                quantity: item.quantity,
                price: format_vnd(&item.price),
                line_total: format_vnd(&(&item.price * BigDecimal::from(item.quantity))),
            })
            .collect();

        let html = OrderPlacedHtml {
            short_id: &short_id,
            customer: &event.customer_name,
            rows: &rows,
            total: &total,
        }
        .render()?;
        let text = OrderPlacedText {
            short_id: &short_id,
            customer: &event.customer_name,
            rows: &rows,
            total: &total,
        }
        .render()?;

        Ok(Self {
            from: from.to_string(),
            to,
            subject: format!("Đơn hàng mới #{}", short_id),
            html,
            text,
        })
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailerError>;
}

pub struct ResendMailer {
    client: Client,
    api_url: String,
    api_key: String,
}

impl ResendMailer {
    pub fn new(api_url: String, api_key: String) -> Result<Self, MailerError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &Email) -> Result<(), MailerError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
