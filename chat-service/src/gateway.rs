use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway rate limit reached")]
    RateLimited,
    #[error("gateway credits exhausted")]
    OutOfCredits,
    #[error("gateway answered {status}: {body}")]
    Upstream { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct Gateway {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl Gateway {
    pub fn new(
        url: String,
        api_key: String,
        model: String,
        system_prompt: String,
    ) -> Result<Self, GatewayError> {
        // Streams can stay open for a while, so only connecting is bounded.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url,
            api_key,
            model,
            system_prompt,
        })
    }

    pub fn completion_request(&self, messages: Vec<ChatMessage>) -> CompletionRequest<'_> {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(ChatMessage {
            role: "system".to_string(),
            content: self.system_prompt.clone(),
        });
        all.extend(messages);
        CompletionRequest {
            model: &self.model,
            messages: all,
            stream: true,
        }
    }

    /// Starts a streamed completion. The returned response body is the upstream event stream.
    pub async fn stream(&self, messages: Vec<ChatMessage>) -> Result<Response, GatewayError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.completion_request(messages))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body))
    }
}

pub fn classify(status: StatusCode, body: String) -> GatewayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
        StatusCode::PAYMENT_REQUIRED => GatewayError::OutOfCredits,
        other => GatewayError::Upstream {
            status: other.as_u16(),
            body,
        },
    }
}
