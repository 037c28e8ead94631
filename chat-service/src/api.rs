use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::gateway::{ChatMessage, Gateway, GatewayError};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::RateLimited => error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests, please try again later.",
            ),
            GatewayError::OutOfCredits => error_response(
                StatusCode::PAYMENT_REQUIRED,
                "Out of AI credits, please top up to keep using chat.",
            ),
            other => {
                error!("AI gateway error: {}", other);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "AI gateway error")
            }
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if request.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "messages must not be empty");
    }

    match state.gateway.stream(request.messages).await {
        Ok(upstream) => (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(upstream.bytes_stream()),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves a fixed status and body on an ephemeral port, standing in for the gateway.
    async fn fake_gateway(status: StatusCode, body: &'static str) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || async move { (status, body) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn state(url: String) -> AppState {
        let gateway = Gateway::new(
            url,
            "key".to_string(),
            "test-model".to_string(),
            "Be brief.".to_string(),
        )
        .unwrap();
        AppState {
            gateway: Arc::new(gateway),
        }
    }

    fn request() -> Json<ChatRequest> {
        Json(ChatRequest {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "Xin chào".to_string(),
            }],
        })
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn streams_upstream_body_through() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Chào\"}}]}\n\ndata: [DONE]\n\n";
        let url = fake_gateway(StatusCode::OK, sse).await;

        let response = chat(State(state(url)), request()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(body_text(response).await, sse);
    }

    #[tokio::test]
    async fn maps_rate_limit_and_credit_errors() {
        for (upstream, expected, message) in [
            (
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests, please try again later.",
            ),
            (
                StatusCode::PAYMENT_REQUIRED,
                StatusCode::PAYMENT_REQUIRED,
                "Out of AI credits, please top up to keep using chat.",
            ),
            (
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "AI gateway error",
            ),
        ] {
            let url = fake_gateway(upstream, "nope").await;
            let response = chat(State(state(url)), request()).await;

            assert_eq!(response.status(), expected);
            let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
            assert_eq!(json["error"], message);
        }
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_server_error() {
        let response = chat(
            State(state("http://127.0.0.1:9/v1/chat/completions".to_string())),
            request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let response = chat(
            State(state("http://127.0.0.1:9/unused".to_string())),
            Json(ChatRequest {
                messages: Vec::new(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
