use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use shared::OrderStatus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser, JwtVerifier};
use crate::checkout::{CheckoutError, CheckoutPipeline, CheckoutRequest};
use crate::models::*;
use crate::reporting::{self, export, Report};
use crate::store::{RecordStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub pipeline: Arc<CheckoutPipeline>,
    pub auth: JwtVerifier,
    pub report_tz: Tz,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict(String),
    Timeout,
    Unavailable,
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::Validation(message) => ApiError::Validation(message),
            CheckoutError::EmptyCart => ApiError::Validation("Cart is empty".to_string()),
            CheckoutError::InProgress => {
                ApiError::Conflict("A checkout is already in progress".to_string())
            }
            CheckoutError::Timeout(step) => {
                error!("Checkout timed out at {:?}", step);
                ApiError::Timeout
            }
            CheckoutError::Cancelled => ApiError::Unavailable,
            CheckoutError::Store(e) => ApiError::from(e),
        }
    }
}

impl From<export::ExportError> for ApiError {
    fn from(e: export::ExportError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Admin access required".to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "The request timed out, please try again".to_string(),
            ),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "The service is shutting down, please try again".to_string(),
            ),
            ApiError::Internal(detail) => {
                error!("Request failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
        .route("/cart", get(get_cart).post(add_to_cart))
        .route("/cart/:line_id", patch(update_cart_line).delete(remove_cart_line))
        .route("/checkout", post(checkout))
        .route("/orders", get(my_orders))
        .route("/admin/orders", get(admin_orders))
        .route("/admin/orders/:id/status", patch(update_order_status))
        .route("/admin/dashboard", get(dashboard))
        .route("/admin/reports/export", get(export_report))
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

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub category: Option<String>,
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let category = query.category.as_deref().filter(|c| !c.is_empty());
    Ok(Json(state.store.list_products(category).await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>, ApiError> {
    state
        .store
        .get_product(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<CartLineView>,
    /// Number of distinct lines.
    pub count: usize,
    pub item_count: i64,
    pub total: BigDecimal,
}

impl CartResponse {
    pub fn new(items: Vec<CartLineView>) -> Self {
        let item_count = items.iter().map(|line| i64::from(line.quantity)).sum();
        let total = items
            .iter()
            .fold(BigDecimal::from(0), |sum, line| sum + &line.line_total);
        Self {
            count: items.len(),
            item_count,
            total,
            items,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<CartResponse>, ApiError> {
    let lines = state.store.cart_lines(user.user_id).await?;
    Ok(Json(CartResponse::new(lines)))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AddToCartRequest>,
) -> Result<Json<CartItem>, ApiError> {
    let quantity = request.quantity.unwrap_or(1);
    if quantity < 1 {
        return Err(ApiError::Validation("quantity must be at least 1".to_string()));
    }
    if state.store.get_product(request.product_id).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    let line = state
        .store
        .upsert_cart_line(user.user_id, request.product_id, quantity)
        .await?;
    Ok(Json(line))
}

pub async fn update_cart_line(
    State(state): State<AppState>,
    user: AuthUser,
    Path(line_id): Path<Uuid>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<Json<CartItem>, ApiError> {
    if request.quantity < 1 {
        return Err(ApiError::Validation("quantity must be at least 1".to_string()));
    }
    state
        .store
        .update_cart_quantity(user.user_id, line_id, request.quantity)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn remove_cart_line(
    State(state): State<AppState>,
    user: AuthUser,
    Path(line_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.store.remove_cart_line(user.user_id, line_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub total: BigDecimal,
    pub replayed: bool,
}

pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    // The pipeline runs detached so a dropped connection cannot stop it between steps.
    let pipeline = state.pipeline.clone();
    let cancel = state.shutdown.child_token();
    let user_id = user.user_id;
    let task = tokio::spawn(async move { pipeline.place_order(user_id, request, &cancel).await });

    let outcome = task
        .await
        .map_err(|e| ApiError::Internal(format!("checkout task failed: {}", e)))??;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        info!("Order {} placed by user {}", outcome.order_id, user_id);
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(CheckoutResponse {
            order_id: outcome.order_id,
            total: outcome.total,
            replayed: outcome.replayed,
        }),
    ))
}

pub async fn my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<OrderWithItems>>, ApiError> {
    Ok(Json(state.store.orders_for_user(user.user_id).await?))
}

pub async fn admin_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<OrderWithItems>>, ApiError> {
    Ok(Json(state.store.all_orders().await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

pub async fn update_order_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let status: OrderStatus = request
        .status
        .parse()
        .map_err(|e: shared::UnknownStatus| ApiError::Validation(e.to_string()))?;

    let order = state
        .store
        .update_order_status(id, status)
        .await?
        .ok_or(ApiError::NotFound)?;
    info!("Admin {} set order {} to {}", admin.user_id, id, status);
    Ok(Json(order))
}

pub async fn dashboard(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Report>, ApiError> {
    let report = reporting::load_report(state.store.as_ref(), state.report_tz).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

pub async fn export_report(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format: export::ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("xlsx")
        .parse()
        .map_err(ApiError::Validation)?;

    let report = reporting::load_report(state.store.as_ref(), state.report_tz).await?;
    let body = export::render(&report, format)?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        export::file_name(&report, format)
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

pub async fn health_check() -> &'static str {
    "OK"
}
