mod catalog;
mod crashcash;
mod orders;
mod payments;
mod support;
mod users;

#[cfg(test)]
pub(crate) mod tests;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use crashkart_core::{AppConfig, CoreError};
use crashkart_db::DbError;
use crashkart_gateway::GatewayClient;
use serde::Serialize;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::middleware::{
    enforce_rate_limit, request_id, require_bearer_auth, AuthState, RateLimitState, RequestId,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    /// `None` when gateway credentials are not configured; online checkout
    /// is then unavailable.
    pub gateway: Option<GatewayClient>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
    gateway: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(super) fn new(request_id: String, data: T) -> Json<Self> {
        Json(Self {
            data,
            meta: ResponseMeta::new(request_id),
        })
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }

    pub(super) fn not_found(request_id: &str, what: &str) -> Self {
        Self::new(request_id, "not_found", format!("{what} not found"))
    }

    pub(super) fn validation(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, "validation_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" | "invalid_signature" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "bad_gateway" => StatusCode::BAD_GATEWAY,
            "service_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(super) fn normalize_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 200)
}

/// Translate a storage error into the response a client should see.
///
/// Business-rule failures keep their message; anything unexpected is
/// logged and reported as a generic internal error.
pub(super) fn map_db_error(request_id: String, error: &DbError) -> ApiError {
    match error {
        DbError::NotFound => ApiError::new(request_id, "not_found", "record not found"),
        DbError::InsufficientCrashCash { .. }
        | DbError::OutOfStock { .. }
        | DbError::Conflict(_)
        | DbError::Domain(CoreError::InvalidTransition { .. }) => {
            ApiError::new(request_id, "conflict", error.to_string())
        }
        DbError::InvalidAmount(_) | DbError::Domain(CoreError::InvalidEnum { .. }) => {
            ApiError::new(request_id, "validation_error", error.to_string())
        }
        _ => {
            tracing::error!(error = %error, "database query failed");
            ApiError::new(request_id, "internal_error", "database query failed")
        }
    }
}

pub(super) fn parse_public_id(request_id: &str, field: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::validation(request_id, format!("{field} must be a UUID, got '{raw}'")))
}

/// Parse one of the lowercase text enums from `crashkart_core`.
pub(super) fn parse_enum<T>(request_id: &str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = CoreError>,
{
    raw.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|e: CoreError| ApiError::validation(request_id, e.to_string()))
}

pub(super) fn parse_optional_enum<T>(request_id: &str, raw: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: FromStr<Err = CoreError>,
{
    raw.map(|r| parse_enum(request_id, r)).transpose()
}

/// Trimmed, non-empty text no longer than `max` characters.
pub(super) fn required_text(
    request_id: &str,
    field: &str,
    value: &str,
    max: usize,
) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > max {
        return Err(ApiError::validation(
            request_id,
            format!("{field} must be 1-{max} characters"),
        ));
    }
    Ok(trimmed.to_owned())
}

/// Optional free text; blank becomes `None`.
pub(super) fn optional_text(
    request_id: &str,
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => required_text(request_id, field, v, max).map(Some),
    }
}

/// Look up a customer by the public id in the path.
pub(super) async fn resolve_user(
    state: &AppState,
    request_id: &str,
    raw: &str,
) -> Result<crashkart_db::UserRow, ApiError> {
    let public_id = parse_public_id(request_id, "user_id", raw)?;
    crashkart_db::get_user_by_public_id(&state.pool, public_id)
        .await
        .map_err(|e| map_db_error(request_id.to_owned(), &e))?
        .ok_or_else(|| ApiError::not_found(request_id, "user"))
}

pub(super) async fn resolve_order(
    state: &AppState,
    request_id: &str,
    raw: &str,
) -> Result<crashkart_db::OrderRow, ApiError> {
    let public_id = parse_public_id(request_id, "order_id", raw)?;
    crashkart_db::get_order_by_public_id(&state.pool, public_id)
        .await
        .map_err(|e| map_db_error(request_id.to_owned(), &e))?
        .ok_or_else(|| ApiError::not_found(request_id, "order"))
}

pub(super) async fn resolve_product(
    state: &AppState,
    request_id: &str,
    raw: &str,
) -> Result<crashkart_db::ProductRow, ApiError> {
    let public_id = parse_public_id(request_id, "product_id", raw)?;
    crashkart_db::get_product_by_public_id(&state.pool, public_id)
        .await
        .map_err(|e| map_db_error(request_id.to_owned(), &e))?
        .ok_or_else(|| ApiError::not_found(request_id, "product"))
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-gateway-signature"),
        ])
}

/// Storefront routes. Customers are addressed by user public id; order
/// routes take the order public id.
fn customer_router(rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/users", post(users::create_user))
        .route("/api/v1/users/{user_id}", get(users::get_user))
        .route("/api/v1/products", get(catalog::list_products))
        .route("/api/v1/products/{product_id}", get(catalog::get_product))
        .route("/api/v1/users/{user_id}/cart", get(catalog::list_cart))
        .route(
            "/api/v1/users/{user_id}/cart/{product_id}",
            put(catalog::put_cart_item).delete(catalog::delete_cart_item),
        )
        .route("/api/v1/users/{user_id}/wishlist", get(catalog::list_wishlist))
        .route(
            "/api/v1/users/{user_id}/wishlist/{product_id}",
            put(catalog::put_wishlist_item).delete(catalog::delete_wishlist_item),
        )
        .route(
            "/api/v1/users/{user_id}/orders",
            get(orders::list_user_orders).post(orders::create_order),
        )
        .route("/api/v1/orders/{order_id}", get(orders::get_order))
        .route(
            "/api/v1/orders/{order_id}/scratch-card",
            post(orders::scratch_card),
        )
        .route("/api/v1/payments/verify", post(payments::verify_checkout))
        .route("/api/v1/users/{user_id}/crashcash", get(crashcash::get_wallet))
        .route(
            "/api/v1/users/{user_id}/crashcash/ledger",
            get(crashcash::list_ledger),
        )
        .route(
            "/api/v1/users/{user_id}/returns",
            get(support::returns::list_user_returns).post(support::returns::create_return),
        )
        .route(
            "/api/v1/users/{user_id}/complaints",
            get(support::complaints::list_user_complaints)
                .post(support::complaints::create_complaint),
        )
        .route(
            "/api/v1/users/{user_id}/notifications",
            get(support::notifications::list_notifications),
        )
        .route(
            "/api/v1/users/{user_id}/notifications/read-all",
            post(support::notifications::mark_all_read),
        )
        .route(
            "/api/v1/users/{user_id}/notifications/{notification_id}/read",
            post(support::notifications::mark_read),
        )
        .route(
            "/api/v1/seller-applications",
            post(support::sellers::submit_application),
        )
        .layer(axum::middleware::from_fn_with_state(
            rate_limit,
            enforce_rate_limit,
        ))
}

fn admin_router(auth: AuthState, rate_limit: RateLimitState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/products", post(catalog::create_product))
        .route(
            "/api/v1/admin/products/{product_id}/stock",
            put(catalog::set_stock),
        )
        .route("/api/v1/admin/orders", get(orders::list_orders))
        .route(
            "/api/v1/admin/orders/{order_id}/status",
            put(orders::update_status),
        )
        .route("/api/v1/admin/returns", get(support::returns::list_returns))
        .route(
            "/api/v1/admin/returns/{return_id}/status",
            put(support::returns::update_status),
        )
        .route(
            "/api/v1/admin/complaints",
            get(support::complaints::list_complaints),
        )
        .route(
            "/api/v1/admin/complaints/{complaint_id}/status",
            put(support::complaints::update_status),
        )
        .route(
            "/api/v1/admin/seller-applications",
            get(support::sellers::list_applications),
        )
        .route(
            "/api/v1/admin/seller-applications/{application_id}/status",
            put(support::sellers::update_status),
        )
        .route("/api/v1/admin/crashcash/grants", post(crashcash::grant))
        .route("/api/v1/admin/crashcash/audit", get(crashcash::audit))
        .route(
            "/api/v1/admin/crashcash/users/{user_id}/repair",
            post(crashcash::repair),
        )
        .route("/api/v1/admin/crashcash/sweep", post(crashcash::sweep))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit,
                    enforce_rate_limit,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth,
                    require_bearer_auth,
                )),
        )
}

pub fn build_app(state: AppState, auth: AuthState, rate_limit: RateLimitState) -> Router {
    // The gateway retries webhooks on its own schedule; never throttle them.
    let public_routes = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/payments/webhook", post(payments::webhook));

    Router::new()
        .merge(public_routes)
        .merge(customer_router(rate_limit.clone()))
        .merge(admin_router(auth, rate_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);
    let gateway = if state.gateway.is_some() {
        "configured"
    } else {
        "disabled"
    };

    match crashkart_db::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                    gateway,
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                        gateway,
                    },
                    meta,
                }),
            )
        }
    }
}

pub fn default_rate_limit_state() -> RateLimitState {
    RateLimitState::new(120, Duration::from_secs(60))
}
