use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use crashkart_core::{AppConfig, Environment, RewardPolicy};
use crashkart_gateway::{GatewayClient, GatewayConfig};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::middleware::AuthState;

pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        env: Environment::Test,
        bind_addr: "127.0.0.1:0".parse().expect("socket addr"),
        log_level: "info".to_string(),
        app_base_url: "http://localhost:3000".to_string(),
        trust_forwarded_for: false,
        db_max_connections: 5,
        db_min_connections: 1,
        db_acquire_timeout_secs: 5,
        currency: "INR".to_string(),
        currency_symbol: "₹".to_string(),
        gateway_base_url: "http://127.0.0.1:1".to_string(),
        gateway_key_id: None,
        gateway_key_secret: None,
        gateway_webhook_secret: None,
        gateway_timeout_secs: 5,
        gateway_max_retries: 0,
        gateway_retry_delay_ms: 0,
        rewards: RewardPolicy::default(),
        expiry_sweep_cron: None,
    }
}

fn app_with(pool: PgPool, config: AppConfig, gateway: Option<GatewayClient>) -> Router {
    let auth = AuthState::from_env(true).expect("auth");
    build_app(
        AppState {
            pool,
            config: Arc::new(config),
            gateway,
        },
        auth,
        default_rate_limit_state(),
    )
}

fn app(pool: PgPool) -> Router {
    app_with(pool, test_config(), None)
}

fn app_with_gateway(pool: PgPool, server: &MockServer) -> Router {
    let gateway = GatewayClient::new(&GatewayConfig {
        base_url: server.uri(),
        key_id: "key_test".to_string(),
        key_secret: "checkout-secret".to_string(),
        timeout_secs: 5,
        max_retries: 0,
        retry_delay_ms: 0,
    })
    .expect("gateway client");
    let config = AppConfig {
        gateway_key_id: Some("key_test".to_string()),
        ..test_config()
    };
    app_with(pool, config, Some(gateway))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json parse")
    };
    (status, json)
}

async fn post_webhook(app: &Router, body: &Value, signature: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-gateway-signature", signature);
    }
    let request = builder
        .body(Body::from(body.to_string()))
        .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    (status, serde_json::from_slice(&bytes).expect("json parse"))
}

/// Decimals serialize as strings.
fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal string")
        .parse()
        .expect("decimal")
}

async fn seed_user(pool: &PgPool, email: &str) -> crashkart_db::UserRow {
    crashkart_db::create_user(pool, email, "Test Rider", None)
        .await
        .expect("create user")
}

async fn seed_product(pool: &PgPool, price: Decimal, stock: i32) -> crashkart_db::ProductRow {
    crashkart_db::create_product(pool, "Crash Helmet", Some("Full face"), price, stock)
        .await
        .expect("create product")
}

fn captured_event(gateway_order_id: &str, payment_id: &str) -> Value {
    json!({
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": gateway_order_id,
                    "amount": 100_000,
                    "currency": "INR",
                    "status": "captured",
                    "method": "upi"
                }
            }
        }
    })
}

async fn mount_gateway_order(server: &MockServer, gateway_order_id: &str) {
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": gateway_order_id,
            "amount": 100_000,
            "currency": "INR",
            "receipt": "r",
            "status": "created"
        })))
        .mount(server)
        .await;
}

async fn mount_payment(server: &MockServer, payment_id: &str, gateway_order_id: &str, amount: i64) {
    Mock::given(method("GET"))
        .and(path(format!("/payments/{payment_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": payment_id,
            "order_id": gateway_order_id,
            "amount": amount,
            "currency": "INR",
            "status": "captured",
            "method": "card"
        })))
        .mount(server)
        .await;
}

/// Places a one-line online order and returns its public id.
async fn place_online_order(
    app: &Router,
    user: &crashkart_db::UserRow,
    product: &crashkart_db::ProductRow,
) -> String {
    let (status, json) = send(
        app,
        Method::POST,
        &format!("/api/v1/users/{}/orders", user.public_id),
        Some(json!({
            "items": [{ "product_id": product.public_id, "quantity": 1 }],
            "payment_method": "online",
            "shipping_address": { "line1": "1 Test St" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["data"]["id"].as_str().expect("order id").to_string()
}

async fn count(pool: &PgPool, sql: &str, order_id: i64) -> i64 {
    sqlx::query_scalar(sql)
        .bind(order_id)
        .fetch_one(pool)
        .await
        .expect("count query")
}

// -------------------------------------------------------------------------
// Pure helpers
// -------------------------------------------------------------------------

#[test]
fn normalize_limit_applies_defaults_and_bounds() {
    assert_eq!(normalize_limit(None), 50);
    assert_eq!(normalize_limit(Some(0)), 1);
    assert_eq!(normalize_limit(Some(1_000)), 200);
    assert_eq!(normalize_limit(Some(25)), 25);
}

#[test]
fn api_error_codes_map_to_statuses() {
    let cases = [
        ("validation_error", StatusCode::BAD_REQUEST),
        ("invalid_signature", StatusCode::BAD_REQUEST),
        ("conflict", StatusCode::CONFLICT),
        ("bad_gateway", StatusCode::BAD_GATEWAY),
        ("service_unavailable", StatusCode::SERVICE_UNAVAILABLE),
        ("anything_else", StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (code, status) in cases {
        let response = ApiError::new("req-1", code, "msg").into_response();
        assert_eq!(response.status(), status, "code {code}");
    }
}

#[test]
fn insufficient_crashcash_is_a_conflict() {
    let err = map_db_error(
        "req-1".to_string(),
        &crashkart_db::DbError::InsufficientCrashCash {
            requested: Decimal::new(100, 0),
            available: Decimal::new(40, 0),
        },
    );
    assert_eq!(err.error.code, "conflict");
    assert!(err.error.message.contains("requested 100"));
}

#[test]
fn enum_parsing_is_case_insensitive() {
    let status: crashkart_core::OrderStatus = parse_enum("r", " Shipped ").expect("parse");
    assert_eq!(status, crashkart_core::OrderStatus::Shipped);
    assert!(parse_enum::<crashkart_core::OrderStatus>("r", "lost").is_err());
}

// -------------------------------------------------------------------------
// Router tests
// -------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn health_reports_gateway_disabled(pool: PgPool) {
    let (status, json) = send(&app(pool), Method::GET, "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["database"], "ok");
    assert_eq!(json["data"]["gateway"], "disabled");
}

#[sqlx::test(migrations = "../../migrations")]
async fn user_signup_rejects_duplicate_email(pool: PgPool) {
    let app = app(pool);
    let body = json!({ "email": "Rider@Example.com", "name": "Rider" });

    let (status, json) = send(&app, Method::POST, "/api/v1/users", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["email"], "rider@example.com");
    assert_eq!(decimal(&json["data"]["crashcash_balance"]), Decimal::ZERO);

    let (status, json) = send(&app, Method::POST, "/api/v1/users", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "conflict");
}

#[sqlx::test(migrations = "../../migrations")]
async fn cart_lines_are_upserted(pool: PgPool) {
    let user = seed_user(&pool, "cart@example.com").await;
    let product = seed_product(&pool, Decimal::new(49_900, 2), 10).await;
    let app = app(pool);
    let uri = format!("/api/v1/users/{}/cart/{}", user.public_id, product.public_id);

    let (status, _) = send(&app, Method::PUT, &uri, Some(json!({ "quantity": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(&app, Method::PUT, &uri, Some(json!({ "quantity": 3 }))).await;
    assert_eq!(status, StatusCode::OK);

    let lines = json["data"]["items"].as_array().expect("items");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["quantity"], 3);

    let (status, _) = send(&app, Method::PUT, &uri, Some(json!({ "quantity": 100 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../migrations")]
async fn cod_order_reserves_stock_and_clears_cart(pool: PgPool) {
    let user = seed_user(&pool, "cod@example.com").await;
    let product = seed_product(&pool, Decimal::new(25_000, 2), 5).await;
    crashkart_db::upsert_cart_item(&pool, user.id, product.id, 2)
        .await
        .expect("cart");
    let app = app(pool.clone());

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/v1/users/{}/orders", user.public_id),
        Some(json!({
            "items": [{ "product_id": product.public_id, "quantity": 2 }],
            "payment_method": "COD",
            "shipping_address": { "line1": "12 MG Road", "city": "Pune" }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["payment_method"], "cod");
    assert_eq!(decimal(&json["data"]["total"]), Decimal::new(500, 0));
    assert!(json["data"].get("checkout").is_none());

    let stock: i32 = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(product.id)
        .fetch_one(&pool)
        .await
        .expect("stock");
    assert_eq!(stock, 3);
    assert!(crashkart_db::list_cart(&pool, user.id)
        .await
        .expect("cart")
        .is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn online_order_without_gateway_is_unavailable_and_restocked(pool: PgPool) {
    let user = seed_user(&pool, "nogw@example.com").await;
    let product = seed_product(&pool, Decimal::new(1_000, 0), 1).await;
    let app = app(pool.clone());

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/v1/users/{}/orders", user.public_id),
        Some(json!({
            "items": [{ "product_id": product.public_id, "quantity": 1 }],
            "payment_method": "online",
            "shipping_address": { "line1": "1 Test St" }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "service_unavailable");
    let stock: i32 = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(product.id)
        .fetch_one(&pool)
        .await
        .expect("stock");
    assert_eq!(stock, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn online_order_returns_checkout_details(pool: PgPool) {
    let server = MockServer::start().await;
    mount_gateway_order(&server, "order_GW1").await;
    let user = seed_user(&pool, "online@example.com").await;
    let product = seed_product(&pool, Decimal::new(1_000, 0), 3).await;
    let app = app_with_gateway(pool.clone(), &server);

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/v1/users/{}/orders", user.public_id),
        Some(json!({
            "items": [{ "product_id": product.public_id, "quantity": 1 }],
            "payment_method": "online",
            "shipping_address": { "line1": "1 Test St" }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["checkout"]["gateway_order_id"], "order_GW1");
    assert_eq!(json["data"]["checkout"]["amount"], 100_000);
    assert_eq!(json["data"]["checkout"]["key_id"], "key_test");

    let stored = crashkart_db::find_order_by_gateway_id(&pool, "order_GW1")
        .await
        .expect("lookup")
        .expect("order stored with gateway id");
    assert_eq!(stored.user_id, user.id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_webhook_rewards_and_confirms_once(pool: PgPool) {
    let server = MockServer::start().await;
    mount_gateway_order(&server, "order_DUP").await;
    let user = seed_user(&pool, "dup@example.com").await;
    let product = seed_product(&pool, Decimal::new(1_000, 0), 3).await;
    let app = app_with_gateway(pool.clone(), &server);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/v1/users/{}/orders", user.public_id),
        Some(json!({
            "items": [{ "product_id": product.public_id, "quantity": 1 }],
            "payment_method": "online",
            "shipping_address": { "line1": "1 Test St" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let event = captured_event("order_DUP", "pay_DUP");
    let (status, first) = post_webhook(&app, &event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["outcome"], "processed");

    let (status, second) = post_webhook(&app, &event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["outcome"], "duplicate");

    let order = crashkart_db::find_order_by_gateway_id(&pool, "order_DUP")
        .await
        .expect("lookup")
        .expect("order");
    assert!(order.is_paid);
    assert_eq!(order.status, "confirmed");
    assert_eq!(order.payment_method, "upi");
    assert_eq!(
        count(
            &pool,
            "SELECT COUNT(*) FROM crashcash_rewards WHERE order_id = $1",
            order.id
        )
        .await,
        1
    );
    assert_eq!(
        count(
            &pool,
            "SELECT COUNT(*) FROM notifications WHERE order_id = $1 AND kind = 'order_confirmed'",
            order.id
        )
        .await,
        1
    );

    let refreshed = crashkart_db::get_user(&pool, user.id).await.expect("user");
    assert_eq!(refreshed.crashcash_balance, Decimal::new(5_000, 2));
}

#[sqlx::test(migrations = "../../migrations")]
async fn webhook_for_unknown_order_is_ignored(pool: PgPool) {
    let (status, json) =
        post_webhook(&app(pool), &captured_event("order_NOPE", "pay_X"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["outcome"], "ignored");
}

#[sqlx::test(migrations = "../../migrations")]
async fn webhook_with_bad_signature_is_rejected(pool: PgPool) {
    let config = AppConfig {
        gateway_webhook_secret: Some("whsec".to_string()),
        ..test_config()
    };
    let app = app_with(pool, config, None);

    let (status, json) =
        post_webhook(&app, &captured_event("order_X", "pay_X"), Some("deadbeef")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_signature");
}

#[sqlx::test(migrations = "../../migrations")]
async fn malformed_webhook_body_is_a_bad_request(pool: PgPool) {
    let (status, json) = post_webhook(&app(pool), &json!({ "unexpected": true }), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
}

#[sqlx::test(migrations = "../../migrations")]
async fn payment_after_cancel_is_noted_but_not_rewarded(pool: PgPool) {
    let server = MockServer::start().await;
    mount_gateway_order(&server, "order_CXL").await;
    let user = seed_user(&pool, "late@example.com").await;
    let product = seed_product(&pool, Decimal::new(1_000, 0), 3).await;
    let app = app_with_gateway(pool.clone(), &server);

    let order_id = place_online_order(&app, &user, &product).await;
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/admin/orders/{order_id}/status"),
        Some(json!({ "status": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let event = captured_event("order_CXL", "pay_CXL");
    let (status, first) = post_webhook(&app, &event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["outcome"], "processed");
    let (_, second) = post_webhook(&app, &event, None).await;
    assert_eq!(second["data"]["outcome"], "duplicate");

    let order = crashkart_db::find_order_by_gateway_id(&pool, "order_CXL")
        .await
        .expect("lookup")
        .expect("order");
    assert_eq!(order.status, "cancelled");
    assert!(!order.is_paid);
    assert!(order.notes.0.paid_after_cancel);
    assert_eq!(order.notes.0.gateway_payment_id.as_deref(), Some("pay_CXL"));
    assert_eq!(
        count(
            &pool,
            "SELECT COUNT(*) FROM crashcash_rewards WHERE order_id = $1",
            order.id
        )
        .await,
        0
    );
    assert_eq!(
        count(
            &pool,
            "SELECT COUNT(*) FROM notifications WHERE order_id = $1 AND kind = 'order_confirmed'",
            order.id
        )
        .await,
        0
    );

    let refreshed = crashkart_db::get_user(&pool, user.id).await.expect("user");
    assert!(refreshed.crashcash_balance.is_zero());
}

#[sqlx::test(migrations = "../../migrations")]
async fn repeated_payment_failure_is_recorded_once(pool: PgPool) {
    let server = MockServer::start().await;
    mount_gateway_order(&server, "order_FAIL").await;
    let user = seed_user(&pool, "declined@example.com").await;
    let product = seed_product(&pool, Decimal::new(1_000, 0), 3).await;
    let app = app_with_gateway(pool.clone(), &server);
    place_online_order(&app, &user, &product).await;

    let event = json!({
        "event": "payment.failed",
        "payload": {
            "payment": {
                "entity": {
                    "id": "pay_FAIL",
                    "order_id": "order_FAIL",
                    "amount": 100_000,
                    "status": "failed",
                    "method": "card",
                    "error_description": "Card declined by issuer"
                }
            }
        }
    });
    let (status, first) = post_webhook(&app, &event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["outcome"], "processed");
    let (status, second) = post_webhook(&app, &event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["outcome"], "duplicate");

    let order = crashkart_db::find_order_by_gateway_id(&pool, "order_FAIL")
        .await
        .expect("lookup")
        .expect("order");
    assert_eq!(order.status, "pending");
    assert!(!order.is_paid);
    assert!(order.notes.0.payment_failed);
    assert_eq!(
        order.notes.0.last_payment_error.as_deref(),
        Some("Card declined by issuer")
    );
    assert_eq!(order.notes.0.gateway_payment_id.as_deref(), Some("pay_FAIL"));
    assert_eq!(
        count(
            &pool,
            "SELECT COUNT(*) FROM notifications WHERE order_id = $1 AND kind = 'payment_failed'",
            order.id
        )
        .await,
        1
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn checkout_verification_marks_order_paid(pool: PgPool) {
    let server = MockServer::start().await;
    mount_gateway_order(&server, "order_VER").await;
    mount_payment(&server, "pay_VER", "order_VER", 100_000).await;
    let user = seed_user(&pool, "verify@example.com").await;
    let product = seed_product(&pool, Decimal::new(1_000, 0), 3).await;
    let app = app_with_gateway(pool.clone(), &server);
    place_online_order(&app, &user, &product).await;

    let bad = json!({
        "gateway_order_id": "order_VER",
        "gateway_payment_id": "pay_VER",
        "signature": "00"
    });
    let (status, _) = send(&app, Method::POST, "/api/v1/payments/verify", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let signature =
        crashkart_gateway::sign("checkout-secret", b"order_VER|pay_VER").expect("sign");
    let good = json!({
        "gateway_order_id": "order_VER",
        "gateway_payment_id": "pay_VER",
        "signature": signature
    });
    let (status, json) = send(&app, Method::POST, "/api/v1/payments/verify", Some(good)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["outcome"], "processed");
    assert_eq!(json["data"]["is_paid"], true);

    let order = crashkart_db::find_order_by_gateway_id(&pool, "order_VER")
        .await
        .expect("lookup")
        .expect("order");
    assert_eq!(order.payment_method, "card");
}

#[sqlx::test(migrations = "../../migrations")]
async fn checkout_verification_rejects_short_payment(pool: PgPool) {
    let server = MockServer::start().await;
    mount_gateway_order(&server, "order_LOW").await;
    mount_payment(&server, "pay_LOW", "order_LOW", 100).await;
    let user = seed_user(&pool, "short@example.com").await;
    let product = seed_product(&pool, Decimal::new(1_000, 0), 3).await;
    let app = app_with_gateway(pool.clone(), &server);
    place_online_order(&app, &user, &product).await;

    let signature =
        crashkart_gateway::sign("checkout-secret", b"order_LOW|pay_LOW").expect("sign");
    let (status, json) = send(
        &app,
        Method::POST,
        "/api/v1/payments/verify",
        Some(json!({
            "gateway_order_id": "order_LOW",
            "gateway_payment_id": "pay_LOW",
            "signature": signature
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "conflict");

    let order = crashkart_db::find_order_by_gateway_id(&pool, "order_LOW")
        .await
        .expect("lookup")
        .expect("order");
    assert!(!order.is_paid);
    assert_eq!(order.status, "pending");
}

#[sqlx::test(migrations = "../../migrations")]
async fn scratch_card_grants_once_for_delivered_cod_order(pool: PgPool) {
    let user = seed_user(&pool, "scratch@example.com").await;
    let product = seed_product(&pool, Decimal::new(20_000, 2), 5).await;
    let app = app(pool.clone());

    let (_, created) = send(
        &app,
        Method::POST,
        &format!("/api/v1/users/{}/orders", user.public_id),
        Some(json!({
            "items": [{ "product_id": product.public_id, "quantity": 1 }],
            "payment_method": "cod",
            "shipping_address": { "line1": "1 Test St" }
        })),
    )
    .await;
    let order_id = created["data"]["id"].as_str().expect("order id").to_string();
    let scratch_uri = format!("/api/v1/orders/{order_id}/scratch-card");

    let (status, _) = send(&app, Method::POST, &scratch_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT, "pending COD order is not eligible");

    for next in ["confirmed", "shipped", "delivered"] {
        let (status, _) = send(
            &app,
            Method::PUT,
            &format!("/api/v1/admin/orders/{order_id}/status"),
            Some(json!({ "status": next })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "transition to {next}");
    }

    let (status, first) = send(&app, Method::POST, &scratch_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["already_scratched"], false);

    let (status, second) = send(&app, Method::POST, &scratch_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["already_scratched"], true);
    assert_eq!(second["data"]["reward_id"], first["data"]["reward_id"]);

    let rewards: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM crashcash_rewards WHERE user_id = $1 AND source = 'scratch'",
    )
    .bind(user.id)
    .fetch_one(&pool)
    .await
    .expect("count");
    assert_eq!(rewards, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn admin_routes_require_a_key_when_auth_is_enabled(pool: PgPool) {
    let app = build_app(
        AppState {
            pool,
            config: Arc::new(test_config()),
            gateway: None,
        },
        AuthState::from_keys(["secret"]),
        default_rate_limit_state(),
    );

    let (status, _) = send(&app, Method::GET, "/api/v1/admin/orders", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/v1/admin/orders")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "../../migrations")]
async fn admin_grant_then_sweep_dry_run(pool: PgPool) {
    let user = seed_user(&pool, "grant@example.com").await;
    let app = app(pool.clone());

    let (status, json) = send(
        &app,
        Method::POST,
        "/api/v1/admin/crashcash/grants",
        Some(json!({ "user_id": user.public_id, "amount": "25.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["reward"]["source"], "coupon");
    assert_eq!(decimal(&json["data"]["balance_after"]), Decimal::new(25, 0));

    let (status, json) = send(
        &app,
        Method::POST,
        "/api/v1/admin/crashcash/sweep?dry_run=true",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["dry_run"], true);
    assert_eq!(json["data"]["rewards_expired"], 0);

    let (status, json) = send(&app, Method::GET, "/api/v1/admin/crashcash/audit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"].as_array().expect("rows").is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn seller_application_duplicate_pending_email_conflicts(pool: PgPool) {
    let app = app(pool);
    let body = json!({
        "business_name": "Gear Hub",
        "contact_name": "Asha",
        "email": "gear@example.com",
        "phone": "+91 98765 43210",
        "gst_number": "27AAPFU0939F1ZV"
    });

    let (status, json) =
        send(&app, Method::POST, "/api/v1/seller-applications", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["status"], "pending");

    let (status, _) = send(&app, Method::POST, "/api/v1/seller-applications", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
