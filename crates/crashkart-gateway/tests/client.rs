//! Integration tests for `GatewayClient` using wiremock HTTP mocks.

use crashkart_gateway::{GatewayClient, GatewayConfig, GatewayError};
use rust_decimal::Decimal;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(base_url: &str, max_retries: u32) -> GatewayClient {
    GatewayClient::new(&GatewayConfig {
        base_url: base_url.to_owned(),
        key_id: "rzp_test_key".to_owned(),
        key_secret: "test-secret".to_owned(),
        timeout_secs: 5,
        max_retries,
        retry_delay_ms: 0,
    })
    .expect("client construction should not fail")
}

fn no_notes() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}

#[tokio::test]
async fn create_order_sends_minor_units_and_parses_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header_exists("authorization"))
        .and(body_partial_json(serde_json::json!({
            "amount": 124_950,
            "currency": "INR",
            "receipt": "rcpt-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "order_Abc123",
            "amount": 124_950,
            "currency": "INR",
            "receipt": "rcpt-1",
            "status": "created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    let order = client
        .create_order(Decimal::new(124_950, 2), "INR", "rcpt-1", &no_notes())
        .await
        .expect("should create order");

    assert_eq!(order.id, "order_Abc123");
    assert_eq!(order.amount, 124_950);
    assert_eq!(order.status, "created");
}

#[tokio::test]
async fn create_order_retries_server_errors_then_gives_up() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 2);
    let err = client
        .create_order(Decimal::new(100, 0), "INR", "rcpt-2", &no_notes())
        .await
        .expect_err("should fail after retries");

    assert!(matches!(err, GatewayError::Status { status: 502, .. }));
}

#[tokio::test]
async fn create_order_recovers_after_transient_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "order_retry",
            "amount": 10_000,
            "currency": "INR",
            "status": "created"
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    let order = client
        .create_order(Decimal::new(100, 0), "INR", "rcpt-3", &no_notes())
        .await
        .expect("should succeed on second attempt");

    assert_eq!(order.id, "order_retry");
    assert_eq!(order.receipt, None);
}

#[tokio::test]
async fn create_order_does_not_retry_client_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error":{"description":"amount too small"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    let err = client
        .create_order(Decimal::new(1, 0), "INR", "rcpt-4", &no_notes())
        .await
        .expect_err("400 should fail");

    match err {
        GatewayError::Status { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("amount too small"));
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}

#[tokio::test]
async fn create_order_rejects_zero_amount_without_calling_gateway() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    let err = client
        .create_order(Decimal::ZERO, "INR", "rcpt-5", &no_notes())
        .await
        .expect_err("zero amount should be rejected");

    assert!(matches!(err, GatewayError::InvalidAmount(_)));
}

#[tokio::test]
async fn fetch_payment_parses_entity() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/payments/pay_77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pay_77",
            "order_id": "order_77",
            "amount": 50_000,
            "currency": "INR",
            "status": "captured",
            "method": "card"
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 0);
    let payment = client.fetch_payment("pay_77").await.expect("should parse");

    assert_eq!(payment.order_id.as_deref(), Some("order_77"));
    assert_eq!(payment.method.as_deref(), Some("card"));
}

#[tokio::test]
async fn malformed_response_is_a_deserialize_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/payments/pay_bad"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 3);
    let err = client.fetch_payment("pay_bad").await.expect_err("should fail");

    assert!(matches!(err, GatewayError::Deserialize { .. }));
}
