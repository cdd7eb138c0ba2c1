use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Extension, Json,
};
use crashkart_gateway::WebhookEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;
use crate::reconcile::{self, SignatureRejection, WebhookOutcome, WebhookReport};

use super::{map_db_error, ApiError, ApiResponse, AppState};

const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Deserialize)]
pub(super) struct VerifyCheckoutRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub(super) struct VerifyCheckoutResponse {
    outcome: WebhookOutcome,
    order_id: Uuid,
    status: String,
    is_paid: bool,
}

/// POST /api/v1/payments/webhook
///
/// Answers 200 for every authenticated, well-formed delivery. Only a failure
/// to record the payment itself yields a 5xx, which makes the gateway
/// redeliver.
pub(super) async fn webhook(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookReport>>, ApiError> {
    let rid = &req_id.0;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    reconcile::check_webhook_signature(&state.config, &body, signature).map_err(|rejection| {
        tracing::warn!(reason = rejection.message(), "webhook rejected");
        match rejection {
            SignatureRejection::SecretNotConfigured => {
                ApiError::new(rid, "internal_error", rejection.message())
            }
            SignatureRejection::Missing | SignatureRejection::Mismatch => {
                ApiError::new(rid, "invalid_signature", rejection.message())
            }
        }
    })?;

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "unparsable webhook body");
        ApiError::new(rid, "bad_request", format!("invalid webhook payload: {e}"))
    })?;

    let report = reconcile::handle_webhook(&state.pool, &state.config, &event)
        .await
        .map_err(|e| {
            tracing::error!(event = %event.event, error = %e, "webhook processing failed");
            ApiError::new(rid, "internal_error", "webhook processing failed")
        })?;

    Ok(ApiResponse::new(req_id.0, report))
}

/// POST /api/v1/payments/verify
///
/// Confirms a checkout callback from the browser, checks the payment with
/// the gateway, and applies it the same way a captured webhook would.
pub(super) async fn verify_checkout(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<VerifyCheckoutRequest>,
) -> Result<Json<ApiResponse<VerifyCheckoutResponse>>, ApiError> {
    let rid = &req_id.0;
    let Some(gateway) = state.gateway.as_ref() else {
        return Err(ApiError::new(
            rid,
            "service_unavailable",
            "online payments are not configured",
        ));
    };

    let order_ref = body.gateway_order_id.trim();
    let payment_ref = body.gateway_payment_id.trim();
    if order_ref.is_empty() || payment_ref.is_empty() {
        return Err(ApiError::validation(
            rid,
            "gateway_order_id and gateway_payment_id are required",
        ));
    }

    crashkart_gateway::verify_checkout_signature(
        gateway.key_secret(),
        order_ref,
        payment_ref,
        &body.signature,
    )
    .map_err(|_| {
        tracing::warn!(gateway_order_id = order_ref, "checkout signature mismatch");
        ApiError::new(rid, "invalid_signature", "checkout signature does not match")
    })?;

    let order = crashkart_db::find_order_by_gateway_id(&state.pool, order_ref)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| ApiError::not_found(rid, "order"))?;

    let payment = gateway.fetch_payment(payment_ref).await.map_err(|e| {
        tracing::error!(gateway_payment_id = payment_ref, error = %e, "payment lookup failed");
        ApiError::new(rid, "bad_gateway", "payment gateway is unavailable, try again")
    })?;
    let method =
        reconcile::check_captured_payment(&payment, order_ref, order.total).map_err(|mismatch| {
            tracing::warn!(
                order = %order.public_id,
                gateway_payment_id = payment_ref,
                reason = %mismatch.message(),
                "checkout payment rejected"
            );
            ApiError::new(rid, "conflict", mismatch.message())
        })?;

    let record =
        reconcile::apply_payment(&state.pool, &state.config, order.id, Some(payment_ref), method)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;

    let outcome = WebhookOutcome::of_payment(&record);
    let order = record.order();
    Ok(ApiResponse::new(
        req_id.0.clone(),
        VerifyCheckoutResponse {
            outcome,
            order_id: order.public_id,
            status: order.status.clone(),
            is_paid: order.is_paid,
        },
    ))
}
