//! Wire types for the gateway REST API and webhook deliveries.
//!
//! Amounts on the wire are integer minor units (paise for INR).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Orders API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateOrderBody<'a> {
    pub amount: i64,
    pub currency: &'a str,
    pub receipt: &'a str,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub notes: &'a serde_json::Map<String, serde_json::Value>,
}

/// An order object as returned by `POST /orders`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// A payment entity, returned by `GET /payments/{id}` and embedded in
/// webhook payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub status: String,
    /// Instrument used, e.g. `card`, `upi`, `netbanking`.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderEntity {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub payment: Option<Wrapped<PaymentEntity>>,
    #[serde(default)]
    pub order: Option<Wrapped<OrderEntity>>,
}

/// Body of a webhook delivery:
/// `{ "event": "payment.captured", "payload": { "payment": { "entity": {...} } } }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

/// The webhook events the reconciler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    PaymentCaptured,
    OrderPaid,
    PaymentFailed,
    Other,
}

impl WebhookEvent {
    #[must_use]
    pub fn kind(&self) -> WebhookKind {
        match self.event.as_str() {
            "payment.captured" => WebhookKind::PaymentCaptured,
            "order.paid" => WebhookKind::OrderPaid,
            "payment.failed" => WebhookKind::PaymentFailed,
            _ => WebhookKind::Other,
        }
    }

    #[must_use]
    pub fn payment(&self) -> Option<&PaymentEntity> {
        self.payload.payment.as_ref().map(|w| &w.entity)
    }

    /// Gateway order id, taken from the payment entity and falling back to
    /// the order entity.
    #[must_use]
    pub fn gateway_order_id(&self) -> Option<&str> {
        self.payment()
            .and_then(|p| p.order_id.as_deref())
            .or_else(|| self.payload.order.as_ref().map(|o| o.entity.id.as_str()))
            .filter(|id| !id.is_empty())
    }
}
