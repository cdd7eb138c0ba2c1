//! Payment gateway integration: order creation, payment lookup and
//! signature verification.

pub mod client;
pub mod error;
mod retry;
pub mod signature;
pub mod types;

pub use client::{GatewayClient, GatewayConfig};
pub use error::GatewayError;
pub use signature::{sign, verify_checkout_signature, verify_webhook_signature};
pub use types::{GatewayOrder, PaymentEntity, WebhookEvent, WebhookKind};
