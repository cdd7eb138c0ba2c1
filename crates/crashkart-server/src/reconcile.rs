//! Payment reconciliation shared by the gateway webhook and checkout
//! verification.
//!
//! Recording the payment is the only step whose failure is reported back
//! to the caller. Reward accrual and the confirmation notification run
//! afterwards, each guarded by a one-shot flag in the order notes, and
//! their failures are logged and swallowed. Both follow-ups are re-attempted
//! on every delivery, so a redelivered webhook completes whatever an earlier
//! delivery left undone without ever repeating it.

use chrono::Utc;
use crashkart_core::{
    money, rewards, AppConfig, NotificationKind, OrderStatus, PaymentMethod, RewardSource,
};
use crashkart_db::{
    claim_notes_flag, create_notification, find_order_by_gateway_id, grant_in_tx,
    record_payment_failure, record_payment_success, DbError, GrantOutcome, NewGrant,
    NewNotification, NotesFlag, OrderRow, PaymentRecord,
};
use crashkart_gateway::{verify_webhook_signature, PaymentEntity, WebhookEvent, WebhookKind};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// The event had already been applied.
    Duplicate,
    /// Unknown event type or no matching order.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    pub outcome: WebhookOutcome,
    pub order_id: Option<Uuid>,
}

impl WebhookOutcome {
    #[must_use]
    pub fn of_payment(record: &PaymentRecord) -> Self {
        match record {
            PaymentRecord::Recorded(_) | PaymentRecord::PaidAfterCancel(_) => {
                WebhookOutcome::Processed
            }
            PaymentRecord::AlreadyRecorded(_) => WebhookOutcome::Duplicate,
        }
    }
}

impl WebhookReport {
    fn ignored() -> Self {
        Self {
            outcome: WebhookOutcome::Ignored,
            order_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified,
    /// Outside production with no header or no secret configured.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureRejection {
    Missing,
    Mismatch,
    SecretNotConfigured,
}

impl SignatureRejection {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            SignatureRejection::Missing => "missing x-gateway-signature header",
            SignatureRejection::Mismatch => "webhook signature does not match",
            SignatureRejection::SecretNotConfigured => "webhook secret is not configured",
        }
    }
}

/// Decide whether a webhook body may be processed.
///
/// A present header is always checked when a secret is configured. In
/// production both the header and the secret are mandatory.
///
/// # Errors
///
/// Returns the [`SignatureRejection`] describing why the delivery was refused.
pub fn check_webhook_signature(
    config: &AppConfig,
    body: &[u8],
    header: Option<&str>,
) -> Result<SignatureCheck, SignatureRejection> {
    let secret = config
        .gateway_webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty());
    let header = header.map(str::trim).filter(|h| !h.is_empty());

    match (secret, header) {
        (Some(secret), Some(signature)) => verify_webhook_signature(secret, body, signature)
            .map(|()| SignatureCheck::Verified)
            .map_err(|_| SignatureRejection::Mismatch),
        (None, _) if config.is_production() => Err(SignatureRejection::SecretNotConfigured),
        (Some(_), None) if config.is_production() => Err(SignatureRejection::Missing),
        _ => {
            tracing::debug!("webhook signature verification skipped outside production");
            Ok(SignatureCheck::Skipped)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMismatch {
    OtherOrder,
    NotCaptured(String),
    Amount { expected: Decimal, paid: Decimal },
}

impl PaymentMismatch {
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            PaymentMismatch::OtherOrder => "payment belongs to a different order".to_string(),
            PaymentMismatch::NotCaptured(status) => format!("payment is {status}, not captured"),
            PaymentMismatch::Amount { expected, paid } => {
                format!("payment amount {paid} does not match order total {expected}")
            }
        }
    }
}

/// Check a payment fetched from the gateway against the local order and
/// return its normalized method.
///
/// # Errors
///
/// Returns the [`PaymentMismatch`] when the payment is for another order,
/// is not captured (or authorized), or carries a different amount.
pub fn check_captured_payment(
    payment: &PaymentEntity,
    gateway_order_id: &str,
    total: Decimal,
) -> Result<Option<PaymentMethod>, PaymentMismatch> {
    if payment
        .order_id
        .as_deref()
        .is_some_and(|id| id != gateway_order_id)
    {
        return Err(PaymentMismatch::OtherOrder);
    }
    if !matches!(payment.status.as_str(), "captured" | "authorized") {
        return Err(PaymentMismatch::NotCaptured(payment.status.clone()));
    }
    let paid = money::from_minor_units(payment.amount);
    let expected = money::normalize(total);
    if paid != expected {
        return Err(PaymentMismatch::Amount { expected, paid });
    }
    Ok(payment.method.as_deref().map(PaymentMethod::normalize))
}

/// Apply one gateway event.
///
/// # Errors
///
/// Returns [`DbError`] only when the order lookup or the payment record
/// itself fails; the caller should let the gateway redeliver.
pub async fn handle_webhook(
    pool: &PgPool,
    config: &AppConfig,
    event: &WebhookEvent,
) -> Result<WebhookReport, DbError> {
    let kind = event.kind();
    if kind == WebhookKind::Other {
        tracing::info!(event = %event.event, "ignoring unhandled webhook event");
        return Ok(WebhookReport::ignored());
    }

    let Some(gateway_order_id) = event.gateway_order_id() else {
        tracing::warn!(event = %event.event, "webhook carries no gateway order id");
        return Ok(WebhookReport::ignored());
    };

    let Some(order) = find_order_by_gateway_id(pool, gateway_order_id).await? else {
        tracing::warn!(gateway_order_id, event = %event.event, "webhook for unknown order");
        return Ok(WebhookReport::ignored());
    };

    let payment = event.payment();
    let payment_id = payment.map(|p| p.id.as_str()).filter(|id| !id.is_empty());

    let outcome = match kind {
        WebhookKind::PaymentCaptured | WebhookKind::OrderPaid => {
            let method = payment
                .and_then(|p| p.method.as_deref())
                .map(PaymentMethod::normalize);
            let record = apply_payment(pool, config, order.id, payment_id, method).await?;
            WebhookOutcome::of_payment(&record)
        }
        WebhookKind::PaymentFailed => {
            let reason = payment
                .and_then(|p| p.error_description.as_deref())
                .unwrap_or("payment failed");
            match record_payment_failure(pool, order.id, payment_id, reason).await? {
                Some(updated) => {
                    if let Err(e) = notify_payment_failed(pool, &updated, reason).await {
                        tracing::error!(order = %updated.public_id, error = %e, "failed to notify payment failure");
                    }
                    WebhookOutcome::Processed
                }
                None => WebhookOutcome::Duplicate,
            }
        }
        WebhookKind::Other => WebhookOutcome::Ignored,
    };

    tracing::info!(
        order = %order.public_id,
        event = %event.event,
        outcome = ?outcome,
        "webhook reconciled"
    );
    Ok(WebhookReport {
        outcome,
        order_id: Some(order.public_id),
    })
}

/// Mark an order paid, then run the post-payment follow-ups.
///
/// Orders that were cancelled or returned get no reward and no
/// confirmation, even when the payment was recorded before the cancel.
///
/// # Errors
///
/// Returns [`DbError`] if the payment could not be recorded. Follow-up
/// failures are logged only.
pub async fn apply_payment(
    pool: &PgPool,
    config: &AppConfig,
    order_id: i64,
    payment_id: Option<&str>,
    method: Option<PaymentMethod>,
) -> Result<PaymentRecord, DbError> {
    let record = record_payment_success(pool, order_id, payment_id, method, Utc::now()).await?;
    let order = record.order();
    let live = order.status().is_ok_and(OrderStatus::accepts_payment);
    if live && !matches!(record, PaymentRecord::PaidAfterCancel(_)) {
        run_follow_ups(pool, config, order).await;
    }
    Ok(record)
}

async fn run_follow_ups(pool: &PgPool, config: &AppConfig, order: &OrderRow) {
    if let Err(e) = grant_order_reward(pool, config, order).await {
        tracing::error!(order = %order.public_id, error = %e, "order reward grant failed");
    }
    if let Err(e) = send_confirmation(pool, config, order).await {
        tracing::error!(order = %order.public_id, error = %e, "order confirmation failed");
    }
}

async fn grant_order_reward(
    pool: &PgPool,
    config: &AppConfig,
    order: &OrderRow,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    if !claim_notes_flag(&mut *tx, order.id, NotesFlag::RewardGranted).await? {
        return Ok(());
    }

    let amount = rewards::order_reward(order.total, &config.rewards);
    if amount > Decimal::ZERO {
        let outcome = grant_in_tx(
            &mut tx,
            &NewGrant {
                user_id: order.user_id,
                amount,
                source: RewardSource::Order,
                expires_at: rewards::expires_at(Utc::now(), &config.rewards),
                order_id: Some(order.id),
                scratch_session_id: None,
                note: Some("order reward"),
            },
        )
        .await?;

        if let GrantOutcome::Granted { balance_after, .. } = outcome {
            let symbol = config.currency_symbol.as_str();
            let body = format!(
                "{} CrashCash added for order {}. Wallet balance: {}.",
                money::format_amount(symbol, amount),
                order.public_id,
                money::format_amount(symbol, balance_after),
            );
            create_notification(
                &mut *tx,
                &NewNotification {
                    user_id: order.user_id,
                    kind: NotificationKind::CrashcashCredited,
                    title: "CrashCash credited",
                    body: &body,
                    order_id: Some(order.id),
                },
            )
            .await?;
        }
    }

    tx.commit().await?;
    tracing::info!(order = %order.public_id, %amount, "order reward settled");
    Ok(())
}

async fn send_confirmation(
    pool: &PgPool,
    config: &AppConfig,
    order: &OrderRow,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    if !claim_notes_flag(&mut *tx, order.id, NotesFlag::ConfirmationSent).await? {
        return Ok(());
    }

    let body = format!(
        "Payment of {} received. Order {} is confirmed.",
        money::format_amount(&config.currency_symbol, order.total),
        order.public_id,
    );
    create_notification(
        &mut *tx,
        &NewNotification {
            user_id: order.user_id,
            kind: NotificationKind::OrderConfirmed,
            title: "Order confirmed",
            body: &body,
            order_id: Some(order.id),
        },
    )
    .await?;

    tx.commit().await?;
    tracing::info!(order = %order.public_id, "order confirmation sent");
    Ok(())
}

async fn notify_payment_failed(pool: &PgPool, order: &OrderRow, reason: &str) -> Result<(), DbError> {
    let body = format!("Payment for order {} did not go through: {reason}", order.public_id);
    create_notification(
        pool,
        &NewNotification {
            user_id: order.user_id,
            kind: NotificationKind::PaymentFailed,
            title: "Payment failed",
            body: &body,
            order_id: Some(order.id),
        },
    )
    .await?;
    Ok(())
}
