//! Database operations for `orders` and `order_items`.
//!
//! Order placement, payment recording and status transitions each run in a
//! single transaction holding a row lock on the order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use crashkart_core::rewards;
use crashkart_core::{
    NotificationKind, OrderNotes, OrderStatus, PaymentMethod, RewardPolicy, RewardSource,
};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::notifications::{create_notification, NewNotification};
use crate::{ledger, DbError};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `orders` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub public_id: Uuid,
    pub user_id: i64,
    pub status: String,
    pub payment_method: String,
    pub is_paid: bool,
    pub subtotal: Decimal,
    pub crashcash_applied: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub shipping_address: Json<serde_json::Value>,
    /// Mirrors `notes.gatewayOrderId` in an indexed column.
    pub gateway_order_id: Option<String>,
    pub notes: Json<OrderNotes>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    /// # Errors
    ///
    /// Returns [`crashkart_core::CoreError::InvalidEnum`] if the stored
    /// status is not recognised.
    pub fn status(&self) -> Result<OrderStatus, crashkart_core::CoreError> {
        self.status.parse()
    }

    #[must_use]
    pub fn payment_method(&self) -> PaymentMethod {
        PaymentMethod::normalize(&self.payment_method)
    }
}

/// A row from `order_items` joined with the product's public id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderItemRow {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_public_id: Uuid,
    /// Name at time of purchase.
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

const ORDER_COLUMNS: &str = "id, public_id, user_id, status, payment_method, is_paid, subtotal, \
                             crashcash_applied, total, currency, shipping_address, \
                             gateway_order_id, notes, created_at, updated_at";

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_public_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub user_id: i64,
    pub items: &'a [NewOrderItem],
    pub payment_method: PaymentMethod,
    /// CrashCash the customer wants to spend; capped at the subtotal.
    pub crashcash_requested: Decimal,
    pub currency: &'a str,
    pub shipping_address: &'a serde_json::Value,
}

/// Result of recording a successful payment.
#[derive(Debug, Clone)]
pub enum PaymentRecord {
    Recorded(OrderRow),
    /// The order was already marked paid; nothing changed.
    AlreadyRecorded(OrderRow),
    /// The order had been cancelled or returned. The payment is noted for a
    /// manual refund; status and `is_paid` are left alone.
    PaidAfterCancel(OrderRow),
}

impl PaymentRecord {
    #[must_use]
    pub fn order(&self) -> &OrderRow {
        match self {
            PaymentRecord::Recorded(order)
            | PaymentRecord::AlreadyRecorded(order)
            | PaymentRecord::PaidAfterCancel(order) => order,
        }
    }
}

/// One-shot boolean flags kept in `orders.notes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotesFlag {
    ConfirmationSent,
    RewardGranted,
}

impl NotesFlag {
    fn key(self) -> &'static str {
        match self {
            NotesFlag::ConfirmationSent => "confirmationSent",
            NotesFlag::RewardGranted => "rewardGranted",
        }
    }
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct LockedProduct {
    id: i64,
    public_id: Uuid,
    name: String,
    price: Decimal,
    stock: i32,
    is_active: bool,
}

/// Place an order: snapshot prices, take stock, apply CrashCash and clear
/// the purchased cart lines, all in one transaction.
///
/// Repeated products in `items` are merged. Product rows are locked in id
/// order.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] for an empty order, [`DbError::NotFound`]
/// for an unknown or inactive product, [`DbError::OutOfStock`],
/// [`DbError::InsufficientCrashCash`] from the ledger, or [`DbError::Sqlx`].
pub async fn create_order(pool: &PgPool, order: &NewOrder<'_>) -> Result<OrderRow, DbError> {
    let mut wanted: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in order.items {
        if item.quantity <= 0 {
            return Err(DbError::Conflict(format!(
                "quantity for product {} must be positive",
                item.product_public_id
            )));
        }
        *wanted.entry(item.product_public_id).or_insert(0) += item.quantity;
    }
    if wanted.is_empty() {
        return Err(DbError::Conflict("order must contain at least one item".to_string()));
    }

    let mut tx = pool.begin().await?;

    let ids: Vec<Uuid> = wanted.keys().copied().collect();
    let products = sqlx::query_as::<_, LockedProduct>(
        "SELECT id, public_id, name, price, stock, is_active FROM products \
         WHERE public_id = ANY($1) \
         ORDER BY id \
         FOR UPDATE",
    )
    .bind(&ids)
    .fetch_all(&mut *tx)
    .await?;

    let mut lines = Vec::with_capacity(products.len());
    let mut subtotal = Decimal::ZERO;
    for (public_id, quantity) in &wanted {
        let product = products
            .iter()
            .find(|p| p.public_id == *public_id && p.is_active)
            .ok_or(DbError::NotFound)?;
        if product.stock < *quantity {
            return Err(DbError::OutOfStock {
                product: *public_id,
                requested: *quantity,
                available: product.stock,
            });
        }
        subtotal += product.price * Decimal::from(*quantity);
        lines.push((product, *quantity));
    }
    let subtotal = crashkart_core::money::normalize(subtotal);
    let applied = crashkart_core::money::normalize(
        order.crashcash_requested.max(Decimal::ZERO).min(subtotal),
    );
    let total = subtotal - applied;

    let created = sqlx::query_as::<_, OrderRow>(&format!(
        "INSERT INTO orders \
             (public_id, user_id, status, payment_method, subtotal, crashcash_applied, total, \
              currency, shipping_address) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(order.user_id)
    .bind(OrderStatus::Pending.as_str())
    .bind(order.payment_method.as_str())
    .bind(subtotal)
    .bind(applied)
    .bind(total)
    .bind(order.currency)
    .bind(Json(order.shipping_address))
    .fetch_one(&mut *tx)
    .await?;

    for (product, quantity) in &lines {
        sqlx::query(
            "INSERT INTO order_items (order_id, product_id, product_name, unit_price, quantity) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(created.id)
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE products SET stock = stock - $1, updated_at = NOW() WHERE id = $2")
            .bind(quantity)
            .bind(product.id)
            .execute(&mut *tx)
            .await?;
    }

    if applied > Decimal::ZERO {
        ledger::deduct_in_tx(&mut tx, order.user_id, applied, Some(created.id)).await?;
    }

    let product_ids: Vec<i64> = lines.iter().map(|(p, _)| p.id).collect();
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = ANY($2)")
        .bind(order.user_id)
        .bind(&product_ids)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        order = %created.public_id,
        user_id = order.user_id,
        %subtotal,
        crashcash = %applied,
        %total,
        "order created"
    );
    Ok(created)
}

/// Store the gateway's order id on the order, both in the indexed column
/// and in `notes.gatewayOrderId`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the order does not exist, or
/// [`DbError::Sqlx`] (including a unique violation if the gateway id is
/// already attached elsewhere).
pub async fn attach_gateway_order(
    pool: &PgPool,
    order_id: i64,
    gateway_order_id: &str,
) -> Result<OrderRow, DbError> {
    sqlx::query_as::<_, OrderRow>(&format!(
        "UPDATE orders \
         SET gateway_order_id = $1, \
             notes = notes || jsonb_build_object('gatewayOrderId', $1::text), \
             updated_at = NOW() \
         WHERE id = $2 \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(gateway_order_id)
    .bind(order_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`].
pub async fn get_order(pool: &PgPool, id: i64) -> Result<OrderRow, DbError> {
    sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_order_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<Option<OrderRow>, DbError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE public_id = $1"
    ))
    .bind(public_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Find an order by the gateway's order id.
///
/// Checks the indexed column first, then falls back to an exact JSONB
/// containment match on `notes` for orders written before the column was
/// populated.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails.
pub async fn find_order_by_gateway_id(
    pool: &PgPool,
    gateway_order_id: &str,
) -> Result<Option<OrderRow>, DbError> {
    let by_column = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE gateway_order_id = $1"
    ))
    .bind(gateway_order_id)
    .fetch_optional(pool)
    .await?;
    if by_column.is_some() {
        return Ok(by_column);
    }

    let by_notes = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE notes @> jsonb_build_object('gatewayOrderId', $1::text) \
         ORDER BY id \
         LIMIT 1"
    ))
    .bind(gateway_order_id)
    .fetch_optional(pool)
    .await?;

    Ok(by_notes)
}

/// Lists orders newest first, optionally filtered by status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_orders(
    pool: &PgPool,
    status: Option<OrderStatus>,
    limit: i64,
) -> Result<Vec<OrderRow>, DbError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE ($1::text IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(status.map(OrderStatus::as_str))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_orders_for_user(
    pool: &PgPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<OrderRow>, DbError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_order_items(pool: &PgPool, order_id: i64) -> Result<Vec<OrderItemRow>, DbError> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        "SELECT oi.id, oi.order_id, oi.product_id, p.public_id AS product_public_id, \
                oi.product_name, oi.unit_price, oi.quantity \
         FROM order_items oi \
         JOIN products p ON p.id = oi.product_id \
         WHERE oi.order_id = $1 \
         ORDER BY oi.id",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

/// Record a successful payment under a row lock.
///
/// Marks the order paid, moves `pending` to `confirmed`, stores the payment
/// id and (when known) the normalized payment method. A second call for the
/// same order is reported as [`PaymentRecord::AlreadyRecorded`]. A payment
/// for a cancelled or returned order only sets `paidAfterCancel` and is
/// reported as [`PaymentRecord::PaidAfterCancel`].
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the order does not exist, or
/// [`DbError::Sqlx`].
pub async fn record_payment_success(
    pool: &PgPool,
    order_id: i64,
    payment_id: Option<&str>,
    method: Option<PaymentMethod>,
    at: DateTime<Utc>,
) -> Result<PaymentRecord, DbError> {
    let mut tx = pool.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;

    let current = order.status()?;
    let mut notes = order.notes.0.clone();
    if !current.accepts_payment() {
        if !notes.mark_paid_after_cancel(payment_id, at) {
            tx.commit().await?;
            return Ok(PaymentRecord::AlreadyRecorded(order));
        }
        let updated = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET notes = $1, updated_at = NOW() WHERE id = $2 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(Json(&notes))
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::warn!(
            order = %updated.public_id,
            status = %current,
            payment_id = ?payment_id,
            "payment captured after order was unwound; refund required"
        );
        return Ok(PaymentRecord::PaidAfterCancel(updated));
    }

    if !notes.mark_paid(payment_id, at) {
        tx.commit().await?;
        return Ok(PaymentRecord::AlreadyRecorded(order));
    }

    let status = if current == OrderStatus::Pending {
        OrderStatus::Confirmed
    } else {
        tracing::warn!(order = %order.public_id, status = %current, "payment received for non-pending order");
        current
    };
    let method = method.map_or_else(|| order.payment_method.clone(), |m| m.as_str().to_string());

    let updated = sqlx::query_as::<_, OrderRow>(&format!(
        "UPDATE orders \
         SET is_paid = TRUE, status = $1, payment_method = $2, notes = $3, updated_at = NOW() \
         WHERE id = $4 \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(status.as_str())
    .bind(method)
    .bind(Json(&notes))
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(order = %updated.public_id, payment_id = ?payment_id, "payment recorded");
    Ok(PaymentRecord::Recorded(updated))
}

/// Record a failed payment attempt. The order status is left unchanged and
/// nothing is recorded once the order has been paid.
///
/// Returns `None` when the notes did not change (already paid, or the same
/// failure delivered twice).
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the order does not exist, or
/// [`DbError::Sqlx`].
pub async fn record_payment_failure(
    pool: &PgPool,
    order_id: i64,
    payment_id: Option<&str>,
    reason: &str,
) -> Result<Option<OrderRow>, DbError> {
    let mut tx = pool.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;

    let mut notes = order.notes.0.clone();
    notes.mark_failed(payment_id, reason);
    if notes == order.notes.0 {
        tx.commit().await?;
        return Ok(None);
    }

    let updated = sqlx::query_as::<_, OrderRow>(&format!(
        "UPDATE orders SET notes = $1, updated_at = NOW() WHERE id = $2 \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(Json(&notes))
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(order = %updated.public_id, reason, "payment failure recorded");
    Ok(Some(updated))
}

/// Set a one-shot flag in `notes`. Returns `true` only for the caller that
/// flipped it from unset to set.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_notes_flag<'e, E>(
    executor: E,
    order_id: i64,
    flag: NotesFlag,
) -> Result<bool, DbError>
where
    E: PgExecutor<'e>,
{
    let claimed: Option<i64> = sqlx::query_scalar(
        "UPDATE orders \
         SET notes = notes || jsonb_build_object($1::text, TRUE), updated_at = NOW() \
         WHERE id = $2 AND COALESCE((notes ->> $1)::boolean, FALSE) = FALSE \
         RETURNING id",
    )
    .bind(flag.key())
    .bind(order_id)
    .fetch_optional(executor)
    .await?;

    Ok(claimed.is_some())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Move an order to `next` if the transition table allows it.
///
/// Cancelling returns the items to stock and credits any CrashCash spent on
/// the order back as a fresh `coupon` reward under `policy`. Delivering a
/// cash-on-delivery order marks it paid. The customer is notified in the
/// same transaction.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the order does not exist,
/// [`DbError::Domain`] for a disallowed transition, or [`DbError::Sqlx`].
pub async fn update_order_status(
    pool: &PgPool,
    order_id: i64,
    next: OrderStatus,
    policy: &RewardPolicy,
) -> Result<OrderRow, DbError> {
    let mut tx = pool.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    let current = order.status()?;
    current.transition(next)?;

    if next == OrderStatus::Cancelled {
        sqlx::query(
            "UPDATE products p \
             SET stock = p.stock + oi.quantity, updated_at = NOW() \
             FROM order_items oi \
             WHERE oi.order_id = $1 AND p.id = oi.product_id",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        if order.crashcash_applied > Decimal::ZERO {
            ledger::grant_in_tx(
                &mut tx,
                &ledger::NewGrant {
                    user_id: order.user_id,
                    amount: order.crashcash_applied,
                    source: RewardSource::Coupon,
                    expires_at: rewards::expires_at(Utc::now(), policy),
                    order_id: Some(order_id),
                    scratch_session_id: None,
                    note: Some("refund for cancelled order"),
                },
            )
            .await?;
        }
    }

    let settles_cod =
        next == OrderStatus::Delivered && order.payment_method() == PaymentMethod::Cod;

    let updated = sqlx::query_as::<_, OrderRow>(&format!(
        "UPDATE orders SET status = $1, is_paid = is_paid OR $2, updated_at = NOW() \
         WHERE id = $3 \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(next.as_str())
    .bind(settles_cod)
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

    let title = format!("Order {next}");
    let body = format!("Your order {} is now {next}.", updated.public_id);
    create_notification(
        &mut *tx,
        &NewNotification {
            user_id: updated.user_id,
            kind: NotificationKind::OrderStatus,
            title: &title,
            body: &body,
            order_id: Some(order_id),
        },
    )
    .await?;

    tx.commit().await?;
    tracing::info!(order = %updated.public_id, from = %current, to = %next, "order status updated");
    Ok(updated)
}

async fn lock_order(conn: &mut PgConnection, order_id: i64) -> Result<OrderRow, DbError> {
    sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::NotFound)
}
