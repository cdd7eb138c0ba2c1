//! Database operations for `return_requests`.

use chrono::{DateTime, Utc};
use crashkart_core::{NotificationKind, OrderStatus, ReturnKind, ReturnStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::notifications::{create_notification, NewNotification};
use crate::DbError;

/// A row from the `return_requests` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReturnRequestRow {
    pub id: i64,
    pub public_id: Uuid,
    /// `RMA-YYYYMMDD-XXXXXX`.
    pub rma: String,
    pub order_id: i64,
    pub user_id: i64,
    pub kind: String,
    pub status: String,
    pub reason: String,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RETURN_COLUMNS: &str = "id, public_id, rma, order_id, user_id, kind, status, reason, \
                              admin_note, created_at, updated_at";

const OPEN_PER_ORDER_INDEX: &str = "return_requests_open_per_order_key";

/// Open a return or replacement request for a delivered order owned by
/// `user_id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the order does not exist or belongs to
/// someone else, [`DbError::Conflict`] if the order is not delivered or
/// already has an open request, or [`DbError::Sqlx`].
pub async fn create_return_request(
    pool: &PgPool,
    order_id: i64,
    user_id: i64,
    kind: ReturnKind,
    reason: &str,
    rma: &str,
) -> Result<ReturnRequestRow, DbError> {
    let mut tx = pool.begin().await?;

    let status: String =
        sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(order_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;
    if status != OrderStatus::Delivered.as_str() {
        return Err(DbError::Conflict(format!(
            "only delivered orders can be returned (order is {status})"
        )));
    }

    let inserted = sqlx::query_as::<_, ReturnRequestRow>(&format!(
        "INSERT INTO return_requests (public_id, rma, order_id, user_id, kind, status, reason) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {RETURN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(rma)
    .bind(order_id)
    .bind(user_id)
    .bind(kind.as_str())
    .bind(ReturnStatus::Requested.as_str())
    .bind(reason)
    .fetch_one(&mut *tx)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(sqlx::Error::Database(db_err)) if db_err.constraint() == Some(OPEN_PER_ORDER_INDEX) => {
            return Err(DbError::Conflict(
                "an open return request already exists for this order".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    tx.commit().await?;
    tracing::info!(rma = %row.rma, order_id, "return request created");
    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_return_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<Option<ReturnRequestRow>, DbError> {
    let row = sqlx::query_as::<_, ReturnRequestRow>(&format!(
        "SELECT {RETURN_COLUMNS} FROM return_requests WHERE public_id = $1"
    ))
    .bind(public_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Lists return requests newest first, optionally filtered by status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_return_requests(
    pool: &PgPool,
    status: Option<ReturnStatus>,
    limit: i64,
) -> Result<Vec<ReturnRequestRow>, DbError> {
    let rows = sqlx::query_as::<_, ReturnRequestRow>(&format!(
        "SELECT {RETURN_COLUMNS} FROM return_requests \
         WHERE ($1::text IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(status.map(ReturnStatus::as_str))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_return_requests_for_user(
    pool: &PgPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<ReturnRequestRow>, DbError> {
    let rows = sqlx::query_as::<_, ReturnRequestRow>(&format!(
        "SELECT {RETURN_COLUMNS} FROM return_requests \
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

/// Move a return request to `next`, optionally recording an admin note, and
/// notify the customer.
///
/// Completing a `return` (not a replacement) also moves the order from
/// `delivered` to `returned`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the request does not exist,
/// [`DbError::Domain`] for a disallowed transition, or [`DbError::Sqlx`].
pub async fn update_return_status(
    pool: &PgPool,
    public_id: Uuid,
    next: ReturnStatus,
    admin_note: Option<&str>,
) -> Result<ReturnRequestRow, DbError> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, ReturnRequestRow>(&format!(
        "SELECT {RETURN_COLUMNS} FROM return_requests WHERE public_id = $1 FOR UPDATE"
    ))
    .bind(public_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let from: ReturnStatus = current.status.parse()?;
    from.transition(next)?;

    let updated = sqlx::query_as::<_, ReturnRequestRow>(&format!(
        "UPDATE return_requests \
         SET status = $1, admin_note = COALESCE($2, admin_note), updated_at = NOW() \
         WHERE id = $3 \
         RETURNING {RETURN_COLUMNS}"
    ))
    .bind(next.as_str())
    .bind(admin_note)
    .bind(current.id)
    .fetch_one(&mut *tx)
    .await?;

    if next == ReturnStatus::Completed && updated.kind == ReturnKind::Return.as_str() {
        sqlx::query(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(OrderStatus::Returned.as_str())
        .bind(updated.order_id)
        .bind(OrderStatus::Delivered.as_str())
        .execute(&mut *tx)
        .await?;
    }

    let title = format!("Return {}", updated.rma);
    let body = format!("Your request {} is now {next}.", updated.rma);
    create_notification(
        &mut *tx,
        &NewNotification {
            user_id: updated.user_id,
            kind: NotificationKind::ReturnUpdate,
            title: &title,
            body: &body,
            order_id: Some(updated.order_id),
        },
    )
    .await?;

    tx.commit().await?;
    tracing::info!(rma = %updated.rma, from = %from, to = %next, "return request updated");
    Ok(updated)
}
