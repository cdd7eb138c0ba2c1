//! Database operations for `complaints`.

use chrono::{DateTime, Utc};
use crashkart_core::{ComplaintStatus, NotificationKind};
use sqlx::PgPool;
use uuid::Uuid;

use crate::notifications::{create_notification, NewNotification};
use crate::DbError;

/// A row from the `complaints` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ComplaintRow {
    pub id: i64,
    pub public_id: Uuid,
    pub user_id: i64,
    pub order_id: Option<i64>,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COMPLAINT_COLUMNS: &str = "id, public_id, user_id, order_id, subject, description, status, \
                                 resolution, created_at, updated_at";

/// Files a complaint, optionally linked to one of the user's orders.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if `order_id` is set but is not an order
/// of this user, or [`DbError::Sqlx`].
pub async fn create_complaint(
    pool: &PgPool,
    user_id: i64,
    order_id: Option<i64>,
    subject: &str,
    description: &str,
) -> Result<ComplaintRow, DbError> {
    if let Some(order_id) = order_id {
        let owned: Option<i64> =
            sqlx::query_scalar("SELECT id FROM orders WHERE id = $1 AND user_id = $2")
                .bind(order_id)
                .bind(user_id)
                .fetch_optional(pool)
                .await?;
        if owned.is_none() {
            return Err(DbError::NotFound);
        }
    }

    let row = sqlx::query_as::<_, ComplaintRow>(&format!(
        "INSERT INTO complaints (public_id, user_id, order_id, subject, description, status) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {COMPLAINT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(order_id)
    .bind(subject)
    .bind(description)
    .bind(ComplaintStatus::Open.as_str())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_complaint_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<Option<ComplaintRow>, DbError> {
    let row = sqlx::query_as::<_, ComplaintRow>(&format!(
        "SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE public_id = $1"
    ))
    .bind(public_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Lists complaints newest first. `user_id` narrows to one customer and
/// `status` to one state.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_complaints(
    pool: &PgPool,
    user_id: Option<i64>,
    status: Option<ComplaintStatus>,
    limit: i64,
) -> Result<Vec<ComplaintRow>, DbError> {
    let rows = sqlx::query_as::<_, ComplaintRow>(&format!(
        "SELECT {COMPLAINT_COLUMNS} FROM complaints \
         WHERE ($1::bigint IS NULL OR user_id = $1) \
           AND ($2::text IS NULL OR status = $2) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $3"
    ))
    .bind(user_id)
    .bind(status.map(ComplaintStatus::as_str))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Moves a complaint to `next`, optionally recording a resolution, and
/// notifies the customer.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the complaint does not exist,
/// [`DbError::Domain`] for a disallowed transition, or [`DbError::Sqlx`].
pub async fn update_complaint_status(
    pool: &PgPool,
    public_id: Uuid,
    next: ComplaintStatus,
    resolution: Option<&str>,
) -> Result<ComplaintRow, DbError> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, ComplaintRow>(&format!(
        "SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE public_id = $1 FOR UPDATE"
    ))
    .bind(public_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let from: ComplaintStatus = current.status.parse()?;
    from.transition(next)?;

    let updated = sqlx::query_as::<_, ComplaintRow>(&format!(
        "UPDATE complaints \
         SET status = $1, resolution = COALESCE($2, resolution), updated_at = NOW() \
         WHERE id = $3 \
         RETURNING {COMPLAINT_COLUMNS}"
    ))
    .bind(next.as_str())
    .bind(resolution)
    .bind(current.id)
    .fetch_one(&mut *tx)
    .await?;

    let body = format!("Your complaint \"{}\" is now {next}.", updated.subject);
    create_notification(
        &mut *tx,
        &NewNotification {
            user_id: updated.user_id,
            kind: NotificationKind::ComplaintUpdate,
            title: "Complaint update",
            body: &body,
            order_id: updated.order_id,
        },
    )
    .await?;

    tx.commit().await?;
    tracing::info!(complaint = %public_id, from = %from, to = %next, "complaint updated");
    Ok(updated)
}
