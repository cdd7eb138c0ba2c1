//! Database operations for the `notifications` table.

use chrono::{DateTime, Utc};
use crashkart_core::NotificationKind;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::DbError;

/// A row from the `notifications` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: i64,
    pub public_id: Uuid,
    pub user_id: i64,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub order_id: Option<i64>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: &'a str,
    pub body: &'a str,
    pub order_id: Option<i64>,
}

const NOTIFICATION_COLUMNS: &str =
    "id, public_id, user_id, kind, title, body, order_id, is_read, created_at";

/// Inserts a notification. Accepts a pool or an open transaction so status
/// changes can notify atomically.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_notification<'e, E>(
    executor: E,
    notification: &NewNotification<'_>,
) -> Result<NotificationRow, DbError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        "INSERT INTO notifications (public_id, user_id, kind, title, body, order_id) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(notification.user_id)
    .bind(notification.kind.as_str())
    .bind(notification.title)
    .bind(notification.body)
    .bind(notification.order_id)
    .fetch_one(executor)
    .await?;

    tracing::debug!(user_id = notification.user_id, kind = %notification.kind, "notification created");
    Ok(row)
}

/// Lists a user's notifications, newest first. With `unread_only` set,
/// read notifications are omitted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_notifications(
    pool: &PgPool,
    user_id: i64,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<NotificationRow>, DbError> {
    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
         WHERE user_id = $1 AND ($2 = FALSE OR is_read = FALSE) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $3"
    ))
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Marks one of the user's notifications read.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the notification does not exist or
/// belongs to another user, or [`DbError::Sqlx`].
pub async fn mark_notification_read(
    pool: &PgPool,
    user_id: i64,
    public_id: Uuid,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE WHERE public_id = $1 AND user_id = $2",
    )
    .bind(public_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Marks every unread notification for the user read; returns how many changed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_all_notifications_read(pool: &PgPool, user_id: i64) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND is_read = FALSE",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
