//! Database operations for `seller_applications`.

use chrono::{DateTime, Utc};
use crashkart_core::SellerApplicationStatus;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `seller_applications` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SellerApplicationRow {
    pub id: i64,
    pub public_id: Uuid,
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: String,
    pub gst_number: Option<String>,
    pub status: String,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSellerApplication<'a> {
    pub business_name: &'a str,
    pub contact_name: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub gst_number: Option<&'a str>,
}

const SELLER_COLUMNS: &str = "id, public_id, business_name, contact_name, email, phone, \
                              gst_number, status, review_note, created_at, updated_at";

/// Submits an application. Only one pending application per email
/// (case-insensitive) may exist.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] when a pending application already exists
/// for the email, or [`DbError::Sqlx`].
pub async fn create_seller_application(
    pool: &PgPool,
    application: &NewSellerApplication<'_>,
) -> Result<SellerApplicationRow, DbError> {
    let inserted = sqlx::query_as::<_, SellerApplicationRow>(&format!(
        "INSERT INTO seller_applications \
             (public_id, business_name, contact_name, email, phone, gst_number, status) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {SELLER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(application.business_name)
    .bind(application.contact_name)
    .bind(application.email)
    .bind(application.phone)
    .bind(application.gst_number)
    .bind(SellerApplicationStatus::Pending.as_str())
    .fetch_one(pool)
    .await
    .map_err(DbError::from);

    match inserted {
        Err(e) if e.is_unique_violation() => Err(DbError::Conflict(
            "a pending application already exists for this email".to_string(),
        )),
        other => other,
    }
}

/// Lists applications oldest first so the review queue is processed in
/// arrival order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_seller_applications(
    pool: &PgPool,
    status: Option<SellerApplicationStatus>,
    limit: i64,
) -> Result<Vec<SellerApplicationRow>, DbError> {
    let rows = sqlx::query_as::<_, SellerApplicationRow>(&format!(
        "SELECT {SELLER_COLUMNS} FROM seller_applications \
         WHERE ($1::text IS NULL OR status = $1) \
         ORDER BY created_at, id \
         LIMIT $2"
    ))
    .bind(status.map(SellerApplicationStatus::as_str))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Approves or rejects a pending application.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the application does not exist,
/// [`DbError::Domain`] if it was already decided, or [`DbError::Sqlx`].
pub async fn update_seller_application_status(
    pool: &PgPool,
    public_id: Uuid,
    next: SellerApplicationStatus,
    review_note: Option<&str>,
) -> Result<SellerApplicationRow, DbError> {
    let mut tx = pool.begin().await?;

    let current: String = sqlx::query_scalar(
        "SELECT status FROM seller_applications WHERE public_id = $1 FOR UPDATE",
    )
    .bind(public_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::NotFound)?;

    let from: SellerApplicationStatus = current.parse()?;
    from.transition(next)?;

    let row = sqlx::query_as::<_, SellerApplicationRow>(&format!(
        "UPDATE seller_applications \
         SET status = $1, review_note = $2, updated_at = NOW() \
         WHERE public_id = $3 \
         RETURNING {SELLER_COLUMNS}"
    ))
    .bind(next.as_str())
    .bind(review_note)
    .bind(public_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(application = %public_id, status = %next, "seller application reviewed");
    Ok(row)
}
