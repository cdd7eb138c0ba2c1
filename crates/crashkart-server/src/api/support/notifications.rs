use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use crashkart_db::NotificationRow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    map_db_error, normalize_limit, parse_public_id, resolve_user, ApiError, ApiResponse, AppState,
};
use crate::middleware::RequestId;

#[derive(Debug, Deserialize)]
pub(in crate::api) struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct NotificationItem {
    id: Uuid,
    kind: String,
    title: String,
    body: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for NotificationItem {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.public_id,
            kind: row.kind,
            title: row.title,
            body: row.body,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct MarkedRead {
    updated: u64,
}

/// GET /api/v1/users/{user_id}/notifications
pub(in crate::api) async fn list_notifications(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<ApiResponse<Vec<NotificationItem>>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let rows = crashkart_db::list_notifications(
        &state.pool,
        user.id,
        query.unread_only,
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(NotificationItem::from).collect(),
    ))
}

/// POST /api/v1/users/{user_id}/notifications/{notification_id}/read
pub(in crate::api) async fn mark_read(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((user_id, notification_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let rid = &req_id.0;
    let public_id = parse_public_id(rid, "notification_id", &notification_id)?;
    let user = resolve_user(&state, rid, &user_id).await?;

    crashkart_db::mark_notification_read(&state.pool, user.id, public_id)
        .await
        .map_err(|e| match e {
            crashkart_db::DbError::NotFound => ApiError::not_found(rid, "notification"),
            other => map_db_error(rid.clone(), &other),
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/users/{user_id}/notifications/read-all
pub(in crate::api) async fn mark_all_read(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<MarkedRead>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let updated = crashkart_db::mark_all_notifications_read(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(req_id.0, MarkedRead { updated }))
}
