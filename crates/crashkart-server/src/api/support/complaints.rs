use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use crashkart_core::ComplaintStatus;
use crashkart_db::ComplaintRow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    map_db_error, normalize_limit, optional_text, parse_enum, parse_optional_enum,
    parse_public_id, required_text, resolve_order, resolve_user, ApiError, ApiResponse, AppState,
};
use crate::middleware::RequestId;

#[derive(Debug, Deserialize)]
pub(in crate::api) struct CreateComplaintRequest {
    pub order_id: Option<String>,
    pub subject: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ComplaintListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct UpdateComplaintRequest {
    pub status: String,
    pub resolution: Option<String>,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct ComplaintItem {
    id: Uuid,
    subject: String,
    description: String,
    status: String,
    resolution: Option<String>,
    linked_to_order: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ComplaintRow> for ComplaintItem {
    fn from(row: ComplaintRow) -> Self {
        Self {
            id: row.public_id,
            subject: row.subject,
            description: row.description,
            status: row.status,
            resolution: row.resolution,
            linked_to_order: row.order_id.is_some(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// POST /api/v1/users/{user_id}/complaints
pub(in crate::api) async fn create_complaint(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Json(body): Json<CreateComplaintRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ComplaintItem>>), ApiError> {
    let rid = &req_id.0;
    let subject = required_text(rid, "subject", &body.subject, 200)?;
    let description = required_text(rid, "description", &body.description, 4000)?;
    let user = resolve_user(&state, rid, &user_id).await?;

    let order_id = match body.order_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let order = resolve_order(&state, rid, raw).await?;
            if order.user_id != user.id {
                return Err(ApiError::not_found(rid, "order"));
            }
            Some(order.id)
        }
        None => None,
    };

    let row = crashkart_db::create_complaint(&state.pool, user.id, order_id, &subject, &description)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(complaint = %row.public_id, user = %user.public_id, "complaint filed");
    Ok((StatusCode::CREATED, ApiResponse::new(req_id.0, row.into())))
}

/// GET /api/v1/users/{user_id}/complaints
pub(in crate::api) async fn list_user_complaints(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Query(query): Query<ComplaintListQuery>,
) -> Result<Json<ApiResponse<Vec<ComplaintItem>>>, ApiError> {
    let status: Option<ComplaintStatus> =
        parse_optional_enum(&req_id.0, query.status.as_deref())?;
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let rows = crashkart_db::list_complaints(
        &state.pool,
        Some(user.id),
        status,
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(ComplaintItem::from).collect(),
    ))
}

/// GET /api/v1/admin/complaints
pub(in crate::api) async fn list_complaints(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ComplaintListQuery>,
) -> Result<Json<ApiResponse<Vec<ComplaintItem>>>, ApiError> {
    let status: Option<ComplaintStatus> =
        parse_optional_enum(&req_id.0, query.status.as_deref())?;
    let rows = crashkart_db::list_complaints(&state.pool, None, status, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(ComplaintItem::from).collect(),
    ))
}

/// PUT /api/v1/admin/complaints/{complaint_id}/status
pub(in crate::api) async fn update_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(complaint_id): Path<String>,
    Json(body): Json<UpdateComplaintRequest>,
) -> Result<Json<ApiResponse<ComplaintItem>>, ApiError> {
    let rid = &req_id.0;
    let public_id = parse_public_id(rid, "complaint_id", &complaint_id)?;
    let next: ComplaintStatus = parse_enum(rid, &body.status)?;
    let resolution = optional_text(rid, "resolution", body.resolution.as_deref(), 4000)?;

    let row = crashkart_db::update_complaint_status(
        &state.pool,
        public_id,
        next,
        resolution.as_deref(),
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(complaint = %row.public_id, status = %next, "complaint status updated");
    Ok(ApiResponse::new(req_id.0, row.into()))
}
