use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use crashkart_core::{support::generate_rma, ReturnKind, ReturnStatus};
use crashkart_db::ReturnRequestRow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    map_db_error, normalize_limit, optional_text, parse_enum, parse_optional_enum,
    parse_public_id, required_text, resolve_order, resolve_user, ApiError, ApiResponse, AppState,
};
use crate::middleware::RequestId;

/// Attempts at drawing an unused RMA id before giving up.
const RMA_ATTEMPTS: usize = 3;

#[derive(Debug, Deserialize)]
pub(in crate::api) struct CreateReturnRequest {
    pub order_id: String,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ReturnListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct UpdateReturnRequest {
    pub status: String,
    pub admin_note: Option<String>,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct ReturnItem {
    id: Uuid,
    rma: String,
    kind: String,
    status: String,
    reason: String,
    admin_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReturnRequestRow> for ReturnItem {
    fn from(row: ReturnRequestRow) -> Self {
        Self {
            id: row.public_id,
            rma: row.rma,
            kind: row.kind,
            status: row.status,
            reason: row.reason,
            admin_note: row.admin_note,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn next_rma() -> String {
    generate_rma(Utc::now(), &mut rand::rng())
}

/// POST /api/v1/users/{user_id}/returns
pub(in crate::api) async fn create_return(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Json(body): Json<CreateReturnRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReturnItem>>), ApiError> {
    let rid = &req_id.0;
    let kind: ReturnKind = parse_enum(rid, &body.kind)?;
    let reason = required_text(rid, "reason", &body.reason, 1000)?;
    let user = resolve_user(&state, rid, &user_id).await?;
    let order = resolve_order(&state, rid, &body.order_id).await?;
    if order.user_id != user.id {
        return Err(ApiError::not_found(rid, "order"));
    }

    let mut attempt = 0;
    let row = loop {
        attempt += 1;
        let rma = next_rma();
        match crashkart_db::create_return_request(
            &state.pool,
            order.id,
            user.id,
            kind,
            &reason,
            &rma,
        )
        .await
        {
            Ok(row) => break row,
            // Only the RMA column can still collide here.
            Err(e) if e.is_unique_violation() && attempt < RMA_ATTEMPTS => {
                tracing::warn!(%rma, "RMA collision, drawing another");
            }
            Err(e) => return Err(map_db_error(rid.clone(), &e)),
        }
    };

    tracing::info!(order = %order.public_id, rma = %row.rma, %kind, "return requested");
    Ok((StatusCode::CREATED, ApiResponse::new(req_id.0, row.into())))
}

/// GET /api/v1/users/{user_id}/returns
pub(in crate::api) async fn list_user_returns(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Query(query): Query<ReturnListQuery>,
) -> Result<Json<ApiResponse<Vec<ReturnItem>>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let rows = crashkart_db::list_return_requests_for_user(
        &state.pool,
        user.id,
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(ReturnItem::from).collect(),
    ))
}

/// GET /api/v1/admin/returns
pub(in crate::api) async fn list_returns(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ReturnListQuery>,
) -> Result<Json<ApiResponse<Vec<ReturnItem>>>, ApiError> {
    let status: Option<ReturnStatus> = parse_optional_enum(&req_id.0, query.status.as_deref())?;
    let rows =
        crashkart_db::list_return_requests(&state.pool, status, normalize_limit(query.limit))
            .await
            .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(ReturnItem::from).collect(),
    ))
}

/// PUT /api/v1/admin/returns/{return_id}/status
pub(in crate::api) async fn update_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(return_id): Path<String>,
    Json(body): Json<UpdateReturnRequest>,
) -> Result<Json<ApiResponse<ReturnItem>>, ApiError> {
    let rid = &req_id.0;
    let public_id = parse_public_id(rid, "return_id", &return_id)?;
    let next: ReturnStatus = parse_enum(rid, &body.status)?;
    let note = optional_text(rid, "admin_note", body.admin_note.as_deref(), 1000)?;

    let row = crashkart_db::update_return_status(&state.pool, public_id, next, note.as_deref())
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(rma = %row.rma, status = %next, "return status updated");
    Ok(ApiResponse::new(req_id.0, row.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rma_has_date_and_six_character_suffix() {
        let rma = next_rma();
        let parts: Vec<&str> = rma.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "RMA");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
    }
}
