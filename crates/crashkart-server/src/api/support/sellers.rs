use std::sync::LazyLock;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use crashkart_core::SellerApplicationStatus;
use crashkart_db::{NewSellerApplication, SellerApplicationRow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{
    map_db_error, normalize_limit, optional_text, parse_enum, parse_optional_enum,
    parse_public_id, required_text, users, ApiError, ApiResponse, AppState,
};
use crate::middleware::RequestId;

/// 15-character Indian GSTIN: state code, PAN, entity digit, `Z`, checksum.
static GST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$").expect("valid GSTIN regex")
});

#[derive(Debug, Deserialize)]
pub(in crate::api) struct SubmitApplicationRequest {
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: String,
    pub gst_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ApplicationListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ReviewRequest {
    pub status: String,
    pub review_note: Option<String>,
}

#[derive(Debug, Serialize)]
pub(in crate::api) struct ApplicationItem {
    id: Uuid,
    business_name: String,
    contact_name: String,
    email: String,
    phone: String,
    gst_number: Option<String>,
    status: String,
    review_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SellerApplicationRow> for ApplicationItem {
    fn from(row: SellerApplicationRow) -> Self {
        Self {
            id: row.public_id,
            business_name: row.business_name,
            contact_name: row.contact_name,
            email: row.email,
            phone: row.phone,
            gst_number: row.gst_number,
            status: row.status,
            review_note: row.review_note,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn validate_gst(req_id: &str, raw: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(gst) = raw
        .map(|g| g.trim().to_ascii_uppercase())
        .filter(|g| !g.is_empty())
    else {
        return Ok(None);
    };
    if !GST_RE.is_match(&gst) {
        return Err(ApiError::validation(
            req_id,
            format!("gst_number is not a valid GSTIN: '{gst}'"),
        ));
    }
    Ok(Some(gst))
}

/// POST /api/v1/seller-applications
pub(in crate::api) async fn submit_application(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<SubmitApplicationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ApplicationItem>>), ApiError> {
    let rid = &req_id.0;
    let business_name = required_text(rid, "business_name", &body.business_name, 200)?;
    let contact_name = required_text(rid, "contact_name", &body.contact_name, 120)?;
    let email = users::validate_email(rid, &body.email)?;
    let phone = users::validate_phone(rid, &body.phone)?;
    let gst_number = validate_gst(rid, body.gst_number.as_deref())?;

    let row = crashkart_db::create_seller_application(
        &state.pool,
        &NewSellerApplication {
            business_name: &business_name,
            contact_name: &contact_name,
            email: &email,
            phone: &phone,
            gst_number: gst_number.as_deref(),
        },
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(application = %row.public_id, business = %row.business_name, "seller application submitted");
    Ok((StatusCode::CREATED, ApiResponse::new(req_id.0, row.into())))
}

/// GET /api/v1/admin/seller-applications
pub(in crate::api) async fn list_applications(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ApplicationListQuery>,
) -> Result<Json<ApiResponse<Vec<ApplicationItem>>>, ApiError> {
    let status: Option<SellerApplicationStatus> =
        parse_optional_enum(&req_id.0, query.status.as_deref())?;
    let rows =
        crashkart_db::list_seller_applications(&state.pool, status, normalize_limit(query.limit))
            .await
            .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        rows.into_iter().map(ApplicationItem::from).collect(),
    ))
}

/// PUT /api/v1/admin/seller-applications/{application_id}/status
pub(in crate::api) async fn update_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(application_id): Path<String>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<ApiResponse<ApplicationItem>>, ApiError> {
    let rid = &req_id.0;
    let public_id = parse_public_id(rid, "application_id", &application_id)?;
    let next: SellerApplicationStatus = parse_enum(rid, &body.status)?;
    let note = optional_text(rid, "review_note", body.review_note.as_deref(), 1000)?;

    let row = crashkart_db::update_seller_application_status(
        &state.pool,
        public_id,
        next,
        note.as_deref(),
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(application = %row.public_id, status = %next, "seller application reviewed");
    Ok(ApiResponse::new(req_id.0, row.into()))
}
