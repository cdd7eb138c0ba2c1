use std::sync::LazyLock;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_db_error, optional_text, required_text, resolve_user, ApiError, ApiResponse, AppState};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9]{10,15}$").expect("valid phone regex")
});

#[derive(Debug, Deserialize)]
pub(super) struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct UserItem {
    id: Uuid,
    email: String,
    name: String,
    phone: Option<String>,
    crashcash_balance: Decimal,
    created_at: DateTime<Utc>,
}

impl From<crashkart_db::UserRow> for UserItem {
    fn from(row: crashkart_db::UserRow) -> Self {
        Self {
            id: row.public_id,
            email: row.email,
            name: row.name,
            phone: row.phone,
            crashcash_balance: row.crashcash_balance,
            created_at: row.created_at,
        }
    }
}

pub(super) fn validate_email(req_id: &str, value: &str) -> Result<String, ApiError> {
    let email = value.trim().to_ascii_lowercase();
    if email.len() > 254 || !EMAIL_RE.is_match(&email) {
        return Err(ApiError::validation(
            req_id,
            format!("email must be a valid address, got '{value}'"),
        ));
    }
    Ok(email)
}

pub(super) fn validate_phone(req_id: &str, value: &str) -> Result<String, ApiError> {
    let phone: String = value.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    if !PHONE_RE.is_match(&phone) {
        return Err(ApiError::validation(
            req_id,
            format!("phone must be 10-15 digits, got '{value}'"),
        ));
    }
    Ok(phone)
}

/// POST /api/v1/users
pub(super) async fn create_user(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserItem>>), ApiError> {
    let rid = &req_id.0;
    let email = validate_email(rid, &body.email)?;
    let name = required_text(rid, "name", &body.name, 120)?;
    let phone = optional_text(rid, "phone", body.phone.as_deref(), 32)?
        .map(|p| validate_phone(rid, &p))
        .transpose()?;

    let row = crashkart_db::create_user(&state.pool, &email, &name, phone.as_deref())
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                ApiError::new(rid, "conflict", "a user with that email already exists")
            } else {
                map_db_error(rid.clone(), &e)
            }
        })?;

    tracing::info!(user = %row.public_id, "user created");
    Ok((StatusCode::CREATED, ApiResponse::new(req_id.0, row.into())))
}

/// GET /api/v1/users/{user_id}
pub(super) async fn get_user(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<UserItem>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    Ok(ApiResponse::new(req_id.0, user.into()))
}
