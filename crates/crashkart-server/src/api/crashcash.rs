use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use crashkart_core::{rewards, RewardSource};
use crashkart_db::{GrantOutcome, NewGrant};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{
    map_db_error, normalize_limit, optional_text, parse_enum, resolve_user, ApiError,
    ApiResponse, AppState,
};

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct RewardItem {
    id: Uuid,
    source: String,
    status: String,
    granted_amount: Decimal,
    amount: Decimal,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<crashkart_db::RewardRow> for RewardItem {
    fn from(row: crashkart_db::RewardRow) -> Self {
        Self {
            id: row.public_id,
            source: row.source,
            status: row.status,
            granted_amount: row.granted_amount,
            amount: row.amount,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct WalletView {
    balance: Decimal,
    expiring_within_week: Decimal,
    rewards: Vec<RewardItem>,
}

#[derive(Debug, Serialize)]
pub(super) struct LedgerEntryItem {
    kind: String,
    delta: Decimal,
    balance_after: Decimal,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct GrantView {
    already_granted: bool,
    reward: Option<RewardItem>,
    balance_after: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub(super) struct DriftItem {
    user_id: Uuid,
    balance: Decimal,
    backing: Decimal,
    drift: Decimal,
}

#[derive(Debug, Serialize)]
pub(super) struct RepairView {
    user_id: Uuid,
    balance: Decimal,
}

#[derive(Debug, Serialize)]
pub(super) struct SweepView {
    dry_run: bool,
    users_affected: usize,
    rewards_expired: usize,
    amount_expired: Decimal,
    balance_reduced: Decimal,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct LedgerQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GrantRequest {
    pub user_id: String,
    pub amount: Decimal,
    pub source: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SweepQuery {
    #[serde(default)]
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Customer handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/users/{user_id}/crashcash
pub(super) async fn get_wallet(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let summary = crashkart_db::wallet(&state.pool, user.id, Utc::now())
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(ApiResponse::new(
        req_id.0,
        WalletView {
            balance: summary.balance,
            expiring_within_week: summary.expiring_within_week,
            rewards: summary.rewards.into_iter().map(RewardItem::from).collect(),
        },
    ))
}

/// GET /api/v1/users/{user_id}/crashcash/ledger
pub(super) async fn list_ledger(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<ApiResponse<Vec<LedgerEntryItem>>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let rows = crashkart_db::list_ledger_entries(&state.pool, user.id, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let items = rows
        .into_iter()
        .map(|row| LedgerEntryItem {
            kind: row.kind,
            delta: row.delta,
            balance_after: row.balance_after,
            note: row.note,
            created_at: row.created_at,
        })
        .collect();
    Ok(ApiResponse::new(req_id.0, items))
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/admin/crashcash/grants
///
/// Manual grants default to `coupon`. Order and scratch rewards are issued
/// by the payment and scratch-card flows, which carry the order link that
/// makes them idempotent.
pub(super) async fn grant(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<GrantRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GrantView>>), ApiError> {
    let rid = &req_id.0;
    if body.amount <= Decimal::ZERO {
        return Err(ApiError::validation(rid, "amount must be positive"));
    }
    let source: RewardSource = match body.source.as_deref() {
        Some(raw) => parse_enum(rid, raw)?,
        None => RewardSource::Coupon,
    };
    let note = optional_text(rid, "note", body.note.as_deref(), 200)?;
    let user = resolve_user(&state, rid, &body.user_id).await?;

    let outcome = crashkart_db::grant(
        &state.pool,
        &NewGrant {
            user_id: user.id,
            amount: crashkart_core::money::normalize(body.amount),
            source,
            expires_at: rewards::expires_at(Utc::now(), &state.config.rewards),
            order_id: None,
            scratch_session_id: None,
            note: Some(note.as_deref().unwrap_or("manual grant")),
        },
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    let (status, view) = match outcome {
        GrantOutcome::Granted {
            reward,
            balance_after,
        } => {
            tracing::info!(user = %user.public_id, amount = %reward.amount, %source, "manual CrashCash grant");
            (
                StatusCode::CREATED,
                GrantView {
                    already_granted: false,
                    reward: Some(reward.into()),
                    balance_after: Some(balance_after),
                },
            )
        }
        GrantOutcome::AlreadyGranted => (
            StatusCode::OK,
            GrantView {
                already_granted: true,
                reward: None,
                balance_after: None,
            },
        ),
    };
    Ok((status, ApiResponse::new(req_id.0, view)))
}

/// GET /api/v1/admin/crashcash/audit
pub(super) async fn audit(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<Vec<DriftItem>>>, ApiError> {
    let rows = crashkart_db::audit_balances(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    if !rows.is_empty() {
        tracing::warn!(users = rows.len(), "CrashCash balances disagree with active rewards");
    }
    let items = rows
        .into_iter()
        .map(|row| DriftItem {
            user_id: row.public_id,
            balance: row.balance,
            backing: row.backing,
            drift: row.drift(),
        })
        .collect();
    Ok(ApiResponse::new(req_id.0, items))
}

/// POST /api/v1/admin/crashcash/users/{user_id}/repair
pub(super) async fn repair(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<RepairView>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let balance = crashkart_db::repair_balance(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    tracing::info!(user = %user.public_id, from = %user.crashcash_balance, to = %balance, "CrashCash balance repaired");
    Ok(ApiResponse::new(
        req_id.0,
        RepairView {
            user_id: user.public_id,
            balance,
        },
    ))
}

/// POST /api/v1/admin/crashcash/sweep
pub(super) async fn sweep(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SweepQuery>,
) -> Result<Json<ApiResponse<SweepView>>, ApiError> {
    let now = Utc::now();
    let report = if query.dry_run {
        crashkart_db::preview_expired(&state.pool, now).await
    } else {
        crashkart_db::sweep_expired(&state.pool, now).await
    }
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    tracing::info!(
        dry_run = query.dry_run,
        users = report.users_affected,
        rewards = report.rewards_expired,
        amount = %report.amount_expired,
        "CrashCash expiry sweep"
    );
    Ok(ApiResponse::new(
        req_id.0,
        SweepView {
            dry_run: query.dry_run,
            users_affected: report.users_affected,
            rewards_expired: report.rewards_expired,
            amount_expired: report.amount_expired,
            balance_reduced: report.balance_reduced,
        },
    ))
}
