//! Order placement, lookup, scratch cards and admin status changes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use crashkart_core::{rewards, OrderStatus, PaymentMethod, RewardSource};
use crashkart_db::{GrantOutcome, NewGrant, NewOrder, NewOrderItem, OrderRow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;
use crate::reconcile;

use super::{
    map_db_error, normalize_limit, parse_enum, parse_optional_enum, parse_public_id,
    resolve_order, resolve_user, ApiError, ApiResponse, AppState,
};

const MAX_LINE_QUANTITY: i32 = 99;
const MAX_ORDER_LINES: usize = 50;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateOrderRequest {
    pub items: Vec<OrderLineRequest>,
    pub payment_method: String,
    /// CrashCash to spend; capped at the subtotal.
    pub crashcash: Option<Decimal>,
    pub shipping_address: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(super) struct OrderListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateStatusRequest {
    pub status: String,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct OrderLine {
    product_id: Uuid,
    name: String,
    unit_price: Decimal,
    quantity: i32,
    line_total: Decimal,
}

/// What the browser needs to open the gateway checkout.
#[derive(Debug, Serialize)]
pub(super) struct CheckoutInfo {
    key_id: Option<String>,
    gateway_order_id: String,
    /// Minor units.
    amount: i64,
    currency: String,
}

#[derive(Debug, Serialize)]
pub(super) struct OrderView {
    id: Uuid,
    status: String,
    payment_method: String,
    is_paid: bool,
    subtotal: Decimal,
    crashcash_applied: Decimal,
    total: Decimal,
    currency: String,
    shipping_address: serde_json::Value,
    payment_failed: bool,
    last_payment_error: Option<String>,
    scratch_card_eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Vec<OrderLine>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkout: Option<CheckoutInfo>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct ScratchCardView {
    already_scratched: bool,
    reward_id: Uuid,
    amount: Decimal,
    expires_at: DateTime<Utc>,
}

/// Paid or delivered orders that were not settled through the gateway get
/// a scratch card; gateway payments earn the order reward instead.
/// Cancelled and returned orders never qualify.
pub(super) fn scratch_card_eligible(order: &OrderRow) -> bool {
    let Ok(status) = order.status() else {
        return false;
    };
    status.accepts_payment()
        && (order.is_paid || status == OrderStatus::Delivered)
        && !order.notes.0.skip_scratch_card
}

fn checkout_info(state: &AppState, order: &OrderRow) -> Option<CheckoutInfo> {
    if order.is_paid || order.status().ok()? != OrderStatus::Pending {
        return None;
    }
    let gateway_order_id = order
        .gateway_order_id
        .clone()
        .or_else(|| order.notes.0.gateway_order_id.clone())?;
    Some(CheckoutInfo {
        key_id: state.config.gateway_key_id.clone(),
        gateway_order_id,
        amount: crashkart_core::money::to_minor_units(order.total)?,
        currency: order.currency.clone(),
    })
}

fn order_view(
    state: &AppState,
    order: OrderRow,
    items: Option<Vec<crashkart_db::OrderItemRow>>,
) -> OrderView {
    let checkout = checkout_info(state, &order);
    let scratch_card_eligible = scratch_card_eligible(&order);
    let items = items.map(|rows| {
        rows.into_iter()
            .map(|row| OrderLine {
                product_id: row.product_public_id,
                line_total: row.unit_price * Decimal::from(row.quantity),
                name: row.product_name,
                unit_price: row.unit_price,
                quantity: row.quantity,
            })
            .collect()
    });
    let notes = order.notes.0;

    OrderView {
        id: order.public_id,
        status: order.status,
        payment_method: order.payment_method,
        is_paid: order.is_paid,
        subtotal: order.subtotal,
        crashcash_applied: order.crashcash_applied,
        total: order.total,
        currency: order.currency,
        shipping_address: order.shipping_address.0,
        payment_failed: notes.payment_failed,
        last_payment_error: notes.last_payment_error,
        scratch_card_eligible,
        items,
        checkout,
        created_at: order.created_at,
        updated_at: order.updated_at,
    }
}

fn parse_lines(req_id: &str, lines: &[OrderLineRequest]) -> Result<Vec<NewOrderItem>, ApiError> {
    if lines.is_empty() || lines.len() > MAX_ORDER_LINES {
        return Err(ApiError::validation(
            req_id,
            format!("an order must have 1-{MAX_ORDER_LINES} items"),
        ));
    }
    lines
        .iter()
        .map(|line| {
            if !(1..=MAX_LINE_QUANTITY).contains(&line.quantity) {
                return Err(ApiError::validation(
                    req_id,
                    format!(
                        "quantity must be between 1 and {MAX_LINE_QUANTITY}, got {}",
                        line.quantity
                    ),
                ));
            }
            Ok(NewOrderItem {
                product_public_id: parse_public_id(req_id, "product_id", &line.product_id)?,
                quantity: line.quantity,
            })
        })
        .collect()
}

fn parse_checkout_method(req_id: &str, raw: &str) -> Result<PaymentMethod, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "cod" => Ok(PaymentMethod::Cod),
        "online" => Ok(PaymentMethod::Online),
        _ => Err(ApiError::validation(
            req_id,
            format!("payment_method must be 'cod' or 'online', got '{raw}'"),
        )),
    }
}

/// Ask the gateway for a checkout order and remember its id.
async fn start_checkout(
    state: &AppState,
    req_id: &str,
    order: &OrderRow,
) -> Result<OrderRow, ApiError> {
    let Some(gateway) = state.gateway.as_ref() else {
        return Err(ApiError::new(
            req_id,
            "service_unavailable",
            "online payments are not configured",
        ));
    };

    let receipt = order.public_id.to_string();
    let mut notes = serde_json::Map::new();
    notes.insert("order_id".to_owned(), serde_json::Value::String(receipt.clone()));

    let gateway_order = gateway
        .create_order(order.total, &order.currency, &receipt, &notes)
        .await
        .map_err(|e| {
            tracing::error!(order = %order.public_id, error = %e, "gateway order creation failed");
            ApiError::new(req_id, "bad_gateway", "payment gateway is unavailable, try again")
        })?;

    crashkart_db::attach_gateway_order(&state.pool, order.id, &gateway_order.id)
        .await
        .map_err(|e| map_db_error(req_id.to_owned(), &e))
}

/// Undo a placement whose checkout could not be started.
async fn abandon_order(state: &AppState, order: &OrderRow) {
    if let Err(e) = crashkart_db::update_order_status(
        &state.pool,
        order.id,
        OrderStatus::Cancelled,
        &state.config.rewards,
    )
    .await
    {
        tracing::error!(order = %order.public_id, error = %e, "failed to cancel abandoned order");
    }
}

// ---------------------------------------------------------------------------
// Customer handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/users/{user_id}/orders
pub(super) async fn create_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderView>>), ApiError> {
    let rid = &req_id.0;
    let items = parse_lines(rid, &body.items)?;
    let method = parse_checkout_method(rid, &body.payment_method)?;
    let crashcash = body.crashcash.unwrap_or(Decimal::ZERO);
    if crashcash.is_sign_negative() {
        return Err(ApiError::validation(rid, "crashcash cannot be negative"));
    }
    if !body
        .shipping_address
        .as_object()
        .is_some_and(|address| !address.is_empty())
    {
        return Err(ApiError::validation(
            rid,
            "shipping_address must be a non-empty object",
        ));
    }
    let user = resolve_user(&state, rid, &user_id).await?;

    let order = crashkart_db::create_order(
        &state.pool,
        &NewOrder {
            user_id: user.id,
            items: &items,
            payment_method: method,
            crashcash_requested: crashcash,
            currency: &state.config.currency,
            shipping_address: &body.shipping_address,
        },
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;
    tracing::info!(
        order = %order.public_id,
        user = %user.public_id,
        total = %order.total,
        method = %method,
        "order placed"
    );

    let order = match method {
        // Fully covered by CrashCash; nothing to collect.
        PaymentMethod::Online if order.total <= Decimal::ZERO => {
            reconcile::apply_payment(&state.pool, &state.config, order.id, None, None)
                .await
                .map_err(|e| map_db_error(rid.clone(), &e))?
                .order()
                .clone()
        }
        PaymentMethod::Online => match start_checkout(&state, rid, &order).await {
            Ok(order) => order,
            Err(err) => {
                abandon_order(&state, &order).await;
                return Err(err);
            }
        },
        _ => order,
    };

    let items = crashkart_db::list_order_items(&state.pool, order.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let view = order_view(&state, order, Some(items));
    Ok((StatusCode::CREATED, ApiResponse::new(req_id.0, view)))
}

/// GET /api/v1/users/{user_id}/orders
pub(super) async fn list_user_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<Vec<OrderView>>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let rows = crashkart_db::list_orders_for_user(&state.pool, user.id, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows
        .into_iter()
        .map(|row| order_view(&state, row, None))
        .collect();
    Ok(ApiResponse::new(req_id.0, data))
}

/// GET /api/v1/orders/{order_id}
pub(super) async fn get_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    let order = resolve_order(&state, &req_id.0, &order_id).await?;
    let items = crashkart_db::list_order_items(&state.pool, order.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let view = order_view(&state, order, Some(items));
    Ok(ApiResponse::new(req_id.0, view))
}

/// POST /api/v1/orders/{order_id}/scratch-card
///
/// Grants at most one scratch reward per order; later calls return it.
pub(super) async fn scratch_card(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<ScratchCardView>>, ApiError> {
    let rid = &req_id.0;
    let order = resolve_order(&state, rid, &order_id).await?;

    let existing = crashkart_db::find_order_reward(&state.pool, order.id, RewardSource::Scratch)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    if let Some(reward) = existing {
        return Ok(ApiResponse::new(req_id.0, scratched(reward, true)));
    }

    if !scratch_card_eligible(&order) {
        return Err(ApiError::new(
            rid,
            "conflict",
            "order is not eligible for a scratch card",
        ));
    }

    let policy = &state.config.rewards;
    let amount = {
        let mut rng = rand::rng();
        rewards::scratch_reward(policy, &mut rng)
    };
    let session = format!("order:{}", order.public_id);

    let outcome = crashkart_db::grant(
        &state.pool,
        &NewGrant {
            user_id: order.user_id,
            amount,
            source: RewardSource::Scratch,
            expires_at: rewards::expires_at(Utc::now(), policy),
            order_id: Some(order.id),
            scratch_session_id: Some(&session),
            note: Some("scratch card"),
        },
    )
    .await
    .map_err(|e| map_db_error(rid.clone(), &e))?;

    let view = match outcome {
        GrantOutcome::Granted { reward, .. } => {
            tracing::info!(order = %order.public_id, %amount, "scratch card redeemed");
            scratched(reward, false)
        }
        // Lost a race with a concurrent scratch of the same order.
        GrantOutcome::AlreadyGranted => {
            crashkart_db::find_order_reward(&state.pool, order.id, RewardSource::Scratch)
                .await
                .map_err(|e| map_db_error(rid.clone(), &e))?
                .map(|reward| scratched(reward, true))
                .ok_or_else(|| ApiError::new(rid, "conflict", "scratch card already used"))?
        }
    };
    Ok(ApiResponse::new(req_id.0, view))
}

fn scratched(reward: crashkart_db::RewardRow, already_scratched: bool) -> ScratchCardView {
    ScratchCardView {
        already_scratched,
        reward_id: reward.public_id,
        amount: reward.granted_amount,
        expires_at: reward.expires_at,
    }
}

// ---------------------------------------------------------------------------
// Admin handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/admin/orders
pub(super) async fn list_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<Vec<OrderView>>>, ApiError> {
    let status: Option<OrderStatus> = parse_optional_enum(&req_id.0, query.status.as_deref())?;
    let rows = crashkart_db::list_orders(&state.pool, status, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows
        .into_iter()
        .map(|row| order_view(&state, row, None))
        .collect();
    Ok(ApiResponse::new(req_id.0, data))
}

/// PUT /api/v1/admin/orders/{order_id}/status
pub(super) async fn update_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(order_id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    let rid = &req_id.0;
    let next: OrderStatus = parse_enum(rid, &body.status)?;
    let order = resolve_order(&state, rid, &order_id).await?;

    let updated =
        crashkart_db::update_order_status(&state.pool, order.id, next, &state.config.rewards)
            .await
            .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(order = %updated.public_id, from = %order.status, to = %next, "order status updated");
    let view = order_view(&state, updated, None);
    Ok(ApiResponse::new(req_id.0, view))
}
