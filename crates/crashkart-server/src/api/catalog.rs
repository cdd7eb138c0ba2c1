//! Products, cart and wishlist handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{
    map_db_error, normalize_limit, optional_text, required_text, resolve_product, resolve_user,
    ApiError, ApiResponse, AppState,
};

const MAX_CART_QUANTITY: i32 = 99;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct ProductQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
}

#[derive(Debug, Deserialize)]
pub(super) struct SetStockRequest {
    pub stock: i32,
}

#[derive(Debug, Deserialize)]
pub(super) struct CartQuantityRequest {
    pub quantity: i32,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct ProductItem {
    id: Uuid,
    name: String,
    description: Option<String>,
    price: Decimal,
    stock: i32,
    in_stock: bool,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

impl From<crashkart_db::ProductRow> for ProductItem {
    fn from(row: crashkart_db::ProductRow) -> Self {
        Self {
            id: row.public_id,
            name: row.name,
            description: row.description,
            price: row.price,
            stock: row.stock,
            in_stock: row.stock > 0,
            is_active: row.is_active,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CartLine {
    product_id: Uuid,
    name: String,
    price: Decimal,
    quantity: i32,
    line_total: Decimal,
    /// False when the product is inactive or has less stock than requested.
    available: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct CartView {
    items: Vec<CartLine>,
    subtotal: Decimal,
}

#[derive(Debug, Serialize)]
pub(super) struct WishlistLine {
    product_id: Uuid,
    name: String,
    price: Decimal,
    in_stock: bool,
    added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct Removed {
    removed: bool,
}

fn validate_price(req_id: &str, price: Decimal) -> Result<Decimal, ApiError> {
    let price = crashkart_core::money::normalize(price);
    if price <= Decimal::ZERO {
        return Err(ApiError::validation(
            req_id,
            format!("price must be positive, got {price}"),
        ));
    }
    Ok(price)
}

fn validate_stock(req_id: &str, stock: i32) -> Result<i32, ApiError> {
    if stock < 0 {
        return Err(ApiError::validation(
            req_id,
            format!("stock cannot be negative, got {stock}"),
        ));
    }
    Ok(stock)
}

fn build_cart_view(rows: Vec<crashkart_db::CartLineRow>) -> CartView {
    let mut subtotal = Decimal::ZERO;
    let items = rows
        .into_iter()
        .map(|row| {
            let line_total = row.line_total();
            subtotal += line_total;
            CartLine {
                product_id: row.product_public_id,
                available: row.is_active && row.stock >= row.quantity,
                name: row.name,
                price: row.price,
                quantity: row.quantity,
                line_total,
            }
        })
        .collect();
    CartView {
        items,
        subtotal: crashkart_core::money::normalize(subtotal),
    }
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// GET /api/v1/products
pub(super) async fn list_products(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ApiResponse<Vec<ProductItem>>>, ApiError> {
    let rows = crashkart_db::list_active_products(&state.pool, normalize_limit(query.limit))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows.into_iter().map(ProductItem::from).collect();
    Ok(ApiResponse::new(req_id.0, data))
}

/// GET /api/v1/products/{product_id}
pub(super) async fn get_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(product_id): Path<String>,
) -> Result<Json<ApiResponse<ProductItem>>, ApiError> {
    let product = resolve_product(&state, &req_id.0, &product_id).await?;
    if !product.is_active {
        return Err(ApiError::not_found(&req_id.0, "product"));
    }
    Ok(ApiResponse::new(req_id.0, product.into()))
}

/// POST /api/v1/admin/products
pub(super) async fn create_product(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductItem>>), ApiError> {
    let rid = &req_id.0;
    let name = required_text(rid, "name", &body.name, 200)?;
    let description = optional_text(rid, "description", body.description.as_deref(), 4000)?;
    let price = validate_price(rid, body.price)?;
    let stock = validate_stock(rid, body.stock)?;

    let row = crashkart_db::create_product(&state.pool, &name, description.as_deref(), price, stock)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(product = %row.public_id, %price, stock, "product created");
    Ok((StatusCode::CREATED, ApiResponse::new(req_id.0, row.into())))
}

/// PUT /api/v1/admin/products/{product_id}/stock
pub(super) async fn set_stock(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(product_id): Path<String>,
    Json(body): Json<SetStockRequest>,
) -> Result<Json<ApiResponse<ProductItem>>, ApiError> {
    let rid = &req_id.0;
    let public_id = super::parse_public_id(rid, "product_id", &product_id)?;
    let stock = validate_stock(rid, body.stock)?;

    let row = crashkart_db::set_product_stock(&state.pool, public_id, stock)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(product = %row.public_id, stock, "stock updated");
    Ok(ApiResponse::new(req_id.0, row.into()))
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

/// GET /api/v1/users/{user_id}/cart
pub(super) async fn list_cart(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<CartView>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let rows = crashkart_db::list_cart(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, build_cart_view(rows)))
}

/// PUT /api/v1/users/{user_id}/cart/{product_id}
pub(super) async fn put_cart_item(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((user_id, product_id)): Path<(String, String)>,
    Json(body): Json<CartQuantityRequest>,
) -> Result<Json<ApiResponse<CartView>>, ApiError> {
    let rid = &req_id.0;
    if !(1..=MAX_CART_QUANTITY).contains(&body.quantity) {
        return Err(ApiError::validation(
            rid,
            format!(
                "quantity must be between 1 and {MAX_CART_QUANTITY}, got {}",
                body.quantity
            ),
        ));
    }
    let user = resolve_user(&state, rid, &user_id).await?;
    let product = resolve_product(&state, rid, &product_id).await?;
    if !product.is_active {
        return Err(ApiError::not_found(rid, "product"));
    }

    crashkart_db::upsert_cart_item(&state.pool, user.id, product.id, body.quantity)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    let rows = crashkart_db::list_cart(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, build_cart_view(rows)))
}

/// DELETE /api/v1/users/{user_id}/cart/{product_id}
pub(super) async fn delete_cart_item(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((user_id, product_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Removed>>, ApiError> {
    let rid = &req_id.0;
    let user = resolve_user(&state, rid, &user_id).await?;
    let product = resolve_product(&state, rid, &product_id).await?;

    let removed = crashkart_db::remove_cart_item(&state.pool, user.id, product.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, Removed { removed }))
}

// ---------------------------------------------------------------------------
// Wishlist
// ---------------------------------------------------------------------------

/// GET /api/v1/users/{user_id}/wishlist
pub(super) async fn list_wishlist(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<WishlistLine>>>, ApiError> {
    let user = resolve_user(&state, &req_id.0, &user_id).await?;
    let rows = crashkart_db::list_wishlist(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows
        .into_iter()
        .map(|row| WishlistLine {
            product_id: row.product_public_id,
            name: row.name,
            price: row.price,
            in_stock: row.stock > 0,
            added_at: row.added_at,
        })
        .collect();
    Ok(ApiResponse::new(req_id.0, data))
}

/// PUT /api/v1/users/{user_id}/wishlist/{product_id}
///
/// Adding a product twice is a no-op.
pub(super) async fn put_wishlist_item(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((user_id, product_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let rid = &req_id.0;
    let user = resolve_user(&state, rid, &user_id).await?;
    let product = resolve_product(&state, rid, &product_id).await?;

    crashkart_db::add_wishlist_item(&state.pool, user.id, product.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/users/{user_id}/wishlist/{product_id}
pub(super) async fn delete_wishlist_item(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((user_id, product_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Removed>>, ApiError> {
    let rid = &req_id.0;
    let user = resolve_user(&state, rid, &user_id).await?;
    let product = resolve_product(&state, rid, &product_id).await?;

    let removed = crashkart_db::remove_wishlist_item(&state.pool, user.id, product.id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(ApiResponse::new(req_id.0, Removed { removed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: i64, quantity: i32, stock: i32, is_active: bool) -> crashkart_db::CartLineRow {
        crashkart_db::CartLineRow {
            product_id: 1,
            product_public_id: Uuid::new_v4(),
            name: "Knee Guard".to_string(),
            price: Decimal::new(price, 2),
            quantity,
            stock,
            is_active,
        }
    }

    #[test]
    fn cart_view_sums_lines_and_flags_unavailable_items() {
        let view = build_cart_view(vec![
            line(49_900, 2, 10, true),
            line(12_050, 1, 0, true),
            line(1_000, 1, 5, false),
        ]);

        assert_eq!(view.subtotal, Decimal::new(112_850, 2));
        assert!(view.items[0].available);
        assert!(!view.items[1].available, "out of stock");
        assert!(!view.items[2].available, "inactive");
    }

    #[test]
    fn price_must_be_positive() {
        assert!(validate_price("r", Decimal::ZERO).is_err());
        assert_eq!(
            validate_price("r", Decimal::new(19_999, 3)).expect("valid"),
            Decimal::new(2_000, 2)
        );
    }
}
