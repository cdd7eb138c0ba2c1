//! Database operations for `products`, `cart_items` and `wishlist_items`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `products` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub public_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line joined with its product.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CartLineRow {
    pub product_id: i64,
    pub product_public_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub stock: i32,
    pub is_active: bool,
}

impl CartLineRow {
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// A wishlist entry joined with its product.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WishlistLineRow {
    pub product_public_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub added_at: DateTime<Utc>,
}

const PRODUCT_COLUMNS: &str =
    "id, public_id, name, description, price, stock, is_active, created_at, updated_at";

// ---------------------------------------------------------------------------
// products
// ---------------------------------------------------------------------------

/// Inserts a product and returns the new row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails, including the
/// non-negative price and stock checks.
pub async fn create_product(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
    price: Decimal,
    stock: i32,
) -> Result<ProductRow, DbError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "INSERT INTO products (public_id, name, description, price, stock) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(description)
    .bind(crashkart_core::money::normalize(price))
    .bind(stock)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_product_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<Option<ProductRow>, DbError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE public_id = $1"
    ))
    .bind(public_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Lists active products by name.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_products(pool: &PgPool, limit: i64) -> Result<Vec<ProductRow>, DbError> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products \
         WHERE is_active = TRUE \
         ORDER BY name, id \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Overwrites the stock level of a product.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no product has that public id, or
/// [`DbError::Sqlx`] if the update fails (a negative stock violates the
/// table check).
pub async fn set_product_stock(
    pool: &PgPool,
    public_id: Uuid,
    stock: i32,
) -> Result<ProductRow, DbError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "UPDATE products SET stock = $1, updated_at = NOW() \
         WHERE public_id = $2 \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(stock)
    .bind(public_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    tracing::info!(product = %public_id, stock, "product stock updated");
    Ok(row)
}

// ---------------------------------------------------------------------------
// cart
// ---------------------------------------------------------------------------

/// Sets the quantity of a product in a user's cart, inserting the line if
/// it is missing.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails; quantities outside
/// `1..=99` violate the table check.
pub async fn upsert_cart_item(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
    quantity: i32,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO cart_items (user_id, product_id, quantity) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (user_id, product_id) DO UPDATE SET \
             quantity   = EXCLUDED.quantity, \
             updated_at = NOW()",
    )
    .bind(user_id)
    .bind(product_id)
    .bind(quantity)
    .execute(pool)
    .await?;

    Ok(())
}

/// Removes a cart line. Returns `false` if there was nothing to remove.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn remove_cart_item(pool: &PgPool, user_id: i64, product_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(product_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_cart(pool: &PgPool, user_id: i64) -> Result<Vec<CartLineRow>, DbError> {
    let rows = sqlx::query_as::<_, CartLineRow>(
        "SELECT p.id AS product_id, p.public_id AS product_public_id, p.name, p.price, \
                c.quantity, p.stock, p.is_active \
         FROM cart_items c \
         JOIN products p ON p.id = c.product_id \
         WHERE c.user_id = $1 \
         ORDER BY c.created_at, p.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// wishlist
// ---------------------------------------------------------------------------

/// Adds a product to a wishlist. Adding it twice is a no-op.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn add_wishlist_item(pool: &PgPool, user_id: i64, product_id: i64) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO wishlist_items (user_id, product_id) VALUES ($1, $2) \
         ON CONFLICT (user_id, product_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(product_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn remove_wishlist_item(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
        .bind(user_id)
        .bind(product_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_wishlist(pool: &PgPool, user_id: i64) -> Result<Vec<WishlistLineRow>, DbError> {
    let rows = sqlx::query_as::<_, WishlistLineRow>(
        "SELECT p.public_id AS product_public_id, p.name, p.price, p.stock, \
                w.created_at AS added_at \
         FROM wishlist_items w \
         JOIN products p ON p.id = w.product_id \
         WHERE w.user_id = $1 \
         ORDER BY w.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
