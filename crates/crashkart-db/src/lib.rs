use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{env, time::Duration};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/crashkart-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &crashkart_core::AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("record not found")]
    NotFound,
    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("insufficient CrashCash: requested {requested}, available {available}")]
    InsufficientCrashCash {
        requested: Decimal,
        available: Decimal,
    },
    #[error("CrashCash balance {balance} for user {user_id} exceeds active rewards {backing}")]
    LedgerDrift {
        user_id: i64,
        balance: Decimal,
        backing: Decimal,
    },
    #[error("product {product} has {available} in stock, {requested} requested")]
    OutOfStock {
        product: Uuid,
        requested: i32,
        available: i32,
    },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Domain(#[from] crashkart_core::CoreError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// True when the underlying database error is a unique-constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::Sqlx(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505"))
    }
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Connect to a Postgres pool reading only `DATABASE_URL`, with default pool sizing.
///
/// # Errors
///
/// Returns [`DbError::MissingDatabaseUrl`] if `DATABASE_URL` is unset, or
/// [`DbError::Sqlx`] if the connection cannot be established.
pub async fn connect_pool_from_env() -> Result<PgPool, DbError> {
    let database_url = env::var("DATABASE_URL").map_err(|_| DbError::MissingDatabaseUrl)?;
    connect_pool(&database_url, PoolConfig::default())
        .await
        .map_err(DbError::from)
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    // The _sqlx_migrations table does not exist on a fresh database; treat
    // absence as zero applied.
    let applied_before: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    MIGRATOR.run(pool).await?;

    let applied_after: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Run a full health check: ping the pool and return a typed error on failure.
///
/// # Errors
///
/// Returns [`DbError`] if the ping fails.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    ping(pool).await?;
    Ok(())
}


pub mod catalog;
pub mod complaints;
pub mod ledger;
pub mod notifications;
pub mod orders;
pub mod returns;
pub mod sellers;
pub mod users;

pub use catalog::{
    add_wishlist_item, create_product, get_product_by_public_id, list_active_products, list_cart,
    list_wishlist, remove_cart_item, remove_wishlist_item, set_product_stock, upsert_cart_item,
    CartLineRow, ProductRow, WishlistLineRow,
};
pub use complaints::{
    create_complaint, get_complaint_by_public_id, list_complaints, update_complaint_status,
    ComplaintRow,
};
pub use ledger::{
    audit_balances, deduct, deduct_in_tx, find_order_reward, grant, grant_in_tx,
    list_ledger_entries, preview_expired, repair_balance, sweep_expired, wallet, BalanceDriftRow,
    ConsumedReward, DeductOutcome, GrantOutcome, LedgerEntryRow, NewGrant, RewardRow,
    SweepReport, WalletSummary,
};
pub use notifications::{
    create_notification, list_notifications, mark_all_notifications_read,
    mark_notification_read, NewNotification, NotificationRow,
};
pub use orders::{
    attach_gateway_order, claim_notes_flag, create_order, find_order_by_gateway_id, get_order,
    get_order_by_public_id, list_order_items, list_orders, list_orders_for_user,
    record_payment_failure, record_payment_success, update_order_status, NewOrder, NewOrderItem,
    NotesFlag, OrderItemRow, OrderRow, PaymentRecord,
};
pub use returns::{
    create_return_request, get_return_by_public_id, list_return_requests,
    list_return_requests_for_user, update_return_status, ReturnRequestRow,
};
pub use sellers::{
    create_seller_application, list_seller_applications, update_seller_application_status,
    NewSellerApplication, SellerApplicationRow,
};
pub use users::{create_user, get_user, get_user_by_public_id, UserRow};
