//! CrashCash ledger: reward grants, FIFO deduction, expiry sweep and audit.
//!
//! Every balance mutation runs in one transaction together with the reward
//! row changes and a journal entry in `crashcash_ledger_entries`. The
//! invariant maintained is
//!
//! ```text
//! users.crashcash_balance == SUM(crashcash_rewards.amount WHERE status = 'active')
//! ```
//!
//! Every mutation takes the user row lock (`FOR UPDATE`) before it reads
//! or writes that user's reward rows.

use chrono::{DateTime, Duration, Utc};
use crashkart_core::money::normalize;
use crashkart_core::{LedgerEntryKind, RewardSource, RewardStatus};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `crashcash_rewards` table.
///
/// `amount` is what is left to spend; `granted_amount` never changes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RewardRow {
    pub id: i64,
    pub public_id: Uuid,
    pub user_id: i64,
    pub source: String,
    pub status: String,
    pub granted_amount: Decimal,
    pub amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub order_id: Option<i64>,
    pub scratch_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row from the `crashcash_ledger_entries` journal.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    /// Signed change applied to the balance.
    pub delta: Decimal,
    pub balance_after: Decimal,
    pub reward_id: Option<i64>,
    pub order_id: Option<i64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A user whose stored balance disagrees with their active rewards.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BalanceDriftRow {
    pub user_id: i64,
    pub public_id: Uuid,
    pub balance: Decimal,
    pub backing: Decimal,
}

impl BalanceDriftRow {
    /// Positive when the balance overstates the rewards backing it.
    #[must_use]
    pub fn drift(&self) -> Decimal {
        self.balance - self.backing
    }
}

const REWARD_COLUMNS: &str = "id, public_id, user_id, source, status, granted_amount, amount, \
                              expires_at, order_id, scratch_session_id, created_at, updated_at";

const ENTRY_COLUMNS: &str =
    "id, user_id, kind, delta, balance_after, reward_id, order_id, note, created_at";

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewGrant<'a> {
    pub user_id: i64,
    pub amount: Decimal,
    pub source: RewardSource,
    pub expires_at: DateTime<Utc>,
    /// Originating order. At most one `order` and one `scratch` grant may
    /// reference the same order.
    pub order_id: Option<i64>,
    pub scratch_session_id: Option<&'a str>,
    pub note: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub enum GrantOutcome {
    Granted {
        reward: RewardRow,
        balance_after: Decimal,
    },
    /// A grant for the same order or scratch session already exists.
    AlreadyGranted,
}

impl GrantOutcome {
    #[must_use]
    pub fn reward(&self) -> Option<&RewardRow> {
        match self {
            GrantOutcome::Granted { reward, .. } => Some(reward),
            GrantOutcome::AlreadyGranted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedReward {
    pub reward_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct DeductOutcome {
    /// Rewards drawn down, oldest first.
    pub consumed: Vec<ConsumedReward>,
    pub balance_after: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub users_affected: usize,
    pub rewards_expired: usize,
    /// Sum of the remaining amounts on the expired rows.
    pub amount_expired: Decimal,
    /// Sum actually removed from balances; lower than `amount_expired` only
    /// when a balance had drifted below its rewards and was clamped at zero.
    pub balance_reduced: Decimal,
}

#[derive(Debug, Clone)]
pub struct WalletSummary {
    pub balance: Decimal,
    /// Active, unexpired rewards ordered by soonest expiry.
    pub rewards: Vec<RewardRow>,
    pub expiring_within_week: Decimal,
}

// ---------------------------------------------------------------------------
// Grants
// ---------------------------------------------------------------------------

/// Grant CrashCash in its own transaction.
///
/// # Errors
///
/// See [`grant_in_tx`].
pub async fn grant(pool: &PgPool, grant: &NewGrant<'_>) -> Result<GrantOutcome, DbError> {
    let mut tx = pool.begin().await?;
    let outcome = grant_in_tx(&mut tx, grant).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Insert a reward row, credit the balance and journal the grant on an
/// open transaction.
///
/// Duplicate grants for the same order/source or scratch session are
/// absorbed by the partial unique indexes and reported as
/// [`GrantOutcome::AlreadyGranted`] without touching the balance.
///
/// # Errors
///
/// Returns [`DbError::InvalidAmount`] for non-positive amounts,
/// [`DbError::NotFound`] if the user does not exist, or [`DbError::Sqlx`].
pub async fn grant_in_tx(
    conn: &mut PgConnection,
    grant: &NewGrant<'_>,
) -> Result<GrantOutcome, DbError> {
    let amount = normalize(grant.amount);
    if amount <= Decimal::ZERO {
        return Err(DbError::InvalidAmount(grant.amount));
    }
    lock_balance(conn, grant.user_id).await?;

    let inserted = sqlx::query_as::<_, RewardRow>(&format!(
        "INSERT INTO crashcash_rewards \
             (public_id, user_id, source, status, granted_amount, amount, expires_at, \
              order_id, scratch_session_id) \
         VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8) \
         ON CONFLICT DO NOTHING \
         RETURNING {REWARD_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(grant.user_id)
    .bind(grant.source.as_str())
    .bind(RewardStatus::Active.as_str())
    .bind(amount)
    .bind(grant.expires_at)
    .bind(grant.order_id)
    .bind(grant.scratch_session_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(reward) = inserted else {
        tracing::debug!(
            user_id = grant.user_id,
            source = %grant.source,
            order_id = ?grant.order_id,
            "crashcash grant already recorded"
        );
        return Ok(GrantOutcome::AlreadyGranted);
    };

    let balance_after: Decimal = sqlx::query_scalar(
        "UPDATE users \
         SET crashcash_balance = crashcash_balance + $1, updated_at = NOW() \
         WHERE id = $2 \
         RETURNING crashcash_balance",
    )
    .bind(amount)
    .bind(grant.user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::NotFound)?;

    insert_entry(
        conn,
        &Entry {
            user_id: grant.user_id,
            kind: LedgerEntryKind::Grant,
            delta: amount,
            balance_after,
            reward_id: Some(reward.id),
            order_id: grant.order_id,
            note: grant.note,
        },
    )
    .await?;

    tracing::info!(
        user_id = grant.user_id,
        source = %grant.source,
        %amount,
        %balance_after,
        "crashcash granted"
    );

    Ok(GrantOutcome::Granted {
        reward,
        balance_after,
    })
}

// ---------------------------------------------------------------------------
// Deduction
// ---------------------------------------------------------------------------

/// Spend CrashCash in its own transaction.
///
/// # Errors
///
/// See [`deduct_in_tx`].
pub async fn deduct(
    pool: &PgPool,
    user_id: i64,
    amount: Decimal,
    order_id: Option<i64>,
) -> Result<DeductOutcome, DbError> {
    let mut tx = pool.begin().await?;
    let outcome = deduct_in_tx(&mut tx, user_id, amount, order_id).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// Spend CrashCash on an open transaction, consuming active unexpired
/// rewards oldest-first.
///
/// Lapsed rewards for the user are expired first so the balance check only
/// counts spendable CrashCash. A short balance is an error; nothing is
/// clamped and the caller's transaction should be rolled back.
///
/// # Errors
///
/// Returns [`DbError::InvalidAmount`] for non-positive amounts,
/// [`DbError::NotFound`] for an unknown user,
/// [`DbError::InsufficientCrashCash`] when the balance is short,
/// [`DbError::LedgerDrift`] if the balance is not backed by reward rows, or
/// [`DbError::Sqlx`].
pub async fn deduct_in_tx(
    conn: &mut PgConnection,
    user_id: i64,
    amount: Decimal,
    order_id: Option<i64>,
) -> Result<DeductOutcome, DbError> {
    let requested = normalize(amount);
    if requested <= Decimal::ZERO {
        return Err(DbError::InvalidAmount(amount));
    }

    let now = Utc::now();
    expire_lapsed_for_user(conn, user_id, now).await?;

    let available = lock_balance(conn, user_id).await?;
    if available < requested {
        return Err(DbError::InsufficientCrashCash {
            requested,
            available,
        });
    }

    let rows: Vec<(i64, Decimal)> = sqlx::query_as(
        "SELECT id, amount FROM crashcash_rewards \
         WHERE user_id = $1 AND status = $2 AND expires_at > $3 \
         ORDER BY created_at, id \
         FOR UPDATE",
    )
    .bind(user_id)
    .bind(RewardStatus::Active.as_str())
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    let backing: Decimal = rows.iter().map(|(_, a)| *a).sum();
    if backing < requested {
        return Err(DbError::LedgerDrift {
            user_id,
            balance: available,
            backing,
        });
    }

    let mut remaining = requested;
    let mut consumed = Vec::new();
    for (reward_id, reward_amount) in rows {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(reward_amount);
        if take <= Decimal::ZERO {
            continue;
        }
        sqlx::query(
            "UPDATE crashcash_rewards \
             SET amount = amount - $1, \
                 status = CASE WHEN amount - $1 = 0 THEN $2 ELSE status END, \
                 updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(take)
        .bind(RewardStatus::Used.as_str())
        .bind(reward_id)
        .execute(&mut *conn)
        .await?;

        remaining -= take;
        consumed.push(ConsumedReward {
            reward_id,
            amount: take,
        });
    }

    let balance_after: Decimal = sqlx::query_scalar(
        "UPDATE users \
         SET crashcash_balance = crashcash_balance - $1, updated_at = NOW() \
         WHERE id = $2 \
         RETURNING crashcash_balance",
    )
    .bind(requested)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    insert_entry(
        conn,
        &Entry {
            user_id,
            kind: LedgerEntryKind::Deduct,
            delta: -requested,
            balance_after,
            reward_id: None,
            order_id,
            note: None,
        },
    )
    .await?;

    tracing::info!(user_id, %requested, %balance_after, rewards = consumed.len(), "crashcash deducted");

    Ok(DeductOutcome {
        consumed,
        balance_after,
    })
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

/// Expire every active reward whose `expires_at` is at or before `now`,
/// reducing each affected balance by the expired total (clamped at zero).
///
/// Runs as one transaction. A second run with the same `now` finds nothing
/// left to expire.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; the whole sweep is
/// rolled back.
pub async fn sweep_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<SweepReport, DbError> {
    let mut tx = pool.begin().await?;

    let user_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT user_id FROM crashcash_rewards \
         WHERE status = $1 AND expires_at <= $2 \
         ORDER BY user_id",
    )
    .bind(RewardStatus::Active.as_str())
    .bind(now)
    .fetch_all(&mut *tx)
    .await?;

    let mut report = SweepReport::default();
    for user_id in user_ids {
        let expired = expire_lapsed_for_user(&mut tx, user_id, now).await?;
        if expired.count > 0 {
            report.users_affected += 1;
            report.rewards_expired += expired.count;
            report.amount_expired += expired.amount;
            report.balance_reduced += expired.balance_reduced;
        }
    }

    tx.commit().await?;

    tracing::info!(
        users = report.users_affected,
        rewards = report.rewards_expired,
        amount = %report.amount_expired,
        "crashcash expiry sweep complete"
    );

    Ok(report)
}

/// Count what [`sweep_expired`] would expire at `now` without changing anything.
///
/// `balance_reduced` is reported equal to `amount_expired`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn preview_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<SweepReport, DbError> {
    let (users, rewards, amount): (i64, i64, Decimal) = sqlx::query_as(
        "SELECT COUNT(DISTINCT user_id), COUNT(*), COALESCE(SUM(amount), 0) \
         FROM crashcash_rewards \
         WHERE status = $1 AND expires_at <= $2",
    )
    .bind(RewardStatus::Active.as_str())
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(SweepReport {
        users_affected: usize::try_from(users).unwrap_or(0),
        rewards_expired: usize::try_from(rewards).unwrap_or(0),
        amount_expired: amount,
        balance_reduced: amount,
    })
}

struct Expired {
    count: usize,
    amount: Decimal,
    balance_reduced: Decimal,
}

/// Lock the user, expire their lapsed rewards and take the expired total
/// off the balance.
async fn expire_lapsed_for_user(
    conn: &mut PgConnection,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Expired, DbError> {
    let before = lock_balance(conn, user_id).await?;

    let amounts: Vec<Decimal> = sqlx::query_scalar(
        "UPDATE crashcash_rewards \
         SET status = $1, updated_at = NOW() \
         WHERE user_id = $2 AND status = $3 AND expires_at <= $4 \
         RETURNING amount",
    )
    .bind(RewardStatus::Expired.as_str())
    .bind(user_id)
    .bind(RewardStatus::Active.as_str())
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    if amounts.is_empty() {
        return Ok(Expired {
            count: 0,
            amount: Decimal::ZERO,
            balance_reduced: Decimal::ZERO,
        });
    }

    let amount: Decimal = amounts.iter().copied().sum();
    let after = (before - amount).max(Decimal::ZERO);
    if before < amount {
        tracing::warn!(
            user_id,
            balance = %before,
            expired = %amount,
            "crashcash balance below expiring rewards; clamping at zero"
        );
    }

    sqlx::query("UPDATE users SET crashcash_balance = $1, updated_at = NOW() WHERE id = $2")
        .bind(after)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let note = format!("{} reward(s) expired", amounts.len());
    insert_entry(
        conn,
        &Entry {
            user_id,
            kind: LedgerEntryKind::Expire,
            delta: after - before,
            balance_after: after,
            reward_id: None,
            order_id: None,
            note: Some(&note),
        },
    )
    .await?;

    Ok(Expired {
        count: amounts.len(),
        amount,
        balance_reduced: before - after,
    })
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// List every user whose stored balance differs from the sum of their
/// active rewards.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn audit_balances(pool: &PgPool) -> Result<Vec<BalanceDriftRow>, DbError> {
    let rows = sqlx::query_as::<_, BalanceDriftRow>(
        "SELECT u.id AS user_id, u.public_id, u.crashcash_balance AS balance, \
                COALESCE(SUM(r.amount), 0) AS backing \
         FROM users u \
         LEFT JOIN crashcash_rewards r ON r.user_id = u.id AND r.status = $1 \
         GROUP BY u.id, u.public_id, u.crashcash_balance \
         HAVING u.crashcash_balance <> COALESCE(SUM(r.amount), 0) \
         ORDER BY u.id",
    )
    .bind(RewardStatus::Active.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Reset a user's balance to the sum of their active rewards, journaling
/// the correction. Returns the signed adjustment applied (zero if none).
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for an unknown user or [`DbError::Sqlx`].
pub async fn repair_balance(pool: &PgPool, user_id: i64) -> Result<Decimal, DbError> {
    let mut tx = pool.begin().await?;
    let before = lock_balance(&mut tx, user_id).await?;

    let backing: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM crashcash_rewards \
         WHERE user_id = $1 AND status = $2",
    )
    .bind(user_id)
    .bind(RewardStatus::Active.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let adjustment = backing - before;
    if adjustment.is_zero() {
        tx.commit().await?;
        return Ok(Decimal::ZERO);
    }

    sqlx::query("UPDATE users SET crashcash_balance = $1, updated_at = NOW() WHERE id = $2")
        .bind(backing)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    insert_entry(
        &mut tx,
        &Entry {
            user_id,
            kind: LedgerEntryKind::Adjust,
            delta: adjustment,
            balance_after: backing,
            reward_id: None,
            order_id: None,
            note: Some("balance reset to active reward total"),
        },
    )
    .await?;

    tx.commit().await?;
    tracing::warn!(user_id, %before, %backing, "crashcash balance repaired");
    Ok(adjustment)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Balance plus spendable rewards for a user as of `now`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for an unknown user or [`DbError::Sqlx`].
pub async fn wallet(
    pool: &PgPool,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<WalletSummary, DbError> {
    let balance: Decimal =
        sqlx::query_scalar("SELECT crashcash_balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or(DbError::NotFound)?;

    let rewards = sqlx::query_as::<_, RewardRow>(&format!(
        "SELECT {REWARD_COLUMNS} FROM crashcash_rewards \
         WHERE user_id = $1 AND status = $2 AND expires_at > $3 \
         ORDER BY expires_at, id"
    ))
    .bind(user_id)
    .bind(RewardStatus::Active.as_str())
    .bind(now)
    .fetch_all(pool)
    .await?;

    let horizon = now + Duration::days(7);
    let expiring_within_week = rewards
        .iter()
        .filter(|r| r.expires_at <= horizon)
        .map(|r| r.amount)
        .sum();

    Ok(WalletSummary {
        balance,
        rewards,
        expiring_within_week,
    })
}

/// Most recent journal entries for a user, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_ledger_entries(
    pool: &PgPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<LedgerEntryRow>, DbError> {
    let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
        "SELECT {ENTRY_COLUMNS} FROM crashcash_ledger_entries \
         WHERE user_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// The reward of the given source granted for an order, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_order_reward(
    pool: &PgPool,
    order_id: i64,
    source: RewardSource,
) -> Result<Option<RewardRow>, DbError> {
    let row = sqlx::query_as::<_, RewardRow>(&format!(
        "SELECT {REWARD_COLUMNS} FROM crashcash_rewards \
         WHERE order_id = $1 AND source = $2"
    ))
    .bind(order_id)
    .bind(source.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct Entry<'a> {
    user_id: i64,
    kind: LedgerEntryKind,
    delta: Decimal,
    balance_after: Decimal,
    reward_id: Option<i64>,
    order_id: Option<i64>,
    note: Option<&'a str>,
}

async fn lock_balance(conn: &mut PgConnection, user_id: i64) -> Result<Decimal, DbError> {
    sqlx::query_scalar("SELECT crashcash_balance FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(DbError::NotFound)
}

async fn insert_entry(conn: &mut PgConnection, entry: &Entry<'_>) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO crashcash_ledger_entries \
             (user_id, kind, delta, balance_after, reward_id, order_id, note) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.user_id)
    .bind(entry.kind.as_str())
    .bind(entry.delta)
    .bind(entry.balance_after)
    .bind(entry.reward_id)
    .bind(entry.order_id)
    .bind(entry.note)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
