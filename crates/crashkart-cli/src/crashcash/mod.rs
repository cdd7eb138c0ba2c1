//! CrashCash ledger command handlers for the CLI.
//!
//! `sweep` is the primary expiry trigger; run it from cron or a systemd
//! timer. It is safe to repeat: a second run expires nothing.

mod audit;

use chrono::Utc;
use clap::Subcommand;
use crashkart_core::{rewards, RewardSource};
use crashkart_db::{GrantOutcome, NewGrant};
use rust_decimal::Decimal;
use uuid::Uuid;

pub(crate) use audit::run_audit;

/// Sub-commands available under `crashcash`.
#[derive(Debug, Subcommand)]
pub enum CrashcashCommands {
    /// Expire lapsed rewards and reduce balances
    Sweep {
        /// Report what would expire without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Compare stored balances with active rewards
    Audit {
        /// Reset drifted balances to the sum of their active rewards
        #[arg(long)]
        fix: bool,
    },
    /// Grant CrashCash to a user
    Grant {
        /// User public id
        #[arg(long)]
        user: Uuid,
        /// Amount in major units, e.g. 50 or 12.50
        #[arg(long)]
        amount: Decimal,
        /// Reward source
        #[arg(long, default_value = "coupon")]
        source: RewardSource,
        /// Free-text journal note
        #[arg(long)]
        note: Option<String>,
    },
}

/// Dispatch a `crashcash` sub-command.
///
/// # Errors
///
/// Returns an error if the database operation fails or the input is invalid.
pub(crate) async fn run(
    pool: &sqlx::PgPool,
    config: &crashkart_core::AppConfig,
    command: CrashcashCommands,
) -> anyhow::Result<()> {
    match command {
        CrashcashCommands::Sweep { dry_run } => run_sweep(pool, dry_run).await,
        CrashcashCommands::Audit { fix } => run_audit(pool, fix).await,
        CrashcashCommands::Grant {
            user,
            amount,
            source,
            note,
        } => run_grant(pool, config, user, amount, source, note.as_deref()).await,
    }
}

async fn run_sweep(pool: &sqlx::PgPool, dry_run: bool) -> anyhow::Result<()> {
    let now = Utc::now();
    let report = if dry_run {
        crashkart_db::preview_expired(pool, now).await?
    } else {
        crashkart_db::sweep_expired(pool, now).await?
    };

    let verb = if dry_run { "would expire" } else { "expired" };
    println!(
        "{verb} {} reward(s) worth {} across {} user(s); balances reduced by {}",
        report.rewards_expired,
        report.amount_expired,
        report.users_affected,
        report.balance_reduced
    );
    if report.balance_reduced < report.amount_expired {
        println!("some balances were below their rewards; run `crashcash audit`");
    }
    Ok(())
}

async fn run_grant(
    pool: &sqlx::PgPool,
    config: &crashkart_core::AppConfig,
    user: Uuid,
    amount: Decimal,
    source: RewardSource,
    note: Option<&str>,
) -> anyhow::Result<()> {
    if amount <= Decimal::ZERO {
        anyhow::bail!("amount must be positive, got {amount}");
    }
    let row = crashkart_db::get_user_by_public_id(pool, user)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user '{user}' not found"))?;

    let outcome = crashkart_db::grant(
        pool,
        &NewGrant {
            user_id: row.id,
            amount: crashkart_core::money::normalize(amount),
            source,
            expires_at: rewards::expires_at(Utc::now(), &config.rewards),
            order_id: None,
            scratch_session_id: None,
            note: Some(note.unwrap_or("granted from cli")),
        },
    )
    .await?;

    match outcome {
        GrantOutcome::Granted {
            reward,
            balance_after,
        } => println!(
            "granted {} ({source}) to {} expiring {}; balance now {balance_after}",
            reward.amount,
            row.email,
            reward.expires_at.format("%Y-%m-%d"),
        ),
        GrantOutcome::AlreadyGranted => println!("grant already recorded; nothing changed"),
    }
    Ok(())
}
