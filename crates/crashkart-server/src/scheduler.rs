//! Background job scheduler.
//!
//! The only recurring job is the CrashCash expiry sweep, registered when
//! `CRASHKART_EXPIRY_SWEEP_CRON` is set. Without it expiry is driven by
//! `crashkart-cli crashcash sweep`.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process. Dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the cron expression is rejected, or the scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    config: Arc<crashkart_core::AppConfig>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    match config.expiry_sweep_cron.as_deref() {
        Some(cron) => register_expiry_sweep_job(&scheduler, pool, cron).await?,
        None => tracing::info!("scheduler: expiry sweep cron not set; leaving expiry to the CLI"),
    }

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_expiry_sweep_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let pool = Arc::new(pool);

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pool = Arc::clone(&pool);

        Box::pin(async move {
            tracing::info!("scheduler: starting CrashCash expiry sweep");
            run_expiry_sweep(&pool).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron, "scheduler: registered CrashCash expiry sweep");
    Ok(())
}

async fn run_expiry_sweep(pool: &PgPool) {
    match crashkart_db::sweep_expired(pool, Utc::now()).await {
        Ok(report) => tracing::info!(
            users = report.users_affected,
            rewards = report.rewards_expired,
            amount = %report.amount_expired,
            balance_reduced = %report.balance_reduced,
            "scheduler: CrashCash expiry sweep complete"
        ),
        Err(e) => tracing::error!(error = %e, "scheduler: CrashCash expiry sweep failed"),
    }
}
