use crashkart_db::BalanceDriftRow;

fn print_drift(rows: &[BalanceDriftRow]) {
    println!(
        "{:<38}{:>14}{:>14}{:>14}",
        "USER", "BALANCE", "REWARDS", "DRIFT"
    );
    for row in rows {
        println!(
            "{:<38}{:>14}{:>14}{:>14}",
            row.public_id,
            row.balance,
            row.backing,
            row.drift()
        );
    }
}

/// Report users whose balance disagrees with their active rewards, and
/// optionally repair them.
///
/// # Errors
///
/// Returns an error if the audit query fails. Individual repair failures are
/// logged and counted, then reported as a single error at the end.
pub(crate) async fn run_audit(pool: &sqlx::PgPool, fix: bool) -> anyhow::Result<()> {
    let rows = crashkart_db::audit_balances(pool).await?;
    if rows.is_empty() {
        println!("all CrashCash balances match their active rewards");
        return Ok(());
    }

    print_drift(&rows);
    if !fix {
        println!("{} user(s) drifted; rerun with --fix to repair", rows.len());
        return Ok(());
    }

    let mut failed = 0usize;
    for row in &rows {
        match crashkart_db::repair_balance(pool, row.user_id).await {
            Ok(balance) => println!("repaired {}: balance now {balance}", row.public_id),
            Err(e) => {
                failed += 1;
                tracing::error!(user = %row.public_id, error = %e, "balance repair failed");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} repair(s) failed", rows.len());
    }
    Ok(())
}
