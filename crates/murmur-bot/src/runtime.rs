//! Long-running schedulers: the poll loop and the nightly archive loop.
//!
//! Both sleep until the next cron occurrence and bail out between ticks
//! when the shutdown flag flips. Cycle errors are logged and retried on
//! the next tick; overlapping ticks are not prevented (each cycle re-reads
//! the cursor and the ledger's idempotent insert bounds the damage).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use murmur_pipeline::schedule::{next_occurrence, poll_cron_expression, DAILY_ARCHIVE_CRON};
use tokio::sync::watch;

use crate::context::{archive_daily_logs, run_one_cycle, AppContext};

pub async fn poll_loop(ctx: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    let expression = match poll_cron_expression(ctx.config.poll_interval_minutes) {
        Ok(expression) => expression,
        Err(error) => {
            tracing::error!(error = %error, "invalid poll schedule, stopping");
            return;
        }
    };
    tracing::info!(cron = %expression, "poll scheduler started");

    // Immediate run at startup, then cron-paced.
    run_cycle_logged(&ctx).await;

    loop {
        if !sleep_until_next(&expression, &ctx.config.timezone, &mut shutdown).await {
            tracing::info!("poll scheduler stopped");
            return;
        }
        run_cycle_logged(&ctx).await;
    }
}

pub async fn archive_loop(ctx: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(cron = DAILY_ARCHIVE_CRON, "daily archive scheduler started");
    loop {
        if !sleep_until_next(DAILY_ARCHIVE_CRON, &ctx.config.timezone, &mut shutdown).await {
            tracing::info!("daily archive scheduler stopped");
            return;
        }
        if let Err(error) = archive_daily_logs(&ctx).await {
            tracing::error!(error = %format!("{error:#}"), "daily archive failed");
        }
    }
}

async fn run_cycle_logged(ctx: &AppContext) {
    match run_one_cycle(ctx).await {
        Ok(report) => {
            tracing::info!(
                fetched = report.fetched,
                fresh = report.fresh,
                unique = report.unique,
                notified = report.notifications_sent,
                "cycle finished"
            );
        }
        Err(error) => {
            // Nothing was persisted past the failure point; the next tick
            // retries from the same cursor.
            tracing::error!(error = %format!("{error:#}"), "cycle failed");
        }
    }
}

/// Sleep until the schedule's next occurrence. Returns `false` when the
/// shutdown flag flipped instead.
async fn sleep_until_next(
    expression: &str,
    timezone: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let next = match next_occurrence(expression, timezone, Utc::now()) {
        Ok(next) => next,
        Err(error) => {
            tracing::error!(error = %error, "schedule computation failed, stopping");
            return false;
        }
    };
    let delay = (next - Utc::now())
        .to_std()
        .unwrap_or(Duration::from_secs(0));

    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => !*shutdown.borrow(),
    }
}
