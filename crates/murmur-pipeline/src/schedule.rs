//! Cron helpers for the poll and daily-archive schedules.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

/// Fires every day at 23:59 local time (seconds pinned to 0).
pub const DAILY_ARCHIVE_CRON: &str = "0 59 23 * * *";

/// Translate a poll interval in minutes into a six-field cron expression.
/// Intervals of zero are a configuration error.
pub fn poll_cron_expression(minutes: u32) -> Result<String> {
    if minutes == 0 {
        bail!("poll interval must be greater than 0");
    }
    if minutes == 1 {
        return Ok("0 * * * * *".to_string());
    }
    Ok(format!("0 */{minutes} * * * *"))
}

/// Next fire time strictly after `after`, evaluated in `timezone`.
pub fn next_occurrence(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let schedule = Schedule::from_str(expression)
        .with_context(|| format!("invalid cron expression '{expression}'"))?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| anyhow!("invalid timezone '{timezone}'"))?;
    let local = after.with_timezone(&tz);
    let next = schedule
        .after(&local)
        .next()
        .ok_or_else(|| anyhow!("cron expression '{expression}' has no future occurrence"))?;
    Ok(next.with_timezone(&Utc))
}
