//! Daily trigger for the invoice status sweep.

use std::{thread, time::Duration as StdDuration};

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use finledger_config::SchedulerConfig;
use finledger_core::{Clock, SweepReport};
use tracing::info;

use crate::{
    engine::LedgerEngine,
    errors::{AppError, AppResult},
};

/// A wall-clock time of day in a fixed timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
    timezone: FixedOffset,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32, timezone: FixedOffset) -> AppResult<Self> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid sweep time {hour:02}:{minute:02}"))
        })?;
        Ok(Self { at, timezone })
    }

    pub fn from_config(config: &SchedulerConfig, timezone: FixedOffset) -> AppResult<Self> {
        Self::new(config.hour, config.minute, timezone)
    }

    /// First scheduled instant strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        let local = now.with_timezone(&self.timezone);
        let mut date = local.date_naive();
        if local.time() >= self.at {
            date = date
                .succ_opt()
                .ok_or_else(|| AppError::InvalidInput("calendar overflow".into()))?;
        }
        self.timezone
            .from_local_datetime(&date.and_time(self.at))
            .single()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| AppError::InvalidInput(format!("unrepresentable run time on {date}")))
    }
}

/// Sleeps until each scheduled time and sweeps, until `keep_going` returns false.
pub fn run_daily(
    engine: &LedgerEngine,
    schedule: &DailySchedule,
    clock: &dyn Clock,
    mut keep_going: impl FnMut(&SweepReport) -> bool,
) -> AppResult<()> {
    loop {
        let now = clock.now();
        let next = schedule.next_run_after(now)?;
        let wait = (next - now).max(Duration::zero());
        info!(next_run = %next, "waiting for next invoice sweep");
        thread::sleep(wait.to_std().unwrap_or(StdDuration::ZERO));

        let report = engine.sweep();
        if !keep_going(&report) {
            return Ok(());
        }
    }
}
