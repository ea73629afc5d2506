//! Shared traits, identifiers, and calendar helpers for ledger primitives.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exposes a stable identifier for entities stored in a user partition.
pub trait Identifiable {
    fn id(&self) -> Uuid;
}

/// Provides read-only access to an entity's display name.
pub trait NamedEntity {
    fn name(&self) -> &str;
}

/// Opaque identity of the authenticated owner of a ledger partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Rounds a monetary amount to two decimal places.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Enumerates time units used by `TimeInterval`.
pub enum TimeUnit {
    Day,
    Week,
    Month,
    Year,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimeUnit::Day => "Day",
            TimeUnit::Week => "Week",
            TimeUnit::Month => "Month",
            TimeUnit::Year => "Year",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Represents a time unit and multiplier for recurrence calculations.
pub struct TimeInterval {
    pub every: u32,
    pub unit: TimeUnit,
}

impl TimeInterval {
    pub const fn new(every: u32, unit: TimeUnit) -> Self {
        Self { every, unit }
    }

    /// Calculates the next date after `from` according to the interval.
    pub fn next_date(&self, from: NaiveDate) -> NaiveDate {
        match self.unit {
            TimeUnit::Day => from + Duration::days(self.every as i64),
            TimeUnit::Week => from + Duration::weeks(self.every as i64),
            TimeUnit::Month => add_months(from, self.every as i32),
            TimeUnit::Year => shift_year(from, self.every as i32),
        }
    }

    pub fn label(&self) -> String {
        match (self.every, &self.unit) {
            (1, TimeUnit::Day) => "Daily".into(),
            (1, TimeUnit::Week) => "Weekly".into(),
            (1, TimeUnit::Month) => "Monthly".into(),
            (1, TimeUnit::Year) => "Yearly".into(),
            (n, unit) => format!("Every {} {}{}", n, unit, if n > 1 { "s" } else { "" }),
        }
    }
}

/// Shifts `date` by `months`, clamping the day to the target month's length.
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let mut year = date.year();
    let mut month = date.month() as i32 + months;
    while month > 12 {
        month -= 12;
        year += 1;
    }
    while month < 1 {
        month += 12;
        year -= 1;
    }
    let day = date.day().min(days_in_month(year, month as u32));
    NaiveDate::from_ymd_opt(year, month as u32, day).unwrap_or(date)
}

fn shift_year(date: NaiveDate, years: i32) -> NaiveDate {
    let year = date.year() + years;
    let month = date.month();
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

/// Number of days in the given month, or 0 when the month is out of range.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };
    match NaiveDate::from_ymd_opt(next_year, next_month, 1) {
        Some(first_next) => (first_next - Duration::days(1)).day(),
        None => 0,
    }
}

/// Whole calendar months between two dates, truncated toward zero.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let mut months =
        (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    if months > 0 && end.day() < start.day() {
        months -= 1;
    } else if months < 0 && end.day() > start.day() {
        months += 1;
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_steps_clamp_to_month_end() {
        let monthly = TimeInterval::new(1, TimeUnit::Month);
        let feb = monthly.next_date(date(2024, 1, 31));
        assert_eq!(feb, date(2024, 2, 29));
        assert_eq!(monthly.next_date(feb), date(2024, 3, 29));
    }

    #[test]
    fn yearly_step_handles_leap_day() {
        let yearly = TimeInterval::new(1, TimeUnit::Year);
        assert_eq!(yearly.next_date(date(2024, 2, 29)), date(2025, 2, 28));
    }

    #[test]
    fn months_between_truncates_partial_months() {
        assert_eq!(months_between(date(2024, 1, 15), date(2024, 3, 15)), 2);
        assert_eq!(months_between(date(2024, 1, 15), date(2024, 3, 14)), 1);
        assert_eq!(months_between(date(2024, 1, 31), date(2024, 1, 31)), 0);
    }

    #[test]
    fn cents_rounding_matches_two_decimals() {
        assert_eq!(round_to_cents(100.0 / 3.0), 33.33);
        assert_eq!(round_to_cents(200.0 / 3.0), 66.67);
    }

    #[test]
    fn days_in_month_covers_february() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2023, 12), 31);
    }
}
