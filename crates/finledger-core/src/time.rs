use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

/// Clock abstracts access to the current timestamp so services remain deterministic in tests.
pub trait Clock: Send + Sync {
    /// Returns the current UTC timestamp.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current UTC date. Defaults to `now().date_naive()`.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Calendar date at `offset` for the current instant.
    fn today_in(&self, offset: &FixedOffset) -> NaiveDate {
        self.now().with_timezone(offset).date_naive()
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Noon UTC on `date`, which is the same calendar day for every offset within ±11h.
    pub fn on(date: NaiveDate) -> Self {
        Self::new(noon_utc(date))
    }

    pub fn set_date(&self, date: NaiveDate) {
        self.set(noon_utc(date));
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance_days(&self, days: i64) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += Duration::days(days);
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

fn noon_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(12, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_in_respects_offset() {
        let instant = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap()
            .and_utc();
        let clock = FixedClock::new(instant);
        let sao_paulo = FixedOffset::west_opt(3 * 3600).unwrap();
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(
            clock.today_in(&sao_paulo),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::on(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        clock.advance_days(1);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }
}
