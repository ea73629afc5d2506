use chrono::{DateTime, Utc};
use finledger_core::Clock;

/// Wall clock used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
