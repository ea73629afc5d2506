//! Runtime knobs shared by the ledger services.

use chrono::{FixedOffset, NaiveDate, Offset, Utc};

use crate::{error::CoreError, time::Clock, CoreResult};

pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;
pub const DEFAULT_INVOICE_PAYMENT_CATEGORY: &str = "Credit card invoice";

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    /// Timezone in which "today", invoice cycles and due dates are evaluated.
    pub timezone: FixedOffset,
    /// Category attached to the expense recorded when an invoice is paid.
    pub invoice_payment_category: String,
}

impl LedgerSettings {
    pub fn new(
        utc_offset_minutes: i32,
        invoice_payment_category: impl Into<String>,
    ) -> CoreResult<Self> {
        let timezone = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            CoreError::Validation(format!("invalid UTC offset: {utc_offset_minutes} minutes"))
        })?;
        let invoice_payment_category = invoice_payment_category.into();
        if invoice_payment_category.trim().is_empty() {
            return Err(CoreError::Validation(
                "invoice payment category must not be empty".into(),
            ));
        }
        Ok(Self {
            timezone,
            invoice_payment_category,
        })
    }

    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        clock.today_in(&self.timezone)
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            timezone: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60)
                .unwrap_or_else(|| Utc.fix()),
            invoice_payment_category: DEFAULT_INVOICE_PAYMENT_CATEGORY.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timezone_is_utc_minus_three() {
        let settings = LedgerSettings::default();
        assert_eq!(settings.timezone.local_minus_utc(), -3 * 3600);
    }

    #[test]
    fn rejects_out_of_range_offsets() {
        let err = LedgerSettings::new(24 * 60, "Card").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
