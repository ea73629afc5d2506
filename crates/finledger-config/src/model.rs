use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ConfigError;

const HOME_DIR_NAME: &str = ".finledger";
const DATA_DIR_NAME: &str = "users";

/// Engine configuration persisted as `config/config.json` under the app home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the per-user JSON documents. Defaults to `<home>/users`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Fixed ledger timezone, in minutes east of UTC.
    #[serde(default = "Config::default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "Config::default_log_filter")]
    pub log_filter: String,
    #[serde(default = "Config::default_currency")]
    pub default_currency: String,
    #[serde(default = "Config::default_invoice_payment_category")]
    pub invoice_payment_category: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            utc_offset_minutes: Self::default_utc_offset_minutes(),
            scheduler: SchedulerConfig::default(),
            log_filter: Self::default_log_filter(),
            default_currency: Self::default_currency(),
            invoice_payment_category: Self::default_invoice_payment_category(),
        }
    }
}

impl Config {
    pub fn default_utc_offset_minutes() -> i32 {
        -180
    }

    pub fn default_log_filter() -> String {
        "finledger=info".into()
    }

    pub fn default_currency() -> String {
        "BRL".into()
    }

    pub fn default_invoice_payment_category() -> String {
        "Credit card invoice".into()
    }

    pub fn resolve_data_dir(&self, home: &Path) -> PathBuf {
        match &self.data_dir {
            Some(path) => path.clone(),
            None => home.join(DATA_DIR_NAME),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // chrono::FixedOffset accepts strictly less than one day either way.
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        self.scheduler.validate()?;
        if self.default_currency.trim().is_empty() {
            return Err(ConfigError::Invalid("default_currency is empty".into()));
        }
        if self.invoice_payment_category.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "invoice_payment_category is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Daily time, in the ledger timezone, at which the invoice status sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hour: Self::default_hour(),
            minute: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn default_hour() -> u32 {
        6
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hour > 23 || self.minute > 59 {
            return Err(ConfigError::Invalid(format!(
                "scheduler time {:02}:{:02} is not a valid time of day",
                self.hour, self.minute
            )));
        }
        Ok(())
    }
}

/// `~/.finledger`, falling back to the working directory when no home exists.
pub fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOME_DIR_NAME)
}
