pub mod build_info;

use std::{env, path::PathBuf};

use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "finledger=info";
pub const HOME_ENV: &str = "FINLEDGER_HOME";

/// Installs the global fmt subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // A subscriber installed by the host process wins.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Root for config and data: `$FINLEDGER_HOME`, else `~/.finledger`.
pub fn app_home() -> PathBuf {
    match env::var_os(HOME_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => finledger_config::default_home_dir(),
    }
}
