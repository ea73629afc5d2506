#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, sync::Mutex};

use chrono::NaiveDate;
use finledger::LedgerEngine;
use finledger_config::Config;
use finledger_core::FixedClock;
use once_cell::sync::Lazy;
use tempfile::TempDir;

/// Keeps temp dirs alive for the duration of the test run.
static TEST_DIRS: Lazy<Mutex<Vec<TempDir>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub fn temp_home() -> PathBuf {
    let temp = TempDir::new().expect("create temp dir");
    let path = temp.path().to_path_buf();
    TEST_DIRS.lock().expect("lock temp dir registry").push(temp);
    path
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Engine over a JSON store in a fresh home, pinned to `today`.
pub fn setup_engine(today: NaiveDate) -> (LedgerEngine, Arc<FixedClock>, PathBuf) {
    let home = temp_home();
    let clock = Arc::new(FixedClock::on(today));
    let engine =
        LedgerEngine::open(&Config::default(), &home, clock.clone()).expect("open engine");
    (engine, clock, home)
}
