use std::{env, process};

use finledger::{
    engine::{settings_from_config, LedgerEngine},
    errors::{AppError, AppResult},
    init_with_filter,
    scheduler::{run_daily, DailySchedule},
    system_clock::SystemClock,
    utils::{self, build_info},
};
use finledger_config::{Config, ConfigManager};
use finledger_core::SweepReport;

const USAGE: &str = "\
Usage: finledger <command>

Commands:
  sweep     Run the invoice status sweep once and print the report
  daemon    Run the sweep every day at the configured time
  version   Print build information
  help      Show this message

Environment:
  FINLEDGER_HOME   Root for config and data (default: ~/.finledger)
  RUST_LOG         Overrides the configured log filter";

fn main() {
    let command = env::args().nth(1).unwrap_or_else(|| "help".into());
    if let Err(err) = run(&command) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(command: &str) -> AppResult<()> {
    match command {
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        "version" | "--version" | "-V" => {
            for line in build_info::current().lines() {
                println!("{line}");
            }
            Ok(())
        }
        "sweep" => {
            let (config, engine) = open_engine()?;
            let report = engine.sweep();
            print_report(&report, &config);
            Ok(())
        }
        "daemon" => {
            let (config, engine) = open_engine()?;
            let settings = settings_from_config(&config)?;
            let schedule = DailySchedule::from_config(&config.scheduler, settings.timezone)?;
            println!(
                "Sweeping daily at {:02}:{:02} (UTC offset {} min)",
                config.scheduler.hour, config.scheduler.minute, config.utc_offset_minutes
            );
            run_daily(&engine, &schedule, &SystemClock, |report| {
                print_report(report, &config);
                true
            })
        }
        other => Err(AppError::InvalidInput(format!(
            "unknown command `{other}`; run `finledger help`"
        ))),
    }
}

fn open_engine() -> AppResult<(Config, LedgerEngine)> {
    let home = utils::app_home();
    let config = ConfigManager::with_base_dir(home.clone())?.load()?;
    init_with_filter(&config.log_filter);
    let engine = LedgerEngine::open_system(&config, &home)?;
    Ok((config, engine))
}

fn print_report(report: &SweepReport, config: &Config) {
    let date = report
        .date
        .map(|date| date.to_string())
        .unwrap_or_else(|| "unknown date".into());
    println!(
        "Invoice sweep for {date} (UTC offset {} min): {} users, {} cards, {} invoices, \
         {} transitions, {} failures",
        config.utc_offset_minutes,
        report.users,
        report.cards,
        report.invoices,
        report.transitions(),
        report.failures
    );
    for change in &report.changes {
        println!(
            "  card {} invoice {}: {} -> {}",
            change.card_id, change.invoice_id, change.from, change.to
        );
    }
}
