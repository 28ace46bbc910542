//! autostep CLI Entry Point
//!
//! Provides a command-line interface for running step tables against the
//! simulated device.
//!
//! # Usage
//!
//! ```bash
//! # Run a step table
//! autostep login.yaml
//!
//! # Validate only and print the transitions
//! autostep login.yaml --check
//!
//! # Start elsewhere, pace faster, and mark an app as installed
//! autostep login.yaml --entry 3 --step-delay 200 --install com.tencent.mm
//!
//! # Print the final status snapshot as JSON
//! autostep login.yaml --status-json
//! ```

use std::env;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn, LevelFilter};

use autostep::device::{AppRegistry, KeepAlive, SettleVerifier, SimulatedDevice};
use autostep::execution::{ActionDispatcher, Engine, RunCoordinator, BUILTIN_ACTIONS};
use autostep::monitoring::{LogEntry, LogStream, RUN_LOG_TARGET};
use autostep::workflow::validator::find_unknown_actions;
use autostep::workflow::{load_step_table, DeviceIdentity, StepTable};
use autostep::{APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    table_path: Option<String>,
    entry: Option<u32>,
    step_delay_ms: Option<u64>,
    apps_path: Option<String>,
    installs: Vec<String>,
    check_only: bool,
    status_json: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
///
/// Run log entries are printed by the live tail instead, so their mirror
/// target is switched off here.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .filter_module(RUN_LOG_TARGET, LevelFilter::Off)
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Branching Step Engine for Device Automation");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: autostep [OPTIONS] <STEP_TABLE_FILE>");
    println!();
    println!("Arguments:");
    println!("  <STEP_TABLE_FILE>   Path to step table YAML file");
    println!();
    println!("Options:");
    println!("  --entry N           Step id to start at (default: from file, else 1)");
    println!("  --step-delay MS     Pause between steps in milliseconds");
    println!("  --apps FILE         App alias registry (default: apps.json)");
    println!("  --install PKG       Mark a package as installed (repeatable)");
    println!("  --check             Validate the table and print its transitions");
    println!("  --status-json       Print the final status snapshot as JSON");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Without --install, every package in the alias registry counts as installed.");
    println!();
    println!("Examples:");
    println!("  autostep login.yaml");
    println!("  autostep login.yaml --check");
    println!("  autostep login.yaml --entry 3 --install com.tencent.mm");
}

fn option_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--check" => config.check_only = true,
            "--status-json" => config.status_json = true,
            "--verbose" | "-v" => config.verbose = true,
            "--entry" => {
                let value = option_value(args, &mut i, "--entry")?;
                let entry: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid entry step: {}", value))?;
                if entry == 0 {
                    return Err("Entry step 0 is reserved for ending a run".to_string());
                }
                config.entry = Some(entry);
            }
            "--step-delay" => {
                let value = option_value(args, &mut i, "--step-delay")?;
                config.step_delay_ms = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid step delay: {}", value))?,
                );
            }
            "--apps" => {
                config.apps_path = Some(option_value(args, &mut i, "--apps")?.to_string());
            }
            "--install" => {
                config
                    .installs
                    .push(option_value(args, &mut i, "--install")?.to_string());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.table_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.table_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Prints every step and where each outcome leads.
fn print_transitions(table: &StepTable, entry: u32) {
    println!("Transitions (entry: {}):", entry);
    for step in table.steps() {
        let args: Vec<String> = step.args.iter().map(|a| a.to_string()).collect();
        println!(
            "  [{}] {:<20} {}({})  ok -> {}  fail -> {}",
            step.id,
            step.name,
            step.action,
            args.join(", "),
            step.on_success,
            step.on_failure
        );
    }
    println!();
}

fn print_entry(entry: &LogEntry) {
    let line = entry.to_string();
    match entry.level {
        log::Level::Error => println!("{}", line.red().bold()),
        log::Level::Warn => println!("{}", line.yellow()),
        _ => println!("{}", line),
    }
}

/// Prints entries appended since `cursor` and advances it.
fn drain_log(log: &LogStream, cursor: &AtomicU64) {
    for entry in log.entries_since(cursor.load(Ordering::SeqCst)) {
        print_entry(&entry);
        cursor.store(entry.seq + 1, Ordering::SeqCst);
    }
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    let Some(table_path) = config.table_path.clone() else {
        print_usage();
        return Err("No step table file given".into());
    };

    setup_logging(config.verbose);
    print_banner();

    // Load step table
    let mut loaded = load_step_table(&table_path).map_err(|e| {
        error!("Failed to load step table: {}", e);
        format!("Could not load step table from '{}': {}", table_path, e)
    })?;

    if let Some(entry) = config.entry {
        if !loaded.table.contains(entry) {
            return Err(format!("Entry step {} is not in the step table", entry).into());
        }
        loaded.settings.entry_step = entry;
    }
    if let Some(delay) = config.step_delay_ms {
        loaded.settings.step_delay_ms = delay;
    }
    let settings = loaded.settings;

    for (id, action) in find_unknown_actions(&loaded.table, BUILTIN_ACTIONS) {
        warn!("Step {} uses unknown action '{}', it will always fail", id, action);
    }

    if config.check_only {
        print_transitions(&loaded.table, settings.entry_step);
        info!("Step table is valid");
        return Ok(());
    }

    // Device and actions
    let apps = match &config.apps_path {
        Some(path) => AppRegistry::load_from(path)?,
        None => AppRegistry::load(),
    };

    let mut device = SimulatedDevice::from_settings(&settings);
    let installs: Vec<String> = if config.installs.is_empty() {
        apps.as_map().values().cloned().collect()
    } else {
        config.installs.clone()
    };
    for package in installs {
        device = device.install(package);
    }

    let log = LogStream::new(settings.log_capacity);
    let dispatcher = ActionDispatcher::with_builtin_actions(Arc::new(device), Arc::new(apps), log.clone())
        .with_verifier(Arc::new(SettleVerifier::new(settings.verify_settle())));

    let mut identity = DeviceIdentity::detect();
    identity.file_name = Some(table_path.clone());

    let engine = Engine::new(Arc::new(loaded.table), Arc::new(dispatcher))
        .with_settings(&settings)
        .with_identity(identity);
    let coordinator = RunCoordinator::new(
        Arc::new(engine),
        Arc::new(KeepAlive::new(APP_NAME)),
        &settings,
    );

    // Live tail of the run log
    let cursor = Arc::new(AtomicU64::new(0));
    let tail = {
        let log = log.clone();
        let cursor = cursor.clone();
        tokio::spawn(async move {
            let mut changes = log.subscribe();
            loop {
                drain_log(&log, &cursor);
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    };

    if !coordinator.request_start() {
        return Err("Automation could not be started".into());
    }

    tokio::select! {
        _ = coordinator.wait_until_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping automation");
            while coordinator.is_running() && !coordinator.request_stop() {
                tokio::time::sleep(settings.debounce()).await;
            }
            coordinator.wait_until_idle().await;
        }
    }

    tail.abort();
    let _ = tail.await;
    drain_log(&log, &cursor);

    // Report
    let engine = coordinator.engine();
    let timeline = engine.timeline();
    println!("{}", timeline.gantt_chart());
    for (id, timing) in timeline.step_timings() {
        println!(
            "  step {:>4}: {} visits, {} failed, {} ms",
            id, timing.visits, timing.failures, timing.total_ms
        );
    }

    let status = coordinator.status();
    if config.status_json {
        println!();
        println!("{}", status.to_json()?);
    }

    match status.last_error {
        Some(e) => Err(format!("Automation stopped with an error: {}", e).into()),
        None => {
            info!("Automation finished after {} dispatches", status.dispatches);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
