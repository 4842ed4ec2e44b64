//! # rtloop demo runner
//!
//! Runs the cyclic threads described in a TOML file, optionally traces them
//! to a JSON Lines file, and prints per-thread latency statistics on exit.
//!
//! # Usage
//!
//! ```bash
//! # Run until Ctrl-C
//! rtloop_demo --config rtloop_demo/config/demo.toml
//!
//! # Run 10 s and trace to a file
//! rtloop_demo -c rtloop_demo/config/demo.toml --duration-s 10 --trace /tmp/demo.jsonl
//!
//! # Verbose JSON logs
//! rtloop_demo -c rtloop_demo/config/demo.toml -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use rtloop_common::config::{ConfigLoader, LogLevel};
use rtloop_demo::config::DemoConfig;
use rtloop_demo::runner::{self, Report};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// rtloop demo - fixed-period real-time threads with latency tracing
#[derive(Parser, Debug)]
#[command(name = "rtloop_demo")]
#[command(version)]
#[command(about = "Run cyclic real-time threads from a TOML file and report their latency")]
#[command(long_about = None)]
struct Args {
    /// Path to the demo configuration file.
    #[arg(short, long, default_value = "rtloop_demo/config/demo.toml")]
    config: PathBuf,

    /// Stop after this many seconds (default: run until Ctrl-C).
    #[arg(short, long, value_name = "SECONDS")]
    duration_s: Option<u64>,

    /// Trace to this file (overrides `[trace] path`).
    #[arg(short, long, value_name = "FILE")]
    trace: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("rtloop demo failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match DemoConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            setup_tracing(&args, LogLevel::default());
            return Err(format!("{}: {e}", args.config.display()).into());
        }
    };
    setup_tracing(&args, config.shared.log_level);

    info!(
        "rtloop demo v{} starting '{}' with {} thread(s)",
        env!("CARGO_PKG_VERSION"),
        config.shared.app_name,
        config.threads.len()
    );

    let mut demo = runner::build(&config, args.trace.as_deref())?;

    let stop = demo.app.stop_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        stop.request_stop();
    })?;

    let duration = args
        .duration_s
        .map_or(Duration::MAX, Duration::from_secs);
    let result = demo.app.run_for(duration);

    println!("{}", Report(&demo.monitors));
    if let Some(path) = demo.app.session().and_then(|s| s.path()) {
        info!("Trace written to {}", path.display());
    }
    result?;

    info!("rtloop demo shutdown complete");
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the config log level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
