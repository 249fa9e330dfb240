//! # serie
//!
//! Writer, follower and maintenance tool for serie files.
//!
//! # Usage
//!
//! ```bash
//! # Write 1 kHz samples, serving reader flush requests
//! serie write run.serie --columns x,y --rate-hz 1000
//!
//! # Follow the writer, refreshing 10 times per second
//! serie follow run.serie --interval-ms 100
//!
//! # Inspect a file
//! serie info run.serie --json
//!
//! # Remove channels left by crashed writers
//! serie cleanup
//! ```

#![deny(warnings)]

use clap::{Parser, Subcommand};
use serie::config::AppConfig;
use serie::follow::{self, FollowOptions};
use serie::info;
use serie::write::{self, WriteOptions};
use serie::CliResult;
use serie_common::prelude::LogLevel;
use serie_shared_memory::cleanup_orphaned_channels;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// serie - single-writer/multi-reader time-series files
#[derive(Parser, Debug)]
#[command(name = "serie")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Writer, follower and maintenance tool for serie files")]
#[command(long_about = None)]
struct Args {
    /// Path to serie.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append synthetic samples and serve reader flush requests
    Write {
        /// Output file (truncated)
        file: PathBuf,

        /// Series name
        #[arg(long, default_value = "samples")]
        series: String,

        /// Value columns, comma separated
        #[arg(long, value_delimiter = ',', default_value = "value")]
        columns: Vec<String>,

        /// Samples per second
        #[arg(long, default_value_t = 100.0)]
        rate_hz: f64,

        /// Stop after this many samples
        #[arg(long)]
        count: Option<u64>,

        /// Do not promote the file to SWMR mode
        #[arg(long)]
        no_swmr: bool,
    },

    /// Periodically ask writers to flush and refresh
    Follow {
        /// Files to follow
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Also notify the writer of this file on every refresh
        #[arg(long = "link", action = clap::ArgAction::Append)]
        links: Vec<PathBuf>,

        /// Pause between refresh cycles
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Summarize a file
    Info {
        /// File to inspect
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Ask a running writer to flush first
        #[arg(long)]
        refresh: bool,
    },

    /// Remove control channels whose writer process is gone
    Cleanup,
}

fn main() {
    if let Err(e) = run() {
        error!("serie failed: {}", e);
        eprintln!("serie: {e}");
        std::process::exit(1);
    }
}

fn run() -> CliResult<()> {
    let args = Args::parse();

    let config = AppConfig::resolve(args.config.as_deref());
    let log_level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);
    let config = config?;

    match args.command {
        Command::Write {
            file,
            series,
            columns,
            rate_hz,
            count,
            no_swmr,
        } => {
            let running = shutdown_flag()?;
            let options = WriteOptions {
                path: file,
                series,
                columns,
                rate_hz,
                count,
                swmr: !no_swmr,
                service_name: config.shared.service_name.clone(),
            };
            write::run(&options, config.flush, &running)?;
        }
        Command::Follow {
            files,
            links,
            interval_ms,
            cycles,
        } => {
            let running = shutdown_flag()?;
            let options = FollowOptions {
                paths: files,
                links,
                interval: Duration::from_millis(interval_ms),
                cycles,
            };
            let summary = follow::run(&options, config.flush, &running)?;
            info!(
                "Followed {} cycles, {} confirmed refreshes",
                summary.cycles, summary.refreshes
            );
        }
        Command::Info {
            file,
            json,
            refresh,
        } => {
            let summary = info::collect(&file, config.flush, refresh)?;
            if json {
                println!("{}", info::render_json(&summary)?);
            } else {
                print!("{}", info::render_text(&summary));
            }
        }
        Command::Cleanup => {
            let removed = cleanup_orphaned_channels()?;
            info!("Removed {} orphaned channels", removed);
        }
    }

    Ok(())
}

/// Cleared by Ctrl-C so loops can stop and close their files.
fn shutdown_flag() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;
    Ok(running)
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.into()
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
