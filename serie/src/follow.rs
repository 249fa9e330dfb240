//! `serie follow`: periodic request-wait-refresh over one or more files.

use crate::error::CliResult;
use serde::Serialize;
use serie_common::config::FlushConfig;
use serie_file::{File, FileAccess, FileRegistry};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Options of the `follow` subcommand
#[derive(Debug, Clone)]
pub struct FollowOptions {
    /// Files to follow
    pub paths: Vec<PathBuf>,
    /// Files whose writers are also asked to flush on every refresh
    pub links: Vec<PathBuf>,
    /// Pause between refresh cycles
    pub interval: Duration,
    /// Stop after this many cycles
    pub cycles: Option<u64>,
}

/// What a follow session observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FollowSummary {
    /// Refresh cycles run
    pub cycles: u64,
    /// File refreshes confirmed by a writer, over all cycles
    pub refreshes: u64,
}

/// Rows per series of `file`, formatted for the log
fn describe(file: &File) -> CliResult<String> {
    let mut parts = Vec::new();
    for name in file.series_names()? {
        let series = file.series(&name)?;
        parts.push(format!("{}={}", name, series.len()?));
    }
    Ok(parts.join(" "))
}

/// Follow the files until `cycles` is reached or `running` is cleared.
pub fn run(options: &FollowOptions, flush: FlushConfig, running: &AtomicBool) -> CliResult<FollowSummary> {
    let registry = FileRegistry::new(flush);
    let files = options
        .paths
        .iter()
        .map(|path| registry.open(path, FileAccess::Read))
        .collect::<Result<Vec<_>, _>>()?;

    for file in &files {
        if !file.has_writer_channel() {
            warn!("No writer running for {:?}, showing committed data only", file.path());
        }
        for link in &options.links {
            if !file.add_file_to_notify_on_refresh(link)? {
                warn!("No writer running for linked file {:?}", link);
            }
        }
    }

    let mut summary = FollowSummary::default();
    while running.load(Ordering::SeqCst) {
        if options.cycles.is_some_and(|cycles| summary.cycles >= cycles) {
            break;
        }

        let refreshed = registry.refresh_all_files_after_writer_flush()?;
        summary.cycles += 1;
        summary.refreshes += refreshed as u64;

        for file in &files {
            info!("{:?}: {}", file.path(), describe(file)?);
        }
        thread::sleep(options.interval);
    }

    Ok(summary)
}
