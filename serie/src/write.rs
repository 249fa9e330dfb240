//! `serie write`: synthetic sample writer that serves reader flush requests.

use crate::error::{CliError, CliResult};
use serde::Serialize;
use serie_common::config::FlushConfig;
use serie_file::{File, FileAccess};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Options of the `write` subcommand
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Output file, truncated on open
    pub path: PathBuf,
    /// Series name
    pub series: String,
    /// Value column names; a leading `time` column is always added
    pub columns: Vec<String>,
    /// Samples per second
    pub rate_hz: f64,
    /// Stop after this many samples
    pub count: Option<u64>,
    /// Promote the file to SWMR mode before writing
    pub swmr: bool,
    /// Value written to the `writer` attribute
    pub service_name: String,
}

/// What a write session did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Rows appended
    pub rows: u64,
    /// Reader flush requests served
    pub flushes_served: u64,
}

/// Sample `index` of a deterministic multi-channel test signal
pub fn sample(index: u64, rate_hz: f64, channels: usize) -> Vec<f64> {
    let t = index as f64 / rate_hz;
    let mut row = Vec::with_capacity(channels + 1);
    row.push(t);
    row.extend((0..channels).map(|c| (t * (c + 1) as f64).sin()));
    row
}

/// Write samples until `count` is reached or `running` is cleared,
/// serving flush requests every `serve_interval_ms`.
pub fn run(options: &WriteOptions, flush: FlushConfig, running: &AtomicBool) -> CliResult<WriteSummary> {
    if !(options.rate_hz > 0.0 && options.rate_hz.is_finite()) {
        return Err(CliError::InvalidArgument(format!(
            "rate must be positive, got {}",
            options.rate_hz
        )));
    }
    if options.columns.is_empty() {
        return Err(CliError::InvalidArgument(
            "at least one value column is required".to_string(),
        ));
    }

    let file = File::open_with(&options.path, FileAccess::Write, flush)?;
    if options.swmr {
        file.reopen_as_swmr()?;
    }

    let mut columns: Vec<&str> = vec!["time"];
    columns.extend(options.columns.iter().map(String::as_str));
    let series = file.create_series(&options.series, &columns)?;
    {
        let writer = file.attribute("writer")?;
        writer.write(&options.service_name)?;
    }
    file.flush()?;
    info!(
        "Writing {:?} series '{}' at {} Hz, channel {}",
        file.path(),
        options.series,
        options.rate_hz,
        file.channel_name()
    );

    let period = Duration::from_secs_f64(1.0 / options.rate_hz);
    let serve_interval = flush.serve_interval();
    let start = Instant::now();
    let mut next_serve = start;
    let mut summary = WriteSummary::default();

    while running.load(Ordering::SeqCst) {
        if options.count.is_some_and(|count| summary.rows >= count) {
            break;
        }

        let now = Instant::now();
        let due = (now.duration_since(start).as_secs_f64() * options.rate_hz) as u64 + 1;
        let limit = options.count.map_or(due, |count| due.min(count));
        while summary.rows < limit {
            series.append(&sample(summary.rows, options.rate_hz, options.columns.len()))?;
            summary.rows += 1;
        }

        if now >= next_serve {
            if file.flush_if_requested()? {
                summary.flushes_served += 1;
                debug!("Served flush request at row {}", summary.rows);
            }
            next_serve = now + serve_interval;
        }

        thread::sleep(period.min(serve_interval));
    }

    drop(series);
    file.close()?;
    info!(
        "Wrote {} rows, served {} flush requests",
        summary.rows, summary.flushes_served
    );
    Ok(summary)
}
