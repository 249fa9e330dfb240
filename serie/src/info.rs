//! `serie info`: one-shot summary of a file.

use crate::error::CliResult;
use serde::Serialize;
use serie_common::config::FlushConfig;
use serie_file::{File, FileAccess};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Summary of one series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesInfo {
    /// Series name
    pub name: String,
    /// Column names
    pub columns: Vec<String>,
    /// Committed rows
    pub rows: usize,
    /// Last committed row
    pub last: Option<Vec<f64>>,
}

/// Summary of a file as seen by a reader
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    /// Canonical path
    pub path: PathBuf,
    /// Control channel name
    pub channel: String,
    /// Whether a writer channel exists
    pub writer_running: bool,
    /// Whether the file was written in SWMR mode
    pub swmr: bool,
    /// Committed frames
    pub frames: u64,
    /// Series in declaration order
    pub series: Vec<SeriesInfo>,
    /// File attributes
    pub attributes: BTreeMap<String, String>,
}

/// Open `path` as a reader and summarize it. With `refresh`, a running
/// writer is asked to flush first.
pub fn collect(path: &Path, flush: FlushConfig, refresh: bool) -> CliResult<FileInfo> {
    let file = File::open_with(path, FileAccess::Read, flush)?;
    if refresh {
        file.refresh_after_writer_flush()?;
    }

    let mut series = Vec::new();
    for name in file.series_names()? {
        let handle = file.series(&name)?;
        series.push(SeriesInfo {
            columns: handle.columns().to_vec(),
            rows: handle.len()?,
            last: handle.last_row()?,
            name,
        });
    }

    Ok(FileInfo {
        path: file.path().to_path_buf(),
        channel: file.channel_name().to_string(),
        writer_running: file.has_writer_channel(),
        swmr: file.is_swmr(),
        frames: file.committed_frames()?,
        series,
        attributes: file.attributes()?,
    })
}

/// Human readable rendering
pub fn render_text(info: &FileInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "file:     {}", info.path.display());
    let _ = writeln!(
        out,
        "channel:  {} ({})",
        info.channel,
        if info.writer_running { "writer running" } else { "no writer" }
    );
    let _ = writeln!(out, "swmr:     {}", info.swmr);
    let _ = writeln!(out, "frames:   {}", info.frames);
    for series in &info.series {
        let _ = writeln!(
            out,
            "series:   {} [{}] {} rows",
            series.name,
            series.columns.join(", "),
            series.rows
        );
    }
    for (name, value) in &info.attributes {
        let _ = writeln!(out, "attr:     {name} = {value}");
    }
    out
}

/// JSON rendering
pub fn render_json(info: &FileInfo) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(info)?)
}
