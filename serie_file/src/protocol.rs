//! Reader side of the flush-request protocol over a primary channel and any
//! linked channels.
//!
//! A request goes to every channel; a wait blocks on each in turn and
//! succeeds if any writer confirmed. Deadlines run from each channel's own
//! request time, so waiting on the first channel does not extend the others.

use crate::error::FileResult;
use crate::file::FileCore;
use parking_lot::Mutex;
use serie_shared_memory::{ControlChannel, WaitOutcome};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Post a flush request on the primary channel and all linked channels.
pub(crate) fn request_flush(
    path: &Path,
    primary: Option<&mut ControlChannel>,
    links: &mut [ControlChannel],
) -> FileResult<()> {
    for channel in primary.into_iter().chain(links.iter_mut()) {
        debug!(
            "Asking writer of {:?} to flush (channel {})",
            path,
            channel.name()
        );
        channel.request_flush()?;
    }
    Ok(())
}

/// Wait on every channel; `true` if at least one writer confirmed.
pub(crate) fn wait_for_flush(
    path: &Path,
    primary: Option<&mut ControlChannel>,
    links: &mut [ControlChannel],
    wait: Duration,
) -> FileResult<bool> {
    let mut confirmed = false;
    for channel in primary.into_iter().chain(links.iter_mut()) {
        match channel.wait_for_flush(wait)? {
            WaitOutcome::Confirmed { after } => {
                debug!(
                    "Writer flushed {:?} (channel {}) after {:?}",
                    path,
                    channel.name(),
                    after
                );
                confirmed = true;
            }
            WaitOutcome::TimedOut { waited } => {
                warn!(
                    "Writer of {:?} (channel {}) did not flush within {:?}",
                    path,
                    channel.name(),
                    waited
                );
            }
            WaitOutcome::WriterGone { pid } => {
                warn!(
                    "Writer process {} of {:?} (channel {}) is gone",
                    pid,
                    path,
                    channel.name()
                );
            }
            WaitOutcome::NotRequested => {}
        }
    }
    Ok(confirmed)
}

/// Request on all files, then wait on all, then refresh the confirmed ones.
///
/// Every file is attempted; the first error is returned after the batch
/// completes. Returns the number of files refreshed.
pub(crate) fn refresh_batch_after_writer_flush(cores: &[Arc<Mutex<FileCore>>]) -> FileResult<usize> {
    let mut first_error = None;

    for core in cores {
        if let Err(e) = core.lock().request_writer_flush() {
            first_error.get_or_insert(e);
        }
    }

    let confirmed: Vec<bool> = cores
        .iter()
        .map(|core| match core.lock().wait_for_writer_flush() {
            Ok(confirmed) => confirmed,
            Err(e) => {
                first_error.get_or_insert(e);
                false
            }
        })
        .collect();

    let mut refreshed = 0;
    for (core, confirmed) in cores.iter().zip(confirmed) {
        if !confirmed {
            continue;
        }
        match core.lock().refresh() {
            Ok(()) => refreshed += 1,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(refreshed),
    }
}
