//! Lifecycle management and cleanup operations
//!
//! Writers register every channel they create with the process-wide
//! [`ExitCleanup`] tracker. The first registration installs an `atexit`
//! hook that removes whatever is still registered when the process exits,
//! which covers `std::process::exit` and other paths that skip destructors.
//! A clean channel teardown unregisters its name again so that this process
//! never removes a segment a later writer in another process created.

use crate::error::ShmResult;
use crate::naming::is_channel_name;
use crate::platform::{PlatformRegion, SharedRegion, is_process_alive};
use crate::segment::{CONTROL_BLOCK_SIZE, ControlBlock};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{LazyLock, Once};

/// Tracker of channel names created by writers in this process.
#[derive(Debug, Default)]
pub struct ExitCleanup {
    channels: BTreeSet<String>,
}

impl ExitCleanup {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a channel created by this process
    pub fn register(&mut self, name: &str) {
        self.channels.insert(name.to_string());
    }

    /// Stop tracking a channel that was torn down cleanly
    pub fn unregister(&mut self, name: &str) {
        self.channels.remove(name);
    }

    /// Names currently tracked
    pub fn tracked(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    /// Remove every tracked segment from the OS namespace.
    ///
    /// Returns the number of segments actually removed.
    pub fn remove_all(&mut self) -> usize {
        let mut removed = 0;
        for name in std::mem::take(&mut self.channels) {
            if let Ok(true) = PlatformRegion::remove(&name) {
                removed += 1;
            }
        }
        removed
    }
}

/// Global cleanup instance
static EXIT_CLEANUP: LazyLock<Mutex<ExitCleanup>> =
    LazyLock::new(|| Mutex::new(ExitCleanup::new()));

static INSTALL_EXIT_HOOK: Once = Once::new();

extern "C" fn exit_hook() {
    run_exit_cleanup();
}

fn install_exit_hook() {
    INSTALL_EXIT_HOOK.call_once(|| {
        // SAFETY: exit_hook is a plain extern "C" fn that never unwinds
        let rc = unsafe { libc::atexit(exit_hook) };
        if rc != 0 {
            tracing::warn!("Could not install exit-time channel cleanup");
        }
    });
}

/// Track a channel this process created; installs the exit hook on first use.
pub fn register_channel(name: &str) {
    install_exit_hook();
    EXIT_CLEANUP.lock().register(name);
}

/// Stop tracking a channel after its clean teardown.
pub fn unregister_channel(name: &str) {
    EXIT_CLEANUP.lock().unregister(name);
}

/// Channel names currently tracked for exit-time removal.
pub fn tracked_channels() -> Vec<String> {
    EXIT_CLEANUP.lock().tracked().map(str::to_string).collect()
}

/// Remove all tracked channels now. Called by the exit hook.
pub fn run_exit_cleanup() -> usize {
    EXIT_CLEANUP.lock().remove_all()
}

/// Remove channels whose writer process is no longer alive.
///
/// Scans the shared memory directory for `serie_*` segments, reads the
/// writer PID from each valid control block and removes the segment if that
/// process is gone. Segments that fail validation are left alone since they
/// may belong to a writer that is still initializing them.
pub fn cleanup_orphaned_channels() -> ShmResult<usize> {
    let dir = std::path::Path::new(crate::platform::SHM_DIR);
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in std::fs::read_dir(dir)?.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !is_channel_name(name) {
            continue;
        }

        let Some(writer_pid) = channel_writer_pid(name) else {
            continue;
        };
        if is_process_alive(writer_pid) {
            continue;
        }

        if PlatformRegion::remove(name)? {
            tracing::info!("Removed orphaned channel {} (writer pid {} gone)", name, writer_pid);
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

fn channel_writer_pid(name: &str) -> Option<u32> {
    let region = PlatformRegion::open(name, CONTROL_BLOCK_SIZE).ok()?;
    // SAFETY: the region is mapped for CONTROL_BLOCK_SIZE bytes and page aligned
    let block = unsafe { ControlBlock::from_ptr(region.as_ptr(), name) }.ok()?;
    Some(block.writer_pid())
}
