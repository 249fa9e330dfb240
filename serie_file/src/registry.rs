//! Registry of open files for "act on every open file" operations.
//!
//! Constructed by the application and passed to whatever needs the
//! broadcast operations; there is no global instance. Files opened through
//! [`FileRegistry::open`] register themselves and deregister when dropped.

use crate::access::FileAccess;
use crate::error::FileResult;
use crate::file::{File, FileCore};
use crate::protocol;
use parking_lot::Mutex;
use serie_common::config::FlushConfig;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::debug;

struct Entry {
    access: FileAccess,
    core: Weak<Mutex<FileCore>>,
}

#[derive(Default)]
struct Entries {
    next_id: u64,
    files: BTreeMap<u64, Entry>,
}

/// Open writer and reader files of this process
pub struct FileRegistry {
    config: FlushConfig,
    entries: Mutex<Entries>,
}

/// Scoped membership of one file in a registry
pub(crate) struct Registration {
    registry: Weak<FileRegistry>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.entries.lock().files.remove(&self.id);
        }
    }
}

impl FileRegistry {
    /// Create an empty registry; files it opens use `config`.
    pub fn new(config: FlushConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            entries: Mutex::new(Entries::default()),
        })
    }

    /// Flush settings given to files opened here
    pub fn config(&self) -> FlushConfig {
        self.config
    }

    /// Open a file and register it.
    pub fn open(self: &Arc<Self>, path: impl AsRef<Path>, access: FileAccess) -> FileResult<File> {
        let mut file = File::open_with(path, access, self.config)?;

        let id = {
            let mut entries = self.entries.lock();
            let id = entries.next_id;
            entries.next_id += 1;
            entries.files.insert(
                id,
                Entry {
                    access,
                    core: Arc::downgrade(file.core()),
                },
            );
            id
        };
        file.set_registration(Registration {
            registry: Arc::downgrade(self),
            id,
        });
        debug!("Registered {:?} ({}) as #{}", file.path(), access, id);
        Ok(file)
    }

    /// Open, registered writer files
    pub fn writer_count(&self) -> usize {
        self.open_cores(FileAccess::Write).len()
    }

    /// Open, registered reader files
    pub fn reader_count(&self) -> usize {
        self.open_cores(FileAccess::Read).len()
    }

    fn open_cores(&self, access: FileAccess) -> Vec<Arc<Mutex<FileCore>>> {
        // Snapshot, so no file lock is taken under the registry lock
        let cores: Vec<_> = self
            .entries
            .lock()
            .files
            .values()
            .filter(|entry| entry.access == access)
            .filter_map(|entry| entry.core.upgrade())
            .collect();
        cores.into_iter().filter(|core| core.lock().is_open()).collect()
    }

    fn for_each(
        &self,
        access: FileAccess,
        mut op: impl FnMut(&mut FileCore) -> FileResult<()>,
    ) -> FileResult<()> {
        let mut first_error = None;
        for core in self.open_cores(access) {
            if let Err(e) = op(&mut *core.lock()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Flush every writer file
    pub fn flush_all_files(&self) -> FileResult<()> {
        self.for_each(FileAccess::Write, FileCore::flush)
    }

    /// Serve pending flush requests on every writer file. Returns the
    /// number of flushes served.
    pub fn flush_all_files_if_requested(&self) -> FileResult<usize> {
        let mut served = 0;
        self.for_each(FileAccess::Write, |core| {
            if core.flush_if_requested()? {
                served += 1;
            }
            Ok(())
        })?;
        Ok(served)
    }

    /// Promote every writer file to SWMR mode
    pub fn reopen_all_files_as_swmr(&self) -> FileResult<()> {
        self.for_each(FileAccess::Write, FileCore::reopen_as_swmr)
    }

    /// Refresh every reader file unconditionally
    pub fn refresh_all_files(&self) -> FileResult<()> {
        self.for_each(FileAccess::Read, FileCore::refresh)
    }

    /// Batched request-wait-refresh over `files`.
    ///
    /// All requests are posted before any wait starts, so the writers flush
    /// concurrently and the batch takes about one wait interval. Returns
    /// the number of files refreshed.
    pub fn refresh_files_after_writer_flush(&self, files: &[&File]) -> FileResult<usize> {
        let cores: Vec<_> = files.iter().map(|file| file.core().clone()).collect();
        protocol::refresh_batch_after_writer_flush(&cores)
    }

    /// Batched request-wait-refresh over every registered reader file
    pub fn refresh_all_files_after_writer_flush(&self) -> FileResult<usize> {
        protocol::refresh_batch_after_writer_flush(&self.open_cores(FileAccess::Read))
    }
}
