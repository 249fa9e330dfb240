//! File handle: role-checked access to a record file plus its flush
//! control channel.

use crate::access::FileAccess;
use crate::error::{FileError, FileResult};
use crate::objects::{ObjectKind, ObjectTable};
use crate::protocol;
use crate::registry::Registration;
use crate::series::{Attribute, Series};
use crate::store::RecordStore;
use crate::store::format::{Entry, HeaderFlags};
use parking_lot::Mutex;
use serie_common::config::FlushConfig;
use serie_shared_memory::{ControlChannel, channel_name_for_canonical};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State shared between a [`File`], its child objects and the registry.
pub(crate) struct FileCore {
    path: PathBuf,
    access: FileAccess,
    swmr: bool,
    config: FlushConfig,
    store: Option<RecordStore>,
    channel: Option<ControlChannel>,
    links: Vec<ControlChannel>,
    pub(crate) objects: ObjectTable,
}

impl FileCore {
    fn open(path: &Path, access: FileAccess, config: FlushConfig) -> FileResult<Self> {
        let (store, canonical, channel) = match access {
            FileAccess::Write => {
                let store = RecordStore::create(path)?;
                let canonical = path.canonicalize()?;
                let name = channel_name_for_canonical(&canonical);
                let channel = ControlChannel::create(&name)?;
                info!("Opened {:?} for writing, channel {}", canonical, name);
                (store, canonical, Some(channel))
            }
            FileAccess::Read => {
                let canonical = path.canonicalize()?;
                let store = RecordStore::open_read(&canonical)?;
                let name = channel_name_for_canonical(&canonical);
                let channel = ControlChannel::try_attach(&name);
                info!(
                    "Opened {:?} for reading, writer channel {}",
                    canonical,
                    if channel.is_some() { "attached" } else { "absent" }
                );
                (store, canonical, channel)
            }
        };

        Ok(Self {
            path: canonical,
            access,
            swmr: false,
            config,
            store: Some(store),
            channel,
            links: Vec::new(),
            objects: ObjectTable::default(),
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.store.is_some()
    }

    pub(crate) fn require(&self, access: FileAccess, operation: &'static str) -> FileResult<()> {
        if self.access != access {
            return Err(FileError::RoleMismatch {
                path: self.path.clone(),
                operation,
                access: self.access,
            });
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> FileResult<&RecordStore> {
        self.store.as_ref().ok_or_else(|| FileError::Closed {
            path: self.path.clone(),
        })
    }

    pub(crate) fn store_mut(&mut self) -> FileResult<&mut RecordStore> {
        self.store.as_mut().ok_or_else(|| FileError::Closed {
            path: self.path.clone(),
        })
    }

    pub(crate) fn close(&mut self) -> FileResult<()> {
        if !self.is_open() {
            return Ok(());
        }

        let open = self.objects.open_objects();
        if !open.is_empty() {
            return Err(FileError::OpenObjects {
                path: self.path.clone(),
                objects: open,
            });
        }

        if self.access.is_writer() {
            self.store_mut()?.flush()?;
        }
        self.store = None;
        self.channel = None;
        self.links.clear();
        info!("Closed {:?}", self.path);
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> FileResult<()> {
        self.require(FileAccess::Write, "flush")?;
        self.store_mut()?.flush()?;
        Ok(())
    }

    pub(crate) fn refresh(&mut self) -> FileResult<()> {
        self.require(FileAccess::Read, "refresh")?;
        let store = self.store_mut()?;
        if store.is_swmr() {
            let frames = store.refresh()?;
            debug!("Refreshed {:?}, {} new frames", self.path, frames);
        } else {
            // Not written in SWMR mode: only a full reopen is safe
            store.reload()?;
            debug!("Reopened {:?} to refresh", self.path);
        }
        Ok(())
    }

    pub(crate) fn flush_if_requested(&mut self) -> FileResult<bool> {
        self.require(FileAccess::Write, "flush_if_requested")?;
        let Self {
            path,
            store,
            channel,
            ..
        } = self;
        let Some(channel) = channel.as_ref() else {
            return Err(FileError::Closed { path: path.clone() });
        };

        channel.serve_flush(|| -> FileResult<()> {
            debug!("Flushing {:?}, requested by a reader", path);
            match store.as_mut() {
                Some(store) => store.flush().map(|_| ()),
                None => Err(FileError::Closed { path: path.clone() }),
            }
        })
    }

    pub(crate) fn is_flush_requested(&self) -> FileResult<bool> {
        self.require(FileAccess::Write, "is_flush_requested")?;
        let channel = self.channel.as_ref().ok_or_else(|| FileError::Closed {
            path: self.path.clone(),
        })?;
        Ok(channel.is_flush_requested()?)
    }

    pub(crate) fn request_writer_flush(&mut self) -> FileResult<()> {
        self.require(FileAccess::Read, "request_writer_flush")?;
        protocol::request_flush(&self.path, self.channel.as_mut(), &mut self.links)
    }

    pub(crate) fn wait_for_writer_flush(&mut self) -> FileResult<bool> {
        self.require(FileAccess::Read, "wait_for_writer_flush")?;
        let wait = self.config.refresh_wait();
        protocol::wait_for_flush(&self.path, self.channel.as_mut(), &mut self.links, wait)
    }

    pub(crate) fn refresh_after_writer_flush(&mut self) -> FileResult<bool> {
        self.request_writer_flush()?;
        if self.wait_for_writer_flush()? {
            self.refresh()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn reopen_as_swmr(&mut self) -> FileResult<()> {
        self.require(FileAccess::Write, "reopen_as_swmr")?;
        if self.swmr {
            warn!(
                "reopen_as_swmr called more than once for {:?}, skipping",
                self.path
            );
            return Ok(());
        }

        self.store_mut()?.reopen_with_flags(HeaderFlags::SWMR)?;
        self.swmr = true;
        info!("Reopened {:?} in SWMR mode", self.path);
        Ok(())
    }
}

impl Drop for FileCore {
    fn drop(&mut self) {
        if !self.access.is_writer() {
            return;
        }
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.flush() {
                error!("Failed to flush {:?} on drop: {}", self.path, e);
            }
        }
    }
}

/// Handle on one record file, opened as the single writer or as a reader.
///
/// A writer creates the file and the flush control channel and serves
/// reader requests with [`flush_if_requested`](Self::flush_if_requested).
/// A reader attaches to the channel if a writer is running and uses
/// [`refresh_after_writer_flush`](Self::refresh_after_writer_flush) to see
/// the writer's latest data.
///
/// Operations that do not fit the role fail with
/// [`FileError::RoleMismatch`].
pub struct File {
    core: Arc<Mutex<FileCore>>,
    path: PathBuf,
    access: FileAccess,
    channel_name: String,
    _registration: Option<Registration>,
}

impl File {
    /// Open with the default flush settings and the
    /// `SERIE_REFRESHWAITTIME` override.
    ///
    /// # Errors
    ///
    /// Storage failures, a writer lock held by another process, a
    /// malformed `SERIE_REFRESHWAITTIME`, or (writer) channel creation.
    pub fn open(path: impl AsRef<Path>, access: FileAccess) -> FileResult<Self> {
        let config = FlushConfig::from_env()?;
        Self::open_with(path, access, config)
    }

    /// Open with explicit flush settings.
    pub fn open_with(
        path: impl AsRef<Path>,
        access: FileAccess,
        config: FlushConfig,
    ) -> FileResult<Self> {
        let core = FileCore::open(path.as_ref(), access, config)?;
        let path = core.path.clone();
        let channel_name = channel_name_for_canonical(&path);
        Ok(Self {
            core: Arc::new(Mutex::new(core)),
            path,
            access,
            channel_name,
            _registration: None,
        })
    }

    pub(crate) fn core(&self) -> &Arc<Mutex<FileCore>> {
        &self.core
    }

    pub(crate) fn set_registration(&mut self, registration: Registration) {
        self._registration = Some(registration);
    }

    /// Canonical path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Role
    pub fn access(&self) -> FileAccess {
        self.access
    }

    /// Name of the flush control channel for this file
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Whether the handle is still open
    pub fn is_open(&self) -> bool {
        self.core.lock().is_open()
    }

    /// Whether the writer promoted the file to SWMR mode.
    ///
    /// On a reader this reports the flag in the last header read.
    pub fn is_swmr(&self) -> bool {
        let core = self.core.lock();
        match core.access {
            FileAccess::Write => core.swmr,
            FileAccess::Read => core.store.as_ref().is_some_and(RecordStore::is_swmr),
        }
    }

    /// Whether a flush control channel is available: always for an open
    /// writer, for a reader only if a writer was running at open time.
    pub fn has_writer_channel(&self) -> bool {
        self.core.lock().channel.is_some()
    }

    /// Number of linked files notified on refresh
    pub fn linked_file_count(&self) -> usize {
        self.core.lock().links.len()
    }

    /// Flush settings in effect
    pub fn flush_config(&self) -> FlushConfig {
        self.core.lock().config
    }

    /// Close the file and release its channel.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`FileError::OpenObjects`] names every series or attribute handle
    /// still alive; the file stays open in that case.
    pub fn close(&self) -> FileResult<()> {
        self.core.lock().close()
    }

    /// Writer only: close and reopen in SWMR mode so readers can refresh in
    /// place. A second call logs a warning and does nothing.
    pub fn reopen_as_swmr(&self) -> FileResult<()> {
        self.core.lock().reopen_as_swmr()
    }

    /// Writer only: commit buffered rows.
    pub fn flush(&self) -> FileResult<()> {
        self.core.lock().flush()
    }

    /// Reader only: re-read newly committed data without closing.
    pub fn refresh(&self) -> FileResult<()> {
        self.core.lock().refresh()
    }

    /// Writer only: flush if a reader asked for it, then wake waiting
    /// readers. Returns whether a flush was served.
    pub fn flush_if_requested(&self) -> FileResult<bool> {
        self.core.lock().flush_if_requested()
    }

    /// Writer only: whether a reader request is waiting to be served.
    pub fn is_flush_requested(&self) -> FileResult<bool> {
        self.core.lock().is_flush_requested()
    }

    /// Reader only: ask the writer (and the writers of linked files) to
    /// flush. Does nothing without a writer channel.
    pub fn request_writer_flush(&self) -> FileResult<()> {
        self.core.lock().request_writer_flush()
    }

    /// Reader only: wait until a requested flush is confirmed or the
    /// configured interval after the request has passed.
    ///
    /// Returns `true` if the primary writer or any linked writer confirmed.
    pub fn wait_for_writer_flush(&self) -> FileResult<bool> {
        self.core.lock().wait_for_writer_flush()
    }

    /// Reader only: request, wait, and refresh if the writer confirmed.
    /// Returns whether a refresh happened.
    pub fn refresh_after_writer_flush(&self) -> FileResult<bool> {
        self.core.lock().refresh_after_writer_flush()
    }

    /// Reader only: also notify the writer of `path` on every flush request.
    ///
    /// Returns `false`, and changes nothing, if that file has no running
    /// writer.
    pub fn add_file_to_notify_on_refresh(&self, path: impl AsRef<Path>) -> FileResult<bool> {
        let mut core = self.core.lock();
        core.require(FileAccess::Read, "add_file_to_notify_on_refresh")?;

        let path = path.as_ref();
        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                debug!("Not linking {:?}: {}", path, e);
                return Ok(false);
            }
        };
        let Some(channel) = ControlChannel::try_attach(&channel_name_for_canonical(&canonical))
        else {
            return Ok(false);
        };

        debug!("Linked {:?} to refreshes of {:?}", canonical, core.path);
        core.links.push(channel);
        Ok(true)
    }

    /// Writer only: declare a new series with the given column names.
    pub fn create_series(&self, name: &str, columns: &[&str]) -> FileResult<Series> {
        let mut core = self.core.lock();
        core.require(FileAccess::Write, "create_series")?;
        let store = core.store_mut()?;
        let id = store.catalog().next_series_id();
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        store.append(Entry::Series {
            id,
            name: name.to_string(),
            columns: columns.clone(),
        })?;

        let token = core.objects.track(ObjectKind::Series, name);
        Ok(Series::new(self.core.clone(), name, columns, token))
    }

    /// Open an existing series.
    pub fn series(&self, name: &str) -> FileResult<Series> {
        let core = self.core.lock();
        let catalog = core.store()?.catalog();
        let columns = catalog
            .series_id(name)
            .and_then(|id| catalog.series(id))
            .map(|series| series.columns.clone())
            .ok_or_else(|| FileError::SeriesNotFound {
                name: name.to_string(),
            })?;

        let token = core.objects.track(ObjectKind::Series, name);
        Ok(Series::new(self.core.clone(), name, columns, token))
    }

    /// Handle on a file-level attribute, which need not exist yet.
    pub fn attribute(&self, name: &str) -> FileResult<Attribute> {
        let core = self.core.lock();
        core.store()?;
        let token = core.objects.track(ObjectKind::Attribute, name);
        Ok(Attribute::new(self.core.clone(), name, token))
    }

    /// Series names in declaration order
    pub fn series_names(&self) -> FileResult<Vec<String>> {
        Ok(self.core.lock().store()?.catalog().series_names())
    }

    /// All attributes, sorted by name
    pub fn attributes(&self) -> FileResult<BTreeMap<String, String>> {
        Ok(self.core.lock().store()?.catalog().attributes().clone())
    }

    /// Total rows visible to this handle over all series
    pub fn row_count(&self) -> FileResult<usize> {
        Ok(self.core.lock().store()?.catalog().row_count())
    }

    /// Frames committed to the file, as last written or read
    pub fn committed_frames(&self) -> FileResult<u64> {
        Ok(self.core.lock().store()?.header().frame_count)
    }

    /// Writer: encoded bytes buffered for the next flush
    pub fn unflushed_bytes(&self) -> FileResult<usize> {
        Ok(self.core.lock().store()?.pending_len())
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if let Err(e) = self.core.lock().close() {
            error!("Failed to close {:?}: {}", self.path, e);
        }
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("access", &self.access)
            .field("channel", &self.channel_name)
            .finish()
    }
}
