//! Append-only record store backing a [`File`](crate::File).
//!
//! The writer buffers encoded frames in memory and makes them visible with
//! [`RecordStore::flush`]. Readers only ever parse up to the header's
//! `committed_end`, so a flush in progress is never observed half done.

pub mod catalog;
pub mod format;

use crate::error::{FileError, FileResult};
use catalog::{Catalog, CatalogError};
use format::{Entry, FormatError, HEADER_LEN, Header, HeaderFlags, decode_frames, encode_frame};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Open record file plus its decoded catalog
pub struct RecordStore {
    path: PathBuf,
    file: fs::File,
    /// Writer lock, held on a duplicate of `file`'s descriptor
    lock: Option<Flock<fs::File>>,
    header: Header,
    catalog: Catalog,
    pending: Vec<u8>,
    pending_frames: u64,
}

impl RecordStore {
    /// Create or truncate `path` for writing and take the writer lock.
    ///
    /// Every call starts a new writer session with its own identifier.
    pub fn create(path: &Path) -> FileResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        // Truncate only once the lock is ours
        let lock = lock_exclusive(&file, path)?;
        file.set_len(0)?;

        let header = Header::empty(HeaderFlags::empty(), new_session_id());
        file.write_all_at(&header.encode(), 0)?;
        file.sync_data()?;
        debug!("Started session {:#018x} on {:?}", header.session, path);

        Ok(Self {
            path: path.to_path_buf(),
            file,
            lock: Some(lock),
            header,
            catalog: Catalog::default(),
            pending: Vec::new(),
            pending_frames: 0,
        })
    }

    /// Open for reading
    pub fn open_read(path: &Path) -> FileResult<Self> {
        let file = fs::File::open(path)?;
        let (header, catalog) = load(&file, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            lock: None,
            header,
            catalog,
            pending: Vec::new(),
            pending_frames: 0,
        })
    }

    /// Committed header as last read or written
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Decoded content. On a writer this includes unflushed entries.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Whether the file carries the SWMR flag
    pub fn is_swmr(&self) -> bool {
        self.header.flags.contains(HeaderFlags::SWMR)
    }

    /// Encoded bytes waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn is_writable(&self) -> bool {
        self.lock.is_some()
    }

    /// Validate and buffer one entry. Nothing reaches the file until
    /// [`flush`](Self::flush).
    pub fn append(&mut self, entry: Entry) -> FileResult<()> {
        if !self.is_writable() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only").into());
        }
        self.catalog
            .check(&entry)
            .map_err(|e| rejected(e, &self.path))?;
        encode_frame(&entry, &mut self.pending)?;
        self.catalog
            .apply(entry)
            .map_err(|e| rejected(e, &self.path))?;
        self.pending_frames += 1;
        Ok(())
    }

    /// Commit buffered frames: write and sync them, then publish the new
    /// header. Returns `false` if nothing was pending.
    pub fn flush(&mut self) -> FileResult<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }

        self.file
            .write_all_at(&self.pending, self.header.committed_end)?;
        self.file.sync_data()?;

        let mut header = self.header;
        header.committed_end += self.pending.len() as u64;
        header.frame_count += self.pending_frames;
        self.file.write_all_at(&header.encode(), 0)?;
        self.file.sync_data()?;

        debug!(
            "Committed {} frames ({} bytes) to {:?}",
            self.pending_frames,
            self.pending.len(),
            self.path
        );
        self.header = header;
        self.pending.clear();
        self.pending_frames = 0;
        Ok(true)
    }

    /// Writer: commit, then re-read the committed content through the
    /// locked descriptor and republish the header with `flags`.
    ///
    /// The writer lock is held throughout. On error the store keeps its
    /// previous state.
    pub fn reopen_with_flags(&mut self, flags: HeaderFlags) -> FileResult<()> {
        if !self.is_writable() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only").into());
        }
        self.flush()?;

        let (mut header, catalog) = load(&self.file, &self.path)?;
        self.file.set_len(header.committed_end)?;
        header.flags = flags;
        self.file.write_all_at(&header.encode(), 0)?;
        self.file.sync_data()?;

        self.header = header;
        self.catalog = catalog;
        Ok(())
    }

    /// Read frames committed since the last refresh, in place.
    ///
    /// A different session identifier, or a header that went backwards,
    /// means a new writer session recreated the file; the store then
    /// reloads from scratch. Returns the number of frames newly applied.
    pub fn refresh(&mut self) -> FileResult<u64> {
        let header = read_header(&self.file, &self.path)?;
        if header.session != self.header.session
            || header.committed_end < self.header.committed_end
            || header.frame_count < self.header.frame_count
        {
            debug!("{:?} was rewritten, reloading", self.path);
            self.reload()?;
            return Ok(self.header.frame_count);
        }

        let applied = header.frame_count - self.header.frame_count;
        if header.committed_end > self.header.committed_end {
            read_frames(
                &self.file,
                &self.path,
                self.header.committed_end,
                header.committed_end,
                &mut self.catalog,
            )?;
        }
        self.header = header;
        Ok(applied)
    }

    /// Close and reopen the file, rebuilding the catalog.
    pub fn reload(&mut self) -> FileResult<()> {
        let file = fs::File::open(&self.path)?;
        let (header, catalog) = load(&file, &self.path)?;
        self.file = file;
        self.header = header;
        self.catalog = catalog;
        Ok(())
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("writable", &self.is_writable())
            .field("header", &self.header)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Identifier for a new writer session: creation time, process and a
/// per-process sequence number mixed together.
fn new_session_id() -> u64 {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    nanos.wrapping_add(seq) ^ u64::from(std::process::id()).rotate_left(40)
}

fn lock_exclusive(file: &fs::File, path: &Path) -> FileResult<Flock<fs::File>> {
    match Flock::lock(file.try_clone()?, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(lock),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(FileError::Locked {
            path: path.to_path_buf(),
        }),
        Err((_, errno)) => Err(io::Error::from(errno).into()),
    }
}

fn load(file: &fs::File, path: &Path) -> FileResult<(Header, Catalog)> {
    let header = read_header(file, path)?;
    let mut catalog = Catalog::default();
    let frames = read_frames(file, path, HEADER_LEN, header.committed_end, &mut catalog)?;
    if frames != header.frame_count {
        return Err(corrupt(
            path,
            format!(
                "header counts {} frames, found {}",
                header.frame_count, frames
            ),
        ));
    }
    Ok((header, catalog))
}

fn read_header(file: &fs::File, path: &Path) -> FileResult<Header> {
    let mut buf = [0u8; HEADER_LEN as usize];
    match file.read_exact_at(&mut buf, 0) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(corrupt(path, "file shorter than header".to_string()));
        }
        Err(e) => return Err(e.into()),
    }
    Header::decode(&buf).map_err(|e| format_corrupt(path, e))
}

fn read_frames(
    file: &fs::File,
    path: &Path,
    from: u64,
    to: u64,
    catalog: &mut Catalog,
) -> FileResult<u64> {
    let len = usize::try_from(to - from)
        .map_err(|_| corrupt(path, format!("committed region of {} bytes", to - from)))?;
    let mut buf = vec![0u8; len];
    match file.read_exact_at(&mut buf, from) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(corrupt(path, format!("committed end {to} past end of file")));
        }
        Err(e) => return Err(e.into()),
    }

    let entries = decode_frames(&buf, from).map_err(|e| format_corrupt(path, e))?;
    let count = entries.len() as u64;
    for entry in entries {
        catalog
            .apply(entry)
            .map_err(|e| corrupt(path, e.to_string()))?;
    }
    Ok(count)
}

fn corrupt(path: &Path, reason: String) -> FileError {
    FileError::Corrupt {
        path: path.to_path_buf(),
        reason,
    }
}

fn format_corrupt(path: &Path, err: FormatError) -> FileError {
    corrupt(path, err.to_string())
}

fn rejected(err: CatalogError, path: &Path) -> FileError {
    match err {
        CatalogError::DuplicateName(name) => FileError::SeriesExists { name },
        CatalogError::UnknownSeries(id) => FileError::SeriesNotFound {
            name: format!("#{id}"),
        },
        CatalogError::Width {
            series,
            expected,
            actual,
        } => FileError::ColumnMismatch {
            series,
            expected,
            actual,
        },
        e @ CatalogError::UnexpectedId { .. } => corrupt(path, e.to_string()),
    }
}
