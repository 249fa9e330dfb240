//! POSIX shared memory backend (`shm_open` + `mmap`)

use super::SharedRegion;
use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::getpid;
use std::fs::File;

/// Directory where Linux exposes POSIX shared memory objects.
pub const SHM_DIR: &str = "/dev/shm";

/// Longest object name accepted, excluding the leading slash.
const NAME_MAX: usize = 250;

/// Shared region backed by a POSIX shared memory object.
pub struct PosixRegion {
    mmap: MmapMut,
}

impl PosixRegion {
    fn object_name(name: &str) -> ShmResult<String> {
        if name.is_empty() {
            return Err(ShmError::InvalidName {
                name: name.to_string(),
                reason: "empty name",
            });
        }
        if name.contains('/') {
            return Err(ShmError::InvalidName {
                name: name.to_string(),
                reason: "name cannot contain '/'",
            });
        }
        if name.len() > NAME_MAX {
            return Err(ShmError::InvalidName {
                name: name.to_string(),
                reason: "name too long",
            });
        }
        Ok(format!("/{name}"))
    }

    fn map(file: &File, size: usize) -> ShmResult<MmapMut> {
        // SAFETY: the object is only ever resized by its creator before the
        // mapping is published, so the mapped length stays valid.
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(file)? };
        Ok(mmap)
    }
}

impl SharedRegion for PosixRegion {
    fn create(name: &str, size: usize) -> ShmResult<Self> {
        let object = Self::object_name(name)?;

        let fd = shm_open(
            object.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR, // Owner read/write only
        )
        .map_err(|e| match e {
            Errno::EEXIST => ShmError::AlreadyExists {
                name: name.to_string(),
            },
            e => ShmError::Nix { source: e },
        })?;

        let file = File::from(fd);
        // ftruncate zero-fills the new object
        file.set_len(size as u64)?;

        let mmap = Self::map(&file, size)?;
        Ok(Self { mmap })
    }

    fn open(name: &str, size: usize) -> ShmResult<Self> {
        let object = Self::object_name(name)?;

        let fd = shm_open(object.as_str(), OFlag::O_RDWR, Mode::empty()).map_err(|e| match e {
            Errno::ENOENT => ShmError::NotFound {
                name: name.to_string(),
            },
            e => ShmError::Nix { source: e },
        })?;

        let file = File::from(fd);
        let actual = file.metadata()?.len();
        if actual < size as u64 {
            return Err(ShmError::LayoutMismatch {
                name: name.to_string(),
                reason: format!("segment is {actual} bytes, expected at least {size}"),
            });
        }

        let mmap = Self::map(&file, size)?;
        Ok(Self { mmap })
    }

    fn remove(name: &str) -> ShmResult<bool> {
        let object = Self::object_name(name)?;
        match shm_unlink(object.as_str()) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(ShmError::Nix { source: e }),
        }
    }

    fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.mmap.len()
    }
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // 0 and values above i32::MAX would address process groups
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    // A null signal tests for existence without delivering anything
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(Errno::ESRCH) => false, // No such process
        Err(Errno::EPERM) => true,  // Process exists but no permission to signal
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}
