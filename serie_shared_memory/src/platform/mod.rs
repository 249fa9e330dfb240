//! Platform layer: named shared regions, process liveness and the wait clock.
//!
//! Everything above this module is platform independent. A backend provides
//! a [`SharedRegion`] implementation plus the process helpers; the POSIX
//! backend (`shm_open` + `mmap`) is the one compiled on unix targets.

use crate::error::ShmResult;
use std::time::Duration;

#[cfg(unix)]
mod posix;

#[cfg(unix)]
pub use posix::{
    PosixRegion as PlatformRegion, SHM_DIR, get_current_pid, is_process_alive,
};

/// A named, fixed-size, read/write memory region shared between processes.
pub trait SharedRegion: Sized + Send {
    /// Create a new, zero-filled region. Fails if the name already exists.
    fn create(name: &str, size: usize) -> ShmResult<Self>;

    /// Map an existing region of at least `size` bytes.
    fn open(name: &str, size: usize) -> ShmResult<Self>;

    /// Remove `name` from the OS namespace. Returns `false` if it was absent.
    ///
    /// Existing mappings stay valid until they are dropped.
    fn remove(name: &str) -> ShmResult<bool>;

    /// Base address of the mapping.
    fn as_ptr(&self) -> *const u8;

    /// Mutable base address of the mapping.
    fn as_mut_ptr(&mut self) -> *mut u8;

    /// Mapped length in bytes.
    fn len(&self) -> usize;
}

/// Clock the process-shared condition variable measures deadlines against.
#[cfg(target_os = "linux")]
pub const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Clock the process-shared condition variable measures deadlines against.
#[cfg(all(unix, not(target_os = "linux")))]
pub const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

/// Current time on [`WAIT_CLOCK`].
///
/// On Linux this is the system-wide monotonic clock, so values taken in
/// different processes are comparable.
pub fn wait_clock_now() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec and WAIT_CLOCK is a clock
    // id supported on this platform; clock_gettime cannot fail otherwise.
    unsafe { libc::clock_gettime(WAIT_CLOCK, &mut ts) };
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Convert a [`WAIT_CLOCK`] instant into an absolute `timespec`.
pub(crate) fn to_timespec(instant: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: instant.as_secs() as libc::time_t,
        tv_nsec: instant.subsec_nanos() as libc::c_long,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_clock_is_monotonic() {
        let a = wait_clock_now();
        let b = wait_clock_now();
        assert!(b >= a);
    }

    #[test]
    fn test_timespec_conversion() {
        let ts = to_timespec(Duration::new(12, 345));
        assert_eq!(ts.tv_sec, 12);
        assert_eq!(ts.tv_nsec, 345);
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(get_current_pid()));
    }
}
