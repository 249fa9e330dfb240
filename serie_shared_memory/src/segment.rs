//! Control block layout and its process-shared synchronization primitives.
//!
//! A control segment holds exactly one [`ControlBlock`]. The creator zero
//! fills the region, initializes the pthread objects in place, fills in the
//! identity fields and publishes the block by storing [`CONTROL_MAGIC`]
//! last. Attachers refuse blocks whose magic or layout hash differ.

use crate::error::{ShmError, ShmResult};
use crate::platform::to_timespec;
use serie_common::consts::{CONTROL_LAYOUT_VERSION, CONTROL_MAGIC};
use static_assertions::const_assert;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Shared state of one flush control channel.
///
/// `flush_requested` and both counters are only modified while `mutex` is
/// held; they are atomics so that plain `&ControlBlock` access is sound.
#[repr(C)]
pub struct ControlBlock {
    magic: AtomicU64,
    layout_hash: AtomicU32,
    writer_pid: AtomicU32,
    flush_requested: AtomicBool,
    _padding: [u8; 7],
    requests_posted: AtomicU64,
    flushes_served: AtomicU64,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
}

const_assert!(std::mem::size_of::<ControlBlock>() <= 4096);
const_assert!(std::mem::align_of::<ControlBlock>() <= 4096);

/// Size of a control segment in bytes.
pub const CONTROL_BLOCK_SIZE: usize = std::mem::size_of::<ControlBlock>();

/// Layout hash for struct compatibility detection.
///
/// Mixes `size_of`, `align_of` and a manual revision number; if any of them
/// change, reader and writer refuse to connect.
pub const fn layout_hash<T>(revision: u32) -> u32 {
    let size = std::mem::size_of::<T>() as u32;
    let align = std::mem::align_of::<T>() as u32;
    size.wrapping_mul(0x9E3779B9) ^ align.wrapping_mul(0x517CC1B7) ^ revision
}

/// Layout hash stored in every control block built by this crate.
pub const CONTROL_LAYOUT_HASH: u32 = layout_hash::<ControlBlock>(CONTROL_LAYOUT_VERSION);

impl ControlBlock {
    /// Initialize a block in place inside a freshly created, zeroed region.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `CONTROL_BLOCK_SIZE` writable, zeroed bytes that
    /// no other process uses yet, suitably aligned for `ControlBlock`.
    pub unsafe fn init_in_place<'a>(ptr: *mut u8, writer_pid: u32) -> ShmResult<&'a Self> {
        let block = ptr as *mut ControlBlock;

        // SAFETY: caller guarantees the memory is valid and exclusively ours
        unsafe {
            init_shared_mutex((*block).mutex.get())?;
            init_shared_cond((*block).cond.get())?;
        }

        // SAFETY: pointer valid per caller contract; from here on only
        // shared access is used
        let block = unsafe { &*block };
        block.flush_requested.store(false, Ordering::Relaxed);
        block.requests_posted.store(0, Ordering::Relaxed);
        block.flushes_served.store(0, Ordering::Relaxed);
        block.writer_pid.store(writer_pid, Ordering::Relaxed);
        block.layout_hash.store(CONTROL_LAYOUT_HASH, Ordering::Relaxed);
        block.magic.store(CONTROL_MAGIC, Ordering::Release);
        Ok(block)
    }

    /// View an attached region as a control block, validating its identity.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `CONTROL_BLOCK_SIZE` mapped bytes that
    /// outlive `'a`, suitably aligned for `ControlBlock`.
    pub unsafe fn from_ptr<'a>(ptr: *const u8, name: &str) -> ShmResult<&'a Self> {
        // SAFETY: per caller contract; all fields read below are atomics
        let block = unsafe { &*(ptr as *const ControlBlock) };
        block.validate(name)?;
        Ok(block)
    }

    /// Validate magic and layout hash.
    pub fn validate(&self, name: &str) -> ShmResult<()> {
        let magic = self.magic.load(Ordering::Acquire);
        if magic != CONTROL_MAGIC {
            return Err(ShmError::LayoutMismatch {
                name: name.to_string(),
                reason: format!("bad magic {magic:#018x}"),
            });
        }
        let hash = self.layout_hash.load(Ordering::Relaxed);
        if hash != CONTROL_LAYOUT_HASH {
            return Err(ShmError::LayoutMismatch {
                name: name.to_string(),
                reason: format!(
                    "layout hash {hash:#010x}, this build uses {CONTROL_LAYOUT_HASH:#010x}"
                ),
            });
        }
        Ok(())
    }

    /// Process ID of the writer that created the block.
    pub fn writer_pid(&self) -> u32 {
        self.writer_pid.load(Ordering::Relaxed)
    }

    /// Number of requests that raised the flag (coalesced requests excluded).
    pub fn requests_posted(&self) -> u64 {
        self.requests_posted.load(Ordering::Relaxed)
    }

    /// Number of flushes the writer performed in response to a request.
    pub fn flushes_served(&self) -> u64 {
        self.flushes_served.load(Ordering::Relaxed)
    }

    /// Lock the block's mutex.
    ///
    /// On Linux the mutex is robust: if its previous owner died while
    /// holding it, the state is marked consistent and the lock succeeds.
    pub fn lock(&self) -> ShmResult<ControlGuard<'_>> {
        // SAFETY: the mutex was initialized by the creator before the magic
        // was published and lives as long as the mapping
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        match rc {
            0 => {}
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => self.recover_owner_dead(),
            rc => return Err(ShmError::sync("pthread_mutex_lock", rc)),
        }
        Ok(ControlGuard { block: self })
    }

    #[cfg(target_os = "linux")]
    fn recover_owner_dead(&self) {
        tracing::warn!("Previous owner of control mutex died while holding it, recovering");
        // SAFETY: we hold the mutex after EOWNERDEAD, which is the only
        // state in which pthread_mutex_consistent may be called
        unsafe { libc::pthread_mutex_consistent(self.mutex.get()) };
    }
}

/// RAII lock over a [`ControlBlock`]; unlocks on drop.
pub struct ControlGuard<'a> {
    block: &'a ControlBlock,
}

impl ControlGuard<'_> {
    /// Whether a reader has asked for a flush that was not served yet.
    pub fn flush_requested(&self) -> bool {
        self.block.flush_requested.load(Ordering::Relaxed)
    }

    /// Raise the flag. Returns `true` if it was not already raised.
    pub fn raise_flush_request(&mut self) -> bool {
        let was_raised = self.block.flush_requested.swap(true, Ordering::Relaxed);
        if !was_raised {
            self.block.requests_posted.fetch_add(1, Ordering::Relaxed);
        }
        !was_raised
    }

    /// Clear the flag after a served flush and count it.
    pub fn complete_flush(&mut self) {
        self.block.flush_requested.store(false, Ordering::Relaxed);
        self.block.flushes_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Wait on the condition variable until notified or until `deadline`
    /// (absolute, on the wait clock) passes.
    ///
    /// Returns `false` on timeout. Spurious wake-ups return `true`; callers
    /// re-check their predicate.
    pub fn wait_until(&mut self, deadline: Duration) -> ShmResult<bool> {
        let ts = to_timespec(deadline);
        // SAFETY: we hold the mutex this condition variable is paired with
        let rc = unsafe {
            libc::pthread_cond_timedwait(self.block.cond.get(), self.block.mutex.get(), &ts)
        };
        match rc {
            0 => Ok(true),
            libc::ETIMEDOUT => Ok(false),
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                self.block.recover_owner_dead();
                Ok(true)
            }
            rc => Err(ShmError::sync("pthread_cond_timedwait", rc)),
        }
    }

    /// Wake every waiter.
    pub fn notify_all(&self) -> ShmResult<()> {
        // SAFETY: initialized condition variable, mutex held
        let rc = unsafe { libc::pthread_cond_broadcast(self.block.cond.get()) };
        if rc != 0 {
            return Err(ShmError::sync("pthread_cond_broadcast", rc));
        }
        Ok(())
    }
}

impl Drop for ControlGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard exists only while this thread holds the mutex
        unsafe { libc::pthread_mutex_unlock(self.block.mutex.get()) };
    }
}

unsafe fn init_shared_mutex(mutex: *mut libc::pthread_mutex_t) -> ShmResult<()> {
    let mut attr = std::mem::MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    // SAFETY: attr is initialized by pthread_mutexattr_init before any use
    // and destroyed on every path; `mutex` is valid per caller contract
    unsafe {
        check("pthread_mutexattr_init", libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let result = (|| -> ShmResult<()> {
            check(
                "pthread_mutexattr_setpshared",
                libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED),
            )?;
            #[cfg(target_os = "linux")]
            check(
                "pthread_mutexattr_setrobust",
                libc::pthread_mutexattr_setrobust(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST),
            )?;
            check("pthread_mutex_init", libc::pthread_mutex_init(mutex, attr.as_ptr()))
        })();
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        result
    }
}

unsafe fn init_shared_cond(cond: *mut libc::pthread_cond_t) -> ShmResult<()> {
    let mut attr = std::mem::MaybeUninit::<libc::pthread_condattr_t>::uninit();
    // SAFETY: as in init_shared_mutex
    unsafe {
        check("pthread_condattr_init", libc::pthread_condattr_init(attr.as_mut_ptr()))?;
        let result = (|| -> ShmResult<()> {
            check(
                "pthread_condattr_setpshared",
                libc::pthread_condattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED),
            )?;
            #[cfg(target_os = "linux")]
            check(
                "pthread_condattr_setclock",
                libc::pthread_condattr_setclock(attr.as_mut_ptr(), crate::platform::WAIT_CLOCK),
            )?;
            check("pthread_cond_init", libc::pthread_cond_init(cond, attr.as_ptr()))
        })();
        libc::pthread_condattr_destroy(attr.as_mut_ptr());
        result
    }
}

fn check(op: &'static str, rc: i32) -> ShmResult<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(ShmError::sync(op, rc))
    }
}
