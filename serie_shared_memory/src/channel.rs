//! Flush control channel: the request/serve/wait rendezvous between one
//! writer process and any number of reader processes.
//!
//! ```text
//!   reader                         control block                    writer
//!   ──────                         ─────────────                    ──────
//!   request_flush() ── lock ──►  flush_requested = true
//!   wait_for_flush() ─ lock ──►  cond wait (absolute deadline)
//!                                                      ◄── lock ── serve_flush()
//!                                                                   flush storage
//!                                flush_requested = false ◄── lock ──
//!                                notify_all ──────────────────────►
//!   wakes, flag clear → Confirmed
//! ```
//!
//! The deadline is the request time plus the wait interval, so time spent
//! between posting a request and starting to wait counts against it.

use crate::error::{ShmError, ShmResult};
use crate::lifecycle::{register_channel, unregister_channel};
use crate::platform::{
    PlatformRegion, SharedRegion, get_current_pid, is_process_alive, wait_clock_now,
};
use crate::segment::{CONTROL_BLOCK_SIZE, ControlBlock};
use serie_common::consts::WAIT_POLL_SLICE_MS;
use std::time::Duration;
use tracing::{debug, warn};

/// Reader-side state of the most recent flush request on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// No request outstanding.
    Idle,
    /// Request posted at `at` (wait clock), not yet resolved.
    Requested {
        /// Time the request was posted.
        at: Duration,
    },
    /// The writer served the request.
    Confirmed {
        /// Time from request to confirmation.
        after: Duration,
    },
    /// The deadline passed first, or the writer is gone.
    TimedOut,
}

/// Result of waiting for a writer flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The flag was observed cleared.
    Confirmed {
        /// Time from request to confirmation.
        after: Duration,
    },
    /// The deadline passed with the flag still raised.
    TimedOut {
        /// Configured wait interval.
        waited: Duration,
    },
    /// This handle had no outstanding request.
    NotRequested,
    /// The writer process that owns the channel no longer exists.
    WriterGone {
        /// PID recorded in the control block.
        pid: u32,
    },
}

impl WaitOutcome {
    /// Whether the writer confirmed a flush.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, WaitOutcome::Confirmed { .. })
    }
}

/// One process's handle on a named flush control channel.
pub struct ControlChannel {
    name: String,
    region: PlatformRegion,
    owner: bool,
    state: RequestState,
}

impl ControlChannel {
    /// Create the channel as its writer.
    ///
    /// A stale segment with the same name, left by a writer that did not
    /// shut down cleanly, is removed first.
    pub fn create(name: &str) -> ShmResult<Self> {
        if PlatformRegion::remove(name)? {
            debug!("Removed stale control channel {}", name);
        }

        let mut region = match PlatformRegion::create(name, CONTROL_BLOCK_SIZE) {
            Ok(region) => region,
            // Lost a race against another writer's stale cleanup; retry once
            Err(ShmError::AlreadyExists { .. }) => {
                PlatformRegion::remove(name)?;
                PlatformRegion::create(name, CONTROL_BLOCK_SIZE)?
            }
            Err(e) => return Err(e),
        };

        // SAFETY: the region was just created: zero-filled, page aligned,
        // CONTROL_BLOCK_SIZE bytes, and unpublished until magic is stored
        unsafe { ControlBlock::init_in_place(region.as_mut_ptr(), get_current_pid())? };

        register_channel(name);
        debug!("Created control channel {}", name);

        Ok(Self {
            name: name.to_string(),
            region,
            owner: true,
            state: RequestState::Idle,
        })
    }

    /// Attach to an existing channel as a reader.
    pub fn attach(name: &str) -> ShmResult<Self> {
        let region = PlatformRegion::open(name, CONTROL_BLOCK_SIZE)?;
        // SAFETY: mapped for CONTROL_BLOCK_SIZE bytes, page aligned
        unsafe { ControlBlock::from_ptr(region.as_ptr(), name)? };

        Ok(Self {
            name: name.to_string(),
            region,
            owner: false,
            state: RequestState::Idle,
        })
    }

    /// Attach if a writer has published the channel; `None` otherwise.
    ///
    /// A missing channel is the normal case when no writer runs. Any other
    /// failure, including a layout from an incompatible build, is logged.
    pub fn try_attach(name: &str) -> Option<Self> {
        match Self::attach(name) {
            Ok(channel) => Some(channel),
            Err(ShmError::NotFound { .. }) => {
                debug!("No writer channel {}, flush requests disabled", name);
                None
            }
            Err(e) => {
                warn!("Cannot attach to writer channel {}: {}", name, e);
                None
            }
        }
    }

    fn block(&self) -> &ControlBlock {
        // SAFETY: validated (or initialized) when the channel was built; the
        // mapping lives as long as self
        unsafe { &*(self.region.as_ptr() as *const ControlBlock) }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the channel
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// PID of the writer that owns the channel
    pub fn writer_pid(&self) -> u32 {
        self.block().writer_pid()
    }

    /// State of this handle's latest request
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Requests that raised the shared flag, over all readers
    pub fn requests_posted(&self) -> u64 {
        self.block().requests_posted()
    }

    /// Flushes served by the writer
    pub fn flushes_served(&self) -> u64 {
        self.block().flushes_served()
    }

    /// Read the shared flag under the mutex.
    pub fn is_flush_requested(&self) -> ShmResult<bool> {
        Ok(self.block().lock()?.flush_requested())
    }

    /// Ask the writer to flush.
    ///
    /// Raising an already raised flag has no further effect. If this
    /// handle's own request is still pending, its original timestamp is
    /// kept. Returns `true` if this call raised the flag.
    pub fn request_flush(&mut self) -> ShmResult<bool> {
        let now = wait_clock_now();
        let raised = self.block().lock()?.raise_flush_request();
        if raised || !matches!(self.state, RequestState::Requested { .. }) {
            self.state = RequestState::Requested { at: now };
        }
        Ok(raised)
    }

    /// Writer side: if a flush was requested, run `flush`, clear the flag
    /// and wake every waiting reader.
    ///
    /// Returns `true` if a request was served. If `flush` fails the flag
    /// stays raised and readers time out.
    pub fn serve_flush<F, E>(&self, flush: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<ShmError>,
    {
        let requested = self.block().lock()?.flush_requested();
        if !requested {
            return Ok(false);
        }

        flush()?;

        let mut guard = self.block().lock()?;
        guard.complete_flush();
        guard.notify_all()?;
        Ok(true)
    }

    /// Reader side: block until the writer serves the outstanding request
    /// or until request time + `wait` passes.
    pub fn wait_for_flush(&mut self, wait: Duration) -> ShmResult<WaitOutcome> {
        let RequestState::Requested { at } = self.state else {
            return Ok(WaitOutcome::NotRequested);
        };

        let pid = self.writer_pid();
        if !is_process_alive(pid) {
            self.state = RequestState::TimedOut;
            return Ok(WaitOutcome::WriterGone { pid });
        }

        let deadline = at + wait;
        let slice = Duration::from_millis(WAIT_POLL_SLICE_MS);
        let mut writer_gone = false;

        let confirmed = {
            let mut guard = self.block().lock()?;
            loop {
                if !guard.flush_requested() {
                    break true;
                }
                let now = wait_clock_now();
                if now >= deadline {
                    break false;
                }
                let woke = guard.wait_until(deadline.min(now + slice))?;
                if !woke && !is_process_alive(pid) {
                    writer_gone = true;
                    break !guard.flush_requested();
                }
            }
        };

        let outcome = if confirmed {
            let after = wait_clock_now().saturating_sub(at);
            self.state = RequestState::Confirmed { after };
            WaitOutcome::Confirmed { after }
        } else {
            self.state = RequestState::TimedOut;
            if writer_gone {
                WaitOutcome::WriterGone { pid }
            } else {
                WaitOutcome::TimedOut { waited: wait }
            }
        };
        Ok(outcome)
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        match PlatformRegion::remove(&self.name) {
            Ok(_) => debug!("Removed control channel {}", self.name),
            Err(e) => warn!("Failed to remove control channel {}: {}", self.name, e),
        }
        unregister_channel(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tracked_channels;

    fn unique_name(tag: &str) -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        static SEQ: AtomicU32 = AtomicU32::new(0);
        format!(
            "serie_chan_{tag}_{}_{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_create_registers_and_drop_removes() {
        let name = unique_name("life");
        let writer = ControlChannel::create(&name).unwrap();
        assert!(writer.is_owner());
        assert_eq!(writer.writer_pid(), std::process::id());
        assert!(tracked_channels().contains(&name));

        drop(writer);
        assert!(!tracked_channels().contains(&name));
        assert!(ControlChannel::try_attach(&name).is_none());
    }

    #[test]
    fn test_create_replaces_stale_segment() {
        let name = unique_name("stale");
        let stale = PlatformRegion::create(&name, CONTROL_BLOCK_SIZE).unwrap();
        drop(stale);

        let writer = ControlChannel::create(&name).unwrap();
        let reader = ControlChannel::attach(&name).unwrap();
        assert!(!reader.is_owner());
        drop(reader);
        drop(writer);
    }

    #[test]
    fn test_attach_rejects_uninitialized_segment() {
        let name = unique_name("garbage");
        let _raw = PlatformRegion::create(&name, CONTROL_BLOCK_SIZE).unwrap();
        let result = ControlChannel::attach(&name);
        assert!(matches!(result, Err(ShmError::LayoutMismatch { .. })));
        assert!(ControlChannel::try_attach(&name).is_none());
        PlatformRegion::remove(&name).unwrap();
    }

    #[test]
    fn test_request_is_idempotent() {
        let name = unique_name("idem");
        let writer = ControlChannel::create(&name).unwrap();
        let mut reader = ControlChannel::attach(&name).unwrap();

        assert!(reader.request_flush().unwrap());
        let first = reader.state();
        assert!(!reader.request_flush().unwrap());
        assert_eq!(reader.state(), first);
        assert_eq!(writer.requests_posted(), 1);
        assert!(writer.is_flush_requested().unwrap());

        let mut flushes = 0;
        assert!(writer.serve_flush(|| -> ShmResult<()> {
            flushes += 1;
            Ok(())
        })
        .unwrap());
        assert!(!writer.serve_flush(|| -> ShmResult<()> {
            flushes += 1;
            Ok(())
        })
        .unwrap());
        assert_eq!(flushes, 1);
        assert_eq!(writer.flushes_served(), 1);
    }

    #[test]
    fn test_wait_without_request() {
        let name = unique_name("noreq");
        let _writer = ControlChannel::create(&name).unwrap();
        let mut reader = ControlChannel::attach(&name).unwrap();
        assert_eq!(
            reader.wait_for_flush(Duration::from_millis(50)).unwrap(),
            WaitOutcome::NotRequested
        );
    }

    #[test]
    fn test_served_before_wait_confirms() {
        let name = unique_name("early");
        let writer = ControlChannel::create(&name).unwrap();
        let mut reader = ControlChannel::attach(&name).unwrap();

        reader.request_flush().unwrap();
        writer.serve_flush(|| -> ShmResult<()> { Ok(()) }).unwrap();

        let outcome = reader.wait_for_flush(Duration::from_millis(50)).unwrap();
        assert!(outcome.is_confirmed());
        assert!(matches!(reader.state(), RequestState::Confirmed { .. }));
    }

    #[test]
    fn test_unserved_request_times_out() {
        let name = unique_name("timeout");
        let _writer = ControlChannel::create(&name).unwrap();
        let mut reader = ControlChannel::attach(&name).unwrap();

        reader.request_flush().unwrap();
        let start = wait_clock_now();
        let outcome = reader.wait_for_flush(Duration::from_millis(30)).unwrap();
        let elapsed = wait_clock_now() - start;

        assert_eq!(
            outcome,
            WaitOutcome::TimedOut {
                waited: Duration::from_millis(30)
            }
        );
        assert_eq!(reader.state(), RequestState::TimedOut);
        assert!(elapsed < Duration::from_millis(30) + Duration::from_millis(200));
    }

    #[test]
    fn test_failed_flush_keeps_flag() {
        let name = unique_name("fail");
        let writer = ControlChannel::create(&name).unwrap();
        let mut reader = ControlChannel::attach(&name).unwrap();
        reader.request_flush().unwrap();

        let result = writer.serve_flush(|| -> ShmResult<()> {
            Err(ShmError::NotFound {
                name: "disk".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(writer.is_flush_requested().unwrap());
        assert_eq!(writer.flushes_served(), 0);
    }
}
