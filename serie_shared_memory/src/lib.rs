//! # Serie Flush Control Channels
//!
//! Cross-process coordination between one writer of a data file and any
//! number of readers of the same file. A reader that wants to see the
//! freshest data asks the writer to flush; the writer notices the request at
//! its next service point, flushes, and wakes every reader that is waiting.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────────┐    ┌─────────────────┐
//! │   Writer        │    │  Named segment       │    │   Reader 1      │
//! │                 │    │  serie_<fnv1a(path)> │    │                 │
//! │ ControlChannel  ├───►│                      │◄───┤ ControlChannel  │
//! │  ::create       │    │ magic | layout hash  │    │  ::attach       │
//! │  serve_flush    │    │ writer pid | flag    │    │  request_flush  │
//! └─────────────────┘    │ pshared mutex + cond │    │  wait_for_flush │
//!         │              └──────────────────────┘    └─────────────────┘
//!         ▼
//! ┌─────────────────┐
//! │ Exit cleanup    │  removes tracked segments at process exit
//! └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serie_shared_memory::{ControlChannel, ShmResult};
//! use std::time::Duration;
//!
//! # fn main() -> ShmResult<()> {
//! // Writer
//! let writer = ControlChannel::create("serie_42")?;
//!
//! // Reader, possibly in another process
//! let mut reader = ControlChannel::attach("serie_42")?;
//! reader.request_flush()?;
//!
//! // Writer service point
//! writer.serve_flush(|| -> ShmResult<()> {
//!     // write buffered data to storage
//!     Ok(())
//! })?;
//!
//! let outcome = reader.wait_for_flush(Duration::from_millis(40))?;
//! assert!(outcome.is_confirmed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust,no_run
//! use serie_shared_memory::{ControlChannel, ShmError};
//!
//! match ControlChannel::attach("serie_7") {
//!     Ok(_channel) => { /* flush requests enabled */ }
//!     Err(ShmError::NotFound { name }) => {
//!         eprintln!("No writer is running for {}", name);
//!     }
//!     Err(e) => eprintln!("Unexpected error: {}", e),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! - **ControlChannel**: `Send`; request state is per handle, so each
//!   thread that requests flushes uses its own handle or a lock
//! - **Exit cleanup**: global tracker behind a mutex
//!
//! ## Platform Support
//!
//! POSIX shared memory on unix targets. Linux additionally gets robust
//! mutexes and monotonic-clock condition waits.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod platform;
pub mod segment;

pub use channel::{ControlChannel, RequestState, WaitOutcome};
pub use error::{ShmError, ShmResult};
pub use lifecycle::{ExitCleanup, cleanup_orphaned_channels, run_exit_cleanup};
pub use naming::{channel_name, channel_name_for_canonical, is_channel_name};
pub use platform::{get_current_pid, is_process_alive, wait_clock_now};
pub use segment::{CONTROL_BLOCK_SIZE, ControlBlock};

/// Initialize tracing for tests and small tools
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
