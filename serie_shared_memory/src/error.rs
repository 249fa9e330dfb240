//! Error types for shared memory operations

use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment already exists
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Segment name unusable as a POSIX shared memory object name
    #[error("Invalid segment name {name:?}: {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Segment exists but was written by an incompatible build
    #[error("Control block layout mismatch in {name}: {reason}")]
    LayoutMismatch {
        /// Segment name
        name: String,
        /// What did not match
        reason: String,
    },

    /// Process-shared mutex or condition variable call failed
    #[error("{op} failed: {source}")]
    Sync {
        /// pthread function that failed
        op: &'static str,
        /// Returned error code
        source: nix::Error,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

impl ShmError {
    pub(crate) fn sync(op: &'static str, code: i32) -> Self {
        Self::Sync {
            op,
            source: nix::Error::from_raw(code),
        }
    }
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;
