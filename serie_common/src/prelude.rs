//! Prelude module for common re-exports.
//!
//! ```rust
//! use serie_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, FlushConfig, SharedConfig};

// ─── Protocol Constants ─────────────────────────────────────────────
pub use crate::consts::{DEFAULT_REFRESH_WAIT_MS, REFRESH_WAIT_ENV, SHM_NAME_PREFIX};
