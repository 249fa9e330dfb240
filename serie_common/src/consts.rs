//! Workspace-wide constants.
//!
//! These are the single source of truth for values that must agree between
//! a writer process and its reader processes. Changing any of them makes
//! processes built from different revisions refuse to talk to each other.

/// Prefix of every flush control channel name (`serie_<hash>`).
pub const SHM_NAME_PREFIX: &str = "serie";

/// Magic number at offset 0 of every control block: `"SERIECTL"`.
pub const CONTROL_MAGIC: u64 = u64::from_le_bytes(*b"SERIECTL");

/// Control block layout revision, mixed into the layout hash.
pub const CONTROL_LAYOUT_VERSION: u32 = 1;

/// Default time a reader waits for a writer flush, in milliseconds (1/25 s).
pub const DEFAULT_REFRESH_WAIT_MS: u64 = 1000 / 25;

/// Default period at which a writer serves pending flush requests.
pub const DEFAULT_SERVE_INTERVAL_MS: u64 = 20;

/// Environment variable overriding the refresh wait time (integer ms).
pub const REFRESH_WAIT_ENV: &str = "SERIE_REFRESHWAITTIME";

/// Upper bound of a single condition-variable wait slice, in milliseconds.
///
/// Waits are cut into slices no longer than this and the deadline is
/// re-checked against the clock after each one.
pub const WAIT_POLL_SLICE_MS: u64 = 10;
