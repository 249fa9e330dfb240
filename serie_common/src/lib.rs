//! Serie Common Library
//!
//! Shared constants and configuration loading for all serie workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Channel naming, layout and timing constants
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use serie_common::consts::DEFAULT_REFRESH_WAIT_MS;
//! use serie_common::config::{ConfigLoader, FlushConfig};
//!
//! assert_eq!(FlushConfig::default().refresh_wait_ms, DEFAULT_REFRESH_WAIT_MS);
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
