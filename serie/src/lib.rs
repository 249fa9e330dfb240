//! # serie command line tool
//!
//! Subcommands, each usable as a library function:
//!
//! - [`write`]: a writer that appends synthetic samples and serves reader
//!   flush requests
//! - [`follow`]: a reader that periodically asks writers to flush and
//!   refreshes
//! - [`info`]: a one-shot file summary, as text or JSON
//!
//! Orphaned control channels are removed with
//! [`serie_shared_memory::cleanup_orphaned_channels`].

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod follow;
pub mod info;
pub mod write;

pub use config::AppConfig;
pub use error::{CliError, CliResult};
