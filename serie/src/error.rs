//! Error type for the command line tool

use serie_common::config::ConfigError;
use serie_file::FileError;
use serie_shared_memory::ShmError;
use thiserror::Error;

/// Errors surfaced by `serie` subcommands
#[derive(Error, Debug)]
pub enum CliError {
    /// File or protocol failure
    #[error(transparent)]
    File(#[from] FileError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Shared memory maintenance failure
    #[error(transparent)]
    Channel(#[from] ShmError),

    /// JSON output failure
    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Signal handler installation failure
    #[error("Cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// Invalid command line value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for subcommands
pub type CliResult<T> = Result<T, CliError>;
