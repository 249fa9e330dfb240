//! Error types for file handle operations

use crate::access::FileAccess;
use crate::objects::OpenObject;
use serie_common::config::ConfigError;
use serie_shared_memory::ShmError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur on a [`File`](crate::File) or its child objects
#[derive(Error, Debug)]
pub enum FileError {
    /// Operation not permitted for the handle's role
    #[error("{operation} is not allowed on {path:?}, opened for {access}")]
    RoleMismatch {
        /// File path
        path: PathBuf,
        /// Rejected operation
        operation: &'static str,
        /// Role the file was opened with
        access: FileAccess,
    },

    /// Child objects still open at close
    #[error("Cannot close {path:?}, still open: {}", describe_objects(.objects))]
    OpenObjects {
        /// File path
        path: PathBuf,
        /// Kind and name of every open child
        objects: Vec<OpenObject>,
    },

    /// Handle already closed
    #[error("File {path:?} is closed")]
    Closed {
        /// File path
        path: PathBuf,
    },

    /// Another writer holds the file
    #[error("File {path:?} is locked by another writer")]
    Locked {
        /// File path
        path: PathBuf,
    },

    /// Storage content cannot be decoded
    #[error("Corrupt record file {path:?}: {reason}")]
    Corrupt {
        /// File path
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// No series with this name
    #[error("Series not found: {name}")]
    SeriesNotFound {
        /// Series name
        name: String,
    },

    /// Series name already taken
    #[error("Series already exists: {name}")]
    SeriesExists {
        /// Series name
        name: String,
    },

    /// Row width does not match the series columns
    #[error("Series {series} has {expected} columns, row has {actual}")]
    ColumnMismatch {
        /// Series name
        series: String,
        /// Column count of the series
        expected: usize,
        /// Values in the rejected row
        actual: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Control channel error
    #[error("Control channel error: {0}")]
    Channel(#[from] ShmError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn describe_objects(objects: &[OpenObject]) -> String {
    objects
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for file operations
pub type FileResult<T> = Result<T, FileError>;
