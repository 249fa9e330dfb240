//! File access roles

use serde::Serialize;
use std::fmt;

/// Role a [`File`](crate::File) is opened with. Fixed for the handle's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAccess {
    /// Single writer: creates (truncates) the file and owns its channel
    Write,
    /// Reader: read-only, may ask the writer to flush
    Read,
}

impl FileAccess {
    /// Whether this is the writer role
    pub fn is_writer(self) -> bool {
        self == FileAccess::Write
    }
}

impl fmt::Display for FileAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileAccess::Write => write!(f, "write"),
            FileAccess::Read => write!(f, "read"),
        }
    }
}
