//! Tracking of child objects opened on a file.
//!
//! Every [`Series`](crate::Series) and [`Attribute`](crate::Attribute) handle
//! holds an [`ObjectToken`]; the token leaves the table when the handle is
//! dropped. Closing a file with tokens still in the table fails and names
//! each one.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Kind of child object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Series handle
    Series,
    /// Attribute handle
    Attribute,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Series => write!(f, "series"),
            ObjectKind::Attribute => write!(f, "attribute"),
        }
    }
}

/// A child object that is still open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenObject {
    /// Object kind
    pub kind: ObjectKind,
    /// Object name
    pub name: String,
}

impl fmt::Display for OpenObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

#[derive(Debug, Default)]
struct Table {
    next_id: u64,
    open: BTreeMap<u64, OpenObject>,
}

/// Open child objects of one file
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectTable {
    inner: Arc<Mutex<Table>>,
}

impl ObjectTable {
    pub(crate) fn track(&self, kind: ObjectKind, name: &str) -> ObjectToken {
        let mut table = self.inner.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.open.insert(
            id,
            OpenObject {
                kind,
                name: name.to_string(),
            },
        );
        ObjectToken {
            table: self.inner.clone(),
            id,
        }
    }

    pub(crate) fn open_objects(&self) -> Vec<OpenObject> {
        self.inner.lock().open.values().cloned().collect()
    }
}

/// Registration of one open child; removed on drop
#[derive(Debug)]
pub(crate) struct ObjectToken {
    table: Arc<Mutex<Table>>,
    id: u64,
}

impl Drop for ObjectToken {
    fn drop(&mut self) {
        self.table.lock().open.remove(&self.id);
    }
}
