//! Child object handles: series and attributes.
//!
//! Both look their data up by name on every call, so they stay valid across
//! a writer's SWMR reopen and a reader's full reload.

use crate::access::FileAccess;
use crate::error::{FileError, FileResult};
use crate::file::FileCore;
use crate::objects::ObjectToken;
use crate::store::format::Entry;
use crate::store::catalog::SeriesData;
use parking_lot::Mutex;
use std::sync::Arc;

/// Named series of fixed-width `f64` rows.
///
/// Keeps its file from closing until dropped.
pub struct Series {
    core: Arc<Mutex<FileCore>>,
    name: String,
    columns: Vec<String>,
    _token: ObjectToken,
}

impl Series {
    pub(crate) fn new(
        core: Arc<Mutex<FileCore>>,
        name: &str,
        columns: Vec<String>,
        token: ObjectToken,
    ) -> Self {
        Self {
            core,
            name: name.to_string(),
            columns,
            _token: token,
        }
    }

    /// Series name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn with_data<T>(&self, f: impl FnOnce(&SeriesData) -> T) -> FileResult<T> {
        let core = self.core.lock();
        let catalog = core.store()?.catalog();
        catalog
            .series_id(&self.name)
            .and_then(|id| catalog.series(id))
            .map(f)
            .ok_or_else(|| FileError::SeriesNotFound {
                name: self.name.clone(),
            })
    }

    /// Writer only: buffer one row. Visible to readers after the next flush.
    pub fn append(&self, values: &[f64]) -> FileResult<()> {
        let mut core = self.core.lock();
        core.require(FileAccess::Write, "append")?;
        let store = core.store_mut()?;
        let id = store
            .catalog()
            .series_id(&self.name)
            .ok_or_else(|| FileError::SeriesNotFound {
                name: self.name.clone(),
            })?;
        store.append(Entry::Row {
            id,
            values: values.to_vec(),
        })
    }

    /// Rows visible to this handle
    pub fn len(&self) -> FileResult<usize> {
        self.with_data(|data| data.rows.len())
    }

    /// Whether no rows are visible
    pub fn is_empty(&self) -> FileResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of all visible rows
    pub fn rows(&self) -> FileResult<Vec<Vec<f64>>> {
        self.with_data(|data| data.rows.clone())
    }

    /// Most recent visible row
    pub fn last_row(&self) -> FileResult<Option<Vec<f64>>> {
        self.with_data(|data| data.rows.last().cloned())
    }
}

impl std::fmt::Debug for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Series")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .finish()
    }
}

/// File-level string attribute.
///
/// Keeps its file from closing until dropped.
pub struct Attribute {
    core: Arc<Mutex<FileCore>>,
    name: String,
    _token: ObjectToken,
}

impl Attribute {
    pub(crate) fn new(core: Arc<Mutex<FileCore>>, name: &str, token: ObjectToken) -> Self {
        Self {
            core,
            name: name.to_string(),
            _token: token,
        }
    }

    /// Attribute name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writer only: set the value; the latest write wins.
    pub fn write(&self, value: &str) -> FileResult<()> {
        let mut core = self.core.lock();
        core.require(FileAccess::Write, "write attribute")?;
        core.store_mut()?.append(Entry::Attribute {
            name: self.name.clone(),
            value: value.to_string(),
        })
    }

    /// Current value, `None` if never written
    pub fn read(&self) -> FileResult<Option<String>> {
        let core = self.core.lock();
        Ok(core.store()?.catalog().attribute(&self.name).map(str::to_string))
    }
}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attribute").field("name", &self.name).finish()
    }
}
