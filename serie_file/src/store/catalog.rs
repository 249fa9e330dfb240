//! In-memory view of the entries read from (or appended to) a record file.

use super::format::Entry;
use std::collections::BTreeMap;

/// One series and its rows
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    /// Series name
    pub name: String,
    /// Column names
    pub columns: Vec<String>,
    /// Rows, each `columns.len()` wide
    pub rows: Vec<Vec<f64>>,
}

/// Why an entry could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Declaration reuses a name
    DuplicateName(String),
    /// Declaration id out of sequence
    UnexpectedId {
        /// Next id the catalog expects
        expected: u32,
        /// Id in the entry
        found: u32,
    },
    /// Row for an undeclared series
    UnknownSeries(u32),
    /// Row width differs from the series
    Width {
        /// Series name
        series: String,
        /// Column count
        expected: usize,
        /// Row length
        actual: usize,
    },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::DuplicateName(name) => write!(f, "series {name} declared twice"),
            CatalogError::UnexpectedId { expected, found } => {
                write!(f, "series id {found} out of sequence, expected {expected}")
            }
            CatalogError::UnknownSeries(id) => write!(f, "row for undeclared series {id}"),
            CatalogError::Width {
                series,
                expected,
                actual,
            } => write!(f, "row of {actual} values for {series} ({expected} columns)"),
        }
    }
}

/// Series and attributes, in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    series: Vec<SeriesData>,
    by_name: BTreeMap<String, u32>,
    attributes: BTreeMap<String, String>,
}

impl Catalog {
    /// Check that `entry` would apply cleanly, without changing anything
    pub fn check(&self, entry: &Entry) -> Result<(), CatalogError> {
        match entry {
            Entry::Series { id, name, .. } => {
                if self.by_name.contains_key(name) {
                    return Err(CatalogError::DuplicateName(name.clone()));
                }
                let expected = self.series.len() as u32;
                if *id != expected {
                    return Err(CatalogError::UnexpectedId {
                        expected,
                        found: *id,
                    });
                }
            }
            Entry::Row { id, values } => {
                let series = self
                    .series
                    .get(*id as usize)
                    .ok_or(CatalogError::UnknownSeries(*id))?;
                if values.len() != series.columns.len() {
                    return Err(CatalogError::Width {
                        series: series.name.clone(),
                        expected: series.columns.len(),
                        actual: values.len(),
                    });
                }
            }
            Entry::Attribute { .. } => {}
        }
        Ok(())
    }

    /// Apply one entry
    pub fn apply(&mut self, entry: Entry) -> Result<(), CatalogError> {
        self.check(&entry)?;
        match entry {
            Entry::Series { id, name, columns } => {
                self.by_name.insert(name.clone(), id);
                self.series.push(SeriesData {
                    name,
                    columns,
                    rows: Vec::new(),
                });
            }
            Entry::Row { id, values } => {
                if let Some(series) = self.series.get_mut(id as usize) {
                    series.rows.push(values);
                }
            }
            Entry::Attribute { name, value } => {
                self.attributes.insert(name, value);
            }
        }
        Ok(())
    }

    /// Id for the next series declaration
    pub fn next_series_id(&self) -> u32 {
        self.series.len() as u32
    }

    /// Series id by name
    pub fn series_id(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Series by id
    pub fn series(&self, id: u32) -> Option<&SeriesData> {
        self.series.get(id as usize)
    }

    /// Series names in declaration order
    pub fn series_names(&self) -> Vec<String> {
        self.series.iter().map(|s| s.name.clone()).collect()
    }

    /// Attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// All attributes, sorted by name
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Total rows over all series
    pub fn row_count(&self) -> usize {
        self.series.iter().map(|s| s.rows.len()).sum()
    }
}
