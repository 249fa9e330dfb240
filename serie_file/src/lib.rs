//! # Serie Files
//!
//! Append-only time-series files with one writer process and any number of
//! reader processes. Readers see the writer's data as of its last flush; to
//! see the latest rows a reader asks the writer to flush over the file's
//! control channel and refreshes once the writer confirms.
//!
//! ## Writer
//!
//! ```rust,no_run
//! use serie_file::{File, FileAccess, FileResult};
//!
//! # fn main() -> FileResult<()> {
//! let file = File::open("run.serie", FileAccess::Write)?;
//! file.reopen_as_swmr()?;
//! let series = file.create_series("temperature", &["time", "value"])?;
//!
//! for i in 0..1000 {
//!     series.append(&[i as f64 * 0.01, 20.0 + i as f64 * 0.001])?;
//!     // Service point: flush only when a reader asked for it
//!     file.flush_if_requested()?;
//! }
//! drop(series);
//! file.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Reader
//!
//! ```rust,no_run
//! use serie_file::{File, FileAccess, FileResult};
//!
//! # fn main() -> FileResult<()> {
//! let file = File::open("run.serie", FileAccess::Read)?;
//! if file.refresh_after_writer_flush()? {
//!     let series = file.series("temperature")?;
//!     println!("{} rows, last {:?}", series.len()?, series.last_row()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Without a running writer every flush-request call returns immediately
//! and reports "not confirmed".

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod error;
pub mod file;
pub mod objects;
pub mod registry;
pub mod series;

mod protocol;
mod store;

pub use access::FileAccess;
pub use error::{FileError, FileResult};
pub use file::File;
pub use objects::{ObjectKind, OpenObject};
pub use registry::FileRegistry;
pub use series::{Attribute, Series};
