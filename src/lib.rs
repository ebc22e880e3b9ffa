//! Flattens hierarchical query results into fixed-column grid rows.
//!
//! Rows arrive as nested XML or JSON records with child datasets. A schema is
//! flattened once into grid columns, then each row is formatted against those
//! columns so that child rows stack inside their parent row's cells.

pub mod cell;
pub mod config;
pub mod dataset;
pub mod error;
pub mod formatter;
pub mod history;
pub mod kv;
pub mod log;
pub mod render;
pub mod schema;
pub mod store;
pub mod xml;

pub use cell::CellValue;
pub use config::{load_settings, Settings};
pub use error::{Error, Result};
pub use formatter::{format_rows, format_rows_par, FormattedRow, FormattedValue, RowFormatter};
pub use history::{HistoryLocation, HistoryStore, NavigationAction, NavigationEvent, NavigationTarget};
pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};
pub use schema::{flatten, FlattenedColumn, SchemaNode};
pub use store::{ResultFetcher, ResultPage, ResultRequest, ResultSource, ResultStore, SchemaCache};
