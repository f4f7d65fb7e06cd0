//! SQLite-backed recorder for benchmark runs.
//!
//! A [`Database`] owns the store file. Each run is an [`Execution`] created
//! through an [`ExecutionBuilder`]; it carries string parameters and any
//! number of outcome rows written through [`OutcomeBuilder`]s into tables
//! whose columns follow the keys the caller supplies.

pub mod config;
pub mod database;
pub mod error;
pub mod execution;
pub mod logging;
pub mod outcome;
pub mod profiler;
pub mod schema;
pub mod value;

#[cfg(test)]
mod test_support;

pub use config::{
    config_schema_json, load_config, parse_config, JournalMode, StoreConfig, Synchronous,
};
pub use database::Database;
pub use error::{Result, StoreError};
pub use execution::{Execution, ExecutionBuilder};
pub use outcome::OutcomeBuilder;
pub use profiler::{ElapsedProfiler, ElapsedSnapshot, Profiler};
pub use runlog_common::{Quantity, Timer};
pub use value::{Field, FieldType, Record, Value};
