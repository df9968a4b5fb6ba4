//! execfetch command-line front end: single-source dumps, batch runs,
//! merging and file inspection.

pub mod batch;
pub mod config;
pub mod inspect;
pub mod types;

pub use batch::{fetch_single, fetch_source, BatchRunner, DEFAULT_OUTPUT_FILE};
pub use config::{resolve_config_path, BatchConfig};
pub use types::{BatchReport, CliError, CliResult, SourceOutcome, SourceReport};
