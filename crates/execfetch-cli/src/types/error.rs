//! Error types for the command-line front end.

use std::path::PathBuf;

use execfetch::ExecError;

/// All errors that can occur while running a command.
#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Failed to read config '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config '{}': {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No sources configured")]
    NoSources,

    #[error("Source {index} ({label}): {source}")]
    Source {
        index: usize,
        label: String,
        #[source]
        source: ExecError,
    },

    #[error("Merge into '{}' failed: {source}", path.display())]
    Merge {
        path: PathBuf,
        #[source]
        source: ExecError,
    },
}

pub type CliResult<T> = Result<T, CliError>;
