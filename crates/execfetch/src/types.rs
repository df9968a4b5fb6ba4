//! Core data types for coverage sessions, execution records, and errors.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metadata describing one capture on a remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub start: i64,
    /// Milliseconds since the Unix epoch.
    pub dump: i64,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, start: i64, dump: i64) -> Self {
        Self {
            id: id.into(),
            start,
            dump,
        }
    }
}

/// Per-class coverage: one hit flag per probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionData {
    pub id: u64,
    pub name: String,
    pub probes: Vec<bool>,
}

impl ExecutionData {
    pub fn new(id: u64, name: impl Into<String>, probes: Vec<bool>) -> Self {
        Self {
            id,
            name: name.into(),
            probes,
        }
    }

    /// Number of probes that were hit at least once.
    pub fn hit_count(&self) -> usize {
        self.probes.iter().filter(|p| **p).count()
    }

    /// Fold `other` into `self` with a logical OR over the probe flags.
    ///
    /// Both records must describe the same class version: same id, same
    /// name, same number of probes.
    pub fn merge(&mut self, other: &ExecutionData) -> ExecResult<()> {
        self.assert_compatible(other)?;
        for (mine, theirs) in self.probes.iter_mut().zip(&other.probes) {
            *mine |= *theirs;
        }
        Ok(())
    }

    fn assert_compatible(&self, other: &ExecutionData) -> ExecResult<()> {
        if self.id != other.id || self.name != other.name {
            return Err(ExecError::ClassNameMismatch {
                id: self.id,
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        if self.probes.len() != other.probes.len() {
            return Err(ExecError::ProbeCountMismatch {
                id: self.id,
                name: self.name.clone(),
                left: self.probes.len(),
                right: other.probes.len(),
            });
        }
        Ok(())
    }
}

/// Execution records keyed by class id, kept in order of first sight.
#[derive(Debug, Clone, Default)]
pub struct ExecutionDataStore {
    entries: Vec<ExecutionData>,
    index: HashMap<u64, usize>,
}

impl ExecutionDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, merging it into an existing one with the same id.
    pub fn put(&mut self, data: ExecutionData) -> ExecResult<()> {
        match self.index.get(&data.id) {
            Some(&pos) => self.entries[pos].merge(&data),
            None => {
                self.index.insert(data.id, self.entries.len());
                self.entries.push(data);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<&ExecutionData> {
        self.index.get(&id).map(|&pos| &self.entries[pos])
    }

    pub fn contents(&self) -> &[ExecutionData] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Session records keyed by session id.
///
/// A repeated id keeps its first position and takes the latest metadata.
#[derive(Debug, Clone, Default)]
pub struct SessionInfoStore {
    entries: Vec<SessionInfo>,
    index: HashMap<String, usize>,
}

impl SessionInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, info: SessionInfo) {
        match self.index.get(&info.id) {
            Some(&pos) => self.entries[pos] = info,
            None => {
                self.index.insert(info.id.clone(), self.entries.len());
                self.entries.push(info);
            }
        }
    }

    pub fn contents(&self) -> &[SessionInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Broad classification of an [`ExecError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing input, detected before any network I/O.
    Validation,
    /// Everything that goes wrong while talking to a source or touching files.
    Acquisition,
}

/// Failures raised by a remote management endpoint during an invocation.
#[derive(thiserror::Error, Debug)]
pub enum InvokeError {
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("Reflection failure: {0}")]
    Reflection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while resolving, fetching, or merging coverage data.
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Unknown transport type '{0}', expected 'tcp' or 'jmx'")]
    UnknownTransport(String),

    #[error("Unable to resolve hostname '{host}': {source}")]
    UnresolvableHost {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid port: '{0}'")]
    InvalidPort(String),

    #[error("Invalid service URL '{url}': {reason}")]
    InvalidServiceUrl { url: String, reason: String },

    #[error("Invalid object name '{name}': {reason}")]
    InvalidObjectName { name: String, reason: String },

    #[error("No data received from {0}")]
    NoData(String),

    #[error("Unexpected result type: expected bytes but got {0}")]
    UnexpectedResultType(String),

    #[error("Probe count mismatch for class {name} (id {id:016x}): {left} vs {right}")]
    ProbeCountMismatch {
        id: u64,
        name: String,
        left: usize,
        right: usize,
    },

    #[error("Class name mismatch for id {id:016x}: '{left}' vs '{right}'")]
    ClassNameMismatch { id: u64, left: String, right: String },

    #[error("Invalid execution data: {0}")]
    Format(String),

    #[error("Output file already exists: '{}'", .0.display())]
    OutputExists(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context} at service URL '{url}': {source}")]
    Invoke {
        context: String,
        url: String,
        #[source]
        source: InvokeError,
    },

    #[error("Error loading data from '{input}': {source}")]
    Input {
        input: String,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::InvalidSource(_)
            | ExecError::UnknownTransport(_)
            | ExecError::UnresolvableHost { .. }
            | ExecError::InvalidPort(_)
            | ExecError::InvalidServiceUrl { .. }
            | ExecError::InvalidObjectName { .. } => ErrorKind::Validation,
            _ => ErrorKind::Acquisition,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExecError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience result type.
pub type ExecResult<T> = Result<T, ExecError>;
