//! Merging several execution-data streams into one file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::storage::{self, ExecReader, ExecWriter, Record};
use crate::types::{ExecError, ExecResult, ExecutionDataStore, SessionInfoStore};

/// Totals of a finished merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub destination: PathBuf,
    pub inputs: usize,
    pub sessions: usize,
    pub classes: usize,
    pub bytes: u64,
}

/// Accumulates sessions and execution records from any number of inputs.
#[derive(Debug, Default)]
pub struct MergeEngine {
    sessions: SessionInfoStore,
    executions: ExecutionDataStore,
    inputs: usize,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `input` to the end and fold its records into the engine.
    ///
    /// Decode failures are reported against `label`.
    pub fn load<R: Read>(&mut self, label: &str, input: R) -> ExecResult<()> {
        tracing::debug!("Loading execution data from '{label}'");
        for record in ExecReader::new(input) {
            let record = record.map_err(|source| ExecError::Input {
                input: label.to_string(),
                source: Box::new(source),
            })?;
            match record {
                Record::SessionInfo(info) => self.sessions.put(info),
                Record::ExecutionData(data) => self.executions.put(data)?,
                Record::DumpCommand { .. } => {}
            }
        }
        self.inputs += 1;
        Ok(())
    }

    pub fn sessions(&self) -> &SessionInfoStore {
        &self.sessions
    }

    pub fn executions(&self) -> &ExecutionDataStore {
        &self.executions
    }

    /// Write everything loaded so far to a new file at `destination`.
    pub fn write(&self, destination: &Path) -> ExecResult<MergeSummary> {
        let bytes = storage::write_new_file(destination, |out| {
            let mut writer = ExecWriter::new(out)?;
            for info in self.sessions.contents() {
                writer.write_session_info(info)?;
            }
            for data in self.executions.contents() {
                writer.write_execution_data(data)?;
            }
            writer.flush()
        })?;

        Ok(MergeSummary {
            destination: destination.to_path_buf(),
            inputs: self.inputs,
            sessions: self.sessions.len(),
            classes: self.executions.len(),
            bytes,
        })
    }
}

/// Merge labelled inputs into a new file at `destination`.
///
/// The destination is checked before any input is read and only created once
/// every input decoded cleanly, so a failed merge leaves nothing behind.
pub fn merge<I, R>(inputs: I, destination: &Path) -> ExecResult<MergeSummary>
where
    I: IntoIterator<Item = (String, R)>,
    R: Read,
{
    storage::ensure_absent(destination)?;
    storage::ensure_parent_dir(destination)?;

    let mut engine = MergeEngine::new();
    for (label, input) in inputs {
        engine.load(&label, input)?;
    }

    let summary = engine.write(destination)?;
    tracing::info!(
        "Merged {} input(s) into '{}': {} session(s), {} class(es)",
        summary.inputs,
        destination.display(),
        summary.sessions,
        summary.classes
    );
    Ok(summary)
}

/// [`merge`] over files, labelled by path.
pub fn merge_files(paths: &[PathBuf], destination: &Path) -> ExecResult<MergeSummary> {
    storage::ensure_absent(destination)?;

    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        let file = File::open(path)
            .map_err(|e| ExecError::io(format!("Unable to open '{}'", path.display()), e))?;
        inputs.push((path.display().to_string(), BufReader::new(file)));
    }
    merge(inputs, destination)
}
