//! Listing the contents of an execution-data file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use execfetch::{read_file, Record};

use crate::types::CliResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub id: String,
    pub start: String,
    pub dump: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassView {
    /// Class id as 16 hex digits.
    pub id: String,
    pub name: String,
    pub probes: usize,
    pub hit: usize,
}

/// Sessions and execution records of one file, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecSummary {
    pub path: PathBuf,
    pub sessions: Vec<SessionView>,
    pub classes: Vec<ClassView>,
}

pub fn summarize(path: &Path) -> CliResult<ExecSummary> {
    let mut summary = ExecSummary {
        path: path.to_path_buf(),
        sessions: Vec::new(),
        classes: Vec::new(),
    };
    for record in read_file(path)? {
        match record {
            Record::SessionInfo(info) => summary.sessions.push(SessionView {
                id: info.id,
                start: format_millis(info.start),
                dump: format_millis(info.dump),
            }),
            Record::ExecutionData(data) => summary.classes.push(ClassView {
                id: format!("{:016x}", data.id),
                hit: data.hit_count(),
                probes: data.probes.len(),
                name: data.name,
            }),
            Record::DumpCommand { .. } => {}
        }
    }
    Ok(summary)
}

/// RFC 3339 in UTC; out-of-range values are shown as raw milliseconds.
pub fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

pub fn render_text(summary: &ExecSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", summary.path.display());
    let _ = writeln!(out, "  Sessions: {}", summary.sessions.len());
    for session in &summary.sessions {
        let _ = writeln!(
            out,
            "    {}  start {}  dump {}",
            session.id, session.start, session.dump
        );
    }
    let _ = writeln!(out, "  Classes: {}", summary.classes.len());
    for class in &summary.classes {
        let _ = writeln!(
            out,
            "    {}  {}  {}/{} probes hit",
            class.id, class.name, class.hit, class.probes
        );
    }
    out
}
