//! Shared data model for the monitor: change events, scan results and the
//! entries persisted to the daily report.

use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Wall-clock format used in report headers, summaries and HTTP payloads.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind of filesystem change observed on a regular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Upper-case action label written to the change log.
    pub fn action(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
        }
    }

    /// Past-tense verb used in narratives ("a.txt was created").
    pub fn verb(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }

    /// Parse an action label or verb (case-insensitive).
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "create" => Some(Self::Created),
            "modified" | "modify" => Some(Self::Modified),
            "deleted" | "delete" | "removed" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A single change as delivered by the event source.
///
/// `path` is whatever the OS notification reported (usually absolute); the
/// change recorder derives the root-relative form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub timestamp: DateTime<Local>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Local::now(),
        }
    }
}

/// Files that appeared or vanished since the previous scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDelta {
    pub added: usize,
    pub removed: usize,
}

/// Outcome of one full reconciliation pass over the monitored tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub timestamp: NaiveDateTime,
    pub file_count: usize,
    /// Entries that could not be read during the walk.
    pub skipped: usize,
    /// `None` on the first scan of a process lifetime.
    pub delta: Option<ScanDelta>,
    pub narrative: String,
}

impl ScanResult {
    pub fn summary(&self) -> String {
        format!("Full scan performed at {}", format_timestamp(&self.timestamp))
    }
}

/// Which pipeline produced a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSource {
    Event,
    Scan,
}

/// One block of the daily report file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Second precision; the file format carries nothing finer.
    pub timestamp: NaiveDateTime,
    pub summary: String,
    pub detail: String,
    pub source: ReportSource,
    /// Present on scan entries only.
    pub file_count: Option<usize>,
}

impl ReportEntry {
    pub fn event(timestamp: NaiveDateTime, summary: String, detail: String) -> Self {
        Self {
            timestamp: truncate_to_seconds(timestamp),
            summary: one_line(&summary),
            detail: one_line(&detail),
            source: ReportSource::Event,
            file_count: None,
        }
    }

    pub fn scan(scan: &ScanResult) -> Self {
        Self {
            timestamp: truncate_to_seconds(scan.timestamp),
            summary: one_line(&scan.summary()),
            detail: one_line(&scan.narrative),
            source: ReportSource::Scan,
            file_count: Some(scan.file_count),
        }
    }
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Current local wall-clock time at second precision.
pub fn local_now() -> NaiveDateTime {
    truncate_to_seconds(Local::now().naive_local())
}

/// Collapse multi-line text into a single line of space-separated words.
///
/// Report blocks are line-oriented; free-form narrative must not introduce
/// extra lines or a stray separator.
pub fn one_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
