//! Daily report files.
//!
//! One file per local calendar day, `daily_report_YYYYMMDD.<ext>`, made of
//! blocks like:
//!
//! ```text
//!
//! --- 2025-12-15 17:13:01 ---
//! 摘要: At 2025-12-15 17:13:01, a.txt was created
//! 详情: The CREATED operation on a.txt has been recorded.
//! ------------------------------
//! ```
//!
//! Scan blocks mark the header with `(全量扫描)` and carry a `文件数:` line.
//! Each block is rendered in full and written with a single `write_all`
//! under the store lock, so concurrent producers never interleave.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use dirwatch_core::{ReportEntry, ReportSource, format_timestamp, parse_timestamp};

pub const SEPARATOR: &str = "------------------------------";
const SCAN_MARKER: &str = "(全量扫描)";
const SUMMARY_LABEL: &str = "摘要";
const DETAIL_LABEL: &str = "详情";
const FILE_COUNT_LABEL: &str = "文件数";

pub struct ReportStore {
    dir: PathBuf,
    extension: String,
    lock: Mutex<()>,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("daily_report_{}.{}", date.format("%Y%m%d"), self.extension))
    }

    /// Append `entry` to today's file.  The date is taken at write time, so
    /// an entry produced just before midnight lands in the next day's file if
    /// the write happens after it.
    pub async fn append(&self, entry: &ReportEntry) -> std::io::Result<PathBuf> {
        let block = render(entry);
        let _guard = self.lock.lock().await;

        let path = self.path_for(Local::now().date_naive());
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        debug!(path = %path.display(), source = ?entry.source, "report entry appended");
        Ok(path)
    }

    /// Entries recorded on `date`; empty when there is no file for that day.
    pub fn read_day(&self, date: NaiveDate) -> std::io::Result<Vec<ReportEntry>> {
        match std::fs::read_to_string(self.path_for(date)) {
            Ok(text) => Ok(parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

pub fn render(entry: &ReportEntry) -> String {
    let ts = format_timestamp(&entry.timestamp);
    match entry.source {
        ReportSource::Event => format!(
            "\n--- {ts} ---\n{SUMMARY_LABEL}: {}\n{DETAIL_LABEL}: {}\n{SEPARATOR}\n",
            entry.summary, entry.detail
        ),
        ReportSource::Scan => format!(
            "\n--- {ts} {SCAN_MARKER} ---\n{SUMMARY_LABEL}: {}\n{FILE_COUNT_LABEL}: {}\n{DETAIL_LABEL}: {}\n{SEPARATOR}\n",
            entry.summary,
            entry.file_count.unwrap_or_default(),
            entry.detail
        ),
    }
}

/// Parse every well-formed block in `text`.  Blocks missing a header,
/// summary or detail line are skipped.
pub fn parse(text: &str) -> Vec<ReportEntry> {
    let mut entries = Vec::new();
    let mut current: Option<Partial> = None;

    for line in text.lines() {
        if is_separator(line) {
            if let Some(entry) = current.take().and_then(Partial::finish) {
                entries.push(entry);
            }
            continue;
        }
        if let Some(header) = parse_header(line) {
            current = Some(header);
            continue;
        }
        let Some(partial) = current.as_mut() else {
            continue;
        };
        let Some((label, value)) = line.split_once(": ") else {
            continue;
        };
        match label {
            SUMMARY_LABEL => partial.summary = Some(value.to_string()),
            DETAIL_LABEL => partial.detail = Some(value.to_string()),
            FILE_COUNT_LABEL => partial.file_count = value.trim().parse().ok(),
            _ => {}
        }
    }
    entries
}

struct Partial {
    timestamp: chrono::NaiveDateTime,
    source: ReportSource,
    summary: Option<String>,
    detail: Option<String>,
    file_count: Option<usize>,
}

impl Partial {
    fn finish(self) -> Option<ReportEntry> {
        Some(ReportEntry {
            timestamp: self.timestamp,
            summary: self.summary?,
            detail: self.detail?,
            source: self.source,
            file_count: match self.source {
                ReportSource::Scan => Some(self.file_count.unwrap_or_default()),
                ReportSource::Event => None,
            },
        })
    }
}

fn is_separator(line: &str) -> bool {
    line.len() >= 3 && line.bytes().all(|b| b == b'-')
}

fn parse_header(line: &str) -> Option<Partial> {
    let inner = line.strip_prefix("--- ")?.strip_suffix(" ---")?;
    let (raw_ts, source) = match inner.strip_suffix(SCAN_MARKER) {
        Some(rest) => (rest, ReportSource::Scan),
        None => (inner, ReportSource::Event),
    };
    Some(Partial {
        timestamp: parse_timestamp(raw_ts)?,
        source,
        summary: None,
        detail: None,
        file_count: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDateTime;
    use dirwatch_core::{ScanDelta, ScanResult};
    use tempfile::TempDir;

    fn at(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    fn event(summary: &str) -> ReportEntry {
        ReportEntry::event(at("2025-12-15 17:13:01"), summary.to_string(), "detail".to_string())
    }

    #[test]
    fn event_block_layout() {
        let block = render(&event("At 2025-12-15 17:13:01, a.txt was created"));
        assert_eq!(
            block,
            "\n--- 2025-12-15 17:13:01 ---\n摘要: At 2025-12-15 17:13:01, a.txt was created\n详情: detail\n------------------------------\n"
        );
    }

    #[test]
    fn scan_block_carries_marker_and_count() {
        let scan = ScanResult {
            timestamp: at("2025-12-15 07:00:00"),
            file_count: 42,
            skipped: 0,
            delta: Some(ScanDelta { added: 2, removed: 0 }),
            narrative: "Detected 42 files".to_string(),
        };
        let block = render(&ReportEntry::scan(&scan));
        assert!(block.contains("--- 2025-12-15 07:00:00 (全量扫描) ---"));
        assert!(block.contains("\n文件数: 42\n"));
    }

    #[test]
    fn parse_reads_back_mixed_blocks() {
        let scan = ScanResult {
            timestamp: at("2025-12-15 17:00:00"),
            file_count: 3,
            skipped: 1,
            delta: None,
            narrative: "Detected 3 files".to_string(),
        };
        let written = [event("one"), ReportEntry::scan(&scan), event("two")];
        let text: String = written.iter().map(render).collect();
        assert_eq!(parse(&text), written);
    }

    #[test]
    fn parse_skips_malformed_blocks() {
        let text = "\
garbage before
--- not a timestamp ---
摘要: lost
详情: lost
------------------------------

--- 2025-12-15 17:13:01 ---
摘要: kept
详情: kept detail
------------------------------

--- 2025-12-15 17:14:01 ---
摘要: missing detail
------------------------------
";
        let entries = parse(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].summary, "kept");
    }

    #[tokio::test]
    async fn append_creates_todays_file() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path().join("daily_reports"), "txt");
        let path = store.append(&event("first")).await.unwrap();
        store.append(&event("second")).await.unwrap();

        let today = Local::now().date_naive();
        assert_eq!(path, store.path_for(today));
        let summaries: Vec<String> = store
            .read_day(today)
            .unwrap()
            .into_iter()
            .map(|e| e.summary)
            .collect();
        assert_eq!(summaries, ["first", "second"]);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ReportStore::new(dir.path(), "md"));
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let detail = format!("writer {i} {}", "x".repeat(2048));
                let entry = ReportEntry::event(at("2025-12-15 17:13:01"), format!("entry {i}"), detail);
                store.append(&entry).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let entries = store.read_day(Local::now().date_naive()).unwrap();
        assert_eq!(entries.len(), 20);
        for entry in entries {
            let i = entry.summary.trim_start_matches("entry ");
            assert!(entry.detail.starts_with(&format!("writer {i} ")));
        }
    }

    #[test]
    fn missing_day_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ReportStore::new(dir.path(), "txt");
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(store.read_day(date).unwrap().is_empty());
        assert!(store.path_for(date).ends_with("daily_report_20200101.txt"));
    }
}
