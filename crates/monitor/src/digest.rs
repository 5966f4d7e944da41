//! End-of-day digest.
//!
//! Asks the enricher for a templated report grounded in selected files
//! (today's report file by default).  When enrichment is unavailable or
//! fails, a deterministic digest is built from today's parsed entries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use tracing::{info, warn};

use dirwatch_core::{ChangeKind, ReportEntry, ReportSource, format_timestamp};
use dirwatch_llm::{Enricher, prompt};

use crate::report::ReportStore;
use crate::synth::parse_event_summary;

/// Per-file cap on content fed into the digest prompt.
const MAX_FILE_BYTES: usize = 16 * 1024;

pub struct DailyDigest {
    store: Arc<ReportStore>,
    enricher: Arc<dyn Enricher>,
    timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DigestOutcome {
    pub path: PathBuf,
    pub content: String,
    pub enriched: bool,
}

impl DailyDigest {
    pub fn new(store: Arc<ReportStore>, enricher: Arc<dyn Enricher>, timeout: Duration) -> Self {
        Self {
            store,
            enricher,
            timeout,
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.store
            .dir()
            .join(format!("daily_summary_{}.md", date.format("%Y%m%d")))
    }

    /// Generate and write today's digest.  `template` overrides the built-in
    /// report layout; an explicitly given template that cannot be read is an
    /// error.
    pub async fn generate(&self, files: &[PathBuf], template: Option<&Path>) -> Result<DigestOutcome> {
        let today = Local::now().date_naive();
        let template = match template {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading digest template {}", path.display()))?,
            None => prompt::DEFAULT_DIGEST_TEMPLATE.to_string(),
        };

        let mut content = None;
        if self.enricher.available() {
            let sources = self.read_sources(files, today).await;
            if sources.is_empty() {
                warn!("no readable files for the digest prompt");
            } else {
                content = self.enrich(&template, &sources).await;
            }
        }
        let enriched = content.is_some();
        let content = match content {
            Some(text) => text,
            None => {
                let entries = self.store.read_day(today).unwrap_or_else(|err| {
                    warn!(
                        path = %self.store.path_for(today).display(),
                        error = %err,
                        "cannot read today's report, digest will list no activity"
                    );
                    Vec::new()
                });
                fallback_digest(today, &entries)
            }
        };

        let path = self.path_for(today);
        tokio::fs::create_dir_all(self.store.dir()).await?;
        tokio::fs::write(&path, &content)
            .await
            .with_context(|| format!("writing digest {}", path.display()))?;
        info!(path = %path.display(), enriched, "daily digest written");

        Ok(DigestOutcome {
            path,
            content,
            enriched,
        })
    }

    async fn read_sources(&self, files: &[PathBuf], today: NaiveDate) -> Vec<(String, String)> {
        let defaults = [self.store.path_for(today)];
        let files = if files.is_empty() { &defaults[..] } else { files };

        let mut sources = Vec::with_capacity(files.len());
        for path in files {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let cut = bytes.len().min(MAX_FILE_BYTES);
                    let text = String::from_utf8_lossy(&bytes[..cut]).into_owned();
                    sources.push((path.display().to_string(), text));
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable digest source"),
            }
        }
        sources
    }

    async fn enrich(&self, template: &str, sources: &[(String, String)]) -> Option<String> {
        let prompt = prompt::digest_prompt(template, sources);
        let bound = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(bound, self.enricher.generate(&prompt, self.timeout)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
            Ok(Ok(_)) => None,
            Ok(Err(err)) => {
                warn!(enricher = self.enricher.name(), error = %err, "digest enrichment failed, using fallback");
                None
            }
            Err(_) => {
                warn!(enricher = self.enricher.name(), "digest enrichment timed out, using fallback");
                None
            }
        }
    }
}

/// Markdown digest built only from the day's report entries.
pub fn fallback_digest(date: NaiveDate, entries: &[ReportEntry]) -> String {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut touched: BTreeMap<String, Vec<ChangeKind>> = BTreeMap::new();
    let mut scans = Vec::new();

    for entry in entries {
        match entry.source {
            ReportSource::Scan => scans.push(entry),
            ReportSource::Event => {
                if let Some((kind, path)) = parse_event_summary(&entry.summary) {
                    *counts.entry(kind.verb()).or_default() += 1;
                    touched.entry(path).or_default().push(kind);
                }
            }
        }
    }

    let mut out = format!("# Daily Report {}\n\n## Activity\n\n", date.format("%Y-%m-%d"));
    if counts.is_empty() && scans.is_empty() {
        out.push_str("No file activity was recorded today.\n");
    }
    for kind in [ChangeKind::Created, ChangeKind::Modified, ChangeKind::Deleted] {
        if let Some(n) = counts.get(kind.verb()) {
            out.push_str(&format!("- {} {n}\n", capitalize(kind.verb())));
        }
    }
    if let Some(last) = scans.last() {
        out.push_str(&format!(
            "- Full scans: {} (latest at {}, {} files)\n",
            scans.len(),
            format_timestamp(&last.timestamp),
            last.file_count.unwrap_or_default()
        ));
    }

    if !touched.is_empty() {
        out.push_str("\n## Files touched\n\n");
        for (path, kinds) in &touched {
            let verbs: Vec<&str> = kinds.iter().map(|k| k.verb()).collect();
            out.push_str(&format!("- {path}: {}\n", verbs.join(", ")));
        }
    }

    out.push_str("\n## Notes\n\nGenerated locally from today's report entries.\n");
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
