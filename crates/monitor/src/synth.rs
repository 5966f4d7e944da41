//! Turns change events and scan results into persisted report entries.
//!
//! Event narratives come from the configured [`Enricher`] when it answers
//! within the time bound; any failure falls back to a deterministic sentence
//! so an entry is always written.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use dirwatch_config::{DEFAULT_EVENT_TEMPLATE, EnrichmentConfig};
use dirwatch_core::{ChangeKind, ReportEntry, ScanResult, format_timestamp, one_line};
use dirwatch_llm::{Enricher, prompt};

use crate::report::ReportStore;

pub struct ReportSynthesizer {
    root: PathBuf,
    store: Arc<ReportStore>,
    enricher: Arc<dyn Enricher>,
    timeout: Duration,
    template: String,
    max_content_bytes: usize,
}

impl ReportSynthesizer {
    pub fn new(root: impl Into<PathBuf>, store: Arc<ReportStore>, enricher: Arc<dyn Enricher>) -> Self {
        let defaults = EnrichmentConfig::default();
        Self {
            root: root.into(),
            store,
            enricher,
            timeout: Duration::from_secs(defaults.timeout_secs),
            template: DEFAULT_EVENT_TEMPLATE.to_string(),
            max_content_bytes: defaults.max_content_bytes,
        }
    }

    pub fn with_settings(mut self, config: &EnrichmentConfig) -> Self {
        self.timeout = Duration::from_secs(config.timeout_secs.max(1));
        self.template = config.event_template.clone();
        self.max_content_bytes = config.max_content_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<ReportStore> {
        &self.store
    }

    pub fn enricher(&self) -> &Arc<dyn Enricher> {
        &self.enricher
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build and persist the entry for one change to `path` (root-relative).
    pub async fn from_event(
        &self,
        kind: ChangeKind,
        path: &str,
        at: NaiveDateTime,
    ) -> std::io::Result<ReportEntry> {
        let ts = format_timestamp(&at);
        let summary = event_summary(kind, path, &ts);
        let detail = self.narrate(kind, path, &ts).await;
        let entry = ReportEntry::event(at, summary, detail);
        self.store.append(&entry).await?;
        Ok(entry)
    }

    /// Persist the entry for a completed scan.  Scan narratives are always
    /// deterministic.
    pub async fn from_scan(&self, scan: &ScanResult) -> std::io::Result<ReportEntry> {
        let entry = ReportEntry::scan(scan);
        self.store.append(&entry).await?;
        Ok(entry)
    }

    async fn narrate(&self, kind: ChangeKind, path: &str, ts: &str) -> String {
        if !self.enricher.available() {
            return fallback_detail(kind, path);
        }

        let content = match kind {
            ChangeKind::Deleted => None,
            _ => self.read_excerpt(path).await,
        };
        let prompt = prompt::event_prompt(&self.template, kind.action(), path, ts, content.as_deref());

        // The outer bound holds even for an enricher that ignores its own.
        let bound = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(bound, self.enricher.generate(&prompt, self.timeout)).await {
            Ok(Ok(text)) if !one_line(&text).is_empty() => {
                debug!(enricher = self.enricher.name(), path, "event narrative enriched");
                text
            }
            Ok(Ok(_)) => fallback_detail(kind, path),
            Ok(Err(err)) => {
                warn!(enricher = self.enricher.name(), path, error = %err, "enrichment failed, using fallback narrative");
                fallback_detail(kind, path)
            }
            Err(_) => {
                warn!(enricher = self.enricher.name(), path, timeout = ?bound, "enrichment exceeded time bound, using fallback narrative");
                fallback_detail(kind, path)
            }
        }
    }

    async fn read_excerpt(&self, path: &str) -> Option<String> {
        if self.max_content_bytes == 0 {
            return None;
        }
        let file = tokio::fs::File::open(self.root.join(path)).await.ok()?;
        let mut buf = Vec::with_capacity(self.max_content_bytes.min(64 * 1024));
        file.take(self.max_content_bytes as u64)
            .read_to_end(&mut buf)
            .await
            .ok()?;
        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// "At 2025-12-15 17:13:01, a.txt was created"
pub fn event_summary(kind: ChangeKind, path: &str, ts: &str) -> String {
    format!("At {ts}, {path} was {}", kind.verb())
}

/// Inverse of [`event_summary`]: the change kind and path it mentions.
pub fn parse_event_summary(summary: &str) -> Option<(ChangeKind, String)> {
    let rest = summary.strip_prefix("At ")?;
    let (_, rest) = rest.split_once(", ")?;
    let (path, verb) = rest.rsplit_once(" was ")?;
    Some((ChangeKind::from_label(verb)?, path.to_string()))
}

pub fn fallback_detail(kind: ChangeKind, path: &str) -> String {
    format!("The {} operation on {path} has been recorded.", kind.action())
}
