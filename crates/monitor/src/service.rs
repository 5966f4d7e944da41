//! The monitor service: owns the pipeline pieces and drives their lifecycle.
//!
//! ```text
//! Idle ──run()──▶ Watching ──shutdown──▶ Draining ──▶ Stopped
//! ```
//!
//! While watching, two tasks run side by side: the change recorder
//! consuming the event queue and the scheduler polling for due full scans.
//! On shutdown the event source is detached first, then both tasks are told
//! to stop; queued events and a scan already under way still complete.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use dirwatch_config::{AppConfig, EnrichmentConfig};
use dirwatch_core::{ScanResult, format_timestamp};
use dirwatch_llm::{DisabledEnricher, Enricher};
use dirwatch_snapshot::{GitSnapshot, SnapshotSink};

use crate::change_log::ChangeLog;
use crate::digest::DailyDigest;
use crate::error::MonitorError;
use crate::guard::PathGuard;
use crate::reconcile::Reconciler;
use crate::recorder::{AlwaysTrigger, ChangeRecorder, TriggerPolicy};
use crate::report::ReportStore;
use crate::schedule::ScheduleSettings;
use crate::source::EventSource;
use crate::stats::{MonitorStats, StatsSnapshot};
use crate::synth::ReportSynthesizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Watching,
    Draining,
    Stopped,
}

/// Cheap, cloneable handle shared by the CLI, the HTTP adapter and the
/// background tasks.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    guard: PathGuard,
    change_log: Arc<ChangeLog>,
    synthesizer: Arc<ReportSynthesizer>,
    reconciler: Arc<Reconciler>,
    policy: Arc<dyn TriggerPolicy>,
    snapshot: Option<Arc<dyn SnapshotSink>>,
    stats: Arc<MonitorStats>,
    phase: watch::Sender<Phase>,
    started: Instant,
    started_at: DateTime<Local>,
    last_scan: Mutex<Option<ScanResult>>,
    queue_capacity: usize,
}

impl Monitor {
    pub fn builder(root: impl Into<PathBuf>) -> MonitorBuilder {
        MonitorBuilder::new(root)
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, MonitorError> {
        config
            .validate()
            .map_err(|e| MonitorError::Config(e.to_string()))?;

        let mut builder = Self::builder(config.root_path())
            .report_dir(config.report_dir(), &config.report.extension)
            .change_log(config.change_log_path())
            .queue_capacity(config.monitor.queue_capacity)
            .enrichment(&config.enrichment)
            .git_snapshots(config.snapshot.git_enabled);
        for pattern in &config.monitor.exclude {
            builder = builder.exclude(pattern);
        }
        if let Some(log_dir) = config.log_dir() {
            builder = builder.exclude(absolutize(&log_dir));
        }
        builder.build()
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn guard(&self) -> &PathGuard {
        &self.inner.guard
    }

    pub fn store(&self) -> &Arc<ReportStore> {
        self.inner.synthesizer.store()
    }

    pub fn change_log_path(&self) -> &Path {
        self.inner.change_log.path()
    }

    pub fn enricher(&self) -> &Arc<dyn Enricher> {
        self.inner.synthesizer.enricher()
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.inner.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn last_scan(&self) -> Option<ScanResult> {
        self.inner
            .last_scan
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Digest generator sharing this monitor's report store and enricher.
    pub fn digest(&self) -> DailyDigest {
        DailyDigest::new(
            self.store().clone(),
            self.enricher().clone(),
            self.inner.synthesizer.timeout(),
        )
    }

    pub fn recorder(&self) -> ChangeRecorder {
        ChangeRecorder::new(
            self.inner.guard.clone(),
            self.inner.change_log.clone(),
            self.inner.synthesizer.clone(),
            self.inner.policy.clone(),
            self.inner.stats.clone(),
        )
    }

    /// Reconcile the whole tree now and append a scan entry.  Refused once
    /// the monitor has begun shutting down.
    pub async fn scan_now(&self) -> Result<ScanResult, MonitorError> {
        let phase = self.phase();
        if matches!(phase, Phase::Draining | Phase::Stopped) {
            return Err(MonitorError::NotRunning(phase));
        }

        let reconciler = self.inner.reconciler.clone();
        let result = tokio::task::spawn_blocking(move || reconciler.scan()).await?;
        self.inner.synthesizer.from_scan(&result).await?;
        self.inner.stats.complete_scan();
        info!(
            file_count = result.file_count,
            skipped = result.skipped,
            "full scan complete"
        );

        if let Some(sink) = &self.inner.snapshot {
            match sink.snapshot(&result.narrative).await {
                Ok(Some(commit)) => info!(%commit, "tree snapshot recorded"),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "tree snapshot failed"),
            }
        }

        *self
            .inner
            .last_scan
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(result.clone());
        Ok(result)
    }

    /// Watch the tree and run scheduled scans until `shutdown` resolves.
    ///
    /// Failing to subscribe to change notifications is fatal and leaves the
    /// monitor idle.
    pub async fn run(
        &self,
        schedule: ScheduleSettings,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), MonitorError> {
        let phase = self.phase();
        if phase != Phase::Idle {
            return Err(MonitorError::NotRunning(phase));
        }

        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let source = EventSource::attach(&self.inner.root, tx, self.inner.stats.clone())?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let recorder = tokio::spawn(self.recorder().run(rx, stop_rx.clone()));
        let scheduler = tokio::spawn(self.clone().schedule_loop(schedule, stop_rx));

        self.inner.phase.send_replace(Phase::Watching);
        info!(root = %self.inner.root.display(), "monitor running");

        shutdown.await;

        self.inner.phase.send_replace(Phase::Draining);
        info!("monitor draining");
        drop(source);
        let _ = stop_tx.send(true);

        if let Err(err) = scheduler.await {
            warn!(error = %err, "scheduler task ended abnormally");
        }
        match recorder.await {
            Ok(handled) => info!(handled, "change recorder drained"),
            Err(err) => warn!(error = %err, "change recorder ended abnormally"),
        }

        self.inner.phase.send_replace(Phase::Stopped);
        info!("monitor stopped");
        Ok(())
    }

    async fn schedule_loop(self, settings: ScheduleSettings, mut stop: watch::Receiver<bool>) {
        let ScheduleSettings {
            mut scheduler,
            clock,
            poll_interval,
        } = settings;

        scheduler.arm(clock.now());
        log_next(scheduler.next_due());

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !scheduler.poll(clock.now()) {
                        continue;
                    }
                    info!("scheduled full scan starting");
                    if let Err(err) = self.scan_now().await {
                        warn!(error = %err, "scheduled full scan failed");
                    }
                    log_next(scheduler.next_due());
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

fn log_next(next: Option<chrono::NaiveDateTime>) {
    match next {
        Some(at) => info!(next = %format_timestamp(&at), "next full scan scheduled"),
        None => info!("no full scan times configured"),
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub struct MonitorBuilder {
    root: PathBuf,
    report_dir: Option<PathBuf>,
    extension: String,
    change_log: Option<PathBuf>,
    exclude: Vec<PathBuf>,
    enricher: Option<Arc<dyn Enricher>>,
    enrichment: Option<EnrichmentConfig>,
    policy: Arc<dyn TriggerPolicy>,
    snapshot: Option<Arc<dyn SnapshotSink>>,
    git_snapshots: bool,
    queue_capacity: usize,
}

impl MonitorBuilder {
    fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            report_dir: None,
            extension: "txt".to_string(),
            change_log: None,
            exclude: Vec::new(),
            enricher: None,
            enrichment: None,
            policy: Arc::new(AlwaysTrigger),
            snapshot: None,
            git_snapshots: false,
            queue_capacity: 1024,
        }
    }

    /// Defaults to `<root>/daily_reports`.
    pub fn report_dir(mut self, dir: impl Into<PathBuf>, extension: &str) -> Self {
        self.report_dir = Some(dir.into());
        self.extension = extension.to_string();
        self
    }

    /// Defaults to `<root>/file_changes.log`.
    pub fn change_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.change_log = Some(path.into());
        self
    }

    /// Relative paths are taken relative to the root.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude.push(path.into());
        self
    }

    /// Build the enricher from `[enrichment]` and apply its prompt settings.
    pub fn enrichment(mut self, config: &EnrichmentConfig) -> Self {
        self.enrichment = Some(config.clone());
        self
    }

    /// Use `enricher` instead of one built from configuration.
    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn TriggerPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn snapshot(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.snapshot = Some(sink);
        self
    }

    /// Commit the tree to a git repository at the root after each scan.
    pub fn git_snapshots(mut self, enabled: bool) -> Self {
        self.git_snapshots = enabled;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<Monitor, MonitorError> {
        let root = self
            .root
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| MonitorError::RootMissing(self.root.clone()))?;

        let report_dir = self
            .report_dir
            .map(|p| absolutize(&p))
            .unwrap_or_else(|| root.join("daily_reports"));
        let change_log = self
            .change_log
            .map(|p| absolutize(&p))
            .unwrap_or_else(|| root.join("file_changes.log"));

        let snapshot = match self.snapshot {
            Some(sink) => Some(sink),
            None if self.git_snapshots => {
                Some(Arc::new(GitSnapshot::new(&root)) as Arc<dyn SnapshotSink>)
            }
            None => None,
        };

        let mut guard = PathGuard::new(&root)
            .exclude_dir(&report_dir)
            .exclude_file(&change_log);
        if snapshot.is_some() {
            guard = guard.exclude_dir(".git");
        }
        for path in &self.exclude {
            guard = guard.exclude_dir(path);
        }

        let enricher = match (self.enricher, &self.enrichment) {
            (Some(enricher), _) => enricher,
            (None, Some(config)) => dirwatch_llm::from_config(config),
            (None, None) => Arc::new(DisabledEnricher),
        };
        let store = Arc::new(ReportStore::new(&report_dir, self.extension));
        let mut synthesizer = ReportSynthesizer::new(&root, store, enricher);
        if let Some(config) = &self.enrichment {
            synthesizer = synthesizer.with_settings(config);
        }

        info!(
            root = %root.display(),
            reports = %report_dir.display(),
            change_log = %change_log.display(),
            enricher = synthesizer.enricher().name(),
            snapshots = snapshot.is_some(),
            "monitor configured"
        );

        let (phase, _) = watch::channel(Phase::Idle);
        Ok(Monitor {
            inner: Arc::new(Inner {
                reconciler: Arc::new(Reconciler::new(guard.clone())),
                guard,
                change_log: Arc::new(ChangeLog::new(change_log)),
                synthesizer: Arc::new(synthesizer),
                policy: self.policy,
                snapshot,
                stats: Arc::new(MonitorStats::default()),
                phase,
                started: Instant::now(),
                started_at: Local::now(),
                last_scan: Mutex::new(None),
                queue_capacity: self.queue_capacity,
                root,
            }),
        })
    }
}

fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
