//! Sequential consumer of change events.
//!
//! Every accepted event gets one change-log line; events the trigger policy
//! admits also get one report entry.  Events are handled one at a time in
//! arrival order, so report entries appear in the order events were
//! observed.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use dirwatch_core::{ChangeEvent, ChangeKind, ReportEntry, truncate_to_seconds};

use crate::change_log::ChangeLog;
use crate::guard::PathGuard;
use crate::stats::MonitorStats;
use crate::synth::ReportSynthesizer;

/// Decides whether a logged change also deserves a report entry.
pub trait TriggerPolicy: Send + Sync {
    fn should_report(&self, kind: ChangeKind, path: &str) -> bool;
}

/// Reports every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrigger;

impl TriggerPolicy for AlwaysTrigger {
    fn should_report(&self, _kind: ChangeKind, _path: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Outside the root or one of the monitor's own artifacts.
    Ignored,
    /// Written to the change log only.
    Logged,
    Reported(ReportEntry),
}

#[derive(Clone)]
pub struct ChangeRecorder {
    guard: PathGuard,
    log: Arc<ChangeLog>,
    synthesizer: Arc<ReportSynthesizer>,
    policy: Arc<dyn TriggerPolicy>,
    stats: Arc<MonitorStats>,
}

impl ChangeRecorder {
    pub fn new(
        guard: PathGuard,
        log: Arc<ChangeLog>,
        synthesizer: Arc<ReportSynthesizer>,
        policy: Arc<dyn TriggerPolicy>,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            guard,
            log,
            synthesizer,
            policy,
            stats,
        }
    }

    pub async fn record(&self, event: ChangeEvent) -> Outcome {
        let Some(rel) = self.guard.accept(&event.path) else {
            debug!(path = %event.path.display(), "ignoring change to excluded path");
            self.stats.ignore_event();
            return Outcome::Ignored;
        };

        if let Err(err) = self.log.append(event.kind, &rel, &event.timestamp).await {
            warn!(path = %rel, error = %err, "failed to append change log line");
        }
        self.stats.record_event();
        info!(action = event.kind.action(), path = %rel, "file change recorded");

        if !self.policy.should_report(event.kind, &rel) {
            return Outcome::Logged;
        }

        let at = truncate_to_seconds(event.timestamp.naive_local());
        match self.synthesizer.from_event(event.kind, &rel, at).await {
            Ok(entry) => {
                self.stats.write_report();
                Outcome::Reported(entry)
            }
            Err(err) => {
                warn!(path = %rel, error = %err, "failed to append report entry");
                Outcome::Logged
            }
        }
    }

    /// Consume `rx` until the channel closes or `stop` flips.  On stop the
    /// channel is closed to new events and whatever is already queued is
    /// still recorded.  Returns the number of events handled.
    pub async fn run(self, mut rx: mpsc::Receiver<ChangeEvent>, mut stop: watch::Receiver<bool>) -> usize {
        let mut handled = 0;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        self.record(event).await;
                        handled += 1;
                    }
                    None => break,
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        rx.close();
                        while let Some(event) = rx.recv().await {
                            self.record(event).await;
                            handled += 1;
                        }
                        break;
                    }
                }
            }
        }
        debug!(handled, "change recorder finished");
        handled
    }
}
