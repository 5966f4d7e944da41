//! File-change monitoring pipeline.
//!
//! [`Monitor`] wires the pieces together: an [`EventSource`] feeding a
//! bounded queue, the [`ChangeRecorder`] turning events into change-log lines
//! and report entries, the [`Reconciler`] for full scans and the
//! [`Scheduler`] deciding when scheduled scans run.

pub mod change_log;
pub mod digest;
pub mod error;
pub mod guard;
pub mod reconcile;
pub mod recorder;
pub mod report;
pub mod schedule;
pub mod service;
pub mod source;
pub mod stats;
pub mod synth;

pub use change_log::ChangeLog;
pub use digest::{DailyDigest, DigestOutcome};
pub use error::MonitorError;
pub use guard::PathGuard;
pub use reconcile::Reconciler;
pub use recorder::{AlwaysTrigger, ChangeRecorder, Outcome, TriggerPolicy};
pub use report::ReportStore;
pub use schedule::{ScheduleClock, ScheduleSettings, Scheduler};
pub use service::{Monitor, MonitorBuilder, Phase};
pub use source::EventSource;
pub use stats::StatsSnapshot;
pub use synth::ReportSynthesizer;
