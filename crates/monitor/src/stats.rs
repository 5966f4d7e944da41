use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared between the event source, the recorder and scans.
#[derive(Debug, Default)]
pub struct MonitorStats {
    events_recorded: AtomicU64,
    events_ignored: AtomicU64,
    events_dropped: AtomicU64,
    reports_written: AtomicU64,
    scans_completed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_recorded: u64,
    pub events_ignored: u64,
    pub events_dropped: u64,
    pub reports_written: u64,
    pub scans_completed: u64,
}

impl MonitorStats {
    pub fn record_event(&self) {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ignore_event(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total of dropped events.
    pub fn drop_event(&self) -> u64 {
        self.events_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn write_report(&self) {
        self.reports_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn complete_scan(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            reports_written: self.reports_written.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
        }
    }
}
