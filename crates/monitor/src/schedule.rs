//! Wall-clock trigger times for full scans.
//!
//! The scheduler is a pure state machine over naive wall-clock time so it
//! can be driven by tests; the service polls it with [`ScheduleClock::now`].
//! A trigger fires at most once per armed instant and missed windows are
//! never backfilled: after a stall spanning several triggers, the scan runs
//! once and the next trigger is armed strictly after the current time.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;

use dirwatch_config::ScheduleConfig;

use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleClock {
    Local,
    Zone(Tz),
}

impl ScheduleClock {
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Self::Local => Local::now().naive_local(),
            Self::Zone(tz) => Utc::now().with_timezone(tz).naive_local(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    times: Vec<NaiveTime>,
    next_due: Option<NaiveDateTime>,
}

impl Scheduler {
    pub fn new(mut times: Vec<NaiveTime>) -> Self {
        times.sort();
        times.dedup();
        Self {
            times,
            next_due: None,
        }
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.next_due
    }

    /// Earliest trigger strictly after `now`, today or tomorrow.
    pub fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        let tomorrow = today + TimeDelta::days(1);
        self.times
            .iter()
            .map(|t| today.and_time(*t))
            .find(|due| *due > now)
            .or_else(|| self.times.first().map(|t| tomorrow.and_time(*t)))
    }

    pub fn arm(&mut self, now: NaiveDateTime) {
        self.next_due = self.next_after(now);
    }

    /// `true` exactly once when `now` has reached the armed trigger; the
    /// next trigger is armed relative to `now`.  An unarmed scheduler arms
    /// itself and does not fire.
    pub fn poll(&mut self, now: NaiveDateTime) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.arm(now);
                true
            }
            Some(_) => false,
            None => {
                self.arm(now);
                false
            }
        }
    }
}

/// Everything the scheduler task needs, resolved from `[schedule]`.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub scheduler: Scheduler,
    pub clock: ScheduleClock,
    pub poll_interval: Duration,
}

impl ScheduleSettings {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, MonitorError> {
        let times = config
            .trigger_times()
            .map_err(|e| MonitorError::Config(e.to_string()))?;
        let clock = match config.zone().map_err(|e| MonitorError::Config(e.to_string()))? {
            Some(tz) => ScheduleClock::Zone(tz),
            None => ScheduleClock::Local,
        };
        Ok(Self {
            scheduler: Scheduler::new(times),
            clock,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirwatch_core::parse_timestamp;

    fn at(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn default_scheduler() -> Scheduler {
        Scheduler::new(vec![hm(17, 0), hm(7, 0), hm(7, 0)])
    }

    #[test]
    fn times_are_sorted_and_deduplicated() {
        assert_eq!(default_scheduler().times(), [hm(7, 0), hm(17, 0)]);
    }

    #[test]
    fn next_after_is_strict() {
        let s = default_scheduler();
        assert_eq!(s.next_after(at("2025-12-15 06:59:59")), Some(at("2025-12-15 07:00:00")));
        assert_eq!(s.next_after(at("2025-12-15 07:00:00")), Some(at("2025-12-15 17:00:00")));
        assert_eq!(s.next_after(at("2025-12-15 17:00:00")), Some(at("2025-12-16 07:00:00")));
    }

    #[test]
    fn empty_schedule_never_fires() {
        let mut s = Scheduler::new(vec![]);
        assert!(s.next_after(at("2025-12-15 07:00:00")).is_none());
        assert!(!s.poll(at("2025-12-15 07:00:00")));
        assert!(!s.poll(at("2025-12-16 07:00:00")));
    }

    #[test]
    fn starting_at_trigger_time_does_not_fire_immediately() {
        let mut s = default_scheduler();
        s.arm(at("2025-12-15 07:00:00"));
        assert!(!s.poll(at("2025-12-15 07:00:00")));
        assert_eq!(s.next_due(), Some(at("2025-12-15 17:00:00")));
    }

    #[test]
    fn fires_once_per_trigger() {
        let mut s = default_scheduler();
        s.arm(at("2025-12-15 06:59:58"));
        assert!(!s.poll(at("2025-12-15 06:59:59")));
        assert!(s.poll(at("2025-12-15 07:00:00")));
        assert!(!s.poll(at("2025-12-15 07:00:01")));
        assert!(!s.poll(at("2025-12-15 16:59:59")));
        assert!(s.poll(at("2025-12-15 17:00:00")));
        assert_eq!(s.next_due(), Some(at("2025-12-16 07:00:00")));
    }

    #[test]
    fn stall_across_triggers_fires_once_without_backfill() {
        let mut s = default_scheduler();
        s.arm(at("2025-12-15 06:00:00"));
        // Resumed two days later, past four trigger instants.
        assert!(s.poll(at("2025-12-17 08:00:00")));
        assert!(!s.poll(at("2025-12-17 08:00:01")));
        assert_eq!(s.next_due(), Some(at("2025-12-17 17:00:00")));
    }

    #[test]
    fn unarmed_scheduler_arms_on_first_poll() {
        let mut s = default_scheduler();
        assert!(!s.poll(at("2025-12-15 12:00:00")));
        assert_eq!(s.next_due(), Some(at("2025-12-15 17:00:00")));
    }

    #[test]
    fn settings_resolve_timezone() {
        let cfg = ScheduleConfig {
            timezone: "Asia/Shanghai".to_string(),
            ..Default::default()
        };
        let settings = ScheduleSettings::from_config(&cfg).unwrap();
        assert_eq!(settings.clock, ScheduleClock::Zone(chrono_tz::Asia::Shanghai));
        assert_eq!(settings.scheduler.times(), [hm(7, 0), hm(17, 0)]);

        let bad = ScheduleConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(matches!(ScheduleSettings::from_config(&bad), Err(MonitorError::Config(_))));
    }
}
