use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ── Monitor ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Root of the watched tree.
    pub root: String,
    /// Change log file.  Relative paths resolve against `root`.
    pub change_log: String,
    /// Capacity of the queue between the notification thread and the
    /// change recorder.  Events arriving while it is full are dropped.
    pub queue_capacity: usize,
    /// Extra root-relative prefixes excluded from events and scans, on top
    /// of the report directory and the change log.
    pub exclude: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            change_log: "file_changes.log".to_string(),
            queue_capacity: 1024,
            exclude: vec![],
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Output directory for `daily_report_<YYYYMMDD>` files.  Relative paths
    /// resolve against `monitor.root`.
    pub dir: String,
    /// `txt` or `md`.
    pub extension: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: "daily_reports".to_string(),
            extension: "txt".to_string(),
        }
    }
}

// ── Schedule ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Daily full-scan trigger times, `HH:MM`.
    pub times: Vec<String>,
    /// `local` for the host clock, otherwise an IANA zone name such as
    /// `"Asia/Shanghai"`.
    pub timezone: String,
    /// How often the scheduler checks for a due trigger.
    pub poll_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            times: vec!["07:00".to_string(), "17:00".to_string()],
            timezone: "local".to_string(),
            poll_interval_ms: 1000,
        }
    }
}

impl ScheduleConfig {
    /// Parsed trigger times, sorted and de-duplicated.
    pub fn trigger_times(&self) -> Result<Vec<NaiveTime>> {
        let mut times = Vec::with_capacity(self.times.len());
        for raw in &self.times {
            let Ok(time) = NaiveTime::parse_from_str(raw.trim(), "%H:%M") else {
                bail!("invalid schedule time {raw:?} (expected HH:MM)");
            };
            times.push(time);
        }
        times.sort();
        times.dedup();
        Ok(times)
    }

    /// `None` means the host's local clock.
    pub fn zone(&self) -> Result<Option<Tz>> {
        let name = self.timezone.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("local") {
            return Ok(None);
        }
        match name.parse::<Tz>() {
            Ok(tz) => Ok(Some(tz)),
            Err(_) => bail!("unknown schedule timezone {name:?}"),
        }
    }
}

// ── Enrichment ────────────────────────────────────────────────────────────────

/// Where narrative text comes from when enrichment is enabled.
///
/// | Provider  | Behaviour                                                       |
/// |-----------|-----------------------------------------------------------------|
/// | `command` | Runs `command args.. <prompt>` and reads stdout.                |
/// | `http`    | POSTs `{"prompt": ..}` as JSON to `endpoint`.                   |
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentProvider {
    #[default]
    Command,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// When `false` every narrative is the deterministic fallback.
    pub enabled: bool,
    pub provider: EnrichmentProvider,
    pub command: String,
    pub args: Vec<String>,
    pub endpoint: String,
    /// Upper bound for a single enrichment call.
    pub timeout_secs: u64,
    /// Bytes of a created/modified file included in the event prompt.
    pub max_content_bytes: usize,
    /// Event prompt.  Placeholders: `{action}`, `{path}`, `{timestamp}`,
    /// `{content}`.
    pub event_template: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: EnrichmentProvider::Command,
            command: "qwen".to_string(),
            args: vec![],
            endpoint: "http://localhost:11434/api/report".to_string(),
            timeout_secs: 120,
            max_content_bytes: 4096,
            event_template: DEFAULT_EVENT_TEMPLATE.to_string(),
        }
    }
}

pub const DEFAULT_EVENT_TEMPLATE: &str = "\
Write one or two plain sentences for a daily activity report describing this file change.
Action: {action}
File: {path}
Time: {timestamp}
{content}
Output only the sentences.";

// ── Snapshot ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Commit the monitored tree to git after every full scan.  Requires
    /// `git` in `$PATH`; the repository is initialised on first use.
    pub git_enabled: bool,
}

// ── Server ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Directory for daily-rolling diagnostic logs.  Empty disables file
    /// output (stderr only).
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub report: ReportConfig,
    pub schedule: ScheduleConfig,
    pub enrichment: EnrichmentConfig,
    pub snapshot: SnapshotConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("DIRWATCH_MONITOR_DIR") {
            if !value.is_empty() {
                config.monitor.root = value;
            }
        }
        if let Ok(value) = env::var("DIRWATCH_REPORT_DIR") {
            if !value.is_empty() {
                config.report.dir = value;
            }
        }
        if let Ok(value) = env::var("DIRWATCH_PORT") {
            match value.trim().parse::<u16>() {
                Ok(port) => config.server.port = port,
                Err(_) if value.trim().is_empty() => {}
                Err(_) => bail!("DIRWATCH_PORT is not a valid port: {value:?}"),
            }
        }
        if let Ok(value) = env::var("DIRWATCH_SCAN_TIMES") {
            let times: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .collect();
            if !times.is_empty() {
                config.schedule.times = times;
            }
        }
        // Setting a command implies the operator wants it used.
        if let Ok(value) = env::var("DIRWATCH_ENRICH_COMMAND") {
            if !value.is_empty() {
                config.enrichment.command = value;
                config.enrichment.provider = EnrichmentProvider::Command;
                config.enrichment.enabled = true;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Reject settings that would only fail later, deep inside a task.
    pub fn validate(&self) -> Result<()> {
        self.schedule.trigger_times()?;
        self.schedule.zone()?;
        if self.monitor.queue_capacity == 0 {
            bail!("monitor.queue_capacity must be at least 1");
        }
        if self.schedule.poll_interval_ms == 0 {
            bail!("schedule.poll_interval_ms must be at least 1");
        }
        if !matches!(self.report.extension.as_str(), "txt" | "md") {
            bail!(
                "report.extension must be \"txt\" or \"md\", got {:?}",
                self.report.extension
            );
        }
        if self.enrichment.enabled {
            match self.enrichment.provider {
                EnrichmentProvider::Command if self.enrichment.command.trim().is_empty() => {
                    bail!("enrichment.command is empty")
                }
                EnrichmentProvider::Http if self.enrichment.endpoint.trim().is_empty() => {
                    bail!("enrichment.endpoint is empty")
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.monitor.root)
    }

    pub fn report_dir(&self) -> PathBuf {
        self.resolve(&self.report.dir)
    }

    pub fn change_log_path(&self) -> PathBuf {
        self.resolve(&self.monitor.change_log)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        let raw = self.telemetry.log_dir.trim();
        if raw.is_empty() { None } else { Some(self.resolve(raw)) }
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_path().join(path)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
