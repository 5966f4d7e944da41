//! HTTP status/scan boundary.
//!
//! | Route     | Response                                               |
//! |-----------|--------------------------------------------------------|
//! | `/status` | liveness, monitored root, phase and counters           |
//! | `/scan`   | runs a full scan now and returns its result            |
//! | other     | 404 listing the available endpoints                    |

use std::future::Future;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use dirwatch_core::{format_timestamp, local_now};
use dirwatch_monitor::{Monitor, Phase};

pub const ENDPOINTS: [&str; 2] = ["/status", "/scan"];

pub fn router(monitor: Monitor) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/scan", get(scan).post(scan))
        .fallback(not_found)
        .with_state(monitor)
}

pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    Ok(TcpListener::bind((host, port)).await?)
}

/// Serve until `shutdown` resolves, letting in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    monitor: Monitor,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "http boundary listening");
    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("http boundary stopped");
    Ok(())
}

// ── Bodies ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    pub monitor_dir: String,
    pub timestamp: String,
    pub phase: Phase,
    pub started_at: String,
    pub uptime_secs: u64,
    pub events_recorded: u64,
    pub reports_written: u64,
    pub events_dropped: u64,
    pub scans_completed: u64,
    pub last_scan_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub summary: String,
    pub file_count: usize,
    pub details: String,
    pub skipped: usize,
    pub added: Option<usize>,
    pub removed: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ScanBody {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ScanReport>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct NotFoundBody {
    pub status: &'static str,
    pub message: String,
    pub available_endpoints: [&'static str; 2],
}

// ── Handlers ──────────────────────────────────────────────────────────────────

// GET /status
async fn status(State(monitor): State<Monitor>) -> (StatusCode, Json<StatusBody>) {
    let phase = monitor.phase();
    let stats = monitor.stats();
    let body = StatusBody {
        status: if phase == Phase::Watching { "running" } else { "idle" },
        monitor_dir: monitor.root().display().to_string(),
        timestamp: now(),
        phase,
        started_at: format_timestamp(&monitor.started_at().naive_local()),
        uptime_secs: monitor.uptime().as_secs(),
        events_recorded: stats.events_recorded,
        reports_written: stats.reports_written,
        events_dropped: stats.events_dropped,
        scans_completed: stats.scans_completed,
        last_scan_at: monitor.last_scan().map(|s| format_timestamp(&s.timestamp)),
    };
    (StatusCode::OK, Json(body))
}

// GET|POST /scan
async fn scan(State(monitor): State<Monitor>) -> (StatusCode, Json<ScanBody>) {
    match monitor.scan_now().await {
        Ok(result) => {
            let report = ScanReport {
                summary: result.summary(),
                file_count: result.file_count,
                details: result.narrative.clone(),
                skipped: result.skipped,
                added: result.delta.map(|d| d.added),
                removed: result.delta.map(|d| d.removed),
            };
            let body = ScanBody {
                status: "success",
                message: "Full scan completed".to_string(),
                report: Some(report),
                timestamp: now(),
            };
            (StatusCode::OK, Json(body))
        }
        Err(err) => {
            warn!(error = %err, "on-demand scan failed");
            let body = ScanBody {
                status: "error",
                message: format!("Scan failed: {err}"),
                report: None,
                timestamp: now(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
    }
}

async fn not_found(uri: Uri) -> (StatusCode, Json<NotFoundBody>) {
    let body = NotFoundBody {
        status: "error",
        message: format!("Endpoint {} not found", uri.path()),
        available_endpoints: ENDPOINTS,
    };
    (StatusCode::NOT_FOUND, Json(body))
}

fn now() -> String {
    format_timestamp(&local_now())
}
