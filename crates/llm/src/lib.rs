//! Narrative enrichment backends.
//!
//! An [`Enricher`] turns a prompt into free text within a caller-supplied
//! time bound.  Callers own the fallback: every error variant here is
//! expected to be recovered locally with a deterministic narrative.

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use dirwatch_config::{EnrichmentConfig, EnrichmentProvider};

/// Cap on captured stdout; narrative output beyond this is discarded.
const MAX_OUTPUT_BYTES: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment disabled")]
    Disabled,
    #[error("enrichment backend unavailable: {0}")]
    Unavailable(String),
    #[error("enrichment timed out after {0:?}")]
    Timeout(Duration),
    #[error("enrichment command exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("enrichment request failed: {0}")]
    Http(String),
    #[error("enrichment returned no text")]
    Empty,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Short label for log lines.
    fn name(&self) -> &str;

    /// `false` when [`Enricher::generate`] can never succeed, letting callers
    /// skip prompt construction entirely.
    fn available(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, EnrichmentError>;
}

/// Build the enricher described by `[enrichment]`.
pub fn from_config(config: &EnrichmentConfig) -> Arc<dyn Enricher> {
    if !config.enabled {
        return Arc::new(DisabledEnricher);
    }
    match config.provider {
        EnrichmentProvider::Command => Arc::new(
            CommandEnricher::new(&config.command).with_args(config.args.iter().cloned()),
        ),
        EnrichmentProvider::Http => Arc::new(HttpEnricher::new(&config.endpoint)),
    }
}

// ── Disabled ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEnricher;

#[async_trait]
impl Enricher for DisabledEnricher {
    fn name(&self) -> &str {
        "disabled"
    }

    fn available(&self) -> bool {
        false
    }

    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, EnrichmentError> {
        Err(EnrichmentError::Disabled)
    }
}

// ── External command ──────────────────────────────────────────────────────────

/// Runs `program args.. <prompt>` and returns trimmed stdout.
///
/// The child is killed when the timeout elapses.
#[derive(Debug, Clone)]
pub struct CommandEnricher {
    program: String,
    args: Vec<String>,
}

impl CommandEnricher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Run `program --version` to check the tool is installed and working.
    pub async fn probe(&self, timeout: Duration) -> Result<String, EnrichmentError> {
        self.run(&["--version".to_string()], timeout).await
    }

    async fn run(&self, tail: &[String], timeout: Duration) -> Result<String, EnrichmentError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .args(tail)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| EnrichmentError::Timeout(timeout))?
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    EnrichmentError::Unavailable(format!("{} not found in PATH", self.program))
                }
                _ => EnrichmentError::Unavailable(format!("{}: {err}", self.program)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EnrichmentError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }

        let stdout = &output.stdout[..output.stdout.len().min(MAX_OUTPUT_BYTES)];
        let text = String::from_utf8_lossy(stdout).trim().to_string();
        if text.is_empty() {
            return Err(EnrichmentError::Empty);
        }
        Ok(text)
    }
}

#[async_trait]
impl Enricher for CommandEnricher {
    fn name(&self) -> &str {
        &self.program
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, EnrichmentError> {
        debug!(program = %self.program, prompt_len = prompt.len(), "running enrichment command");
        self.run(&[prompt.to_string()], timeout).await
    }
}

// ── HTTP endpoint ─────────────────────────────────────────────────────────────

/// POSTs `{"prompt": .., "stream": false}` to an endpoint and extracts the
/// narrative from the JSON (or plain-text) response.
#[derive(Debug, Clone)]
pub struct HttpEnricher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEnricher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, EnrichmentError> {
        let payload = json!({ "prompt": prompt, "stream": false });
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| classify_http_error(err, timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| classify_http_error(err, timeout))?;
        if !status.is_success() {
            return Err(EnrichmentError::Http(format!("{status}: {}", body.trim())));
        }
        extract_text(&body).ok_or(EnrichmentError::Empty)
    }
}

fn classify_http_error(err: reqwest::Error, timeout: Duration) -> EnrichmentError {
    if err.is_timeout() {
        EnrichmentError::Timeout(timeout)
    } else if err.is_connect() {
        EnrichmentError::Unavailable(err.to_string())
    } else {
        EnrichmentError::Http(err.to_string())
    }
}

/// Pull narrative text out of a response body.
///
/// Accepts `{"response"}` (Ollama style), `{"text"}`, `{"details"}` and
/// `{"summary", "details"}`; a non-JSON body is taken verbatim.
fn extract_text(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Some(trimmed.to_string());
    };
    if let Some(text) = value.as_str() {
        return non_empty(text);
    }
    for key in ["response", "text", "content"] {
        if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
            return non_empty(text);
        }
    }
    let summary = value.get("summary").and_then(|v| v.as_str()).unwrap_or("");
    let details = value.get("details").and_then(|v| v.as_str()).unwrap_or("");
    non_empty(&format!("{summary} {details}"))
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_enricher_always_errors() {
        let err = DisabledEnricher
            .generate("anything", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Disabled));
        assert!(!DisabledEnricher.available());
        assert!(CommandEnricher::new("qwen").available());
    }

    #[test]
    fn from_config_respects_enabled_flag() {
        let cfg = EnrichmentConfig::default();
        assert_eq!(from_config(&cfg).name(), "disabled");

        let cfg = EnrichmentConfig {
            enabled: true,
            command: "my-tool".to_string(),
            ..Default::default()
        };
        assert_eq!(from_config(&cfg).name(), "my-tool");

        let cfg = EnrichmentConfig {
            enabled: true,
            provider: EnrichmentProvider::Http,
            endpoint: "http://127.0.0.1:1/report".to_string(),
            ..Default::default()
        };
        assert_eq!(from_config(&cfg).name(), "http://127.0.0.1:1/report");
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let enricher = CommandEnricher::new("dirwatch-no-such-tool-4f2a");
        let err = enricher
            .generate("prompt", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Unavailable(_)), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_is_passed_as_last_argument() {
        let enricher = CommandEnricher::new("sh").with_args([
            "-c".to_string(),
            "printf 'narrative for: %s' \"$1\"".to_string(),
            "dirwatch".to_string(),
        ]);
        let text = enricher
            .generate("a.txt created", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, "narrative for: a.txt created");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let enricher = CommandEnricher::new("sh").with_args([
            "-c".to_string(),
            "echo boom >&2; exit 3".to_string(),
            "dirwatch".to_string(),
        ]);
        let err = enricher
            .generate("x", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            EnrichmentError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let enricher = CommandEnricher::new("sh").with_args([
            "-c".to_string(),
            "sleep 5".to_string(),
            "dirwatch".to_string(),
        ]);
        let started = std::time::Instant::now();
        let err = enricher
            .generate("x", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn blank_output_is_empty_error() {
        let enricher = CommandEnricher::new("sh").with_args([
            "-c".to_string(),
            "echo '   '".to_string(),
            "dirwatch".to_string(),
        ]);
        let err = enricher
            .generate("x", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::Empty));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        // Grab a free port, then release it so nothing is listening there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let enricher = HttpEnricher::new(format!("http://127.0.0.1:{port}/report"));
        let err = enricher
            .generate("x", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(
            matches!(err, EnrichmentError::Unavailable(_) | EnrichmentError::Http(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn extract_text_accepts_common_shapes() {
        assert_eq!(extract_text(r#"{"response": " hi "}"#).as_deref(), Some("hi"));
        assert_eq!(extract_text(r#"{"text": "hello"}"#).as_deref(), Some("hello"));
        assert_eq!(
            extract_text(r#"{"summary": "s", "details": "d"}"#).as_deref(),
            Some("s d")
        );
        assert_eq!(extract_text("plain words").as_deref(), Some("plain words"));
        assert_eq!(extract_text(r#""quoted""#).as_deref(), Some("quoted"));
        assert_eq!(extract_text(r#"{"other": 1}"#), None);
        assert_eq!(extract_text("   "), None);
    }
}
