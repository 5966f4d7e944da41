//! Append-only, human-readable record of every accepted change event.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use dirwatch_core::ChangeKind;

/// One line per event:
/// `2025-12-15 17:13:01,123 - INFO - CREATED: src/a.txt`.
pub struct ChangeLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ChangeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, kind: ChangeKind, rel: &str, at: &DateTime<Local>) -> std::io::Result<()> {
        let line = format_line(kind, rel, at);
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub fn format_line(kind: ChangeKind, rel: &str, at: &DateTime<Local>) -> String {
    format!(
        "{} - INFO - {}: {}\n",
        at.format("%Y-%m-%d %H:%M:%S,%3f"),
        kind.action(),
        rel
    )
}
