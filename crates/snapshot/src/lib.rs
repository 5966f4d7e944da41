//! Version-control snapshots of the monitored tree.
//!
//! All operations shell out to `git` and are best-effort: when `git` is not
//! installed the calls return `Ok(..)` without doing anything.  Only genuine
//! I/O failures are surfaced as `Err`.
//!
//! # Snapshot lifecycle
//!
//! When `[snapshot] git_enabled = true`:
//! 1. The monitor calls [`SnapshotSink::snapshot`] after every full scan.
//! 2. [`GitSnapshot`] initialises a repository at the root on first use,
//!    stages everything and commits only when something is staged.
//! 3. `dirwatch history <path>` reads the per-file log back with
//!    [`file_history`]; `--diff [COMMIT]` shows what one snapshot changed in
//!    that file via [`file_diff`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

const AUTHOR_NAME: &str = "dirwatch";
const AUTHOR_EMAIL: &str = "dirwatch@localhost";

/// Longest detail carried into a commit subject.
const MAX_DETAIL: usize = 72;

/// Receives a notification after the tree has been reconciled.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Record the current tree.  Returns the short commit id when a snapshot
    /// was actually taken.
    async fn snapshot(&self, detail: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct GitSnapshot {
    root: PathBuf,
}

impl GitSnapshot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SnapshotSink for GitSnapshot {
    async fn snapshot(&self, detail: &str) -> Result<Option<String>> {
        init_if_needed(&self.root).await?;
        commit_all(&self.root, detail).await
    }
}

// ── init_if_needed ────────────────────────────────────────────────────────────

/// Initialises a git repository at `root` unless one already exists.
///
/// Returns `true` when a new repository was created.
pub async fn init_if_needed(root: &Path) -> Result<bool> {
    if root.join(".git").exists() {
        return Ok(false);
    }

    let out = tokio::process::Command::new("git")
        .args(["init"])
        .current_dir(root)
        .output()
        .await;

    match out {
        Ok(o) if o.status.success() => {
            info!(root = %root.display(), "initialised git repository for snapshots");
            Ok(true)
        }
        Ok(o) => {
            let stderr = String::from_utf8_lossy(&o.stderr);
            warn!(%stderr, "git init failed (non-fatal)");
            Ok(false)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// ── commit_all ────────────────────────────────────────────────────────────────

/// Stages everything under `root` and commits it.  Returns `Ok(None)`
/// without committing when `git` is missing, `root` is not a repository, or
/// nothing changed.
pub async fn commit_all(root: &Path, detail: &str) -> Result<Option<String>> {
    if !root.join(".git").exists() {
        return Ok(None);
    }

    let add = git(root, &["add", "-A"]).await;
    match add {
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
        Ok(o) if !o.status.success() => {
            warn!(
                stderr = %String::from_utf8_lossy(&o.stderr),
                "git add -A failed (non-fatal)"
            );
            return Ok(None);
        }
        Ok(_) => {}
    }

    // `git diff --cached --quiet` exits 0 when nothing is staged.
    let staged = tokio::process::Command::new("git")
        .args(["diff", "--cached", "--quiet"])
        .current_dir(root)
        .status()
        .await?;
    if staged.success() {
        return Ok(None);
    }

    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let msg = format!("dirwatch snapshot at {stamp}: {}", truncate(detail, MAX_DETAIL));

    let commit = tokio::process::Command::new("git")
        .args(["commit", "-q", "-m", &msg, "--no-verify"])
        .env("GIT_AUTHOR_NAME", AUTHOR_NAME)
        .env("GIT_AUTHOR_EMAIL", AUTHOR_EMAIL)
        .env("GIT_COMMITTER_NAME", AUTHOR_NAME)
        .env("GIT_COMMITTER_EMAIL", AUTHOR_EMAIL)
        .current_dir(root)
        .output()
        .await?;
    if !commit.status.success() {
        let stderr = String::from_utf8_lossy(&commit.stderr);
        warn!(%stderr, "git commit failed (non-fatal)");
        return Ok(None);
    }

    let head = git(root, &["rev-parse", "--short", "HEAD"]).await?;
    let id = String::from_utf8_lossy(&head.stdout).trim().to_string();
    info!(commit = %id, message = %msg, "snapshot committed");
    Ok(Some(id))
}

// ── file_history ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub date: String,
}

/// Most recent `limit` commits touching `path` (relative to `root`), newest
/// first.  Empty when `root` is not a repository or `git` is missing.
pub async fn file_history(root: &Path, path: &str, limit: usize) -> Result<Vec<CommitInfo>> {
    if !root.join(".git").exists() {
        return Ok(vec![]);
    }
    let limit = format!("-n{}", limit.max(1));
    let out = git(
        root,
        &[
            "log",
            &limit,
            "--date=format:%Y-%m-%d %H:%M:%S",
            "--format=%h%x1f%s%x1f%an%x1f%ad",
            "--",
            path,
        ],
    )
    .await;
    let out = match out {
        Ok(o) => o,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };
    if !out.status.success() {
        // Typically "does not have any commits yet".
        return Ok(vec![]);
    }

    let stdout = String::from_utf8_lossy(&out.stdout);
    Ok(stdout.lines().filter_map(parse_log_line).collect())
}

// ── file_diff ─────────────────────────────────────────────────────────────────

/// Patch for `path` between `commit` (default `HEAD`) and its parent.
///
/// Empty when `root` is not a repository, `git` is missing, the commit is
/// unknown or has no parent.
pub async fn file_diff(root: &Path, path: &str, commit: Option<&str>) -> Result<String> {
    if !root.join(".git").exists() {
        return Ok(String::new());
    }
    let commit = commit.unwrap_or("HEAD");
    let parent = format!("{commit}^");
    let out = match git(root, &["diff", &parent, commit, "--", path]).await {
        Ok(o) => o,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e.into()),
    };
    if !out.status.success() {
        warn!(
            commit,
            path,
            stderr = %String::from_utf8_lossy(&out.stderr).trim(),
            "git diff failed (non-fatal)"
        );
        return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

fn parse_log_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.split('\u{1f}');
    Some(CommitInfo {
        hash: parts.next()?.to_string(),
        message: parts.next()?.to_string(),
        author: parts.next()?.to_string(),
        date: parts.next()?.to_string(),
    })
}

async fn git(root: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
    tokio::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
}

/// Cut `text` to at most `limit` bytes on a char boundary.
fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn git_available() -> bool {
        tokio::process::Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 72), "short");
        assert_eq!(truncate("日报日报", 4), "日");
        assert_eq!(truncate("abcdef", 3), "abc");
    }

    #[test]
    fn parse_log_line_splits_fields() {
        let line = "abc1234\u{1f}dirwatch snapshot\u{1f}dirwatch\u{1f}2025-12-15 17:00:00";
        let info = parse_log_line(line).unwrap();
        assert_eq!(info.hash, "abc1234");
        assert_eq!(info.message, "dirwatch snapshot");
        assert_eq!(info.author, "dirwatch");
        assert_eq!(info.date, "2025-12-15 17:00:00");
        assert!(parse_log_line("only-one-field").is_none());
    }

    #[tokio::test]
    async fn commit_all_outside_repo_is_noop() {
        let dir = TempDir::new().unwrap();
        assert_eq!(commit_all(dir.path(), "x").await.unwrap(), None);
        assert!(file_history(dir.path(), "a.txt", 5).await.unwrap().is_empty());
        assert!(file_diff(dir.path(), "a.txt", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_commits_only_when_tree_changes() {
        if !git_available().await {
            return;
        }
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();

        let sink = GitSnapshot::new(dir.path());
        let first = sink.snapshot("scan: 1 file").await.unwrap();
        assert!(first.is_some(), "first snapshot should commit");

        let unchanged = sink.snapshot("scan: 1 file").await.unwrap();
        assert!(unchanged.is_none(), "nothing staged, nothing committed");

        std::fs::write(dir.path().join("a.txt"), "two").unwrap();
        assert!(sink.snapshot("scan: 1 file").await.unwrap().is_some());

        let history = file_history(dir.path(), "a.txt", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].author, AUTHOR_NAME);
        assert!(history[0].message.starts_with("dirwatch snapshot at "));

        let latest = file_diff(dir.path(), "a.txt", None).await.unwrap();
        assert!(latest.contains("-one"), "{latest}");
        assert!(latest.contains("+two"), "{latest}");

        let by_hash = file_diff(dir.path(), "a.txt", Some(&history[0].hash)).await.unwrap();
        assert_eq!(by_hash, latest);

        // The root snapshot has no parent to compare against.
        let root_commit = file_diff(dir.path(), "a.txt", Some(&history[1].hash)).await.unwrap();
        assert!(root_commit.is_empty());
        assert!(file_diff(dir.path(), "a.txt", Some("deadbeef")).await.unwrap().is_empty());
    }
}
