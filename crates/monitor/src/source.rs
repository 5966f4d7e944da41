//! OS change notifications for the monitored tree.
//!
//! The watcher callback runs on notify's own thread.  It classifies raw
//! notifications into [`ChangeEvent`]s and hands them to the recorder over a
//! bounded channel with `try_send`, so a stalled pipeline can never block the
//! OS delivery thread.  A full queue drops the event and counts it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use dirwatch_core::{ChangeEvent, ChangeKind};

use crate::error::MonitorError;
use crate::stats::MonitorStats;

/// Live subscription to filesystem notifications.  Dropping it stops
/// delivery; once notify's thread releases the handler the channel closes.
pub struct EventSource {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl EventSource {
    /// Subscribe recursively to `root`.  Failure here is fatal for the
    /// monitor: without a subscription there is nothing to record.
    pub fn attach(
        root: &Path,
        tx: mpsc::Sender<ChangeEvent>,
        stats: Arc<MonitorStats>,
    ) -> Result<Self, MonitorError> {
        let watch_err = |source| MonitorError::Watch {
            root: root.to_path_buf(),
            source,
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for (kind, path) in classify(&event.kind, &event.paths) {
                    forward(&tx, &stats, ChangeEvent::new(kind, path));
                }
            }
            Err(err) => warn!(error = %err, "file watcher error"),
        })
        .map_err(watch_err)?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(watch_err)?;
        info!(root = %root.display(), "watching for file changes");

        Ok(Self {
            _watcher: watcher,
            root: root.to_path_buf(),
        })
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        debug!(root = %self.root.display(), "file watcher detached");
    }
}

fn forward(tx: &mpsc::Sender<ChangeEvent>, stats: &MonitorStats, event: ChangeEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            let total = stats.drop_event();
            warn!(
                path = %event.path.display(),
                action = event.kind.action(),
                dropped_total = total,
                "event queue full, dropping change event"
            );
        }
        // Receiver gone: the monitor is shutting down.
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Map one raw notification to zero or more file-level changes.
///
/// Directory events are suppressed wherever the kind or the filesystem tells
/// us the path is a directory.  Removed paths cannot be inspected, so a
/// removal without a folder hint is reported as a file deletion.  A rename is
/// reported through its halves: the old name as deleted, the new as created.
pub fn classify(kind: &EventKind, paths: &[PathBuf]) -> Vec<(ChangeKind, PathBuf)> {
    let files = |change: ChangeKind| -> Vec<(ChangeKind, PathBuf)> {
        paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| (change, p.clone()))
            .collect()
    };
    let all = |change: ChangeKind| -> Vec<(ChangeKind, PathBuf)> {
        paths.iter().map(|p| (change, p.clone())).collect()
    };

    match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => vec![],
        EventKind::Create(_) => files(ChangeKind::Created),
        EventKind::Remove(_) => all(ChangeKind::Deleted),

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => files(ChangeKind::Created),
        // Paired summary of a From/To the backend has already delivered.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => vec![],
        // Backends that cannot tell which side of a rename they saw.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .filter(|p| !p.is_dir())
            .map(|p| {
                let change = if p.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                (change, p.clone())
            })
            .collect(),

        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => vec![],
        EventKind::Modify(_) => files(ChangeKind::Modified),

        EventKind::Access(_) | EventKind::Any | EventKind::Other => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use notify::event::{AccessKind, DataChange};
    use tempfile::TempDir;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn basic_kinds() {
        let paths = [p("/nonexistent/a.txt")];
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File), &paths),
            vec![(ChangeKind::Created, p("/nonexistent/a.txt"))]
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), &paths),
            vec![(ChangeKind::Modified, p("/nonexistent/a.txt"))]
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File), &paths),
            vec![(ChangeKind::Deleted, p("/nonexistent/a.txt"))]
        );
    }

    #[test]
    fn access_and_atime_are_ignored() {
        let paths = [p("/nonexistent/a.txt")];
        assert!(classify(&EventKind::Access(AccessKind::Any), &paths).is_empty());
        assert!(
            classify(
                &EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
                &paths
            )
            .is_empty()
        );
    }

    #[test]
    fn rename_halves_map_to_delete_and_create() {
        let from = [p("/nonexistent/old.txt")];
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::From)), &from),
            vec![(ChangeKind::Deleted, p("/nonexistent/old.txt"))]
        );
        let to = [p("/nonexistent/new.txt")];
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::To)), &to),
            vec![(ChangeKind::Created, p("/nonexistent/new.txt"))]
        );
    }

    #[test]
    fn paired_rename_adds_nothing_to_its_halves() {
        let paths = [p("/nonexistent/old.txt"), p("/nonexistent/new.txt")];
        assert!(classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &paths).is_empty());
    }

    #[test]
    fn directory_events_are_suppressed() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let paths = [sub.clone()];
        assert!(classify(&EventKind::Create(CreateKind::Folder), &paths).is_empty());
        assert!(classify(&EventKind::Create(CreateKind::Any), &paths).is_empty());
        assert!(classify(&EventKind::Modify(ModifyKind::Any), &paths).is_empty());
        assert!(classify(&EventKind::Remove(RemoveKind::Folder), &paths).is_empty());
        assert!(classify(&EventKind::Modify(ModifyKind::Name(RenameMode::To)), &paths).is_empty());
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (tx, mut rx) = mpsc::channel(1);
        let stats = MonitorStats::default();
        forward(&tx, &stats, ChangeEvent::new(ChangeKind::Created, "a.txt"));
        forward(&tx, &stats, ChangeEvent::new(ChangeKind::Created, "b.txt"));
        assert_eq!(stats.snapshot().events_dropped, 1);
        assert_eq!(rx.try_recv().unwrap().path, p("a.txt"));
    }

    #[test]
    fn attach_to_missing_root_fails() {
        let (tx, _rx) = mpsc::channel(4);
        let err = EventSource::attach(
            Path::new("/nonexistent/dirwatch-root"),
            tx,
            Arc::new(MonitorStats::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, MonitorError::Watch { .. }));
    }

    #[tokio::test]
    async fn delivers_created_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _source = EventSource::attach(&root, tx, Arc::new(MonitorStats::default())).unwrap();

        std::fs::write(root.join("hello.txt"), "hi").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no event within 10s")
            .expect("channel closed");
        assert_eq!(event.kind, ChangeKind::Created);
        assert_eq!(event.path.file_name().unwrap(), "hello.txt");
    }

    #[tokio::test]
    async fn rename_delivers_one_delete_and_one_create() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("old.txt"), "x").unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _source = EventSource::attach(&root, tx, Arc::new(MonitorStats::default())).unwrap();

        std::fs::rename(root.join("old.txt"), root.join("new.txt")).unwrap();

        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        // Keep collecting briefly after the new name shows up so a trailing
        // duplicate would be caught.
        let mut quiet_until = None;
        loop {
            let until = quiet_until.unwrap_or(deadline);
            match tokio::time::timeout_at(until, rx.recv()).await {
                Ok(Some(event)) => {
                    if event.kind == ChangeKind::Created && event.path.ends_with("new.txt") {
                        quiet_until = Some(tokio::time::Instant::now() + Duration::from_millis(500));
                    }
                    seen.push((event.kind, event.path.file_name().unwrap().to_owned()));
                }
                Ok(None) | Err(_) => break,
            }
        }

        let count = |kind: ChangeKind, name: &str| {
            seen.iter().filter(|(k, n)| *k == kind && n.as_os_str() == name).count()
        };
        assert_eq!(count(ChangeKind::Deleted, "old.txt"), 1, "{seen:?}");
        assert_eq!(count(ChangeKind::Created, "new.txt"), 1, "{seen:?}");
    }
}
