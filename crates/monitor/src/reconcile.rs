//! Full-tree reconciliation.
//!
//! Counts regular files under the root, pruning the directories the guard
//! excludes.  Unreadable entries are skipped and counted; a scan never fails
//! on them.  The inventory of the previous scan is kept so the narrative can
//! report how many files appeared or vanished in between.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;
use walkdir::WalkDir;

use dirwatch_core::{ScanDelta, ScanResult, local_now};

use crate::guard::{PathGuard, to_slash};

pub struct Reconciler {
    guard: PathGuard,
    previous: Mutex<Option<BTreeSet<String>>>,
}

/// Files found by one walk plus the number of entries that could not be read.
#[derive(Debug, Default)]
pub struct Inventory {
    pub files: BTreeSet<String>,
    pub skipped: usize,
}

impl Reconciler {
    pub fn new(guard: PathGuard) -> Self {
        Self {
            guard,
            previous: Mutex::new(None),
        }
    }

    /// Blocking; run on a blocking thread from async code.
    pub fn scan(&self) -> ScanResult {
        let timestamp = local_now();
        let Inventory { files, skipped } = self.inventory();

        let mut previous = self.previous.lock().unwrap_or_else(|e| e.into_inner());
        let delta = previous.as_ref().map(|before| ScanDelta {
            added: files.difference(before).count(),
            removed: before.difference(&files).count(),
        });
        let file_count = files.len();
        *previous = Some(files);

        ScanResult {
            timestamp,
            file_count,
            skipped,
            delta,
            narrative: narrate(file_count, skipped, delta),
        }
    }

    pub fn inventory(&self) -> Inventory {
        let root = self.guard.root();
        let mut inventory = Inventory::default();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !(entry.file_type().is_dir() && self.excluded(root, entry.path())));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    inventory.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            if self.guard.is_excluded(rel) {
                continue;
            }
            inventory.files.insert(to_slash(rel));
        }
        inventory
    }

    fn excluded(&self, root: &Path, path: &Path) -> bool {
        path.strip_prefix(root)
            .map(|rel| self.guard.is_excluded(rel))
            .unwrap_or(false)
    }
}

/// "Detected 12 files (2 added, 1 removed since last scan)"
pub fn narrate(file_count: usize, skipped: usize, delta: Option<ScanDelta>) -> String {
    let noun = if file_count == 1 { "file" } else { "files" };
    let mut text = format!("Detected {file_count} {noun}");
    if let Some(delta) = delta {
        text.push_str(&format!(
            " ({} added, {} removed since last scan)",
            delta.added, delta.removed
        ));
    }
    if skipped > 0 {
        text.push_str(&format!("; {skipped} unreadable entries skipped"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn reconciler(dir: &TempDir) -> Reconciler {
        let guard = PathGuard::new(dir.path())
            .exclude_dir("daily_reports")
            .exclude_file("file_changes.log");
        Reconciler::new(guard)
    }

    #[test]
    fn empty_root_counts_zero() {
        let dir = TempDir::new().unwrap();
        let scan = reconciler(&dir).scan();
        assert_eq!(scan.file_count, 0);
        assert_eq!(scan.skipped, 0);
        assert!(scan.delta.is_none());
        assert_eq!(scan.narrative, "Detected 0 files");
    }

    #[test]
    fn counts_nested_files_and_skips_own_artifacts() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join("daily_reports")).unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("src/b.rs"), "b").unwrap();
        fs::write(dir.path().join("src/nested/c.md"), "c").unwrap();
        fs::write(dir.path().join("daily_reports/daily_report_20251215.txt"), "r").unwrap();
        fs::write(dir.path().join("file_changes.log"), "l").unwrap();
        fs::write(dir.path().join("file_changes.log.1"), "l").unwrap();
        fs::write(dir.path().join("file_changes.logbook.md"), "mine").unwrap();

        let r = reconciler(&dir);
        let inventory = r.inventory();
        assert_eq!(
            inventory.files.into_iter().collect::<Vec<_>>(),
            ["a.txt", "file_changes.logbook.md", "src/b.rs", "src/nested/c.md"]
        );
        assert_eq!(r.scan().file_count, 4);
    }

    #[test]
    fn repeated_scans_are_idempotent_and_report_delta() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let r = reconciler(&dir);

        assert_eq!(r.scan().file_count, 2);
        let again = r.scan();
        assert_eq!(again.file_count, 2);
        assert_eq!(again.delta, Some(ScanDelta { added: 0, removed: 0 }));

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        fs::write(dir.path().join("c.txt"), "c").unwrap();
        fs::write(dir.path().join("d.txt"), "d").unwrap();
        let changed = r.scan();
        assert_eq!(changed.file_count, 3);
        assert_eq!(changed.delta, Some(ScanDelta { added: 2, removed: 1 }));
        assert_eq!(changed.narrative, "Detected 3 files (2 added, 1 removed since last scan)");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_counted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling")).unwrap();
        assert_eq!(reconciler(&dir).scan().file_count, 1);
    }

    #[test]
    fn narrative_mentions_skipped_entries() {
        assert_eq!(narrate(1, 2, None), "Detected 1 file; 2 unreadable entries skipped");
    }
}
