//! Self-trigger guard.
//!
//! The monitor writes its own artifacts (report files, the change log,
//! snapshot metadata) inside the tree it watches.  Every path is checked
//! here before it can produce a log line or report entry, and the
//! reconciler prunes the same directories from its walk.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    /// Root-relative; matched component-wise, so `daily_reports` covers
    /// everything below it but not `daily_reports_old`.
    excluded_dirs: Vec<PathBuf>,
    /// Root-relative, slash-separated; matched exactly or as a numbered
    /// rotation such as `file_changes.log.1`.
    excluded_files: Vec<String>,
}

impl PathGuard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded_dirs: Vec::new(),
            excluded_files: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Exclude a directory (or a single exact path).  Paths outside the root
    /// are ignored since they can never be observed.
    pub fn exclude_dir(mut self, path: impl AsRef<Path>) -> Self {
        if let Some(rel) = self.relative(path.as_ref()) {
            if !rel.as_os_str().is_empty() && !self.excluded_dirs.contains(&rel) {
                self.excluded_dirs.push(rel);
            }
        }
        self
    }

    /// Exclude a file and its numbered rotations.
    pub fn exclude_file(mut self, path: impl AsRef<Path>) -> Self {
        if let Some(rel) = self.relative(path.as_ref()) {
            let rel = to_slash(&rel);
            if !rel.is_empty() && !self.excluded_files.contains(&rel) {
                self.excluded_files.push(rel);
            }
        }
        self
    }

    /// Root-relative form of `path`.
    ///
    /// Relative inputs are taken as already relative to the root.  Absolute
    /// inputs are stripped of the root prefix; when that fails the path is
    /// canonicalised (or its parent, for paths that do not exist yet) and
    /// tried again.
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        if path.is_relative() {
            return Some(normalize(path));
        }
        if let Ok(rel) = path.strip_prefix(&self.root) {
            return Some(normalize(rel));
        }
        let resolved = resolve_existing(path)?;
        resolved.strip_prefix(&self.root).ok().map(normalize)
    }

    pub fn is_excluded(&self, rel: &Path) -> bool {
        if self.excluded_dirs.iter().any(|dir| rel.starts_with(dir)) {
            return true;
        }
        let slash = to_slash(rel);
        self.excluded_files.iter().any(|file| is_file_or_rotation(&slash, file))
    }

    /// Root-relative, slash-separated path for `path`, or `None` when it lies
    /// outside the root or is excluded.
    pub fn accept(&self, path: &Path) -> Option<String> {
        let rel = self.relative(path)?;
        if rel.as_os_str().is_empty() || self.is_excluded(&rel) {
            return None;
        }
        Some(to_slash(&rel))
    }
}

/// Slash-separated rendering used in logs, reports and scan inventories.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_file_or_rotation(path: &str, file: &str) -> bool {
    match path.strip_prefix(file) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('.')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn resolve_existing(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Some(canonical);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn guard() -> PathGuard {
        PathGuard::new("/srv/watched")
            .exclude_dir("daily_reports")
            .exclude_dir("/srv/watched/.git")
            .exclude_file("./file_changes.log")
    }

    #[test]
    fn accepts_regular_paths() {
        let g = guard();
        assert_eq!(
            g.accept(Path::new("/srv/watched/src/main.rs")).as_deref(),
            Some("src/main.rs")
        );
        assert_eq!(g.accept(Path::new("notes.md")).as_deref(), Some("notes.md"));
    }

    #[test]
    fn rejects_own_artifacts() {
        let g = guard();
        assert!(g.accept(Path::new("/srv/watched/daily_reports/daily_report_20251215.txt")).is_none());
        assert!(g.accept(Path::new("/srv/watched/.git/index")).is_none());
        assert!(g.accept(Path::new("/srv/watched/file_changes.log")).is_none());
        assert!(g.accept(Path::new("/srv/watched/file_changes.log.1")).is_none());
    }

    #[test]
    fn change_log_exclusion_is_exact() {
        let g = guard();
        assert!(g.accept(Path::new("/srv/watched/file_changes.log.12")).is_none());
        assert_eq!(
            g.accept(Path::new("/srv/watched/file_changes.logbook.md")).as_deref(),
            Some("file_changes.logbook.md")
        );
        assert_eq!(
            g.accept(Path::new("/srv/watched/file_changes.log_notes.txt")).as_deref(),
            Some("file_changes.log_notes.txt")
        );
        assert!(g.accept(Path::new("/srv/watched/file_changes.log.bak")).is_some());
        assert!(g.accept(Path::new("/srv/watched/file_changes.log.")).is_some());
    }

    #[test]
    fn directory_exclusion_is_component_wise() {
        let g = guard();
        assert_eq!(
            g.accept(Path::new("/srv/watched/daily_reports_old/a.txt")).as_deref(),
            Some("daily_reports_old/a.txt")
        );
    }

    #[test]
    fn outside_root_and_root_itself_are_rejected() {
        let g = guard();
        assert!(g.accept(Path::new("/srv/other/a.txt")).is_none());
        assert!(g.accept(Path::new("/srv/watched")).is_none());
    }

    #[test]
    fn exclusions_outside_root_are_ignored() {
        let g = PathGuard::new("/srv/watched").exclude_dir("/var/log/dirwatch");
        assert!(g.excluded_dirs.is_empty());
    }

    #[test]
    fn relative_resolves_symlinked_prefixes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let g = PathGuard::new(&root).exclude_dir(dir.path().join("reports"));
        assert!(g.is_excluded(Path::new("reports/daily_report_20251215.txt")));
    }

    #[test]
    fn to_slash_drops_cur_dir() {
        assert_eq!(to_slash(Path::new("./a/b.txt")), "a/b.txt");
    }
}
