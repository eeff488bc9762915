//! File and directory overlap detection between concurrent branches.
//!
//! Each active thread registers the repo-relative files its branch touches.
//! Detection walks every unordered pair of threads in sorted-id order so the
//! result is stable regardless of registration order: identical files are
//! high-severity overlaps; overlapping directories (one containing or equal
//! to the other) are medium-severity, unless a file overlap already sits
//! inside that directory for the pair.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Kind of collision between two branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapKind {
    /// Both branches touch the same file.
    File,
    /// Both branches touch the same directory.
    Directory,
    /// Caller-supplied correlation (not produced by this detector).
    Semantic,
}

/// How risky the collision is for a later merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Merge will almost certainly conflict.
    High,
    /// Merge may conflict.
    Medium,
    /// Informational.
    Low,
}

/// A pair-wise collision between two registered threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    /// Kind of collision.
    pub kind: OverlapKind,
    /// First thread (lower sorted id).
    pub thread_a: String,
    /// Second thread.
    pub thread_b: String,
    /// Branch of the first thread.
    pub branch_a: String,
    /// Branch of the second thread.
    pub branch_b: String,
    /// The colliding path.
    pub path: String,
    /// Merge risk.
    pub severity: Severity,
    /// Human-readable explanation.
    pub detail: String,
}

/// The files a thread's branch touches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadFiles {
    /// Thread identifier.
    pub thread_id: String,
    /// Branch name.
    pub branch: String,
    /// Cleaned repo-relative paths.
    pub files: BTreeSet<String>,
}

/// Merge-order suggestion for one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSlot {
    /// Thread identifier.
    pub thread: String,
    /// Branch name.
    pub branch: String,
    /// Number of files the branch touches.
    pub file_count: usize,
    /// 1-based merge priority (smaller branches merge first).
    pub priority: usize,
    /// Whether an earlier-priority thread overlaps this one.
    pub needs_rebase: bool,
}

/// Normalize a repo-relative path: forward slashes, no `.` segments, no
/// trailing separator.
#[must_use]
pub fn clean_path(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(raw.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().unwrap_or_default()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.join("/")
}

/// Parent directory of a cleaned path, when non-trivial.
fn parent_dir(path: &str) -> Option<String> {
    path.rsplit_once('/').map(|(dir, _)| dir.to_owned())
}

fn is_within(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Registry of per-thread file sets with pair-wise overlap detection.
#[derive(Debug, Default)]
pub struct ConflictDetector {
    threads: RwLock<BTreeMap<String, ThreadFiles>>,
}

impl ConflictDetector {
    /// Create an empty detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread's branch and files, replacing any prior entry.
    pub fn register(&self, thread_id: &str, branch: &str, files: &[String]) {
        let cleaned = files
            .iter()
            .map(|f| clean_path(f))
            .filter(|f| !f.is_empty())
            .collect();
        self.threads.write().insert(
            thread_id.to_owned(),
            ThreadFiles {
                thread_id: thread_id.to_owned(),
                branch: branch.to_owned(),
                files: cleaned,
            },
        );
    }

    /// Replace a registered thread's file list.
    pub fn update_files(&self, thread_id: &str, files: &[String]) {
        let mut threads = self.threads.write();
        if let Some(entry) = threads.get_mut(thread_id) {
            entry.files = files
                .iter()
                .map(|f| clean_path(f))
                .filter(|f| !f.is_empty())
                .collect();
        }
    }

    /// Remove a thread (its branch was merged or abandoned).
    pub fn unregister(&self, thread_id: &str) {
        self.threads.write().remove(thread_id);
    }

    /// Number of registered threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    /// True when no threads are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }

    /// Compute all overlaps across registered threads.
    ///
    /// Output order is deterministic: pairs in sorted-thread-id order, file
    /// overlaps before directory overlaps, paths sorted within each group.
    #[must_use]
    pub fn detect_overlaps(&self) -> Vec<Overlap> {
        let threads = self.threads.read();
        let ids: Vec<&String> = threads.keys().collect();
        let mut overlaps = Vec::new();

        for (i, id_a) in ids.iter().enumerate() {
            for id_b in &ids[i + 1..] {
                let a = &threads[*id_a];
                let b = &threads[*id_b];
                Self::pair_overlaps(a, b, &mut overlaps);
            }
        }
        overlaps
    }

    fn pair_overlaps(a: &ThreadFiles, b: &ThreadFiles, out: &mut Vec<Overlap>) {
        let file_hits: Vec<&String> = a.files.intersection(&b.files).collect();
        for path in &file_hits {
            out.push(Overlap {
                kind: OverlapKind::File,
                thread_a: a.thread_id.clone(),
                thread_b: b.thread_id.clone(),
                branch_a: a.branch.clone(),
                branch_b: b.branch.clone(),
                path: (*path).clone(),
                severity: Severity::High,
                detail: format!(
                    "both '{}' and '{}' modify {}",
                    a.branch, b.branch, path
                ),
            });
        }

        let dirs_a: BTreeSet<String> = a.files.iter().filter_map(|f| parent_dir(f)).collect();
        let dirs_b: BTreeSet<String> = b.files.iter().filter_map(|f| parent_dir(f)).collect();

        // A directory collides when one side's parent dir equals or contains
        // the other's; the deeper path names the collision.
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for da in &dirs_a {
            for db in &dirs_b {
                if da == db {
                    candidates.insert(da.clone());
                } else if is_within(db, da) {
                    candidates.insert(db.clone());
                } else if is_within(da, db) {
                    candidates.insert(da.clone());
                }
            }
        }

        for dir in candidates {
            let covered = file_hits
                .iter()
                .any(|path| is_within(path, &dir) || parent_dir(path).as_deref() == Some(&dir));
            if covered {
                continue;
            }
            out.push(Overlap {
                kind: OverlapKind::Directory,
                thread_a: a.thread_id.clone(),
                thread_b: b.thread_id.clone(),
                branch_a: a.branch.clone(),
                branch_b: b.branch.clone(),
                path: dir.clone(),
                severity: Severity::Medium,
                detail: format!(
                    "'{}' and '{}' both work under {}/",
                    a.branch, b.branch, dir
                ),
            });
        }
    }

    /// Propose a merge order: fewest files first. A thread needs a rebase
    /// when any earlier-priority thread overlaps with it.
    #[must_use]
    pub fn suggest_merge_order(&self) -> Vec<MergeSlot> {
        let threads = self.threads.read();
        let mut entries: Vec<&ThreadFiles> = threads.values().collect();
        entries.sort_by(|x, y| {
            x.files
                .len()
                .cmp(&y.files.len())
                .then_with(|| x.thread_id.cmp(&y.thread_id))
        });

        let mut slots = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let needs_rebase = entries[..idx].iter().any(|earlier| {
                let mut scratch = Vec::new();
                // Pair order does not matter for existence.
                Self::pair_overlaps(earlier, entry, &mut scratch);
                !scratch.is_empty()
            });
            slots.push(MergeSlot {
                thread: entry.thread_id.clone(),
                branch: entry.branch.clone(),
                file_count: entry.files.len(),
                priority: idx + 1,
                needs_rebase,
            });
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_cleaned() {
        assert_eq!(clean_path("./src/util.rs"), "src/util.rs");
        assert_eq!(clean_path("src/auth/"), "src/auth");
        assert_eq!(clean_path("src/../lib.rs"), "lib.rs");
        assert_eq!(clean_path("/src/main.rs"), "src/main.rs");
    }

    fn detector_ab() -> ConflictDetector {
        let detector = ConflictDetector::new();
        detector.register(
            "thread-a",
            "feat-auth",
            &["src/auth/handler.go".into(), "src/util.go".into()],
        );
        detector.register(
            "thread-b",
            "feat-logging",
            &["src/auth/handler.go".into(), "src/util/logger.go".into()],
        );
        detector
    }

    #[test]
    fn file_and_directory_overlaps() {
        let overlaps = detector_ab().detect_overlaps();

        let files: Vec<&Overlap> = overlaps
            .iter()
            .filter(|o| o.kind == OverlapKind::File)
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/auth/handler.go");
        assert_eq!(files[0].severity, Severity::High);

        let dirs: Vec<&Overlap> = overlaps
            .iter()
            .filter(|o| o.kind == OverlapKind::Directory)
            .collect();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].path, "src/util");
        assert_eq!(dirs[0].severity, Severity::Medium);
    }

    #[test]
    fn stable_under_registration_order() {
        let detector = ConflictDetector::new();
        detector.register(
            "thread-b",
            "feat-logging",
            &["src/auth/handler.go".into(), "src/util/logger.go".into()],
        );
        detector.register(
            "thread-a",
            "feat-auth",
            &["src/auth/handler.go".into(), "src/util.go".into()],
        );
        assert_eq!(detector.detect_overlaps(), detector_ab().detect_overlaps());
    }

    #[test]
    fn disjoint_threads_have_no_overlaps() {
        let detector = ConflictDetector::new();
        detector.register("a", "one", &["docs/readme.md".into()]);
        detector.register("b", "two", &["src/lib.rs".into()]);
        assert!(detector.detect_overlaps().is_empty());
    }

    #[test]
    fn unregister_removes_thread() {
        let detector = detector_ab();
        detector.unregister("thread-b");
        assert_eq!(detector.len(), 1);
        assert!(detector.detect_overlaps().is_empty());
    }

    #[test]
    fn merge_order_smallest_first_with_rebase_flags() {
        let detector = ConflictDetector::new();
        detector.register("big", "feat-big", &[
            "src/a.rs".into(),
            "src/b.rs".into(),
            "src/c.rs".into(),
        ]);
        detector.register("small", "feat-small", &["src/a.rs".into()]);
        detector.register("lone", "feat-lone", &["docs/x.md".into(), "docs/y.md".into()]);

        let order = detector.suggest_merge_order();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].thread, "small");
        assert_eq!(order[0].priority, 1);
        assert!(!order[0].needs_rebase);
        assert_eq!(order[1].thread, "lone");
        assert!(!order[1].needs_rebase);
        assert_eq!(order[2].thread, "big");
        assert!(order[2].needs_rebase);
    }

    #[test]
    fn update_files_changes_detection() {
        let detector = detector_ab();
        detector.update_files("thread-b", &["README.md".into()]);
        assert!(detector.detect_overlaps().is_empty());
    }
}
