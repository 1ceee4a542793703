use crate::core::error::Result;
use crate::indexing::extract::ContentExtractor;
use crate::indexing::scanner::{read_documents, walk, Degraded, ScanPolicy, SkipReason, Skipped};
use crate::storage::documents::{DocumentStore, Fingerprint};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Difference between the store's fingerprints and the filesystem's.
/// The three sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    pub fn compute(
        stored: &HashMap<String, Fingerprint>,
        current: &HashMap<String, Fingerprint>,
    ) -> Self {
        let mut changes = Self::default();

        for (path, fingerprint) in current {
            match stored.get(path) {
                None => {
                    changes.added.insert(path.clone());
                }
                Some(previous) if previous != fingerprint => {
                    changes.modified.insert(path.clone());
                }
                Some(_) => {}
            }
        }

        changes.deleted = stored
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths whose content must be read again: added, then modified
    pub fn to_refresh(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }

    pub fn refresh_count(&self) -> usize {
        self.added.len() + self.modified.len()
    }
}

/// What a reconciliation changed in the store
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub changes: ChangeSet,
    /// Records removed, including paths that vanished before they could be read
    pub deleted: usize,
    /// Records created or replaced
    pub upserted: usize,
    pub skipped: Vec<Skipped>,
    pub degraded: Vec<Degraded>,
}

/// Bring the store in line with the filesystem under `roots`.
///
/// Deletes are applied before anything is re-read. Added and modified paths
/// are extracted again and upserted; extraction failures degrade to the
/// filename and never abort the run. Store failures do.
///
/// `progress` receives a label as each step starts.
pub fn reconcile(
    store: &DocumentStore,
    roots: &[PathBuf],
    policy: &ScanPolicy,
    extractor: &dyn ContentExtractor,
    mut progress: impl FnMut(String),
) -> Result<ReconcileReport> {
    progress("compute-changes".to_string());
    let stored = store.all_fingerprints()?;
    let walked = walk(roots, policy);
    let changes = ChangeSet::compute(&stored, &walked.files);
    debug!(
        added = changes.added.len(),
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        "Computed changes"
    );

    let mut report = ReconcileReport {
        skipped: walked.skipped,
        ..Default::default()
    };

    progress(format!("apply-deletes({})", changes.deleted.len()));
    for path in &changes.deleted {
        if store.delete(path)? {
            report.deleted += 1;
        }
    }

    progress(format!("build-docs({})", changes.refresh_count()));
    let scanned = read_documents(changes.to_refresh(), extractor);

    progress("update-store".to_string());
    report.upserted = store.insert_all(scanned.records.values())?;

    for skipped in scanned.skipped {
        if skipped.reason == SkipReason::Vanished {
            // Gone between the walk and the read: treat as deleted.
            if let Some(path) = skipped.path.to_str() {
                if store.delete(path)? {
                    report.deleted += 1;
                }
            }
        } else {
            warn!(path = %skipped.path.display(), reason = ?skipped.reason, "Skipped during rescan");
        }
        report.skipped.push(skipped);
    }
    report.degraded = scanned.degraded;

    info!(
        deleted = report.deleted,
        upserted = report.upserted,
        skipped = report.skipped.len(),
        degraded = report.degraded.len(),
        "Reconciled document store"
    );

    report.changes = changes;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::indexing::extract::TextExtractor;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn fp(size: u64, modified: u64) -> Fingerprint {
        Fingerprint { size, modified }
    }

    fn map(entries: &[(&str, Fingerprint)]) -> HashMap<String, Fingerprint> {
        entries.iter().map(|(p, f)| (p.to_string(), *f)).collect()
    }

    fn set<S: AsRef<str>>(paths: &[S]) -> BTreeSet<String> {
        paths.iter().map(|p| p.as_ref().to_string()).collect()
    }

    struct Fixture {
        _temp_dir: TempDir,
        root: PathBuf,
        store: DocumentStore,
        policy: ScanPolicy,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().join("docs");
            fs::create_dir_all(&root).unwrap();
            let root = root.canonicalize().unwrap();
            let store = DocumentStore::open(&temp_dir.path().join("documents.redb")).unwrap();
            Self {
                _temp_dir: temp_dir,
                root,
                store,
                policy: ScanPolicy::new(["txt", "md", "pdf"], ["node_modules"]),
            }
        }

        fn path(&self, name: &str) -> String {
            self.root.join(name).to_str().unwrap().to_string()
        }

        fn run(&self, extractor: &dyn ContentExtractor) -> ReconcileReport {
            reconcile(&self.store, &[self.root.clone()], &self.policy, extractor, |_| {}).unwrap()
        }

        fn stored_paths(&self) -> BTreeSet<String> {
            self.store.all_fingerprints().unwrap().into_keys().collect()
        }
    }

    struct FailingExtractor;

    impl ContentExtractor for FailingExtractor {
        fn extract(&self, _path: &Path) -> Result<String> {
            Err(Error::Parsing("corrupt file".to_string()))
        }
    }

    #[test]
    fn test_compute_changes_partitions_paths() {
        let stored = map(&[
            ("/same.txt", fp(1, 1)),
            ("/changed.txt", fp(1, 1)),
            ("/touched.txt", fp(1, 1)),
            ("/gone.txt", fp(1, 1)),
        ]);
        let current = map(&[
            ("/same.txt", fp(1, 1)),
            ("/changed.txt", fp(2, 1)),
            ("/touched.txt", fp(1, 2)),
            ("/new.txt", fp(1, 1)),
        ]);

        let changes = ChangeSet::compute(&stored, &current);
        assert_eq!(changes.added, set(&["/new.txt"]));
        assert_eq!(changes.modified, set(&["/changed.txt", "/touched.txt"]));
        assert_eq!(changes.deleted, set(&["/gone.txt"]));
        assert_eq!(changes.refresh_count(), 3);
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_compute_changes_identical_snapshots() {
        let snapshot = map(&[("/a.txt", fp(1, 1))]);
        assert!(ChangeSet::compute(&snapshot, &snapshot).is_empty());
        assert!(ChangeSet::compute(&HashMap::new(), &HashMap::new()).is_empty());
    }

    #[test]
    fn test_reconcile_adds_modifies_and_deletes() {
        let f = Fixture::new();
        fs::write(f.root.join("keep.txt"), "unchanged").unwrap();
        fs::write(f.root.join("edit.txt"), "short").unwrap();
        fs::write(f.root.join("drop.md"), "# bye").unwrap();

        let first = f.run(&TextExtractor::default());
        assert_eq!(first.upserted, 3);
        assert_eq!(first.changes.added.len(), 3);

        fs::write(f.root.join("edit.txt"), "considerably longer text").unwrap();
        fs::remove_file(f.root.join("drop.md")).unwrap();
        fs::write(f.root.join("new.txt"), "fresh").unwrap();

        let second = f.run(&TextExtractor::default());
        assert_eq!(second.changes.added, set(&[&f.path("new.txt")]));
        assert_eq!(second.changes.modified, set(&[&f.path("edit.txt")]));
        assert_eq!(second.changes.deleted, set(&[&f.path("drop.md")]));
        assert_eq!(second.deleted, 1);
        assert_eq!(second.upserted, 2);

        assert_eq!(
            f.stored_paths(),
            set(&[&f.path("keep.txt"), &f.path("edit.txt"), &f.path("new.txt")])
        );
        let edited = f.store.get(&f.path("edit.txt")).unwrap().unwrap();
        assert_eq!(edited.content, "considerably longer text");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let f = Fixture::new();
        fs::write(f.root.join("a.txt"), "alpha").unwrap();
        f.run(&TextExtractor::default());

        let again = f.run(&TextExtractor::default());
        assert!(again.changes.is_empty());
        assert_eq!(again.upserted, 0);
        assert_eq!(again.deleted, 0);
    }

    #[test]
    fn test_reconcile_respects_exclusions() {
        let f = Fixture::new();
        fs::create_dir_all(f.root.join("node_modules/pkg")).unwrap();
        fs::write(f.root.join("node_modules/pkg/readme.txt"), "x").unwrap();
        fs::write(f.root.join("script.js"), "x").unwrap();
        fs::write(f.root.join("a.txt"), "a").unwrap();

        f.run(&TextExtractor::default());
        assert_eq!(f.stored_paths(), set(&[&f.path("a.txt")]));
    }

    #[test]
    fn test_extraction_failure_degrades_without_aborting() {
        let f = Fixture::new();
        fs::write(f.root.join("a.txt"), "alpha").unwrap();
        fs::write(f.root.join("b.txt"), "beta").unwrap();

        let report = f.run(&FailingExtractor);
        assert_eq!(report.upserted, 2);
        assert_eq!(report.degraded.len(), 2);
        assert_eq!(f.store.get(&f.path("a.txt")).unwrap().unwrap().content, "a.txt");
    }

    #[test]
    fn test_missing_root_deletes_its_records() {
        let f = Fixture::new();
        fs::write(f.root.join("a.txt"), "alpha").unwrap();
        f.run(&TextExtractor::default());

        fs::remove_dir_all(&f.root).unwrap();
        let report = f.run(&TextExtractor::default());
        assert_eq!(report.deleted, 1);
        assert!(f.stored_paths().is_empty());
        assert_eq!(report.skipped[0].reason, SkipReason::MissingRoot);
    }

    #[test]
    fn test_progress_steps_in_order() {
        let f = Fixture::new();
        fs::write(f.root.join("a.txt"), "alpha").unwrap();

        let mut steps = Vec::new();
        reconcile(
            &f.store,
            &[f.root.clone()],
            &f.policy,
            &TextExtractor::default(),
            |step| steps.push(step),
        )
        .unwrap();

        assert_eq!(
            steps,
            vec!["compute-changes", "apply-deletes(0)", "build-docs(1)", "update-store"]
        );
    }

    #[test]
    fn test_file_vanishing_before_read_is_deleted() {
        let f = Fixture::new();
        fs::write(f.root.join("keep.txt"), "stays").unwrap();
        fs::write(f.root.join("gone.txt"), "one").unwrap();
        f.run(&TextExtractor::default());

        fs::write(f.root.join("gone.txt"), "one two three").unwrap();
        let gone = f.root.join("gone.txt");
        let report = reconcile(
            &f.store,
            &[f.root.clone()],
            &f.policy,
            &TextExtractor::default(),
            |step| {
                // Runs after the walk, before anything is read.
                if step.starts_with("build-docs") {
                    fs::remove_file(&gone).unwrap();
                }
            },
        )
        .unwrap();

        assert_eq!(report.changes.modified, set(&[f.path("gone.txt")]));
        assert_eq!(report.deleted, 1);
        assert_eq!(report.upserted, 0);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.path == gone && s.reason == SkipReason::Vanished));
        assert_eq!(f.stored_paths(), set(&[f.path("keep.txt")]));
    }
}
