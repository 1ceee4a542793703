use crate::indexing::extract::{extract_or_filename, ContentExtractor, Extraction};
use crate::storage::documents::{file_extension, DocumentRecord, Fingerprint};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Extensions indexed by default
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "docx", "xlsx", "xls", "db", "js", "py", "java", "cpp", "c", "jpg", "jpeg",
    "png", "bmp", "webp", "md", "markdown",
];

/// Path segments excluded by default (case-insensitive substring match)
pub const DEFAULT_EXCLUDED: &[&str] = &[
    "windows",
    "program files",
    "programdata",
    ".git",
    ".venv",
    "appdata",
    "system volume information",
    "$recycle.bin",
    "node_modules",
    "__pycache__",
    ".idea",
    ".vscode",
    "site-packages",
    "lib",
    "dist",
    "build",
    ".mypy_cache",
];

/// Inclusion (extension allow-list) and exclusion (path-segment deny-list) rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPolicy {
    extensions: BTreeSet<String>,
    excluded: Vec<String>,
}

impl ScanPolicy {
    /// Build a policy. Extensions may be given with or without the leading dot;
    /// both lists are matched case-insensitively.
    pub fn new<E, X>(extensions: E, excluded: X) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        X: IntoIterator,
        X::Item: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            excluded: excluded
                .into_iter()
                .map(|segment| segment.as_ref().to_lowercase())
                .filter(|segment| !segment.is_empty())
                .collect(),
        }
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    /// True if the file's extension is on the allow-list
    pub fn allows_extension(&self, path: &Path) -> bool {
        self.extensions.contains(&file_extension(path))
    }

    /// True if any component of `relative` contains a deny-listed segment
    pub fn is_excluded(&self, relative: &Path) -> bool {
        relative.components().any(|component| match component {
            Component::Normal(segment) => {
                let segment = segment.to_string_lossy().to_lowercase();
                self.excluded.iter().any(|ex| segment.contains(ex.as_str()))
            }
            _ => false,
        })
    }

    /// Full inclusion check for a path found under `root`
    pub fn allows(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.allows_extension(path) && !self.is_excluded(relative)
    }

    /// Inclusion check against whichever configured root contains the path
    pub fn allows_under(&self, roots: &[PathBuf], path: &Path) -> bool {
        roots
            .iter()
            .filter(|root| path.starts_with(root))
            .any(|root| self.allows(root, path))
    }
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS, DEFAULT_EXCLUDED)
    }
}

/// Why a file was left out of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A configured root does not exist or cannot be resolved
    MissingRoot,
    /// The file disappeared between discovery and reading
    Vanished,
    /// Permission denied or another I/O failure
    Unreadable(String),
    /// Paths are stored as UTF-8 strings
    NonUtf8Path,
}

/// A file left out of a scan. For walker errors that carry no path, `path`
/// is the root being walked.
#[derive(Debug, Clone)]
pub struct Skipped {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// A file whose content could not be extracted and was indexed by filename
#[derive(Debug, Clone)]
pub struct Degraded {
    pub path: String,
    pub reason: String,
}

/// Result of reading a single file
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    Indexed(DocumentRecord),
    Degraded(DocumentRecord, Degraded),
    Skipped(Skipped),
}

/// Fingerprints of every matching file, without reading content
#[derive(Debug, Default)]
pub struct WalkReport {
    pub files: HashMap<String, Fingerprint>,
    pub skipped: Vec<Skipped>,
}

/// Full scan output: records with content, plus what was skipped or degraded
#[derive(Debug, Default)]
pub struct ScanReport {
    pub records: BTreeMap<String, DocumentRecord>,
    pub skipped: Vec<Skipped>,
    pub degraded: Vec<Degraded>,
}

impl ScanReport {
    fn absorb(&mut self, outcome: ReadOutcome) {
        match outcome {
            ReadOutcome::Indexed(record) => {
                self.records.insert(record.path.clone(), record);
            }
            ReadOutcome::Degraded(record, degraded) => {
                self.records.insert(record.path.clone(), record);
                self.degraded.push(degraded);
            }
            ReadOutcome::Skipped(skipped) => self.skipped.push(skipped),
        }
    }
}

/// Walk every root and fingerprint the files the policy accepts.
/// Deny-listed directories are pruned; unreadable entries are skipped.
pub fn walk(roots: &[PathBuf], policy: &ScanPolicy) -> WalkReport {
    let mut report = WalkReport::default();

    for root in roots {
        let root = match root.canonicalize() {
            Ok(root) => root,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping missing root");
                report.skipped.push(Skipped {
                    path: root.clone(),
                    reason: SkipReason::MissingRoot,
                });
                continue;
            }
        };

        let filter_policy = policy.clone();
        let filter_root = root.clone();
        let walker = WalkBuilder::new(&root)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !filter_policy.is_excluded(
                        entry.path().strip_prefix(&filter_root).unwrap_or(entry.path()),
                    )
            })
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(root = %root.display(), error = %err, "Skipping unreadable entry");
                    report.skipped.push(Skipped {
                        path: root.clone(),
                        reason: SkipReason::Unreadable(err.to_string()),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            if !policy.allows_extension(path) {
                continue;
            }

            let Some(path_str) = path.to_str() else {
                report.skipped.push(Skipped {
                    path: path.to_path_buf(),
                    reason: SkipReason::NonUtf8Path,
                });
                continue;
            };

            match Fingerprint::of(path) {
                Ok(fingerprint) => {
                    report.files.insert(path_str.to_string(), fingerprint);
                }
                Err(e) => report.skipped.push(Skipped {
                    path: path.to_path_buf(),
                    reason: if e.is_not_found() {
                        SkipReason::Vanished
                    } else {
                        SkipReason::Unreadable(e.to_string())
                    },
                }),
            }
        }
    }

    report
}

/// Stat and extract one file. Extraction failures degrade to the filename;
/// stat failures skip the file.
pub fn read_document(path: &Path, extractor: &dyn ContentExtractor) -> ReadOutcome {
    let Some(path_str) = path.to_str() else {
        return ReadOutcome::Skipped(Skipped {
            path: path.to_path_buf(),
            reason: SkipReason::NonUtf8Path,
        });
    };

    let fingerprint = match Fingerprint::of(path) {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
            let reason = if e.is_not_found() {
                SkipReason::Vanished
            } else {
                SkipReason::Unreadable(e.to_string())
            };
            return ReadOutcome::Skipped(Skipped {
                path: path.to_path_buf(),
                reason,
            });
        }
    };

    match extract_or_filename(extractor, path) {
        Extraction::Text(text) => {
            ReadOutcome::Indexed(DocumentRecord::new(path_str, fingerprint, text))
        }
        Extraction::Fallback { text, reason } => {
            warn!(path = %path.display(), reason = %reason, "Indexed by filename only");
            ReadOutcome::Degraded(
                DocumentRecord::new(path_str, fingerprint, text),
                Degraded {
                    path: path_str.to_string(),
                    reason,
                },
            )
        }
    }
}

/// Read and extract a set of paths in parallel
pub fn read_documents<'a, I>(paths: I, extractor: &dyn ContentExtractor) -> ScanReport
where
    I: IntoIterator<Item = &'a String>,
{
    let paths: Vec<&String> = paths.into_iter().collect();
    let outcomes: Vec<ReadOutcome> = paths
        .par_iter()
        .map(|path| read_document(Path::new(path.as_str()), extractor))
        .collect();

    let mut report = ScanReport::default();
    for outcome in outcomes {
        report.absorb(outcome);
    }
    report
}

/// Walk the roots and produce a record, with content, for every matching file
pub fn scan(roots: &[PathBuf], policy: &ScanPolicy, extractor: &dyn ContentExtractor) -> ScanReport {
    let walked = walk(roots, policy);
    let mut report = read_documents(walked.files.keys(), extractor);
    report.skipped.extend(walked.skipped);
    report
}

/// Number of files under `root` the policy accepts
pub fn count_matching(root: &Path, policy: &ScanPolicy) -> usize {
    walk(&[root.to_path_buf()], policy).files.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::extract::TextExtractor;
    use std::fs;
    use tempfile::TempDir;

    fn test_policy() -> ScanPolicy {
        ScanPolicy::new(["txt", ".md", "PDF"], ["node_modules", ".git", "Build"])
    }

    fn canonical(dir: &TempDir) -> PathBuf {
        dir.path().canonicalize().unwrap()
    }

    #[test]
    fn test_policy_extensions() {
        let policy = test_policy();
        assert!(policy.allows_extension(Path::new("a.txt")));
        assert!(policy.allows_extension(Path::new("a.MD")));
        assert!(policy.allows_extension(Path::new("a.pdf")));
        assert!(!policy.allows_extension(Path::new("a.js")));
        assert!(!policy.allows_extension(Path::new("Makefile")));
    }

    #[test]
    fn test_policy_exclusion_is_case_insensitive_substring() {
        let policy = test_policy();
        assert!(policy.is_excluded(Path::new("project/Node_Modules/pkg/readme.txt")));
        assert!(policy.is_excluded(Path::new("rebuilding/notes.txt")));
        assert!(policy.is_excluded(Path::new("repo/.GIT/config.txt")));
        assert!(!policy.is_excluded(Path::new("docs/notes.txt")));
    }

    #[test]
    fn test_policy_allows_under_root_only_checks_relative_part() {
        let policy = test_policy();
        let root = PathBuf::from("/home/build-user");
        assert!(policy.allows(&root, Path::new("/home/build-user/docs/a.txt")));
        assert!(!policy.allows(&root, Path::new("/home/build-user/build/a.txt")));
        assert!(policy.allows_under(&[root.clone()], Path::new("/home/build-user/a.md")));
        assert!(!policy.allows_under(&[root], Path::new("/elsewhere/a.md")));
    }

    #[test]
    fn test_walk_applies_allow_and_deny_lists() {
        let temp_dir = TempDir::new().unwrap();
        let root = canonical(&temp_dir);

        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("MyBuild")).unwrap();
        fs::write(root.join("docs/a.txt"), "a").unwrap();
        fs::write(root.join("docs/deep/b.md"), "b").unwrap();
        fs::write(root.join("docs/c.js"), "c").unwrap();
        fs::write(root.join("node_modules/pkg/readme.txt"), "x").unwrap();
        fs::write(root.join("MyBuild/out.txt"), "x").unwrap();

        let report = walk(&[root.clone()], &test_policy());
        let mut paths: Vec<&String> = report.files.keys().collect();
        paths.sort();

        assert_eq!(
            paths,
            vec![
                root.join("docs/a.txt").to_str().unwrap(),
                root.join("docs/deep/b.md").to_str().unwrap(),
            ]
        );
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_walk_records_fingerprints() {
        let temp_dir = TempDir::new().unwrap();
        let root = canonical(&temp_dir);
        fs::write(root.join("a.txt"), "hello").unwrap();

        let report = walk(&[root.clone()], &test_policy());
        let fingerprint = report.files[root.join("a.txt").to_str().unwrap()];
        assert_eq!(fingerprint.size, 5);
    }

    #[test]
    fn test_walk_missing_root_is_skipped() {
        let report = walk(&[PathBuf::from("/nonexistent/root")], &test_policy());
        assert!(report.files.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::MissingRoot);
    }

    #[test]
    fn test_walk_overlapping_roots_do_not_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let root = canonical(&temp_dir);
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/a.txt"), "a").unwrap();

        let report = walk(&[root.clone(), root.join("sub")], &test_policy());
        assert_eq!(report.files.len(), 1);
    }

    #[test]
    fn test_scan_extracts_content_and_degrades() {
        let temp_dir = TempDir::new().unwrap();
        let root = canonical(&temp_dir);
        fs::write(root.join("notes.txt"), "meeting minutes").unwrap();
        fs::write(root.join("scan.pdf"), b"%PDF").unwrap();

        let report = scan(&[root.clone()], &test_policy(), &TextExtractor::default());
        assert_eq!(report.records.len(), 2);

        let notes = &report.records[root.join("notes.txt").to_str().unwrap()];
        assert_eq!(notes.content, "meeting minutes");
        assert_eq!(notes.extension, "txt");

        let pdf = &report.records[root.join("scan.pdf").to_str().unwrap()];
        assert_eq!(pdf.content, "scan.pdf");
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].path, pdf.path);
    }

    #[test]
    fn test_read_document_vanished() {
        let outcome = read_document(Path::new("/nonexistent/file.txt"), &TextExtractor::default());
        match outcome {
            ReadOutcome::Skipped(skipped) => assert_eq!(skipped.reason, SkipReason::Vanished),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_count_matching() {
        let temp_dir = TempDir::new().unwrap();
        let root = canonical(&temp_dir);
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("b.md"), "b").unwrap();
        fs::write(root.join(".git/c.txt"), "c").unwrap();

        assert_eq!(count_matching(&root, &test_policy()), 2);
    }
}
