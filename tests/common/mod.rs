#![allow(dead_code)]

use docfinder::app::{ChangeNotifier, NoopNotifier, TriggerOutcome};
use docfinder::storage::preferences::Preferences;
use docfinder::{
    Config, ContentExtractor, DocFinder, Embedder, Error, JobState, Result, TextExtractor,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const VOCABULARY: &[&str] = &[
    "budget", "forecast", "holiday", "beach", "recipe", "pasta", "invoice", "meeting",
];

/// One dimension per vocabulary word, counting occurrences. Counts calls.
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    pub calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect();
    vector.push(0.01);
    vector
}

impl Embedder for BagOfWordsEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| bag_of_words(text)).collect())
    }
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Model("embedding service unavailable".to_string()))
    }
}

/// Blocks every call until `open` is called
#[derive(Default)]
pub struct GatedEmbedder {
    open: Mutex<bool>,
    changed: Condvar,
    pub entered: AtomicBool,
}

impl GatedEmbedder {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }
}

impl Embedder for GatedEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
        Ok(texts.iter().map(|text| bag_of_words(text)).collect())
    }
}

pub struct FailingExtractor;

impl ContentExtractor for FailingExtractor {
    fn extract(&self, _path: &Path) -> Result<String> {
        Err(Error::Parsing("unsupported format".to_string()))
    }
}

/// Counts how often watching was started
#[derive(Default)]
pub struct CountingNotifier {
    pub starts: AtomicUsize,
}

impl CountingNotifier {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl ChangeNotifier for CountingNotifier {
    fn start_watching(&self, _app: DocFinder) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A base directory and one document root inside a temp dir
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        let root = root.canonicalize().unwrap();
        let config = Config::new(Some(temp_dir.path().join("base")))
            .unwrap()
            .with_roots(vec![root.clone()]);
        Self {
            temp_dir,
            root,
            config,
        }
    }

    /// Persist preferences as if terms were accepted and a scan had run
    pub fn with_preferences(self, preferences: Preferences) -> Self {
        preferences.save(&self.config.state_path).unwrap();
        self
    }

    /// Write a file under the root and return its absolute path
    pub fn write(&self, relative: &str, content: &str) -> String {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.root.join(relative)).unwrap();
    }

    pub fn path(&self, relative: &str) -> String {
        self.root.join(relative).to_str().unwrap().to_string()
    }

    pub fn open(&self, embedder: Arc<dyn Embedder>) -> DocFinder {
        self.open_with(embedder, Arc::new(TextExtractor::default()), Arc::new(NoopNotifier))
    }

    pub fn open_with(
        &self,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn ContentExtractor>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> DocFinder {
        DocFinder::new(self.config.clone(), embedder, extractor, notifier).unwrap()
    }

    /// Paths recorded in the on-disk path sequence
    pub fn indexed_paths(&self) -> Vec<String> {
        let json = fs::read_to_string(self.config.paths_path()).unwrap();
        serde_json::from_str(&json).unwrap()
    }
}

/// Wait for a triggered full scan
pub fn wait(outcome: TriggerOutcome) -> JobState {
    match outcome {
        TriggerOutcome::Started(handle) => handle.wait(),
        TriggerOutcome::AlreadyIndexed => panic!("expected a job to start"),
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    condition()
}
