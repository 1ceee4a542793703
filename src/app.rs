use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::indexing::extract::{ContentExtractor, TextExtractor};
use crate::indexing::scanner::count_matching;
use crate::jobs::runner::{self, JobContext};
use crate::jobs::state::{AlreadyRunning, JobKind, JobRun, JobState, JobTracker};
use crate::search::engine::{SearchEngine, SearchHit};
use crate::search::index_manager::{FlatIndexManager, VectorIndex};
use crate::search::model::{Embedder, LazyBertEmbedder};
use crate::storage::documents::DocumentStore;
use crate::storage::preferences::Preferences;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info, warn};

/// Starts the file-change watch. Called at most once per process, after the
/// first successful full scan or at startup when an index already exists.
pub trait ChangeNotifier: Send + Sync {
    fn start_watching(&self, app: DocFinder) -> Result<()>;
}

/// Notifier that never watches anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn start_watching(&self, _app: DocFinder) -> Result<()> {
        Ok(())
    }
}

/// Rejections and failures surfaced to callers of the request operations
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Terms not accepted")]
    TermsNotAccepted,

    #[error("No query provided")]
    EmptyQuery,

    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),

    #[error(transparent)]
    Internal(#[from] Error),
}

impl RequestError {
    /// Process exit code for the command line
    pub fn exit_code(&self) -> i32 {
        match self {
            RequestError::Internal(_) => 1,
            RequestError::EmptyQuery => 2,
            RequestError::TermsNotAccepted => 3,
            RequestError::AlreadyRunning(_) => 4,
        }
    }
}

/// A job running on its own thread
#[derive(Debug)]
pub struct JobHandle {
    kind: JobKind,
    handle: JoinHandle<()>,
    tracker: JobTracker,
}

impl JobHandle {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Block until the job ends and return the final state
    pub fn wait(self) -> JobState {
        if self.handle.join().is_err() {
            // The run guard has already recorded the failure.
            error!(kind = %self.kind, "Job thread panicked");
        }
        self.tracker.snapshot()
    }
}

/// What `trigger_full_scan_if_needed` did
#[derive(Debug)]
pub enum TriggerOutcome {
    Started(JobHandle),
    /// An index exists and this is not the first run; nothing was started
    AlreadyIndexed,
}

/// Everything a status query reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub terms_accepted: bool,
    pub first_time: bool,
    pub job: JobState,
    pub index_exists: bool,
}

/// The engine behind every request: owns the stores, the job tracker and the
/// persisted preferences. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DocFinder {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    store: Arc<DocumentStore>,
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn ContentExtractor>,
    engine: SearchEngine,
    tracker: JobTracker,
    preferences: Mutex<Preferences>,
    notifier: Arc<dyn ChangeNotifier>,
    watch_started: AtomicBool,
}

impl DocFinder {
    /// Open with the BERT embedder and the plain-text extractor
    pub fn open(config: Config, notifier: Arc<dyn ChangeNotifier>) -> Result<Self> {
        let embedder = Arc::new(LazyBertEmbedder::new(config.clone()));
        Self::new(config, embedder, Arc::new(TextExtractor::default()), notifier)
    }

    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn ContentExtractor>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Result<Self> {
        config.init()?;

        let store = Arc::new(DocumentStore::open(&config.documents_path())?);
        let index: Arc<dyn VectorIndex> =
            Arc::new(FlatIndexManager::from_config(&config, Arc::clone(&embedder)));
        let engine = SearchEngine::new(Arc::clone(&store), Arc::clone(&index), embedder);
        let preferences = Preferences::load(&config.state_path);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                index,
                extractor,
                engine,
                tracker: JobTracker::new(),
                preferences: Mutex::new(preferences),
                notifier,
                watch_started: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.inner.store
    }

    pub fn preferences(&self) -> Preferences {
        *self.lock_preferences()
    }

    pub fn index_exists(&self) -> bool {
        self.inner.index.exists()
    }

    /// Record acceptance of the terms, then scan if needed. When an index
    /// already exists the file watch starts instead.
    pub fn accept_terms(&self) -> std::result::Result<TriggerOutcome, RequestError> {
        self.update_preferences(|prefs| prefs.terms_accepted = true)?;
        info!("Terms accepted");

        let outcome = self.trigger_full_scan_if_needed()?;
        if matches!(outcome, TriggerOutcome::AlreadyIndexed) {
            self.start_watching();
        }
        Ok(outcome)
    }

    /// Start a full scan on first run or when the index artifacts are missing
    pub fn trigger_full_scan_if_needed(&self) -> std::result::Result<TriggerOutcome, RequestError> {
        let prefs = self.preferences();
        if !prefs.terms_accepted {
            return Err(RequestError::TermsNotAccepted);
        }
        if !prefs.first_time && self.index_exists() {
            return Ok(TriggerOutcome::AlreadyIndexed);
        }
        Ok(TriggerOutcome::Started(self.spawn_job(JobKind::FullScan)?))
    }

    /// Start an incremental rescan. Rejected while any job is running.
    pub fn trigger_smart_rescan(&self) -> std::result::Result<JobHandle, RequestError> {
        if !self.preferences().terms_accepted {
            return Err(RequestError::TermsNotAccepted);
        }
        self.spawn_job(JobKind::SmartRescan)
    }

    pub fn job_status(&self) -> StatusReport {
        let prefs = self.preferences();
        StatusReport {
            terms_accepted: prefs.terms_accepted,
            first_time: prefs.first_time,
            job: self.inner.tracker.snapshot(),
            index_exists: self.index_exists(),
        }
    }

    pub fn search(&self, query: &str, top_k: usize) -> std::result::Result<Vec<SearchHit>, RequestError> {
        if !self.preferences().terms_accepted {
            return Err(RequestError::TermsNotAccepted);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(RequestError::EmptyQuery);
        }
        Ok(self.inner.engine.search(query, top_k))
    }

    /// Process start: resume watching over an existing index, or run the
    /// full scan that has not happened yet. Does nothing without accepted terms.
    pub fn startup(&self) -> std::result::Result<Option<JobHandle>, RequestError> {
        if !self.preferences().terms_accepted {
            info!("Terms not accepted, not indexing");
            return Ok(None);
        }
        match self.trigger_full_scan_if_needed()? {
            TriggerOutcome::Started(handle) => Ok(Some(handle)),
            TriggerOutcome::AlreadyIndexed => {
                self.start_watching();
                Ok(None)
            }
        }
    }

    /// Start the change notifier unless it is already running
    pub fn start_watching(&self) {
        if self.inner.watch_started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting file watcher");
        if let Err(e) = self.inner.notifier.start_watching(self.clone()) {
            warn!(error = %e, "File watcher failed to start");
            self.inner.watch_started.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watch_started.load(Ordering::SeqCst)
    }

    /// Files the scan policy accepts under each configured root
    pub fn count_files(&self) -> Vec<(PathBuf, usize)> {
        self.inner
            .config
            .roots
            .iter()
            .map(|root| (root.clone(), count_matching(root, &self.inner.config.policy)))
            .collect()
    }

    fn spawn_job(&self, kind: JobKind) -> std::result::Result<JobHandle, RequestError> {
        // The compare-and-set happens here, on the caller's thread.
        let run = self.inner.tracker.begin(kind, runner::first_step(kind))?;
        let app = self.clone();
        let handle = thread::Builder::new()
            .name(format!("docfinder-{}", kind))
            .spawn(move || app.execute(run))
            .map_err(Error::Io)?;

        Ok(JobHandle {
            kind,
            handle,
            tracker: self.inner.tracker.clone(),
        })
    }

    fn execute(&self, run: JobRun) {
        let ctx = self.job_context();
        match run.kind() {
            JobKind::FullScan => {
                let result = runner::run_full_scan(&ctx, &run)
                    .and_then(|inserted| self.mark_scanned().map(|_| inserted));
                match result {
                    Ok(inserted) => {
                        run.complete(inserted);
                        self.start_watching();
                    }
                    Err(e) => {
                        error!(error = %e, "Full scan failed");
                        run.fail(e.to_string());
                    }
                }
            }
            JobKind::SmartRescan => match runner::run_smart_rescan(&ctx, &run) {
                Ok(indexed) => run.complete(indexed),
                Err(e) => {
                    error!(error = %e, "Smart rescan failed");
                    run.fail(e.to_string());
                }
            },
        }
    }

    fn job_context(&self) -> JobContext<'_> {
        JobContext {
            store: &self.inner.store,
            index: self.inner.index.as_ref(),
            extractor: self.inner.extractor.as_ref(),
            roots: &self.inner.config.roots,
            policy: &self.inner.config.policy,
        }
    }

    fn mark_scanned(&self) -> Result<()> {
        self.update_preferences(|prefs| prefs.first_time = false)
    }

    fn update_preferences(&self, change: impl FnOnce(&mut Preferences)) -> Result<()> {
        let mut prefs = self.lock_preferences();
        let mut updated = *prefs;
        change(&mut updated);
        updated.save(&self.inner.config.state_path)?;
        *prefs = updated;
        Ok(())
    }

    fn lock_preferences(&self) -> MutexGuard<'_, Preferences> {
        self.inner.preferences.lock().unwrap_or_else(|e| e.into_inner())
    }
}
