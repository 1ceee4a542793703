// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
}

// Persistent state
pub mod storage {
    pub mod documents;
    pub mod index;
    pub mod preferences;
}

// Filesystem crawling and change reconciliation
pub mod indexing {
    pub mod extract;
    pub mod reconcile;
    pub mod scanner;
}

// Embeddings & retrieval
pub mod search {
    pub mod engine;
    pub mod index_manager;
    pub mod model;
}

// Background jobs
pub mod jobs {
    pub mod runner;
    pub mod state;
}

pub mod app;

// User interfaces
pub mod ui {
    pub mod cli;
    pub mod watch;
}

// Re-export commonly used types
pub use app::{ChangeNotifier, DocFinder, JobHandle, RequestError, StatusReport, TriggerOutcome};
pub use core::config::Config;
pub use core::error::{Error, Result};
pub use indexing::extract::{ContentExtractor, TextExtractor};
pub use indexing::reconcile::{reconcile, ChangeSet};
pub use indexing::scanner::{scan, ScanPolicy};
pub use jobs::state::{JobKind, JobState, JobStatus, JobTracker};
pub use search::engine::{MatchSource, SearchEngine, SearchHit};
pub use search::index_manager::{FlatIndexManager, VectorIndex};
pub use search::model::{BertEmbedder, Embedder};
pub use storage::documents::{DocumentRecord, DocumentStore, Fingerprint};
pub use ui::watch::FileWatcher;
