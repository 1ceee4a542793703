use crate::core::error::{Error, Result};
use crate::search::index_manager::VectorIndex;
use crate::search::model::Embedder;
use crate::storage::documents::{file_extension, file_name, get_file_modified_time, DocumentStore};
use crate::storage::index::normalize_l2;
use chrono::{Local, TimeZone};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Results returned when the caller does not ask for a count
pub const DEFAULT_TOP_K: usize = 5;

/// Display format of modification times, e.g. `07-Mar-2024 14:05`
pub const MODIFIED_FORMAT: &str = "%d-%b-%Y %H:%M";

/// Which tier produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchSource {
    #[serde(rename = "filename match")]
    Filename,
    #[serde(rename = "semantic match")]
    Semantic,
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSource::Filename => write!(f, "filename match"),
            MatchSource::Semantic => write!(f, "semantic match"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub filename: String,
    pub path: String,
    /// Human-readable modification time; empty when unknown
    pub modified: String,
    pub extension: String,
    pub source: MatchSource,
}

/// Two-tier search: filename substring against the metadata store first,
/// nearest neighbours against the vector index only when that finds nothing.
pub struct SearchEngine {
    store: Arc<DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
        }
    }

    /// Never fails: a failing tier contributes no results.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Vec::new();
        }

        match self.filename_tier(query, top_k) {
            Ok(hits) if !hits.is_empty() => return hits,
            Ok(_) => {}
            Err(e) => warn!(query, error = %e, "Filename match failed"),
        }

        match self.semantic_tier(query, top_k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(query, error = %e, "Semantic search failed");
                Vec::new()
            }
        }
    }

    fn filename_tier(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let records = self.store.filename_matches(&query.to_lowercase(), top_k)?;
        debug!(query, matches = records.len(), "Filename tier");

        Ok(records
            .into_iter()
            .map(|record| SearchHit {
                modified: format_modified(record.modified),
                filename: record.filename,
                path: record.path,
                extension: record.extension,
                source: MatchSource::Filename,
            })
            .collect())
    }

    fn semantic_tier(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let mut vector = self
            .embedder
            .embed(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Model("Embedder returned no vector for query".to_string()))?;
        normalize_l2(&mut vector);

        let hits = self.index.query(&vector, top_k)?;
        debug!(query, matches = hits.len(), "Semantic tier");

        Ok(hits
            .into_iter()
            .map(|hit| {
                let path = Path::new(&hit.path);
                // Live mtime; the file may have changed or vanished since indexing.
                let modified = get_file_modified_time(path)
                    .map(format_modified)
                    .unwrap_or_default();
                SearchHit {
                    filename: file_name(path),
                    extension: file_extension(path),
                    modified,
                    path: hit.path,
                    source: MatchSource::Semantic,
                }
            })
            .collect())
    }
}

/// Format a millisecond timestamp in local time
pub fn format_modified(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(|millis| Local.timestamp_millis_opt(millis).earliest())
        .map(|time| time.format(MODIFIED_FORMAT).to_string())
        .unwrap_or_default()
}
