use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::search::model::Embedder;
use crate::storage::documents::file_name;
use crate::storage::index::{artifacts_exist, normalize_l2, FlatIndex};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Documents sent to the embedder per call
pub const EMBED_BATCH_SIZE: usize = 32;

/// A nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub ordinal: usize,
    pub path: String,
    pub score: f32,
}

/// Whole-corpus vector index. Callers only rebuild and query, so an index that
/// supports incremental deletes can replace the flat one without touching them.
pub trait VectorIndex: Send + Sync {
    /// Replace the index with one built from exactly `documents` (path -> text).
    /// Returns the number of entries.
    fn rebuild(&self, documents: &BTreeMap<String, String>) -> Result<usize>;

    /// Top-`k` nearest neighbours of an already-normalized query vector
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>>;

    /// True when a built index is available
    fn exists(&self) -> bool;

    /// Number of entries in the current index
    fn len(&self) -> Result<usize>;

    /// Paths of the current index, `None` when there is none. Errors when
    /// the persisted artifacts cannot be read back.
    fn indexed_paths(&self) -> Result<Option<BTreeSet<String>>>;
}

/// Builds the flat index with an embedder and keeps it on disk
pub struct FlatIndexManager {
    embedder: Arc<dyn Embedder>,
    index_path: PathBuf,
    paths_path: PathBuf,
    current: RwLock<Option<Arc<FlatIndex>>>,
}

impl FlatIndexManager {
    pub fn new(embedder: Arc<dyn Embedder>, index_path: PathBuf, paths_path: PathBuf) -> Self {
        Self {
            embedder,
            index_path,
            paths_path,
            current: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(embedder, config.index_path(), config.paths_path())
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn paths_path(&self) -> &Path {
        &self.paths_path
    }

    /// Embed and normalize a batch of texts, checking the embedder's output shape
    pub fn embed_normalized(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = self.embedder.embed(texts)?;
        if vectors.len() != texts.len() {
            return Err(Error::Model(format!(
                "Embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in vectors.iter_mut() {
            normalize_l2(vector);
        }
        Ok(vectors)
    }

    /// Current index, loading it from disk on first use
    fn current(&self) -> Result<Option<Arc<FlatIndex>>> {
        if let Some(index) = self.read_current() {
            return Ok(Some(index));
        }
        if !artifacts_exist(&self.index_path, &self.paths_path) {
            return Ok(None);
        }

        let loaded = Arc::new(FlatIndex::load(&self.index_path, &self.paths_path)?);
        debug!(entries = loaded.len(), "Loaded vector index from disk");
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        Ok(Some(Arc::clone(guard.get_or_insert(loaded))))
    }

    fn read_current(&self) -> Option<Arc<FlatIndex>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }
}

impl VectorIndex for FlatIndexManager {
    fn rebuild(&self, documents: &BTreeMap<String, String>) -> Result<usize> {
        let entries: Vec<(&String, String)> = documents
            .iter()
            .map(|(path, content)| {
                let text = if content.trim().is_empty() {
                    file_name(Path::new(path))
                } else {
                    content.clone()
                };
                (path, text)
            })
            .collect();

        let mut built = Vec::with_capacity(entries.len());
        for batch in entries.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.embed_normalized(&texts)?;
            built.extend(batch.iter().map(|(path, _)| (*path).clone()).zip(vectors));
        }

        // Nothing touches disk until the whole index exists in memory.
        let index = FlatIndex::build(built)?;
        index.save(&self.index_path, &self.paths_path)?;

        let count = index.len();
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(index));
        info!(entries = count, "Vector index rebuilt");
        Ok(count)
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        let Some(index) = self.current()? else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::new();
        for (ordinal, score) in index.search(vector, k)? {
            match index.path(ordinal) {
                Some(path) => hits.push(IndexHit {
                    ordinal,
                    path: path.to_string(),
                    score,
                }),
                None => warn!(ordinal, "Index ordinal outside path sequence, discarded"),
            }
        }
        Ok(hits)
    }

    fn exists(&self) -> bool {
        self.read_current().is_some() || artifacts_exist(&self.index_path, &self.paths_path)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.current()?.map(|index| index.len()).unwrap_or(0))
    }

    fn indexed_paths(&self) -> Result<Option<BTreeSet<String>>> {
        Ok(self
            .current()?
            .map(|index| index.paths().iter().cloned().collect()))
    }
}
