use super::error::{Error, Result};
use crate::indexing::scanner::ScanPolicy;
use std::path::PathBuf;

/// Configuration for docfinder
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for docfinder data
    pub base_dir: PathBuf,
    /// Directory holding the metadata store
    pub database_dir: PathBuf,
    /// Directory holding the vector index artifacts
    pub index_dir: PathBuf,
    /// Directory for cached models
    pub models_dir: PathBuf,
    /// Path to the persisted preference file
    pub state_path: PathBuf,
    /// Filesystem roots to crawl
    pub roots: Vec<PathBuf>,
    /// Inclusion and exclusion rules applied while crawling
    pub policy: ScanPolicy,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".docfinder"))
    }

    /// Roots crawled when none are configured
    pub fn default_roots() -> Vec<PathBuf> {
        dirs::home_dir().into_iter().collect()
    }

    /// Create a new configuration
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.unwrap_or_else(|| {
            Self::default_base_dir().unwrap_or_else(|_| PathBuf::from(".docfinder"))
        });

        Ok(Self {
            database_dir: base_dir.join("database"),
            index_dir: base_dir.join("store"),
            models_dir: base_dir.join("models"),
            state_path: base_dir.join("state.json"),
            roots: Self::default_roots(),
            policy: ScanPolicy::default(),
            base_dir,
        })
    }

    /// Replace the crawled roots
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots;
        self
    }

    /// Replace the scan policy
    pub fn with_policy(mut self, policy: ScanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Path of the metadata store database
    pub fn documents_path(&self) -> PathBuf {
        self.database_dir.join("documents.redb")
    }

    /// Path of the serialized vector index
    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join("index.bin")
    }

    /// Path of the ordered path sequence parallel to the index
    pub fn paths_path(&self) -> PathBuf {
        self.index_dir.join("paths.json")
    }

    /// Initialize the configuration directories
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.database_dir)?;
        std::fs::create_dir_all(&self.index_dir)?;
        std::fs::create_dir_all(&self.models_dir)?;
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.exists() && self.database_dir.exists() && self.index_dir.exists()
    }
}
