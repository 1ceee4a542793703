use crate::core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// User preferences that survive restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// The user accepted the terms; nothing is scanned before this
    pub terms_accepted: bool,
    /// No full scan has completed yet
    pub first_time: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            terms_accepted: false,
            first_time: true,
        }
    }
}

impl Preferences {
    /// Load from disk. A missing or unreadable file yields the defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::read(path) {
            Ok(preferences) => preferences,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error loading preferences, using defaults");
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write to disk, replacing the previous file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
