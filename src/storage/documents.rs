use crate::core::error::{Error, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-document metadata, keyed by absolute path, JSON serialized
const DOCUMENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("documents");

/// Extracted content, keyed by absolute path. Kept apart from the metadata so
/// fingerprint snapshots and filename lookups never load document bodies.
const CONTENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("contents");

/// Extension recorded for files without one
pub const UNKNOWN_EXTENSION: &str = "unknown";

/// Change-detection fingerprint of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Size in bytes
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch
    pub modified: u64,
}

impl Fingerprint {
    /// Read the current fingerprint of a file from the filesystem
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            modified: millis_since_epoch(metadata.modified()?)?,
        })
    }
}

/// One indexed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub path: String,
    pub filename: String,
    pub extension: String,
    pub size: u64,
    pub modified: u64,
    pub content: String,
}

impl DocumentRecord {
    /// Build a record, deriving filename and extension from the path
    pub fn new(path: impl Into<String>, fingerprint: Fingerprint, content: String) -> Self {
        let path = path.into();
        let as_path = Path::new(&path);
        let filename = file_name(as_path);
        let extension = file_extension(as_path);
        Self {
            filename,
            extension,
            size: fingerprint.size,
            modified: fingerprint.modified,
            content,
            path,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            size: self.size,
            modified: self.modified,
        }
    }

    fn metadata(&self) -> StoredMetadata<'_> {
        StoredMetadata {
            filename: &self.filename,
            extension: &self.extension,
            size: self.size,
            modified: self.modified,
        }
    }
}

#[derive(Serialize)]
struct StoredMetadata<'a> {
    filename: &'a str,
    extension: &'a str,
    size: u64,
    modified: u64,
}

#[derive(Deserialize)]
struct OwnedMetadata {
    filename: String,
    extension: String,
    size: u64,
    modified: u64,
}

impl OwnedMetadata {
    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Database(format!("Failed to deserialize document metadata: {}", e)))
    }

    fn into_record(self, path: String, content: String) -> DocumentRecord {
        DocumentRecord {
            path,
            filename: self.filename,
            extension: self.extension,
            size: self.size,
            modified: self.modified,
            content,
        }
    }
}

/// Metadata store: one record per discovered file
pub struct DocumentStore {
    db: Database,
}

impl DocumentStore {
    /// Open or create the metadata store
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("lock") {
                Error::Database("Document database is locked. Another docfinder process may be running.".to_string())
            } else {
                Error::Database(format!("Failed to open document database: {}", e))
            }
        })?;

        let write_txn = db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;
        {
            write_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
            write_txn.open_table(CONTENTS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
        }
        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(Self { db })
    }

    /// Drop every record
    pub fn reset(&self) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;
        {
            for table in [DOCUMENTS_TABLE, CONTENTS_TABLE] {
                write_txn.delete_table(table).map_err(|e| {
                    Error::Database(format!("Failed to drop table: {}", e))
                })?;
                write_txn.open_table(table).map_err(|e| {
                    Error::Database(format!("Failed to open table: {}", e))
                })?;
            }
        }
        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }

    /// Bulk insert in a single transaction. Returns the number of records written.
    pub fn insert_all<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a DocumentRecord>,
    {
        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;

        let mut inserted = 0;
        {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
            let mut contents = write_txn.open_table(CONTENTS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;

            for record in records {
                let json_str = serde_json::to_string(&record.metadata())?;
                documents.insert(record.path.as_str(), json_str.as_str()).map_err(|e| {
                    Error::Database(format!("Failed to insert document: {}", e))
                })?;
                contents.insert(record.path.as_str(), record.content.as_str()).map_err(|e| {
                    Error::Database(format!("Failed to insert content: {}", e))
                })?;
                inserted += 1;
            }
        }

        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(inserted)
    }

    /// Create or replace a single record
    pub fn upsert(&self, record: &DocumentRecord) -> Result<()> {
        self.insert_all(std::iter::once(record)).map(|_| ())
    }

    /// Remove a record. Returns whether it existed; absent paths are not an error.
    pub fn delete(&self, path: &str) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(|e| {
            Error::Database(format!("Failed to begin write transaction: {}", e))
        })?;

        let existed = {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;
            let mut contents = write_txn.open_table(CONTENTS_TABLE).map_err(|e| {
                Error::Database(format!("Failed to open table: {}", e))
            })?;

            let existed = documents
                .remove(path)
                .map_err(|e| Error::Database(format!("Failed to remove document: {}", e)))?
                .is_some();
            contents
                .remove(path)
                .map_err(|e| Error::Database(format!("Failed to remove content: {}", e)))?;
            existed
        };

        write_txn.commit().map_err(|e| {
            Error::Database(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(existed)
    }

    /// Fetch a full record
    pub fn get(&self, path: &str) -> Result<Option<DocumentRecord>> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;
        let documents = read_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;
        let contents = read_txn.open_table(CONTENTS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;

        let metadata = match documents
            .get(path)
            .map_err(|e| Error::Database(format!("Failed to get document: {}", e)))?
        {
            Some(guard) => OwnedMetadata::from_json(guard.value())?,
            None => return Ok(None),
        };
        let content = contents
            .get(path)
            .map_err(|e| Error::Database(format!("Failed to get content: {}", e)))?
            .map(|guard| guard.value().to_string())
            .unwrap_or_default();

        Ok(Some(metadata.into_record(path.to_string(), content)))
    }

    /// Snapshot of `path -> fingerprint` for every record, read in one transaction
    pub fn all_fingerprints(&self) -> Result<HashMap<String, Fingerprint>> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;
        let documents = read_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;

        let mut fingerprints = HashMap::new();
        for item in documents.iter().map_err(|e| {
            Error::Database(format!("Failed to iterate table: {}", e))
        })? {
            let (key, value) = item.map_err(|e| {
                Error::Database(format!("Failed to read table item: {}", e))
            })?;
            let metadata = OwnedMetadata::from_json(value.value())?;
            fingerprints.insert(
                key.value().to_string(),
                Fingerprint {
                    size: metadata.size,
                    modified: metadata.modified,
                },
            );
        }

        Ok(fingerprints)
    }

    /// Snapshot of `path -> extracted content` for every record
    pub fn all_contents(&self) -> Result<BTreeMap<String, String>> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;
        let contents = read_txn.open_table(CONTENTS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;

        let mut all = BTreeMap::new();
        for item in contents.iter().map_err(|e| {
            Error::Database(format!("Failed to iterate table: {}", e))
        })? {
            let (key, value) = item.map_err(|e| {
                Error::Database(format!("Failed to read table item: {}", e))
            })?;
            all.insert(key.value().to_string(), value.value().to_string());
        }

        Ok(all)
    }

    /// Records whose lower-cased filename contains `needle`, most recently
    /// modified first, capped at `limit`. Content is not loaded.
    pub fn filename_matches(&self, needle: &str, limit: usize) -> Result<Vec<DocumentRecord>> {
        let needle = needle.to_lowercase();
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;
        let documents = read_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;

        let mut matches = Vec::new();
        for item in documents.iter().map_err(|e| {
            Error::Database(format!("Failed to iterate table: {}", e))
        })? {
            let (key, value) = item.map_err(|e| {
                Error::Database(format!("Failed to read table item: {}", e))
            })?;
            let metadata = OwnedMetadata::from_json(value.value())?;
            if metadata.filename.to_lowercase().contains(&needle) {
                matches.push(metadata.into_record(key.value().to_string(), String::new()));
            }
        }

        matches.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
        matches.truncate(limit);
        Ok(matches)
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        let read_txn = self.db.begin_read().map_err(|e| {
            Error::Database(format!("Failed to begin read transaction: {}", e))
        })?;
        let documents = read_txn.open_table(DOCUMENTS_TABLE).map_err(|e| {
            Error::Database(format!("Failed to open table: {}", e))
        })?;
        let count = documents
            .len()
            .map_err(|e| Error::Database(format!("Failed to count documents: {}", e)))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Final path component as a string
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lower-cased extension without the dot, or `"unknown"`
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| UNKNOWN_EXTENSION.to_string())
}

/// Get file modification time in milliseconds since the Unix epoch
pub fn get_file_modified_time(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)?;
    millis_since_epoch(metadata.modified()?)
}

fn millis_since_epoch(time: SystemTime) -> Result<u64> {
    let duration = time.duration_since(UNIX_EPOCH).map_err(|e| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to get modification time: {}", e),
        ))
    })?;
    Ok(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(path: &str, modified: u64, content: &str) -> DocumentRecord {
        DocumentRecord::new(
            path,
            Fingerprint {
                size: content.len() as u64,
                modified,
            },
            content.to_string(),
        )
    }

    fn open_store(temp_dir: &TempDir) -> DocumentStore {
        DocumentStore::open(&temp_dir.path().join("database").join("documents.redb")).unwrap()
    }

    #[test]
    fn test_record_derives_filename_and_extension() {
        let rec = record("/docs/Report.PDF", 1, "");
        assert_eq!(rec.filename, "Report.PDF");
        assert_eq!(rec.extension, "pdf");

        let rec = record("/docs/Makefile", 1, "");
        assert_eq!(rec.extension, UNKNOWN_EXTENSION);
    }

    #[test]
    fn test_insert_all_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        let records = vec![record("/a/one.txt", 10, "first"), record("/a/two.txt", 20, "second")];
        assert_eq!(store.insert_all(&records).unwrap(), 2);
        assert_eq!(store.len().unwrap(), 2);

        let fetched = store.get("/a/two.txt").unwrap().unwrap();
        assert_eq!(fetched, records[1]);
        assert!(store.get("/a/missing.txt").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/one.txt", 10, "old")).unwrap();
        store.upsert(&record("/a/one.txt", 11, "new content")).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let fetched = store.get("/a/one.txt").unwrap().unwrap();
        assert_eq!(fetched.content, "new content");
        assert_eq!(fetched.modified, 11);
    }

    #[test]
    fn test_delete_is_noop_when_absent() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/one.txt", 10, "x")).unwrap();
        assert!(store.delete("/a/one.txt").unwrap());
        assert!(!store.delete("/a/one.txt").unwrap());
        assert!(store.is_empty().unwrap());
        assert!(store.all_contents().unwrap().is_empty());
    }

    #[test]
    fn test_all_fingerprints_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.insert_all(&[record("/a/one.txt", 10, "abc"), record("/a/two.txt", 20, "de")]).unwrap();

        let fingerprints = store.all_fingerprints().unwrap();
        assert_eq!(fingerprints.len(), 2);
        assert_eq!(fingerprints["/a/one.txt"], Fingerprint { size: 3, modified: 10 });
        assert_eq!(fingerprints["/a/two.txt"], Fingerprint { size: 2, modified: 20 });
    }

    #[test]
    fn test_filename_matches_orders_by_recency() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store
            .insert_all(&[
                record("/a/Invoice_2022.pdf", 100, ""),
                record("/a/invoice_2023.pdf", 300, ""),
                record("/a/notes.txt", 200, "invoice mentioned here"),
            ])
            .unwrap();

        let matches = store.filename_matches("INVOICE", 5).unwrap();
        let names: Vec<&str> = matches.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["invoice_2023.pdf", "Invoice_2022.pdf"]);

        let capped = store.filename_matches("invoice", 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].filename, "invoice_2023.pdf");
    }

    #[test]
    fn test_reset_clears_everything() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir);

        store.upsert(&record("/a/one.txt", 10, "x")).unwrap();
        store.reset().unwrap();
        assert!(store.is_empty().unwrap());
        assert!(store.all_fingerprints().unwrap().is_empty());
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir);
            store.upsert(&record("/a/one.txt", 10, "kept")).unwrap();
        }
        let store = open_store(&temp_dir);
        assert_eq!(store.get("/a/one.txt").unwrap().unwrap().content, "kept");
    }

    #[test]
    fn test_fingerprint_of_file() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");
        fs::write(&test_file, "Hello, world!").unwrap();

        let fingerprint = Fingerprint::of(&test_file).unwrap();
        assert_eq!(fingerprint.size, 13);
        assert!(fingerprint.modified > 0);
    }

    #[test]
    fn test_get_file_modified_time_nonexistent() {
        let result = get_file_modified_time(Path::new("/nonexistent/file.txt"));
        assert!(result.unwrap_err().is_not_found());
    }
}
