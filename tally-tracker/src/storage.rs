//! Durable key-value storage for the outbound queue
//!
//! The delivery queue persists its entries under a single key after every
//! mutation and reads them back once at construction. Hosts plug in whatever
//! persistence they have by implementing [`DurableStorage`].
//!
//! # Example
//!
//! ```rust
//! use tally_tracker::storage::{DurableStorage, InMemoryStorage};
//!
//! let storage = InMemoryStorage::new();
//! storage.write("tallyOutQueue_tally_default", "[]").unwrap();
//! assert_eq!(
//!     storage.read("tallyOutQueue_tally_default").unwrap().as_deref(),
//!     Some("[]")
//! );
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};

/// Persistent string storage keyed by name
///
/// All methods take `&self`; implementations use interior mutability.
pub trait DurableStorage: Send + Sync {
    /// Read the value stored under `key`, `None` if absent
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Replace the value stored under `key`
    fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete `key` if present
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Backend name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// In-memory storage backend
///
/// Values are lost when the process exits. An optional byte quota makes
/// oversized writes fail the way a full browser store does.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: RwLock<HashMap<String, String>>,
    quota: Option<usize>,
}

impl InMemoryStorage {
    /// Create an unbounded in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that rejects writes once keys and values exceed `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    /// Store a value without quota checks, e.g. to seed corrupt data
    pub fn raw_set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    /// Bytes currently used by every key except `skip`
    fn used_bytes(&self, skip: &str) -> usize {
        self.values
            .read()
            .iter()
            .filter(|(k, _)| k.as_str() != skip)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl DurableStorage for InMemoryStorage {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        if let Some(quota) = self.quota {
            let needed = key.len() + value.len();
            let available = quota.saturating_sub(self.used_bytes(key));
            if needed > available {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available,
                });
            }
        }
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// File-based storage backend
///
/// Stores each key as its own file under a directory. Writes land in a
/// sibling temp file first and are renamed into place.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Create a file storage in the given directory, creating it if needed
    pub fn new<P: Into<PathBuf>>(directory: P) -> StorageResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    /// Directory holding the stored files
    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    fn key_file(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.json", safe))
    }
}

impl DurableStorage for FileStorage {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        match std::fs::read_to_string(self.key_file(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.key_file(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        match std::fs::remove_file(self.key_file(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Storage turned off by the host
///
/// Reads see nothing and every write fails, so the queue runs memory-only.
#[derive(Debug, Default, Clone)]
pub struct DisabledStorage;

impl DisabledStorage {
    pub fn new() -> Self {
        Self
    }
}

impl DurableStorage for DisabledStorage {
    fn read(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn write(&self, key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::Unavailable(format!("storage disabled, cannot write '{}'", key)))
    }

    fn remove(&self, _key: &str) -> StorageResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
