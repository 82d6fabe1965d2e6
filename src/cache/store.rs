//! Persistence backends for the scam number cache.
//!
//! A store is a named key-value file holding one entry: the set of hex
//! digests. Every save fully overwrites the previous content.

use crate::error::{CallShieldError, Result};
use crate::number::NumberHash;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::warn;

/// Key under which the digest set is stored.
pub const KEY_HASHES: &str = "scam_hashes";

/// Backend that loads and saves the whole digest set.
pub trait CacheStore: Send + Sync {
    /// Load the persisted set. A store that was never written yields an empty set.
    fn load(&self) -> Result<HashSet<NumberHash>>;

    /// Replace the persisted set. Either the whole set lands or nothing changes.
    fn save(&self, hashes: &HashSet<NumberHash>) -> Result<()>;

    /// Name for logging.
    fn name(&self) -> &'static str {
        "store"
    }
}

impl<S: CacheStore + ?Sized> CacheStore for std::sync::Arc<S> {
    fn load(&self) -> Result<HashSet<NumberHash>> {
        (**self).load()
    }

    fn save(&self, hashes: &HashSet<NumberHash>) -> Result<()> {
        (**self).save(hashes)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// JSON file store. Writes go to a temp file in the same directory which is
/// then renamed over the target, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default location: `$XDG_DATA_HOME/callshield/scam_cache.json`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("callshield")
            .join("scam_cache.json")
    }

    fn persistence_error(&self, action: &str, err: impl std::fmt::Display) -> CallShieldError {
        CallShieldError::PersistenceFailure {
            message: format!("{} {}: {}", action, self.path.display(), err),
        }
    }
}

impl CacheStore for FileStore {
    fn load(&self) -> Result<HashSet<NumberHash>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(self.persistence_error("Failed to read", e)),
        };

        let mut entries: BTreeMap<String, Vec<String>> = serde_json::from_str(&contents)
            .map_err(|e| self.persistence_error("Failed to parse", e))?;

        let stored = entries.remove(KEY_HASHES).unwrap_or_default();
        let mut hashes = HashSet::with_capacity(stored.len());
        for entry in stored {
            match NumberHash::from_hex(&entry) {
                Some(hash) => {
                    hashes.insert(hash);
                }
                None => warn!(path = %self.path.display(), "skipping malformed cache entry"),
            }
        }
        Ok(hashes)
    }

    fn save(&self, hashes: &HashSet<NumberHash>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.persistence_error("Failed to create dir for", e))?;

        let mut sorted: Vec<&str> = hashes.iter().map(NumberHash::as_str).collect();
        sorted.sort_unstable();
        let mut entries = BTreeMap::new();
        entries.insert(KEY_HASHES, sorted);
        let json = serde_json::to_vec_pretty(&entries)
            .map_err(|e| self.persistence_error("Failed to serialize", e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| self.persistence_error("Failed to create temp file for", e))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| self.persistence_error("Failed to write", e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.persistence_error("Failed to replace", e.error))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// In-memory store for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hashes: Mutex<HashSet<NumberHash>>,
    fail_writes: AtomicBool,
    fail_loads: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a pre-populated set.
    pub fn with_hashes(hashes: impl IntoIterator<Item = NumberHash>) -> Self {
        Self {
            hashes: Mutex::new(hashes.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Make every save fail with `PersistenceFailure`.
    pub fn with_write_failure(self) -> Self {
        self.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Make load fail with `PersistenceFailure`.
    pub fn with_load_failure(self) -> Self {
        self.fail_loads.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Snapshot of what is currently persisted.
    pub fn persisted(&self) -> HashSet<NumberHash> {
        self.hashes
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> Result<HashSet<NumberHash>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(CallShieldError::PersistenceFailure {
                message: "memory store load failure".to_string(),
            });
        }
        self.hashes
            .lock()
            .map(|guard| guard.clone())
            .map_err(|e| CallShieldError::PersistenceFailure {
                message: format!("Failed to lock memory store: {}", e),
            })
    }

    fn save(&self, hashes: &HashSet<NumberHash>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CallShieldError::PersistenceFailure {
                message: "memory store write failure".to_string(),
            });
        }
        let mut guard = self
            .hashes
            .lock()
            .map_err(|e| CallShieldError::PersistenceFailure {
                message: format!("Failed to lock memory store: {}", e),
            })?;
        *guard = hashes.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set_of(numbers: &[&str]) -> HashSet<NumberHash> {
        numbers.iter().map(|n| NumberHash::of_normalized(n)).collect()
    }

    #[test]
    fn file_store_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("cache.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn file_store_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("cache.json"));
        let hashes = set_of(&["+15550123456", "5550100"]);

        store.save(&hashes).unwrap();

        assert_eq!(store.load().unwrap(), hashes);
    }

    #[test]
    fn file_store_save_overwrites_previous_content() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("cache.json"));

        store.save(&set_of(&["1", "2", "3"])).unwrap();
        store.save(&set_of(&["4"])).unwrap();

        assert_eq!(store.load().unwrap(), set_of(&["4"]));
    }

    #[test]
    fn file_store_writes_single_named_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let store = FileStore::new(&path);
        store.save(&set_of(&["+15550123456"])).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object[KEY_HASHES].as_array().unwrap().len(), 1);
        assert!(!raw.contains("5550123456"), "raw number must never be stored");
    }

    #[test]
    fn file_store_corrupt_file_is_persistence_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();

        let result = FileStore::new(&path).load();

        assert!(matches!(
            result,
            Err(CallShieldError::PersistenceFailure { .. })
        ));
    }

    #[test]
    fn file_store_skips_malformed_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let good = NumberHash::of_normalized("123");
        fs::write(
            &path,
            format!(r#"{{"scam_hashes": ["{}", "not-a-digest"]}}"#, good),
        )
        .unwrap();

        let loaded = FileStore::new(&path).load().unwrap();

        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains(&good));
    }

    #[test]
    fn file_store_unwritable_target_reports_failure_and_keeps_old_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let store = FileStore::new(&path);
        store.save(&set_of(&["1"])).unwrap();

        // A file where the parent directory should be makes the write impossible
        let blocked = FileStore::new(path.join("child.json"));
        let result = blocked.save(&set_of(&["2"]));

        assert!(matches!(
            result,
            Err(CallShieldError::PersistenceFailure { .. })
        ));
        assert_eq!(store.load().unwrap(), set_of(&["1"]));
    }

    #[test]
    fn memory_store_write_failure_leaves_content() {
        let store = MemoryStore::with_hashes(set_of(&["1"]));
        store.set_fail_writes(true);

        assert!(store.save(&set_of(&["2"])).is_err());
        assert_eq!(store.persisted(), set_of(&["1"]));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn memory_store_load_failure() {
        let store = MemoryStore::new().with_load_failure();
        assert!(store.load().is_err());
    }
}
