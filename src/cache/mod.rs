//! Local cache of known scam numbers.
//!
//! Holds SHA-256 digests of normalized numbers for O(1) lookup on the
//! screening path, so no network call is needed before the platform's
//! screening deadline. Mutations are serialized per cache instance and are
//! persisted before they become visible: a failed write leaves both the
//! store and the in-memory view at the last successful state.

pub mod store;

pub use store::{CacheStore, FileStore, MemoryStore};

use crate::error::{CallShieldError, Result};
use crate::number::{NumberHash, PhoneNumber};
use std::collections::HashSet;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct ScamNumberCache {
    store: Box<dyn CacheStore>,
    hashes: RwLock<HashSet<NumberHash>>,
    /// Serializes replace-all and add-one so neither loses the other's write.
    write_lock: Mutex<()>,
}

impl ScamNumberCache {
    /// Open a cache over `store`, loading its persisted content.
    ///
    /// A store that cannot be read leaves the cache empty: every number is
    /// then unknown, which screens as monitor rather than block.
    pub fn open(store: Box<dyn CacheStore>) -> Self {
        let hashes = match store.load() {
            Ok(hashes) => {
                info!(store = store.name(), count = hashes.len(), "scam cache loaded");
                hashes
            }
            Err(e) => {
                warn!(store = store.name(), error = %e, "scam cache unreadable, starting empty");
                HashSet::new()
            }
        };
        Self {
            store,
            hashes: RwLock::new(hashes),
            write_lock: Mutex::new(()),
        }
    }

    /// Whether `number` is a known scam number. Side-effect free.
    ///
    /// Blank numbers never match.
    pub fn contains(&self, number: &str) -> bool {
        let number = PhoneNumber::new(number);
        if number.is_blank() {
            return false;
        }
        let hash = number.hash();
        match self.hashes.read() {
            Ok(guard) => guard.contains(&hash),
            Err(_) => {
                warn!("scam cache lock poisoned, treating number as unknown");
                false
            }
        }
    }

    /// Replace the whole cache with `numbers`. Returns the resulting size.
    ///
    /// Formatting variants of the same number collapse into one entry.
    /// Blank entries are skipped.
    pub fn replace_all<S: AsRef<str>>(&self, numbers: &[S]) -> Result<usize> {
        let mut next = HashSet::with_capacity(numbers.len());
        let mut skipped = 0usize;
        for raw in numbers {
            let number = PhoneNumber::new(raw.as_ref());
            if number.is_blank() {
                skipped += 1;
                continue;
            }
            next.insert(number.hash());
        }
        if skipped > 0 {
            debug!(skipped, "blank numbers ignored in bulk sync");
        }

        let _guard = self.lock_writes()?;
        self.store.save(&next)?;
        let count = next.len();
        self.publish(next)?;
        info!(count, "scam cache replaced");
        Ok(count)
    }

    /// Add one number. Returns `true` if it was not cached before.
    pub fn add_one(&self, number: &str) -> Result<bool> {
        let number = PhoneNumber::new(number);
        if number.is_blank() {
            return Err(CallShieldError::MalformedInput {
                message: format!("cannot cache blank number {:?}", number.raw()),
            });
        }
        let hash = number.hash();

        let _guard = self.lock_writes()?;
        let mut next = self.snapshot()?;
        if !next.insert(hash) {
            debug!("number already cached");
            return Ok(false);
        }
        self.store.save(&next)?;
        let count = next.len();
        self.publish(next)?;
        info!(count, "scam number added to cache");
        Ok(true)
    }

    /// Number of cached digests.
    pub fn count(&self) -> usize {
        self.hashes.read().map(|guard| guard.len()).unwrap_or(0)
    }

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| CallShieldError::PersistenceFailure {
                message: format!("Failed to lock cache writer: {}", e),
            })
    }

    fn snapshot(&self) -> Result<HashSet<NumberHash>> {
        self.hashes
            .read()
            .map(|guard| guard.clone())
            .map_err(|e| CallShieldError::PersistenceFailure {
                message: format!("Failed to read cache: {}", e),
            })
    }

    fn publish(&self, next: HashSet<NumberHash>) -> Result<()> {
        let mut guard = self
            .hashes
            .write()
            .map_err(|e| CallShieldError::PersistenceFailure {
                message: format!("Failed to update cache: {}", e),
            })?;
        *guard = next;
        Ok(())
    }
}
