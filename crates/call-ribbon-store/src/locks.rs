//! Striped key locks.
//!
//! `RocksDB` writes are atomic per batch but offer no read-modify-write
//! primitive. Writers that read a record, derive a new value and write it back
//! hold the stripe lock for that record's key for the whole sequence, which
//! serializes them against every other writer of the same key while writers
//! of unrelated keys proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

/// Default number of stripes per lock table.
pub const DEFAULT_STRIPES: usize = 64;

/// A fixed-size table of mutexes addressed by key hash.
#[derive(Debug)]
pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    /// Create a table with `stripes` mutexes (at least one).
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Lock the stripe owning `key`.
    pub fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)].lock()
    }

    /// Lock the stripes owning every key in `keys`.
    ///
    /// Stripes are taken once each, in index order, so two callers locking
    /// overlapping key sets cannot deadlock.
    pub fn lock_all(&self, keys: &[&[u8]]) -> Vec<MutexGuard<'_, ()>> {
        let mut stripes: Vec<usize> = keys.iter().map(|key| self.stripe_of(key)).collect();
        stripes.sort_unstable();
        stripes.dedup();
        stripes.into_iter().map(|i| self.stripes[i].lock()).collect()
    }

    fn stripe_of(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let hash = hasher.finish() as usize;
        hash % self.stripes.len()
    }
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
