// ⏰ Versioned snapshots - values are immutable, the store points at the current one
//
// A reload never edits the rule list readers are using. It builds a complete
// new value and swaps the pointer, so a reader holds either the old snapshot
// or the new one, never a mix.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

// ============================================================================
// VERSIONED VALUE
// ============================================================================

#[derive(Debug, Clone)]
pub struct Versioned<T> {
    /// The immutable value
    pub value: T,

    /// Version number (monotonically increasing per store)
    pub version: u64,

    /// When this version became current
    pub valid_from: DateTime<Utc>,

    /// Where the value came from (file path, "builtin", ...)
    pub source: String,
}

impl<T> Versioned<T> {
    pub fn new(value: T, source: impl Into<String>) -> Self {
        Versioned {
            value,
            version: 1,
            valid_from: Utc::now(),
            source: source.into(),
        }
    }

    fn next_version(&self, value: T, source: String) -> Versioned<T> {
        Versioned {
            value,
            version: self.version + 1,
            valid_from: Utc::now(),
            source,
        }
    }
}

// ============================================================================
// SNAPSHOT STORE
// ============================================================================

/// Holds the current snapshot. Readers clone an Arc and keep using it even if
/// a newer version is swapped in meanwhile.
#[derive(Debug)]
pub struct SnapshotStore<T> {
    current: RwLock<Arc<Versioned<T>>>,
}

impl<T> SnapshotStore<T> {
    pub fn new(value: T, source: impl Into<String>) -> Self {
        SnapshotStore {
            current: RwLock::new(Arc::new(Versioned::new(value, source))),
        }
    }

    /// The current snapshot
    pub fn current(&self) -> Arc<Versioned<T>> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            // Only a pointer lives behind the lock; it is always a complete snapshot
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the current snapshot, returning the new version number
    pub fn swap(&self, value: T, source: impl Into<String>) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = Arc::new(guard.next_version(value, source.into()));
        let version = next.version;
        *guard = next;
        version
    }

    pub fn version(&self) -> u64 {
        self.current().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_swap_increments_version() {
        let store = SnapshotStore::new(vec![1, 2, 3], "builtin");
        assert_eq!(store.version(), 1);
        assert_eq!(store.current().source, "builtin");

        let v = store.swap(vec![4], "mappings.json");
        assert_eq!(v, 2);
        assert_eq!(store.current().value, vec![4]);
        assert_eq!(store.current().source, "mappings.json");
    }

    #[test]
    fn test_reader_keeps_old_snapshot_after_swap() {
        let store = SnapshotStore::new(String::from("old"), "a");
        let held = store.current();

        store.swap(String::from("new"), "b");

        assert_eq!(held.value, "old");
        assert_eq!(held.version, 1);
        assert_eq!(store.current().value, "new");
    }

    #[test]
    fn test_concurrent_readers_see_complete_snapshots() {
        // Every snapshot is a vector whose elements all equal its length
        let store = Arc::new(SnapshotStore::new(vec![1usize], "seed"));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 2..200usize {
                    store.swap(vec![n; n], "writer");
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = store.current();
                        let len = snap.value.len();
                        assert!(snap.value.iter().all(|&x| x == len));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.version(), 199);
    }
}
