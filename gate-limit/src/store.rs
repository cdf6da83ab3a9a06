use std::collections::HashMap;
use std::fmt::Debug;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Owns the per-client records of a strategy.
///
/// Implementations must run each closure while holding exclusive access to the record for
/// `key`, so that read, evaluate and mutate appear as a single step to concurrent callers.
pub trait Store<R>: Debug + Send + Sync {
    /// Runs `f` against the record for `key`, creating it with `init` on first sight.
    fn update_or_insert<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> R,
        f: impl FnOnce(&mut R) -> T,
    ) -> T;

    /// Runs `f` against the record for `key` if one exists. Never creates a record.
    fn update<T>(&self, key: &str, f: impl FnOnce(&mut R) -> T) -> Option<T>;

    /// Number of clients currently tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single coarse lock over every client record.
///
/// Decisions for different clients serialize against each other. The critical section is
/// short, so this is the default.
#[derive(Debug)]
pub struct MutexStore<R> {
    records: Mutex<HashMap<String, R>>,
}

impl<R> Default for MutexStore<R> {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> MutexStore<R> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Debug + Send> Store<R> for MutexStore<R> {
    fn update_or_insert<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> R,
        f: impl FnOnce(&mut R) -> T,
    ) -> T {
        let mut records = self.records.lock();
        // Avoid allocating an owned key for clients we already know.
        if let Some(record) = records.get_mut(key) {
            return f(record);
        }
        f(records.entry(key.to_owned()).or_insert_with(init))
    }

    fn update<T>(&self, key: &str, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        self.records.lock().get_mut(key).map(f)
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }
}

/// Client records spread over the shards of a `DashMap`.
///
/// Calls for the same client are still linearized by the shard lock, while clients hashed to
/// different shards proceed in parallel.
#[derive(Debug)]
pub struct ShardedStore<R> {
    records: DashMap<String, R>,
}

impl<R> Default for ShardedStore<R> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl<R> ShardedStore<R> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Debug + Send + Sync> Store<R> for ShardedStore<R> {
    fn update_or_insert<T>(
        &self,
        key: &str,
        init: impl FnOnce() -> R,
        f: impl FnOnce(&mut R) -> T,
    ) -> T {
        if let Some(mut record) = self.records.get_mut(key) {
            return f(&mut *record);
        }
        let mut record = self.records.entry(key.to_owned()).or_insert_with(init);
        f(&mut *record)
    }

    fn update<T>(&self, key: &str, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        self.records
            .get_mut(key)
            .map(|mut record| f(&mut *record))
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<S: Store<u32>>(store: &S) {
        assert!(store.is_empty());
        assert_eq!(store.update("a", |v| *v), None);
        assert!(store.is_empty(), "update must not create records");

        let seen = store.update_or_insert("a", || 5, |v| {
            *v += 1;
            *v
        });
        assert_eq!(seen, 6);

        // init is not called again for a known key
        let seen = store.update_or_insert("a", || 100, |v| *v);
        assert_eq!(seen, 6);

        assert_eq!(store.update("a", |v| *v * 2), Some(12));
        store.update_or_insert("b", || 0, |_| ());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn mutex_store_creates_lazily() {
        exercise(&MutexStore::new());
    }

    #[test]
    fn sharded_store_creates_lazily() {
        exercise(&ShardedStore::new());
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(ShardedStore::<u32>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        store.update_or_insert("shared", || 0, |v| *v += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.update("shared", |v| *v), Some(8000));
    }
}
