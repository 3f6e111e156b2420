use crate::models::StageStats;
use moka::future::Cache;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Memoization table scoped to one pipeline stage
///
/// Backed by an unbounded moka cache so concurrent workers asking for the
/// same key share a single in-flight computation. Failed computations are
/// not stored. The whole table is dropped by [`StageCache::finish`] when the
/// stage completes.
pub struct StageCache<K, V> {
    name: &'static str,
    entries: Cache<K, V>,
    lookups: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> StageCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Cache::builder().name(name).build(),
            lookups: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the cached value for `key`, running `init` on a miss
    ///
    /// At most one `init` runs per key at a time; other callers wait for it.
    pub async fn get_or_try_insert<F, E>(&self, key: K, init: F) -> Result<V, Arc<E>>
    where
        F: Future<Output = Result<V, E>>,
        E: Send + Sync + 'static,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let misses = &self.misses;

        self.entries
            .try_get_with(key, async move {
                misses.fetch_add(1, Ordering::Relaxed);
                init.await
            })
            .await
    }

    /// Number of stored entries
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current counters without clearing anything
    pub fn stats(&self) -> StageStats {
        StageStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Close the stage: drop every entry and reset the counters
    pub async fn finish(&self) -> StageStats {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;

        let stats = StageStats {
            lookups: self.lookups.swap(0, Ordering::Relaxed),
            misses: self.misses.swap(0, Ordering::Relaxed),
        };

        tracing::debug!(
            "Cleared {} cache ({} lookups, {} misses)",
            self.name,
            stats.lookups,
            stats.misses
        );

        stats
    }
}
