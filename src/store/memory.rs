//! In-process counter store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::CounterStore;
use crate::error::StoreError;

/// Counter store kept in process memory.
///
/// Each key maps timestamps to the number of events recorded at that
/// millisecond. DashMap's per-shard locking serializes writers to the same
/// key, so concurrent `add`s are never lost.
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: DashMap<String, BTreeMap<i64, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding at least one event.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Drop every event older than `cutoff` across all keys.
    ///
    /// Keys left empty are removed. Returns the number of keys removed.
    pub fn sweep(&self, cutoff: i64) -> usize {
        let before = self.series.len();
        self.series.retain(|_, events| {
            *events = events.split_off(&cutoff);
            !events.is_empty()
        });
        let removed = before.saturating_sub(self.series.len());
        trace!(cutoff, removed, "Swept memory store");
        removed
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn add(&self, key: &str, timestamp: i64) -> Result<(), StoreError> {
        let mut events = self.series.entry(key.to_string()).or_default();
        *events.entry(timestamp).or_insert(0) += 1;
        Ok(())
    }

    async fn count_from(&self, key: &str, lower_inclusive: i64) -> Result<u64, StoreError> {
        let count = self
            .series
            .get(key)
            .map(|events| events.range(lower_inclusive..).map(|(_, n)| *n).sum())
            .unwrap_or(0);
        Ok(count)
    }

    async fn prune_before(&self, key: &str, upper_exclusive: i64) -> Result<(), StoreError> {
        if let Some(mut events) = self.series.get_mut(key) {
            *events = events.split_off(&upper_exclusive);
        }
        // The guard above must be released before remove_if takes the shard lock.
        self.series.remove_if(key, |_, events| events.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_add_and_count() {
        let store = MemoryStore::new();
        store.add("IP_1.1.1.1", 100).await.unwrap();
        store.add("IP_1.1.1.1", 200).await.unwrap();
        store.add("IP_1.1.1.1", 300).await.unwrap();

        assert_eq!(store.count_from("IP_1.1.1.1", 0).await.unwrap(), 3);
        assert_eq!(store.count_from("IP_1.1.1.1", 200).await.unwrap(), 2);
        assert_eq!(store.count_from("IP_1.1.1.1", 301).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_are_counted() {
        let store = MemoryStore::new();
        for _ in 0..4 {
            store.add("k", 500).await.unwrap();
        }
        assert_eq!(store.count_from("k", 500).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_count_on_unknown_key_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.count_from("missing", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_is_exclusive_of_bound() {
        let store = MemoryStore::new();
        store.add("k", 99).await.unwrap();
        store.add("k", 100).await.unwrap();
        store.add("k", 101).await.unwrap();

        store.prune_before("k", 100).await.unwrap();
        assert_eq!(store.count_from("k", i64::MIN).await.unwrap(), 2);
        assert_eq!(store.count_from("k", 100).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prune_twice_matches_prune_once() {
        let once = MemoryStore::new();
        let twice = MemoryStore::new();
        for ts in [10, 20, 30, 40] {
            once.add("k", ts).await.unwrap();
            twice.add("k", ts).await.unwrap();
        }

        once.prune_before("k", 25).await.unwrap();
        twice.prune_before("k", 25).await.unwrap();
        twice.prune_before("k", 25).await.unwrap();
        twice.prune_before("k", 15).await.unwrap();

        assert_eq!(
            once.count_from("k", i64::MIN).await.unwrap(),
            twice.count_from("k", i64::MIN).await.unwrap()
        );
        assert_eq!(twice.count_from("k", i64::MIN).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prune_everything_removes_key() {
        let store = MemoryStore::new();
        store.add("k", 1).await.unwrap();
        assert_eq!(store.len(), 1);

        store.prune_before("k", 2).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let store = MemoryStore::new();
        store.add("IP_a", 1).await.unwrap();
        store.add("IP_a", 2).await.unwrap();
        store.add("IP_b", 3).await.unwrap();

        assert_eq!(store.count_from("IP_a", 0).await.unwrap(), 2);
        assert_eq!(store.count_from("IP_b", 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_keys() {
        let store = MemoryStore::new();
        store.add("stale", 10).await.unwrap();
        store.add("fresh", 10).await.unwrap();
        store.add("fresh", 1_000).await.unwrap();

        let removed = store.sweep(500);

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.count_from("fresh", i64::MIN).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.add("shared", 7).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(store.count_from("shared", 0).await.unwrap(), 200);
    }
}
