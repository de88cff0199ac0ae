//! Depth-indexed analysis cache.
//!
//! Key: `"{fen}_{lines}"`. Value: JSON object mapping depth (as text) to
//! `{bestmoves, ponder}`. Depths accumulate per key; a write at one depth never
//! removes another.
//!
//! Store failures never propagate: a failed read is a miss and a failed write
//! is dropped with a warning.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisResult;
use crate::error::StoreError;
use crate::store::KvStore;

/// Stored results for one key, by search depth.
pub type DepthMap = BTreeMap<u32, AnalysisResult>;

/// Counters since the cache was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub dropped_writes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    dropped_writes: AtomicU64,
}

pub struct AnalysisCache {
    store: Option<Arc<dyn KvStore>>,
    /// One lock per key with a write in flight; serialises fetch-modify-store
    /// for that key within this process.
    write_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    counters: Counters,
}

pub fn cache_key(fen: &str, lines: usize) -> String {
    format!("{fen}_{lines}")
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store: Some(store),
            write_locks: parking_lot::Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// A cache with no store: every read misses, every write is dropped.
    pub fn disabled() -> Self {
        Self {
            store: None,
            write_locks: parking_lot::Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Cheapest stored result searched at least `depth` deep.
    pub async fn get(&self, fen: &str, depth: u32, lines: usize) -> Option<AnalysisResult> {
        let store = self.store.as_ref()?;
        let key = cache_key(fen, lines);

        let found = match load(store.as_ref(), &key).await {
            Ok(map) => map.and_then(|map| {
                map.into_iter()
                    .find(|(stored, _)| *stored >= depth)
            }),
            Err(e) => {
                warn!(key = %key, error = %e, "Error retrieving from cache");
                None
            }
        };

        match found {
            Some((stored, result)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                info!(key = %key, depth = stored, requested = depth, "Cache hit");
                Some(result)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, requested = depth, "Cache miss");
                None
            }
        }
    }

    /// Store `result` at `depth`, keeping results stored at other depths.
    pub async fn put(&self, fen: &str, depth: u32, lines: usize, result: &AnalysisResult) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let key = cache_key(fen, lines);

        let key_lock = self.key_lock(&key);
        let guard = key_lock.lock().await;
        let outcome = merge_and_store(store.as_ref(), &key, depth, result).await;
        drop(guard);
        self.release_key_lock(&key, key_lock);

        match outcome {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                info!(key = %key, depth, "Stored analysis in cache");
            }
            Err(e) => {
                self.counters.dropped_writes.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, depth, error = %e, "Error storing to cache");
            }
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Forget the lock for `key` once no other writer holds a handle to it.
    fn release_key_lock(&self, key: &str, key_lock: Arc<Mutex<()>>) {
        let mut locks = self.write_locks.lock();
        drop(key_lock);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    /// Every depth stored for a key, for inspection.
    pub async fn depths(&self, fen: &str, lines: usize) -> Vec<u32> {
        let Some(store) = self.store.as_ref() else {
            return Vec::new();
        };
        match load(store.as_ref(), &cache_key(fen, lines)).await {
            Ok(Some(map)) => map.into_keys().collect(),
            _ => Vec::new(),
        }
    }

    /// Remove everything from the backing store.
    pub async fn clear(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.flush().await {
            Ok(()) => info!("Cache cleared"),
            Err(e) => warn!(error = %e, "Error clearing cache"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.is_enabled(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            dropped_writes: self.counters.dropped_writes.load(Ordering::Relaxed),
        }
    }
}

async fn load(store: &dyn KvStore, key: &str) -> Result<Option<DepthMap>, StoreError> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

async fn merge_and_store(
    store: &dyn KvStore,
    key: &str,
    depth: u32,
    result: &AnalysisResult,
) -> Result<(), StoreError> {
    let mut map = load(store, key).await?.unwrap_or_default();
    map.insert(depth, result.clone());
    store.set(key, serde_json::to_vec(&map)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MoveLine;
    use crate::store::MemoryStore;

    const FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

    fn result_for(mv: &str, cp: i32) -> AnalysisResult {
        AnalysisResult {
            lines: vec![MoveLine::new(vec![mv.to_string()], Some(cp), None, None)],
            ponder: None,
        }
    }

    fn memory_cache() -> (Arc<MemoryStore>, AnalysisCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = AnalysisCache::new(store.clone());
        (store, cache)
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("8/8/8/8/8/8/8/K6k w - - 0 1", 3), "8/8/8/8/8/8/8/K6k w - - 0 1_3");
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let (_, cache) = memory_cache();
        let result = AnalysisResult {
            lines: vec![
                MoveLine::new(vec!["e7e5".into(), "g1f3".into()], Some(-31), None, None),
                None,
            ],
            ponder: Some("g1f3".into()),
        };

        cache.put(FEN, 18, 2, &result).await;
        assert_eq!(cache.get(FEN, 18, 2).await, Some(result));
    }

    #[tokio::test]
    async fn test_get_picks_minimum_sufficient_depth() {
        let (_, cache) = memory_cache();
        cache.put(FEN, 10, 3, &result_for("a7a6", 10)).await;
        cache.put(FEN, 20, 3, &result_for("c7c5", 20)).await;
        cache.put(FEN, 15, 3, &result_for("e7e5", 15)).await;

        assert_eq!(cache.get(FEN, 12, 3).await, Some(result_for("e7e5", 15)));
        assert_eq!(cache.get(FEN, 15, 3).await, Some(result_for("e7e5", 15)));
        assert_eq!(cache.get(FEN, 5, 3).await, Some(result_for("a7a6", 10)));
        assert_eq!(cache.get(FEN, 16, 3).await, Some(result_for("c7c5", 20)));
    }

    #[tokio::test]
    async fn test_shallower_depths_do_not_satisfy() {
        let (_, cache) = memory_cache();
        cache.put(FEN, 10, 3, &result_for("e7e5", 10)).await;

        assert_eq!(cache.get(FEN, 11, 3).await, None);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_depths_accumulate_and_lines_are_separate_keys() {
        let (_, cache) = memory_cache();
        cache.put(FEN, 20, 3, &result_for("e7e5", 1)).await;
        cache.put(FEN, 12, 3, &result_for("c7c5", 2)).await;
        cache.put(FEN, 20, 1, &result_for("d7d5", 3)).await;

        assert_eq!(cache.depths(FEN, 3).await, vec![12, 20]);
        assert_eq!(cache.depths(FEN, 1).await, vec![20]);
        assert_eq!(cache.get(FEN, 20, 1).await, Some(result_for("d7d5", 3)));
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_key_all_land() {
        let (_, cache) = memory_cache();
        let writes = (1..=8).map(|depth| {
            let result = result_for("e7e5", depth as i32);
            let cache = &cache;
            async move { cache.put(FEN, depth, 1, &result).await }
        });
        futures::future::join_all(writes).await;

        assert_eq!(cache.depths(FEN, 1).await, (1..=8).collect::<Vec<u32>>());
        assert!(cache.write_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_write_to_one_key_does_not_wait_for_another() {
        let (_, cache) = memory_cache();
        let other = cache.key_lock(&cache_key(FEN, 3));
        let _held = other.lock().await;

        let binding = result_for("e7e5", 1);
        let put = cache.put(FEN, 10, 1, &binding);
        tokio::time::timeout(std::time::Duration::from_secs(1), put)
            .await
            .expect("write to an unrelated key is not blocked");
        assert_eq!(cache.depths(FEN, 1).await, vec![10]);
    }

    #[tokio::test]
    async fn test_overwrite_same_depth() {
        let (_, cache) = memory_cache();
        cache.put(FEN, 15, 1, &result_for("e7e5", 1)).await;
        cache.put(FEN, 15, 1, &result_for("c7c5", 2)).await;
        assert_eq!(cache.get(FEN, 15, 1).await, Some(result_for("c7c5", 2)));
    }

    #[tokio::test]
    async fn test_stored_format_uses_text_depth_keys() {
        let (store, cache) = memory_cache();
        cache.put(FEN, 18, 1, &result_for("e7e5", 5)).await;

        let raw = store.get(&cache_key(FEN, 1)).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["18"]["bestmoves"][0]["move"], "e7e5");
        assert!(json["18"]["ponder"].is_null());
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_miss_and_write_is_dropped() {
        let (store, cache) = memory_cache();
        store.set(&cache_key(FEN, 1), b"{not json".to_vec()).await.unwrap();

        assert_eq!(cache.get(FEN, 1, 1).await, None);

        cache.put(FEN, 10, 1, &result_for("e7e5", 5)).await;
        assert_eq!(cache.stats().dropped_writes, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = AnalysisCache::disabled();
        cache.put(FEN, 10, 1, &result_for("e7e5", 5)).await;
        assert_eq!(cache.get(FEN, 10, 1).await, None);
        assert!(!cache.stats().enabled);
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, cache) = memory_cache();
        cache.put(FEN, 10, 1, &result_for("e7e5", 5)).await;
        cache.clear().await;
        assert!(store.is_empty());
        assert_eq!(cache.get(FEN, 10, 1).await, None);
    }
}
