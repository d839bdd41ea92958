//! In-process storage backed by concurrent maps.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{PolicyStore, UsageStore, WindowStore};
use crate::clock::Clock;
use crate::error::Result;
use crate::policy::{AlgorithmKind, Policy};
use crate::ratelimit::UsageState;

/// A single-node store holding usage, policies and window buckets in memory.
///
/// This is the authoritative state store for one process. It implements all
/// three storage traits so one `Arc<MemoryStore>` can back the whole gate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    usage: DashMap<String, UsageState>,
    policies: RwLock<BTreeMap<String, Policy>>,
    /// key -> (epoch second -> count)
    buckets: DashMap<String, BTreeMap<i64, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every bucket older than `before_second`, for all keys.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep_buckets(&self, before_second: i64) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, buckets| {
            let kept = buckets.split_off(&before_second);
            removed += buckets.len();
            *buckets = kept;
            !buckets.is_empty()
        });
        removed
    }

    /// Number of keys with at least one live bucket.
    pub fn bucket_key_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets that no policy can still count.
    ///
    /// Buckets younger than `retention_secs`, or than the longest persisted
    /// sliding window, survive. Returns the number of buckets removed.
    pub fn sweep_expired(&self, now_second: i64, retention_secs: i64) -> usize {
        let horizon = self.sweep_horizon(retention_secs);
        self.sweep_buckets(now_second.saturating_sub(horizon))
    }

    fn sweep_horizon(&self, retention_secs: i64) -> i64 {
        self.policies
            .read()
            .values()
            .filter(|policy| policy.kind == AlgorithmKind::SlidingWindow)
            .map(|policy| i64::try_from(policy.window_seconds).unwrap_or(i64::MAX))
            .fold(retention_secs, i64::max)
    }

    /// Periodically sweep buckets older than `retention`, or than the longest
    /// persisted sliding window if that is longer.
    ///
    /// Keys falling back to a default sliding window policy are only covered
    /// if `retention` is at least that window. The returned handle can be
    /// aborted to stop the sweeper.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        retention: Duration,
        clock: Arc<dyn Clock>,
    ) -> JoinHandle<()> {
        let retention_secs = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now_second = clock.now_millis().div_euclid(1000);
                let removed = self.sweep_expired(now_second, retention_secs);
                if removed > 0 {
                    debug!(removed = removed, "Swept expired window buckets");
                }
            }
        })
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn load_usage(&self, key: &str) -> Result<Option<UsageState>> {
        Ok(self.usage.get(key).map(|entry| entry.value().clone()))
    }

    async fn save_usage(&self, state: &UsageState) -> Result<()> {
        self.usage.insert(state.key.clone(), state.clone());
        Ok(())
    }

    async fn list_usage(&self) -> Result<Vec<UsageState>> {
        let mut states: Vec<UsageState> =
            self.usage.iter().map(|entry| entry.value().clone()).collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(states)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn load_policy(&self, key: &str) -> Result<Option<Policy>> {
        Ok(self.policies.read().get(key).cloned())
    }

    async fn save_policy(&self, policy: &Policy) -> Result<()> {
        self.policies
            .write()
            .insert(policy.key.clone(), policy.clone());
        Ok(())
    }

    async fn delete_policy(&self, key: &str) -> Result<bool> {
        Ok(self.policies.write().remove(key).is_some())
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        Ok(self.policies.read().values().cloned().collect())
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn increment_bucket(&self, key: &str, second: i64) -> Result<u64> {
        let mut buckets = self.buckets.entry(key.to_string()).or_default();
        let count = buckets.entry(second).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn sum_buckets(&self, key: &str, from_second: i64, to_second: i64) -> Result<u64> {
        if from_second > to_second {
            return Ok(0);
        }
        Ok(self
            .buckets
            .get(key)
            .map(|buckets| buckets.range(from_second..=to_second).map(|(_, c)| *c).sum::<u64>())
            .unwrap_or(0))
    }

    async fn delete_buckets_before(&self, key: &str, second: i64) -> Result<()> {
        if let Some(mut buckets) = self.buckets.get_mut(key) {
            *buckets = buckets.split_off(&second);
        }
        self.buckets.remove_if(key, |_, buckets| buckets.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_usage_upsert() {
        let store = MemoryStore::new();
        assert!(store.load_usage("a").await.unwrap().is_none());

        store.save_usage(&UsageState::seed("a", 10, 1_000)).await.unwrap();
        let mut state = store.load_usage("a").await.unwrap().unwrap();
        assert_eq!(state.tokens, 10);

        state.tokens = 3;
        store.save_usage(&state).await.unwrap();
        assert_eq!(store.load_usage("a").await.unwrap().unwrap().tokens, 3);
        assert_eq!(store.list_usage().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bucket_sum_is_inclusive() {
        let store = MemoryStore::new();
        for second in [10, 11, 11, 12, 15] {
            store.increment_bucket("k", second).await.unwrap();
        }

        assert_eq!(store.sum_buckets("k", 11, 12).await.unwrap(), 3);
        assert_eq!(store.sum_buckets("k", 10, 15).await.unwrap(), 5);
        assert_eq!(store.sum_buckets("k", 13, 14).await.unwrap(), 0);
        assert_eq!(store.sum_buckets("k", 15, 10).await.unwrap(), 0);
        assert_eq!(store.sum_buckets("other", 0, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_returns_bucket_count() {
        let store = MemoryStore::new();
        assert_eq!(store.increment_bucket("k", 1).await.unwrap(), 1);
        assert_eq!(store.increment_bucket("k", 1).await.unwrap(), 2);
        assert_eq!(store.increment_bucket("k", 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_buckets_before_keeps_boundary() {
        let store = MemoryStore::new();
        for second in [1, 2, 3] {
            store.increment_bucket("k", second).await.unwrap();
        }

        store.delete_buckets_before("k", 2).await.unwrap();
        assert_eq!(store.sum_buckets("k", 0, 10).await.unwrap(), 2);

        store.delete_buckets_before("k", i64::MAX).await.unwrap();
        assert_eq!(store.bucket_key_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_buckets_across_keys() {
        let store = MemoryStore::new();
        store.increment_bucket("a", 1).await.unwrap();
        store.increment_bucket("a", 50).await.unwrap();
        store.increment_bucket("b", 2).await.unwrap();

        assert_eq!(store.sweep_buckets(10), 2);
        assert_eq!(store.bucket_key_count(), 1);
        assert_eq!(store.sum_buckets("a", 0, 100).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_periodically() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(100_000);
        store.increment_bucket("a", 10).await.unwrap();

        let handle = Arc::clone(&store).spawn_sweeper(
            Duration::from_secs(1),
            Duration::from_secs(30),
            Arc::new(clock.clone()),
        );
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(store.bucket_key_count(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_keeps_buckets_inside_longest_window() {
        let store = MemoryStore::new();
        store
            .save_policy(&Policy::sliding_window("day", 1, 86_400))
            .await
            .unwrap();
        // Long refill periods do not stretch the horizon
        store
            .save_policy(&Policy::token_bucket("tb", 1, 1))
            .await
            .unwrap();
        store.increment_bucket("day", 0).await.unwrap();

        assert_eq!(store.sweep_expired(3_700, 3_600), 0);
        assert_eq!(store.sum_buckets("day", 0, 3_700).await.unwrap(), 1);

        assert_eq!(store.sweep_expired(86_401, 3_600), 1);
        assert_eq!(store.bucket_key_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_without_policies_uses_retention() {
        let store = MemoryStore::new();
        store.increment_bucket("k", 0).await.unwrap();
        store.increment_bucket("k", 100).await.unwrap();

        assert_eq!(store.sweep_expired(3_650, 3_600), 1);
        assert_eq!(store.sum_buckets("k", 0, 3_650).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_policy_table() {
        let store = MemoryStore::new();
        store.save_policy(&Policy::token_bucket("b", 1, 1)).await.unwrap();
        store.save_policy(&Policy::token_bucket("a", 2, 1)).await.unwrap();

        let keys: Vec<_> = store
            .list_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(store.delete_policy("a").await.unwrap());
        assert!(!store.delete_policy("a").await.unwrap());
    }
}
