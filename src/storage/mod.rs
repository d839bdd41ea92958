//! Persistence contract for the decision engine.
//!
//! The core never talks to a database directly; it consumes these narrow,
//! per-key traits. Implementations must be safe to share across tasks. The
//! admission gate serialises all usage reads and writes for a key behind its
//! own per-key lock, so a store does not need to offer locking reads itself
//! when it is used only through the gate.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::policy::Policy;
use crate::ratelimit::UsageState;

/// Storage for token bucket usage state.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Load the usage state of a key, if any was recorded.
    async fn load_usage(&self, key: &str) -> Result<Option<UsageState>>;

    /// Insert or replace the usage state keyed by `state.key`.
    async fn save_usage(&self, state: &UsageState) -> Result<()>;

    /// All recorded usage states, ordered by key.
    async fn list_usage(&self) -> Result<Vec<UsageState>>;
}

/// Storage for persisted policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_policy(&self, key: &str) -> Result<Option<Policy>>;

    /// Insert or replace the policy keyed by `policy.key`.
    async fn save_policy(&self, policy: &Policy) -> Result<()>;

    /// Remove a policy. Returns whether one existed.
    async fn delete_policy(&self, key: &str) -> Result<bool>;

    /// All policies, ordered by key.
    async fn list_policies(&self) -> Result<Vec<Policy>>;
}

/// Per-second request counters for sliding window accounting.
///
/// Seconds are epoch seconds. Ranges are inclusive on both ends.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically add one to the bucket, creating it if absent. Returns the
    /// bucket's new count.
    async fn increment_bucket(&self, key: &str, second: i64) -> Result<u64>;

    /// Sum of all buckets in `[from_second, to_second]`.
    async fn sum_buckets(&self, key: &str, from_second: i64, to_second: i64) -> Result<u64>;

    /// Drop buckets strictly older than `second`. Best effort.
    async fn delete_buckets_before(&self, key: &str, second: i64) -> Result<()>;
}
