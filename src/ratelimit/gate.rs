//! The admission gate: the single entry point consulted on every request.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::locks::KeyLocks;
use super::{LimiterDispatcher, UsageState};
use crate::clock::Clock;
use crate::config::DefaultPolicyConfig;
use crate::error::{Result, ThrottleError};
use crate::policy::{AlgorithmKind, Policy, PolicyResolver};
use crate::storage::{MemoryStore, UsageStore, WindowStore};

/// Point-in-time view of a key's usage, for metrics and admin output.
///
/// Token counts are as last persisted; no refill is applied when taking a
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub key: String,
    pub algorithm: AlgorithmKind,
    pub tokens: u64,
    pub capacity: u64,
    pub window_seconds: u64,
    /// Requests consumed: live window count for sliding windows, spent
    /// tokens for token buckets
    pub window_request_count: u64,
    /// Whether the next request would currently be denied
    pub throttled: bool,
}

/// Composes policy resolution, usage state and algorithm dispatch into
/// `check(key) -> allowed`.
///
/// All work for one key runs under that key's lock, so concurrent checks for
/// the same key are serialised end to end (load, evaluate, persist) while
/// checks for different keys proceed independently.
pub struct AdmissionGate {
    resolver: Arc<PolicyResolver>,
    dispatcher: LimiterDispatcher,
    usage: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl AdmissionGate {
    pub fn new(
        resolver: Arc<PolicyResolver>,
        usage: Arc<dyn UsageStore>,
        windows: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            dispatcher: LimiterDispatcher::new(windows),
            usage,
            clock,
            locks: KeyLocks::new(),
        }
    }

    /// A gate whose policies, usage and window buckets all live in `store`.
    pub fn with_memory_store(
        store: Arc<MemoryStore>,
        default_policy: DefaultPolicyConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = Arc::new(PolicyResolver::new(store.clone(), default_policy));
        Self::new(resolver, store.clone(), store, clock)
    }

    /// The resolver, for policy administration.
    pub fn resolver(&self) -> &Arc<PolicyResolver> {
        &self.resolver
    }

    /// Decide whether one request for `key` is admitted.
    ///
    /// `Ok(false)` means denied. Errors mean no decision could be made
    /// (storage failure, unknown algorithm) and are never folded into a deny.
    /// A policy with invalid parameters fails closed.
    pub async fn check(&self, key: &str) -> Result<bool> {
        let policy = self.resolver.resolve(key).await?;

        if let AlgorithmKind::Unrecognized(tag) = &policy.kind {
            warn!(key = %key, kind = %tag, "Refusing to evaluate unknown algorithm");
            return Err(ThrottleError::UnknownAlgorithm(tag.clone()));
        }

        if let Err(e) = policy.validate_parameters() {
            warn!(key = %key, error = %e, "Denying request under invalid policy");
            return Ok(false);
        }

        let _guard = self.locks.acquire(key).await;
        let now = self.clock.now_millis();

        let mut state = self.load_or_seed(&policy, now).await?;
        let allowed = self.dispatcher.admit(&mut state, &policy, now).await?;
        self.usage.save_usage(&state).await?;

        if allowed {
            trace!(key = %key, kind = %policy.kind, tokens = state.tokens, "Request admitted");
        } else {
            debug!(key = %key, kind = %policy.kind, capacity = policy.capacity, "Request denied");
        }
        Ok(allowed)
    }

    /// Re-seed a key's usage to a full bucket and wipe its window history.
    ///
    /// Does nothing for keys that have never been checked.
    pub async fn reset(&self, key: &str) -> Result<()> {
        let policy = self.resolver.resolve(key).await?;
        let _guard = self.locks.acquire(key).await;

        if self.usage.load_usage(key).await?.is_none() {
            trace!(key = %key, "Reset of untracked key ignored");
            return Ok(());
        }

        let now = self.clock.now_millis();
        self.usage
            .save_usage(&UsageState::seed(key, policy.capacity, now))
            .await?;
        self.dispatcher.sliding_window().clear(key).await?;

        info!(key = %key, capacity = policy.capacity, "Usage reset");
        Ok(())
    }

    /// Usage snapshot for one key, or `None` if it has never been checked.
    pub async fn snapshot(&self, key: &str) -> Result<Option<UsageSnapshot>> {
        match self.usage.load_usage(key).await? {
            Some(state) => Ok(Some(self.describe(state).await?)),
            None => Ok(None),
        }
    }

    /// Snapshots for every tracked key, ordered by key.
    pub async fn snapshots(&self) -> Result<Vec<UsageSnapshot>> {
        let states = self.usage.list_usage().await?;
        try_join_all(states.into_iter().map(|state| self.describe(state))).await
    }

    /// Number of keys with a check or reset in flight.
    pub fn keys_in_flight(&self) -> usize {
        self.locks.len()
    }

    /// Load the key's state, seeding and persisting a full bucket if there is
    /// none or the stored one is unusable. Called with the key's lock held.
    async fn load_or_seed(&self, policy: &Policy, now: i64) -> Result<UsageState> {
        match self.usage.load_usage(&policy.key).await? {
            Some(state) => match state.validate(policy) {
                Ok(()) => return Ok(state),
                Err(e) => {
                    warn!(key = %policy.key, error = %e, "Re-seeding corrupted usage state");
                }
            },
            None => {
                debug!(key = %policy.key, capacity = policy.capacity, "Creating usage state");
            }
        }

        let state = UsageState::seed(policy.key.as_str(), policy.capacity, now);
        self.usage.save_usage(&state).await?;
        Ok(state)
    }

    async fn describe(&self, state: UsageState) -> Result<UsageSnapshot> {
        let policy = self.resolver.resolve(&state.key).await?;
        let now = self.clock.now_millis();

        let (window_request_count, throttled) = match policy.kind {
            AlgorithmKind::SlidingWindow => {
                let count = self
                    .dispatcher
                    .sliding_window()
                    .window_count(&state.key, &policy, now)
                    .await?;
                (count, count >= policy.capacity)
            }
            AlgorithmKind::TokenBucket => {
                (policy.capacity.saturating_sub(state.tokens), state.tokens == 0)
            }
            AlgorithmKind::Unrecognized(_) => (0, true),
        };

        Ok(UsageSnapshot {
            key: state.key,
            algorithm: policy.kind,
            tokens: state.tokens,
            capacity: policy.capacity,
            window_seconds: policy.window_seconds,
            window_request_count,
            throttled,
        })
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("default_policy", self.resolver.default_policy())
            .field("keys_in_flight", &self.keys_in_flight())
            .finish()
    }
}
