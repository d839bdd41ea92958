//! Policy lookup and administration.

use std::sync::Arc;
use tracing::{debug, info};

use super::Policy;
use crate::config::DefaultPolicyConfig;
use crate::error::{Result, ThrottleError};
use crate::storage::PolicyStore;

/// Resolves the policy that applies to a key.
///
/// Persisted policies win; every other key is limited by the process-wide
/// default policy. The admin operations (`create`, `update`, `delete`) live
/// here too so that all writes pass through [`Policy::validate`].
pub struct PolicyResolver {
    store: Arc<dyn PolicyStore>,
    default_policy: DefaultPolicyConfig,
}

impl PolicyResolver {
    pub fn new(store: Arc<dyn PolicyStore>, default_policy: DefaultPolicyConfig) -> Self {
        Self {
            store,
            default_policy,
        }
    }

    /// The default applied to keys without a persisted policy.
    pub fn default_policy(&self) -> &DefaultPolicyConfig {
        &self.default_policy
    }

    /// Return the persisted policy for `key`, or the default bound to `key`.
    pub async fn resolve(&self, key: &str) -> Result<Policy> {
        match self.store.load_policy(key).await? {
            Some(policy) => Ok(policy),
            None => {
                debug!(key = %key, "No persisted policy, using default");
                Ok(self.default_policy.bind(key))
            }
        }
    }

    /// Fetch a persisted policy.
    pub async fn get(&self, key: &str) -> Result<Policy> {
        self.store
            .load_policy(key)
            .await?
            .ok_or_else(|| ThrottleError::PolicyNotFound(key.to_string()))
    }

    /// All persisted policies, ordered by key.
    pub async fn list(&self) -> Result<Vec<Policy>> {
        self.store.list_policies().await
    }

    /// Persist a policy for a key that has none yet.
    pub async fn create(&self, policy: Policy) -> Result<Policy> {
        policy.validate()?;
        if self.store.load_policy(&policy.key).await?.is_some() {
            return Err(ThrottleError::PolicyExists(policy.key));
        }
        self.store.save_policy(&policy).await?;

        info!(key = %policy.key, kind = %policy.kind, capacity = policy.capacity, "Policy created");
        Ok(policy)
    }

    /// Replace the policy of a key that already has one.
    ///
    /// Usage state is left alone; the next check re-validates it against the
    /// new parameters.
    pub async fn update(&self, policy: Policy) -> Result<Policy> {
        policy.validate()?;
        if self.store.load_policy(&policy.key).await?.is_none() {
            return Err(ThrottleError::PolicyNotFound(policy.key));
        }
        self.store.save_policy(&policy).await?;

        info!(key = %policy.key, kind = %policy.kind, capacity = policy.capacity, "Policy updated");
        Ok(policy)
    }

    /// Remove a persisted policy. The key falls back to the default.
    pub async fn delete(&self, key: &str) -> Result<()> {
        if !self.store.delete_policy(key).await? {
            return Err(ThrottleError::PolicyNotFound(key.to_string()));
        }

        info!(key = %key, "Policy deleted");
        Ok(())
    }
}
