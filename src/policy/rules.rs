//! Policy files.
//!
//! Policies can be provisioned from a YAML file at startup. Two shapes are
//! accepted: a bare list of policies, or a mapping with a `policies` list.
//!
//! ```yaml
//! policies:
//!   - key: 10.0.0.1
//!     kind: token-bucket
//!     capacity: 10
//!     refill_rate: 1
//!   - key: 10.0.0.2
//!     kind: sliding_window
//!     capacity: 5
//!     window_seconds: 60
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::Policy;
use crate::error::{Result, ThrottleError};

/// A set of policies loaded from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string.
    ///
    /// Every policy is validated, and a key may appear only once.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set = match serde_yaml::from_str::<Vec<Policy>>(yaml) {
            Ok(policies) => PolicySet { policies },
            Err(_) => serde_yaml::from_str::<PolicySet>(yaml).map_err(|e| {
                ThrottleError::Config(format!("Failed to parse policy file: {}", e))
            })?,
        };

        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !seen.insert(policy.key.as_str()) {
                return Err(ThrottleError::Config(format!(
                    "Duplicate policy for key: {}",
                    policy.key
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
