// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store configuration loaded from JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ident::DEFAULT_LID_PREFIX;

/// Error type for configuration and schema loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The blob parsed but describes an unusable configuration.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for one [`Store`](crate::Store) instance.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Prefix for generated local ids (`"{prefix}:{type}-{n}"`).
    pub lid_prefix: String,
    /// Coalesce identical pending reads into one request.
    pub coalesce_reads: bool,
    /// Reject relationship linkage whose type differs from the declared target.
    pub strict_linkage_types: bool,
    /// Completed request records retained per (target, op).
    pub request_history_limit: usize,
    /// Unload a record once its delete has been acknowledged.
    pub unload_on_delete_ack: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lid_prefix: DEFAULT_LID_PREFIX.to_owned(),
            coalesce_reads: true,
            strict_linkage_types: true,
            request_history_limit: 1,
            unload_on_delete_ack: true,
        }
    }
}

impl StoreConfig {
    /// Parses a configuration blob. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Serde`] for malformed JSON or unknown fields and
    /// [`ConfigError::Invalid`] for an empty `lid_prefix`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty JSON.
    ///
    /// # Errors
    /// Propagates serializer failures.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when `lid_prefix` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lid_prefix.is_empty() {
            return Err(ConfigError::Invalid("lid_prefix must not be empty".into()));
        }
        Ok(())
    }
}
