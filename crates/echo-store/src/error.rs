// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Top-level error type for store operations.
//!
//! Structural errors (identity conflicts, schema misconfiguration, corrupt
//! internal state) are returned as `Err` at the point of detection. Request
//! failures reported by adapters are not errors here: they settle as
//! [`RequestOutcome::Rejected`](crate::RequestOutcome::Rejected).
use thiserror::Error;

use crate::collection::CollectionId;
use crate::config::ConfigError;
use crate::doc::DocumentError;
use crate::ident::{Identity, IdentityError};
use crate::request::RequestHandle;
use crate::schema::SchemaError;
use crate::store::StoreError;

/// Errors returned by [`Store`](crate::Store) and the graph.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Identity registry failure (conflict, duplicate assignment, unknown handle).
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// Schema lookup or inverse resolution failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Ingested document failed validation.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Record store failure (in-flight unload, unknown record, bad transition).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A relationship edit targeted a resource of the wrong type.
    #[error("{model}.{relationship} expects {expected}, got {found}")]
    TargetTypeMismatch {
        /// Model owning the relationship.
        model: String,
        /// Relationship name.
        relationship: String,
        /// Declared target type.
        expected: String,
        /// Type of the offending identity.
        found: String,
    },
    /// The handle names no request known to this store.
    #[error("unknown request: {0:?}")]
    UnknownRequest(RequestHandle),
    /// The collection id is not (or no longer) registered.
    #[error("unknown collection: {0:?}")]
    UnknownCollection(CollectionId),
    /// A deferred relationship was loaded but no link is known for it.
    #[error("{identity} has no link for relationship {relationship}")]
    NoRelationshipLink {
        /// Owning record.
        identity: Identity,
        /// Relationship name.
        relationship: String,
    },
    /// Internal bookkeeping disagrees with itself.
    #[error("internal corruption: {0}")]
    InternalCorruption(&'static str),
}

impl CacheError {
    /// `true` for broken identity bookkeeping or schema misconfiguration, as
    /// opposed to a payload that merely failed validation.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Identity(_)
                | Self::InternalCorruption(_)
                | Self::Schema(
                    SchemaError::AmbiguousInverse { .. }
                        | SchemaError::MissingReflexiveInverse { .. }
                        | SchemaError::InvalidInverse { .. }
                )
        )
    }
}
