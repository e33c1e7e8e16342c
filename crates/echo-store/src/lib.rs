// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! echo-store: normalized entity cache.
//!
//! Resources arriving in canonical documents are deduplicated by identity,
//! stored once, linked through a bidirectional relationship graph, and
//! exposed through live and ad-hoc collections. Every mutation is batched and
//! reported to subscribers once per affected subject.
//!
//! The crate never performs I/O: fetches and saves leave through an
//! [`Adapter`] and come back through [`Store::settle_request`].
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

/// Outbound adapter boundary.
pub mod adapter;
mod cache;
/// Record arrays: live per-type collections and ad-hoc query results.
pub mod collection;
/// Store configuration.
pub mod config;
/// Canonical document shape and the normalizer seam.
pub mod doc;
mod error;
/// Bidirectional relationship graph.
pub mod graph;
/// Identity registry.
pub mod ident;
/// Inverse relationship resolution.
pub mod inverse;
/// Change-batch notifications.
pub mod notify;
/// Insertion-ordered identity sets.
pub mod ordered;
mod record;
/// Request tracking and coalescing.
pub mod request;
/// Model declarations.
pub mod schema;
/// Immutable record snapshots.
pub mod snapshot;
mod state;
mod store;
/// Attribute transforms.
pub mod transform;

/// Adapter seam.
pub use adapter::{Adapter, AdapterRequest, NullAdapter};
/// Store facade and ingestion results.
pub use cache::{Primary, PushResult, Store, StoreBuilder};
/// Collections.
pub use collection::{CollectionId, CollectionKind, CollectionManager, QueryDescriptor, RecordArray};
/// Configuration.
pub use config::{ConfigError, StoreConfig};
/// Canonical documents.
pub use doc::{
    Document, DocumentError, JsonDocumentNormalizer, Link, Linkage, Normalizer, PrimaryData,
    RelationshipDoc, RelationshipLinks, ResourceDoc, ResourceLinkage,
};
/// Top-level error.
pub use error::CacheError;
/// Relationship graph.
pub use graph::{EdgeState, Members, PayloadData, RelationshipGraph, RelationshipPayload, RelationshipState};
/// Identities.
pub use ident::{Identity, IdentityEntry, IdentityError, IdentityRegistry, TypeName, DEFAULT_LID_PREFIX};
/// Inverse resolution.
pub use inverse::{InverseInfo, InverseResolver, SchemaInverseResolver};
/// Notifications.
pub use notify::{ChangeBus, ChangeKind, ChangeKinds, ChangeNotice, Subject, SubscriptionId};
/// Ordered identity set.
pub use ordered::IdentitySet;
/// Records.
pub use record::{Attributes, FieldState, ResourceRecord};
/// Requests.
pub use request::{
    OpKind, RequestCache, RequestError, RequestHandle, RequestKey, RequestOutcome, RequestRecord,
    RequestResult, RequestState, RequestStatus, RequestSubscriptionId, RequestTarget,
};
/// Schema.
pub use schema::{
    AttributeDef, DefaultValue, InverseDecl, ModelDef, RelationshipDef, RelationshipKind, Schema,
    SchemaError,
};
/// Snapshots.
pub use snapshot::{ResourceRef, Snapshot, SnapshotData, SnapshotRelationship};
/// Lifecycle.
pub use state::{InvalidTransition, LifecycleEvent, RecordState};
/// Record store.
pub use store::{RecordStore, StoreError, UpsertOutcome};
/// Transforms.
pub use transform::{
    AttributeTransform, BooleanTransform, NumberTransform, RegistryError, StringTransform,
    TransformError, TransformRegistry,
};
