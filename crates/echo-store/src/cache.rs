// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The [`Store`] facade: one cache instance owning every component.
//!
//! All mutation goes through `&mut Store`, so there is exactly one writer.
//! Each public mutation runs inside a notification batch; subscribers see
//! the finished result of the call, never an intermediate state.
//!
//! Ingestion is two-phase. [`Store::push`] first plans the whole document
//! (schema lookups, inverse resolution, linkage checks, transforms,
//! identity consistency) without touching any state, then applies it. A
//! document that fails planning leaves the cache unchanged.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use crate::adapter::{Adapter, AdapterRequest, NullAdapter};
use crate::collection::{CollectionId, CollectionKind, CollectionManager, QueryDescriptor, RecordArray};
use crate::config::StoreConfig;
use crate::doc::{
    Document, DocumentError, Link, Linkage, Normalizer, PrimaryData, RelationshipDoc, RelationshipLinks,
    ResourceDoc, ResourceLinkage,
};
use crate::error::CacheError;
use crate::graph::{PayloadData, RelationshipGraph, RelationshipPayload, RelationshipState};
use crate::ident::{Identity, IdentityEntry, IdentityError, IdentityRegistry, TypeName};
use crate::inverse::{InverseResolver, SchemaInverseResolver};
use crate::notify::{ChangeBus, ChangeKind, ChangeNotice, Subject, SubscriptionId};
use crate::record::{Attributes, ResourceRecord};
use crate::request::{
    OpKind, RequestCache, RequestError, RequestHandle, RequestKey, RequestOutcome, RequestRecord,
    RequestResult, RequestState, RequestStatus, RequestSubscriptionId, RequestTarget,
};
use crate::schema::{RelationshipKind, Schema, SchemaError};
use crate::snapshot::Snapshot;
use crate::state::{LifecycleEvent, RecordState};
use crate::store::RecordStore;
use crate::transform::TransformRegistry;

/// Primary data of an ingested document, resolved to identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primary {
    /// `data` was `null` or absent.
    Empty,
    /// Single-resource document.
    Single(Identity),
    /// Collection document, in payload order.
    Many(Vec<Identity>),
}

impl Primary {
    /// Primary identities as a list.
    #[must_use]
    pub fn identities(&self) -> Vec<Identity> {
        match self {
            Self::Empty => Vec::new(),
            Self::Single(one) => vec![*one],
            Self::Many(many) => many.clone(),
        }
    }
}

/// What [`Store::push`] ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// Primary resources.
    pub primary: Primary,
    /// Side-loaded resources, in payload order.
    pub included: Vec<Identity>,
}

/// Context a pending request needs at settlement.
#[derive(Debug, Clone)]
enum PendingOp {
    FindRecord(Identity),
    FindAll(TypeName),
    Query {
        type_name: TypeName,
        query: QueryDescriptor,
        collection: Option<CollectionId>,
    },
    FindRelationship {
        identity: Identity,
        name: Arc<str>,
    },
    Save {
        identity: Identity,
        op: OpKind,
    },
}

struct PlannedRelationship<'d> {
    name: Arc<str>,
    doc: &'d RelationshipDoc,
}

struct PlannedResource<'d> {
    doc: &'d ResourceDoc,
    type_name: TypeName,
    attributes: Attributes,
    relationships: Vec<PlannedRelationship<'d>>,
}

/// A validated document, ready to apply.
struct Plan<'d> {
    doc: &'d Document,
    resources: Vec<PlannedResource<'d>>,
    merged: bool,
}

type LidIndex<'d> = FxHashMap<&'d str, (&'d str, Option<&'d str>)>;

/// Configures a [`Store`] before construction.
pub struct StoreBuilder {
    schema: Arc<Schema>,
    config: StoreConfig,
    resolver: Option<Box<dyn InverseResolver>>,
    adapter: Option<Box<dyn Adapter>>,
    transforms: Option<TransformRegistry>,
}

impl fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config", &self.config)
            .field("custom_resolver", &self.resolver.is_some())
            .field("custom_adapter", &self.adapter.is_some())
            .finish_non_exhaustive()
    }
}

impl StoreBuilder {
    /// Replaces the default configuration.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects an inverse resolver (default: [`SchemaInverseResolver`]).
    #[must_use]
    pub fn resolver<R: InverseResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Injects the adapter that receives fetches and saves (default: [`NullAdapter`]).
    #[must_use]
    pub fn adapter<A: Adapter + 'static>(mut self, adapter: A) -> Self {
        self.adapter = Some(Box::new(adapter));
        self
    }

    /// Replaces the transform registry (default: built-ins only).
    #[must_use]
    pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = Some(transforms);
        self
    }

    /// Builds the store.
    ///
    /// # Errors
    /// Returns [`CacheError::Config`] when the configuration is invalid.
    pub fn build(self) -> Result<Store, CacheError> {
        self.config.validate()?;
        Ok(Store::assemble(
            self.schema,
            self.config,
            self.resolver
                .unwrap_or_else(|| Box::new(SchemaInverseResolver::new())),
            self.adapter.unwrap_or_else(|| Box::new(NullAdapter)),
            self.transforms
                .unwrap_or_else(TransformRegistry::with_builtins),
        ))
    }
}

/// One normalized entity cache instance.
pub struct Store {
    config: StoreConfig,
    schema: Arc<Schema>,
    identities: IdentityRegistry,
    records: RecordStore,
    graph: RelationshipGraph,
    collections: CollectionManager,
    requests: RequestCache,
    bus: ChangeBus,
    transforms: TransformRegistry,
    adapter: Box<dyn Adapter>,
    pending: FxHashMap<RequestHandle, PendingOp>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("records", &self.records.len())
            .field("identities", &self.identities.len())
            .field("collections", &self.collections.len())
            .field("pending", &self.pending.len())
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates a store with the default configuration, resolver, transforms and
    /// a [`NullAdapter`].
    #[must_use]
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self::assemble(
            schema.into(),
            StoreConfig::default(),
            Box::new(SchemaInverseResolver::new()),
            Box::new(NullAdapter),
            TransformRegistry::with_builtins(),
        )
    }

    /// Starts a [`StoreBuilder`].
    #[must_use]
    pub fn builder(schema: impl Into<Arc<Schema>>) -> StoreBuilder {
        StoreBuilder {
            schema: schema.into(),
            config: StoreConfig::default(),
            resolver: None,
            adapter: None,
            transforms: None,
        }
    }

    fn assemble(
        schema: Arc<Schema>,
        config: StoreConfig,
        resolver: Box<dyn InverseResolver>,
        adapter: Box<dyn Adapter>,
        transforms: TransformRegistry,
    ) -> Self {
        Self {
            identities: IdentityRegistry::new(&config.lid_prefix),
            records: RecordStore::new(Arc::clone(&schema)),
            graph: RelationshipGraph::new(Arc::clone(&schema), resolver, config.strict_linkage_types),
            collections: CollectionManager::new(),
            requests: RequestCache::new(config.request_history_limit),
            bus: ChangeBus::new(),
            pending: FxHashMap::default(),
            transforms,
            adapter,
            schema,
            config,
        }
    }

    // ----- accessors ---------------------------------------------------------

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Model declarations.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Identity registry (read-only).
    #[must_use]
    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    /// Record store (read-only).
    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Relationship graph (read-only).
    #[must_use]
    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    /// Transform registry, for rendering snapshots.
    #[must_use]
    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    /// Identity for `(type_name, id)`, created if absent.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownModel`] for undeclared types.
    pub fn identity_for(&mut self, type_name: &str, id: &str) -> Result<Identity, CacheError> {
        let type_name = self.model_type(type_name)?;
        Ok(self.identities.identity_for(&type_name, id))
    }

    /// Identity for `(type_name, id)` without creating one.
    #[must_use]
    pub fn lookup(&self, type_name: &str, id: &str) -> Option<Identity> {
        self.identities.lookup(type_name, id)
    }

    /// Registry entry (type, id, lid) of `identity`.
    #[must_use]
    pub fn identity_entry(&self, identity: Identity) -> Option<&IdentityEntry> {
        self.identities.get(identity)
    }

    /// Record for `identity`.
    #[must_use]
    pub fn record(&self, identity: Identity) -> Option<&ResourceRecord> {
        self.records.get(identity)
    }

    /// Visible value of one attribute.
    #[must_use]
    pub fn attribute(&self, identity: Identity, field: &str) -> Option<&Value> {
        self.records.get(identity)?.attribute(field)
    }

    /// Current to-one target.
    #[must_use]
    pub fn belongs_to(&self, identity: Identity, name: &str) -> Option<Identity> {
        self.graph.belongs_to(identity, name)
    }

    /// Current to-many members.
    #[must_use]
    pub fn has_many(&self, identity: Identity, name: &str) -> &[Identity] {
        self.graph.has_many(identity, name)
    }

    /// Relationship state (members, links, meta).
    #[must_use]
    pub fn relationship(&self, identity: Identity, name: &str) -> Option<&RelationshipState> {
        self.graph.relationship(identity, name)
    }

    // ----- ingestion ---------------------------------------------------------

    /// Ingests a canonical document as one atomic batch.
    ///
    /// # Errors
    /// Schema, document, identity and inverse errors found while planning; in
    /// that case nothing was applied.
    #[instrument(skip(self, doc))]
    pub fn push(&mut self, doc: &Document) -> Result<PushResult, CacheError> {
        let plan = self.plan(doc)?;
        let result = self.batch(|s| s.apply(plan))?;
        debug!(
            primary = result.primary.identities().len(),
            included = result.included.len(),
            "pushed document"
        );
        Ok(result)
    }

    /// Normalizes `payload` and ingests it.
    ///
    /// # Errors
    /// Normalizer failures, then as for [`Self::push`].
    pub fn push_payload(
        &mut self,
        normalizer: &dyn Normalizer,
        payload: &[u8],
    ) -> Result<PushResult, CacheError> {
        let doc = normalizer.normalize(payload)?;
        self.push(&doc)
    }

    fn plan<'d>(&mut self, doc: &'d Document) -> Result<Plan<'d>, CacheError> {
        doc.validate()?;
        let mut lids = LidIndex::default();
        let mut resources = Vec::new();
        for resource in doc.resources() {
            resources.push(self.plan_resource(resource, &mut lids)?);
        }
        Ok(Plan {
            doc,
            resources,
            merged: false,
        })
    }

    fn plan_resource<'d>(
        &mut self,
        resource: &'d ResourceDoc,
        lids: &mut LidIndex<'d>,
    ) -> Result<PlannedResource<'d>, CacheError> {
        let schema = Arc::clone(&self.schema);
        let model = schema.require(&resource.type_name)?;
        self.check_reference(lids, &resource.type_name, resource.id.as_deref(), resource.lid.as_deref())?;

        let mut attributes = Attributes::new();
        for (name, value) in &resource.attributes {
            let Some(def) = model.attribute_def(name) else {
                trace!(model = %resource.type_name, attribute = %name, "ignoring undeclared attribute");
                continue;
            };
            let value = self
                .transforms
                .deserialize(def.kind.as_deref(), value)
                .map_err(|source| DocumentError::Transform {
                    model: resource.type_name.clone(),
                    attribute: name.clone(),
                    source,
                })?;
            attributes.insert(Arc::clone(&def.name), value);
        }

        let mut relationships = Vec::new();
        for (name, rel) in &resource.relationships {
            let def = schema.require_relationship(&resource.type_name, name)?;
            self.graph.inverse_for(&resource.type_name, name)?;
            let refs: &[ResourceLinkage] = match (&rel.data, def.kind) {
                (None, _) | (Some(Linkage::Null), RelationshipKind::BelongsTo) => &[],
                (Some(Linkage::One(r)), RelationshipKind::BelongsTo) => std::slice::from_ref(r),
                (Some(Linkage::Many(rs)), RelationshipKind::HasMany) => rs,
                (Some(_), expected) => {
                    return Err(DocumentError::LinkageCardinality {
                        model: resource.type_name.clone(),
                        relationship: name.clone(),
                        expected,
                    }
                    .into());
                }
            };
            for r in refs {
                schema.require(&r.type_name)?;
                if self.config.strict_linkage_types && r.type_name.as_str() != &*def.target {
                    return Err(DocumentError::LinkageTypeMismatch {
                        model: resource.type_name.clone(),
                        relationship: name.clone(),
                        expected: def.target.to_string(),
                        found: r.type_name.clone(),
                    }
                    .into());
                }
                self.check_reference(lids, &r.type_name, r.id.as_deref(), r.lid.as_deref())?;
            }
            relationships.push(PlannedRelationship {
                name: Arc::clone(&def.name),
                doc: rel,
            });
        }

        Ok(PlannedResource {
            doc: resource,
            type_name: Arc::clone(model.name()),
            attributes,
            relationships,
        })
    }

    /// Rejects references whose local id would resolve inconsistently.
    fn check_reference<'d>(
        &self,
        lids: &mut LidIndex<'d>,
        type_name: &'d str,
        id: Option<&'d str>,
        lid: Option<&'d str>,
    ) -> Result<(), IdentityError> {
        let Some(lid) = lid else {
            return Ok(());
        };
        let registered = self.identities.lookup_lid(lid);
        let known = lids.get(lid).copied().or_else(|| {
            registered
                .and_then(|h| self.identities.get(h))
                .map(|e| (&**e.type_name(), e.id()))
        });
        match known {
            None => {
                lids.insert(lid, (type_name, id));
                Ok(())
            }
            Some((existing_type, _)) if existing_type != type_name => {
                Err(IdentityError::LidTypeMismatch {
                    lid: lid.to_owned(),
                    existing_type: existing_type.to_owned(),
                    requested_type: type_name.to_owned(),
                })
            }
            Some((_, Some(existing))) => match id {
                Some(new_id) if new_id != existing => {
                    Err(IdentityError::DuplicateIdentityAssignment {
                        type_name: type_name.to_owned(),
                        lid: lid.to_owned(),
                        existing_id: existing.to_owned(),
                        new_id: new_id.to_owned(),
                    })
                }
                _ => Ok(()),
            },
            Some((_, None)) => {
                if let (Some(new_id), Some(requested)) = (id, registered) {
                    if let Some(existing) = self.identities.lookup(type_name, new_id) {
                        if existing != requested {
                            return Err(IdentityError::IdentityConflict {
                                type_name: type_name.to_owned(),
                                id: new_id.to_owned(),
                                existing,
                                requested,
                            });
                        }
                    }
                }
                if id.is_some() {
                    lids.insert(lid, (type_name, id));
                }
                Ok(())
            }
        }
    }

    fn apply(&mut self, mut plan: Plan<'_>) -> Result<PushResult, CacheError> {
        let mut resolved = Vec::with_capacity(plan.resources.len());
        for res in &mut plan.resources {
            let identity = self.resolve(&res.doc.type_name, res.doc.id.as_deref(), res.doc.lid.as_deref())?;
            let before = self.records.state(identity);
            let patch = std::mem::take(&mut res.attributes);
            let outcome = self.records.upsert(identity, &res.type_name, patch)?;
            self.after_change(identity, before, outcome.changed)?;
            resolved.push(identity);
        }
        for (res, identity) in plan.resources.iter().zip(&resolved) {
            for rel in &res.relationships {
                let payload = self.payload_for(rel.doc)?;
                self.graph
                    .push_relationship_data(&self.identities, &mut self.bus, *identity, &rel.name, payload)?;
            }
        }

        let primary_len = plan.doc.primary().count();
        let included = resolved.split_off(primary_len.min(resolved.len()));
        let primary = match &plan.doc.data {
            None => Primary::Empty,
            Some(PrimaryData::Single(_)) => resolved
                .first()
                .copied()
                .map_or(Primary::Empty, Primary::Single),
            Some(PrimaryData::Many(_)) => Primary::Many(resolved),
        };
        Ok(PushResult { primary, included })
    }

    fn payload_for(&mut self, doc: &RelationshipDoc) -> Result<RelationshipPayload, CacheError> {
        let data = match &doc.data {
            None => None,
            Some(Linkage::Null) => Some(PayloadData::ToOne(None)),
            Some(Linkage::One(r)) => Some(PayloadData::ToOne(Some(self.resolve_ref(r)?))),
            Some(Linkage::Many(rs)) => Some(PayloadData::ToMany(
                rs.iter()
                    .map(|r| self.resolve_ref(r))
                    .collect::<Result<_, _>>()?,
            )),
        };
        Ok(RelationshipPayload {
            data,
            links: doc.links.clone(),
            meta: doc.meta.clone(),
        })
    }

    fn resolve(
        &mut self,
        type_name: &str,
        id: Option<&str>,
        lid: Option<&str>,
    ) -> Result<Identity, CacheError> {
        match (id, lid) {
            (_, Some(lid)) => Ok(self.identities.identity_for_lid(type_name, lid, id)?),
            (Some(id), None) => Ok(self.identities.identity_for(type_name, id)),
            (None, None) => Err(DocumentError::MissingIdentifier {
                type_name: type_name.to_owned(),
            }
            .into()),
        }
    }

    /// Resolves a linkage target and gives it an (empty) record.
    fn resolve_ref(&mut self, r: &ResourceLinkage) -> Result<Identity, CacheError> {
        let identity = self.resolve(&r.type_name, r.id.as_deref(), r.lid.as_deref())?;
        let type_name = self.identities.type_of(identity)?;
        self.records.ensure(identity, &type_name);
        Ok(identity)
    }

    /// Enqueues record notices and keeps the live collection in step with the
    /// record's lifecycle state.
    fn after_change(
        &mut self,
        identity: Identity,
        before: Option<RecordState>,
        attributes_changed: bool,
    ) -> Result<(), CacheError> {
        let record = self.records.require(identity)?;
        let state = record.state();
        let type_name = Arc::clone(record.type_name());
        if attributes_changed {
            self.bus.enqueue(Subject::Record(identity), ChangeKind::Attributes);
        }
        if before != Some(state) {
            self.bus.enqueue(Subject::Record(identity), ChangeKind::State);
        }
        if state.is_live_member() {
            self.collections.add_to_live(&mut self.bus, &type_name, identity);
        } else {
            self.collections.remove_from_live(&mut self.bus, &type_name, identity);
        }
        Ok(())
    }

    // ----- local mutation ----------------------------------------------------

    /// Creates a record in state `new` with declared defaults applied.
    ///
    /// # Errors
    /// Returns schema errors for undeclared types or attributes.
    #[instrument(skip(self, initial))]
    pub fn create_record<'a, I>(&mut self, type_name: &str, initial: I) -> Result<Identity, CacheError>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let type_name = self.model_type(type_name)?;
        let initial: Attributes = initial
            .into_iter()
            .map(|(field, value)| (Arc::from(field), value))
            .collect();
        let identity = self.identities.create_local_identity(&type_name);
        if let Err(err) = self.records.create_local(identity, &type_name, initial) {
            self.identities.forget(identity);
            return Err(err.into());
        }
        self.batch(|s| s.after_change(identity, None, true))?;
        debug!(%identity, %type_name, "created local record");
        Ok(identity)
    }

    /// Writes a local attribute edit. Returns `true` if the visible value changed.
    ///
    /// # Errors
    /// Unknown identities or attributes, and lifecycle states that reject edits.
    pub fn set_attribute(
        &mut self,
        identity: Identity,
        field: &str,
        value: Value,
    ) -> Result<bool, CacheError> {
        let type_name = self.identities.type_of(identity)?;
        let field = self
            .schema
            .require(&type_name)?
            .attribute_def(field)
            .map(|def| Arc::clone(&def.name))
            .ok_or_else(|| SchemaError::UnknownAttribute {
                model: type_name.to_string(),
                attribute: field.to_owned(),
            })?;
        self.batch(|s| {
            let before = s.records.state(identity);
            let changed = s.records.set_attribute(identity, field, value)?;
            s.after_change(identity, before, changed)?;
            Ok(changed)
        })
    }

    /// `(canonical, current)` for every pending field.
    ///
    /// # Errors
    /// Returns [`StoreError::UnknownRecord`](crate::StoreError::UnknownRecord).
    pub fn changed_attributes(
        &self,
        identity: Identity,
    ) -> Result<BTreeMap<Arc<str>, (Option<Value>, Value)>, CacheError> {
        Ok(self.records.require(identity)?.changed_attributes())
    }

    /// Discards local edits. A `new` record is discarded entirely and a
    /// `deleted.uncommitted` record is restored.
    ///
    /// # Errors
    /// Unknown records and lifecycle violations.
    pub fn rollback_attributes(&mut self, identity: Identity) -> Result<bool, CacheError> {
        self.batch(|s| {
            let before = s.records.state(identity);
            let changed = s.records.rollback(identity)?;
            s.after_change(identity, before, changed)?;
            if before == Some(RecordState::New) {
                s.discard_edges(identity)?;
            }
            Ok(changed)
        })
    }

    /// Marks a record deleted and removes it from its live collection at once.
    ///
    /// Ad-hoc collections keep the record until the delete is acknowledged.
    /// A `new` record is discarded without a request.
    ///
    /// # Errors
    /// Unknown records and lifecycle violations (e.g. in-flight saves).
    pub fn delete_record(&mut self, identity: Identity) -> Result<RecordState, CacheError> {
        self.batch(|s| {
            let before = s.records.state(identity);
            let next = s.records.delete(identity)?;
            s.after_change(identity, before, false)?;
            if next == RecordState::DeletedSaved {
                s.discard_edges(identity)?;
            }
            Ok(next)
        })
    }

    /// Removes a record from the cache.
    ///
    /// The record leaves every collection. If other records still point at it,
    /// its identity and edges stay so they keep resolving; otherwise its
    /// outgoing edges are dropped and the identity is forgotten. Returns
    /// `true` if a record was removed.
    ///
    /// # Errors
    /// Returns [`StoreError::RecordInFlight`](crate::StoreError::RecordInFlight)
    /// while a save is pending; nothing is changed in that case.
    pub fn unload_record(&mut self, identity: Identity) -> Result<bool, CacheError> {
        self.batch(|s| s.drop_record(identity))
    }

    fn drop_record(&mut self, identity: Identity) -> Result<bool, CacheError> {
        let removed = self.records.unload(identity)?;
        self.collections.remove_everywhere(&mut self.bus, identity);
        if !self.graph.is_referenced(identity) && self.identities.get(identity).is_some() {
            let released = self.graph.forget_record(&self.identities, &mut self.bus, identity)?;
            self.identities.forget(identity);
            trace!(%identity, "identity forgotten");
            self.forget_orphans(released)?;
        }
        self.bus.enqueue(Subject::Record(identity), ChangeKind::Unloaded);
        self.bus.retire(Subject::Record(identity));
        Ok(removed.is_some())
    }

    fn discard_edges(&mut self, identity: Identity) -> Result<(), CacheError> {
        let released = self.graph.clear_record(&self.identities, &mut self.bus, identity)?;
        self.collections.remove_everywhere(&mut self.bus, identity);
        self.forget_orphans(released)
    }

    /// Forgets identities that lost their last referrer after their record was
    /// unloaded. Their own edges go too, which may release further identities.
    fn forget_orphans(&mut self, mut orphans: Vec<Identity>) -> Result<(), CacheError> {
        while let Some(orphan) = orphans.pop() {
            if self.records.get(orphan).is_some()
                || self.graph.is_referenced(orphan)
                || self.identities.get(orphan).is_none()
            {
                continue;
            }
            orphans.extend(self.graph.forget_record(&self.identities, &mut self.bus, orphan)?);
            self.identities.forget(orphan);
            trace!(identity = %orphan, "orphaned identity forgotten");
        }
        Ok(())
    }

    /// Sets a to-one relationship, keeping its inverse symmetric.
    ///
    /// # Errors
    /// Schema, inverse and target type errors; no edge changes on error.
    pub fn set_belongs_to(
        &mut self,
        identity: Identity,
        name: &str,
        target: Option<Identity>,
    ) -> Result<bool, CacheError> {
        self.batch(|s| s.graph.replace_to_one(&s.identities, &mut s.bus, identity, name, target))
    }

    /// Inserts into a to-many relationship at `position` (default: append).
    ///
    /// # Errors
    /// Schema, inverse and target type errors.
    pub fn add_to_has_many(
        &mut self,
        identity: Identity,
        name: &str,
        targets: &[Identity],
        position: Option<usize>,
    ) -> Result<usize, CacheError> {
        self.batch(|s| {
            s.graph
                .add_to_many(&s.identities, &mut s.bus, identity, name, targets, position)
        })
    }

    /// Removes members from a to-many relationship.
    ///
    /// # Errors
    /// Schema and inverse errors.
    pub fn remove_from_has_many(
        &mut self,
        identity: Identity,
        name: &str,
        targets: &[Identity],
    ) -> Result<usize, CacheError> {
        self.batch(|s| {
            s.graph
                .remove_from_many(&s.identities, &mut s.bus, identity, name, targets)
        })
    }

    // ----- collections -------------------------------------------------------

    /// The live collection of `type_name`.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownModel`] for undeclared types.
    pub fn live_collection(&mut self, type_name: &str) -> Result<CollectionId, CacheError> {
        let type_name = self.model_type(type_name)?;
        Ok(self.collections.live_collection_for(&type_name))
    }

    /// Looks up a collection.
    #[must_use]
    pub fn collection(&self, id: CollectionId) -> Option<&RecordArray> {
        self.collections.get(id)
    }

    /// Creates an ad-hoc collection over known identities.
    ///
    /// # Errors
    /// Unknown types and identities that do not resolve.
    pub fn create_adhoc_collection(
        &mut self,
        type_name: &str,
        query: Option<QueryDescriptor>,
        members: &[Identity],
    ) -> Result<CollectionId, CacheError> {
        let type_name = self.model_type(type_name)?;
        for m in members {
            self.identities.entry(*m)?;
        }
        Ok(self
            .collections
            .create_adhoc_collection(&type_name, query, members))
    }

    /// Deregisters a collection. Idempotent.
    pub fn destroy_collection(&mut self, id: CollectionId) -> bool {
        self.collections.destroy(&mut self.bus, id)
    }

    // ----- requests ----------------------------------------------------------

    /// Fetches one record through the adapter.
    ///
    /// A fetch for the same record while one is pending joins it. An `empty`
    /// record moves to `loading` until the request settles.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownModel`] for undeclared types.
    #[instrument(skip(self))]
    pub fn find_record(&mut self, type_name: &str, id: &str) -> Result<RequestHandle, CacheError> {
        let type_name = self.model_type(type_name)?;
        let identity = self.identities.identity_for(&type_name, id);
        let key = RequestKey {
            op: OpKind::FindRecord,
            target: RequestTarget::Record(identity),
        };
        let (handle, joined) = self.requests.begin_request(key, self.config.coalesce_reads);
        if joined {
            return Ok(handle);
        }
        self.records.ensure(identity, &type_name);
        if self.records.state(identity) == Some(RecordState::Empty) {
            self.batch(|s| {
                s.records.transition(identity, LifecycleEvent::FetchStarted)?;
                s.after_change(identity, Some(RecordState::Empty), false)
            })?;
        }
        self.pending.insert(handle, PendingOp::FindRecord(identity));
        let mut request = AdapterRequest::new(handle, OpKind::FindRecord, type_name);
        request.identity = Some(identity);
        request.id = Some(id.to_owned());
        self.adapter.dispatch(request);
        Ok(handle)
    }

    /// Fetches every record of a type; fulfilment fills the live collection.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownModel`] for undeclared types.
    #[instrument(skip(self))]
    pub fn find_all(&mut self, type_name: &str) -> Result<RequestHandle, CacheError> {
        let type_name = self.model_type(type_name)?;
        let key = RequestKey {
            op: OpKind::FindAll,
            target: RequestTarget::Type(Arc::clone(&type_name)),
        };
        let (handle, joined) = self.requests.begin_request(key, self.config.coalesce_reads);
        if !joined {
            self.pending
                .insert(handle, PendingOp::FindAll(Arc::clone(&type_name)));
            self.adapter
                .dispatch(AdapterRequest::new(handle, OpKind::FindAll, type_name));
        }
        Ok(handle)
    }

    /// Runs a query; fulfilment creates an ad-hoc collection of the primary data.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownModel`] for undeclared types.
    #[instrument(skip(self))]
    pub fn query(&mut self, type_name: &str, query: QueryDescriptor) -> Result<RequestHandle, CacheError> {
        let type_name = self.model_type(type_name)?;
        Ok(self.issue_query(type_name, query, None))
    }

    /// Re-runs the query behind an ad-hoc collection and replaces its members
    /// on fulfilment. For a live collection this is [`Self::find_all`].
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownCollection`] for destroyed collections.
    pub fn refresh_query(&mut self, collection: CollectionId) -> Result<RequestHandle, CacheError> {
        let array = self
            .collections
            .get(collection)
            .ok_or(CacheError::UnknownCollection(collection))?;
        let type_name = Arc::clone(array.type_name());
        match array.kind() {
            CollectionKind::Live => self.find_all(&type_name),
            CollectionKind::Adhoc => {
                let query = array.query().cloned().unwrap_or_default();
                Ok(self.issue_query(type_name, query, Some(collection)))
            }
        }
    }

    fn issue_query(
        &mut self,
        type_name: TypeName,
        query: QueryDescriptor,
        collection: Option<CollectionId>,
    ) -> RequestHandle {
        let key = RequestKey {
            op: OpKind::Query,
            target: RequestTarget::Query {
                type_name: Arc::clone(&type_name),
                key: query.key(),
            },
        };
        // A refresh belongs to one collection: it neither joins a plain query
        // nor can be joined by one.
        let coalesce = self.config.coalesce_reads && collection.is_none();
        let (handle, joined) = self.requests.begin_request(key, coalesce);
        if !joined {
            let mut request = AdapterRequest::new(handle, OpKind::Query, Arc::clone(&type_name));
            request.query = Some(query.clone());
            self.pending.insert(
                handle,
                PendingOp::Query {
                    type_name,
                    query,
                    collection,
                },
            );
            self.adapter.dispatch(request);
        }
        handle
    }

    /// Fetches a link-only relationship through its recorded link.
    ///
    /// # Errors
    /// Returns [`CacheError::NoRelationshipLink`] when no link is known, and
    /// schema errors for undeclared relationships.
    #[instrument(skip(self))]
    pub fn load_relationship(&mut self, identity: Identity, name: &str) -> Result<RequestHandle, CacheError> {
        let model = self.identities.type_of(identity)?;
        let def = self.schema.require_relationship(&model, name)?;
        let rel_name = Arc::clone(&def.name);
        let target_type = Arc::clone(&def.target);
        let href = self
            .graph
            .relationship(identity, name)
            .and_then(RelationshipState::links)
            .and_then(RelationshipLinks::fetch_href)
            .map(str::to_owned)
            .ok_or_else(|| CacheError::NoRelationshipLink {
                identity,
                relationship: name.to_owned(),
            })?;
        let key = RequestKey {
            op: OpKind::FindRelationship,
            target: RequestTarget::Relationship {
                identity,
                name: Arc::clone(&rel_name),
            },
        };
        let (handle, joined) = self.requests.begin_request(key, self.config.coalesce_reads);
        if !joined {
            self.pending.insert(
                handle,
                PendingOp::FindRelationship {
                    identity,
                    name: rel_name,
                },
            );
            let mut request = AdapterRequest::new(handle, OpKind::FindRelationship, target_type);
            request.identity = Some(identity);
            request.link = Some(href);
            self.adapter.dispatch(request);
        }
        Ok(handle)
    }

    /// Saves a record: create for `new`, delete for `deleted.uncommitted`,
    /// update otherwise. A record with a pending save returns that handle.
    ///
    /// # Errors
    /// Unknown records and states that cannot be saved.
    #[instrument(skip(self))]
    pub fn save_record(&mut self, identity: Identity) -> Result<RequestHandle, CacheError> {
        let state = self.records.require(identity)?.state();
        if state.is_in_flight() {
            let pending = [OpKind::CreateRecord, OpKind::UpdateRecord, OpKind::DeleteRecord]
                .into_iter()
                .find_map(|op| {
                    self.requests.pending(&RequestKey {
                        op,
                        target: RequestTarget::Record(identity),
                    })
                });
            if let Some(handle) = pending {
                return Ok(handle);
            }
        }
        let op = match state {
            RecordState::New => OpKind::CreateRecord,
            RecordState::DeletedUncommitted => OpKind::DeleteRecord,
            _ => OpKind::UpdateRecord,
        };
        self.batch(|s| {
            s.records.begin_save(identity)?;
            s.after_change(identity, Some(state), false)
        })?;
        let snapshot = self.snapshot(identity)?;
        let key = RequestKey {
            op,
            target: RequestTarget::Record(identity),
        };
        let (handle, _) = self.requests.begin_request(key, false);
        self.pending.insert(handle, PendingOp::Save { identity, op });
        let mut request = AdapterRequest::new(handle, op, Arc::clone(&snapshot.type_name));
        request.identity = Some(identity);
        request.id.clone_from(&snapshot.id);
        request.snapshot = Some(snapshot);
        self.adapter.dispatch(request);
        Ok(handle)
    }

    /// Settles a pending request with the adapter's answer.
    ///
    /// Returns `Ok(false)` for a request that already settled (a late answer
    /// after an abort). A document that fails validation rejects the request
    /// and leaves the cache as before the request; identity or schema
    /// configuration errors are returned after the request is rejected.
    ///
    /// # Errors
    /// [`CacheError::UnknownRequest`] for handles this store never issued,
    /// and structural errors found while ingesting the answer.
    #[instrument(skip(self, outcome))]
    pub fn settle_request(
        &mut self,
        handle: RequestHandle,
        outcome: RequestOutcome,
    ) -> Result<bool, CacheError> {
        let Some(op) = self.pending.remove(&handle) else {
            // Unknown handles error out; settled ones report a late answer.
            return self
                .requests
                .settle(handle, RequestStatus::Aborted, None, None);
        };
        match outcome {
            RequestOutcome::Fulfilled(doc) => self.fulfil(handle, &op, doc.as_ref()),
            RequestOutcome::Rejected(error) => {
                self.fail(handle, &op, RequestStatus::Rejected, Some(error))
            }
            RequestOutcome::Aborted => self.fail(handle, &op, RequestStatus::Aborted, None),
        }
    }

    /// Aborts a pending request. State committed before the abort stays.
    ///
    /// # Errors
    /// As for [`Self::settle_request`].
    pub fn abort_request(&mut self, handle: RequestHandle) -> Result<bool, CacheError> {
        self.settle_request(handle, RequestOutcome::Aborted)
    }

    fn fail(
        &mut self,
        handle: RequestHandle,
        op: &PendingOp,
        status: RequestStatus,
        error: Option<RequestError>,
    ) -> Result<bool, CacheError> {
        self.batch(|s| s.revert(op))?;
        debug!(%handle, ?status, "request failed");
        self.requests.settle(handle, status, None, error)
    }

    fn fulfil(
        &mut self,
        handle: RequestHandle,
        op: &PendingOp,
        doc: Option<&Document>,
    ) -> Result<bool, CacheError> {
        let empty = Document::default();
        let doc = doc.unwrap_or(&empty);
        let plan = match self.prepare(op, doc) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(%handle, error = %err, "response rejected at ingestion");
                let message = RequestError::new(&err.to_string());
                self.fail(handle, op, RequestStatus::Rejected, Some(message))?;
                return if err.is_structural() { Err(err) } else { Ok(true) };
            }
        };
        match self.batch(|s| s.commit(op, plan)) {
            Ok(result) => self
                .requests
                .settle(handle, RequestStatus::Fulfilled, Some(result), None),
            Err(err) => {
                let message = RequestError::new(&err.to_string());
                self.requests
                    .settle(handle, RequestStatus::Rejected, None, Some(message))?;
                Err(err)
            }
        }
    }

    /// Validation for a fulfilled request. The only mutation is the server id
    /// merge for created records, done last.
    fn prepare<'d>(&mut self, op: &PendingOp, doc: &'d Document) -> Result<Plan<'d>, CacheError> {
        let mut plan = self.plan(doc)?;
        match op {
            PendingOp::FindRelationship { identity, name } => {
                let model = self.identities.type_of(*identity)?;
                let def = self.schema.require_relationship(&model, name)?;
                for r in doc.primary() {
                    if self.config.strict_linkage_types && r.type_name.as_str() != &*def.target {
                        return Err(DocumentError::LinkageTypeMismatch {
                            model: model.to_string(),
                            relationship: name.to_string(),
                            expected: def.target.to_string(),
                            found: r.type_name.clone(),
                        }
                        .into());
                    }
                }
            }
            PendingOp::Save {
                identity,
                op: OpKind::CreateRecord,
            } => {
                plan.merged = self.merge_created(*identity, doc)?;
            }
            _ => {}
        }
        Ok(plan)
    }

    fn merge_created(&mut self, identity: Identity, doc: &Document) -> Result<bool, CacheError> {
        let entry = self.identities.entry(identity)?;
        if entry.id().is_some() {
            return Ok(false);
        }
        let type_name = Arc::clone(entry.type_name());
        let Some(id) = doc
            .primary()
            .find(|r| r.type_name.as_str() == &*type_name)
            .and_then(|r| r.id.as_deref())
        else {
            return Ok(false);
        };
        self.identities.merge_identity(identity, id)?;
        debug!(%identity, id, "server id assigned");
        Ok(true)
    }

    fn commit(&mut self, op: &PendingOp, plan: Plan<'_>) -> Result<RequestResult, CacheError> {
        let meta = plan.doc.meta.clone();
        let links: BTreeMap<String, Link> = plan.doc.links.clone();
        match op {
            PendingOp::FindRecord(identity) => {
                self.apply(plan)?;
                if self.records.state(*identity) == Some(RecordState::Loading) {
                    self.records.transition(*identity, LifecycleEvent::FetchFailed)?;
                    self.after_change(*identity, Some(RecordState::Loading), false)?;
                }
                Ok(RequestResult::Record(*identity))
            }
            PendingOp::FindAll(type_name) => {
                self.apply(plan)?;
                Ok(RequestResult::Collection(
                    self.collections.live_collection_for(type_name),
                ))
            }
            PendingOp::Query {
                type_name,
                query,
                collection,
            } => {
                let members = self.apply(plan)?.primary.identities();
                let id = collection.unwrap_or_else(|| {
                    self.collections
                        .create_adhoc_collection(type_name, Some(query.clone()), &[])
                });
                if !self.collections.refresh(&mut self.bus, id, &members, meta, links) {
                    return Ok(RequestResult::Nothing);
                }
                Ok(RequestResult::Collection(id))
            }
            PendingOp::FindRelationship { identity, name } => {
                let members = self.apply(plan)?.primary.identities();
                let model = self.identities.type_of(*identity)?;
                let data = match self.schema.require_relationship(&model, name)?.kind {
                    RelationshipKind::BelongsTo => PayloadData::ToOne(members.first().copied()),
                    RelationshipKind::HasMany => PayloadData::ToMany(members.clone()),
                };
                let payload = RelationshipPayload {
                    data: Some(data),
                    ..RelationshipPayload::default()
                };
                self.graph
                    .push_relationship_data(&self.identities, &mut self.bus, *identity, name, payload)?;
                Ok(RequestResult::Records(members))
            }
            PendingOp::Save {
                identity,
                op: OpKind::DeleteRecord,
            } => self.commit_delete(*identity, plan),
            PendingOp::Save { identity, .. } => {
                let before = self.records.state(*identity);
                if plan.merged {
                    self.bus.enqueue(Subject::Record(*identity), ChangeKind::Identity);
                }
                self.records.commit_save(*identity)?;
                self.after_change(*identity, before, false)?;
                self.apply(plan)?;
                self.graph.clear_dirty(*identity);
                Ok(RequestResult::Record(*identity))
            }
        }
    }

    fn commit_delete(&mut self, identity: Identity, plan: Plan<'_>) -> Result<RequestResult, CacheError> {
        let before = self.records.state(identity);
        self.records.commit_save(identity)?;
        self.after_change(identity, before, false)?;
        self.apply(plan)?;
        self.discard_edges(identity)?;
        if self.config.unload_on_delete_ack {
            self.drop_record(identity)?;
        }
        Ok(RequestResult::Nothing)
    }

    /// Undoes what issuing `op` did to record state.
    fn revert(&mut self, op: &PendingOp) -> Result<(), CacheError> {
        match op {
            PendingOp::FindRecord(identity) => {
                if self.records.state(*identity) == Some(RecordState::Loading) {
                    self.records.transition(*identity, LifecycleEvent::FetchFailed)?;
                    self.after_change(*identity, Some(RecordState::Loading), false)?;
                }
            }
            PendingOp::Save { identity, .. } => {
                let before = self.records.state(*identity);
                if before.is_some_and(RecordState::is_in_flight) {
                    self.records.reject_save(*identity)?;
                    self.after_change(*identity, before, false)?;
                }
            }
            PendingOp::FindAll(_) | PendingOp::Query { .. } | PendingOp::FindRelationship { .. } => {}
        }
        Ok(())
    }

    /// Looks up a request record.
    #[must_use]
    pub fn request(&self, handle: RequestHandle) -> Option<&RequestRecord> {
        self.requests.get(handle)
    }

    /// Handles of every pending request, oldest first.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<RequestHandle> {
        self.requests.pending_handles()
    }

    /// Pending records and latest completed record per operation for `target`.
    #[must_use]
    pub fn request_state(&self, target: &RequestTarget) -> RequestState {
        self.requests.state_for(target)
    }

    /// Runs `callback` once when `handle` settles.
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownRequest`] for handles no longer retained.
    pub fn when_settled<F>(&mut self, handle: RequestHandle, callback: F) -> Result<(), CacheError>
    where
        F: FnOnce(&RequestRecord) + 'static,
    {
        self.requests.when_settled(handle, callback)
    }

    /// Registers `callback` for every settlement concerning `identity`.
    pub fn subscribe_requests<F>(&mut self, identity: Identity, callback: F) -> RequestSubscriptionId
    where
        F: FnMut(&RequestRecord) + 'static,
    {
        self.requests.subscribe(identity, callback)
    }

    /// Removes a request listener.
    pub fn unsubscribe_requests(&mut self, id: RequestSubscriptionId) -> bool {
        self.requests.unsubscribe(id)
    }

    // ----- snapshots and notifications --------------------------------------

    /// Captures a record and what the graph knows about its relationships.
    ///
    /// # Errors
    /// Unknown identities or records.
    pub fn snapshot(&self, identity: Identity) -> Result<Snapshot, CacheError> {
        Snapshot::capture(&self.schema, &self.identities, &self.records, &self.graph, identity)
    }

    /// Registers `callback` for changes to `filter` (`None`: every subject).
    pub fn subscribe<F>(&mut self, filter: Option<Subject>, callback: F) -> SubscriptionId
    where
        F: FnMut(&ChangeNotice) + 'static,
    {
        self.bus.subscribe(filter, callback)
    }

    /// Removes a change subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Runs `f` as one batch: subscribers are notified once, after `f` returns.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.bus.begin();
        self.graph.begin_batch();
        let out = f(self);
        self.graph.end_batch();
        self.bus.end();
        out
    }

    /// Aborts pending requests, destroys every collection and drops all
    /// subscriptions. Safe to call more than once.
    pub fn shutdown(&mut self) {
        for handle in self.pending_requests() {
            if let Err(err) = self.settle_request(handle, RequestOutcome::Aborted) {
                warn!(%handle, error = %err, "abort during shutdown failed");
            }
        }
        self.collections.teardown(&mut self.bus);
        self.requests.clear_callbacks();
        self.bus.clear_subscribers();
        debug!("store shut down");
    }

    fn model_type(&mut self, type_name: &str) -> Result<TypeName, CacheError> {
        self.schema.require(type_name)?;
        Ok(self.identities.intern_type(type_name))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::IdentityError;
    use crate::schema::ModelDef;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn schema() -> Schema {
        Schema::new()
            .model(
                ModelDef::new("post")
                    .attr("title")
                    .belongs_to("author", "person")
                    .has_many("comments", "comment"),
            )
            .model(ModelDef::new("person").attr("name").has_many("posts", "post"))
            .model(ModelDef::new("comment").attr("body").belongs_to("post", "post"))
    }

    fn doc(json: &str) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn push_links_inverse_and_fills_live_collection() {
        let mut store = Store::new(schema());
        let pushed = store
            .push(&doc(
                r#"{ "data": { "type": "post", "id": "1", "attributes": { "title": "hi" },
                      "relationships": { "author": { "data": { "type": "person", "id": "9" } } } },
                     "included": [ { "type": "person", "id": "9", "attributes": { "name": "ada" } } ] }"#,
            ))
            .unwrap();
        let post = store.lookup("post", "1").unwrap();
        let person = store.lookup("person", "9").unwrap();
        assert_eq!(pushed.primary, Primary::Single(post));
        assert_eq!(pushed.included, vec![person]);
        assert_eq!(store.belongs_to(post, "author"), Some(person));
        assert_eq!(store.has_many(person, "posts"), &[post]);
        let live = store.live_collection("post").unwrap();
        assert_eq!(store.collection(live).unwrap().members(), &[post]);
    }

    #[test]
    fn failed_plan_applies_nothing() {
        let mut store = Store::new(schema());
        let err = store
            .push(&doc(
                r#"{ "data": { "type": "post", "id": "1" },
                     "included": [ { "type": "ghost", "id": "2" } ] }"#,
            ))
            .unwrap_err();
        assert!(matches!(err, CacheError::Schema(SchemaError::UnknownModel(_))));
        assert!(store.lookup("post", "1").is_none());
        assert!(store.records().is_empty());
    }

    #[test]
    fn lid_reused_across_types_in_one_document_is_rejected() {
        let mut store = Store::new(schema());
        let err = store
            .push(&doc(
                r#"{ "data": [ { "type": "post", "lid": "x" }, { "type": "person", "lid": "x" } ] }"#,
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Identity(IdentityError::LidTypeMismatch { .. })
        ));
        assert!(store.identities().is_empty());
    }

    #[test]
    fn wrong_cardinality_is_rejected() {
        let mut store = Store::new(schema());
        let err = store
            .push(&doc(
                r#"{ "data": { "type": "post", "id": "1",
                      "relationships": { "author": { "data": [ { "type": "person", "id": "9" } ] } } } }"#,
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Document(DocumentError::LinkageCardinality { .. })
        ));
    }

    #[test]
    fn find_record_moves_through_loading() {
        let mut store = Store::new(schema());
        let handle = store.find_record("post", "1").unwrap();
        let joined = store.find_record("post", "1").unwrap();
        assert_eq!(handle, joined);
        let post = store.lookup("post", "1").unwrap();
        assert_eq!(store.record(post).unwrap().state(), RecordState::Loading);

        let answer = doc(r#"{ "data": { "type": "post", "id": "1", "attributes": { "title": "t" } } }"#);
        assert!(store
            .settle_request(handle, RequestOutcome::Fulfilled(Some(answer)))
            .unwrap());
        assert_eq!(store.record(post).unwrap().state(), RecordState::LoadedSaved);
        assert_eq!(
            store.request(handle).unwrap().result,
            Some(RequestResult::Record(post))
        );
        assert!(!store
            .settle_request(handle, RequestOutcome::Aborted)
            .unwrap());
    }

    #[test]
    fn rejected_fetch_returns_record_to_empty() {
        let mut store = Store::new(schema());
        let handle = store.find_record("post", "1").unwrap();
        store
            .settle_request(handle, RequestOutcome::Rejected(RequestError::new("boom")))
            .unwrap();
        let post = store.lookup("post", "1").unwrap();
        assert_eq!(store.record(post).unwrap().state(), RecordState::Empty);
    }

    #[test]
    fn create_save_merges_server_id_and_notifies_once() {
        let mut store = Store::new(schema());
        let post = store
            .create_record("post", [("title", json!("draft"))])
            .unwrap();
        let handle = store.save_record(post).unwrap();
        assert_eq!(store.record(post).unwrap().state(), RecordState::NewInFlight);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe(Some(Subject::Record(post)), move |n| sink.borrow_mut().push(*n));

        let answer = doc(r#"{ "data": { "type": "post", "id": "77", "attributes": { "title": "draft" } } }"#);
        store
            .settle_request(handle, RequestOutcome::Fulfilled(Some(answer)))
            .unwrap();
        assert_eq!(store.lookup("post", "77"), Some(post));
        assert_eq!(store.record(post).unwrap().state(), RecordState::LoadedSaved);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].kinds.contains(ChangeKind::Identity));
        assert!(seen[0].kinds.contains(ChangeKind::State));
    }

    #[test]
    fn unload_keeps_referenced_identity() {
        let mut store = Store::new(schema());
        store
            .push(&doc(
                r#"{ "data": { "type": "post", "id": "1",
                      "relationships": { "author": { "data": { "type": "person", "id": "9" } } } } }"#,
            ))
            .unwrap();
        let post = store.lookup("post", "1").unwrap();
        let person = store.lookup("person", "9").unwrap();
        assert!(store.unload_record(person).unwrap());
        assert!(store.record(person).is_none());
        assert_eq!(store.belongs_to(post, "author"), Some(person));
        assert!(store.identity_entry(person).is_some());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = StoreConfig {
            lid_prefix: String::new(),
            ..StoreConfig::default()
        };
        let err = Store::builder(schema()).config(config).build().unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
