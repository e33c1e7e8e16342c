// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Relationship graph with symmetric inverse maintenance.
//!
//! Edges are stored per `(identity, relationship)` and materialized lazily on
//! first write. Every public mutation keeps inverses symmetric: when
//! `post.comments` gains `c`, `c.post` becomes `post` in the same call, and
//! `c`'s previous post loses `c`. Callers run mutations inside a
//! [`ChangeBus`] batch so observers only see the finished state.
//!
//! `incoming` counts edges pointing at each identity. It answers "is anything
//! still referencing this resource" without scanning the graph.
use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::{trace, warn};

use crate::doc::RelationshipLinks;
use crate::error::CacheError;
use crate::ident::{Identity, IdentityRegistry};
use crate::inverse::{InverseInfo, InverseResolver};
use crate::notify::{ChangeBus, ChangeKind, Subject};
use crate::ordered::IdentitySet;
use crate::schema::{RelationshipKind, Schema, SchemaError};

/// Concrete members of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members {
    /// To-one slot.
    ToOne(Option<Identity>),
    /// To-many ordered set.
    ToMany(IdentitySet),
}

impl Members {
    fn empty(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::BelongsTo => Self::ToOne(None),
            RelationshipKind::HasMany => Self::ToMany(IdentitySet::new()),
        }
    }

    /// Members as a list (zero or one entry for to-one).
    #[must_use]
    pub fn to_vec(&self) -> Vec<Identity> {
        match self {
            Self::ToOne(one) => one.iter().copied().collect(),
            Self::ToMany(set) => set.as_slice().to_vec(),
        }
    }

    /// `true` when `identity` is a member.
    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        match self {
            Self::ToOne(one) => *one == Some(identity),
            Self::ToMany(set) => set.contains(identity),
        }
    }

    /// `true` when there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::ToOne(one) => one.is_none(),
            Self::ToMany(set) => set.is_empty(),
        }
    }
}

/// What the graph knows about one relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    /// Never materialized.
    Unknown,
    /// Concrete members are known.
    Known,
    /// Only a fetchable link is known.
    LinkOnly,
    /// Authoritatively empty.
    Empty,
}

/// State of one `(identity, relationship)` edge set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipState {
    members: Members,
    has_data: bool,
    links: Option<RelationshipLinks>,
    meta: Option<Value>,
    locally_dirty: bool,
}

impl RelationshipState {
    fn new(kind: RelationshipKind) -> Self {
        Self {
            members: Members::empty(kind),
            has_data: false,
            links: None,
            meta: None,
            locally_dirty: false,
        }
    }

    /// Concrete members.
    #[must_use]
    pub fn members(&self) -> &Members {
        &self.members
    }

    /// Links from the most recent payload that carried any.
    #[must_use]
    pub fn links(&self) -> Option<&RelationshipLinks> {
        self.links.as_ref()
    }

    /// Metadata from the most recent payload that carried any.
    #[must_use]
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// `true` when local edits have not been confirmed by a payload or save.
    #[must_use]
    pub fn is_locally_dirty(&self) -> bool {
        self.locally_dirty
    }

    /// Known, link-only, empty, or unknown.
    #[must_use]
    pub fn data_state(&self) -> EdgeState {
        if !self.members.is_empty() {
            EdgeState::Known
        } else if self.has_data {
            EdgeState::Empty
        } else if self.links.is_some() {
            EdgeState::LinkOnly
        } else {
            EdgeState::Unknown
        }
    }
}

/// Membership carried by a relationship payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadData {
    /// To-one reference (`None` for explicit `null`).
    ToOne(Option<Identity>),
    /// Full to-many membership.
    ToMany(Vec<Identity>),
}

/// Normalized relationship payload for [`RelationshipGraph::push_relationship_data`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipPayload {
    /// Concrete membership; `None` when the payload carried no `data`.
    pub data: Option<PayloadData>,
    /// Links, if present.
    pub links: Option<RelationshipLinks>,
    /// Metadata, if present.
    pub meta: Option<Value>,
}

type BatchKey = (Identity, Arc<str>);

/// Bidirectional edge store.
pub struct RelationshipGraph {
    schema: Arc<Schema>,
    resolver: Box<dyn InverseResolver>,
    strict_types: bool,
    states: FxHashMap<Identity, BTreeMap<Arc<str>, RelationshipState>>,
    incoming: FxHashMap<Identity, FxHashMap<Identity, u32>>,
    batch_depth: u32,
    batch_added: FxHashMap<BatchKey, FxHashSet<Identity>>,
}

impl std::fmt::Debug for RelationshipGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipGraph")
            .field("records", &self.states.len())
            .field("referenced", &self.incoming.len())
            .field("batch_depth", &self.batch_depth)
            .finish_non_exhaustive()
    }
}

impl RelationshipGraph {
    /// Creates an empty graph.
    ///
    /// With `strict_types`, every edge target must have exactly the declared
    /// target type.
    #[must_use]
    pub fn new(schema: Arc<Schema>, resolver: Box<dyn InverseResolver>, strict_types: bool) -> Self {
        Self {
            schema,
            resolver,
            strict_types,
            states: FxHashMap::default(),
            incoming: FxHashMap::default(),
            batch_depth: 0,
            batch_added: FxHashMap::default(),
        }
    }

    /// Resolves the inverse of `model.relationship` through the injected resolver.
    ///
    /// # Errors
    /// Propagates resolver failures (ambiguity, bad declarations).
    pub fn inverse_for(
        &mut self,
        model: &str,
        relationship: &str,
    ) -> Result<Option<InverseInfo>, SchemaError> {
        self.resolver.inverse_for(&self.schema, model, relationship)
    }

    /// Opens an ingestion batch. Members added during the batch survive an
    /// authoritative push of the same relationship later in the batch.
    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Closes an ingestion batch.
    pub fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 {
            self.batch_added.clear();
        }
    }

    /// State of one relationship, if it was ever materialized.
    #[must_use]
    pub fn relationship(&self, identity: Identity, name: &str) -> Option<&RelationshipState> {
        self.states.get(&identity)?.get(name)
    }

    /// Every materialized relationship of `identity`, in name order.
    pub fn relationships(
        &self,
        identity: Identity,
    ) -> impl Iterator<Item = (&Arc<str>, &RelationshipState)> {
        self.states.get(&identity).into_iter().flatten()
    }

    /// Current to-one target.
    #[must_use]
    pub fn belongs_to(&self, identity: Identity, name: &str) -> Option<Identity> {
        match self.relationship(identity, name)?.members {
            Members::ToOne(target) => target,
            Members::ToMany(_) => None,
        }
    }

    /// Current to-many members (empty when unknown).
    #[must_use]
    pub fn has_many(&self, identity: Identity, name: &str) -> &[Identity] {
        match self.relationship(identity, name).map(|s| &s.members) {
            Some(Members::ToMany(set)) => set.as_slice(),
            _ => &[],
        }
    }

    /// `true` when any edge points at `identity`.
    #[must_use]
    pub fn is_referenced(&self, identity: Identity) -> bool {
        self.incoming.get(&identity).is_some_and(|m| !m.is_empty())
    }

    /// Identities with an edge pointing at `identity`, sorted.
    #[must_use]
    pub fn referrers(&self, identity: Identity) -> Vec<Identity> {
        let mut out: Vec<Identity> = self
            .incoming
            .get(&identity)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    /// Replaces a to-one edge, keeping the inverse symmetric.
    ///
    /// Returns `true` if the edge changed.
    ///
    /// # Errors
    /// Schema errors for unknown or to-many relationships, inverse resolution
    /// errors, and [`CacheError::TargetTypeMismatch`] under strict typing.
    pub fn replace_to_one(
        &mut self,
        ids: &IdentityRegistry,
        bus: &mut ChangeBus,
        identity: Identity,
        name: &str,
        target: Option<Identity>,
    ) -> Result<bool, CacheError> {
        let model = ids.type_of(identity)?;
        self.require_kind(&model, name, RelationshipKind::BelongsTo)?;
        if let Some(t) = target {
            self.check_target(ids, &model, name, t)?;
        }
        let changed = self.set_one_symmetric(bus, identity, &model, name, target)?;
        self.mark_local(identity, &model, name)?;
        Ok(changed)
    }

    /// Inserts targets into a to-many edge at `position` (default: append).
    ///
    /// Targets already present are skipped without reordering. Returns the
    /// number of targets actually inserted.
    ///
    /// # Errors
    /// As for [`Self::replace_to_one`]; no edge is touched if any target fails
    /// the type check.
    pub fn add_to_many(
        &mut self,
        ids: &IdentityRegistry,
        bus: &mut ChangeBus,
        identity: Identity,
        name: &str,
        targets: &[Identity],
        position: Option<usize>,
    ) -> Result<usize, CacheError> {
        let model = ids.type_of(identity)?;
        self.require_kind(&model, name, RelationshipKind::HasMany)?;
        for t in targets {
            self.check_target(ids, &model, name, *t)?;
        }
        self.inverse_for(&model, name)?;
        let mut inserted = 0;
        for target in targets {
            let at = position.map(|p| p + inserted);
            if self.link(bus, identity, &model, name, *target, at)? {
                inserted += 1;
            }
        }
        self.mark_local(identity, &model, name)?;
        Ok(inserted)
    }

    /// Removes targets from a to-many edge and their inverse entries.
    ///
    /// Returns the number of targets actually removed.
    ///
    /// # Errors
    /// Schema and inverse resolution errors.
    pub fn remove_from_many(
        &mut self,
        ids: &IdentityRegistry,
        bus: &mut ChangeBus,
        identity: Identity,
        name: &str,
        targets: &[Identity],
    ) -> Result<usize, CacheError> {
        let model = ids.type_of(identity)?;
        self.require_kind(&model, name, RelationshipKind::HasMany)?;
        self.inverse_for(&model, name)?;
        let mut removed = 0;
        for target in targets {
            if self.unlink(bus, identity, &model, name, *target)? {
                removed += 1;
            }
        }
        self.mark_local(identity, &model, name)?;
        Ok(removed)
    }

    /// Bulk ingestion of one relationship payload.
    ///
    /// - Concrete data is authoritative: the membership becomes exactly the
    ///   payload's, plus any member added earlier in the current batch.
    /// - A link alone never erases known members unless it replaces a
    ///   different, previously recorded link.
    /// - Explicit empty data clears known members.
    ///
    /// # Errors
    /// Schema, inverse resolution, cardinality and type errors.
    pub fn push_relationship_data(
        &mut self,
        ids: &IdentityRegistry,
        bus: &mut ChangeBus,
        identity: Identity,
        name: &str,
        payload: RelationshipPayload,
    ) -> Result<(), CacheError> {
        let model = ids.type_of(identity)?;
        let kind = self.schema.require_relationship(&model, name)?.kind;
        self.inverse_for(&model, name)?;
        let RelationshipPayload { data, links, meta } = payload;

        if let Some(new_links) = links {
            let previous = self
                .slot(identity, &model, name)?
                .links
                .as_ref()
                .and_then(|l| l.fetch_href().map(str::to_owned));
            let stale = data.is_none()
                && previous.is_some_and(|p| Some(p.as_str()) != new_links.fetch_href());
            if stale {
                let members = self.slot(identity, &model, name)?.members.to_vec();
                if !members.is_empty() {
                    warn!(%identity, relationship = name, dropped = members.len(), "link changed; discarding known members");
                }
                for m in members {
                    self.unlink(bus, identity, &model, name, m)?;
                }
                self.slot(identity, &model, name)?.has_data = false;
            }
            self.slot(identity, &model, name)?.links = Some(new_links);
            bus.enqueue(Subject::Record(identity), ChangeKind::Relationships);
        }
        if let Some(meta) = meta {
            self.slot(identity, &model, name)?.meta = Some(meta);
            bus.enqueue(Subject::Record(identity), ChangeKind::Relationships);
        }

        match (kind, data) {
            (_, None) => {}
            (RelationshipKind::BelongsTo, Some(PayloadData::ToOne(target))) => {
                if let Some(t) = target {
                    self.check_target(ids, &model, name, t)?;
                }
                self.set_one_symmetric(bus, identity, &model, name, target)?;
                let state = self.slot(identity, &model, name)?;
                state.has_data = true;
                state.locally_dirty = false;
            }
            (RelationshipKind::HasMany, Some(PayloadData::ToMany(targets))) => {
                for t in &targets {
                    self.check_target(ids, &model, name, *t)?;
                }
                self.replace_many(bus, identity, &model, name, targets)?;
            }
            (expected, Some(_)) => {
                return Err(SchemaError::RelationshipKindMismatch {
                    model: model.to_string(),
                    relationship: name.to_owned(),
                    expected,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Removes every edge touching `identity`, in both directions, and drops
    /// its relationship state.
    ///
    /// Returns the other identities this left without any incoming edge.
    ///
    /// # Errors
    /// Fails if a referring identity no longer resolves.
    pub fn clear_record(
        &mut self,
        ids: &IdentityRegistry,
        bus: &mut ChangeBus,
        identity: Identity,
    ) -> Result<Vec<Identity>, CacheError> {
        let model = ids.type_of(identity)?;
        let outgoing: Vec<(Arc<str>, Vec<Identity>)> = self
            .relationships(identity)
            .map(|(name, state)| (Arc::clone(name), state.members.to_vec()))
            .collect();
        let mut touched: Vec<Identity> = Vec::new();
        for (name, members) in outgoing {
            for m in members {
                self.unlink(bus, identity, &model, &name, m)?;
                touched.push(m);
            }
        }
        for source in self.referrers(identity) {
            let source_model = ids.type_of(source)?;
            let names: Vec<Arc<str>> = self
                .relationships(source)
                .filter(|(_, s)| s.members.contains(identity))
                .map(|(n, _)| Arc::clone(n))
                .collect();
            for name in names {
                self.unlink(bus, source, &source_model, &name, identity)?;
            }
            touched.push(source);
        }
        self.states.remove(&identity);
        if self.is_referenced(identity) {
            return Err(CacheError::InternalCorruption(
                "edges still reference a cleared record",
            ));
        }
        self.incoming.remove(&identity);
        touched.sort_unstable();
        touched.dedup();
        touched.retain(|t| *t != identity && !self.is_referenced(*t));
        Ok(touched)
    }

    /// Drops relationship state of an unreferenced identity.
    ///
    /// # Errors
    /// As for [`Self::clear_record`]; forgetting a referenced identity is
    /// [`CacheError::InternalCorruption`].
    pub fn forget_record(
        &mut self,
        ids: &IdentityRegistry,
        bus: &mut ChangeBus,
        identity: Identity,
    ) -> Result<Vec<Identity>, CacheError> {
        if self.is_referenced(identity) {
            return Err(CacheError::InternalCorruption(
                "forgetting a referenced record",
            ));
        }
        self.clear_record(ids, bus, identity)
    }

    /// Marks every relationship of `identity` as confirmed by the server.
    pub fn clear_dirty(&mut self, identity: Identity) {
        if let Some(states) = self.states.get_mut(&identity) {
            for state in states.values_mut() {
                state.locally_dirty = false;
            }
        }
    }

    // ----- internals -------------------------------------------------------

    fn require_kind(
        &self,
        model: &str,
        name: &str,
        expected: RelationshipKind,
    ) -> Result<(), SchemaError> {
        let def = self.schema.require_relationship(model, name)?;
        if def.kind != expected {
            return Err(SchemaError::RelationshipKindMismatch {
                model: model.to_owned(),
                relationship: name.to_owned(),
                expected,
            });
        }
        Ok(())
    }

    fn check_target(
        &self,
        ids: &IdentityRegistry,
        model: &str,
        name: &str,
        target: Identity,
    ) -> Result<(), CacheError> {
        let found = ids.type_of(target)?;
        if !self.strict_types {
            return Ok(());
        }
        let def = self.schema.require_relationship(model, name)?;
        if found != def.target {
            return Err(CacheError::TargetTypeMismatch {
                model: model.to_owned(),
                relationship: name.to_owned(),
                expected: def.target.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn slot(
        &mut self,
        owner: Identity,
        model: &str,
        name: &str,
    ) -> Result<&mut RelationshipState, SchemaError> {
        let def = self.schema.require_relationship(model, name)?;
        let kind = def.kind;
        let key = Arc::clone(&def.name);
        Ok(self
            .states
            .entry(owner)
            .or_default()
            .entry(key)
            .or_insert_with(|| RelationshipState::new(kind)))
    }

    fn mark_local(&mut self, owner: Identity, model: &str, name: &str) -> Result<(), SchemaError> {
        let state = self.slot(owner, model, name)?;
        state.locally_dirty = true;
        state.has_data = true;
        Ok(())
    }

    fn increment(&mut self, target: Identity, owner: Identity) {
        *self
            .incoming
            .entry(target)
            .or_default()
            .entry(owner)
            .or_default() += 1;
    }

    fn decrement(&mut self, target: Identity, owner: Identity) {
        if let Some(owners) = self.incoming.get_mut(&target) {
            if let Some(count) = owners.get_mut(&owner) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    owners.remove(&owner);
                }
            }
            if owners.is_empty() {
                self.incoming.remove(&target);
            }
        }
    }

    fn note_added(&mut self, owner: Identity, name: &str, target: Identity) {
        if self.batch_depth > 0 {
            self.batch_added
                .entry((owner, Arc::from(name)))
                .or_default()
                .insert(target);
        }
    }

    /// One-sided to-one write. Returns the previous target.
    fn set_one(
        &mut self,
        bus: &mut ChangeBus,
        owner: Identity,
        model: &str,
        name: &str,
        target: Option<Identity>,
    ) -> Result<Option<Identity>, CacheError> {
        let state = self.slot(owner, model, name)?;
        let Members::ToOne(current) = &mut state.members else {
            return Err(CacheError::InternalCorruption("to-one slot holds to-many members"));
        };
        let previous = std::mem::replace(current, target);
        if previous == target {
            return Ok(previous);
        }
        if let Some(p) = previous {
            self.decrement(p, owner);
        }
        if let Some(t) = target {
            self.increment(t, owner);
            self.note_added(owner, name, t);
        }
        trace!(%owner, relationship = name, ?previous, ?target, "set to-one");
        bus.enqueue(Subject::Record(owner), ChangeKind::Relationships);
        Ok(previous)
    }

    /// One-sided to-many insert. Returns `true` if inserted.
    fn insert_many(
        &mut self,
        bus: &mut ChangeBus,
        owner: Identity,
        model: &str,
        name: &str,
        target: Identity,
        position: Option<usize>,
    ) -> Result<bool, CacheError> {
        let state = self.slot(owner, model, name)?;
        let Members::ToMany(set) = &mut state.members else {
            return Err(CacheError::InternalCorruption("to-many slot holds a to-one member"));
        };
        let inserted = match position {
            Some(at) => set.insert_at(at, target),
            None => set.insert(target),
        };
        if inserted {
            self.increment(target, owner);
            self.note_added(owner, name, target);
            trace!(%owner, relationship = name, %target, "insert");
            bus.enqueue(Subject::Record(owner), ChangeKind::Relationships);
        }
        Ok(inserted)
    }

    /// One-sided removal from either cardinality. Returns `true` if removed.
    fn detach(
        &mut self,
        bus: &mut ChangeBus,
        owner: Identity,
        model: &str,
        name: &str,
        target: Identity,
    ) -> Result<bool, CacheError> {
        let state = self.slot(owner, model, name)?;
        let removed = match &mut state.members {
            Members::ToOne(current) if *current == Some(target) => {
                *current = None;
                true
            }
            Members::ToOne(_) => false,
            Members::ToMany(set) => set.remove(target),
        };
        if removed {
            self.decrement(target, owner);
            trace!(%owner, relationship = name, %target, "remove");
            bus.enqueue(Subject::Record(owner), ChangeKind::Relationships);
        }
        Ok(removed)
    }

    /// Symmetric add of `owner.name -> target`.
    fn link(
        &mut self,
        bus: &mut ChangeBus,
        owner: Identity,
        model: &str,
        name: &str,
        target: Identity,
        position: Option<usize>,
    ) -> Result<bool, CacheError> {
        let kind = self.schema.require_relationship(model, name)?.kind;
        let inverse = self.inverse_for(model, name)?;
        match kind {
            RelationshipKind::BelongsTo => {
                let previous = self.set_one(bus, owner, model, name, Some(target))?;
                if previous == Some(target) {
                    return Ok(false);
                }
                if let (Some(prev), Some(inv)) = (previous, &inverse) {
                    self.detach(bus, prev, &inv.model, &inv.relationship, owner)?;
                }
            }
            RelationshipKind::HasMany => {
                if !self.insert_many(bus, owner, model, name, target, position)? {
                    return Ok(false);
                }
            }
        }
        if let Some(inv) = inverse {
            match inv.kind {
                RelationshipKind::BelongsTo => {
                    let displaced =
                        self.set_one(bus, target, &inv.model, &inv.relationship, Some(owner))?;
                    if let Some(old_owner) = displaced.filter(|o| *o != owner) {
                        // The target belonged to another owner of the same model.
                        self.detach(bus, old_owner, model, name, target)?;
                    }
                }
                RelationshipKind::HasMany => {
                    self.insert_many(bus, target, &inv.model, &inv.relationship, owner, None)?;
                }
            }
        }
        Ok(true)
    }

    /// Symmetric removal of `owner.name -> target`.
    fn unlink(
        &mut self,
        bus: &mut ChangeBus,
        owner: Identity,
        model: &str,
        name: &str,
        target: Identity,
    ) -> Result<bool, CacheError> {
        if !self.detach(bus, owner, model, name, target)? {
            return Ok(false);
        }
        if let Some(inv) = self.inverse_for(model, name)? {
            self.detach(bus, target, &inv.model, &inv.relationship, owner)?;
        }
        Ok(true)
    }

    fn set_one_symmetric(
        &mut self,
        bus: &mut ChangeBus,
        owner: Identity,
        model: &str,
        name: &str,
        target: Option<Identity>,
    ) -> Result<bool, CacheError> {
        let current = self.belongs_to(owner, name);
        if current == target {
            // Materialize so the slot reports authoritative state.
            self.slot(owner, model, name)?;
            return Ok(false);
        }
        match (current, target) {
            (_, Some(t)) => {
                self.link(bus, owner, model, name, t, None)?;
            }
            (Some(old), None) => {
                self.unlink(bus, owner, model, name, old)?;
            }
            (None, None) => {}
        }
        Ok(true)
    }

    fn replace_many(
        &mut self,
        bus: &mut ChangeBus,
        owner: Identity,
        model: &str,
        name: &str,
        targets: Vec<Identity>,
    ) -> Result<(), CacheError> {
        let current: Vec<Identity> = self.slot(owner, model, name)?.members.to_vec();
        let mut desired: IdentitySet = targets.into_iter().collect();
        if let Some(added) = self.batch_added.get(&(owner, Arc::from(name))) {
            for m in &current {
                if added.contains(m) {
                    desired.insert(*m);
                }
            }
        }
        let locally_dirty = self.slot(owner, model, name)?.locally_dirty;
        if locally_dirty && current.as_slice() != desired.as_slice() {
            warn!(%owner, relationship = name, "authoritative payload replaces local edits");
        }
        for m in &current {
            if !desired.contains(*m) {
                self.unlink(bus, owner, model, name, *m)?;
            }
        }
        for m in desired.iter() {
            self.link(bus, owner, model, name, m, None)?;
        }
        let state = self.slot(owner, model, name)?;
        if let Members::ToMany(set) = &mut state.members {
            let ordered: IdentitySet = desired
                .iter()
                .filter(|m| set.contains(*m))
                .chain(set.iter().filter(|m| !desired.contains(*m)))
                .collect();
            if ordered != *set {
                *set = ordered;
                bus.enqueue(Subject::Record(owner), ChangeKind::Relationships);
            }
        }
        state.has_data = true;
        state.locally_dirty = false;
        Ok(())
    }
}
