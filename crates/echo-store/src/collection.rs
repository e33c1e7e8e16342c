// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record arrays: live per-type collections and ad-hoc query results.
//!
//! Live collections are maintained eagerly by the store as records enter and
//! leave the live lifecycle states. Ad-hoc collections snapshot their members
//! at creation and change only on an explicit refresh.
use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::doc::Link;
use crate::ident::{Identity, TypeName};
use crate::notify::{ChangeBus, ChangeKind, Subject};
use crate::ordered::IdentitySet;

/// Handle for one record array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionId(u64);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collection#{}", self.0)
    }
}

/// Live (per-type) or ad-hoc (per-query).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Every known, non-deleted record of one type.
    Live,
    /// Static result of one query execution.
    Adhoc,
}

/// Query parameters identifying an ad-hoc collection's source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryDescriptor {
    params: BTreeMap<String, Value>,
}

impl QueryDescriptor {
    /// Empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: Value) -> Self {
        self.params.insert(name.to_owned(), value);
        self
    }

    /// Parameters in name order.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Canonical JSON used to coalesce identical queries.
    #[must_use]
    pub fn key(&self) -> String {
        serde_json::to_string(&self.params).unwrap_or_default()
    }
}

/// Ordered, deduplicated identities plus query metadata.
#[derive(Debug, Clone)]
pub struct RecordArray {
    id: CollectionId,
    type_name: TypeName,
    kind: CollectionKind,
    query: Option<QueryDescriptor>,
    members: IdentitySet,
    meta: Option<Value>,
    links: BTreeMap<String, Link>,
}

impl RecordArray {
    /// Collection handle.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// Member type.
    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Live or ad-hoc.
    #[must_use]
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Source query of an ad-hoc collection.
    #[must_use]
    pub fn query(&self) -> Option<&QueryDescriptor> {
        self.query.as_ref()
    }

    /// Members in order.
    #[must_use]
    pub fn members(&self) -> &[Identity] {
        self.members.as_slice()
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.members.contains(identity)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// `true` when the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Response metadata (e.g. pagination totals).
    #[must_use]
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// Response links (e.g. `next`).
    #[must_use]
    pub fn links(&self) -> &BTreeMap<String, Link> {
        &self.links
    }
}

/// Owner of every record array and the identity-to-collections index.
#[derive(Debug, Default)]
pub struct CollectionManager {
    next: u64,
    live: FxHashMap<TypeName, CollectionId>,
    arrays: BTreeMap<CollectionId, RecordArray>,
    membership: FxHashMap<Identity, FxHashSet<CollectionId>>,
}

impl CollectionManager {
    /// Creates a manager with no collections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a collection.
    #[must_use]
    pub fn get(&self, id: CollectionId) -> Option<&RecordArray> {
        self.arrays.get(&id)
    }

    /// Number of registered collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// `true` when no collection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// The live collection for `type_name`, created empty on first access.
    pub fn live_collection_for(&mut self, type_name: &TypeName) -> CollectionId {
        if let Some(id) = self.live.get(type_name) {
            return *id;
        }
        let id = self.register(type_name, CollectionKind::Live, None);
        self.live.insert(TypeName::clone(type_name), id);
        id
    }

    /// Creates an ad-hoc collection holding `members`.
    pub fn create_adhoc_collection(
        &mut self,
        type_name: &TypeName,
        query: Option<QueryDescriptor>,
        members: &[Identity],
    ) -> CollectionId {
        let id = self.register(type_name, CollectionKind::Adhoc, query);
        for m in members {
            self.insert_member(id, *m);
        }
        id
    }

    /// Replaces membership and metadata wholesale.
    ///
    /// Returns `false` for unknown (or destroyed) collections.
    pub fn refresh(
        &mut self,
        bus: &mut ChangeBus,
        id: CollectionId,
        members: &[Identity],
        meta: Option<Value>,
        links: BTreeMap<String, Link>,
    ) -> bool {
        let Some(array) = self.arrays.get_mut(&id) else {
            return false;
        };
        let old = std::mem::take(&mut array.members);
        array.meta = meta;
        array.links = links;
        for m in old.iter() {
            self.unindex(m, id);
        }
        for m in members {
            self.insert_member(id, *m);
        }
        bus.enqueue(Subject::Collection(id), ChangeKind::Membership);
        true
    }

    /// Appends `identity` to the live collection of `type_name`.
    pub fn add_to_live(&mut self, bus: &mut ChangeBus, type_name: &TypeName, identity: Identity) -> bool {
        let id = self.live_collection_for(type_name);
        let inserted = self.insert_member(id, identity);
        if inserted {
            bus.enqueue(Subject::Collection(id), ChangeKind::Membership);
        }
        inserted
    }

    /// Removes `identity` from the live collection of `type_name`.
    pub fn remove_from_live(
        &mut self,
        bus: &mut ChangeBus,
        type_name: &TypeName,
        identity: Identity,
    ) -> bool {
        let Some(id) = self.live.get(type_name).copied() else {
            return false;
        };
        let removed = self.remove_member(id, identity);
        if removed {
            bus.enqueue(Subject::Collection(id), ChangeKind::Membership);
        }
        removed
    }

    /// Removes `identity` from every collection containing it.
    pub fn remove_everywhere(&mut self, bus: &mut ChangeBus, identity: Identity) -> Vec<CollectionId> {
        let ids = self.collections_containing(identity);
        for id in &ids {
            if self.remove_member(*id, identity) {
                bus.enqueue(Subject::Collection(*id), ChangeKind::Membership);
            }
        }
        ids
    }

    /// Collections containing `identity`, in id order.
    #[must_use]
    pub fn collections_containing(&self, identity: Identity) -> Vec<CollectionId> {
        let mut ids: Vec<CollectionId> = self
            .membership
            .get(&identity)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Deregisters a collection. Idempotent: returns `false` when the
    /// collection is already gone, including after [`Self::teardown`].
    pub fn destroy(&mut self, bus: &mut ChangeBus, id: CollectionId) -> bool {
        let Some(array) = self.arrays.remove(&id) else {
            return false;
        };
        for m in array.members.iter() {
            self.unindex(m, id);
        }
        if array.kind == CollectionKind::Live {
            self.live.remove(&array.type_name);
        }
        debug!(collection = %id, members = array.members.len(), "destroyed collection");
        bus.enqueue(Subject::Collection(id), ChangeKind::Unloaded);
        bus.retire(Subject::Collection(id));
        true
    }

    /// Destroys every collection.
    pub fn teardown(&mut self, bus: &mut ChangeBus) {
        let ids: Vec<CollectionId> = self.arrays.keys().copied().collect();
        for id in ids {
            self.destroy(bus, id);
        }
        self.membership.clear();
    }

    fn register(
        &mut self,
        type_name: &TypeName,
        kind: CollectionKind,
        query: Option<QueryDescriptor>,
    ) -> CollectionId {
        self.next += 1;
        let id = CollectionId(self.next);
        self.arrays.insert(
            id,
            RecordArray {
                id,
                type_name: TypeName::clone(type_name),
                kind,
                query,
                members: IdentitySet::new(),
                meta: None,
                links: BTreeMap::new(),
            },
        );
        id
    }

    fn insert_member(&mut self, id: CollectionId, identity: Identity) -> bool {
        let Some(array) = self.arrays.get_mut(&id) else {
            return false;
        };
        if !array.members.insert(identity) {
            return false;
        }
        self.membership.entry(identity).or_default().insert(id);
        true
    }

    fn remove_member(&mut self, id: CollectionId, identity: Identity) -> bool {
        let Some(array) = self.arrays.get_mut(&id) else {
            return false;
        };
        if !array.members.remove(identity) {
            return false;
        }
        self.unindex(identity, id);
        true
    }

    fn unindex(&mut self, identity: Identity, id: CollectionId) {
        if let Some(set) = self.membership.get_mut(&identity) {
            set.remove(&id);
            if set.is_empty() {
                self.membership.remove(&identity);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn id(n: u64) -> Identity {
        Identity::from_raw(n)
    }

    #[test]
    fn live_collection_is_a_singleton_per_type() {
        let mut mgr = CollectionManager::new();
        let mut bus = ChangeBus::new();
        let post: TypeName = Arc::from("post");
        let live = mgr.live_collection_for(&post);
        assert_eq!(mgr.live_collection_for(&post), live);
        assert!(mgr.add_to_live(&mut bus, &post, id(1)));
        assert!(!mgr.add_to_live(&mut bus, &post, id(1)));
        assert_eq!(mgr.get(live).unwrap().members(), &[id(1)]);
        assert!(mgr.remove_from_live(&mut bus, &post, id(1)));
        assert!(mgr.get(live).unwrap().is_empty());
    }

    #[test]
    fn adhoc_membership_changes_only_on_refresh() {
        let mut mgr = CollectionManager::new();
        let mut bus = ChangeBus::new();
        let post: TypeName = Arc::from("post");
        let q = QueryDescriptor::new().param("page", json!(1));
        let c = mgr.create_adhoc_collection(&post, Some(q.clone()), &[id(1), id(2)]);
        mgr.add_to_live(&mut bus, &post, id(3));
        assert_eq!(mgr.get(c).unwrap().members(), &[id(1), id(2)]);
        assert_eq!(mgr.get(c).unwrap().query(), Some(&q));

        assert!(mgr.refresh(&mut bus, c, &[id(2), id(3)], Some(json!({ "total": 2 })), BTreeMap::new()));
        assert_eq!(mgr.get(c).unwrap().members(), &[id(2), id(3)]);
        assert!(mgr.collections_containing(id(1)).is_empty());
        assert_eq!(mgr.collections_containing(id(3)).len(), 2);
    }

    #[test]
    fn destroy_is_idempotent_in_any_teardown_order() {
        let mut bus = ChangeBus::new();
        let post: TypeName = Arc::from("post");

        let mut mgr = CollectionManager::new();
        let c = mgr.create_adhoc_collection(&post, None, &[id(1)]);
        assert!(mgr.destroy(&mut bus, c));
        assert!(!mgr.destroy(&mut bus, c));
        mgr.teardown(&mut bus);
        assert!(mgr.collections_containing(id(1)).is_empty());

        let mut mgr = CollectionManager::new();
        let c = mgr.create_adhoc_collection(&post, None, &[id(1)]);
        mgr.teardown(&mut bus);
        assert!(!mgr.destroy(&mut bus, c));
        assert!(mgr.collections_containing(id(1)).is_empty());
        assert!(mgr.is_empty());
    }

    #[test]
    fn query_key_is_order_independent() {
        let a = QueryDescriptor::new().param("b", json!(2)).param("a", json!(1));
        let b = QueryDescriptor::new().param("a", json!(1)).param("b", json!(2));
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), r#"{"a":1,"b":2}"#);
    }
}
