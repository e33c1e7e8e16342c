// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Point-in-time copies of one record for adapters and serializers.
//!
//! A snapshot holds exactly what the graph knows when it is taken. Relationships
//! with concrete members carry references; link-only and never-loaded
//! relationships carry a deferred marker. Reading a snapshot never touches the
//! store, so it cannot trigger a fetch.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::doc::{Linkage, RelationshipDoc, RelationshipLinks, ResourceDoc, ResourceLinkage};
use crate::error::CacheError;
use crate::graph::{EdgeState, RelationshipGraph};
use crate::ident::{Identity, IdentityRegistry, TypeName};
use crate::record::Attributes;
use crate::schema::{RelationshipKind, Schema};
use crate::state::RecordState;
use crate::store::RecordStore;
use crate::transform::{TransformError, TransformRegistry};

/// Reference to a related resource, resolved at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// Handle of the related resource.
    pub identity: Identity,
    /// Resource type.
    pub type_name: TypeName,
    /// Server id, if assigned.
    pub id: Option<String>,
    /// Local id.
    pub lid: String,
}

impl ResourceRef {
    fn resolve(ids: &IdentityRegistry, identity: Identity) -> Result<Self, CacheError> {
        let entry = ids.entry(identity)?;
        Ok(Self {
            identity,
            type_name: Arc::clone(entry.type_name()),
            id: entry.id().map(str::to_owned),
            lid: entry.lid().to_owned(),
        })
    }

    fn to_linkage(&self) -> ResourceLinkage {
        ResourceLinkage {
            type_name: self.type_name.to_string(),
            id: self.id.clone(),
            lid: Some(self.lid.clone()),
            meta: None,
        }
    }
}

/// Relationship membership as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotData {
    /// Known to-one target (`None` for authoritatively empty).
    ToOne(Option<ResourceRef>),
    /// Known to-many members in order.
    ToMany(Vec<ResourceRef>),
    /// Members not known; only links (if any) are available.
    Deferred,
}

/// One relationship of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRelationship {
    /// Membership.
    pub data: SnapshotData,
    /// Links recorded for the relationship.
    pub links: Option<RelationshipLinks>,
    /// Metadata recorded for the relationship.
    pub meta: Option<Value>,
}

/// Immutable copy of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Handle of the captured resource.
    pub identity: Identity,
    /// Resource type.
    pub type_name: TypeName,
    /// Server id, if assigned.
    pub id: Option<String>,
    /// Local id.
    pub lid: String,
    /// Lifecycle state at capture time.
    pub state: RecordState,
    /// Visible attribute values.
    pub attributes: Attributes,
    /// `(canonical, current)` for every pending field.
    pub changed_attributes: BTreeMap<Arc<str>, (Option<Value>, Value)>,
    /// Every declared relationship in name order.
    pub relationships: BTreeMap<Arc<str>, SnapshotRelationship>,
    kinds: BTreeMap<Arc<str>, Arc<str>>,
}

impl Snapshot {
    pub(crate) fn capture(
        schema: &Schema,
        ids: &IdentityRegistry,
        records: &RecordStore,
        graph: &RelationshipGraph,
        identity: Identity,
    ) -> Result<Self, CacheError> {
        let entry = ids.entry(identity)?;
        let record = records.require(identity)?;
        let model = schema.require(record.type_name())?;

        let mut relationships = BTreeMap::new();
        for def in model.relationships() {
            let state = graph.relationship(identity, &def.name);
            let data = match state.map(crate::graph::RelationshipState::data_state) {
                Some(EdgeState::Known | EdgeState::Empty) => {
                    let members = state.map(|s| s.members().to_vec()).unwrap_or_default();
                    match def.kind {
                        RelationshipKind::BelongsTo => SnapshotData::ToOne(
                            members
                                .first()
                                .map(|m| ResourceRef::resolve(ids, *m))
                                .transpose()?,
                        ),
                        RelationshipKind::HasMany => SnapshotData::ToMany(
                            members
                                .iter()
                                .map(|m| ResourceRef::resolve(ids, *m))
                                .collect::<Result<_, _>>()?,
                        ),
                    }
                }
                Some(EdgeState::LinkOnly | EdgeState::Unknown) | None => SnapshotData::Deferred,
            };
            relationships.insert(
                Arc::clone(&def.name),
                SnapshotRelationship {
                    data,
                    links: state.and_then(|s| s.links().cloned()),
                    meta: state.and_then(|s| s.meta().cloned()),
                },
            );
        }

        let kinds = model
            .attributes()
            .filter_map(|a| a.kind.as_ref().map(|k| (Arc::clone(&a.name), Arc::clone(k))))
            .collect();

        Ok(Self {
            identity,
            type_name: Arc::clone(record.type_name()),
            id: entry.id().map(str::to_owned),
            lid: entry.lid().to_owned(),
            state: record.state(),
            attributes: record.attributes(),
            changed_attributes: record.changed_attributes(),
            relationships,
            kinds,
        })
    }

    /// Renders the snapshot in the canonical document shape, serializing
    /// attributes through their declared transforms.
    ///
    /// # Errors
    /// Returns the first [`TransformError`] raised by a transform.
    pub fn to_resource_doc(&self, transforms: &TransformRegistry) -> Result<ResourceDoc, TransformError> {
        let mut attributes = BTreeMap::new();
        for (name, value) in &self.attributes {
            let kind = self.kinds.get(name).map(AsRef::as_ref);
            attributes.insert(name.to_string(), transforms.serialize(kind, value)?);
        }
        let relationships = self
            .relationships
            .iter()
            .map(|(name, rel)| {
                let data = match &rel.data {
                    SnapshotData::ToOne(Some(r)) => Some(Linkage::One(r.to_linkage())),
                    SnapshotData::ToOne(None) => Some(Linkage::Null),
                    SnapshotData::ToMany(refs) => {
                        Some(Linkage::Many(refs.iter().map(ResourceRef::to_linkage).collect()))
                    }
                    SnapshotData::Deferred => None,
                };
                let doc = RelationshipDoc {
                    data,
                    links: rel.links.clone(),
                    meta: rel.meta.clone(),
                };
                (name.to_string(), doc)
            })
            .filter(|(_, doc)| doc.data.is_some() || doc.links.is_some() || doc.meta.is_some())
            .collect();
        Ok(ResourceDoc {
            type_name: self.type_name.to_string(),
            id: self.id.clone(),
            lid: Some(self.lid.clone()),
            attributes,
            relationships,
            meta: None,
        })
    }
}
