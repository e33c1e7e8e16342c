// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical document shape accepted by ingestion.
//!
//! ```json
//! { "data": { "type": "post", "id": "1",
//!             "attributes": { "title": "T" },
//!             "relationships": { "comments": { "data": [{ "type": "comment", "id": "9" }] } } },
//!   "included": [ { "type": "comment", "id": "9" } ] }
//! ```
//!
//! Payloads are parsed into these types before they reach the store, so
//! malformed shapes are rejected at the boundary. Inside a relationship an
//! explicit `"data": null` is distinct from an absent `data` key: the first
//! asserts emptiness, the second carries no membership information at all.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::{present, RelationshipKind};
use crate::transform::TransformError;

/// A link: bare href or an object with `href` and optional `meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    /// `"https://..."`
    Href(String),
    /// `{ "href": "...", "meta": {...} }`
    Object {
        /// Target URL.
        href: String,
        /// Opaque link metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
}

impl Link {
    /// The target URL regardless of form.
    #[must_use]
    pub fn href(&self) -> &str {
        match self {
            Self::Href(href) | Self::Object { href, .. } => href,
        }
    }
}

/// Links attached to a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipLinks {
    /// Link that fetches the related resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<Link>,
    /// Link to the relationship itself.
    #[serde(default, rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<Link>,
}

impl RelationshipLinks {
    /// The href an adapter should fetch: `related`, else `self`.
    #[must_use]
    pub fn fetch_href(&self) -> Option<&str> {
        self.related
            .as_ref()
            .or(self.self_link.as_ref())
            .map(Link::href)
    }
}

/// Reference to one resource inside relationship data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLinkage {
    /// Resource type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Server id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Local id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    /// Opaque per-reference metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResourceLinkage {
    /// Reference by server id.
    #[must_use]
    pub fn new(type_name: &str, id: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            id: Some(id.to_owned()),
            lid: None,
            meta: None,
        }
    }

    /// Reference by local id.
    #[must_use]
    pub fn local(type_name: &str, lid: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            id: None,
            lid: Some(lid.to_owned()),
            meta: None,
        }
    }
}

/// Relationship `data`: `null`, one reference, or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    /// Explicitly empty to-one.
    Null,
    /// To-many membership (possibly empty).
    Many(Vec<ResourceLinkage>),
    /// To-one reference.
    One(ResourceLinkage),
}

/// One relationship entry in a resource document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipDoc {
    /// `None` when the `data` key is absent; `Some(Linkage::Null)` for `null`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<Linkage>,
    /// Links for deferred loading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<RelationshipLinks>,
    /// Opaque relationship metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// One resource object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDoc {
    /// Resource type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Server id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Local id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    /// Attribute patch; absent fields are left untouched by ingestion.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    /// Relationship entries by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipDoc>,
    /// Opaque resource metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResourceDoc {
    /// Bare resource with a server id.
    #[must_use]
    pub fn new(type_name: &str, id: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            id: Some(id.to_owned()),
            lid: None,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
            meta: None,
        }
    }

    /// Sets one attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_owned(), value);
        self
    }

    /// Sets one relationship entry.
    #[must_use]
    pub fn with_relationship(mut self, name: &str, rel: RelationshipDoc) -> Self {
        self.relationships.insert(name.to_owned(), rel);
        self
    }
}

/// Primary `data`: a single resource or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    /// Collection response.
    Many(Vec<ResourceDoc>),
    /// Single-resource response.
    Single(Box<ResourceDoc>),
}

/// A complete document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Document {
    /// Primary data; `None` for `null` or an absent key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    /// Side-loaded resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceDoc>,
    /// Top-level metadata (e.g. pagination totals).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Top-level links (e.g. `next`, `prev`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, Link>,
}

impl Document {
    /// Document with one primary resource.
    #[must_use]
    pub fn single(resource: ResourceDoc) -> Self {
        Self {
            data: Some(PrimaryData::Single(Box::new(resource))),
            ..Self::default()
        }
    }

    /// Document with a primary list.
    #[must_use]
    pub fn many(resources: Vec<ResourceDoc>) -> Self {
        Self {
            data: Some(PrimaryData::Many(resources)),
            ..Self::default()
        }
    }

    /// Adds side-loaded resources.
    #[must_use]
    pub fn with_included(mut self, included: Vec<ResourceDoc>) -> Self {
        self.included.extend(included);
        self
    }

    /// Parses and structurally validates a JSON document.
    ///
    /// # Errors
    /// Returns [`DocumentError::Json`] for malformed JSON and the errors of
    /// [`Self::validate`] for shapes that parse but are unusable.
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let doc: Self = serde_json::from_str(json)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Primary resources in order.
    pub fn primary(&self) -> impl Iterator<Item = &ResourceDoc> {
        let (single, many): (Option<&ResourceDoc>, &[ResourceDoc]) = match &self.data {
            Some(PrimaryData::Single(r)) => (Some(r.as_ref()), &[]),
            Some(PrimaryData::Many(v)) => (None, v.as_slice()),
            None => (None, &[]),
        };
        single.into_iter().chain(many.iter())
    }

    /// Every resource: primary first, then included.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDoc> {
        self.primary().chain(self.included.iter())
    }

    /// Schema-independent checks: non-empty types, every resource and
    /// reference carries an `id` or `lid`.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), DocumentError> {
        for resource in self.resources() {
            if resource.type_name.is_empty() {
                return Err(DocumentError::EmptyType);
            }
            if resource.id.is_none() && resource.lid.is_none() {
                return Err(DocumentError::MissingIdentifier {
                    type_name: resource.type_name.clone(),
                });
            }
            for (name, rel) in &resource.relationships {
                if name.is_empty() {
                    return Err(DocumentError::EmptyRelationship {
                        type_name: resource.type_name.clone(),
                    });
                }
                let refs: &[ResourceLinkage] = match &rel.data {
                    Some(Linkage::One(r)) => std::slice::from_ref(r),
                    Some(Linkage::Many(rs)) => rs,
                    Some(Linkage::Null) | None => &[],
                };
                for r in refs {
                    if r.type_name.is_empty() {
                        return Err(DocumentError::EmptyType);
                    }
                    if r.id.is_none() && r.lid.is_none() {
                        return Err(DocumentError::MissingIdentifier {
                            type_name: r.type_name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Ingestion boundary failures.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Payload is not valid JSON for the document shape.
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    /// A resource or reference has neither `id` nor `lid`.
    #[error("{type_name} resource without id or lid")]
    MissingIdentifier {
        /// Resource type.
        type_name: String,
    },
    /// A resource or reference has an empty `type`.
    #[error("resource with empty type")]
    EmptyType,
    /// A relationship entry has an empty name.
    #[error("{type_name} resource has a relationship with an empty name")]
    EmptyRelationship {
        /// Resource type.
        type_name: String,
    },
    /// A reference names a type other than the relationship's target.
    #[error("{model}.{relationship} expects {expected}, got {found}")]
    LinkageTypeMismatch {
        /// Model owning the relationship.
        model: String,
        /// Relationship name.
        relationship: String,
        /// Declared target type.
        expected: String,
        /// Referenced type.
        found: String,
    },
    /// A list was given for a to-one relationship or vice versa.
    #[error("{model}.{relationship} is {expected}; linkage has the wrong cardinality")]
    LinkageCardinality {
        /// Model owning the relationship.
        model: String,
        /// Relationship name.
        relationship: String,
        /// Declared cardinality.
        expected: RelationshipKind,
    },
    /// An attribute value failed its transform.
    #[error("{model}.{attribute}: {source}")]
    Transform {
        /// Model name.
        model: String,
        /// Attribute name.
        attribute: String,
        /// Underlying transform failure.
        source: TransformError,
    },
}

/// Capability for turning raw payload bytes into a [`Document`].
pub trait Normalizer {
    /// Parses `payload` into the canonical shape.
    ///
    /// # Errors
    /// Returns [`DocumentError`] for payloads that cannot be normalized.
    fn normalize(&self, payload: &[u8]) -> Result<Document, DocumentError>;
}

/// Normalizer for payloads already in the canonical JSON shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentNormalizer;

impl Normalizer for JsonDocumentNormalizer {
    fn normalize(&self, payload: &[u8]) -> Result<Document, DocumentError> {
        let doc: Document = serde_json::from_slice(payload)?;
        doc.validate()?;
        Ok(doc)
    }
}
