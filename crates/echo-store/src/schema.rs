// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Model declarations: attributes, defaults, and relationships.
//!
//! A [`Schema`] is immutable once handed to a store. It can be assembled with
//! the builder methods on [`ModelDef`] or loaded from JSON:
//!
//! ```json
//! { "models": { "post": {
//!     "attributes": { "title": { "type": "string", "defaultValue": "" } },
//!     "relationships": { "comments": { "kind": "hasMany", "type": "comment", "inverse": "post" } }
//! } } }
//! ```
//!
//! An explicit `"inverse": null` is kept distinct from an absent `inverse`
//! key: the first disables inverse propagation, the second requests inference.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    /// To-one relationship (`null` or a single identity).
    #[serde(alias = "toOne")]
    BelongsTo,
    /// To-many relationship (ordered, deduplicated identities).
    #[serde(alias = "toMany")]
    HasMany,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BelongsTo => "belongsTo",
            Self::HasMany => "hasMany",
        })
    }
}

/// How a relationship names its inverse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InverseDecl {
    /// No declaration; the inverse is inferred from the related model.
    #[default]
    Infer,
    /// Explicitly no inverse; edges on this side never propagate.
    None,
    /// Explicit inverse relationship name on the related model.
    Named(Arc<str>),
}

/// Declared default for an attribute.
#[derive(Clone)]
pub enum DefaultValue {
    /// A literal value, cloned into each new record.
    Literal(Value),
    /// A producer evaluated once per record at creation.
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    /// Produces the default for one new record.
    #[must_use]
    pub fn produce(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Producer(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// One declared attribute.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    /// Attribute name.
    pub name: Arc<str>,
    /// Transform kind (e.g. `"number"`); `None` passes values through.
    pub kind: Option<Arc<str>>,
    /// Default seeded by local creation when no value is supplied.
    pub default: Option<DefaultValue>,
}

/// One declared relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    /// Relationship name on the owning model.
    pub name: Arc<str>,
    /// Cardinality.
    pub kind: RelationshipKind,
    /// Related model name.
    pub target: Arc<str>,
    /// Inverse declaration.
    pub inverse: InverseDecl,
}

impl RelationshipDef {
    /// Declares a to-one relationship with an inferred inverse.
    #[must_use]
    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: RelationshipKind::BelongsTo,
            target: Arc::from(target),
            inverse: InverseDecl::Infer,
        }
    }

    /// Declares a to-many relationship with an inferred inverse.
    #[must_use]
    pub fn has_many(name: &str, target: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind: RelationshipKind::HasMany,
            target: Arc::from(target),
            inverse: InverseDecl::Infer,
        }
    }

    /// Names the inverse explicitly.
    #[must_use]
    pub fn with_inverse(mut self, inverse: &str) -> Self {
        self.inverse = InverseDecl::Named(Arc::from(inverse));
        self
    }

    /// Declares that this relationship has no inverse.
    #[must_use]
    pub fn without_inverse(mut self) -> Self {
        self.inverse = InverseDecl::None;
        self
    }
}

/// Declaration of one model (resource type).
#[derive(Debug, Clone)]
pub struct ModelDef {
    name: Arc<str>,
    attributes: BTreeMap<Arc<str>, AttributeDef>,
    relationships: BTreeMap<Arc<str>, RelationshipDef>,
}

impl ModelDef {
    /// Starts an empty model declaration.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Adds an untyped attribute with no default.
    #[must_use]
    pub fn attr(self, name: &str) -> Self {
        self.attribute(AttributeDef {
            name: Arc::from(name),
            kind: None,
            default: None,
        })
    }

    /// Adds an attribute with a transform kind.
    #[must_use]
    pub fn typed_attr(self, name: &str, kind: &str) -> Self {
        self.attribute(AttributeDef {
            name: Arc::from(name),
            kind: Some(Arc::from(kind)),
            default: None,
        })
    }

    /// Adds an attribute with a literal default.
    #[must_use]
    pub fn attr_with_default(self, name: &str, default: Value) -> Self {
        self.attribute(AttributeDef {
            name: Arc::from(name),
            kind: None,
            default: Some(DefaultValue::Literal(default)),
        })
    }

    /// Adds an attribute whose default is produced per record.
    #[must_use]
    pub fn attr_with_producer<F>(self, name: &str, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.attribute(AttributeDef {
            name: Arc::from(name),
            kind: None,
            default: Some(DefaultValue::Producer(Arc::new(producer))),
        })
    }

    /// Adds a fully specified attribute.
    #[must_use]
    pub fn attribute(mut self, def: AttributeDef) -> Self {
        self.attributes.insert(Arc::clone(&def.name), def);
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, def: RelationshipDef) -> Self {
        self.relationships.insert(Arc::clone(&def.name), def);
        self
    }

    /// Shorthand for a to-one relationship with an inferred inverse.
    #[must_use]
    pub fn belongs_to(self, name: &str, target: &str) -> Self {
        self.relationship(RelationshipDef::belongs_to(name, target))
    }

    /// Shorthand for a to-many relationship with an inferred inverse.
    #[must_use]
    pub fn has_many(self, name: &str, target: &str) -> Self {
        self.relationship(RelationshipDef::has_many(name, target))
    }

    /// Looks up an attribute declaration.
    #[must_use]
    pub fn attribute_def(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    /// Looks up a relationship declaration.
    #[must_use]
    pub fn relationship_def(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.get(name)
    }

    /// Iterates attribute declarations in name order.
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.values()
    }

    /// Iterates relationship declarations in name order.
    pub fn relationships(&self) -> impl Iterator<Item = &RelationshipDef> {
        self.relationships.values()
    }
}

/// Errors raised by schema lookups and inverse resolution.
///
/// These are configuration errors: they surface at first use rather than at
/// declaration time and are never resolved silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// No model is declared under this name.
    #[error("unknown model: {0}")]
    UnknownModel(String),
    /// The model declares no such attribute.
    #[error("unknown attribute {attribute} on {model}")]
    UnknownAttribute {
        /// Model name.
        model: String,
        /// Attribute name.
        attribute: String,
    },
    /// The model declares no such relationship.
    #[error("unknown relationship {relationship} on {model}")]
    UnknownRelationship {
        /// Model name.
        model: String,
        /// Relationship name.
        relationship: String,
    },
    /// More than one relationship on the related model could be the inverse.
    #[error(
        "ambiguous inverse for {model}.{relationship}: {target} has {candidates:?}; declare `inverse` explicitly"
    )]
    AmbiguousInverse {
        /// Model owning the relationship.
        model: String,
        /// Relationship whose inverse was requested.
        relationship: String,
        /// Related model.
        target: String,
        /// Candidate inverse relationships on the related model.
        candidates: Vec<String>,
    },
    /// A self-referential relationship has no explicit inverse declaration.
    #[error("{model}.{relationship} relates {model} to itself and must declare `inverse` explicitly")]
    MissingReflexiveInverse {
        /// Model owning the relationship.
        model: String,
        /// Relationship name.
        relationship: String,
    },
    /// A declared inverse does not exist on the related model or points elsewhere.
    #[error("{model}.{relationship} declares inverse {inverse}, which {target} does not declare back to {model}")]
    InvalidInverse {
        /// Model owning the relationship.
        model: String,
        /// Relationship name.
        relationship: String,
        /// Declared inverse name.
        inverse: String,
        /// Related model.
        target: String,
    },
    /// A to-one operation was used on a to-many relationship or vice versa.
    #[error("{model}.{relationship} is not a {expected} relationship")]
    RelationshipKindMismatch {
        /// Model name.
        model: String,
        /// Relationship name.
        relationship: String,
        /// Kind the operation requires.
        expected: RelationshipKind,
    },
}

/// Immutable set of model declarations.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: BTreeMap<Arc<str>, ModelDef>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a model declaration.
    #[must_use]
    pub fn model(mut self, def: ModelDef) -> Self {
        self.insert(def);
        self
    }

    /// Adds (or replaces) a model declaration in place.
    pub fn insert(&mut self, def: ModelDef) {
        self.models.insert(Arc::clone(&def.name), def);
    }

    /// Looks up a model.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModelDef> {
        self.models.get(name)
    }

    /// Looks up a model or fails with [`SchemaError::UnknownModel`].
    ///
    /// # Errors
    /// Fails when `name` is not declared.
    pub fn require(&self, name: &str) -> Result<&ModelDef, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownModel(name.to_owned()))
    }

    /// Looks up a relationship or fails with a schema error.
    ///
    /// # Errors
    /// Fails when the model or the relationship is not declared.
    pub fn require_relationship(
        &self,
        model: &str,
        relationship: &str,
    ) -> Result<&RelationshipDef, SchemaError> {
        self.require(model)?
            .relationship_def(relationship)
            .ok_or_else(|| SchemaError::UnknownRelationship {
                model: model.to_owned(),
                relationship: relationship.to_owned(),
            })
    }

    /// Iterates models in name order.
    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    /// Parses a schema from its JSON form.
    ///
    /// # Errors
    /// Returns [`ConfigError::Serde`] for malformed JSON and
    /// [`ConfigError::Invalid`] for relationships naming undeclared models.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let doc: SchemaDoc = serde_json::from_str(json)?;
        let mut schema = Self::new();
        for (name, model) in doc.models {
            let mut def = ModelDef::new(&name);
            for (attr_name, attr) in model.attributes {
                def = def.attribute(AttributeDef {
                    name: Arc::from(attr_name.as_str()),
                    kind: attr.kind.as_deref().map(Arc::from),
                    default: attr.default_value.map(DefaultValue::Literal),
                });
            }
            for (rel_name, rel) in model.relationships {
                let inverse = match rel.inverse {
                    None => InverseDecl::Infer,
                    Some(None) => InverseDecl::None,
                    Some(Some(name)) => InverseDecl::Named(Arc::from(name.as_str())),
                };
                def = def.relationship(RelationshipDef {
                    name: Arc::from(rel_name.as_str()),
                    kind: rel.kind,
                    target: Arc::from(rel.target.as_str()),
                    inverse,
                });
            }
            schema.insert(def);
        }
        for model in schema.models() {
            for rel in model.relationships() {
                if schema.get(&rel.target).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "{}.{} targets undeclared model {}",
                        model.name, rel.name, rel.target
                    )));
                }
            }
        }
        Ok(schema)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDoc {
    models: BTreeMap<String, ModelDoc>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelDoc {
    #[serde(default)]
    attributes: BTreeMap<String, AttributeDoc>,
    #[serde(default)]
    relationships: BTreeMap<String, RelationshipDecl>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct AttributeDoc {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    default_value: Option<Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RelationshipDecl {
    kind: RelationshipKind,
    #[serde(rename = "type")]
    target: String,
    #[serde(default, deserialize_with = "present")]
    inverse: Option<Option<String>>,
}

/// Maps a present key (including an explicit `null`) to `Some(..)`; an absent
/// key falls back to `#[serde(default)]`.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn json_schema_distinguishes_null_inverse_from_absent() {
        let schema = Schema::from_json(
            r#"{ "models": {
                "post": { "relationships": {
                    "comments": { "kind": "hasMany", "type": "comment" },
                    "pinned": { "kind": "belongsTo", "type": "comment", "inverse": null }
                } },
                "comment": {
                    "attributes": { "body": { "type": "string", "defaultValue": "" } },
                    "relationships": { "post": { "kind": "belongsTo", "type": "post", "inverse": "comments" } }
                }
            } }"#,
        )
        .unwrap();

        let post = schema.get("post").unwrap();
        assert_eq!(post.relationship_def("comments").unwrap().inverse, InverseDecl::Infer);
        assert_eq!(post.relationship_def("pinned").unwrap().inverse, InverseDecl::None);
        let comment = schema.get("comment").unwrap();
        assert_eq!(
            comment.relationship_def("post").unwrap().inverse,
            InverseDecl::Named(Arc::from("comments"))
        );
        let body = comment.attribute_def("body").unwrap();
        assert_eq!(body.kind.as_deref(), Some("string"));
        assert_eq!(body.default.as_ref().unwrap().produce(), Value::from(""));
    }

    #[test]
    fn json_schema_rejects_dangling_targets() {
        let err = Schema::from_json(
            r#"{ "models": { "post": { "relationships": {
                "author": { "kind": "belongsTo", "type": "person" } } } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn producer_defaults_run_per_call() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let model = ModelDef::new("post")
            .attr_with_producer("seq", move || Value::from(c.fetch_add(1, Ordering::SeqCst)));
        let def = model.attribute_def("seq").unwrap().default.clone().unwrap();
        assert_eq!(def.produce(), Value::from(0));
        assert_eq!(def.produce(), Value::from(1));
    }
}
