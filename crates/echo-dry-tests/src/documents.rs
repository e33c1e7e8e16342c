// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical document builders for tests.

use echo_store::{
    Document, Link, Linkage, PrimaryData, RelationshipDoc, RelationshipLinks, ResourceDoc,
    ResourceLinkage,
};
use serde_json::Value;

/// Resource with a server id.
pub fn resource(type_name: &str, id: &str) -> ResourceDoc {
    ResourceDoc::new(type_name, id)
}

/// Resource known only by its local id.
pub fn local_resource(type_name: &str, lid: &str) -> ResourceDoc {
    ResourceDoc {
        id: None,
        lid: Some(lid.to_owned()),
        ..ResourceDoc::new(type_name, "")
    }
}

/// To-one relationship entry pointing at `(type_name, id)`.
pub fn to_one(type_name: &str, id: &str) -> RelationshipDoc {
    RelationshipDoc {
        data: Some(Linkage::One(ResourceLinkage::new(type_name, id))),
        ..RelationshipDoc::default()
    }
}

/// To-one relationship entry explicitly set to `null`.
pub fn to_one_null() -> RelationshipDoc {
    RelationshipDoc {
        data: Some(Linkage::Null),
        ..RelationshipDoc::default()
    }
}

/// To-many relationship entry over `(type_name, id)` pairs, in order.
pub fn to_many(members: &[(&str, &str)]) -> RelationshipDoc {
    RelationshipDoc {
        data: Some(Linkage::Many(
            members
                .iter()
                .map(|(t, id)| ResourceLinkage::new(t, id))
                .collect(),
        )),
        ..RelationshipDoc::default()
    }
}

/// Relationship entry carrying only a `related` link.
pub fn link_only(href: &str) -> RelationshipDoc {
    RelationshipDoc {
        links: Some(RelationshipLinks {
            related: Some(Link::Href(href.to_owned())),
            self_link: None,
        }),
        ..RelationshipDoc::default()
    }
}

/// Builder for [`Document`]s.
///
/// # Example
///
/// ```
/// use echo_dry_tests::{resource, DocumentBuilder};
/// use serde_json::json;
///
/// let doc = DocumentBuilder::new()
///     .primary(resource("post", "1").with_attribute("title", json!("hi")))
///     .include(resource("person", "9"))
///     .build();
///
/// assert_eq!(doc.resources().count(), 2);
/// ```
#[derive(Default)]
pub struct DocumentBuilder {
    primary: Option<PrimaryData>,
    included: Vec<ResourceDoc>,
    meta: Option<Value>,
    links: Vec<(String, Link)>,
}

impl DocumentBuilder {
    /// Create an empty builder (`data` absent).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set single-resource primary data.
    pub fn primary(mut self, resource: ResourceDoc) -> Self {
        self.primary = Some(PrimaryData::Single(Box::new(resource)));
        self
    }

    /// Set list primary data.
    pub fn primaries(mut self, resources: Vec<ResourceDoc>) -> Self {
        self.primary = Some(PrimaryData::Many(resources));
        self
    }

    /// Add a side-loaded resource.
    pub fn include(mut self, resource: ResourceDoc) -> Self {
        self.included.push(resource);
        self
    }

    /// Set top-level meta.
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Add a top-level link.
    pub fn link(mut self, name: &str, href: &str) -> Self {
        self.links.push((name.to_owned(), Link::Href(href.to_owned())));
        self
    }

    /// Build the document.
    pub fn build(self) -> Document {
        Document {
            data: self.primary,
            included: self.included,
            meta: self.meta,
            links: self.links.into_iter().collect(),
        }
    }
}
