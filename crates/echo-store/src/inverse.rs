// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Inverse relationship resolution.
//!
//! Resolution runs lazily, the first time a relationship's inverse is needed,
//! so configuration errors surface at first access rather than at declaration.
//! Successful results are memoized per `(model, relationship)`.
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::schema::{InverseDecl, RelationshipDef, RelationshipKind, Schema, SchemaError};

/// The relationship on the related model that mirrors a given relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverseInfo {
    /// Model declaring the inverse (the related model).
    pub model: Arc<str>,
    /// Inverse relationship name.
    pub relationship: Arc<str>,
    /// Cardinality of the inverse.
    pub kind: RelationshipKind,
}

/// Capability for resolving inverse relationships.
///
/// The graph calls this on every edge mutation; implementations are expected
/// to memoize.
pub trait InverseResolver {
    /// Returns the inverse of `model.relationship`, or `None` if it has none.
    ///
    /// # Errors
    /// Returns [`SchemaError`] for unknown names, ambiguous inference, missing
    /// reflexive declarations, and declared inverses that do not point back.
    fn inverse_for(
        &mut self,
        schema: &Schema,
        model: &str,
        relationship: &str,
    ) -> Result<Option<InverseInfo>, SchemaError>;
}

/// Default resolver: explicit declarations first, then inference over the
/// related model's relationships.
#[derive(Debug, Default)]
pub struct SchemaInverseResolver {
    memo: FxHashMap<Arc<str>, FxHashMap<Arc<str>, Option<InverseInfo>>>,
}

impl SchemaInverseResolver {
    /// Creates a resolver with an empty memo.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of memoized resolutions.
    #[must_use]
    pub fn memoized(&self) -> usize {
        self.memo.values().map(FxHashMap::len).sum()
    }
}

impl InverseResolver for SchemaInverseResolver {
    fn inverse_for(
        &mut self,
        schema: &Schema,
        model: &str,
        relationship: &str,
    ) -> Result<Option<InverseInfo>, SchemaError> {
        if let Some(hit) = self.memo.get(model).and_then(|m| m.get(relationship)) {
            return Ok(hit.clone());
        }
        let resolved = resolve(schema, model, relationship)?;
        self.memo
            .entry(Arc::from(model))
            .or_default()
            .insert(Arc::from(relationship), resolved.clone());
        Ok(resolved)
    }
}

fn resolve(
    schema: &Schema,
    model: &str,
    relationship: &str,
) -> Result<Option<InverseInfo>, SchemaError> {
    let def = schema.require_relationship(model, relationship)?;
    match &def.inverse {
        InverseDecl::None => Ok(None),
        InverseDecl::Named(name) => resolve_named(schema, model, def, name).map(Some),
        InverseDecl::Infer => infer(schema, model, def),
    }
}

fn resolve_named(
    schema: &Schema,
    model: &str,
    def: &RelationshipDef,
    name: &Arc<str>,
) -> Result<InverseInfo, SchemaError> {
    let invalid = || SchemaError::InvalidInverse {
        model: model.to_owned(),
        relationship: def.name.to_string(),
        inverse: name.to_string(),
        target: def.target.to_string(),
    };
    let target = schema.require(&def.target)?;
    let inverse = target.relationship_def(name).ok_or_else(invalid)?;
    if &*inverse.target != model {
        return Err(invalid());
    }
    match &inverse.inverse {
        InverseDecl::Infer => {}
        InverseDecl::Named(back) if *back == def.name => {}
        _ => return Err(invalid()),
    }
    Ok(InverseInfo {
        model: Arc::clone(&def.target),
        relationship: Arc::clone(&inverse.name),
        kind: inverse.kind,
    })
}

fn infer(
    schema: &Schema,
    model: &str,
    def: &RelationshipDef,
) -> Result<Option<InverseInfo>, SchemaError> {
    let target = schema.require(&def.target)?;
    let pointing_back: Vec<&RelationshipDef> = target
        .relationships()
        .filter(|r| &*r.target == model)
        .collect();

    // A candidate that names this relationship explicitly settles it.
    let named: Vec<&RelationshipDef> = pointing_back
        .iter()
        .copied()
        .filter(|r| matches!(&r.inverse, InverseDecl::Named(n) if *n == def.name))
        .collect();
    let chosen = match named.as_slice() {
        [one] => *one,
        // Reflexive relationships are only inferred when the partner names them.
        [] if &*def.target == model => {
            return Err(SchemaError::MissingReflexiveInverse {
                model: model.to_owned(),
                relationship: def.name.to_string(),
            });
        }
        [] => {
            let open: Vec<&RelationshipDef> = pointing_back
                .iter()
                .copied()
                .filter(|r| r.inverse == InverseDecl::Infer)
                .collect();
            match open.as_slice() {
                [] => return Ok(None),
                [one] => {
                    ensure_unique_origin(schema, model, def)?;
                    *one
                }
                many => return Err(ambiguous(model, def, many)),
            }
        }
        many => return Err(ambiguous(model, def, many)),
    };
    Ok(Some(InverseInfo {
        model: Arc::clone(&def.target),
        relationship: Arc::clone(&chosen.name),
        kind: chosen.kind,
    }))
}

/// Inference is symmetric: if the originating model has several open
/// relationships to the same target, the single candidate cannot tell which
/// of them it mirrors.
fn ensure_unique_origin(
    schema: &Schema,
    model: &str,
    def: &RelationshipDef,
) -> Result<(), SchemaError> {
    let origin = schema.require(model)?;
    let siblings: Vec<&RelationshipDef> = origin
        .relationships()
        .filter(|r| r.target == def.target && r.inverse == InverseDecl::Infer)
        .collect();
    if siblings.len() > 1 {
        return Err(ambiguous(model, def, &siblings));
    }
    Ok(())
}

fn ambiguous(model: &str, def: &RelationshipDef, candidates: &[&RelationshipDef]) -> SchemaError {
    SchemaError::AmbiguousInverse {
        model: model.to_owned(),
        relationship: def.name.to_string(),
        target: def.target.to_string(),
        candidates: candidates.iter().map(|r| r.name.to_string()).collect(),
    }
}
