// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-resource attribute storage.
//!
//! Attributes live in three layers, read top-down:
//!
//! | layer       | written by                        |
//! |-------------|-----------------------------------|
//! | `local`     | application edits                 |
//! | `in_flight` | `begin_save` (moved from `local`) |
//! | `canonical` | ingestion and save acknowledgment |
//!
//! A field present in `local` or `in_flight` is dirty: background data lands in
//! `canonical` but stays hidden until the upper layer is cleared.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ident::{Identity, TypeName};
use crate::state::RecordState;

/// Attribute map keyed by field name.
pub type Attributes = BTreeMap<Arc<str>, Value>;

/// Dirty tracking for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// Visible value is canonical.
    Clean,
    /// Locally edited, not yet sent.
    Dirty,
    /// Sent with a pending save.
    InFlight,
}

/// Canonical plus pending attribute values for one identity.
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    identity: Identity,
    type_name: TypeName,
    state: RecordState,
    canonical: Attributes,
    in_flight: Attributes,
    local: Attributes,
}

impl ResourceRecord {
    pub(crate) fn new(identity: Identity, type_name: TypeName, state: RecordState) -> Self {
        Self {
            identity,
            type_name,
            state,
            canonical: Attributes::new(),
            in_flight: Attributes::new(),
            local: Attributes::new(),
        }
    }

    /// Identity this record belongs to.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Resource type.
    #[must_use]
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RecordState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RecordState) {
        self.state = state;
    }

    /// Visible value of `field`.
    #[must_use]
    pub fn attribute(&self, field: &str) -> Option<&Value> {
        self.local
            .get(field)
            .or_else(|| self.in_flight.get(field))
            .or_else(|| self.canonical.get(field))
    }

    /// Canonical value of `field`, ignoring pending edits.
    #[must_use]
    pub fn canonical(&self, field: &str) -> Option<&Value> {
        self.canonical.get(field)
    }

    /// All visible values.
    #[must_use]
    pub fn attributes(&self) -> Attributes {
        let mut out = self.canonical.clone();
        out.extend(self.in_flight.iter().map(|(k, v)| (Arc::clone(k), v.clone())));
        out.extend(self.local.iter().map(|(k, v)| (Arc::clone(k), v.clone())));
        out
    }

    /// Dirty tracking for `field`.
    #[must_use]
    pub fn field_state(&self, field: &str) -> FieldState {
        if self.local.contains_key(field) {
            FieldState::Dirty
        } else if self.in_flight.contains_key(field) {
            FieldState::InFlight
        } else {
            FieldState::Clean
        }
    }

    /// `true` when any field has an unsent local edit.
    #[must_use]
    pub fn has_local_changes(&self) -> bool {
        !self.local.is_empty()
    }

    /// `true` when any field is part of a pending save.
    #[must_use]
    pub fn has_in_flight_changes(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// `(canonical, current)` for every dirty or in-flight field.
    #[must_use]
    pub fn changed_attributes(&self) -> BTreeMap<Arc<str>, (Option<Value>, Value)> {
        self.in_flight
            .iter()
            .chain(self.local.iter())
            .map(|(k, _)| {
                let current = self.attribute(k).cloned().unwrap_or(Value::Null);
                (Arc::clone(k), (self.canonical.get(k).cloned(), current))
            })
            .collect()
    }

    /// Merges background data into the canonical layer.
    ///
    /// Dirty and in-flight fields keep their pending value. A local edit that
    /// now equals the incoming canonical value is dropped, since there is
    /// nothing left to send. Returns `true` if any visible value changed.
    pub(crate) fn merge_canonical(&mut self, patch: Attributes) -> bool {
        let mut changed = false;
        for (field, value) in patch {
            let hidden = self.local.contains_key(&field) || self.in_flight.contains_key(&field);
            if !hidden && self.canonical.get(&field) != Some(&value) {
                changed = true;
            }
            if self.local.get(&field) == Some(&value) && !self.in_flight.contains_key(&field) {
                self.local.remove(&field);
            }
            self.canonical.insert(field, value);
        }
        changed
    }

    /// Seeds a value directly into the canonical layer (declared defaults).
    pub(crate) fn seed(&mut self, field: Arc<str>, value: Value) {
        self.canonical.insert(field, value);
    }

    /// Writes a local edit. Returns `true` if the visible value changed.
    ///
    /// Writing the canonical value back makes the field clean again unless
    /// a save for it is pending.
    pub(crate) fn set_local(&mut self, field: Arc<str>, value: Value) -> bool {
        if self.attribute(&field) == Some(&value) {
            return false;
        }
        if !self.in_flight.contains_key(&field) && self.canonical.get(&field) == Some(&value) {
            self.local.remove(&field);
        } else {
            self.local.insert(field, value);
        }
        true
    }

    /// Moves every local edit into the in-flight layer.
    pub(crate) fn begin_save(&mut self) {
        let local = std::mem::take(&mut self.local);
        self.in_flight.extend(local);
    }

    /// Promotes in-flight values to canonical.
    pub(crate) fn commit_in_flight(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        self.canonical.extend(in_flight);
    }

    /// Returns in-flight values to the local layer. Newer local edits win.
    pub(crate) fn reject_in_flight(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        for (field, value) in in_flight {
            self.local.entry(field).or_insert(value);
        }
    }

    /// Discards local edits. Returns `true` if any visible value changed.
    pub(crate) fn rollback_local(&mut self) -> bool {
        let local = std::mem::take(&mut self.local);
        local.into_iter().any(|(field, value)| {
            self.in_flight
                .get(&field)
                .or_else(|| self.canonical.get(&field))
                != Some(&value)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ResourceRecord {
        ResourceRecord::new(Identity::from_raw(1), Arc::from("post"), RecordState::LoadedSaved)
    }

    fn patch(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (Arc::from(*k), v.clone()))
            .collect()
    }

    #[test]
    fn partial_patches_accumulate() {
        let mut r = record();
        assert!(r.merge_canonical(patch(&[("title", json!("T"))])));
        assert!(r.merge_canonical(patch(&[("body", json!("B"))])));
        assert!(!r.merge_canonical(patch(&[("body", json!("B"))])));
        assert_eq!(r.attribute("title"), Some(&json!("T")));
        assert_eq!(r.attribute("body"), Some(&json!("B")));
    }

    #[test]
    fn background_data_does_not_clobber_dirty_fields() {
        let mut r = record();
        r.merge_canonical(patch(&[("x", json!(1)), ("y", json!(1))]));
        r.set_local(Arc::from("x"), json!(2));
        let changed = r.merge_canonical(patch(&[("x", json!(3)), ("y", json!(4))]));
        assert!(changed);
        assert_eq!(r.attribute("x"), Some(&json!(2)));
        assert_eq!(r.attribute("y"), Some(&json!(4)));
        assert_eq!(r.field_state("x"), FieldState::Dirty);
        assert_eq!(r.canonical("x"), Some(&json!(3)));
    }

    #[test]
    fn writing_canonical_value_back_is_clean() {
        let mut r = record();
        r.merge_canonical(patch(&[("x", json!(1))]));
        assert!(r.set_local(Arc::from("x"), json!(2)));
        assert!(r.set_local(Arc::from("x"), json!(1)));
        assert!(!r.has_local_changes());
    }

    #[test]
    fn rejected_save_restores_edits_without_overwriting_newer_ones() {
        let mut r = record();
        r.set_local(Arc::from("x"), json!(1));
        r.set_local(Arc::from("y"), json!(1));
        r.begin_save();
        assert_eq!(r.field_state("x"), FieldState::InFlight);
        r.set_local(Arc::from("y"), json!(2));
        r.reject_in_flight();
        assert_eq!(r.attribute("x"), Some(&json!(1)));
        assert_eq!(r.attribute("y"), Some(&json!(2)));
        assert!(!r.has_in_flight_changes());
    }

    #[test]
    fn commit_and_rollback() {
        let mut r = record();
        r.set_local(Arc::from("x"), json!(1));
        r.begin_save();
        r.commit_in_flight();
        assert_eq!(r.canonical("x"), Some(&json!(1)));
        r.set_local(Arc::from("x"), json!(5));
        let changes = r.changed_attributes();
        assert_eq!(changes["x"], (Some(json!(1)), json!(5)));
        assert!(r.rollback_local());
        assert_eq!(r.attribute("x"), Some(&json!(1)));
        assert!(!r.rollback_local());
    }
}
