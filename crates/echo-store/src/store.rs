// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource record store: attribute data and lifecycle per identity.
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::ident::{Identity, TypeName};
use crate::record::{Attributes, ResourceRecord};
use crate::schema::{Schema, SchemaError};
use crate::state::{InvalidTransition, LifecycleEvent, RecordState};

/// Errors raised by record store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Unload was attempted while a save for the record is pending.
    #[error("record {identity} is in flight ({state}); wait for the request to settle")]
    RecordInFlight {
        /// Record identity.
        identity: Identity,
        /// State at the time of the call.
        state: RecordState,
    },
    /// No record exists for the identity.
    #[error("no record for {0}")]
    UnknownRecord(Identity),
    /// The operation is not valid in the record's lifecycle state.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// What an [`RecordStore::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpsertOutcome {
    /// A record was created for a previously unseen identity.
    pub created: bool,
    /// A visible attribute value changed.
    pub changed: bool,
    /// The lifecycle state changed.
    pub state_changed: bool,
}

/// Owner of every [`ResourceRecord`] in one store instance.
#[derive(Debug)]
pub struct RecordStore {
    schema: Arc<Schema>,
    records: FxHashMap<Identity, ResourceRecord>,
}

impl RecordStore {
    /// Creates an empty store over `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            records: FxHashMap::default(),
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, identity: Identity) -> Option<&ResourceRecord> {
        self.records.get(&identity)
    }

    /// Looks up a record or fails with [`StoreError::UnknownRecord`].
    ///
    /// # Errors
    /// Fails when no record exists for `identity`.
    pub fn require(&self, identity: Identity) -> Result<&ResourceRecord, StoreError> {
        self.records
            .get(&identity)
            .ok_or(StoreError::UnknownRecord(identity))
    }

    fn require_mut(&mut self, identity: Identity) -> Result<&mut ResourceRecord, StoreError> {
        self.records
            .get_mut(&identity)
            .ok_or(StoreError::UnknownRecord(identity))
    }

    /// Lifecycle state of `identity`, if it has a record.
    #[must_use]
    pub fn state(&self, identity: Identity) -> Option<RecordState> {
        self.records.get(&identity).map(ResourceRecord::state)
    }

    /// Iterates every record (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.records.values()
    }

    /// Ensures a record exists for `identity` without giving it data.
    ///
    /// Returns `true` if a new `empty` record was created.
    pub fn ensure(&mut self, identity: Identity, type_name: &TypeName) -> bool {
        if self.records.contains_key(&identity) {
            return false;
        }
        self.records.insert(
            identity,
            ResourceRecord::new(identity, Arc::clone(type_name), RecordState::Empty),
        );
        true
    }

    /// Merges a (possibly partial) attribute patch as canonical data.
    ///
    /// Unspecified fields are untouched. Locally dirty and in-flight fields
    /// keep their pending values. A record that had no data moves to
    /// `loaded.saved`; a `new` record stays `new` until it is saved.
    ///
    /// # Errors
    /// Propagates [`StoreError::Transition`] from the lifecycle table.
    pub fn upsert(
        &mut self,
        identity: Identity,
        type_name: &TypeName,
        patch: Attributes,
    ) -> Result<UpsertOutcome, StoreError> {
        let created = self.ensure(identity, type_name);
        let record = self.require_mut(identity)?;
        let before = record.state();
        let next = before.transition(LifecycleEvent::DataPushed)?;
        let changed = record.merge_canonical(patch);
        record.set_state(next);
        trace!(%identity, changed, state = %next, "upsert");
        Ok(UpsertOutcome {
            created,
            changed,
            state_changed: before != next,
        })
    }

    /// Creates a record in state `new` for a freshly allocated local identity.
    ///
    /// Declared defaults (literal or produced) fill every attribute not in
    /// `initial`; explicit initial values are recorded as local edits so they
    /// are part of the first save.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownModel`] for an undeclared type and
    /// [`SchemaError::UnknownAttribute`] for an undeclared initial field.
    pub fn create_local(
        &mut self,
        identity: Identity,
        type_name: &TypeName,
        initial: Attributes,
    ) -> Result<&ResourceRecord, SchemaError> {
        let model = self.schema.require(type_name)?;
        for field in initial.keys() {
            if model.attribute_def(field).is_none() {
                return Err(SchemaError::UnknownAttribute {
                    model: type_name.to_string(),
                    attribute: field.to_string(),
                });
            }
        }
        let mut record = ResourceRecord::new(identity, Arc::clone(type_name), RecordState::New);
        for def in model.attributes() {
            if initial.contains_key(&def.name) {
                continue;
            }
            if let Some(default) = &def.default {
                record.seed(Arc::clone(&def.name), default.produce());
            }
        }
        for (field, value) in initial {
            record.set_local(field, value);
        }
        Ok(self.records.entry(identity).or_insert(record))
    }

    /// Writes a local attribute edit.
    ///
    /// Returns `true` if the visible value changed. The record moves to its
    /// uncommitted state, or back to `loaded.saved` when every edit has
    /// converged to canonical.
    ///
    /// # Errors
    /// Fails for unknown records and for states that reject edits
    /// (`empty`, `loading`, `deleted.inFlight`, `deleted.saved`).
    pub fn set_attribute(
        &mut self,
        identity: Identity,
        field: Arc<str>,
        value: Value,
    ) -> Result<bool, StoreError> {
        let record = self.require_mut(identity)?;
        let mut next = record.state().transition(LifecycleEvent::Mutated)?;
        let changed = record.set_local(field, value);
        if next == RecordState::LoadedUncommitted
            && !record.has_local_changes()
            && !record.has_in_flight_changes()
        {
            next = next.transition(LifecycleEvent::Reverted)?;
        }
        record.set_state(next);
        Ok(changed)
    }

    /// Discards local edits.
    ///
    /// Returns `true` if a visible value changed. `new` records are
    /// discarded (`deleted.saved`) and `deleted.uncommitted` records are
    /// restored.
    ///
    /// # Errors
    /// Fails for unknown records and invalid lifecycle states.
    pub fn rollback(&mut self, identity: Identity) -> Result<bool, StoreError> {
        let record = self.require_mut(identity)?;
        let state = record.state();
        let next = match state {
            RecordState::New => state.transition(LifecycleEvent::Discarded)?,
            RecordState::DeletedUncommitted => state.transition(LifecycleEvent::DeleteRolledBack)?,
            RecordState::LoadedUncommitted | RecordState::LoadedSaved => {
                state.transition(LifecycleEvent::Reverted)?
            }
            other => other,
        };
        let changed = record.rollback_local();
        record.set_state(next);
        Ok(changed)
    }

    /// Marks a record for deletion.
    ///
    /// The record stays in the store; `new` records go straight to
    /// `deleted.saved` since nothing was ever sent.
    ///
    /// # Errors
    /// Fails for unknown records and in-flight or dataless states.
    pub fn delete(&mut self, identity: Identity) -> Result<RecordState, StoreError> {
        self.transition(identity, LifecycleEvent::DeleteRequested)
    }

    /// Removes a record unconditionally unless a save is pending.
    ///
    /// # Errors
    /// Returns [`StoreError::RecordInFlight`] for any `*.inFlight` state.
    pub fn unload(&mut self, identity: Identity) -> Result<Option<ResourceRecord>, StoreError> {
        if let Some(record) = self.records.get(&identity) {
            if record.state().is_in_flight() {
                return Err(StoreError::RecordInFlight {
                    identity,
                    state: record.state(),
                });
            }
        }
        Ok(self.records.remove(&identity))
    }

    /// Applies a lifecycle event and returns the new state.
    ///
    /// # Errors
    /// Fails for unknown records and invalid transitions.
    pub fn transition(
        &mut self,
        identity: Identity,
        event: LifecycleEvent,
    ) -> Result<RecordState, StoreError> {
        let record = self.require_mut(identity)?;
        let next = record.state().transition(event)?;
        record.set_state(next);
        Ok(next)
    }

    /// Starts a save: local edits move to the in-flight layer.
    ///
    /// # Errors
    /// Fails for unknown records and states that cannot be saved.
    pub fn begin_save(&mut self, identity: Identity) -> Result<RecordState, StoreError> {
        let record = self.require_mut(identity)?;
        let next = record.state().transition(LifecycleEvent::SaveStarted)?;
        record.begin_save();
        record.set_state(next);
        Ok(next)
    }

    /// Acknowledges a save: in-flight values become canonical.
    ///
    /// Edits made while the save was pending keep the record uncommitted.
    ///
    /// # Errors
    /// Fails for unknown records and records without a pending save.
    pub fn commit_save(&mut self, identity: Identity) -> Result<RecordState, StoreError> {
        let record = self.require_mut(identity)?;
        let mut next = record.state().transition(LifecycleEvent::SaveAcknowledged)?;
        record.commit_in_flight();
        if next == RecordState::LoadedSaved && record.has_local_changes() {
            next = next.transition(LifecycleEvent::Mutated)?;
        }
        record.set_state(next);
        Ok(next)
    }

    /// Rejects a save: in-flight values return to the local layer.
    ///
    /// # Errors
    /// Fails for unknown records and records without a pending save.
    pub fn reject_save(&mut self, identity: Identity) -> Result<RecordState, StoreError> {
        let record = self.require_mut(identity)?;
        let next = record.state().transition(LifecycleEvent::SaveRejected)?;
        record.reject_in_flight();
        record.set_state(next);
        Ok(next)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::ModelDef;
    use serde_json::json;

    fn store() -> RecordStore {
        let schema = Schema::new().model(
            ModelDef::new("post")
                .attr("title")
                .attr_with_default("status", json!("draft"))
                .attr_with_producer("tags", || json!([])),
        );
        RecordStore::new(Arc::new(schema))
    }

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs.iter().map(|(k, v)| (Arc::from(*k), v.clone())).collect()
    }

    fn post() -> TypeName {
        Arc::from("post")
    }

    #[test]
    fn upsert_creates_and_loads() {
        let mut s = store();
        let id = Identity::from_raw(1);
        let out = s.upsert(id, &post(), attrs(&[("title", json!("T"))])).unwrap();
        assert!(out.created && out.changed && out.state_changed);
        assert_eq!(s.state(id), Some(RecordState::LoadedSaved));
        let again = s.upsert(id, &post(), attrs(&[("title", json!("T"))])).unwrap();
        assert_eq!(again, UpsertOutcome::default());
    }

    #[test]
    fn upsert_into_a_new_record_keeps_it_new() {
        let mut s = store();
        let id = Identity::from_raw(1);
        s.create_local(id, &post(), Attributes::new()).unwrap();
        let out = s.upsert(id, &post(), attrs(&[("title", json!("T"))])).unwrap();
        assert!(out.changed && !out.state_changed);
        assert_eq!(s.state(id), Some(RecordState::New));
        assert_eq!(s.get(id).unwrap().attribute("title"), Some(&json!("T")));
    }

    #[test]
    fn create_local_seeds_defaults_and_keeps_initial_as_edits() {
        let mut s = store();
        let id = Identity::from_raw(1);
        let rec = s
            .create_local(id, &post(), attrs(&[("status", json!("live"))]))
            .unwrap();
        assert_eq!(rec.state(), RecordState::New);
        assert_eq!(rec.attribute("status"), Some(&json!("live")));
        assert_eq!(rec.attribute("tags"), Some(&json!([])));
        assert!(rec.changed_attributes().contains_key("status"));
        assert!(!rec.changed_attributes().contains_key("tags"));

        let err = s
            .create_local(Identity::from_raw(2), &post(), attrs(&[("nope", json!(1))]))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownAttribute { .. }));
    }

    #[test]
    fn edits_move_between_saved_and_uncommitted() {
        let mut s = store();
        let id = Identity::from_raw(1);
        s.upsert(id, &post(), attrs(&[("title", json!("T"))])).unwrap();
        s.set_attribute(id, Arc::from("title"), json!("U")).unwrap();
        assert_eq!(s.state(id), Some(RecordState::LoadedUncommitted));
        s.set_attribute(id, Arc::from("title"), json!("T")).unwrap();
        assert_eq!(s.state(id), Some(RecordState::LoadedSaved));
    }

    #[test]
    fn save_reject_then_retry() {
        let mut s = store();
        let id = Identity::from_raw(1);
        s.upsert(id, &post(), attrs(&[("title", json!("T"))])).unwrap();
        s.set_attribute(id, Arc::from("title"), json!("U")).unwrap();
        assert_eq!(s.begin_save(id).unwrap(), RecordState::LoadedInFlight);
        assert_eq!(s.reject_save(id).unwrap(), RecordState::LoadedUncommitted);
        assert_eq!(s.get(id).unwrap().attribute("title"), Some(&json!("U")));
        s.begin_save(id).unwrap();
        assert_eq!(s.commit_save(id).unwrap(), RecordState::LoadedSaved);
        assert_eq!(s.get(id).unwrap().canonical("title"), Some(&json!("U")));
    }

    #[test]
    fn unload_refuses_in_flight_records() {
        let mut s = store();
        let id = Identity::from_raw(1);
        s.create_local(id, &post(), Attributes::new()).unwrap();
        s.begin_save(id).unwrap();
        let err = s.unload(id).unwrap_err();
        assert_eq!(
            err,
            StoreError::RecordInFlight {
                identity: id,
                state: RecordState::NewInFlight
            }
        );
        assert!(s.get(id).is_some());
    }

    #[test]
    fn rollback_discards_new_records() {
        let mut s = store();
        let id = Identity::from_raw(1);
        s.create_local(id, &post(), attrs(&[("title", json!("x"))])).unwrap();
        assert!(s.rollback(id).unwrap());
        assert_eq!(s.state(id), Some(RecordState::DeletedSaved));
    }
}
