// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record lifecycle state machine.
//!
//! ```text
//! empty -> loading -> loaded.saved <-> loaded.updated.uncommitted -> loaded.updated.inFlight -> loaded.saved
//! loaded.* -> deleted.uncommitted -> deleted.inFlight -> deleted.saved
//! new -> new.inFlight -> loaded.saved
//! new -> deleted.saved
//! ```
//!
//! Every mutation path in the store goes through [`RecordState::transition`];
//! an event that is not valid for the current state is an error, never a
//! silent no-op.
use std::fmt;

use thiserror::Error;

/// Lifecycle state of one resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordState {
    /// Identity known, no data yet.
    Empty,
    /// A fetch is pending and no data has arrived.
    Loading,
    /// Loaded, no local changes.
    LoadedSaved,
    /// Loaded with local changes not yet sent.
    LoadedUncommitted,
    /// Loaded, a save is pending.
    LoadedInFlight,
    /// Created locally, never sent.
    New,
    /// Created locally, create request pending.
    NewInFlight,
    /// Marked for deletion, not yet sent.
    DeletedUncommitted,
    /// Delete request pending.
    DeletedInFlight,
    /// Deletion acknowledged (or a local record discarded before sending).
    DeletedSaved,
}

impl RecordState {
    /// Dotted state path (e.g. `"root.loaded.updated.inFlight"`).
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Empty => "root.empty",
            Self::Loading => "root.loading",
            Self::LoadedSaved => "root.loaded.saved",
            Self::LoadedUncommitted => "root.loaded.updated.uncommitted",
            Self::LoadedInFlight => "root.loaded.updated.inFlight",
            Self::New => "root.loaded.created.uncommitted",
            Self::NewInFlight => "root.loaded.created.inFlight",
            Self::DeletedUncommitted => "root.deleted.uncommitted",
            Self::DeletedInFlight => "root.deleted.inFlight",
            Self::DeletedSaved => "root.deleted.saved",
        }
    }

    /// `true` while a save (create, update or delete) is pending.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::LoadedInFlight | Self::NewInFlight | Self::DeletedInFlight
        )
    }

    /// `true` for states that belong in the type's live collection.
    #[must_use]
    pub const fn is_live_member(self) -> bool {
        matches!(
            self,
            Self::LoadedSaved
                | Self::LoadedUncommitted
                | Self::LoadedInFlight
                | Self::New
                | Self::NewInFlight
        )
    }

    /// `true` for locally created records the server has not acknowledged.
    #[must_use]
    pub const fn is_new(self) -> bool {
        matches!(self, Self::New | Self::NewInFlight)
    }

    /// `true` anywhere on the deleted branch.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        matches!(
            self,
            Self::DeletedUncommitted | Self::DeletedInFlight | Self::DeletedSaved
        )
    }

    /// `true` once data exists (loaded or created).
    #[must_use]
    pub const fn has_data(self) -> bool {
        !matches!(self, Self::Empty | Self::Loading)
    }

    /// Applies `event`, returning the next state.
    ///
    /// # Errors
    /// Returns [`InvalidTransition`] when `event` is not valid in `self`.
    pub const fn transition(self, event: LifecycleEvent) -> Result<Self, InvalidTransition> {
        use LifecycleEvent as E;
        use RecordState as S;
        let next = match (self, event) {
            (S::Empty, E::FetchStarted) => S::Loading,
            (S::Loading, E::FetchFailed) => S::Empty,

            (S::Empty | S::Loading | S::LoadedSaved, E::DataPushed) => S::LoadedSaved,
            (
                s @ (S::New
                | S::LoadedUncommitted
                | S::LoadedInFlight
                | S::NewInFlight
                | S::DeletedUncommitted
                | S::DeletedInFlight
                | S::DeletedSaved),
                E::DataPushed,
            ) => s,

            (S::LoadedSaved, E::Mutated) => S::LoadedUncommitted,
            (
                s @ (S::LoadedUncommitted
                | S::LoadedInFlight
                | S::New
                | S::NewInFlight
                | S::DeletedUncommitted),
                E::Mutated,
            ) => s,

            (S::LoadedUncommitted | S::LoadedSaved, E::Reverted) => S::LoadedSaved,
            (s @ (S::LoadedInFlight | S::New | S::NewInFlight), E::Reverted) => s,

            (S::LoadedSaved | S::LoadedUncommitted, E::SaveStarted) => S::LoadedInFlight,
            (S::New, E::SaveStarted) => S::NewInFlight,
            (S::DeletedUncommitted, E::SaveStarted) => S::DeletedInFlight,

            (S::LoadedInFlight | S::NewInFlight, E::SaveAcknowledged) => S::LoadedSaved,
            (S::DeletedInFlight, E::SaveAcknowledged) => S::DeletedSaved,

            (S::LoadedInFlight, E::SaveRejected) => S::LoadedUncommitted,
            (S::NewInFlight, E::SaveRejected) => S::New,
            (S::DeletedInFlight, E::SaveRejected) => S::DeletedUncommitted,

            (S::LoadedSaved | S::LoadedUncommitted | S::DeletedUncommitted, E::DeleteRequested) => {
                S::DeletedUncommitted
            }
            (S::New, E::DeleteRequested | E::Discarded) => S::DeletedSaved,

            (S::DeletedUncommitted, E::DeleteRolledBack) => S::LoadedSaved,

            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Inputs that drive [`RecordState::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// A read request was issued for a record with no data.
    FetchStarted,
    /// That read was rejected or aborted.
    FetchFailed,
    /// Canonical data arrived through ingestion.
    DataPushed,
    /// A local attribute or relationship edit.
    Mutated,
    /// Local edits were discarded (or converged back to canonical).
    Reverted,
    /// A save (create, update or delete) was issued.
    SaveStarted,
    /// The pending save succeeded.
    SaveAcknowledged,
    /// The pending save failed or was aborted.
    SaveRejected,
    /// The application asked to delete the record.
    DeleteRequested,
    /// A locally created record was discarded before being sent.
    Discarded,
    /// An unsent delete was rolled back.
    DeleteRolledBack,
}

/// An event that is not valid for the record's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid lifecycle transition: {event:?} in {from}")]
pub struct InvalidTransition {
    /// State the record was in.
    pub from: RecordState,
    /// Event that was rejected.
    pub event: LifecycleEvent,
}
