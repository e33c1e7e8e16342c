// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request records: pending and completed fetches and saves.
//!
//! Identical pending reads are coalesced onto one record, so a second
//! `find_record` before the first settles observes the same handle and no
//! second adapter call is made. Settlement moves a record to its terminal
//! status exactly once; a late settle (after abort) is reported, not applied.
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::collection::CollectionId;
use crate::doc::Document;
use crate::error::CacheError;
use crate::ident::{Identity, TypeName};

/// Handle for one request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestHandle(u64);

impl RequestHandle {
    /// Raw value (for logging and adapters).
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// Logical operation of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    /// Fetch one record.
    FindRecord,
    /// Fetch every record of a type.
    FindAll,
    /// Fetch a query result.
    Query,
    /// Fetch a deferred relationship through its link.
    FindRelationship,
    /// Create a locally created record.
    CreateRecord,
    /// Save local edits.
    UpdateRecord,
    /// Delete a record.
    DeleteRecord,
}

impl OpKind {
    /// `true` for fetches (coalescable).
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::FindRecord | Self::FindAll | Self::Query | Self::FindRelationship
        )
    }
}

/// What a request is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestTarget {
    /// One resource.
    Record(Identity),
    /// Every resource of a type.
    Type(TypeName),
    /// A query, identified by its canonical parameter JSON.
    Query {
        /// Resource type.
        type_name: TypeName,
        /// Canonical query key.
        key: String,
    },
    /// One relationship of one resource.
    Relationship {
        /// Owning resource.
        identity: Identity,
        /// Relationship name.
        name: Arc<str>,
    },
}

impl RequestTarget {
    /// Identity the request concerns, if any.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        match self {
            Self::Record(identity) | Self::Relationship { identity, .. } => Some(*identity),
            Self::Type(_) | Self::Query { .. } => None,
        }
    }
}

/// Coalescing key: two pending reads with equal keys share one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    /// Logical operation.
    pub op: OpKind,
    /// Subject of the operation.
    pub target: RequestTarget,
}

/// Lifecycle of a request record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Issued, not settled.
    Pending,
    /// Settled successfully.
    Fulfilled,
    /// Settled with an adapter error.
    Rejected,
    /// Cancelled before the adapter answered.
    Aborted,
}

/// Failure reported by an adapter. A value, never a store error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request failed: {message}")]
pub struct RequestError {
    /// Human-readable message.
    pub message: String,
    /// Transport status, when there is one.
    pub status: Option<u16>,
    /// Structured error payload (e.g. validation errors per field).
    pub details: Option<Value>,
}

impl RequestError {
    /// Error with only a message.
    #[must_use]
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_owned(),
            status: None,
            details: None,
        }
    }

    /// Adds a transport status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// What an adapter reports back through [`Store::settle_request`](crate::Store::settle_request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Success, optionally with a document to ingest.
    Fulfilled(Option<Document>),
    /// Adapter failure.
    Rejected(RequestError),
    /// Cancelled.
    Aborted,
}

/// What a fulfilled request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestResult {
    /// A single record.
    Record(Identity),
    /// Relationship members.
    Records(Vec<Identity>),
    /// A record array (live or ad-hoc).
    Collection(CollectionId),
    /// Nothing to return (e.g. a delete).
    Nothing,
}

/// One pending or completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Handle.
    pub handle: RequestHandle,
    /// Operation and target.
    pub key: RequestKey,
    /// Current status.
    pub status: RequestStatus,
    /// Callers coalesced onto this record after the first.
    pub joined: u32,
    /// Resolution, once fulfilled.
    pub result: Option<RequestResult>,
    /// Failure, once rejected.
    pub error: Option<RequestError>,
}

/// Pending records and the latest completed record per operation for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestState {
    /// Records still pending.
    pub pending: Vec<RequestRecord>,
    /// Most recent completed record per operation.
    pub completed: BTreeMap<OpKind, RequestRecord>,
}

impl RequestState {
    /// `true` while any request for the target is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Handle returned by [`RequestCache::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestSubscriptionId(u64);

type Waiter = Box<dyn FnOnce(&RequestRecord)>;
type Listener = Box<dyn FnMut(&RequestRecord)>;

/// Tracks request records per target and operation.
pub struct RequestCache {
    next: u64,
    history_limit: usize,
    records: FxHashMap<RequestHandle, RequestRecord>,
    pending: BTreeMap<RequestKey, Vec<RequestHandle>>,
    /// Pending reads later callers may join; at most one per key.
    joinable: BTreeMap<RequestKey, RequestHandle>,
    completed: BTreeMap<RequestKey, VecDeque<RequestHandle>>,
    waiters: FxHashMap<RequestHandle, Vec<Waiter>>,
    next_subscription: u64,
    listeners: BTreeMap<RequestSubscriptionId, (Identity, Listener)>,
}

impl fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCache")
            .field("pending", &self.pending.values().map(Vec::len).sum::<usize>())
            .field("records", &self.records.len())
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

impl RequestCache {
    /// Creates an empty cache retaining `history_limit` completed records per key.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            next: 0,
            history_limit,
            records: FxHashMap::default(),
            pending: BTreeMap::new(),
            joinable: BTreeMap::new(),
            completed: BTreeMap::new(),
            waiters: FxHashMap::default(),
            next_subscription: 0,
            listeners: BTreeMap::new(),
        }
    }

    /// Records a pending request.
    ///
    /// With `coalesce`, an identical pending read is joined instead: the
    /// existing handle is returned with `true`. A request begun without
    /// `coalesce` is never joined by later callers.
    pub fn begin_request(&mut self, key: RequestKey, coalesce: bool) -> (RequestHandle, bool) {
        let coalesce = coalesce && key.op.is_read();
        if coalesce {
            if let Some(handle) = self.joinable.get(&key).copied() {
                if let Some(record) = self.records.get_mut(&handle) {
                    record.joined += 1;
                }
                debug!(%handle, op = ?key.op, "coalesced onto pending request");
                return (handle, true);
            }
        }
        self.next += 1;
        let handle = RequestHandle(self.next);
        self.pending.entry(key.clone()).or_default().push(handle);
        if coalesce {
            self.joinable.insert(key.clone(), handle);
        }
        self.records.insert(
            handle,
            RequestRecord {
                handle,
                key,
                status: RequestStatus::Pending,
                joined: 0,
                result: None,
                error: None,
            },
        );
        (handle, false)
    }

    /// Newest pending handle for `key`, if any.
    #[must_use]
    pub fn pending(&self, key: &RequestKey) -> Option<RequestHandle> {
        self.pending.get(key).and_then(|handles| handles.last().copied())
    }

    /// Every pending handle, oldest first.
    #[must_use]
    pub fn pending_handles(&self) -> Vec<RequestHandle> {
        let mut out: Vec<RequestHandle> = self.pending.values().flatten().copied().collect();
        out.sort_unstable();
        out
    }

    /// Looks up a retained record.
    #[must_use]
    pub fn get(&self, handle: RequestHandle) -> Option<&RequestRecord> {
        self.records.get(&handle)
    }

    /// Moves a pending record to its terminal status and notifies waiters and
    /// listeners.
    ///
    /// Returns `Ok(false)` for a record that already settled (e.g. a late
    /// answer after an abort).
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownRequest`] for a handle this cache never issued.
    pub fn settle(
        &mut self,
        handle: RequestHandle,
        status: RequestStatus,
        result: Option<RequestResult>,
        error: Option<RequestError>,
    ) -> Result<bool, CacheError> {
        if handle.0 == 0 || handle.0 > self.next {
            return Err(CacheError::UnknownRequest(handle));
        }
        let Some(record) = self.records.get_mut(&handle) else {
            warn!(%handle, "settlement for a trimmed request ignored");
            return Ok(false);
        };
        if record.status != RequestStatus::Pending {
            warn!(%handle, status = ?record.status, "late settlement ignored");
            return Ok(false);
        }
        record.status = status;
        record.result = result;
        record.error = error;
        let key = record.key.clone();
        debug!(%handle, op = ?key.op, ?status, joined = record.joined, "request settled");

        if let Some(handles) = self.pending.get_mut(&key) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.pending.remove(&key);
            }
        }
        if self.joinable.get(&key) == Some(&handle) {
            self.joinable.remove(&key);
        }
        let history = self.completed.entry(key.clone()).or_default();
        history.push_back(handle);
        let mut trimmed = Vec::new();
        while history.len() > self.history_limit {
            if let Some(old) = history.pop_front() {
                trimmed.push(old);
            }
        }

        let record = self
            .records
            .get(&handle)
            .cloned()
            .ok_or(CacheError::InternalCorruption("settled record vanished"))?;
        for waiter in self.waiters.remove(&handle).unwrap_or_default() {
            waiter(&record);
        }
        if let Some(identity) = key.target.identity() {
            for (who, listener) in self.listeners.values_mut() {
                if *who == identity {
                    listener(&record);
                }
            }
        }
        for old in trimmed {
            self.records.remove(&old);
        }
        Ok(true)
    }

    /// Runs `callback` once when `handle` settles (immediately if it has).
    ///
    /// # Errors
    /// Returns [`CacheError::UnknownRequest`] when the handle is not retained.
    pub fn when_settled<F>(&mut self, handle: RequestHandle, callback: F) -> Result<(), CacheError>
    where
        F: FnOnce(&RequestRecord) + 'static,
    {
        let record = self
            .records
            .get(&handle)
            .ok_or(CacheError::UnknownRequest(handle))?;
        if record.status == RequestStatus::Pending {
            self.waiters
                .entry(handle)
                .or_default()
                .push(Box::new(callback));
        } else {
            callback(record);
        }
        Ok(())
    }

    /// Registers `callback` for every settlement concerning `identity`.
    pub fn subscribe<F>(&mut self, identity: Identity, callback: F) -> RequestSubscriptionId
    where
        F: FnMut(&RequestRecord) + 'static,
    {
        self.next_subscription += 1;
        let id = RequestSubscriptionId(self.next_subscription);
        self.listeners.insert(id, (identity, Box::new(callback)));
        id
    }

    /// Removes a listener. Returns `true` if it existed.
    pub fn unsubscribe(&mut self, id: RequestSubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Pending records and latest completed record per operation for `target`.
    #[must_use]
    pub fn state_for(&self, target: &RequestTarget) -> RequestState {
        let mut state = RequestState::default();
        for (key, handles) in &self.pending {
            if key.target != *target {
                continue;
            }
            state
                .pending
                .extend(handles.iter().filter_map(|h| self.records.get(h)).cloned());
        }
        state.pending.sort_unstable_by_key(|r| r.handle);
        for (key, history) in &self.completed {
            if key.target != *target {
                continue;
            }
            if let Some(r) = history.back().and_then(|h| self.records.get(h)) {
                state.completed.insert(key.op, r.clone());
            }
        }
        state
    }

    /// Drops waiters and listeners (store shutdown).
    pub fn clear_callbacks(&mut self) {
        self.waiters.clear();
        self.listeners.clear();
    }
}
