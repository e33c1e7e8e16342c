// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Adapter fake that records every dispatched request.

use std::sync::{Arc, Mutex, MutexGuard};

use echo_store::{Adapter, AdapterRequest, OpKind, RequestHandle};

/// [`Adapter`] that stores requests for the test to inspect and settle.
///
/// Clones share the same log, so a test keeps one clone while the store owns
/// the other.
#[derive(Clone, Default)]
pub struct RecordingAdapter {
    inner: Arc<Mutex<Vec<AdapterRequest>>>,
}

impl RecordingAdapter {
    /// Create an adapter with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<AdapterRequest>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of requests dispatched so far.
    pub fn len(&self) -> usize {
        self.log().len()
    }

    /// `true` when nothing has been dispatched.
    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    /// Copy of every dispatched request, oldest first.
    pub fn requests(&self) -> Vec<AdapterRequest> {
        self.log().clone()
    }

    /// Most recent request.
    pub fn last(&self) -> Option<AdapterRequest> {
        self.log().last().cloned()
    }

    /// Drains the log.
    pub fn take(&self) -> Vec<AdapterRequest> {
        std::mem::take(&mut *self.log())
    }

    /// Dispatched requests of operation `op`.
    pub fn of_kind(&self, op: OpKind) -> Vec<AdapterRequest> {
        self.log().iter().filter(|r| r.op == op).cloned().collect()
    }

    /// Request dispatched under `handle`, if any.
    pub fn find(&self, handle: RequestHandle) -> Option<AdapterRequest> {
        self.log().iter().find(|r| r.handle == handle).cloned()
    }
}

impl Adapter for RecordingAdapter {
    fn dispatch(&mut self, request: AdapterRequest) {
        self.log().push(request);
    }
}
