// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Outbound adapter boundary.
//!
//! The store never performs I/O. Fetches and saves are handed to an
//! [`Adapter`] as [`AdapterRequest`]s; the adapter answers later by calling
//! [`Store::settle_request`](crate::Store::settle_request) with the request's
//! handle.
use tracing::trace;

use crate::collection::QueryDescriptor;
use crate::ident::{Identity, TypeName};
use crate::request::{OpKind, RequestHandle};
use crate::snapshot::Snapshot;

/// One unit of work for an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRequest {
    /// Handle to settle.
    pub handle: RequestHandle,
    /// Logical operation.
    pub op: OpKind,
    /// Resource type.
    pub type_name: TypeName,
    /// Record the request concerns, if any.
    pub identity: Option<Identity>,
    /// Server id of that record, if assigned.
    pub id: Option<String>,
    /// Query parameters for [`OpKind::Query`].
    pub query: Option<QueryDescriptor>,
    /// Href for [`OpKind::FindRelationship`].
    pub link: Option<String>,
    /// Record contents for saves.
    pub snapshot: Option<Snapshot>,
}

impl AdapterRequest {
    pub(crate) fn new(handle: RequestHandle, op: OpKind, type_name: TypeName) -> Self {
        Self {
            handle,
            op,
            type_name,
            identity: None,
            id: None,
            query: None,
            link: None,
            snapshot: None,
        }
    }
}

/// Executes requests outside the store.
pub trait Adapter {
    /// Accepts a request. Must not call back into the store synchronously.
    fn dispatch(&mut self, request: AdapterRequest);
}

/// Adapter that drops every request. Requests stay pending until settled by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdapter;

impl Adapter for NullAdapter {
    fn dispatch(&mut self, request: AdapterRequest) {
        trace!(handle = %request.handle, op = ?request.op, "null adapter dropped request");
    }
}
