// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Echo crates.
#![forbid(unsafe_code)]
//!
//! This crate provides commonly used test utilities to reduce duplication
//! across the echo-store test suite.
//!
//! # Modules
//!
//! - [`adapter`] - Adapter fake that records dispatched requests
//! - [`documents`] - Canonical document and relationship builders
//! - [`notices`] - Subscriber that records change notices
//! - [`schema`] - Blog fixture schema and store constructors

pub mod adapter;
pub mod documents;
pub mod notices;
pub mod schema;

// Re-export commonly used items at crate root for convenience
pub use adapter::RecordingAdapter;
pub use documents::{
    link_only, local_resource, resource, to_many, to_one, to_one_null, DocumentBuilder,
};
pub use notices::NoticeLog;
pub use schema::{blog_schema, blog_store, blog_store_with};
