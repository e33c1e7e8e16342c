// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshots capture what is known and never fetch.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use echo_dry_tests::{blog_store, link_only, resource, to_one, DocumentBuilder};
use echo_store::{CacheError, Linkage, RecordState, SnapshotData, DEFAULT_LID_PREFIX};
use serde_json::json;

#[test]
fn known_relationships_carry_refs_and_the_rest_are_deferred() {
    let (mut store, adapter) = blog_store();
    store
        .push(
            &DocumentBuilder::new()
                .primary(
                    resource("post", "1")
                        .with_attribute("title", json!("hi"))
                        .with_relationship("author", to_one("person", "9"))
                        .with_relationship("comments", link_only("/posts/1/comments")),
                )
                .build(),
        )
        .unwrap();
    let post = store.lookup("post", "1").unwrap();
    let person = store.lookup("person", "9").unwrap();

    let snap = store.snapshot(post).unwrap();
    assert_eq!(snap.id.as_deref(), Some("1"));
    assert_eq!(snap.state, RecordState::LoadedSaved);
    match &snap.relationships["author"].data {
        SnapshotData::ToOne(Some(r)) => {
            assert_eq!(r.identity, person);
            assert_eq!(r.id.as_deref(), Some("9"));
        }
        other => unreachable!("unexpected author data {other:?}"),
    }
    assert_eq!(snap.relationships["comments"].data, SnapshotData::Deferred);
    assert!(snap.relationships["comments"].links.is_some());
    assert_eq!(snap.relationships["tags"].data, SnapshotData::Deferred);
    assert!(adapter.is_empty());

    let doc = snap.to_resource_doc(store.transforms()).unwrap();
    assert_eq!(doc.attributes["title"], json!("hi"));
    assert!(matches!(doc.relationships["author"].data, Some(Linkage::One(_))));
    assert!(doc.relationships["comments"].data.is_none());
    assert!(!doc.relationships.contains_key("tags"));
}

#[test]
fn snapshots_do_not_follow_later_edits() {
    let (mut store, _) = blog_store();
    store
        .push(
            &DocumentBuilder::new()
                .primary(resource("post", "1").with_attribute("title", json!("hi")))
                .build(),
        )
        .unwrap();
    let post = store.lookup("post", "1").unwrap();
    let before = store.snapshot(post).unwrap();
    store.set_attribute(post, "title", json!("edited")).unwrap();
    let after = store.snapshot(post).unwrap();

    assert_eq!(before.attributes["title"], json!("hi"));
    assert!(before.changed_attributes.is_empty());
    assert_eq!(after.state, RecordState::LoadedUncommitted);
    assert_eq!(
        after.changed_attributes["title"],
        (Some(json!("hi")), json!("edited"))
    );
}

#[test]
fn typed_attributes_go_through_their_transform() {
    let (mut store, _) = blog_store();
    store
        .push(
            &DocumentBuilder::new()
                .primary(resource("post", "1").with_attribute("views", json!("12")))
                .build(),
        )
        .unwrap();
    let post = store.lookup("post", "1").unwrap();
    assert_eq!(store.attribute(post, "views"), Some(&json!(12)));
    let doc = store
        .snapshot(post)
        .unwrap()
        .to_resource_doc(store.transforms())
        .unwrap();
    assert_eq!(doc.attributes["views"], json!(12));

    let bad = DocumentBuilder::new()
        .primary(resource("post", "2").with_attribute("views", json!("many")))
        .build();
    assert!(matches!(store.push(&bad), Err(CacheError::Document(_))));
    assert!(store.lookup("post", "2").is_none());
}

#[test]
fn local_records_snapshot_with_lid_and_defaults() {
    let (mut store, _) = blog_store();
    let post = store.create_record("post", [("title", json!("draft"))]).unwrap();
    let snap = store.snapshot(post).unwrap();
    assert_eq!(snap.id, None);
    assert!(snap.lid.starts_with(DEFAULT_LID_PREFIX));
    assert_eq!(snap.state, RecordState::New);
    assert_eq!(snap.attributes["status"], json!("draft"));

    assert!(store.unload_record(post).unwrap());
    assert!(store.snapshot(post).is_err());
}
