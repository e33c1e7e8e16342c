// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity resolution through the store: dedup, local ids, server id merge.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use echo_dry_tests::{blog_store, local_resource, resource, to_many, DocumentBuilder};
use echo_store::{
    CacheError, IdentityError, Linkage, RecordState, RelationshipDoc, RequestOutcome, ResourceLinkage,
    SchemaError,
};
use serde_json::json;

#[test]
fn same_type_and_id_always_resolve_to_one_identity() {
    let (mut store, _) = blog_store();
    let first = store.identity_for("post", "1").unwrap();
    store
        .push(&DocumentBuilder::new().primary(resource("post", "1")).build())
        .unwrap();
    let again = store.identity_for("post", "1").unwrap();
    assert_eq!(first, again);
    assert_ne!(first, store.identity_for("person", "1").unwrap());
    assert_eq!(store.identities().len(), 2);
}

#[test]
fn undeclared_type_is_rejected() {
    let (mut store, _) = blog_store();
    let err = store.identity_for("ghost", "1").unwrap_err();
    assert!(matches!(err, CacheError::Schema(SchemaError::UnknownModel(_))));
}

#[test]
fn local_record_keeps_its_handle_after_server_id_arrives() {
    let (mut store, adapter) = blog_store();
    let post = store
        .create_record("post", [("title", json!("draft"))])
        .unwrap();
    let lid = store.identity_entry(post).unwrap().lid().to_owned();
    assert!(lid.starts_with("@lid"));
    assert_eq!(store.identity_entry(post).unwrap().id(), None);

    let handle = store.save_record(post).unwrap();
    assert_eq!(adapter.find(handle).unwrap().identity, Some(post));

    let reply = DocumentBuilder::new()
        .primary(resource("post", "42").with_attribute("title", json!("draft")))
        .build();
    store
        .settle_request(handle, RequestOutcome::Fulfilled(Some(reply)))
        .unwrap();

    assert_eq!(store.lookup("post", "42"), Some(post));
    assert_eq!(store.identity_entry(post).unwrap().id(), Some("42"));
    assert_eq!(store.identity_entry(post).unwrap().lid(), lid);
    assert_eq!(store.record(post).unwrap().state(), RecordState::LoadedSaved);
}

#[test]
fn lid_and_id_in_one_payload_merge_into_one_identity() {
    let (mut store, _) = blog_store();
    let first = store
        .push(
            &DocumentBuilder::new()
                .primary(local_resource("post", "tmp-1").with_attribute("title", json!("a")))
                .build(),
        )
        .unwrap();
    let post = first.primary.identities()[0];
    assert_eq!(store.identity_entry(post).unwrap().id(), None);

    let mut with_id = local_resource("post", "tmp-1");
    with_id.id = Some("7".to_owned());
    store
        .push(&DocumentBuilder::new().primary(with_id).build())
        .unwrap();
    assert_eq!(store.lookup("post", "7"), Some(post));
}

#[test]
fn conflicting_id_for_a_known_lid_is_rejected_atomically() {
    let (mut store, _) = blog_store();
    let mut a = local_resource("post", "tmp-1");
    a.id = Some("1".to_owned());
    store.push(&DocumentBuilder::new().primary(a).build()).unwrap();

    let mut b = local_resource("post", "tmp-1");
    b.id = Some("2".to_owned());
    let doc = DocumentBuilder::new()
        .primary(b)
        .include(resource("person", "9"))
        .build();
    let err = store.push(&doc).unwrap_err();
    assert!(matches!(
        err,
        CacheError::Identity(IdentityError::DuplicateIdentityAssignment { .. })
    ));
    assert!(store.lookup("post", "2").is_none());
    assert!(store.lookup("person", "9").is_none());
}

#[test]
fn lid_reference_to_another_type_is_rejected() {
    let (mut store, _) = blog_store();
    store
        .push(&DocumentBuilder::new().primary(local_resource("person", "x")).build())
        .unwrap();
    let rel = RelationshipDoc {
        data: Some(Linkage::One(ResourceLinkage::local("post", "x"))),
        ..RelationshipDoc::default()
    };
    let doc = DocumentBuilder::new()
        .primary(resource("comment", "1").with_relationship("post", rel))
        .build();
    let err = store.push(&doc).unwrap_err();
    assert!(matches!(
        err,
        CacheError::Identity(IdentityError::LidTypeMismatch { .. })
    ));
    assert!(store.lookup("comment", "1").is_none());
}

#[test]
fn unloading_an_unreferenced_record_forgets_its_identity() {
    let (mut store, _) = blog_store();
    store
        .push(&DocumentBuilder::new().primary(resource("tag", "t")).build())
        .unwrap();
    let tag = store.lookup("tag", "t").unwrap();
    assert!(store.unload_record(tag).unwrap());
    assert!(store.lookup("tag", "t").is_none());
    assert!(store.identity_entry(tag).is_none());
    assert!(!store.unload_record(tag).unwrap());

    // A later payload allocates a fresh handle.
    store
        .push(&DocumentBuilder::new().primary(resource("tag", "t")).build())
        .unwrap();
    assert_ne!(store.lookup("tag", "t"), Some(tag));
}

#[test]
fn unloaded_identity_is_forgotten_with_its_last_referrer() {
    let (mut store, _) = blog_store();
    let doc = DocumentBuilder::new()
        .primaries(vec![
            resource("post", "1").with_relationship("tags", to_many(&[("tag", "a"), ("tag", "b")])),
            resource("post", "2").with_relationship("tags", to_many(&[("tag", "b")])),
        ])
        .build();
    store.push(&doc).unwrap();
    let a = store.lookup("tag", "a").unwrap();
    let b = store.lookup("tag", "b").unwrap();

    assert!(store.unload_record(a).unwrap());
    assert!(store.unload_record(b).unwrap());
    assert_eq!(store.lookup("tag", "a"), Some(a));
    assert_eq!(store.lookup("tag", "b"), Some(b));

    let p1 = store.lookup("post", "1").unwrap();
    assert!(store.unload_record(p1).unwrap());
    assert!(store.lookup("tag", "a").is_none());
    assert!(store.identity_entry(a).is_none());
    assert_eq!(store.lookup("tag", "b"), Some(b));
    let p2 = store.lookup("post", "2").unwrap();
    assert_eq!(store.has_many(p2, "tags"), &[b]);
}
