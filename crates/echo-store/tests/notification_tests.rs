// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Change-batch delivery: one notice per subject per batch.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use echo_dry_tests::{blog_store, resource, to_many, to_one, DocumentBuilder, NoticeLog};
use echo_store::{ChangeKind, Subject};
use serde_json::json;

fn seeded() -> (echo_store::Store, echo_store::Identity, echo_store::Identity) {
    let (mut store, _) = blog_store();
    store
        .push(
            &DocumentBuilder::new()
                .primary(resource("post", "1").with_attribute("title", json!("hi")))
                .include(resource("person", "9").with_attribute("name", json!("ada")))
                .build(),
        )
        .unwrap();
    let post = store.lookup("post", "1").unwrap();
    let person = store.lookup("person", "9").unwrap();
    (store, post, person)
}

#[test]
fn ingestion_notifies_each_subject_once() {
    let (mut store, _) = blog_store();
    let log = NoticeLog::attach(&mut store, None);
    store
        .push(
            &DocumentBuilder::new()
                .primary(
                    resource("post", "1")
                        .with_attribute("title", json!("hi"))
                        .with_relationship("author", to_one("person", "9")),
                )
                .include(resource("person", "9").with_attribute("name", json!("ada")))
                .build(),
        )
        .unwrap();
    let post = store.lookup("post", "1").unwrap();
    let person = store.lookup("person", "9").unwrap();

    let notices = log.for_subject(Subject::Record(post));
    assert_eq!(notices.len(), 1);
    for kind in [ChangeKind::Attributes, ChangeKind::State, ChangeKind::Relationships] {
        assert!(notices[0].kinds.contains(kind), "{kind:?} missing");
    }
    assert_eq!(log.for_subject(Subject::Record(person)).len(), 1);
    assert!(log.saw(Subject::Record(person), ChangeKind::Relationships));

    let live = store.live_collection("post").unwrap();
    assert_eq!(log.for_subject(Subject::Collection(live)).len(), 1);
    assert!(log.saw(Subject::Collection(live), ChangeKind::Membership));
}

#[test]
fn failed_ingestion_notifies_nobody() {
    let (mut store, _) = blog_store();
    let log = NoticeLog::attach(&mut store, None);
    let bad = DocumentBuilder::new()
        .primary(resource("post", "1").with_relationship("author", to_many(&[("person", "9")])))
        .build();
    assert!(store.push(&bad).is_err());
    assert!(log.is_empty());
}

#[test]
fn explicit_batch_delivers_after_it_closes() {
    let (mut store, post, _) = seeded();
    let log = NoticeLog::attach(&mut store, None);
    store.batch(|s| {
        s.set_attribute(post, "title", json!("a")).unwrap();
        s.set_attribute(post, "body", json!("b")).unwrap();
        assert!(log.is_empty());
    });
    let notices = log.for_subject(Subject::Record(post));
    assert_eq!(notices.len(), 1);
    assert!(notices[0].kinds.contains(ChangeKind::Attributes));
    assert!(notices[0].kinds.contains(ChangeKind::State));
}

#[test]
fn filtered_subscribers_only_see_their_subject() {
    let (mut store, post, person) = seeded();
    let log = NoticeLog::attach(&mut store, Some(Subject::Record(post)));
    store.set_attribute(person, "name", json!("grace")).unwrap();
    assert!(log.is_empty());
    store.set_attribute(post, "title", json!("new")).unwrap();
    assert_eq!(log.len(), 1);
    assert!(log.saw(Subject::Record(post), ChangeKind::Attributes));
}

#[test]
fn unchanged_values_do_not_notify() {
    let (mut store, post, _) = seeded();
    let log = NoticeLog::attach(&mut store, None);
    store
        .push(
            &DocumentBuilder::new()
                .primary(resource("post", "1").with_attribute("title", json!("hi")))
                .build(),
        )
        .unwrap();
    assert!(log.for_subject(Subject::Record(post)).is_empty());
}

#[test]
fn unsubscribed_callbacks_stay_quiet() {
    let (mut store, post, _) = seeded();
    let log = NoticeLog::attach(&mut store, None);
    assert!(store.unsubscribe(log.id()));
    assert!(!store.unsubscribe(log.id()));
    store.set_attribute(post, "title", json!("new")).unwrap();
    assert!(log.is_empty());
}

#[test]
fn unload_notifies_then_retires_record_subscribers() {
    let (mut store, post, _) = seeded();
    let log = NoticeLog::attach(&mut store, Some(Subject::Record(post)));
    assert!(store.unload_record(post).unwrap());
    assert_eq!(log.len(), 1);
    assert!(log.saw(Subject::Record(post), ChangeKind::Unloaded));

    store
        .push(&DocumentBuilder::new().primary(resource("post", "1")).build())
        .unwrap();
    assert_eq!(log.len(), 1);
}
