// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Live and ad-hoc collections.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use echo_dry_tests::{blog_store, resource, DocumentBuilder, NoticeLog};
use echo_store::{
    CacheError, ChangeKind, CollectionKind, Identity, OpKind, QueryDescriptor, RequestOutcome,
    RequestResult, Subject,
};
use serde_json::json;

fn posts(ids: &[&str]) -> echo_store::Document {
    DocumentBuilder::new()
        .primaries(ids.iter().map(|id| resource("post", id)).collect())
        .build()
}

#[test]
fn find_all_fills_the_live_collection_in_payload_order() {
    let (mut store, adapter) = blog_store();
    let handle = store.find_all("post").unwrap();
    assert_eq!(adapter.find(handle).unwrap().op, OpKind::FindAll);
    store
        .push(&DocumentBuilder::new().primary(resource("person", "9")).build())
        .unwrap();

    store
        .settle_request(handle, RequestOutcome::Fulfilled(Some(posts(&["2", "1"]))))
        .unwrap();
    let live = store.live_collection("post").unwrap();
    assert_eq!(
        store.request(handle).unwrap().result,
        Some(RequestResult::Collection(live))
    );
    let array = store.collection(live).unwrap();
    assert_eq!(array.kind(), CollectionKind::Live);
    let expected: Vec<Identity> = ["2", "1"]
        .iter()
        .map(|id| store.lookup("post", id).unwrap())
        .collect();
    assert_eq!(array.members(), expected.as_slice());
}

#[test]
fn query_builds_an_adhoc_collection_and_refresh_replaces_it() {
    let (mut store, adapter) = blog_store();
    let query = QueryDescriptor::new().param("q", json!("rust"));
    let handle = store.query("post", query.clone()).unwrap();
    assert_eq!(adapter.find(handle).unwrap().query.as_ref(), Some(&query));

    let reply = DocumentBuilder::new()
        .primaries(vec![resource("post", "1"), resource("post", "2")])
        .meta(json!({ "total": 2 }))
        .link("next", "/posts?page=2")
        .build();
    store
        .settle_request(handle, RequestOutcome::Fulfilled(Some(reply)))
        .unwrap();
    let id = match store.request(handle).unwrap().result {
        Some(RequestResult::Collection(id)) => Some(id),
        _ => None,
    }
    .expect("query resolves to a collection");
    let array = store.collection(id).unwrap();
    assert_eq!(array.kind(), CollectionKind::Adhoc);
    assert_eq!(array.query(), Some(&query));
    assert_eq!(array.len(), 2);
    assert_eq!(array.meta(), Some(&json!({ "total": 2 })));
    assert_eq!(array.links()["next"].href(), "/posts?page=2");

    let notices = NoticeLog::attach(&mut store, Some(Subject::Collection(id)));
    let refresh = store.refresh_query(id).unwrap();
    assert_ne!(refresh, handle);
    assert_eq!(adapter.find(refresh).unwrap().op, OpKind::Query);
    store
        .settle_request(refresh, RequestOutcome::Fulfilled(Some(posts(&["3"]))))
        .unwrap();
    let p3 = store.lookup("post", "3").unwrap();
    let array = store.collection(id).unwrap();
    assert_eq!(array.members(), &[p3]);
    assert_eq!(array.meta(), None);
    assert_eq!(notices.len(), 1);
    assert!(notices.saw(Subject::Collection(id), ChangeKind::Membership));
}

#[test]
fn plain_query_does_not_join_a_pending_refresh() {
    let (mut store, adapter) = blog_store();
    let query = QueryDescriptor::new().param("q", json!("rust"));
    let first = store.query("post", query.clone()).unwrap();
    store
        .settle_request(first, RequestOutcome::Fulfilled(Some(posts(&["1"]))))
        .unwrap();
    let owned = match store.request(first).unwrap().result {
        Some(RequestResult::Collection(id)) => Some(id),
        _ => None,
    }
    .expect("query resolves to a collection");

    let refresh = store.refresh_query(owned).unwrap();
    let second = store.query("post", query.clone()).unwrap();
    assert_ne!(second, refresh);
    assert_eq!(adapter.of_kind(OpKind::Query).len(), 3);
    assert_eq!(store.query("post", query).unwrap(), second);

    store
        .settle_request(refresh, RequestOutcome::Fulfilled(Some(posts(&["2"]))))
        .unwrap();
    store
        .settle_request(second, RequestOutcome::Fulfilled(Some(posts(&["3"]))))
        .unwrap();
    let fresh = match store.request(second).unwrap().result {
        Some(RequestResult::Collection(id)) => Some(id),
        _ => None,
    }
    .expect("query resolves to a collection");
    assert_ne!(fresh, owned);
    let p2 = store.lookup("post", "2").unwrap();
    let p3 = store.lookup("post", "3").unwrap();
    assert_eq!(store.collection(owned).unwrap().members(), &[p2]);
    assert_eq!(store.collection(fresh).unwrap().members(), &[p3]);
}

#[test]
fn refresh_of_a_live_collection_is_a_find_all() {
    let (mut store, adapter) = blog_store();
    let live = store.live_collection("post").unwrap();
    let handle = store.refresh_query(live).unwrap();
    assert_eq!(adapter.find(handle).unwrap().op, OpKind::FindAll);
}

#[test]
fn destroy_is_idempotent_and_retires_subscribers() {
    let (mut store, _) = blog_store();
    store.push(&posts(&["1"])).unwrap();
    let p1 = store.lookup("post", "1").unwrap();
    let id = store.create_adhoc_collection("post", None, &[p1]).unwrap();
    let notices = NoticeLog::attach(&mut store, Some(Subject::Collection(id)));

    assert!(store.destroy_collection(id));
    assert!(!store.destroy_collection(id));
    assert!(store.collection(id).is_none());
    assert_eq!(notices.len(), 1);
    assert!(notices.saw(Subject::Collection(id), ChangeKind::Unloaded));

    let err = store.refresh_query(id).unwrap_err();
    assert!(matches!(err, CacheError::UnknownCollection(_)));
}

#[test]
fn answer_for_a_destroyed_collection_is_dropped() {
    let (mut store, _) = blog_store();
    store.push(&posts(&["1"])).unwrap();
    let p1 = store.lookup("post", "1").unwrap();
    let id = store
        .create_adhoc_collection("post", Some(QueryDescriptor::new()), &[p1])
        .unwrap();
    let handle = store.refresh_query(id).unwrap();
    store.destroy_collection(id);
    store
        .settle_request(handle, RequestOutcome::Fulfilled(Some(posts(&["2"]))))
        .unwrap();
    assert_eq!(
        store.request(handle).unwrap().result,
        Some(RequestResult::Nothing)
    );
    assert!(store.collection(id).is_none());
}

#[test]
fn adhoc_collection_requires_known_identities() {
    let (mut store, _) = blog_store();
    let (mut other, _) = blog_store();
    let foreign = other.identity_for("post", "1").unwrap();
    let err = store
        .create_adhoc_collection("post", None, &[foreign])
        .unwrap_err();
    assert!(matches!(err, CacheError::Identity(_)));
}

#[test]
fn unload_removes_a_record_from_every_collection() {
    let (mut store, _) = blog_store();
    store.push(&posts(&["1", "2"])).unwrap();
    let p1 = store.lookup("post", "1").unwrap();
    let p2 = store.lookup("post", "2").unwrap();
    let live = store.live_collection("post").unwrap();
    let adhoc = store.create_adhoc_collection("post", None, &[p1, p2]).unwrap();

    store.unload_record(p1).unwrap();
    assert_eq!(store.collection(live).unwrap().members(), &[p2]);
    assert_eq!(store.collection(adhoc).unwrap().members(), &[p2]);
}

#[test]
fn pending_delete_stays_in_adhoc_collections_until_acknowledged() {
    let (mut store, _) = blog_store();
    store.push(&posts(&["1"])).unwrap();
    let p1 = store.lookup("post", "1").unwrap();
    let live = store.live_collection("post").unwrap();
    let adhoc = store.create_adhoc_collection("post", None, &[p1]).unwrap();

    store.delete_record(p1).unwrap();
    assert!(!store.collection(live).unwrap().contains(p1));
    assert!(store.collection(adhoc).unwrap().contains(p1));

    let handle = store.save_record(p1).unwrap();
    store
        .settle_request(handle, RequestOutcome::Fulfilled(None))
        .unwrap();
    assert!(!store.collection(adhoc).unwrap().contains(p1));
}
