// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
//! Benchmark: document ingestion.
//!
//! Builds a list document of `n` posts, each with an author drawn from a
//! pool of `n / 10` people and two comments, all side-loaded. Measures a
//! cold push (every identity new) and a warm re-push of the same document
//! into a populated store.
//!
//! Throughput "elements" are resources in the document.
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use echo_dry_tests::{blog_store, resource, to_many, to_one, DocumentBuilder};
use echo_store::Document;
use serde_json::json;
use std::time::Duration;

fn build_document(n: usize) -> (Document, usize) {
    let authors = (n / 10).max(1);
    let mut builder = DocumentBuilder::new();
    let mut posts = Vec::with_capacity(n);
    let mut resources = n;
    for i in 0..n {
        let c0 = format!("{i}-0");
        let c1 = format!("{i}-1");
        posts.push(
            resource("post", &i.to_string())
                .with_attribute("title", json!(format!("post {i}")))
                .with_attribute("views", json!(i.to_string()))
                .with_relationship("author", to_one("person", &(i % authors).to_string()))
                .with_relationship(
                    "comments",
                    to_many(&[("comment", c0.as_str()), ("comment", c1.as_str())]),
                ),
        );
        for c in [c0, c1] {
            builder = builder.include(resource("comment", &c).with_attribute("body", json!("ok")));
            resources += 1;
        }
    }
    for a in 0..authors {
        builder = builder.include(resource("person", &a.to_string()).with_attribute("name", json!("ada")));
        resources += 1;
    }
    (builder.primaries(posts).build(), resources)
}

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_throughput");
    group
        .warm_up_time(Duration::from_secs(2))
        .measurement_time(Duration::from_secs(6))
        .sample_size(40);
    for &n in &[10usize, 100, 1_000] {
        let (doc, resources) = build_document(n);
        group.throughput(Throughput::Elements(resources as u64));
        group.bench_with_input(BenchmarkId::new("cold", n), &doc, |b, doc| {
            b.iter_batched(
                || blog_store().0,
                |mut store| {
                    let pushed = store.push(doc);
                    criterion::black_box(pushed.is_ok());
                },
                BatchSize::PerIteration,
            );
        });
        group.bench_with_input(BenchmarkId::new("warm", n), &doc, |b, doc| {
            b.iter_batched(
                || {
                    let mut store = blog_store().0;
                    let _ = store.push(doc);
                    store
                },
                |mut store| {
                    let pushed = store.push(doc);
                    criterion::black_box(pushed.is_ok());
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_push);
criterion_main!(benches);
