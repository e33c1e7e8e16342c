// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Blog fixture schema and store constructors.

use echo_store::{Adapter, ModelDef, RelationshipDef, Schema, Store, StoreConfig};
use serde_json::json;

use crate::adapter::RecordingAdapter;

/// Blog schema used across the test suite.
///
/// - `post`: `title`, `body`, `status` (default `"draft"`), `views` (number),
///   `author` -> `person`, `comments` -> `comment`, `tags` -> `tag` (no inverse)
/// - `person`: `name`, `posts` -> `post`, `bestFriend` -> `person` (reflexive)
/// - `comment`: `body`, `post` -> `post`
/// - `tag`: `label`
pub fn blog_schema() -> Schema {
    Schema::new()
        .model(
            ModelDef::new("post")
                .attr("title")
                .attr("body")
                .attr_with_default("status", json!("draft"))
                .typed_attr("views", "number")
                .belongs_to("author", "person")
                .has_many("comments", "comment")
                .relationship(RelationshipDef::has_many("tags", "tag").without_inverse()),
        )
        .model(
            ModelDef::new("person")
                .attr("name")
                .has_many("posts", "post")
                .relationship(
                    RelationshipDef::belongs_to("bestFriend", "person").with_inverse("bestFriend"),
                ),
        )
        .model(ModelDef::new("comment").attr("body").belongs_to("post", "post"))
        .model(ModelDef::new("tag").attr("label"))
}

/// Store over [`blog_schema`] with a [`RecordingAdapter`].
///
/// # Example
///
/// ```
/// use echo_dry_tests::blog_store;
///
/// let (mut store, adapter) = blog_store();
/// store.find_all("post").unwrap();
/// assert_eq!(adapter.len(), 1);
/// ```
pub fn blog_store() -> (Store, RecordingAdapter) {
    blog_store_with(StoreConfig::default())
}

/// Like [`blog_store`] with an explicit configuration.
///
/// # Panics
/// Panics when `config` is invalid.
pub fn blog_store_with(config: StoreConfig) -> (Store, RecordingAdapter) {
    let adapter = RecordingAdapter::new();
    let store = build(config, adapter.clone());
    (store, adapter)
}

#[allow(clippy::expect_used)]
fn build<A: Adapter + 'static>(config: StoreConfig, adapter: A) -> Store {
    Store::builder(blog_schema())
        .config(config)
        .adapter(adapter)
        .build()
        .expect("fixture config must be valid")
}
