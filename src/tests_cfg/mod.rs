//! Blog fixtures shared by unit tests.
//!
//! A post has direct `languages` (composite key `post_id, language`), direct `comments`
//! (auto-increment id) and `tags` through the `post_tag` junction table. The seeded data is
//! post 1 linked to tags 1 and 2, with languages `en` / `pt-br` and one comment.

use crate::model::Record;
use crate::relation::identity::{Identity, KeyPart};
use crate::schema::{Association, ModelSchema, Schema};
use crate::store::MemoryStore;
use serde_json::{Map, Value as JsonValue};

pub(crate) fn row(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) fn post_schema() -> ModelSchema {
    ModelSchema::new("post", &["id"], &["id", "title", "content", "author_id"])
}

pub(crate) fn tag_schema() -> ModelSchema {
    ModelSchema::new("tag", &["id"], &["id", "name", "color"])
}

pub(crate) fn language_schema() -> ModelSchema {
    ModelSchema::new("post_language", &["post_id", "language"], &["post_id", "language", "url"])
}

pub(crate) fn comment_schema() -> ModelSchema {
    ModelSchema::new("post_comment", &["id"], &["id", "post_id", "subject", "content"])
}

pub(crate) fn blog_schema() -> Schema {
    Schema::new()
        .with_model(post_schema())
        .with_association(
            "post",
            "languages",
            Association::has_many(language_schema(), &[("post_id", "id")]),
        )
        .with_association(
            "post",
            "comments",
            Association::has_many(comment_schema(), &[("post_id", "id")]),
        )
        .with_association(
            "post",
            "tags",
            Association::has_many_via(tag_schema(), &[("id", "tag_id")], "post_tag", &[("post_id", "id")]),
        )
}

pub(crate) fn blog_store() -> MemoryStore {
    let store = MemoryStore::new(blog_schema());
    for (id, color) in [(1, "#aaaaaa"), (2, "#bbbbbb"), (3, "#cccccc")] {
        store.insert_row(
            "tag",
            serde_json::json!({"id": id, "name": format!("tag_{id}"), "color": color}),
        );
    }
    store.insert_row(
        "post",
        serde_json::json!({"id": 1, "title": "Post 1", "content": "The first post", "author_id": 1}),
    );
    store.insert_row("post_tag", serde_json::json!({"post_id": 1, "tag_id": 1}));
    store.insert_row("post_tag", serde_json::json!({"post_id": 1, "tag_id": 2}));
    store.insert_row(
        "post_language",
        serde_json::json!({"post_id": 1, "language": "en", "url": "/posts/en"}),
    );
    store.insert_row(
        "post_language",
        serde_json::json!({"post_id": 1, "language": "pt-br", "url": "/posts/pt-br"}),
    );
    store.insert_row(
        "post_comment",
        serde_json::json!({"id": 1, "post_id": 1, "subject": "subject 1", "content": "comment 1"}),
    );
    store
}

/// Post 1 as loaded from `store`
pub(crate) fn first_post(store: &MemoryStore) -> Record {
    use crate::store::RelationStore;

    store
        .find_by_primary_key("post", &Identity::Unary(KeyPart::Int(1)))
        .ok()
        .flatten()
        .unwrap_or_else(|| Record::new(&post_schema()))
}
