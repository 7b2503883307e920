//! Integration tests for the fill → validate → save → commit cycle
//!
//! These tests drive `RelationEngine` through the public API against `MemoryStore`.
//!
//! Test relationships:
//! - Post has_many PostLanguage (composite key post_id + language)
//! - Post has_many PostComment
//! - Post has_many Tag via post_tag

use linkmany::{
    Association, ChangeKind, FieldErrors, Identity, KeyPart, LinkError, MemoryStore, ModelSchema,
    Phase, Record, RelationEngine, RelationSet, RelationStore, Schema, StoreError, ValidatorSet,
};
use serde_json::{json, Value as JsonValue};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

// ============================================================================
// Fixtures
// ============================================================================

fn post_schema() -> ModelSchema {
    ModelSchema::new("post", &["id"], &["id", "title", "content", "author_id"])
}

fn schema() -> Schema {
    Schema::new()
        .with_model(post_schema())
        .with_association(
            "post",
            "languages",
            Association::has_many(
                ModelSchema::new(
                    "post_language",
                    &["post_id", "language"],
                    &["post_id", "language", "url"],
                ),
                &[("post_id", "id")],
            ),
        )
        .with_association(
            "post",
            "comments",
            Association::has_many(
                ModelSchema::new("post_comment", &["id"], &["id", "post_id", "subject", "content"]),
                &[("post_id", "id")],
            ),
        )
        .with_association(
            "post",
            "tags",
            Association::has_many_via(
                ModelSchema::new("tag", &["id"], &["id", "name"]),
                &[("id", "tag_id")],
                "post_tag",
                &[("post_id", "id")],
            ),
        )
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new(schema());
    for id in 1..=3 {
        store.insert_row("tag", json!({"id": id, "name": format!("tag_{id}")}));
    }
    store.insert_row("post", json!({"id": 1, "title": "Post 1", "content": "first", "author_id": 1}));
    store.insert_row("post_tag", json!({"post_id": 1, "tag_id": 1}));
    store.insert_row("post_tag", json!({"post_id": 1, "tag_id": 2}));
    store.insert_row("post_language", json!({"post_id": 1, "language": "en", "url": "/posts/en"}));
    store.insert_row("post_language", json!({"post_id": 1, "language": "pt-br", "url": "/posts/pt-br"}));
    store.insert_row("post_comment", json!({"id": 1, "post_id": 1, "subject": "s1", "content": "c1"}));
    store
}

fn relations() -> Arc<RelationSet> {
    Arc::new(
        RelationSet::from_value(&json!([
            "languages",
            {"comments": {"scenario": "nested"}},
            {"tags": {"validate": false}}
        ]))
        .unwrap(),
    )
}

fn load_post(store: &dyn RelationStore) -> Record {
    store
        .find_by_primary_key("post", &Identity::Unary(KeyPart::Int(1)))
        .unwrap()
        .unwrap()
}

fn column(records: &[Record], name: &str) -> Vec<JsonValue> {
    records
        .iter()
        .map(|r| r.get(name).cloned().unwrap_or(JsonValue::Null))
        .collect()
}

fn require_content() -> ValidatorSet {
    ValidatorSet::new().with("post_comment", |comment: &Record| {
        match comment.get("content").and_then(JsonValue::as_str) {
            Some(content) if !content.is_empty() => Ok(()),
            _ => Err(FieldErrors::new().with("content", "Content cannot be blank.")),
        }
    })
}

// ============================================================================
// Save cycles
// ============================================================================

#[test]
fn test_save_has_many() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();

    let filled = engine
        .fill(
            &json!({
                "title": "modified title",
                "content": "modified content",
                "author_id": 2,
                "languages": [
                    {"language": "ja", "url": "/posts/ja"},
                    {"language": "en", "url": "/posts/en-modified"}
                ]
            }),
            Some(""),
        )
        .unwrap();
    assert!(filled);
    assert_eq!(engine.related("languages").unwrap().len(), 2);
    assert!(engine.save(&ValidatorSet::new()).unwrap());

    let post = load_post(&store);
    assert_eq!(post.get("title"), Some(&json!("modified title")));
    let languages = store.find_related(&post, "languages").unwrap();
    assert_eq!(column(&languages, "language"), vec![json!("en"), json!("ja")]);
    assert_eq!(column(&languages, "url"), vec![json!("/posts/en-modified"), json!("/posts/ja")]);
}

#[test]
fn test_save_has_many_via_table() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();

    engine
        .fill(&json!({"title": "modified title", "tags": [1, 3]}), None)
        .unwrap();
    assert!(engine.save(&ValidatorSet::new()).unwrap());

    let post = load_post(&store);
    let tags = store.find_related(&post, "tags").unwrap();
    assert_eq!(column(&tags, "id"), vec![json!(1), json!(3)]);
    // unlinking only removed the junction row
    assert_eq!(store.count("tag"), 3);
    assert_eq!(store.count("post_tag"), 2);
}

#[test]
fn test_save_new_record() {
    let store = seeded_store();
    let mut engine =
        RelationEngine::new(Record::new(&post_schema()), relations(), &store).unwrap();

    engine
        .fill(
            &json!({
                "title": "new post",
                "content": "body",
                "tags": [1, 2],
                "languages": [
                    {"language": "ja", "url": "/posts/ja"},
                    {"language": "en", "url": "/posts/en"}
                ]
            }),
            None,
        )
        .unwrap();

    let tags = engine.related("tags").unwrap();
    assert!(tags.iter().all(|t| !t.borrow().is_new_record()));
    let languages = engine.related("languages").unwrap();
    assert!(languages.iter().all(|l| l.borrow().is_new_record()));

    assert!(engine.save(&ValidatorSet::new()).unwrap());
    assert!(languages.iter().all(|l| !l.borrow().is_new_record()));

    let post = engine.owner().clone();
    assert_eq!(store.find_related(&post, "tags").unwrap().len(), 2);
    assert_eq!(store.find_related(&post, "languages").unwrap().len(), 2);
}

// ============================================================================
// Reconciliation properties
// ============================================================================

#[test]
fn test_refill_with_same_payload_is_idempotent() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    let payload = json!({
        "tags": [1, 3],
        "languages": [{"language": "ja"}, {"language": "en", "url": "/en-2"}]
    });

    engine.fill(&payload, None).unwrap();
    let first: Vec<usize> = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        .iter()
        .map(|kind| engine.staging().pending("languages", *kind).len())
        .collect();

    engine.fill(&payload, None).unwrap();
    let second: Vec<usize> = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        .iter()
        .map(|kind| engine.staging().pending("languages", *kind).len())
        .collect();

    assert_eq!(first, vec![1, 1, 1]);
    assert_eq!(first, second);
    assert_eq!(engine.related("languages").unwrap().len(), 2);
    assert_eq!(engine.related("tags").unwrap().len(), 2);
}

#[test]
fn test_full_clear_deletes_every_existing_entity() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    engine.fill(&json!({"languages": [], "tags": []}), None).unwrap();

    assert_eq!(engine.staging().pending("languages", ChangeKind::Delete).len(), 2);
    assert!(engine.staging().pending("languages", ChangeKind::Insert).is_empty());
    assert!(engine.staging().pending("languages", ChangeKind::Update).is_empty());

    engine.commit().unwrap();
    let post = load_post(&store);
    assert!(store.find_related(&post, "languages").unwrap().is_empty());
    assert!(store.find_related(&post, "tags").unwrap().is_empty());
}

#[test]
fn test_matching_is_by_identity_not_instance() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    let before = engine.related("tags").unwrap();

    engine.fill(&json!({"tags": ["1", 2]}), None).unwrap();
    let updated = engine.staging().pending("tags", ChangeKind::Update);
    assert_eq!(updated.len(), 2);
    assert!(engine.staging().pending("tags", ChangeKind::Insert).is_empty());
    assert!(engine.staging().pending("tags", ChangeKind::Delete).is_empty());
    // the cache now holds the reconciled instances
    assert!(!engine.holds("tags", &before[0]));
    assert!(engine.holds("tags", &updated[0]));
}

#[test]
fn test_composite_key_backfill() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    engine
        .fill(&json!({"languages": [{"language": "pt-br", "url": "/br"}]}), None)
        .unwrap();

    let updated = engine.staging().pending("languages", ChangeKind::Update);
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].borrow().get("post_id"), Some(&json!(1)));
    assert_eq!(engine.staging().pending("languages", ChangeKind::Delete).len(), 1);
}

#[test]
fn test_through_insert_and_delete() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    engine.fill(&json!({"tags": [1, 3]}), None).unwrap();

    let ids = |kind| -> Vec<JsonValue> {
        engine
            .staging()
            .pending("tags", kind)
            .iter()
            .map(|t| t.borrow().get("id").cloned().unwrap_or(JsonValue::Null))
            .collect()
    };
    assert_eq!(ids(ChangeKind::Insert), vec![json!(3)]);
    assert_eq!(ids(ChangeKind::Update), vec![json!(1)]);
    assert_eq!(ids(ChangeKind::Delete), vec![json!(2)]);
}

#[test]
fn test_staging_is_per_owner_with_shared_relations() {
    let store = seeded_store();
    store.insert_row("post", json!({"id": 2, "title": "Post 2", "content": "second", "author_id": 1}));
    store.insert_row("post_tag", json!({"post_id": 2, "tag_id": 3}));
    let second_post = store
        .find_by_primary_key("post", &Identity::Unary(KeyPart::Int(2)))
        .unwrap()
        .unwrap();

    let shared = relations();
    let mut first = RelationEngine::new(load_post(&store), Arc::clone(&shared), &store).unwrap();
    let mut second = RelationEngine::new(second_post, Arc::clone(&shared), &store).unwrap();

    first.fill(&json!({"tags": [], "languages": []}), None).unwrap();
    assert_eq!(first.staging().pending("tags", ChangeKind::Delete).len(), 2);

    assert!(second.staging().is_empty());
    assert_eq!(second.phase(), Phase::Idle);
    let tags = second.related("tags").unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].borrow().get("id"), Some(&json!(3)));
    assert!(second.related("languages").unwrap().is_empty());

    // committing one owner leaves the other's links alone
    first.commit().unwrap();
    assert!(second.commit().unwrap().is_empty());
    let post = second.owner().clone();
    assert_eq!(store.find_related(&post, "tags").unwrap().len(), 1);
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validation_attributes_errors_by_index() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    engine
        .fill(
            &json!({"comments": [
                {"subject": "fine", "content": "has content"},
                {"subject": "no content"}
            ]}),
            None,
        )
        .unwrap();

    assert!(!engine.validate(&require_content()));
    let errors = engine.owner().errors();
    assert!(!errors.contains("comments[0]"));
    assert_eq!(errors.get("comments[1]").to_vec(), vec!["Content cannot be blank.".to_string()]);

    // an invalid save writes nothing
    assert!(!engine.save(&require_content()).unwrap());
    assert_eq!(store.count("post_comment"), 1);
}

#[test]
fn test_scenario_is_stamped_before_validation() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    engine
        .fill(&json!({"comments": [{"subject": "draft"}]}), None)
        .unwrap();

    let seen = Rc::new(Cell::new(false));
    let observed = Rc::clone(&seen);
    let validators = ValidatorSet::new().with("post_comment", move |comment: &Record| {
        observed.set(comment.scenario() == Some("nested"));
        Ok(())
    });
    assert!(engine.validate(&validators));
    assert!(seen.get());
}

// ============================================================================
// Commit protocol
// ============================================================================

/// Store that fails every link on one relation and delegates everything else
struct FailingLinks<'a> {
    inner: &'a MemoryStore,
    relation: &'static str,
}

impl RelationStore for FailingLinks<'_> {
    fn association(&self, owner: &Record, relation: &str) -> Result<Association, StoreError> {
        self.inner.association(owner, relation)
    }

    fn find_related(&self, owner: &Record, relation: &str) -> Result<Vec<Record>, StoreError> {
        self.inner.find_related(owner, relation)
    }

    fn find_by_primary_key(
        &self,
        model: &str,
        key: &Identity,
    ) -> Result<Option<Record>, StoreError> {
        self.inner.find_by_primary_key(model, key)
    }

    fn save(&self, entity: &mut Record) -> Result<(), StoreError> {
        self.inner.save(entity)
    }

    fn link(&self, owner: &Record, relation: &str, entity: &mut Record) -> Result<(), StoreError> {
        if relation == self.relation {
            return Err(StoreError::QueryError("connection reset".to_string()));
        }
        self.inner.link(owner, relation, entity)
    }

    fn unlink(
        &self,
        owner: &Record,
        relation: &str,
        entity: &mut Record,
        cascade: bool,
    ) -> Result<(), StoreError> {
        self.inner.unlink(owner, relation, entity, cascade)
    }
}

#[test]
fn test_commit_failure_still_clears_staging() {
    let memory = seeded_store();
    let store = FailingLinks {
        inner: &memory,
        relation: "languages",
    };
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    engine
        .fill(
            &json!({"languages": [{"language": "ja"}], "tags": [1, 3]}),
            None,
        )
        .unwrap();

    let err = engine.commit().unwrap_err();
    assert!(matches!(err, LinkError::Commit { ref relation, .. } if relation == "languages"));
    assert!(engine.staging().is_empty());
    assert_eq!(engine.phase(), Phase::Committed);

    // the failing relation stopped early, the others were still applied
    let post = load_post(&memory);
    assert_eq!(memory.find_related(&post, "languages").unwrap().len(), 2);
    assert_eq!(column(&memory.find_related(&post, "tags").unwrap(), "id"), vec![json!(1), json!(3)]);

    // nothing is re-applied by a second commit
    assert!(engine.commit().unwrap().is_empty());
}

#[test]
fn test_commit_before_owner_is_saved_is_rejected() {
    let store = seeded_store();
    let mut engine =
        RelationEngine::new(Record::new(&post_schema()), relations(), &store).unwrap();
    engine.fill(&json!({"title": "t", "tags": [1]}), None).unwrap();

    assert!(matches!(engine.commit(), Err(LinkError::OwnerNotPersisted(_))));
    assert!(!engine.staging().is_empty());
    assert_eq!(store.count("post_tag"), 2);
}

#[test]
fn test_unlink_without_cascade_keeps_the_related_row() {
    let store = seeded_store();
    let relations = Arc::new(
        RelationSet::from_value(&json!({"comments": {"cascadeOnUnlink": false}})).unwrap(),
    );
    let mut engine = RelationEngine::new(load_post(&store), relations, &store).unwrap();
    engine.fill(&json!({"comments": []}), None).unwrap();
    let summary = engine.commit().unwrap();
    assert_eq!(summary.unlinked, 1);

    let rows = store.rows("post_comment");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("post_id"), Some(&JsonValue::Null));
}

#[test]
fn test_unlink_with_cascade_deletes_the_related_row() {
    let store = seeded_store();
    let mut engine = RelationEngine::new(load_post(&store), relations(), &store).unwrap();
    engine.fill(&json!({"comments": []}), None).unwrap();
    engine.commit().unwrap();
    assert_eq!(store.count("post_comment"), 0);
}
