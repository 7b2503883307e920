//! In-memory `RelationStore`
//!
//! Keeps every table (junction tables included) as a vector of JSON rows. Single-column keys of
//! auto-increment models are generated on insert. Useful for tests, fixtures and demos; it has
//! no transactions.

use super::{
    assign_foreign_key, clear_foreign_key, junction_row, same_key, stored_identity,
    RelationStore,
};
use crate::error::StoreError;
use crate::model::Record;
use crate::relation::identity::{Identity, KeyPart};
use crate::schema::{Association, Schema};
use serde_json::{Map, Value as JsonValue};
use std::cell::RefCell;
use std::collections::BTreeMap;

type Row = Map<String, JsonValue>;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn observe_id(&mut self, value: Option<&JsonValue>) {
        if let Some(KeyPart::Int(id)) = value.and_then(KeyPart::from_json) {
            self.next_id = self.next_id.max(id);
        }
    }
}

/// `RelationStore` over in-memory tables
///
/// # Example
///
/// ```
/// use linkmany::{MemoryStore, ModelSchema, Schema};
/// use serde_json::json;
///
/// let schema = Schema::new().with_model(ModelSchema::new("tag", &["id"], &["id", "name"]));
/// let store = MemoryStore::new(schema);
/// store.insert_row("tag", json!({"id": 1, "name": "rust"}));
/// assert_eq!(store.rows("tag").len(), 1);
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    schema: Schema,
    tables: RefCell<BTreeMap<String, Table>>,
}

fn row_matches(row: &Row, key: &Identity, columns: &[String]) -> bool {
    key.zip_columns(columns).all(|(column, part)| {
        row.get(column).and_then(KeyPart::from_json).as_ref() == Some(part)
    })
}

impl MemoryStore {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            tables: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Seed a row directly (no key generation, no checks)
    ///
    /// Non-object values are ignored.
    pub fn insert_row(&self, table: &str, row: JsonValue) {
        let JsonValue::Object(row) = row else {
            return;
        };
        let key_column = match self.schema.model(table) {
            Ok(model) if model.primary_key.len() == 1 => model.primary_key.first().cloned(),
            _ => None,
        };
        let mut tables = self.tables.borrow_mut();
        let table = tables.entry(table.to_string()).or_default();
        if let Some(column) = key_column {
            table.observe_id(row.get(&column));
        }
        table.rows.push(row);
    }

    /// Snapshot of a table's rows, in insertion order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .borrow()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables.borrow().get(table).map_or(0, |t| t.rows.len())
    }

    fn insert(&self, entity: &mut Record) -> Result<(), StoreError> {
        let model = self.schema.model(entity.model())?;
        let mut tables = self.tables.borrow_mut();
        let table = tables.entry(model.name.clone()).or_default();

        if model.auto_increment && entity.primary_key().is_none() {
            if let Some(column) = model.primary_key.first() {
                table.next_id += 1;
                entity.set(column.clone(), JsonValue::from(table.next_id));
            }
        }
        let key = entity
            .primary_key()
            .ok_or_else(|| StoreError::PrimaryKeyRequired(model.name.clone()))?;
        if table
            .rows
            .iter()
            .any(|row| row_matches(row, &key, &model.primary_key))
        {
            return Err(StoreError::QueryError(format!(
                "duplicate key {key} in '{}'",
                model.name
            )));
        }
        if let [column] = model.primary_key.as_slice() {
            table.observe_id(entity.get(column));
        }
        table.rows.push(entity.attributes().clone());
        entity.mark_persisted();
        Ok(())
    }

    fn update(&self, entity: &mut Record) -> Result<(), StoreError> {
        let dirty = entity.dirty_attributes();
        if dirty.is_empty() {
            return Ok(());
        }
        let model = self.schema.model(entity.model())?;
        let key = stored_identity(entity)
            .ok_or_else(|| StoreError::PrimaryKeyRequired(model.name.clone()))?;
        let mut tables = self.tables.borrow_mut();
        let row = tables
            .get_mut(&model.name)
            .and_then(|t| {
                t.rows
                    .iter_mut()
                    .find(|row| row_matches(row, &key, &model.primary_key))
            })
            .ok_or_else(|| StoreError::RecordNotFound(model.name.clone()))?;
        for (name, value) in dirty {
            row.insert(name, value);
        }
        entity.mark_persisted();
        Ok(())
    }

    fn delete(&self, entity: &mut Record) -> Result<(), StoreError> {
        let model = self.schema.model(entity.model())?;
        let key = stored_identity(entity)
            .ok_or_else(|| StoreError::PrimaryKeyRequired(model.name.clone()))?;
        let mut tables = self.tables.borrow_mut();
        let table = tables
            .get_mut(&model.name)
            .ok_or_else(|| StoreError::RecordNotFound(model.name.clone()))?;
        let before = table.rows.len();
        table
            .rows
            .retain(|row| !row_matches(row, &key, &model.primary_key));
        if table.rows.len() == before {
            return Err(StoreError::RecordNotFound(model.name.clone()));
        }
        entity.mark_deleted();
        Ok(())
    }

    /// Whether a junction row links `owner` and `entity`
    fn junction_matches(
        row: &Row,
        owner: &Record,
        association: &Association,
        entity: Option<&Record>,
    ) -> bool {
        let Some(via) = &association.via else {
            return false;
        };
        let owner_side = via.link.iter().all(|(junction, near)| {
            matches!((row.get(junction), owner.get(near)), (Some(a), Some(b)) if same_key(a, b))
        });
        let target_side = entity.map_or(true, |entity| {
            association.link.iter().all(|(target, junction)| {
                matches!((row.get(junction), entity.get(target)), (Some(a), Some(b)) if same_key(a, b))
            })
        });
        owner_side && target_side
    }
}

impl RelationStore for MemoryStore {
    fn association(&self, owner: &Record, relation: &str) -> Result<Association, StoreError> {
        self.schema.association(owner.model(), relation).cloned()
    }

    fn find_related(&self, owner: &Record, relation: &str) -> Result<Vec<Record>, StoreError> {
        let association = self.schema.association(owner.model(), relation)?;
        let target = &association.target;
        let tables = self.tables.borrow();
        let target_rows = tables.get(&target.name).map(|t| t.rows.as_slice()).unwrap_or(&[]);

        let Some(via) = &association.via else {
            let linked = target_rows.iter().filter(|row| {
                association.link.iter().all(|(far, near)| {
                    matches!((row.get(far), owner.get(near)), (Some(a), Some(b)) if same_key(a, b))
                })
            });
            return Ok(linked
                .map(|row| Record::persisted(target, row.clone()))
                .collect());
        };

        let junction_rows = tables.get(&via.table).map(|t| t.rows.as_slice()).unwrap_or(&[]);
        let mut related = Vec::new();
        for junction in junction_rows
            .iter()
            .filter(|row| Self::junction_matches(row, owner, association, None))
        {
            let found = target_rows.iter().find(|row| {
                association.link.iter().all(|(far, near)| {
                    matches!((row.get(far), junction.get(near)), (Some(a), Some(b)) if same_key(a, b))
                })
            });
            if let Some(row) = found {
                related.push(Record::persisted(target, row.clone()));
            }
        }
        Ok(related)
    }

    fn find_by_primary_key(
        &self,
        model: &str,
        key: &Identity,
    ) -> Result<Option<Record>, StoreError> {
        let schema = self.schema.model(model)?;
        if key.arity() != schema.primary_key.len() {
            return Ok(None);
        }
        let tables = self.tables.borrow();
        Ok(tables
            .get(model)
            .and_then(|t| {
                t.rows
                    .iter()
                    .find(|row| row_matches(row, key, &schema.primary_key))
            })
            .map(|row| Record::persisted(schema, row.clone())))
    }

    fn save(&self, entity: &mut Record) -> Result<(), StoreError> {
        if entity.is_new_record() {
            self.insert(entity)
        } else {
            self.update(entity)
        }
    }

    fn link(&self, owner: &Record, relation: &str, entity: &mut Record) -> Result<(), StoreError> {
        let association = self.schema.association(owner.model(), relation)?;
        let Some(via) = &association.via else {
            assign_foreign_key(owner, association, entity);
            return self.save(entity);
        };
        if entity.is_new_record() {
            self.save(entity)?;
        }
        if let Some(row) = junction_row(owner, association, entity) {
            self.tables
                .borrow_mut()
                .entry(via.table.clone())
                .or_default()
                .rows
                .push(row);
        }
        Ok(())
    }

    fn unlink(
        &self,
        owner: &Record,
        relation: &str,
        entity: &mut Record,
        cascade: bool,
    ) -> Result<(), StoreError> {
        let association = self.schema.association(owner.model(), relation)?;
        let Some(via) = &association.via else {
            if cascade {
                return self.delete(entity);
            }
            clear_foreign_key(association, entity);
            return self.save(entity);
        };

        let mut tables = self.tables.borrow_mut();
        let Some(table) = tables.get_mut(&via.table) else {
            return Ok(());
        };
        if cascade {
            table
                .rows
                .retain(|row| !Self::junction_matches(row, owner, association, Some(&*entity)));
        } else {
            for row in table
                .rows
                .iter_mut()
                .filter(|row| Self::junction_matches(row, owner, association, Some(&*entity)))
            {
                for (junction, _) in via.link.iter() {
                    row.insert(junction.clone(), JsonValue::Null);
                }
                for (_, junction) in association.link.iter() {
                    row.insert(junction.clone(), JsonValue::Null);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_cfg::blog_store;
    use serde_json::json;

    fn post(store: &MemoryStore) -> Record {
        store
            .find_by_primary_key("post", &Identity::Unary(KeyPart::Int(1)))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_find_related_direct_and_through() {
        let store = blog_store();
        let post = post(&store);

        let languages = store.find_related(&post, "languages").unwrap();
        assert_eq!(languages.len(), 2);
        assert!(languages.iter().all(|l| !l.is_new_record()));

        let tags = store.find_related(&post, "tags").unwrap();
        let ids: Vec<_> = tags.iter().map(|t| t.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(json!(1)), Some(json!(2))]);
    }

    #[test]
    fn test_insert_generates_id_after_seeded_rows() {
        let store = blog_store();
        let schema = store.schema().model("tag").unwrap().clone();
        let mut tag = Record::new(&schema);
        tag.set("name", json!("tag_4"));

        store.save(&mut tag).unwrap();
        assert_eq!(tag.get("id"), Some(&json!(4)));
        assert!(!tag.is_new_record());
        assert_eq!(store.count("tag"), 4);
    }

    #[test]
    fn test_update_writes_dirty_attributes_only() {
        let store = blog_store();
        let mut tag = store
            .find_by_primary_key("tag", &Identity::Unary(KeyPart::Int(1)))
            .unwrap()
            .unwrap();
        tag.set("color", json!("#000000"));
        store.save(&mut tag).unwrap();

        let stored = store
            .find_by_primary_key("tag", &Identity::Unary(KeyPart::Int(1)))
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("color"), Some(&json!("#000000")));
        assert_eq!(stored.get("name"), Some(&json!("tag_1")));
    }

    #[test]
    fn test_duplicate_composite_key_is_rejected() {
        let store = blog_store();
        let schema = store.schema().model("post_language").unwrap().clone();
        let mut duplicate = Record::new(&schema);
        duplicate.set("post_id", json!(1));
        duplicate.set("language", json!("en"));

        assert!(matches!(store.save(&mut duplicate), Err(StoreError::QueryError(_))));
    }

    #[test]
    fn test_link_and_unlink_through() {
        let store = blog_store();
        let post = post(&store);
        let mut tag = store
            .find_by_primary_key("tag", &Identity::Unary(KeyPart::Int(3)))
            .unwrap()
            .unwrap();

        store.link(&post, "tags", &mut tag).unwrap();
        assert_eq!(store.find_related(&post, "tags").unwrap().len(), 3);

        store.unlink(&post, "tags", &mut tag, true).unwrap();
        assert_eq!(store.find_related(&post, "tags").unwrap().len(), 2);
        // the tag itself survives, only the junction row is gone
        assert_eq!(store.count("tag"), 3);
    }

    #[test]
    fn test_unlink_through_without_cascade_keeps_junction_row() {
        let store = blog_store();
        let post = post(&store);
        let mut tag = store
            .find_by_primary_key("tag", &Identity::Unary(KeyPart::Int(2)))
            .unwrap()
            .unwrap();

        store.unlink(&post, "tags", &mut tag, false).unwrap();
        assert_eq!(store.find_related(&post, "tags").unwrap().len(), 1);
        assert_eq!(store.count("post_tag"), 2);
    }

    #[test]
    fn test_unlink_direct() {
        let store = blog_store();
        let post = post(&store);
        let mut comments = store.find_related(&post, "comments").unwrap();
        let mut comment = comments.remove(0);

        store.unlink(&post, "comments", &mut comment, false).unwrap();
        assert_eq!(store.count("post_comment"), 1);
        assert_eq!(store.rows("post_comment")[0].get("post_id"), Some(&json!(null)));

        let mut languages = store.find_related(&post, "languages").unwrap();
        store.unlink(&post, "languages", &mut languages[0], true).unwrap();
        assert_eq!(store.count("post_language"), 1);
        assert!(languages[0].is_new_record());
    }

    #[test]
    fn test_find_by_primary_key_arity_mismatch() {
        let store = blog_store();
        let found = store
            .find_by_primary_key("post_language", &Identity::Unary(KeyPart::Int(1)))
            .unwrap();
        assert!(found.is_none());
    }
}
