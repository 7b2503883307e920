//! Persistence collaborators
//!
//! The engine never talks to a database directly. It reads related sets, resolves references
//! and applies link/save/unlink through the [`RelationStore`] trait, so the same
//! reconciliation code runs against the in-memory store ([`memory::MemoryStore`]) and the SQL
//! store ([`sql::SqlStore`]).
//!
//! Transactions are the store's business: wrap `commit()` in one if changes to several
//! relations must apply atomically.

use crate::error::StoreError;
use crate::model::Record;
use crate::relation::identity::{Identity, KeyPart};
use crate::schema::Association;
use serde_json::{Map, Value as JsonValue};

pub mod memory;
pub mod sql;

#[doc(inline)]
pub use memory::MemoryStore;
#[doc(inline)]
pub use sql::{SqlExecutor, SqlStore};

/// Trait for the persistence layer the engine drives
///
/// All methods take `&self`; implementations that hold mutable state use interior
/// mutability, the way an executor wraps a connection.
pub trait RelationStore {
    /// Metadata for relation `relation` of the owner's model
    fn association(&self, owner: &Record, relation: &str) -> Result<Association, StoreError>;

    /// Records currently linked to `owner` through `relation`, in store order
    fn find_related(&self, owner: &Record, relation: &str) -> Result<Vec<Record>, StoreError>;

    /// Look up one record of `model` by primary key
    fn find_by_primary_key(&self, model: &str, key: &Identity)
        -> Result<Option<Record>, StoreError>;

    /// Insert a new record or update the dirty attributes of a persisted one
    ///
    /// On success the record's snapshot is re-synced (and generated keys are filled in).
    fn save(&self, entity: &mut Record) -> Result<(), StoreError>;

    /// Establish the link between `owner` and `entity`
    ///
    /// Direct associations copy the owner's key onto the entity's foreign key and save it;
    /// through associations insert a junction row.
    fn link(&self, owner: &Record, relation: &str, entity: &mut Record) -> Result<(), StoreError>;

    /// Remove the link between `owner` and `entity`
    ///
    /// With `cascade` the related row (direct) or junction row (through) is deleted; without
    /// it the foreign key / junction columns are set to `null` and the related row survives.
    fn unlink(
        &self,
        owner: &Record,
        relation: &str,
        entity: &mut Record,
        cascade: bool,
    ) -> Result<(), StoreError>;
}

/// Compare two stored values as keys (`null` never matches)
pub(crate) fn same_key(a: &JsonValue, b: &JsonValue) -> bool {
    match (KeyPart::from_json(a), KeyPart::from_json(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn attribute_or_null(record: &Record, name: &str) -> JsonValue {
    record.get(name).cloned().unwrap_or(JsonValue::Null)
}

/// Copy the owner's key columns onto a directly related entity
pub(crate) fn assign_foreign_key(owner: &Record, association: &Association, entity: &mut Record) {
    for (far, near) in &association.link {
        entity.set(far.clone(), attribute_or_null(owner, near));
    }
}

/// Null out a directly related entity's foreign key columns
pub(crate) fn clear_foreign_key(association: &Association, entity: &mut Record) {
    for (far, _) in &association.link {
        entity.set(far.clone(), JsonValue::Null);
    }
}

/// Junction row linking `owner` and `entity`
///
/// Returns `None` for a direct association.
pub(crate) fn junction_row(
    owner: &Record,
    association: &Association,
    entity: &Record,
) -> Option<Map<String, JsonValue>> {
    let via = association.via.as_ref()?;
    let mut row = Map::new();
    for (junction, near) in &via.link {
        row.insert(junction.clone(), attribute_or_null(owner, near));
    }
    for (target, junction) in &association.link {
        row.insert(junction.clone(), attribute_or_null(entity, target));
    }
    Some(row)
}

/// Primary key a persisted record had at its last sync
///
/// Updates must address the stored row even when the key columns were edited since.
pub(crate) fn stored_identity(entity: &Record) -> Option<Identity> {
    let parts = entity
        .primary_key_columns()
        .iter()
        .map(|column| {
            entity
                .old_attribute(column)
                .or_else(|| entity.get(column))
                .and_then(KeyPart::from_json)
        })
        .collect::<Option<Vec<_>>>()?;
    Identity::from_parts(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_cfg::{blog_schema, row};
    use serde_json::json;

    #[test]
    fn test_same_key() {
        assert!(same_key(&json!(1), &json!("1")));
        assert!(!same_key(&json!(1), &json!(2)));
        assert!(!same_key(&json!(null), &json!(null)));
    }

    #[test]
    fn test_junction_row_for_through_association() {
        let schema = blog_schema();
        let association = schema.association("post", "tags").unwrap();
        let post = Record::persisted(schema.model("post").unwrap(), row(json!({"id": 1})));
        let tag = Record::persisted(schema.model("tag").unwrap(), row(json!({"id": 3})));

        let junction = junction_row(&post, association, &tag).unwrap();
        assert_eq!(junction.get("post_id"), Some(&json!(1)));
        assert_eq!(junction.get("tag_id"), Some(&json!(3)));

        let direct = schema.association("post", "languages").unwrap();
        assert!(junction_row(&post, direct, &tag).is_none());
    }

    #[test]
    fn test_stored_identity_uses_snapshot() {
        let schema = blog_schema();
        let mut tag = Record::persisted(schema.model("tag").unwrap(), row(json!({"id": 3})));
        tag.set("id", json!(30));
        assert_eq!(stored_identity(&tag), Some(Identity::Unary(KeyPart::Int(3))));
    }
}
