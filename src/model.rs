//! Dynamic records for owners and related entities
//!
//! A `Record` is one row of some model: its attribute values (JSON scalars), the model's
//! primary-key columns, and enough lifecycle state to tell a new record from a persisted one
//! and to know which attributes changed since the last sync with the store.
//!
//! Related entities are shared between the relation cache, the reconciliation result and the
//! staging store as [`RecordRef`] handles, so "the same entity" always means the same
//! allocation.

use crate::relation::identity::{Identity, KeyPart};
use crate::schema::ModelSchema;
use serde_json::{Map, Value as JsonValue};
use std::cell::RefCell;
use std::rc::Rc;

pub mod field_errors;
#[doc(inline)]
pub use field_errors::FieldErrors;

/// Shared handle to a related entity
pub type RecordRef = Rc<RefCell<Record>>;

/// One row of a model
///
/// # Example
///
/// ```
/// use linkmany::{Record, ModelSchema};
/// use serde_json::json;
///
/// let schema = ModelSchema::new("tag", &["id"], &["id", "name"]);
/// let mut tag = Record::new(&schema);
/// assert!(tag.is_new_record());
/// assert_eq!(tag.primary_key(), None);
///
/// tag.set("id", json!(3));
/// assert_eq!(tag.primary_key().map(|k| k.to_string()), Some("3".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    model: String,
    primary_key: Vec<String>,
    attributes: Map<String, JsonValue>,
    /// Attribute values as last synced with the store; `None` for a new record
    snapshot: Option<Map<String, JsonValue>>,
    scenario: Option<String>,
    errors: FieldErrors,
}

impl Record {
    /// A new (not yet persisted) record with every declared column set to `null`
    pub fn new(schema: &ModelSchema) -> Self {
        let attributes = schema
            .columns
            .iter()
            .map(|column| (column.clone(), JsonValue::Null))
            .collect();
        Self {
            model: schema.name.clone(),
            primary_key: schema.primary_key.clone(),
            attributes,
            snapshot: None,
            scenario: None,
            errors: FieldErrors::new(),
        }
    }

    /// A persisted record built from a stored row
    ///
    /// Declared columns missing from `row` are `null`; extra row fields are kept.
    pub fn persisted(schema: &ModelSchema, row: Map<String, JsonValue>) -> Self {
        let mut record = Self::new(schema);
        for (name, value) in row {
            record.attributes.insert(name, value);
        }
        record.mark_persisted();
        record
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> RecordRef {
        Rc::new(RefCell::new(self))
    }

    /// Model (table) name
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn primary_key_columns(&self) -> &[String] {
        &self.primary_key
    }

    /// `true` until the record has been inserted (or after it was deleted)
    pub fn is_new_record(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.attributes.get(name)
    }

    /// Set an attribute value, returning the previous one
    pub fn set(&mut self, name: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.attributes.insert(name.into(), value)
    }

    pub fn attributes(&self) -> &Map<String, JsonValue> {
        &self.attributes
    }

    /// Normalized primary key, or `None` while any component is missing
    pub fn primary_key(&self) -> Option<Identity> {
        Identity::from_fields(&self.attributes, &self.primary_key)
    }

    /// Primary-key components, usable even when some are blank
    pub fn primary_key_parts(&self) -> Vec<Option<KeyPart>> {
        self.primary_key
            .iter()
            .map(|column| self.attributes.get(column).and_then(KeyPart::from_json))
            .collect()
    }

    /// Attributes whose value differs from the last synced snapshot
    ///
    /// For a new record every non-null attribute is dirty.
    pub fn dirty_attributes(&self) -> Map<String, JsonValue> {
        match &self.snapshot {
            None => self
                .attributes
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            Some(snapshot) => self
                .attributes
                .iter()
                .filter(|(name, value)| snapshot.get(name.as_str()) != Some(*value))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_attributes().is_empty()
    }

    /// Value an attribute had at the last sync, if the record is persisted
    pub fn old_attribute(&self, name: &str) -> Option<&JsonValue> {
        self.snapshot.as_ref().and_then(|snapshot| snapshot.get(name))
    }

    /// Re-sync the snapshot from the current attribute values
    ///
    /// Stores call this after a successful insert/update; the engine calls it on the owner
    /// before committing relations.
    pub fn mark_persisted(&mut self) {
        self.snapshot = Some(self.attributes.clone());
    }

    /// Forget the snapshot (the row no longer exists)
    pub fn mark_deleted(&mut self) {
        self.snapshot = None;
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    pub fn set_scenario(&mut self, scenario: impl Into<String>) {
        self.scenario = Some(scenario.into());
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn add_error(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.errors.add(attribute, message);
    }

    /// Replace all errors
    pub fn set_errors(&mut self, errors: FieldErrors) {
        self.errors = errors;
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }
}
