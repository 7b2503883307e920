//! Loading raw payload fields onto records
//!
//! The owner and every related entity are populated through the same [`AttributeLoader`]
//! contract. The default [`FormLoader`] follows the usual web-form convention: the payload is
//! either flat (`{"title": ..}`) or scoped under a form name (`{"Post": {"title": ..}}`), and
//! only declared columns are assigned.

use crate::model::Record;
use serde_json::{Map, Value as JsonValue};

/// Where the fields for one record live in a raw payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormScope<'a> {
    /// Fields are at the top level of the payload
    Flat,
    /// Fields are nested under this key; loading fails when the key is missing
    Named(&'a str),
    /// Fields are nested under this key when it holds a record, otherwise at the top level
    NamedOrFlat(&'a str),
}

impl<'a> FormScope<'a> {
    /// Scope for the owner payload: an empty or missing form name means flat
    pub fn for_owner(form_name: Option<&'a str>) -> Self {
        match form_name {
            None | Some("") => FormScope::Flat,
            Some(name) => FormScope::Named(name),
        }
    }

    /// Scope for one item of a relation payload
    pub fn for_item(form_name: &'a str) -> Self {
        if form_name.is_empty() {
            FormScope::Flat
        } else {
            FormScope::NamedOrFlat(form_name)
        }
    }

    /// The field map this scope selects from `raw`, if any
    pub fn select<'r>(&self, raw: &'r Map<String, JsonValue>) -> Option<&'r Map<String, JsonValue>> {
        match self {
            FormScope::Flat => (!raw.is_empty()).then_some(raw),
            FormScope::Named(name) => raw.get(*name).and_then(JsonValue::as_object),
            FormScope::NamedOrFlat(name) => match raw.get(*name) {
                Some(JsonValue::Object(fields)) => Some(fields),
                _ => (!raw.is_empty()).then_some(raw),
            },
        }
    }
}

/// Trait for populating a record from raw payload fields
///
/// Returns `false` when the payload does not match the expected form (nothing is loaded).
pub trait AttributeLoader {
    fn load(&self, entity: &mut Record, raw: &Map<String, JsonValue>, scope: FormScope<'_>) -> bool;
}

impl<F> AttributeLoader for F
where
    F: Fn(&mut Record, &Map<String, JsonValue>, FormScope<'_>) -> bool,
{
    fn load(&self, entity: &mut Record, raw: &Map<String, JsonValue>, scope: FormScope<'_>) -> bool {
        self(entity, raw, scope)
    }
}

/// Default loader: assigns every declared column present in the selected fields
///
/// # Example
///
/// ```
/// use linkmany::loader::{AttributeLoader, FormLoader, FormScope};
/// use linkmany::{ModelSchema, Record};
/// use serde_json::json;
///
/// let schema = ModelSchema::new("post", &["id"], &["id", "title"]);
/// let mut post = Record::new(&schema);
/// let raw = json!({"Post": {"title": "Hello", "unknown": 1}});
///
/// assert!(FormLoader.load(&mut post, raw.as_object().unwrap(), FormScope::Named("Post")));
/// assert_eq!(post.get("title"), Some(&json!("Hello")));
/// assert!(!post.has_attribute("unknown"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FormLoader;

impl AttributeLoader for FormLoader {
    fn load(&self, entity: &mut Record, raw: &Map<String, JsonValue>, scope: FormScope<'_>) -> bool {
        let Some(fields) = scope.select(raw) else {
            return false;
        };
        for (name, value) in fields {
            if entity.has_attribute(name) {
                entity.set(name.as_str(), value.clone());
            }
        }
        true
    }
}
