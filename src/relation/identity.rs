//! Identity keys for matching related records
//!
//! This module provides the `Identity` enum which represents a normalized primary key:
//! either a single scalar or an ordered tuple of scalars for composite keys. Identities are
//! derived the same way from persisted records and from raw payload items, so two sides of a
//! comparison never disagree about representation (`"7"` and `7` are the same key, a UUID
//! compares by its hyphenated string).

use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// One normalized primary-key component
///
/// Integers (and strings holding a canonical integer) become `Int`; everything else that can
/// identify a row becomes its canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    /// Integer key component
    Int(i64),
    /// Any other key component, in canonical string form
    Str(String),
}

impl KeyPart {
    /// Normalize a JSON value into a key component
    ///
    /// Returns `None` for values that cannot carry identity: `null`, the empty string (blank
    /// form inputs), booleans and fractional numbers. A float with no fractional part is the
    /// integer it spells (`1.0` is `1`).
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null | JsonValue::Bool(_) => None,
            JsonValue::Number(n) => Self::from_number(n),
            JsonValue::String(s) if s.is_empty() => None,
            JsonValue::String(s) => Some(Self::from_text(s)),
            // opaque id objects compare by their serialized form
            JsonValue::Array(_) | JsonValue::Object(_) => Some(KeyPart::Str(value.to_string())),
        }
    }

    fn from_number(n: &serde_json::Number) -> Option<Self> {
        if let Some(i) = n.as_i64() {
            return Some(KeyPart::Int(i));
        }
        if let Some(u) = n.as_u64() {
            return Some(KeyPart::Str(u.to_string()));
        }
        let f = n.as_f64()?;
        // i64::MAX is not representable as f64; the bound is exclusive
        let integral = f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64;
        integral.then(|| KeyPart::Int(f as i64))
    }

    fn from_text(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(i) if i.to_string() == s => KeyPart::Int(i),
            _ => KeyPart::Str(s.to_string()),
        }
    }

    /// Convert back into a JSON value (used when backfilling or querying by key)
    pub fn to_json(&self) -> JsonValue {
        match self {
            KeyPart::Int(i) => JsonValue::from(*i),
            KeyPart::Str(s) => JsonValue::from(s.as_str()),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(i) => write!(f, "{i}"),
            KeyPart::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::from_text(value)
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::from_text(&value)
    }
}

impl From<uuid::Uuid> for KeyPart {
    fn from(value: uuid::Uuid) -> Self {
        KeyPart::Str(value.hyphenated().to_string())
    }
}

/// Normalized primary key of a record, single or composite
///
/// # Example
///
/// ```
/// use linkmany::relation::identity::{Identity, KeyPart};
///
/// let single = Identity::Unary(KeyPart::Int(1));
/// assert_eq!(single.arity(), 1);
///
/// let composite = Identity::Composite(vec![KeyPart::Int(1), KeyPart::from("en")]);
/// assert_eq!(composite.arity(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// Single column key
    Unary(KeyPart),
    /// Composite key, components in primary-key column order
    Composite(Vec<KeyPart>),
}

impl Identity {
    /// Build an identity from components in column order; `None` when empty
    pub fn from_parts(mut parts: Vec<KeyPart>) -> Option<Self> {
        match parts.len() {
            0 => None,
            1 => parts.pop().map(Identity::Unary),
            _ => Some(Identity::Composite(parts)),
        }
    }

    /// Number of key components
    pub fn arity(&self) -> usize {
        match self {
            Self::Unary(_) => 1,
            Self::Composite(parts) => parts.len(),
        }
    }

    /// Iterate over key components in column order
    pub fn iter(&self) -> std::slice::Iter<'_, KeyPart> {
        match self {
            Self::Unary(part) => std::slice::from_ref(part).iter(),
            Self::Composite(parts) => parts.iter(),
        }
    }

    /// Extract an identity from a field map
    ///
    /// Every column in `columns` must be present and key-capable; a partial key identifies
    /// nothing and yields `None`.
    pub fn from_fields(fields: &Map<String, JsonValue>, columns: &[String]) -> Option<Self> {
        let parts = columns
            .iter()
            .map(|column| fields.get(column).and_then(KeyPart::from_json))
            .collect::<Option<Vec<_>>>()?;
        Self::from_parts(parts)
    }

    /// Extract the identity a through-association payload item refers to
    ///
    /// A scalar is the linking value itself. A record is accepted when it carries the target's
    /// primary-key columns. Returns `Err` for shapes that can never be a reference (lists and
    /// booleans).
    pub fn from_reference(
        item: &JsonValue,
        columns: &[String],
    ) -> Result<Option<Self>, &'static str> {
        match item {
            JsonValue::Array(_) => Err("a list cannot reference a related record"),
            JsonValue::Bool(_) => Err("a boolean cannot reference a related record"),
            JsonValue::Object(fields) => Ok(Self::from_fields(fields, columns)),
            scalar => Ok(KeyPart::from_json(scalar).map(Identity::Unary)),
        }
    }

    /// Pair each key component with its column, for lookups and statements
    pub fn zip_columns<'a>(
        &'a self,
        columns: &'a [String],
    ) -> impl Iterator<Item = (&'a String, &'a KeyPart)> + 'a {
        columns.iter().zip(self.iter())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Unary(part) => write!(f, "{part}"),
            Identity::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}
