//! Field-scoped validation messages.

use std::collections::BTreeMap;

/// Validation messages grouped by attribute name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message for `attribute`
    pub fn add(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(attribute.into())
            .or_default()
            .push(message.into());
    }

    /// Builder form of [`add`](Self::add), handy in validators
    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(attribute, message);
        self
    }

    /// Messages recorded for `attribute`; empty when there are none
    pub fn get(&self, attribute: &str) -> &[String] {
        self.fields.get(attribute).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.fields.contains_key(attribute)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of attributes with at least one message
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.fields.iter()
    }

    /// Every message, attribute by attribute
    pub fn messages(&self) -> impl Iterator<Item = &String> {
        self.fields.values().flatten()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Move every message of `other` into `self`
    pub fn merge(&mut self, other: FieldErrors) {
        for (attribute, messages) in other.fields {
            self.fields.entry(attribute).or_default().extend(messages);
        }
    }
}
