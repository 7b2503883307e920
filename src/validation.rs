//! Validation collaborator
//!
//! The engine has no rule language of its own. It asks a [`Validator`] whether a record is
//! valid and records the returned field errors on that record. Errors of staged related
//! entities are also copied onto the owner under `"<relation>[<i>]"`.

use crate::model::{FieldErrors, Record};
use std::collections::BTreeMap;
use std::fmt;

/// Trait for checking a record before it is persisted
///
/// Implementations may branch on [`Record::scenario`].
pub trait Validator {
    fn validate(&self, entity: &Record) -> Result<(), FieldErrors>;
}

impl<F> Validator for F
where
    F: Fn(&Record) -> Result<(), FieldErrors>,
{
    fn validate(&self, entity: &Record) -> Result<(), FieldErrors> {
        self(entity)
    }
}

/// Validators keyed by model name
///
/// Models without a registered validator are always valid.
///
/// # Example
///
/// ```
/// use linkmany::validation::{Validator, ValidatorSet};
/// use linkmany::{FieldErrors, ModelSchema, Record};
///
/// let validators = ValidatorSet::new().with("post", |post: &Record| {
///     match post.get("title").and_then(|t| t.as_str()) {
///         Some(title) if !title.is_empty() => Ok(()),
///         _ => Err(FieldErrors::new().with("title", "Title cannot be blank.")),
///     }
/// });
///
/// let post = Record::new(&ModelSchema::new("post", &["id"], &["id", "title"]));
/// assert!(validators.validate(&post).is_err());
/// ```
#[derive(Default)]
pub struct ValidatorSet {
    validators: BTreeMap<String, Box<dyn Validator>>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the validator for `model`, replacing any previous one
    #[must_use]
    pub fn with(mut self, model: impl Into<String>, validator: impl Validator + 'static) -> Self {
        self.validators.insert(model.into(), Box::new(validator));
        self
    }

    pub fn contains(&self, model: &str) -> bool {
        self.validators.contains_key(model)
    }
}

impl fmt::Debug for ValidatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorSet")
            .field("models", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Validator for ValidatorSet {
    fn validate(&self, entity: &Record) -> Result<(), FieldErrors> {
        match self.validators.get(entity.model()) {
            Some(validator) => validator.validate(entity),
            None => Ok(()),
        }
    }
}

/// Validate `entity` and store the outcome on it; returns whether it is valid
pub(crate) fn validate_record(validator: &dyn Validator, entity: &mut Record) -> bool {
    match validator.validate(entity) {
        Ok(()) => {
            entity.clear_errors();
            true
        }
        Err(errors) => {
            let valid = errors.is_empty();
            entity.set_errors(errors);
            valid
        }
    }
}

/// Owner attribute that collects the errors of the `index`-th staged entity of `relation`
pub fn relation_error_key(relation: &str, index: usize) -> String {
    format!("{relation}[{index}]")
}
