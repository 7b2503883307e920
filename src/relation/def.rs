//! Relation definitions
//!
//! A `RelationDefinition` says how one association of an owner is managed: which form name
//! scopes each payload item, whether staged entities are validated, whether unlinking deletes
//! the related (or junction) row, and which scenario is stamped on every touched entity.
//!
//! Definitions are built once, from code or from configuration, and are immutable afterwards.
//! A `RelationSet` is the ordered collection for one owner model; wrap it in an `Arc` to share
//! it between engines.

use crate::error::LinkError;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Configuration of one managed association
///
/// # Example
///
/// ```
/// use linkmany::RelationDefinition;
///
/// let tags = RelationDefinition::new("tags")
///     .with_validation(false)
///     .with_cascade_on_unlink(false);
/// assert_eq!(tags.form_name(), "tags");
/// assert!(!tags.requires_validation());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDefinition {
    name: String,
    form_name: String,
    validate: bool,
    cascade_on_unlink: bool,
    scenario: Option<String>,
}

impl RelationDefinition {
    /// A definition with defaults: form name = relation name, validated, cascading unlink
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            form_name: name.clone(),
            name,
            validate: true,
            cascade_on_unlink: true,
            scenario: None,
        }
    }

    /// Apply configured options on top of the defaults
    pub fn from_options(name: impl Into<String>, options: RelationOptions) -> Self {
        let mut definition = Self::new(name);
        if let Some(form_name) = options.form_name {
            definition.form_name = form_name;
        }
        if let Some(validate) = options.validate {
            definition.validate = validate;
        }
        if let Some(cascade) = options.cascade_on_unlink {
            definition.cascade_on_unlink = cascade;
        }
        definition.scenario = options.scenario;
        definition
    }

    #[must_use]
    pub fn with_form_name(mut self, form_name: impl Into<String>) -> Self {
        self.form_name = form_name.into();
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    #[must_use]
    pub fn with_cascade_on_unlink(mut self, cascade: bool) -> Self {
        self.cascade_on_unlink = cascade;
        self
    }

    #[must_use]
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Form name used to scope each payload item when loading it onto a related entity
    pub fn form_name(&self) -> &str {
        &self.form_name
    }

    pub fn requires_validation(&self) -> bool {
        self.validate
    }

    pub fn cascade_on_unlink(&self) -> bool {
        self.cascade_on_unlink
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }
}

/// Options record of a `name → options` configuration entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationOptions {
    #[serde(default, rename = "formName", alias = "form_name", alias = "formname")]
    pub form_name: Option<String>,
    #[serde(default)]
    pub validate: Option<bool>,
    #[serde(
        default,
        rename = "cascadeOnUnlink",
        alias = "cascade_on_unlink",
        alias = "cascadeonunlink",
        alias = "deleteOnUnlink",
        alias = "deleteonunlink"
    )]
    pub cascade_on_unlink: Option<bool>,
    #[serde(default)]
    pub scenario: Option<String>,
}

/// Ordered, name-unique set of relation definitions for one owner model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSet {
    definitions: Vec<RelationDefinition>,
}

impl RelationSet {
    /// Build a set from definitions, rejecting blank and duplicate names
    pub fn new(
        definitions: impl IntoIterator<Item = RelationDefinition>,
    ) -> Result<Self, LinkError> {
        let mut set = Self::default();
        for definition in definitions {
            set.push(definition)?;
        }
        Ok(set)
    }

    fn push(&mut self, definition: RelationDefinition) -> Result<(), LinkError> {
        if definition.name.is_empty() {
            return Err(LinkError::Configuration(
                "relation names must not be empty".to_string(),
            ));
        }
        if self.contains(&definition.name) {
            return Err(LinkError::Configuration(format!(
                "relation '{}' is configured more than once",
                definition.name
            )));
        }
        self.definitions.push(definition);
        Ok(())
    }

    /// Parse the list-or-mapping configuration form
    ///
    /// A list holds bare relation names, single-key `{name: options}` records and named
    /// records (`{"name": "postLanguages", "formName": "PL"}`); a mapping holds `name: options`
    /// pairs (`null` options mean defaults). Anything else is a configuration error.
    ///
    /// Named records keep the relation name in a value rather than a key, so it survives
    /// loaders that lowercase keys.
    ///
    /// # Example
    ///
    /// ```
    /// use linkmany::RelationSet;
    /// use serde_json::json;
    ///
    /// let set = RelationSet::from_value(&json!([
    ///     "languages",
    ///     {"tags": {"validate": false, "cascadeOnUnlink": false}}
    /// ]))?;
    /// assert_eq!(set.len(), 2);
    /// assert!(!set.get("tags").unwrap().requires_validation());
    ///
    /// assert!(RelationSet::from_value(&json!([{"invalid": true}])).is_err());
    /// # Ok::<(), linkmany::LinkError>(())
    /// ```
    pub fn from_value(value: &JsonValue) -> Result<Self, LinkError> {
        let mut set = Self::default();
        match value {
            JsonValue::Null => {}
            JsonValue::Array(entries) => {
                for (index, entry) in entries.iter().enumerate() {
                    set.push(Self::parse_entry(index, entry)?)?;
                }
            }
            JsonValue::Object(map) => {
                for (name, options) in map {
                    set.push(Self::parse_named(name, options)?)?;
                }
            }
            other => {
                return Err(LinkError::Configuration(format!(
                    "relations must be a list or a map, got {other}"
                )))
            }
        }
        Ok(set)
    }

    fn parse_entry(index: usize, entry: &JsonValue) -> Result<RelationDefinition, LinkError> {
        match entry {
            JsonValue::String(name) => Ok(RelationDefinition::new(name.as_str())),
            JsonValue::Object(map) if map.get("name").is_some_and(JsonValue::is_string) => {
                let mut options = map.clone();
                let name = options
                    .remove("name")
                    .and_then(|name| name.as_str().map(str::to_string))
                    .unwrap_or_default();
                Self::parse_named(&name, &JsonValue::Object(options))
            }
            JsonValue::Object(map) if map.len() == 1 => {
                let (name, options) = map.iter().next().ok_or_else(|| {
                    LinkError::Configuration(format!("relation entry #{index} is empty"))
                })?;
                Self::parse_named(name, options)
            }
            _ => Err(LinkError::Configuration(format!(
                "relation entry #{index} must be a relation name or a single name → options map"
            ))),
        }
    }

    fn parse_named(name: &str, options: &JsonValue) -> Result<RelationDefinition, LinkError> {
        match options {
            JsonValue::Null => Ok(RelationDefinition::new(name)),
            JsonValue::Object(_) => {
                let options = RelationOptions::deserialize(options).map_err(|e| {
                    LinkError::Configuration(format!("options of relation '{name}': {e}"))
                })?;
                Ok(RelationDefinition::from_options(name, options))
            }
            other => Err(LinkError::Configuration(format!(
                "options of relation '{name}' must be a map, got {other}"
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RelationDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Definitions in configuration order
    pub fn iter(&self) -> std::slice::Iter<'_, RelationDefinition> {
        self.definitions.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(RelationDefinition::name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl<'a> IntoIterator for &'a RelationSet {
    type Item = &'a RelationDefinition;
    type IntoIter = std::slice::Iter<'a, RelationDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
