//! Model and association metadata
//!
//! Stores describe their tables with `ModelSchema` and their has-many / many-to-many
//! associations with `Association`. The `Schema` registry bundles both so that the in-memory
//! and SQL stores answer `RelationStore::association` from the same declarations.
//!
//! Link mappings follow one convention everywhere: each pair is
//! `(far column, near column)`. For a direct association the far side is the related table
//! and the near side is the owner (`("post_id", "id")`). For a through association
//! `Association::link` pairs target columns with junction columns (`("id", "tag_id")`) and
//! `Via::link` pairs junction columns with owner columns (`("post_id", "id")`).

use crate::error::StoreError;
use std::collections::BTreeMap;

/// Table metadata for one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    /// Model (and table) name
    pub name: String,
    /// Primary-key columns, in key order
    pub primary_key: Vec<String>,
    /// Every declared column, primary key included
    pub columns: Vec<String>,
    /// Whether the store generates the (single-column) primary key on insert
    pub auto_increment: bool,
}

impl ModelSchema {
    /// Declare a model; single-column keys are auto-increment by default
    pub fn new(name: &str, primary_key: &[&str], columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            auto_increment: primary_key.len() == 1,
        }
    }

    /// Keys are supplied by the caller (natural keys, UUIDs)
    #[must_use]
    pub fn without_auto_increment(mut self) -> Self {
        self.auto_increment = false;
        self
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }
}

/// Junction table of a through association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    /// Junction table name
    pub table: String,
    /// `(junction column, owner column)` pairs
    pub link: Vec<(String, String)>,
}

/// A has-many association, direct or through a junction table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// The related model
    pub target: ModelSchema,
    /// `(target column, owner column)` for direct associations,
    /// `(target column, junction column)` for through associations
    pub link: Vec<(String, String)>,
    /// Junction table, for many-to-many associations
    pub via: Option<Via>,
}

fn pairs(link: &[(&str, &str)]) -> Vec<(String, String)> {
    link.iter()
        .map(|(far, near)| (far.to_string(), near.to_string()))
        .collect()
}

impl Association {
    /// Direct one-to-many association: the foreign key lives on the target table
    pub fn has_many(target: ModelSchema, link: &[(&str, &str)]) -> Self {
        Self {
            target,
            link: pairs(link),
            via: None,
        }
    }

    /// Many-to-many association through a junction table
    pub fn has_many_via(
        target: ModelSchema,
        link: &[(&str, &str)],
        table: &str,
        via_link: &[(&str, &str)],
    ) -> Self {
        Self {
            target,
            link: pairs(link),
            via: Some(Via {
                table: table.to_string(),
                link: pairs(via_link),
            }),
        }
    }

    pub fn is_through(&self) -> bool {
        self.via.is_some()
    }

    /// Name of the related model
    pub fn model_type(&self) -> &str {
        &self.target.name
    }
}

/// Registry of models and their associations
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: BTreeMap<String, ModelSchema>,
    associations: BTreeMap<(String, String), Association>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_model(mut self, model: ModelSchema) -> Self {
        self.models.insert(model.name.clone(), model);
        self
    }

    /// Register `association` as relation `name` of `owner`
    ///
    /// The target model is registered too, if it was not already.
    #[must_use]
    pub fn with_association(mut self, owner: &str, name: &str, association: Association) -> Self {
        self.models
            .entry(association.target.name.clone())
            .or_insert_with(|| association.target.clone());
        self.associations
            .insert((owner.to_string(), name.to_string()), association);
        self
    }

    pub fn model(&self, name: &str) -> Result<&ModelSchema, StoreError> {
        self.models
            .get(name)
            .ok_or_else(|| StoreError::UnknownModel(name.to_string()))
    }

    pub fn association(&self, owner: &str, name: &str) -> Result<&Association, StoreError> {
        self.associations
            .get(&(owner.to_string(), name.to_string()))
            .ok_or_else(|| StoreError::UnknownAssociation {
                model: owner.to_string(),
                relation: name.to_string(),
            })
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelSchema> {
        self.models.values()
    }
}
