//! Error types for relation reconciliation.
//!
//! `StoreError` is what the persistence collaborators report; `LinkError` is what the
//! engine reports to its caller. Validation failures are not errors: they are
//! accumulated on the owner record as field errors.

use std::fmt;

/// Error reported by a [`RelationStore`](crate::store::RelationStore) or
/// [`SqlExecutor`](crate::store::sql::SqlExecutor) implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The owner model has no association registered under this name
    UnknownAssociation { model: String, relation: String },
    /// The model is not registered with the store
    UnknownModel(String),
    /// The record has no complete primary key (required for update/delete/link)
    PrimaryKeyRequired(String),
    /// UPDATE/DELETE matched no row
    RecordNotFound(String),
    /// Statement execution failed
    QueryError(String),
    /// Other store errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownAssociation { model, relation } => {
                write!(f, "Model '{model}' has no association named '{relation}'")
            }
            StoreError::UnknownModel(model) => write!(f, "Unknown model: {model}"),
            StoreError::PrimaryKeyRequired(model) => {
                write!(f, "Primary key is required for this operation on '{model}'")
            }
            StoreError::RecordNotFound(model) => {
                write!(f, "Record not found in '{model}' (no rows affected)")
            }
            StoreError::QueryError(msg) => write!(f, "Query error: {msg}"),
            StoreError::Other(msg) => write!(f, "Store error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Error type for relation engine operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Malformed relation configuration (raised while building a `RelationSet`)
    Configuration(String),
    /// The name is neither an owner attribute nor a configured relation
    UnknownAttribute { model: String, name: String },
    /// A relation was given a value of the wrong shape (e.g. a scalar instead of a list)
    InvalidInputShape { relation: String, reason: String },
    /// `commit()` was called before the owner row exists
    OwnerNotPersisted(String),
    /// A store call failed while reading or resolving related records
    Persistence(StoreError),
    /// A store call failed while committing one relation's staged changes
    Commit { relation: String, source: StoreError },
}

impl LinkError {
    pub(crate) fn invalid_shape(relation: &str, reason: impl Into<String>) -> Self {
        LinkError::InvalidInputShape {
            relation: relation.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Configuration(msg) => write!(f, "Invalid relation configuration: {msg}"),
            LinkError::UnknownAttribute { model, name } => {
                write!(f, "Setting unknown property: {model}::{name}")
            }
            LinkError::InvalidInputShape { relation, reason } => {
                write!(f, "Invalid value for relation '{relation}': {reason}")
            }
            LinkError::OwnerNotPersisted(model) => {
                write!(f, "Owner '{model}' must be saved before its relations are committed")
            }
            LinkError::Persistence(e) => write!(f, "Persistence error: {e}"),
            LinkError::Commit { relation, source } => {
                write!(f, "Failed to commit relation '{relation}': {source}")
            }
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Persistence(e) | LinkError::Commit { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(err: StoreError) -> Self {
        LinkError::Persistence(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_unknown_attribute() {
        let err = LinkError::UnknownAttribute {
            model: "post".to_string(),
            name: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "Setting unknown property: post::nope");
    }

    #[test]
    fn test_commit_error_exposes_source() {
        let err = LinkError::Commit {
            relation: "tags".to_string(),
            source: StoreError::QueryError("boom".to_string()),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("tags"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_store_error_converts_to_persistence() {
        let err: LinkError = StoreError::UnknownModel("tag".to_string()).into();
        assert_eq!(err, LinkError::Persistence(StoreError::UnknownModel("tag".to_string())));
    }
}
