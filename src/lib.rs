//! # linkmany
//!
//! Save an aggregate root together with its has-many and many-to-many collections.
//!
//! A [`RelationEngine`] is attached to one owner record. `fill` diffs each relation payload
//! against the persisted related set and stages inserts, updates and deletes; `validate`
//! checks the owner and the staged entities; `commit` links, saves and unlinks them once the
//! owner row exists. Persistence goes through the [`RelationStore`](store::RelationStore)
//! trait, with an in-memory store and a SeaQuery-based SQL store included.

pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod relation;
pub mod schema;
pub mod staging;
pub mod store;
pub mod validation;

#[cfg(test)]
mod tests_cfg;

pub use config::LinkManyConfig;
pub use engine::{CommitSummary, Phase, RelationEngine};
pub use error::{LinkError, StoreError};
pub use loader::{AttributeLoader, FormLoader, FormScope};
pub use model::{FieldErrors, Record, RecordRef};
pub use relation::{Identity, KeyPart, RelationDefinition, RelationSet};
pub use schema::{Association, ModelSchema, Schema, Via};
pub use staging::{ChangeKind, PendingChanges, StagingStore};
pub use store::{MemoryStore, RelationStore, SqlExecutor, SqlStore};
pub use validation::{Validator, ValidatorSet};
