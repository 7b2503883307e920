//! Relation configuration and identity.
//!
//! - **Def**: `RelationDefinition` / `RelationSet`, the per-owner configuration of managed
//!   associations, built from code or from a list-or-mapping configuration value
//! - **Identity**: normalized single and composite keys used to match payload items with
//!   persisted records
//! - **Helpers**: statement helpers shared by the SQL store

// Relation definitions
pub mod def;
#[doc(inline)]
pub use def::{RelationDefinition, RelationOptions, RelationSet};

// Identity types
pub mod identity;
#[doc(inline)]
pub use identity::{Identity, KeyPart};

// Helper functions
pub mod helpers;
#[doc(inline)]
pub use helpers::join_condition;
