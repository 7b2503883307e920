//! The relation engine attached to one owner
//!
//! [`RelationEngine`] drives the whole cycle for an aggregate root and its managed
//! collections:
//!
//! 1. [`fill`](RelationEngine::fill) loads the owner's own fields, reconciles every relation
//!    present in the payload against its persisted set and stages the changes
//! 2. [`validate`](RelationEngine::validate) checks the owner and the staged entities
//! 3. the owner is saved by the store
//! 4. [`commit`](RelationEngine::commit) links, saves and unlinks the staged entities
//!
//! [`save`](RelationEngine::save) runs steps 2 to 4 in order. Nothing is written before the
//! owner row exists: `commit` refuses a new owner.
//!
//! # Example
//!
//! ```
//! use linkmany::{MemoryStore, ModelSchema, Record, RelationEngine, RelationSet, Schema, Association};
//! use linkmany::validation::ValidatorSet;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let post = ModelSchema::new("post", &["id"], &["id", "title"]);
//! let tag = ModelSchema::new("tag", &["id"], &["id", "name"]);
//! let schema = Schema::new().with_model(post.clone()).with_association(
//!     "post",
//!     "tags",
//!     Association::has_many_via(tag, &[("id", "tag_id")], "post_tag", &[("post_id", "id")]),
//! );
//! let store = MemoryStore::new(schema);
//! store.insert_row("tag", json!({"id": 1, "name": "rust"}));
//!
//! let relations = Arc::new(RelationSet::from_value(&json!(["tags"]))?);
//! let mut engine = RelationEngine::new(Record::new(&post), relations, &store)?;
//!
//! assert!(engine.fill(&json!({"title": "Hello", "tags": [1]}), None)?);
//! assert!(engine.save(&ValidatorSet::new())?);
//! assert_eq!(store.count("post_tag"), 1);
//! # Ok::<(), linkmany::LinkError>(())
//! ```

use crate::error::{LinkError, StoreError};
use crate::loader::{AttributeLoader, FormLoader, FormScope};
use crate::model::{Record, RecordRef};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::relation::def::{RelationDefinition, RelationSet};
use crate::staging::{ChangeKind, PendingChanges, StagingStore};
use crate::store::RelationStore;
use crate::validation::{relation_error_key, validate_record, Validator};
use log::{debug, info, warn};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Where the engine is in the fill → validate → commit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing staged yet
    Idle,
    /// Changes staged by `fill` / `set_relation`
    Prepared,
    /// Staged changes validated
    Validated,
    /// Staged changes applied; behaves like `Idle` for the next cycle
    Committed,
}

/// What one `commit` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Entities linked to the owner
    pub linked: usize,
    /// Already linked entities saved
    pub saved: usize,
    /// Entities unlinked from the owner
    pub unlinked: usize,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.linked == 0 && self.saved == 0 && self.unlinked == 0
    }
}

impl fmt::Display for CommitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} linked, {} saved, {} unlinked",
            self.linked, self.saved, self.unlinked
        )
    }
}

/// Relation engine for one owner record
pub struct RelationEngine<'s> {
    owner: Record,
    relations: Arc<RelationSet>,
    store: &'s dyn RelationStore,
    loader: Box<dyn AttributeLoader>,
    staging: StagingStore,
    /// Persisted related sets, read once per cycle
    loaded: BTreeMap<String, Vec<Record>>,
    /// Relation cache: the desired sequence after `fill`, else the persisted set
    related: BTreeMap<String, Vec<RecordRef>>,
    phase: Phase,
}

impl<'s> RelationEngine<'s> {
    /// Attach an engine to `owner`
    ///
    /// Every configured relation must be an association the store knows for the owner's
    /// model; otherwise construction fails with a configuration error.
    pub fn new(
        owner: Record,
        relations: Arc<RelationSet>,
        store: &'s dyn RelationStore,
    ) -> Result<Self, LinkError> {
        for definition in relations.iter() {
            store
                .association(&owner, definition.name())
                .map_err(|e| LinkError::Configuration(e.to_string()))?;
        }
        Ok(Self {
            owner,
            relations,
            store,
            loader: Box::new(FormLoader),
            staging: StagingStore::new(),
            loaded: BTreeMap::new(),
            related: BTreeMap::new(),
            phase: Phase::Idle,
        })
    }

    /// Use a custom loader for the owner and related entities
    #[must_use]
    pub fn with_loader(mut self, loader: impl AttributeLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn owner(&self) -> &Record {
        &self.owner
    }

    pub fn owner_mut(&mut self) -> &mut Record {
        &mut self.owner
    }

    pub fn into_owner(self) -> Record {
        self.owner
    }

    pub fn relations(&self) -> &RelationSet {
        &self.relations
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Pending changes; staged entities are shared handles, read them with `borrow()`
    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Entities currently held by relation `name`
    ///
    /// After `fill` this is the desired sequence; before, the persisted set (read on first
    /// access).
    ///
    /// Every `fill` reconciles against fresh copies of the persisted set, so handles returned
    /// before a fill are not the entities it stages. Read `related` again afterwards; only
    /// the new handles reach `commit`. This keeps a repeated fill from seeing fields an
    /// earlier fill loaded onto matched entities.
    pub fn related(&mut self, name: &str) -> Result<Vec<RecordRef>, LinkError> {
        self.definition(name)?;
        if let Some(entities) = self.related.get(name) {
            return Ok(entities.clone());
        }
        let entities = self.persisted(name)?;
        self.related.insert(name.to_string(), entities.clone());
        Ok(entities)
    }

    fn definition(&self, name: &str) -> Result<&RelationDefinition, LinkError> {
        self.relations
            .get(name)
            .ok_or_else(|| LinkError::UnknownAttribute {
                model: self.owner.model().to_string(),
                name: name.to_string(),
            })
    }

    /// Fresh handles on the persisted related set of `name`
    ///
    /// Every call hands out new instances, so a re-fill never sees changes a previous fill
    /// loaded onto matched entities.
    fn persisted(&mut self, name: &str) -> Result<Vec<RecordRef>, LinkError> {
        if self.owner.is_new_record() {
            return Ok(Vec::new());
        }
        if !self.loaded.contains_key(name) {
            let rows = self.store.find_related(&self.owner, name)?;
            self.loaded.insert(name.to_string(), rows);
        }
        Ok(self
            .loaded
            .get(name)
            .map(|rows| rows.iter().cloned().map(Record::into_ref).collect())
            .unwrap_or_default())
    }

    /// Load the owner's fields and stage every relation present in `payload`
    ///
    /// Returns `Ok(false)` when the owner's fields do not match `form_name` (relations are then
    /// left alone). Relation values are read from the top level of the payload; `null` counts
    /// as absent.
    pub fn fill(&mut self, payload: &JsonValue, form_name: Option<&str>) -> Result<bool, LinkError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::fill_span(self.owner.model()).entered();

        let Some(raw) = payload.as_object() else {
            return Ok(false);
        };
        if !self
            .loader
            .load(&mut self.owner, raw, FormScope::for_owner(form_name))
        {
            debug!(
                "fill of {}: payload does not match form {:?}",
                self.owner.model(),
                form_name
            );
            return Ok(false);
        }

        let present = self.present_relations(raw)?;
        let mut prepared = Vec::with_capacity(present.len());
        for (name, items) in present {
            let reconciliation = self.reconcile(&name, items)?;
            prepared.push((name, reconciliation));
        }
        for (name, reconciliation) in prepared {
            self.stage(&name, reconciliation);
        }
        self.phase = Phase::Prepared;
        Ok(true)
    }

    /// Relations with a non-null payload value, checked to be lists
    fn present_relations<'p>(
        &self,
        raw: &'p Map<String, JsonValue>,
    ) -> Result<Vec<(String, &'p [JsonValue])>, LinkError> {
        let mut present = Vec::new();
        for definition in self.relations.iter() {
            match raw.get(definition.name()) {
                None | Some(JsonValue::Null) => {}
                Some(JsonValue::Array(items)) => {
                    present.push((definition.name().to_string(), items.as_slice()));
                }
                Some(other) => {
                    return Err(LinkError::invalid_shape(
                        definition.name(),
                        format!("expected a list, got {other}"),
                    ))
                }
            }
        }
        Ok(present)
    }

    /// Assign a relation directly, replacing whatever a previous fill staged for it
    pub fn set_relation(&mut self, name: &str, value: &JsonValue) -> Result<(), LinkError> {
        self.definition(name)?;
        let JsonValue::Array(items) = value else {
            return Err(LinkError::invalid_shape(
                name,
                format!("expected a list, got {value}"),
            ));
        };
        let reconciliation = self.reconcile(name, items)?;
        self.stage(name, reconciliation);
        self.phase = Phase::Prepared;
        Ok(())
    }

    /// Set an owner attribute or, for a configured relation name, assign the relation
    pub fn set(&mut self, name: &str, value: JsonValue) -> Result<(), LinkError> {
        if self.owner.has_attribute(name) {
            self.owner.set(name, value);
            return Ok(());
        }
        if self.relations.contains(name) {
            return self.set_relation(name, &value);
        }
        Err(LinkError::UnknownAttribute {
            model: self.owner.model().to_string(),
            name: name.to_string(),
        })
    }

    fn reconcile(&mut self, name: &str, items: &[JsonValue]) -> Result<Reconciliation, LinkError> {
        let existing = self.persisted(name)?;
        let association = self.store.association(&self.owner, name)?;
        let definition = self.definition(name)?;
        let reconciler = Reconciler {
            owner: &self.owner,
            definition,
            association: &association,
            store: self.store,
            loader: self.loader.as_ref(),
        };
        reconciler.reconcile(existing, items)
    }

    fn stage(&mut self, name: &str, reconciliation: Reconciliation) {
        let changes = reconciliation.changes();
        debug!(
            "relation '{}' of {}: {} insert(s), {} update(s), {} delete(s)",
            name,
            self.owner.model(),
            changes.inserted.len(),
            changes.updated.len(),
            changes.deleted.len()
        );
        #[cfg(feature = "metrics")]
        for kind in [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete] {
            METRICS.record_staged(name, kind, changes.get(kind).len());
        }
        self.staging.replace(name, changes);
        self.related.insert(name.to_string(), reconciliation.desired);
    }

    /// Validate the owner and every staged inserted/updated entity
    ///
    /// Errors of the `i`-th entity of a relation's inserted-then-updated sequence are copied
    /// onto the owner under `"<relation>[<i>]"`. Relations configured without validation are
    /// skipped, and deleted entities are never validated.
    pub fn validate(&mut self, validator: &dyn Validator) -> bool {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::validate_span(self.owner.model()).entered();

        let mut valid = validate_record(validator, &mut self.owner);
        let relations = Arc::clone(&self.relations);
        for definition in relations.iter().filter(|d| d.requires_validation()) {
            let Some(changes) = self.staging.changes(definition.name()) else {
                continue;
            };
            for (i, entity) in changes.validation_sequence().enumerate() {
                let mut entity = entity.borrow_mut();
                if validate_record(validator, &mut entity) {
                    continue;
                }
                valid = false;
                let key = relation_error_key(definition.name(), i);
                for message in entity.errors().messages() {
                    self.owner.add_error(key.as_str(), message.as_str());
                }
            }
        }
        self.phase = Phase::Validated;
        valid
    }

    /// Apply the staged changes, relation by relation in configuration order
    ///
    /// The owner must already be persisted; a new owner is rejected and staging is kept.
    /// Otherwise staging is cleared whatever happens. A store failure stops the rest of that
    /// relation's work, the other relations are still attempted, and the first failure is
    /// returned.
    pub fn commit(&mut self) -> Result<CommitSummary, LinkError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_span(self.owner.model()).entered();

        if self.owner.is_new_record() {
            return Err(LinkError::OwnerNotPersisted(self.owner.model().to_string()));
        }
        self.owner.mark_persisted();

        let staged = self.staging.take();
        let start = Instant::now();
        let mut summary = CommitSummary::default();
        let mut first_error = None;

        for definition in self.relations.iter() {
            let Some(changes) = staged.get(definition.name()) else {
                continue;
            };
            #[cfg(feature = "tracing")]
            let _relation_span = tracing_helpers::commit_relation_span(definition.name()).entered();

            if let Err(source) = self.commit_relation(definition, changes, &mut summary) {
                warn!(
                    "commit of relation '{}' of {} failed: {}",
                    definition.name(),
                    self.owner.model(),
                    source
                );
                #[cfg(feature = "metrics")]
                METRICS.record_commit_failure(definition.name());
                if first_error.is_none() {
                    first_error = Some(LinkError::Commit {
                        relation: definition.name().to_string(),
                        source,
                    });
                }
            }
        }

        // the persisted sets changed; read them again next cycle
        self.loaded.clear();
        self.phase = Phase::Committed;

        #[cfg(feature = "metrics")]
        METRICS.record_commit(start.elapsed());
        info!(
            "committed relations of {} in {:?}: {}",
            self.owner.model(),
            start.elapsed(),
            summary
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    fn commit_relation(
        &self,
        definition: &RelationDefinition,
        changes: &PendingChanges,
        summary: &mut CommitSummary,
    ) -> Result<(), StoreError> {
        let name = definition.name();
        for entity in &changes.inserted {
            self.store.link(&self.owner, name, &mut entity.borrow_mut())?;
            summary.linked += 1;
        }
        for entity in &changes.updated {
            self.store.save(&mut entity.borrow_mut())?;
            summary.saved += 1;
        }
        for entity in &changes.deleted {
            self.store.unlink(
                &self.owner,
                name,
                &mut entity.borrow_mut(),
                definition.cascade_on_unlink(),
            )?;
            summary.unlinked += 1;
        }
        Ok(())
    }

    /// Validate, save the owner, then commit its relations
    ///
    /// Returns `Ok(false)` without writing anything when validation fails.
    pub fn save(&mut self, validator: &dyn Validator) -> Result<bool, LinkError> {
        if !self.validate(validator) {
            return Ok(false);
        }
        self.store.save(&mut self.owner)?;
        self.commit()?;
        Ok(true)
    }

    /// Drop everything staged and return to `Idle`
    pub fn reset(&mut self) {
        self.staging.clear_all();
        self.related.clear();
        self.loaded.clear();
        self.phase = Phase::Idle;
    }

    /// Whether `entity` is one of the handles relation `name` currently holds
    pub fn holds(&self, name: &str, entity: &RecordRef) -> bool {
        self.related
            .get(name)
            .is_some_and(|entities| entities.iter().any(|e| Rc::ptr_eq(e, entity)))
    }
}

impl fmt::Debug for RelationEngine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationEngine")
            .field("owner", &self.owner)
            .field("relations", &self.relations)
            .field("staging", &self.staging)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
