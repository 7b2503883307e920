//! Diffing a relation payload against the persisted related set
//!
//! [`Reconciler::reconcile`] walks the incoming items in order, matches each one to an existing
//! related entity by identity, and classifies it:
//!
//! - matched: **update**, the existing instance is reused (direct associations load the item's
//!   fields onto it, through associations never touch the target)
//! - unmatched: **insert**, a new entity for direct associations, or the target looked up by
//!   key for through associations (unresolvable references are skipped)
//! - existing entities whose identity is absent from the payload: **delete**
//!
//! Items repeating an identity already seen in the same payload collapse onto the first
//! occurrence, so the desired sequence never holds two entities with one identity.

use crate::error::LinkError;
use crate::loader::{AttributeLoader, FormScope};
use crate::model::{Record, RecordRef};
use crate::relation::def::RelationDefinition;
use crate::relation::identity::{Identity, KeyPart};
use crate::schema::Association;
use crate::staging::PendingChanges;
use crate::store::RelationStore;
use log::debug;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Outcome of reconciling one relation
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Entities the relation should hold, in payload order
    pub desired: Vec<RecordRef>,
    /// New links, in payload order
    pub inserts: Vec<RecordRef>,
    /// Matched entities, in payload order
    pub updates: Vec<RecordRef>,
    /// Existing entities missing from the payload, in existing order
    pub deletes: Vec<RecordRef>,
}

impl Reconciliation {
    /// The change sets to stage
    pub fn changes(&self) -> PendingChanges {
        PendingChanges {
            inserted: self.inserts.clone(),
            updated: self.updates.clone(),
            deleted: self.deletes.clone(),
        }
    }
}

/// Reconciles one relation of one owner
pub struct Reconciler<'a> {
    pub owner: &'a Record,
    pub definition: &'a RelationDefinition,
    pub association: &'a Association,
    pub store: &'a dyn RelationStore,
    pub loader: &'a dyn AttributeLoader,
}

/// Existing entities indexed by identity
struct ExistingIndex {
    entries: Vec<(Option<Identity>, RecordRef)>,
}

impl ExistingIndex {
    fn new(existing: Vec<RecordRef>) -> Self {
        let entries = existing
            .into_iter()
            .map(|entity| {
                let identity = entity.borrow().primary_key();
                (identity, entity)
            })
            .collect();
        Self { entries }
    }

    fn find(&self, identity: &Identity) -> Option<&RecordRef> {
        self.entries
            .iter()
            .find(|(key, _)| key.as_ref() == Some(identity))
            .map(|(_, entity)| entity)
    }
}

impl<'a> Reconciler<'a> {
    /// Compute desired sequence and change sets for `incoming`
    ///
    /// `existing` is the persisted related set (empty for a new owner). Fails with
    /// `InvalidInputShape` when an item can never describe a related entity; nothing is
    /// returned in that case.
    pub fn reconcile(
        &self,
        existing: Vec<RecordRef>,
        incoming: &[JsonValue],
    ) -> Result<Reconciliation, LinkError> {
        // a new owner cannot have links yet
        let existing = if self.owner.is_new_record() {
            Vec::new()
        } else {
            existing
        };
        let index = ExistingIndex::new(existing);
        let mut seen: BTreeMap<Identity, RecordRef> = BTreeMap::new();
        let mut result = Reconciliation::default();

        for item in incoming {
            if self.association.is_through() {
                self.reconcile_reference(item, &index, &mut seen, &mut result)?;
            } else {
                self.reconcile_record(item, &index, &mut seen, &mut result)?;
            }
        }

        for (identity, entity) in index.entries {
            let kept = identity.as_ref().is_some_and(|key| seen.contains_key(key));
            if !kept {
                result.deletes.push(entity);
            }
        }
        Ok(result)
    }

    fn scope(&self) -> FormScope<'a> {
        FormScope::for_item(self.definition.form_name())
    }

    fn stamp_scenario(&self, entity: &mut Record) {
        if let Some(scenario) = self.definition.scenario() {
            entity.set_scenario(scenario);
        }
    }

    /// Direct association item: a record, matched by its own primary key
    fn reconcile_record(
        &self,
        item: &JsonValue,
        index: &ExistingIndex,
        seen: &mut BTreeMap<Identity, RecordRef>,
        result: &mut Reconciliation,
    ) -> Result<(), LinkError> {
        let JsonValue::Object(raw) = item else {
            return Err(LinkError::invalid_shape(
                self.definition.name(),
                format!("expected a record, got {item}"),
            ));
        };
        let raw = self.backfill(raw);
        let identity = self
            .scope()
            .select(&raw)
            .and_then(|fields| Identity::from_fields(fields, &self.association.target.primary_key));

        if let Some(duplicate) = identity.as_ref().and_then(|key| seen.get(key)) {
            debug!(
                "relation '{}': item {} repeats an earlier identity, merging",
                self.definition.name(),
                identity.as_ref().map(ToString::to_string).unwrap_or_default()
            );
            self.loader
                .load(&mut duplicate.borrow_mut(), &raw, self.scope());
            return Ok(());
        }

        let (entity, matched) = match identity.as_ref().and_then(|key| index.find(key)) {
            Some(existing) => (Rc::clone(existing), true),
            None => (Record::new(&self.association.target).into_ref(), false),
        };
        {
            let mut record = entity.borrow_mut();
            self.stamp_scenario(&mut record);
            self.loader.load(&mut record, &raw, self.scope());
        }

        if matched {
            result.updates.push(Rc::clone(&entity));
        } else {
            result.inserts.push(Rc::clone(&entity));
        }
        if let Some(key) = identity {
            seen.insert(key, Rc::clone(&entity));
        }
        result.desired.push(entity);
        Ok(())
    }

    /// Fill primary-key components the item omits from the owner attributes they link to
    fn backfill(&self, raw: &Map<String, JsonValue>) -> Map<String, JsonValue> {
        let target = &self.association.target;
        let nested = match self.scope() {
            FormScope::NamedOrFlat(name) | FormScope::Named(name) => {
                raw.get(name).and_then(JsonValue::as_object).map(|_| name)
            }
            FormScope::Flat => None,
        };

        let mut raw = raw.clone();
        let fields = match nested {
            Some(name) => raw.get_mut(name).and_then(JsonValue::as_object_mut),
            None => Some(&mut raw),
        };
        if let Some(fields) = fields {
            for (far, near) in &self.association.link {
                let missing = fields.get(far).and_then(KeyPart::from_json).is_none();
                if missing && target.is_primary_key(far) {
                    if let Some(value) = self.owner.get(near).filter(|v| !v.is_null()) {
                        fields.insert(far.clone(), value.clone());
                    }
                }
            }
        }
        raw
    }

    /// Through association item: a reference to an existing target
    fn reconcile_reference(
        &self,
        item: &JsonValue,
        index: &ExistingIndex,
        seen: &mut BTreeMap<Identity, RecordRef>,
        result: &mut Reconciliation,
    ) -> Result<(), LinkError> {
        let target = &self.association.target;
        let identity = Identity::from_reference(item, &target.primary_key)
            .map_err(|reason| LinkError::invalid_shape(self.definition.name(), reason))?;
        let Some(identity) = identity else {
            debug!(
                "relation '{}': skipping reference without a key: {item}",
                self.definition.name()
            );
            return Ok(());
        };
        if seen.contains_key(&identity) {
            return Ok(());
        }

        let (entity, matched) = match index.find(&identity) {
            Some(existing) => (Rc::clone(existing), true),
            None => match self.store.find_by_primary_key(&target.name, &identity)? {
                Some(found) => (found.into_ref(), false),
                None => {
                    debug!(
                        "relation '{}': {} {identity} not found, skipping",
                        self.definition.name(),
                        target.name
                    );
                    return Ok(());
                }
            },
        };
        self.stamp_scenario(&mut entity.borrow_mut());

        if matched {
            result.updates.push(Rc::clone(&entity));
        } else {
            result.inserts.push(Rc::clone(&entity));
        }
        seen.insert(identity, Rc::clone(&entity));
        result.desired.push(entity);
        Ok(())
    }
}
