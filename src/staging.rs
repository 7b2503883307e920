//! Pending changes held between `fill` and `commit`
//!
//! Staging belongs to one engine (and so to one owner instance). It does no I/O: `fill`
//! replaces a relation's change sets, `validate` reads them, `commit` takes them all.

use crate::model::RecordRef;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of pending change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// Link a new (or newly referenced) entity
    Insert,
    /// Save an already linked entity
    Update,
    /// Unlink an entity missing from the payload
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insert/update/delete sets of one relation
#[derive(Debug, Clone, Default)]
pub struct PendingChanges {
    pub inserted: Vec<RecordRef>,
    pub updated: Vec<RecordRef>,
    pub deleted: Vec<RecordRef>,
}

impl PendingChanges {
    pub fn get(&self, kind: ChangeKind) -> &[RecordRef] {
        match kind {
            ChangeKind::Insert => &self.inserted,
            ChangeKind::Update => &self.updated,
            ChangeKind::Delete => &self.deleted,
        }
    }

    fn get_mut(&mut self, kind: ChangeKind) -> &mut Vec<RecordRef> {
        match kind {
            ChangeKind::Insert => &mut self.inserted,
            ChangeKind::Update => &mut self.updated,
            ChangeKind::Delete => &mut self.deleted,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of staged entities
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Entities that get validated: inserted first, then updated
    pub fn validation_sequence(&self) -> impl Iterator<Item = &RecordRef> {
        self.inserted.iter().chain(self.updated.iter())
    }
}

/// Pending changes per relation name
#[derive(Debug, Default)]
pub struct StagingStore {
    relations: BTreeMap<String, PendingChanges>,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entity to a relation's change set
    pub fn stage(&mut self, relation: &str, kind: ChangeKind, entity: RecordRef) {
        self.relations
            .entry(relation.to_string())
            .or_default()
            .get_mut(kind)
            .push(entity);
    }

    /// Replace everything staged for `relation`
    pub fn replace(&mut self, relation: &str, changes: PendingChanges) {
        self.relations.insert(relation.to_string(), changes);
    }

    /// Staged entities of one kind; unknown relations read as empty
    pub fn pending(&self, relation: &str, kind: ChangeKind) -> &[RecordRef] {
        self.relations
            .get(relation)
            .map_or(&[], |changes| changes.get(kind))
    }

    pub fn changes(&self, relation: &str) -> Option<&PendingChanges> {
        self.relations.get(relation)
    }

    /// Empty the store, handing back everything that was staged
    pub fn take(&mut self) -> BTreeMap<String, PendingChanges> {
        std::mem::take(&mut self.relations)
    }

    pub fn clear_all(&mut self) {
        self.relations.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.relations.values().all(PendingChanges::is_empty)
    }
}
