//! Tracked objects and the new/dirty/removed sets.

use std::collections::HashMap;

use strata_core::{Entity, EntityHandle, Error, Result, StateErrorKind, Value};
use strata_schema::Registry;

use crate::identity::ObjectKey;

/// State of a tracked object in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// New object, needs INSERT on flush.
    New,
    /// Persistent object loaded from or written to the database.
    Persistent,
    /// Object marked for deletion, needs DELETE on flush.
    Deleted,
}

/// A tracked object in the session.
#[derive(Debug)]
pub(crate) struct Tracked {
    pub entity: Box<dyn Entity>,
    pub state: ObjectState,
    /// Serialized column values as last written or read, for dirty checking.
    pub snapshot: Option<Vec<u8>>,
    pub key: Option<ObjectKey>,
}

/// A collection item added through `Session::relate` whose target may not
/// have an id yet. The item is refreshed from the target before the owner's
/// link rows are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingLink {
    pub owner: EntityHandle,
    pub field: String,
    pub index: usize,
    pub target: EntityHandle,
}

#[derive(Debug, Default)]
pub(crate) struct UnitOfWork {
    /// Indexed by handle; `None` once forgotten. Handles are never reused.
    slots: Vec<Option<Tracked>>,
    identity: HashMap<ObjectKey, EntityHandle>,
    pub new: Vec<EntityHandle>,
    pub dirty: Vec<EntityHandle>,
    pub removed: Vec<EntityHandle>,
    pub links: Vec<PendingLink>,
    /// Inserted by a flush of the open transaction.
    pub inserted: Vec<EntityHandle>,
    /// Updated by a flush of the open transaction.
    pub updated: Vec<EntityHandle>,
}

impl UnitOfWork {
    pub fn track(&mut self, tracked: Tracked) -> EntityHandle {
        let handle = EntityHandle::new(self.slots.len());
        if let Some(key) = &tracked.key {
            self.identity.insert(key.clone(), handle);
        }
        self.slots.push(Some(tracked));
        handle
    }

    pub fn get(&self, handle: EntityHandle) -> Result<&Tracked> {
        self.slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| not_tracked(handle))
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Result<&mut Tracked> {
        self.slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| not_tracked(handle))
    }

    pub fn lookup(&self, key: &ObjectKey) -> Option<EntityHandle> {
        self.identity.get(key).copied()
    }

    /// Record the identity an object acquired (e.g. a generated id).
    pub fn set_key(&mut self, handle: EntityHandle, key: Option<ObjectKey>) -> Result<()> {
        let tracked = self.get_mut(handle)?;
        let old = std::mem::replace(&mut tracked.key, key.clone());
        if let Some(old) = old {
            self.identity.remove(&old);
        }
        if let Some(key) = key {
            self.identity.insert(key, handle);
        }
        Ok(())
    }

    /// Stop tracking an object entirely.
    pub fn forget(&mut self, handle: EntityHandle) {
        if let Some(tracked) = self.slots.get_mut(handle.index()).and_then(Option::take) {
            if let Some(key) = tracked.key {
                self.identity.remove(&key);
            }
        }
        self.new.retain(|h| *h != handle);
        self.dirty.retain(|h| *h != handle);
        self.removed.retain(|h| *h != handle);
        self.inserted.retain(|h| *h != handle);
        self.updated.retain(|h| *h != handle);
        self.links.retain(|l| l.owner != handle && l.target != handle);
    }

    pub fn mark_dirty(&mut self, handle: EntityHandle) {
        if !self.new.contains(&handle) && !self.removed.contains(&handle) && !self.dirty.contains(&handle) {
            self.dirty.push(handle);
        }
    }

    pub fn mark_removed(&mut self, handle: EntityHandle) -> Result<()> {
        self.get_mut(handle)?.state = ObjectState::Deleted;
        self.dirty.retain(|h| *h != handle);
        if !self.removed.contains(&handle) {
            self.removed.push(handle);
        }
        Ok(())
    }

    pub fn tracked_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Detach everything. Outstanding handles stop resolving.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.identity.clear();
        self.new.clear();
        self.dirty.clear();
        self.removed.clear();
        self.links.clear();
        self.inserted.clear();
        self.updated.clear();
    }

    /// Record that a flush wrote `handle`'s current values.
    pub fn mark_updated(&mut self, handle: EntityHandle) {
        if !self.updated.contains(&handle) {
            self.updated.push(handle);
        }
    }

    /// Forget what the open transaction wrote once it is committed.
    pub fn commit(&mut self) {
        self.inserted.clear();
        self.updated.clear();
    }

    /// Undo the pending sets after a transaction rollback.
    pub fn rollback(&mut self) {
        let forget: Vec<EntityHandle> = self.new.iter().chain(&self.inserted).copied().collect();
        for handle in forget {
            self.forget(handle);
        }
        for handle in std::mem::take(&mut self.removed) {
            if let Ok(tracked) = self.get_mut(handle) {
                tracked.state = ObjectState::Persistent;
            }
        }
        // The database no longer holds what these snapshots describe.
        for handle in std::mem::take(&mut self.updated) {
            if let Ok(tracked) = self.get_mut(handle) {
                tracked.snapshot = None;
            }
        }
        self.dirty.clear();
        self.links.clear();
    }
}

fn not_tracked(handle: EntityHandle) -> Error {
    Error::state(
        StateErrorKind::NotTracked,
        format!("handle {} is not tracked by this session", handle.index()),
    )
}

/// Serialized column values of `entity`, references included.
pub(crate) fn snapshot(registry: &Registry, entity: &dyn Entity) -> Option<Vec<u8>> {
    let values: Vec<Value> = registry
        .columns(entity.entity_name())
        .into_iter()
        .map(|p| {
            if p.association {
                match entity.reference(&p.name) {
                    Some(r) => match (r.id(), r.handle()) {
                        (Some(id), _) => id.clone(),
                        (None, Some(h)) => Value::Text(format!("pending:{}", h.index())),
                        (None, None) => Value::Null,
                    },
                    None => Value::Null,
                }
            } else {
                entity.get_value(&p.name).unwrap_or_default()
            }
        })
        .collect();
    serde_json::to_vec(&values).ok()
}
