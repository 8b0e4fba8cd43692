//! Identity keys and identity-deduplicated result sets.

use std::collections::HashSet;

use strata_core::{Entity, Result, Value, hash_values};
use strata_inheritance::id_values;
use strata_schema::Registry;

/// Unique key for an object in the identity map.
///
/// Instances are keyed by the root of their hierarchy, so a `Dog` loaded
/// through `find_all("Animal")` and through `find("Dog", id)` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Root entity of the hierarchy.
    root: String,
    /// Hash of the id value(s).
    id_hash: u64,
}

impl ObjectKey {
    pub fn new(root: impl Into<String>, id: &[Value]) -> Self {
        Self {
            root: root.into(),
            id_hash: hash_values(id),
        }
    }

    /// Key of an entity, or `None` while any of its id values is NULL.
    pub fn of(registry: &Registry, entity: &dyn Entity) -> Result<Option<Self>> {
        let ids = id_values(registry, entity)?;
        if ids.is_empty() || ids.iter().any(Value::is_null) {
            return Ok(None);
        }
        let root = registry.root_of(entity.entity_name())?;
        Ok(Some(Self::new(root.name.clone(), &ids)))
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

/// Entities deduplicated by identity rather than structural equality.
///
/// Two instances are the same member when they share a root entity and id.
/// Entities without an id are always kept.
#[derive(Debug, Default)]
pub struct EntitySet {
    keys: HashSet<ObjectKey>,
    items: Vec<Box<dyn Entity>>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `entity` unless an entity with the same identity is present.
    /// Returns whether it was added.
    pub fn insert(&mut self, registry: &Registry, entity: Box<dyn Entity>) -> Result<bool> {
        if let Some(key) = ObjectKey::of(registry, entity.as_ref())? {
            if !self.keys.insert(key) {
                return Ok(false);
            }
        }
        self.items.push(entity);
        Ok(true)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Box<dyn Entity>> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Box<dyn Entity>> {
        self.items
    }
}
