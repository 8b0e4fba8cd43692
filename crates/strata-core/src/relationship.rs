//! Relationship declarations and association field types.
//!
//! Relationships are declared on each entity's descriptor and resolved by the
//! registry once every class is known. At runtime a single-valued association
//! lives in a [`Reference`] and a collection association in a
//! [`LazyCollection`], which defers its load until first touched.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::model::{Entity, EntityHandle};
use crate::value::Value;

/// The type of relationship between two entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: `Hero` has one `Profile`.
    OneToOne,
    /// Many-to-one: many `Hero`s belong to one `Team`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Team` has many `Hero`s.
    OneToMany,
    /// Many-to-many: `Hero`s have many `Power`s via a link table.
    ManyToMany,
}

impl RelationshipKind {
    /// Whether the association holds a collection.
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// The kind the inverse side must declare.
    pub const fn inverse(&self) -> Self {
        match self {
            Self::OneToOne => Self::OneToOne,
            Self::ManyToOne => Self::OneToMany,
            Self::OneToMany => Self::ManyToOne,
            Self::ManyToMany => Self::ManyToMany,
        }
    }
}

/// Information about a link/join table for many-to-many relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// The link table name (e.g., `"hero_powers"`).
    pub table_name: &'static str,

    /// Column in link table pointing to the local entity (e.g., `"hero_id"`).
    pub local_column: &'static str,

    /// Column in link table pointing to the remote entity (e.g., `"power_id"`).
    pub remote_column: &'static str,
}

impl LinkTableInfo {
    #[must_use]
    pub const fn new(
        table_name: &'static str,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self {
            table_name,
            local_column,
            remote_column,
        }
    }
}

/// Declared relationship between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship field.
    pub name: &'static str,

    /// The related entity's name.
    pub target: &'static str,

    pub kind: RelationshipKind,

    /// Local foreign key column (ManyToOne, owning OneToOne),
    /// e.g. `"team_id"` on `Hero`.
    pub local_key: Option<&'static str>,

    /// Remote foreign key column (OneToMany),
    /// e.g. `"team_id"` on `Hero` when accessed from `Team`.
    pub remote_key: Option<&'static str>,

    /// Link table for ManyToMany relationships; present on the owning side.
    pub link_table: Option<LinkTableInfo>,

    /// The field on the related entity that points back.
    pub back_populates: Option<&'static str>,

    /// Whether the foreign key column may be NULL.
    pub optional: bool,

    /// Whether to use lazy loading.
    pub lazy: bool,
}

impl RelationshipInfo {
    #[must_use]
    pub const fn new(name: &'static str, target: &'static str, kind: RelationshipKind) -> Self {
        Self {
            name,
            target,
            kind,
            local_key: None,
            remote_key: None,
            link_table: None,
            back_populates: None,
            optional: true,
            lazy: true,
        }
    }

    #[must_use]
    pub const fn many_to_one(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, RelationshipKind::ManyToOne)
    }

    #[must_use]
    pub const fn one_to_many(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, RelationshipKind::OneToMany)
    }

    #[must_use]
    pub const fn many_to_many(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, RelationshipKind::ManyToMany)
    }

    #[must_use]
    pub const fn one_to_one(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, RelationshipKind::OneToOne)
    }

    /// Set the local foreign key column (ManyToOne).
    #[must_use]
    pub const fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = Some(key);
        self
    }

    /// Set the remote foreign key column (OneToMany).
    #[must_use]
    pub const fn remote_key(mut self, key: &'static str) -> Self {
        self.remote_key = Some(key);
        self
    }

    /// Set the link table metadata (ManyToMany).
    #[must_use]
    pub const fn link_table(mut self, info: LinkTableInfo) -> Self {
        self.link_table = Some(info);
        self
    }

    /// Set the back-populates field name (bidirectional relationships).
    #[must_use]
    pub const fn back_populates(mut self, field: &'static str) -> Self {
        self.back_populates = Some(field);
        self
    }

    #[must_use]
    pub const fn optional(mut self, value: bool) -> Self {
        self.optional = value;
        self
    }

    /// Enable/disable lazy loading.
    #[must_use]
    pub const fn lazy(mut self, value: bool) -> Self {
        self.lazy = value;
        self
    }
}

// ============================================================================
// Reference
// ============================================================================

/// Value of a single-valued association field.
///
/// Points either at a persisted target (by id) or at a target still pending
/// insertion in the same session (by handle); the session resolves the
/// handle to the generated id when it flushes. A loaded target object may be
/// attached by `Session::load`.
#[derive(Default)]
pub struct Reference {
    id: Option<Value>,
    pending: Option<EntityHandle>,
    target: Option<Box<dyn Entity>>,
}

impl Reference {
    pub fn none() -> Self {
        Self::default()
    }

    /// Reference a persisted target by id.
    pub fn to(id: impl Into<Value>) -> Self {
        let mut r = Self::default();
        r.set_id(id.into());
        r
    }

    /// Reference a target that is pending insertion.
    pub fn pending(handle: EntityHandle) -> Self {
        Self {
            pending: Some(handle),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn handle(&self) -> Option<EntityHandle> {
        self.pending
    }

    pub fn is_set(&self) -> bool {
        self.id.is_some() || self.pending.is_some()
    }

    /// The loaded target, if `Session::load` populated it.
    pub fn target(&self) -> Option<&dyn Entity> {
        self.target.as_deref()
    }

    /// Set the target id. NULL clears the reference.
    pub fn set_id(&mut self, id: Value) {
        if id.is_null() {
            self.id = None;
        } else {
            self.id = Some(id);
        }
        self.target = None;
    }

    pub fn set_pending(&mut self, handle: EntityHandle) {
        self.pending = Some(handle);
        self.id = None;
        self.target = None;
    }

    /// Record the id a pending target received and drop the handle.
    pub fn resolve(&mut self, id: Value) {
        self.pending = None;
        self.set_id(id);
    }

    pub fn set_target(&mut self, target: Box<dyn Entity>) {
        self.target = Some(target);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl Clone for Reference {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            pending: self.pending,
            target: self.target.as_ref().map(|t| t.clone_entity()),
        }
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.pending == other.pending
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("id", &self.id)
            .field("pending", &self.pending)
            .field("loaded", &self.target.as_ref().map(|t| t.entity_name()))
            .finish()
    }
}

// ============================================================================
// Lazy collections
// ============================================================================

/// Performs the deferred load behind a [`LazyCollection`].
pub trait CollectionLoader: fmt::Debug {
    fn load(&self) -> Result<Vec<Box<dyn Entity>>>;
}

/// Collection association field, loaded eagerly or on first access.
///
/// Every accessor initializes the collection first; the single relationship
/// load happens at most once per instance.
#[derive(Default)]
pub struct LazyCollection {
    loader: Option<Rc<dyn CollectionLoader>>,
    items: OnceCell<Vec<Box<dyn Entity>>>,
}

impl LazyCollection {
    /// An empty, already-initialized collection.
    pub fn new() -> Self {
        Self::from_entities(Vec::new())
    }

    pub fn from_entities(items: Vec<Box<dyn Entity>>) -> Self {
        Self {
            loader: None,
            items: OnceCell::from(items),
        }
    }

    /// A collection that loads through `loader` when first touched.
    pub fn deferred(loader: Rc<dyn CollectionLoader>) -> Self {
        Self {
            loader: Some(loader),
            items: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.items.get().is_some()
    }

    /// Items if already initialized, without triggering a load.
    pub fn loaded(&self) -> Option<&[Box<dyn Entity>]> {
        self.items.get().map(Vec::as_slice)
    }

    /// Initialize (at most once) and return the items.
    pub fn initialize(&self) -> Result<&[Box<dyn Entity>]> {
        if let Some(items) = self.items.get() {
            return Ok(items);
        }
        let loaded = match &self.loader {
            Some(loader) => {
                tracing::trace!(loader = ?loader, "Initializing lazy collection");
                loader.load()?
            }
            None => Vec::new(),
        };
        Ok(self.items.get_or_init(|| loaded))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.initialize()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.initialize()?.is_empty())
    }

    pub fn iter(&self) -> Result<std::slice::Iter<'_, Box<dyn Entity>>> {
        Ok(self.initialize()?.iter())
    }

    pub fn get(&self, index: usize) -> Result<Option<&dyn Entity>> {
        Ok(self.initialize()?.get(index).map(|e| e.as_ref()))
    }

    /// Mutable access to the backing vector.
    pub fn items_mut(&mut self) -> Result<&mut Vec<Box<dyn Entity>>> {
        self.initialize()?;
        self.items
            .get_mut()
            .ok_or_else(|| Error::Custom("lazy collection failed to initialize".into()))
    }

    pub fn push(&mut self, entity: Box<dyn Entity>) -> Result<()> {
        self.items_mut()?.push(entity);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Box<dyn Entity>> {
        let items = self.items_mut()?;
        if index >= items.len() {
            return Err(Error::Custom(format!(
                "index {index} out of bounds for collection of {}",
                items.len()
            )));
        }
        Ok(items.remove(index))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.items_mut()?.clear();
        Ok(())
    }

    /// Replace the contents, marking the collection initialized.
    pub fn set_loaded(&mut self, items: Vec<Box<dyn Entity>>) {
        self.items = OnceCell::from(items);
    }
}

impl Clone for LazyCollection {
    fn clone(&self) -> Self {
        let items = OnceCell::new();
        if let Some(loaded) = self.items.get() {
            let _ = items.set(loaded.iter().map(|e| e.clone_entity()).collect());
        }
        Self {
            loader: self.loader.clone(),
            items,
        }
    }
}

impl fmt::Debug for LazyCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.items.get() {
            Some(items) => f.debug_list().entries(items.iter()).finish(),
            None => f.write_str("LazyCollection(<not loaded>)"),
        }
    }
}
