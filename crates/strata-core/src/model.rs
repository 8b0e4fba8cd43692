//! Entity accessor traits and mapping descriptors.
//!
//! A mapped type implements [`Entity`], an explicit accessor table that reads
//! and writes fields by logical name, and [`Model`], which ties the type to
//! its static [`EntityDescriptor`]. A subclass embeds its parent struct and
//! delegates names it does not own to it.
//!
//! ```ignore
//! #[derive(Debug, Clone, Default)]
//! struct Dog { animal: Animal, breed: String }
//!
//! impl Entity for Dog {
//!     fn entity_name(&self) -> &'static str { "Dog" }
//!     fn get_value(&self, field: &str) -> Option<Value> {
//!         match field {
//!             "breed" => Some(self.breed.clone().into()),
//!             _ => self.animal.get_value(field),
//!         }
//!     }
//!     // ...
//! }
//! ```

use std::any::Any;
use std::fmt;

use crate::error::Result;
use crate::field::{FieldInfo, InheritanceInfo};
use crate::relationship::{LazyCollection, Reference, RelationshipInfo};
use crate::value::Value;

/// Handle to an entity tracked by a session's unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(usize);

impl EntityHandle {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Object-safe access to `Any`, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Runtime field access by logical name.
pub trait Entity: AsAny + fmt::Debug {
    /// Name of the concrete mapped class of this instance.
    fn entity_name(&self) -> &'static str;

    /// Read a scalar field. `None` means the entity has no such field.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Write a scalar field, converting from the given value.
    fn set_value(&mut self, field: &str, value: Value) -> Result<()>;

    /// Single-valued association (many-to-one, owning one-to-one).
    fn reference(&self, _field: &str) -> Option<&Reference> {
        None
    }

    fn reference_mut(&mut self, _field: &str) -> Option<&mut Reference> {
        None
    }

    /// Collection association (one-to-many, many-to-many).
    fn collection(&self, _field: &str) -> Option<&LazyCollection> {
        None
    }

    fn collection_mut(&mut self, _field: &str) -> Option<&mut LazyCollection> {
        None
    }

    fn clone_entity(&self) -> Box<dyn Entity>;
}

impl Clone for Box<dyn Entity> {
    fn clone(&self) -> Self {
        self.clone_entity()
    }
}

/// A statically known mapped type.
pub trait Model: Entity + Default + Sized + 'static {
    const ENTITY_NAME: &'static str;

    fn descriptor() -> EntityDescriptor;
}

/// Build a default instance of `M` behind the entity interface.
pub fn instantiate<M: Model>() -> Box<dyn Entity> {
    Box::new(M::default())
}

/// Borrow a polymorphic entity as a concrete type.
pub fn downcast_ref<T: Entity>(entity: &dyn Entity) -> Option<&T> {
    entity.as_any().downcast_ref::<T>()
}

pub fn downcast_mut<T: Entity>(entity: &mut dyn Entity) -> Option<&mut T> {
    entity.as_any_mut().downcast_mut::<T>()
}

/// Convert a polymorphic entity into a concrete type, handing it back on mismatch.
pub fn downcast<T: Entity>(entity: Box<dyn Entity>) -> std::result::Result<T, Box<dyn Entity>> {
    if !(*entity).as_any().is::<T>() {
        return Err(entity);
    }
    match entity.into_any().downcast::<T>() {
        Ok(concrete) => Ok(*concrete),
        Err(_) => unreachable!("type checked above"),
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Function returning a descriptor; used to reach ancestors.
pub type DescriptorFn = fn() -> EntityDescriptor;

/// Function producing a fresh, default-initialized instance.
pub type EntityFactory = fn() -> Box<dyn Entity>;

/// Declared mapping of one class, as produced by builder calls.
///
/// Descriptors are consumed by the registry, which closes over parents via
/// [`EntityDescriptor::parent`], so abstract ancestors need not be
/// registered explicitly.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: &'static str,
    /// Explicit table name; defaults to the snake_case entity name.
    pub table: Option<&'static str>,
    pub is_abstract: bool,
    pub parent: Option<DescriptorFn>,
    pub inheritance: InheritanceInfo,
    pub fields: Vec<FieldInfo>,
    pub relationships: Vec<RelationshipInfo>,
    pub factory: Option<EntityFactory>,
}

impl EntityDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            table: None,
            is_abstract: false,
            parent: None,
            inheritance: InheritanceInfo::none(),
            fields: Vec::new(),
            relationships: Vec::new(),
            factory: None,
        }
    }

    /// Descriptor for a model type, with its factory wired in.
    pub fn of<M: Model>() -> Self {
        let mut d = Self::new(M::ENTITY_NAME);
        d.factory = Some(instantiate::<M>);
        d
    }

    pub fn table(mut self, table: &'static str) -> Self {
        self.table = Some(table);
        self
    }

    /// Mark the class abstract: it is never instantiated from a row.
    pub fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self.factory = None;
        self
    }

    pub fn extends(mut self, parent: DescriptorFn) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn inheritance(mut self, info: InheritanceInfo) -> Self {
        self.inheritance = info;
        self
    }

    pub fn discriminator_value(mut self, value: &'static str) -> Self {
        self.inheritance.discriminator_value = Some(value);
        self
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipInfo) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn factory(mut self, factory: EntityFactory) -> Self {
        self.factory = Some(factory);
        self
    }
}

/// Source of mapped classes, e.g. a build-time generated list.
pub trait EntityDiscovery {
    fn discover(&self) -> Vec<EntityDescriptor>;
}

impl EntityDiscovery for [DescriptorFn] {
    fn discover(&self) -> Vec<EntityDescriptor> {
        self.iter().map(|f| f()).collect()
    }
}

impl<const N: usize> EntityDiscovery for [DescriptorFn; N] {
    fn discover(&self) -> Vec<EntityDescriptor> {
        self.as_slice().discover()
    }
}
