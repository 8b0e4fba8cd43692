//! Core types and traits for Strata.
//!
//! `strata-core` is the foundation layer of the workspace. It defines the
//! contracts every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Contract layer**: [`Entity`]/[`Model`] are implemented by mapped types,
//!   [`Connection`] by database drivers.
//! - **Declarations**: [`EntityDescriptor`], [`FieldInfo`], [`RelationshipInfo`]
//!   and [`InheritanceInfo`] describe a mapping; `strata-schema` turns them into
//!   validated metadata.
//! - **Data model**: [`Row`], [`Value`] and [`SqlType`] are shared by the query,
//!   strategy and driver crates.
//! - **Association fields**: [`Reference`] and [`LazyCollection`] hold related
//!   objects on entity structs.
//!
//! Most applications should use the `strata` facade.

pub mod connection;
pub mod convert;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod model;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use connection::Connection;
pub use error::{
    ConnectionError, ConnectionErrorKind, ConversionError, Error, MappingError, Operation,
    PersistenceError, QueryError, QueryErrorKind, Result, StateError, StateErrorKind,
};
pub use field::{FieldInfo, InheritanceInfo, InheritanceStrategy, ReferentialAction};
pub use identifiers::{is_valid_identifier, quote_ident, quote_literal, to_snake_case};
pub use model::{
    AsAny, DescriptorFn, Entity, EntityDescriptor, EntityDiscovery, EntityFactory, EntityHandle,
    Model, downcast, downcast_mut, downcast_ref, instantiate,
};
pub use relationship::{
    CollectionLoader, LazyCollection, LinkTableInfo, Reference, RelationshipInfo,
    RelationshipKind,
};
pub use row::Row;
pub use types::SqlType;
pub use value::{FromValue, Value, hash_values};
