//! Mapping metadata for Strata.
//!
//! `strata-schema` validates declared descriptors into a [`Registry`] of
//! [`EntityMetadata`] and renders SQLite DDL for the resulting tables.
//!
//! # Role In The Architecture
//!
//! - **Registry**: the single source of truth for tables, columns,
//!   associations and inheritance links, shared read-only behind an `Arc`.
//! - **Views**: chain, subtree and merged-column lookups used by the query
//!   compiler and the inheritance strategies.
//! - **DDL**: `CREATE TABLE`/`CREATE INDEX` rendering used by the strategies'
//!   `create` and by schema creation in the session factory.

pub mod ddl;
pub mod metadata;
pub mod registry;

pub use ddl::{ColumnDef, ForeignKeyDef, IndexDef, SEQUENCE_TABLE, TableDef};
pub use metadata::{
    AssociationMetadata, DiscriminatorMap, EntityMetadata, ForeignKeyRef, InheritanceMetadata,
    LinkTableMetadata, PropertyMetadata,
};
pub use registry::{DEFAULT_DISCRIMINATOR_COLUMN, Registry};
