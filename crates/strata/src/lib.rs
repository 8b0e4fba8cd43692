//! Strata: polymorphic object-relational mapping.
//!
//! Mapped classes form inheritance hierarchies. Each hierarchy is stored in
//! one of four physical layouts, chosen by its root:
//!
//! - **single table**: one table, a discriminator column names the class;
//! - **joined**: one table per class, chained by id;
//! - **table per class**: one table per concrete class, ids from a shared sequence;
//! - **concrete with foreign keys**: table per concrete class, chained by id.
//!
//! Reads are polymorphic in every layout: asking for a class returns
//! instances of every concrete class below it.
//!
//! # Example
//!
//! ```ignore
//! use strata::prelude::*;
//!
//! let factory = Configuration::new()
//!     .set_property("schema.auto", "create")
//!     .register::<Manager>()
//!     .register::<Engineer>()
//!     .build_session_factory()?;
//!
//! let session = factory.open_session(SqliteConnection::open_memory()?)?;
//! session.save(&Engineer::new("Linus", "C"))?;
//! session.commit()?;
//!
//! for employee in session.find_all("Employee")? {
//!     println!("{}", employee.entity_name());
//! }
//! ```

pub mod config;
pub mod session;

pub use config::{Configuration, Settings};
pub use session::{
    Finder, Metamodel, ObjectKey, ObjectState, SchemaMode, Session, SessionConfig,
    SessionDebugInfo, SessionFactory,
};

pub use strata_core::{
    Connection, Entity, EntityDescriptor, EntityDiscovery, EntityHandle, Error, FieldInfo,
    FromValue, InheritanceInfo, InheritanceStrategy, LazyCollection, Model, Reference,
    RelationshipInfo, RelationshipKind, Result, Row, SqlType, StateErrorKind, Value, downcast,
    downcast_ref,
};
pub use strata_query::{Condition, Direction, QuerySpec, Sort};
pub use strata_schema::Registry;

#[cfg(feature = "sqlite")]
pub use strata_sqlite::SqliteConnection;

/// Everything needed to declare models and run sessions.
pub mod prelude {
    pub use crate::config::Configuration;
    pub use crate::session::{Finder, ObjectState, SchemaMode, Session, SessionConfig, SessionFactory};
    pub use strata_core::{
        Connection, Entity, EntityDescriptor, EntityHandle, Error, FieldInfo, FromValue,
        InheritanceInfo, LazyCollection, Model, Reference, RelationshipInfo, Result, SqlType,
        Value, downcast, downcast_ref,
    };
    pub use strata_query::{Condition, Direction};

    #[cfg(feature = "sqlite")]
    pub use strata_sqlite::SqliteConnection;
}
