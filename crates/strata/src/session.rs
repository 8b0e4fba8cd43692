//! ORM session re-exports.
//!
//! `strata::Session` is the unit-of-work session: identity map, ordered
//! flush, fluent finders and lazy collection loading.
//!
//! The implementation lives in the separate `strata-session` crate. This
//! module exists so the `strata` facade can expose the session without
//! forcing users to depend on sub-crates directly.

pub use strata_session::{
    EntitySet, Finder, Metamodel, ObjectKey, ObjectState, SchemaMode, Session, SessionConfig,
    SessionDebugInfo, SessionFactory,
};
