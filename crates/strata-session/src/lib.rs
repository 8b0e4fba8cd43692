//! Session and unit of work for Strata.
//!
//! The [`Session`] is the central unit-of-work manager. It owns a database
//! connection, tracks the objects it has seen in an identity map, and
//! flushes new, changed and removed objects on commit.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: no autoflush by default
//! - **Ownership clarity**: the session owns its connection
//! - **Type erasure**: tracked objects are `Box<dyn Entity>`, so one session
//!   serves every mapped class and every inheritance layout
//! - **Transaction safety**: a failed flush rolls the whole commit back
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::new(registry, SessionConfig::default(), SchemaMode::Create);
//! let session = factory.open_session(conn)?;
//!
//! let team = session.save(&Team { name: "Preventers".into(), ..Default::default() })?;
//! let hero = session.save(&Hero { name: "Deadpond".into(), ..Default::default() })?;
//! session.relate(hero, "team", team)?;
//!
//! // Team is inserted first; Hero gets its generated id as team_id.
//! session.commit()?;
//!
//! let found = session.finder("Hero").eq("name", "Deadpond").single()?;
//! ```

use serde::{Deserialize, Serialize};

pub mod factory;
pub mod finder;
mod flush;
pub mod identity;
mod lazy;
pub mod session;
pub mod unit_of_work;

#[cfg(test)]
mod test_support;

pub use factory::{Metamodel, SchemaMode, SessionFactory};
pub use finder::Finder;
pub use identity::{EntitySet, ObjectKey};
pub use session::Session;
pub use unit_of_work::ObjectState;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether to begin a transaction on the first flush.
    pub auto_begin: bool,
    /// Whether to flush before queries (not recommended for performance).
    pub auto_flush: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            auto_flush: false,
        }
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDebugInfo {
    /// Total tracked objects.
    pub tracked: usize,
    /// Objects pending INSERT.
    pub pending_new: usize,
    /// Objects pending DELETE.
    pub pending_delete: usize,
    /// Objects pending UPDATE.
    pub pending_dirty: usize,
    /// Whether in a transaction.
    pub in_transaction: bool,
    /// Association loads performed, lazy or explicit.
    pub relationship_loads: usize,
}
