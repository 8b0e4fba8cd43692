//! Query building for Strata.
//!
//! - [`Condition`] and [`QuerySpec`]: the fluent, logical description of a
//!   query (field names, not columns).
//! - [`SelectPlan`]: how an inheritance strategy reads a type, one branch per
//!   physical source. Compiling a plan with a spec yields parameterized SQL.
//! - [`InsertBuilder`], [`UpdateBuilder`], [`DeleteBuilder`]: DML on physical
//!   tables.

pub mod condition;
pub mod dml;
pub mod select;
pub mod spec;

pub use condition::{Condition, FieldExpr, render_all};
pub use dml::{DeleteBuilder, InsertBuilder, SetClause, UpdateBuilder};
pub use select::{CompiledQuery, ENTITY_COLUMN, EntityTag, OutputColumn, SelectBranch, SelectPlan};
pub use spec::{Direction, QuerySpec, Sort};
