//! Inheritance strategies for Strata.
//!
//! A hierarchy of mapped classes is stored in one of four physical layouts.
//! Each layout is a [`PersistenceStrategy`]: it renders the hierarchy's DDL,
//! writes instances, and builds the polymorphic [`SelectPlan`] used for every
//! read. Reads of a type always return instances of the concrete classes in
//! its subtree.
//!
//! | Strategy | Tables | Concrete class from |
//! |----------|--------|---------------------|
//! | [`SingleTableStrategy`] | the root's | discriminator column |
//! | [`JoinedTableStrategy`] | one per non-abstract class, chained by id | branch of the union |
//! | [`TablePerClassStrategy`] | one per concrete class | branch of the union |
//! | [`ConcreteForeignKeyStrategy`] | one per concrete class, chained by id | branch of the union |
//!
//! [`SelectPlan`]: strata_query::SelectPlan

mod chained;
mod common;
pub mod concrete;
pub mod concrete_fk;
pub mod joined;
pub mod mapper;
pub mod sequence;
pub mod single;
pub mod strategy;

#[cfg(test)]
mod test_support;

pub use common::id_values;
pub use concrete::TablePerClassStrategy;
pub use concrete_fk::ConcreteForeignKeyStrategy;
pub use joined::JoinedTableStrategy;
pub use sequence::{advance_past, next_id};
pub use single::SingleTableStrategy;
pub use strategy::{PersistenceStrategy, SchemaStatements, StrategyContext, strategy_for};
