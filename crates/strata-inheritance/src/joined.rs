//! Joined-table inheritance.
//!
//! Every concrete class has a table holding the columns it declares. A
//! subclass table's primary key doubles as a foreign key to its parent's
//! table, so an instance is one row per class in its chain, all sharing the
//! root's generated id. Standalone entities are the one-table case.
//!
//! Abstract classes get no table. Their columns are stored in the table of
//! each nearest concrete descendant, and an abstract root hands out ids from
//! the shared sequence.

use strata_core::{Entity, InheritanceStrategy, Result, Value};
use strata_query::SelectPlan;
use strata_schema::Registry;

use crate::chained;
use crate::strategy::{PersistenceStrategy, SchemaStatements, StrategyContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct JoinedTableStrategy;

impl PersistenceStrategy for JoinedTableStrategy {
    fn kind(&self) -> InheritanceStrategy {
        InheritanceStrategy::Joined
    }

    fn create(&self, registry: &Registry, root: &str) -> Result<SchemaStatements> {
        chained::create(registry, root)
    }

    fn select_plan(&self, registry: &Registry, entity: &str) -> Result<SelectPlan> {
        chained::select_plan(registry, entity)
    }

    fn insert(&self, ctx: &mut StrategyContext<'_>, entity: &mut dyn Entity) -> Result<Vec<Value>> {
        chained::insert(ctx, entity)
    }

    fn update(&self, ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()> {
        chained::update(ctx, entity)
    }

    fn delete(&self, ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()> {
        chained::delete(ctx, entity)
    }
}
