//! Concrete tables chained by foreign keys.
//!
//! Only concrete classes have tables. Columns declared by an abstract class
//! are copied into the table of each nearest concrete descendant, and a
//! concrete table's id references the table of its nearest concrete
//! ancestor. Reads therefore join concrete tables only.
//!
//! When the root is abstract the hierarchy may have several top tables, so
//! ids come from the shared sequence.

use strata_core::{Entity, InheritanceStrategy, Result, Value};
use strata_query::SelectPlan;
use strata_schema::Registry;

use crate::chained;
use crate::strategy::{PersistenceStrategy, SchemaStatements, StrategyContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConcreteForeignKeyStrategy;

impl PersistenceStrategy for ConcreteForeignKeyStrategy {
    fn kind(&self) -> InheritanceStrategy {
        InheritanceStrategy::ConcreteForeignKey
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
