//! The persistence strategy contract.

use std::fmt;
use std::sync::Arc;

use strata_core::{Connection, Entity, InheritanceStrategy, Result, Value};
use strata_query::{Condition, QuerySpec, SelectPlan};
use strata_schema::Registry;

use crate::common;

/// Borrowed state a strategy works against for one call.
pub struct StrategyContext<'a> {
    pub registry: &'a Registry,
    pub conn: &'a mut dyn Connection,
}

impl<'a> StrategyContext<'a> {
    pub fn new(registry: &'a Registry, conn: &'a mut dyn Connection) -> Self {
        Self { registry, conn }
    }
}

impl fmt::Debug for StrategyContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyContext")
            .field("entities", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// DDL for one hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaStatements {
    /// `CREATE TABLE` statements.
    pub tables: Vec<String>,
    /// Constraint DDL run after every table exists.
    pub constraints: Vec<String>,
}

impl SchemaStatements {
    pub fn extend(&mut self, other: SchemaStatements) {
        self.tables.extend(other.tables);
        self.constraints.extend(other.constraints);
    }

    pub(crate) fn push_table(&mut self, table: &strata_schema::TableDef) {
        let (tables, constraints) = strata_schema::ddl::generate(table);
        self.tables.extend(tables);
        self.constraints.extend(constraints);
    }
}

/// How one inheritance layout persists and reads entities.
///
/// Every read is polymorphic: asking for a type returns instances of the
/// concrete classes in its subtree, each built by its own factory.
pub trait PersistenceStrategy: fmt::Debug + Send + Sync {
    fn kind(&self) -> InheritanceStrategy;

    /// Table DDL and constraint DDL for the hierarchy rooted at `root`.
    fn create(&self, registry: &Registry, root: &str) -> Result<SchemaStatements>;

    /// How to read `entity` and its subclasses.
    fn select_plan(&self, registry: &Registry, entity: &str) -> Result<SelectPlan>;

    /// Insert one entity, writing any generated id back into it.
    /// Returns the id values.
    fn insert(&self, ctx: &mut StrategyContext<'_>, entity: &mut dyn Entity) -> Result<Vec<Value>>;

    fn update(&self, ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()>;

    fn delete(&self, ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()>;

    fn find_by_id(
        &self,
        ctx: &mut StrategyContext<'_>,
        entity: &str,
        id: &[Value],
    ) -> Result<Option<Box<dyn Entity>>> {
        let spec = id_spec(ctx.registry, entity, id)?;
        let plan = self.select_plan(ctx.registry, entity)?;
        Ok(common::load(ctx, entity, &plan, &spec)?.into_iter().next())
    }

    fn find_all(&self, ctx: &mut StrategyContext<'_>, entity: &str) -> Result<Vec<Box<dyn Entity>>> {
        self.find_by(ctx, entity, &QuerySpec::new())
    }

    fn find_by(
        &self,
        ctx: &mut StrategyContext<'_>,
        entity: &str,
        spec: &QuerySpec,
    ) -> Result<Vec<Box<dyn Entity>>> {
        let plan = self.select_plan(ctx.registry, entity)?;
        common::load(ctx, entity, &plan, spec)
    }
}

/// Conditions matching the id columns of `entity`.
pub(crate) fn id_spec(registry: &Registry, entity: &str, id: &[Value]) -> Result<QuerySpec> {
    let ids = registry.id_properties(entity);
    if ids.len() != id.len() {
        return Err(strata_core::Error::mapping(
            entity,
            format!("expected {} id values, got {}", ids.len(), id.len()),
        ));
    }
    let mut spec = QuerySpec::new();
    for (p, v) in ids.iter().zip(id) {
        spec = spec.filter(Condition::eq(p.name.clone(), v.clone()));
    }
    Ok(spec)
}

/// The strategy implementation for a declared layout.
///
/// Standalone classes (no inheritance) use the joined implementation, which
/// degenerates to a single table for a one-class chain.
pub fn strategy_for(kind: InheritanceStrategy) -> Arc<dyn PersistenceStrategy> {
    match kind {
        InheritanceStrategy::Single => Arc::new(crate::single::SingleTableStrategy),
        InheritanceStrategy::None | InheritanceStrategy::Joined => {
            Arc::new(crate::joined::JoinedTableStrategy)
        }
        InheritanceStrategy::Concrete => Arc::new(crate::concrete::TablePerClassStrategy),
        InheritanceStrategy::ConcreteForeignKey => {
            Arc::new(crate::concrete_fk::ConcreteForeignKeyStrategy)
        }
    }
}
