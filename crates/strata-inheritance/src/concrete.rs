//! Table per concrete class.
//!
//! Each concrete class has a complete table of every column it sees. Ids
//! come from the hierarchy's row in the shared sequence table, so they stay
//! unique across sibling tables.

use strata_core::{Entity, Error, InheritanceStrategy, Operation, Result, Value, quote_ident, quote_literal};
use strata_query::{
    DeleteBuilder, ENTITY_COLUMN, EntityTag, InsertBuilder, SelectBranch, SelectPlan, UpdateBuilder,
};
use strata_schema::{ColumnDef, Registry, TableDef};

use crate::common;
use crate::sequence;
use crate::strategy::{PersistenceStrategy, SchemaStatements, StrategyContext, id_spec};

const ALIAS: &str = "t0";

#[derive(Debug, Clone, Copy, Default)]
pub struct TablePerClassStrategy;

impl TablePerClassStrategy {
    /// `SELECT 'C' AS "__entity" FROM "c" WHERE "id" = ?` per concrete class,
    /// combined with UNION ALL.
    fn locate_query(registry: &Registry, entity: &str, id: &[Value]) -> (String, Vec<Value>) {
        let ids = registry.id_properties(entity);
        let predicate = ids
            .iter()
            .map(|p| format!("{} = ?", quote_ident(&p.column)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let mut selects = Vec::new();
        let mut params = Vec::new();
        for meta in registry.concrete_subtree(entity) {
            selects.push(format!(
                "SELECT {} AS {} FROM {} WHERE {}",
                quote_literal(&meta.name),
                quote_ident(ENTITY_COLUMN),
                quote_ident(&meta.table),
                predicate
            ));
            params.extend(id.iter().cloned());
        }
        (selects.join(" UNION ALL "), params)
    }
}

impl PersistenceStrategy for TablePerClassStrategy {
    fn kind(&self) -> InheritanceStrategy {
        InheritanceStrategy::Concrete
    }

    fn create(&self, registry: &Registry, root: &str) -> Result<SchemaStatements> {
        let mut out = SchemaStatements::default();
        for meta in registry.concrete_subtree(root) {
            let mut table = TableDef::new(&meta.table);
            let ids = registry.id_properties(&meta.name);
            for p in &ids {
                let mut col = ColumnDef::from_property(p).nullable(false);
                col.auto_increment = false;
                table.push_column(col);
            }
            table.primary_key = ids.iter().map(|p| p.column.clone()).collect();
            for p in registry.data_columns(&meta.name) {
                table.push_property(p);
            }
            out.push_table(&table);
        }
        out.push_table(&strata_schema::ddl::sequence_table());
        Ok(out)
    }

    fn select_plan(&self, registry: &Registry, entity: &str) -> Result<SelectPlan> {
        registry.entity(entity)?;
        let mut plan = common::plan_outputs(registry, entity);
        for meta in registry.concrete_subtree(entity) {
            let b = plan.branches.len();
            plan.branches.push(SelectBranch::new(
                EntityTag::Literal(meta.name.clone()),
                common::aliased(&meta.table, ALIAS),
                plan.outputs.len(),
            ));
            common::bind_columns(&mut plan, b, ALIAS, registry.columns(&meta.name));
        }
        Ok(plan)
    }

    fn insert(&self, ctx: &mut StrategyContext<'_>, entity: &mut dyn Entity) -> Result<Vec<Value>> {
        let registry = ctx.registry;
        let name = entity.entity_name();
        let meta = registry.entity(name)?;
        if meta.is_abstract {
            return Err(Error::mapping(name, "abstract classes cannot be inserted"));
        }
        let root = registry.root_of(name)?;
        sequence::assign(ctx, entity, &root.table)?;

        let mut builder = InsertBuilder::new(&meta.table);
        for (p, v) in common::insert_ids(registry, entity)? {
            let v = v.ok_or_else(|| Error::mapping(name, "sequence produced no id"))?;
            builder = builder.value(&p.column, v);
        }
        for p in registry.data_columns(name) {
            builder = builder.value(&p.column, common::column_value(entity, p)?);
        }
        common::run_insert(ctx, name, &builder)?;
        let ids = common::id_values(registry, entity)?;
        common::insert_links(ctx, entity, &ids)?;
        tracing::debug!(entity = name, table = %meta.table, "Inserted concrete row");
        Ok(ids)
    }

    fn update(&self, ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()> {
        let registry = ctx.registry;
        let name = entity.entity_name();
        let meta = registry.entity(name)?;
        let ids = common::persisted_id(registry, entity, "update")?;
        let mut builder = UpdateBuilder::new(&meta.table);
        for p in registry.data_columns(name) {
            builder = builder.set(&p.column, common::column_value(entity, p)?);
        }
        for (p, v) in registry.id_properties(name).iter().zip(&ids) {
            builder = builder.key(&p.column, v.clone());
        }
        common::run_update(ctx, name, &builder)?;
        common::update_links(ctx, entity, &ids)
    }

    fn delete(&self, ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()> {
        let registry = ctx.registry;
        let name = entity.entity_name();
        let meta = registry.entity(name)?;
        let ids = common::persisted_id(registry, entity, "delete")?;
        common::delete_links(ctx, entity, &ids)?;
        let mut builder = DeleteBuilder::new(&meta.table);
        for (p, v) in registry.id_properties(name).iter().zip(&ids) {
            builder = builder.key(&p.column, v.clone());
        }
        common::run_delete(ctx, name, &builder)?;
        Ok(())
    }

    /// Check every concrete table for the id, then load the full row from
    /// the one that has it.
    fn find_by_id(
        &self,
        ctx: &mut StrategyContext<'_>,
        entity: &str,
        id: &[Value],
    ) -> Result<Option<Box<dyn Entity>>> {
        let registry = ctx.registry;
        let spec = id_spec(registry, entity, id)?;
        let (sql, params) = Self::locate_query(registry, entity, id);
        if sql.is_empty() {
            return Ok(None);
        }
        tracing::debug!(sql = %sql, params = params.len(), "Locating row among concrete tables");
        let hit = ctx
            .conn
            .query_one(&sql, &params)
            .map_err(|e| common::wrap(entity, Operation::Select, &sql, e))?;
        let Some(row) = hit else {
            return Ok(None);
        };
        let concrete: String = row.get_named(ENTITY_COLUMN)?;
        let plan = self.select_plan(registry, entity)?.restrict_to(&concrete);
        Ok(common::load(ctx, entity, &plan, &spec)?.into_iter().next())
    }
}
