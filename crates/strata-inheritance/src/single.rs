//! Single-table inheritance.
//!
//! The whole hierarchy shares the root's table. A discriminator column holds
//! the concrete class of each row; subclass columns are nullable and stay
//! NULL for rows of other classes.

use strata_core::{Entity, Error, InheritanceStrategy, Result, SqlType, Value, quote_literal};
use strata_query::{DeleteBuilder, EntityTag, InsertBuilder, SelectBranch, SelectPlan, UpdateBuilder};
use strata_schema::{ColumnDef, DiscriminatorMap, IndexDef, Registry, TableDef};

use crate::common;
use crate::strategy::{PersistenceStrategy, SchemaStatements, StrategyContext};

const ALIAS: &str = "t0";

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleTableStrategy;

fn discriminator<'r>(registry: &'r Registry, entity: &str) -> Result<(&'r str, &'r DiscriminatorMap)> {
    let root = registry.root_of(entity)?;
    let map = registry
        .discriminator(&root.name)
        .ok_or_else(|| Error::mapping(&root.name, "single-table hierarchy has no discriminator"))?;
    Ok((root.table.as_str(), map))
}

impl PersistenceStrategy for SingleTableStrategy {
    fn kind(&self) -> InheritanceStrategy {
        InheritanceStrategy::Single
    }

    fn create(&self, registry: &Registry, root: &str) -> Result<SchemaStatements> {
        let (table_name, map) = discriminator(registry, root)?;
        let mut table = TableDef::new(table_name);
        let ids = registry.id_properties(root);
        for p in &ids {
            table.push_column(ColumnDef::from_property(p).nullable(false));
        }
        table.primary_key = ids.iter().map(|p| p.column.clone()).collect();
        table.push_column(ColumnDef::new(&map.column, SqlType::VarChar(255)));
        for p in registry.single_table_columns(root) {
            if !p.primary_key {
                table.push_property(&p);
            }
        }
        table.indexes.push(IndexDef {
            name: format!("idx_{}_{}", table_name, map.column),
            columns: vec![map.column.clone()],
            unique: false,
        });
        tracing::debug!(
            root = root,
            table = table_name,
            classes = map.len(),
            "Single-table layout"
        );
        let mut out = SchemaStatements::default();
        out.push_table(&table);
        Ok(out)
    }

    fn select_plan(&self, registry: &Registry, entity: &str) -> Result<SelectPlan> {
        let meta = registry.entity(entity)?;
        let (table_name, map) = discriminator(registry, entity)?;
        let mut plan = common::plan_outputs(registry, entity);

        let mut branch = SelectBranch::new(
            EntityTag::Discriminator(common::qualified(ALIAS, &map.column)),
            common::aliased(table_name, ALIAS),
            plan.outputs.len(),
        );
        for (i, output) in plan.outputs.iter().enumerate() {
            branch.exprs[i] = Some(common::qualified(ALIAS, &output.column));
        }
        if !meta.is_root() {
            let values: Vec<String> = registry
                .concrete_subtree(entity)
                .iter()
                .filter_map(|m| map.value_of(&m.name))
                .map(quote_literal)
                .collect();
            branch.filters.push(if values.is_empty() {
                "1 = 0".to_string()
            } else {
                format!(
                    "{} IN ({})",
                    common::qualified(ALIAS, &map.column),
                    values.join(", ")
                )
            });
        }
        plan.branches.push(branch);
        Ok(plan)
    }

    fn insert(&self, ctx: &mut StrategyContext<'_>, entity: &mut dyn Entity) -> Result<Vec<Value>> {
        let registry = ctx.registry;
        let name = entity.entity_name();
        if registry.entity(name)?.is_abstract {
            return Err(Error::mapping(name, "abstract classes cannot be inserted"));
        }
        let (table_name, map) = discriminator(registry, name)?;
        let value = map
            .value_of(name)
            .ok_or_else(|| Error::mapping(name, "no discriminator value"))?;

        let mut builder = InsertBuilder::new(table_name);
        for (p, v) in common::insert_ids(registry, entity)? {
            builder = match v {
                Some(v) => builder.value(&p.column, v),
                None => builder.generated(&p.column),
            };
        }
        builder = builder.value(&map.column, value);
        for p in registry.data_columns(name) {
            builder = builder.value(&p.column, common::column_value(entity, p)?);
        }
        let generated = common::run_insert(ctx, name, &builder)?;
        let ids = common::assign_generated_id(registry, entity, generated)?;
        common::insert_links(ctx, entity, &ids)?;
        tracing::debug!(entity = name, discriminator = value, "Inserted single-table row");
        Ok(ids)
    }

    fn update(&self, ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()> {
        let registry = ctx.registry;
        let name = entity.entity_name();
        let (table_name, _) = discriminator(registry, name)?;
        let ids = common::persisted_id(registry, entity, "update")?;
        let mut builder = UpdateBuilder::new(table_name);
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
        let (table_name, _) = discriminator(registry, name)?;
        let ids = common::persisted_id(registry, entity, "delete")?;
        common::delete_links(ctx, entity, &ids)?;
        let mut builder = DeleteBuilder::new(table_name);
        for (p, v) in registry.id_properties(name).iter().zip(&ids) {
            builder = builder.key(&p.column, v.clone());
        }
        common::run_delete(ctx, name, &builder)?;
        Ok(())
    }
}
