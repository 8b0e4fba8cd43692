//! Layouts where an instance spans a chain of tables linked by id.
//!
//! Joined-table and concrete-table-with-FK hierarchies both store an
//! instance as one row per concrete class in its chain. Every row shares
//! the id; each non-top table's id is also a foreign key to the table of the
//! nearest concrete ancestor. Abstract classes have no table: their columns
//! are copied into each nearest concrete descendant's table.
//!
//! When the root is abstract the hierarchy may have several top tables, so
//! ids come from the shared sequence instead of the top table.

use strata_core::{Entity, Error, ReferentialAction, Result, Value};
use strata_query::{DeleteBuilder, EntityTag, InsertBuilder, SelectBranch, SelectPlan, UpdateBuilder};
use strata_schema::{ColumnDef, EntityMetadata, ForeignKeyDef, PropertyMetadata, Registry, TableDef};

use crate::common;
use crate::sequence;
use crate::strategy::{SchemaStatements, StrategyContext};

/// One table of an instance's chain and the data columns it stores.
#[derive(Debug, Clone)]
struct TablePart<'r> {
    pub meta: &'r EntityMetadata,
    pub columns: Vec<&'r PropertyMetadata>,
}

/// Parts of `entity` when only concrete classes carry a table. Columns an
/// abstract class declares land in the next concrete table down the chain.
fn table_parts<'r>(registry: &'r Registry, entity: &str) -> Vec<TablePart<'r>> {
    let mut parts = Vec::new();
    let mut carried = Vec::new();
    for meta in registry.chain(entity) {
        carried.extend(meta.own_data_columns());
        if !meta.is_abstract {
            parts.push(TablePart {
                meta,
                columns: std::mem::take(&mut carried),
            });
        }
    }
    parts
}

fn part_alias(i: usize) -> String {
    format!("t{i}")
}

fn id_join(registry: &Registry, entity: &str, left: &str, right: &str) -> String {
    registry
        .id_properties(entity)
        .iter()
        .map(|p| {
            format!(
                "{} = {}",
                common::qualified(left, &p.column),
                common::qualified(right, &p.column)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub(crate) fn create(registry: &Registry, root: &str) -> Result<SchemaStatements> {
    let root_meta = registry.entity(root)?;
    let sequenced = root_meta.is_abstract;
    let mut out = SchemaStatements::default();

    for meta in registry.subtree(root) {
        if meta.is_abstract {
            continue;
        }
        let parts = table_parts(registry, &meta.name);
        let Some(own) = parts.last() else {
            continue;
        };
        let parent = registry.nearest_concrete_ancestor(&meta.name);
        let ids = registry.id_properties(&meta.name);

        let mut table = TableDef::new(&meta.table);
        for p in &ids {
            let mut col = ColumnDef::from_property(p).nullable(false);
            col.auto_increment = p.auto_increment && parent.is_none() && !sequenced;
            table.push_column(col);
        }
        table.primary_key = ids.iter().map(|p| p.column.clone()).collect();
        if let Some(parent) = parent {
            table.foreign_keys.push(ForeignKeyDef {
                columns: table.primary_key.clone(),
                ref_table: parent.table.clone(),
                ref_columns: table.primary_key.clone(),
                on_delete: Some(ReferentialAction::Cascade),
            });
        }
        for p in &own.columns {
            table.push_property(p);
        }
        tracing::debug!(
            entity = %meta.name,
            table = %meta.table,
            parent = parent.map(|p| p.table.as_str()),
            "Chained table"
        );
        out.push_table(&table);
    }
    if sequenced {
        out.push_table(&strata_schema::ddl::sequence_table());
    }
    Ok(out)
}

pub(crate) fn select_plan(registry: &Registry, entity: &str) -> Result<SelectPlan> {
    registry.entity(entity)?;
    let mut plan = common::plan_outputs(registry, entity);

    for concrete in registry.concrete_subtree(entity) {
        let parts = table_parts(registry, &concrete.name);
        let Some(first) = parts.first() else {
            return Err(Error::mapping(&concrete.name, "concrete class has no table"));
        };

        let mut from = common::aliased(&first.meta.table, &part_alias(0));
        for (i, part) in parts.iter().enumerate().skip(1) {
            from.push_str(&format!(
                " INNER JOIN {} ON {}",
                common::aliased(&part.meta.table, &part_alias(i)),
                id_join(registry, &concrete.name, &part_alias(i), &part_alias(i - 1)),
            ));
        }

        // Rows that continue into a child table belong to a subclass.
        let last = part_alias(parts.len() - 1);
        let id_column = registry
            .id_properties(&concrete.name)
            .first()
            .map(|p| p.column.clone())
            .ok_or_else(|| Error::mapping(&concrete.name, "no id columns"))?;
        let mut filters = Vec::new();
        for (j, child) in registry.nearest_concrete_descendants(&concrete.name).iter().enumerate() {
            let alias = format!("x{j}");
            from.push_str(&format!(
                " LEFT JOIN {} ON {}",
                common::aliased(&child.table, &alias),
                id_join(registry, &concrete.name, &alias, &last),
            ));
            filters.push(format!("{} IS NULL", common::qualified(&alias, &id_column)));
        }

        let b = plan.branches.len();
        let mut branch = SelectBranch::new(
            EntityTag::Literal(concrete.name.clone()),
            from,
            plan.outputs.len(),
        );
        branch.filters = filters;
        plan.branches.push(branch);
        common::bind_columns(&mut plan, b, &part_alias(0), registry.id_properties(&concrete.name));
        for (i, part) in parts.iter().enumerate() {
            common::bind_columns(&mut plan, b, &part_alias(i), part.columns.iter().copied());
        }
    }
    Ok(plan)
}

pub(crate) fn insert(
    ctx: &mut StrategyContext<'_>,
    entity: &mut dyn Entity,
) -> Result<Vec<Value>> {
    let registry = ctx.registry;
    let name = entity.entity_name();
    let meta = registry.entity(name)?;
    let parts = table_parts(registry, name);
    if meta.is_abstract || parts.is_empty() {
        return Err(Error::mapping(name, "abstract classes cannot be inserted"));
    }

    let root = registry.root_of(name)?;
    if root.is_abstract {
        sequence::assign(ctx, entity, &root.table)?;
    }

    let mut builder = InsertBuilder::new(&parts[0].meta.table);
    for (p, value) in common::insert_ids(registry, entity)? {
        builder = match value {
            Some(v) => builder.value(&p.column, v),
            None => builder.generated(&p.column),
        };
    }
    for p in &parts[0].columns {
        builder = builder.value(&p.column, common::column_value(entity, p)?);
    }
    let generated = common::run_insert(ctx, name, &builder)?;
    let ids = common::assign_generated_id(registry, entity, generated)?;
    if ids.iter().any(Value::is_null) {
        return Err(Error::mapping(name, "insert produced no id"));
    }

    let id_props = registry.id_properties(name);
    for part in &parts[1..] {
        let mut builder = InsertBuilder::new(&part.meta.table);
        for (p, v) in id_props.iter().zip(&ids) {
            builder = builder.value(&p.column, v.clone());
        }
        for p in &part.columns {
            builder = builder.value(&p.column, common::column_value(entity, p)?);
        }
        common::run_insert(ctx, name, &builder)?;
    }

    common::insert_links(ctx, entity, &ids)?;
    tracing::debug!(entity = name, tables = parts.len(), "Inserted chained rows");
    Ok(ids)
}

pub(crate) fn update(ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()> {
    let registry = ctx.registry;
    let name = entity.entity_name();
    let ids = common::persisted_id(registry, entity, "update")?;
    let id_props = registry.id_properties(name);
    for part in table_parts(registry, name) {
        if part.columns.is_empty() {
            continue;
        }
        let mut builder = UpdateBuilder::new(&part.meta.table);
        for p in &part.columns {
            builder = builder.set(&p.column, common::column_value(entity, p)?);
        }
        for (p, v) in id_props.iter().zip(&ids) {
            builder = builder.key(&p.column, v.clone());
        }
        common::run_update(ctx, name, &builder)?;
    }
    common::update_links(ctx, entity, &ids)
}

pub(crate) fn delete(ctx: &mut StrategyContext<'_>, entity: &dyn Entity) -> Result<()> {
    let registry = ctx.registry;
    let name = entity.entity_name();
    let ids = common::persisted_id(registry, entity, "delete")?;
    common::delete_links(ctx, entity, &ids)?;
    let id_props = registry.id_properties(name);
    // Leaf first so no row is left pointing at a deleted parent.
    for part in table_parts(registry, name).iter().rev() {
        let mut builder = DeleteBuilder::new(&part.meta.table);
        for (p, v) in id_props.iter().zip(&ids) {
            builder = builder.key(&p.column, v.clone());
        }
        common::run_delete(ctx, name, &builder)?;
    }
    tracing::debug!(entity = name, "Deleted chained rows");
    Ok(())
}
