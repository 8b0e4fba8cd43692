//! Helpers shared by every strategy.

use strata_core::{
    Entity, Error, LazyCollection, Operation, PersistenceError, RelationshipKind, Result,
    StateErrorKind, Value, quote_ident,
};
use strata_query::{DeleteBuilder, InsertBuilder, QuerySpec, SelectPlan, UpdateBuilder};
use strata_schema::{PropertyMetadata, Registry};

use crate::mapper;
use crate::strategy::StrategyContext;

/// Wrap `err` as a persistence failure of `entity`, unless it already is one.
pub(crate) fn wrap(entity: &str, operation: Operation, sql: &str, err: Error) -> Error {
    match err {
        Error::Persistence(_) => err,
        other => Error::Persistence(PersistenceError {
            entity: entity.to_string(),
            operation,
            sql: sql.to_string(),
            source: Box::new(other),
        }),
    }
}

pub(crate) fn run_insert(
    ctx: &mut StrategyContext<'_>,
    entity: &str,
    builder: &InsertBuilder,
) -> Result<Option<i64>> {
    builder
        .execute(ctx.conn)
        .map_err(|e| wrap(entity, Operation::Insert, &builder.build().0, e))
}

pub(crate) fn run_update(
    ctx: &mut StrategyContext<'_>,
    entity: &str,
    builder: &UpdateBuilder,
) -> Result<u64> {
    builder
        .execute(ctx.conn)
        .map_err(|e| wrap(entity, Operation::Update, &builder.build().0, e))
}

pub(crate) fn run_delete(
    ctx: &mut StrategyContext<'_>,
    entity: &str,
    builder: &DeleteBuilder,
) -> Result<u64> {
    builder
        .execute(ctx.conn)
        .map_err(|e| wrap(entity, Operation::Delete, &builder.build().0, e))
}

/// Current value of a mapped column on an entity.
///
/// Foreign keys of single-valued associations come from the reference,
/// which must already point at a persisted target.
pub(crate) fn column_value(entity: &dyn Entity, p: &PropertyMetadata) -> Result<Value> {
    if p.association {
        let reference = entity
            .reference(&p.name)
            .ok_or_else(|| Error::unknown_field(entity.entity_name(), &p.name))?;
        if reference.handle().is_some() {
            return Err(Error::state(
                StateErrorKind::NotTracked,
                format!(
                    "{}.{} references an entity that has not been inserted",
                    entity.entity_name(),
                    p.name
                ),
            ));
        }
        return Ok(reference.id().cloned().unwrap_or_default());
    }
    entity
        .get_value(&p.name)
        .ok_or_else(|| Error::unknown_field(entity.entity_name(), &p.name))
}

/// Id values of an entity, in id-column order.
pub fn id_values(registry: &Registry, entity: &dyn Entity) -> Result<Vec<Value>> {
    registry
        .id_properties(entity.entity_name())
        .into_iter()
        .map(|p| column_value(entity, p))
        .collect()
}

/// Id values, failing if any is still NULL.
pub(crate) fn persisted_id(registry: &Registry, entity: &dyn Entity, op: &str) -> Result<Vec<Value>> {
    let ids = id_values(registry, entity)?;
    if ids.is_empty() || ids.iter().any(Value::is_null) {
        return Err(Error::state(
            StateErrorKind::NotTracked,
            format!("cannot {op} {} without an id", entity.entity_name()),
        ));
    }
    Ok(ids)
}

/// Id values to insert with. A single NULL auto-increment id is left to the
/// database and reported back as `None`.
pub(crate) fn insert_ids<'r>(
    registry: &'r Registry,
    entity: &dyn Entity,
) -> Result<Vec<(&'r PropertyMetadata, Option<Value>)>> {
    let ids = registry.id_properties(entity.entity_name());
    let mut out = Vec::with_capacity(ids.len());
    for p in ids {
        let v = column_value(entity, p)?;
        if v.is_null() && p.auto_increment {
            out.push((p, None));
        } else if v.is_null() {
            return Err(Error::state(
                StateErrorKind::NotTracked,
                format!(
                    "{} has no value for id column '{}'",
                    entity.entity_name(),
                    p.column
                ),
            ));
        } else {
            out.push((p, Some(v)));
        }
    }
    Ok(out)
}

/// Write a generated key into the entity's (single) id field.
pub(crate) fn assign_generated_id(
    registry: &Registry,
    entity: &mut dyn Entity,
    generated: Option<i64>,
) -> Result<Vec<Value>> {
    let ids = registry.id_properties(entity.entity_name());
    if let (Some(key), [id]) = (generated, ids.as_slice()) {
        let current = entity.get_value(&id.name).unwrap_or_default();
        if current.is_null() {
            entity.set_value(&id.name, Value::BigInt(key))?;
        }
    }
    id_values(registry, entity)
}

/// Compile `plan` with `spec`, run it, and map the rows polymorphically.
pub(crate) fn load(
    ctx: &mut StrategyContext<'_>,
    entity: &str,
    plan: &SelectPlan,
    spec: &QuerySpec,
) -> Result<Vec<Box<dyn Entity>>> {
    let compiled = plan.compile(spec);
    tracing::debug!(
        entity = entity,
        sql = %compiled.sql,
        params = compiled.params.len(),
        "Executing polymorphic SELECT"
    );
    let rows = ctx
        .conn
        .query(&compiled.sql, &compiled.params)
        .map_err(|e| wrap(entity, Operation::Select, &compiled.sql, e))?;
    let root = ctx.registry.root_of(entity)?.name.clone();
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let loaded = mapper::map_row(ctx.registry, &root, plan, row)
            .map_err(|e| wrap(entity, Operation::Select, &compiled.sql, e))?;
        tracing::trace!(entity = loaded.entity_name(), "Mapped row");
        out.push(loaded);
    }
    Ok(out)
}

// ============================================================================
// Many-to-many link rows
// ============================================================================

/// Insert link rows for every initialized owning many-to-many collection.
pub(crate) fn insert_links(
    ctx: &mut StrategyContext<'_>,
    entity: &dyn Entity,
    owner_id: &[Value],
) -> Result<()> {
    let name = entity.entity_name();
    let registry = ctx.registry;
    for assoc in registry.associations(name) {
        if assoc.kind != RelationshipKind::ManyToMany || !assoc.owning {
            continue;
        }
        let Some(link) = &assoc.link_table else {
            continue;
        };
        let Some(items) = entity.collection(&assoc.name).and_then(|c| c.loaded()) else {
            continue;
        };
        let owner = single_id(name, owner_id)?;
        for item in items {
            let target_id = persisted_id(registry, item.as_ref(), "link")?;
            let target = single_id(item.entity_name(), &target_id)?;
            let builder = InsertBuilder::new(&link.table)
                .value(&link.owner_column, owner.clone())
                .value(&link.target_column, target);
            run_insert(ctx, name, &builder)?;
        }
        tracing::debug!(
            entity = name,
            association = %assoc.name,
            links = items.len(),
            "Inserted link rows"
        );
    }
    Ok(())
}

/// Replace the link rows of initialized owning collections.
pub(crate) fn update_links(
    ctx: &mut StrategyContext<'_>,
    entity: &dyn Entity,
    owner_id: &[Value],
) -> Result<()> {
    let name = entity.entity_name();
    let registry = ctx.registry;
    for assoc in registry.associations(name) {
        if assoc.kind != RelationshipKind::ManyToMany || !assoc.owning {
            continue;
        }
        let (Some(link), Some(true)) = (
            &assoc.link_table,
            entity.collection(&assoc.name).map(LazyCollection::is_initialized),
        ) else {
            continue;
        };
        let owner = single_id(name, owner_id)?;
        let builder = DeleteBuilder::new(&link.table).key(&link.owner_column, owner);
        run_delete(ctx, name, &builder)?;
    }
    insert_links(ctx, entity, owner_id)
}

/// Remove every link row referencing the entity, from either side.
pub(crate) fn delete_links(
    ctx: &mut StrategyContext<'_>,
    entity: &dyn Entity,
    owner_id: &[Value],
) -> Result<()> {
    let name = entity.entity_name();
    let registry = ctx.registry;
    for assoc in registry.associations(name) {
        if assoc.kind != RelationshipKind::ManyToMany {
            continue;
        }
        if let Some(link) = &assoc.link_table {
            let owner = single_id(name, owner_id)?;
            let builder = DeleteBuilder::new(&link.table).key(&link.owner_column, owner);
            run_delete(ctx, name, &builder)?;
        }
    }
    Ok(())
}

fn single_id(entity: &str, id: &[Value]) -> Result<Value> {
    match id {
        [v] => Ok(v.clone()),
        _ => Err(Error::mapping(
            entity,
            "many-to-many links need exactly one id column",
        )),
    }
}

/// `"alias"."column"`.
pub(crate) fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(alias), quote_ident(column))
}

/// `"table" AS "alias"`.
pub(crate) fn aliased(table: &str, alias: &str) -> String {
    format!("{} AS {}", quote_ident(table), quote_ident(alias))
}

/// Output columns for reading `entity`: its chain, then columns declared
/// anywhere below it. Branches are added by the caller.
pub(crate) fn plan_outputs(registry: &Registry, entity: &str) -> SelectPlan {
    let mut plan = SelectPlan::default();
    for p in registry.columns(entity) {
        plan.push_output(&p.declared_by, &p.name, &p.column, p.sql_type, p.association);
    }
    for meta in registry.subtree(entity).into_iter().skip(1) {
        for p in meta.own_columns() {
            plan.push_output(&p.declared_by, &p.name, &p.column, p.sql_type, p.association);
        }
    }
    plan
}

/// Point the plan outputs for `columns` at `alias` in the given branch.
pub(crate) fn bind_columns<'p>(
    plan: &mut SelectPlan,
    branch: usize,
    alias: &str,
    columns: impl IntoIterator<Item = &'p PropertyMetadata>,
) {
    for p in columns {
        if let Some(i) = plan.output_index(&p.declared_by, &p.name) {
            plan.branches[branch].exprs[i] = Some(qualified(alias, &p.column));
        }
    }
}
