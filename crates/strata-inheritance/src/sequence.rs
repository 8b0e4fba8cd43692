//! Shared identity sequence.
//!
//! Table-per-concrete-class hierarchies cannot rely on per-table
//! auto-increment, since siblings would hand out the same ids. One row per
//! hierarchy in `strata_sequence` tracks the last id issued.

use strata_core::{Connection, Entity, Error, Operation, Result, Value, quote_ident};
use strata_schema::SEQUENCE_TABLE;

use crate::common;
use crate::strategy::StrategyContext;

/// Reserve the next id of the sequence named `name`. The first id is 1.
pub fn next_id(conn: &mut dyn Connection, name: &str) -> Result<i64> {
    let table = quote_ident(SEQUENCE_TABLE);
    let key = [Value::Text(name.to_string())];

    let bumped = conn.execute(
        &format!(
            "UPDATE {table} SET \"next_val\" = \"next_val\" + 1 WHERE \"sequence_name\" = ?"
        ),
        &key,
    )?;
    if bumped == 0 {
        conn.execute(
            &format!("INSERT INTO {table} (\"sequence_name\", \"next_val\") VALUES (?, 1)"),
            &key,
        )?;
    }

    let row = conn
        .query_one(
            &format!("SELECT \"next_val\" FROM {table} WHERE \"sequence_name\" = ?"),
            &key,
        )?
        .ok_or_else(|| Error::Custom(format!("sequence '{name}' has no row")))?;
    let id: i64 = row.get_as(0)?;
    tracing::debug!(sequence = name, id, "Reserved id");
    Ok(id)
}

/// Make sure the sequence named `name` never hands out `id` or anything
/// below it.
pub fn advance_past(conn: &mut dyn Connection, name: &str, id: i64) -> Result<()> {
    let table = quote_ident(SEQUENCE_TABLE);
    let raised = conn.execute(
        &format!(
            "UPDATE {table} SET \"next_val\" = MAX(\"next_val\", ?) WHERE \"sequence_name\" = ?"
        ),
        &[Value::BigInt(id), Value::Text(name.to_string())],
    )?;
    if raised == 0 {
        conn.execute(
            &format!("INSERT INTO {table} (\"sequence_name\", \"next_val\") VALUES (?, ?)"),
            &[Value::Text(name.to_string()), Value::BigInt(id)],
        )?;
    }
    tracing::debug!(sequence = name, id, "Advanced sequence past explicit id");
    Ok(())
}

/// Give `entity` the next id of `name`. An id the entity already carries is
/// kept and the sequence moves past it.
pub(crate) fn assign(
    ctx: &mut StrategyContext<'_>,
    entity: &mut dyn Entity,
    name: &str,
) -> Result<()> {
    let ids = ctx.registry.id_properties(entity.entity_name());
    let [id] = ids.as_slice() else {
        return Ok(());
    };
    let current = entity.get_value(&id.name).unwrap_or_default();
    if !current.is_null() {
        let Some(explicit) = current.as_i64() else {
            return Ok(());
        };
        return advance_past(ctx.conn, name, explicit).map_err(|e| {
            common::wrap(entity.entity_name(), Operation::Insert, SEQUENCE_TABLE, e)
        });
    }
    let next = next_id(ctx.conn, name).map_err(|e| {
        common::wrap(entity.entity_name(), Operation::Insert, SEQUENCE_TABLE, e)
    })?;
    entity.set_value(&id.name, Value::BigInt(next))
}
