//! Polymorphic row mapping.
//!
//! Each row of a compiled [`SelectPlan`] carries the concrete class in the
//! `__entity` column, either as a class name or as a discriminator value.
//! The mapper instantiates that class through its registered factory and
//! fills the fields its chain declares.

use strata_core::{Entity, Error, Result, Row, Value, convert};
use strata_query::{ENTITY_COLUMN, EntityTag, SelectPlan};
use strata_schema::Registry;

/// Concrete class named by a row.
pub fn concrete_entity<'r>(
    registry: &'r Registry,
    root: &str,
    plan: &SelectPlan,
    row: &Row,
) -> Result<&'r str> {
    let tag = match row.get_by_name(ENTITY_COLUMN) {
        Some(Value::Text(s)) => s.clone(),
        Some(other) if !other.is_null() => convert::to_storage_text(other).unwrap_or_default(),
        _ => {
            return Err(Error::mapping(
                root,
                "row carries no concrete class tag",
            ));
        }
    };

    let discriminated = plan
        .branches
        .iter()
        .any(|b| matches!(b.tag, EntityTag::Discriminator(_)));
    let name = if discriminated {
        let map = registry
            .discriminator(root)
            .ok_or_else(|| Error::mapping(root, "hierarchy has no discriminator"))?;
        map.entity_for(&tag).ok_or_else(|| {
            Error::mapping(root, format!("unknown discriminator value '{tag}'"))
        })?
    } else {
        tag.as_str()
    };

    let meta = registry.entity(name)?;
    if meta.is_abstract {
        return Err(Error::mapping(
            name,
            "row maps to an abstract class",
        ));
    }
    Ok(meta.name.as_str())
}

/// Build the concrete instance for one row.
pub fn map_row(
    registry: &Registry,
    root: &str,
    plan: &SelectPlan,
    row: &Row,
) -> Result<Box<dyn Entity>> {
    let name = concrete_entity(registry, root, plan, row)?;
    let meta = registry.entity(name)?;
    let factory = meta
        .factory
        .ok_or_else(|| Error::mapping(name, "no factory registered"))?;
    let mut entity = factory();

    for output in &plan.outputs {
        if !registry.is_subclass_of(name, &output.entity) {
            continue;
        }
        let value = convert::read_column(row, &output.alias, output.sql_type)
            .map_err(|e| Error::mapping(name, format!("column '{}': {e}", output.column)))?;
        if output.association {
            entity
                .reference_mut(&output.field)
                .ok_or_else(|| Error::unknown_field(name, &output.field))?
                .set_id(value);
        } else {
            entity.set_value(&output.field, value)?;
        }
    }
    Ok(entity)
}
