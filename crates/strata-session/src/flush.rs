//! Insert ordering for the pending-new set.
//!
//! A row holding a foreign key can only be inserted once the row it points
//! at exists. Ordering happens in two passes:
//!
//! 1. **Types.** Kahn's algorithm over the entity types in the batch. A type
//!    waits for every other batch type its associations (own or inherited)
//!    point at, as long as that type is not yet ordered. References within
//!    one hierarchy are left to the instance pass.
//! 2. **Instances.** A depth-first walk, in type order, that places each
//!    instance after the pending instances it references.

use std::collections::HashMap;

use strata_core::{EntityHandle, Error, RelationshipKind, Result, StateErrorKind};
use strata_schema::{AssociationMetadata, Registry};

/// One entity waiting for insertion.
#[derive(Debug, Clone)]
pub(crate) struct PendingInsert<'a> {
    pub handle: EntityHandle,
    pub entity: &'a str,
    /// Pending instances this one references.
    pub depends_on: Vec<EntityHandle>,
}

fn orders_inserts(assoc: &AssociationMetadata) -> bool {
    assoc.is_insert_dependency() || (assoc.owning && assoc.kind == RelationshipKind::ManyToMany)
}

/// Batch types in dependency order, ties broken by first save.
pub(crate) fn type_order<'a>(registry: &Registry, pending: &[PendingInsert<'a>]) -> Vec<&'a str> {
    let mut types: Vec<&'a str> = Vec::new();
    for p in pending {
        if !types.contains(&p.entity) {
            types.push(p.entity);
        }
    }

    let same_hierarchy = |a: &str, b: &str| match (registry.root_of(a), registry.root_of(b)) {
        (Ok(x), Ok(y)) => x.name == y.name,
        _ => false,
    };
    let deps: HashMap<&str, Vec<&str>> = types
        .iter()
        .map(|&t| {
            let targets: Vec<&str> = types
                .iter()
                .copied()
                .filter(|&u| u != t && !same_hierarchy(t, u))
                .filter(|&u| {
                    registry
                        .associations(t)
                        .into_iter()
                        .filter(|a| orders_inserts(a))
                        .any(|a| registry.is_subclass_of(u, &a.target))
                })
                .collect();
            (t, targets)
        })
        .collect();

    let mut ordered: Vec<&'a str> = Vec::with_capacity(types.len());
    let mut remaining = types;
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|t| {
            deps.get(t)
                .is_none_or(|d| d.iter().all(|u| ordered.contains(u)))
        });
        let index = ready.unwrap_or_else(|| {
            tracing::warn!(
                types = ?remaining,
                "Type-level reference cycle; falling back to save order"
            );
            0
        });
        ordered.push(remaining.remove(index));
    }
    ordered
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Handles of `pending` in an order that satisfies every reference.
pub(crate) fn insert_order(registry: &Registry, pending: &[PendingInsert<'_>]) -> Result<Vec<EntityHandle>> {
    let index: HashMap<EntityHandle, usize> = pending
        .iter()
        .enumerate()
        .map(|(i, p)| (p.handle, i))
        .collect();
    let mut marks = vec![Mark::Unvisited; pending.len()];
    let mut out = Vec::with_capacity(pending.len());

    for t in type_order(registry, pending) {
        for (i, p) in pending.iter().enumerate() {
            if p.entity == t {
                visit(i, pending, &index, &mut marks, &mut out)?;
            }
        }
    }
    tracing::trace!(order = ?out, "Insert order");
    Ok(out)
}

fn visit(
    i: usize,
    pending: &[PendingInsert<'_>],
    index: &HashMap<EntityHandle, usize>,
    marks: &mut [Mark],
    out: &mut Vec<EntityHandle>,
) -> Result<()> {
    match marks[i] {
        Mark::Done => return Ok(()),
        Mark::OnStack => {
            return Err(Error::state(
                StateErrorKind::CyclicReference,
                format!(
                    "pending {} (handle {}) is part of a reference cycle",
                    pending[i].entity,
                    pending[i].handle.index()
                ),
            ));
        }
        Mark::Unvisited => {}
    }
    marks[i] = Mark::OnStack;
    for dep in &pending[i].depends_on {
        // Anything outside the batch is already in the database.
        if let Some(&j) = index.get(dep) {
            visit(j, pending, index, marks, out)?;
        }
    }
    marks[i] = Mark::Done;
    out.push(pending[i].handle);
    Ok(())
}
