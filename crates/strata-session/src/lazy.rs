//! Deferred collection loads backed by the owning session.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use strata_core::{CollectionLoader, Connection, Entity, Error, LazyCollection, Result, StateErrorKind, Value};
use strata_schema::Registry;

use crate::session::SessionInner;

/// Loads one collection association of one entity through its session.
///
/// Holds only a weak reference: once the session is closed or dropped the
/// load fails with an illegal-state error instead of touching a released
/// connection.
pub(crate) struct SessionLoader<C: Connection + 'static> {
    session: Weak<RefCell<SessionInner<C>>>,
    owner: &'static str,
    owner_id: Vec<Value>,
    association: String,
}

impl<C: Connection + 'static> CollectionLoader for SessionLoader<C> {
    fn load(&self) -> Result<Vec<Box<dyn Entity>>> {
        let state = self.session.upgrade().ok_or_else(|| {
            Error::state(
                StateErrorKind::SessionClosed,
                format!(
                    "cannot load {}.{}: the session has been dropped",
                    self.owner, self.association
                ),
            )
        })?;
        let mut inner = state.try_borrow_mut().map_err(|_| {
            Error::state(
                StateErrorKind::Reentrant,
                format!(
                    "cannot load {}.{} while the session is in use",
                    self.owner, self.association
                ),
            )
        })?;
        inner.before_read()?;
        let meta = inner.metamodel();
        let assoc = meta
            .registry()
            .association(self.owner, &self.association)
            .ok_or_else(|| Error::unknown_field(self.owner, &self.association))?;
        inner.load_association(self.owner, &self.owner_id, assoc)
    }
}

impl<C: Connection + 'static> fmt::Debug for SessionLoader<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLoader")
            .field("owner", &self.owner)
            .field("owner_id", &self.owner_id)
            .field("association", &self.association)
            .field("session_alive", &(self.session.strong_count() > 0))
            .finish()
    }
}

/// Replace every collection association of `entity` with a deferred proxy.
///
/// Entities without a complete id are left alone; there is nothing to load
/// them by.
pub(crate) fn install<C: Connection + 'static>(
    session: &Weak<RefCell<SessionInner<C>>>,
    registry: &Registry,
    entity: &mut dyn Entity,
) -> Result<()> {
    let owner = entity.entity_name();
    let owner_id = strata_inheritance::id_values(registry, entity)?;
    if owner_id.is_empty() || owner_id.iter().any(Value::is_null) {
        return Ok(());
    }
    for assoc in registry.associations(owner) {
        if !assoc.is_collection() {
            continue;
        }
        if let Some(collection) = entity.collection_mut(&assoc.name) {
            *collection = LazyCollection::deferred(Rc::new(SessionLoader {
                session: session.clone(),
                owner,
                owner_id: owner_id.clone(),
                association: assoc.name.clone(),
            }));
        }
    }
    Ok(())
}
