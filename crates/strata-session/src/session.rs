//! The session: identity map, unit of work and transaction control.

use std::cell::{Ref, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use strata_core::{
    Connection, ConversionError, Entity, EntityHandle, Error, Model, RelationshipKind, Result,
    StateErrorKind, Value, downcast, quote_ident,
};
use strata_inheritance::{StrategyContext, id_values};
use strata_query::{Condition, QuerySpec};
use strata_schema::AssociationMetadata;

use crate::factory::Metamodel;
use crate::finder::Finder;
use crate::flush::{PendingInsert, insert_order};
use crate::identity::{EntitySet, ObjectKey};
use crate::lazy;
use crate::unit_of_work::{ObjectState, PendingLink, Tracked, UnitOfWork, snapshot};
use crate::{SessionConfig, SessionDebugInfo};

/// The central unit-of-work manager.
///
/// A session owns one connection, an identity map keyed by root entity and
/// id, and the new/dirty/removed sets flushed on commit. Entities go in and
/// come out as copies; the session keeps its own tracked instance of each.
///
/// Sessions are single-threaded. Lazy collections of loaded entities keep a
/// weak link back to the session and fail once it is closed or dropped.
pub struct Session<C: Connection + 'static> {
    inner: Rc<RefCell<SessionInner<C>>>,
}

pub(crate) struct SessionInner<C: Connection + 'static> {
    conn: C,
    meta: Arc<Metamodel>,
    config: SessionConfig,
    uow: UnitOfWork,
    open: bool,
    in_transaction: bool,
    relationship_loads: usize,
    this: Weak<RefCell<SessionInner<C>>>,
}

impl<C: Connection + 'static> Session<C> {
    /// Create a session over an existing connection.
    pub fn new(conn: C, meta: Arc<Metamodel>) -> Self {
        Self::with_config(conn, meta, SessionConfig::default())
    }

    /// Create a session with custom configuration.
    pub fn with_config(conn: C, meta: Arc<Metamodel>, config: SessionConfig) -> Self {
        let inner = Rc::new_cyclic(|this| {
            RefCell::new(SessionInner {
                conn,
                meta,
                config,
                uow: UnitOfWork::default(),
                open: true,
                in_transaction: false,
                relationship_loads: 0,
                this: this.clone(),
            })
        });
        Self { inner }
    }

    fn state(&self) -> Result<std::cell::RefMut<'_, SessionInner<C>>> {
        self.inner.try_borrow_mut().map_err(|_| {
            Error::state(
                StateErrorKind::Reentrant,
                "session is already in use by a lazy load",
            )
        })
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> Ref<'_, C> {
        Ref::map(self.inner.borrow(), |inner| &inner.conn)
    }

    #[cfg(test)]
    pub(crate) fn test_connection(&self) -> std::cell::RefMut<'_, C> {
        std::cell::RefMut::map(self.inner.borrow_mut(), |inner| &mut inner.conn)
    }

    pub fn config(&self) -> SessionConfig {
        self.inner.borrow().config.clone()
    }

    pub fn metamodel(&self) -> Arc<Metamodel> {
        self.inner.borrow().metamodel()
    }

    pub fn is_open(&self) -> bool {
        self.inner.borrow().open
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Register an entity for insertion on the next flush.
    ///
    /// Saving an entity whose identity is already tracked replaces the
    /// tracked copy instead; a pending deletion of it is cancelled.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn save(&self, entity: &dyn Entity) -> Result<EntityHandle> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        let meta = inner.metamodel();
        let registry = meta.registry();
        let name = entity.entity_name();
        if registry.entity(name)?.is_abstract {
            return Err(Error::mapping(name, "abstract classes cannot be saved"));
        }

        let key = ObjectKey::of(registry, entity)?;
        if let Some(handle) = key.as_ref().and_then(|k| inner.uow.lookup(k)) {
            let tracked = inner.uow.get_mut(handle)?;
            tracked.entity = entity.clone_entity();
            let state = tracked.state;
            match state {
                ObjectState::Deleted => {
                    inner.uow.get_mut(handle)?.state = ObjectState::Persistent;
                    inner.uow.removed.retain(|h| *h != handle);
                    inner.uow.mark_dirty(handle);
                }
                ObjectState::Persistent => inner.uow.mark_dirty(handle),
                ObjectState::New => {}
            }
            tracing::debug!(entity = name, handle = handle.index(), "Entity already tracked");
            return Ok(handle);
        }

        let handle = inner.uow.track(Tracked {
            entity: entity.clone_entity(),
            state: ObjectState::New,
            snapshot: None,
            key,
        });
        inner.uow.new.push(handle);
        tracing::info!(entity = name, handle = handle.index(), "Saving entity");
        Ok(handle)
    }

    /// Schedule an update of a persistent entity, identified by its id.
    ///
    /// Unchanged entities are skipped. An untracked entity with an id is
    /// adopted and updated.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn update(&self, entity: &dyn Entity) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        let meta = inner.metamodel();
        let key = ObjectKey::of(meta.registry(), entity)?.ok_or_else(|| {
            Error::state(
                StateErrorKind::NotTracked,
                format!("cannot update {} without an id", entity.entity_name()),
            )
        })?;
        match inner.uow.lookup(&key) {
            Some(handle) => inner.update_tracked(handle, entity),
            None => {
                let handle = inner.uow.track(Tracked {
                    entity: entity.clone_entity(),
                    state: ObjectState::Persistent,
                    snapshot: None,
                    key: Some(key),
                });
                inner.uow.mark_dirty(handle);
                Ok(())
            }
        }
    }

    /// Replace the tracked object behind `handle`.
    ///
    /// Works for pending-new entities, which have no id to be found by.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn update_handle(&self, handle: EntityHandle, entity: &dyn Entity) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        inner.update_tracked(handle, entity)
    }

    /// Schedule a deletion, identified by the entity's id.
    ///
    /// A pending-new entity is simply forgotten.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn delete(&self, entity: &dyn Entity) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        let meta = inner.metamodel();
        let key = ObjectKey::of(meta.registry(), entity)?.ok_or_else(|| {
            Error::state(
                StateErrorKind::NotTracked,
                format!("cannot delete {} without an id", entity.entity_name()),
            )
        })?;
        tracing::info!(entity = entity.entity_name(), "Marking entity for deletion");
        match inner.uow.lookup(&key) {
            Some(handle) => inner.delete_tracked(handle),
            None => {
                let handle = inner.uow.track(Tracked {
                    entity: entity.clone_entity(),
                    state: ObjectState::Persistent,
                    snapshot: None,
                    key: Some(key),
                });
                inner.uow.mark_removed(handle)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_handle(&self, handle: EntityHandle) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        inner.delete_tracked(handle)
    }

    /// Point association `field` of `owner` at `target`.
    ///
    /// Either side may still be pending; the foreign key or link row is
    /// written once the target has an id. Single-valued associations set the
    /// owner's reference. One-to-many sets the target's back reference.
    /// Owning many-to-many adds the target to the owner's collection.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn relate(&self, owner: EntityHandle, field: &str, target: EntityHandle) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        let meta = inner.metamodel();
        let registry = meta.registry();
        let owner_name = inner.uow.get(owner)?.entity.entity_name();
        let assoc = registry
            .association(owner_name, field)
            .ok_or_else(|| Error::unknown_field(owner_name, field))?;
        let target_name = inner.uow.get(target)?.entity.entity_name();
        if !registry.is_subclass_of(target_name, &assoc.target) {
            return Err(Error::mapping(
                owner_name,
                format!("association '{field}' expects {}, got {target_name}", assoc.target),
            ));
        }

        match assoc.kind {
            RelationshipKind::ManyToMany if !assoc.owning => {
                let inverse = assoc.inverse.clone().ok_or_else(|| {
                    Error::mapping(owner_name, format!("'{field}' has no owning side to relate through"))
                })?;
                drop(inner);
                self.relate(target, &inverse, owner)
            }
            RelationshipKind::ManyToMany => inner.relate_collection(owner, assoc, target),
            RelationshipKind::OneToMany | RelationshipKind::OneToOne if assoc.local_column.is_none() => {
                let inverse = assoc.inverse.clone().ok_or_else(|| {
                    Error::mapping(owner_name, format!("'{field}' declares no back_populates"))
                })?;
                inner.point_reference(target, &inverse, owner)?;
                if assoc.kind == RelationshipKind::OneToMany {
                    let item = inner.uow.get(target)?.entity.clone_entity();
                    let tracked = inner.uow.get_mut(owner)?;
                    if let Some(collection) = tracked.entity.collection_mut(field) {
                        if collection.is_initialized() {
                            collection.push(item)?;
                        }
                    }
                }
                Ok(())
            }
            _ => inner.point_reference(owner, field, target),
        }
    }

    /// Copy of the tracked entity behind `handle`, generated id included.
    pub fn entity(&self, handle: EntityHandle) -> Result<Box<dyn Entity>> {
        Ok(self.inner.borrow().uow.get(handle)?.entity.clone_entity())
    }

    /// Id values of the tracked entity; NULL until it has been inserted.
    pub fn id_of(&self, handle: EntityHandle) -> Result<Vec<Value>> {
        let inner = self.inner.borrow();
        let tracked = inner.uow.get(handle)?;
        id_values(inner.meta.registry(), tracked.entity.as_ref())
    }

    pub fn state_of(&self, handle: EntityHandle) -> Option<ObjectState> {
        self.inner.borrow().uow.get(handle).ok().map(|t| t.state)
    }

    /// Detach every tracked object and drop all pending work.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.uow.clear();
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Load an entity of type `entity` (or a subclass) by its single id.
    pub fn find(&self, entity: &str, id: impl Into<Value>) -> Result<Option<Box<dyn Entity>>> {
        self.find_by_id(entity, &[id.into()])
    }

    /// Load an entity by id, consulting the identity map first.
    /// Not found is `Ok(None)`.
    #[tracing::instrument(level = "debug", skip(self, id))]
    pub fn find_by_id(&self, entity: &str, id: &[Value]) -> Result<Option<Box<dyn Entity>>> {
        let mut inner = self.state()?;
        inner.before_read()?;
        inner.find_inner(entity, id)
    }

    /// `find` plus a downcast to the exact model type.
    pub fn get<M: Model>(&self, id: impl Into<Value>) -> Result<Option<M>> {
        let Some(found) = self.find(M::ENTITY_NAME, id)? else {
            return Ok(None);
        };
        downcast::<M>(found).map(Some).map_err(|other| {
            Error::Conversion(
                ConversionError::new(M::ENTITY_NAME, other.entity_name())
                    .with_detail("found an instance of a subclass"),
            )
        })
    }

    /// Every instance of `entity` and its subclasses.
    pub fn find_all(&self, entity: &str) -> Result<Vec<Box<dyn Entity>>> {
        self.query(entity, &QuerySpec::new())
    }

    /// Start a fluent query over `entity` and its subclasses.
    pub fn finder(&self, entity: &str) -> Finder<'_, C> {
        Finder::new(self, entity)
    }

    /// Run a query spec, then initialize its fetch paths.
    #[tracing::instrument(level = "debug", skip(self, spec))]
    pub(crate) fn query(&self, entity: &str, spec: &QuerySpec) -> Result<Vec<Box<dyn Entity>>> {
        let results = {
            let mut inner = self.state()?;
            inner.before_read()?;
            let meta = inner.metamodel();
            let strategy = meta.strategy(entity)?;
            let found = {
                let mut ctx = StrategyContext::new(meta.registry(), &mut inner.conn);
                strategy.find_by(&mut ctx, entity, spec)?
            };
            tracing::debug!(entity = entity, count = found.len(), "Query returned");
            inner.adopt_all(found)?
        };
        // Fetching goes through the lazy loaders, so the session must not be borrowed.
        for path in &spec.fetch {
            fetch_path(&results, path)?;
        }
        Ok(results)
    }

    /// Initialize association `relationship` on `entity`.
    ///
    /// Collections are loaded and marked initialized. Single-valued
    /// associations get their target object attached to the reference.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn load(&self, entity: &mut dyn Entity, relationship: &str) -> Result<()> {
        let mut inner = self.state()?;
        inner.before_read()?;
        let meta = inner.metamodel();
        let registry = meta.registry();
        let name = entity.entity_name();
        let assoc = registry
            .association(name, relationship)
            .ok_or_else(|| Error::unknown_field(name, relationship))?;

        if assoc.is_collection() {
            let owner_id = persisted(registry, entity)?;
            let items = inner.load_association(name, &owner_id, assoc)?;
            entity
                .collection_mut(relationship)
                .ok_or_else(|| Error::unknown_field(name, relationship))?
                .set_loaded(items);
            return Ok(());
        }

        let target = if assoc.local_column.is_some() {
            let reference = entity
                .reference(relationship)
                .ok_or_else(|| Error::unknown_field(name, relationship))?;
            match (reference.id().cloned(), reference.handle()) {
                (Some(id), _) => {
                    inner.relationship_loads += 1;
                    inner.find_inner(&assoc.target, &[id])?
                }
                (None, Some(handle)) => Some(inner.uow.get(handle)?.entity.clone_entity()),
                (None, None) => None,
            }
        } else {
            let owner_id = persisted(registry, entity)?;
            inner.load_association(name, &owner_id, assoc)?.into_iter().next()
        };
        if let Some(target) = target {
            let target_id = id_values(registry, target.as_ref())?;
            let reference = entity
                .reference_mut(relationship)
                .ok_or_else(|| Error::unknown_field(name, relationship))?;
            if assoc.local_column.is_none() {
                if let [id] = target_id.as_slice() {
                    reference.set_id(id.clone());
                }
            }
            reference.set_target(target);
        }
        Ok(())
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Begin a transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&self) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        inner.begin()
    }

    /// Write pending changes without committing.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        inner.flush()
    }

    /// Flush inserts, then updates, then deletes, and commit.
    ///
    /// If any statement fails the transaction is rolled back and the pending
    /// sets are discarded.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        inner.commit()
    }

    /// Roll back the transaction and discard pending changes.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.state()?;
        inner.ensure_open()?;
        inner.rollback()
    }

    /// Commit outstanding work and release the connection.
    ///
    /// Later calls fail with an illegal-state error, as do lazy loads of
    /// entities this session produced. Closing twice is a no-op.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&self) -> Result<()> {
        let mut inner = self.state()?;
        if !inner.open {
            return Ok(());
        }
        let committed = inner.commit();
        let closed = inner.conn.close();
        inner.open = false;
        inner.uow.clear();
        tracing::info!("Session closed");
        committed.and(closed)
    }

    // ========================================================================
    // Debug Diagnostics
    // ========================================================================

    /// Get count of objects pending INSERT.
    pub fn pending_new_count(&self) -> usize {
        self.inner.borrow().uow.new.len()
    }

    /// Get count of objects pending DELETE.
    pub fn pending_delete_count(&self) -> usize {
        self.inner.borrow().uow.removed.len()
    }

    /// Get count of dirty objects pending UPDATE.
    pub fn pending_dirty_count(&self) -> usize {
        self.inner.borrow().uow.dirty.len()
    }

    /// Get total tracked object count.
    pub fn tracked_count(&self) -> usize {
        self.inner.borrow().uow.tracked_count()
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.borrow().in_transaction
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        let inner = self.inner.borrow();
        SessionDebugInfo {
            tracked: inner.uow.tracked_count(),
            pending_new: inner.uow.new.len(),
            pending_delete: inner.uow.removed.len(),
            pending_dirty: inner.uow.dirty.len(),
            in_transaction: inner.in_transaction,
            relationship_loads: inner.relationship_loads,
        }
    }
}

impl<C: Connection + 'static> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(_) => f
                .debug_struct("Session")
                .field("state", &self.debug_state())
                .finish(),
            Err(_) => f.write_str("Session(<in use>)"),
        }
    }
}

/// Id values of an entity that must already be persisted.
fn persisted(registry: &strata_schema::Registry, entity: &dyn Entity) -> Result<Vec<Value>> {
    let ids = id_values(registry, entity)?;
    if ids.is_empty() || ids.iter().any(Value::is_null) {
        return Err(Error::state(
            StateErrorKind::NotTracked,
            format!("{} has no id to load associations by", entity.entity_name()),
        ));
    }
    Ok(ids)
}

/// Initialize the collection at dotted `path` on every entity.
fn fetch_path(entities: &[Box<dyn Entity>], path: &str) -> Result<()> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    for entity in entities {
        let collection = entity.collection(head).ok_or_else(|| {
            Error::mapping(
                entity.entity_name(),
                format!("fetch path '{path}' does not name a collection association"),
            )
        })?;
        let items = collection.initialize()?;
        if let Some(rest) = rest {
            fetch_path(items, rest)?;
        }
    }
    Ok(())
}

impl<C: Connection + 'static> SessionInner<C> {
    pub(crate) fn metamodel(&self) -> Arc<Metamodel> {
        Arc::clone(&self.meta)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::state(StateErrorKind::SessionClosed, "session is closed"))
        }
    }

    /// Open check plus auto-flush.
    pub(crate) fn before_read(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.config.auto_flush {
            self.flush()?;
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }
        tracing::info!("Beginning transaction");
        self.conn.begin()?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        tracing::info!("Committing transaction");
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Flush failed; rolling back");
            if let Err(rollback) = self.rollback() {
                tracing::warn!(error = %rollback, "Rollback after failed flush also failed");
            }
            return Err(e);
        }
        if self.in_transaction {
            self.conn.commit()?;
            self.in_transaction = false;
        }
        self.uow.commit();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        tracing::info!("Rolling back transaction");
        let result = if self.in_transaction {
            self.in_transaction = false;
            self.conn.rollback()
        } else {
            Ok(())
        };
        self.uow.rollback();
        result
    }

    fn flush(&mut self) -> Result<()> {
        let (inserts, updates, deletes) = (self.uow.new.len(), self.uow.dirty.len(), self.uow.removed.len());
        if inserts + updates + deletes == 0 {
            return Ok(());
        }
        let start = std::time::Instant::now();
        tracing::info!(inserts, updates, deletes, "Starting flush");

        if self.config.auto_begin && !self.in_transaction {
            self.begin()?;
        }
        self.flush_inserts()?;
        self.flush_updates()?;
        self.flush_deletes()?;

        tracing::info!(elapsed_ms = start.elapsed().as_millis(), "Flush completed");
        Ok(())
    }

    fn flush_inserts(&mut self) -> Result<()> {
        let meta = self.metamodel();
        let registry = meta.registry();

        let mut pending = Vec::with_capacity(self.uow.new.len());
        for &handle in &self.uow.new {
            let entity = self.uow.get(handle)?.entity.as_ref();
            let mut depends_on: Vec<EntityHandle> = registry
                .associations(entity.entity_name())
                .into_iter()
                .filter(|a| a.local_column.is_some())
                .filter_map(|a| entity.reference(&a.name).and_then(|r| r.handle()))
                .collect();
            depends_on.extend(self.uow.links.iter().filter(|l| l.owner == handle).map(|l| l.target));
            pending.push(PendingInsert {
                handle,
                entity: entity.entity_name(),
                depends_on,
            });
        }

        for handle in insert_order(registry, &pending)? {
            self.resolve_references(handle)?;
            self.refresh_links(handle)?;
            let tracked = self.uow.get_mut(handle)?;
            let name = tracked.entity.entity_name();
            let strategy = meta.strategy(name)?;
            let ids = {
                let mut ctx = StrategyContext::new(registry, &mut self.conn);
                strategy.insert(&mut ctx, tracked.entity.as_mut())?
            };
            tracked.state = ObjectState::Persistent;
            tracked.snapshot = snapshot(registry, tracked.entity.as_ref());
            let root = registry.root_of(name)?.name.clone();
            self.uow.set_key(handle, Some(ObjectKey::new(root, &ids)))?;
            self.uow.new.retain(|h| *h != handle);
            self.uow.links.retain(|l| l.owner != handle);
            self.uow.inserted.push(handle);
            tracing::debug!(entity = name, handle = handle.index(), id = ?ids, "Inserted");
        }
        Ok(())
    }

    fn flush_updates(&mut self) -> Result<()> {
        let meta = self.metamodel();
        let registry = meta.registry();
        for handle in self.uow.dirty.clone() {
            self.resolve_references(handle)?;
            self.refresh_links(handle)?;
            let tracked = self.uow.get_mut(handle)?;
            let strategy = meta.strategy(tracked.entity.entity_name())?;
            {
                let mut ctx = StrategyContext::new(registry, &mut self.conn);
                strategy.update(&mut ctx, tracked.entity.as_ref())?;
            }
            tracked.snapshot = snapshot(registry, tracked.entity.as_ref());
            tracing::debug!(entity = tracked.entity.entity_name(), handle = handle.index(), "Updated");
            self.uow.mark_updated(handle);
            self.uow.dirty.retain(|h| *h != handle);
            self.uow.links.retain(|l| l.owner != handle);
        }
        Ok(())
    }

    fn flush_deletes(&mut self) -> Result<()> {
        let meta = self.metamodel();
        let registry = meta.registry();
        for handle in self.uow.removed.clone() {
            let tracked = self.uow.get(handle)?;
            let strategy = meta.strategy(tracked.entity.entity_name())?;
            {
                let mut ctx = StrategyContext::new(registry, &mut self.conn);
                strategy.delete(&mut ctx, tracked.entity.as_ref())?;
            }
            tracing::debug!(entity = tracked.entity.entity_name(), handle = handle.index(), "Deleted");
            self.uow.forget(handle);
        }
        Ok(())
    }

    /// Replace pending-handle references of `handle` with the ids their
    /// targets received.
    fn resolve_references(&mut self, handle: EntityHandle) -> Result<()> {
        let meta = self.metamodel();
        let registry = meta.registry();
        let entity = self.uow.get(handle)?.entity.as_ref();
        let mut resolved = Vec::new();
        for assoc in registry.associations(entity.entity_name()) {
            let Some(target) = entity.reference(&assoc.name).and_then(|r| r.handle()) else {
                continue;
            };
            let target_entity = self.uow.get(target)?.entity.as_ref();
            match id_values(registry, target_entity)?.as_slice() {
                [id] if !id.is_null() => resolved.push((assoc.name.as_str(), id.clone())),
                _ => {
                    return Err(Error::state(
                        StateErrorKind::NotTracked,
                        format!(
                            "{}.{} references a {} that has no id yet",
                            entity.entity_name(),
                            assoc.name,
                            target_entity.entity_name()
                        ),
                    ));
                }
            }
        }
        let entity = self.uow.get_mut(handle)?.entity.as_mut();
        for (field, id) in resolved {
            if let Some(reference) = entity.reference_mut(field) {
                reference.resolve(id);
            }
        }
        Ok(())
    }

    /// Copy related targets (now with ids) into the owner's collection.
    fn refresh_links(&mut self, owner: EntityHandle) -> Result<()> {
        let links: Vec<PendingLink> = self.uow.links.iter().filter(|l| l.owner == owner).cloned().collect();
        for link in links {
            let item = self.uow.get(link.target)?.entity.clone_entity();
            let tracked = self.uow.get_mut(owner)?;
            let owner_name = tracked.entity.entity_name();
            let items = tracked
                .entity
                .collection_mut(&link.field)
                .ok_or_else(|| Error::unknown_field(owner_name, &link.field))?
                .items_mut()?;
            if let Some(slot) = items.get_mut(link.index) {
                *slot = item;
            }
        }
        Ok(())
    }

    fn update_tracked(&mut self, handle: EntityHandle, entity: &dyn Entity) -> Result<()> {
        let meta = self.metamodel();
        let registry = meta.registry();
        let tracked = self.uow.get_mut(handle)?;
        if tracked.entity.entity_name() != entity.entity_name() {
            return Err(Error::state(
                StateErrorKind::NotTracked,
                format!(
                    "handle {} tracks a {}, not a {}",
                    handle.index(),
                    tracked.entity.entity_name(),
                    entity.entity_name()
                ),
            ));
        }
        match tracked.state {
            ObjectState::New => {
                tracked.entity = entity.clone_entity();
                Ok(())
            }
            ObjectState::Deleted => Err(Error::state(
                StateErrorKind::NotTracked,
                format!("{} is scheduled for deletion", entity.entity_name()),
            )),
            ObjectState::Persistent => {
                let current = snapshot(registry, entity);
                let links_touched = registry.associations(entity.entity_name()).into_iter().any(|a| {
                    a.owning
                        && a.kind == RelationshipKind::ManyToMany
                        && entity.collection(&a.name).is_some_and(|c| c.is_initialized())
                });
                let unchanged = current.is_some() && current == tracked.snapshot && !links_touched;
                tracked.entity = entity.clone_entity();
                if unchanged {
                    tracing::trace!(entity = entity.entity_name(), "Unchanged; update skipped");
                } else {
                    self.uow.mark_dirty(handle);
                }
                Ok(())
            }
        }
    }

    fn delete_tracked(&mut self, handle: EntityHandle) -> Result<()> {
        match self.uow.get(handle)?.state {
            ObjectState::New => {
                self.uow.forget(handle);
                Ok(())
            }
            ObjectState::Persistent => self.uow.mark_removed(handle),
            ObjectState::Deleted => Ok(()),
        }
    }

    /// Set reference `field` of `owner` to `target`, by id when it has one.
    fn point_reference(&mut self, owner: EntityHandle, field: &str, target: EntityHandle) -> Result<()> {
        let meta = self.metamodel();
        let target_id = match id_values(meta.registry(), self.uow.get(target)?.entity.as_ref())?.as_slice() {
            [id] if !id.is_null() => Some(id.clone()),
            _ => None,
        };
        let tracked = self.uow.get_mut(owner)?;
        let name = tracked.entity.entity_name();
        let reference = tracked
            .entity
            .reference_mut(field)
            .ok_or_else(|| Error::unknown_field(name, field))?;
        match target_id {
            Some(id) => reference.set_id(id),
            None => reference.set_pending(target),
        }
        if tracked.state == ObjectState::Persistent {
            self.uow.mark_dirty(owner);
        }
        Ok(())
    }

    /// Add `target` to an owning many-to-many collection of `owner`.
    fn relate_collection(
        &mut self,
        owner: EntityHandle,
        assoc: &AssociationMetadata,
        target: EntityHandle,
    ) -> Result<()> {
        let meta = self.metamodel();
        let registry = meta.registry();
        let owner_entity = self.uow.get(owner)?.entity.as_ref();
        let name = owner_entity.entity_name();
        let initialized = owner_entity
            .collection(&assoc.name)
            .ok_or_else(|| Error::unknown_field(name, &assoc.name))?
            .is_initialized();
        if !initialized {
            // Links are rewritten wholesale, so start from what is stored.
            let owner_id = id_values(registry, owner_entity)?;
            let existing = if owner_id.iter().any(Value::is_null) {
                Vec::new()
            } else {
                self.load_association(name, &owner_id, assoc)?
            };
            if let Some(collection) = self.uow.get_mut(owner)?.entity.collection_mut(&assoc.name) {
                collection.set_loaded(existing);
            }
        }

        let target_entity = self.uow.get(target)?.entity.as_ref();
        let target_has_id = id_values(registry, target_entity)?.iter().all(|v| !v.is_null());
        let item = target_entity.clone_entity();
        let tracked = self.uow.get_mut(owner)?;
        let items = tracked
            .entity
            .collection_mut(&assoc.name)
            .ok_or_else(|| Error::unknown_field(name, &assoc.name))?
            .items_mut()?;
        items.push(item);
        let index = items.len() - 1;
        let persistent = tracked.state == ObjectState::Persistent;
        if !target_has_id {
            self.uow.links.push(PendingLink {
                owner,
                field: assoc.name.clone(),
                index,
                target,
            });
        }
        if persistent {
            self.uow.mark_dirty(owner);
        }
        Ok(())
    }

    fn find_inner(&mut self, entity: &str, id: &[Value]) -> Result<Option<Box<dyn Entity>>> {
        let meta = self.metamodel();
        let registry = meta.registry();
        let root = registry.root_of(entity)?;
        if let Some(handle) = self.uow.lookup(&ObjectKey::new(root.name.clone(), id)) {
            let tracked = self.uow.get(handle)?;
            tracing::trace!(entity = entity, handle = handle.index(), "Identity map hit");
            if tracked.state == ObjectState::Deleted
                || !registry.is_subclass_of(tracked.entity.entity_name(), entity)
            {
                return Ok(None);
            }
            return Ok(Some(tracked.entity.clone_entity()));
        }

        let strategy = meta.strategy(entity)?;
        let found = {
            let mut ctx = StrategyContext::new(registry, &mut self.conn);
            strategy.find_by_id(&mut ctx, entity, id)?
        };
        match found {
            Some(loaded) => self.adopt(loaded),
            None => Ok(None),
        }
    }

    /// Track a freshly loaded entity, or return the copy already tracked
    /// under its identity. Entities pending deletion are filtered out.
    fn adopt(&mut self, mut entity: Box<dyn Entity>) -> Result<Option<Box<dyn Entity>>> {
        let meta = self.metamodel();
        let registry = meta.registry();
        let key = ObjectKey::of(registry, entity.as_ref())?;
        if let Some(handle) = key.as_ref().and_then(|k| self.uow.lookup(k)) {
            let tracked = self.uow.get(handle)?;
            if tracked.state == ObjectState::Deleted {
                return Ok(None);
            }
            return Ok(Some(tracked.entity.clone_entity()));
        }
        lazy::install(&self.this, registry, entity.as_mut())?;
        self.uow.track(Tracked {
            entity: entity.clone_entity(),
            state: ObjectState::Persistent,
            snapshot: snapshot(registry, entity.as_ref()),
            key,
        });
        Ok(Some(entity))
    }

    fn adopt_all(&mut self, found: Vec<Box<dyn Entity>>) -> Result<Vec<Box<dyn Entity>>> {
        let meta = self.metamodel();
        let mut set = EntitySet::new();
        for entity in found {
            if let Some(entity) = self.adopt(entity)? {
                set.insert(meta.registry(), entity)?;
            }
        }
        Ok(set.into_vec())
    }

    /// Query the targets of a collection or inverse one-to-one association.
    pub(crate) fn load_association(
        &mut self,
        owner: &str,
        owner_id: &[Value],
        assoc: &AssociationMetadata,
    ) -> Result<Vec<Box<dyn Entity>>> {
        let meta = self.metamodel();
        let registry = meta.registry();
        let id = match owner_id {
            [id] => id.clone(),
            _ => {
                return Err(Error::mapping(
                    owner,
                    "associations can only be loaded for single-column ids",
                ));
            }
        };
        let spec = match (assoc.kind, &assoc.remote_column, &assoc.link_table) {
            (RelationshipKind::OneToMany, Some(remote), _) => QuerySpec::new().filter(Condition::eq(remote.clone(), id)),
            (RelationshipKind::OneToOne, Some(remote), _) => QuerySpec::new()
                .filter(Condition::eq(remote.clone(), id))
                .limit(1),
            (RelationshipKind::ManyToMany, _, Some(link)) => {
                let target_id = registry
                    .id_properties(&assoc.target)
                    .first()
                    .map(|p| p.name.clone())
                    .ok_or_else(|| Error::mapping(&assoc.target, "no id columns"))?;
                QuerySpec::new().filter(Condition::InSubquery {
                    field: target_id,
                    sql: format!(
                        "SELECT {} FROM {} WHERE {} = ?",
                        quote_ident(&link.target_column),
                        quote_ident(&link.table),
                        quote_ident(&link.owner_column)
                    ),
                    params: vec![id],
                })
            }
            _ => {
                return Err(Error::mapping(
                    owner,
                    format!("'{}' is not loaded through a query on its target", assoc.name),
                ));
            }
        };

        self.relationship_loads += 1;
        tracing::debug!(
            owner = owner,
            association = %assoc.name,
            target = %assoc.target,
            "Loading association"
        );
        let strategy = meta.strategy(&assoc.target)?;
        let found = {
            let mut ctx = StrategyContext::new(registry, &mut self.conn);
            strategy.find_by(&mut ctx, &assoc.target, &spec)?
        };
        self.adopt_all(found)
    }
}
