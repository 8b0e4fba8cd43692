//! Metadata registry.
//!
//! [`Registry::build`] turns declared [`EntityDescriptor`]s into validated
//! [`EntityMetadata`] in three phases:
//!
//! 1. columns, ids and inheritance topology per class;
//! 2. association resolution (needs every target to exist), synthesizing
//!    foreign-key columns and link tables;
//! 3. validation of the merged per-strategy view.
//!
//! After construction the registry is read-only. Hierarchy-dependent data
//! (chains, merged columns, mapped tables) is computed by view methods.

use std::collections::{HashMap, HashSet};

use strata_core::{
    EntityDescriptor, Error, InheritanceStrategy, RelationshipInfo, RelationshipKind, Result,
    SqlType, is_valid_identifier, to_snake_case,
};

use crate::metadata::{
    AssociationMetadata, DiscriminatorMap, EntityMetadata, ForeignKeyRef, InheritanceMetadata,
    LinkTableMetadata, PropertyMetadata,
};

/// Discriminator column used when a single-table root names none.
pub const DEFAULT_DISCRIMINATOR_COLUMN: &str = "dtype";

/// Validated metadata for every mapped class.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: HashMap<String, EntityMetadata>,
    /// Registration order, parents before children.
    order: Vec<String>,
    /// Discriminator maps of single-table hierarchies, keyed by root.
    discriminators: HashMap<String, DiscriminatorMap>,
}

impl Registry {
    /// Build the registry from declared descriptors.
    ///
    /// Ancestors are reached through [`EntityDescriptor::parent`], so only
    /// leaf classes need to be passed.
    #[tracing::instrument(level = "debug", skip(descriptors))]
    pub fn build(descriptors: Vec<EntityDescriptor>) -> Result<Self> {
        let descriptors = close_over_ancestors(descriptors);
        let mut builder = Builder::default();
        builder.build_entities(&descriptors)?;
        builder.build_ids()?;
        builder.build_discriminators(&descriptors)?;
        builder.resolve_owning_associations(&descriptors)?;
        builder.resolve_remaining_associations(&descriptors)?;

        let registry = Registry {
            entities: builder.entities,
            order: builder.order,
            discriminators: builder.discriminators,
        };
        registry.validate_columns()?;

        tracing::info!(
            entities = registry.order.len(),
            hierarchies = registry.roots().count(),
            "Metadata registry built"
        );
        Ok(registry)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get(&self, name: &str) -> Option<&EntityMetadata> {
        self.entities.get(name)
    }

    /// Like [`get`](Self::get) but an unknown name is a mapping error.
    pub fn entity(&self, name: &str) -> Result<&EntityMetadata> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::mapping(name, "entity is not mapped"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Every class, parents before children.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.order.iter().filter_map(|n| self.entities.get(n))
    }

    pub fn roots(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities().filter(|e| e.is_root())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // ========================================================================
    // Hierarchy views
    // ========================================================================

    pub fn root_of(&self, name: &str) -> Result<&EntityMetadata> {
        let meta = self.entity(name)?;
        self.entity(&meta.inheritance.root)
    }

    pub fn parent_of(&self, name: &str) -> Option<&EntityMetadata> {
        self.get(name)
            .and_then(|m| m.inheritance.parent.as_deref())
            .and_then(|p| self.get(p))
    }

    /// Classes from the root down to `name`, inclusive.
    pub fn chain(&self, name: &str) -> Vec<&EntityMetadata> {
        let mut chain = Vec::new();
        let mut current = self.get(name);
        while let Some(meta) = current {
            chain.push(meta);
            current = meta.inheritance.parent.as_deref().and_then(|p| self.get(p));
        }
        chain.reverse();
        chain
    }

    /// `name` and all its descendants, pre-order.
    pub fn subtree(&self, name: &str) -> Vec<&EntityMetadata> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(n) = stack.pop() {
            if let Some(meta) = self.get(n) {
                out.push(meta);
                for child in meta.inheritance.children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Concrete classes in the subtree of `name`.
    pub fn concrete_subtree(&self, name: &str) -> Vec<&EntityMetadata> {
        self.subtree(name)
            .into_iter()
            .filter(|m| !m.is_abstract)
            .collect()
    }

    pub fn is_subclass_of(&self, name: &str, ancestor: &str) -> bool {
        self.chain(name).iter().any(|m| m.name == ancestor)
    }

    /// Closest strict ancestor that is concrete.
    pub fn nearest_concrete_ancestor(&self, name: &str) -> Option<&EntityMetadata> {
        let mut current = self.parent_of(name);
        while let Some(meta) = current {
            if !meta.is_abstract {
                return Some(meta);
            }
            current = self.parent_of(&meta.name);
        }
        None
    }

    /// Closest concrete descendants: concrete children, or the concrete
    /// descendants of abstract children.
    pub fn nearest_concrete_descendants(&self, name: &str) -> Vec<&EntityMetadata> {
        let mut out = Vec::new();
        let Some(meta) = self.get(name) else {
            return out;
        };
        for child in &meta.inheritance.children {
            if let Some(c) = self.get(child) {
                if c.is_abstract {
                    out.extend(self.nearest_concrete_descendants(&c.name));
                } else {
                    out.push(c);
                }
            }
        }
        out
    }

    // ========================================================================
    // Column views
    // ========================================================================

    /// Identifier columns of `name` (declared by one class in its chain).
    pub fn id_properties(&self, name: &str) -> Vec<&PropertyMetadata> {
        self.chain(name)
            .into_iter()
            .find(|m| !m.id_properties.is_empty())
            .map(|m| m.id_properties.iter().collect())
            .unwrap_or_default()
    }

    /// Every column visible to `name`, root first, ids first.
    pub fn columns(&self, name: &str) -> Vec<&PropertyMetadata> {
        let chain = self.chain(name);
        let mut cols: Vec<&PropertyMetadata> =
            chain.iter().flat_map(|m| m.id_properties.iter()).collect();
        cols.extend(chain.iter().flat_map(|m| m.own_data_columns()));
        cols
    }

    /// Non-id columns visible to `name`.
    pub fn data_columns(&self, name: &str) -> Vec<&PropertyMetadata> {
        self.chain(name)
            .into_iter()
            .flat_map(|m| m.own_data_columns())
            .collect()
    }

    /// Resolve a field of `name` by logical name, falling back to column name.
    pub fn property(&self, name: &str, field: &str) -> Option<&PropertyMetadata> {
        let cols = self.columns(name);
        cols.iter()
            .find(|p| p.name == field)
            .or_else(|| cols.iter().find(|p| p.column == field))
            .copied()
    }

    /// Resolve a field anywhere in the chain or subtree of `name`.
    pub fn hierarchy_property(&self, name: &str, field: &str) -> Option<&PropertyMetadata> {
        if let Some(p) = self.property(name, field) {
            return Some(p);
        }
        self.subtree(name)
            .into_iter()
            .skip(1)
            .find_map(|m| {
                m.own_columns()
                    .find(|p| p.name == field)
                    .or_else(|| m.own_columns().find(|p| p.column == field))
            })
    }

    pub fn association(&self, name: &str, field: &str) -> Option<&AssociationMetadata> {
        self.chain(name)
            .into_iter()
            .rev()
            .find_map(|m| m.own_association(field))
    }

    /// Every association visible to `name`.
    pub fn associations(&self, name: &str) -> Vec<&AssociationMetadata> {
        self.chain(name)
            .into_iter()
            .flat_map(|m| m.associations.iter())
            .collect()
    }

    /// Columns of the shared single-table layout rooted at `root`.
    ///
    /// Columns declared below the root come back as new values with
    /// nullability widened; a column shared by siblings appears once.
    pub fn single_table_columns(&self, root: &str) -> Vec<PropertyMetadata> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for meta in self.subtree(root) {
            for p in meta.own_columns() {
                if !seen.insert(p.column.clone()) {
                    continue;
                }
                if meta.is_root() {
                    out.push(p.clone());
                } else {
                    out.push(p.widened());
                }
            }
        }
        out
    }

    /// Owning many-to-many link tables, one per association table.
    pub fn link_tables(&self) -> Vec<&LinkTableMetadata> {
        let mut seen = HashSet::new();
        self.entities()
            .flat_map(|m| m.associations.iter())
            .filter(|a| a.owning && a.kind == RelationshipKind::ManyToMany)
            .filter_map(|a| a.link_table.as_ref())
            .filter(|l| seen.insert(l.table.clone()))
            .collect()
    }

    pub fn discriminator(&self, root: &str) -> Option<&DiscriminatorMap> {
        self.discriminators.get(root)
    }

    pub fn strategy_of(&self, name: &str) -> InheritanceStrategy {
        self.get(name)
            .map_or(InheritanceStrategy::None, EntityMetadata::strategy)
    }

    /// Table that physically holds the columns `name` declares, if any.
    pub fn mapped_table(&self, name: &str) -> Option<&str> {
        let meta = self.get(name)?;
        match meta.strategy() {
            InheritanceStrategy::Single => self.get(&meta.inheritance.root).map(|r| r.table.as_str()),
            InheritanceStrategy::None => Some(meta.table.as_str()),
            InheritanceStrategy::Joined
            | InheritanceStrategy::Concrete
            | InheritanceStrategy::ConcreteForeignKey => {
                (!meta.is_abstract).then_some(meta.table.as_str())
            }
        }
    }

    /// Table every instance of `name` (subclasses included) has a row in,
    /// which a foreign key to `name` can reference.
    pub fn identity_table(&self, name: &str) -> Option<&str> {
        identity_table(&self.entities, name)
    }

    // ========================================================================
    // Phase 3
    // ========================================================================

    fn validate_columns(&self) -> Result<()> {
        for meta in self.entities() {
            let mut fields = HashSet::new();
            let mut columns = HashSet::new();
            for p in self.columns(&meta.name) {
                if !fields.insert(p.name.as_str()) {
                    return Err(Error::mapping(
                        &meta.name,
                        format!("field '{}' is declared more than once in the hierarchy", p.name),
                    ));
                }
                if !columns.insert(p.column.as_str()) {
                    return Err(Error::mapping(
                        &meta.name,
                        format!("column '{}' is mapped more than once", p.column),
                    ));
                }
            }
            for a in &meta.associations {
                if !fields.insert(a.name.as_str()) && !a.owning_fk_named(&a.name) {
                    return Err(Error::mapping(
                        &meta.name,
                        format!("association '{}' collides with a column field", a.name),
                    ));
                }
            }
        }

        for root in self.roots() {
            match root.strategy() {
                InheritanceStrategy::Single => self.validate_shared_columns(root, true)?,
                InheritanceStrategy::Concrete => self.validate_shared_columns(root, false)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Same-named columns across the hierarchy must agree in type: they share
    /// one physical column (single-table) or one union output (per-concrete).
    fn validate_shared_columns(&self, root: &EntityMetadata, check_discriminator: bool) -> Result<()> {
        let mut types: HashMap<&str, (&str, SqlType)> = HashMap::new();
        for meta in self.subtree(&root.name) {
            for p in meta.own_columns() {
                if let Some((owner, ty)) = types.get(p.column.as_str()) {
                    if !ty.compatible_with(&p.sql_type) {
                        return Err(Error::mapping(
                            &meta.name,
                            format!(
                                "column '{}' conflicts in type with the one declared by {} ({} vs {})",
                                p.column,
                                owner,
                                p.sql_type.sql_name(),
                                ty.sql_name()
                            ),
                        ));
                    }
                } else {
                    types.insert(p.column.as_str(), (meta.name.as_str(), p.sql_type));
                }
            }
        }
        if check_discriminator {
            if let Some(disc) = self.discriminator(&root.name) {
                if types.contains_key(disc.column.as_str()) {
                    return Err(Error::mapping(
                        &root.name,
                        format!(
                            "discriminator column '{}' collides with a mapped column",
                            disc.column
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl AssociationMetadata {
    /// Owning single-valued associations share their name with the
    /// synthesized foreign-key field.
    fn owning_fk_named(&self, field: &str) -> bool {
        self.is_insert_dependency() && self.name == field
    }
}

// ============================================================================
// Construction
// ============================================================================

fn close_over_ancestors(descriptors: Vec<EntityDescriptor>) -> Vec<EntityDescriptor> {
    let mut by_name: HashMap<&'static str, EntityDescriptor> = HashMap::new();
    let mut pending: Vec<EntityDescriptor> = descriptors;
    let mut first_seen: Vec<&'static str> = Vec::new();
    while let Some(d) = pending.pop() {
        if by_name.contains_key(d.name) {
            continue;
        }
        if let Some(parent) = d.parent {
            pending.push(parent());
        }
        first_seen.push(d.name);
        by_name.insert(d.name, d);
    }

    // Parents before children, otherwise stable by name.
    first_seen.sort_unstable();
    let mut ordered = Vec::with_capacity(first_seen.len());
    let mut placed: HashSet<&'static str> = HashSet::new();
    fn place(
        name: &'static str,
        by_name: &HashMap<&'static str, EntityDescriptor>,
        placed: &mut HashSet<&'static str>,
        ordered: &mut Vec<EntityDescriptor>,
    ) {
        if placed.contains(name) {
            return;
        }
        let Some(d) = by_name.get(name) else { return };
        placed.insert(name);
        if let Some(parent) = d.parent {
            place(parent().name, by_name, placed, ordered);
        }
        ordered.push(d.clone());
    }
    for name in first_seen {
        place(name, &by_name, &mut placed, &mut ordered);
    }
    ordered
}

fn check_identifier(entity: &str, what: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::mapping(
            entity,
            format!("invalid {what} identifier '{name}'"),
        ))
    }
}

fn identity_table<'a>(entities: &'a HashMap<String, EntityMetadata>, name: &str) -> Option<&'a str> {
    let meta = entities.get(name)?;
    match meta.strategy() {
        InheritanceStrategy::Single => entities
            .get(&meta.inheritance.root)
            .map(|r| r.table.as_str()),
        InheritanceStrategy::None => Some(meta.table.as_str()),
        InheritanceStrategy::Joined | InheritanceStrategy::ConcreteForeignKey => {
            (!meta.is_abstract).then_some(meta.table.as_str())
        }
        InheritanceStrategy::Concrete => {
            (!meta.is_abstract && meta.inheritance.children.is_empty())
                .then_some(meta.table.as_str())
        }
    }
}

#[derive(Default)]
struct Builder {
    entities: HashMap<String, EntityMetadata>,
    order: Vec<String>,
    discriminators: HashMap<String, DiscriminatorMap>,
}

impl Builder {
    fn get(&self, name: &str) -> Result<&EntityMetadata> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::mapping(name, "entity is not mapped"))
    }

    fn chain(&self, name: &str) -> Vec<&EntityMetadata> {
        let mut chain = Vec::new();
        let mut current = self.entities.get(name);
        while let Some(meta) = current {
            chain.push(meta);
            current = meta
                .inheritance
                .parent
                .as_deref()
                .and_then(|p| self.entities.get(p));
        }
        chain.reverse();
        chain
    }

    fn single_id(&self, entity: &str, context: &str) -> Result<PropertyMetadata> {
        let ids: Vec<&PropertyMetadata> = self
            .chain(entity)
            .into_iter()
            .flat_map(|m| m.id_properties.iter())
            .collect();
        match ids.as_slice() {
            [id] => Ok((*id).clone()),
            _ => Err(Error::mapping(
                context,
                format!("{entity} must have exactly one id column to be an association target"),
            )),
        }
    }

    fn fk_ref(&self, entity: &str, id: &PropertyMetadata) -> Option<ForeignKeyRef> {
        let table = identity_table(&self.entities, entity);
        if table.is_none() {
            tracing::warn!(
                target_entity = entity,
                "Foreign key omitted: target has no single identity table"
            );
        }
        table.map(|t| ForeignKeyRef {
            table: t.to_string(),
            column: id.column.clone(),
        })
    }

    // Phase 1: columns and topology.
    fn build_entities(&mut self, descriptors: &[EntityDescriptor]) -> Result<()> {
        let by_name: HashMap<&str, &EntityDescriptor> =
            descriptors.iter().map(|d| (d.name, d)).collect();

        for d in descriptors {
            let table = d
                .table
                .map_or_else(|| to_snake_case(d.name), str::to_string);
            check_identifier(d.name, "table", &table)?;

            let mut ids = Vec::new();
            let mut props = Vec::new();
            let mut fks = Vec::new();
            for f in &d.fields {
                check_identifier(d.name, "column", f.column_name)?;
                let p = PropertyMetadata::from_field(f, d.name);
                if p.primary_key {
                    ids.push(p);
                } else if p.references.is_some() {
                    fks.push(p);
                } else {
                    props.push(p);
                }
            }

            let parent = d.parent.map(|p| p().name.to_string());
            let mut root = d.name;
            let mut cursor = d;
            while let Some(pf) = cursor.parent {
                let pname = pf().name;
                match by_name.get(pname) {
                    Some(&pd) => {
                        root = pd.name;
                        cursor = pd;
                    }
                    None => break,
                }
            }
            let root_desc = by_name.get(root).copied().unwrap_or(d);
            let strategy = root_desc.inheritance.strategy;
            if parent.is_some() {
                if d.inheritance.strategy.is_inheritance()
                    && d.inheritance.strategy != strategy
                {
                    return Err(Error::mapping(
                        d.name,
                        format!(
                            "declares {} inheritance but its root {} uses {}",
                            d.inheritance.strategy.name(),
                            root,
                            strategy.name()
                        ),
                    ));
                }
                if let Some(col) = d.inheritance.discriminator_column {
                    if Some(col) != root_desc.inheritance.discriminator_column {
                        return Err(Error::mapping(
                            d.name,
                            "only the hierarchy root may declare the discriminator column",
                        ));
                    }
                }
            }

            let meta = EntityMetadata {
                name: d.name.to_string(),
                table,
                is_abstract: d.is_abstract,
                id_properties: ids,
                properties: props,
                foreign_keys: fks,
                associations: Vec::new(),
                inheritance: InheritanceMetadata {
                    strategy,
                    root: root.to_string(),
                    parent,
                    children: Vec::new(),
                    is_abstract: d.is_abstract,
                    discriminator_value: None,
                },
                factory: if d.is_abstract { None } else { d.factory },
            };
            if !d.is_abstract && d.factory.is_none() {
                return Err(Error::mapping(d.name, "concrete entity has no factory"));
            }
            self.order.push(meta.name.clone());
            self.entities.insert(meta.name.clone(), meta);
        }

        let links: Vec<(String, String)> = self
            .order
            .iter()
            .filter_map(|n| {
                let m = self.entities.get(n)?;
                m.inheritance.parent.clone().map(|p| (p, n.clone()))
            })
            .collect();
        for (parent, child) in links {
            if let Some(p) = self.entities.get_mut(&parent) {
                p.inheritance.children.push(child);
            }
        }

        for name in &self.order {
            let meta = self.get(name)?;
            if meta.is_root()
                && !meta.inheritance.children.is_empty()
                && !meta.strategy().is_inheritance()
            {
                return Err(Error::mapping(
                    name,
                    "hierarchy root with subclasses declares no inheritance strategy",
                ));
            }
        }
        Ok(())
    }

    fn build_ids(&self) -> Result<()> {
        for name in &self.order {
            let chain = self.chain(name);
            let declaring: Vec<&EntityMetadata> = chain
                .iter()
                .copied()
                .filter(|m| !m.id_properties.is_empty())
                .collect();
            let owner = match declaring.as_slice() {
                [] => {
                    return Err(Error::mapping(
                        name,
                        "no id columns declared or inherited",
                    ));
                }
                [owner] => *owner,
                [first, .., last] => {
                    return Err(Error::mapping(
                        &last.name,
                        format!("redeclares id columns already declared by {}", first.name),
                    ));
                }
            };
            let meta = self.get(name)?;
            match meta.strategy() {
                InheritanceStrategy::Single | InheritanceStrategy::Joined if !owner.is_root() => {
                    return Err(Error::mapping(
                        &owner.name,
                        format!(
                            "{} inheritance requires the id columns on the hierarchy root",
                            meta.strategy().name()
                        ),
                    ));
                }
                InheritanceStrategy::Concrete => {
                    let ok = matches!(
                        owner.id_properties.as_slice(),
                        [id] if id.auto_increment && id.sql_type.is_integer()
                    );
                    if !ok {
                        return Err(Error::mapping(
                            &owner.name,
                            "table-per-concrete-class requires exactly one auto-increment integer id",
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn build_discriminators(&mut self, descriptors: &[EntityDescriptor]) -> Result<()> {
        for d in descriptors {
            let Some(meta) = self.entities.get(d.name) else {
                continue;
            };
            if !meta.strategy().uses_discriminator() {
                continue;
            }
            let root = meta.inheritance.root.clone();
            if !self.discriminators.contains_key(&root) {
                let root_desc = descriptors.iter().find(|r| r.name == root);
                let column = root_desc
                    .and_then(|r| r.inheritance.discriminator_column)
                    .unwrap_or(DEFAULT_DISCRIMINATOR_COLUMN);
                check_identifier(&root, "discriminator column", column)?;
                self.discriminators
                    .insert(root.clone(), DiscriminatorMap::new(column));
            }
            let value = d.inheritance.discriminator_value.unwrap_or(d.name);
            if let Some(map) = self.discriminators.get_mut(&root) {
                if let Some(existing) = map.insert(d.name, value) {
                    return Err(Error::mapping(
                        d.name,
                        format!("discriminator value '{value}' is already used by {existing}"),
                    ));
                }
            }
            if let Some(m) = self.entities.get_mut(d.name) {
                m.inheritance.discriminator_value = Some(value.to_string());
            }
        }
        Ok(())
    }

    /// Find a relationship declared on `entity` or an ancestor.
    fn declared<'d>(
        &self,
        descriptors: &'d [EntityDescriptor],
        entity: &str,
        field: &str,
    ) -> Option<(&'d EntityDescriptor, &'d RelationshipInfo)> {
        self.chain(entity).into_iter().rev().find_map(|m| {
            let d = descriptors.iter().find(|d| d.name == m.name)?;
            d.relationships
                .iter()
                .find(|r| r.name == field)
                .map(|r| (d, r))
        })
    }

    /// Match `rel` against its declared inverse, if it names one.
    fn inverse<'d>(
        &self,
        descriptors: &'d [EntityDescriptor],
        owner: &str,
        rel: &RelationshipInfo,
    ) -> Result<Option<&'d RelationshipInfo>> {
        if !self.entities.contains_key(rel.target) {
            return Err(Error::mapping(
                owner,
                format!(
                    "association '{}' targets unknown entity '{}'",
                    rel.name, rel.target
                ),
            ));
        }
        let Some(back) = rel.back_populates else {
            return Ok(None);
        };
        let mismatch = |why: &str| {
            Error::mapping(
                owner,
                format!(
                    "association '{}' cannot be matched against inverse {}.{}: {}",
                    rel.name, rel.target, back, why
                ),
            )
        };
        let Some((_, inv)) = self.declared(descriptors, rel.target, back) else {
            return Err(mismatch("no such association"));
        };
        if inv.kind != rel.kind.inverse() {
            return Err(mismatch("relationship kinds do not pair up"));
        }
        if inv.back_populates.is_some_and(|b| b != rel.name) {
            return Err(mismatch("inverse points at a different field"));
        }
        Ok(Some(inv))
    }

    fn owns_one_to_one(rel: &RelationshipInfo, inverse: Option<&RelationshipInfo>) -> Result<bool> {
        if rel.local_key.is_some() {
            return Ok(true);
        }
        if rel.remote_key.is_some() {
            return Ok(false);
        }
        match inverse {
            None => Ok(true),
            Some(inv) if inv.local_key.is_some() => Ok(false),
            Some(_) => Err(Error::mapping(
                rel.target,
                format!(
                    "bidirectional one-to-one '{}' must declare local_key on its owning side",
                    rel.name
                ),
            )),
        }
    }

    // Phase 2a: foreign keys of owning single-valued associations.
    fn resolve_owning_associations(&mut self, descriptors: &[EntityDescriptor]) -> Result<()> {
        for d in descriptors {
            for rel in &d.relationships {
                let inverse = self.inverse(descriptors, d.name, rel)?;
                let owning = match rel.kind {
                    RelationshipKind::ManyToOne => true,
                    RelationshipKind::OneToOne => Self::owns_one_to_one(rel, inverse)?,
                    _ => false,
                };
                if !owning {
                    continue;
                }
                let local = rel
                    .local_key
                    .map_or_else(|| format!("{}_id", rel.name), str::to_string);
                check_identifier(d.name, "column", &local)?;
                let target_id = self.single_id(rel.target, d.name)?;
                let fk = PropertyMetadata {
                    name: rel.name.to_string(),
                    column: local.clone(),
                    sql_type: target_id.sql_type,
                    nullable: rel.optional,
                    unique: rel.kind == RelationshipKind::OneToOne,
                    index: None,
                    auto_increment: false,
                    default: None,
                    primary_key: false,
                    references: self.fk_ref(rel.target, &target_id),
                    on_delete: None,
                    association: true,
                    declared_by: d.name.to_string(),
                };
                let assoc = AssociationMetadata {
                    name: rel.name.to_string(),
                    kind: rel.kind,
                    owner: d.name.to_string(),
                    target: rel.target.to_string(),
                    inverse: rel.back_populates.map(str::to_string),
                    owning: true,
                    local_column: Some(local),
                    remote_column: None,
                    link_table: None,
                    lazy: rel.lazy,
                };
                if let Some(meta) = self.entities.get_mut(d.name) {
                    meta.foreign_keys.push(fk);
                    meta.associations.push(assoc);
                }
            }
        }
        Ok(())
    }

    // Phase 2b: collections and inverse one-to-one.
    fn resolve_remaining_associations(&mut self, descriptors: &[EntityDescriptor]) -> Result<()> {
        for d in descriptors {
            for rel in &d.relationships {
                let inverse = self.inverse(descriptors, d.name, rel)?;
                let assoc = match rel.kind {
                    RelationshipKind::ManyToOne => continue,
                    RelationshipKind::OneToOne => {
                        if Self::owns_one_to_one(rel, inverse)? {
                            continue;
                        }
                        let remote = self.remote_column(d.name, rel, inverse)?;
                        self.base_association(d.name, rel, Some(remote), None)
                    }
                    RelationshipKind::OneToMany => {
                        let remote = self.remote_column(d.name, rel, inverse)?;
                        self.base_association(d.name, rel, Some(remote), None)
                    }
                    RelationshipKind::ManyToMany => {
                        let (link, owning) = self.link_table(d, rel, inverse)?;
                        let mut a = self.base_association(d.name, rel, None, Some(link));
                        a.owning = owning;
                        a
                    }
                };
                if let Some(meta) = self.entities.get_mut(d.name) {
                    meta.associations.push(assoc);
                }
            }
        }
        Ok(())
    }

    fn base_association(
        &self,
        owner: &str,
        rel: &RelationshipInfo,
        remote_column: Option<String>,
        link_table: Option<LinkTableMetadata>,
    ) -> AssociationMetadata {
        AssociationMetadata {
            name: rel.name.to_string(),
            kind: rel.kind,
            owner: owner.to_string(),
            target: rel.target.to_string(),
            inverse: rel.back_populates.map(str::to_string),
            owning: false,
            local_column: None,
            remote_column,
            link_table,
            lazy: rel.lazy,
        }
    }

    /// FK column on the target table pointing back at `owner`.
    fn remote_column(
        &self,
        owner: &str,
        rel: &RelationshipInfo,
        inverse: Option<&RelationshipInfo>,
    ) -> Result<String> {
        let column = match (rel.remote_key, inverse) {
            (Some(key), _) => key.to_string(),
            (None, Some(inv)) => inv
                .local_key
                .map_or_else(|| format!("{}_id", inv.name), str::to_string),
            (None, None) => {
                return Err(Error::mapping(
                    owner,
                    format!(
                        "association '{}' has no resolvable foreign key: declare remote_key or back_populates",
                        rel.name
                    ),
                ));
            }
        };
        let exists = self
            .chain(rel.target)
            .iter()
            .flat_map(|m| m.own_columns())
            .any(|p| p.column == column);
        if !exists {
            return Err(Error::mapping(
                owner,
                format!(
                    "association '{}' expects foreign key column '{}' on {}",
                    rel.name, column, rel.target
                ),
            ));
        }
        Ok(column)
    }

    fn link_table(
        &self,
        d: &EntityDescriptor,
        rel: &RelationshipInfo,
        inverse: Option<&RelationshipInfo>,
    ) -> Result<(LinkTableMetadata, bool)> {
        let owner_id = self.single_id(d.name, d.name)?;
        let target_id = self.single_id(rel.target, d.name)?;
        let declared_here = rel.link_table;
        let declared_there = inverse.and_then(|i| i.link_table);

        match (declared_here, declared_there, inverse) {
            (Some(_), Some(_), _) => Err(Error::mapping(
                d.name,
                format!(
                    "only one side of many-to-many '{}' may declare the link table",
                    rel.name
                ),
            )),
            (None, None, Some(_)) => Err(Error::mapping(
                d.name,
                format!(
                    "bidirectional many-to-many '{}' declares no link table",
                    rel.name
                ),
            )),
            (Some(info), None, _) => {
                let link = LinkTableMetadata {
                    table: info.table_name.to_string(),
                    owner_column: info.local_column.to_string(),
                    target_column: info.remote_column.to_string(),
                    owner_type: owner_id.sql_type,
                    target_type: target_id.sql_type,
                    owner_ref: self.fk_ref(d.name, &owner_id),
                    target_ref: self.fk_ref(rel.target, &target_id),
                };
                self.check_link(d.name, &link)?;
                Ok((link, true))
            }
            (None, Some(info), _) => {
                // Seen from the inverse side: the declaring entity owns it.
                let owning = LinkTableMetadata {
                    table: info.table_name.to_string(),
                    owner_column: info.local_column.to_string(),
                    target_column: info.remote_column.to_string(),
                    owner_type: target_id.sql_type,
                    target_type: owner_id.sql_type,
                    owner_ref: self.fk_ref(rel.target, &target_id),
                    target_ref: self.fk_ref(d.name, &owner_id),
                };
                Ok((owning.inverted(), false))
            }
            (None, None, None) => {
                let owner_table = &self.get(d.name)?.table;
                let target_table = &self.get(rel.target)?.table;
                let link = LinkTableMetadata {
                    table: format!("{owner_table}_{target_table}"),
                    owner_column: format!("{owner_table}_id"),
                    target_column: format!("{target_table}_id"),
                    owner_type: owner_id.sql_type,
                    target_type: target_id.sql_type,
                    owner_ref: self.fk_ref(d.name, &owner_id),
                    target_ref: self.fk_ref(rel.target, &target_id),
                };
                self.check_link(d.name, &link)?;
                Ok((link, true))
            }
        }
    }

    fn check_link(&self, entity: &str, link: &LinkTableMetadata) -> Result<()> {
        check_identifier(entity, "link table", &link.table)?;
        check_identifier(entity, "column", &link.owner_column)?;
        check_identifier(entity, "column", &link.target_column)?;
        if link.owner_column == link.target_column {
            return Err(Error::mapping(
                entity,
                format!("link table '{}' uses one column for both sides", link.table),
            ));
        }
        Ok(())
    }
}
