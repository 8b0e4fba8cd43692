//! Resolved mapping metadata.
//!
//! These types are produced by [`Registry::build`](crate::Registry::build) and
//! are immutable afterwards. Anything that depends on the rest of the
//! hierarchy (merged columns, mapped tables) is a registry view, not a field.

use std::collections::HashMap;

use strata_core::{
    EntityFactory, FieldInfo, InheritanceStrategy, ReferentialAction, RelationshipKind, SqlType,
};

/// Target of a foreign-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

/// One mapped scalar column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMetadata {
    /// Logical field name used by accessors and queries.
    pub name: String,
    pub column: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub unique: bool,
    pub index: Option<String>,
    pub auto_increment: bool,
    pub default: Option<String>,
    pub primary_key: bool,
    pub references: Option<ForeignKeyRef>,
    pub on_delete: Option<ReferentialAction>,
    /// The value lives in a [`Reference`](strata_core::Reference) on the entity
    /// rather than in a scalar field.
    pub association: bool,
    /// Entity that declares this column.
    pub declared_by: String,
}

impl PropertyMetadata {
    pub(crate) fn from_field(field: &FieldInfo, declared_by: &str) -> Self {
        Self {
            name: field.name.to_string(),
            column: field.column_name.to_string(),
            sql_type: field.sql_type,
            nullable: field.nullable,
            unique: field.unique,
            index: field.index.map(str::to_string),
            auto_increment: field.auto_increment,
            default: field.default.map(str::to_string),
            primary_key: field.primary_key,
            references: field.foreign_key_target().map(|(table, column)| ForeignKeyRef {
                table: table.to_string(),
                column: column.to_string(),
            }),
            on_delete: field.on_delete,
            association: false,
            declared_by: declared_by.to_string(),
        }
    }

    /// Same column with nullability widened.
    #[must_use]
    pub fn widened(&self) -> Self {
        Self {
            nullable: true,
            ..self.clone()
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        self.references.is_some() || self.association
    }
}

/// Association table of a many-to-many association, seen from one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTableMetadata {
    pub table: String,
    /// Column pointing at the owning side of this association.
    pub owner_column: String,
    /// Column pointing at the target side.
    pub target_column: String,
    pub owner_type: SqlType,
    pub target_type: SqlType,
    pub owner_ref: Option<ForeignKeyRef>,
    pub target_ref: Option<ForeignKeyRef>,
}

impl LinkTableMetadata {
    /// The same table seen from the other side.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            table: self.table.clone(),
            owner_column: self.target_column.clone(),
            target_column: self.owner_column.clone(),
            owner_type: self.target_type,
            target_type: self.owner_type,
            owner_ref: self.target_ref.clone(),
            target_ref: self.owner_ref.clone(),
        }
    }
}

/// One resolved association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationMetadata {
    pub name: String,
    pub kind: RelationshipKind,
    /// Declaring entity.
    pub owner: String,
    pub target: String,
    pub inverse: Option<String>,
    /// This side holds the foreign key (or writes the link rows).
    pub owning: bool,
    /// FK column on the owner's table (many-to-one, owning one-to-one).
    pub local_column: Option<String>,
    /// FK column on the target's table (one-to-many, inverse one-to-one).
    pub remote_column: Option<String>,
    pub link_table: Option<LinkTableMetadata>,
    pub lazy: bool,
}

impl AssociationMetadata {
    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// Whether the owner row cannot be inserted before the target row.
    pub fn is_insert_dependency(&self) -> bool {
        self.owning
            && matches!(
                self.kind,
                RelationshipKind::ManyToOne | RelationshipKind::OneToOne
            )
    }
}

/// Two-way class/discriminator-value lookup shared by a single-table hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscriminatorMap {
    pub column: String,
    by_entity: HashMap<String, String>,
    by_value: HashMap<String, String>,
}

impl DiscriminatorMap {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ..Self::default()
        }
    }

    /// Record a pair; returns the entity already holding `value`, if any.
    pub(crate) fn insert(&mut self, entity: &str, value: &str) -> Option<String> {
        if let Some(existing) = self.by_value.get(value) {
            return Some(existing.clone());
        }
        self.by_value.insert(value.to_string(), entity.to_string());
        self.by_entity.insert(entity.to_string(), value.to_string());
        None
    }

    pub fn value_of(&self, entity: &str) -> Option<&str> {
        self.by_entity.get(entity).map(String::as_str)
    }

    pub fn entity_for(&self, value: &str) -> Option<&str> {
        self.by_value.get(value).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }
}

/// Inheritance linkage of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritanceMetadata {
    pub strategy: InheritanceStrategy,
    pub root: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub is_abstract: bool,
    /// Single-table only: this class's discriminator value.
    pub discriminator_value: Option<String>,
}

impl InheritanceMetadata {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Metadata of one mapped class.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub name: String,
    pub table: String,
    pub is_abstract: bool,
    /// Identifier columns declared by this class.
    pub id_properties: Vec<PropertyMetadata>,
    /// Regular columns declared by this class.
    pub properties: Vec<PropertyMetadata>,
    /// Foreign-key columns declared or synthesized for this class.
    pub foreign_keys: Vec<PropertyMetadata>,
    pub associations: Vec<AssociationMetadata>,
    pub inheritance: InheritanceMetadata,
    pub factory: Option<EntityFactory>,
}

impl EntityMetadata {
    /// Own columns: ids, then regular columns, then foreign keys.
    pub fn own_columns(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.id_properties
            .iter()
            .chain(self.properties.iter())
            .chain(self.foreign_keys.iter())
    }

    /// Own non-id columns.
    pub fn own_data_columns(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.properties.iter().chain(self.foreign_keys.iter())
    }

    pub fn own_property(&self, field: &str) -> Option<&PropertyMetadata> {
        self.own_columns().find(|p| p.name == field)
    }

    pub fn own_association(&self, field: &str) -> Option<&AssociationMetadata> {
        self.associations.iter().find(|a| a.name == field)
    }

    pub fn strategy(&self) -> InheritanceStrategy {
        self.inheritance.strategy
    }

    pub fn is_root(&self) -> bool {
        self.inheritance.is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminator_map_rejects_duplicates() {
        let mut map = DiscriminatorMap::new("dtype");
        assert_eq!(map.insert("Manager", "M"), None);
        assert_eq!(map.insert("Director", "M"), Some("Manager".to_string()));
        assert_eq!(map.value_of("Manager"), Some("M"));
        assert_eq!(map.entity_for("M"), Some("Manager"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_property_from_field() {
        let field = FieldInfo::new("team", "team_id", SqlType::BigInt)
            .nullable(true)
            .foreign_key("team.id");
        let p = PropertyMetadata::from_field(&field, "Hero");
        assert_eq!(p.column, "team_id");
        assert_eq!(
            p.references,
            Some(ForeignKeyRef {
                table: "team".into(),
                column: "id".into()
            })
        );
        assert!(p.is_foreign_key());
        assert_eq!(p.declared_by, "Hero");
    }

    #[test]
    fn test_widened_is_a_new_value() {
        let p = PropertyMetadata::from_field(&FieldInfo::new("x", "x", SqlType::Text), "A");
        let w = p.widened();
        assert!(!p.nullable);
        assert!(w.nullable);
    }

    #[test]
    fn test_link_table_inverted() {
        let link = LinkTableMetadata {
            table: "hero_powers".into(),
            owner_column: "hero_id".into(),
            target_column: "power_id".into(),
            owner_type: SqlType::BigInt,
            target_type: SqlType::Integer,
            owner_ref: None,
            target_ref: None,
        };
        let inv = link.inverted();
        assert_eq!(inv.owner_column, "power_id");
        assert_eq!(inv.target_column, "hero_id");
        assert_eq!(inv.owner_type, SqlType::Integer);
    }
}
