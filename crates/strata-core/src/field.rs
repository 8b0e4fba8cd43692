//! Field and inheritance declarations.

use crate::types::SqlType;

/// Referential action for foreign key constraints (ON DELETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// No action - raise error if any references exist.
    #[default]
    NoAction,
    Restrict,
    /// Automatically delete referencing rows.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
}

impl ReferentialAction {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

/// Declared metadata about one mapped scalar field.
///
/// Built with const builder calls:
///
/// ```
/// use strata_core::{FieldInfo, SqlType};
///
/// const ID: FieldInfo = FieldInfo::new("id", "id", SqlType::BigInt)
///     .primary_key(true)
///     .auto_increment(true);
/// assert!(ID.primary_key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Logical field name, as used by accessors and queries.
    pub name: &'static str,
    /// Database column name (may differ from field name).
    pub column_name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
    /// Default value expression (SQL).
    pub default: Option<&'static str>,
    /// Foreign key reference (`table.column`).
    pub foreign_key: Option<&'static str>,
    /// Referential action for ON DELETE (only valid with foreign_key).
    pub on_delete: Option<ReferentialAction>,
    /// Index name if indexed.
    pub index: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
            foreign_key: None,
            on_delete: None,
            index: None,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub const fn default(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    /// Set foreign key reference (`table.column`).
    pub const fn foreign_key(mut self, reference: &'static str) -> Self {
        self.foreign_key = Some(reference);
        self
    }

    /// Set ON DELETE action for foreign key.
    ///
    /// This is only meaningful when `foreign_key` is also set.
    pub const fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub const fn index(mut self, name: &'static str) -> Self {
        self.index = Some(name);
        self
    }

    /// Split a `table.column` foreign key reference.
    pub fn foreign_key_target(&self) -> Option<(&'static str, &'static str)> {
        self.foreign_key.and_then(|fk| fk.split_once('.'))
    }
}

/// Table inheritance strategy.
///
/// Determines how an entity hierarchy is mapped to database tables. The
/// strategy is declared on the hierarchy root and shared by every subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritanceStrategy {
    /// No inheritance (default). Entity is standalone.
    #[default]
    None,
    /// Single table inheritance: the whole hierarchy shares the root's table;
    /// a discriminator column identifies the concrete class of each row.
    Single,
    /// Joined table inheritance: each class has its own table holding only
    /// the columns it declares; a child's primary key is also a foreign key
    /// to its parent's primary key.
    Joined,
    /// Table per concrete class: each concrete class has a complete table
    /// with every inherited column. Ids come from one shared sequence.
    Concrete,
    /// Concrete tables chained by foreign keys: abstract ancestors' columns
    /// are copied into the nearest concrete descendant, and each concrete
    /// table references its nearest concrete ancestor's table.
    ConcreteForeignKey,
}

impl InheritanceStrategy {
    /// Check if this strategy uses a discriminator column.
    #[must_use]
    pub const fn uses_discriminator(&self) -> bool {
        matches!(self, Self::Single)
    }

    /// Check if this is any form of inheritance (not None).
    #[must_use]
    pub const fn is_inheritance(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Single => "single-table",
            Self::Joined => "joined",
            Self::Concrete => "table-per-concrete-class",
            Self::ConcreteForeignKey => "concrete-table-with-fk",
        }
    }
}

/// Inheritance declaration for an entity.
///
/// Roots set the strategy (and, for single-table, the discriminator column).
/// Subclasses leave the strategy as `None` to inherit it and may set their
/// discriminator value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InheritanceInfo {
    pub strategy: InheritanceStrategy,
    /// Discriminator column name (single-table roots). Defaults to `dtype`.
    pub discriminator_column: Option<&'static str>,
    /// Discriminator value for this class. Defaults to the entity name.
    pub discriminator_value: Option<&'static str>,
}

impl InheritanceInfo {
    pub const fn none() -> Self {
        Self {
            strategy: InheritanceStrategy::None,
            discriminator_column: None,
            discriminator_value: None,
        }
    }

    pub const fn single_table() -> Self {
        Self {
            strategy: InheritanceStrategy::Single,
            ..Self::none()
        }
    }

    pub const fn joined_table() -> Self {
        Self {
            strategy: InheritanceStrategy::Joined,
            ..Self::none()
        }
    }

    pub const fn concrete_table() -> Self {
        Self {
            strategy: InheritanceStrategy::Concrete,
            ..Self::none()
        }
    }

    pub const fn concrete_foreign_key() -> Self {
        Self {
            strategy: InheritanceStrategy::ConcreteForeignKey,
            ..Self::none()
        }
    }

    /// Set the discriminator column name (builder pattern, for roots).
    pub const fn with_discriminator_column(mut self, column: &'static str) -> Self {
        self.discriminator_column = Some(column);
        self
    }

    /// Set the discriminator value (builder pattern).
    pub const fn with_discriminator_value(mut self, value: &'static str) -> Self {
        self.discriminator_value = Some(value);
        self
    }
}
