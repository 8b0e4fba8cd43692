//! SQLite DDL rendering.
//!
//! SQLite has no `ALTER TABLE ... ADD CONSTRAINT`, so foreign keys are
//! emitted inline in `CREATE TABLE`. Constraint DDL is limited to indexes.

use strata_core::{ReferentialAction, SqlType, quote_ident};

use crate::metadata::{ForeignKeyRef, LinkTableMetadata, PropertyMetadata};

/// Name of the shared identity sequence table.
pub const SEQUENCE_TABLE: &str = "strata_sequence";

/// A column in a table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub auto_increment: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            unique: false,
            default: None,
            auto_increment: false,
        }
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub fn from_property(p: &PropertyMetadata) -> Self {
        Self {
            name: p.column.clone(),
            sql_type: p.sql_type,
            nullable: p.nullable,
            unique: p.unique,
            default: p.default.clone(),
            auto_increment: p.auto_increment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
    pub on_delete: Option<ReferentialAction>,
}

impl ForeignKeyDef {
    pub fn single(column: impl Into<String>, target: &ForeignKeyRef) -> Self {
        Self {
            columns: vec![column.into()],
            ref_table: target.table.clone(),
            ref_columns: vec![target.column.clone()],
            on_delete: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A table to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a column unless one of the same name exists.
    pub fn push_column(&mut self, column: ColumnDef) {
        if !self.columns.iter().any(|c| c.name == column.name) {
            self.columns.push(column);
        }
    }

    /// Add a mapped property: column, inline FK and index.
    pub fn push_property(&mut self, p: &PropertyMetadata) {
        self.push_column(ColumnDef::from_property(p));
        if let Some(target) = &p.references {
            let mut fk = ForeignKeyDef::single(&p.column, target);
            fk.on_delete = p.on_delete;
            self.foreign_keys.push(fk);
        }
        if let Some(index) = &p.index {
            self.indexes.push(IndexDef {
                name: index.clone(),
                columns: vec![p.column.clone()],
                unique: false,
            });
        }
    }
}

/// `CREATE TABLE` statement for a table.
pub fn create_table_sql(table: &TableDef) -> String {
    let single_auto_pk = match table.primary_key.as_slice() {
        [pk] => table
            .columns
            .iter()
            .any(|c| &c.name == pk && c.auto_increment && c.sql_type.is_integer()),
        _ => false,
    };

    let mut parts: Vec<String> = Vec::with_capacity(table.columns.len() + 2);
    for col in &table.columns {
        let mut def = format!("{} ", quote_ident(&col.name));
        let is_pk_col = table.primary_key.len() == 1 && table.primary_key[0] == col.name;
        if single_auto_pk && is_pk_col {
            // Only this exact form aliases the rowid.
            def.push_str("INTEGER PRIMARY KEY AUTOINCREMENT");
        } else {
            def.push_str(&col.sql_type.sql_name());
            if is_pk_col {
                def.push_str(" PRIMARY KEY");
            }
            if !col.nullable && !is_pk_col {
                def.push_str(" NOT NULL");
            }
            if col.unique {
                def.push_str(" UNIQUE");
            }
            if let Some(default) = &col.default {
                def.push_str(" DEFAULT ");
                def.push_str(default);
            }
        }
        parts.push(def);
    }

    if table.primary_key.len() > 1 {
        let cols: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }

    for fk in &table.foreign_keys {
        let cols: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
        let refs: Vec<String> = fk.ref_columns.iter().map(|c| quote_ident(c)).collect();
        let mut def = format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            cols.join(", "),
            quote_ident(&fk.ref_table),
            refs.join(", ")
        );
        if let Some(action) = fk.on_delete {
            def.push_str(" ON DELETE ");
            def.push_str(action.as_sql());
        }
        parts.push(def);
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&table.name),
        parts.join(", ")
    )
}

/// `CREATE INDEX` statement for one index.
pub fn create_index_sql(table: &str, index: &IndexDef) -> String {
    let cols: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {}({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table),
        cols.join(", ")
    )
}

/// Table DDL and constraint DDL for one table.
pub fn generate(table: &TableDef) -> (Vec<String>, Vec<String>) {
    tracing::debug!(table = %table.name, columns = table.columns.len(), "Generating DDL");
    let indexes = table
        .indexes
        .iter()
        .map(|idx| create_index_sql(&table.name, idx))
        .collect();
    (vec![create_table_sql(table)], indexes)
}

/// Definition of a many-to-many association table.
pub fn link_table(link: &LinkTableMetadata) -> TableDef {
    let mut table = TableDef::new(&link.table);
    table.push_column(ColumnDef::new(&link.owner_column, link.owner_type));
    table.push_column(ColumnDef::new(&link.target_column, link.target_type));
    table.primary_key = vec![link.owner_column.clone(), link.target_column.clone()];
    for (column, target) in [
        (&link.owner_column, &link.owner_ref),
        (&link.target_column, &link.target_ref),
    ] {
        if let Some(target) = target {
            let mut fk = ForeignKeyDef::single(column, target);
            fk.on_delete = Some(ReferentialAction::Cascade);
            table.foreign_keys.push(fk);
        }
    }
    table
}

/// Definition of the shared identity sequence table.
pub fn sequence_table() -> TableDef {
    let mut table = TableDef::new(SEQUENCE_TABLE);
    table.push_column(ColumnDef::new("sequence_name", SqlType::VarChar(255)));
    table.push_column(ColumnDef::new("next_val", SqlType::BigInt));
    table.primary_key = vec!["sequence_name".to_string()];
    table
}
