//! Statement builders for INSERT, UPDATE and DELETE.
//!
//! Builders work on physical table and column names; the inheritance
//! strategies decide which table receives which columns. Placeholders are
//! positional `?`.

use strata_core::{Connection, Result, Value, quote_ident};

/// A column-value pair for SET and VALUES lists.
#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    column: String,
    value: Value,
}

fn where_clause(keys: &[SetClause], params: &mut Vec<Value>) -> String {
    let parts: Vec<String> = keys
        .iter()
        .map(|k| {
            params.push(k.value.clone());
            format!("{} = ?", quote_ident(&k.column))
        })
        .collect();
    parts.join(" AND ")
}

/// INSERT statement builder.
///
/// ```
/// use strata_query::InsertBuilder;
///
/// let (sql, params) = InsertBuilder::new("hero")
///     .value("name", "Deadpond")
///     .value("age", 30)
///     .build();
/// assert_eq!(sql, "INSERT INTO \"hero\" (\"name\", \"age\") VALUES (?, ?)");
/// assert_eq!(params.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    values: Vec<SetClause>,
    generated: Option<String>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
            generated: None,
        }
    }

    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.push(SetClause {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Report the generated key of `column` from [`execute`](Self::execute).
    pub fn generated(mut self, column: &str) -> Self {
        self.generated = Some(column.to_string());
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        if self.values.is_empty() {
            return (
                format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.table)),
                Vec::new(),
            );
        }
        let columns: Vec<String> = self.values.iter().map(|v| quote_ident(&v.column)).collect();
        let placeholders = vec!["?"; self.values.len()].join(", ");
        let params = self.values.iter().map(|v| v.value.clone()).collect();
        (
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&self.table),
                columns.join(", "),
                placeholders
            ),
            params,
        )
    }

    /// Execute the INSERT and return the generated key, if requested.
    pub fn execute(&self, conn: &mut dyn Connection) -> Result<Option<i64>> {
        let (sql, params) = self.build();
        tracing::debug!(sql = %sql, params = params.len(), "Executing INSERT");
        conn.insert(&sql, self.generated.as_deref(), &params)
    }
}

/// UPDATE statement builder, keyed by column equality.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<SetClause>,
    keys: Vec<SetClause>,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Set a column to a specific value.
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.sets.push(SetClause {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Add a `column = value` match to the WHERE clause.
    pub fn key(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.keys.push(SetClause {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    /// Build the UPDATE SQL, or an empty string when nothing is set.
    pub fn build(&self) -> (String, Vec<Value>) {
        if self.sets.is_empty() {
            return (String::new(), Vec::new());
        }
        let mut params = Vec::new();
        let sets: Vec<String> = self
            .sets
            .iter()
            .map(|s| {
                params.push(s.value.clone());
                format!("{} = ?", quote_ident(&s.column))
            })
            .collect();
        let mut sql = format!("UPDATE {} SET {}", quote_ident(&self.table), sets.join(", "));
        if !self.keys.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause(&self.keys, &mut params));
        }
        (sql, params)
    }

    /// Execute the UPDATE and return rows affected.
    pub fn execute(&self, conn: &mut dyn Connection) -> Result<u64> {
        let (sql, params) = self.build();
        if sql.is_empty() {
            return Ok(0);
        }
        tracing::debug!(sql = %sql, params = params.len(), "Executing UPDATE");
        conn.execute(&sql, &params)
    }
}

/// DELETE statement builder, keyed by column equality.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    keys: Vec<SetClause>,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            keys: Vec::new(),
        }
    }

    pub fn key(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.keys.push(SetClause {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote_ident(&self.table));
        if !self.keys.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause(&self.keys, &mut params));
        }
        (sql, params)
    }

    /// Execute the DELETE and return rows affected.
    pub fn execute(&self, conn: &mut dyn Connection) -> Result<u64> {
        let (sql, params) = self.build();
        tracing::debug!(sql = %sql, params = params.len(), "Executing DELETE");
        conn.execute(&sql, &params)
    }
}
