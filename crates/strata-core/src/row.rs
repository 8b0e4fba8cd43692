//! Result rows.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// One row returned by [`Connection::query`](crate::Connection::query).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row. Column names are shared between all rows of a result set.
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Whether the named column holds SQL NULL. Missing columns count as NULL.
    pub fn is_null(&self, name: &str) -> bool {
        self.get_by_name(name).is_none_or(Value::is_null)
    }

    /// Typed access by column index.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| Error::Custom(format!("column index {index} out of range")))?;
        T::from_value(value.clone())
    }

    /// Typed access by column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get_by_name(name)
            .ok_or_else(|| Error::Custom(format!("no column named '{name}' in row")))?;
        T::from_value(value.clone())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
