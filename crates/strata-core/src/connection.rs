//! Statement execution interface.
//!
//! The ORM core never manages raw connections. Everything it needs from a
//! database driver goes through [`Connection`]. Execution is blocking: every
//! call returns only after the statement has finished.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A parameterized statement executor.
///
/// Placeholders are positional `?`. The trait is object-safe so that the
/// inheritance strategies can work against `&mut dyn Connection`.
pub trait Connection {
    /// Run a query and collect every row.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a query and return the first row, if any.
    fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Run a statement and return the number of rows affected.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run an INSERT and return the generated key of `id_column`, if the
    /// database produced one.
    fn insert(&mut self, sql: &str, id_column: Option<&str>, params: &[Value])
    -> Result<Option<i64>>;

    /// Toggle driver-level autocommit.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Release the underlying resources. Later calls fail.
    fn close(&mut self) -> Result<()>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        (**self).query_one(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn insert(
        &mut self,
        sql: &str,
        id_column: Option<&str>,
        params: &[Value],
    ) -> Result<Option<i64>> {
        (**self).insert(sql, id_column, params)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        (**self).set_auto_commit(enabled)
    }

    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
