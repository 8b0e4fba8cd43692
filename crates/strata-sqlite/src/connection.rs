//! Blocking SQLite connection.

use std::path::Path;
use std::sync::Arc;

use rusqlite::params_from_iter;
use strata_core::{
    Connection, ConnectionError, ConnectionErrorKind, Error, Result, Row, Value,
};

use crate::types::{from_sqlite, query_error, to_sqlite};

/// A single SQLite database handle.
///
/// Foreign keys are enforced on every connection this type opens.
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    path: String,
}

impl SqliteConnection {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = rusqlite::Connection::open(path).map_err(|e| open_error(&e))?;
        Self::configure(conn, path.display().to_string())
    }

    /// A private in-memory database.
    pub fn open_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| open_error(&e))?;
        Self::configure(conn, ":memory:".to_string())
    }

    fn configure(conn: rusqlite::Connection, path: String) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| open_error(&e))?;
        tracing::info!(path = %path, "Opened SQLite database");
        Ok(Self {
            conn: Some(conn),
            path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn handle(&self) -> Result<&rusqlite::Connection> {
        self.conn.as_ref().ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                message: format!("{} is closed", self.path),
            })
        })
    }

    fn run_batch(&self, sql: &str) -> Result<()> {
        tracing::debug!(sql = %sql, params = 0, "Executing transaction control");
        self.handle()?.execute_batch(sql).map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Transaction,
                message: e.to_string(),
            })
        })
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn open_error(err: &rusqlite::Error) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Open,
        message: err.to_string(),
    })
}

impl Connection for SqliteConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing query");
        let conn = self.handle()?;
        let mut stmt = conn.prepare(sql).map_err(|e| query_error(&e, sql))?;
        let columns: Arc<Vec<String>> = Arc::new(
            stmt.column_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        let width = columns.len();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(|e| query_error(&e, sql))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| query_error(&e, sql))? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let raw = row.get_ref(i).map_err(|e| query_error(&e, sql))?;
                values.push(from_sqlite(raw)?);
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }
        tracing::trace!(rows = out.len(), "Query returned");
        Ok(out)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing statement");
        let conn = self.handle()?;
        let affected = conn
            .execute(sql, params_from_iter(params.iter().map(to_sqlite)))
            .map_err(|e| query_error(&e, sql))?;
        Ok(affected as u64)
    }

    fn insert(
        &mut self,
        sql: &str,
        id_column: Option<&str>,
        params: &[Value],
    ) -> Result<Option<i64>> {
        self.execute(sql, params)?;
        // Tables declared with an INTEGER PRIMARY KEY alias the rowid.
        Ok(match id_column {
            Some(_) => Some(self.handle()?.last_insert_rowid()),
            None => None,
        })
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        let autocommit = self.handle()?.is_autocommit();
        match (enabled, autocommit) {
            (true, false) => self.run_batch("COMMIT"),
            (false, true) => self.run_batch("BEGIN"),
            _ => Ok(()),
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.run_batch("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.run_batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.run_batch("ROLLBACK")
    }

    fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                message: e.to_string(),
            })
        })?;
        tracing::info!(path = %self.path, "Closed SQLite database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use strata_core::QueryErrorKind;

    fn conn() -> SqliteConnection {
        let mut conn = SqliteConnection::open_memory().unwrap();
        conn.execute(
            "CREATE TABLE team (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
            &[],
        )
        .unwrap();
        conn.execute(
            "CREATE TABLE hero (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, \
             team_id BIGINT, active BOOLEAN, born DATE, \
             FOREIGN KEY (team_id) REFERENCES team(id))",
            &[],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_insert_returns_generated_key() {
        let mut conn = conn();
        let first = conn
            .insert("INSERT INTO team (name) VALUES (?)", Some("id"), &["a".into()])
            .unwrap();
        let second = conn
            .insert("INSERT INTO team (name) VALUES (?)", Some("id"), &["b".into()])
            .unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
        assert_eq!(
            conn.insert("INSERT INTO team (id, name) VALUES (9, 'c')", None, &[])
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_values_round_trip_through_storage_classes() {
        let mut conn = conn();
        let born = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        conn.execute(
            "INSERT INTO hero (name, active, born) VALUES (?, ?, ?)",
            &["Deadpond".into(), Value::Bool(true), Value::Date(born)],
        )
        .unwrap();
        let row = conn
            .query_one("SELECT name, active, born, team_id FROM hero", &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.columns(), ["name", "active", "born", "team_id"]);
        assert_eq!(row.get(0), Some(&Value::Text("Deadpond".into())));
        assert_eq!(row.get(1), Some(&Value::BigInt(1)));
        assert_eq!(row.get(2), Some(&Value::Text("1990-05-17".into())));
        assert_eq!(row.get(3), Some(&Value::Null));
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let mut conn = conn();
        let err = conn
            .execute(
                "INSERT INTO hero (name, team_id) VALUES (?, ?)",
                &["x".into(), Value::BigInt(42)],
            )
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_bad_sql_is_syntax_error() {
        let mut conn = conn();
        match conn.query("SELECT * FROM nowhere", &[]).unwrap_err() {
            Error::Query(q) => {
                assert_eq!(q.kind, QueryErrorKind::Syntax);
                assert_eq!(q.sql.as_deref(), Some("SELECT * FROM nowhere"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rollback_discards_writes() {
        let mut conn = conn();
        conn.begin().unwrap();
        conn.execute("INSERT INTO team (name) VALUES ('gone')", &[]).unwrap();
        conn.rollback().unwrap();
        assert!(conn.query("SELECT id FROM team", &[]).unwrap().is_empty());

        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO team (name) VALUES ('kept')", &[]).unwrap();
        conn.set_auto_commit(true).unwrap();
        assert_eq!(conn.query("SELECT id FROM team", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_closed_connection_rejects_statements() {
        let mut conn = conn();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.query("SELECT 1", &[]),
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                ..
            }))
        ));
    }
}
