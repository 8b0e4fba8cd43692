//! SQLite driver for Strata.
//!
//! [`SqliteConnection`] implements [`strata_core::Connection`] over
//! `rusqlite`. Statements run synchronously on the calling thread.
//!
//! ```ignore
//! use strata_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory()?;
//! let session = factory.open_session(conn)?;
//! ```

mod connection;
mod types;

pub use connection::SqliteConnection;
