//! Error types for Strata.
//!
//! Every layer of the workspace reports failures through the single [`Error`]
//! enum defined here. Lower layers enrich and re-raise; the session decides
//! whether a failure aborts the unit of work.

use std::fmt;

/// The primary error type for all Strata operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection-level failure (open, close, transaction control).
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// A statement failed to prepare or execute.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    /// Metadata could not be built from the declared descriptors.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),
    /// Generated SQL failed while persisting an entity.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    /// The API was used in a state that does not permit the operation.
    #[error("illegal state: {0}")]
    State(#[from] StateError),
    /// A value could not be converted to the requested type.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),
    /// Custom error with message.
    #[error("{0}")]
    Custom(String),
}

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a mapping-integrity error about one entity.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            entity: entity.into(),
            message: message.into(),
        })
    }

    /// Shorthand for an illegal-state error.
    pub fn state(kind: StateErrorKind, message: impl Into<String>) -> Self {
        Error::State(StateError {
            kind,
            message: message.into(),
        })
    }

    /// Error raised when an accessor is asked for a field the entity does not have.
    pub fn unknown_field(entity: &str, field: &str) -> Self {
        Error::mapping(entity, format!("no mapped field named '{field}'"))
    }

    /// The state error kind, if this is a state error.
    pub fn state_kind(&self) -> Option<StateErrorKind> {
        match self {
            Error::State(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Whether this error (or the error it wraps) is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Constraint,
            Error::Persistence(p) => p.source.is_constraint_violation(),
            _ => false,
        }
    }
}

// ============================================================================
// Connection / query errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The database could not be opened.
    Open,
    /// The connection was already closed.
    Closed,
    /// BEGIN/COMMIT/ROLLBACK failed.
    Transaction,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionErrorKind::Open => "open failed",
            ConnectionErrorKind::Closed => "connection closed",
            ConnectionErrorKind::Transaction => "transaction failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    /// The statement that failed, when known.
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Malformed SQL or unknown table/column.
    Syntax,
    /// Constraint violation (unique, foreign key, not null, check).
    Constraint,
    /// Anything the driver reports that does not fit above.
    Database,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryErrorKind::Syntax => "syntax error",
            QueryErrorKind::Constraint => "constraint violation",
            QueryErrorKind::Database => "database error",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Mapping / persistence / state errors
// ============================================================================

/// Integrity violation detected while building metadata.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{entity}: {message}")]
pub struct MappingError {
    pub entity: String,
    pub message: String,
}

/// A failure while composing or executing generated SQL for one entity.
#[derive(Debug, thiserror::Error)]
#[error("{operation} of {entity} failed: {source} [sql: {sql}]")]
pub struct PersistenceError {
    pub entity: String,
    pub operation: Operation,
    pub sql: String,
    #[source]
    pub source: Box<Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Select,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Select => "select",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StateError {
    pub kind: StateErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    /// The owning session has been closed or dropped.
    SessionClosed,
    /// `single()` matched no rows.
    NoneFound,
    /// `single()` / `single_optional()` matched more than one row.
    MultipleFound,
    /// Pending entities reference each other in a cycle.
    CyclicReference,
    /// A handle or entity is not tracked by this session.
    NotTracked,
    /// A lazy load was triggered while the session was already borrowed.
    Reentrant,
}

#[derive(Debug, Clone)]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: &'static str,
    pub detail: Option<String>,
}

impl ConversionError {
    pub fn new(expected: &'static str, found: &'static str) -> Self {
        Self {
            expected,
            found,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot convert {} to {}", self.found, self.expected)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConversionError {}
