//! Query specifications.

use crate::condition::Condition;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Conditions, ordering, pagination and eager-fetch paths of one query.
///
/// Conditions are ANDed in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub conditions: Vec<Condition>,
    pub sorts: Vec<Sort>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Dotted association paths to initialize on every result.
    pub fetch: Vec<String>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn order(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn fetch(mut self, path: impl Into<String>) -> Self {
        self.fetch.push(path.into());
        self
    }

    /// Whether the spec adds nothing to a plain scan.
    pub fn is_unfiltered(&self) -> bool {
        self.conditions.is_empty()
            && self.sorts.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
    }
}
