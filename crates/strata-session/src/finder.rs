//! Fluent, type-aware queries over a session.
//!
//! ```ignore
//! let heroes = session
//!     .finder("Hero")
//!     .like("name", "Dead%")
//!     .order_desc("name")
//!     .limit(10)
//!     .list()?;
//! ```
//!
//! A finder accumulates a [`QuerySpec`]; nothing runs until a terminal
//! method (`list`, `first`, `single`, ...) is called. Results are
//! polymorphic: querying a class returns instances of every concrete class
//! below it, already tracked by the session.

use strata_core::{Connection, Entity, Error, Model, Result, StateErrorKind, Value, downcast};
use strata_query::{Condition, Direction, QuerySpec, Sort};

use crate::session::Session;

/// Query builder bound to a session and an entity type.
#[derive(Debug)]
pub struct Finder<'s, C: Connection + 'static> {
    session: &'s Session<C>,
    entity: String,
    spec: QuerySpec,
}

impl<'s, C: Connection + 'static> Finder<'s, C> {
    pub(crate) fn new(session: &'s Session<C>, entity: &str) -> Self {
        Self {
            session,
            entity: entity.to_string(),
            spec: QuerySpec::new(),
        }
    }

    /// Add an arbitrary condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.spec = self.spec.filter(condition);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::eq(field, value))
    }

    pub fn not_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::not_eq(field, value))
    }

    /// SQL `LIKE` with `%` and `_` wildcards.
    pub fn like(self, field: &str, pattern: impl Into<String>) -> Self {
        self.filter(Condition::like(field, pattern))
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::gt(field, value))
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::gte(field, value))
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::lt(field, value))
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::lte(field, value))
    }

    /// Membership test. An empty set matches nothing.
    pub fn is_in<V: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter(Condition::is_in(field, values))
    }

    pub fn is_null(self, field: &str) -> Self {
        self.filter(Condition::is_null(field))
    }

    pub fn is_not_null(self, field: &str) -> Self {
        self.filter(Condition::is_not_null(field))
    }

    /// Inclusive range.
    pub fn between(self, field: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.filter(Condition::between(field, low, high))
    }

    /// Raw SQL predicate with positional parameters, ANDed with the rest.
    pub fn where_raw(self, sql: &str, params: Vec<Value>) -> Self {
        self.filter(Condition::raw(sql, params))
    }

    pub fn order_asc(self, field: &str) -> Self {
        self.order_by(field, Direction::Asc)
    }

    pub fn order_desc(self, field: &str) -> Self {
        self.order_by(field, Direction::Desc)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        let sort = match direction {
            Direction::Asc => Sort::asc(field),
            Direction::Desc => Sort::desc(field),
        };
        self.spec = self.spec.order(sort);
        self
    }

    /// Initialize a (possibly dotted) collection path on every result.
    pub fn fetch(mut self, path: &str) -> Self {
        self.spec = self.spec.fetch(path);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.spec = self.spec.limit(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.spec = self.spec.offset(offset);
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Every matching entity.
    pub fn list(&self) -> Result<Vec<Box<dyn Entity>>> {
        self.session.query(&self.entity, &self.spec)
    }

    /// The first match in query order.
    pub fn first(&self) -> Result<Option<Box<dyn Entity>>> {
        let spec = self.spec.clone().limit(1);
        Ok(self.session.query(&self.entity, &spec)?.into_iter().next())
    }

    /// Exactly one match; none or several is an illegal-state error.
    pub fn single(&self) -> Result<Box<dyn Entity>> {
        self.single_optional()?.ok_or_else(|| {
            Error::state(
                StateErrorKind::NoneFound,
                format!("no {} matched the query", self.entity),
            )
        })
    }

    /// At most one match; several is an illegal-state error.
    pub fn single_optional(&self) -> Result<Option<Box<dyn Entity>>> {
        let spec = self.spec.clone().limit(2);
        let mut found = self.session.query(&self.entity, &spec)?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(Error::state(
                StateErrorKind::MultipleFound,
                format!("more than one {} matched the query", self.entity),
            )),
        }
    }

    /// `list` with every result downcast to `M`; a result of another class
    /// is skipped.
    pub fn list_as<M: Model>(&self) -> Result<Vec<M>> {
        Ok(self
            .list()?
            .into_iter()
            .filter_map(|e| downcast::<M>(e).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::factory::Metamodel;
    use crate::test_support::{Recorder, Team, registry};

    fn session() -> Session<Recorder> {
        Session::new(Recorder::default(), Arc::new(Metamodel::new(registry())))
    }

    fn teams(session: &Session<Recorder>, ids: &[i64]) {
        let rows = ids
            .iter()
            .map(|id| {
                vec![
                    Value::BigInt(*id),
                    Value::Text(format!("team {id}")),
                    Value::Text("Team".into()),
                ]
            })
            .collect();
        session.test_connection().push_rows(&["c0", "c1", "__entity"], rows);
    }

    fn last(session: &Session<Recorder>) -> (String, Vec<Value>) {
        session.connection().statements.last().cloned().unwrap()
    }

    #[test]
    fn test_builder_accumulates_spec() {
        let session = session();
        let finder = session
            .finder("Team")
            .eq("name", "a")
            .between("id", 1i64, 5i64)
            .order_desc("name")
            .limit(3)
            .offset(1)
            .fetch("heroes");
        let spec = finder.spec();
        assert_eq!(spec.conditions.len(), 2);
        assert_eq!(spec.sorts, vec![Sort::desc("name")]);
        assert_eq!((spec.limit, spec.offset), (Some(3), Some(1)));
        assert_eq!(spec.fetch, vec!["heroes".to_string()]);
    }

    #[test]
    fn test_list_renders_filters_in_order() {
        let session = session();
        teams(&session, &[1, 2]);
        let found = session
            .finder("Team")
            .like("name", "team%")
            .gte("id", 1i64)
            .order_asc("id")
            .list()
            .unwrap();
        assert_eq!(found.len(), 2);
        let (sql, params) = last(&session);
        assert!(sql.contains("LIKE ?"));
        assert!(sql.contains(">= ?"));
        assert!(sql.contains("ORDER BY"));
        assert_eq!(params, vec![Value::Text("team%".into()), Value::BigInt(1)]);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let session = session();
        let found = session.finder("Team").is_in::<i64>("id", []).list().unwrap();
        assert!(found.is_empty());
        assert!(last(&session).0.contains("1 = 0"));
    }

    #[test]
    fn test_first_limits_to_one() {
        let session = session();
        teams(&session, &[7]);
        let first = session.finder("Team").order_desc("id").first().unwrap().unwrap();
        assert_eq!(first.get_value("id"), Some(Value::BigInt(7)));
        assert!(last(&session).0.contains("LIMIT 1"));
    }

    #[test]
    fn test_single_enforces_cardinality() {
        let session = session();
        let err = session.finder("Team").eq("name", "none").single().unwrap_err();
        assert_eq!(err.state_kind(), Some(StateErrorKind::NoneFound));

        teams(&session, &[1, 2]);
        let err = session.finder("Team").single().unwrap_err();
        assert_eq!(err.state_kind(), Some(StateErrorKind::MultipleFound));

        teams(&session, &[3]);
        let one = session.finder("Team").single().unwrap();
        assert_eq!(one.get_value("id"), Some(Value::BigInt(3)));
        assert!(last(&session).0.contains("LIMIT 2"));
    }

    #[test]
    fn test_list_as_downcasts() {
        let session = session();
        teams(&session, &[1, 2, 3]);
        let found: Vec<Team> = session.finder("Team").list_as().unwrap();
        let names: Vec<_> = found.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["team 1", "team 2", "team 3"]);
    }

    #[test]
    fn test_raw_condition_is_parenthesized() {
        let session = session();
        session
            .finder("Team")
            .where_raw("length(name) > ?", vec![Value::BigInt(3)])
            .list()
            .unwrap();
        let (sql, params) = last(&session);
        assert!(sql.contains("(length(name) > ?)"));
        assert_eq!(params, vec![Value::BigInt(3)]);
    }
}
