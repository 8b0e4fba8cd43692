//! Filter conditions.
//!
//! A [`Condition`] names fields logically. Rendering takes a resolver that
//! maps a field name to the physical expression of the branch being
//! compiled, and yields a parameterized fragment with its own ordered values.

use strata_core::Value;

/// How a field name resolves within one SELECT branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldExpr {
    /// A qualified column expression.
    Column(String),
    /// Known in the hierarchy but not present in this branch.
    Absent,
    /// Not a mapped field; used verbatim.
    Raw(String),
}

impl FieldExpr {
    pub fn to_sql(&self) -> &str {
        match self {
            FieldExpr::Column(expr) | FieldExpr::Raw(expr) => expr,
            FieldExpr::Absent => "NULL",
        }
    }
}

/// A single filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    NotEq(String, Value),
    Like(String, String),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
    /// Inclusive on both ends.
    Between(String, Value, Value),
    /// Verbatim SQL with positional parameters.
    Raw(String, Vec<Value>),
    /// `field IN (subquery)`, used for many-to-many loads.
    InSubquery {
        field: String,
        sql: String,
        params: Vec<Value>,
    },
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(field.into(), value.into())
    }

    pub fn not_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::NotEq(field.into(), value.into())
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Condition::Like(field.into(), pattern.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Lte(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Condition::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Condition::IsNull(field.into())
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Condition::IsNotNull(field.into())
    }

    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Condition::Between(field.into(), low.into(), high.into())
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Condition::Raw(sql.into(), params)
    }

    /// The field this condition filters on, if it names one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Condition::Eq(f, _)
            | Condition::NotEq(f, _)
            | Condition::Like(f, _)
            | Condition::Gt(f, _)
            | Condition::Gte(f, _)
            | Condition::Lt(f, _)
            | Condition::Lte(f, _)
            | Condition::In(f, _)
            | Condition::IsNull(f)
            | Condition::IsNotNull(f)
            | Condition::Between(f, _, _)
            | Condition::InSubquery { field: f, .. } => Some(f),
            Condition::Raw(..) => None,
        }
    }

    /// Render as a SQL fragment plus its parameters.
    pub fn render(&self, resolve: &dyn Fn(&str) -> FieldExpr) -> (String, Vec<Value>) {
        let col = |f: &str| resolve(f).to_sql().to_string();
        match self {
            Condition::Eq(f, v) if v.is_null() => (format!("{} IS NULL", col(f)), Vec::new()),
            Condition::NotEq(f, v) if v.is_null() => {
                (format!("{} IS NOT NULL", col(f)), Vec::new())
            }
            Condition::Eq(f, v) => (format!("{} = ?", col(f)), vec![v.clone()]),
            Condition::NotEq(f, v) => (format!("{} <> ?", col(f)), vec![v.clone()]),
            Condition::Like(f, p) => (format!("{} LIKE ?", col(f)), vec![Value::Text(p.clone())]),
            Condition::Gt(f, v) => (format!("{} > ?", col(f)), vec![v.clone()]),
            Condition::Gte(f, v) => (format!("{} >= ?", col(f)), vec![v.clone()]),
            Condition::Lt(f, v) => (format!("{} < ?", col(f)), vec![v.clone()]),
            Condition::Lte(f, v) => (format!("{} <= ?", col(f)), vec![v.clone()]),
            Condition::In(_, values) if values.is_empty() => ("1 = 0".to_string(), Vec::new()),
            Condition::In(f, values) => {
                let marks = vec!["?"; values.len()].join(", ");
                (format!("{} IN ({marks})", col(f)), values.clone())
            }
            Condition::IsNull(f) => (format!("{} IS NULL", col(f)), Vec::new()),
            Condition::IsNotNull(f) => (format!("{} IS NOT NULL", col(f)), Vec::new()),
            Condition::Between(f, lo, hi) => (
                format!("{} BETWEEN ? AND ?", col(f)),
                vec![lo.clone(), hi.clone()],
            ),
            Condition::Raw(sql, params) => (format!("({sql})"), params.clone()),
            Condition::InSubquery { field, sql, params } => {
                (format!("{} IN ({sql})", col(field)), params.clone())
            }
        }
    }
}

/// Render conditions joined with AND.
pub fn render_all(
    conditions: &[Condition],
    resolve: &dyn Fn(&str) -> FieldExpr,
) -> (Vec<String>, Vec<Value>) {
    let mut fragments = Vec::with_capacity(conditions.len());
    let mut params = Vec::new();
    for c in conditions {
        let (sql, p) = c.render(resolve);
        fragments.push(sql);
        params.extend(p);
    }
    (fragments, params)
}
