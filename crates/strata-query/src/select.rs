//! Polymorphic SELECT plans.
//!
//! An inheritance strategy describes how to read a type as a [`SelectPlan`]:
//! a list of output columns shared by every branch, and one
//! [`SelectBranch`] per physical source (one concrete class, or one
//! discriminated table). [`SelectPlan::compile`] applies a [`QuerySpec`] to
//! every branch independently and combines multiple branches with
//! `UNION ALL`, applying ORDER BY, LIMIT and OFFSET to the union.

use strata_core::{SqlType, Value, quote_ident};

use crate::condition::{FieldExpr, render_all};
use crate::spec::QuerySpec;

/// Output column carrying the concrete class tag of each row.
pub const ENTITY_COLUMN: &str = "__entity";

/// Alias of the derived table wrapping a union.
const UNION_ALIAS: &str = "poly";

/// One column of the unified output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    /// Unique, unqualified output alias (`c0`, `c1`, ...).
    pub alias: String,
    /// Entity declaring the field.
    pub entity: String,
    /// Logical field name.
    pub field: String,
    /// Physical column name.
    pub column: String,
    pub sql_type: SqlType,
    /// Value belongs in a reference rather than a scalar field.
    pub association: bool,
}

/// How the concrete class of a row is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTag {
    /// Every row of the branch is this class.
    Literal(String),
    /// The class is looked up from this discriminator expression.
    Discriminator(String),
}

/// One physical source of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectBranch {
    pub tag: EntityTag,
    /// FROM clause body: base table and joins.
    pub from: String,
    /// Expression per output column, parallel to [`SelectPlan::outputs`].
    /// `None` selects NULL.
    pub exprs: Vec<Option<String>>,
    /// Static predicates (discriminator filters, child exclusion).
    pub filters: Vec<String>,
}

impl SelectBranch {
    pub fn new(tag: EntityTag, from: impl Into<String>, width: usize) -> Self {
        Self {
            tag,
            from: from.into(),
            exprs: vec![None; width],
            filters: Vec::new(),
        }
    }

    fn tag_sql(&self) -> String {
        match &self.tag {
            EntityTag::Literal(name) => strata_core::quote_literal(name),
            EntityTag::Discriminator(expr) => expr.clone(),
        }
    }

    pub fn literal_entity(&self) -> Option<&str> {
        match &self.tag {
            EntityTag::Literal(name) => Some(name),
            EntityTag::Discriminator(_) => None,
        }
    }
}

/// A compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// The read plan of one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectPlan {
    pub outputs: Vec<OutputColumn>,
    pub branches: Vec<SelectBranch>,
}

impl SelectPlan {
    /// Append an output column, returning its index.
    pub fn push_output(
        &mut self,
        entity: &str,
        field: &str,
        column: &str,
        sql_type: SqlType,
        association: bool,
    ) -> usize {
        let index = self.outputs.len();
        self.outputs.push(OutputColumn {
            alias: format!("c{index}"),
            entity: entity.to_string(),
            field: field.to_string(),
            column: column.to_string(),
            sql_type,
            association,
        });
        for branch in &mut self.branches {
            branch.exprs.push(None);
        }
        index
    }

    pub fn output_index(&self, entity: &str, field: &str) -> Option<usize> {
        self.outputs
            .iter()
            .position(|o| o.entity == entity && o.field == field)
    }

    /// Keep only the branch producing `entity`.
    #[must_use]
    pub fn restrict_to(mut self, entity: &str) -> Self {
        self.branches
            .retain(|b| b.literal_entity().is_none_or(|e| e == entity));
        self
    }

    /// Resolve a logical field (or column) name within one branch.
    pub fn resolve(&self, branch: &SelectBranch, field: &str) -> FieldExpr {
        let mut known = false;
        for by_column in [false, true] {
            for (i, o) in self.outputs.iter().enumerate() {
                let matches = if by_column {
                    o.column == field
                } else {
                    o.field == field
                };
                if !matches {
                    continue;
                }
                known = true;
                if let Some(Some(expr)) = branch.exprs.get(i) {
                    return FieldExpr::Column(expr.clone());
                }
            }
            if known {
                return FieldExpr::Absent;
            }
        }
        FieldExpr::Raw(field.to_string())
    }

    fn branch_select(&self, branch: &SelectBranch, spec: &QuerySpec, sort_keys: bool) -> CompiledQuery {
        let mut select_list: Vec<String> = self
            .outputs
            .iter()
            .zip(&branch.exprs)
            .map(|(o, expr)| {
                format!(
                    "{} AS {}",
                    expr.as_deref().unwrap_or("NULL"),
                    quote_ident(&o.alias)
                )
            })
            .collect();
        select_list.push(format!(
            "{} AS {}",
            branch.tag_sql(),
            quote_ident(ENTITY_COLUMN)
        ));
        if sort_keys {
            for (i, sort) in spec.sorts.iter().enumerate() {
                let key = self.resolve(branch, &sort.field);
                select_list.push(format!("{} AS {}", key.to_sql(), quote_ident(&format!("s{i}"))));
            }
        }

        let resolve = |f: &str| self.resolve(branch, f);
        let (fragments, params) = render_all(&spec.conditions, &resolve);
        let mut predicates: Vec<String> = branch.filters.clone();
        predicates.extend(fragments);

        let mut sql = format!("SELECT {} FROM {}", select_list.join(", "), branch.from);
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        CompiledQuery { sql, params }
    }

    /// Compile the plan with `spec` applied.
    pub fn compile(&self, spec: &QuerySpec) -> CompiledQuery {
        let mut compiled = match self.branches.as_slice() {
            [] => CompiledQuery {
                sql: format!(
                    "SELECT NULL AS {} WHERE 1 = 0",
                    quote_ident(ENTITY_COLUMN)
                ),
                params: Vec::new(),
            },
            [branch] => {
                let mut q = self.branch_select(branch, spec, false);
                let order: Vec<String> = spec
                    .sorts
                    .iter()
                    .map(|s| {
                        format!(
                            "{} {}",
                            self.resolve(branch, &s.field).to_sql(),
                            s.direction.as_sql()
                        )
                    })
                    .collect();
                if !order.is_empty() {
                    q.sql.push_str(" ORDER BY ");
                    q.sql.push_str(&order.join(", "));
                }
                q
            }
            branches => {
                let mut parts = Vec::with_capacity(branches.len());
                let mut params = Vec::new();
                for branch in branches {
                    let q = self.branch_select(branch, spec, true);
                    parts.push(q.sql);
                    params.extend(q.params);
                }
                let mut sql = format!(
                    "SELECT * FROM ({}) AS {}",
                    parts.join(" UNION ALL "),
                    quote_ident(UNION_ALIAS)
                );
                let order: Vec<String> = spec
                    .sorts
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{} {}", quote_ident(&format!("s{i}")), s.direction.as_sql()))
                    .collect();
                if !order.is_empty() {
                    sql.push_str(" ORDER BY ");
                    sql.push_str(&order.join(", "));
                }
                CompiledQuery { sql, params }
            }
        };

        // Limit and offset are the only values inlined rather than bound.
        // Both are unsigned integers, so nothing else can reach the SQL.
        match (spec.limit, spec.offset) {
            (Some(limit), Some(offset)) => {
                compiled.sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
            }
            (Some(limit), None) => compiled.sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(offset)) => compiled.sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        compiled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::spec::Sort;

    fn two_branch_plan() -> SelectPlan {
        let mut plan = SelectPlan::default();
        plan.branches.push(SelectBranch::new(
            EntityTag::Literal("Dog".into()),
            "\"dog\" AS \"t0\"",
            0,
        ));
        plan.branches.push(SelectBranch::new(
            EntityTag::Literal("Cat".into()),
            "\"cat\" AS \"t0\"",
            0,
        ));
        let id = plan.push_output("Animal", "id", "id", SqlType::BigInt, false);
        let tag = plan.push_output("Dog", "tag", "tag", SqlType::Text, false);
        let lives = plan.push_output("Cat", "lives", "lives", SqlType::Integer, false);
        plan.branches[0].exprs[id] = Some("\"t0\".\"id\"".into());
        plan.branches[0].exprs[tag] = Some("\"t0\".\"tag\"".into());
        plan.branches[1].exprs[id] = Some("\"t0\".\"id\"".into());
        plan.branches[1].exprs[lives] = Some("\"t0\".\"lives\"".into());
        plan
    }

    #[test]
    fn test_single_branch_orders_on_qualified_expr() {
        let mut plan = SelectPlan::default();
        plan.branches.push(SelectBranch::new(
            EntityTag::Discriminator("\"t0\".\"kind\"".into()),
            "\"employee\" AS \"t0\"",
            0,
        ));
        let name = plan.push_output("Employee", "name", "name", SqlType::Text, false);
        plan.branches[0].exprs[name] = Some("\"t0\".\"name\"".into());
        plan.branches[0].filters.push("\"t0\".\"kind\" IN ('MGR')".into());

        let spec = QuerySpec::new()
            .filter(Condition::eq("name", "Ann"))
            .order(Sort::asc("name"))
            .limit(5);
        let q = plan.compile(&spec);
        assert_eq!(
            q.sql,
            "SELECT \"t0\".\"name\" AS \"c0\", \"t0\".\"kind\" AS \"__entity\" FROM \"employee\" AS \"t0\" \
             WHERE \"t0\".\"kind\" IN ('MGR') AND \"t0\".\"name\" = ? ORDER BY \"t0\".\"name\" ASC LIMIT 5"
        );
        assert_eq!(q.params, vec![Value::Text("Ann".into())]);
    }

    #[test]
    fn test_union_pads_absent_columns_and_sorts_by_alias() {
        let plan = two_branch_plan();
        let spec = QuerySpec::new()
            .filter(Condition::eq("tag", "x"))
            .order(Sort::desc("id"))
            .offset(2);
        let q = plan.compile(&spec);
        assert!(q.sql.starts_with("SELECT * FROM (SELECT \"t0\".\"id\" AS \"c0\""));
        assert!(q.sql.contains(" UNION ALL "));
        assert!(q.sql.contains("NULL AS \"c2\", 'Dog' AS \"__entity\""));
        assert!(q.sql.contains("NULL = ?"));
        assert!(q.sql.ends_with("ORDER BY \"s0\" DESC LIMIT -1 OFFSET 2"));
        // The condition is applied to both branches.
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn test_limit_and_offset_are_inlined_not_bound() {
        let plan = two_branch_plan();
        let q = plan.compile(&QuerySpec::new().limit(10).offset(20));
        assert!(q.sql.ends_with(" LIMIT 10 OFFSET 20"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_resolve_by_field_then_column() {
        let plan = two_branch_plan();
        let dog = &plan.branches[0];
        assert_eq!(
            plan.resolve(dog, "tag"),
            FieldExpr::Column("\"t0\".\"tag\"".into())
        );
        assert_eq!(plan.resolve(dog, "lives"), FieldExpr::Absent);
        assert_eq!(plan.resolve(dog, "bogus"), FieldExpr::Raw("bogus".into()));
    }

    #[test]
    fn test_restrict_to_one_branch() {
        let plan = two_branch_plan().restrict_to("Cat");
        assert_eq!(plan.branches.len(), 1);
        let q = plan.compile(&QuerySpec::new());
        assert!(!q.sql.contains("UNION"));
        assert!(q.sql.contains("'Cat' AS \"__entity\""));
    }
}
