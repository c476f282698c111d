//! JOIN clauses: caller-written ones and the ones generated for relations.

use crate::clause::Clause;
use crate::plan::{Plan, PlanStep, QueryRef};
use linkorm_core::{
    CHAIN_SEPARATOR, ConfigErrorKind, Dialect, Error, Result, Value, resolve_type,
};

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A caller-written JOIN: everything after the keyword, e.g.
/// `comments AS c ON c.post_id = posts.id AND c.score > ?`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub target: Clause,
}

impl Join {
    pub fn inner(sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            join_type: JoinType::Inner,
            target: Clause::new(sql, args),
        }
    }

    pub fn left(sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        Self {
            join_type: JoinType::Left,
            target: Clause::new(sql, args),
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn render(&self, dialect: Dialect, counter: &mut usize, params: &mut Vec<Value>) -> Result<String> {
        Ok(format!(
            "{} {}",
            self.join_type.as_str(),
            self.target.render(dialect, counter, params)?
        ))
    }
}

/// LEFT JOINs and aliased columns for the relation joins riding along one statement.
#[derive(Debug, Default)]
pub(crate) struct RelationJoins {
    pub joins: Vec<String>,
    pub columns: Vec<String>,
}

impl RelationJoins {
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }
}

/// Render the relation joins of `query`.
///
/// `root` is the qualifier of the statement's own table (its alias or name).
#[allow(clippy::result_large_err)]
pub(crate) fn relation_joins(
    plan: &Plan,
    query: QueryRef,
    root: &str,
    dialect: Dialect,
) -> Result<RelationJoins> {
    let mut out = RelationJoins::default();
    for (_, step) in plan.joins_in(query) {
        let owner = match step.parent {
            Some(p) if plan.steps[p].query == query && !plan.steps[p].strategy.is_separate() => {
                plan.steps[p].chain.as_str()
            }
            _ => root,
        };
        render_step(step, owner, dialect, &mut out)?;
    }
    Ok(out)
}

#[allow(clippy::result_large_err)]
fn render_step(
    step: &PlanStep,
    owner: &str,
    dialect: Dialect,
    out: &mut RelationJoins,
) -> Result<()> {
    let relation = &step.relation;
    let target = resolve_type(relation.target)?;
    let table = dialect.quote_identifier(target.table());
    let alias = &step.chain;

    match &relation.link {
        Some(link) => {
            let link_alias = format!("{alias}{CHAIN_SEPARATOR}link");
            out.joins.push(format!(
                "LEFT JOIN {} AS {} ON {} = {}",
                dialect.quote_identifier(&link.table),
                dialect.quote_identifier(&link_alias),
                dialect.quote_qualified(&link_alias, &link.parent_column),
                dialect.quote_qualified(owner, &relation.local_key),
            ));
            out.joins.push(format!(
                "LEFT JOIN {} AS {} ON {} = {}",
                table,
                dialect.quote_identifier(alias),
                dialect.quote_qualified(alias, &relation.foreign_key),
                dialect.quote_qualified(&link_alias, &link.child_column),
            ));
        }
        None => out.joins.push(format!(
            "LEFT JOIN {} AS {} ON {} = {}",
            table,
            dialect.quote_identifier(alias),
            dialect.quote_qualified(alias, &relation.foreign_key),
            dialect.quote_qualified(owner, &relation.local_key),
        )),
    }

    if target.fields.is_empty() {
        return Err(Error::config(
            ConfigErrorKind::IncompleteRelation,
            format!(
                "{} has no mapped columns to join for '{}'",
                relation.target.type_name,
                step.dotted_path()
            ),
        ));
    }
    for column in target.columns() {
        out.columns.push(format!(
            "{} AS {}",
            dialect.quote_qualified(alias, column),
            dialect.quote_identifier(&format!("{alias}{CHAIN_SEPARATOR}{column}")),
        ));
    }
    Ok(())
}
