//! SQL fragments with their bound arguments.

use crate::placeholder;
use linkorm_core::{ConfigErrorKind, Dialect, Error, Result, Value};

/// A portable SQL fragment (`?` placeholders) plus the values it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Clause {
    pub fn new(sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        let sql = sql.into();
        let args: Vec<Value> = args.into_iter().collect();
        let expected = placeholder::count(&sql);
        if expected != args.len() {
            tracing::warn!(
                sql = %sql,
                placeholders = expected,
                args = args.len(),
                "Placeholder count does not match argument count"
            );
        }
        Self { sql, args }
    }

    /// Fragment without arguments.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// Rewrite placeholders with the statement's running counter and append
    /// the arguments in the same order.
    ///
    /// Fails when the fragment's placeholders and arguments disagree in
    /// number, and for MySQL when the fragment holds a `??` escape, since
    /// its literal `?` would be read back as a marker.
    #[allow(clippy::result_large_err)]
    pub fn render(&self, dialect: Dialect, counter: &mut usize, params: &mut Vec<Value>) -> Result<String> {
        let expected = placeholder::count(&self.sql);
        if expected != self.args.len() {
            return Err(Error::config(
                ConfigErrorKind::PlaceholderMismatch,
                format!(
                    "'{}' has {} placeholder(s) but {} argument(s)",
                    self.sql,
                    expected,
                    self.args.len()
                ),
            ));
        }
        if dialect == Dialect::Mysql && placeholder::escaped_marks(&self.sql) > 0 {
            return Err(Error::config(
                ConfigErrorKind::PlaceholderMismatch,
                format!("'{}' uses a ?? escape, which MySQL cannot tell from a marker", self.sql),
            ));
        }
        let sql = placeholder::rewrite(&self.sql, dialect, counter);
        params.extend(self.args.iter().cloned());
        Ok(sql)
    }
}

/// Render a list of clauses joined by `sep`, parenthesizing each one when
/// there is more than one.
#[allow(clippy::result_large_err)]
pub(crate) fn render_group(
    clauses: &[Clause],
    sep: &str,
    dialect: Dialect,
    counter: &mut usize,
    params: &mut Vec<Value>,
) -> Result<Option<String>> {
    let live: Vec<&Clause> = clauses.iter().filter(|c| !c.is_empty()).collect();
    match live.as_slice() {
        [] => Ok(None),
        [only] => only.render(dialect, counter, params).map(Some),
        many => {
            let mut parts = Vec::with_capacity(many.len());
            for c in many {
                parts.push(format!("({})", c.render(dialect, counter, params)?));
            }
            Ok(Some(parts.join(sep)))
        }
    }
}

/// WHERE body: the AND group, then the OR group, ANDed together.
#[allow(clippy::result_large_err)]
pub(crate) fn render_where(
    filters: &[Clause],
    or_filters: &[Clause],
    dialect: Dialect,
    counter: &mut usize,
    params: &mut Vec<Value>,
) -> Result<Option<String>> {
    let and = render_group(filters, " AND ", dialect, counter, params)?;
    let or = render_group(or_filters, " OR ", dialect, counter, params)?;
    Ok(match (and, or) {
        (Some(a), Some(o)) => Some(format!("({}) AND ({})", a, o)),
        (Some(w), None) | (None, Some(w)) => Some(w),
        (None, None) => None,
    })
}
