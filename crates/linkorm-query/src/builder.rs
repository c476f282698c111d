//! Query builders for INSERT, UPDATE, DELETE operations.

use crate::clause::{Clause, render_where};
use crate::select::quote_table;
use asupersync::{Cx, Outcome};
use linkorm_core::{
    ConfigErrorKind, Connection, Dialect, Error, Model, Record, Result, Row, Value, read_path,
    resolve_type,
};

fn missing_table(statement: &str) -> Error {
    Error::config(
        ConfigErrorKind::MissingModel,
        format!("{} statement has no table", statement),
    )
}

fn render_returning(dialect: Dialect, returning: &[String]) -> String {
    if returning.is_empty() {
        return String::new();
    }
    let cols: Vec<String> = returning
        .iter()
        .map(|c| {
            if c == "*" {
                c.clone()
            } else {
                dialect.quote_identifier(c)
            }
        })
        .collect();
    format!(" RETURNING {}", cols.join(", "))
}

async fn run_exec<C: Connection>(
    cx: &Cx,
    conn: &C,
    built: Result<(String, Vec<Value>)>,
) -> Outcome<u64, Error> {
    let (sql, params) = match built {
        Ok(built) => built,
        Err(e) => return Outcome::Err(e),
    };
    tracing::debug!(sql = %sql, params = params.len(), "Executing statement");
    match conn.execute(cx, &sql, &params).await {
        Outcome::Err(e) => Outcome::Err(e.with_sql(&sql)),
        other => other,
    }
}

async fn run_returning<C: Connection>(
    cx: &Cx,
    conn: &C,
    built: Result<(String, Vec<Value>)>,
) -> Outcome<Vec<Row>, Error> {
    let (sql, params) = match built {
        Ok(built) => built,
        Err(e) => return Outcome::Err(e),
    };
    tracing::debug!(sql = %sql, params = params.len(), "Executing statement with RETURNING");
    match conn.query(cx, &sql, &params).await {
        Outcome::Err(e) => Outcome::Err(e.with_sql(&sql)),
        other => other,
    }
}

/// INSERT query builder.
#[derive(Debug, Clone, Default)]
pub struct InsertBuilder {
    table: Option<String>,
    columns: Vec<String>,
    values: Vec<Value>,
    returning: Vec<String>,
    dialect: Option<Dialect>,
}

impl InsertBuilder {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn for_model<M: Model>() -> Self {
        Self::table(M::TABLE_NAME)
    }

    /// Set one column.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }

    /// Take every writable column from `record`. A primary key that is still
    /// NULL is left out so the database can assign it.
    #[allow(clippy::result_large_err)]
    pub fn values_from(mut self, record: &dyn Record) -> Result<Self> {
        let descriptor = resolve_type(record.model_type())?;
        if self.table.is_none() {
            self.table = Some(descriptor.table().to_string());
        }
        for field in descriptor.writable_fields() {
            let value = read_path(record, &field.path).unwrap_or(Value::Null);
            if field.primary_key && value.is_null() {
                continue;
            }
            self.columns.push(field.column.clone());
            self.values.push(value);
        }
        Ok(self)
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning.push(column.into());
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Build with the builder's dialect (Postgres unless set).
    #[allow(clippy::result_large_err)]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.build_with_dialect(self.dialect.unwrap_or_default())
    }

    #[allow(clippy::result_large_err)]
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let table = self.table.as_deref().ok_or_else(|| missing_table("INSERT"))?;
        let mut sql = format!("INSERT INTO {}", quote_table(dialect, table));

        if self.columns.is_empty() {
            sql.push_str(match dialect {
                Dialect::Mysql => " () VALUES ()",
                _ => " DEFAULT VALUES",
            });
        } else {
            let cols: Vec<String> = self
                .columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect();
            let markers: Vec<String> = (1..=self.values.len())
                .map(|i| dialect.placeholder(i))
                .collect();
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                cols.join(", "),
                markers.join(", ")
            ));
        }
        sql.push_str(&render_returning(dialect, &self.returning));
        Ok((sql, self.values.clone()))
    }

    /// Execute and return rows affected.
    pub async fn exec<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let built = self.build_with_dialect(self.dialect.unwrap_or(conn.dialect()));
        run_exec(cx, conn, built).await
    }

    /// Execute and return the RETURNING rows.
    pub async fn exec_returning<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<Row>, Error> {
        let built = self.build_with_dialect(self.dialect.unwrap_or(conn.dialect()));
        run_returning(cx, conn, built).await
    }
}

#[derive(Debug, Clone)]
enum Assignment {
    Column(String, Value),
    Expr(Clause),
}

/// UPDATE query builder.
///
/// SET arguments are numbered before WHERE arguments, matching their order
/// in the statement.
#[derive(Debug, Clone, Default)]
pub struct UpdateBuilder {
    table: Option<String>,
    sets: Vec<Assignment>,
    filters: Vec<Clause>,
    or_filters: Vec<Clause>,
    returning: Vec<String>,
    dialect: Option<Dialect>,
}

impl UpdateBuilder {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn for_model<M: Model>() -> Self {
        Self::table(M::TABLE_NAME)
    }

    /// Add a raw assignment such as `views = views + ?`.
    pub fn set(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.sets.push(Assignment::Expr(Clause::new(sql, args)));
        self
    }

    /// Assign a value to a column.
    pub fn set_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets
            .push(Assignment::Column(column.into(), value.into()));
        self
    }

    /// Assign every column of a partial map, in iteration order.
    pub fn set_map<K, I>(mut self, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (column, value) in values {
            self.sets.push(Assignment::Column(column.into(), value));
        }
        self
    }

    /// Assign every writable non-key column of `record` and filter on its
    /// primary key.
    #[allow(clippy::result_large_err)]
    pub fn values_from(mut self, record: &dyn Record) -> Result<Self> {
        let descriptor = resolve_type(record.model_type())?;
        if self.table.is_none() {
            self.table = Some(descriptor.table().to_string());
        }
        for field in descriptor.writable_fields().filter(|f| !f.primary_key) {
            let value = read_path(record, &field.path).unwrap_or(Value::Null);
            self.sets.push(Assignment::Column(field.column.clone(), value));
        }
        let mut keyed = false;
        for pk in descriptor.primary_keys() {
            let value = read_path(record, &pk.path).unwrap_or(Value::Null);
            if value.is_null() {
                return Err(Error::config(
                    ConfigErrorKind::UnknownField,
                    format!(
                        "{} has no value for primary key '{}'",
                        record.model_type().type_name,
                        pk.column
                    ),
                ));
            }
            self.filters.push(Clause::new(format!("{} = ?", pk.column), [value]));
            keyed = true;
        }
        if !keyed {
            return Err(Error::config(
                ConfigErrorKind::UnknownField,
                format!("{} has no primary key to update by", record.model_type().type_name),
            ));
        }
        Ok(self)
    }

    #[doc(alias = "where")]
    pub fn filter(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.filters.push(Clause::new(sql, args));
        self
    }

    pub fn filter_or(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.or_filters.push(Clause::new(sql, args));
        self
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning.push(column.into());
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    #[allow(clippy::result_large_err)]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.build_with_dialect(self.dialect.unwrap_or_default())
    }

    #[allow(clippy::result_large_err)]
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let table = self.table.as_deref().ok_or_else(|| missing_table("UPDATE"))?;
        if self.sets.is_empty() {
            return Err(Error::config(
                ConfigErrorKind::UnknownField,
                format!("UPDATE of '{}' sets no columns", table),
            ));
        }

        let mut counter = 0;
        let mut params = Vec::new();
        let mut sets = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            sets.push(match set {
                Assignment::Column(column, value) => {
                    counter += 1;
                    params.push(value.clone());
                    format!(
                        "{} = {}",
                        dialect.quote_identifier(column),
                        dialect.placeholder(counter)
                    )
                }
                Assignment::Expr(clause) => clause.render(dialect, &mut counter, &mut params)?,
            });
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_table(dialect, table),
            sets.join(", ")
        );
        if let Some(w) = render_where(&self.filters, &self.or_filters, dialect, &mut counter, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&w);
        } else {
            tracing::warn!(table, "UPDATE without WHERE touches every row");
        }
        sql.push_str(&render_returning(dialect, &self.returning));
        Ok((sql, params))
    }

    pub async fn exec<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let built = self.build_with_dialect(self.dialect.unwrap_or(conn.dialect()));
        run_exec(cx, conn, built).await
    }

    pub async fn exec_returning<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<Row>, Error> {
        let built = self.build_with_dialect(self.dialect.unwrap_or(conn.dialect()));
        run_returning(cx, conn, built).await
    }
}

/// DELETE query builder.
#[derive(Debug, Clone, Default)]
pub struct DeleteBuilder {
    table: Option<String>,
    filters: Vec<Clause>,
    or_filters: Vec<Clause>,
    returning: Vec<String>,
    dialect: Option<Dialect>,
}

impl DeleteBuilder {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn for_model<M: Model>() -> Self {
        Self::table(M::TABLE_NAME)
    }

    #[doc(alias = "where")]
    pub fn filter(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.filters.push(Clause::new(sql, args));
        self
    }

    pub fn filter_or(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.or_filters.push(Clause::new(sql, args));
        self
    }

    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning.push(column.into());
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    #[allow(clippy::result_large_err)]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.build_with_dialect(self.dialect.unwrap_or_default())
    }

    #[allow(clippy::result_large_err)]
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let table = self.table.as_deref().ok_or_else(|| missing_table("DELETE"))?;
        let mut counter = 0;
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote_table(dialect, table));
        if let Some(w) = render_where(&self.filters, &self.or_filters, dialect, &mut counter, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&w);
        } else {
            tracing::warn!(table, "DELETE without WHERE removes every row");
        }
        sql.push_str(&render_returning(dialect, &self.returning));
        Ok((sql, params))
    }

    pub async fn exec<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let built = self.build_with_dialect(self.dialect.unwrap_or(conn.dialect()));
        run_exec(cx, conn, built).await
    }

    pub async fn exec_returning<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<Row>, Error> {
        let built = self.build_with_dialect(self.dialect.unwrap_or(conn.dialect()));
        run_returning(cx, conn, built).await
    }
}
