//! SELECT query building.
//!
//! [`QuerySpec`] is the dynamic statement builder: it knows a table and,
//! optionally, the model its rows scan into. [`Select<M>`] wraps it for a
//! known model type and adds the typed terminal operations.

use crate::clause::{Clause, render_group, render_where};
use crate::join::{Join, RelationJoins, relation_joins};
use crate::plan::{Plan, Planner, QueryRef};
use crate::preload::{ApplyFn, PreloadSpec, StrategyHint, run_plan};
use crate::scan::{MapRow, ScanDest, assemble, downcast, scan_maps};
use asupersync::{Cx, Outcome};
use linkorm_core::{
    ConfigErrorKind, Connection, Dialect, EngineConfig, Error, Model, ModelType, Record, Result,
    Value, recover,
};
use std::marker::PhantomData;

/// Build a `Vec<Value>` of statement arguments.
///
/// ```ignore
/// spec.filter("author_id = ? AND score > ?", params![7, 2.5])
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::Value::from($arg)),+]
    };
}

#[derive(Clone, Copy)]
enum Shape {
    Select,
    Count,
    Exists,
}

/// An accumulating description of one SELECT statement.
///
/// Fragments are written with portable `?` placeholders; they are numbered
/// for the target dialect when the statement is built, in the order they
/// appear in the final text.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    table: Option<String>,
    model: Option<ModelType>,
    alias: Option<String>,
    columns: Vec<Clause>,
    all_columns: bool,
    distinct: bool,
    joins: Vec<Join>,
    filters: Vec<Clause>,
    or_filters: Vec<Clause>,
    group_by: Vec<String>,
    having: Vec<Clause>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    preloads: Vec<PreloadSpec>,
    config: EngineConfig,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a table by name. `schema.table` is accepted.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Target `M`'s table and scan rows into `M`.
    pub fn model<M: Model>(self) -> Self {
        self.model_type(ModelType::of::<M>())
    }

    pub fn model_type(mut self, model: ModelType) -> Self {
        if self.table.is_none() {
            self.table = Some(model.table.to_string());
        }
        self.model = Some(model);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add a column or plain expression to the projection.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(Clause::raw(column));
        self
    }

    /// Add an expression with arguments to the projection.
    pub fn column_expr(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.columns.push(Clause::new(sql, args));
        self
    }

    /// Project every column of the statement's own table (`"posts".*`).
    pub fn column_all(mut self) -> Self {
        self.all_columns = true;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add a predicate to the AND group.
    #[doc(alias = "where")]
    pub fn filter(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.filters.push(Clause::new(sql, args));
        self
    }

    /// Add a predicate to the OR group. The OR group as a whole is ANDed
    /// with the AND group.
    #[doc(alias = "where_or")]
    pub fn filter_or(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.or_filters.push(Clause::new(sql, args));
        self
    }

    /// Add an INNER JOIN; `sql` is everything after the keyword.
    pub fn join(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.joins.push(Join::inner(sql, args));
        self
    }

    /// Add a LEFT JOIN; `sql` is everything after the keyword.
    pub fn left_join(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.joins.push(Join::left(sql, args));
        self
    }

    pub fn group(mut self, expr: impl Into<String>) -> Self {
        self.group_by.push(expr.into());
        self
    }

    pub fn having(mut self, sql: impl Into<String>, args: impl IntoIterator<Item = Value>) -> Self {
        self.having.push(Clause::new(sql, args));
        self
    }

    /// Add an ORDER BY term, e.g. `created_at DESC`.
    pub fn order(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Render for `dialect` regardless of what the connection reports.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.config.dialect = Some(dialect);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Preload a relation path, transforming the statement that loads its
    /// last segment with `apply`.
    pub fn preload(mut self, path: impl Into<String>, apply: impl IntoIterator<Item = ApplyFn>) -> Self {
        let mut spec = PreloadSpec::new(path);
        spec.apply.extend(apply);
        self.preloads.push(spec);
        self
    }

    /// Preload a relation path with the strategy its cardinality suggests.
    pub fn preload_relation(self, path: impl Into<String>) -> Self {
        self.preload_spec(PreloadSpec::new(path))
    }

    /// Preload a relation path by joining it, even for collections.
    pub fn join_relation(self, path: impl Into<String>) -> Self {
        self.preload_spec(PreloadSpec::new(path).hint(StrategyHint::ForceJoin))
    }

    /// Preload a relation path with batched statements only.
    pub fn preload_separate(self, path: impl Into<String>) -> Self {
        self.preload_spec(PreloadSpec::new(path).hint(StrategyHint::ForceSeparate))
    }

    pub fn preload_spec(mut self, spec: PreloadSpec) -> Self {
        self.preloads.push(spec);
        self
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn model_of(&self) -> Option<ModelType> {
        self.model
    }

    pub fn preloads(&self) -> &[PreloadSpec] {
        &self.preloads
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dialect used by [`build`](Self::build) when nothing else decides it.
    pub fn dialect(&self) -> Dialect {
        self.config.dialect.unwrap_or_default()
    }

    /// Name the statement's own table is referred to by: the alias, or the
    /// table name without its schema.
    pub fn qualifier(&self) -> String {
        match (&self.alias, &self.table) {
            (Some(alias), _) => alias.clone(),
            (None, Some(table)) => table.rsplit('.').next().unwrap_or(table).to_string(),
            (None, None) => String::new(),
        }
    }

    /// Build the statement and its arguments, without preload joins.
    #[allow(clippy::result_large_err)]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.render(self.dialect(), &RelationJoins::default(), Shape::Select)
    }

    /// Build `SELECT COUNT(*)` over the same source and predicates.
    ///
    /// Projection, ordering and paging are dropped; a grouped statement is
    /// counted by group.
    #[allow(clippy::result_large_err)]
    pub fn build_count(&self) -> Result<(String, Vec<Value>)> {
        self.render(self.dialect(), &RelationJoins::default(), Shape::Count)
    }

    /// Build `SELECT EXISTS (SELECT 1 ...)` over the same source and predicates.
    #[allow(clippy::result_large_err)]
    pub fn build_exists(&self) -> Result<(String, Vec<Value>)> {
        self.render(self.dialect(), &RelationJoins::default(), Shape::Exists)
    }

    /// Plan the preloads and build the root statement with its relation joins.
    #[allow(clippy::result_large_err)]
    pub fn build_planned(&self) -> Result<(String, Vec<Value>)> {
        let model = self.require_model()?;
        let plan = Planner::new(self.config.identifier_budget).plan(model, &self.preloads)?;
        self.build_with_plan(&plan, self.dialect())
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn build_with_plan(&self, plan: &Plan, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let joined = relation_joins(plan, QueryRef::Root, &self.qualifier(), dialect)?;
        self.render(dialect, &joined, Shape::Select)
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn render_select(&self, dialect: Dialect, joined: &RelationJoins) -> Result<(String, Vec<Value>)> {
        self.render(dialect, joined, Shape::Select)
    }

    #[allow(clippy::result_large_err)]
    fn require_model(&self) -> Result<ModelType> {
        self.model.ok_or_else(|| {
            Error::config(
                ConfigErrorKind::MissingModel,
                format!(
                    "statement on '{}' has no model to scan into",
                    self.table.as_deref().unwrap_or("?")
                ),
            )
        })
    }

    #[allow(clippy::result_large_err)]
    fn render(&self, dialect: Dialect, joined: &RelationJoins, shape: Shape) -> Result<(String, Vec<Value>)> {
        let mut counter = 0;
        let mut params = Vec::new();

        let sql = match shape {
            Shape::Select => {
                let mut sql = String::from("SELECT ");
                if self.distinct {
                    sql.push_str("DISTINCT ");
                }
                let mut projection = Vec::new();
                if self.all_columns || (self.columns.is_empty() && !joined.is_empty()) {
                    projection.push(format!("{}.*", dialect.quote_identifier(&self.qualifier())));
                }
                for column in &self.columns {
                    projection.push(column.render(dialect, &mut counter, &mut params)?);
                }
                if projection.is_empty() {
                    projection.push("*".to_string());
                }
                projection.extend(joined.columns.iter().cloned());
                sql.push_str(&projection.join(", "));
                sql.push_str(&self.render_source(dialect, joined, &mut counter, &mut params)?);

                if !self.order_by.is_empty() {
                    sql.push_str(" ORDER BY ");
                    sql.push_str(&self.order_by.join(", "));
                }
                if let Some(n) = self.limit {
                    sql.push_str(&format!(" LIMIT {}", n));
                }
                if let Some(n) = self.offset {
                    sql.push_str(&format!(" OFFSET {}", n));
                }
                sql
            }
            Shape::Count => {
                let source = self.render_source(dialect, joined, &mut counter, &mut params)?;
                if self.group_by.is_empty() {
                    format!("SELECT COUNT(*){}", source)
                } else {
                    format!(
                        "SELECT COUNT(*) FROM (SELECT 1{}) AS {}",
                        source,
                        dialect.quote_identifier("grouped")
                    )
                }
            }
            Shape::Exists => {
                let source = self.render_source(dialect, joined, &mut counter, &mut params)?;
                format!("SELECT EXISTS (SELECT 1{})", source)
            }
        };

        Ok((sql, params))
    }

    /// FROM through HAVING.
    #[allow(clippy::result_large_err)]
    fn render_source(
        &self,
        dialect: Dialect,
        joined: &RelationJoins,
        counter: &mut usize,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        let table = self.table.as_deref().filter(|t| !t.trim().is_empty()).ok_or_else(|| {
            Error::config(ConfigErrorKind::MissingModel, "statement has no table or model")
        })?;

        let mut sql = String::from(" FROM ");
        sql.push_str(&quote_table(dialect, table));
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote_identifier(alias));
        }

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.render(dialect, counter, params)?);
        }
        for join in &joined.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        if let Some(w) = render_where(&self.filters, &self.or_filters, dialect, counter, params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&w);
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if let Some(having) = render_group(&self.having, " AND ", dialect, counter, params)? {
            sql.push_str(" HAVING ");
            sql.push_str(&having);
        }
        Ok(sql)
    }

    /// Execute, scan into records of the model and run the preload plan.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(table = ?self.table))]
    pub async fn fetch<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<Box<dyn Record>>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let model = match self.require_model() {
            Ok(model) => model,
            Err(e) => return Outcome::Err(e),
        };
        let dialect = self.config.dialect_or(conn.dialect());
        let plan = match Planner::new(self.config.identifier_budget).plan(model, &self.preloads) {
            Ok(plan) => plan,
            Err(e) => return Outcome::Err(e),
        };
        let (sql, params) = match self.build_with_plan(&plan, dialect) {
            Ok(built) => built,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %sql, params = params.len(), "Executing select");

        let rows = match conn.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e.with_sql(&sql)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let joins = plan.join_tree(QueryRef::Root);
        let mut records = match recover("scan", || assemble(model, &rows, &joins, false)) {
            Ok(records) => records,
            Err(e) => return Outcome::Err(e),
        };

        if plan.separate_steps().next().is_some() {
            let mut roots: Vec<&mut dyn Record> = records.iter_mut().map(|r| -> &mut dyn Record { &mut **r }).collect();
            match run_plan(cx, conn, &mut roots, &plan, &self.config, dialect).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        tracing::debug!(records = records.len(), "Select complete");
        Outcome::Ok(records)
    }

    /// Execute and return every row as an ordered column map. Preloads are ignored.
    pub async fn scan_maps<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<MapRow>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let dialect = self.config.dialect_or(conn.dialect());
        let (sql, params) = match self.render(dialect, &RelationJoins::default(), Shape::Select) {
            Ok(built) => built,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %sql, "Executing select into maps");
        match conn.query(cx, &sql, &params).await {
            Outcome::Ok(rows) => Outcome::Ok(scan_maps(&rows)),
            Outcome::Err(e) => Outcome::Err(e.with_sql(&sql)),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Count the rows the statement would return.
    pub async fn count<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        let dialect = self.config.dialect_or(conn.dialect());
        let (sql, params) = match self.render(dialect, &RelationJoins::default(), Shape::Count) {
            Ok(built) => built,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %sql, "Executing count");
        conn.query_one(cx, &sql, &params).await.map(|row| {
            row.and_then(|r| r.get(0).and_then(Value::as_i64))
                .map_or(0, |n| n.max(0) as u64)
        })
    }

    /// Does the statement match at least one row?
    pub async fn exists<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<bool, Error> {
        let dialect = self.config.dialect_or(conn.dialect());
        let (sql, params) = match self.render(dialect, &RelationJoins::default(), Shape::Exists) {
            Ok(built) => built,
            Err(e) => return Outcome::Err(e),
        };
        tracing::debug!(sql = %sql, "Executing exists");
        conn.query_one(cx, &sql, &params).await.map(|row| {
            row.and_then(|r| r.get(0).and_then(Value::as_bool))
                .unwrap_or(false)
        })
    }
}

/// Quote a table name, quoting each part of `schema.table` on its own.
pub(crate) fn quote_table(dialect: Dialect, table: &str) -> String {
    table
        .split('.')
        .map(|part| dialect.quote_identifier(part))
        .collect::<Vec<_>>()
        .join(".")
}

/// A SELECT for a known model type.
#[derive(Debug, Clone)]
pub struct Select<M: Model> {
    spec: QuerySpec,
    _marker: PhantomData<M>,
}

macro_rules! forward {
    ($($(#[$meta:meta])* fn $name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            $(#[$meta])*
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.spec = self.spec.$name($($arg),*);
                self
            }
        )*
    };
}

impl<M: Model> Select<M> {
    pub fn new() -> Self {
        Self {
            spec: QuerySpec::new().model::<M>(),
            _marker: PhantomData,
        }
    }

    forward! {
        fn alias(alias: impl Into<String>);
        fn column(column: impl Into<String>);
        fn column_expr(sql: impl Into<String>, args: impl IntoIterator<Item = Value>);
        fn column_all();
        fn distinct();
        #[doc(alias = "where")]
        fn filter(sql: impl Into<String>, args: impl IntoIterator<Item = Value>);
        #[doc(alias = "where_or")]
        fn filter_or(sql: impl Into<String>, args: impl IntoIterator<Item = Value>);
        fn join(sql: impl Into<String>, args: impl IntoIterator<Item = Value>);
        fn left_join(sql: impl Into<String>, args: impl IntoIterator<Item = Value>);
        fn group(expr: impl Into<String>);
        fn having(sql: impl Into<String>, args: impl IntoIterator<Item = Value>);
        fn order(expr: impl Into<String>);
        fn limit(n: u64);
        fn offset(n: u64);
        fn with_dialect(dialect: Dialect);
        fn with_config(config: EngineConfig);
        fn preload(path: impl Into<String>, apply: impl IntoIterator<Item = ApplyFn>);
        fn preload_relation(path: impl Into<String>);
        fn join_relation(path: impl Into<String>);
        fn preload_separate(path: impl Into<String>);
        fn preload_spec(spec: PreloadSpec);
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn into_spec(self) -> QuerySpec {
        self.spec
    }

    #[allow(clippy::result_large_err)]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.spec.build()
    }

    /// The root statement as it will run, preload joins included.
    #[allow(clippy::result_large_err)]
    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        self.spec.build_planned()
    }

    /// Execute and return every matching model with its preloads.
    pub async fn all<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<M>, Error> {
        self.spec.fetch(cx, conn).await.and_then(|records| {
            match records.into_iter().map(downcast::<M>).collect::<Result<Vec<M>>>() {
                Ok(models) => Outcome::Ok(models),
                Err(e) => Outcome::Err(e),
            }
        })
    }

    /// Same as [`all`](Self::all).
    pub async fn scan_model<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<M>, Error> {
        self.all(cx, conn).await
    }

    /// Execute with `LIMIT 1`.
    pub async fn first<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Option<M>, Error> {
        self.limit(1).all(cx, conn).await.map(|models| models.into_iter().next())
    }

    pub async fn scan_maps<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<Vec<MapRow>, Error> {
        self.spec.scan_maps(cx, conn).await
    }

    /// Execute into `dest`.
    pub async fn scan<C: Connection>(self, cx: &Cx, conn: &C, dest: ScanDest<'_, M>) -> Outcome<(), Error> {
        match dest {
            ScanDest::Maps(out) => self.spec.scan_maps(cx, conn).await.map(|maps| out.extend(maps)),
            dest => self.spec.fetch(cx, conn).await.and_then(|records| {
                match dest.fill_records(records) {
                    Ok(()) => Outcome::Ok(()),
                    Err(e) => Outcome::Err(e),
                }
            }),
        }
    }

    pub async fn count<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<u64, Error> {
        self.spec.count(cx, conn).await
    }

    pub async fn exists<C: Connection>(self, cx: &Cx, conn: &C) -> Outcome<bool, Error> {
        self.spec.exists(cx, conn).await
    }
}

impl<M: Model> Default for Select<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> From<Select<M>> for QuerySpec {
    fn from(select: Select<M>) -> Self {
        select.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;
    use crate::testing::{MockConnection, Post, Tag, block_on, cx, row, unwrap_outcome};
    use linkorm_core::ConfigErrorKind;

    #[test]
    fn placeholders_follow_emission_order() {
        let (sql, params) = QuerySpec::new()
            .table("posts")
            .column_expr("score * ? AS weighted", params![2])
            .filter("author_id = ?", params![7_i64])
            .filter_or("title = ?", params!["a"])
            .filter_or("title = ?", params!["b"])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT score * $1 AS weighted FROM \"posts\" WHERE (author_id = $2) AND ((title = $3) OR (title = $4))"
        );
        assert_eq!(
            params,
            vec![
                Value::Int(2),
                Value::BigInt(7),
                Value::Text("a".into()),
                Value::Text("b".into())
            ]
        );
    }

    #[test]
    fn or_group_alone_is_the_where_clause() {
        let (sql, _) = QuerySpec::new()
            .table("posts")
            .filter_or("a = ?", params![1])
            .filter_or("b = ?", params![2])
            .build()
            .unwrap();
        assert_eq!(sql, "SELECT * FROM \"posts\" WHERE (a = $1) OR (b = $2)");
    }

    #[test]
    fn sqlite_and_mysql_markers() {
        let spec = QuerySpec::new()
            .table("posts")
            .filter("id IN (?, ?)", params![1, 2])
            .order("id DESC")
            .limit(10)
            .offset(20);
        let (sql, _) = spec.clone().with_dialect(Dialect::Sqlite).build().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM \"posts\" WHERE id IN (?1, ?2) ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
        let (sql, _) = spec.with_dialect(Dialect::Mysql).build().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM `posts` WHERE id IN (?, ?) ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn schema_qualified_table_and_alias() {
        let spec = QuerySpec::new().table("blog.posts");
        assert_eq!(spec.qualifier(), "posts");
        let (sql, _) = spec.clone().column_all().build().unwrap();
        assert_eq!(sql, "SELECT \"posts\".* FROM \"blog\".\"posts\"");

        let (sql, _) = spec.alias("p").column_all().distinct().build().unwrap();
        assert_eq!(sql, "SELECT DISTINCT \"p\".* FROM \"blog\".\"posts\" AS \"p\"");
    }

    #[test]
    fn joins_and_grouping_number_in_text_order() {
        let (sql, params) = QuerySpec::new()
            .table("posts")
            .column("posts.id")
            .column("COUNT(c.id) AS n")
            .left_join("comments AS c ON c.post_id = posts.id AND c.score > ?", params![3])
            .filter("posts.author_id = ?", params![9])
            .group("posts.id")
            .having("COUNT(c.id) > ?", params![1])
            .build()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT posts.id, COUNT(c.id) AS n FROM \"posts\" \
             LEFT JOIN comments AS c ON c.post_id = posts.id AND c.score > $1 \
             WHERE posts.author_id = $2 GROUP BY posts.id HAVING COUNT(c.id) > $3"
        );
        assert_eq!(params, vec![Value::Int(3), Value::Int(9), Value::Int(1)]);
    }

    #[test]
    fn count_and_exists_shapes() {
        let spec = QuerySpec::new()
            .table("posts")
            .column("title")
            .filter("author_id = ?", params![1])
            .order("id")
            .limit(5);
        let (sql, params) = spec.build_count().unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM \"posts\" WHERE author_id = $1");
        assert_eq!(params.len(), 1);

        let (sql, _) = spec.build_exists().unwrap();
        assert_eq!(sql, "SELECT EXISTS (SELECT 1 FROM \"posts\" WHERE author_id = $1)");

        let (sql, _) = spec.group("author_id").build_count().unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM (SELECT 1 FROM \"posts\" WHERE author_id = $1 GROUP BY author_id) AS \"grouped\""
        );
    }

    #[test]
    fn missing_table_and_model_are_config_errors() {
        let err = QuerySpec::new().build().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingModel));

        let err = QuerySpec::new().table("posts").build_planned().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingModel));
    }

    #[test]
    fn argument_mismatch_fails_before_querying() {
        let conn = MockConnection::new(|_, _| Ok(Vec::new()));
        let outcome = block_on(async {
            let cx = cx();
            Select::<Tag>::new()
                .filter_or("id = ?", params![1, 2])
                .filter("name = ? AND id > ?", params!["rust"])
                .all(&cx, &conn)
                .await
        });
        match outcome {
            Outcome::Err(e) => assert_eq!(e.config_kind(), Some(ConfigErrorKind::PlaceholderMismatch)),
            other => panic!("expected a config error, got {other:?}"),
        }
        assert!(conn.calls().is_empty());

        let err = QuerySpec::new()
            .table("posts")
            .having("COUNT(*) > ?", Vec::new())
            .build_count()
            .unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::PlaceholderMismatch));
    }

    #[test]
    fn joined_preload_adds_prefixed_columns() {
        let (sql, _) = Select::<Post>::new()
            .preload_relation("author")
            .preload_relation("comments")
            .to_sql()
            .unwrap();
        assert!(sql.starts_with("SELECT \"posts\".*, \"author\".\"id\" AS \"author__id\""), "{sql}");
        assert!(sql.contains("\"author\".\"name\" AS \"author__name\""), "{sql}");
        assert!(
            sql.ends_with("FROM \"posts\" LEFT JOIN \"people\" AS \"author\" ON \"author\".\"id\" = \"posts\".\"author_id\""),
            "{sql}"
        );
        assert!(!sql.contains("comments"), "{sql}");
    }

    #[test]
    fn nested_join_hangs_off_its_owner_alias() {
        let (sql, _) = Select::<Post>::new()
            .preload_relation("author.team")
            .to_sql()
            .unwrap();
        assert!(
            sql.contains("LEFT JOIN \"teams\" AS \"author__team\" ON \"author__team\".\"id\" = \"author\".\"team_id\""),
            "{sql}"
        );
        assert!(sql.contains("\"author__team\".\"name\" AS \"author__team__name\""), "{sql}");
    }

    #[test]
    fn forced_join_on_many_to_many_goes_through_the_link_table() {
        let (sql, _) = Select::<Post>::new().join_relation("tags").to_sql().unwrap();
        assert!(
            sql.contains(
                "LEFT JOIN \"post_tags\" AS \"tags__link\" ON \"tags__link\".\"post_id\" = \"posts\".\"id\" \
                 LEFT JOIN \"tags\" AS \"tags\" ON \"tags\".\"id\" = \"tags__link\".\"tag_id\""
            ),
            "{sql}"
        );
    }

    #[test]
    fn all_assembles_joined_rows() {
        let conn = MockConnection::new(|_, _| {
            Ok(vec![
                row(&[
                    ("id", Value::BigInt(1)),
                    ("title", Value::Text("hello".into())),
                    ("author_id", Value::BigInt(7)),
                    ("author__id", Value::BigInt(7)),
                    ("author__name", Value::Text("ann".into())),
                    ("author__team_id", Value::Null),
                    ("author__mentor_id", Value::Null),
                    ("author__boss_id", Value::Null),
                ]),
                row(&[
                    ("id", Value::BigInt(2)),
                    ("title", Value::Text("orphan".into())),
                    ("author_id", Value::BigInt(8)),
                    ("author__id", Value::Null),
                    ("author__name", Value::Null),
                    ("author__team_id", Value::Null),
                    ("author__mentor_id", Value::Null),
                    ("author__boss_id", Value::Null),
                ]),
            ])
        });
        let posts = block_on(async {
            let cx = cx();
            unwrap_outcome(Select::<Post>::new().preload_relation("author").all(&cx, &conn).await)
        });

        assert_eq!(conn.calls().len(), 1);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author.get().map(|p| p.name.as_str()), Some("ann"));
        assert!(posts[1].author.get().is_none());
    }

    #[test]
    fn scan_destinations() {
        let conn = MockConnection::new(|_, _| {
            Ok(vec![
                row(&[("id", Value::BigInt(1)), ("name", Value::Text("rust".into()))]),
                row(&[("id", Value::BigInt(2)), ("name", Value::Text("sql".into()))]),
            ])
        });
        block_on(async {
            let cx = cx();

            let mut many: Vec<Tag> = Vec::new();
            unwrap_outcome(Select::<Tag>::new().scan(&cx, &conn, ScanDest::Many(&mut many)).await);
            assert_eq!(many.len(), 2);
            assert_eq!(many[1].id, Some(2));

            let mut one = Tag::default();
            unwrap_outcome(Select::<Tag>::new().scan(&cx, &conn, ScanDest::One(&mut one)).await);
            assert_eq!(one.name, "rust");

            let mut maps = Vec::new();
            unwrap_outcome(Select::<Tag>::new().scan(&cx, &conn, ScanDest::Maps(&mut maps)).await);
            assert_eq!(maps[1]["name"], Value::Text("sql".into()));
        });
    }

    #[test]
    fn scan_one_without_rows_is_not_found() {
        let conn = MockConnection::new(|_, _| Ok(Vec::new()));
        let outcome = block_on(async {
            let cx = cx();
            let mut one = Tag::default();
            Select::<Tag>::new().scan(&cx, &conn, ScanDest::One(&mut one)).await
        });
        match outcome {
            Outcome::Err(Error::Query(q)) => {
                assert_eq!(q.kind, linkorm_core::QueryErrorKind::NotFound);
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn count_and_exists_read_the_first_column() {
        let conn = MockConnection::new(|sql, _| {
            if sql.starts_with("SELECT COUNT") {
                Ok(vec![row(&[("count", Value::BigInt(3))])])
            } else {
                Ok(vec![row(&[("exists", Value::Int(1))])])
            }
        });
        block_on(async {
            let cx = cx();
            assert_eq!(unwrap_outcome(Select::<Tag>::new().count(&cx, &conn).await), 3);
            assert!(unwrap_outcome(Select::<Tag>::new().exists(&cx, &conn).await));
        });
    }

    #[test]
    fn database_errors_carry_the_statement() {
        let conn = MockConnection::new(|_, _| Err("relation \"tags\" does not exist".into()));
        let outcome = block_on(async {
            let cx = cx();
            Select::<Tag>::new().all(&cx, &conn).await
        });
        match outcome {
            Outcome::Err(e) => assert_eq!(e.sql(), Some("SELECT * FROM \"tags\"")),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
