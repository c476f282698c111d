//! Batch Relation Loader.
//!
//! One level of a relation path is loaded with a single statement: the owner
//! keys are collected and deduplicated, the related rows fetched with
//! `IN (...)`, grouped by the owner key they were fetched for, and assigned
//! back onto every owner with that key.

use crate::join::relation_joins;
use crate::plan::{JoinNode, Plan, QueryRef};
use crate::preload::ApplyFn;
use crate::scan::{PARENT_KEY_COLUMN, assemble};
use crate::select::QuerySpec;
use asupersync::{Cx, Outcome};
use indexmap::{IndexMap, IndexSet};
use linkorm_core::{
    AssignMode, ConfigErrorKind, Connection, Dialect, Error, KeyValue, LoadMode, Record,
    RelationDescriptor, Result, Row, Value, read_path, recover, resolve_type,
};

/// What one level load did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelReport {
    /// Distinct owner keys sent in the `IN` list.
    pub keys: usize,
    /// Rows returned by the statement.
    pub rows: usize,
    /// Whether a statement was executed.
    pub queried: bool,
    /// Whether already-loaded relations were reused instead of querying.
    pub reused: bool,
}

impl LevelReport {
    pub(crate) fn reused(owners: usize) -> Self {
        Self {
            keys: owners,
            rows: 0,
            queried: false,
            reused: true,
        }
    }
}

/// A relation level and the statement context it is loaded in.
pub(crate) struct LevelTarget<'p> {
    pub relation: &'p RelationDescriptor,
    pub apply: &'p [ApplyFn],
    /// Plan whose join steps ride along this level's statement.
    pub plan: Option<(&'p Plan, QueryRef)>,
}

/// Load `relation` for every record in `parents` with one statement.
///
/// Collections are replaced, so loading twice gives the same result; single
/// relations are only filled when empty. `apply` transforms the statement
/// before it is run.
pub async fn load_level<C: Connection>(
    cx: &Cx,
    conn: &C,
    parents: &mut [&mut dyn Record],
    relation: &RelationDescriptor,
    apply: &[ApplyFn],
    dialect: Dialect,
    mode: LoadMode,
) -> Outcome<LevelReport, Error> {
    let target = LevelTarget {
        relation,
        apply,
        plan: None,
    };
    load(cx, conn, parents, &target, dialect, mode).await
}

#[tracing::instrument(
    level = "debug",
    skip(cx, conn, parents, target),
    fields(relation = target.relation.field)
)]
pub(crate) async fn load<C: Connection>(
    cx: &Cx,
    conn: &C,
    parents: &mut [&mut dyn Record],
    target: &LevelTarget<'_>,
    dialect: Dialect,
    mode: LoadMode,
) -> Outcome<LevelReport, Error> {
    let relation = target.relation;
    let assign_mode = if relation.cardinality.is_collection() {
        AssignMode::Replace
    } else {
        AssignMode::IfEmpty
    };

    let owner_keys = match recover("load_relation", || collect_keys(parents, relation)) {
        Ok(keys) => keys,
        Err(e) => return Outcome::Err(e),
    };
    let distinct: IndexSet<&KeyValue> = owner_keys.iter().flatten().collect();

    tracing::info!(
        parent_model = relation.owner.type_name,
        related_model = relation.target.type_name,
        relation = relation.field,
        parent_count = parents.len(),
        key_count = distinct.len(),
        "Batch loading relation"
    );

    if distinct.is_empty() {
        let result = recover("load_relation", || {
            for parent in parents.iter_mut() {
                assign(&mut **parent, relation, Vec::new(), assign_mode, mode)?;
            }
            Ok(())
        });
        return match result {
            Ok(()) => Outcome::Ok(LevelReport::default()),
            Err(e) => Outcome::Err(e),
        };
    }

    if let Some(reason) = cx.cancel_reason() {
        return Outcome::Cancelled(reason);
    }

    let keys: Vec<Value> = distinct.iter().map(|k| k.to_value()).collect();
    let (sql, params, joins) = match build_statement(target, keys, dialect) {
        Ok(built) => built,
        Err(e) => return Outcome::Err(e),
    };
    tracing::debug!(sql = %sql, params = params.len(), "Relation batch SQL");

    let rows = match conn.query(cx, &sql, &params).await {
        Outcome::Ok(rows) => rows,
        Outcome::Err(e) => return Outcome::Err(e.with_sql(&sql)),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let report = LevelReport {
        keys: distinct.len(),
        rows: rows.len(),
        queried: true,
        reused: false,
    };
    let result = recover("load_relation", || {
        let grouped = group_rows(relation, &rows, &joins)?;
        for (parent, key) in parents.iter_mut().zip(&owner_keys) {
            let children = key
                .as_ref()
                .and_then(|k| grouped.get(k))
                .map(|records| records.iter().map(|r| r.clone_record()).collect())
                .unwrap_or_default();
            assign(&mut **parent, relation, children, assign_mode, mode)?;
        }
        Ok(())
    });
    match result {
        Ok(()) => Outcome::Ok(report),
        Err(e) => Outcome::Err(e),
    }
}

/// Normalized local key of every parent, `None` where it is unset.
#[allow(clippy::result_large_err)]
fn collect_keys(
    parents: &[&mut dyn Record],
    relation: &RelationDescriptor,
) -> Result<Vec<Option<KeyValue>>> {
    let owner = resolve_type(relation.owner)?;
    let field = owner.field_by_column(&relation.local_key).ok_or_else(|| {
        Error::config(
            ConfigErrorKind::IncompleteRelation,
            format!(
                "{} has no column '{}' for relation '{}'",
                relation.owner.type_name, relation.local_key, relation.field
            ),
        )
    })?;
    Ok(parents
        .iter()
        .map(|p| read_path(&**p, &field.path).and_then(|v| v.to_key()))
        .collect())
}

#[allow(clippy::result_large_err)]
fn build_statement(
    target: &LevelTarget<'_>,
    keys: Vec<Value>,
    dialect: Dialect,
) -> Result<(String, Vec<Value>, Vec<JoinNode>)> {
    let relation = target.relation;
    let descriptor = resolve_type(relation.target)?;
    let table = descriptor.table();
    let markers = vec!["?"; keys.len()].join(", ");
    let parent_key = dialect.quote_identifier(PARENT_KEY_COLUMN);

    let mut spec = QuerySpec::new()
        .model_type(relation.target)
        .with_dialect(dialect)
        .column(format!("{}.*", dialect.quote_identifier(table)));

    spec = match &relation.link {
        None => {
            let fk = dialect.quote_qualified(table, &relation.foreign_key);
            spec.column(format!("{fk} AS {parent_key}"))
                .filter(format!("{fk} IN ({markers})"), keys)
        }
        Some(link) => {
            let owner_col = dialect.quote_qualified(&link.table, &link.parent_column);
            spec.column(format!("{owner_col} AS {parent_key}"))
                .join(
                    format!(
                        "{} ON {} = {}",
                        dialect.quote_identifier(&link.table),
                        dialect.quote_qualified(&link.table, &link.child_column),
                        dialect.quote_qualified(table, &relation.foreign_key),
                    ),
                    [],
                )
                .filter(format!("{owner_col} IN ({markers})"), keys)
        }
    };

    for f in target.apply {
        spec = f(spec);
    }

    match target.plan {
        Some((plan, query)) => {
            let joined = relation_joins(plan, query, &spec.qualifier(), dialect)?;
            let (sql, params) = spec.render_select(dialect, &joined)?;
            Ok((sql, params, plan.join_tree(query)))
        }
        None => {
            let (sql, params) = spec.render_select(dialect, &Default::default())?;
            Ok((sql, params, Vec::new()))
        }
    }
}

/// Child records keyed by the owner key each row was fetched for.
#[allow(clippy::result_large_err)]
fn group_rows(
    relation: &RelationDescriptor,
    rows: &[Row],
    joins: &[JoinNode],
) -> Result<IndexMap<KeyValue, Vec<Box<dyn Record>>>> {
    let mut by_owner: IndexMap<KeyValue, Vec<Row>> = IndexMap::new();
    for row in rows {
        match row.get_by_name(PARENT_KEY_COLUMN).and_then(Value::to_key) {
            Some(key) => by_owner.entry(key).or_default().push(row.clone()),
            None => tracing::trace!(relation = relation.field, "Row without owner key, skipped"),
        }
    }

    let mut grouped = IndexMap::with_capacity(by_owner.len());
    for (key, rows) in by_owner {
        grouped.insert(key, assemble(relation.target, &rows, joins, false)?);
    }
    Ok(grouped)
}

#[allow(clippy::result_large_err)]
fn assign(
    parent: &mut dyn Record,
    relation: &RelationDescriptor,
    children: Vec<Box<dyn Record>>,
    assign_mode: AssignMode,
    mode: LoadMode,
) -> Result<()> {
    let result = match parent.relation_mut(relation.field) {
        Some(slot) => slot.assign(children, assign_mode).map(|_| ()),
        None => Err(Error::config(
            ConfigErrorKind::UnknownRelation,
            format!(
                "{} has no relation '{}'",
                relation.owner.type_name, relation.field
            ),
        )),
    };
    match (result, mode) {
        (Ok(()), _) => Ok(()),
        (Err(e), LoadMode::Strict) => Err(e),
        (Err(e), LoadMode::BestEffort) => {
            tracing::warn!(
                model = relation.owner.type_name,
                relation = relation.field,
                error = %e,
                "Failed to attach relation to record, leaving it unset"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Comment, MockConnection, Person, Post, Tag, block_on, cx, row, unwrap_outcome};
    use linkorm_core::{Model, Related, resolve};

    fn comment_rows(params: &[Value]) -> Vec<Row> {
        let all = [(10, 1, "first"), (11, 1, "second"), (12, 2, "third")];
        all.iter()
            .filter(|(_, post_id, _)| params.contains(&Value::BigInt(*post_id)))
            .map(|(id, post_id, body)| {
                row(&[
                    ("id", Value::BigInt(*id)),
                    ("post_id", Value::BigInt(*post_id)),
                    ("body", Value::Text((*body).into())),
                    (PARENT_KEY_COLUMN, Value::BigInt(*post_id)),
                ])
            })
            .collect()
    }

    fn post(id: i64) -> Post {
        Post {
            id,
            title: format!("post {id}"),
            ..Post::default()
        }
    }

    fn relation<M: Model>(field: &str) -> RelationDescriptor {
        resolve::<M>()
            .unwrap()
            .relation(field)
            .cloned()
            .unwrap()
    }

    fn load_all<M: Model>(
        conn: &MockConnection,
        records: &mut [M],
        relation: &RelationDescriptor,
        apply: &[ApplyFn],
    ) -> LevelReport {
        block_on(async {
            let cx = cx();
            let mut parents: Vec<&mut dyn Record> =
                records.iter_mut().map(|r| r as &mut dyn Record).collect();
            unwrap_outcome(
                load_level(&cx, conn, &mut parents, relation, apply, Dialect::Postgres, LoadMode::Strict)
                    .await,
            )
        })
    }

    #[test]
    fn has_many_loads_every_owner_in_one_statement() {
        let conn = MockConnection::new(|_, params| Ok(comment_rows(params)));
        let mut posts = vec![post(1), post(2), post(3)];
        let report = load_all(&conn, &mut posts, &relation::<Post>("comments"), &[]);

        let calls = conn.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            "SELECT \"comments\".*, \"comments\".\"post_id\" AS \"__parent_key\" \
             FROM \"comments\" WHERE \"comments\".\"post_id\" IN ($1, $2, $3)"
        );
        assert_eq!(report.keys, 3);
        assert_eq!(report.rows, 3);
        assert!(report.queried);

        assert_eq!(posts[0].comments.len(), 2);
        assert_eq!(posts[1].comments.len(), 1);
        assert_eq!(posts[1].comments.iter().next().map(|c| c.body.as_str()), Some("third"));
        assert!(posts[2].comments.is_loaded());
        assert!(posts[2].comments.is_empty());
    }

    #[test]
    fn belongs_to_sends_each_key_once() {
        let conn = MockConnection::new(|_, params| {
            Ok(params
                .iter()
                .filter_map(Value::as_i64)
                .map(|id| {
                    row(&[
                        ("id", Value::BigInt(id)),
                        ("title", Value::Text(format!("post {id}"))),
                        ("author_id", Value::BigInt(0)),
                        (PARENT_KEY_COLUMN, Value::BigInt(id)),
                    ])
                })
                .collect())
        });
        let mut comments: Vec<Comment> = [(10, 1), (11, 1), (12, 2)]
            .iter()
            .map(|&(id, post_id)| Comment {
                id,
                post_id,
                ..Comment::default()
            })
            .collect();
        let report = load_all(&conn, &mut comments, &relation::<Comment>("post"), &[]);

        let calls = conn.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec![Value::BigInt(1), Value::BigInt(2)]);
        assert_eq!(report.keys, 2);
        assert_eq!(comments[0].post.get().map(|p| p.id), Some(1));
        assert_eq!(comments[1].post.get().map(|p| p.id), Some(1));
        assert_eq!(comments[2].post.get().map(|p| p.title.as_str()), Some("post 2"));
    }

    #[test]
    fn reloading_a_collection_replaces_it() {
        let conn = MockConnection::new(|_, params| Ok(comment_rows(params)));
        let mut posts = vec![post(1)];
        let comments = relation::<Post>("comments");
        load_all(&conn, &mut posts, &comments, &[]);
        load_all(&conn, &mut posts, &comments, &[]);
        assert_eq!(conn.calls().len(), 2);
        assert_eq!(posts[0].comments.len(), 2);
    }

    #[test]
    fn loaded_single_relation_is_not_overwritten() {
        let conn = MockConnection::new(|_, params| {
            Ok(params
                .iter()
                .filter_map(Value::as_i64)
                .map(|id| {
                    row(&[
                        ("id", Value::BigInt(id)),
                        ("title", Value::Text("from db".into())),
                        (PARENT_KEY_COLUMN, Value::BigInt(id)),
                    ])
                })
                .collect())
        });
        let mut comments = vec![
            Comment {
                id: 1,
                post_id: 5,
                post: Related::loaded(Post {
                    id: 5,
                    title: "kept".into(),
                    ..Post::default()
                }),
                ..Comment::default()
            },
            Comment {
                id: 2,
                post_id: 6,
                ..Comment::default()
            },
        ];
        load_all(&conn, &mut comments, &relation::<Comment>("post"), &[]);
        assert_eq!(comments[0].post.get().map(|p| p.title.as_str()), Some("kept"));
        assert_eq!(comments[1].post.get().map(|p| p.title.as_str()), Some("from db"));
    }

    #[test]
    fn many_to_many_goes_through_the_link_table() {
        let conn = MockConnection::new(|_, _| {
            Ok(vec![
                row(&[
                    ("id", Value::BigInt(1)),
                    ("name", Value::Text("rust".into())),
                    (PARENT_KEY_COLUMN, Value::BigInt(1)),
                ]),
                row(&[
                    ("id", Value::BigInt(1)),
                    ("name", Value::Text("rust".into())),
                    (PARENT_KEY_COLUMN, Value::BigInt(2)),
                ]),
                row(&[
                    ("id", Value::BigInt(2)),
                    ("name", Value::Text("sql".into())),
                    (PARENT_KEY_COLUMN, Value::BigInt(2)),
                ]),
            ])
        });
        let mut posts = vec![post(1), post(2)];
        load_all(&conn, &mut posts, &relation::<Post>("tags"), &[]);

        assert_eq!(
            conn.calls()[0].0,
            "SELECT \"tags\".*, \"post_tags\".\"post_id\" AS \"__parent_key\" FROM \"tags\" \
             JOIN \"post_tags\" ON \"post_tags\".\"tag_id\" = \"tags\".\"id\" \
             WHERE \"post_tags\".\"post_id\" IN ($1, $2)"
        );
        let names = |p: &Post| p.tags.iter().map(|t: &Tag| t.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&posts[0]), vec!["rust"]);
        assert_eq!(names(&posts[1]), vec!["rust", "sql"]);
    }

    #[test]
    fn apply_functions_shape_the_batch_statement() {
        let conn = MockConnection::new(|_, params| Ok(comment_rows(params)));
        let mut posts = vec![post(1)];
        let newest = crate::preload::apply(|q| q.order("\"comments\".\"id\" DESC").filter("body <> ?", [Value::from("")]));
        load_all(&conn, &mut posts, &relation::<Post>("comments"), &[newest]);
        let (sql, params) = &conn.calls()[0];
        assert!(
            sql.ends_with("WHERE (\"comments\".\"post_id\" IN ($1)) AND (body <> $2) ORDER BY \"comments\".\"id\" DESC"),
            "{sql}"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn owners_without_keys_skip_the_statement() {
        let conn = MockConnection::new(|_, _| Err("no statement expected".into()));
        let mut people = vec![Person::default(), Person::default()];
        let report = load_all(&conn, &mut people, &relation::<Person>("team"), &[]);
        assert_eq!(report, LevelReport::default());
        assert!(conn.calls().is_empty());
        assert!(people.iter().all(|p| p.team.is_loaded() && p.team.get().is_none()));
    }

    #[test]
    fn database_errors_surface_with_the_statement() {
        let conn = MockConnection::new(|_, _| Err("boom".into()));
        let mut posts = vec![post(1)];
        let outcome = block_on(async {
            let cx = cx();
            let mut parents: Vec<&mut dyn Record> =
                posts.iter_mut().map(|r| r as &mut dyn Record).collect();
            load_level(
                &cx,
                &conn,
                &mut parents,
                &relation::<Post>("comments"),
                &[],
                Dialect::Postgres,
                LoadMode::BestEffort,
            )
            .await
        });
        match outcome {
            Outcome::Err(e) => assert!(e.sql().is_some_and(|s| s.contains("IN ($1)"))),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(!posts[0].comments.is_loaded());
    }
}
