mod common;

use common::{Comment, Post, RecordingConnection, int_params, row, run, unwrap_outcome};
use linkorm::{
    Dialect, Engine, EngineConfig, Error, LoadMode, Outcome, PARENT_KEY_COLUMN, Record, Select,
    Value, apply, load_level, resolve,
};

/// Posts 1 to 3; comments 10 and 11 belong to post 1, comment 12 to post 2.
fn comments_db() -> RecordingConnection {
    RecordingConnection::new(|sql, params| {
        let wanted = int_params(params);
        if !sql.contains("FROM \"comments\"") {
            let ids: Vec<i64> = (1..=3).filter(|id| wanted.is_empty() || wanted.contains(id)).collect();
            return Ok(post_rows(&ids));
        }
        Ok([(10, 1), (11, 1), (12, 2)]
            .into_iter()
            .filter(|(_, post)| wanted.contains(post))
            .map(|(id, post)| {
                row(&[
                    ("id", Value::BigInt(id)),
                    ("post_id", Value::BigInt(post)),
                    ("body", Value::Text(format!("comment {id}"))),
                    (PARENT_KEY_COLUMN, Value::BigInt(post)),
                ])
            })
            .collect())
    })
}

fn post_rows(ids: &[i64]) -> Vec<linkorm::Row> {
    ids.iter()
        .map(|&id| {
            row(&[
                ("id", Value::BigInt(id)),
                ("title", Value::Text(format!("post {id}"))),
                ("author_id", Value::BigInt(1)),
            ])
        })
        .collect()
}

#[test]
fn comments_for_three_posts_take_one_statement() {
    let db = comments_db();
    let conn = db.clone();
    let posts = run(|cx| async move {
        unwrap_outcome(
            Select::<Post>::new()
                .preload_relation("comments")
                .order("id")
                .all(&cx, &conn)
                .await,
        )
    });

    let calls = db.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "SELECT * FROM \"posts\" ORDER BY id");
    assert_eq!(
        calls[1].1,
        vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3)]
    );
    let counts: Vec<usize> = posts.iter().map(|p| p.comments.len()).collect();
    assert_eq!(counts, vec![2, 1, 0]);
    assert!(posts[2].comments.is_loaded());
}

#[test]
fn comment_owners_are_fetched_with_distinct_keys() {
    let db = RecordingConnection::new(|_, params| {
        Ok(int_params(params)
            .into_iter()
            .map(|id| {
                row(&[
                    ("id", Value::BigInt(id)),
                    ("title", Value::Text(format!("post {id}"))),
                    ("author_id", Value::BigInt(1)),
                    (PARENT_KEY_COLUMN, Value::BigInt(id)),
                ])
            })
            .collect())
    });
    let mut comments: Vec<Comment> = [(10, 1), (11, 1), (12, 2)]
        .into_iter()
        .map(|(id, post_id)| Comment {
            id,
            post_id,
            ..Comment::default()
        })
        .collect();

    let relation = resolve::<Comment>().unwrap().relation("post").cloned().unwrap();
    let conn = db.clone();
    let report = run(|cx| {
        let comments = &mut comments;
        async move {
            let mut parents: Vec<&mut dyn Record> =
                comments.iter_mut().map(|c| c as &mut dyn Record).collect();
            unwrap_outcome(
                load_level(&cx, &conn, &mut parents, &relation, &[], Dialect::Postgres, LoadMode::Strict)
                    .await,
            )
        }
    });

    let calls = db.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.ends_with("WHERE \"posts\".\"id\" IN ($1, $2)"), "{}", calls[0].0);
    assert_eq!(calls[0].1, vec![Value::BigInt(1), Value::BigInt(2)]);
    assert_eq!((report.keys, report.rows), (2, 2));

    let owners: Vec<i64> = comments
        .iter()
        .map(|c| c.post.get().map_or(0, |p| p.id))
        .collect();
    assert_eq!(owners, vec![1, 1, 2]);
}

#[test]
fn preload_functions_shape_the_batched_statement() {
    let db = comments_db();
    let conn = db.clone();
    let mut posts: Vec<Post> = (1..=2)
        .map(|id| Post {
            id,
            ..Post::default()
        })
        .collect();
    let engine = Engine::default();
    run(|cx| {
        let posts = &mut posts;
        async move { unwrap_outcome(engine.load_relations(&cx, &conn, posts, "comments").await) }
    });
    assert_eq!(posts[0].comments.len(), 2);

    let conn = db.clone();
    run(|cx| async move {
        unwrap_outcome(
            Select::<Post>::new()
                .filter("id = ?", linkorm::params![1_i64])
                .preload(
                    "comments",
                    [apply(|q| q.order("\"comments\".\"id\" DESC").limit(1))],
                )
                .all(&cx, &conn)
                .await,
        )
    });
    let last = db.statements().pop().unwrap();
    assert!(
        last.ends_with("WHERE \"comments\".\"post_id\" IN ($1) ORDER BY \"comments\".\"id\" DESC LIMIT 1"),
        "{last}"
    );
}

#[test]
fn tags_load_through_the_link_table() {
    let db = RecordingConnection::new(|sql, _| {
        if sql.contains("FROM \"tags\"") {
            Ok(vec![
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
        } else {
            Ok(post_rows(&[1, 2]))
        }
    });
    let conn = db.clone();
    let posts = run(|cx| async move {
        unwrap_outcome(Select::<Post>::new().preload_relation("tags").all(&cx, &conn).await)
    });

    assert!(db.statements()[1].contains("JOIN \"post_tags\" ON \"post_tags\".\"tag_id\" = \"tags\".\"id\""));
    assert!(posts[0].tags.is_loaded());
    assert!(posts[0].tags.is_empty());
    let names: Vec<&str> = posts[1].tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["rust", "sql"]);
}

fn failing_comments() -> RecordingConnection {
    RecordingConnection::new(|sql, _| {
        if sql.contains("FROM \"comments\"") {
            Err("permission denied for table comments".into())
        } else {
            Ok(post_rows(&[1]))
        }
    })
}

#[test]
fn best_effort_returns_records_without_the_failed_relation() {
    let conn = failing_comments();
    let engine = Engine::new(EngineConfig::default());
    let posts = run(|cx| async move {
        unwrap_outcome(engine.select::<Post>().preload_relation("comments").all(&cx, &conn).await)
    });
    assert_eq!(posts.len(), 1);
    assert!(!posts[0].comments.is_loaded());
}

#[test]
fn strict_mode_surfaces_the_relation_failure() {
    let conn = failing_comments();
    let engine = Engine::new(EngineConfig::default().strict());
    let outcome = run(|cx| async move {
        engine.select::<Post>().preload_relation("comments").all(&cx, &conn).await
    });
    match outcome {
        Outcome::Err(Error::Relation(e)) => {
            assert_eq!(e.model, "Post");
            assert_eq!(e.relation, "comments");
            assert!(e.message.contains("permission denied"));
        }
        other => panic!("expected a relation error, got {other:?}"),
    }
}
