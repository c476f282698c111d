//! Shared models and a recording connection for the integration tests.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use linkorm::{Connection, Cx, Error, Outcome, Related, RelatedMany, Row, Value};
use std::sync::{Arc, Mutex};

#[derive(linkorm::Model, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[orm(table = "posts")]
pub struct Post {
    #[orm("id,pk")]
    pub id: i64,
    pub title: String,
    pub author_id: i64,
    #[orm("relation:belongs-to,join:author_id=id")]
    pub author: Related<Person>,
    #[orm("relation:has-many,join:id=post_id")]
    pub comments: RelatedMany<Comment>,
    #[orm("relation:many-to-many,m2m:post_tags,join:id=post_id,link:tag_id=id")]
    pub tags: RelatedMany<Tag>,
}

#[derive(linkorm::Model, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[orm(table = "people")]
pub struct Person {
    #[orm("id,pk")]
    pub id: i64,
    pub name: String,
    pub team_id: Option<i64>,
    pub mentor_id: Option<i64>,
    pub boss_id: Option<i64>,
    #[orm("relation:belongs-to,join:team_id=id")]
    pub team: Related<Team>,
    #[orm("relation:belongs-to,join:mentor_id=id")]
    pub mentor: Related<Person>,
    #[orm("relation:belongs-to,join:boss_id=id")]
    pub boss: Related<Person>,
}

#[derive(linkorm::Model, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[orm(table = "teams")]
pub struct Team {
    #[orm("id,pk")]
    pub id: i64,
    pub name: String,
    pub lead_id: Option<i64>,
    #[orm("relation:belongs-to,join:lead_id=id")]
    pub lead: Related<Person>,
}

#[derive(linkorm::Model, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[orm(table = "comments")]
pub struct Comment {
    #[orm("id,pk")]
    pub id: i64,
    pub post_id: i64,
    pub body: String,
    #[orm("relation:belongs-to,join:post_id=id")]
    pub post: Related<Post>,
}

#[derive(linkorm::Model, Debug, Clone, Default, PartialEq, serde::Serialize)]
#[orm(table = "tags")]
pub struct Tag {
    #[orm("id,pk")]
    pub id: Option<i64>,
    pub name: String,
}

/// Audit columns shared by several tables.
#[derive(linkorm::Model, Debug, Clone, Default, PartialEq)]
pub struct Audit {
    pub created_by: String,
    #[sql("column:updated")]
    pub updated_at: i64,
}

/// Keys and relations left for the resolver to infer.
#[derive(linkorm::Model, Debug, Clone, Default, PartialEq)]
#[orm(table = "articles")]
pub struct Article {
    pub id: i64,
    #[serde(rename = "headline")]
    pub title: String,
    #[orm(",embed")]
    pub audit: Audit,
    #[orm(",readonly")]
    pub views: i64,
    #[orm("-")]
    pub scratch: String,
    pub notes: RelatedMany<Note>,
}

#[derive(linkorm::Model, Debug, Clone, Default, PartialEq)]
#[orm(table = "notes")]
pub struct Note {
    pub id: i64,
    pub article_id: i64,
    pub text: String,
}

pub fn row(cells: &[(&str, Value)]) -> Row {
    Row::new(
        cells.iter().map(|(name, _)| (*name).to_string()).collect(),
        cells.iter().map(|(_, value)| value.clone()).collect(),
    )
}

/// Columns of one person, prefixed with an alias chain (`""` for none).
pub fn person_cells(prefix: &str, id: i64, team: Option<i64>, mentor: Option<i64>, boss: Option<i64>) -> Vec<(String, Value)> {
    let name = |column: &str| {
        if prefix.is_empty() {
            column.to_string()
        } else {
            format!("{prefix}__{column}")
        }
    };
    vec![
        (name("id"), Value::BigInt(id)),
        (name("name"), Value::Text(format!("person {id}"))),
        (name("team_id"), team.map_or(Value::Null, Value::BigInt)),
        (name("mentor_id"), mentor.map_or(Value::Null, Value::BigInt)),
        (name("boss_id"), boss.map_or(Value::Null, Value::BigInt)),
    ]
}

pub fn owned_row(cells: Vec<(String, Value)>) -> Row {
    let (names, values) = cells.into_iter().unzip();
    Row::new(names, values)
}

/// Integer arguments of a statement.
pub fn int_params(params: &[Value]) -> Vec<i64> {
    params.iter().filter_map(Value::as_i64).collect()
}

type Responder = dyn Fn(&str, &[Value]) -> Result<Vec<Row>, String> + Send + Sync;

/// Records every statement and answers queries through a closure.
#[derive(Clone)]
pub struct RecordingConnection {
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    responder: Arc<Responder>,
}

impl RecordingConnection {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Vec<Row>, String> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|(sql, _)| sql).collect()
    }
}

impl Connection for RecordingConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let calls = Arc::clone(&self.calls);
        let responder = Arc::clone(&self.responder);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            calls
                .lock()
                .expect("lock poisoned")
                .push((sql.clone(), params.clone()));
            match responder(&sql, &params) {
                Ok(rows) => Outcome::Ok(rows),
                Err(message) => Outcome::Err(Error::database(sql, message)),
            }
        }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let calls = Arc::clone(&self.calls);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            calls.lock().expect("lock poisoned").push((sql, params));
            Outcome::Ok(1)
        }
    }
}

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Run `f` with a test context on a fresh current-thread runtime.
pub fn run<F, Fut, T>(f: F) -> T
where
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = T>,
{
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f(Cx::for_testing()))
}
