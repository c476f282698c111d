//! Test models and a recording mock connection.

use asupersync::runtime::RuntimeBuilder;
use asupersync::{CancelReason, Cx, Outcome};
use linkorm_core::{Connection, Dialect, Error, Related, RelatedMany, Row, Value};
use linkorm_macros::Model;
use std::sync::{Arc, Mutex};

#[derive(Model, Debug, Clone, Default, PartialEq)]
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

#[derive(Model, Debug, Clone, Default, PartialEq)]
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

#[derive(Model, Debug, Clone, Default, PartialEq)]
#[orm(table = "teams")]
pub struct Team {
    #[orm("id,pk")]
    pub id: i64,
    pub name: String,
    pub lead_id: Option<i64>,
    #[orm("relation:belongs-to,join:lead_id=id")]
    pub lead: Related<Person>,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
#[orm(table = "comments")]
pub struct Comment {
    #[orm("id,pk")]
    pub id: i64,
    pub post_id: i64,
    pub body: String,
    #[orm("relation:belongs-to,join:post_id=id")]
    pub post: Related<Post>,
}

#[derive(Model, Debug, Clone, Default, PartialEq)]
#[orm(table = "tags")]
pub struct Tag {
    #[orm("id,pk")]
    pub id: Option<i64>,
    pub name: String,
}

/// Relations whose foreign keys match neither side.
#[derive(Model, Debug, Clone, Default, PartialEq)]
#[orm(table = "drafts")]
pub struct Draft {
    #[orm("id,pk")]
    pub id: i64,
    pub reviewer_ref: Option<i64>,
    #[sql("foreignKey:ReviewerRef;references:ID")]
    pub reviewer: Related<Person>,
    #[sql("foreignKey:WatcherRef")]
    pub watchers: RelatedMany<Person>,
}

pub fn row(cells: &[(&str, Value)]) -> Row {
    Row::new(
        cells.iter().map(|(name, _)| (*name).to_string()).collect(),
        cells.iter().map(|(_, value)| value.clone()).collect(),
    )
}

type Responder = dyn Fn(&str, &[Value]) -> std::result::Result<Vec<Row>, String> + Send + Sync;
type CancelWhen = dyn Fn(&str) -> bool + Send + Sync;

#[derive(Default)]
pub struct MockState {
    pub calls: Vec<(String, Vec<Value>)>,
}

/// Records every statement and answers queries through a closure.
#[derive(Clone)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
    responder: Arc<Responder>,
    cancel_when: Option<Arc<CancelWhen>>,
    dialect: Dialect,
}

impl MockConnection {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> std::result::Result<Vec<Row>, String> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            responder: Arc::new(responder),
            cancel_when: None,
            dialect: Dialect::Postgres,
        }
    }

    /// Answer matching queries with a cancellation instead of rows.
    pub fn cancel_on<F>(mut self, when: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.cancel_when = Some(Arc::new(when));
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().expect("lock poisoned").calls.clone()
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let responder = Arc::clone(&self.responder);
        let cancel = self.cancel_when.as_ref().is_some_and(|when| when(sql));
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            state
                .lock()
                .expect("lock poisoned")
                .calls
                .push((sql.clone(), params.clone()));
            if cancel {
                return Outcome::Cancelled(CancelReason::user("mock connection cancelled"));
            }
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
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            state.lock().expect("lock poisoned").calls.push((sql, params));
            Outcome::Ok(1)
        }
    }
}

pub fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Run a future to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(f: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f)
}

pub fn cx() -> Cx {
    Cx::for_testing()
}
