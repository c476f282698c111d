//! Preload declarations and the executor that runs a plan's separate steps.

use crate::loader::{self, LevelReport};
use crate::plan::{Plan, QueryRef};
use crate::select::QuerySpec;
use asupersync::{Cx, Outcome};
use linkorm_core::{Connection, Dialect, EngineConfig, Error, LoadMode, Record, RelationError};
use std::fmt;
use std::sync::Arc;

/// Transforms the statement that loads a relation (extra filters, ordering, limits).
pub type ApplyFn = Arc<dyn Fn(QuerySpec) -> QuerySpec + Send + Sync>;

/// Wrap a closure as an [`ApplyFn`].
pub fn apply<F>(f: F) -> ApplyFn
where
    F: Fn(QuerySpec) -> QuerySpec + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Caller preference for how a preload is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyHint {
    /// Let the relation's cardinality decide.
    #[default]
    Auto,
    /// Join even collections; owner rows repeat and are folded back by key.
    ForceJoin,
    /// Always issue a batched statement.
    ForceSeparate,
}

/// One requested relation path.
#[derive(Clone)]
pub struct PreloadSpec {
    /// Dotted relation path, e.g. `author.profile`.
    pub path: String,
    pub hint: StrategyHint,
    /// Applied, in order, to the statement loading the last segment.
    pub apply: Vec<ApplyFn>,
}

impl PreloadSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hint: StrategyHint::Auto,
            apply: Vec::new(),
        }
    }

    pub fn hint(mut self, hint: StrategyHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn apply(mut self, f: ApplyFn) -> Self {
        self.apply.push(f);
        self
    }
}

impl fmt::Debug for PreloadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadSpec")
            .field("path", &self.path)
            .field("hint", &self.hint)
            .field("apply", &self.apply.len())
            .finish()
    }
}

/// Run every separate step of `plan` against records already loaded.
///
/// Steps run in plan order, so a step's owners are always in place before
/// it runs. Join steps of the root statement must already be assembled into
/// `roots`. Returns one report per separate step that had owners to load.
#[tracing::instrument(level = "debug", skip(cx, conn, roots, plan, config))]
pub async fn run_plan<C: Connection>(
    cx: &Cx,
    conn: &C,
    roots: &mut [&mut dyn Record],
    plan: &Plan,
    config: &EngineConfig,
    dialect: Dialect,
) -> Outcome<Vec<(String, LevelReport)>, Error> {
    let mut reports = Vec::new();

    for (index, step) in plan.separate_steps() {
        if let Some(reason) = cx.cancel_reason() {
            tracing::debug!(path = %step.dotted_path(), "Cancelled before relation level");
            return Outcome::Cancelled(reason);
        }

        let mut parents = owners_of(plan, index, roots);
        if parents.is_empty() {
            tracing::debug!(path = %step.dotted_path(), "No owners loaded, skipping level");
            continue;
        }

        let field = step.relation.field;
        let reuse = parents
            .iter()
            .all(|p| p.relation(field).is_some_and(|slot| slot.is_loaded()));
        if reuse {
            tracing::debug!(
                path = %step.dotted_path(),
                owners = parents.len(),
                "Relation already loaded on every owner, reusing"
            );
            reports.push((step.dotted_path(), LevelReport::reused(parents.len())));
            continue;
        }

        let target = loader::LevelTarget {
            relation: &step.relation,
            apply: &step.apply,
            plan: Some((plan, QueryRef::Step(index))),
        };
        match loader::load(cx, conn, &mut parents, &target, dialect, config.load_mode).await {
            Outcome::Ok(report) => reports.push((step.dotted_path(), report)),
            Outcome::Err(e) => match config.load_mode {
                LoadMode::Strict => {
                    return Outcome::Err(Error::Relation(RelationError {
                        model: step.relation.owner.type_name,
                        relation: step.dotted_path(),
                        message: e.to_string(),
                        source: Some(Box::new(e)),
                    }));
                }
                LoadMode::BestEffort => {
                    tracing::warn!(
                        model = step.relation.owner.type_name,
                        relation = %step.dotted_path(),
                        error = %e,
                        "Failed to load relation, leaving it unset"
                    );
                }
            },
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    Outcome::Ok(reports)
}

/// Records owning step `index`: walk its ancestor relations down from the roots.
fn owners_of<'a>(
    plan: &Plan,
    index: usize,
    roots: &'a mut [&mut dyn Record],
) -> Vec<&'a mut dyn Record> {
    let mut fields = Vec::new();
    let mut cursor = plan.steps[index].parent;
    while let Some(i) = cursor {
        fields.push(plan.steps[i].relation.field);
        cursor = plan.steps[i].parent;
    }
    fields.reverse();

    let mut level: Vec<&'a mut dyn Record> = roots.iter_mut().map(|r| -> &mut dyn Record { &mut **r }).collect();
    for field in fields {
        level = level
            .into_iter()
            .filter_map(|record| record.relation_mut(field))
            .flat_map(|slot| slot.records_mut())
            .collect();
    }
    level
}
