//! Preload planning: join or separate query, per relation path segment.
//!
//! Every preload path is planned segment by segment. Join-eligible relations
//! (belongs-to, has-one) ride along the statement that loads their owner;
//! collections and relations of unknown cardinality get a batched statement
//! of their own. An alias chain that would overflow the identifier budget is
//! split: the first segment is planned normally and the remainder is queued
//! as a deferred preload rooted at the records the first segment loads.

use crate::preload::{ApplyFn, PreloadSpec, StrategyHint};
use linkorm_core::{
    CHAIN_SEPARATOR, Cardinality, ConfigErrorKind, Error, IdentifierBudget, ModelType,
    RelationDescriptor, Result, resolve_type,
};
use std::collections::VecDeque;
use std::fmt;

/// How one relation segment is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// LEFT JOIN into the statement that loads the owner.
    Join,
    /// One batched `IN (...)` statement after the owner is loaded.
    SeparateQuery,
    /// Like `SeparateQuery`, chosen because a join alias would be too long.
    DeferredSeparateQuery,
}

impl Strategy {
    pub const fn is_separate(self) -> bool {
        !matches!(self, Strategy::Join)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Join => "join",
            Strategy::SeparateQuery => "separate_query",
            Strategy::DeferredSeparateQuery => "deferred_separate_query",
        })
    }
}

/// Alias chain of a relation path: lower-cased segments joined by `__`.
///
/// `["Author", "Profile"]` becomes `author__profile`.
pub fn alias_chain<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref().to_lowercase())
        .collect::<Vec<_>>()
        .join(CHAIN_SEPARATOR)
}

/// Split a dotted relation path into its segments.
#[allow(clippy::result_large_err)]
pub fn split_path(path: &str) -> Result<Vec<String>> {
    let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
    if segments.iter().any(String::is_empty) {
        return Err(Error::config(
            ConfigErrorKind::InvalidPath,
            format!("invalid relation path '{}'", path),
        ));
    }
    Ok(segments)
}

/// Statement that fetches a step's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRef {
    /// The caller's primary statement.
    Root,
    /// The batched statement of a separate step.
    Step(usize),
}

/// One planned relation segment.
#[derive(Clone)]
pub struct PlanStep {
    /// Relation field names from the root model down to this segment.
    pub path: Vec<String>,
    /// Step that loads this segment's owners; `None` for the root records.
    pub parent: Option<usize>,
    /// Statement that fetches this segment.
    pub query: QueryRef,
    /// Alias chain inside `query`; empty for separate steps (they are the root of their own statement).
    pub chain: String,
    pub relation: RelationDescriptor,
    pub strategy: Strategy,
    /// Planned as part of a path that overflowed the identifier budget.
    pub split: bool,
    /// Query transforms, only set on the last segment of a preload.
    pub apply: Vec<ApplyFn>,
}

impl PlanStep {
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

impl fmt::Debug for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanStep")
            .field("path", &self.dotted_path())
            .field("parent", &self.parent)
            .field("query", &self.query)
            .field("chain", &self.chain)
            .field("cardinality", &self.relation.cardinality)
            .field("strategy", &self.strategy)
            .field("split", &self.split)
            .field("apply", &self.apply.len())
            .finish()
    }
}

/// A join step arranged as a tree under its statement root.
#[derive(Debug, Clone)]
pub(crate) struct JoinNode {
    /// Lower-cased segment; joined columns are prefixed `segment__`.
    pub segment: String,
    pub field: &'static str,
    pub target: ModelType,
    pub collection: bool,
    pub children: Vec<JoinNode>,
}

impl JoinNode {
    /// Does this node or anything below it join a collection?
    pub fn fans_out(&self) -> bool {
        self.collection || self.children.iter().any(JoinNode::fans_out)
    }
}

/// The loading plan for one root model and its preloads.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step planned for a dotted path (case-insensitive).
    pub fn step(&self, path: &str) -> Option<&PlanStep> {
        self.index_of_dotted(path).map(|i| &self.steps[i])
    }

    pub fn strategy_of(&self, path: &str) -> Option<Strategy> {
        self.step(path).map(|s| s.strategy)
    }

    /// Steps that issue their own statement, in execution order.
    pub fn separate_steps(&self) -> impl Iterator<Item = (usize, &PlanStep)> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.strategy.is_separate())
    }

    /// Join steps riding along `query`, parents before children.
    pub fn joins_in(&self, query: QueryRef) -> impl Iterator<Item = (usize, &PlanStep)> {
        self.steps
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.strategy == Strategy::Join && s.query == query)
    }

    pub(crate) fn join_tree(&self, query: QueryRef) -> Vec<JoinNode> {
        let top = match query {
            QueryRef::Root => None,
            QueryRef::Step(i) => Some(i),
        };
        self.join_children(query, top)
    }

    fn join_children(&self, query: QueryRef, parent: Option<usize>) -> Vec<JoinNode> {
        self.joins_in(query)
            .filter(|(_, s)| s.parent == parent)
            .map(|(i, s)| JoinNode {
                segment: s.path.last().map(|p| p.to_lowercase()).unwrap_or_default(),
                field: s.relation.field,
                target: s.relation.target,
                collection: s.relation.cardinality.is_collection(),
                children: self.join_children(query, Some(i)),
            })
            .collect()
    }

    /// Turn join step `index` into a deferred statement of its own; the
    /// joins below it move into that statement.
    fn defer_join(&mut self, index: usize) {
        let from = self.steps[index].query;
        let prefix = format!("{}{}", self.steps[index].chain, CHAIN_SEPARATOR);
        let mut moved = vec![index];
        // Children are always planned after their parent.
        for i in index + 1..self.steps.len() {
            let step = &mut self.steps[i];
            let below = step.parent.is_some_and(|p| moved.contains(&p));
            if below && step.strategy == Strategy::Join && step.query == from {
                let chain = step.chain.strip_prefix(prefix.as_str()).unwrap_or(step.chain.as_str()).to_string();
                step.chain = chain;
                step.query = QueryRef::Step(index);
                moved.push(i);
            }
        }
        let step = &mut self.steps[index];
        step.strategy = Strategy::DeferredSeparateQuery;
        step.query = QueryRef::Step(index);
        step.chain.clear();
        step.split = true;
    }

    fn index_of(&self, path: &[String]) -> Option<usize> {
        self.steps.iter().position(|s| {
            s.path.len() == path.len()
                && s.path
                    .iter()
                    .zip(path)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        })
    }

    fn index_of_dotted(&self, path: &str) -> Option<usize> {
        let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
        self.index_of(&segments)
    }
}

/// A path (or path remainder) waiting to be planned.
struct Pending {
    /// Segments already planned before `segments`.
    base: Vec<String>,
    model: ModelType,
    segments: Vec<String>,
    parent: Option<usize>,
    query: QueryRef,
    /// Chain of `parent` inside `query`, when `parent` is a join step.
    chain: Vec<String>,
    /// Re-queued remainder of a split path: its first segment is deferred.
    deferred: bool,
    split: bool,
}

/// Chooses a [`Strategy`] for every segment of every preload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    budget: IdentifierBudget,
}

impl Planner {
    pub const fn new(budget: IdentifierBudget) -> Self {
        Self { budget }
    }

    pub const fn budget(&self) -> IdentifierBudget {
        self.budget
    }

    /// Plan all `preloads` for records of `root`.
    ///
    /// Steps of different preloads are merged: a path planned by an earlier
    /// preload is reused, not planned again.
    #[allow(clippy::result_large_err)]
    pub fn plan(&self, root: ModelType, preloads: &[PreloadSpec]) -> Result<Plan> {
        let mut plan = Plan::default();
        for spec in preloads {
            let segments = split_path(&spec.path)?;
            let mut queue = VecDeque::new();
            queue.push_back(Pending {
                base: Vec::new(),
                model: root,
                segments,
                parent: None,
                query: QueryRef::Root,
                chain: Vec::new(),
                deferred: false,
                split: false,
            });
            while let Some(pending) = queue.pop_front() {
                self.plan_pending(&mut plan, pending, spec, &mut queue)?;
            }
        }
        Ok(plan)
    }

    /// Strategy chosen for the last segment of `path` on `root`.
    #[allow(clippy::result_large_err)]
    pub fn plan_path(&self, root: ModelType, path: &str) -> Result<Strategy> {
        let plan = self.plan(root, &[PreloadSpec::new(path)])?;
        plan.strategy_of(path).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::InvalidPath,
                format!("relation path '{}' produced no plan", path),
            )
        })
    }

    #[allow(clippy::result_large_err)]
    fn plan_pending(
        &self,
        plan: &mut Plan,
        pending: Pending,
        spec: &PreloadSpec,
        queue: &mut VecDeque<Pending>,
    ) -> Result<()> {
        let chain = alias_chain(&pending.segments);
        let over_budget = self.budget.exceeded_by(chain.len());

        if over_budget && pending.segments.len() > 1 {
            tracing::warn!(
                path = %spec.path,
                chain = %chain,
                chain_len = chain.len(),
                limit = self.budget.limit,
                margin = self.budget.margin,
                "Alias chain exceeds identifier budget, splitting preload"
            );
            let rest = pending.segments[1..].to_vec();
            let mut base = pending.base.clone();
            base.push(pending.segments[0].clone());
            let head = Pending {
                segments: vec![pending.segments[0].clone()],
                split: true,
                ..pending
            };
            let head_index = self.plan_segments(plan, head, spec, false, false)?;
            let model = plan.steps[head_index].relation.target;
            queue.push_front(Pending {
                base,
                model,
                segments: rest,
                parent: Some(head_index),
                query: QueryRef::Root,
                chain: Vec::new(),
                deferred: true,
                split: true,
            });
            return Ok(());
        }

        if over_budget {
            tracing::warn!(
                path = %spec.path,
                chain = %chain,
                chain_len = chain.len(),
                limit = self.budget.limit,
                "Single relation alias exceeds identifier budget, deferring"
            );
        }
        self.plan_segments(plan, pending, spec, true, over_budget)?;
        Ok(())
    }

    /// Plan consecutive segments; returns the index of the last one.
    #[allow(clippy::result_large_err)]
    fn plan_segments(
        &self,
        plan: &mut Plan,
        pending: Pending,
        spec: &PreloadSpec,
        reaches_end: bool,
        force_deferred: bool,
    ) -> Result<usize> {
        let Pending {
            base,
            mut model,
            segments,
            mut parent,
            mut query,
            mut chain,
            deferred,
            split,
        } = pending;

        let mut path = base;
        let mut last = None;
        let count = segments.len();

        for (i, segment) in segments.into_iter().enumerate() {
            path.push(segment.clone());
            let is_last = reaches_end && i + 1 == count;
            let apply: &[ApplyFn] = if is_last { &spec.apply } else { &[] };

            if let Some(existing) = plan.index_of(&path) {
                if deferred && i == 0 && plan.steps[existing].strategy == Strategy::Join {
                    tracing::warn!(
                        path = %path.join("."),
                        "Joined relation continues past the identifier budget, deferring it"
                    );
                    plan.defer_join(existing);
                }
                let step = &mut plan.steps[existing];
                if !apply.is_empty() {
                    if step.strategy == Strategy::Join {
                        return Err(Error::config(
                            ConfigErrorKind::InvalidPath,
                            format!(
                                "relation '{}' is already joined; query functions need a separate query",
                                step.dotted_path()
                            ),
                        ));
                    }
                    step.apply.extend(apply.iter().cloned());
                }
                model = step.relation.target;
                parent = Some(existing);
                if step.strategy == Strategy::Join {
                    query = step.query;
                    chain = step.chain.split(CHAIN_SEPARATOR).map(String::from).collect();
                } else {
                    query = QueryRef::Step(existing);
                    chain.clear();
                }
                last = Some(existing);
                continue;
            }

            let descriptor = resolve_type(model)?;
            let relation = descriptor.relation(&segment).cloned().ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownRelation,
                    format!("{} has no relation '{}'", model.type_name, segment),
                )
            })?;

            let defer_here = (deferred && i == 0) || force_deferred;
            let mut strategy = choose(&relation, spec.hint, defer_here, !apply.is_empty(), &path)?;
            if strategy == Strategy::Join {
                let mut joined = chain.clone();
                joined.push(segment.to_lowercase());
                let len = alias_chain(&joined).len();
                if self.budget.exceeded_by(len) {
                    tracing::warn!(
                        path = %path.join("."),
                        chain_len = len,
                        limit = self.budget.limit,
                        "Join alias inside its statement exceeds identifier budget, deferring"
                    );
                    strategy = Strategy::DeferredSeparateQuery;
                }
            }
            let index = plan.steps.len();

            let step_chain = if strategy == Strategy::Join {
                chain.push(segment.to_lowercase());
                alias_chain(&chain)
            } else {
                String::new()
            };
            let step_query = if strategy == Strategy::Join {
                query
            } else {
                QueryRef::Step(index)
            };

            tracing::debug!(
                path = %path.join("."),
                cardinality = %relation.cardinality,
                strategy = %strategy,
                split,
                "Planned relation"
            );

            model = relation.target;
            plan.steps.push(PlanStep {
                path: path.clone(),
                parent,
                query: step_query,
                chain: step_chain,
                relation,
                strategy,
                split,
                apply: apply.to_vec(),
            });
            parent = Some(index);
            if strategy.is_separate() {
                query = QueryRef::Step(index);
                chain.clear();
            }
            last = Some(index);
        }

        last.ok_or_else(|| {
            Error::config(ConfigErrorKind::InvalidPath, "empty relation path")
        })
    }
}

#[allow(clippy::result_large_err)]
fn choose(
    relation: &RelationDescriptor,
    hint: StrategyHint,
    deferred: bool,
    has_apply: bool,
    path: &[String],
) -> Result<Strategy> {
    if deferred {
        if hint == StrategyHint::ForceJoin {
            tracing::warn!(
                path = %path.join("."),
                "Join requested for a relation deferred by the identifier budget"
            );
        }
        return Ok(Strategy::DeferredSeparateQuery);
    }

    let wants_join = match hint {
        StrategyHint::ForceJoin => true,
        StrategyHint::ForceSeparate => false,
        StrategyHint::Auto if relation.cardinality == Cardinality::Unknown => {
            tracing::warn!(
                path = %path.join("."),
                model = relation.owner.type_name,
                field = relation.field,
                source = "unknown",
                "Relation cardinality unknown, loading with a separate query"
            );
            false
        }
        StrategyHint::Auto => relation.cardinality.is_join_eligible(),
    };

    if wants_join && has_apply {
        if hint == StrategyHint::ForceJoin {
            return Err(Error::config(
                ConfigErrorKind::InvalidPath,
                format!(
                    "relation '{}' cannot be joined when query functions are given",
                    path.join(".")
                ),
            ));
        }
        return Ok(Strategy::SeparateQuery);
    }

    if wants_join && relation.cardinality.is_collection() {
        tracing::debug!(
            path = %path.join("."),
            cardinality = %relation.cardinality,
            "Forced join on a collection; owner rows will repeat"
        );
    }

    Ok(if wants_join {
        Strategy::Join
    } else {
        Strategy::SeparateQuery
    })
}
