//! linkorm - relation-aware query building and batch preloading for SQL models.
//!
//! linkorm maps plain structs to tables and loads their relations without
//! N+1 query storms:
//!
//! - `#[derive(Model)]` describes columns and relations through field tags
//! - [`Select`] builds statements with portable `?` placeholders
//! - preloads are planned per path segment: single relations are joined,
//!   collections are fetched with one batched `IN (...)` statement per level
//! - rows scan into structs or ordered maps, and partial maps merge into
//!   existing records
//!
//! # Quick Start
//!
//! ```ignore
//! use linkorm::prelude::*;
//!
//! #[derive(linkorm::Model, Debug, Clone, Default)]
//! #[orm(table = "posts")]
//! struct Post {
//!     #[orm("id,pk")]
//!     id: i64,
//!     title: String,
//!     author_id: i64,
//!     #[orm("relation:belongs-to,join:author_id=id")]
//!     author: Related<Person>,
//!     #[orm("relation:has-many,join:id=post_id")]
//!     comments: RelatedMany<Comment>,
//! }
//!
//! async fn recent(cx: &Cx, conn: &impl Connection) -> Outcome<Vec<Post>, Error> {
//!     Select::<Post>::new()
//!         .filter("published = ?", params![true])
//!         .preload_relation("author")
//!         .preload("comments", [apply(|q| q.order("created_at DESC"))])
//!         .all(cx, conn)
//!         .await
//! }
//! ```
//!
//! Connections are supplied by the caller through the [`Connection`] trait;
//! every operation takes the caller's `Cx` and returns an asupersync
//! [`Outcome`].

pub use linkorm_core::{
    // asupersync re-exports
    Budget,
    Cx,
    Outcome,
    // Core types
    AssignMode,
    Cardinality,
    CardinalitySource,
    Connection,
    Dialect,
    EngineConfig,
    Error,
    FieldDescriptor,
    IdentifierBudget,
    KeyValue,
    LinkDescriptor,
    LoadMode,
    Model,
    ModelDescriptor,
    ModelRegistry,
    ModelType,
    Record,
    Related,
    RelatedMany,
    RelationDescriptor,
    RelationSlot,
    Result,
    Row,
    Value,
    ValueKind,
    // Errors
    ConfigErrorKind,
    QueryErrorKind,
    // Metadata
    relation_type,
    resolve,
    resolve_type,
};

pub use linkorm_macros::Model;

pub use linkorm_query::{
    ApplyFn, Clause, DeleteBuilder, Engine, InsertBuilder, Join, JoinType, LevelReport, MapRow,
    PARENT_KEY_COLUMN, Plan, PlanStep, Planner, PreloadSpec, QueryRef, QuerySpec, ScanDest, Select,
    Strategy, StrategyHint, UpdateBuilder, alias_chain, apply, load_level, match_column,
    merge_map, params, record_to_map, row_to_map, run_plan, scan_into, scan_maps, scan_record,
    split_path,
};

/// Error details, for matching on specific failures.
pub mod error {
    pub use linkorm_core::{
        ConfigError, ConfigErrorKind, Error, QueryError, QueryErrorKind, RegistryError,
        RelationError, Result, TypeError,
    };
}

pub mod prelude {
    pub use crate::{
        // asupersync
        Budget,
        Cx,
        Outcome,
        // Core traits and types
        Connection,
        Dialect,
        Engine,
        EngineConfig,
        Error,
        LoadMode,
        Model,
        Related,
        RelatedMany,
        Result,
        Row,
        Value,
        // Query building
        DeleteBuilder,
        InsertBuilder,
        MapRow,
        QuerySpec,
        ScanDest,
        Select,
        StrategyHint,
        UpdateBuilder,
        apply,
        merge_map,
        params,
    };
}
