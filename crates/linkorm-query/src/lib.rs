//! Query building, preload planning and batch relation loading for linkorm.
//!
//! - [`QuerySpec`] / [`Select`]: SELECT statements with portable `?` placeholders
//! - [`InsertBuilder`], [`UpdateBuilder`], [`DeleteBuilder`]
//! - [`Planner`]: join or separate query, per relation path segment
//! - [`load_level`] and the preload executor: one batched statement per level
//! - [`scan_into`], [`scan_maps`], [`merge_map`]: rows and maps into records

pub mod builder;
pub mod clause;
pub mod engine;
pub mod join;
pub mod loader;
pub mod placeholder;
pub mod plan;
pub mod preload;
pub mod scan;
pub mod select;

#[cfg(test)]
mod testing;

pub use builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use clause::Clause;
pub use engine::Engine;
pub use join::{Join, JoinType};
pub use loader::{LevelReport, load_level};
pub use plan::{Plan, PlanStep, Planner, QueryRef, Strategy, alias_chain, split_path};
pub use preload::{ApplyFn, PreloadSpec, StrategyHint, apply, run_plan};
pub use scan::{
    MapRow, PARENT_KEY_COLUMN, ScanDest, match_column, merge_map, record_to_map, row_to_map,
    scan_into, scan_maps, scan_record,
};
pub use select::{QuerySpec, Select};

pub use linkorm_core::Value;
