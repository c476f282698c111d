//! Core types and traits for linkorm.
//!
//! This crate provides the foundations the query layer builds on:
//!
//! - `Model` / `Record` traits for typed and type-erased struct mapping
//! - the metadata resolver producing cached `ModelDescriptor`s
//! - `Related` / `RelatedMany` relation containers
//! - the `Connection` seam, `Value` and `Row`
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome};

pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod field;
pub mod metadata;
pub mod model;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod tags;
pub mod value;

pub use config::{EngineConfig, IdentifierBudget, LoadMode};
pub use connection::Connection;
pub use dialect::Dialect;
pub use error::{
    ConfigError, ConfigErrorKind, Error, QueryError, QueryErrorKind, RegistryError,
    RelationError, Result, TypeError, recover,
};
pub use field::{FieldDecl, FieldShape, decode_field};
pub use metadata::{
    Cardinality, CardinalitySource, ColumnNamer, FieldDescriptor, LinkDescriptor,
    ModelDescriptor, RelationDescriptor, RelationProvider, relation_type, resolve, resolve_type,
};
pub use model::{Model, ModelType, Record, downcast_record, read_path, write_path};
pub use registry::ModelRegistry;
pub use relationship::{AssignMode, Related, RelatedMany, RelationSlot};
pub use row::{CHAIN_SEPARATOR, ColumnInfo, FromValue, Row};
pub use value::{KeyValue, Value, ValueKind};
