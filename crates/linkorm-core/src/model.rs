//! Model and record traits.
//!
//! [`Model`] is the static, typed view of a mapped struct. [`Record`] is its
//! object-safe counterpart: the scanner, the loader and the map merger only
//! ever see `&mut dyn Record`, so relations of any target type can be filled
//! without the caller naming that type. Both are normally derived with
//! `#[derive(Model)]`.

use crate::Result;
use crate::error::{ConfigErrorKind, Error};
use crate::field::FieldDecl;
use crate::relationship::RelationSlot;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::fmt;

/// Object-safe access to a model instance.
pub trait Record: Any + Send + Sync + fmt::Debug {
    /// Runtime descriptor of the concrete type.
    fn model_type(&self) -> ModelType;

    /// Read a scalar field by its Rust name.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Write a scalar field by its Rust name, coercing where possible.
    #[allow(clippy::result_large_err)]
    fn set_value(&mut self, field: &str, value: Value) -> Result<()>;

    /// Relation container behind a `Related<T>` / `RelatedMany<T>` field.
    fn relation(&self, field: &str) -> Option<&dyn RelationSlot>;

    fn relation_mut(&mut self, field: &str) -> Option<&mut dyn RelationSlot>;

    /// Embedded struct, if present. An unset optional embed yields `None`.
    fn embedded(&self, field: &str) -> Option<&dyn Record>;

    /// Embedded struct for writing; optional embeds are allocated on demand.
    fn embedded_mut(&mut self, field: &str) -> Option<&mut dyn Record>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    fn clone_record(&self) -> Box<dyn Record>;
}

/// Trait for types that can be mapped to database tables.
pub trait Model: Record + Default + Clone + Sized {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// Field declarations in source order.
    fn declarations() -> &'static [FieldDecl];
}

/// Type-erased handle to a [`Model`] implementation.
#[derive(Clone, Copy)]
pub struct ModelType {
    pub type_name: &'static str,
    pub table: &'static str,
    type_id: fn() -> TypeId,
    declarations: fn() -> &'static [FieldDecl],
    new_record: fn() -> Box<dyn Record>,
}

fn new_boxed<M: Model>() -> Box<dyn Record> {
    Box::new(M::default())
}

impl ModelType {
    pub fn of<M: Model>() -> Self {
        Self {
            type_name: short_type_name(std::any::type_name::<M>()),
            table: M::TABLE_NAME,
            type_id: TypeId::of::<M>,
            declarations: M::declarations,
            new_record: new_boxed::<M>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    pub fn declarations(&self) -> &'static [FieldDecl] {
        (self.declarations)()
    }

    /// Allocate a default instance of the model.
    pub fn new_record(&self) -> Box<dyn Record> {
        (self.new_record)()
    }

    pub fn is<M: Model>(&self) -> bool {
        self.type_id() == TypeId::of::<M>()
    }
}

impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id() == other.type_id()
    }
}

impl Eq for ModelType {}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .finish()
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Read a value through a chain of embedded fields (`["audit", "created_at"]`).
///
/// An unset optional embed anywhere on the path reads as `None`.
pub fn read_path(record: &dyn Record, path: &[&'static str]) -> Option<Value> {
    match path {
        [] => None,
        [field] => record.get_value(field),
        [head, rest @ ..] => read_path(record.embedded(head)?, rest),
    }
}

/// Write a value through a chain of embedded fields, allocating optional embeds.
#[allow(clippy::result_large_err)]
pub fn write_path(record: &mut dyn Record, path: &[&'static str], value: Value) -> Result<()> {
    match path {
        [] => Err(Error::config(
            ConfigErrorKind::UnknownField,
            "empty field path",
        )),
        [field] => record.set_value(field, value),
        [head, rest @ ..] => {
            let type_name = record.model_type().type_name;
            let inner = record.embedded_mut(head).ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::UnknownField,
                    format!("{} has no embedded field '{}'", type_name, head),
                )
            })?;
            write_path(inner, rest, value)
        }
    }
}

/// Downcast a boxed record into its concrete model type.
pub fn downcast_record<M: Model>(record: Box<dyn Record>) -> Option<M> {
    record.into_any().downcast::<M>().ok().map(|b| *b)
}
