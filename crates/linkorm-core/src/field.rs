//! Static field declarations emitted by `#[derive(Model)]`.
//!
//! A [`FieldDecl`] is the raw, unparsed form of a field: its Rust name, the
//! tag strings attached to it and its structural shape. The metadata
//! resolver turns these into column mappings and relation descriptors.

use crate::Result;
use crate::error::Error;
use crate::model::ModelType;
use crate::row::FromValue;
use crate::value::{Value, ValueKind};

/// Structural shape of a field, as seen from its Rust type.
#[derive(Clone, Copy)]
pub enum FieldShape {
    /// A plain column value.
    Scalar,
    /// `Option<T>`: a column value with a validity flag.
    Nullable,
    /// `Related<T>`: a single related record.
    One(fn() -> ModelType),
    /// `RelatedMany<T>`: a collection of related records.
    Many(fn() -> ModelType),
    /// A struct whose columns are flattened into the parent.
    Embedded {
        model: fn() -> ModelType,
        /// `Option<T>`; `None` at runtime contributes no values.
        optional: bool,
    },
}

impl FieldShape {
    /// Target model of a relation or embedded field.
    pub fn target(&self) -> Option<ModelType> {
        match self {
            FieldShape::One(f) | FieldShape::Many(f) => Some(f()),
            FieldShape::Embedded { model, .. } => Some(model()),
            FieldShape::Scalar | FieldShape::Nullable => None,
        }
    }

    pub const fn is_relation(&self) -> bool {
        matches!(self, FieldShape::One(_) | FieldShape::Many(_))
    }

    pub const fn is_collection(&self) -> bool {
        matches!(self, FieldShape::Many(_))
    }
}

impl std::fmt::Debug for FieldShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldShape::Scalar => write!(f, "Scalar"),
            FieldShape::Nullable => write!(f, "Nullable"),
            FieldShape::One(t) => write!(f, "One({})", t().type_name),
            FieldShape::Many(t) => write!(f, "Many({})", t().type_name),
            FieldShape::Embedded { model, optional } => {
                write!(f, "Embedded({}, optional={})", model().type_name, optional)
            }
        }
    }
}

/// One field of a model as declared in source.
#[derive(Debug, Clone, Copy)]
pub struct FieldDecl {
    /// Rust field name
    pub name: &'static str,
    /// Primary tag: `#[orm("...")]`
    pub orm: Option<&'static str>,
    /// Secondary tag: `#[sql("...")]`
    pub sql: Option<&'static str>,
    /// Structured-data tag: `#[serde(rename = "...")]`
    pub data: Option<&'static str>,
    pub shape: FieldShape,
    pub kind: ValueKind,
}

impl FieldDecl {
    pub const fn new(name: &'static str, shape: FieldShape, kind: ValueKind) -> Self {
        Self {
            name,
            orm: None,
            sql: None,
            data: None,
            shape,
            kind,
        }
    }

    pub const fn orm(mut self, tag: &'static str) -> Self {
        self.orm = Some(tag);
        self
    }

    pub const fn sql(mut self, tag: &'static str) -> Self {
        self.sql = Some(tag);
        self
    }

    pub const fn data(mut self, tag: &'static str) -> Self {
        self.data = Some(tag);
        self
    }
}

/// Coerce `value` toward `kind` and decode it as `T`, naming `field` on failure.
///
/// Called by the setters `#[derive(Model)]` generates.
#[allow(clippy::result_large_err)]
pub fn decode_field<T: FromValue>(field: &str, value: Value, kind: ValueKind) -> Result<T> {
    T::from_value(&value.coerce(kind)).map_err(|e| match e {
        Error::Type(mut te) => {
            te.column.get_or_insert_with(|| field.to_string());
            te.rust_type = Some(std::any::type_name::<T>());
            Error::Type(te)
        }
        other => other,
    })
}
