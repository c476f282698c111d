//! Result rows and typed value extraction.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Separator between a join alias chain and the column it prefixes (`author__id`).
pub const CHAIN_SEPARATOR: &str = "__";

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
    /// Lower-cased name -> first index, for tolerant lookups
    folded: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let mut name_to_index = HashMap::with_capacity(names.len());
        let mut folded = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            name_to_index.entry(name.clone()).or_insert(i);
            folded.entry(name.to_lowercase()).or_insert(i);
        }
        Self {
            names,
            name_to_index,
            folded,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a column, trying an exact match before a case-insensitive one.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .copied()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
///
/// Column metadata is shared via `Arc` so every row of a result set points
/// at the same [`ColumnInfo`].
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name (case-insensitive fallback).
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Get a typed value by column name.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
                rust_type: None,
            })
        })?;
        T::from_value(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Does any column start with `prefix__`?
    pub fn has_prefix(&self, prefix: &str) -> bool {
        let marker = format!("{prefix}{CHAIN_SEPARATOR}");
        self.column_names()
            .any(|c| starts_with_ignore_case(c, &marker))
    }

    /// Extract the columns named `prefix__col` into a new row named `col`.
    ///
    /// Only the direct level is taken: `author__profile__id` stays in the
    /// returned row as `profile__id` so nested chains can be peeled in turn.
    pub fn subset_by_prefix(&self, prefix: &str) -> Row {
        let marker = format!("{prefix}{CHAIN_SEPARATOR}");
        let mut names = Vec::new();
        let mut values = Vec::new();
        for (name, value) in self.iter() {
            if starts_with_ignore_case(name, &marker) {
                names.push(name[marker.len()..].to_string());
                values.push(value.clone());
            }
        }
        Row::new(names, values)
    }
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
    haystack.len() >= prefix.len()
        && haystack.is_char_boundary(prefix.len())
        && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Trait for converting from a `Value` to a typed value.
pub trait FromValue: Sized {
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
        rust_type: None,
    })
}

macro_rules! int_from_value {
    ($($ty:ty),*) => {$(
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                let v = value
                    .as_i64()
                    .ok_or_else(|| mismatch(stringify!($ty), value))?;
                <$ty>::try_from(v).map_err(|_| {
                    Error::Type(TypeError {
                        expected: stringify!($ty),
                        actual: format!("value {} out of range", v),
                        column: None,
                        rust_type: None,
                    })
                })
            }
        }
    )*};
}

int_from_value!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

#[allow(clippy::cast_possible_truncation)]
impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            other => other
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| mismatch("f32", value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("Vec<u8>", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|e| {
                Error::Type(TypeError {
                    expected: "valid JSON",
                    actual: format!("invalid JSON: {}", e),
                    column: None,
                    rust_type: None,
                })
            }),
            _ => Err(mismatch("JSON", value)),
        }
    }
}

impl FromValue for [u8; 16] {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(*v),
            Value::Bytes(v) if v.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(v);
                Ok(arr)
            }
            _ => Err(mismatch("UUID (16 bytes)", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec![
                "id".to_string(),
                "Title".to_string(),
                "author__id".to_string(),
                "author__name".to_string(),
                "author__profile__bio".to_string(),
            ],
            vec![
                Value::Int(1),
                Value::Text("hello".to_string()),
                Value::BigInt(9),
                Value::Text("Ann".to_string()),
                Value::Null,
            ],
        )
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let row = sample();
        assert_eq!(row.get_by_name("title"), Some(&Value::Text("hello".into())));
        assert_eq!(row.get_by_name("ID"), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn typed_access_widens_integers() {
        let row = sample();
        assert_eq!(row.get_named::<i64>("id").unwrap(), 1);
        assert_eq!(row.get_named::<i32>("author__id").unwrap(), 9);
        assert_eq!(row.get_named::<Option<String>>("author__profile__bio").unwrap(), None);

        let err = row.get_named::<bool>("title").unwrap_err();
        match err {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("title")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn subset_peels_one_level() {
        let row = sample();
        assert!(row.has_prefix("author"));
        assert!(!row.has_prefix("comments"));

        let author = row.subset_by_prefix("author");
        assert_eq!(
            author.column_names().collect::<Vec<_>>(),
            vec!["id", "name", "profile__bio"]
        );
        let profile = author.subset_by_prefix("profile");
        assert_eq!(profile.column_names().collect::<Vec<_>>(), vec!["bio"]);
    }

    #[test]
    fn out_of_range_integer() {
        let err = u8::from_value(&Value::BigInt(300)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
