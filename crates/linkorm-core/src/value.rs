//! Dynamic SQL values and their normalized key form.

use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// Used for parameter binding, result fetching and the field accessors
/// generated for models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Time (microseconds since midnight)
    Time(i64),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// Timestamp with timezone (microseconds since epoch, UTC)
    TimestampTz(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),

    /// Array of values
    Array(Vec<Value>),

    /// SQL DEFAULT keyword
    Default,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Array(_) => "ARRAY",
            Value::Default => "DEFAULT",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::TinyInt(v) => Some(*v != 0),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::TinyInt(v) => Some(f64::from(*v)),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Normalize into a hashable key, unwrapping integer widths.
    ///
    /// Returns `None` for NULL and for values that cannot identify a row.
    pub fn to_key(&self) -> Option<KeyValue> {
        match self {
            Value::Null | Value::Default | Value::Array(_) | Value::Json(_) => None,
            Value::Bool(v) => Some(KeyValue::Bool(*v)),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                self.as_i64().map(KeyValue::Int)
            }
            Value::Float(v) => Some(float_key(f64::from(*v))),
            Value::Double(v) => Some(float_key(*v)),
            Value::Decimal(s) => Some(match s.parse::<i64>() {
                Ok(i) => KeyValue::Int(i),
                Err(_) => KeyValue::Text(s.clone()),
            }),
            Value::Text(s) => Some(KeyValue::Text(s.clone())),
            Value::Bytes(b) => Some(KeyValue::Bytes(b.clone())),
            Value::Uuid(u) => Some(KeyValue::Uuid(*u)),
            Value::Date(d) => Some(KeyValue::Int(i64::from(*d))),
            Value::Time(t) | Value::Timestamp(t) | Value::TimestampTz(t) => {
                Some(KeyValue::Int(*t))
            }
        }
    }

    /// Best-effort conversion toward the storage shape of a field.
    ///
    /// Values that already fit, or that have no sensible conversion, are
    /// returned unchanged; the typed `FromValue` step reports mismatches.
    pub fn coerce(self, kind: ValueKind) -> Value {
        match (kind, self) {
            (_, Value::Null) => Value::Null,
            (ValueKind::Int, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(v) => Value::BigInt(v),
                Err(_) => Value::Text(s),
            },
            (ValueKind::Int, Value::Decimal(s)) => match s.parse::<i64>() {
                Ok(v) => Value::BigInt(v),
                Err(_) => Value::Decimal(s),
            },
            (ValueKind::Int, Value::Double(v)) if v.fract() == 0.0 => Value::BigInt(v as i64),
            (ValueKind::Float, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(v) => Value::Double(v),
                Err(_) => Value::Text(s),
            },
            (ValueKind::Float, v @ (Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_))) => {
                v.as_f64().map_or(v, Value::Double)
            }
            (ValueKind::Float, Value::BigInt(v)) => Value::Double(v as f64),
            (ValueKind::Bool, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Value::Bool(true),
                "false" | "f" | "0" | "no" => Value::Bool(false),
                _ => Value::Text(s),
            },
            (ValueKind::Text, Value::Bytes(b)) => match String::from_utf8(b) {
                Ok(s) => Value::Text(s),
                Err(e) => Value::Bytes(e.into_bytes()),
            },
            (ValueKind::Text, v @ (Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_))) => {
                v.as_i64().map_or(v, |i| Value::Text(i.to_string()))
            }
            (ValueKind::Text, Value::BigInt(v)) => Value::Text(v.to_string()),
            (ValueKind::Text, Value::Double(v)) => Value::Text(v.to_string()),
            (ValueKind::Text, Value::Bool(v)) => Value::Text(v.to_string()),
            (ValueKind::Text, Value::Decimal(s)) => Value::Text(s),
            (ValueKind::Bytes, Value::Text(s)) => Value::Bytes(s.into_bytes()),
            (ValueKind::Timestamp, Value::BigInt(v)) => Value::Timestamp(v),
            (ValueKind::Timestamp, Value::Int(v)) => Value::Timestamp(i64::from(v)),
            (ValueKind::Timestamp, Value::TimestampTz(v)) => Value::Timestamp(v),
            (ValueKind::Json, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(v) => Value::Json(v),
                Err(_) => Value::Text(s),
            },
            (_, v) => v,
        }
    }
}

fn float_key(v: f64) -> KeyValue {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        KeyValue::Int(v as i64)
    } else {
        KeyValue::Text(v.to_string())
    }
}

/// A normalized, hashable key used for foreign-key batching.
///
/// All integer widths collapse into [`KeyValue::Int`] so a `BIGINT` primary key
/// matches an `INTEGER` foreign key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid([u8; 16]),
}

impl KeyValue {
    /// Turn the key back into a bindable parameter.
    pub fn to_value(&self) -> Value {
        match self {
            KeyValue::Bool(v) => Value::Bool(*v),
            KeyValue::Int(v) => Value::BigInt(*v),
            KeyValue::Text(v) => Value::Text(v.clone()),
            KeyValue::Bytes(v) => Value::Bytes(v.clone()),
            KeyValue::Uuid(v) => Value::Uuid(*v),
        }
    }
}

/// The storage shape a model field expects, used for best-effort coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Timestamp,
    Json,
    #[default]
    Any,
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::SmallInt(i16::from(v))
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(i32::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        if let Ok(signed) = i64::try_from(v) {
            Value::BigInt(signed)
        } else {
            tracing::warn!(value = v, "u64 value exceeds i64::MAX, storing as decimal text");
            Value::Decimal(v.to_string())
        }
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<&KeyValue> for Value {
    fn from(v: &KeyValue) -> Self {
        v.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widths_share_a_key() {
        assert_eq!(Value::Int(7).to_key(), Value::BigInt(7).to_key());
        assert_eq!(Value::SmallInt(7).to_key(), Some(KeyValue::Int(7)));
        assert_eq!(Value::Decimal("7".into()).to_key(), Some(KeyValue::Int(7)));
        assert_eq!(Value::Double(7.0).to_key(), Some(KeyValue::Int(7)));
    }

    #[test]
    fn null_has_no_key() {
        assert_eq!(Value::Null.to_key(), None);
        assert_eq!(Value::from(None::<i64>).to_key(), None);
    }

    #[test]
    fn key_round_trips_to_parameter() {
        let key = Value::Text("abc".into()).to_key().unwrap();
        assert_eq!(key.to_value(), Value::Text("abc".into()));
        assert_eq!(KeyValue::Int(3).to_value(), Value::BigInt(3));
    }

    #[test]
    fn coerce_best_effort() {
        assert_eq!(Value::Text("42".into()).coerce(ValueKind::Int), Value::BigInt(42));
        assert_eq!(
            Value::Text("nope".into()).coerce(ValueKind::Int),
            Value::Text("nope".into())
        );
        assert_eq!(Value::Int(5).coerce(ValueKind::Text), Value::Text("5".into()));
        assert_eq!(
            Value::Bytes(b"hi".to_vec()).coerce(ValueKind::Text),
            Value::Text("hi".into())
        );
        assert_eq!(Value::Text("yes".into()).coerce(ValueKind::Bool), Value::Bool(true));
        assert_eq!(Value::BigInt(10).coerce(ValueKind::Timestamp), Value::Timestamp(10));
        assert_eq!(Value::Null.coerce(ValueKind::Int), Value::Null);
        assert_eq!(Value::Int(2).coerce(ValueKind::Float), Value::Double(2.0));
    }

    #[test]
    fn large_u64_does_not_wrap() {
        assert_eq!(Value::from(u64::MAX), Value::Decimal(u64::MAX.to_string()));
        assert_eq!(Value::from(5_u64), Value::BigInt(5));
    }
}
