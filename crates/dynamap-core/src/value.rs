//! The application-side value model.
//!
//! [`Value`] is the closed union of shapes the codec knows how to move
//! between a record field and the store's attribute union. Record fields of
//! concrete Rust types convert through the [`RecordValue`] trait, which also
//! fixes each type's [`ValueKind`] so a table schema can be derived without
//! inspecting instances.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};

/// Application value kind, determined per field at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Floating-point number.
    Float,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Bytes,
    /// Ordered collection.
    List,
    /// Key-value mapping.
    Map,
    /// Set of strings.
    StringSet,
    /// Set of numbers.
    NumberSet,
    /// Set of byte sequences.
    BinarySet,
    /// A nested structured value, stored as value-serialized text.
    Document,
}

/// Wire-level attribute type a field serializes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    /// `S` attribute.
    String,
    /// `N` attribute.
    Number,
    /// `BOOL` attribute.
    Bool,
    /// `B` attribute.
    Binary,
    /// `L` attribute.
    List,
    /// `M` attribute.
    Map,
    /// `SS` attribute.
    StringSet,
    /// `NS` attribute.
    NumberSet,
    /// `BS` attribute.
    BinarySet,
}

impl ValueKind {
    /// The wire type this kind serializes as. Deterministic: scalars map to
    /// the matching scalar, collections to `L`/`M`, sets to set types, and
    /// documents travel as value-serialized strings.
    #[must_use]
    pub fn db_type(self) -> DbType {
        match self {
            Self::Bool => DbType::Bool,
            Self::Int | Self::Float => DbType::Number,
            Self::String | Self::Document => DbType::String,
            Self::Bytes => DbType::Binary,
            Self::List => DbType::List,
            Self::Map => DbType::Map,
            Self::StringSet => DbType::StringSet,
            Self::NumberSet => DbType::NumberSet,
            Self::BinarySet => DbType::BinarySet,
        }
    }

    /// Returns `true` when fields of this kind may serve as hash or range
    /// keys (the store only accepts `S`, `N` and `B` key attributes).
    #[must_use]
    pub fn is_key_eligible(self) -> bool {
        matches!(
            self.db_type(),
            DbType::String | DbType::Number | DbType::Binary
        )
    }
}

/// A single application value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent / null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Ordered collection of values.
    List(Vec<Value>),
    /// Key-value mapping, ordered for deterministic serialization.
    Map(BTreeMap<String, Value>),
    /// Set of strings.
    StrSet(BTreeSet<String>),
    /// Set of numbers, held in canonical decimal form.
    NumSet(BTreeSet<String>),
    /// Set of byte sequences.
    BinSet(BTreeSet<Bytes>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The kind of this value, `None` for null.
    #[must_use]
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Float(_) => Some(ValueKind::Float),
            Self::Str(_) => Some(ValueKind::String),
            Self::Bytes(_) => Some(ValueKind::Bytes),
            Self::List(_) => Some(ValueKind::List),
            Self::Map(_) => Some(ValueKind::Map),
            Self::StrSet(_) => Some(ValueKind::StringSet),
            Self::NumSet(_) => Some(ValueKind::NumberSet),
            Self::BinSet(_) => Some(ValueKind::BinarySet),
        }
    }

    /// A short name for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::StrSet(_) => "string set",
            Self::NumSet(_) => "number set",
            Self::BinSet(_) => "binary set",
        }
    }
}

/// A value could not be converted to the requested shape.
#[derive(Debug, thiserror::Error)]
#[error("expected {expected}, got {actual}")]
pub struct ValueError {
    /// What the conversion expected.
    pub expected: &'static str,
    /// A description of the value that was supplied.
    pub actual: String,
}

impl ValueError {
    pub(crate) fn new(expected: &'static str, actual: &Value) -> Self {
        Self {
            expected,
            actual: actual.type_name().to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordValue: concrete Rust types <-> Value
// ---------------------------------------------------------------------------

/// Maps a concrete Rust type onto the value model.
///
/// Conversions back from [`Value`] are deliberately lenient in the same
/// places the store is: numbers widen, strings parse, and collections copy
/// element-wise.
pub trait RecordValue: Sized {
    /// The kind fields of this type are registered with.
    const KIND: ValueKind;

    /// Converts into a [`Value`].
    fn into_value(self) -> Value;

    /// Converts back from a [`Value`].
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when no sensible conversion exists.
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

fn int_from(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        #[allow(clippy::cast_possible_truncation)]
        Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

macro_rules! impl_int_record_value {
    ($($ty:ty),+) => {$(
        impl RecordValue for $ty {
            const KIND: ValueKind = ValueKind::Int;

            fn into_value(self) -> Value {
                Value::Int(i64::from(self))
            }

            fn from_value(value: Value) -> Result<Self, ValueError> {
                let n = int_from(&value).ok_or_else(|| ValueError::new("integer", &value))?;
                <$ty>::try_from(n).map_err(|_| ValueError {
                    expected: "integer in range",
                    actual: n.to_string(),
                })
            }
        }
    )+};
}

impl_int_record_value!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_float_record_value {
    ($($ty:ty),+) => {$(
        impl RecordValue for $ty {
            const KIND: ValueKind = ValueKind::Float;

            fn into_value(self) -> Value {
                Value::Float(f64::from(self))
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::Float(f) => Ok(f as $ty),
                    Value::Int(i) => Ok(i as $ty),
                    Value::Str(ref s) => s
                        .trim()
                        .parse()
                        .map_err(|_| ValueError::new("float", &value)),
                    other => Err(ValueError::new("float", &other)),
                }
            }
        }
    )+};
}

impl_float_record_value!(f32, f64);

impl RecordValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Str(ref s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::new("bool", &value)),
            other => Err(ValueError::new("bool", &other)),
        }
    }
}

impl RecordValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Str(s) => Ok(s),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(ValueError::new("string", &other)),
        }
    }
}

impl RecordValue for Bytes {
    const KIND: ValueKind = ValueKind::Bytes;

    fn into_value(self) -> Value {
        Value::Bytes(self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        use base64::Engine as _;
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Str(ref s) => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(Bytes::from)
                .map_err(|_| ValueError::new("bytes", &value)),
            other => Err(ValueError::new("bytes", &other)),
        }
    }
}

impl<T: RecordValue> RecordValue for Option<T> {
    const KIND: ValueKind = T::KIND;

    fn into_value(self) -> Value {
        self.map_or(Value::Null, RecordValue::into_value)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl<T: RecordValue> RecordValue for Vec<T> {
    const KIND: ValueKind = ValueKind::List;

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(RecordValue::into_value).collect())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(ValueError::new("list", &other)),
        }
    }
}

impl<T: RecordValue> RecordValue for HashMap<String, T> {
    const KIND: ValueKind = ValueKind::Map;

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k, v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k, v)))
                .collect(),
            other => Err(ValueError::new("map", &other)),
        }
    }
}

impl<T: RecordValue> RecordValue for BTreeMap<String, T> {
    const KIND: ValueKind = ValueKind::Map;

    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (k, v.into_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k, v)))
                .collect(),
            other => Err(ValueError::new("map", &other)),
        }
    }
}

impl RecordValue for BTreeSet<String> {
    const KIND: ValueKind = ValueKind::StringSet;

    fn into_value(self) -> Value {
        Value::StrSet(self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::StrSet(set) => Ok(set),
            Value::List(items) => items
                .into_iter()
                .map(String::from_value)
                .collect::<Result<_, _>>(),
            other => Err(ValueError::new("string set", &other)),
        }
    }
}

impl RecordValue for BTreeSet<i64> {
    const KIND: ValueKind = ValueKind::NumberSet;

    fn into_value(self) -> Value {
        Value::NumSet(self.into_iter().map(|n| n.to_string()).collect())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::NumSet(ref set) => set
                .iter()
                .map(|n| {
                    n.parse().map_err(|_| ValueError {
                        expected: "number set element",
                        actual: n.clone(),
                    })
                })
                .collect(),
            Value::List(items) => items.into_iter().map(i64::from_value).collect(),
            other => Err(ValueError::new("number set", &other)),
        }
    }
}

impl RecordValue for BTreeSet<Bytes> {
    const KIND: ValueKind = ValueKind::BinarySet;

    fn into_value(self) -> Value {
        Value::BinSet(self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::BinSet(set) => Ok(set),
            Value::List(items) => items.into_iter().map(Bytes::from_value).collect(),
            other => Err(ValueError::new("binary set", &other)),
        }
    }
}

impl RecordValue for DateTime<Utc> {
    const KIND: ValueKind = ValueKind::String;

    fn into_value(self) -> Value {
        Value::Str(self.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Str(ref s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ValueError::new("RFC 3339 timestamp", &value)),
            other => Err(ValueError::new("RFC 3339 timestamp", &other)),
        }
    }
}

// ---------------------------------------------------------------------------
// From impls for predicate-building ergonomics
// ---------------------------------------------------------------------------

macro_rules! impl_value_from {
    ($($ty:ty),+) => {$(
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                RecordValue::into_value(v)
            }
        }
    )+};
}

impl_value_from!(i8, i16, i32, i64, u8, u16, u32, f32, f64, bool, String, Bytes);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}
