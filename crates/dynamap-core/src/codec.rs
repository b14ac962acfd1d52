//! The attribute codec: application values to and from wire attributes.
//!
//! The codec is an explicit object held by the client rather than process
//! state, so independent clients can carry independent overrides. Every
//! translation step exposes a hook (attribute naming, db-type resolution,
//! encoding, decoding, value conversion); a hook returning `None` falls
//! through to the default behavior.

use std::fmt;

use dynamap_model::AttributeValue;
use dynamap_model::types::Item;

use crate::jsv;
use crate::record::Record;
use crate::schema::{FieldSchema, TableSchema};
use crate::value::{DbType, RecordValue, Value, ValueError, ValueKind};

/// Errors produced while translating values, carrying the offending field.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// A value could not be encoded to its wire type.
    #[error("cannot encode field '{field}': {message}")]
    Encode {
        /// The field being encoded.
        field: String,
        /// What went wrong.
        message: String,
    },
    /// A wire attribute could not be decoded to the field's type.
    #[error("cannot decode field '{field}': {message}")]
    Decode {
        /// The field being decoded.
        field: String,
        /// What went wrong.
        message: String,
    },
}

impl EncodingError {
    fn encode(field: &FieldSchema, message: impl Into<String>) -> Self {
        Self::Encode {
            field: field.name.clone(),
            message: message.into(),
        }
    }

    fn decode(field: &FieldSchema, message: impl Into<String>) -> Self {
        Self::Decode {
            field: field.name.clone(),
            message: message.into(),
        }
    }
}

type FieldNameHook = dyn Fn(&FieldSchema) -> Option<String> + Send + Sync;
type DbTypeHook = dyn Fn(ValueKind) -> Option<DbType> + Send + Sync;
type EncodeHook = dyn Fn(&FieldSchema, &Value) -> Option<AttributeValue> + Send + Sync;
type DecodeHook = dyn Fn(&FieldSchema, &AttributeValue) -> Option<Value> + Send + Sync;
type ConvertHook = dyn Fn(&Value, ValueKind) -> Option<Value> + Send + Sync;

/// Bidirectional translator between [`Value`]s and wire attributes.
#[derive(Default)]
pub struct Codec {
    field_name_hook: Option<Box<FieldNameHook>>,
    db_type_hook: Option<Box<DbTypeHook>>,
    encode_hook: Option<Box<EncodeHook>>,
    decode_hook: Option<Box<DecodeHook>>,
    convert_hook: Option<Box<ConvertHook>>,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("field_name_hook", &self.field_name_hook.is_some())
            .field("db_type_hook", &self.db_type_hook.is_some())
            .field("encode_hook", &self.encode_hook.is_some())
            .field("decode_hook", &self.decode_hook.is_some())
            .field("convert_hook", &self.convert_hook.is_some())
            .finish()
    }
}

impl Codec {
    /// A codec with default behavior only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides attribute-name resolution.
    #[must_use]
    pub fn with_field_name_hook(
        mut self,
        hook: impl Fn(&FieldSchema) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.field_name_hook = Some(Box::new(hook));
        self
    }

    /// Overrides db-type resolution.
    #[must_use]
    pub fn with_db_type_hook(
        mut self,
        hook: impl Fn(ValueKind) -> Option<DbType> + Send + Sync + 'static,
    ) -> Self {
        self.db_type_hook = Some(Box::new(hook));
        self
    }

    /// Overrides encoding for selected fields or values.
    #[must_use]
    pub fn with_encode_hook(
        mut self,
        hook: impl Fn(&FieldSchema, &Value) -> Option<AttributeValue> + Send + Sync + 'static,
    ) -> Self {
        self.encode_hook = Some(Box::new(hook));
        self
    }

    /// Overrides decoding for selected fields or attributes.
    #[must_use]
    pub fn with_decode_hook(
        mut self,
        hook: impl Fn(&FieldSchema, &AttributeValue) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.decode_hook = Some(Box::new(hook));
        self
    }

    /// Overrides value conversion.
    #[must_use]
    pub fn with_convert_hook(
        mut self,
        hook: impl Fn(&Value, ValueKind) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.convert_hook = Some(Box::new(hook));
        self
    }

    /// The wire attribute name for a field.
    #[must_use]
    pub fn attribute_name(&self, field: &FieldSchema) -> String {
        self.field_name_hook
            .as_ref()
            .and_then(|hook| hook(field))
            .unwrap_or_else(|| field.name.clone())
    }

    /// The wire type a value kind serializes as.
    #[must_use]
    pub fn db_type(&self, kind: ValueKind) -> DbType {
        self.db_type_hook
            .as_ref()
            .and_then(|hook| hook(kind))
            .unwrap_or_else(|| kind.db_type())
    }

    // -----------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------

    /// Encodes a field value to its wire attribute.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Encode`] when the value does not fit the
    /// field's wire type.
    pub fn encode(
        &self,
        field: &FieldSchema,
        value: &Value,
    ) -> Result<AttributeValue, EncodingError> {
        if let Some(hook) = &self.encode_hook {
            if let Some(attr) = hook(field, value) {
                return Ok(attr);
            }
        }
        if value.is_null() {
            return Ok(AttributeValue::Null(true));
        }
        match self.db_type(field.kind) {
            DbType::Number => match value {
                Value::Int(i) => Ok(AttributeValue::N(i.to_string())),
                Value::Float(f) => Ok(AttributeValue::N(f.to_string())),
                Value::Str(s) if s.trim().parse::<f64>().is_ok() => {
                    Ok(AttributeValue::N(s.trim().to_owned()))
                }
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not a number", other.type_name()),
                )),
            },
            DbType::Bool => match value {
                Value::Bool(b) => Ok(AttributeValue::Bool(*b)),
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not a bool", other.type_name()),
                )),
            },
            DbType::String => {
                if field.kind == ValueKind::Document {
                    return Ok(AttributeValue::S(jsv::to_string(value)));
                }
                match value {
                    Value::Str(s) => Ok(AttributeValue::S(s.clone())),
                    Value::Int(i) => Ok(AttributeValue::S(i.to_string())),
                    Value::Float(f) => Ok(AttributeValue::S(f.to_string())),
                    Value::Bool(b) => Ok(AttributeValue::S(b.to_string())),
                    other => Err(EncodingError::encode(
                        field,
                        format!("{} is not a string", other.type_name()),
                    )),
                }
            }
            DbType::Binary => match value {
                Value::Bytes(b) => Ok(AttributeValue::B(b.clone())),
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not binary", other.type_name()),
                )),
            },
            DbType::List => match value {
                Value::List(items) => Ok(AttributeValue::L(
                    items.iter().map(|v| self.encode_element(v)).collect(),
                )),
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not a list", other.type_name()),
                )),
            },
            DbType::Map => match value {
                Value::Map(entries) => Ok(AttributeValue::M(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), self.encode_element(v)))
                        .collect(),
                )),
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not a map", other.type_name()),
                )),
            },
            DbType::StringSet => match value {
                Value::StrSet(set) => Ok(AttributeValue::Ss(set.iter().cloned().collect())),
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not a string set", other.type_name()),
                )),
            },
            DbType::NumberSet => match value {
                Value::NumSet(set) => Ok(AttributeValue::Ns(set.iter().cloned().collect())),
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not a number set", other.type_name()),
                )),
            },
            DbType::BinarySet => match value {
                Value::BinSet(set) => Ok(AttributeValue::Bs(set.iter().cloned().collect())),
                other => Err(EncodingError::encode(
                    field,
                    format!("{} is not a binary set", other.type_name()),
                )),
            },
        }
    }

    /// Encodes a collection element by its runtime kind.
    fn encode_element(&self, value: &Value) -> AttributeValue {
        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Int(i) => AttributeValue::N(i.to_string()),
            Value::Float(f) => AttributeValue::N(f.to_string()),
            Value::Str(s) => AttributeValue::S(s.clone()),
            Value::Bytes(b) => AttributeValue::B(b.clone()),
            Value::List(items) => {
                AttributeValue::L(items.iter().map(|v| self.encode_element(v)).collect())
            }
            Value::Map(entries) => AttributeValue::M(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.encode_element(v)))
                    .collect(),
            ),
            Value::StrSet(set) => AttributeValue::Ss(set.iter().cloned().collect()),
            Value::NumSet(set) => AttributeValue::Ns(set.iter().cloned().collect()),
            Value::BinSet(set) => AttributeValue::Bs(set.iter().cloned().collect()),
        }
    }

    // -----------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------

    /// Decodes a wire attribute to the field's value kind.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Decode`] when the attribute cannot convert
    /// to the field's kind.
    pub fn decode(
        &self,
        field: &FieldSchema,
        attr: &AttributeValue,
    ) -> Result<Value, EncodingError> {
        if let Some(hook) = &self.decode_hook {
            if let Some(value) = hook(field, attr) {
                return Ok(value);
            }
        }
        let raw = match attr {
            AttributeValue::Null(_) => return Ok(Value::Null),
            AttributeValue::S(s) => {
                if field.kind == ValueKind::Document {
                    jsv::parse(s).map_err(|e| EncodingError::decode(field, e.to_string()))?
                } else {
                    Value::Str(s.clone())
                }
            }
            other => decode_element(other),
        };
        self.convert(raw, field.kind)
            .map_err(|e| EncodingError::decode(field, e.to_string()))
    }

    /// Converts a decoded value to the target kind: numeric widening,
    /// string parsing, collection copying.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when no conversion exists.
    pub fn convert(&self, value: Value, kind: ValueKind) -> Result<Value, ValueError> {
        if let Some(hook) = &self.convert_hook {
            if let Some(converted) = hook(&value, kind) {
                return Ok(converted);
            }
        }
        default_convert(value, kind)
    }

    // -----------------------------------------------------------------
    // Whole-record translation
    // -----------------------------------------------------------------

    /// Serializes a record to a wire item covering every table field.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] naming the first field that failed.
    pub fn to_item<T: Record>(
        &self,
        schema: &TableSchema,
        record: &T,
    ) -> Result<Item, EncodingError> {
        let mut item = Item::new();
        for field in &schema.fields {
            let value = record.get(&field.name);
            let attr = self.encode(field, &value)?;
            item.insert(self.attribute_name(field), attr);
        }
        Ok(item)
    }

    /// Populates a record from a wire item. Iterates table fields rather
    /// than the incoming map, so unknown wire attributes are ignored and
    /// missing attributes leave field defaults in place.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] naming the first field that failed.
    pub fn populate<T: Record>(
        &self,
        record: &mut T,
        schema: &TableSchema,
        attrs: &Item,
    ) -> Result<(), EncodingError> {
        for field in &schema.fields {
            let name = self.attribute_name(field);
            let Some(attr) = attrs.get(&name) else {
                continue;
            };
            if attr.is_null() {
                continue;
            }
            let value = self.decode(field, attr)?;
            record
                .set(&field.name, value)
                .map_err(|e| EncodingError::decode(field, e.to_string()))?;
        }
        Ok(())
    }

    /// Decodes a wire item into a fresh record.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] naming the first field that failed.
    pub fn record_from_item<T: Record>(
        &self,
        schema: &TableSchema,
        attrs: &Item,
    ) -> Result<T, EncodingError> {
        let mut record = T::default();
        self.populate(&mut record, schema, attrs)?;
        Ok(record)
    }
}

/// Decodes an attribute by its populated variant, with no target kind.
fn decode_element(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::S(s) => Value::Str(s.clone()),
        AttributeValue::N(n) => number_value(n),
        AttributeValue::B(b) => Value::Bytes(b.clone()),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::L(items) => Value::List(items.iter().map(decode_element).collect()),
        AttributeValue::M(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), decode_element(v)))
                .collect(),
        ),
        AttributeValue::Ss(items) => Value::StrSet(items.iter().cloned().collect()),
        AttributeValue::Ns(items) => Value::NumSet(items.iter().cloned().collect()),
        AttributeValue::Bs(items) => Value::BinSet(items.iter().cloned().collect()),
    }
}

fn number_value(n: &str) -> Value {
    n.parse::<i64>().map_or_else(
        |_| n.parse::<f64>().map_or(Value::Null, Value::Float),
        Value::Int,
    )
}

fn default_convert(value: Value, kind: ValueKind) -> Result<Value, ValueError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match kind {
        ValueKind::Int => i64::from_value(value).map(Value::Int),
        ValueKind::Float => f64::from_value(value).map(Value::Float),
        ValueKind::Bool => bool::from_value(value).map(Value::Bool),
        ValueKind::String => String::from_value(value).map(Value::Str),
        ValueKind::Bytes => bytes::Bytes::from_value(value).map(Value::Bytes),
        ValueKind::List => match value {
            Value::List(_) => Ok(value),
            other => Err(ValueError::new("list", &other)),
        },
        ValueKind::Map | ValueKind::Document => match value {
            Value::Map(_) | Value::List(_) => Ok(value),
            other => Err(ValueError::new("structured value", &other)),
        },
        ValueKind::StringSet => match value {
            Value::StrSet(_) => Ok(value),
            Value::List(items) => items
                .into_iter()
                .map(String::from_value)
                .collect::<Result<_, _>>()
                .map(Value::StrSet),
            other => Err(ValueError::new("string set", &other)),
        },
        ValueKind::NumberSet => match value {
            Value::NumSet(_) => Ok(value),
            Value::List(items) => items
                .into_iter()
                .map(|v| String::from_value(v))
                .collect::<Result<_, _>>()
                .map(Value::NumSet),
            other => Err(ValueError::new("number set", &other)),
        },
        ValueKind::BinarySet => match value {
            Value::BinSet(_) => Ok(value),
            other => Err(ValueError::new("binary set", &other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::value::DbType;

    fn field(name: &str, kind: ValueKind) -> FieldSchema {
        FieldSchema {
            name: name.to_owned(),
            kind,
            db_type: kind.db_type(),
        }
    }

    fn roundtrip(kind: ValueKind, value: Value) {
        let codec = Codec::new();
        let f = field("F", kind);
        let attr = codec.encode(&f, &value).unwrap();
        let back = codec.decode(&f, &attr).unwrap();
        assert_eq!(back, value, "round-trip for {kind:?}");
    }

    #[test]
    fn test_should_roundtrip_scalars() {
        roundtrip(ValueKind::Int, Value::Int(-42));
        roundtrip(ValueKind::Float, Value::Float(2.5));
        roundtrip(ValueKind::Bool, Value::Bool(true));
        roundtrip(ValueKind::String, Value::Str("hello".to_owned()));
        roundtrip(
            ValueKind::Bytes,
            Value::Bytes(bytes::Bytes::from_static(b"data")),
        );
    }

    #[test]
    fn test_should_roundtrip_collections() {
        roundtrip(
            ValueKind::List,
            Value::List(vec![Value::Int(1), Value::Str("x".to_owned())]),
        );
        roundtrip(
            ValueKind::Map,
            Value::Map(
                [("k".to_owned(), Value::Int(1))].into_iter().collect(),
            ),
        );
    }

    #[test]
    fn test_should_roundtrip_sets() {
        let strings: BTreeSet<String> = ["a".to_owned(), "b".to_owned()].into_iter().collect();
        roundtrip(ValueKind::StringSet, Value::StrSet(strings));

        let nums: BTreeSet<String> = ["1".to_owned(), "2".to_owned()].into_iter().collect();
        roundtrip(ValueKind::NumberSet, Value::NumSet(nums));
    }

    #[test]
    fn test_should_encode_string_sets_as_ss() {
        // String sets must land on the SS variant, never NS.
        let codec = Codec::new();
        let f = field("Tags", ValueKind::StringSet);
        let set: BTreeSet<String> = ["x".to_owned()].into_iter().collect();
        let attr = codec.encode(&f, &Value::StrSet(set)).unwrap();
        assert_eq!(attr.type_descriptor(), "SS");
    }

    #[test]
    fn test_should_roundtrip_documents_through_text() {
        let codec = Codec::new();
        let f = field("Doc", ValueKind::Document);
        let doc = Value::Map(
            [
                ("City".to_owned(), Value::Str("Austin".to_owned())),
                ("Zip".to_owned(), Value::Int(78701)),
            ]
            .into_iter()
            .collect(),
        );
        let attr = codec.encode(&f, &doc).unwrap();
        assert_eq!(attr.type_descriptor(), "S");
        let back = codec.decode(&f, &attr).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_should_encode_null_as_null_marker() {
        let codec = Codec::new();
        let attr = codec.encode(&field("F", ValueKind::Int), &Value::Null).unwrap();
        assert!(attr.is_null());
        assert_eq!(
            codec.decode(&field("F", ValueKind::Int), &attr).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_should_widen_numbers_on_decode() {
        let codec = Codec::new();
        let attr = AttributeValue::N("7".to_owned());
        assert_eq!(
            codec.decode(&field("F", ValueKind::Float), &attr).unwrap(),
            Value::Float(7.0)
        );
        assert_eq!(
            codec.decode(&field("F", ValueKind::String), &attr).unwrap(),
            Value::Str("7".to_owned())
        );
    }

    #[test]
    fn test_should_surface_field_name_in_errors() {
        let codec = Codec::new();
        let err = codec
            .encode(&field("Total", ValueKind::Int), &Value::Bool(true))
            .unwrap_err();
        assert!(err.to_string().contains("Total"));
    }

    #[test]
    fn test_should_honor_encode_hook_with_fallthrough() {
        let codec = Codec::new().with_encode_hook(|f, _| {
            (f.name == "Special").then(|| AttributeValue::S("hooked".to_owned()))
        });
        let attr = codec
            .encode(&field("Special", ValueKind::Int), &Value::Int(1))
            .unwrap();
        assert_eq!(attr.as_s(), Some("hooked"));

        // Other fields fall through to the default encoding.
        let attr = codec
            .encode(&field("Plain", ValueKind::Int), &Value::Int(1))
            .unwrap();
        assert_eq!(attr.as_n(), Some("1"));
    }

    #[test]
    fn test_should_honor_db_type_hook() {
        // Route integers to strings, e.g. for stores without numeric keys.
        let codec = Codec::new().with_db_type_hook(|kind| {
            (kind == ValueKind::Int).then_some(DbType::String)
        });
        let attr = codec
            .encode(&field("F", ValueKind::Int), &Value::Int(5))
            .unwrap();
        assert_eq!(attr.as_s(), Some("5"));
    }

    #[test]
    fn test_should_honor_field_name_hook() {
        let codec = Codec::new()
            .with_field_name_hook(|f| (f.name == "Old").then(|| "New".to_owned()));
        assert_eq!(codec.attribute_name(&field("Old", ValueKind::Int)), "New");
        assert_eq!(codec.attribute_name(&field("Other", ValueKind::Int)), "Other");
    }
}
