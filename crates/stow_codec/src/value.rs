//! Dynamic plain-value type.

use crate::error::{CodecError, CodecResult};
use crate::key::Key;
use std::collections::BTreeMap;

/// A record as persisted by an engine: field name to value.
///
/// Fields are kept in sorted order so two projections of the same entity
/// always compare and encode identically.
pub type Record = BTreeMap<String, Value>;

/// A dynamic plain value.
///
/// This is the shape every typed entity is projected into before it is
/// handed to an engine. Floats are intentionally not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested record.
    Map(Record),
}

impl Value {
    /// Short name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Returns true for a null field.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(flag) = self {
            Some(*flag)
        } else {
            None
        }
    }

    /// Integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    /// Binary payload, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::Bytes(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Text payload, if any.
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(text) = self {
            Some(text)
        } else {
            None
        }
    }

    /// Items of an array field, if any.
    pub fn as_array(&self) -> Option<&[Value]> {
        if let Value::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Nested record, if any.
    pub fn as_record(&self) -> Option<&Record> {
        if let Value::Map(record) = self {
            Some(record)
        } else {
            None
        }
    }

    /// Consumes the value, returning the record it holds.
    pub fn into_record(self) -> CodecResult<Record> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(CodecError::NotARecord {
                found: other.kind(),
            }),
        }
    }

    /// Look up a field in this record value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_record().and_then(|record| record.get(field))
    }
}

macro_rules! value_from {
    ($($source:ty => |$arg:ident| $body:expr),+ $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from($arg: $source) -> Self {
                    $body
                }
            }
        )+
    };
}

value_from! {
    bool => |flag| Value::Bool(flag),
    i64 => |n| Value::Integer(n),
    i32 => |n| Value::Integer(i64::from(n)),
    u32 => |n| Value::Integer(i64::from(n)),
    String => |text| Value::Text(text),
    &str => |text| Value::Text(text.to_owned()),
    Vec<u8> => |bytes| Value::Bytes(bytes),
    &[u8] => |bytes| Value::Bytes(bytes.to_vec()),
    Vec<Value> => |items| Value::Array(items),
    Record => |record| Value::Map(record),
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Integer(n) => Value::Integer(n),
            Key::Text(s) => Value::Text(s),
            Key::Bytes(b) => Value::Bytes(b),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

fn raw_kind(raw: &ciborium::Value) -> &'static str {
    match raw {
        ciborium::Value::Integer(_) => "integer",
        ciborium::Value::Bytes(_) => "bytes",
        ciborium::Value::Float(_) => "float",
        ciborium::Value::Text(_) => "text",
        ciborium::Value::Bool(_) => "bool",
        ciborium::Value::Null => "null",
        ciborium::Value::Tag(..) => "tag",
        ciborium::Value::Array(_) => "array",
        ciborium::Value::Map(_) => "map",
        _ => "unknown",
    }
}

impl TryFrom<ciborium::Value> for Value {
    type Error = CodecError;

    fn try_from(raw: ciborium::Value) -> CodecResult<Self> {
        use ciborium::Value as Raw;

        let value = match raw {
            Raw::Null => Value::Null,
            Raw::Bool(b) => Value::Bool(b),
            Raw::Integer(n) => {
                Value::Integer(i64::try_from(n).map_err(|_| CodecError::IntegerOverflow)?)
            }
            Raw::Float(_) => return Err(CodecError::FloatForbidden),
            Raw::Bytes(b) => Value::Bytes(b),
            Raw::Text(s) => Value::Text(s),
            Raw::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<CodecResult<Vec<_>>>()?,
            ),
            Raw::Map(pairs) => {
                let mut record = Record::new();
                for (field, item) in pairs {
                    let field = match field {
                        Raw::Text(name) => name,
                        other => {
                            return Err(CodecError::NonTextKey {
                                found: raw_kind(&other),
                            })
                        }
                    };
                    record.insert(field, Value::try_from(item)?);
                }
                Value::Map(record)
            }
            other => return Err(CodecError::unsupported_type(raw_kind(&other))),
        };

        Ok(value)
    }
}

impl From<Value> for ciborium::Value {
    fn from(value: Value) -> Self {
        use ciborium::Value as Raw;

        match value {
            Value::Null => Raw::Null,
            Value::Bool(b) => Raw::Bool(b),
            Value::Integer(n) => Raw::Integer(n.into()),
            Value::Bytes(b) => Raw::Bytes(b),
            Value::Text(s) => Raw::Text(s),
            Value::Array(items) => Raw::Array(items.into_iter().map(Raw::from).collect()),
            Value::Map(record) => Raw::Map(
                record
                    .into_iter()
                    .map(|(field, item)| (Raw::Text(field), Raw::from(item)))
                    .collect(),
            ),
        }
    }
}

/// Builds a [`Record`] from `field => value` pairs.
///
/// ```
/// use stow_codec::{record, Value};
///
/// let user = record! { "name" => "Alice", "age" => 30 };
/// assert_eq!(user.get("age"), Some(&Value::Integer(30)));
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Record::new()
    };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $(
            record.insert(::std::string::String::from($field), $crate::Value::from($value));
        )+
        record
    }};
}
