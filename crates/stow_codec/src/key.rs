//! Record keys.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::fmt;

/// A primary key.
///
/// Keys are totally ordered: integers sort before text, text before
/// binary. Within a kind the natural ordering applies. Engines iterate
/// stores in ascending key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key, also produced by key generators.
    Integer(i64),
    /// Text key.
    Text(String),
    /// Binary key.
    Bytes(Vec<u8>),
}

impl Key {
    /// Converts a plain value into a key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] for values that cannot act as a
    /// key (null, booleans, arrays and records).
    pub fn from_value(value: &Value) -> CodecResult<Self> {
        match value {
            Value::Integer(n) => Ok(Key::Integer(*n)),
            Value::Text(s) => Ok(Key::Text(s.clone())),
            Value::Bytes(b) => Ok(Key::Bytes(b.clone())),
            other => Err(CodecError::invalid_key(format!(
                "{} cannot be used as a key",
                other.kind()
            ))),
        }
    }

    /// Returns the integer payload, if this is an integer key.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Key::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s:?}"),
            Key::Bytes(b) => write!(f, "bytes[{}]", b.len()),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Integer(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Bytes(b)
    }
}

impl TryFrom<&Value> for Key {
    type Error = CodecError;

    fn try_from(value: &Value) -> CodecResult<Self> {
        Key::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn kinds_are_ordered() {
        let mut keys = vec![
            Key::Bytes(vec![0]),
            Key::Text("a".into()),
            Key::Integer(i64::MAX),
            Key::Integer(-5),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                Key::Integer(-5),
                Key::Integer(i64::MAX),
                Key::Text("a".into()),
                Key::Bytes(vec![0]),
            ]
        );
    }

    #[test]
    fn null_is_not_a_key() {
        assert!(matches!(
            Key::from_value(&Value::Null),
            Err(CodecError::InvalidKey { .. })
        ));
    }

    proptest! {
        #[test]
        fn integer_keys_follow_numeric_order(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(Key::Integer(a).cmp(&Key::Integer(b)), a.cmp(&b));
        }

        #[test]
        fn keys_survive_value_conversion(s in ".*", n in any::<i64>()) {
            for key in [Key::Text(s.clone()), Key::Integer(n)] {
                let value = Value::from(key.clone());
                prop_assert_eq!(Key::from_value(&value).unwrap(), key);
            }
        }
    }
}
