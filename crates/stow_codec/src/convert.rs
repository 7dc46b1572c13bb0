//! Serde bridge between typed values and plain [`Value`]s.
//!
//! Typed entities are serialized to CBOR with `ciborium` and read back as a
//! dynamic value, so any `Serialize` type maps onto the same plain shape an
//! engine persists. The reverse direction goes through the same bytes.

use crate::error::{CodecError, CodecResult};
use crate::value::{Record, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Projects a serializable value into a plain value.
///
/// # Errors
///
/// Fails if serialization fails or produces items records cannot hold
/// (floats, tags, non-text map keys, integers outside the i64 range).
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Value> {
    let mut buffer = Vec::new();
    ciborium::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    let raw: ciborium::Value = ciborium::from_reader(buffer.as_slice())
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    Value::try_from(raw)
}

/// Materializes a typed value from a plain value.
///
/// # Errors
///
/// Fails if the value does not have the shape `T` expects.
pub fn from_value<T: DeserializeOwned>(value: Value) -> CodecResult<T> {
    let raw = ciborium::Value::from(value);
    let mut buffer = Vec::new();
    ciborium::into_writer(&raw, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    ciborium::from_reader(buffer.as_slice()).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Projects a serializable value into a record.
///
/// # Errors
///
/// Returns [`CodecError::NotARecord`] if `T` does not serialize to a map.
pub fn to_record<T: Serialize + ?Sized>(value: &T) -> CodecResult<Record> {
    to_value(value)?.into_record()
}

/// Materializes a typed value from a record.
///
/// # Errors
///
/// Fails if the record does not have the shape `T` expects.
pub fn from_record<T: DeserializeOwned>(record: Record) -> CodecResult<T> {
    from_value(Value::Map(record))
}
