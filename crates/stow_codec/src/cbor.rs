//! CBOR byte encoding of plain values.
//!
//! Engines persist records as bytes and decode them on every read, which
//! gives structured-clone semantics: a value read back never aliases the
//! value that was written.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Encodes a value to CBOR bytes.
///
/// Records are encoded with their fields in sorted order, so equal values
/// always produce identical bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the writer fails.
pub fn encode(value: &Value) -> CodecResult<Vec<u8>> {
    let raw = ciborium::Value::from(value.clone());
    let mut buffer = Vec::new();
    ciborium::into_writer(&raw, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Fails on malformed input or items a [`Value`] cannot represent.
pub fn decode(bytes: &[u8]) -> CodecResult<Value> {
    let raw: ciborium::Value =
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    Value::try_from(raw)
}
