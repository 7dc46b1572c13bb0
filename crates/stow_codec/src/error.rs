//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while converting between typed values,
/// plain values and CBOR bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a value.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Float values cannot be persisted.
    #[error("float values are not supported in records")]
    FloatForbidden,

    /// Integer does not fit into a signed 64-bit value.
    #[error("integer overflow")]
    IntegerOverflow,

    /// Map keys must be text.
    #[error("map keys must be text, found {found}")]
    NonTextKey {
        /// Kind of the offending key.
        found: &'static str,
    },

    /// Unsupported CBOR item (tags, undefined, simple values).
    #[error("unsupported CBOR type: {type_name}")]
    UnsupportedType {
        /// Name of the unsupported type.
        type_name: String,
    },

    /// A value cannot be used as a record key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Why the value was rejected.
        message: String,
    },

    /// A typed value did not serialize to a record.
    #[error("expected a record, found {found}")]
    NotARecord {
        /// Kind of the value found instead.
        found: &'static str,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}
