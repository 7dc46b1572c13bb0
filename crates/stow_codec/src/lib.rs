//! # Stow Codec
//!
//! Plain-value model and encoding for Stow.
//!
//! This crate provides:
//! - [`Value`] and [`Record`], the schema-less shape engines persist
//! - [`Key`], the ordered primary-key type
//! - A serde bridge ([`to_record`], [`from_record`]) mapping typed entities
//!   onto records
//! - CBOR byte encoding ([`encode`], [`decode`]) used by engines to store
//!   records
//!
//! Floats are not representable; entities persist integers, text, bytes,
//! booleans, arrays and nested records.
//!
//! ## Usage
//!
//! ```
//! use stow_codec::{decode, encode, record, Value};
//!
//! let value = Value::Map(record! { "id" => 1, "name" => "Alice" });
//! let bytes = encode(&value).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod convert;
mod error;
mod key;
mod value;

pub use cbor::{decode, encode};
pub use convert::{from_record, from_value, to_record, to_value};
pub use error::{CodecError, CodecResult};
pub use key::Key;
pub use value::{Record, Value};
