//! # JSON <-> Protobuf Codec
//!
//! Transcodes between JSON text, [`prost_reflect::DynamicMessage`] and the Protobuf binary wire
//! format, driven entirely by runtime [`prost_reflect::MessageDescriptor`]s.
//!
//! ## How it works
//!
//! 1. **JSON -> Message** ([`from_json`]):
//!    - Walks the JSON tree alongside the descriptor, rejecting (or dropping) unknown field
//!      names and resolving oneof groups so the last member written wins.
//!    - Hands the normalized tree to `prost-reflect`'s canonical protobuf-JSON deserializer,
//!      tracking the JSON path so errors point at the offending location.
//!
//! 2. **Message -> JSON** ([`to_json`]):
//!    - Rejects enum numbers without a symbolic name unless tolerated.
//!    - Serializes with the canonical mapping (64-bit integers as strings, enums by name).
//!    - When defaults are emitted, fields that track presence and were never set are pruned.
//!
//! 3. **Message <-> Wire** ([`to_wire`], [`from_wire`]):
//!    - Standard Protobuf binary encoding. Unknown fields found while decoding are kept as
//!      opaque bytes and written back out on encode.
mod json;
mod wire;

pub use json::{JsonOptions, from_json, from_json_value, to_json, to_json_value};
pub use wire::{WireCodec, from_wire, to_wire};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid JSON at '{path}': {message}")]
    JsonParse { path: String, message: String },

    #[error("Unknown field '{path}'")]
    UnknownField { path: String },

    #[error("Enum value {value} at '{path}' has no symbolic name")]
    UnknownEnumValue { path: String, value: i32 },

    #[error("Failed to map message to JSON: {message}")]
    JsonEncode { message: String },

    #[error("Failed to decode Protobuf bytes: {message}")]
    WireDecode { message: String },
}
