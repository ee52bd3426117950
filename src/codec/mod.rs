//! Codec module - serialization/deserialization for headers and bodies.
//!
//! Two codecs are available:
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`, struct-as-map)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Concrete codecs are marker structs with static methods. [`CodecKind`] is
//! the runtime selector: connections negotiate a codec by name in the
//! handshake, and `CodecKind::from_name` is the name-to-constructor lookup.
//! serde's generic encode/decode cannot live behind a trait object, so the
//! selector is an enum rather than a registry of boxed constructors.
//!
//! # Example
//!
//! ```
//! use minrpc::codec::CodecKind;
//!
//! let codec = CodecKind::from_name("msgpack").unwrap();
//! let encoded = codec.encode(&"hello").unwrap();
//! let decoded: String = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::error::Result;

/// Identifies a negotiable payload codec.
///
/// Carried by name in the connection handshake; both sides must encode every
/// header and body after the handshake with the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecKind {
    /// MessagePack (`rmp-serde`, struct-as-map). The default.
    MsgPack,
    /// JSON (`serde_json`).
    Json,
}

impl CodecKind {
    /// Resolve a codec by its wire name.
    ///
    /// Returns `None` for unknown names; the connection must then be rejected.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "msgpack" => Some(CodecKind::MsgPack),
            "json" => Some(CodecKind::Json),
            _ => None,
        }
    }

    /// The wire name carried in the handshake.
    pub fn name(self) -> &'static str {
        match self {
            CodecKind::MsgPack => "msgpack",
            CodecKind::Json => "json",
        }
    }

    /// Encode a value with this codec.
    pub fn encode<T: serde::Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecKind::MsgPack => MsgPackCodec::encode(value),
            CodecKind::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value with this codec.
    pub fn decode<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecKind::MsgPack => MsgPackCodec::decode(bytes),
            CodecKind::Json => JsonCodec::decode(bytes),
        }
    }
}

impl Default for CodecKind {
    fn default() -> Self {
        CodecKind::MsgPack
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
