//! Wire protocol: handshake records, per-call headers, and framing.
//!
//! A connection starts with one JSON handshake line (see [`ConnectOption`]),
//! then carries length-prefixed frames. Every call and every response is a
//! header frame followed by a body frame, both encoded with the negotiated
//! codec.

mod frames;
mod wire;

pub use frames::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE, LEN_PREFIX_SIZE};
pub use wire::{read_handshake, write_handshake, ConnectOption, Header, MAGIC_NUMBER};
