//! Decoding and encoding of wire-level data.
//!
//! Decoding ([`decode`]) turns a payload byte slice into a [`decode::Message`]
//! of typed [`crate::value::Value`]s. Encoding ([`encode`]) turns the two
//! built-in commands into the ASCII lines the relay expects.

pub use decode::{decode_message, Identifier, Message};
pub use encode::{encode_to_vec, Encode, InitCommand, PingCommand};

pub mod decode;
pub mod encode;
