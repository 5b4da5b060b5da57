//! A client-side implementation of the WeeChat relay protocol: the typed
//! wire value model, the framing/decompression layer, and (behind the
//! `tokio` feature) an async connection engine built on top of them.

#![deny(missing_debug_implementations)]

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod value;

#[cfg(feature = "tokio")]
pub mod cancel;
#[cfg(feature = "tokio")]
pub mod connection;
#[cfg(feature = "tokio")]
pub mod framing;
#[cfg(feature = "tokio")]
pub mod registry;
#[cfg(feature = "tokio")]
pub mod writequeue;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use value::Value;

#[cfg(feature = "tokio")]
pub use connection::{ConnectionState, Relay};
