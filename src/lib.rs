#![doc = include_str!("../README.md")]

//! Crate layout:
//!
//! - [`identity`] — VMAC and UUID node identifiers.
//! - [`bvlc`] — the BVLC-SC frame codec: decode/encode, header options, and
//!   the error-class/error-code taxonomy carried in BVLC-Result.
//! - [`util`] — small helpers shared by the codec and the connection engine.
//! - [`transport`], [`connection`], [`context`] — the WebSocket transport
//!   facade and the connection/connection-table state machine, gated behind
//!   the `transport` feature since both need `tokio` and `async-trait`. With
//!   the feature disabled this crate is a pure codec library: bring your own
//!   connection engine on top of [`bvlc`].

pub mod bvlc;
pub mod identity;
pub mod util;

#[cfg(feature = "transport")]
pub mod connection;
#[cfg(feature = "transport")]
pub mod context;
#[cfg(feature = "transport")]
pub mod transport;

pub use bvlc::{decode_message, encode, BvlcError, DecodedMessage, FunctionCode, Payload};
pub use identity::{Uuid, Vmac};

#[cfg(feature = "transport")]
pub use connection::{Connection, ConnectionError, ConnectionState, Role};
#[cfg(feature = "transport")]
pub use context::{ConnectionContext, ContextError};
