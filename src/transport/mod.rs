//! The WebSocket transport facade the connection engine calls to open, read,
//! write, and close TLS-capable WebSocket connections (§6). This module
//! names the interface only — `bws_cli`/`bws_srv` in the original design —
//! and provides a default `tokio-tungstenite` + `rustls` backed
//! implementation plus an in-memory [`mock`] pair for driving the state
//! machine in tests without opening real sockets.
//!
//! The engine never holds its connection-table mutex across a call into this
//! module (§5); every method here is free to suspend.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
#[cfg(feature = "transport")]
pub mod tungstenite;

/// Which of the two BACnet/SC subprotocols a connection uses. The acceptor
/// binds both and dispatches on this selector (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subprotocol {
    Hub,
    Direct,
}

impl Subprotocol {
    /// The WebSocket subprotocol identifier sent during the opening
    /// handshake.
    pub const fn as_str(self) -> &'static str {
        match self {
            Subprotocol::Hub => "hub.bsc.bacnet.org",
            Subprotocol::Direct => "dc.bsc.bacnet.org",
        }
    }
}

/// CA chain, device certificate chain, and device private key, each a
/// PEM-encoded byte slice loaded by the caller (§6). This crate never reads
/// from the filesystem itself.
#[derive(Clone)]
pub struct CertBundle {
    pub ca_chain: Vec<u8>,
    pub cert_chain: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// Errors a transport implementation may report. `Timeout` and `Transient`
/// are recoverable; `Closed` is terminal for the connection that raised it
/// (§7 Transport errors).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("operation timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("transient send failure, caller may retry")]
    Transient,
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("WebSocket protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One open WebSocket connection, client- or server-accepted. `send`/`recv`
/// are the engine's only suspension points once a connection exists (§5).
#[async_trait]
pub trait WsConnection: Send + Sync {
    /// Send a complete BVLC-SC frame as one WebSocket binary message.
    /// `Err(TransportError::Transient)` means the caller may retry later
    /// without the connection being considered closed (§4.2.3).
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Receive one complete WebSocket binary message, waiting at most
    /// `timeout`. `Err(TransportError::Timeout)` on expiry.
    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>>;

    /// Close the underlying WebSocket. Idempotent.
    async fn disconnect(&self);
}

/// The outbound half of the facade (`bws_cli`).
#[async_trait]
pub trait WebSocketClient: Send + Sync {
    async fn connect(
        &self,
        subprotocol: Subprotocol,
        url: &str,
        certs: &CertBundle,
    ) -> Result<Box<dyn WsConnection>>;
}

/// The listening half of the facade (`bws_srv`). A single server instance
/// binds both subprotocols and dispatches `accept` by `subprotocol` (§6).
#[async_trait]
pub trait WebSocketServer: Send + Sync {
    async fn start(&self, subprotocol: Subprotocol, port: u16, certs: &CertBundle) -> Result<()>;

    async fn accept(
        &self,
        subprotocol: Subprotocol,
        timeout: Duration,
    ) -> Result<Box<dyn WsConnection>>;

    async fn stop(&self);
}
