//! `BSC_CONNECTION`: one WebSocket connection, its state, the peer's VMAC and
//! UUID, negotiated frame-size maximums, and liveness timers (§4.2).
//!
//! A [`Connection`] only drives its own socket; duplicate-VMAC/duplicate-UUID
//! arbitration across the whole connection table is
//! [`crate::context::ConnectionContext`]'s job, since only the context can
//! see the other connections. This module provides the handshake mechanics
//! the context calls into: [`Connection::connect`] for an initiator,
//! [`Connection::await_connect_request`] / [`Connection::complete_accept`] /
//! [`Connection::reject_duplicate_vmac`] for an acceptor.

pub mod config;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::bvlc::{
    self, encode_bvlc_result_nack, encode_connect_accept, encode_connect_request,
    encode_disconnect_ack, encode_disconnect_request, encode_heartbeat_ack,
    encode_heartbeat_request, BvlcError, DecodedMessage, ErrorClass, ErrorCode, FunctionCode,
    Payload, ResultCode,
};
use crate::identity::{Uuid, Vmac};
use crate::transport::{TransportError, WebSocketClient, WsConnection};
use crate::util::{random_message_id, random_vmac};

pub use config::{CertBundle, ConfigError, ContextConfig, ContextConfigBuilder, Role};

/// §4.2's six connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    AwaitingWebsocket,
    AwaitingRequest,
    AwaitingAccept,
    Connected,
    Disconnecting,
}

/// Errors raised by the connection state machine.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] BvlcError),
    #[error("operation not valid in the connection's current state")]
    WrongState,
    #[error("no Connect-Accept/Connect-Request within the configured timeout")]
    Timeout,
    #[error("peer rejected the handshake: {class:?}/{code:?}")]
    Rejected {
        class: ErrorClass,
        code: ErrorCode,
    },
    #[error("peer sent an unexpected message for the current state")]
    UnexpectedMessage,
    #[error("connection is closed")]
    Closed,
}

/// The non-conflated outcome of [`Connection::send`] (§9: the original's
/// `int` return conflated transient failure with connection-closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(u16),
    Transient,
}

/// What a maintenance tick did to this connection (§4.2.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing due yet.
    Continued,
    /// An initiator sent a fresh Heartbeat-Request.
    SentHeartbeat,
    /// Liveness exceeded 2x the heartbeat timeout; the connection must be
    /// closed and removed from the context's table.
    TimedOut,
}

/// One BACnet/SC WebSocket connection and its negotiated state (`BSC_CONNECTION`).
pub struct Connection {
    socket: Option<Box<dyn WsConnection>>,
    state: ConnectionState,
    role: Role,
    config: Arc<ContextConfig>,
    /// The VMAC actually used on the wire for this connection attempt; starts
    /// as `config.local_vmac` but may be re-rolled after a duplicate-VMAC NAK
    /// (§4.2.1, §4.3b) without mutating the shared context config.
    local_vmac: Vmac,
    peer_vmac: Option<Vmac>,
    peer_uuid: Option<Uuid>,
    remote_max_bvlc_len: Option<u16>,
    remote_max_npdu_len: Option<u16>,
    message_id: u16,
    heartbeat_seconds_elapsed: u64,
    /// Set when an initiator has sent a Heartbeat-Request and not yet seen
    /// any traffic since; a second heartbeat-timeout interval with this still
    /// set closes the connection (§4.2.1: two heartbeats with no intervening
    /// traffic is the 2x liveness bound).
    heartbeat_outstanding: bool,
    expected_connect_accept_id: Option<u16>,
    expected_disconnect_id: Option<u16>,
    expected_heartbeat_id: Option<u16>,
}

impl Connection {
    /// A fresh, idle connection ready for `connect` (initiator) or to be
    /// handed a just-accepted socket (acceptor).
    pub fn new(role: Role, config: Arc<ContextConfig>) -> Self {
        let local_vmac = config.local_vmac;
        Connection {
            socket: None,
            state: ConnectionState::Idle,
            role,
            config,
            local_vmac,
            peer_vmac: None,
            peer_uuid: None,
            remote_max_bvlc_len: None,
            remote_max_npdu_len: None,
            message_id: 0,
            heartbeat_seconds_elapsed: 0,
            heartbeat_outstanding: false,
            expected_connect_accept_id: None,
            expected_disconnect_id: None,
            expected_heartbeat_id: None,
        }
    }

    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    pub const fn local_vmac(&self) -> Vmac {
        self.local_vmac
    }

    pub const fn peer_vmac(&self) -> Option<Vmac> {
        self.peer_vmac
    }

    pub const fn peer_uuid(&self) -> Option<Uuid> {
        self.peer_uuid
    }

    /// `None` unless the connection is `Connected` or `Disconnecting` (§G.1).
    pub const fn remote_max_bvlc_len(&self) -> Option<u16> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Disconnecting => self.remote_max_bvlc_len,
            _ => None,
        }
    }

    /// `None` unless the connection is `Connected` or `Disconnecting` (§G.1).
    pub const fn remote_max_npdu_len(&self) -> Option<u16> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Disconnecting => self.remote_max_npdu_len,
            _ => None,
        }
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        debug!(
            "connection {:?} (peer {:?}): {:?} -> {:?}",
            self.local_vmac, self.peer_vmac, self.state, new_state
        );
        self.state = new_state;
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let socket = self.socket.as_ref().ok_or(ConnectionError::Closed)?;
        socket.send(bytes).await.map_err(|e| e.into())
    }

    async fn recv_raw(&self, timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        let socket = self.socket.as_ref().ok_or(ConnectionError::Closed)?;
        socket.recv(timeout).await.map_err(|e| e.into())
    }

    async fn close_and_reset(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.disconnect().await;
        }
        self.set_state(ConnectionState::Idle);
    }

    // -----------------------------------------------------------------
    // Initiator
    // -----------------------------------------------------------------

    /// Run the full initiator handshake (§4.2.1): open the WebSocket, send
    /// Connect-Request, and wait for Connect-Accept. Automatically re-rolls
    /// [`Connection::local_vmac`] and retries once per duplicate-VMAC NAK.
    pub async fn connect(
        &mut self,
        client: &dyn WebSocketClient,
        url: &str,
    ) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Idle {
            return Err(ConnectionError::WrongState);
        }
        loop {
            match self.connect_attempt(client, url).await {
                Ok(()) => return Ok(()),
                Err(ConnectionError::Rejected {
                    code: ErrorCode::NodeDuplicateVmac,
                    ..
                }) => {
                    self.local_vmac = random_vmac();
                    warn!(
                        "duplicate VMAC rejected by peer, retrying with {:?}",
                        self.local_vmac
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn connect_attempt(
        &mut self,
        client: &dyn WebSocketClient,
        url: &str,
    ) -> Result<(), ConnectionError> {
        self.set_state(ConnectionState::AwaitingWebsocket);
        let socket = match client.connect(self.config.subprotocol, url, &self.config.certs).await {
            Ok(socket) => socket,
            Err(e) => {
                self.set_state(ConnectionState::Idle);
                return Err(e.into());
            }
        };
        self.socket = Some(socket);

        let msg_id = random_message_id();
        self.message_id = msg_id;
        self.expected_connect_accept_id = Some(msg_id);
        let frame = encode_connect_request(
            msg_id,
            self.local_vmac,
            self.config.local_uuid,
            self.config.max_bvlc_len,
            self.config.max_npdu_len,
        );
        if let Err(e) = self.send_raw(&frame).await {
            self.close_and_reset().await;
            return Err(e);
        }
        self.set_state(ConnectionState::AwaitingAccept);

        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.close_and_reset().await;
                return Err(ConnectionError::Timeout);
            }
            let bytes = match self.recv_raw(remaining).await {
                Ok(bytes) => bytes,
                Err(ConnectionError::Transport(TransportError::Timeout)) => continue,
                Err(e) => {
                    self.close_and_reset().await;
                    return Err(e);
                }
            };
            let decoded = match bvlc::decode_message(&bytes) {
                Ok(d) => d,
                Err(e) => {
                    warn!("malformed frame while awaiting Connect-Accept: {e}");
                    continue;
                }
            };
            if Some(decoded.message_id) != self.expected_connect_accept_id {
                warn!(
                    "ignoring message id {:#06x} while awaiting Connect-Accept for {:#06x}",
                    decoded.message_id,
                    self.expected_connect_accept_id.unwrap_or(0)
                );
                continue;
            }
            match decoded.payload {
                Payload::ConnectAccept {
                    vmac,
                    uuid,
                    max_bvlc_len,
                    max_npdu_len,
                } => {
                    self.peer_vmac = Some(vmac);
                    self.peer_uuid = Some(uuid);
                    self.remote_max_bvlc_len = Some(max_bvlc_len);
                    self.remote_max_npdu_len = Some(max_npdu_len);
                    self.heartbeat_seconds_elapsed = 0;
                    self.heartbeat_outstanding = false;
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Payload::Result {
                    result: ResultCode::Nack {
                        error_class,
                        error_code,
                        ..
                    },
                    ..
                } => {
                    self.close_and_reset().await;
                    return Err(ConnectionError::Rejected {
                        class: error_class,
                        code: error_code,
                    });
                }
                Payload::DisconnectRequest => {
                    warn!(
                        "Disconnect-Request received while awaiting Connect-Accept; \
                         AB.6.2.2 does not define this transition, treating as terminal"
                    );
                    self.close_and_reset().await;
                    return Err(ConnectionError::UnexpectedMessage);
                }
                _ => {
                    self.close_and_reset().await;
                    return Err(ConnectionError::UnexpectedMessage);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Acceptor
    // -----------------------------------------------------------------

    /// Attach a freshly accepted socket and wait for the peer's
    /// Connect-Request (§4.2.2). Returns the request's fields; the caller
    /// (the context) decides whether to accept, replace, or reject based on
    /// its table lookups, then calls [`Connection::complete_accept`] or
    /// [`Connection::reject_duplicate_vmac`].
    pub async fn await_connect_request(
        &mut self,
        socket: Box<dyn WsConnection>,
    ) -> Result<(u16, Vmac, Uuid, u16, u16), ConnectionError> {
        if self.state != ConnectionState::Idle {
            return Err(ConnectionError::WrongState);
        }
        self.socket = Some(socket);
        self.set_state(ConnectionState::AwaitingRequest);

        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.close_and_reset().await;
                return Err(ConnectionError::Timeout);
            }
            let bytes = match self.recv_raw(remaining).await {
                Ok(bytes) => bytes,
                Err(ConnectionError::Transport(TransportError::Timeout)) => continue,
                Err(e) => {
                    self.close_and_reset().await;
                    return Err(e);
                }
            };
            let decoded = match bvlc::decode_message(&bytes) {
                Ok(d) => d,
                Err(e) => {
                    warn!("malformed frame while awaiting Connect-Request: {e}");
                    continue;
                }
            };
            match decoded.payload {
                Payload::ConnectRequest {
                    vmac,
                    uuid,
                    max_bvlc_len,
                    max_npdu_len,
                } => {
                    return Ok((decoded.message_id, vmac, uuid, max_bvlc_len, max_npdu_len));
                }
                other => {
                    warn!("expected Connect-Request, got {:?}", other);
                    continue;
                }
            }
        }
    }

    /// Accept the handshake: reply Connect-Accept, record the peer, and
    /// enter `Connected`.
    pub async fn complete_accept(
        &mut self,
        peer_vmac: Vmac,
        peer_uuid: Uuid,
        peer_max_bvlc_len: u16,
        peer_max_npdu_len: u16,
    ) -> Result<(), ConnectionError> {
        let frame = encode_connect_accept(
            random_message_id(),
            self.config.local_vmac,
            self.config.local_uuid,
            self.config.max_bvlc_len,
            self.config.max_npdu_len,
        );
        self.send_raw(&frame).await?;
        self.peer_vmac = Some(peer_vmac);
        self.peer_uuid = Some(peer_uuid);
        self.remote_max_bvlc_len = Some(peer_max_bvlc_len);
        self.remote_max_npdu_len = Some(peer_max_npdu_len);
        self.heartbeat_seconds_elapsed = 0;
        self.heartbeat_outstanding = false;
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Reject a handshake: send a BVLC-Result NAK echoing the Connect-Request's
    /// message id (§4.3b, §4.3c), then close.
    pub async fn reject_duplicate_vmac(
        &mut self,
        request_message_id: u16,
    ) -> Result<(), ConnectionError> {
        let frame = encode_bvlc_result_nack(
            request_message_id,
            FunctionCode::ConnectRequest.as_u8(),
            0,
            ErrorClass::Communication,
            ErrorCode::NodeDuplicateVmac,
            None,
        )?;
        let _ = self.send_raw(&frame).await;
        self.close_and_reset().await;
        Ok(())
    }

    /// Preempt this (old) connection during duplicate-UUID replacement
    /// (§4.2.2, §4.3a): best-effort Disconnect-Request, then close. The
    /// context removes this connection from the table regardless of whether
    /// the peer ever acks.
    pub async fn preempt_for_reboot(&mut self) {
        if matches!(self.state, ConnectionState::Connected | ConnectionState::Disconnecting) {
            self.message_id = self.message_id.wrapping_add(1);
            let frame = encode_disconnect_request(self.message_id);
            let _ = self.send_raw(&frame).await;
        }
        self.close_and_reset().await;
    }

    // -----------------------------------------------------------------
    // Send / receive (§4.2.3)
    // -----------------------------------------------------------------

    /// Send application (NPDU) bytes. Only valid while `Connected`.
    pub async fn send(&mut self, npdu: &[u8]) -> Result<SendOutcome, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::WrongState);
        }
        self.message_id = self.message_id.wrapping_add(1);
        let frame = bvlc::encode_encapsulated_npdu(self.message_id, None, None, npdu.to_vec());
        match self.send_raw(&frame).await {
            Ok(()) => {
                // Acceptor resets its own liveness counter on send; initiator
                // only resets on receipt (§G.2).
                if self.role == Role::Acceptor {
                    self.heartbeat_seconds_elapsed = 0;
                }
                Ok(SendOutcome::Sent(self.message_id))
            }
            Err(ConnectionError::Transport(TransportError::Transient)) => Ok(SendOutcome::Transient),
            Err(ConnectionError::Transport(TransportError::Closed)) => {
                self.close_and_reset().await;
                Err(ConnectionError::Closed)
            }
            Err(e) => Err(e),
        }
    }

    /// Receive one payload, discarding oversized frames (I6) and consuming
    /// service frames (Heartbeat-Ack) internally. Only valid while
    /// `Connected`. Returns `Ok(None)` on timeout or a fully internally
    /// consumed frame.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::WrongState);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let bytes = match self.recv_raw(remaining).await {
                Ok(bytes) => bytes,
                Err(ConnectionError::Transport(TransportError::Timeout)) => return Ok(None),
                Err(ConnectionError::Transport(TransportError::Closed)) => {
                    self.close_and_reset().await;
                    return Err(ConnectionError::Closed);
                }
                Err(e) => return Err(e),
            };
            if bytes.len() > self.config.max_bvlc_len as usize {
                trace!("discarding oversized frame of {} bytes", bytes.len());
                continue;
            }
            let decoded = match bvlc::decode_message(&bytes) {
                Ok(d) => d,
                Err(e) => {
                    warn!("discarding malformed frame: {e}");
                    continue;
                }
            };
            self.heartbeat_seconds_elapsed = 0;
            self.heartbeat_outstanding = false;
            match self.process_connected(decoded).await? {
                Some(npdu) => return Ok(Some(npdu)),
                None => continue,
            }
        }
    }

    async fn process_connected(
        &mut self,
        decoded: DecodedMessage,
    ) -> Result<Option<Vec<u8>>, ConnectionError> {
        match decoded.payload {
            Payload::HeartbeatRequest => {
                let frame = encode_heartbeat_ack(decoded.message_id);
                self.send_raw(&frame).await?;
                Ok(None)
            }
            Payload::HeartbeatAck => {
                if Some(decoded.message_id) != self.expected_heartbeat_id {
                    warn!(
                        "Heartbeat-Ack id {:#06x} does not match expected {:?}",
                        decoded.message_id, self.expected_heartbeat_id
                    );
                }
                Ok(None)
            }
            Payload::DisconnectRequest => {
                let frame = encode_disconnect_ack(decoded.message_id);
                let _ = self.send_raw(&frame).await;
                self.close_and_reset().await;
                Ok(None)
            }
            Payload::EncapsulatedNpdu(bytes) => Ok(Some(bytes)),
            other => {
                warn!("unexpected function in Connected state: {:?}", other);
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------
    // Disconnect (§4.2.1's `disconnecting` branch)
    // -----------------------------------------------------------------

    /// Initiate a graceful disconnect. A no-op, not an error, unless the
    /// connection is `Connected` or already `Disconnecting` (§G.2): a caller
    /// racing a heartbeat-timeout teardown against a user-initiated
    /// disconnect is normal, not a bug.
    pub async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }
        self.message_id = self.message_id.wrapping_add(1);
        self.expected_disconnect_id = Some(self.message_id);
        let frame = encode_disconnect_request(self.message_id);
        self.set_state(ConnectionState::Disconnecting);
        if self.send_raw(&frame).await.is_err() {
            self.close_and_reset().await;
            return Ok(());
        }

        let deadline = Instant::now() + self.config.disconnect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.close_and_reset().await;
                return Ok(());
            }
            let bytes = match self.recv_raw(remaining).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    self.close_and_reset().await;
                    return Ok(());
                }
            };
            let decoded = match bvlc::decode_message(&bytes) {
                Ok(d) => d,
                Err(_) => continue,
            };
            match decoded.payload {
                Payload::DisconnectAck if Some(decoded.message_id) == self.expected_disconnect_id => {
                    self.close_and_reset().await;
                    return Ok(());
                }
                Payload::Result {
                    result: ResultCode::Nack { .. },
                    ..
                } if Some(decoded.message_id) == self.expected_disconnect_id => {
                    self.close_and_reset().await;
                    return Ok(());
                }
                _ => continue,
            }
        }
    }

    // -----------------------------------------------------------------
    // Maintenance tick (§4.2.4)
    // -----------------------------------------------------------------

    /// Advance this connection's liveness counter by `elapsed` and apply the
    /// role-specific heartbeat-timeout rule.
    pub async fn tick(&mut self, elapsed: Duration) -> Result<TickOutcome, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Ok(TickOutcome::Continued);
        }
        self.heartbeat_seconds_elapsed += elapsed.as_secs();
        let timeout_s = self.config.heartbeat_timeout.as_secs();

        match self.role {
            // Acceptor never initiates a heartbeat; it just gives up at 2x.
            Role::Acceptor => {
                if self.heartbeat_seconds_elapsed < 2 * timeout_s {
                    return Ok(TickOutcome::Continued);
                }
                self.close_and_reset().await;
                Ok(TickOutcome::TimedOut)
            }
            // Initiator sends one Heartbeat-Request after the first idle
            // interval; a second interval with it still unacked (no
            // intervening traffic) closes the connection.
            Role::Initiator => {
                if self.heartbeat_seconds_elapsed < timeout_s {
                    return Ok(TickOutcome::Continued);
                }
                if self.heartbeat_outstanding {
                    self.close_and_reset().await;
                    return Ok(TickOutcome::TimedOut);
                }
                self.message_id = self.message_id.wrapping_add(1);
                self.expected_heartbeat_id = Some(self.message_id);
                let frame = encode_heartbeat_request(self.message_id);
                self.send_raw(&frame).await?;
                self.heartbeat_seconds_elapsed = 0;
                self.heartbeat_outstanding = true;
                Ok(TickOutcome::SentHeartbeat)
            }
        }
    }
}
