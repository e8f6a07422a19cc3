//! `BSC_CONTEXT_CFG`: the configuration a [`crate::context::ConnectionContext`]
//! is built from.

use std::time::Duration;

use thiserror::Error;

use crate::identity::{Uuid, Vmac};
pub use crate::transport::CertBundle;
use crate::transport::Subprotocol;

/// Whether a context opens outgoing connections or listens for them (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Acceptor,
}

/// Recommended default from §6's option table.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Recommended default from §6's option table.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(300);
/// The original leaves this to integrators; defaulted here to match
/// `connect_timeout`'s default since both bound a single handshake-style
/// round trip.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// BACnet/SC's maximum legal NPDU, used as the default `max_npdu_len`.
pub const DEFAULT_MAX_NPDU_LEN: u16 = 1497;
/// One extra byte beyond `max_npdu_len` buys room for the minimal BVLC
/// header of a same-size Encapsulated-NPDU frame with no addresses.
pub const DEFAULT_MAX_BVLC_LEN: u16 = 1500;

/// The immutable configuration a [`crate::context::ConnectionContext`] is
/// built from (`BSC_CONTEXT_CFG`).
#[derive(Clone)]
pub struct ContextConfig {
    pub role: Role,
    pub subprotocol: Subprotocol,
    pub port: Option<u16>,
    pub certs: CertBundle,
    pub local_vmac: Vmac,
    pub local_uuid: Uuid,
    pub max_bvlc_len: u16,
    pub max_npdu_len: u16,
    pub connect_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub disconnect_timeout: Duration,
}

/// Errors raised while building a [`ContextConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("an acceptor context requires a listen port")]
    AcceptorNeedsPort,
    #[error("max_bvlc_len must be at least max_npdu_len + 4 (room for the BVLC-SC header)")]
    BvlcLenTooSmall,
}

/// Builds a [`ContextConfig`], the idiomatic replacement for
/// `bsc_init_ctx_cfg`'s positional-parameter list. Validates the role/port
/// combination before producing the immutable config.
pub struct ContextConfigBuilder {
    role: Role,
    subprotocol: Subprotocol,
    port: Option<u16>,
    certs: Option<CertBundle>,
    local_vmac: Vmac,
    local_uuid: Uuid,
    max_bvlc_len: u16,
    max_npdu_len: u16,
    connect_timeout: Duration,
    heartbeat_timeout: Duration,
    disconnect_timeout: Duration,
}

impl ContextConfigBuilder {
    pub fn new(role: Role, local_vmac: Vmac, local_uuid: Uuid) -> Self {
        ContextConfigBuilder {
            role,
            subprotocol: Subprotocol::Hub,
            port: None,
            certs: None,
            local_vmac,
            local_uuid,
            max_bvlc_len: DEFAULT_MAX_BVLC_LEN,
            max_npdu_len: DEFAULT_MAX_NPDU_LEN,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }

    pub fn subprotocol(mut self, subprotocol: Subprotocol) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn certs(mut self, certs: CertBundle) -> Self {
        self.certs = Some(certs);
        self
    }

    pub fn max_bvlc_len(mut self, v: u16) -> Self {
        self.max_bvlc_len = v;
        self
    }

    pub fn max_npdu_len(mut self, v: u16) -> Self {
        self.max_npdu_len = v;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn heartbeat_timeout(mut self, d: Duration) -> Self {
        self.heartbeat_timeout = d;
        self
    }

    pub fn disconnect_timeout(mut self, d: Duration) -> Self {
        self.disconnect_timeout = d;
        self
    }

    pub fn build(self) -> Result<ContextConfig, ConfigError> {
        if self.role == Role::Acceptor && self.port.is_none() {
            return Err(ConfigError::AcceptorNeedsPort);
        }
        if (self.max_bvlc_len as i32) < (self.max_npdu_len as i32) + 4 {
            return Err(ConfigError::BvlcLenTooSmall);
        }
        Ok(ContextConfig {
            role: self.role,
            subprotocol: self.subprotocol,
            port: self.port,
            certs: self.certs.unwrap_or(CertBundle {
                ca_chain: Vec::new(),
                cert_chain: Vec::new(),
                private_key: Vec::new(),
            }),
            local_vmac: self.local_vmac,
            local_uuid: self.local_uuid,
            max_bvlc_len: self.max_bvlc_len,
            max_npdu_len: self.max_npdu_len,
            connect_timeout: self.connect_timeout,
            heartbeat_timeout: self.heartbeat_timeout,
            disconnect_timeout: self.disconnect_timeout,
        })
    }
}
