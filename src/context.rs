//! `BSC_CONNECTION_CTX`: the table of connections a BACnet/SC node maintains,
//! and the duplicate-VMAC/duplicate-UUID arbitration that only a view across
//! the whole table can make (§4.2.2, §4.3).
//!
//! The table itself lives behind a plain [`std::sync::Mutex`] (§9: the
//! original's process-wide recursive mutex is replaced by one mutex per
//! context, held only for the plain bookkeeping operations below). No socket
//! I/O ever happens while the lock is held: every method that needs to await
//! a [`Connection`] operation removes it from its slot first, drops the lock,
//! awaits, then reinserts it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::connection::{Connection, ConnectionError, ConnectionState, ContextConfig, Role, SendOutcome, TickOutcome};
use crate::identity::{Uuid, Vmac};
use crate::transport::{Subprotocol, WebSocketClient, WebSocketServer};

use std::sync::Arc;

/// A stable handle into a context's connection table. Valid until the
/// connection is [`ConnectionContext::forget`]-ten or times out.
pub type Handle = usize;

/// Errors raised by [`ConnectionContext`] operations.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no connection with that handle")]
    NoSuchConnection,
}

/// The outcome of [`ConnectionContext::accept_one`] (§4.2.2, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// A genuinely new peer connected.
    Accepted(Handle),
    /// The peer's UUID matched an existing connection under a different
    /// VMAC; the old connection was preempted and replaced.
    ReplacedExisting {
        new_handle: Handle,
        evicted_handle: Handle,
    },
    /// A different, already-known peer holds this VMAC; the new connection
    /// was rejected with `NODE_DUPLICATE_VMAC`.
    RejectedDuplicateVmac,
    /// The peer offered our own local VMAC; rejected before any table
    /// lookup could even run.
    RejectedLocalIdentity,
}

struct ConnectionTable {
    slots: Vec<Option<Connection>>,
    free: Vec<usize>,
    by_vmac: HashMap<Vmac, usize>,
    by_uuid: HashMap<Uuid, usize>,
}

impl ConnectionTable {
    fn new() -> Self {
        ConnectionTable {
            slots: Vec::new(),
            free: Vec::new(),
            by_vmac: HashMap::new(),
            by_uuid: HashMap::new(),
        }
    }

    fn insert(&mut self, conn: Connection) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(conn);
            idx
        } else {
            self.slots.push(Some(conn));
            self.slots.len() - 1
        }
    }

    fn register_identity(&mut self, idx: usize, vmac: Vmac, uuid: Uuid) {
        self.by_vmac.insert(vmac, idx);
        self.by_uuid.insert(uuid, idx);
    }

    fn take(&mut self, idx: usize) -> Option<Connection> {
        self.slots.get_mut(idx)?.take()
    }

    fn put_back(&mut self, idx: usize, conn: Connection) {
        if idx < self.slots.len() {
            self.slots[idx] = Some(conn);
        }
    }

    /// Evict a connection entirely: clear its table slot and any identity
    /// index entries that still point at it.
    fn evict(&mut self, idx: usize, conn: &Connection) {
        if let Some(vmac) = conn.peer_vmac() {
            if self.by_vmac.get(&vmac) == Some(&idx) {
                self.by_vmac.remove(&vmac);
            }
        }
        if let Some(uuid) = conn.peer_uuid() {
            if self.by_uuid.get(&uuid) == Some(&idx) {
                self.by_uuid.remove(&uuid);
            }
        }
        self.free.push(idx);
    }

    fn find_by_vmac(&self, vmac: Vmac) -> Option<usize> {
        self.by_vmac.get(&vmac).copied()
    }

    fn find_by_uuid(&self, uuid: Uuid) -> Option<usize> {
        self.by_uuid.get(&uuid).copied()
    }

    fn live_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// The connection table a BACnet/SC node maintains (`BSC_CONNECTION_CTX`).
pub struct ConnectionContext {
    config: Arc<ContextConfig>,
    table: Mutex<ConnectionTable>,
}

impl ConnectionContext {
    pub fn new(config: Arc<ContextConfig>) -> Self {
        ConnectionContext {
            config,
            table: Mutex::new(ConnectionTable::new()),
        }
    }

    pub fn config(&self) -> &Arc<ContextConfig> {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn find_by_vmac(&self, vmac: Vmac) -> Option<Handle> {
        self.table.lock().unwrap().find_by_vmac(vmac)
    }

    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<Handle> {
        self.table.lock().unwrap().find_by_uuid(uuid)
    }

    pub fn state_of(&self, handle: Handle) -> Option<ConnectionState> {
        self.table
            .lock()
            .unwrap()
            .slots
            .get(handle)
            .and_then(|s| s.as_ref())
            .map(|c| c.state())
    }

    fn take(&self, handle: Handle) -> Result<Connection, ContextError> {
        self.table
            .lock()
            .unwrap()
            .take(handle)
            .ok_or(ContextError::NoSuchConnection)
    }

    fn put_back(&self, handle: Handle, conn: Connection) {
        self.table.lock().unwrap().put_back(handle, conn);
    }

    /// Remove a connection from the table entirely, freeing its handle.
    pub fn forget(&self, handle: Handle) {
        let mut table = self.table.lock().unwrap();
        if let Some(conn) = table.take(handle) {
            table.evict(handle, &conn);
        }
    }

    // -----------------------------------------------------------------
    // Initiator
    // -----------------------------------------------------------------

    /// Open a new outbound connection and register it once the handshake
    /// completes (§4.2.1).
    pub async fn connect(
        &self,
        client: &dyn WebSocketClient,
        url: &str,
    ) -> Result<Handle, ContextError> {
        let mut conn = Connection::new(Role::Initiator, self.config.clone());
        conn.connect(client, url).await?;
        let peer_vmac = conn
            .peer_vmac()
            .expect("a connected initiator has recorded its peer's vmac");
        let peer_uuid = conn
            .peer_uuid()
            .expect("a connected initiator has recorded its peer's uuid");
        let mut table = self.table.lock().unwrap();
        let handle = table.insert(conn);
        table.register_identity(handle, peer_vmac, peer_uuid);
        info!("connected to {url} as initiator, handle {handle}");
        Ok(handle)
    }

    // -----------------------------------------------------------------
    // Acceptor
    // -----------------------------------------------------------------

    /// Accept one inbound connection and arbitrate it against the existing
    /// table (§4.2.2, §4.3): a peer reconnecting with a new VMAC after a
    /// reboot replaces its old entry; a peer claiming a VMAC already held by
    /// a *different* UUID, or claiming this node's own VMAC, is rejected.
    pub async fn accept_one(
        &self,
        server: &dyn WebSocketServer,
        subprotocol: Subprotocol,
        timeout: Duration,
    ) -> Result<AcceptOutcome, ContextError> {
        let socket = server.accept(subprotocol, timeout).await.map_err(ConnectionError::from)?;
        let mut conn = Connection::new(Role::Acceptor, self.config.clone());
        let (request_id, peer_vmac, peer_uuid, peer_max_bvlc, peer_max_npdu) =
            conn.await_connect_request(socket).await?;

        if peer_vmac == self.config.local_vmac && peer_uuid != self.config.local_uuid {
            warn!("peer {peer_uuid:?} offered our own local vmac, rejecting");
            conn.reject_duplicate_vmac(request_id).await?;
            return Ok(AcceptOutcome::RejectedLocalIdentity);
        }

        let existing_by_uuid = self.table.lock().unwrap().find_by_uuid(peer_uuid);
        let evicted_handle = if let Some(old_handle) = existing_by_uuid {
            let mut old_conn = {
                let mut table = self.table.lock().unwrap();
                table.take(old_handle)
            };
            if let Some(old) = old_conn.as_mut() {
                debug!("peer {peer_uuid:?} reconnected under a new vmac, preempting handle {old_handle}");
                old.preempt_for_reboot().await;
            }
            let mut table = self.table.lock().unwrap();
            if let Some(old) = old_conn {
                table.evict(old_handle, &old);
            }
            Some(old_handle)
        } else {
            None
        };

        let conflicting_vmac = {
            let table = self.table.lock().unwrap();
            table
                .find_by_vmac(peer_vmac)
                .filter(|idx| Some(*idx) != evicted_handle)
        };
        if conflicting_vmac.is_some() {
            warn!("vmac {peer_vmac:?} already claimed by a different peer, rejecting");
            conn.reject_duplicate_vmac(request_id).await?;
            return Ok(AcceptOutcome::RejectedDuplicateVmac);
        }

        conn.complete_accept(peer_vmac, peer_uuid, peer_max_bvlc, peer_max_npdu)
            .await?;
        let mut table = self.table.lock().unwrap();
        let new_handle = table.insert(conn);
        table.register_identity(new_handle, peer_vmac, peer_uuid);
        info!("accepted connection from {peer_uuid:?}, handle {new_handle}");

        Ok(match evicted_handle {
            Some(evicted) => AcceptOutcome::ReplacedExisting {
                new_handle,
                evicted_handle: evicted,
            },
            None => AcceptOutcome::Accepted(new_handle),
        })
    }

    // -----------------------------------------------------------------
    // Send / receive / disconnect (§4.2.3)
    // -----------------------------------------------------------------

    pub async fn send(&self, handle: Handle, npdu: &[u8]) -> Result<SendOutcome, ContextError> {
        let mut conn = self.take(handle)?;
        let result = conn.send(npdu).await;
        self.put_back(handle, conn);
        Ok(result?)
    }

    pub async fn recv(
        &self,
        handle: Handle,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ContextError> {
        let mut conn = self.take(handle)?;
        let result = conn.recv(timeout).await;
        self.put_back(handle, conn);
        Ok(result?)
    }

    pub async fn disconnect(&self, handle: Handle) -> Result<(), ContextError> {
        let mut conn = self.take(handle)?;
        let result = conn.disconnect().await;
        self.put_back(handle, conn);
        result.map_err(ContextError::from)
    }

    // -----------------------------------------------------------------
    // Maintenance (§4.2.4)
    // -----------------------------------------------------------------

    /// Advance every live connection's liveness timer by `elapsed`, sending
    /// heartbeats and pruning zombies as needed.
    pub async fn tick(&self, elapsed: Duration) {
        let indices = self.table.lock().unwrap().live_indices();
        for idx in indices {
            let mut conn = match self.table.lock().unwrap().take(idx) {
                Some(c) => c,
                None => continue,
            };
            match conn.tick(elapsed).await {
                Ok(TickOutcome::TimedOut) => {
                    warn!("connection handle {idx} timed out, removing");
                    self.table.lock().unwrap().evict(idx, &conn);
                }
                Ok(_) => self.table.lock().unwrap().put_back(idx, conn),
                Err(e) => {
                    warn!("maintenance tick failed for handle {idx}: {e}");
                    self.table.lock().unwrap().evict(idx, &conn);
                }
            }
        }
    }

    /// Gracefully disconnect every connection and empty the table. The
    /// original leaves teardown to stubbed, unimplemented callbacks; this
    /// drives every connection through a real Disconnect-Request/Ack first.
    pub async fn shutdown(&self) {
        let indices = self.table.lock().unwrap().live_indices();
        for idx in indices {
            if let Some(mut conn) = self.table.lock().unwrap().take(idx) {
                let _ = conn.disconnect().await;
            }
        }
        *self.table.lock().unwrap() = ConnectionTable::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{CertBundle, ContextConfigBuilder};
    use crate::transport::mock::MockNetwork;

    fn config(role: Role, port: Option<u16>, vmac: Vmac, uuid: Uuid) -> Arc<ContextConfig> {
        let mut builder = ContextConfigBuilder::new(role, vmac, uuid)
            .connect_timeout(Duration::from_millis(200))
            .heartbeat_timeout(Duration::from_secs(1))
            .disconnect_timeout(Duration::from_millis(200));
        if let Some(port) = port {
            builder = builder.port(port);
        }
        Arc::new(builder.build().unwrap())
    }

    #[tokio::test]
    async fn initiator_and_acceptor_register_each_other() {
        let network = MockNetwork::new();
        let server = network.server();
        let client = network.client();
        let certs = CertBundle {
            ca_chain: Vec::new(),
            cert_chain: Vec::new(),
            private_key: Vec::new(),
        };
        server
            .start(Subprotocol::Hub, 9100, &certs)
            .await
            .unwrap();

        let acceptor_ctx = ConnectionContext::new(config(
            Role::Acceptor,
            Some(9100),
            Vmac::new([2; 6]),
            Uuid::new([2; 16]),
        ));
        let initiator_ctx = ConnectionContext::new(config(
            Role::Initiator,
            None,
            Vmac::new([1; 6]),
            Uuid::new([1; 16]),
        ));

        let connect_fut = initiator_ctx.connect(&client, "mock://localhost:9100/ws");
        let accept_outcome = acceptor_ctx
            .accept_one(&server, Subprotocol::Hub, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(matches!(accept_outcome, AcceptOutcome::Accepted(_)));

        let initiator_handle = connect_fut.await.unwrap();
        assert_eq!(initiator_ctx.connection_count(), 1);
        assert_eq!(acceptor_ctx.connection_count(), 1);
        assert_eq!(
            initiator_ctx.find_by_vmac(Vmac::new([2; 6])),
            Some(initiator_handle)
        );
    }

    #[tokio::test]
    async fn duplicate_vmac_from_a_different_uuid_is_rejected() {
        let network = MockNetwork::new();
        let server = network.server();
        let client = network.client();
        let certs = CertBundle {
            ca_chain: Vec::new(),
            cert_chain: Vec::new(),
            private_key: Vec::new(),
        };
        server.start(Subprotocol::Hub, 9101, &certs).await.unwrap();

        let acceptor_ctx = ConnectionContext::new(config(
            Role::Acceptor,
            Some(9101),
            Vmac::new([9; 6]),
            Uuid::new([9; 16]),
        ));

        // First peer claims vmac [3;6] under uuid [3;16].
        let first_config = config(Role::Initiator, None, Vmac::new([3; 6]), Uuid::new([3; 16]));
        let first_ctx = ConnectionContext::new(first_config);
        let first_connect = first_ctx.connect(&client, "mock://localhost:9101/ws");
        let first_accept = acceptor_ctx
            .accept_one(&server, Subprotocol::Hub, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(matches!(first_accept, AcceptOutcome::Accepted(_)));
        first_connect.await.unwrap();

        // Second peer claims the SAME vmac [3;6] but a different uuid [4;16]: rejected.
        let second_config = config(Role::Initiator, None, Vmac::new([3; 6]), Uuid::new([4; 16]));
        let second_ctx = ConnectionContext::new(second_config);
        let second_connect = second_ctx.connect(&client, "mock://localhost:9101/ws");
        let second_accept = acceptor_ctx
            .accept_one(&server, Subprotocol::Hub, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(second_accept, AcceptOutcome::RejectedDuplicateVmac);
        assert!(second_connect.await.is_err());
        assert_eq!(acceptor_ctx.connection_count(), 1);
    }

    #[tokio::test]
    async fn reconnect_under_new_vmac_replaces_old_entry() {
        let network = MockNetwork::new();
        let server = network.server();
        let client = network.client();
        let certs = CertBundle {
            ca_chain: Vec::new(),
            cert_chain: Vec::new(),
            private_key: Vec::new(),
        };
        server.start(Subprotocol::Hub, 9102, &certs).await.unwrap();
        let acceptor_ctx = ConnectionContext::new(config(
            Role::Acceptor,
            Some(9102),
            Vmac::new([9; 6]),
            Uuid::new([9; 16]),
        ));

        let uuid = Uuid::new([5; 16]);
        let first_config = config(Role::Initiator, None, Vmac::new([6; 6]), uuid);
        let first_ctx = ConnectionContext::new(first_config);
        let first_connect = first_ctx.connect(&client, "mock://localhost:9102/ws");
        let first_accept = acceptor_ctx
            .accept_one(&server, Subprotocol::Hub, Duration::from_millis(500))
            .await
            .unwrap();
        let first_handle = match first_accept {
            AcceptOutcome::Accepted(h) => h,
            other => panic!("unexpected outcome: {other:?}"),
        };
        first_connect.await.unwrap();

        // Same uuid reconnects under a freshly rolled vmac, as if it rebooted.
        let second_config = config(Role::Initiator, None, Vmac::new([7; 6]), uuid);
        let second_ctx = ConnectionContext::new(second_config);
        let second_connect = second_ctx.connect(&client, "mock://localhost:9102/ws");
        let second_accept = acceptor_ctx
            .accept_one(&server, Subprotocol::Hub, Duration::from_millis(500))
            .await
            .unwrap();
        match second_accept {
            AcceptOutcome::ReplacedExisting { evicted_handle, .. } => {
                assert_eq!(evicted_handle, first_handle)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        second_connect.await.unwrap();
        assert_eq!(acceptor_ctx.connection_count(), 1);
        assert_eq!(acceptor_ctx.find_by_vmac(Vmac::new([7; 6])), Some(first_handle));
    }

    #[tokio::test]
    async fn local_identity_collision_is_rejected_before_any_lookup() {
        let network = MockNetwork::new();
        let server = network.server();
        let client = network.client();
        let certs = CertBundle {
            ca_chain: Vec::new(),
            cert_chain: Vec::new(),
            private_key: Vec::new(),
        };
        server.start(Subprotocol::Hub, 9103, &certs).await.unwrap();
        let local_vmac = Vmac::new([8; 6]);
        let acceptor_ctx = ConnectionContext::new(config(
            Role::Acceptor,
            Some(9103),
            local_vmac,
            Uuid::new([8; 16]),
        ));

        let impostor_config = config(Role::Initiator, None, local_vmac, Uuid::new([9; 16]));
        let impostor_ctx = ConnectionContext::new(impostor_config);
        let connect_fut = impostor_ctx.connect(&client, "mock://localhost:9103/ws");
        let accept_outcome = acceptor_ctx
            .accept_one(&server, Subprotocol::Hub, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(accept_outcome, AcceptOutcome::RejectedLocalIdentity);
        assert!(connect_fut.await.is_err());
        assert_eq!(acceptor_ctx.connection_count(), 0);
    }
}
