//! In-memory [`WebSocketClient`]/[`WebSocketServer`] pair for driving the
//! connection state machine in tests without opening a real socket.
//!
//! A [`MockNetwork`] is a registry of listening `(subprotocol, port)` pairs.
//! [`MockNetwork::client`] and [`MockNetwork::server`] hand out handles onto
//! the same registry so a test can `server.start(...)` then
//! `client.connect("mock://<port>", ...)` and get two ends of an in-memory
//! pipe wired together, exactly as a real TLS WebSocket would hand the engine
//! two live sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::{CertBundle, Result, Subprotocol, TransportError, WebSocketClient, WebSocketServer, WsConnection};

/// One end of an in-memory, full-duplex byte-message pipe.
pub struct MockConnection {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    /// Create a connected pair directly, bypassing `connect`/`accept`. Handy
    /// for unit tests of a single [`crate::connection::Connection`] that
    /// don't need the listener registry.
    pub fn pair() -> (MockConnection, MockConnection) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            MockConnection {
                tx: a_tx,
                rx: AsyncMutex::new(a_rx),
                closed: closed.clone(),
            },
            MockConnection {
                tx: b_tx,
                rx: AsyncMutex::new(b_rx),
                closed,
            },
        )
    }
}

#[async_trait]
impl WsConnection for MockConnection {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(TransportError::Closed)
            }
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Shared registry backing a [`MockClient`]/[`MockServer`] pair.
#[derive(Clone, Default)]
pub struct MockNetwork {
    listeners: Arc<StdMutex<HashMap<(Subprotocol, u16), mpsc::UnboundedSender<MockConnection>>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> MockClient {
        MockClient {
            network: self.clone(),
        }
    }

    pub fn server(&self) -> MockServer {
        MockServer {
            network: self.clone(),
            receivers: AsyncMutex::new(HashMap::new()),
        }
    }
}

fn parse_mock_port(url: &str) -> Result<u16> {
    let without_scheme = url.splitn(2, "://").nth(1).unwrap_or(url);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    let port_str = host_port
        .rsplit(':')
        .next()
        .ok_or_else(|| TransportError::Protocol(format!("no port in mock url {url:?}")))?;
    port_str
        .parse()
        .map_err(|_| TransportError::Protocol(format!("invalid port in mock url {url:?}")))
}

pub struct MockClient {
    network: MockNetwork,
}

#[async_trait]
impl WebSocketClient for MockClient {
    async fn connect(
        &self,
        subprotocol: Subprotocol,
        url: &str,
        _certs: &CertBundle,
    ) -> Result<Box<dyn WsConnection>> {
        let port = parse_mock_port(url)?;
        let sender = {
            let listeners = self.network.listeners.lock().unwrap();
            listeners.get(&(subprotocol, port)).cloned()
        }
        .ok_or(TransportError::Io(format!(
            "nothing listening on mock port {port} for {subprotocol:?}"
        )))?;
        let (client_side, server_side) = MockConnection::pair();
        sender
            .send(server_side)
            .map_err(|_| TransportError::Closed)?;
        Ok(Box::new(client_side))
    }
}

pub struct MockServer {
    network: MockNetwork,
    receivers: AsyncMutex<HashMap<(Subprotocol, u16), mpsc::UnboundedReceiver<MockConnection>>>,
}

#[async_trait]
impl WebSocketServer for MockServer {
    async fn start(&self, subprotocol: Subprotocol, port: u16, _certs: &CertBundle) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.network
            .listeners
            .lock()
            .unwrap()
            .insert((subprotocol, port), tx);
        self.receivers.lock().await.insert((subprotocol, port), rx);
        Ok(())
    }

    async fn accept(
        &self,
        subprotocol: Subprotocol,
        timeout: Duration,
    ) -> Result<Box<dyn WsConnection>> {
        let mut receivers = self.receivers.lock().await;
        let (_, rx) = receivers
            .iter_mut()
            .find(|((proto, _), _)| *proto == subprotocol)
            .ok_or_else(|| TransportError::Protocol(format!("{subprotocol:?} not started")))?;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(conn)) => Ok(Box::new(conn)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn stop(&self) {
        self.receivers.lock().await.clear();
        self.network.listeners.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certs() -> CertBundle {
        CertBundle {
            ca_chain: Vec::new(),
            cert_chain: Vec::new(),
            private_key: Vec::new(),
        }
    }

    #[tokio::test]
    async fn pair_exchanges_bytes_both_ways() {
        let (a, b) = MockConnection::pair();
        a.send(b"hello").await.unwrap();
        assert_eq!(b.recv(Duration::from_millis(100)).await.unwrap(), b"hello");
        b.send(b"world").await.unwrap();
        assert_eq!(a.recv(Duration::from_millis(100)).await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn disconnect_closes_both_ends() {
        let (a, b) = MockConnection::pair();
        a.disconnect().await;
        assert!(matches!(
            b.send(b"x").await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            a.recv(Duration::from_millis(10)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn recv_times_out_when_idle() {
        let (a, _b) = MockConnection::pair();
        let result = a.recv(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn client_connect_reaches_a_started_server() {
        let network = MockNetwork::new();
        let server = network.server();
        let client = network.client();
        server.start(Subprotocol::Hub, 4443, &certs()).await.unwrap();

        let client_conn = client
            .connect(Subprotocol::Hub, "mock://localhost:4443/ws", &certs())
            .await
            .unwrap();
        let server_conn = server
            .accept(Subprotocol::Hub, Duration::from_millis(100))
            .await
            .unwrap();

        client_conn.send(b"ping").await.unwrap();
        assert_eq!(
            server_conn.recv(Duration::from_millis(100)).await.unwrap(),
            b"ping"
        );
    }

    #[tokio::test]
    async fn connect_without_a_listener_fails() {
        let network = MockNetwork::new();
        let client = network.client();
        let result = client
            .connect(Subprotocol::Direct, "mock://localhost:1/ws", &certs())
            .await;
        assert!(result.is_err());
    }
}
