//! `tokio-tungstenite` + `tokio-rustls` backed [`WebSocketClient`] and
//! [`WebSocketServer`]. This is the "real" transport a host application
//! links against; [`super::mock`] exists purely for tests.

use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls_pemfile::Item;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::rustls;
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::handshake::server::{self, Callback};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use super::{CertBundle, Result, Subprotocol, TransportError, WebSocketClient, WebSocketServer, WsConnection};

fn load_certs(pem: &[u8]) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("invalid certificate PEM: {e}")))
}

fn load_private_key(pem: &[u8]) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem);
    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| TransportError::Tls(format!("invalid private key PEM: {e}")))?
        {
            Some(Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(Item::Sec1Key(key)) => return Ok(key.into()),
            Some(_) => continue,
            None => {
                return Err(TransportError::Tls(
                    "no private key found in PEM".to_string(),
                ))
            }
        }
    }
}

fn client_tls_config(certs: &CertBundle) -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs(&certs.ca_chain)? {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("bad CA certificate: {e}")))?;
    }
    let cert_chain = load_certs(&certs.cert_chain)?;
    let key = load_private_key(&certs.private_key)?;
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, key)
        .map_err(|e| TransportError::Tls(format!("bad client certificate/key: {e}")))?;
    Ok(Arc::new(config))
}

fn server_tls_config(certs: &CertBundle) -> Result<Arc<rustls::ServerConfig>> {
    let mut client_roots = rustls::RootCertStore::empty();
    for cert in load_certs(&certs.ca_chain)? {
        client_roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("bad CA certificate: {e}")))?;
    }
    let cert_chain = load_certs(&certs.cert_chain)?;
    let key = load_private_key(&certs.private_key)?;
    let client_verifier =
        rustls::server::WebPkiClientVerifier::builder(Arc::new(client_roots))
            .build()
            .map_err(|e| TransportError::Tls(format!("bad client verifier: {e}")))?;
    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| TransportError::Tls(format!("bad server certificate/key: {e}")))?;
    Ok(Arc::new(config))
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TungsteniteConnection {
    stream: AsyncMutex<WsStream>,
}

#[async_trait]
impl WsConnection for TungsteniteConnection {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream
            .send(Message::Binary(bytes.to_vec().into()))
            .await
            .map_err(|e| classify_ws_error(e))
    }

    async fn recv(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(Ok(Message::Binary(bytes)))) => Ok(bytes.to_vec()),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => Err(TransportError::Closed),
            Ok(Some(Ok(_other))) => Err(TransportError::Protocol(
                "expected a binary WebSocket message".to_string(),
            )),
            Ok(Some(Err(e))) => Err(classify_ws_error(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn disconnect(&self) {
        let mut stream = self.stream.lock().await;
        let _ = stream.close(None).await;
    }
}

/// Pull `host` and `port` out of a `wss://host:port/path` URL without
/// pulling in a full URL-parsing crate for one field extraction.
fn parse_host_port(url: &str) -> Result<(String, u16)> {
    let without_scheme = url
        .splitn(2, "://")
        .nth(1)
        .ok_or_else(|| TransportError::Protocol(format!("url {url:?} has no scheme")))?;
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    let (host, port_str) = authority
        .rsplit_once(':')
        .ok_or_else(|| TransportError::Protocol(format!("url {url:?} has no port")))?;
    let port = port_str
        .parse()
        .map_err(|_| TransportError::Protocol(format!("invalid port in url {url:?}")))?;
    Ok((host.to_string(), port))
}

fn classify_ws_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        WsError::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}

/// Client half of the facade. Opens a fresh TCP connection, TLS handshake,
/// then WebSocket upgrade per `connect` call.
#[derive(Default)]
pub struct TungsteniteClient;

#[async_trait]
impl WebSocketClient for TungsteniteClient {
    async fn connect(
        &self,
        subprotocol: Subprotocol,
        url: &str,
        certs: &CertBundle,
    ) -> Result<Box<dyn WsConnection>> {
        let (host, port) = parse_host_port(url)?;

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let tls_config = client_tls_config(certs)?;
        let connector = Connector::Rustls(tls_config);

        let request = Request::builder()
            .uri(url)
            .header("Sec-WebSocket-Protocol", subprotocol.as_str())
            .header("Host", host)
            .body(())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let (stream, _response): (WsStream, Response) =
            client_async_tls_with_config(request, tcp, None, Some(connector))
                .await
                .map_err(classify_ws_error)?;

        Ok(Box::new(TungsteniteConnection {
            stream: AsyncMutex::new(stream),
        }))
    }
}

struct SubprotocolCheck {
    expected: &'static str,
}

impl Callback for SubprotocolCheck {
    fn on_request(
        self,
        request: &server::Request,
        response: server::Response,
    ) -> std::result::Result<server::Response, server::ErrorResponse> {
        let offers = request
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if offers.split(',').any(|p| p.trim() == self.expected) {
            Ok(response)
        } else {
            Err(server::ErrorResponse::new(Some(
                "unsupported subprotocol".to_string(),
            )))
        }
    }
}

/// Server half of the facade. One instance binds both subprotocols on
/// possibly different ports and dispatches `accept` by `subprotocol` (§6).
pub struct TungsteniteServer {
    hub: AsyncMutex<Option<(TcpListener, Arc<rustls::ServerConfig>)>>,
    direct: AsyncMutex<Option<(TcpListener, Arc<rustls::ServerConfig>)>>,
}

impl Default for TungsteniteServer {
    fn default() -> Self {
        TungsteniteServer {
            hub: AsyncMutex::new(None),
            direct: AsyncMutex::new(None),
        }
    }
}

impl TungsteniteServer {
    fn slot(&self, subprotocol: Subprotocol) -> &AsyncMutex<Option<(TcpListener, Arc<rustls::ServerConfig>)>> {
        match subprotocol {
            Subprotocol::Hub => &self.hub,
            Subprotocol::Direct => &self.direct,
        }
    }

    async fn accept_one(
        listener: &TcpListener,
        tls_config: &Arc<rustls::ServerConfig>,
        subprotocol: Subprotocol,
    ) -> Result<Box<dyn WsConnection>> {
        let (tcp, _peer): (TcpStream, SocketAddr) = listener
            .accept()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let tls_acceptor = tokio_rustls::TlsAcceptor::from(tls_config.clone());
        let tls_stream = tls_acceptor
            .accept(tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let callback = SubprotocolCheck {
            expected: subprotocol.as_str(),
        };
        let stream = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Rustls(tls_stream),
            callback,
        )
        .await
        .map_err(classify_ws_error)?;
        Ok(Box::new(TungsteniteConnection {
            stream: AsyncMutex::new(stream),
        }))
    }
}

#[async_trait]
impl WebSocketServer for TungsteniteServer {
    async fn start(&self, subprotocol: Subprotocol, port: u16, certs: &CertBundle) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let tls_config = server_tls_config(certs)?;
        *self.slot(subprotocol).lock().await = Some((listener, tls_config));
        Ok(())
    }

    async fn accept(
        &self,
        subprotocol: Subprotocol,
        timeout: Duration,
    ) -> Result<Box<dyn WsConnection>> {
        let guard = self.slot(subprotocol).lock().await;
        let (listener, tls_config) = guard
            .as_ref()
            .ok_or_else(|| TransportError::Protocol(format!("{subprotocol:?} not started")))?;
        match tokio::time::timeout(timeout, Self::accept_one(listener, tls_config, subprotocol))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn stop(&self) {
        *self.hub.lock().await = None;
        *self.direct.lock().await = None;
    }
}
