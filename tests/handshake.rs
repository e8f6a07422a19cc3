use std::sync::Arc;
use std::time::Duration;

use bacnet_sc::connection::{CertBundle, ContextConfigBuilder, Role};
use bacnet_sc::context::{AcceptOutcome, ConnectionContext};
use bacnet_sc::identity::{Uuid, Vmac};
use bacnet_sc::transport::mock::MockNetwork;
use bacnet_sc::transport::Subprotocol;

fn certs() -> CertBundle {
    CertBundle {
        ca_chain: Vec::new(),
        cert_chain: Vec::new(),
        private_key: Vec::new(),
    }
}

#[tokio::test]
async fn full_session_connects_exchanges_npdus_and_disconnects_cleanly() {
    let network = MockNetwork::new();
    let server = network.server();
    let client = network.client();
    server.start(Subprotocol::Hub, 9500, &certs()).await.unwrap();

    let acceptor_config = Arc::new(
        ContextConfigBuilder::new(Role::Acceptor, Vmac::new([2; 6]), Uuid::new([2; 16]))
            .port(9500)
            .connect_timeout(Duration::from_millis(300))
            .disconnect_timeout(Duration::from_millis(300))
            .build()
            .unwrap(),
    );
    let initiator_config = Arc::new(
        ContextConfigBuilder::new(Role::Initiator, Vmac::new([1; 6]), Uuid::new([1; 16]))
            .connect_timeout(Duration::from_millis(300))
            .disconnect_timeout(Duration::from_millis(300))
            .build()
            .unwrap(),
    );

    let acceptor_ctx = ConnectionContext::new(acceptor_config);
    let initiator_ctx = ConnectionContext::new(initiator_config);

    let connect_fut = initiator_ctx.connect(&client, "mock://localhost:9500/ws");
    let accept_outcome = acceptor_ctx
        .accept_one(&server, Subprotocol::Hub, Duration::from_millis(500))
        .await
        .unwrap();
    let acceptor_handle = match accept_outcome {
        AcceptOutcome::Accepted(h) => h,
        other => panic!("unexpected accept outcome: {other:?}"),
    };
    let initiator_handle = connect_fut.await.unwrap();

    initiator_ctx
        .send(initiator_handle, b"whois device 1 1")
        .await
        .unwrap();
    let received = acceptor_ctx
        .recv(acceptor_handle, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(received.as_deref(), Some(&b"whois device 1 1"[..]));

    acceptor_ctx
        .send(acceptor_handle, b"i-am device 1 1")
        .await
        .unwrap();
    let reply = initiator_ctx
        .recv(initiator_handle, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some(&b"i-am device 1 1"[..]));

    // The acceptor must be polling `recv` to consume the Disconnect-Request
    // and reply Disconnect-Ack while the initiator's `disconnect()` waits for
    // it; otherwise the exchange only completes via the disconnect-timeout
    // fallback rather than the Disconnect-Request/Ack handshake itself.
    let acceptor_poll = tokio::spawn(async move {
        let _ = acceptor_ctx
            .recv(acceptor_handle, Duration::from_millis(500))
            .await;
    });
    initiator_ctx.disconnect(initiator_handle).await.unwrap();
    acceptor_poll.await.unwrap();
    assert_eq!(
        initiator_ctx.state_of(initiator_handle),
        Some(bacnet_sc::connection::ConnectionState::Idle)
    );
}
