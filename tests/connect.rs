mod common;

use plover::{Address, Client, ClientState, Error};

#[tokio::test(flavor = "multi_thread")]
async fn connect_and_close() {
    common::init();
    let mut server = common::MockServer::new().await;
    let client = Client::new(vec![server.address()]);

    client.connect().await.expect("to connect");
    assert!(client.state().is_connected());

    let connect_line = server.wait_for_line("CONNECT ").await;
    assert!(connect_line.contains("\"verbose\":false"));
    assert!(connect_line.contains("\"lang\":\"rust\""));
    server.wait_for_line("PING").await;

    assert_eq!(client.info().await.max_payload(), 1048576);
    assert_eq!(client.info().await.server_id(), "mock");

    client.close().await;
    assert_eq!(client.state(), ClientState::Closed);
    assert!(matches!(client.connect().await, Err(Error::ClientClosed)));
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_is_idempotent() {
    common::init();
    let mut server = common::MockServer::new().await;
    let client = Client::new(vec![server.address()]);

    client.connect().await.expect("to connect");
    server.wait_for_line("PING").await;
    // A second connect on an already connected client is a no-op
    client.connect().await.expect("to connect");
    assert!(client.state().is_connected());

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_authorization_from_address() {
    common::init();
    let mut server = common::MockServer::new().await;
    let address = format!("nats://secret-token@127.0.0.1:{}", server.address().port())
        .parse::<Address>()
        .expect("to parse the address");
    let client = Client::new(vec![address]);

    client.connect().await.expect("to connect");
    let connect_line = server.wait_for_line("CONNECT ").await;
    assert!(connect_line.contains("\"auth_token\":\"secret-token\""));

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_no_servers() {
    common::init();
    let client = Client::new(Vec::new());
    assert!(matches!(
        client.connect().await,
        Err(Error::NoServers(None))
    ));
    assert_eq!(client.state(), ClientState::Disconnected);
}
