mod common;

use plover::{Client, Options, Subject};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

#[tokio::test(flavor = "multi_thread")]
async fn reconnect_replays_and_resubscribes() {
    common::init();
    let mut server = common::MockServer::new().await;
    let mut options = Options::new();
    options
        .reconnect_wait(Duration::from_millis(500))
        .no_randomize(true);
    let client = Client::with_options(vec![server.address()], options);

    let disconnected = Arc::new(AtomicUsize::new(0));
    let disconnected_count = Arc::clone(&disconnected);
    client
        .set_disconnected_callback(move || {
            disconnected_count.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    let reconnected = Arc::new(AtomicUsize::new(0));
    let reconnected_count = Arc::clone(&reconnected);
    client
        .set_reconnected_callback(move || {
            reconnected_count.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    client.connect().await.expect("to connect");
    server.wait_for_line("PING").await;

    let subject = "test".parse::<Subject>().expect("to parse the subject");
    let (sid, _subscriber) = client.subscribe(&subject, 16).await.expect("to subscribe");
    server.wait_for_line("SUB ").await;

    server.bounce();
    common::wait_for_state(&client, |state| state.is_reconnecting()).await;

    // Published while down, buffered and replayed in order after the reconnect
    for payload in &["one", "two", "three"] {
        client.publish(&subject, payload.as_bytes()).await.expect("to publish");
    }

    common::wait_for_state(&client, |state| state.is_connected()).await;
    server.wait_for_line("CONNECT ").await;
    server.wait_for_line("PING").await;

    // The buffer is replayed before subscriptions are re-established
    for payload in &["one", "two", "three"] {
        assert_eq!(
            server.wait_for_line("PUB ").await,
            format!("PUB test {}", payload.len())
        );
        assert_eq!(server.next_line().await, *payload);
    }
    assert_eq!(
        server.wait_for_line("SUB ").await,
        format!("SUB test {}", sid)
    );

    assert_eq!(client.stats().await.reconnects, 1);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(reconnected.load(Ordering::SeqCst), 1);

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_loss_without_reconnect_closes() {
    common::init();
    let mut server = common::MockServer::new().await;
    let mut options = Options::new();
    options.allow_reconnect(false);
    let client = Client::with_options(vec![server.address()], options);

    let closed = Arc::new(AtomicUsize::new(0));
    let closed_count = Arc::clone(&closed);
    client
        .set_closed_callback(move || {
            closed_count.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    client.connect().await.expect("to connect");
    server.wait_for_line("PING").await;

    server.bounce();
    common::wait_for_state(&client, |state| state.is_closed()).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
