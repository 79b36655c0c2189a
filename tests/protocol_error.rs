mod common;

use plover::{Client, Error, Options, ProtocolError};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time;

#[tokio::test(flavor = "multi_thread")]
async fn stale_connection_closes_without_reconnect() {
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

    server.send_raw("-ERR 'Stale Connection'\r\n");
    common::wait_for_state(&client, |state| state.is_closed()).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(matches!(
        &*client.last_error().await,
        Some(Error::StaleConnection)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn permissions_violation_is_not_fatal() {
    common::init();
    let mut server = common::MockServer::new().await;
    let client = Client::new(vec![server.address()]);

    let errors = Arc::new(AtomicUsize::new(0));
    let error_count = Arc::clone(&errors);
    client
        .set_error_callback(move |_| {
            error_count.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    client.connect().await.expect("to connect");
    server.wait_for_line("PING").await;

    server.send_raw("-ERR 'Permissions Violation for Subscription to test'\r\n");
    time::timeout(Duration::from_secs(5), async {
        while errors.load(Ordering::SeqCst) == 0 {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("to observe the error callback");

    assert!(client.state().is_connected());
    match &*client.last_error().await {
        Some(Error::Protocol(ProtocolError::PermissionsViolationForSubscription(subject))) => {
            assert_eq!(subject.to_string(), "test");
        }
        other => panic!("unexpected last error {:?}", other),
    }

    client.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn authorization_violation_is_fatal() {
    common::init();
    let mut server = common::MockServer::new().await;
    let client = Client::new(vec![server.address()]);

    client.connect().await.expect("to connect");
    server.wait_for_line("PING").await;

    server.send_raw("-ERR 'Authorization Violation'\r\n");
    common::wait_for_state(&client, |state| state.is_closed()).await;
    assert!(matches!(
        &*client.last_error().await,
        Some(Error::Protocol(ProtocolError::AuthorizationViolation))
    ));
}
