use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

fn subject(s: &str) -> Subject {
    s.parse().unwrap()
}

fn msg(sid: Sid, bytes: usize) -> Msg {
    Msg::new(subject("test"), sid, None, vec![0; bytes])
}

fn error_counter(client: &mut ClientInner) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let cloned = Arc::clone(&counter);
    client.error_callback = Some(Box::new(move |_| {
        cloned.fetch_add(1, Ordering::SeqCst);
    }));
    counter
}

#[tokio::test]
async fn unit_slow_consumer_pending_limits() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let errors = error_counter(&mut client);
    let (subscription, _subscriber) = Subscription::new(1, subject("test"), None, 16, 1, 1024);
    client.subscriptions.insert(1, subscription);

    client.process_msg(msg(1, 4));
    let subscription = client.subscriptions.get(&1).unwrap();
    assert!(!subscription.is_slow_consumer());
    assert_eq!(subscription.delivered(), 1);

    // The subscriber has one unconsumed message, the next two exceed the pending limit
    client.process_msg(msg(1, 4));
    client.process_msg(msg(1, 4));
    let subscription = client.subscriptions.get(&1).unwrap();
    assert!(subscription.is_slow_consumer());
    assert_eq!(subscription.dropped(), 2);
    assert_eq!(subscription.delivered(), 1);
    // The callback fires only on the transition into the slow state
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // Every message is counted by the inbound statistics, dropped or not
    assert_eq!(client.stats.in_msgs, 3);
    assert_eq!(client.stats.in_bytes, 12);
}

#[tokio::test]
async fn unit_slow_consumer_recovers() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let errors = error_counter(&mut client);
    let (subscription, mut subscriber) = Subscription::new(1, subject("test"), None, 16, 1, 1024);
    client.subscriptions.insert(1, subscription);

    client.process_msg(msg(1, 4));
    client.process_msg(msg(1, 4));
    assert!(client.subscriptions.get(&1).unwrap().is_slow_consumer());
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // Consuming frees capacity and a successful delivery clears the flag
    subscriber.next().await.unwrap();
    client.process_msg(msg(1, 4));
    assert!(!client.subscriptions.get(&1).unwrap().is_slow_consumer());

    // Going slow again notifies again
    client.process_msg(msg(1, 4));
    client.process_msg(msg(1, 4));
    assert!(client.subscriptions.get(&1).unwrap().is_slow_consumer());
    assert_eq!(errors.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unit_slow_consumer_full_channel() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let errors = error_counter(&mut client);
    // Generous pending limits but a tiny channel
    let (subscription, _subscriber) = Subscription::new(1, subject("test"), None, 1, 1024, 1024);
    client.subscriptions.insert(1, subscription);

    client.process_msg(msg(1, 4));
    client.process_msg(msg(1, 4));
    let subscription = client.subscriptions.get(&1).unwrap();
    assert!(subscription.is_slow_consumer());
    assert_eq!(subscription.dropped(), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unit_unknown_sid_is_ignored() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    client.process_msg(msg(99, 4));
    assert_eq!(client.stats.in_msgs, 1);
}

#[tokio::test]
async fn unit_auto_unsubscribe_at_max_msgs() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let (mut subscription, _subscriber) = Subscription::new(1, subject("test"), None, 16, 64, 1024);
    subscription.set_max_msgs(Some(2));
    client.subscriptions.insert(1, subscription);

    client.process_msg(msg(1, 4));
    assert!(client.subscriptions.contains_key(&1));
    client.process_msg(msg(1, 4));
    assert!(!client.subscriptions.contains_key(&1));
}

#[tokio::test]
async fn unit_pong_releases_flush_waiters_in_order() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let (tx1, mut rx1) = oneshot::channel();
    let (tx2, mut rx2) = oneshot::channel();
    client.pongs.push_back(tx1);
    client.pongs.push_back(tx2);

    client.process_pong();
    assert_eq!(rx1.try_recv().unwrap(), true);
    assert!(rx2.try_recv().is_err());
    client.process_pong();
    assert_eq!(rx2.try_recv().unwrap(), true);
    // A PONG with no waiters is fine
    client.process_pong();
}

#[tokio::test]
async fn unit_pong_resets_outstanding_pings() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    client.outstanding_pings = 2;
    client.process_pong();
    assert_eq!(client.outstanding_pings, 0);
}

#[tokio::test]
async fn unit_close_releases_flush_waiters() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let (tx, rx) = oneshot::channel();
    client.pongs.push_back(tx);
    client.close_internal().await;
    assert!(matches!(client.state, ConnectionState::Closed));
    assert_eq!(rx.await.unwrap(), false);
}

#[tokio::test]
async fn unit_closed_callback_fires_once() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let cloned = Arc::clone(&counter);
    client.closed_callback = Some(Box::new(move || {
        cloned.fetch_add(1, Ordering::SeqCst);
    }));
    client.did_connect = true;
    client.close_internal().await;
    client.close_internal().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unit_closed_callback_requires_connection() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let counter = Arc::new(AtomicUsize::new(0));
    let cloned = Arc::clone(&counter);
    client.closed_callback = Some(Box::new(move || {
        cloned.fetch_add(1, Ordering::SeqCst);
    }));
    // The client never connected so closing does not notify
    client.close_internal().await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unit_write_frame_buffers_while_reconnecting() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    client.state_transition(StateTransition::ToReconnecting);
    client.write_frame(b"abc").await.unwrap();
    client.write_frame(b"def").await.unwrap();
    assert_eq!(client.pending.as_deref(), Some(&b"abcdef"[..]));
}

#[tokio::test]
async fn unit_write_frame_respects_reconnect_buffer_limit() {
    let mut options = Options::new();
    options.reconnect_buffer_size(4);
    let client = Client::with_options(Vec::new(), options);
    let mut client = client.lock().await;
    client.state_transition(StateTransition::ToReconnecting);
    client.write_frame(b"abc").await.unwrap();
    let result = client.write_frame(b"de").await;
    assert!(matches!(
        result,
        Err(Error::ReconnectBufferExceeded { size: 5, limit: 4 })
    ));
    // The buffer is left untouched by the failed write
    assert_eq!(client.pending.as_deref(), Some(&b"abc"[..]));
}

#[tokio::test]
async fn unit_write_frame_when_not_connected() {
    let client = Client::new(Vec::new());
    {
        let mut client = client.lock().await;
        assert!(matches!(
            client.write_frame(b"x").await,
            Err(Error::NotConnected)
        ));
    }
    client.close().await;
    let mut inner = client.lock().await;
    assert!(matches!(
        inner.write_frame(b"x").await,
        Err(Error::ClientClosed)
    ));
}

#[tokio::test]
async fn unit_operations_on_closed_client() {
    let client = Client::new(Vec::new());
    client.close().await;
    let s = subject("test");
    assert!(matches!(
        client.publish(&s, b"payload").await,
        Err(Error::ClientClosed)
    ));
    assert!(matches!(
        client.subscribe(&s, 16).await,
        Err(Error::ClientClosed)
    ));
    assert!(matches!(
        client.unsubscribe(1).await,
        Err(Error::ClientClosed)
    ));
    assert!(matches!(client.flush().await, Err(Error::ClientClosed)));
    assert!(matches!(client.connect().await, Err(Error::ClientClosed)));
    assert!(client.state().is_closed());
}

#[tokio::test]
async fn unit_flush_zero_timeout() {
    let client = Client::new(Vec::new());
    assert!(matches!(
        client.flush_timeout(Duration::from_secs(0)).await,
        Err(Error::InvalidTimeout)
    ));
}

#[tokio::test]
async fn unit_publish_max_payload() {
    let client = Client::new(Vec::new());
    {
        let mut inner = client.lock().await;
        inner.info.max_payload = 4;
    }
    let s = subject("test");
    let result = client.publish(&s, b"12345").await;
    assert!(matches!(
        result,
        Err(Error::MaxPayload {
            size: 5,
            max_payload: 4
        })
    ));
}

#[tokio::test]
async fn unit_info_updates_merge_into_pool() {
    let client = Client::new(vec!["127.0.0.1".parse().unwrap()]);
    let mut client = client.lock().await;
    let mut info = Info::new();
    info.connect_urls = vec!["10.0.0.1:4222".parse().unwrap(), "127.0.0.1".parse().unwrap()];
    client.process_info(info);
    assert_eq!(client.pool.len(), 2);
}

#[tokio::test]
async fn unit_resume_after_reconnect_requeues_subscriptions() {
    let client = Client::new(Vec::new());
    let mut client = client.lock().await;
    let (mut subscription, _subscriber) = Subscription::new(7, subject("test"), None, 16, 64, 1024);
    subscription.set_max_msgs(Some(5));
    for _ in 0..2 {
        subscription.record_delivered();
    }
    client.subscriptions.insert(7, subscription);
    client.state_transition(StateTransition::ToReconnecting);

    // While reconnecting the replay itself lands in the pending buffer, which makes the
    // rendered frames observable
    let mut buffered = BytesMut::new();
    buffered.extend_from_slice(b"PUB test 2\r\nhi\r\n");
    client.pending = Some(buffered);
    client.resume_after_reconnect().await.unwrap();
    let replayed = client.pending.take().unwrap();
    let replayed = String::from_utf8(replayed.to_vec()).unwrap();
    assert!(replayed.starts_with("PUB test 2\r\nhi\r\n"));
    assert!(replayed.contains("SUB test 7\r\n"));
    // The auto unsubscribe limit is adjusted for the messages already delivered
    assert!(replayed.contains("UNSUB 7 3\r\n"));
}
