//! An async [NATS](https://nats.io/) client library for the Rust programming language.
//!
//! The client maintains a pool of server addresses and transparently handles failover,
//! reconnect buffering, keep alive pings, and flush synchronization. It is intended to be
//! ergonomic and easy to use while remaining a faithful implementation of the client protocol.
//!
//! # Example
//!  ```no_run
//! use futures::stream::StreamExt;
//! use plover::{Address, Client, Subject};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let address = "127.0.0.1".parse::<Address>()?;
//!     let client = Client::new(vec![address]);
//!     client.connect().await?;
//!
//!     let subject = "test".parse::<Subject>()?;
//!     let (_, mut subscriber) = client.subscribe(&subject, 1024).await?;
//!     client.publish(&subject, b"hello").await?;
//!     client.flush().await?;
//!
//!     let message = subscriber.next().await.unwrap();
//!     println!("Received '{}'", String::from_utf8_lossy(message.payload()));
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

mod codec;
mod server_pool;
mod subscription;
#[cfg(test)]
mod tests;
mod tls_or_tcp_stream;
mod types;
mod util;

use bytes::BytesMut;
use futures::{
    lock::{Mutex, MutexGuard},
    stream::StreamExt,
};
use log::{error, info, trace, warn};
use owning_ref::{OwningRef, OwningRefMut};
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    io,
    mem,
    pin::Pin,
    str,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf},
    net::TcpStream,
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_stream::wrappers::WatchStream;
use tokio_util::codec::FramedRead;
use uuid::Uuid;

use crate::{
    codec::Codec,
    server_pool::ServerPool,
    subscription::Subscription,
    tls_or_tcp_stream::TlsOrTcpStream,
    types::{
        refs::AnchoredGuard, ClientControl, ConnectionState, ServerControl, ServerMessage,
        StateTransition, StateTransitionResult,
    },
};

pub use crate::{
    subscription::Subscriber,
    types::{
        Address, Authorization, ClientRef, ClientRefMut, ClientState, Connect, Error, Info, Msg,
        Options, ProtocolError, Result, Sid, Stats, Subject,
    },
};
#[cfg(feature = "tls")]
pub use crate::tls_or_tcp_stream::{TlsConfig, TlsError};

type Callback = Box<dyn FnMut() + Send>;
type ErrorCallback = Box<dyn FnMut(&Error) + Send>;

// The state of the client protected by the client's internal mutex
pub(crate) struct ClientInner {
    connect: Connect,
    options: Options,
    pool: ServerPool,
    info: Info,
    state: ConnectionState,
    state_tx: watch::Sender<ClientState>,
    // Incremented on every successful connection. Spawned tasks hold the generation they were
    // created for and exit when it no longer matches, so a task belonging to a dead connection
    // can never trigger recovery of a live one.
    generation: u64,
    did_connect: bool,
    last_error: Option<Error>,
    stats: Stats,
    next_sid: Sid,
    subscriptions: HashMap<Sid, Subscription>,
    // Flush waiters in the order their PINGs were written. The server answers PINGs in order,
    // so each PONG releases the front of the queue.
    pongs: VecDeque<oneshot::Sender<bool>>,
    outstanding_pings: u32,
    // Writes buffered while reconnecting, replayed once a connection is re-established
    pending: Option<BytesMut>,
    ping_timer: Option<JoinHandle<()>>,
    disconnected_callback: Option<Callback>,
    reconnected_callback: Option<Callback>,
    closed_callback: Option<Callback>,
    error_callback: Option<ErrorCallback>,
    #[cfg(feature = "tls")]
    tls_config: Option<TlsConfig>,
}

impl ClientInner {
    fn state_transition(&mut self, transition: StateTransition) -> StateTransitionResult {
        let next = match transition {
            StateTransition::ToConnecting(address) => ConnectionState::Connecting(address),
            StateTransition::ToConnected(address, writer) => {
                ConnectionState::Connected(address, writer)
            }
            StateTransition::ToDisconnected => ConnectionState::Disconnected,
            StateTransition::ToReconnecting => ConnectionState::Reconnecting,
            StateTransition::ToClosed => ConnectionState::Closed,
        };
        let previous = mem::replace(&mut self.state, next);
        let result = match previous {
            ConnectionState::Connected(_, writer) => StateTransitionResult::Writer(writer),
            _ => StateTransitionResult::None,
        };
        let client_state = ClientState::from(&self.state);
        info!("Transitioned to state '{}'", client_state);
        // If the state transition can not be broadcast, the client would be in an inconsistent
        // state. The receiver stored alongside the sender makes this infallible.
        self.state_tx
            .send(client_state)
            .expect("to broadcast state transition");
        result
    }

    // Write a raw frame respecting the connection state. While reconnecting, frames are
    // buffered up to the configured limit and replayed after the connection is re-established.
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        match &mut self.state {
            ConnectionState::Connected(_, writer) => {
                writer.write_all(frame).await?;
                Ok(())
            }
            ConnectionState::Reconnecting => {
                let limit = self.options.reconnect_buffer_size;
                let pending = self.pending.get_or_insert_with(BytesMut::new);
                let size = pending.len() + frame.len();
                if size > limit {
                    return Err(Error::ReconnectBufferExceeded { size, limit });
                }
                pending.extend_from_slice(frame);
                Ok(())
            }
            ConnectionState::Closed => Err(Error::ClientClosed),
            _ => Err(Error::NotConnected),
        }
    }

    fn process_info(&mut self, info: Info) {
        trace!("Received updated server information {:?}", info);
        self.pool.merge_discovered(info.connect_urls());
        self.info = info;
    }

    fn process_msg(&mut self, msg: Msg) {
        // Inbound statistics count every received message, even those that end up dropped
        self.stats.in_msgs += 1;
        self.stats.in_bytes += msg.payload().len() as u64;
        let sid = msg.sid();
        let Self {
            subscriptions,
            error_callback,
            ..
        } = self;
        let subscription = match subscriptions.get_mut(&sid) {
            Some(subscription) => subscription,
            None => {
                // The server can deliver messages for a short window after an unsubscribe
                trace!("Received a message for unknown sid '{}'", sid);
                return;
            }
        };
        if subscription.exceeds_pending_limits(msg.payload().len()) {
            slow_consumer(subscription, error_callback);
            return;
        }
        if subscription.try_send(msg).is_err() {
            slow_consumer(subscription, error_callback);
            return;
        }
        subscription.set_slow_consumer(false);
        let delivered = subscription.record_delivered();
        if let Some(max_msgs) = subscription.max_msgs() {
            if delivered >= max_msgs {
                subscriptions.remove(&sid);
            }
        }
    }

    fn process_pong(&mut self) {
        trace!("Received {}", util::PONG_OP_NAME);
        self.outstanding_pings = 0;
        if let Some(pong) = self.pongs.pop_front() {
            let _ = pong.send(true);
        }
    }

    // Replay the state accumulated while the connection was down. Called with a freshly
    // established connection.
    async fn resume_after_reconnect(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            if !pending.is_empty() {
                trace!("Replaying {} buffered bytes", pending.len());
                self.write_frame(&pending).await?;
            }
        }
        let mut frame = String::new();
        for subscription in self.subscriptions.values() {
            frame.push_str(
                &ClientControl::Sub(
                    subscription.sid(),
                    subscription.subject(),
                    subscription.queue_group(),
                )
                .to_line(),
            );
            // Adjust the server side auto unsubscribe limit to account for messages already
            // delivered before the disconnect
            if let Some(remaining) = subscription.remaining() {
                if remaining > 0 {
                    frame
                        .push_str(&ClientControl::Unsub(subscription.sid(), Some(remaining)).to_line());
                }
            }
        }
        if !frame.is_empty() {
            self.write_frame(frame.as_bytes()).await?;
        }
        Ok(())
    }

    // Permanently close the client. Idempotent, the closed callback fires at most once.
    async fn close_internal(&mut self) {
        if let ConnectionState::Closed = self.state {
            return;
        }
        self.stop_ping_timer();
        let result = self.state_transition(StateTransition::ToClosed);
        if let StateTransitionResult::Writer(mut writer) = result {
            if let Err(e) = writer.shutdown().await {
                error!("Failed to shutdown the connection, err: {}", e);
            }
        }
        self.outstanding_pings = 0;
        self.pending = None;
        self.subscriptions.clear();
        for pong in self.pongs.drain(..) {
            let _ = pong.send(false);
        }
        if self.did_connect {
            if let Some(callback) = self.closed_callback.as_mut() {
                callback();
            }
        }
    }

    fn stop_ping_timer(&mut self) {
        if let Some(ping_timer) = self.ping_timer.take() {
            ping_timer.abort();
        }
    }
}

// Record a dropped message. The slow consumer flag and its notification fire only on the
// transition into the slow state, not for every subsequent drop.
fn slow_consumer(subscription: &mut Subscription, error_callback: &mut Option<ErrorCallback>) {
    subscription.record_dropped();
    if !subscription.is_slow_consumer() {
        subscription.set_slow_consumer(true);
        warn!(
            "Slow consumer detected for sid '{}' with subject '{}', {} total messages dropped",
            subscription.sid(),
            subscription.subject(),
            subscription.dropped()
        );
        if let Some(callback) = error_callback.as_mut() {
            callback(&Error::SlowConsumer {
                sid: subscription.sid(),
                subject: subscription.subject().clone(),
            });
        }
    }
}

/// The [NATS](https://nats.io/) client
///
/// `Client` is a cheaply cloneable handle. All clones refer to the same connection and share
/// its state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Mutex<ClientInner>>,
    state_rx: watch::Receiver<ClientState>,
}

impl Client {
    /// Create a new `Client` with default [`Options`](struct.Options.html)
    pub fn new(addresses: Vec<Address>) -> Self {
        Self::with_options(addresses, Options::new())
    }

    /// Create a new `Client` with the provided [`Options`](struct.Options.html)
    pub fn with_options(addresses: Vec<Address>, options: Options) -> Self {
        let state = ConnectionState::Disconnected;
        let (state_tx, state_rx) = watch::channel(ClientState::from(&state));
        let pool = ServerPool::new(addresses, options.max_reconnects, options.no_randomize);
        let inner = ClientInner {
            connect: Connect::new(),
            options,
            pool,
            info: Info::new(),
            state,
            state_tx,
            generation: 0,
            did_connect: false,
            last_error: None,
            stats: Stats::default(),
            next_sid: 0,
            subscriptions: HashMap::new(),
            pongs: VecDeque::new(),
            outstanding_pings: 0,
            pending: None,
            ping_timer: None,
            disconnected_callback: None,
            reconnected_callback: None,
            closed_callback: None,
            error_callback: None,
            #[cfg(feature = "tls")]
            tls_config: None,
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            state_rx,
        }
    }

    /// The current state of the client
    pub fn state(&self) -> ClientState {
        self.state_rx.borrow().clone()
    }

    /// A stream of all client state transitions
    pub fn state_stream(&self) -> WatchStream<ClientState> {
        WatchStream::new(self.state_rx.clone())
    }

    /// A reference to the most recent [`Info`](struct.Info.html) sent by the server
    pub async fn info(&self) -> ClientRef<'_, Info> {
        let client = self.lock().await;
        ClientRef(OwningRef::new(AnchoredGuard(client)).map(|client| &client.info))
    }

    /// A reference to the most recent connection error, if any
    pub async fn last_error(&self) -> ClientRef<'_, Option<Error>> {
        let client = self.lock().await;
        ClientRef(OwningRef::new(AnchoredGuard(client)).map(|client| &client.last_error))
    }

    /// A mutable reference to this client's [`Connect`](struct.Connect.html)
    ///
    /// Changes take effect the next time a connection is established.
    pub async fn connect_mut(&self) -> ClientRefMut<'_, Connect> {
        let client = self.lock().await;
        ClientRefMut(
            OwningRefMut::new(AnchoredGuard(client)).map_mut(|client| &mut client.connect),
        )
    }

    /// A snapshot of the client's traffic counters
    pub async fn stats(&self) -> Stats {
        self.lock().await.stats
    }

    /// Set the TLS configuration used when a connection requires TLS
    #[cfg(feature = "tls")]
    pub async fn set_tls_config(&self, tls_config: TlsConfig) {
        self.lock().await.tls_config = Some(tls_config);
    }

    /// Invoked every time the client loses its connection and begins reconnecting
    pub async fn set_disconnected_callback<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.lock().await.disconnected_callback = Some(Box::new(callback));
    }

    /// Invoked every time the client re-establishes a connection
    pub async fn set_reconnected_callback<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.lock().await.reconnected_callback = Some(Box::new(callback));
    }

    /// Invoked at most once when the client is permanently closed
    ///
    /// The callback only fires if the client was connected at some point in its lifetime.
    pub async fn set_closed_callback<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.lock().await.closed_callback = Some(Box::new(callback));
    }

    /// Invoked for asynchronous errors such as slow consumers and server reported errors
    pub async fn set_error_callback<F>(&self, callback: F)
    where
        F: FnMut(&Error) + Send + 'static,
    {
        self.lock().await.error_callback = Some(Box::new(callback));
    }

    /// Connect to a server in the pool
    ///
    /// Walks the pool once in order, returning as soon as a connection is established. If every
    /// address fails, the resulting error wraps the last failure.
    pub async fn connect(&self) -> Result<()> {
        let mut client = self.lock().await;
        match client.state {
            ConnectionState::Connected(..) | ConnectionState::Reconnecting => return Ok(()),
            ConnectionState::Closed => return Err(Error::ClientClosed),
            _ => (),
        }
        let mut last_error = None;
        for _ in 0..client.pool.len() {
            let address = match client.pool.current_server() {
                Ok(address) => address,
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            };
            client.pool.record_attempt();
            match self.try_connect(&mut client, &address).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("Failed to connect to '{}', err: {}", address, e);
                    last_error = Some(e);
                    let _ = client.pool.select_next_server();
                }
            }
        }
        client.state_transition(StateTransition::ToDisconnected);
        Err(Error::NoServers(last_error.map(Box::new)))
    }

    /// Permanently close the client
    ///
    /// Outstanding flushes complete with an error, subscriptions end their streams, and the
    /// closed callback fires if the client ever connected. A closed client can not be reused.
    pub async fn close(&self) {
        let mut client = self.lock().await;
        client.close_internal().await;
    }

    /// Publish a message
    pub async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<()> {
        self.publish_with_optional_reply(subject, None, payload)
            .await
    }

    /// Publish a message with a reply subject
    pub async fn publish_with_reply(
        &self,
        subject: &Subject,
        reply_to: &Subject,
        payload: &[u8],
    ) -> Result<()> {
        self.publish_with_optional_reply(subject, Some(reply_to), payload)
            .await
    }

    /// Publish a message with an optional reply subject
    pub async fn publish_with_optional_reply(
        &self,
        subject: &Subject,
        reply_to: Option<&Subject>,
        payload: &[u8],
    ) -> Result<()> {
        let mut client = self.lock().await;
        if let ConnectionState::Closed = client.state {
            return Err(Error::ClientClosed);
        }
        let max_payload = client.info.max_payload();
        if max_payload > 0 && payload.len() as u64 > max_payload {
            return Err(Error::MaxPayload {
                size: payload.len(),
                max_payload,
            });
        }
        let control = ClientControl::Pub(subject, reply_to, payload.len()).to_line();
        let mut frame =
            Vec::with_capacity(control.len() + payload.len() + util::MESSAGE_TERMINATOR.len());
        frame.extend_from_slice(control.as_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(util::MESSAGE_TERMINATOR.as_bytes());
        client.write_frame(&frame).await?;
        client.stats.out_msgs += 1;
        client.stats.out_bytes += payload.len() as u64;
        Ok(())
    }

    /// Publish a request and await a single reply
    ///
    /// A unique inbox subject is generated for the reply and automatically unsubscribed after
    /// one message.
    pub async fn request(&self, subject: &Subject, payload: &[u8]) -> Result<Msg> {
        let inbox = format!("{}.{}", util::INBOX_PREFIX, Uuid::new_v4().to_simple());
        let inbox = inbox.parse::<Subject>()?;
        let (sid, mut subscriber) = self.subscribe(&inbox, 1).await?;
        self.unsubscribe_with_max_msgs(sid, 1).await?;
        self.publish_with_reply(subject, &inbox, payload).await?;
        subscriber.next().await.ok_or(Error::ClientClosed)
    }

    /// [`request`](Client::request) with a time limit
    pub async fn request_timeout(
        &self,
        subject: &Subject,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Msg> {
        match time::timeout(timeout, self.request(subject, payload)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Subscribe to a subject
    ///
    /// `buffer` is the capacity of the channel between the connection and the returned
    /// [`Subscriber`]. Returns the subscription's [`Sid`] and the subscriber.
    pub async fn subscribe(&self, subject: &Subject, buffer: usize) -> Result<(Sid, Subscriber)> {
        self.subscribe_optional_queue_group(subject, None, buffer)
            .await
    }

    /// Subscribe to a subject as part of a queue group
    pub async fn subscribe_with_queue_group(
        &self,
        subject: &Subject,
        queue_group: &str,
        buffer: usize,
    ) -> Result<(Sid, Subscriber)> {
        self.subscribe_optional_queue_group(subject, Some(queue_group), buffer)
            .await
    }

    /// Subscribe to a subject with an optional queue group
    pub async fn subscribe_optional_queue_group(
        &self,
        subject: &Subject,
        queue_group: Option<&str>,
        buffer: usize,
    ) -> Result<(Sid, Subscriber)> {
        let mut client = self.lock().await;
        if let ConnectionState::Closed = client.state {
            return Err(Error::ClientClosed);
        }
        client.next_sid += 1;
        let sid = client.next_sid;
        let (subscription, subscriber) = Subscription::new(
            sid,
            subject.clone(),
            queue_group.map(String::from),
            buffer,
            client.options.pending_msgs_limit,
            client.options.pending_bytes_limit,
        );
        let frame = ClientControl::Sub(sid, subject, queue_group).to_line();
        client.write_frame(frame.as_bytes()).await?;
        client.subscriptions.insert(sid, subscription);
        Ok((sid, subscriber))
    }

    /// Subscribe to a subject, invoking the handler for every delivered message
    pub async fn subscribe_with_handler<F>(
        &self,
        subject: &Subject,
        buffer: usize,
        mut handler: F,
    ) -> Result<Sid>
    where
        F: FnMut(Msg) + Send + 'static,
    {
        let (sid, mut subscriber) = self.subscribe(subject, buffer).await?;
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                handler(msg);
            }
        });
        Ok(sid)
    }

    /// Unsubscribe from a subscription
    pub async fn unsubscribe(&self, sid: Sid) -> Result<()> {
        self.unsubscribe_optional_max_msgs(sid, None).await
    }

    /// Unsubscribe from a subscription after `max_msgs` more messages have been delivered
    pub async fn unsubscribe_with_max_msgs(&self, sid: Sid, max_msgs: u64) -> Result<()> {
        self.unsubscribe_optional_max_msgs(sid, Some(max_msgs))
            .await
    }

    /// Unsubscribe from a subscription with an optional message limit
    pub async fn unsubscribe_optional_max_msgs(
        &self,
        sid: Sid,
        max_msgs: Option<u64>,
    ) -> Result<()> {
        let mut client = self.lock().await;
        if let ConnectionState::Closed = client.state {
            return Err(Error::ClientClosed);
        }
        if !client.subscriptions.contains_key(&sid) {
            trace!("Unsubscribing from unknown sid '{}'", sid);
            return Ok(());
        }
        let frame = ClientControl::Unsub(sid, max_msgs).to_line();
        client.write_frame(frame.as_bytes()).await?;
        match max_msgs {
            None => {
                client.subscriptions.remove(&sid);
            }
            Some(max_msgs) => {
                if let Some(subscription) = client.subscriptions.get_mut(&sid) {
                    if subscription.delivered() >= max_msgs {
                        client.subscriptions.remove(&sid);
                    } else {
                        subscription.set_max_msgs(Some(max_msgs));
                    }
                }
            }
        }
        Ok(())
    }

    /// Wait until every previously written message has been processed by the server
    ///
    /// Equivalent to [`flush_timeout`](Client::flush_timeout) with a timeout of 60 seconds.
    pub async fn flush(&self) -> Result<()> {
        self.flush_timeout(util::DEFAULT_FLUSH_TIMEOUT).await
    }

    /// Wait until every previously written message has been processed by the server
    ///
    /// Writes a `PING` and resolves when the matching `PONG` arrives. Because the server
    /// processes the connection in order, the round trip proves everything written before the
    /// `PING` was seen.
    pub async fn flush_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }
        let rx = {
            let mut client = self.lock().await;
            if let ConnectionState::Closed = client.state {
                return Err(Error::ClientClosed);
            }
            let (tx, rx) = oneshot::channel();
            client.pongs.push_back(tx);
            let frame = ClientControl::Ping.to_line();
            if let Err(e) = client.write_frame(frame.as_bytes()).await {
                let _ = client.pongs.pop_back();
                return Err(e);
            }
            rx
        };
        match time::timeout(timeout, rx).await {
            Ok(Ok(true)) => Ok(()),
            // The waiter was released by the client closing
            Ok(Ok(false)) | Ok(Err(_)) => Err(Error::ClientClosed),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, ClientInner> {
        self.inner.lock().await
    }

    // Establish a connection to a single address and install it as the current connection.
    // Called with the client lock held.
    async fn try_connect(&self, client: &mut ClientInner, address: &Address) -> Result<()> {
        info!("Connecting to '{}'", address);
        client.state_transition(StateTransition::ToConnecting(address.clone()));
        let mut connect = client.connect.clone();
        if let Some(authorization) = address.authorization() {
            connect.inherit_authorization(authorization);
        }
        #[cfg(feature = "tls")]
        let tls_config = client.tls_config.clone();
        let handshake = async {
            let stream = TcpStream::connect(address.address()).await?;
            let mut stream = TlsOrTcpStream::new(stream);
            // Read the initial INFO line byte by byte. The stream can not go through the codec
            // yet because a TLS upgrade may follow.
            let mut line = Vec::new();
            loop {
                line.push(stream.read_u8().await?);
                if line.ends_with(util::MESSAGE_TERMINATOR.as_bytes()) {
                    break;
                }
            }
            let line = str::from_utf8(&line).map_err(|_| {
                Error::InvalidServerControl(String::from_utf8_lossy(&line).into_owned())
            })?;
            let info = match line.parse::<ServerControl>()? {
                ServerControl::Info(info) => info,
                _ => return Err(Error::InvalidServerControl(String::from(line))),
            };
            if info.tls_required() || connect.is_tls_required() {
                #[cfg(feature = "tls")]
                {
                    match tls_config {
                        Some(tls_config) => {
                            stream = stream.upgrade(tls_config, address.domain()).await?;
                        }
                        None => return Err(Error::TlsDisabled),
                    }
                }
                #[cfg(not(feature = "tls"))]
                return Err(Error::TlsDisabled);
            }
            // Send CONNECT followed by a PING. The PONG tells us the server accepted the
            // connection, a -ERR tells us it did not.
            let frame = format!(
                "{}{}",
                ClientControl::Connect(&connect).to_line(),
                ClientControl::Ping.to_line()
            );
            stream.write_all(frame.as_bytes()).await?;
            let (read_half, write_half) = tokio::io::split(stream);
            let mut framed = FramedRead::new(read_half, Codec::new());
            loop {
                match framed.next().await {
                    Some(Ok(Ok(ServerMessage::Pong))) => break,
                    Some(Ok(Ok(ServerMessage::Err(e)))) => return Err(Error::Protocol(e)),
                    Some(Ok(Ok(_))) => continue,
                    Some(Ok(Err(e))) => return Err(e),
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof))),
                }
            }
            Ok((framed, write_half, info))
        };
        let (framed, writer, info) =
            match time::timeout(client.options.tcp_connect_timeout, handshake).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::Timeout),
            };
        client.process_info(info);
        client.generation += 1;
        let generation = client.generation;
        client.state_transition(StateTransition::ToConnected(address.clone(), writer));
        client.did_connect = true;
        client.outstanding_pings = 0;
        client.pool.record_success();
        self.spawn_ping_timer(client, generation);
        tokio::spawn(self.clone().read_loop(generation, framed));
        info!("Connected to '{}'", address);
        Ok(())
    }

    async fn read_loop(
        self,
        generation: u64,
        mut framed: FramedRead<ReadHalf<TlsOrTcpStream>, Codec>,
    ) {
        loop {
            match framed.next().await {
                Some(Ok(Ok(message))) => {
                    let mut client = self.lock().await;
                    if client.generation != generation {
                        return;
                    }
                    match message {
                        ServerMessage::Info(info) => client.process_info(info),
                        ServerMessage::Msg(msg) => client.process_msg(msg),
                        ServerMessage::Ping => {
                            trace!("Received {}", util::PING_OP_NAME);
                            let frame = ClientControl::Pong.to_line();
                            if let Err(e) = client.write_frame(frame.as_bytes()).await {
                                drop(client);
                                self.process_op_error(generation, e).await;
                                return;
                            }
                        }
                        ServerMessage::Pong => client.process_pong(),
                        ServerMessage::Ok => trace!("Received {}", util::OK_OP_NAME),
                        ServerMessage::Err(e) => {
                            drop(client);
                            self.process_err(generation, e).await;
                        }
                    }
                }
                Some(Ok(Err(e))) => {
                    // A single malformed line does not invalidate the connection
                    error!("Received invalid server message, err: {}", e);
                }
                Some(Err(e)) => {
                    self.process_op_error(generation, e).await;
                    return;
                }
                None => {
                    let e = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
                    self.process_op_error(generation, e).await;
                    return;
                }
            }
        }
    }

    // Handle a fatal connection error by either reconnecting or closing the client
    async fn process_op_error(&self, generation: u64, err: Error) {
        let mut client = self.lock().await;
        if client.generation != generation {
            return;
        }
        // Recovery is only triggered from the connected state, everything else is already
        // being handled
        if !matches!(client.state, ConnectionState::Connected(..)) {
            return;
        }
        error!("Connection error, err: {}", err);
        client.last_error = Some(err);
        if client.options.allow_reconnect && !client.pool.is_empty() {
            let result = client.state_transition(StateTransition::ToReconnecting);
            if let StateTransitionResult::Writer(mut writer) = result {
                let _ = writer.shutdown().await;
            }
            client.pending.get_or_insert_with(BytesMut::new);
            client.stop_ping_timer();
            if let Some(callback) = client.disconnected_callback.as_mut() {
                callback();
            }
            self.spawn_reconnect();
        } else {
            client.close_internal().await;
        }
    }

    // Handle a server reported `-ERR`
    async fn process_err(&self, generation: u64, protocol_err: ProtocolError) {
        error!("Server error '{}'", protocol_err);
        match protocol_err {
            // The server is about to drop the connection
            ProtocolError::StaleConnection => {
                self.process_op_error(generation, Error::StaleConnection)
                    .await
            }
            // Permissions violations affect a single subject, the connection stays up
            ProtocolError::PermissionsViolationForSubscription(_)
            | ProtocolError::PermissionsViolationForPublish(_) => {
                let mut client = self.lock().await;
                if client.generation != generation {
                    return;
                }
                let err = Error::Protocol(protocol_err);
                if let Some(callback) = client.error_callback.as_mut() {
                    callback(&err);
                }
                client.last_error = Some(err);
            }
            // Any other server error is fatal
            _ => {
                let mut client = self.lock().await;
                if client.generation != generation {
                    return;
                }
                let err = Error::Protocol(protocol_err);
                if let Some(callback) = client.error_callback.as_mut() {
                    callback(&err);
                }
                client.last_error = Some(err);
                client.close_internal().await;
            }
        }
    }

    fn spawn_reconnect(&self) {
        tokio::spawn(Self::boxed_reconnect(self.clone()));
    }

    // Boxing breaks the otherwise recursive future type formed by the
    // reconnect -> try_connect -> read_loop -> process_op_error -> reconnect cycle
    // https://github.com/rust-lang/rust/issues/53690
    fn boxed_reconnect(client: Client) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(client.reconnect())
    }

    // Cycle through the server pool until a connection is re-established or the pool is
    // exhausted
    async fn reconnect(self) {
        loop {
            let (address, reconnect_wait) = {
                let mut client = self.lock().await;
                if !matches!(client.state, ConnectionState::Reconnecting) {
                    return;
                }
                let address = match client.pool.select_next_server() {
                    Ok(address) => address,
                    Err(_) => {
                        error!("Exhausted all servers in the pool, closing the client");
                        let previous = client.last_error.take().map(Box::new);
                        client.last_error = Some(Error::NoServers(previous));
                        client.close_internal().await;
                        return;
                    }
                };
                client.pool.record_attempt();
                (address, client.options.reconnect_wait)
            };
            time::sleep(reconnect_wait).await;
            let mut client = self.lock().await;
            // The client may have been closed while we were waiting
            if !matches!(client.state, ConnectionState::Reconnecting) {
                return;
            }
            match self.try_connect(&mut client, &address).await {
                Ok(()) => match client.resume_after_reconnect().await {
                    Ok(()) => {
                        client.stats.reconnects += 1;
                        if let Some(callback) = client.reconnected_callback.as_mut() {
                            callback();
                        }
                        return;
                    }
                    Err(e) => {
                        error!("Failed to replay state after reconnecting, err: {}", e);
                        client.last_error = Some(e);
                        client.stop_ping_timer();
                        let result = client.state_transition(StateTransition::ToReconnecting);
                        if let StateTransitionResult::Writer(mut writer) = result {
                            let _ = writer.shutdown().await;
                        }
                    }
                },
                Err(e) => {
                    error!("Failed to reconnect to '{}', err: {}", address, e);
                    client.last_error = Some(e);
                    client.state_transition(StateTransition::ToReconnecting);
                }
            }
        }
    }

    // Periodically ping the server to prove the connection is alive. Called with the client
    // lock held.
    fn spawn_ping_timer(&self, client: &mut ClientInner, generation: u64) {
        client.stop_ping_timer();
        let interval = match client.options.ping_interval {
            Some(interval) => interval,
            None => return,
        };
        let max_pings_out = client.options.max_pings_out;
        let handle = self.clone();
        client.ping_timer = Some(tokio::spawn(async move {
            let mut timer = time::interval_at(time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let mut client = handle.lock().await;
                if client.generation != generation
                    || !matches!(client.state, ConnectionState::Connected(..))
                {
                    return;
                }
                if client.outstanding_pings >= max_pings_out {
                    drop(client);
                    handle
                        .process_op_error(generation, Error::StaleConnection)
                        .await;
                    return;
                }
                client.outstanding_pings += 1;
                trace!("Sending {}", util::PING_OP_NAME);
                let frame = ClientControl::Ping.to_line();
                if let Err(e) = client.write_frame(frame.as_bytes()).await {
                    drop(client);
                    handle.process_op_error(generation, e).await;
                    return;
                }
            }
        }));
    }
}
