use futures::stream::Stream;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tokio::sync::mpsc;

use crate::types::{Msg, Sid, Subject};

// Counters shared between a `Subscription` and its `Subscriber`. They track the messages and
// bytes sitting in the channel that the subscriber has not yet consumed.
#[derive(Debug, Default)]
struct Pending {
    msgs: AtomicUsize,
    bytes: AtomicUsize,
}

// The client side bookkeeping for a single subscription
pub struct Subscription {
    sid: Sid,
    subject: Subject,
    queue_group: Option<String>,
    tx: mpsc::Sender<Msg>,
    pending: Arc<Pending>,
    pending_msgs_limit: usize,
    pending_bytes_limit: usize,
    delivered: u64,
    max_msgs: Option<u64>,
    dropped: u64,
    slow_consumer: bool,
}

impl Subscription {
    pub fn new(
        sid: Sid,
        subject: Subject,
        queue_group: Option<String>,
        buffer: usize,
        pending_msgs_limit: usize,
        pending_bytes_limit: usize,
    ) -> (Self, Subscriber) {
        let (tx, rx) = mpsc::channel(buffer);
        let pending = Arc::new(Pending::default());
        let subscription = Self {
            sid,
            subject,
            queue_group,
            tx,
            pending: Arc::clone(&pending),
            pending_msgs_limit,
            pending_bytes_limit,
            delivered: 0,
            max_msgs: None,
            dropped: 0,
            slow_consumer: false,
        };
        let subscriber = Subscriber { sid, rx, pending };
        (subscription, subscriber)
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    // Would enqueueing a payload of `bytes` push the subscriber over its pending limits?
    pub fn exceeds_pending_limits(&self, bytes: usize) -> bool {
        self.pending.msgs.load(Ordering::Relaxed) + 1 > self.pending_msgs_limit
            || self.pending.bytes.load(Ordering::Relaxed) + bytes > self.pending_bytes_limit
    }

    // Hand a message to the subscriber without waiting. The pending counters are charged up
    // front and rolled back if the channel is full or closed.
    pub fn try_send(&mut self, msg: Msg) -> Result<(), ()> {
        let bytes = msg.payload().len();
        self.pending.msgs.fetch_add(1, Ordering::Relaxed);
        self.pending.bytes.fetch_add(bytes, Ordering::Relaxed);
        if self.tx.try_send(msg).is_err() {
            self.pending.msgs.fetch_sub(1, Ordering::Relaxed);
            self.pending.bytes.fetch_sub(bytes, Ordering::Relaxed);
            return Err(());
        }
        Ok(())
    }

    pub fn record_delivered(&mut self) -> u64 {
        self.delivered += 1;
        self.delivered
    }

    pub fn record_dropped(&mut self) -> u64 {
        self.dropped += 1;
        self.dropped
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_slow_consumer(&self) -> bool {
        self.slow_consumer
    }

    pub fn set_slow_consumer(&mut self, slow_consumer: bool) {
        self.slow_consumer = slow_consumer;
    }

    pub fn max_msgs(&self) -> Option<u64> {
        self.max_msgs
    }

    pub fn set_max_msgs(&mut self, max_msgs: Option<u64>) {
        self.max_msgs = max_msgs;
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    // The number of messages still expected before the subscription automatically
    // unsubscribes, if a limit was set
    pub fn remaining(&self) -> Option<u64> {
        self.max_msgs
            .map(|max_msgs| max_msgs.saturating_sub(self.delivered))
    }
}

/// The receiving end of a subscription
///
/// `Subscriber` implements [`Stream`](futures::stream::Stream) yielding each [`Msg`] delivered
/// to the subscription.
pub struct Subscriber {
    sid: Sid,
    rx: mpsc::Receiver<Msg>,
    pending: Arc<Pending>,
}

impl Subscriber {
    pub fn sid(&self) -> Sid {
        self.sid
    }
}

impl Stream for Subscriber {
    type Item = Msg;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(msg)) => {
                self.pending.msgs.fetch_sub(1, Ordering::Relaxed);
                self.pending
                    .bytes
                    .fetch_sub(msg.payload().len(), Ordering::Relaxed);
                Poll::Ready(Some(msg))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
