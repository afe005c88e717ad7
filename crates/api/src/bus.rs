//! In-process publish/subscribe transport.
//!
//! Every topic is a `tokio::sync::broadcast` channel of prost-encoded
//! [`Bytes`]. Delivery is at-most-once: a publish with no subscribers goes
//! nowhere, and a subscriber that falls behind loses the oldest messages.
//! A [`LinkProfile`] can additionally drop, delay and jitter messages the
//! same way a lossy radio link would.

use std::{marker::PhantomData, sync::Arc, time::Duration};

use bytes::Bytes;
use dashmap::DashMap;
use prost::Message;
use tokio::{
    sync::{broadcast, Notify},
    time::{sleep, Instant},
};

const DEFAULT_TOPIC_CAPACITY: usize = 64;

/// Impairments applied to every published message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkProfile {
    /// Chance, in percent, that a message is silently dropped.
    pub drop_chance_percent: u8,
    pub latency_ms: u64,
    /// Extra random delay in `0..=jitter_ms` added to the latency.
    pub jitter_ms: u64,
}

impl LinkProfile {
    pub fn is_perfect(&self) -> bool {
        self.drop_chance_percent == 0 && self.latency_ms == 0 && self.jitter_ms == 0
    }

    fn should_drop(&self) -> bool {
        self.drop_chance_percent > 0 && rand::random::<u8>() % 100 < self.drop_chance_percent
    }

    fn delay(&self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::random::<u64>() % (self.jitter_ms + 1)
        } else {
            0
        };
        Duration::from_millis(self.latency_ms + jitter)
    }
}

/// Topic registry shared by every publisher and subscriber of a run.
pub struct Bus {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
    link: LinkProfile,
    capacity: usize,
    subscribed: Notify,
}

impl Bus {
    pub fn new(link: LinkProfile) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            link,
            capacity: DEFAULT_TOPIC_CAPACITY,
            subscribed: Notify::new(),
        })
    }

    /// A bus that delivers everything immediately.
    pub fn perfect() -> Arc<Self> {
        Self::new(LinkProfile::default())
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        if let Some(tx) = self.topics.get(topic) {
            return tx.clone();
        }
        self.topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Encodes and publishes `msg` on `topic`.
    ///
    /// Returns `true` if the message was handed to the link, which does not
    /// mean anyone receives it.
    pub fn publish<M: Message>(&self, topic: &str, msg: &M) -> bool {
        if self.link.should_drop() {
            tracing::trace!(topic, "Link dropped message");
            return false;
        }

        let payload = Bytes::from(msg.encode_to_vec());
        let tx = self.sender(topic);

        if self.link.is_perfect() {
            let _ = tx.send(payload);
            return true;
        }

        let delay = self.link.delay();
        if delay.is_zero() {
            let _ = tx.send(payload);
        } else {
            tokio::spawn(async move {
                sleep(delay).await;
                let _ = tx.send(payload);
            });
        }
        true
    }

    pub fn subscribe<M: Message + Default>(&self, topic: &str) -> Subscription<M> {
        let rx = self.sender(topic).subscribe();
        self.subscribed.notify_waiters();
        Subscription {
            topic: topic.to_owned(),
            rx,
            _marker: PhantomData,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    /// Suspends until `topic` has at least one subscriber or `timeout`
    /// elapses. Returns whether a subscriber showed up.
    pub async fn wait_for_subscribers(&self, topic: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.subscribed.notified();
            if self.subscriber_count(topic) > 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.subscriber_count(topic) > 0;
            }
        }
    }
}

/// Typed receiving end of a topic.
pub struct Subscription<M> {
    topic: String,
    rx: broadcast::Receiver<Bytes>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message + Default> Subscription<M> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next decodable message. Lost and undecodable messages are skipped.
    /// Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => match M::decode(payload) {
                    Ok(msg) => return Some(msg),
                    Err(e) => {
                        tracing::warn!(topic = %self.topic, error = %e, "Dropping undecodable message");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(topic = %self.topic, missed, "Subscriber lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Most recent message already queued, discarding older ones. `None` if
    /// nothing is pending.
    pub fn latest(&mut self) -> Option<M> {
        let mut newest = None;
        loop {
            match self.rx.try_recv() {
                Ok(payload) => newest = Some(payload),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        newest.and_then(|payload| M::decode(payload).ok())
    }
}
