//! Transport seam for the replication stream.
//!
//! The publisher and consumer only ever see `MessageBus`, so the broker
//! behind it is swappable. The crate ships an in-process bus over a
//! broadcast channel, enough for single-host fan-out and for tests;
//! brokered transports implement the same trait elsewhere.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{FsError, Result};

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Open a subscription to `topic`. Only messages published after the
    /// call are delivered.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// Broadcast-channel bus for processes sharing one runtime.
pub struct InProcessBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { channels: Mutex::new(HashMap::new()), capacity }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // A topic with no subscribers swallows the message; that is not
        // a delivery failure for a broadcast.
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender(topic).subscribe()
    }
}

/// Transport failure helper shared by bus implementations.
pub fn transport_error(err: impl std::fmt::Display) -> FsError {
    FsError::Remote(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = InProcessBus::new();
        let mut a = bus.subscribe("t");
        let mut b = bus.subscribe("t");
        bus.publish("t", b"one".to_vec()).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), b"one");
        assert_eq!(b.recv().await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = InProcessBus::new();
        let mut other = bus.subscribe("other");
        bus.publish("t", b"one".to_vec()).await.unwrap();
        bus.publish("other", b"two".to_vec()).await.unwrap();
        assert_eq!(other.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let bus = InProcessBus::new();
        bus.publish("t", b"dropped".to_vec()).await.unwrap();
        let mut late = bus.subscribe("t");
        bus.publish("t", b"seen".to_vec()).await.unwrap();
        assert_eq!(late.recv().await.unwrap(), b"seen");
    }
}
