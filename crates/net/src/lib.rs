//! Broadcast channel contract for the threshold relay beacon, plus an
//! in-process implementation used by tests and local deployments.
//!
//! The DKG protocol only ever talks to the [`BroadcastChannel`] trait:
//! best-effort broadcast of opaque payloads, delivery of one message at a
//! time together with the author's public key, and an authorization filter
//! checked before delivery. Framing, signing of the envelope, and fair
//! queuing are the responsibility of the channel implementation.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors surfaced by a broadcast channel.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("broadcast channel closed")]
    ChannelClosed,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// One delivered broadcast message.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Public key of the message author, as registered with the channel.
    pub sender_public_key: Vec<u8>,
    /// Opaque message payload.
    pub payload: Vec<u8>,
}

/// Authorization predicate over author public keys. Messages from authors
/// the predicate rejects are dropped before delivery.
pub type BroadcastFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A best-effort broadcast channel connecting the members of one group.
///
/// Message loss is allowed; the protocol treats a lost message as absence
/// of the expected message and handles it at the next phase boundary.
#[async_trait]
pub trait BroadcastChannel: Send {
    /// Broadcast a payload to every member of the group.
    async fn send(&self, payload: Vec<u8>) -> Result<(), NetError>;

    /// Deliver the next message passing the authorization filter.
    async fn recv(&mut self) -> Result<Envelope, NetError>;

    /// Install the authorization predicate. Set once, at session start.
    fn set_filter(&mut self, filter: BroadcastFilter);
}

/// In-process fanout network connecting channel handles in one process.
///
/// Every handle receives every broadcast message, its own included; the
/// protocol layer discards self-addressed traffic. Receivers that fall too
/// far behind lose the oldest messages, which is within the best-effort
/// delivery contract.
pub struct InProcessNetwork {
    sender: broadcast::Sender<Envelope>,
}

impl InProcessNetwork {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a channel handle whose outgoing messages carry `public_key`
    /// as the author identity.
    pub fn channel(&self, public_key: Vec<u8>) -> InProcessChannel {
        InProcessChannel {
            public_key,
            sender: self.sender.clone(),
            receiver: self.sender.subscribe(),
            filter: None,
        }
    }
}

impl Default for InProcessNetwork {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One member's handle onto an [`InProcessNetwork`].
pub struct InProcessChannel {
    public_key: Vec<u8>,
    sender: broadcast::Sender<Envelope>,
    receiver: broadcast::Receiver<Envelope>,
    filter: Option<BroadcastFilter>,
}

#[async_trait]
impl BroadcastChannel for InProcessChannel {
    async fn send(&self, payload: Vec<u8>) -> Result<(), NetError> {
        let envelope = Envelope {
            sender_public_key: self.public_key.clone(),
            payload,
        };
        self.sender
            .send(envelope)
            .map(|_| ())
            .map_err(|e| NetError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Envelope, NetError> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if let Some(filter) = &self.filter {
                        if !filter(&envelope.sender_public_key) {
                            debug!(
                                author = hex::encode(&envelope.sender_public_key),
                                "rejecting message; author is not a member of the group"
                            );
                            continue;
                        }
                    }
                    return Ok(envelope);
                }
                // Lost messages are within the best-effort contract.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "receiver lagged; dropping oldest messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(NetError::ChannelClosed),
            }
        }
    }

    fn set_filter(&mut self, filter: BroadcastFilter) {
        self.filter = Some(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_handles() {
        let network = InProcessNetwork::default();
        let alice = network.channel(b"alice".to_vec());
        let mut bob = network.channel(b"bob".to_vec());
        let mut carol = network.channel(b"carol".to_vec());

        alice.send(b"hello".to_vec()).await.unwrap();

        for channel in [&mut bob, &mut carol] {
            let envelope = channel.recv().await.unwrap();
            assert_eq!(envelope.sender_public_key, b"alice");
            assert_eq!(envelope.payload, b"hello");
        }
    }

    #[tokio::test]
    async fn test_sender_receives_own_broadcast() {
        let network = InProcessNetwork::default();
        let mut alice = network.channel(b"alice".to_vec());

        alice.send(b"loopback".to_vec()).await.unwrap();
        let envelope = alice.recv().await.unwrap();
        assert_eq!(envelope.sender_public_key, b"alice");
    }

    #[tokio::test]
    async fn test_filter_drops_unauthorized_authors() {
        let network = InProcessNetwork::default();
        let alice = network.channel(b"alice".to_vec());
        let mallory = network.channel(b"mallory".to_vec());
        let mut bob = network.channel(b"bob".to_vec());

        bob.set_filter(Arc::new(|author: &[u8]| author == b"alice"));

        mallory.send(b"spoofed".to_vec()).await.unwrap();
        alice.send(b"legit".to_vec()).await.unwrap();

        let envelope = bob.recv().await.unwrap();
        assert_eq!(envelope.sender_public_key, b"alice");
        assert_eq!(envelope.payload, b"legit");
    }
}
