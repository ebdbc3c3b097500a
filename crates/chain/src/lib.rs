//! Chain interface contracts for the threshold relay beacon.
//!
//! The DKG protocol consumes exactly two things from the host chain: the
//! current block height as a shared clock for round synchronization, and a
//! deterministic mapping from operator public keys to on-chain addresses
//! for the broadcast authorization filter. Both are modeled as traits here;
//! a simulated chain backs them in tests and local deployments.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use beacon_types::{sha256, Address};

/// Block height watcher used for round synchronization.
///
/// Implementations must be safe for concurrent use: a host node shares one
/// counter across all of its DKG sessions.
#[async_trait]
pub trait BlockCounter: Send + Sync {
    /// The chain's current block height.
    async fn current_block(&self) -> u64;

    /// Resolve once the chain reaches `height`. Returns immediately if the
    /// chain is already at or past it.
    async fn wait_for_block(&self, height: u64);
}

/// Deterministic mapping from operator public keys to addresses.
pub trait Signing: Send + Sync {
    fn public_key_to_address(&self, public_key: &[u8]) -> Address;
}

/// Test signing scheme: address = SHA-256 of the public key bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashSigning;

impl Signing for HashSigning {
    fn public_key_to_address(&self, public_key: &[u8]) -> Address {
        sha256(public_key)
    }
}

/// Simulated chain whose block height is advanced manually or on a timer.
#[derive(Clone)]
pub struct SimulatedChain {
    height: watch::Sender<u64>,
}

impl SimulatedChain {
    pub fn new() -> Self {
        let (height, _) = watch::channel(0);
        Self { height }
    }

    /// Mine one block.
    pub fn advance_block(&self) {
        self.height.send_modify(|h| *h += 1);
    }

    /// Jump directly to `height`. Heights only move forward.
    pub fn advance_to(&self, height: u64) {
        self.height.send_modify(|h| *h = (*h).max(height));
    }

    /// Mine one block every `interval` until the returned handle is
    /// aborted or dropped along with the runtime.
    pub fn auto_advance(&self, interval: Duration) -> JoinHandle<()> {
        let chain = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                chain.advance_block();
            }
        })
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockCounter for SimulatedChain {
    async fn current_block(&self) -> u64 {
        *self.height.subscribe().borrow()
    }

    async fn wait_for_block(&self, height: u64) {
        let mut receiver = self.height.subscribe();
        while *receiver.borrow_and_update() < height {
            if receiver.changed().await.is_err() {
                // Chain handle dropped; nothing left to wait for.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_advancement() {
        let chain = SimulatedChain::new();
        assert_eq!(chain.current_block().await, 0);

        chain.advance_block();
        chain.advance_block();
        assert_eq!(chain.current_block().await, 2);

        chain.advance_to(10);
        assert_eq!(chain.current_block().await, 10);

        // Heights never move backwards.
        chain.advance_to(5);
        assert_eq!(chain.current_block().await, 10);
    }

    #[tokio::test]
    async fn test_wait_for_block_resolves_on_arrival() {
        let chain = SimulatedChain::new();

        let waiter = {
            let chain = chain.clone();
            tokio::spawn(async move { chain.wait_for_block(3).await })
        };

        chain.advance_to(3);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_past_block_resolves_immediately() {
        let chain = SimulatedChain::new();
        chain.advance_to(5);
        chain.wait_for_block(3).await;
    }

    #[test]
    fn test_hash_signing_is_deterministic() {
        let signing = HashSigning;
        assert_eq!(
            signing.public_key_to_address(b"operator"),
            signing.public_key_to_address(b"operator"),
        );
        assert_ne!(
            signing.public_key_to_address(b"operator-a"),
            signing.public_key_to_address(b"operator-b"),
        );
    }
}
