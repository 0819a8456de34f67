//! Fan-out of server messages to a session's send-targets
//!
//! Delivery only enqueues onto each peer's bounded outbound queue, so it never
//! waits on a socket and can run while the session lock is held. That keeps
//! every target seeing the same per-session order. A peer whose queue is full
//! or closed is asked to shut down; its own connection task then runs the
//! normal disconnect path.

use crate::connection::{ConnectionId, DeliveryError, Peer};
use log::{debug, warn};
use shared::ServerMessage;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub struct Broadcaster {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `message` to every target, returning the ids that could not take it
    pub fn deliver(&self, targets: &[Peer], message: &ServerMessage) -> Vec<ConnectionId> {
        self.deliver_filtered(targets, message, None)
    }

    /// Same as `deliver` but skips the connection `exclude`
    pub fn deliver_except(
        &self,
        targets: &[Peer],
        exclude: ConnectionId,
        message: &ServerMessage,
    ) -> Vec<ConnectionId> {
        self.deliver_filtered(targets, message, Some(exclude))
    }

    /// Sends to one peer; a failed reply closes that peer too
    pub fn send_to(&self, peer: &Peer, message: ServerMessage) -> bool {
        match peer.deliver(message) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.drop_peer(peer, e);
                false
            }
        }
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn deliver_filtered(
        &self,
        targets: &[Peer],
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> Vec<ConnectionId> {
        let mut failed = Vec::new();
        for peer in targets.iter().filter(|p| Some(p.id()) != exclude) {
            if !self.send_to(peer, message.clone()) {
                failed.push(peer.id());
            }
        }
        failed
    }

    fn drop_peer(&self, peer: &Peer, error: DeliveryError) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        match error {
            DeliveryError::Backlogged => {
                warn!("Connection {} ({}) is not keeping up, closing it", peer.id(), peer.addr())
            }
            DeliveryError::Closed => debug!("Connection {} already closed", peer.id()),
        }
        peer.close();
    }
}
