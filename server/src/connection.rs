//! Connected peers and connection capacity tracking
//!
//! A [`Peer`] is the send-target half of one accepted socket: a bounded
//! outbound queue drained by that connection's writer task, plus a close
//! signal that makes the connection's own loop wind down. Sessions and the
//! broadcaster hold clones of it; nothing but the connection task itself
//! ever touches the socket.

use log::info;
use shared::ServerMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The queue is full, so the peer is not keeping up
    Backlogged,
    /// The connection has already gone away
    Closed,
}

#[derive(Debug, Clone)]
pub struct Peer {
    id: ConnectionId,
    addr: SocketAddr,
    outbound: mpsc::Sender<ServerMessage>,
    closer: Arc<Notify>,
}

impl Peer {
    pub fn new(id: ConnectionId, addr: SocketAddr, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            addr,
            outbound,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues a message without waiting
    pub fn deliver(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Asks the owning connection to shut down through its normal disconnect path
    pub fn close(&self) {
        self.closer.notify_one();
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.closer.notified().await;
    }
}

/// Book-keeping entry for one accepted socket
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub connected_at: Instant,
}

/// Hands out connection ids and enforces the server's capacity
pub struct ConnectionTracker {
    connections: HashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    max_connections: usize,
}

impl ConnectionTracker {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
            max_connections,
        }
    }

    /// Registers a new connection, or returns None when at capacity
    pub fn add(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        info!("Connection {} accepted from {}", id, addr);
        self.connections.insert(
            id,
            Connection {
                id,
                addr,
                connected_at: Instant::now(),
            },
        );
        Some(id)
    }

    /// Returns true if the connection was known
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(connection) => {
                info!(
                    "Connection {} from {} closed after {:.1}s",
                    id,
                    connection.addr,
                    connection.connected_at.elapsed().as_secs_f32()
                );
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:50004".parse().unwrap()
    }

    #[test]
    fn test_tracker_assigns_increasing_ids() {
        let mut tracker = ConnectionTracker::new(4);
        assert!(tracker.is_empty());

        assert_eq!(tracker.add(test_addr()), Some(1));
        assert_eq!(tracker.add(test_addr()), Some(2));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_tracker_capacity() {
        let mut tracker = ConnectionTracker::new(1);
        let first = tracker.add(test_addr());
        assert!(first.is_some());
        assert!(tracker.add(test_addr()).is_none());

        assert!(tracker.remove(first.unwrap()));
        assert!(tracker.add(test_addr()).is_some());
    }

    #[test]
    fn test_tracker_remove_unknown() {
        let mut tracker = ConnectionTracker::new(2);
        assert!(!tracker.remove(42));
    }

    #[tokio::test]
    async fn test_peer_delivery_errors() {
        let (tx, mut rx) = mpsc::channel(1);
        let peer = Peer::new(7, test_addr(), tx);

        assert_eq!(peer.deliver(ServerMessage::error("one")), Ok(()));
        assert_eq!(
            peer.deliver(ServerMessage::error("two")),
            Err(DeliveryError::Backlogged)
        );
        assert_eq!(rx.recv().await, Some(ServerMessage::error("one")));

        drop(rx);
        assert_eq!(
            peer.deliver(ServerMessage::error("three")),
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn test_close_wakes_waiter_even_if_signalled_first() {
        let (tx, _rx) = mpsc::channel(1);
        let peer = Peer::new(1, test_addr(), tx);
        let clone = peer.clone();

        clone.close();
        tokio::time::timeout(std::time::Duration::from_millis(100), peer.closed())
            .await
            .expect("close signal should be stored until awaited");
    }
}
