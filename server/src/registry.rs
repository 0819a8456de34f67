//! Session registry and matchmaking
//!
//! The registry maps session ids to shared sessions and owns the single
//! matchmaking slot. Lookups hold the map lock only long enough to clone a
//! session handle; no session lock is ever taken while the map lock is held.
//! When both are needed the pending slot is locked before the map.

use crate::connection::{ConnectionId, Peer};
use crate::error::SessionError;
use crate::game::GameSession;
use crate::utils::generate_session_id;
use log::{debug, info, warn};
use shared::rules::RulesEngine;
use shared::{Identity, SessionId, SessionStatus, SessionSummary, Side};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard, RwLock};

pub type SharedSession = Arc<Mutex<GameSession>>;
pub type SessionGuard = OwnedMutexGuard<GameSession>;

const MAX_ID_ATTEMPTS: usize = 64;

/// Delivered to a queued player once an opponent arrives
pub struct Pairing {
    pub session_id: SessionId,
    pub session: SharedSession,
    pub side: Side,
    pub opponent: Identity,
}

pub enum MatchOutcome {
    /// An opponent was already waiting; the caller plays black
    Paired {
        session: SharedSession,
        guard: SessionGuard,
        opponent: Identity,
        opponent_peer: Peer,
    },
    /// Nobody was waiting; the receiver resolves when someone shows up
    Queued(oneshot::Receiver<Pairing>),
}

struct WaitingPlayer {
    identity: Identity,
    peer: Peer,
    reply: oneshot::Sender<Pairing>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
    waiting: Mutex<Option<WaitingPlayer>>,
    rules: Arc<dyn RulesEngine>,
}

impl SessionRegistry {
    pub fn new(rules: Arc<dyn RulesEngine>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            waiting: Mutex::new(None),
            rules,
        }
    }

    /// Creates a session with the creator as white and registers it
    ///
    /// The returned guard is taken before the session becomes visible, so the
    /// caller can acknowledge the creation before anyone else can act on it.
    pub async fn create_session(
        &self,
        creator: Identity,
        peer: Option<Peer>,
        time_limit: Duration,
    ) -> Result<(SharedSession, SessionGuard), SessionError> {
        let mut sessions = self.sessions.write().await;
        let id = self.allocate_id(&sessions)?;

        let session = GameSession::new(
            id.clone(),
            Arc::clone(&self.rules),
            creator,
            peer,
            time_limit,
        );
        let shared = Arc::new(Mutex::new(session));
        // Uncontended: nobody else can see this session yet
        let guard = Arc::clone(&shared).lock_owned().await;
        sessions.insert(id.clone(), Arc::clone(&shared));

        info!("Session {} created ({} active)", id, sessions.len());
        Ok((shared, guard))
    }

    /// Seats the caller as black in an awaiting session
    ///
    /// The session stays locked in the returned guard so the caller can
    /// broadcast the start before any other transition is possible.
    pub async fn join_session(
        &self,
        id: &str,
        identity: Identity,
        peer: Option<Peer>,
        now: Instant,
    ) -> Result<(SharedSession, SessionGuard), SessionError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut guard = Arc::clone(&session).lock_owned().await;
        guard.join(identity, peer, now)?;
        Ok((session, guard))
    }

    /// Adds a spectator; allowed in any status until the session is removed
    pub async fn attach_spectator(
        &self,
        id: &str,
        identity: Identity,
        peer: Peer,
    ) -> Result<(SharedSession, SessionGuard), SessionError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut guard = Arc::clone(&session).lock_owned().await;
        if guard.is_abandoned() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        guard.add_spectator(identity, peer);
        Ok((session, guard))
    }

    /// Pairs the caller with the waiting player, or queues the caller
    ///
    /// A waiter whose connection has gone away is discarded rather than
    /// matched. On a match the waiter plays white and is notified through its
    /// pairing channel; if that fails the waiter is treated as disconnected.
    pub async fn pair_waiting_player(
        &self,
        identity: Identity,
        peer: Peer,
        time_limit: Duration,
        now: Instant,
    ) -> Result<MatchOutcome, SessionError> {
        let mut waiting = self.waiting.lock().await;

        let opponent = match waiting.take() {
            Some(waiter) if waiter.peer.id() == peer.id() => {
                // Re-queue of the same connection replaces its old ticket
                debug!("Connection {} re-entered the lobby", peer.id());
                None
            }
            Some(waiter) if waiter.reply.is_closed() => {
                debug!("Dropping stale lobby entry for {}", waiter.identity.name);
                None
            }
            other => other,
        };

        let waiter = match opponent {
            Some(waiter) => waiter,
            None => {
                let (reply, receiver) = oneshot::channel();
                *waiting = Some(WaitingPlayer { identity, peer, reply });
                return Ok(MatchOutcome::Queued(receiver));
            }
        };

        let (session, mut guard) = self
            .create_session(waiter.identity.clone(), Some(waiter.peer.clone()), time_limit)
            .await?;
        guard.join(identity.clone(), Some(peer), now)?;
        drop(waiting);

        let pairing = Pairing {
            session_id: guard.id().clone(),
            session: Arc::clone(&session),
            side: Side::White,
            opponent: identity,
        };
        if waiter.reply.send(pairing).is_err() {
            // The waiter vanished between the check and the send
            warn!(
                "Waiting player {} left before pairing completed",
                waiter.identity.name
            );
            guard.handle_disconnect(Side::White, now);
        }

        info!(
            "Matched {} against a waiting player in {}",
            waiter.identity.name,
            guard.id()
        );
        Ok(MatchOutcome::Paired {
            session,
            guard,
            opponent: waiter.identity,
            opponent_peer: waiter.peer,
        })
    }

    /// Withdraws a connection from matchmaking; true if it was queued
    pub async fn cancel_waiting(&self, connection: ConnectionId) -> bool {
        let mut waiting = self.waiting.lock().await;
        match waiting.as_ref() {
            Some(waiter) if waiter.peer.id() == connection => {
                *waiting = None;
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removing an unknown id is a no-op
    pub async fn remove_session(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!("Session {} removed", id);
        }
        removed
    }

    /// Summaries of every session that has not finished, ordered by id
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let handles: Vec<SharedSession> =
            self.sessions.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let session = handle.lock().await;
            if session.status() != SessionStatus::Finished && !session.is_abandoned() {
                summaries.push(session.summary());
            }
        }
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn allocate_id(
        &self,
        sessions: &HashMap<SessionId, SharedSession>,
    ) -> Result<SessionId, SessionError> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_session_id(&mut rng);
            if !sessions.contains_key(&id) {
                return Ok(id);
            }
        }
        warn!("Session id space exhausted after {} attempts", MAX_ID_ATTEMPTS);
        Err(SessionError::AllocationFailed)
    }
}
