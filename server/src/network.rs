//! Server network layer: TCP accept loop and per-connection handling
//!
//! Every accepted socket gets three tasks. A reader pulls frames off the
//! socket into a small inbound queue, a writer drains the peer's outbound
//! queue onto the socket with a per-frame timeout, and the connection task
//! in between decodes requests and drives the session engine. Only the
//! connection task mutates sessions on behalf of its client; the reader and
//! writer never touch shared state.

use crate::broadcast::Broadcaster;
use crate::clock::spawn_turn_clock;
use crate::config::ServerConfig;
use crate::connection::{ConnectionId, ConnectionTracker, Peer};
use crate::error::{ProtocolError, RequestError, SessionError};
use crate::game::{DisconnectOutcome, GameSession};
use crate::persistence::StateMirror;
use crate::registry::{MatchOutcome, Pairing, SessionRegistry, SharedSession};
use crate::utils::get_timestamp;
use log::{debug, error, info, warn};
use shared::framing::{decode, encode, read_frame, send_message, write_frame};
use shared::rules::{ChessRules, RulesEngine};
use shared::{
    ChatAuthor, ClientMessage, Identity, ServerMessage, SessionId, SessionStatus, Side,
    MAX_CHAT_LEN,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot::error::RecvError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Frames buffered between a connection's reader and its handler
const INBOUND_QUEUE: usize = 16;

/// State shared by every connection and clock task
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub broadcaster: Broadcaster,
    mirror: Option<StateMirror>,
    connections: Mutex<ConnectionTracker>,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        rules: Arc<dyn RulesEngine>,
        mirror: Option<StateMirror>,
    ) -> Self {
        let connections = Mutex::new(ConnectionTracker::new(config.max_connections));
        Self {
            registry: SessionRegistry::new(rules),
            broadcaster: Broadcaster::new(),
            mirror,
            connections,
            config,
        }
    }

    /// Fans out the state after a committed transition
    ///
    /// Must be called with the session still locked. A finished session also
    /// gets its single `GameOver` here.
    pub fn announce(&self, session: &GameSession, now: Instant) {
        let targets = session.targets();
        let snapshot = session.snapshot(now);
        self.broadcaster.deliver(
            &targets,
            &ServerMessage::BoardUpdate {
                snapshot: snapshot.clone(),
            },
        );
        if let Some((winner, reason)) = session.result() {
            self.broadcaster
                .deliver(&targets, &ServerMessage::GameOver { winner, reason });
        }
        if let Some(mirror) = &self.mirror {
            mirror.record(&snapshot);
        }
    }

    /// Updates the state mirror without messaging anyone
    pub fn record(&self, session: &GameSession, now: Instant) {
        if let Some(mirror) = &self.mirror {
            mirror.record(&session.snapshot(now));
        }
    }

    /// Drops a session from the registry and the mirror
    pub async fn retire_session(&self, session_id: &str) {
        self.registry.remove_session(session_id).await;
        if let Some(mirror) = &self.mirror {
            mirror.forget(session_id);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

/// Main server accepting connections and spawning their handlers
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    _mirror_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Binds the listener; failure here is fatal for the process
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (mirror, mirror_task) = match &config.state_file {
            Some(path) => {
                info!("Mirroring session state to {}", path.display());
                let (mirror, task) = StateMirror::spawn(path.clone());
                (Some(mirror), Some(task))
            }
            None => (None, None),
        };

        let ctx = Arc::new(ServerContext::new(config, Arc::new(ChessRules::new()), mirror));
        Ok(Server {
            listener,
            ctx,
            _mirror_task: mirror_task,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Accepts connections until the task is dropped
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let admitted = self.ctx.connections.lock().await.add(addr);
            match admitted {
                Some(id) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(handle_connection(ctx, stream, id, addr));
                }
                None => {
                    warn!("Rejecting connection from {}: server is full", addr);
                    let send_timeout = self.ctx.config.send_timeout;
                    tokio::spawn(reject_connection(stream, send_timeout));
                }
            }
        }
    }
}

async fn reject_connection(mut stream: TcpStream, send_timeout: Duration) {
    let message = ServerMessage::error("Server is full");
    match timeout(send_timeout, send_message(&mut stream, &message)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Could not tell rejected client about capacity: {}", e),
        Err(_) => debug!("Rejected client did not accept the capacity notice in time"),
    }
}

/// Pulls frames off the socket until it closes or misbehaves
async fn read_loop(mut reader: OwnedReadHalf, inbound: mpsc::Sender<Vec<u8>>, id: ConnectionId) {
    loop {
        match read_frame(&mut reader).await {
            Ok(payload) => {
                if inbound.send(payload).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("Connection {} closed by peer", id);
                break;
            }
            Err(e) => {
                warn!("Connection {} read error: {}", id, e);
                break;
            }
        }
    }
}

/// Drains the outbound queue onto the socket
///
/// A write that fails or exceeds `send_timeout` closes the peer, which the
/// connection task treats as a disconnect.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<ServerMessage>,
    send_timeout: Duration,
    peer: Peer,
) {
    while let Some(message) = outbound.recv().await {
        let payload = match encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode message for connection {}: {}", peer.id(), e);
                continue;
            }
        };

        match timeout(send_timeout, write_frame(&mut writer, &payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to connection {} failed: {}", peer.id(), e);
                break;
            }
            Err(_) => {
                warn!("Write to connection {} ({}) timed out", peer.id(), peer.addr());
                break;
            }
        }
    }
    peer.close();
}

async fn handle_connection(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    id: ConnectionId,
    addr: SocketAddr,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }
    let (reader, writer) = stream.into_split();

    let (outbound_tx, outbound_rx) = mpsc::channel(ctx.config.outbound_queue);
    let peer = Peer::new(id, addr, outbound_tx);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    let reader_task = tokio::spawn(read_loop(reader, inbound_tx, id));
    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound_rx,
        ctx.config.send_timeout,
        peer.clone(),
    ));

    let idle_timeout = ctx.config.idle_timeout;
    let mut connection = ClientConnection {
        ctx: Arc::clone(&ctx),
        peer,
        role: Role::Lobby,
    };

    loop {
        tokio::select! {
            biased;

            pairing = await_pairing(&mut connection.role) => {
                connection.on_paired(pairing);
            }
            _ = connection.peer.closed() => {
                debug!("Connection {} closed by server", id);
                break;
            }
            frame = timeout(idle_timeout, inbound_rx.recv()) => match frame {
                Ok(Some(payload)) => connection.on_frame(&payload).await,
                Ok(None) => break,
                Err(_) => {
                    info!("Connection {} idle for {:?}, closing", id, idle_timeout);
                    break;
                }
            },
        }
    }

    connection.disconnect().await;
    reader_task.abort();
    writer_task.abort();
    ctx.connections.lock().await.remove(id);
}

/// Resolves when a queued player is matched; never resolves otherwise
async fn await_pairing(role: &mut Role) -> Result<Pairing, RecvError> {
    match role {
        Role::Waiting { pairing, .. } => pairing.await,
        _ => std::future::pending().await,
    }
}

/// What a connection currently is to the session engine
enum Role {
    Lobby,
    Waiting {
        identity: Identity,
        pairing: tokio::sync::oneshot::Receiver<Pairing>,
    },
    Player {
        session: SharedSession,
        session_id: SessionId,
        side: Side,
        name: String,
    },
    Spectator {
        session: SharedSession,
        session_id: SessionId,
        name: String,
    },
}

struct ClientConnection {
    ctx: Arc<ServerContext>,
    peer: Peer,
    role: Role,
}

impl ClientConnection {
    fn reply(&self, message: ServerMessage) {
        self.ctx.broadcaster.send_to(&self.peer, message);
    }

    async fn on_frame(&mut self, payload: &[u8]) {
        match decode::<ClientMessage>(payload) {
            Ok(message) => self.on_message(message).await,
            Err(e) => {
                warn!("Connection {} sent an undecodable frame: {}", self.peer.id(), e);
                self.reply(ServerMessage::error(ProtocolError::from(e).to_string()));
            }
        }
    }

    async fn on_message(&mut self, message: ClientMessage) {
        let result = match message {
            ClientMessage::CreateSession {
                identity,
                time_limit_secs,
            } => self.create_session(identity, time_limit_secs).await,
            ClientMessage::JoinSession {
                identity,
                session_id,
            } => self.join_session(identity, &session_id).await,
            ClientMessage::Spectate {
                identity,
                session_id,
            } => self.spectate(identity, &session_id).await,
            ClientMessage::JoinLobby { identity } => self.join_lobby(identity).await,
            ClientMessage::CancelWait => self.cancel_wait().await,
            ClientMessage::CancelSession => self.cancel_session().await,
            ClientMessage::ListSessions => {
                let sessions = self.ctx.registry.list_sessions().await;
                self.reply(ServerMessage::SessionList { sessions });
                Ok(())
            }
            ClientMessage::Move { uci } => self.play_move(&uci).await,
            ClientMessage::Resign => self.resign().await,
            ClientMessage::Chat { text, timestamp } => self.chat(text, timestamp).await,
        };

        if let Err(e) = result {
            debug!("Connection {}: request rejected: {}", self.peer.id(), e);
            self.reply(ServerMessage::error(e.to_string()));
        }
    }

    fn require_lobby(&self, request: &'static str) -> Result<(), RequestError> {
        match self.role {
            Role::Lobby => Ok(()),
            _ => Err(ProtocolError::Unexpected(request).into()),
        }
    }

    async fn create_session(
        &mut self,
        identity: Identity,
        time_limit_secs: Option<u64>,
    ) -> Result<(), RequestError> {
        self.require_lobby("CreateSession")?;
        validate_identity(&identity)?;

        let time_limit = time_limit_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.ctx.config.default_time_limit);
        let (session, guard) = self
            .ctx
            .registry
            .create_session(identity.clone(), Some(self.peer.clone()), time_limit)
            .await?;

        let now = Instant::now();
        let session_id = guard.id().clone();
        self.reply(ServerMessage::SessionCreated {
            session_id: session_id.clone(),
            side: Side::White,
            snapshot: guard.snapshot(now),
        });
        self.ctx.record(&guard, now);
        drop(guard);

        self.role = Role::Player {
            session,
            session_id,
            side: Side::White,
            name: identity.name,
        };
        Ok(())
    }

    async fn join_session(
        &mut self,
        identity: Identity,
        session_id: &str,
    ) -> Result<(), RequestError> {
        self.require_lobby("JoinSession")?;
        validate_identity(&identity)?;

        let now = Instant::now();
        let (session, guard) = self
            .ctx
            .registry
            .join_session(session_id, identity.clone(), Some(self.peer.clone()), now)
            .await?;

        let snapshot = guard.snapshot(now);
        let opponent = guard
            .player(Side::White)
            .map(|slot| slot.identity.name.clone())
            .unwrap_or_default();

        self.reply(ServerMessage::SessionJoined {
            session_id: guard.id().clone(),
            side: Side::Black,
            opponent,
            snapshot: snapshot.clone(),
        });
        self.ctx.broadcaster.deliver_except(
            &guard.targets(),
            self.peer.id(),
            &ServerMessage::OpponentJoined {
                opponent: identity.name.clone(),
                snapshot,
            },
        );
        self.ctx.record(&guard, now);
        let session_id = guard.id().clone();
        drop(guard);

        spawn_turn_clock(Arc::clone(&self.ctx), Arc::clone(&session));
        self.role = Role::Player {
            session,
            session_id,
            side: Side::Black,
            name: identity.name,
        };
        Ok(())
    }

    async fn spectate(&mut self, identity: Identity, session_id: &str) -> Result<(), RequestError> {
        self.require_lobby("Spectate")?;
        validate_identity(&identity)?;

        let (session, guard) = self
            .ctx
            .registry
            .attach_spectator(session_id, identity.clone(), self.peer.clone())
            .await?;

        let now = Instant::now();
        self.reply(ServerMessage::SpectateStarted {
            session_id: guard.id().clone(),
            snapshot: guard.snapshot(now),
        });
        self.ctx.broadcaster.deliver_except(
            &guard.targets(),
            self.peer.id(),
            &ServerMessage::SpectatorJoined {
                name: identity.name.clone(),
                spectator_count: guard.spectator_count(),
            },
        );
        info!("{} is now watching session {}", identity.name, guard.id());
        let session_id = guard.id().clone();
        drop(guard);

        self.role = Role::Spectator {
            session,
            session_id,
            name: identity.name,
        };
        Ok(())
    }

    async fn join_lobby(&mut self, identity: Identity) -> Result<(), RequestError> {
        self.require_lobby("JoinLobby")?;
        validate_identity(&identity)?;

        let now = Instant::now();
        let outcome = self
            .ctx
            .registry
            .pair_waiting_player(
                identity.clone(),
                self.peer.clone(),
                self.ctx.config.default_time_limit,
                now,
            )
            .await?;

        match outcome {
            MatchOutcome::Queued(pairing) => {
                info!("{} is waiting for an opponent", identity.name);
                self.reply(ServerMessage::Waiting {
                    message: "Waiting for an opponent".to_string(),
                });
                self.role = Role::Waiting { identity, pairing };
            }
            MatchOutcome::Paired {
                session,
                guard,
                opponent,
                opponent_peer,
            } => {
                let snapshot = guard.snapshot(now);
                let session_id = guard.id().clone();

                self.reply(ServerMessage::SessionJoined {
                    session_id: session_id.clone(),
                    side: Side::Black,
                    opponent: opponent.name,
                    snapshot: snapshot.clone(),
                });
                self.ctx.broadcaster.send_to(
                    &opponent_peer,
                    ServerMessage::SessionJoined {
                        session_id: session_id.clone(),
                        side: Side::White,
                        opponent: identity.name.clone(),
                        snapshot,
                    },
                );
                if guard.status() == SessionStatus::Finished {
                    // The waiter left while being matched
                    self.ctx.announce(&guard, now);
                } else {
                    self.ctx.record(&guard, now);
                }
                drop(guard);

                spawn_turn_clock(Arc::clone(&self.ctx), Arc::clone(&session));
                self.role = Role::Player {
                    session,
                    session_id,
                    side: Side::Black,
                    name: identity.name,
                };
            }
        }
        Ok(())
    }

    fn on_paired(&mut self, pairing: Result<Pairing, RecvError>) {
        let role = std::mem::replace(&mut self.role, Role::Lobby);
        let identity = match role {
            Role::Waiting { identity, .. } => identity,
            other => {
                self.role = other;
                return;
            }
        };

        match pairing {
            Ok(pairing) => {
                info!(
                    "{} paired with {} in session {}",
                    identity.name, pairing.opponent.name, pairing.session_id
                );
                self.role = Role::Player {
                    session: pairing.session,
                    session_id: pairing.session_id,
                    side: pairing.side,
                    name: identity.name,
                };
            }
            Err(_) => {
                warn!("Matchmaking ticket for {} was dropped", identity.name);
                self.reply(ServerMessage::error("Matchmaking was cancelled"));
            }
        }
    }

    async fn cancel_wait(&mut self) -> Result<(), RequestError> {
        if !matches!(self.role, Role::Waiting { .. }) {
            return Err(ProtocolError::Unexpected("CancelWait").into());
        }
        self.ctx.registry.cancel_waiting(self.peer.id()).await;
        self.role = Role::Lobby;
        self.reply(ServerMessage::Waiting {
            message: "Left matchmaking".to_string(),
        });
        Ok(())
    }

    async fn cancel_session(&mut self) -> Result<(), RequestError> {
        let (session, session_id, side) = match &self.role {
            Role::Player {
                session,
                session_id,
                side,
                ..
            } => (Arc::clone(session), session_id.clone(), *side),
            _ => return Err(ProtocolError::Unexpected("CancelSession").into()),
        };

        {
            let mut guard = session.lock().await;
            if guard.status() != SessionStatus::AwaitingOpponent {
                return Err(SessionError::InvalidRequest(
                    "Only a session awaiting an opponent can be cancelled".to_string(),
                )
                .into());
            }
            guard.handle_disconnect(side, Instant::now());
            let cancelled = ServerMessage::SessionCancelled {
                session_id: session_id.clone(),
            };
            self.ctx.broadcaster.deliver(&guard.targets(), &cancelled);
            self.reply(cancelled);
        }

        self.ctx.retire_session(&session_id).await;
        info!("Session {} cancelled by its creator", session_id);
        self.role = Role::Lobby;
        Ok(())
    }

    async fn play_move(&mut self, uci: &str) -> Result<(), RequestError> {
        let (session, side) = match &self.role {
            Role::Player { session, side, .. } => (Arc::clone(session), *side),
            _ => return Err(ProtocolError::Unexpected("Move").into()),
        };

        let mut guard = session.lock().await;
        let now = Instant::now();
        guard.apply_move(side, uci, now)?;
        self.ctx.announce(&guard, now);
        Ok(())
    }

    async fn resign(&mut self) -> Result<(), RequestError> {
        let (session, side) = match &self.role {
            Role::Player { session, side, .. } => (Arc::clone(session), *side),
            _ => return Err(ProtocolError::Unexpected("Resign").into()),
        };

        let mut guard = session.lock().await;
        let now = Instant::now();
        guard.resign(side, now)?;
        self.ctx.announce(&guard, now);
        Ok(())
    }

    async fn chat(&mut self, text: String, timestamp: Option<u64>) -> Result<(), RequestError> {
        let (session, author) = match &self.role {
            Role::Player {
                session, side, name, ..
            } => (
                Arc::clone(session),
                ChatAuthor::Player {
                    name: name.clone(),
                    side: *side,
                },
            ),
            Role::Spectator { session, name, .. } => (
                Arc::clone(session),
                ChatAuthor::Spectator { name: name.clone() },
            ),
            _ => return Err(ProtocolError::Unexpected("Chat").into()),
        };

        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if text.chars().count() > MAX_CHAT_LEN {
            return Err(SessionError::InvalidRequest(format!(
                "Chat message is too long (max {} characters)",
                MAX_CHAT_LEN
            ))
            .into());
        }

        let message = ServerMessage::Chat {
            author,
            text: text.to_string(),
            timestamp: timestamp.unwrap_or_else(get_timestamp),
        };
        let guard = session.lock().await;
        self.ctx
            .broadcaster
            .deliver_except(&guard.targets(), self.peer.id(), &message);
        Ok(())
    }

    /// Gives up a seat: forfeits a running game or abandons an unstarted one
    async fn forfeit_seat(
        &self,
        session: &SharedSession,
        session_id: &str,
        side: Side,
        name: &str,
    ) {
        let mut guard = session.lock().await;
        let now = Instant::now();
        match guard.handle_disconnect(side, now) {
            DisconnectOutcome::Forfeited { winner } => {
                info!("{} left session {}, {} wins", name, session_id, winner);
                self.ctx.announce(&guard, now);
            }
            DisconnectOutcome::Abandoned => {
                let cancelled = ServerMessage::SessionCancelled {
                    session_id: session_id.to_string(),
                };
                self.ctx.broadcaster.deliver(&guard.targets(), &cancelled);
                drop(guard);
                self.ctx.retire_session(session_id).await;
            }
            DisconnectOutcome::Detached => {}
        }
    }

    /// Runs the connection's share of teardown exactly once
    async fn disconnect(&mut self) {
        match std::mem::replace(&mut self.role, Role::Lobby) {
            Role::Lobby => {}
            Role::Waiting {
                identity,
                mut pairing,
            } => {
                if self.ctx.registry.cancel_waiting(self.peer.id()).await {
                    debug!("{} left matchmaking", identity.name);
                } else if let Ok(pairing) = pairing.try_recv() {
                    // Matched, but gone before taking the seat
                    self.forfeit_seat(
                        &pairing.session,
                        &pairing.session_id,
                        pairing.side,
                        &identity.name,
                    )
                    .await;
                }
            }
            Role::Player {
                session,
                session_id,
                side,
                name,
            } => self.forfeit_seat(&session, &session_id, side, &name).await,
            Role::Spectator {
                session,
                session_id,
                ..
            } => {
                let mut guard = session.lock().await;
                if let Some(identity) = guard.remove_spectator(self.peer.id()) {
                    debug!("{} stopped watching session {}", identity.name, session_id);
                    self.ctx.broadcaster.deliver(
                        &guard.targets(),
                        &ServerMessage::SpectatorLeft {
                            name: identity.name,
                            spectator_count: guard.spectator_count(),
                        },
                    );
                }
            }
        }
    }
}

fn validate_identity(identity: &Identity) -> Result<(), SessionError> {
    if identity.is_valid() {
        Ok(())
    } else {
        Err(SessionError::InvalidRequest(
            "Identity needs a non-empty id and name".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Clocks, GameOverReason, Winner};

    fn context() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(
            ServerConfig::default(),
            Arc::new(ChessRules::new()),
            None,
        ))
    }

    fn connection(
        ctx: &Arc<ServerContext>,
        id: ConnectionId,
    ) -> (ClientConnection, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let peer = Peer::new(id, "127.0.0.1:9000".parse().unwrap(), tx);
        (
            ClientConnection {
                ctx: Arc::clone(ctx),
                peer,
                role: Role::Lobby,
            },
            rx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    async fn create(conn: &mut ClientConnection, name: &str) -> SessionId {
        conn.on_message(ClientMessage::CreateSession {
            identity: Identity::new(format!("{}-id", name), name),
            time_limit_secs: Some(300),
        })
        .await;
        match &conn.role {
            Role::Player { session_id, .. } => session_id.clone(),
            _ => panic!("Creator should hold the white seat"),
        }
    }

    #[tokio::test]
    async fn test_create_then_join_notifies_both_sides() {
        let ctx = context();
        let (mut white, mut white_rx) = connection(&ctx, 1);
        let (mut black, mut black_rx) = connection(&ctx, 2);

        let id = create(&mut white, "alice").await;
        assert!(matches!(
            drain(&mut white_rx).as_slice(),
            [ServerMessage::SessionCreated { side: Side::White, .. }]
        ));

        black
            .on_message(ClientMessage::JoinSession {
                identity: Identity::new("b", "bob"),
                session_id: id.clone(),
            })
            .await;

        match drain(&mut black_rx).as_slice() {
            [ServerMessage::SessionJoined {
                side, opponent, snapshot, ..
            }] => {
                assert_eq!(*side, Side::Black);
                assert_eq!(opponent, "alice");
                assert_eq!(snapshot.status, SessionStatus::InProgress);
                assert_eq!(snapshot.clocks, Clocks::uniform(300_000));
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
        match drain(&mut white_rx).as_slice() {
            [ServerMessage::OpponentJoined { opponent, .. }] => assert_eq!(opponent, "bob"),
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requests_outside_role_are_rejected() {
        let ctx = context();
        let (mut conn, mut rx) = connection(&ctx, 1);

        conn.on_message(ClientMessage::Move { uci: "e2e4".to_string() }).await;
        conn.on_message(ClientMessage::Resign).await;
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::error("Move is not allowed here"),
                ServerMessage::error("Resign is not allowed here"),
            ]
        );

        create(&mut conn, "alice").await;
        drain(&mut rx);
        conn.on_message(ClientMessage::JoinLobby {
            identity: Identity::new("a", "alice"),
        })
        .await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::error("JoinLobby is not allowed here")]);
    }

    #[tokio::test]
    async fn test_invalid_identity_is_rejected() {
        let ctx = context();
        let (mut conn, mut rx) = connection(&ctx, 1);

        conn.on_message(ClientMessage::CreateSession {
            identity: Identity::new("", "alice"),
            time_limit_secs: None,
        })
        .await;
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::error("Identity needs a non-empty id and name")]
        );
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_undecodable_frame_gets_error() {
        let ctx = context();
        let (mut conn, mut rx) = connection(&ctx, 1);

        conn.on_frame(&[0xde, 0xad, 0xbe, 0xef]).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::error("Invalid message format")]);
    }

    #[tokio::test]
    async fn test_chat_reaches_others_only() {
        let ctx = context();
        let (mut white, mut white_rx) = connection(&ctx, 1);
        let (mut black, mut black_rx) = connection(&ctx, 2);
        let (mut watcher, mut watcher_rx) = connection(&ctx, 3);

        let id = create(&mut white, "alice").await;
        black
            .on_message(ClientMessage::JoinSession {
                identity: Identity::new("b", "bob"),
                session_id: id.clone(),
            })
            .await;
        watcher
            .on_message(ClientMessage::Spectate {
                identity: Identity::new("c", "carol"),
                session_id: id,
            })
            .await;
        drain(&mut white_rx);
        drain(&mut black_rx);
        drain(&mut watcher_rx);

        watcher
            .on_message(ClientMessage::Chat {
                text: "  good luck  ".to_string(),
                timestamp: Some(42),
            })
            .await;
        watcher
            .on_message(ClientMessage::Chat {
                text: "   ".to_string(),
                timestamp: None,
            })
            .await;

        let expected = ServerMessage::Chat {
            author: ChatAuthor::Spectator {
                name: "carol".to_string(),
            },
            text: "good luck".to_string(),
            timestamp: 42,
        };
        assert_eq!(drain(&mut white_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut black_rx), vec![expected]);
        assert!(drain(&mut watcher_rx).is_empty());

        black
            .on_message(ClientMessage::Chat {
                text: "x".repeat(MAX_CHAT_LEN + 1),
                timestamp: None,
            })
            .await;
        assert!(matches!(
            drain(&mut black_rx).as_slice(),
            [ServerMessage::Error { .. }]
        ));
        assert!(drain(&mut white_rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_mid_game_forfeits_to_opponent() {
        let ctx = context();
        let (mut white, mut white_rx) = connection(&ctx, 1);
        let (mut black, mut black_rx) = connection(&ctx, 2);

        let id = create(&mut white, "alice").await;
        black
            .on_message(ClientMessage::JoinSession {
                identity: Identity::new("b", "bob"),
                session_id: id,
            })
            .await;
        drain(&mut white_rx);
        drain(&mut black_rx);

        white.disconnect().await;

        let messages = drain(&mut black_rx);
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            ServerMessage::BoardUpdate { snapshot } if snapshot.is_game_over()
        ));
        assert_eq!(
            messages[1],
            ServerMessage::GameOver {
                winner: Winner::Black,
                reason: GameOverReason::Disconnect
            }
        );
        assert!(drain(&mut white_rx).is_empty());
    }

    #[tokio::test]
    async fn test_creator_leaving_removes_awaiting_session() {
        let ctx = context();
        let (mut white, _white_rx) = connection(&ctx, 1);
        let id = create(&mut white, "alice").await;

        white.disconnect().await;
        assert!(ctx.registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_session_only_while_awaiting() {
        let ctx = context();
        let (mut white, mut white_rx) = connection(&ctx, 1);
        let id = create(&mut white, "alice").await;
        drain(&mut white_rx);

        white.on_message(ClientMessage::CancelSession).await;
        assert_eq!(
            drain(&mut white_rx),
            vec![ServerMessage::SessionCancelled { session_id: id.clone() }]
        );
        assert!(ctx.registry.get(&id).await.is_none());
        assert!(matches!(white.role, Role::Lobby));

        let (mut black, mut black_rx) = connection(&ctx, 2);
        let id = create(&mut white, "alice").await;
        black
            .on_message(ClientMessage::JoinSession {
                identity: Identity::new("b", "bob"),
                session_id: id,
            })
            .await;
        drain(&mut black_rx);
        black.on_message(ClientMessage::CancelSession).await;
        assert!(matches!(
            drain(&mut black_rx).as_slice(),
            [ServerMessage::Error { .. }]
        ));
    }

    #[tokio::test]
    async fn test_lobby_pairing_moves_waiter_into_game() {
        let ctx = context();
        let (mut first, mut first_rx) = connection(&ctx, 1);
        let (mut second, mut second_rx) = connection(&ctx, 2);

        first
            .on_message(ClientMessage::JoinLobby {
                identity: Identity::new("a", "alice"),
            })
            .await;
        assert!(matches!(
            drain(&mut first_rx).as_slice(),
            [ServerMessage::Waiting { .. }]
        ));

        second
            .on_message(ClientMessage::JoinLobby {
                identity: Identity::new("b", "bob"),
            })
            .await;
        assert!(matches!(
            drain(&mut second_rx).as_slice(),
            [ServerMessage::SessionJoined { side: Side::Black, .. }]
        ));
        match drain(&mut first_rx).as_slice() {
            [ServerMessage::SessionJoined { side, opponent, .. }] => {
                assert_eq!(*side, Side::White);
                assert_eq!(opponent, "bob");
            }
            other => panic!("Unexpected messages: {:?}", other),
        }

        let pairing = await_pairing(&mut first.role).await;
        first.on_paired(pairing);
        assert!(matches!(first.role, Role::Player { side: Side::White, .. }));

        first.on_message(ClientMessage::Move { uci: "e2e4".to_string() }).await;
        assert!(matches!(
            drain(&mut second_rx).as_slice(),
            [ServerMessage::BoardUpdate { snapshot }] if snapshot.side_to_move == Side::Black
        ));
    }

    #[tokio::test]
    async fn test_paired_waiter_leaving_before_seating_forfeits() {
        let ctx = context();
        let (mut first, _first_rx) = connection(&ctx, 1);
        let (mut second, mut second_rx) = connection(&ctx, 2);

        first
            .on_message(ClientMessage::JoinLobby {
                identity: Identity::new("a", "alice"),
            })
            .await;
        second
            .on_message(ClientMessage::JoinLobby {
                identity: Identity::new("b", "bob"),
            })
            .await;
        drain(&mut second_rx);
        assert!(matches!(first.role, Role::Waiting { .. }));

        first.disconnect().await;

        let session = match &second.role {
            Role::Player { session, .. } => Arc::clone(session),
            _ => panic!("Second player should be seated"),
        };
        assert_eq!(session.lock().await.status(), SessionStatus::Finished);
        assert_eq!(
            drain(&mut second_rx).last(),
            Some(&ServerMessage::GameOver {
                winner: Winner::Black,
                reason: GameOverReason::Disconnect
            })
        );
    }
}
