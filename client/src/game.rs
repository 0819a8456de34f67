//! Client-side view of the current session
//!
//! The server is authoritative; this only mirrors the last snapshot it sent,
//! plus the chat log and whatever role this client holds. Clocks are
//! projected forward locally between `TimeUpdate`s so a display can count
//! down smoothly.

use shared::{
    ChatAuthor, Clocks, GameOverReason, ServerMessage, SessionId, SessionStatus, SessionSummary,
    Side, Snapshot, Winner,
};
use std::time::Instant;

/// Cap on retained chat lines
const MAX_CHAT_HISTORY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Idle,
    Waiting,
    Player(Side),
    Spectator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub author: ChatAuthor,
    pub text: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct ClientGameState {
    pub role: ClientRole,
    pub session_id: Option<SessionId>,
    pub snapshot: Option<Snapshot>,
    pub opponent: Option<String>,
    pub result: Option<(Winner, GameOverReason)>,
    pub chat: Vec<ChatLine>,
    pub sessions: Vec<SessionSummary>,
    pub last_error: Option<String>,
    clocks: Clocks,
    side_to_move: Side,
    clocks_received: Instant,
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientGameState {
    pub fn new() -> Self {
        Self {
            role: ClientRole::Idle,
            session_id: None,
            snapshot: None,
            opponent: None,
            result: None,
            chat: Vec::new(),
            sessions: Vec::new(),
            last_error: None,
            clocks: Clocks::default(),
            side_to_move: Side::White,
            clocks_received: Instant::now(),
        }
    }

    /// Folds one server message into the local view and returns a line to show
    pub fn apply(&mut self, message: ServerMessage) -> Option<String> {
        self.apply_at(message, Instant::now())
    }

    pub fn apply_at(&mut self, message: ServerMessage, now: Instant) -> Option<String> {
        match message {
            ServerMessage::SessionCreated {
                session_id,
                side,
                snapshot,
            } => {
                self.enter(session_id.clone(), ClientRole::Player(side), snapshot, now);
                Some(format!(
                    "Created game {}; you play {}. Waiting for an opponent.",
                    session_id, side
                ))
            }
            ServerMessage::SessionJoined {
                session_id,
                side,
                opponent,
                snapshot,
            } => {
                self.enter(session_id.clone(), ClientRole::Player(side), snapshot, now);
                let line = format!("Joined game {} as {} against {}", session_id, side, opponent);
                self.opponent = Some(opponent);
                Some(line)
            }
            ServerMessage::SpectateStarted { session_id, snapshot } => {
                self.enter(session_id.clone(), ClientRole::Spectator, snapshot, now);
                Some(format!("Watching game {}", session_id))
            }
            ServerMessage::Waiting { message } => {
                self.role = if self.role == ClientRole::Idle {
                    ClientRole::Waiting
                } else {
                    ClientRole::Idle
                };
                Some(message)
            }
            ServerMessage::SessionCancelled { session_id } => {
                *self = ClientGameState {
                    chat: std::mem::take(&mut self.chat),
                    ..ClientGameState::new()
                };
                Some(format!("Game {} was cancelled", session_id))
            }
            ServerMessage::OpponentJoined { opponent, snapshot } => {
                self.update_snapshot(snapshot, now);
                let line = format!("{} joined the game", opponent);
                self.opponent = Some(opponent);
                Some(line)
            }
            ServerMessage::SpectatorJoined { name, spectator_count } => {
                self.set_spectator_count(spectator_count);
                Some(format!("{} is now watching ({} spectators)", name, spectator_count))
            }
            ServerMessage::SpectatorLeft { name, spectator_count } => {
                self.set_spectator_count(spectator_count);
                Some(format!("{} stopped watching ({} spectators)", name, spectator_count))
            }
            ServerMessage::BoardUpdate { snapshot } => {
                let line = match &snapshot.last_move {
                    Some(mv) if snapshot.status == SessionStatus::InProgress => {
                        Some(format!(
                            "Move {}: {}. {} to move.",
                            snapshot.move_count, mv, snapshot.side_to_move
                        ))
                    }
                    _ => None,
                };
                self.update_snapshot(snapshot, now);
                line
            }
            ServerMessage::TimeUpdate { clocks, side_to_move } => {
                self.clocks = clocks;
                self.side_to_move = side_to_move;
                self.clocks_received = now;
                None
            }
            ServerMessage::GameOver { winner, reason } => {
                self.result = Some((winner, reason));
                Some(match winner {
                    Winner::Draw => format!("Game over: draw by {}", reason),
                    side => format!("Game over: {} wins by {}", side, reason),
                })
            }
            ServerMessage::Chat {
                author,
                text,
                timestamp,
            } => {
                let line = format!("{}: {}", author, text);
                self.chat.push(ChatLine {
                    author,
                    text,
                    timestamp,
                });
                if self.chat.len() > MAX_CHAT_HISTORY {
                    let excess = self.chat.len() - MAX_CHAT_HISTORY;
                    self.chat.drain(..excess);
                }
                Some(line)
            }
            ServerMessage::SessionList { sessions } => {
                let line = if sessions.is_empty() {
                    "No open games".to_string()
                } else {
                    sessions
                        .iter()
                        .map(describe_summary)
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                self.sessions = sessions;
                Some(line)
            }
            ServerMessage::Error { message } => {
                let line = format!("Error: {}", message);
                self.last_error = Some(message);
                Some(line)
            }
        }
    }

    pub fn my_side(&self) -> Option<Side> {
        match self.role {
            ClientRole::Player(side) => Some(side),
            _ => None,
        }
    }

    pub fn is_my_turn(&self) -> bool {
        !self.is_game_over() && self.my_side() == Some(self.side_to_move) && self.is_in_progress()
    }

    pub fn is_in_progress(&self) -> bool {
        self.snapshot
            .as_ref()
            .map_or(false, |s| s.status == SessionStatus::InProgress)
    }

    pub fn is_game_over(&self) -> bool {
        self.result.is_some() || self.snapshot.as_ref().map_or(false, |s| s.is_game_over())
    }

    pub fn side_to_move(&self) -> Side {
        self.side_to_move
    }

    /// Clocks as last reported, with the side to move counted down locally
    pub fn projected_clocks(&self, now: Instant) -> Clocks {
        let mut clocks = self.clocks;
        if self.is_in_progress() && !self.is_game_over() {
            let elapsed = now.saturating_duration_since(self.clocks_received).as_millis() as u64;
            match self.side_to_move {
                Side::White => clocks.white_ms = clocks.white_ms.saturating_sub(elapsed),
                Side::Black => clocks.black_ms = clocks.black_ms.saturating_sub(elapsed),
            }
        }
        clocks
    }

    pub fn status_line(&self, now: Instant) -> String {
        let clocks = self.projected_clocks(now);
        let board = self.snapshot.as_ref().map_or("-", |s| s.board.as_str());
        format!(
            "[{}] white {} | black {} | {} to move",
            board,
            format_clock(clocks.seconds(Side::White)),
            format_clock(clocks.seconds(Side::Black)),
            self.side_to_move
        )
    }

    fn enter(&mut self, session_id: SessionId, role: ClientRole, snapshot: Snapshot, now: Instant) {
        self.session_id = Some(session_id);
        self.role = role;
        self.result = None;
        self.last_error = None;
        self.update_snapshot(snapshot, now);
    }

    fn update_snapshot(&mut self, snapshot: Snapshot, now: Instant) {
        self.clocks = snapshot.clocks;
        self.side_to_move = snapshot.side_to_move;
        self.clocks_received = now;
        if let (Some(winner), Some(reason)) = (snapshot.winner, snapshot.reason) {
            self.result = Some((winner, reason));
        }
        self.snapshot = Some(snapshot);
    }

    fn set_spectator_count(&mut self, count: u32) {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.spectator_count = count;
        }
    }
}

fn describe_summary(summary: &SessionSummary) -> String {
    let state = match summary.status {
        SessionStatus::AwaitingOpponent => "open",
        SessionStatus::InProgress => "playing",
        SessionStatus::Finished => "finished",
    };
    format!(
        "{}  {:<8} {} vs {}  ({} watching, {}s)",
        summary.session_id,
        state,
        summary.white.as_deref().unwrap_or("?"),
        summary.black.as_deref().unwrap_or("?"),
        summary.spectator_count,
        summary.time_limit_secs
    )
}

/// Formats seconds as m:ss
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).ceil() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
