use serde::{Deserialize, Serialize};
use std::fmt;

pub mod framing;
pub mod rules;

pub const DEFAULT_PORT: u16 = 50004;
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 300;
pub const MAX_CHAT_LEN: usize = 500;

pub type SessionId = String;

/// One of the two competing roles. White always moves first and is the side
/// handed to whoever creates a session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::White => 0,
            Side::Black => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "white"),
            Side::Black => write!(f, "black"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    AwaitingOpponent,
    InProgress,
    Finished,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    White,
    Black,
    Draw,
}

impl From<Side> for Winner {
    fn from(side: Side) -> Self {
        match side {
            Side::White => Winner::White,
            Side::Black => Winner::Black,
        }
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Winner::White => write!(f, "white"),
            Winner::Black => write!(f, "black"),
            Winner::Draw => write!(f, "draw"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum GameOverReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    Resignation,
    Timeout,
    Disconnect,
}

impl fmt::Display for GameOverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GameOverReason::Checkmate => "checkmate",
            GameOverReason::Stalemate => "stalemate",
            GameOverReason::InsufficientMaterial => "insufficient material",
            GameOverReason::Resignation => "resignation",
            GameOverReason::Timeout => "timeout",
            GameOverReason::Disconnect => "disconnect",
        };
        f.write_str(text)
    }
}

/// Who a participant claims to be. Not authenticated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.name.trim().is_empty()
    }
}

/// Remaining time per side, in milliseconds
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clocks {
    pub white_ms: u64,
    pub black_ms: u64,
}

impl Clocks {
    pub fn uniform(ms: u64) -> Self {
        Self {
            white_ms: ms,
            black_ms: ms,
        }
    }

    pub fn get(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_ms,
            Side::Black => self.black_ms,
        }
    }

    pub fn seconds(&self, side: Side) -> f64 {
        self.get(side) as f64 / 1000.0
    }
}

/// Complete externally visible state of a session at one instant
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub session_id: SessionId,
    pub board: String,
    pub side_to_move: Side,
    pub status: SessionStatus,
    pub winner: Option<Winner>,
    pub reason: Option<GameOverReason>,
    pub clocks: Clocks,
    pub white: Option<String>,
    pub black: Option<String>,
    pub spectator_count: u32,
    pub move_count: u32,
    pub last_move: Option<String>,
}

impl Snapshot {
    pub fn is_game_over(&self) -> bool {
        self.status == SessionStatus::Finished
    }
}

/// Lobby listing entry for a session that has not finished
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub white: Option<String>,
    pub black: Option<String>,
    pub spectator_count: u32,
    pub time_limit_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ChatAuthor {
    Player { name: String, side: Side },
    Spectator { name: String },
}

impl ChatAuthor {
    pub fn name(&self) -> &str {
        match self {
            ChatAuthor::Player { name, .. } | ChatAuthor::Spectator { name } => name,
        }
    }
}

impl fmt::Display for ChatAuthor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatAuthor::Player { name, side } => write!(f, "{} ({})", name, side),
            ChatAuthor::Spectator { name } => write!(f, "[Spectator] {}", name),
        }
    }
}

/// Requests sent from a client to the server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ClientMessage {
    CreateSession {
        identity: Identity,
        time_limit_secs: Option<u64>,
    },
    JoinSession {
        identity: Identity,
        session_id: SessionId,
    },
    Spectate {
        identity: Identity,
        session_id: SessionId,
    },
    JoinLobby {
        identity: Identity,
    },
    CancelWait,
    CancelSession,
    ListSessions,
    Move {
        uci: String,
    },
    Resign,
    Chat {
        text: String,
        timestamp: Option<u64>,
    },
}

/// Replies and notifications sent from the server to a client
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerMessage {
    SessionCreated {
        session_id: SessionId,
        side: Side,
        snapshot: Snapshot,
    },
    SessionJoined {
        session_id: SessionId,
        side: Side,
        opponent: String,
        snapshot: Snapshot,
    },
    SpectateStarted {
        session_id: SessionId,
        snapshot: Snapshot,
    },
    Waiting {
        message: String,
    },
    SessionCancelled {
        session_id: SessionId,
    },
    OpponentJoined {
        opponent: String,
        snapshot: Snapshot,
    },
    SpectatorJoined {
        name: String,
        spectator_count: u32,
    },
    SpectatorLeft {
        name: String,
        spectator_count: u32,
    },
    BoardUpdate {
        snapshot: Snapshot,
    },
    TimeUpdate {
        clocks: Clocks,
        side_to_move: Side,
    },
    GameOver {
        winner: Winner,
        reason: GameOverReason,
    },
    Chat {
        author: ChatAuthor,
        text: String,
        timestamp: u64,
    },
    SessionList {
        sessions: Vec<SessionSummary>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
