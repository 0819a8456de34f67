//! Per-match state machine
//!
//! A [`GameSession`] owns the board, both player slots, the spectator set and
//! the clocks for one match. Its methods are the only way to mutate that
//! state; each one either commits a whole transition or returns an error and
//! leaves the session exactly as it was. Callers hold the session lock for
//! the call and then fan out the resulting snapshot themselves.
//!
//! Time is always passed in explicitly so every transition is deterministic
//! under test.

use crate::connection::{ConnectionId, Peer};
use crate::error::SessionError;
use crate::utils::duration_to_ms;
use log::{debug, info};
use shared::rules::{RulesEngine, TerminalState};
use shared::{
    Clocks, GameOverReason, Identity, SessionId, SessionStatus, SessionSummary, Side, Snapshot,
    Winner,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PlayerSlot {
    pub identity: Identity,
    /// Empty once the player's connection is gone
    pub peer: Option<Peer>,
    /// Time left as of the last time this side's clock was banked
    remaining: Duration,
}

#[derive(Debug, Clone)]
pub struct SpectatorEntry {
    pub identity: Identity,
    pub peer: Peer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Continued,
    Finished { winner: Winner, reason: GameOverReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The game was running; the other side wins
    Forfeited { winner: Winner },
    /// The sole occupant left before anyone joined; the session should go
    Abandoned,
    /// Nothing left to decide; only the send-target was cleared
    Detached,
}

pub struct GameSession {
    id: SessionId,
    rules: Arc<dyn RulesEngine>,
    board: String,
    side_to_move: Side,
    players: [Option<PlayerSlot>; 2],
    spectators: Vec<SpectatorEntry>,
    status: SessionStatus,
    winner: Option<Winner>,
    reason: Option<GameOverReason>,
    /// When the side to move last started (or resumed) counting down
    turn_started: Option<Instant>,
    time_limit: Duration,
    moves: Vec<String>,
    finished_at: Option<Instant>,
    abandoned: bool,
}

impl GameSession {
    /// Creates a session awaiting an opponent, with the creator playing white
    pub fn new(
        id: SessionId,
        rules: Arc<dyn RulesEngine>,
        creator: Identity,
        peer: Option<Peer>,
        time_limit: Duration,
    ) -> Self {
        let board = rules.initial_board();
        let mut players = [None, None];
        players[Side::White.index()] = Some(PlayerSlot {
            identity: creator,
            peer,
            remaining: time_limit,
        });

        Self {
            id,
            rules,
            board,
            side_to_move: Side::White,
            players,
            spectators: Vec::new(),
            status: SessionStatus::AwaitingOpponent,
            winner: None,
            reason: None,
            turn_started: None,
            time_limit,
            moves: Vec::new(),
            finished_at: None,
            abandoned: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn side_to_move(&self) -> Side {
        self.side_to_move
    }

    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    pub fn result(&self) -> Option<(Winner, GameOverReason)> {
        self.winner.zip(self.reason)
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn player(&self, side: Side) -> Option<&PlayerSlot> {
        self.players[side.index()].as_ref()
    }

    pub fn spectator_count(&self) -> u32 {
        self.spectators.len() as u32
    }

    /// Fills the black slot and starts the game
    ///
    /// Session-scoped exclusion around this call is what makes it the single
    /// point where a session goes from awaiting to in progress.
    pub fn join(
        &mut self,
        identity: Identity,
        peer: Option<Peer>,
        now: Instant,
    ) -> Result<Side, SessionError> {
        if self.abandoned {
            return Err(SessionError::NotFound(self.id.clone()));
        }
        if self.status != SessionStatus::AwaitingOpponent {
            return Err(SessionError::SessionFull);
        }

        let side = Side::Black;
        self.players[side.index()] = Some(PlayerSlot {
            identity,
            peer,
            remaining: self.time_limit,
        });
        for slot in self.players.iter_mut().flatten() {
            slot.remaining = self.time_limit;
        }

        self.status = SessionStatus::InProgress;
        self.turn_started = Some(now);
        info!("Session {} started", self.id);
        Ok(side)
    }

    /// Time left for `side` as of `now`, never below zero
    pub fn remaining(&self, side: Side, now: Instant) -> Duration {
        let banked = self
            .player(side)
            .map(|slot| slot.remaining)
            .unwrap_or(self.time_limit);

        match self.turn_started {
            Some(started)
                if self.status == SessionStatus::InProgress && side == self.side_to_move =>
            {
                banked.saturating_sub(now.saturating_duration_since(started))
            }
            _ => banked,
        }
    }

    pub fn clocks(&self, now: Instant) -> Clocks {
        Clocks {
            white_ms: duration_to_ms(self.remaining(Side::White, now)),
            black_ms: duration_to_ms(self.remaining(Side::Black, now)),
        }
    }

    /// Plays `mv` for `side`
    ///
    /// A move that ends the game finishes the session in the same step, so
    /// there is never a window where the position is terminal but the status
    /// is not.
    pub fn apply_move(
        &mut self,
        side: Side,
        mv: &str,
        now: Instant,
    ) -> Result<MoveOutcome, SessionError> {
        if self.status != SessionStatus::InProgress {
            return Err(SessionError::NotInProgress);
        }
        if side != self.side_to_move {
            return Err(SessionError::NotYourTurn);
        }
        if self.remaining(side, now).is_zero() {
            return Err(SessionError::ClockExpired);
        }

        let board = self
            .rules
            .apply(&self.board, mv)
            .map_err(|_| SessionError::IllegalMove(mv.trim().to_string()))?;
        let terminal = self
            .rules
            .terminal_state(&board)
            .map_err(|e| SessionError::IllegalMove(e.to_string()))?;

        self.bank_clock(now);
        self.board = board;
        self.side_to_move = side.opponent();
        self.turn_started = Some(now);
        self.moves.push(mv.trim().to_string());
        debug!("Session {}: {} played {}", self.id, side, mv.trim());

        let finished = match terminal {
            TerminalState::Ongoing => None,
            TerminalState::Checkmate { .. } => {
                Some((Winner::from(side), GameOverReason::Checkmate))
            }
            TerminalState::Stalemate => Some((Winner::Draw, GameOverReason::Stalemate)),
            TerminalState::InsufficientMaterial => {
                Some((Winner::Draw, GameOverReason::InsufficientMaterial))
            }
        };

        match finished {
            Some((winner, reason)) => {
                self.finish(winner, reason, now);
                Ok(MoveOutcome::Finished { winner, reason })
            }
            None => Ok(MoveOutcome::Continued),
        }
    }

    /// The resigning side loses regardless of position or clock
    pub fn resign(&mut self, side: Side, now: Instant) -> Result<Winner, SessionError> {
        if self.status != SessionStatus::InProgress {
            return Err(SessionError::NotInProgress);
        }
        let winner = Winner::from(side.opponent());
        self.finish(winner, GameOverReason::Resignation, now);
        Ok(winner)
    }

    /// Clears `side`'s send-target and applies whatever the loss means now
    pub fn handle_disconnect(&mut self, side: Side, now: Instant) -> DisconnectOutcome {
        if let Some(slot) = self.players[side.index()].as_mut() {
            slot.peer = None;
        }

        match self.status {
            SessionStatus::InProgress => {
                let winner = Winner::from(side.opponent());
                self.finish(winner, GameOverReason::Disconnect, now);
                DisconnectOutcome::Forfeited { winner }
            }
            SessionStatus::AwaitingOpponent if side == Side::White => {
                self.abandoned = true;
                info!("Session {} abandoned before it started", self.id);
                DisconnectOutcome::Abandoned
            }
            _ => DisconnectOutcome::Detached,
        }
    }

    /// Ends the game on time for `side`
    ///
    /// Only succeeds if `side` is still to move and really has nothing left;
    /// a tick that lost the race against a move is rejected as stale.
    pub fn expire_clock(&mut self, side: Side, now: Instant) -> Result<Winner, SessionError> {
        if self.status != SessionStatus::InProgress {
            return Err(SessionError::NotInProgress);
        }
        if side != self.side_to_move || !self.remaining(side, now).is_zero() {
            return Err(SessionError::StaleClock);
        }

        let winner = Winner::from(side.opponent());
        self.finish(winner, GameOverReason::Timeout, now);
        Ok(winner)
    }

    /// Adds a spectator; a peer already watching only has its identity refreshed
    pub fn add_spectator(&mut self, identity: Identity, peer: Peer) -> bool {
        if let Some(existing) = self.spectators.iter_mut().find(|s| s.peer.id() == peer.id()) {
            existing.identity = identity;
            return false;
        }
        self.spectators.push(SpectatorEntry { identity, peer });
        true
    }

    pub fn remove_spectator(&mut self, connection: ConnectionId) -> Option<Identity> {
        let index = self.spectators.iter().position(|s| s.peer.id() == connection)?;
        Some(self.spectators.swap_remove(index).identity)
    }

    /// Every live send-target: both occupied player slots and all spectators
    pub fn targets(&self) -> Vec<Peer> {
        self.players
            .iter()
            .flatten()
            .filter_map(|slot| slot.peer.clone())
            .chain(self.spectators.iter().map(|s| s.peer.clone()))
            .collect()
    }

    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            session_id: self.id.clone(),
            board: self.board.clone(),
            side_to_move: self.side_to_move,
            status: self.status,
            winner: self.winner,
            reason: self.reason,
            clocks: self.clocks(now),
            white: self.player_name(Side::White),
            black: self.player_name(Side::Black),
            spectator_count: self.spectator_count(),
            move_count: self.moves.len() as u32,
            last_move: self.moves.last().cloned(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            status: self.status,
            white: self.player_name(Side::White),
            black: self.player_name(Side::Black),
            spectator_count: self.spectator_count(),
            time_limit_secs: self.time_limit.as_secs(),
        }
    }

    fn player_name(&self, side: Side) -> Option<String> {
        self.player(side).map(|slot| slot.identity.name.clone())
    }

    /// Charges the side to move for the time since its turn started
    fn bank_clock(&mut self, now: Instant) {
        let side = self.side_to_move;
        let remaining = self.remaining(side, now);
        if let Some(slot) = self.players[side.index()].as_mut() {
            slot.remaining = remaining;
        }
        self.turn_started = Some(now);
    }

    fn finish(&mut self, winner: Winner, reason: GameOverReason, now: Instant) {
        self.bank_clock(now);
        self.status = SessionStatus::Finished;
        self.winner = Some(winner);
        self.reason = Some(reason);
        self.finished_at = Some(now);
        info!("Session {} finished: {} ({})", self.id, winner, reason);
    }
}
