//! Rules engine boundary
//!
//! The session engine never inspects positions itself. It hands FEN strings
//! and UCI moves to a [`RulesEngine`] and stores whatever notation comes
//! back. [`ChessRules`] is the production implementation on top of the
//! `chess` crate.

use crate::Side;
use chess::{BitBoard, Board, BoardStatus, ChessMove, Color, Piece, Square};
use std::str::FromStr;

/// Squares a light-squared bishop can reach
const LIGHT_SQUARES: u64 = 0x55AA_55AA_55AA_55AA;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("invalid board notation: {0}")]
    InvalidBoard(String),
    #[error("invalid move notation: {0}")]
    InvalidMove(String),
    #[error("illegal move: {0}")]
    IllegalMove(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Ongoing,
    Checkmate { winner: Side },
    Stalemate,
    InsufficientMaterial,
}

/// Legality, move application and terminal detection for board notation
///
/// Boards cross this boundary in their encoded form; engines that also
/// expose their native position type do so through [`BoardCodec`].
pub trait RulesEngine: Send + Sync {
    /// Notation of the starting position
    fn initial_board(&self) -> String;

    fn is_legal(&self, board: &str, mv: &str) -> bool;

    /// Returns the position after `mv`, or an error without side effects
    fn apply(&self, board: &str, mv: &str) -> Result<String, RulesError>;

    fn terminal_state(&self, board: &str) -> Result<TerminalState, RulesError>;

    fn side_to_move(&self, board: &str) -> Result<Side, RulesError>;
}

/// Conversion between an engine's native position and its notation
///
/// `decode(&encode(&board)) == board` for every reachable position.
pub trait BoardCodec {
    type Board;

    fn decode(&self, notation: &str) -> Result<Self::Board, RulesError>;

    fn encode(&self, board: &Self::Board) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChessRules;

impl ChessRules {
    pub fn new() -> Self {
        ChessRules
    }

    /// Parses long algebraic (UCI) notation such as `e2e4` or `e7e8q`
    pub fn parse_move(&self, notation: &str) -> Result<ChessMove, RulesError> {
        let invalid = || RulesError::InvalidMove(notation.to_string());
        let notation = notation.trim();
        if !notation.is_ascii() || notation.len() < 4 || notation.len() > 5 {
            return Err(invalid());
        }

        let from = Square::from_str(&notation[0..2]).map_err(|_| invalid())?;
        let to = Square::from_str(&notation[2..4]).map_err(|_| invalid())?;

        let promotion = match notation[4..].chars().next() {
            None => None,
            Some(c) => match c.to_ascii_lowercase() {
                'q' => Some(Piece::Queen),
                'r' => Some(Piece::Rook),
                'b' => Some(Piece::Bishop),
                'n' => Some(Piece::Knight),
                _ => return Err(invalid()),
            },
        };

        Ok(ChessMove::new(from, to, promotion))
    }

    /// True when neither side can possibly deliver mate
    pub fn is_insufficient_material(&self, board: &Board) -> bool {
        let heavy =
            *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
        if heavy.popcnt() > 0 {
            return false;
        }

        let total = board.combined().popcnt();
        if total <= 3 {
            // Bare kings, or a single minor piece
            return true;
        }

        let bishops = *board.pieces(Piece::Bishop);
        if total == 4 && bishops.popcnt() == 2 {
            let white = bishops & *board.color_combined(Color::White);
            let black = bishops & *board.color_combined(Color::Black);
            if white.popcnt() == 1 && black.popcnt() == 1 {
                return on_light(white) == on_light(black);
            }
        }

        false
    }
}

fn on_light(bits: BitBoard) -> bool {
    bits.0 & LIGHT_SQUARES != 0
}

fn side_of(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

impl BoardCodec for ChessRules {
    type Board = Board;

    fn decode(&self, notation: &str) -> Result<Board, RulesError> {
        Board::from_str(notation.trim())
            .map_err(|_| RulesError::InvalidBoard(notation.to_string()))
    }

    fn encode(&self, board: &Board) -> String {
        board.to_string()
    }
}

impl RulesEngine for ChessRules {
    fn initial_board(&self) -> String {
        self.encode(&Board::default())
    }

    fn is_legal(&self, board: &str, mv: &str) -> bool {
        match (self.decode(board), self.parse_move(mv)) {
            (Ok(board), Ok(mv)) => board.legal(mv),
            _ => false,
        }
    }

    fn apply(&self, board: &str, mv: &str) -> Result<String, RulesError> {
        let position = self.decode(board)?;
        let chess_move = self.parse_move(mv)?;
        if !position.legal(chess_move) {
            return Err(RulesError::IllegalMove(mv.trim().to_string()));
        }
        Ok(self.encode(&position.make_move_new(chess_move)))
    }

    fn terminal_state(&self, board: &str) -> Result<TerminalState, RulesError> {
        let position = self.decode(board)?;
        let state = match position.status() {
            // The side to move is the one that got mated
            BoardStatus::Checkmate => TerminalState::Checkmate {
                winner: side_of(!position.side_to_move()),
            },
            BoardStatus::Stalemate => TerminalState::Stalemate,
            BoardStatus::Ongoing if self.is_insufficient_material(&position) => {
                TerminalState::InsufficientMaterial
            }
            BoardStatus::Ongoing => TerminalState::Ongoing,
        };
        Ok(state)
    }

    fn side_to_move(&self, board: &str) -> Result<Side, RulesError> {
        Ok(side_of(self.decode(board)?.side_to_move()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn play(rules: &ChessRules, moves: &[&str]) -> String {
        moves
            .iter()
            .fold(rules.initial_board(), |board, mv| rules.apply(&board, mv).unwrap())
    }

    #[test]
    fn test_initial_board() {
        let rules = ChessRules::new();
        assert_eq!(rules.decode(&rules.initial_board()).unwrap(), Board::default());
        assert_eq!(rules.decode(START).unwrap(), Board::default());
        assert_eq!(rules.side_to_move(&rules.initial_board()).unwrap(), Side::White);
    }

    fn reencode<C: BoardCodec>(codec: &C, notation: &str) -> String {
        codec.encode(&codec.decode(notation).unwrap())
    }

    #[test]
    fn test_codec_is_stable_through_trait() {
        let rules = ChessRules::new();
        let once = reencode(&rules, &format!("  {}  ", START));
        assert_eq!(reencode(&rules, &once), once);
        assert_eq!(rules.decode(&once).unwrap(), Board::default());
        assert!(matches!(
            rules.decode("not a board"),
            Err(RulesError::InvalidBoard(_))
        ));
    }

    #[test]
    fn test_roundtrip_after_legal_moves() {
        let rules = ChessRules::new();
        let mut board = rules.decode(&rules.initial_board()).unwrap();
        assert_eq!(rules.decode(&rules.encode(&board)).unwrap(), board);

        for mv in ["e2e4", "c7c5", "g1f3", "d7d6", "f1b5", "c8d7", "e1g1"] {
            board = board.make_move_new(rules.parse_move(mv).unwrap());
            assert_eq!(rules.decode(&rules.encode(&board)).unwrap(), board);
        }
    }

    #[test]
    fn test_legal_and_illegal_moves() {
        let rules = ChessRules::new();
        let start = rules.initial_board();

        assert!(rules.is_legal(&start, "e2e4"));
        assert!(rules.is_legal(&start, "g1f3"));
        assert!(!rules.is_legal(&start, "e2e5"));
        assert!(!rules.is_legal(&start, "e7e5"));
        assert!(!rules.is_legal(&start, "zz99"));
    }

    #[test]
    fn test_apply_rejects_without_changing_input() {
        let rules = ChessRules::new();
        let start = rules.initial_board();

        assert_eq!(
            rules.apply(&start, "e2e5"),
            Err(RulesError::IllegalMove("e2e5".to_string()))
        );
        assert!(matches!(rules.apply(&start, "e2"), Err(RulesError::InvalidMove(_))));
        assert!(matches!(rules.apply("not a board", "e2e4"), Err(RulesError::InvalidBoard(_))));
    }

    #[test]
    fn test_apply_flips_side_to_move() {
        let rules = ChessRules::new();
        let board = play(&rules, &["e2e4"]);
        assert_eq!(rules.side_to_move(&board).unwrap(), Side::Black);
        assert_eq!(rules.terminal_state(&board).unwrap(), TerminalState::Ongoing);
    }

    #[test]
    fn test_parse_promotion() {
        let rules = ChessRules::new();
        let mv = rules.parse_move("e7e8q").unwrap();
        assert_eq!(mv.get_promotion(), Some(Piece::Queen));
        let mv = rules.parse_move("a2a1N").unwrap();
        assert_eq!(mv.get_promotion(), Some(Piece::Knight));
        assert!(rules.parse_move("e7e8k").is_err());
        assert!(rules.parse_move("e7e8qq").is_err());
    }

    #[test]
    fn test_fools_mate_is_checkmate_for_black() {
        let rules = ChessRules::new();
        let board = play(&rules, &["f2f3", "e7e5", "g2g4", "d8h4"]);
        assert_eq!(
            rules.terminal_state(&board).unwrap(),
            TerminalState::Checkmate { winner: Side::Black }
        );
    }

    #[test]
    fn test_stalemate_detected() {
        let rules = ChessRules::new();
        // Black king on h8 boxed in by the white queen, black to move
        let board = "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1";
        assert_eq!(rules.terminal_state(board).unwrap(), TerminalState::Stalemate);
    }

    #[test]
    fn test_insufficient_material() {
        let rules = ChessRules::new();
        let cases = [
            ("8/8/4k3/8/8/3K4/8/8 w - - 0 1", true),
            ("8/8/4k3/8/8/3KN3/8/8 w - - 0 1", true),
            ("8/8/4k3/8/8/3KB3/8/8 w - - 0 1", true),
            // Bishops on c1 and f8 are both dark-squared
            ("5b2/8/4k3/8/8/3K4/8/2B5 w - - 0 1", true),
            // c1 is dark, c8 is light
            ("2b5/8/4k3/8/8/3K4/8/2B5 w - - 0 1", false),
            ("8/8/4k3/8/8/3K4/4P3/8 w - - 0 1", false),
            ("8/8/4k3/8/8/3KNN2/8/8 w - - 0 1", false),
        ];

        for (fen, expected) in cases {
            let board = rules.decode(fen).unwrap();
            assert_eq!(rules.is_insufficient_material(&board), expected, "{}", fen);
        }

        assert_eq!(
            rules.terminal_state("8/8/4k3/8/8/3K4/8/8 w - - 0 1").unwrap(),
            TerminalState::InsufficientMaterial
        );
    }
}
