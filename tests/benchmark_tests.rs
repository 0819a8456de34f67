//! Performance benchmarks for critical session paths

use server::game::GameSession;
use shared::framing::{decode, encode};
use shared::rules::{ChessRules, RulesEngine};
use shared::{Clocks, Identity, ServerMessage, SessionStatus, Side, Snapshot};
use std::sync::Arc;
use std::time::{Duration, Instant};

const OPENING: [&str; 8] = ["e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6", "b5a4", "g8f6"];

fn sample_snapshot() -> Snapshot {
    Snapshot {
        session_id: "ABC234".to_string(),
        board: ChessRules::new().initial_board(),
        side_to_move: Side::White,
        status: SessionStatus::InProgress,
        winner: None,
        reason: None,
        clocks: Clocks::uniform(300_000),
        white: Some("alice".to_string()),
        black: Some("bob".to_string()),
        spectator_count: 3,
        move_count: 0,
        last_move: None,
    }
}

/// Benchmarks move validation and application on board notation
#[test]
fn benchmark_move_application() {
    let rules = ChessRules::new();
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let mut board = rules.initial_board();
        for mv in OPENING {
            board = rules.apply(&board, mv).unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Move application: {} openings in {:?} ({:.2} μs/opening)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks terminal position detection
#[test]
fn benchmark_terminal_detection() {
    let rules = ChessRules::new();
    let board = rules.initial_board();
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = rules.terminal_state(&board).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Terminal detection: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks frame payload encoding and decoding of board updates
#[test]
fn benchmark_message_codec() {
    let message = ServerMessage::BoardUpdate {
        snapshot: sample_snapshot(),
    };
    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let payload = encode(&message).unwrap();
        let decoded: ServerMessage = decode(&payload).unwrap();
        assert!(matches!(decoded, ServerMessage::BoardUpdate { .. }));
    }

    let duration = start.elapsed();
    println!(
        "Message codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 2);
}

/// Benchmarks a full session game loop without networking
#[test]
fn benchmark_session_moves() {
    let rules: Arc<dyn RulesEngine> = Arc::new(ChessRules::new());
    let iterations = 500;
    let start = Instant::now();

    for i in 0..iterations {
        let mut session = GameSession::new(
            format!("S{:05}", i),
            rules.clone(),
            Identity::new("w", "alice"),
            None,
            Duration::from_secs(300),
        );
        let now = Instant::now();
        session.join(Identity::new("b", "bob"), None, now).unwrap();

        for (ply, mv) in OPENING.iter().enumerate() {
            let side = if ply % 2 == 0 { Side::White } else { Side::Black };
            session.apply_move(side, mv, now).unwrap();
        }
        assert_eq!(session.snapshot(now).move_count, OPENING.len() as u32);
    }

    let duration = start.elapsed();
    println!(
        "Session moves: {} games in {:?} ({:.2} μs/game)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}
