//! # Chess Arena Server Library
//!
//! This library provides the authoritative session engine for networked chess.
//! It pairs players into sessions, enforces turn order and clocks, and fans
//! board, clock and chat updates out to both players and any number of
//! spectators over framed TCP connections.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Game State
//! The server holds the only real copy of every board. Clients submit moves
//! in UCI notation; the server validates them through the rules engine,
//! commits them and tells everyone in the session what the new position is.
//!
//! ### Session Lifecycle
//! Handles every stage of a match:
//! - Creation with a shareable id, or anonymous matchmaking through the lobby
//! - The single transition from awaiting an opponent to in progress
//! - Terminal transitions: checkmate, stalemate, insufficient material,
//!   resignation, timeout and disconnect forfeits
//! - Removal of finished sessions after a retention period
//!
//! ### State Broadcasting
//! Every committed transition is followed by one snapshot broadcast to all
//! of the session's send-targets, so players and spectators converge on the
//! same board and clocks.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Each accepted socket runs its own reader, writer and handler tasks. A
//! slow or vanished peer only ever stalls its own tasks; the broadcaster
//! enqueues without waiting and closes peers that cannot keep up.
//!
//! ### Per-Session Locking
//! Sessions live behind their own async mutex. The registry map has a separate
//! short-held lock, and the map lock is never held while waiting on a session,
//! so independent games never contend with each other.
//!
//! ### Turn Clocks
//! Every started session gets a lightweight clock task ticking at a fixed
//! granularity. It performs the timeout transition itself when the side to
//! move runs out, and stale ticks that lose the race against a move are
//! rejected by the session.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The per-session state machine: board, seats, spectators, clocks, status.
//!
//! ### Registry Module (`registry`)
//! Session id allocation, lookups, the matchmaking slot and removal.
//!
//! ### Network Module (`network`)
//! TCP accept loop, connection roles and request dispatch.
//!
//! ### Clock, Broadcast and Persistence Modules
//! The turn clock task, message fan-out, and the optional JSON state mirror.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:50004".to_string(),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Binding failures are fatal; everything after is per-connection
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod game;
pub mod network;
pub mod persistence;
pub mod registry;
pub mod utils;
