//! # Chess Arena Client Library
//!
//! A headless client for the chess arena server. It is used by the terminal
//! binary and by the workspace integration tests.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! One framed TCP connection to the server. Incoming messages are read by a
//! background task and handed over a channel, so receiving can be combined
//! with other event sources in `select!`.
//!
//! ### Game Module (`game`)
//! The local mirror of the session: role, last snapshot, result, chat log and
//! locally projected clocks. The server stays authoritative; this state is
//! replaced by every snapshot it sends.
//!
//! ### Input Module (`input`)
//! Parses typed commands (`move e2e4`, `say hi`, `resign`, ...) into protocol
//! requests.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientGameState;
//! use client::network::GameClient;
//! use shared::{ClientMessage, Identity};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = GameClient::connect("127.0.0.1:50004").await?;
//!     let mut state = ClientGameState::new();
//!
//!     client
//!         .send(&ClientMessage::CreateSession {
//!             identity: Identity::new("p1", "alice"),
//!             time_limit_secs: Some(300),
//!         })
//!         .await?;
//!
//!     while let Some(message) = client.recv().await {
//!         if let Some(line) = state.apply(message) {
//!             println!("{}", line);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
