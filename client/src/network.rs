//! Client network layer
//!
//! `GameClient` owns one TCP connection to the server. A background task reads
//! frames and hands decoded messages over a channel, so `recv` can sit inside
//! a `select!` next to user input without losing half-read frames.

use log::{debug, warn};
use shared::framing::{decode, read_frame, send_message, write_frame};
use shared::{ClientMessage, ServerMessage};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

pub struct GameClient {
    writer: OwnedWriteHalf,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
    reader_task: JoinHandle<()>,
    server_addr: SocketAddr,
}

impl GameClient {
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let server_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        let (tx, incoming) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_messages(reader, tx));
        debug!("Connected to {}", server_addr);

        Ok(GameClient {
            writer,
            incoming,
            reader_task,
            server_addr,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub async fn send(&mut self, message: &ClientMessage) -> io::Result<()> {
        send_message(&mut self.writer, message).await
    }

    /// Writes an arbitrary payload as one frame, bypassing encoding
    pub async fn send_raw(&mut self, payload: &[u8]) -> io::Result<()> {
        write_frame(&mut self.writer, payload).await
    }

    /// Next message from the server, or None once the connection is gone
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.incoming.recv().await
    }

    pub async fn recv_timeout(&mut self, limit: Duration) -> Option<ServerMessage> {
        timeout(limit, self.incoming.recv()).await.ok().flatten()
    }

    /// Skips messages until one matches `accept`, giving up after `limit`
    pub async fn recv_until<F>(&mut self, limit: Duration, mut accept: F) -> Option<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = self.recv_timeout(remaining).await?;
            if accept(&message) {
                return Some(message);
            }
        }
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_messages(mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<ServerMessage>) {
    loop {
        let payload = match read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("Server closed the connection");
                break;
            }
            Err(e) => {
                warn!("Error reading from server: {}", e);
                break;
            }
        };

        match decode::<ServerMessage>(&payload) {
            Ok(message) => {
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Ignoring undecodable message from server: {}", e),
        }
    }
}
