//! Best-effort JSON mirror of live sessions
//!
//! A single background task owns the mirror file. Session code only pushes
//! commands onto an unbounded channel, so a slow or failing disk never holds
//! up a transition. The file is rewritten in full on every change, first to a
//! temporary sibling and then renamed over the real path.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shared::{SessionId, SessionStatus, Snapshot};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorPlayers {
    pub white: Option<String>,
    pub black: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorState {
    pub board: String,
    pub current_player: String,
    pub players: MirrorPlayers,
    pub status: String,
    pub game_over: bool,
    pub winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub game_id: SessionId,
    pub state: MirrorState,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorFile {
    pub games: Vec<MirrorEntry>,
}

impl From<&Snapshot> for MirrorState {
    fn from(snapshot: &Snapshot) -> Self {
        let status = match snapshot.status {
            SessionStatus::AwaitingOpponent => "waiting",
            SessionStatus::InProgress => "active",
            SessionStatus::Finished => "finished",
        };
        MirrorState {
            board: snapshot.board.clone(),
            current_player: snapshot.side_to_move.to_string(),
            players: MirrorPlayers {
                white: snapshot.white.clone(),
                black: snapshot.black.clone(),
            },
            status: status.to_string(),
            game_over: snapshot.is_game_over(),
            winner: snapshot.winner.map(|w| w.to_string()),
        }
    }
}

#[derive(Debug)]
enum MirrorCommand {
    Record(MirrorEntry),
    Forget(SessionId),
}

/// Cheap handle for pushing updates to the mirror task
#[derive(Debug, Clone)]
pub struct StateMirror {
    commands: mpsc::UnboundedSender<MirrorCommand>,
}

impl StateMirror {
    /// Starts the writer task for `path`
    pub fn spawn(path: PathBuf) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_mirror(path, receiver));
        (Self { commands }, handle)
    }

    pub fn record(&self, snapshot: &Snapshot) {
        let entry = MirrorEntry {
            game_id: snapshot.session_id.clone(),
            state: MirrorState::from(snapshot),
        };
        if self.commands.send(MirrorCommand::Record(entry)).is_err() {
            debug!("State mirror has stopped; dropping update");
        }
    }

    pub fn forget(&self, session_id: &str) {
        if self.commands.send(MirrorCommand::Forget(session_id.to_string())).is_err() {
            debug!("State mirror has stopped; dropping removal");
        }
    }
}

async fn run_mirror(path: PathBuf, mut receiver: mpsc::UnboundedReceiver<MirrorCommand>) {
    let mut games: BTreeMap<SessionId, MirrorEntry> = BTreeMap::new();

    while let Some(command) = receiver.recv().await {
        apply(&mut games, command);
        // Coalesce whatever else is already queued into one write
        while let Ok(command) = receiver.try_recv() {
            apply(&mut games, command);
        }

        let file = MirrorFile {
            games: games.values().cloned().collect(),
        };
        if let Err(e) = write_mirror(&path, &file).await {
            warn!("Failed to write state mirror {}: {}", path.display(), e);
        }
    }
    debug!("State mirror for {} stopped", path.display());
}

fn apply(games: &mut BTreeMap<SessionId, MirrorEntry>, command: MirrorCommand) {
    match command {
        MirrorCommand::Record(entry) => {
            games.insert(entry.game_id.clone(), entry);
        }
        MirrorCommand::Forget(id) => {
            games.remove(&id);
        }
    }
}

async fn write_mirror(path: &Path, file: &MirrorFile) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(file)?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    tokio::fs::write(&temp, json).await?;
    tokio::fs::rename(&temp, path).await
}

/// Reads a mirror file back, mainly for inspection and tests
pub async fn load_mirror(path: &Path) -> std::io::Result<MirrorFile> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
