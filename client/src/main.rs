use clap::{Parser, Subcommand};
use client::game::ClientGameState;
use client::input::{parse_command, Command, HELP};
use client::network::GameClient;
use log::info;
use rand::Rng;
use shared::{ClientMessage, Identity, DEFAULT_PORT};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Display name shown to opponents and spectators
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Player id; a random one is generated when omitted
    #[arg(long)]
    id: Option<String>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Create a game and wait for someone to join it
    Create {
        /// Per-side time budget in seconds
        #[arg(short, long)]
        time_limit: Option<u64>,
    },
    /// Join a game by id
    Join { session_id: String },
    /// Watch a game by id
    Spectate { session_id: String },
    /// Wait for any opponent
    Lobby,
    /// List open games
    List,
}

impl Mode {
    fn request(self, identity: &Identity) -> ClientMessage {
        match self {
            Mode::Create { time_limit } => ClientMessage::CreateSession {
                identity: identity.clone(),
                time_limit_secs: time_limit,
            },
            Mode::Join { session_id } => ClientMessage::JoinSession {
                identity: identity.clone(),
                session_id: session_id.to_ascii_uppercase(),
            },
            Mode::Spectate { session_id } => ClientMessage::Spectate {
                identity: identity.clone(),
                session_id: session_id.to_ascii_uppercase(),
            },
            Mode::Lobby => ClientMessage::JoinLobby {
                identity: identity.clone(),
            },
            Mode::List => ClientMessage::ListSessions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let id = args
        .id
        .unwrap_or_else(|| format!("player-{:06}", rand::thread_rng().gen_range(0..1_000_000)));
    let identity = Identity::new(id, args.name);

    info!("Connecting to: {}", args.server);
    let mut client = GameClient::connect(&args.server).await?;
    let mut state = ClientGameState::new();
    println!(
        "Connected to {} as {}. Type 'help' for commands.",
        client.server_addr(),
        identity.name
    );

    if let Some(mode) = args.mode {
        client.send(&mode.request(&identity)).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            message = client.recv() => match message {
                Some(message) => {
                    if let Some(line) = state.apply(message) {
                        println!("{}", line);
                    }
                }
                None => {
                    println!("Server closed the connection");
                    break;
                }
            },
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match parse_command(&line, &identity, state.role) {
                    Ok(Some(Command::Send(request))) => client.send(&request).await?,
                    Ok(Some(Command::Show)) => println!("{}", state.status_line(Instant::now())),
                    Ok(Some(Command::Help)) => println!("{}", HELP),
                    Ok(Some(Command::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }
        }
    }

    Ok(())
}
