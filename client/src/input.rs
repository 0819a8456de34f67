//! Typed command parsing for the terminal client

use crate::game::ClientRole;
use shared::{ClientMessage, Identity, SessionId, MAX_CHAT_LEN};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(ClientMessage),
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Unknown command '{0}'; type 'help' for a list")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Chat message is too long (max {} characters)", MAX_CHAT_LEN)]
    ChatTooLong,
}

pub const HELP: &str = "\
Commands:
  create [seconds]   start a new game and wait for an opponent
  join <id>          join a game by id
  spectate <id>      watch a game
  lobby              wait for any opponent
  list               list open games
  move <uci>         play a move, e.g. 'move e2e4' (or just 'e2e4')
  resign             give up the current game
  say <text>         send a chat message
  cancel             leave matchmaking or cancel your unstarted game
  board              show the current position and clocks
  quit               disconnect";

/// Turns one typed line into a command for the current role
pub fn parse_command(
    line: &str,
    identity: &Identity,
    role: ClientRole,
) -> Result<Option<Command>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "board" | "show" => Command::Show,
        "list" | "ls" => Command::Send(ClientMessage::ListSessions),
        "resign" => Command::Send(ClientMessage::Resign),
        "lobby" => Command::Send(ClientMessage::JoinLobby {
            identity: identity.clone(),
        }),
        "create" => {
            let time_limit_secs = match rest {
                "" => None,
                secs => Some(secs.parse().map_err(|_| InputError::Usage("create [seconds]"))?),
            };
            Command::Send(ClientMessage::CreateSession {
                identity: identity.clone(),
                time_limit_secs,
            })
        }
        "join" => Command::Send(ClientMessage::JoinSession {
            identity: identity.clone(),
            session_id: session_arg(rest, "join <id>")?,
        }),
        "spectate" | "watch" => Command::Send(ClientMessage::Spectate {
            identity: identity.clone(),
            session_id: session_arg(rest, "spectate <id>")?,
        }),
        "move" | "m" => {
            if rest.is_empty() || rest.contains(char::is_whitespace) {
                return Err(InputError::Usage("move <uci>"));
            }
            Command::Send(ClientMessage::Move {
                uci: rest.to_ascii_lowercase(),
            })
        }
        "say" | "chat" => {
            if rest.is_empty() {
                return Err(InputError::Usage("say <text>"));
            }
            if rest.chars().count() > MAX_CHAT_LEN {
                return Err(InputError::ChatTooLong);
            }
            Command::Send(ClientMessage::Chat {
                text: rest.to_string(),
                timestamp: None,
            })
        }
        "cancel" => match role {
            ClientRole::Waiting => Command::Send(ClientMessage::CancelWait),
            _ => Command::Send(ClientMessage::CancelSession),
        },
        _ if rest.is_empty() && looks_like_uci(word) => Command::Send(ClientMessage::Move {
            uci: word.to_ascii_lowercase(),
        }),
        _ => return Err(InputError::Unknown(word.to_string())),
    };

    Ok(Some(command))
}

fn session_arg(rest: &str, usage: &'static str) -> Result<SessionId, InputError> {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(InputError::Usage(usage));
    }
    Ok(rest.to_ascii_uppercase())
}

/// Square-to-square notation with an optional promotion piece
fn looks_like_uci(word: &str) -> bool {
    let bytes = word.as_bytes();
    let square = |file: u8, rank: u8| {
        (b'a'..=b'h').contains(&file.to_ascii_lowercase()) && (b'1'..=b'8').contains(&rank)
    };
    match bytes.len() {
        4 => square(bytes[0], bytes[1]) && square(bytes[2], bytes[3]),
        5 => {
            square(bytes[0], bytes[1])
                && square(bytes[2], bytes[3])
                && b"qrbnQRBN".contains(&bytes[4])
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> Identity {
        Identity::new("p1", "alice")
    }

    fn parse(line: &str) -> Result<Option<Command>, InputError> {
        parse_command(line, &me(), ClientRole::Idle)
    }

    #[test]
    fn test_move_forms() {
        let expected = Some(Command::Send(ClientMessage::Move {
            uci: "e2e4".to_string(),
        }));
        assert_eq!(parse("move e2e4"), Ok(expected.clone()));
        assert_eq!(parse("  E2E4 "), Ok(expected));
        assert_eq!(
            parse("e7e8q"),
            Ok(Some(Command::Send(ClientMessage::Move {
                uci: "e7e8q".to_string()
            })))
        );
        assert_eq!(parse("move"), Err(InputError::Usage("move <uci>")));
        assert_eq!(parse("e9e4"), Err(InputError::Unknown("e9e4".to_string())));
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(
            parse("join abc234"),
            Ok(Some(Command::Send(ClientMessage::JoinSession {
                identity: me(),
                session_id: "ABC234".to_string()
            })))
        );
        assert_eq!(
            parse("create 60"),
            Ok(Some(Command::Send(ClientMessage::CreateSession {
                identity: me(),
                time_limit_secs: Some(60)
            })))
        );
        assert_eq!(parse("create soon"), Err(InputError::Usage("create [seconds]")));
        assert_eq!(parse("spectate"), Err(InputError::Usage("spectate <id>")));
    }

    #[test]
    fn test_cancel_depends_on_role() {
        assert_eq!(
            parse_command("cancel", &me(), ClientRole::Waiting),
            Ok(Some(Command::Send(ClientMessage::CancelWait)))
        );
        assert_eq!(
            parse_command("cancel", &me(), ClientRole::Player(shared::Side::White)),
            Ok(Some(Command::Send(ClientMessage::CancelSession)))
        );
    }

    #[test]
    fn test_chat() {
        assert_eq!(
            parse("say hello there"),
            Ok(Some(Command::Send(ClientMessage::Chat {
                text: "hello there".to_string(),
                timestamp: None
            })))
        );
        assert_eq!(parse("say"), Err(InputError::Usage("say <text>")));
        let long = format!("say {}", "x".repeat(MAX_CHAT_LEN + 1));
        assert_eq!(parse(&long), Err(InputError::ChatTooLong));
    }

    #[test]
    fn test_local_commands() {
        assert_eq!(parse(""), Ok(None));
        assert_eq!(parse("help"), Ok(Some(Command::Help)));
        assert_eq!(parse("QUIT"), Ok(Some(Command::Quit)));
        assert_eq!(parse("board"), Ok(Some(Command::Show)));
        assert_eq!(parse("dance"), Err(InputError::Unknown("dance".to_string())));
    }
}
