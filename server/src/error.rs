//! Error taxonomy for the session engine
//!
//! `SessionError` covers rejected requests that leave state untouched and are
//! reported only to the requesting client. `ProtocolError` covers frames that
//! could not be understood. Peer loss is not an error value: it ends the
//! connection and runs the disconnect path instead.

use shared::framing::CodecError;
use shared::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Not your turn")]
    NotYourTurn,
    #[error("Invalid move: {0}")]
    IllegalMove(String),
    #[error("Game is already full")]
    SessionFull,
    #[error("Game {0} not found")]
    NotFound(SessionId),
    #[error("Game is not in progress")]
    NotInProgress,
    #[error("Your clock has run out")]
    ClockExpired,
    #[error("Clock expiry no longer applies")]
    StaleClock,
    #[error("Could not allocate a session id")]
    AllocationFailed,
    #[error("{0}")]
    InvalidRequest(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Codec(#[from] CodecError),
    #[error("{0} is not allowed here")]
    Unexpected(&'static str),
}

/// Anything a single request can fail with; reported back to that client only
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_client_facing() {
        assert_eq!(SessionError::NotYourTurn.to_string(), "Not your turn");
        assert_eq!(SessionError::SessionFull.to_string(), "Game is already full");
        assert_eq!(
            SessionError::NotFound("ABC234".to_string()).to_string(),
            "Game ABC234 not found"
        );
        assert_eq!(
            SessionError::IllegalMove("e2e5".to_string()).to_string(),
            "Invalid move: e2e5"
        );
        assert_eq!(
            ProtocolError::Unexpected("Move").to_string(),
            "Move is not allowed here"
        );
        assert_eq!(
            RequestError::from(SessionError::NotInProgress).to_string(),
            "Game is not in progress"
        );
    }
}
