//! Error types for the live-game server.

use crate::connection::ConnectionId;
use crate::session_store::SessionId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("player name already taken: {0}")]
    DuplicateName(String),
    #[error("player not found: {0}")]
    PlayerNotFound(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

/// Failures of quiz evaluation. Display text is safe to show to players.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("Cannot find session")]
    SessionNotFound(SessionId),
    #[error("Session is expired")]
    SessionExpired(SessionId),
    #[error("Cannot find problem with Id {0}")]
    ProblemNotFound(Uuid),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("connection manager is not running")]
    Stopped,
}

/// Reasons a connection attempt is turned away. The display text becomes the
/// content of the error frame sent before the socket is closed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Invalid name")]
    InvalidName(String),
    #[error("Failed to add player to game store")]
    DuplicateName(String),
    #[error("Failed to register connection")]
    Registration(#[from] ManagerError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("write timed out")]
    WriteTimeout,
    #[error("transport error: {0}")]
    Io(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("outbound queue capacity must be at least 1")]
    ZeroCapacity,
    #[error("ping interval ({ping:?}) must be shorter than the idle timeout ({idle:?})")]
    PingSlowerThanIdle {
        ping: std::time::Duration,
        idle: std::time::Duration,
    },
    #[error("duration out of range: {0:?}")]
    DurationOutOfRange(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
