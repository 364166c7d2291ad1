//! Error taxonomy shared by the channel, the agent and the client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PilotError>;

#[derive(Debug, Clone, Error)]
pub enum PilotError {
    #[error("Channel disconnected")]
    Disconnected,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Target vanished: {0}")]
    TargetVanished(String),

    #[error("Failed to attach instrumentation to {target_id} after {attempts} attempt(s)")]
    AttachFailed { target_id: String, attempts: u32 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Machine-readable error kind carried on the wire as `errorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Disconnected,
    Timeout,
    TargetVanished,
    AttachFailed,
    InvalidParameter,
    CommandFailed,
    UnknownCommand,
    Transport,
    Serialization,
}

impl PilotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PilotError::Disconnected => ErrorKind::Disconnected,
            PilotError::Timeout(_) => ErrorKind::Timeout,
            PilotError::TargetVanished(_) => ErrorKind::TargetVanished,
            PilotError::AttachFailed { .. } => ErrorKind::AttachFailed,
            PilotError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            PilotError::CommandFailed(_) => ErrorKind::CommandFailed,
            PilotError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            PilotError::Transport(_) => ErrorKind::Transport,
            PilotError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Rebuild an error from a kind and message received over the wire.
    pub fn from_wire(kind: Option<ErrorKind>, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            Some(ErrorKind::Disconnected) => PilotError::Disconnected,
            Some(ErrorKind::Timeout) => PilotError::Timeout(message),
            Some(ErrorKind::TargetVanished) => PilotError::TargetVanished(message),
            Some(ErrorKind::AttachFailed) => PilotError::AttachFailed {
                target_id: message,
                attempts: 0,
            },
            Some(ErrorKind::InvalidParameter) => PilotError::InvalidParameter(message),
            Some(ErrorKind::UnknownCommand) => PilotError::UnknownCommand(message),
            Some(ErrorKind::Transport) => PilotError::Transport(message),
            Some(ErrorKind::Serialization) => PilotError::Serialization(message),
            Some(ErrorKind::CommandFailed) | None => PilotError::CommandFailed(message),
        }
    }
}

impl From<serde_json::Error> for PilotError {
    fn from(e: serde_json::Error) -> Self {
        PilotError::Serialization(e.to_string())
    }
}
