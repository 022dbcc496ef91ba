use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed error taxonomy produced at the point of detection. Collaborators
/// branch on the kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DevicePermissionDenied,
    DeviceNotFound,
    UserCancelled,
    NetworkOrTransport,
    Configuration,
    Unknown,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkOrTransport, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
