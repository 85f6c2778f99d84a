use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by duplex-core.
#[derive(Debug, Error)]
pub enum DuplexError {
    #[error("engine initialization failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("unsupported on this system: {0}")]
    Capability(String),

    #[error("engine runtime error: {0}")]
    Runtime(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoOutputDevice,

    #[error("component has been destroyed")]
    Destroyed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Microphone acquisition failures, each with a user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("Microphone access denied. Please allow microphone access in system settings.")]
    Denied,

    #[error("No microphone found. Please connect a microphone.")]
    NotFound,

    #[error("Microphone error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, DuplexError>;

/// Coarse error category carried on `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Initialization,
    Permission,
    Capability,
    Runtime,
    Audio,
    Destroyed,
    Internal,
}

/// Serialisable snapshot of an error, published on event hubs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl DuplexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DuplexError::Initialization(_) => ErrorKind::Initialization,
            DuplexError::Permission(_) => ErrorKind::Permission,
            DuplexError::Capability(_) => ErrorKind::Capability,
            DuplexError::Runtime(_) => ErrorKind::Runtime,
            DuplexError::AudioDevice(_)
            | DuplexError::AudioStream(_)
            | DuplexError::NoOutputDevice => ErrorKind::Audio,
            DuplexError::Destroyed => ErrorKind::Destroyed,
            DuplexError::Io(_) | DuplexError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<&DuplexError> for ErrorReport {
    fn from(err: &DuplexError) -> Self {
        err.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_keep_user_facing_message() {
        let err = DuplexError::from(PermissionError::NotFound);
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(
            err.to_string(),
            "No microphone found. Please connect a microphone."
        );
    }

    #[test]
    fn report_serializes_lowercase_kind() {
        let report = DuplexError::Initialization("model missing".into()).report();
        let json = serde_json::to_value(&report).expect("serialize report");
        assert_eq!(json["kind"], "initialization");
        assert_eq!(json["message"], "engine initialization failed: model missing");
    }
}
