use crate::audio::SessionState;
use thiserror::Error;

/// Errors surfaced by the capture pipeline
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Permission denied, no input device, or the device refused to open a stream
    #[error("microphone access unavailable: {0}")]
    DeviceUnavailable(String),
    /// An operation was invoked in a state that does not support it
    #[error("cannot {operation} a recording session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;
