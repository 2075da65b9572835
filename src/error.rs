use std::io;
use thiserror::Error;

/// Errors produced by the push-transfer core.
///
/// Stream-level variants (`SendFailure`, `ReceiveFailure`, `Rejected`) end
/// the one connection they occurred on. `Metadata` is per archive entry and
/// never aborts enumeration of the remaining entries.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Rejected by server (code {code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Failed to send chunk to client {client_id}: {reason}")]
    SendFailure { client_id: String, reason: String },

    #[error("Failed to receive chunk: {0}")]
    ReceiveFailure(String),

    #[error("Failed to decode archive: {0}")]
    Decode(String),

    #[error("Invalid metadata in {entry}: {reason}")]
    Metadata { entry: String, reason: String },

    #[error("Transfer to client {client_id} timed out after {secs}s")]
    Timeout { client_id: String, secs: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PushError {
    /// Whether the error means the peer's stream is no longer usable.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            PushError::SendFailure { .. }
                | PushError::ReceiveFailure(_)
                | PushError::Rejected { .. }
                | PushError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PushError>;
