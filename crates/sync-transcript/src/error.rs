use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(u64),

    #[error("Transcript requires protocol version {required}, supported up to {supported}")]
    ProtocolVersionUnsupported { required: u32, supported: u32 },

    #[error("Message transcript has no renderable content")]
    EmptyMessageTranscript,

    #[error("Recipient update transcript has no recipient states")]
    EmptyRecipientStates,

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Transcript target does not match its kind")]
    TargetKindMismatch,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
