use thiserror::Error;

/// Everything that can go wrong while decoding a message, framing a
/// connection, or waiting on a command.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A value or frame was truncated: more bytes were required than the
    /// input (or the declared frame length) provided.
    #[error("unexpected end of message: wanted {wanted} more byte(s), had {available}")]
    UnexpectedEndOfMessage { wanted: usize, available: usize },

    /// The bytes were well-bounded but did not form a valid value (a bad
    /// type tag, a non-primitive element type in an array, a malformed
    /// ASCII-decimal/hex literal, a frame length exceeding the configured
    /// maximum, ...).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// zlib inflation of a compressed payload failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The connection was torn down before this operation could complete.
    #[error("operation cancelled")]
    Cancelled,
}

impl Clone for RelayError {
    /// Only used to fan a single failure out to every other waiter during
    /// teardown. `Io` errors have no meaningful clone, so every variant
    /// other than the one the failure actually originated from collapses
    /// to `Cancelled` -- the original is returned to whichever waiter
    /// observed it first.
    fn clone(&self) -> Self {
        match self {
            RelayError::UnexpectedEndOfMessage { wanted, available } => {
                RelayError::UnexpectedEndOfMessage {
                    wanted: *wanted,
                    available: *available,
                }
            }
            RelayError::InvalidData(msg) => RelayError::InvalidData(msg.clone()),
            RelayError::Decompression(msg) => RelayError::Decompression(msg.clone()),
            RelayError::Io(_) | RelayError::Cancelled => RelayError::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
