use std::time::Duration;

use jobwire_core::{CorrelationId, DecodeError, EncodeError};

/// Why an invocation (or a connection operation) did not produce a result.
///
/// `Clone` so that a single transport failure can be handed to every
/// pending invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    /// The request could not be encoded. A caller bug; not retried.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodeError),

    /// The response frame for this invocation was malformed.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// The connection is not open.
    #[error("Not connected")]
    NotConnected,

    /// Transport-level failure while opening, sending or receiving.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection closed while the invocation was pending.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The worker reported `status: error`. Holds its message verbatim.
    #[error("{0}")]
    Job(String),

    /// No response arrived within the configured invoke timeout.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The registry already holds an invocation with this id.
    #[error("Duplicate correlation id {0}")]
    DuplicateCorrelation(CorrelationId),
}

impl From<DecodeError> for InvokeError {
    fn from(e: DecodeError) -> Self {
        Self::Decoding(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for InvokeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}
