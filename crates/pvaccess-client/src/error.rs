use thiserror::Error;

/// Errors produced by the client core.
///
/// Failures of asynchronous operations are never returned through this type; they
/// reach the application as a [`crate::Status`] on the listener callback.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A decoder ran past the end of the received payload.
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    BufferUnderflow {
        /// Bytes the decoder asked for.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// A size prefix could not be decoded.
    #[error("invalid size encoding: {0}")]
    InvalidSize(i32),

    /// A message carried a command byte this client does not know.
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    /// A status carried an unknown type byte.
    #[error("invalid status type: {0}")]
    InvalidStatusType(u8),

    /// A message header did not start with the protocol magic.
    #[error("invalid magic: expected 0x{expected:02X}, got 0x{got:02X}")]
    InvalidMagic {
        /// Expected magic byte.
        expected: u8,
        /// Received byte.
        got: u8,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid string payload: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// A request descriptor could not be parsed.
    #[error("invalid request descriptor '{request}': {reason}")]
    InvalidRequest {
        /// The offending descriptor text.
        request: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The channel was destroyed.
    #[error("channel {name} destroyed")]
    ChannelDestroyed {
        /// Channel name.
        name: String,
    },

    /// `destroy` was called on a channel that is already destroyed.
    #[error("channel {name} already destroyed")]
    AlreadyDestroyed {
        /// Channel name.
        name: String,
    },

    /// The channel has no connected transport.
    #[error("channel {name} not connected")]
    NotConnected {
        /// Channel name.
        name: String,
    },

    /// A data response arrived before the request's INIT response.
    #[error("request {ioid} not initialized")]
    NotInitialized {
        /// Request id.
        ioid: u32,
    },

    /// The transport refused or failed an operation.
    #[error("transport error: {reason}")]
    Transport {
        /// Failure description.
        reason: String,
    },

    /// The owning context has been dropped.
    #[error("client context is gone")]
    ContextGone,

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {reason}")]
    Config {
        /// Failure description.
        reason: String,
    },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for the client core.
pub type Result<T> = std::result::Result<T, ClientError>;
