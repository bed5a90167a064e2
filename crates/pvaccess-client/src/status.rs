//! Completion status carried by every response and every listener callback.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{ClientError, Result};
use crate::protocol::{get_u8, read_string, write_string};

const OK_MARKER: u8 = 0xFF;

/// Severity of a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusType {
    /// Success.
    Ok = 0,
    /// Success with a warning.
    Warning = 1,
    /// Failure.
    Error = 2,
    /// Unrecoverable failure.
    Fatal = 3,
}

impl StatusType {
    /// Decodes a wire type byte.
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(StatusType::Ok),
            1 => Ok(StatusType::Warning),
            2 => Ok(StatusType::Error),
            3 => Ok(StatusType::Fatal),
            other => Err(ClientError::InvalidStatusType(other)),
        }
    }
}

/// Outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Severity.
    pub kind: StatusType,
    /// Human-readable message, empty for a plain OK.
    pub message: String,
    /// Remote call tree or stack description, usually empty.
    pub call_tree: String,
}

impl Status {
    /// Builds a status with an empty call tree.
    pub fn new(kind: StatusType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            call_tree: String::new(),
        }
    }

    /// Plain success.
    pub fn ok() -> Self {
        Self::new(StatusType::Ok, "")
    }

    /// Builds an error status.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusType::Error, message)
    }

    /// Builds a fatal status.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(StatusType::Fatal, message)
    }

    /// The channel was destroyed while the operation was outstanding.
    pub fn channel_destroyed() -> Self {
        Self::new(StatusType::Warning, "channel destroyed")
    }

    /// The channel lost its transport.
    pub fn channel_disconnected() -> Self {
        Self::new(StatusType::Warning, "channel disconnected")
    }

    /// The channel has no transport to send on.
    pub fn channel_not_connected() -> Self {
        Self::error("channel not connected")
    }

    /// The request was destroyed.
    pub fn request_destroyed() -> Self {
        Self::error("request destroyed")
    }

    /// Another operation on the same request is still outstanding.
    pub fn other_request_pending() -> Self {
        Self::error("other request pending")
    }

    /// The request has not finished its INIT round trip yet.
    pub fn not_initialized() -> Self {
        Self::error("request not initialized")
    }

    /// The transport refused the send.
    pub fn send_failed() -> Self {
        Self::error("failed to send message over network")
    }

    /// True for `Ok` and `Warning`.
    pub fn is_success(&self) -> bool {
        matches!(self.kind, StatusType::Ok | StatusType::Warning)
    }

    /// True only for a plain `Ok`.
    pub fn is_ok(&self) -> bool {
        self.kind == StatusType::Ok
    }

    /// Serializes the status. A plain OK without text takes a single byte.
    pub fn serialize<B: BufMut + ?Sized>(&self, buf: &mut B) {
        if self.is_ok() && self.message.is_empty() && self.call_tree.is_empty() {
            buf.put_u8(OK_MARKER);
            return;
        }
        buf.put_u8(self.kind as u8);
        write_string(buf, &self.message);
        write_string(buf, &self.call_tree);
    }

    /// Deserializes a status.
    pub fn deserialize<B: Buf + ?Sized>(buf: &mut B) -> Result<Self> {
        let marker = get_u8(buf)?;
        if marker == OK_MARKER {
            return Ok(Self::ok());
        }
        let kind = StatusType::from_byte(marker)?;
        let message = read_string(buf)?;
        let call_tree = read_string(buf)?;
        Ok(Self {
            kind,
            message,
            call_tree,
        })
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.message)
        }
    }
}
