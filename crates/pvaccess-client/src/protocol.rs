//! Wire framing owned by the client core.
//!
//! Every message starts with a fixed 8-byte header:
//!
//! ```text
//! +-------+---------+-------+---------+------------------+
//! | magic | version | flags | command | payload size u32 |
//! +-------+---------+-------+---------+------------------+
//! ```
//!
//! Per-request messages then carry a [`RequestHeader`] (server channel id, request id,
//! QoS byte) and an operation-specific payload. Structured values are encoded by the
//! external structural registry; this module only provides the size and string
//! primitives that frame them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::error::{ClientError, Result};
use crate::qos::QoS;

/// First byte of every message.
pub const MAGIC: u8 = 0xCA;

/// Protocol version written by this client.
pub const PROTOCOL_REVISION: u8 = 1;

/// Message header size in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Flag bit: message was sent by a server.
pub const FLAG_SERVER: u8 = 0x40;

/// Flag bit: payload is big-endian.
pub const FLAG_BIG_ENDIAN: u8 = 0x80;

const SIZE_NULL: u8 = 0xFF;
const SIZE_LARGE: u8 = 0xFE;

/// Message command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Create channel request / response.
    CreateChannel = 7,
    /// Destroy channel request / response.
    DestroyChannel = 8,
    /// Channel get.
    Get = 10,
    /// Channel put.
    Put = 11,
    /// Channel put-get.
    PutGet = 12,
    /// Channel monitor.
    Monitor = 13,
    /// Channel array.
    Array = 14,
    /// Release a request's server-side state.
    DestroyRequest = 15,
    /// Channel process.
    Process = 16,
    /// Introspection of a channel field.
    GetField = 17,
    /// Channel RPC.
    Rpc = 20,
}

impl TryFrom<u8> for Command {
    type Error = ClientError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            7 => Command::CreateChannel,
            8 => Command::DestroyChannel,
            10 => Command::Get,
            11 => Command::Put,
            12 => Command::PutGet,
            13 => Command::Monitor,
            14 => Command::Array,
            15 => Command::DestroyRequest,
            16 => Command::Process,
            17 => Command::GetField,
            20 => Command::Rpc,
            other => return Err(ClientError::UnknownCommand(other)),
        })
    }
}

/// Fixed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol version of the sender.
    pub version: u8,
    /// Flag bits.
    pub flags: u8,
    /// Command.
    pub command: Command,
    /// Bytes of payload following the header.
    pub payload_size: u32,
}

impl MessageHeader {
    /// Header for a client-originated, big-endian message.
    pub fn client(command: Command, payload_size: u32) -> Self {
        Self {
            version: PROTOCOL_REVISION,
            flags: FLAG_BIG_ENDIAN,
            command,
            payload_size,
        }
    }

    /// Header for a server-originated, big-endian message.
    pub fn server(command: Command, payload_size: u32) -> Self {
        Self {
            version: PROTOCOL_REVISION,
            flags: FLAG_BIG_ENDIAN | FLAG_SERVER,
            command,
            payload_size,
        }
    }

    /// Returns true if the server direction flag is set.
    pub fn is_from_server(&self) -> bool {
        self.flags & FLAG_SERVER != 0
    }

    /// Serializes the header.
    pub fn write<B: BufMut + ?Sized>(&self, buf: &mut B) {
        buf.put_u8(MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u8(self.command as u8);
        buf.put_u32(self.payload_size);
    }

    /// Parses a header, consuming [`MESSAGE_HEADER_SIZE`] bytes.
    pub fn parse<B: Buf + ?Sized>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, MESSAGE_HEADER_SIZE)?;
        let magic = buf.get_u8();
        if magic != MAGIC {
            return Err(ClientError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = buf.get_u8();
        let flags = buf.get_u8();
        let command = Command::try_from(buf.get_u8())?;
        let payload_size = buf.get_u32();
        Ok(Self {
            version,
            flags,
            command,
            payload_size,
        })
    }
}

/// Header of a per-request client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Server-assigned channel id.
    pub server_channel_id: u32,
    /// Request id.
    pub ioid: u32,
    /// Lifecycle phase of this message.
    pub qos: QoS,
}

impl RequestHeader {
    /// Serialized size.
    pub const SIZE: usize = 9;

    /// Serializes the header.
    pub fn write<B: BufMut + ?Sized>(&self, buf: &mut B) {
        buf.put_u32(self.server_channel_id);
        buf.put_u32(self.ioid);
        buf.put_u8(self.qos.bits());
    }

    /// Parses the header.
    pub fn parse<B: Buf + ?Sized>(buf: &mut B) -> Result<Self> {
        ensure_remaining(buf, Self::SIZE)?;
        Ok(Self {
            server_channel_id: buf.get_u32(),
            ioid: buf.get_u32(),
            qos: QoS::from_bits(buf.get_u8()),
        })
    }
}

/// Payload size field of a buffered header, read without validating the rest.
fn frame_payload_size(header: &[u8]) -> u32 {
    u32::from_be_bytes([header[4], header[5], header[6], header[7]])
}

/// Fails with [`ClientError::BufferUnderflow`] unless `needed` bytes remain.
pub fn ensure_remaining<B: Buf + ?Sized>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ClientError::BufferUnderflow {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

/// Reads a byte.
pub fn get_u8<B: Buf + ?Sized>(buf: &mut B) -> Result<u8> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

/// Reads a big-endian u32.
pub fn get_u32<B: Buf + ?Sized>(buf: &mut B) -> Result<u32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32())
}

/// Reads a big-endian u64.
pub fn get_u64<B: Buf + ?Sized>(buf: &mut B) -> Result<u64> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_u64())
}

/// Writes a size using the compact encoding.
pub fn write_size<B: BufMut + ?Sized>(buf: &mut B, size: usize) {
    if size < SIZE_LARGE as usize {
        buf.put_u8(size as u8);
    } else {
        buf.put_u8(SIZE_LARGE);
        buf.put_i32(i32::try_from(size).unwrap_or(i32::MAX));
    }
}

/// Writes the null size marker.
pub fn write_null_size<B: BufMut + ?Sized>(buf: &mut B) {
    buf.put_u8(SIZE_NULL);
}

/// Reads a size; `None` is the null marker.
pub fn read_size<B: Buf + ?Sized>(buf: &mut B) -> Result<Option<usize>> {
    match get_u8(buf)? {
        SIZE_NULL => Ok(None),
        SIZE_LARGE => {
            ensure_remaining(buf, 4)?;
            let size = buf.get_i32();
            if size < 0 {
                return Err(ClientError::InvalidSize(size));
            }
            Ok(Some(size as usize))
        }
        small => Ok(Some(small as usize)),
    }
}

/// Writes a size-prefixed UTF-8 string.
pub fn write_string<B: BufMut + ?Sized>(buf: &mut B, value: &str) {
    write_size(buf, value.len());
    buf.put_slice(value.as_bytes());
}

/// Reads a size-prefixed UTF-8 string. A null string reads as empty.
pub fn read_string<B: Buf + ?Sized>(buf: &mut B) -> Result<String> {
    let len = match read_size(buf)? {
        Some(len) => len,
        None => return Ok(String::new()),
    };
    ensure_remaining(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(String::from_utf8(bytes)?)
}

/// Send control handed to every [`crate::TransportSender`].
///
/// Senders call [`MessageWriter::start_message`] and then append their payload to
/// [`MessageWriter::buffer`]. Payload sizes are patched into the headers when the next
/// message starts or the writer is finished.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
    current_start: Option<usize>,
    messages: usize,
    flush_requested: bool,
}

impl MessageWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the current message (if any) and starts a new one.
    pub fn start_message(&mut self, command: Command) {
        self.end_message();
        self.current_start = Some(self.buf.len());
        MessageHeader::client(command, 0).write(&mut self.buf);
        self.messages += 1;
    }

    /// Buffer receiving the current message's payload.
    pub fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Closes the current message and asks the transport to send without delay.
    pub fn flush(&mut self, last: bool) {
        self.end_message();
        if last {
            self.flush_requested = true;
        }
    }

    /// Returns true if a sender asked for an immediate flush.
    pub fn flush_requested(&self) -> bool {
        self.flush_requested
    }

    /// Number of messages started so far.
    pub fn message_count(&self) -> usize {
        self.messages
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Closes the current message and returns all framed bytes.
    pub fn finish(mut self) -> Bytes {
        self.end_message();
        self.buf.freeze()
    }

    fn end_message(&mut self) {
        if let Some(start) = self.current_start.take() {
            let payload = self.buf.len() - start - MESSAGE_HEADER_SIZE;
            let size = u32::try_from(payload).unwrap_or(u32::MAX).to_be_bytes();
            self.buf[start + 4..start + MESSAGE_HEADER_SIZE].copy_from_slice(&size);
        }
    }
}

/// Splits a received byte stream into messages.
#[derive(Debug, Default)]
pub struct MessageReader {
    buf: BytesMut,
}

impl MessageReader {
    /// Creates an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete message, or `None` if more bytes are needed.
    /// Complete frames carrying a command this client does not know are
    /// discarded whole.
    pub fn next_message(&mut self) -> Result<Option<(MessageHeader, Bytes)>> {
        loop {
            if self.buf.len() < MESSAGE_HEADER_SIZE {
                return Ok(None);
            }
            let total = MESSAGE_HEADER_SIZE + frame_payload_size(&self.buf) as usize;
            let header = match MessageHeader::parse(&mut &self.buf[..MESSAGE_HEADER_SIZE]) {
                Ok(header) => header,
                Err(ClientError::UnknownCommand(command)) => {
                    if self.buf.len() < total {
                        return Ok(None);
                    }
                    warn!(command, size = total, "skipping message with unknown command");
                    self.buf.advance(total);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.buf.len() < total {
                return Ok(None);
            }
            self.buf.advance(MESSAGE_HEADER_SIZE);
            let payload = self.buf.split_to(header.payload_size as usize).freeze();
            return Ok(Some((header, payload)));
        }
    }

    /// Bytes buffered but not yet returned.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}
