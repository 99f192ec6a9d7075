//! Outbound message builder

use crate::{ProtocolError, WireId};
use bytes::Bytes;
use std::fmt;
use zeroize::Zeroize;

/// An append-only binary message.
///
/// Fields are appended in wire order. Every append reserves space with a
/// fallible allocation first, so a failed append leaves the buffer
/// untouched and reports [`ProtocolError::AllocationFailure`]; callers
/// propagate that with `?` and drop the message rather than send it.
/// The buffer is zeroed when the message is dropped.
pub struct Message {
    /// Encoded bytes
    buf: Vec<u8>,
    /// Included in a batch that is awaiting acknowledgement
    sent: bool,
}

impl Message {
    /// Create an empty message
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            sent: false,
        }
    }

    /// Create a message that starts with a record kind byte
    pub fn with_kind(kind: u8) -> Result<Self, ProtocolError> {
        let mut message = Self::new();
        message.add_u8(kind)?;
        Ok(message)
    }

    /// Create a top-level request: session id followed by a kind byte
    pub fn with_session(session: &WireId, kind: u8) -> Result<Self, ProtocolError> {
        let mut message = Self::new();
        message.add_id(session)?.add_u8(kind)?;
        Ok(message)
    }

    fn reserve(&mut self, additional: usize) -> Result<(), ProtocolError> {
        self.buf
            .try_reserve(additional)
            .map_err(|_| ProtocolError::AllocationFailure)
    }

    fn prefix_len(len: usize) -> Result<u32, ProtocolError> {
        u32::try_from(len).map_err(|_| ProtocolError::FieldTooLarge { size: len })
    }

    /// Append one byte
    pub fn add_u8(&mut self, value: u8) -> Result<&mut Self, ProtocolError> {
        self.reserve(1)?;
        self.buf.push(value);
        Ok(self)
    }

    /// Append a 16-bit integer in host (little-endian) order
    pub fn add_u16(&mut self, value: u16) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(&value.to_le_bytes())
    }

    /// Append a big-endian 32-bit integer
    pub fn add_u32(&mut self, value: u32) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(&value.to_be_bytes())
    }

    /// Append a little-endian 32-bit integer (legacy address records only)
    pub fn add_u32_le(&mut self, value: u32) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(&value.to_le_bytes())
    }

    /// Append a big-endian 64-bit integer
    pub fn add_u64(&mut self, value: u64) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(&value.to_be_bytes())
    }

    /// Append raw bytes without a length prefix
    pub fn add_bytes(&mut self, data: &[u8]) -> Result<&mut Self, ProtocolError> {
        self.reserve(data.len())?;
        self.buf.extend_from_slice(data);
        Ok(self)
    }

    /// Append a 32-bit length prefix followed by the bytes
    pub fn add_sized_bytes(&mut self, data: &[u8]) -> Result<&mut Self, ProtocolError> {
        let len = Self::prefix_len(data.len())?;
        self.reserve(4 + data.len())?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(data);
        Ok(self)
    }

    /// Append a 36-byte identifier verbatim
    pub fn add_id(&mut self, id: &WireId) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(id.as_bytes())
    }

    /// Append text without a length prefix
    pub fn add_str(&mut self, text: &str) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(text.as_bytes())
    }

    /// Append length-prefixed text
    pub fn add_sized_str(&mut self, text: &str) -> Result<&mut Self, ProtocolError> {
        self.add_sized_bytes(text.as_bytes())
    }

    /// Append length-prefixed UTF-16LE text; the prefix counts bytes
    pub fn add_sized_wstr(&mut self, text: &str) -> Result<&mut Self, ProtocolError> {
        let mut wide = Vec::new();
        wide.try_reserve(text.len() * 2)
            .map_err(|_| ProtocolError::AllocationFailure)?;
        for unit in text.encode_utf16() {
            wide.extend_from_slice(&unit.to_le_bytes());
        }
        self.add_sized_bytes(&wide)
    }

    /// Append formatted text, length-prefixed when `sized` is set.
    ///
    /// ```
    /// # use tether_proto::Message;
    /// let mut msg = Message::new();
    /// msg.add_fmt(false, format_args!("{}:{}", "host", 443)).unwrap();
    /// assert_eq!(msg.as_bytes(), b"host:443");
    /// ```
    pub fn add_fmt(&mut self, sized: bool, args: fmt::Arguments<'_>) -> Result<&mut Self, ProtocolError> {
        let text = fmt::format(args);
        if sized {
            self.add_sized_str(&text)
        } else {
            self.add_str(&text)
        }
    }

    /// Append another message's raw bytes
    pub fn append(&mut self, other: &Message) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(other.as_bytes())
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Copy the encoded bytes out
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    /// Whether the message rides in the batch currently in flight
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Set the in-flight flag
    pub fn set_sent(&mut self, sent: bool) {
        self.sent = sent;
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.buf.len())
            .field("sent", &self.sent)
            .finish()
    }
}
