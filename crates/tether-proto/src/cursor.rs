//! Bounds-checked sequential reader over untrusted bytes

use crate::{ProtocolError, WireId, ID_LEN};
use bytes::Bytes;

/// Read-only view over a byte slice with a forward-moving offset.
///
/// Every read checks the remaining length first. A read that would run
/// past the end returns [`ProtocolError::TruncatedInput`] and leaves the
/// offset where it was.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Start reading at the beginning of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether all bytes have been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrow the unread tail without consuming it
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(ProtocolError::TruncatedInput { needed: n, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian 32-bit integer
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    /// Read a little-endian 32-bit integer
    pub fn read_u32_le(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read a host-order (little-endian) 16-bit integer
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Read a big-endian 64-bit integer
    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    /// Borrow exactly `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(n)
    }

    /// Borrow a length-prefixed byte field.
    ///
    /// The returned slice's length is the decoded prefix. The prefix and
    /// the body are consumed together: if the body is short, neither is.
    pub fn read_sized_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        match self.take(len) {
            Ok(slice) => Ok(slice),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    /// Borrow length-prefixed UTF-8 text
    pub fn read_string(&mut self) -> Result<&'a str, ProtocolError> {
        let start = self.pos;
        let raw = self.read_sized_bytes()?;
        std::str::from_utf8(raw).map_err(|e| {
            self.pos = start;
            ProtocolError::InvalidEncoding(e.to_string())
        })
    }

    /// Copy a length-prefixed byte field out of the buffer
    pub fn read_sized_bytes_owned(&mut self) -> Result<Bytes, ProtocolError> {
        self.read_sized_bytes().map(Bytes::copy_from_slice)
    }

    /// Copy length-prefixed text out of the buffer
    pub fn read_string_owned(&mut self) -> Result<String, ProtocolError> {
        self.read_string().map(str::to_owned)
    }

    /// Read a raw 36-byte identifier
    pub fn read_id(&mut self) -> Result<WireId, ProtocolError> {
        let start = self.pos;
        let raw = self.take(ID_LEN)?;
        WireId::from_slice(raw).inspect_err(|_| self.pos = start)
    }

    /// Read a length-prefixed identifier
    pub fn read_sized_id(&mut self) -> Result<WireId, ProtocolError> {
        let start = self.pos;
        let raw = self.read_sized_bytes()?;
        WireId::from_slice(raw).inspect_err(|_| self.pos = start)
    }

    /// Consume everything that is left
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.rest();
        self.pos = self.buf.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use proptest::prelude::*;

    #[test]
    fn test_sequential_reads() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x02, 0xFF];
        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.read_u8().unwrap(), 1);
        assert_eq!(cursor.read_u32().unwrap(), 2);
        assert_eq!(cursor.read_u8().unwrap(), 0xFF);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_truncated_read_keeps_offset() {
        let data = [0x00, 0x00, 0x00];
        let mut cursor = Cursor::new(&data);
        let err = cursor.read_u32().unwrap_err();
        assert_eq!(err, ProtocolError::TruncatedInput { needed: 4, remaining: 3 });
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_sized_read_with_short_body_keeps_offset() {
        // Prefix claims 10 bytes, only 2 follow.
        let data = [0x00, 0x00, 0x00, 0x0A, 0x01, 0x02];
        let mut cursor = Cursor::new(&data);
        assert!(cursor.read_sized_bytes().unwrap_err().is_truncated());
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.remaining(), 6);
    }

    #[test]
    fn test_huge_prefix_is_truncated_not_panic() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        let mut cursor = Cursor::new(&data);
        assert!(cursor.read_sized_bytes().unwrap_err().is_truncated());
    }

    #[test]
    fn test_invalid_utf8_string() {
        let data = [0x00, 0x00, 0x00, 0x01, 0xC3];
        let mut cursor = Cursor::new(&data);
        assert!(matches!(cursor.read_string(), Err(ProtocolError::InvalidEncoding(_))));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_ids() {
        let id = WireId::random();
        let mut msg = Message::new();
        msg.add_id(&id).unwrap().add_sized_bytes(id.as_bytes()).unwrap();

        let mut cursor = Cursor::new(msg.as_bytes());
        assert_eq!(cursor.read_id().unwrap(), id);
        assert_eq!(cursor.read_sized_id().unwrap(), id);
    }

    #[test]
    fn test_owned_copies_outlive_buffer() {
        let owned = {
            let mut msg = Message::new();
            msg.add_sized_str("hello").unwrap();
            let mut cursor = Cursor::new(msg.as_bytes());
            cursor.read_string_owned().unwrap()
        };
        assert_eq!(owned, "hello");
    }

    #[derive(Debug, Clone)]
    enum Field {
        Byte(u8),
        Short(u16),
        Int(u32),
        IntLe(u32),
        Long(u64),
        Blob(Vec<u8>),
        Text(String),
    }

    fn field() -> impl Strategy<Value = Field> {
        prop_oneof![
            any::<u8>().prop_map(Field::Byte),
            any::<u16>().prop_map(Field::Short),
            any::<u32>().prop_map(Field::Int),
            any::<u32>().prop_map(Field::IntLe),
            any::<u64>().prop_map(Field::Long),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(Field::Blob),
            ".{0,32}".prop_map(Field::Text),
        ]
    }

    proptest! {
        #[test]
        fn test_append_then_read_yields_same_fields(fields in prop::collection::vec(field(), 0..32)) {
            let mut msg = Message::new();
            for f in &fields {
                match f {
                    Field::Byte(v) => { msg.add_u8(*v).unwrap(); }
                    Field::Short(v) => { msg.add_u16(*v).unwrap(); }
                    Field::Int(v) => { msg.add_u32(*v).unwrap(); }
                    Field::IntLe(v) => { msg.add_u32_le(*v).unwrap(); }
                    Field::Long(v) => { msg.add_u64(*v).unwrap(); }
                    Field::Blob(v) => { msg.add_sized_bytes(v).unwrap(); }
                    Field::Text(v) => { msg.add_sized_str(v).unwrap(); }
                }
            }

            let mut cursor = Cursor::new(msg.as_bytes());
            for f in &fields {
                match f {
                    Field::Byte(v) => prop_assert_eq!(cursor.read_u8().unwrap(), *v),
                    Field::Short(v) => prop_assert_eq!(cursor.read_u16().unwrap(), *v),
                    Field::Int(v) => prop_assert_eq!(cursor.read_u32().unwrap(), *v),
                    Field::IntLe(v) => prop_assert_eq!(cursor.read_u32_le().unwrap(), *v),
                    Field::Long(v) => prop_assert_eq!(cursor.read_u64().unwrap(), *v),
                    Field::Blob(v) => prop_assert_eq!(cursor.read_sized_bytes().unwrap(), v.as_slice()),
                    Field::Text(v) => prop_assert_eq!(cursor.read_string().unwrap(), v.as_str()),
                }
            }
            prop_assert!(cursor.is_empty());
        }

        #[test]
        fn test_overlong_read_fails_without_advancing(
            data in prop::collection::vec(any::<u8>(), 0..64),
            skip in 0usize..64,
            extra in 1usize..64,
        ) {
            let mut cursor = Cursor::new(&data);
            let skip = skip.min(data.len());
            cursor.read_bytes(skip).unwrap();
            let before = cursor.position();
            let want = cursor.remaining() + extra;
            let err = cursor.read_bytes(want).unwrap_err();
            prop_assert!(err.is_truncated());
            prop_assert_eq!(cursor.position(), before);
        }
    }
}
