//! Fixed-width identifiers carried on the wire

use crate::ProtocolError;
use std::fmt;
use uuid::Uuid;

/// Width of every session, task and file identifier on the wire
pub const ID_LEN: usize = 36;

/// A 36-byte textual identifier (session, task or file id).
///
/// The controller hands these out as hyphenated UUID text. The bytes are
/// kept verbatim so that an identifier read off the wire is written back
/// bit-for-bit, whatever its letter case.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireId([u8; ID_LEN]);

/// Identifier of this agent's (or a pivoted peer's) session
pub type SessionId = WireId;
/// Identifier of a controller task
pub type TaskId = WireId;
/// Identifier the controller assigns to a transferred file
pub type FileId = WireId;

impl WireId {
    /// All-zero identifier used by the controller for pseudo tasks
    pub const NIL: Self = Self(*b"00000000-0000-0000-0000-000000000000");

    /// Build from raw wire bytes, rejecting non-printable content
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: [u8; ID_LEN] = bytes.try_into().map_err(|_| ProtocolError::InvalidIdentifier)?;
        if !raw.iter().all(|b| b.is_ascii_graphic()) {
            return Err(ProtocolError::InvalidIdentifier);
        }
        Ok(Self(raw))
    }

    /// Generate a fresh random identifier
    pub fn random() -> Self {
        Self::from(Uuid::new_v4())
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Identifier as text
    pub fn as_str(&self) -> &str {
        // Construction guarantees printable ASCII.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl From<Uuid> for WireId {
    fn from(uuid: Uuid) -> Self {
        let mut raw = [0u8; ID_LEN];
        uuid.hyphenated().encode_lower(&mut raw);
        Self(raw)
    }
}

impl std::str::FromStr for WireId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(s.as_bytes())
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireId({})", self.as_str())
    }
}
