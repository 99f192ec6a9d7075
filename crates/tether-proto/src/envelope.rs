//! Outer framing of every exchange with the controller
//!
//! An outbound message is sent as `base64(session ‖ encrypt(body))`. The
//! reply carries the same layout; its session prefix must match ours
//! before the body is decrypted.

use crate::{Message, ProtocolError, SessionId, WireId, ID_LEN};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;

/// Symmetric transform applied to message bodies
pub trait Cipher: Send + Sync {
    /// Encrypt an outbound body
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, ProtocolError>;

    /// Decrypt an inbound body
    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// Identity cipher for sessions running without encryption
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCipher;

impl Cipher for PlainCipher {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(plain.to_vec())
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(sealed.to_vec())
    }
}

/// Seals outbound messages and opens replies
pub struct Envelope {
    cipher: Box<dyn Cipher>,
}

impl Envelope {
    /// Create an envelope around a cipher
    pub fn new(cipher: Box<dyn Cipher>) -> Self {
        Self { cipher }
    }

    /// Envelope that leaves bodies in the clear
    pub fn plain() -> Self {
        Self::new(Box::new(PlainCipher))
    }

    /// Encode a message that starts with its session prefix
    pub fn seal(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        let bytes = message.as_bytes();
        if bytes.len() < ID_LEN {
            return Err(ProtocolError::MalformedRecord("message has no session prefix"));
        }
        let (prefix, body) = bytes.split_at(ID_LEN);
        let sealed = self.cipher.encrypt(body)?;

        let mut framed = Vec::new();
        framed
            .try_reserve(ID_LEN + sealed.len())
            .map_err(|_| ProtocolError::AllocationFailure)?;
        framed.extend_from_slice(prefix);
        framed.extend_from_slice(&sealed);
        Ok(Bytes::from(STANDARD.encode(framed)))
    }

    /// Decode a reply, check it is addressed to `session` and decrypt it
    pub fn open(&self, reply: &[u8], session: &SessionId) -> Result<Vec<u8>, ProtocolError> {
        let raw = STANDARD
            .decode(trim_ascii(reply))
            .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
        if raw.len() < ID_LEN {
            return Err(ProtocolError::TruncatedInput {
                needed: ID_LEN,
                remaining: raw.len(),
            });
        }
        let (prefix, body) = raw.split_at(ID_LEN);
        if prefix != session.as_bytes() {
            return Err(ProtocolError::IdentityMismatch {
                expected: session.to_string(),
                received: WireId::from_slice(prefix)
                    .map(|id| id.to_string())
                    .unwrap_or_else(|_| String::from_utf8_lossy(prefix).into_owned()),
            });
        }
        self.cipher.decrypt(body)
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope").finish_non_exhaustive()
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}
