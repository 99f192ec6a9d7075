//! # Tether Protocol
//!
//! Binary wire format for the tether session protocol: an append-only
//! [`Message`] builder, a bounds-checked [`Cursor`] reader, fixed-width
//! identifiers, typed record builders and parsers, and the outer
//! [`Envelope`] applied to every exchange.

#![warn(missing_docs)]

pub mod cursor;
pub mod envelope;
pub mod error;
pub mod id;
pub mod message;
pub mod records;
pub mod wire;

pub use cursor::Cursor;
pub use envelope::{Cipher, Envelope, PlainCipher};
pub use error::ProtocolError;
pub use id::{FileId, SessionId, TaskId, WireId, ID_LEN};
pub use message::Message;
pub use records::{Ack, AckBatch, AckEntry, CheckinInfo, Delegate, TaskRecord, TaskingReply};
