//! Integration test framework for the tether agent
//!
//! [`MockController`] stands in for the remote controller behind the
//! transport boundary: it opens every envelope, records what the agent
//! posted and answers from scripted replies. [`PeerSockets`] hands out
//! in-memory channels in place of linked peer agents.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_agent::{handlers, AgentConfig, Session};
use tether_proto::wire::{ack, kind, status};
use tether_proto::{Cursor, Envelope, FileId, Message, SessionId, TaskId, TaskRecord, WireId, ID_LEN};
use tether_transport::{
    ChannelConnector, Endpoint, LocalChannel, RequestKind, StreamChannel, Transport, TransportError,
};
use tokio::io::DuplexStream;

/// Id the configuration starts with
pub const PAYLOAD_ID: &str = "00000000-0000-0000-0000-0000000000aa";
/// Id the controller assigns at checkin
pub const ASSIGNED_ID: &str = "11111111-1111-1111-1111-111111111111";

pub fn id(text: &str) -> WireId {
    text.parse().expect("valid id")
}

/// One record posted by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Completion { task: TaskId, output: Vec<u8> },
    Progress { task: TaskId, text: String },
    Error { task: TaskId, code: u32 },
    DownloadInit { task: TaskId, total: u32, path: String, chunk_size: u32 },
    DownloadChunk { task: TaskId, index: u32, file: FileId, data: Vec<u8> },
    UploadRequest { task: TaskId, chunk: u32, file: FileId, path: String },
    LinkEstablished { task: TaskId, status: u32, link_id: u32, handshake: Vec<u8> },
    Delegate { peer: SessionId, message: Vec<u8> },
    Unlink { link_id: u32, peer: Vec<u8> },
}

/// Split a batch body into its records
pub fn parse_records(body: &[u8]) -> Vec<Record> {
    let mut cursor = Cursor::new(body);
    let mut records = Vec::new();
    while !cursor.is_empty() {
        let record = match cursor.read_u8().expect("record kind") {
            kind::POST_RESPONSE => {
                let task = cursor.read_id().expect("task id");
                let rest = cursor.rest();
                let len = u32::from_be_bytes(rest[..4].try_into().expect("u32")) as usize;
                match rest.get(4 + len) {
                    Some(&status::COMPLETE) | Some(&status::PROCESSING) => {
                        let output = cursor.read_sized_bytes().expect("output").to_vec();
                        match cursor.read_u8().expect("status") {
                            status::COMPLETE => Record::Completion { task, output },
                            _ => Record::Progress {
                                task,
                                text: String::from_utf8(output).expect("utf8"),
                            },
                        }
                    }
                    _ => {
                        let code = cursor.read_u32().expect("code");
                        assert_eq!(cursor.read_u8().expect("status"), status::FAILED);
                        Record::Error { task, code }
                    }
                }
            }
            kind::DOWNLOAD_INIT => Record::DownloadInit {
                task: cursor.read_id().expect("task"),
                total: cursor.read_u32().expect("total"),
                path: cursor.read_string_owned().expect("path"),
                chunk_size: cursor.read_u32().expect("chunk size"),
            },
            kind::DOWNLOAD_CONTINUE => {
                let task = cursor.read_id().expect("task");
                let index = cursor.read_u32().expect("index");
                let file = cursor.read_id().expect("file");
                let data = cursor.read_sized_bytes().expect("data").to_vec();
                assert_eq!(cursor.read_u32().expect("len") as usize, data.len());
                Record::DownloadChunk { task, index, file, data }
            }
            kind::UPLOAD_CHUNKED => {
                let record = Record::UploadRequest {
                    task: cursor.read_id().expect("task"),
                    chunk: cursor.read_u32().expect("chunk"),
                    file: cursor.read_id().expect("file"),
                    path: cursor.read_string_owned().expect("path"),
                };
                cursor.read_u32().expect("chunk size");
                record
            }
            kind::P2P_CHECKIN => Record::LinkEstablished {
                task: cursor.read_id().expect("task"),
                status: cursor.read_u32().expect("status"),
                link_id: cursor.read_u32().expect("link id"),
                handshake: cursor.read_sized_bytes().expect("handshake").to_vec(),
            },
            kind::P2P_MSG => Record::Delegate {
                peer: cursor.read_id().expect("peer"),
                message: cursor.read_sized_bytes().expect("message").to_vec(),
            },
            kind::P2P_UNLINK => Record::Unlink {
                link_id: cursor.read_u32().expect("link id"),
                peer: cursor.read_sized_bytes().expect("peer").to_vec(),
            },
            other => panic!("unexpected record kind 0x{:02x}", other),
        };
        records.push(record);
    }
    records
}

/// One request as the controller saw it
#[derive(Debug, Clone)]
pub struct Request {
    pub port: u16,
    pub session: SessionId,
    pub kind: u8,
}

#[derive(Default)]
struct State {
    requests: Vec<Request>,
    attempts: Vec<u16>,
    posted: Vec<Record>,
    tasking: VecDeque<Vec<u8>>,
    acks: VecDeque<Vec<u8>>,
    down: HashSet<u16>,
    reply_prefix: Option<SessionId>,
}

/// Scripted controller behind the [`Transport`] boundary
pub struct MockController {
    assigned: SessionId,
    state: Mutex<State>,
}

impl MockController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            assigned: id(ASSIGNED_ID),
            state: Mutex::new(State::default()),
        })
    }

    /// Queue the body of the next tasking reply
    pub fn push_tasking(&self, body: Vec<u8>) {
        self.state.lock().unwrap().tasking.push_back(body);
    }

    /// Queue the body of the next acknowledgement batch
    pub fn push_acks(&self, body: Vec<u8>) {
        self.state.lock().unwrap().acks.push_back(body);
    }

    /// Refuse every exchange on `port`
    pub fn take_down(&self, port: u16) {
        self.state.lock().unwrap().down.insert(port);
    }

    /// Stamp replies with `prefix` instead of the requester's session
    pub fn forge_prefix(&self, prefix: Option<SessionId>) {
        self.state.lock().unwrap().reply_prefix = prefix;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn attempts(&self) -> Vec<u16> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Every record posted so far, in order
    pub fn posted(&self) -> Vec<Record> {
        self.state.lock().unwrap().posted.clone()
    }

    fn answer(&self, state: &mut State, request: &Request, body: &[u8]) -> Vec<u8> {
        match request.kind {
            kind::CHECKIN => {
                let mut reply = vec![kind::CHECKIN];
                reply.extend_from_slice(self.assigned.as_bytes());
                reply.push(1);
                reply
            }
            kind::GET_TASKING => state.tasking.pop_front().unwrap_or_else(|| tasking(&[], &[])),
            kind::POST_RESPONSE => {
                state.posted.extend(parse_records(body));
                state.acks.pop_front().unwrap_or_else(|| acks(&[]))
            }
            other => panic!("unexpected request kind 0x{:02x}", other),
        }
    }
}

#[async_trait]
impl Transport for MockController {
    async fn send(
        &self,
        endpoint: &Endpoint,
        _kind: RequestKind,
        payload: &[u8],
        _expect_reply: bool,
    ) -> Result<Bytes, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(endpoint.port);
        if state.down.contains(&endpoint.port) {
            return Err(TransportError::Connection(format!("{} is down", endpoint)));
        }

        let raw = STANDARD
            .decode(payload)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let session = WireId::from_slice(&raw[..ID_LEN]).expect("session prefix");
        let request = Request {
            port: endpoint.port,
            session,
            kind: raw[ID_LEN],
        };
        let body = self.answer(&mut state, &request, &raw[ID_LEN + 1..]);
        state.requests.push(request);

        let mut reply = state.reply_prefix.unwrap_or(session).as_bytes().to_vec();
        reply.extend_from_slice(&body);
        Ok(Bytes::from(STANDARD.encode(reply)))
    }
}

/// Body of a tasking reply
pub fn tasking(delegates: &[(SessionId, &[u8])], tasks: &[(u8, TaskId, Vec<u8>)]) -> Vec<u8> {
    let mut msg = Message::new();
    if delegates.is_empty() {
        msg.add_u8(0).unwrap();
    } else {
        msg.add_u8(1).unwrap().add_u32(delegates.len() as u32).unwrap();
        for (peer, message) in delegates {
            msg.add_sized_bytes(peer.as_bytes()).unwrap().add_sized_bytes(message).unwrap();
        }
    }
    msg.add_u8(kind::GET_TASKING).unwrap().add_u32(tasks.len() as u32).unwrap();
    for (command, task, args) in tasks {
        let record = TaskRecord {
            command: *command,
            task: *task,
            args,
        };
        msg.append(&record.encode().unwrap()).unwrap();
    }
    msg.as_bytes().to_vec()
}

/// Body of an acknowledgement batch
pub fn acks(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut body = vec![kind::POST_RESPONSE];
    for entry in entries {
        body.extend_from_slice(entry);
    }
    body
}

pub fn ack_download(ok: bool, task: &TaskId, file: &FileId) -> Vec<u8> {
    let mut msg = Message::new();
    msg.add_u8(ok as u8)
        .unwrap()
        .add_u8(ack::DOWNLOAD)
        .unwrap()
        .add_id(task)
        .unwrap()
        .add_id(file)
        .unwrap();
    msg.as_bytes().to_vec()
}

pub fn ack_upload(task: &TaskId, total: u32, current: u32, chunk: &[u8]) -> Vec<u8> {
    let mut msg = Message::new();
    msg.add_u8(1)
        .unwrap()
        .add_u8(ack::UPLOAD)
        .unwrap()
        .add_id(task)
        .unwrap()
        .add_u32(total)
        .unwrap()
        .add_u32(current)
        .unwrap()
        .add_sized_bytes(chunk)
        .unwrap();
    msg.as_bytes().to_vec()
}

pub fn ack_link_checkin(link_id: u32, peer: &SessionId, message: &[u8]) -> Vec<u8> {
    let mut msg = Message::new();
    msg.add_u8(1)
        .unwrap()
        .add_u8(ack::DELEGATE)
        .unwrap()
        .add_u8(1)
        .unwrap()
        .add_u32(link_id)
        .unwrap()
        .add_sized_bytes(peer.as_bytes())
        .unwrap()
        .add_sized_bytes(message)
        .unwrap();
    msg.as_bytes().to_vec()
}

/// Arguments: a count, then one length-prefixed field per string
pub fn string_args(fields: &[&str]) -> Vec<u8> {
    let mut msg = Message::new();
    msg.add_u32(fields.len() as u32).unwrap();
    for field in fields {
        msg.add_sized_str(field).unwrap();
    }
    msg.as_bytes().to_vec()
}

/// Connector handing out pre-connected in-memory channels
pub struct PeerSockets(Mutex<VecDeque<DuplexStream>>);

impl PeerSockets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(VecDeque::new())))
    }

    /// Add a peer that greets with `link_id` and `checkin`; returns its end
    pub async fn add_peer(&self, link_id: u32, checkin: &[u8]) -> StreamChannel<DuplexStream> {
        let (ours, theirs) = tokio::io::duplex(1 << 20);
        let mut peer = StreamChannel::new(theirs);
        let mut handshake = link_id.to_be_bytes().to_vec();
        handshake.extend_from_slice(checkin);
        peer.send(&handshake).await.unwrap();
        self.0.lock().unwrap().push_back(ours);
        peer
    }
}

#[async_trait]
impl ChannelConnector for PeerSockets {
    async fn connect(&self, _target: &str, name: &str) -> Result<Box<dyn LocalChannel>, TransportError> {
        let stream = self
            .0
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connection(format!("{}: nobody listening", name)))?;
        Ok(Box::new(StreamChannel::new(stream)))
    }
}

/// Configuration with no sleep, over the given endpoint ports
pub fn config(ports: &[u16], threshold: u32) -> AgentConfig {
    let endpoints: Vec<String> = ports
        .iter()
        .map(|port| format!(r#"{{ "host": "127.0.0.1", "port": {} }}"#, port))
        .collect();
    AgentConfig::from_json(&format!(
        r#"{{
            "payload_id": "{}",
            "sleep_secs": 0,
            "failover_threshold": {},
            "channel_name": "tether",
            "endpoints": [{}]
        }}"#,
        PAYLOAD_ID,
        threshold,
        endpoints.join(",")
    ))
    .expect("valid config")
}

/// Session with the built-in handlers over the mock controller and peers
pub fn session(controller: Arc<MockController>, peers: Arc<PeerSockets>, config: &AgentConfig) -> Session {
    let mut session = Session::new(config, controller, peers, Envelope::plain()).expect("session");
    handlers::register_builtin(session.dispatcher_mut());
    session
}

/// Wait until the outbound queue holds at least `count` records
pub async fn settle(session: &Session, count: usize) {
    for _ in 0..400 {
        if session.queue().len().await >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue never reached {} records", count);
}
