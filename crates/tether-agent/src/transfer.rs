//! Chunked file transfers
//!
//! Downloads (agent to controller) are advanced by the session loop, one
//! chunk per cycle once the controller has assigned a file id. Uploads
//! (controller to agent) run in their own task: each acknowledgement
//! carrying a chunk is handed to the upload's worker, which writes it and
//! queues the request for the next one.

use crate::error::{TaskError, DOWNLOAD_FAILED, UPLOAD_FAILED};
use crate::queue::OutboundQueue;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tether_proto::{records, FileId, TaskId};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One upload chunk as delivered by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    /// Whether the controller could serve the chunk
    pub ok: bool,
    /// Total chunk count
    pub total: u32,
    /// Index of this chunk, starting at 1
    pub current: u32,
    /// Chunk payload
    pub data: Bytes,
}

struct Download {
    task: TaskId,
    file: Option<FileId>,
    handle: File,
    total_chunks: u32,
    current: u32,
    chunk_size: u32,
}

enum Step {
    Waiting,
    Sent,
    Finished,
}

impl Download {
    async fn read_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.chunk_size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.handle.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn advance(&mut self, queue: &OutboundQueue) -> std::io::Result<Step> {
        let Some(file) = self.file else {
            return Ok(Step::Waiting);
        };
        if self.current > self.total_chunks {
            return Ok(Step::Finished);
        }
        let chunk = self.read_chunk().await?;
        if chunk.is_empty() {
            return Ok(Step::Finished);
        }
        debug!(
            "Download {} chunk {}/{} ({} bytes)",
            self.task,
            self.current,
            self.total_chunks,
            chunk.len()
        );
        queue
            .submit(records::download_chunk(&self.task, self.current, &file, &chunk))
            .await;
        self.current += 1;
        Ok(Step::Sent)
    }
}

struct UploadSlot {
    task: TaskId,
    chunks: mpsc::UnboundedSender<UploadChunk>,
}

/// Receives one upload and writes it to disk
struct UploadWorker {
    task: TaskId,
    file: FileId,
    path: String,
    handle: File,
    chunk_size: u32,
    queue: Arc<OutboundQueue>,
    chunks: mpsc::UnboundedReceiver<UploadChunk>,
}

impl UploadWorker {
    async fn request(&self, chunk: u32) {
        self.queue
            .submit(records::upload_request(&self.task, chunk, &self.file, &self.path, self.chunk_size))
            .await;
    }

    async fn fail(&self, reason: &str) {
        warn!("Upload {} failed: {}", self.task, reason);
        self.queue.submit(records::error(&self.task, UPLOAD_FAILED)).await;
    }

    async fn run(mut self) {
        let mut next = 1;
        self.request(next).await;

        while let Some(chunk) = self.chunks.recv().await {
            if !chunk.ok {
                self.fail("controller rejected the chunk").await;
                return;
            }
            if chunk.current < next {
                debug!("Upload {} ignoring repeated chunk {}", self.task, chunk.current);
                continue;
            }
            if chunk.current > next {
                self.fail(&format!("expected chunk {}, got {}", next, chunk.current)).await;
                return;
            }
            if let Err(e) = self.handle.write_all(&chunk.data).await {
                self.fail(&e.to_string()).await;
                return;
            }
            self.queue
                .submit(records::progress(
                    &self.task,
                    &format!("Uploaded {} / {} chunks", chunk.current, chunk.total),
                ))
                .await;

            if chunk.current >= chunk.total {
                if let Err(e) = self.handle.flush().await {
                    self.fail(&e.to_string()).await;
                    return;
                }
                info!("Upload {} complete: {} chunks written to {}", self.task, chunk.total, self.path);
                self.queue.submit(records::completion(&self.task, &[])).await;
                return;
            }
            next += 1;
            self.request(next).await;
        }
        debug!("Upload {} abandoned", self.task);
    }
}

/// Registry of active transfers, keyed by task id
pub struct TransferManager {
    downloads: Vec<Download>,
    uploads: Vec<UploadSlot>,
    queue: Arc<OutboundQueue>,
    chunk_size: u32,
}

impl TransferManager {
    /// Create a manager that moves files in `chunk_size` pieces
    pub fn new(queue: Arc<OutboundQueue>, chunk_size: u32) -> Self {
        Self {
            downloads: Vec::new(),
            uploads: Vec::new(),
            queue,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Number of downloads in progress
    pub fn active_downloads(&self) -> usize {
        self.downloads.len()
    }

    /// Number of uploads whose worker is still running
    pub fn active_uploads(&self) -> usize {
        self.uploads.iter().filter(|slot| !slot.chunks.is_closed()).count()
    }

    /// Open `path` and announce it; chunks flow once a file id is assigned
    pub async fn start_download(&mut self, task: &TaskId, path: &Path, label: &str) -> Result<(), TaskError> {
        let handle = File::open(path).await?;
        let size = handle.metadata().await?.len();
        let total_chunks = u32::try_from(size.div_ceil(u64::from(self.chunk_size)))
            .map_err(|_| TaskError::Download(format!("{} is too large", label)))?;

        self.queue
            .submit(records::download_init(task, total_chunks, label, self.chunk_size))
            .await;
        info!("Download {} registered: {} ({} bytes, {} chunks)", task, label, size, total_chunks);

        self.downloads.push(Download {
            task: *task,
            file: None,
            handle,
            total_chunks,
            current: 1,
            chunk_size: self.chunk_size,
        });
        Ok(())
    }

    /// Record the file id assigned to a download, or abort it
    pub async fn sync_download(&mut self, task: &TaskId, file: FileId, ok: bool) {
        let Some(index) = self.downloads.iter().position(|d| d.task == *task) else {
            debug!("No download for task {}", task);
            return;
        };
        if !ok {
            warn!("Controller refused download {}", task);
            self.downloads.remove(index);
            self.queue.submit(records::error(task, DOWNLOAD_FAILED)).await;
            return;
        }
        debug!("Download {} assigned file {}", task, file);
        self.downloads[index].file = Some(file);
    }

    /// Send the next chunk of every download that has a file id
    pub async fn pump_downloads(&mut self) {
        let active = std::mem::take(&mut self.downloads);
        for mut download in active {
            match download.advance(&self.queue).await {
                Ok(Step::Waiting) | Ok(Step::Sent) => self.downloads.push(download),
                Ok(Step::Finished) => {
                    info!("Download {} complete", download.task);
                    self.queue.submit(records::completion(&download.task, &[])).await;
                }
                Err(e) => {
                    warn!("Download {} failed: {}", download.task, e);
                    self.queue.submit(records::error(&download.task, DOWNLOAD_FAILED)).await;
                }
            }
        }
    }

    /// Create `path` and start a worker that requests and writes its chunks
    pub async fn start_upload(&mut self, task: &TaskId, file: FileId, path: &Path, label: &str) -> Result<(), TaskError> {
        let handle = File::create(path).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = UploadWorker {
            task: *task,
            file,
            path: label.to_string(),
            handle,
            chunk_size: self.chunk_size,
            queue: self.queue.clone(),
            chunks: receiver,
        };

        self.prune();
        self.uploads.push(UploadSlot {
            task: *task,
            chunks: sender,
        });
        info!("Upload {} started: {}", task, label);
        tokio::spawn(worker.run());
        Ok(())
    }

    /// Hand a chunk to the matching upload worker
    pub fn sync_upload(&mut self, task: &TaskId, chunk: UploadChunk) {
        self.prune();
        let Some(slot) = self.uploads.iter().find(|slot| slot.task == *task) else {
            debug!("No upload for task {}", task);
            return;
        };
        if slot.chunks.send(chunk).is_err() {
            debug!("Upload {} already finished", task);
        }
    }

    /// Forget uploads whose worker has exited
    pub fn prune(&mut self) {
        self.uploads.retain(|slot| !slot.chunks.is_closed());
    }
}
