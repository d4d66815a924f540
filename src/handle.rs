//! Open file and directory handles
//!
//! Handles wrap the 16-byte file ID returned by Create, cache the size and
//! time attributes the server reported, and refuse further operations once
//! closed.

use crate::client::{ChangeEntry, ClientEvent};
use crate::codec::{Fields, Value};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{
    change_notify_flags, file_info_class, info_type, Command, CompletionFilter, FileAttributes,
};
use crate::protocol::{Request, Response};
use crate::tree::{Tree, TreeInner};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// Attributes cached from Create/Close/QueryInfo responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleAttributes {
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub attributes: u32,
    pub creation_time: u64,
    pub last_write_time: u64,
}

impl HandleAttributes {
    fn from_body(body: &Fields) -> Result<Self> {
        Ok(Self {
            end_of_file: body.uint("end_of_file")?,
            allocation_size: body.uint("allocation_size")?,
            attributes: body.uint("file_attributes")? as u32,
            creation_time: body.uint("creation_time")?,
            last_write_time: body.uint("last_write_time")?,
        })
    }
}

struct HandleState {
    file_id: [u8; 16],
    open: bool,
    attributes: HandleAttributes,
}

struct HandleInner {
    tree: Weak<TreeInner>,
    state: Mutex<HandleState>,
}

impl HandleInner {
    fn from_create(tree: Weak<TreeInner>, response: &Response) -> Result<Self> {
        let raw = response.body.bytes("file_id")?;
        let mut file_id = [0u8; 16];
        if raw.len() != 16 {
            return Err(Error::Codec(format!("file id of {} bytes", raw.len())));
        }
        file_id.copy_from_slice(raw);
        Ok(Self {
            tree,
            state: Mutex::new(HandleState {
                file_id,
                open: true,
                attributes: HandleAttributes::from_body(&response.body)?,
            }),
        })
    }

    fn tree(&self) -> Result<Tree> {
        self.tree
            .upgrade()
            .map(Tree::from_inner)
            .ok_or_else(|| Error::InvalidState("tree was dropped".to_string()))
    }

    async fn require_open(&self) -> Result<[u8; 16]> {
        let state = self.state.lock().await;
        if !state.open {
            return Err(Error::InvalidState("handle is closed".to_string()));
        }
        Ok(state.file_id)
    }

    /// Close once; later calls are no-ops. FileClosed from the server is
    /// tolerated during teardown.
    async fn close(&self) -> Result<()> {
        let file_id = {
            let mut state = self.state.lock().await;
            if !state.open {
                return Ok(());
            }
            state.open = false;
            state.file_id
        };
        let tree = self.tree()?;
        let body = Fields::new().with("file_id", Value::Bytes(file_id.to_vec()));
        match tree.send(Request::new(Command::Close, body)).await {
            Ok(response) => {
                let mut state = self.state.lock().await;
                state.attributes = HandleAttributes::from_body(&response.body)?;
                Ok(())
            }
            Err(Error::Status(NtStatus::FileClosed)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// An open file
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<HandleInner>,
}

impl FileHandle {
    pub(crate) fn from_create(tree: Weak<TreeInner>, response: &Response) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(HandleInner::from_create(tree, response)?),
        })
    }

    pub(crate) fn same_as(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn is_open(&self) -> bool {
        self.inner.state.lock().await.open
    }

    pub async fn file_id(&self) -> [u8; 16] {
        self.inner.state.lock().await.file_id
    }

    /// Cached attributes from the most recent server response
    pub async fn attributes(&self) -> HandleAttributes {
        self.inner.state.lock().await.attributes
    }

    /// Read `length` bytes from `offset`, split into per-message chunks.
    ///
    /// Short reads advance by what the server returned; end-of-file stops
    /// the loop early.
    pub async fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let file_id = self.inner.require_open().await?;
        let tree = self.inner.tree()?;
        let (max_read, _) = tree.chunk_limits().await?;

        let mut data = Vec::with_capacity(length.min(1 << 20) as usize);
        let mut position = offset;
        let end = offset + length;
        while position < end {
            let chunk = (end - position).min(max_read as u64) as u32;
            let body = Fields::new()
                .with("length", Value::Uint(chunk as u64))
                .with("offset", Value::Uint(position))
                .with("file_id", Value::Bytes(file_id.to_vec()));
            let response = match tree.send(Request::new(Command::Read, body)).await {
                Ok(response) => response,
                Err(Error::Status(NtStatus::EndOfFile)) => break,
                Err(err) => return Err(err),
            };
            let returned = response.body.bytes("buffer")?;
            if returned.is_empty() {
                break;
            }
            data.extend_from_slice(returned);
            position += returned.len() as u64;
        }
        Ok(data)
    }

    /// Read the whole file, using the cached end-of-file as the length
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        let size = self.inner.state.lock().await.attributes.end_of_file;
        if size == 0 {
            return Ok(Vec::new());
        }
        self.read(0, size).await
    }

    /// Write the entire buffer from offset zero in chunks, then shrink the
    /// file if it was longer than the new contents.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let previous_size = {
            let state = self.inner.state.lock().await;
            state.attributes.end_of_file
        };
        let written = self.write_at(0, data).await?;
        if written != data.len() as u64 {
            return Err(Error::InvalidState(format!(
                "short write: {} of {} bytes",
                written,
                data.len()
            )));
        }
        if previous_size != data.len() as u64 {
            self.set_end_of_file(data.len() as u64).await?;
        }
        let mut state = self.inner.state.lock().await;
        state.attributes.end_of_file = data.len() as u64;
        Ok(())
    }

    /// Write `data` at `offset` in per-message chunks; returns bytes written
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<u64> {
        let file_id = self.inner.require_open().await?;
        let tree = self.inner.tree()?;
        let (_, max_write) = tree.chunk_limits().await?;

        let mut written = 0u64;
        for chunk in data.chunks(max_write.max(1) as usize) {
            let body = Fields::new()
                .with("offset", Value::Uint(offset + written))
                .with("file_id", Value::Bytes(file_id.to_vec()))
                .with("flags", Value::Uint(0))
                .with("buffer", Value::Bytes(chunk.to_vec()));
            let response = tree.send(Request::new(Command::Write, body)).await?;
            written += response.body.uint("count")?;
        }
        Ok(written)
    }

    /// SetInfo FileEndOfFileInformation
    pub async fn set_end_of_file(&self, size: u64) -> Result<()> {
        let file_id = self.inner.require_open().await?;
        let tree = self.inner.tree()?;
        tree.set_info(
            &file_id,
            file_info_class::FILE_END_OF_FILE_INFORMATION,
            size.to_le_bytes().to_vec(),
        )
        .await?;
        let mut state = self.inner.state.lock().await;
        state.attributes.end_of_file = size;
        Ok(())
    }

    /// Flush server-side buffers for this handle
    pub async fn flush(&self) -> Result<()> {
        let file_id = self.inner.require_open().await?;
        let tree = self.inner.tree()?;
        let body = Fields::new().with("file_id", Value::Bytes(file_id.to_vec()));
        tree.send(Request::new(Command::Flush, body)).await?;
        Ok(())
    }

    /// Refresh cached size attributes via QueryInfo FileStandardInformation
    pub async fn query_info(&self) -> Result<HandleAttributes> {
        let file_id = self.inner.require_open().await?;
        let tree = self.inner.tree()?;
        let body = Fields::new()
            .with("info_type", Value::Uint(info_type::FILE as u64))
            .with(
                "file_info_class",
                Value::Uint(file_info_class::FILE_STANDARD_INFORMATION as u64),
            )
            .with("input_buffer_offset", Value::Uint(0))
            .with("additional_information", Value::Uint(0))
            .with("flags", Value::Uint(0))
            .with("file_id", Value::Bytes(file_id.to_vec()));
        let response = tree.send(Request::new(Command::QueryInfo, body)).await?;
        let info = response.body.bytes("buffer")?;
        if info.len() < 16 {
            return Err(Error::Codec("short FileStandardInformation".to_string()));
        }
        let mut allocation_size = [0u8; 8];
        allocation_size.copy_from_slice(&info[0..8]);
        let mut end_of_file = [0u8; 8];
        end_of_file.copy_from_slice(&info[8..16]);

        let mut state = self.inner.state.lock().await;
        state.attributes.allocation_size = u64::from_le_bytes(allocation_size);
        state.attributes.end_of_file = u64::from_le_bytes(end_of_file);
        Ok(state.attributes)
    }

    /// Close the handle; safe to call twice
    pub async fn close(&self) -> Result<()> {
        let result = self.inner.close().await;
        if let Ok(tree) = self.inner.tree() {
            tree.forget_file(self).await;
        }
        debug!("file closed");
        result
    }
}

/// One entry from a directory enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub attributes: FileAttributes,
    pub creation_time: u64,
    pub last_write_time: u64,
}

impl DirEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

struct WatchState {
    message_id: u64,
    recursive: bool,
    events: broadcast::Receiver<ClientEvent>,
}

/// An open directory
#[derive(Clone)]
pub struct DirectoryHandle {
    inner: Arc<HandleInner>,
    watch: Arc<Mutex<Option<WatchState>>>,
}

impl DirectoryHandle {
    pub(crate) fn from_create(tree: Weak<TreeInner>, response: &Response) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(HandleInner::from_create(tree, response)?),
            watch: Arc::new(Mutex::new(None)),
        })
    }

    pub(crate) fn same_as(&self, other: &DirectoryHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn is_open(&self) -> bool {
        self.inner.state.lock().await.open
    }

    pub async fn file_id(&self) -> [u8; 16] {
        self.inner.state.lock().await.file_id
    }

    /// Enumerate the directory, stripping the `.` and `..` pseudo-entries
    pub async fn read(&self) -> Result<Vec<DirEntry>> {
        let file_id = self.inner.require_open().await?;
        let tree = self.inner.tree()?;

        let mut entries = Vec::new();
        let mut first = true;
        loop {
            let body = Fields::new()
                .with(
                    "file_information_class",
                    Value::Uint(file_info_class::FILE_DIRECTORY_INFORMATION as u64),
                )
                .with("flags", Value::Uint(if first { 0x01 } else { 0 }))
                .with("file_id", Value::Bytes(file_id.to_vec()))
                .with("file_name", Value::Str("*".to_string()));
            first = false;

            let response = match tree
                .send(Request::new(Command::QueryDirectory, body))
                .await
            {
                Ok(response) => response,
                Err(Error::Status(NtStatus::NoMoreFiles)) => break,
                Err(err) => return Err(err),
            };
            let records = match &response.entries {
                Some(records) if !records.is_empty() => records,
                _ => break,
            };
            for record in records {
                let name = record.string("file_name")?;
                if name == "." || name == ".." {
                    continue;
                }
                entries.push(DirEntry {
                    name: name.to_string(),
                    size: record.uint("end_of_file")?,
                    attributes: FileAttributes::from_bits_retain(
                        record.uint("file_attributes")? as u32,
                    ),
                    creation_time: record.uint("creation_time")?,
                    last_write_time: record.uint("last_write_time")?,
                });
            }
        }
        Ok(entries)
    }

    /// Arm change notification on this directory.
    ///
    /// The server acknowledges with Pending; the completed notification
    /// arrives later on the client's event bus and is claimed by
    /// [`next_change`](Self::next_change).
    pub async fn watch(&self, recursive: bool) -> Result<()> {
        let mut watch = self.watch.lock().await;
        if watch.is_some() {
            return Err(Error::InvalidState("already watching".to_string()));
        }
        // Subscribe before arming so the completion cannot be missed.
        let events = self.inner.tree()?.subscribe_events()?;
        let message_id = self.arm(recursive).await?;
        *watch = Some(WatchState {
            message_id,
            recursive,
            events,
        });
        debug!(message_id, recursive, "watch armed");
        Ok(())
    }

    /// Await the next change delivery, then re-arm the watch
    pub async fn next_change(&self) -> Result<Vec<ChangeEntry>> {
        let mut watch = self.watch.lock().await;
        let state = watch
            .as_mut()
            .ok_or_else(|| Error::InvalidState("not watching".to_string()))?;

        let entries = loop {
            let event = state
                .events
                .recv()
                .await
                .map_err(|_| Error::ConnectionClosed)?;
            match event {
                ClientEvent::ChangeNotify(notification)
                    if notification.message_id == state.message_id =>
                {
                    break notification.entries;
                }
                ClientEvent::Error(reason) => return Err(Error::Framing(reason)),
                _ => continue,
            }
        };
        state.message_id = self.arm(state.recursive).await?;
        Ok(entries)
    }

    /// Cancel the watch registration and close the handle
    pub async fn unwatch(&self) -> Result<()> {
        self.watch.lock().await.take();
        self.close().await
    }

    async fn arm(&self, recursive: bool) -> Result<u64> {
        let file_id = self.inner.require_open().await?;
        let tree = self.inner.tree()?;
        let filter = CompletionFilter::FILE_NAME
            | CompletionFilter::DIR_NAME
            | CompletionFilter::ATTRIBUTES
            | CompletionFilter::SIZE
            | CompletionFilter::LAST_WRITE;
        let body = Fields::new()
            .with(
                "flags",
                Value::Uint(if recursive {
                    change_notify_flags::WATCH_TREE as u64
                } else {
                    0
                }),
            )
            .with("file_id", Value::Bytes(file_id.to_vec()))
            .with("completion_filter", Value::Uint(filter.bits() as u64));
        let response = tree
            .send(Request::new(Command::ChangeNotify, body))
            .await?;
        if response.status != NtStatus::Pending {
            return Err(Error::InvalidState(format!(
                "change notify acknowledged with {}",
                response.status
            )));
        }
        Ok(response.header.message_id)
    }

    /// Close the handle; safe to call twice
    pub async fn close(&self) -> Result<()> {
        self.watch.lock().await.take();
        let result = self.inner.close().await;
        if let Ok(tree) = self.inner.tree() {
            tree.forget_directory(self).await;
        }
        debug!("directory closed");
        result
    }
}
