//! Tree (share) connection and convenience operations
//!
//! A tree is an opened connection to a single share. Convenience operations
//! follow the create-handle/act/close pattern and close the handle on every
//! exit path.

use crate::codec::{Fields, Value};
use crate::crypto::ntlm::utf16le;
use crate::error::{Error, NtStatus, Result};
use crate::handle::{DirectoryHandle, FileHandle};
use crate::protocol::constants::{
    file_info_class, info_type, Command, CreateDisposition, CreateOptions, DesiredAccess,
    FileAttributes, ShareAccess, ShareFlags,
};
use crate::protocol::{Request, Response};
use crate::session::{Session, SessionInner};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::debug;

struct TreeState {
    tree_id: u32,
    connected: bool,
    share_flags: ShareFlags,
    files: Vec<FileHandle>,
    directories: Vec<DirectoryHandle>,
}

pub(crate) struct TreeInner {
    session: Weak<SessionInner>,
    state: Mutex<TreeState>,
}

/// A connected share
#[derive(Clone)]
pub struct Tree {
    inner: Arc<TreeInner>,
}

impl Tree {
    pub(crate) fn new(session: Weak<SessionInner>) -> Self {
        Self {
            inner: Arc::new(TreeInner {
                session,
                state: Mutex::new(TreeState {
                    tree_id: 0,
                    connected: false,
                    share_flags: ShareFlags::empty(),
                    files: Vec::new(),
                    directories: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn same_as(&self, other: &Tree) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn from_inner(inner: Arc<TreeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<TreeInner> {
        Arc::downgrade(&self.inner)
    }

    /// Event-bus subscription for change notifications
    pub(crate) fn subscribe_events(
        &self,
    ) -> Result<tokio::sync::broadcast::Receiver<crate::client::ClientEvent>> {
        self.session()?.subscribe_events()
    }

    fn session(&self) -> Result<Session> {
        self.inner
            .session
            .upgrade()
            .map(Session::from_inner)
            .ok_or_else(|| Error::InvalidState("session was dropped".to_string()))
    }

    /// Server-assigned tree ID
    pub async fn tree_id(&self) -> u32 {
        self.inner.state.lock().await.tree_id
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    /// Share flags returned by the server
    pub async fn share_flags(&self) -> ShareFlags {
        self.inner.state.lock().await.share_flags
    }

    /// Issue TreeConnect for `path` (`\\host:port\share`).
    ///
    /// An AccessDenied answer while transform keys exist but encryption is
    /// off enables encryption and retries once.
    pub(crate) async fn connect(&self, path: &str) -> Result<()> {
        let session = self.session()?;
        let body = Fields::new().with("path", Value::Str(path.to_string()));

        let first = session
            .send(Request::new(Command::TreeConnect, body.clone()))
            .await;
        let response = match first {
            Err(Error::Status(NtStatus::AccessDenied)) => {
                if session.has_transform_keys().await && !session.encryption_enabled().await {
                    debug!(path, "tree connect denied; retrying encrypted");
                    session.enable_encryption().await?;
                    session
                        .send(Request::new(Command::TreeConnect, body))
                        .await?
                } else {
                    return Err(Error::Status(NtStatus::AccessDenied));
                }
            }
            other => other?,
        };

        let share_flags =
            ShareFlags::from_bits_retain(response.body.uint("share_flags")? as u32);
        if share_flags.contains(ShareFlags::ENCRYPT_DATA) {
            session.enable_encryption().await?;
        }

        let mut state = self.inner.state.lock().await;
        state.tree_id = response.header.tree_id;
        state.share_flags = share_flags;
        state.connected = true;
        debug!(path, tree_id = state.tree_id, "tree connected");
        Ok(())
    }

    /// Close every open handle, then issue TreeDisconnect. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let (files, directories) = {
            let mut state = self.inner.state.lock().await;
            if !state.connected {
                return Ok(());
            }
            (
                std::mem::take(&mut state.files),
                std::mem::take(&mut state.directories),
            )
        };
        for file in &files {
            if let Err(err) = file.close().await {
                debug!(error = %err, "file close during disconnect failed");
            }
        }
        for directory in &directories {
            if let Err(err) = directory.close().await {
                debug!(error = %err, "directory close during disconnect failed");
            }
        }

        let result = self
            .send(Request::new(Command::TreeDisconnect, Fields::new()))
            .await;
        let mut state = self.inner.state.lock().await;
        state.connected = false;
        debug!(tree_id = state.tree_id, "tree disconnected");
        result.map(|_| ())
    }

    /// Send a request under this tree's ID
    pub(crate) async fn send(&self, mut request: Request) -> Result<Response> {
        let tree_id = {
            let state = self.inner.state.lock().await;
            if !state.connected {
                return Err(Error::InvalidState("tree is not connected".to_string()));
            }
            state.tree_id
        };
        request.header.tree_id = tree_id;
        self.session()?.send(request).await
    }

    /// Per-message read/write chunk limits
    pub(crate) async fn chunk_limits(&self) -> Result<(u32, u32)> {
        Ok(self.session()?.chunk_limits().await)
    }

    pub(crate) async fn create(
        &self,
        path: &str,
        access: DesiredAccess,
        attributes: FileAttributes,
        share_access: ShareAccess,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> Result<Response> {
        let body = Fields::new()
            .with("desired_access", Value::Uint(access.bits() as u64))
            .with("file_attributes", Value::Uint(attributes.bits() as u64))
            .with("share_access", Value::Uint(share_access.bits() as u64))
            .with("create_disposition", Value::Uint(disposition as u64))
            .with("create_options", Value::Uint(options.bits() as u64))
            .with("name", Value::Str(path.to_string()));
        self.send(Request::new(Command::Create, body)).await
    }

    /// Open a file, registering the handle with this tree
    pub async fn open_file(
        &self,
        path: &str,
        access: DesiredAccess,
        disposition: CreateDisposition,
    ) -> Result<FileHandle> {
        let response = self
            .create(
                path,
                access,
                FileAttributes::NORMAL,
                ShareAccess::READ | ShareAccess::WRITE,
                disposition,
                CreateOptions::NON_DIRECTORY_FILE,
            )
            .await?;
        let handle = FileHandle::from_create(self.downgrade(), &response)?;
        self.inner.state.lock().await.files.push(handle.clone());
        debug!(path, "file opened");
        Ok(handle)
    }

    /// Open a directory for enumeration or change watching
    pub async fn open_directory(&self, path: &str) -> Result<DirectoryHandle> {
        let response = self
            .create(
                path,
                DesiredAccess::FILE_READ_DATA | DesiredAccess::FILE_READ_ATTRIBUTES,
                FileAttributes::DIRECTORY,
                ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE,
                CreateDisposition::Open,
                CreateOptions::DIRECTORY_FILE,
            )
            .await?;
        let handle = DirectoryHandle::from_create(self.downgrade(), &response)?;
        self.inner
            .state
            .lock()
            .await
            .directories
            .push(handle.clone());
        debug!(path, "directory opened");
        Ok(handle)
    }

    /// Whether `path` exists on the share (file or directory)
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let opened = self
            .create(
                path,
                DesiredAccess::FILE_READ_ATTRIBUTES,
                FileAttributes::NORMAL,
                ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE,
                CreateDisposition::Open,
                CreateOptions::empty(),
            )
            .await;
        match opened {
            Ok(response) => {
                self.close_raw(response.body.bytes("file_id")?).await?;
                Ok(true)
            }
            Err(Error::Status(status)) if status.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Read a whole file
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let file = self
            .open_file(
                path,
                DesiredAccess::FILE_READ_DATA | DesiredAccess::FILE_READ_ATTRIBUTES,
                CreateDisposition::Open,
            )
            .await?;
        let result = file.read_all().await;
        let closed = file.close().await;
        let data = result?;
        closed?;
        Ok(data)
    }

    /// Create or truncate a file with the given contents
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let file = self
            .open_file(
                path,
                DesiredAccess::FILE_WRITE_DATA | DesiredAccess::FILE_READ_ATTRIBUTES,
                CreateDisposition::OverwriteIf,
            )
            .await?;
        let result = file.write(data).await;
        let closed = file.close().await;
        result?;
        closed
    }

    /// Create a new file; fails if it already exists
    pub async fn create_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let file = self
            .open_file(
                path,
                DesiredAccess::FILE_WRITE_DATA | DesiredAccess::FILE_READ_ATTRIBUTES,
                CreateDisposition::Create,
            )
            .await?;
        let result = if data.is_empty() {
            Ok(())
        } else {
            file.write(data).await
        };
        let closed = file.close().await;
        result?;
        closed
    }

    /// Create a directory
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let response = self
            .create(
                path,
                DesiredAccess::FILE_READ_ATTRIBUTES,
                FileAttributes::DIRECTORY,
                ShareAccess::READ | ShareAccess::WRITE,
                CreateDisposition::Create,
                CreateOptions::DIRECTORY_FILE,
            )
            .await?;
        self.close_raw(response.body.bytes("file_id")?).await?;
        debug!(path, "directory created");
        Ok(())
    }

    /// Remove an empty directory
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.delete(path, CreateOptions::DIRECTORY_FILE).await
    }

    /// Delete a file
    pub async fn unlink(&self, path: &str) -> Result<()> {
        self.delete(path, CreateOptions::NON_DIRECTORY_FILE).await
    }

    /// Rename a file or directory within the share
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let response = self
            .create(
                from,
                DesiredAccess::DELETE | DesiredAccess::FILE_READ_ATTRIBUTES,
                FileAttributes::NORMAL,
                ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE,
                CreateDisposition::Open,
                CreateOptions::empty(),
            )
            .await?;
        let file_id = response.body.bytes("file_id")?.to_vec();

        // FileRenameInformation: replace flag, reserved, root handle, name
        let name = utf16le(to);
        let mut info = Vec::with_capacity(20 + name.len());
        info.push(0);
        info.extend_from_slice(&[0u8; 7]);
        info.extend_from_slice(&0u64.to_le_bytes());
        info.extend_from_slice(&(name.len() as u32).to_le_bytes());
        info.extend_from_slice(&name);

        let result = self
            .set_info(&file_id, file_info_class::FILE_RENAME_INFORMATION, info)
            .await;
        let closed = self.close_raw(&file_id).await;
        result?;
        closed?;
        debug!(from, to, "renamed");
        Ok(())
    }

    async fn delete(&self, path: &str, options: CreateOptions) -> Result<()> {
        let response = self
            .create(
                path,
                DesiredAccess::DELETE | DesiredAccess::FILE_READ_ATTRIBUTES,
                FileAttributes::NORMAL,
                ShareAccess::READ | ShareAccess::WRITE | ShareAccess::DELETE,
                CreateDisposition::Open,
                options,
            )
            .await?;
        let file_id = response.body.bytes("file_id")?.to_vec();

        // FileDispositionInformation with DeletePending set
        let result = self
            .set_info(
                &file_id,
                file_info_class::FILE_DISPOSITION_INFORMATION,
                vec![1],
            )
            .await;
        let closed = self.close_raw(&file_id).await;
        result?;
        closed?;
        debug!(path, "deleted");
        Ok(())
    }

    pub(crate) async fn set_info(
        &self,
        file_id: &[u8],
        info_class: u8,
        buffer: Vec<u8>,
    ) -> Result<()> {
        let body = Fields::new()
            .with("info_type", Value::Uint(info_type::FILE as u64))
            .with("file_info_class", Value::Uint(info_class as u64))
            .with("additional_information", Value::Uint(0))
            .with("file_id", Value::Bytes(file_id.to_vec()))
            .with("buffer", Value::Bytes(buffer));
        self.send(Request::new(Command::SetInfo, body)).await?;
        Ok(())
    }

    /// Close a file ID without handle bookkeeping; FileClosed is tolerated
    pub(crate) async fn close_raw(&self, file_id: &[u8]) -> Result<()> {
        let body = Fields::new().with("file_id", Value::Bytes(file_id.to_vec()));
        match self.send(Request::new(Command::Close, body)).await {
            Ok(_) | Err(Error::Status(NtStatus::FileClosed)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn forget_file(&self, handle: &FileHandle) {
        let mut state = self.inner.state.lock().await;
        state.files.retain(|f| !f.same_as(handle));
    }

    pub(crate) async fn forget_directory(&self, handle: &DirectoryHandle) {
        let mut state = self.inner.state.lock().await;
        state.directories.retain(|d| !d.same_as(handle));
    }
}
