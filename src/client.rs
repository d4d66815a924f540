//! SMB2 transport client
//!
//! Owns the TCP connection, assigns message IDs, frames and optionally
//! encrypts outbound requests, and correlates inbound responses with
//! waiting requests by message ID. ChangeNotify completions are published
//! on a broadcast bus instead of being matched to a waiter.

use crate::auth::NtlmVersion;
use crate::crypto::smb3::{self, SessionKeys};
use crate::error::{Error, NtStatus, Result};
use crate::netbios;
use crate::protocol::constants::{header_flags, Command, DEFAULT_CHUNK_SIZE};
use crate::protocol::{transform, Request, Response};
use crate::session::{AuthOptions, Session};
use bytes::BytesMut;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Default SMB over TCP port
pub const DEFAULT_PORT: u16 = 445;

/// SMB client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP port (default 445)
    pub port: u16,
    /// Deadline for TCP connect
    pub connect_timeout: Duration,
    /// Per-request response deadline
    pub request_timeout: Duration,
    /// Force NTLM v1 or v2 instead of honoring the server's challenge flags
    pub force_ntlm_version: Option<NtlmVersion>,
    /// Workstation name override; defaults to the upper-cased short host name
    pub workstation: Option<String>,
    /// Per-message read chunk limit
    pub max_read_size: u32,
    /// Per-message write chunk limit
    pub max_write_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(5000),
            force_ntlm_version: None,
            workstation: None,
            max_read_size: DEFAULT_CHUNK_SIZE,
            max_write_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// One decoded change-notification record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub action: u32,
    pub file_name: String,
}

/// Out-of-band ChangeNotify delivery
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    /// Message ID of the ChangeNotify request this completes
    pub message_id: u64,
    pub tree_id: u32,
    pub entries: Vec<ChangeEntry>,
}

/// Asynchronous client events
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection failed underneath outstanding requests
    Error(String),
    /// A ChangeNotify completed with Success
    ChangeNotify(ChangeNotification),
}

/// How an outbound request is protected on the wire
pub(crate) enum Security {
    /// Plaintext, zero signature
    None,
    /// AES-CMAC signature in the header
    Sign(SessionKeys),
    /// Wrapped in a transform envelope
    Encrypt(SessionKeys),
}

/// Waiter slot or responses that arrived before their waiter
enum Pending {
    Waiter(oneshot::Sender<Result<Response>>),
    Ready(VecDeque<Response>),
}

struct Conn {
    writer: OwnedWriteHalf,
    host: String,
    port: u16,
    next_message_id: u64,
    pending: HashMap<u64, Pending>,
    /// Per-session inbound transform keys, registered at key derivation
    decrypt_keys: HashMap<u64, SessionKeys>,
    sessions: Vec<Session>,
    reader: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    notify_tx: broadcast::Sender<ClientEvent>,
    state: Mutex<Option<Conn>>,
}

/// SMB2/3 client over one TCP connection
#[derive(Clone)]
pub struct Client {
    pub(crate) shared: Arc<Shared>,
}

impl Client {
    /// Connect to `host` on the configured port
    pub async fn connect(host: &str, config: ClientConfig) -> Result<Self> {
        let addr = format!("{}:{}", host, config.port);
        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::ConnectTimeout)??;
        debug!(addr = %addr, "connected");

        let (read_half, write_half) = stream.into_split();
        let (notify_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            config,
            notify_tx,
            state: Mutex::new(Some(Conn {
                writer: write_half,
                host: host.to_string(),
                port: 0,
                next_message_id: 0,
                pending: HashMap::new(),
                decrypt_keys: HashMap::new(),
                sessions: Vec::new(),
                reader: None,
            })),
        });

        let reader = tokio::spawn(reader_loop(read_half, Arc::clone(&shared)));
        {
            let mut state = shared.state.lock().await;
            if let Some(conn) = state.as_mut() {
                conn.port = shared.config.port;
                conn.reader = Some(reader);
            }
        }
        Ok(Self { shared })
    }

    /// Whether the TCP connection is up
    pub async fn is_connected(&self) -> bool {
        self.shared.state.lock().await.is_some()
    }

    /// Subscribe to asynchronous client events
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.notify_tx.subscribe()
    }

    /// Negotiate, authenticate, and derive keys for a new session
    pub async fn authenticate(&self, options: AuthOptions) -> Result<Session> {
        let session = Session::new(Arc::downgrade(&self.shared));
        {
            let mut state = self.shared.state.lock().await;
            let conn = state
                .as_mut()
                .ok_or_else(|| Error::InvalidState("client is not connected".to_string()))?;
            conn.sessions.push(session.clone());
        }
        if let Err(err) = session.authenticate(&options).await {
            let mut state = self.shared.state.lock().await;
            if let Some(conn) = state.as_mut() {
                conn.sessions.retain(|s| !s.same_as(&session));
            }
            return Err(err);
        }
        Ok(session)
    }

    /// Log off every session and drop the connection.
    ///
    /// In-flight waiters reject with a connection-aborted error.
    pub async fn close(&self) -> Result<()> {
        let sessions = {
            let mut state = self.shared.state.lock().await;
            match state.as_mut() {
                Some(conn) => std::mem::take(&mut conn.sessions),
                None => return Ok(()),
            }
        };
        for session in &sessions {
            if let Err(err) = session.logoff().await {
                debug!(error = %err, "logoff during close failed");
            }
        }

        let conn = self.shared.state.lock().await.take();
        if let Some(mut conn) = conn {
            if let Some(reader) = conn.reader.take() {
                reader.abort();
            }
            let _ = conn.writer.shutdown().await;
            for (_, slot) in conn.pending.drain() {
                if let Pending::Waiter(tx) = slot {
                    let _ = tx.send(Err(Error::ConnectionAborted));
                }
            }
            debug!("connection closed");
        }
        Ok(())
    }
}

impl Shared {
    /// `\\host:port` prefix for tree-connect paths
    pub(crate) async fn share_prefix(&self) -> Result<String> {
        let state = self.state.lock().await;
        let conn = state
            .as_ref()
            .ok_or_else(|| Error::InvalidState("client is not connected".to_string()))?;
        Ok(format!("\\\\{}:{}", conn.host, conn.port))
    }

    /// Register the inbound transform key for a session
    pub(crate) async fn register_decrypt_keys(&self, session_id: u64, keys: SessionKeys) {
        let mut state = self.state.lock().await;
        if let Some(conn) = state.as_mut() {
            conn.decrypt_keys.insert(session_id, keys);
        }
    }

    /// Drop a logged-off session's transform key
    pub(crate) async fn forget_session(&self, session_id: u64) {
        let mut state = self.state.lock().await;
        if let Some(conn) = state.as_mut() {
            conn.decrypt_keys.remove(&session_id);
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.notify_tx.subscribe()
    }

    /// Send a request and await its correlated response.
    ///
    /// Statuses outside {Success, Pending, MoreProcessingRequired} reject
    /// the caller.
    pub(crate) async fn send(
        &self,
        mut request: Request,
        security: Security,
    ) -> Result<Response> {
        let (message_id, rx) = {
            let mut state = self.state.lock().await;
            let conn = state
                .as_mut()
                .ok_or_else(|| Error::InvalidState("client is not connected".to_string()))?;

            let message_id = conn.next_message_id;
            conn.next_message_id += 1;
            request.header.message_id = message_id;

            let payload = match &security {
                Security::None => request.serialize()?,
                Security::Sign(keys) => {
                    request.header.flags |= header_flags::SIGNED;
                    let mut payload = request.serialize()?;
                    let tag = smb3::cmac(&keys.signing, &payload)?;
                    payload[48..64].copy_from_slice(&tag);
                    payload
                }
                Security::Encrypt(keys) => {
                    let payload = request.serialize()?;
                    transform::encrypt(keys, request.header.session_id, &payload)?
                }
            };
            let framed = netbios::frame(&payload)?;

            let (tx, rx) = oneshot::channel();
            conn.pending.insert(message_id, Pending::Waiter(tx));
            trace!(
                message_id,
                command = ?request.header.command,
                encrypted = matches!(security, Security::Encrypt(_)),
                signed = matches!(security, Security::Sign(_)),
                "sending request"
            );
            if let Err(err) = conn.writer.write_all(&framed).await {
                conn.pending.remove(&message_id);
                return Err(err.into());
            }
            (message_id, rx)
        };

        match timeout(self.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => {
                let response = outcome?;
                if response.status.resolves_request() {
                    Ok(response)
                } else {
                    Err(Error::Status(response.status))
                }
            }
            Ok(Err(_)) => Err(Error::ConnectionAborted),
            Err(_) => {
                let mut state = self.state.lock().await;
                if let Some(conn) = state.as_mut() {
                    conn.pending.remove(&message_id);
                }
                trace!(message_id, "request timed out");
                Err(Error::RequestTimeout)
            }
        }
    }
}

async fn reader_loop(mut read_half: OwnedReadHalf, shared: Arc<Shared>) {
    let mut residual = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    let reason = loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => break "connection closed by peer".to_string(),
            Ok(n) => {
                residual.extend_from_slice(&chunk[..n]);
                let frames = match netbios::unframe(&mut residual) {
                    Ok(frames) => frames,
                    Err(err) => break err.to_string(),
                };
                for frame in frames {
                    if let Err(err) = dispatch_frame(&shared, frame).await {
                        warn!(error = %err, "dropping undecodable frame");
                    }
                }
            }
            Err(err) => break err.to_string(),
        }
    };

    debug!(reason = %reason, "reader stopped");
    let mut state = shared.state.lock().await;
    if let Some(mut conn) = state.take() {
        for (_, slot) in conn.pending.drain() {
            if let Pending::Waiter(tx) = slot {
                let _ = tx.send(Err(Error::ConnectionClosed));
            }
        }
    }
    drop(state);
    let _ = shared.notify_tx.send(ClientEvent::Error(reason));
}

async fn dispatch_frame(shared: &Arc<Shared>, frame: Vec<u8>) -> Result<()> {
    let plaintext = if netbios::is_transform_header(&frame) {
        let session_id = transform::peek_session_id(&frame)?;
        let keys = {
            let state = shared.state.lock().await;
            state
                .as_ref()
                .and_then(|conn| conn.decrypt_keys.get(&session_id).cloned())
        }
        .ok_or_else(|| {
            Error::Crypto(format!(
                "no decryption key for session 0x{:x}",
                session_id
            ))
        })?;
        transform::decrypt(&keys, &frame)?
    } else {
        frame
    };

    let response = Response::parse(&plaintext)?;
    trace!(
        message_id = response.header.message_id,
        command = ?response.header.command,
        status = %response.status,
        "received response"
    );

    // Completed change notifications go to listeners, not to a waiter.
    if response.header.command == Command::ChangeNotify && response.status == NtStatus::Success {
        let entries = response
            .entries
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|record| {
                Some(ChangeEntry {
                    action: record.uint("action").ok()? as u32,
                    file_name: record.string("file_name").ok()?.to_string(),
                })
            })
            .collect();
        let _ = shared.notify_tx.send(ClientEvent::ChangeNotify(ChangeNotification {
            message_id: response.header.message_id,
            tree_id: response.header.tree_id,
            entries,
        }));
        return Ok(());
    }

    let message_id = response.header.message_id;
    let mut state = shared.state.lock().await;
    if let Some(conn) = state.as_mut() {
        match conn.pending.remove(&message_id) {
            Some(Pending::Waiter(tx)) => {
                let _ = tx.send(Ok(response));
            }
            Some(Pending::Ready(mut queued)) => {
                queued.push_back(response);
                conn.pending.insert(message_id, Pending::Ready(queued));
            }
            None => {
                // Response outran its waiter (or the waiter timed out);
                // buffer it for a late registration.
                conn.pending
                    .insert(message_id, Pending::Ready(VecDeque::from([response])));
            }
        }
    }
    Ok(())
}
