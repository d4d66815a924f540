//! Authenticated SMB2 session
//!
//! Orchestrates dialect negotiation and the NTLM exchange, derives the
//! SMB3 key set at the authenticated transition, and owns the connected
//! trees.

use crate::auth::NtlmContext;
use crate::client::{Security, Shared};
use crate::codec::{Fields, Value};
use crate::crypto::smb3::{self, SessionKeys};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{Capabilities, Command, Dialect, SecurityMode};
use crate::protocol::{Request, Response};
use crate::tree::Tree;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Credentials for [`crate::Client::authenticate`]
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub domain: String,
    pub username: String,
    pub password: String,
}

impl AuthOptions {
    pub fn new(domain: &str, username: &str, password: &str) -> Self {
        Self {
            domain: domain.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Authentication lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Unauthenticated,
    Negotiating,
    Challenged,
    Authenticated,
    LoggedOff,
}

struct SessionState {
    session_id: u64,
    dialect: Option<Dialect>,
    auth: AuthState,
    server_capabilities: Capabilities,
    max_read_size: u32,
    max_write_size: u32,
    session_key: Option<[u8; 16]>,
    keys: Option<SessionKeys>,
    encryption_enabled: bool,
    trees: Vec<Tree>,
}

pub(crate) struct SessionInner {
    client: Weak<Shared>,
    state: Mutex<SessionState>,
}

/// An authenticated session on one client connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish()
    }
}

impl Session {
    pub(crate) fn new(client: Weak<Shared>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                client,
                state: Mutex::new(SessionState {
                    session_id: 0,
                    dialect: None,
                    auth: AuthState::Unauthenticated,
                    server_capabilities: Capabilities::empty(),
                    max_read_size: 0,
                    max_write_size: 0,
                    session_key: None,
                    keys: None,
                    encryption_enabled: false,
                    trees: Vec::new(),
                }),
            }),
        }
    }

    pub(crate) fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    fn client(&self) -> Result<Arc<Shared>> {
        self.inner
            .client
            .upgrade()
            .ok_or_else(|| Error::InvalidState("client was dropped".to_string()))
    }

    /// Event-bus subscription for change notifications
    pub(crate) fn subscribe_events(
        &self,
    ) -> Result<tokio::sync::broadcast::Receiver<crate::client::ClientEvent>> {
        Ok(self.client()?.subscribe())
    }

    /// Server-assigned session ID (zero until authenticated)
    pub async fn id(&self) -> u64 {
        self.inner.state.lock().await.session_id
    }

    /// Negotiated dialect revision
    pub async fn dialect(&self) -> Option<Dialect> {
        self.inner.state.lock().await.dialect
    }

    /// Whether outbound messages are wrapped in transform envelopes
    pub async fn encryption_enabled(&self) -> bool {
        self.inner.state.lock().await.encryption_enabled
    }

    /// Capabilities the server advertised in Negotiate
    pub async fn server_capabilities(&self) -> Capabilities {
        self.inner.state.lock().await.server_capabilities
    }

    /// The 16-byte NTLMv2 session key, when the v2 path produced one
    pub async fn session_key(&self) -> Option<[u8; 16]> {
        self.inner.state.lock().await.session_key
    }

    /// Negotiated per-message read/write limits, capped by configuration
    pub(crate) async fn chunk_limits(&self) -> (u32, u32) {
        let state = self.inner.state.lock().await;
        (state.max_read_size, state.max_write_size)
    }

    /// Run the full negotiate + NTLM exchange (spec steps 1-6)
    pub(crate) async fn authenticate(&self, options: &AuthOptions) -> Result<()> {
        let client = self.client()?;
        {
            let mut state = self.inner.state.lock().await;
            if state.auth != AuthState::Unauthenticated {
                return Err(Error::InvalidState(
                    "session already authenticated".to_string(),
                ));
            }
            state.auth = AuthState::Negotiating;
        }

        // 1-2: negotiate dialect and record server capabilities
        let negotiate_body = Fields::new()
            .with(
                "security_mode",
                Value::Uint(SecurityMode::SIGNING_ENABLED.bits() as u64),
            )
            .with("reserved", Value::Uint(0))
            .with(
                "capabilities",
                Value::Uint(Capabilities::ENCRYPTION.bits() as u64),
            )
            .with(
                "client_guid",
                Value::Bytes(Uuid::new_v4().into_bytes().to_vec()),
            )
            .with(
                "dialects",
                Value::U16s(Dialect::SUPPORTED.iter().map(|d| d.to_u16()).collect()),
            );
        let response = client
            .send(Request::new(Command::Negotiate, negotiate_body), Security::None)
            .await?;

        let dialect = Dialect::from_u16(response.body.uint("dialect_revision")? as u16)?;
        let capabilities =
            Capabilities::from_bits_retain(response.body.uint("capabilities")? as u32);
        {
            let mut state = self.inner.state.lock().await;
            state.dialect = Some(dialect);
            state.server_capabilities = capabilities;
            state.max_read_size = (response.body.uint("max_read_size")? as u32)
                .min(client.config.max_read_size);
            state.max_write_size = (response.body.uint("max_write_size")? as u32)
                .min(client.config.max_write_size);
        }
        debug!(?dialect, ?capabilities, "negotiated");

        // 3: Type 1 inside SessionSetup
        let workstation = workstation_name(&client);
        let mut ntlm = NtlmContext::new(
            &options.domain,
            &options.username,
            &options.password,
            &workstation,
            client.config.force_ntlm_version,
        );
        let type1 = ntlm.negotiate()?;
        let response = client
            .send(
                Request::new(Command::SessionSetup, session_setup_body(type1)),
                Security::None,
            )
            .await?;
        if response.status != NtStatus::MoreProcessingRequired {
            return Err(Error::Authentication(format!(
                "expected challenge, got {}",
                response.status
            )));
        }
        let session_id = response.header.session_id;
        {
            let mut state = self.inner.state.lock().await;
            state.session_id = session_id;
            state.auth = AuthState::Challenged;
        }

        // 4-5: Type 2 in, Type 3 out
        let outcome = ntlm.authenticate(response.body.bytes("buffer")?)?;
        let mut request = Request::new(Command::SessionSetup, session_setup_body(outcome.message));
        request.header.session_id = session_id;
        let response = client.send(request, Security::None).await?;
        if response.status != NtStatus::Success {
            return Err(Error::Authentication(format!(
                "authentication rejected with {}",
                response.status
            )));
        }

        // 6: derive the SMB3 key set when the exchange produced a v2 key
        let mut state = self.inner.state.lock().await;
        state.auth = AuthState::Authenticated;
        state.session_key = outcome.session_key;
        if dialect.is_smb3() {
            if let Some(session_key) = outcome.session_key {
                let keys = smb3::derive_keys(&session_key)?;
                client
                    .register_decrypt_keys(session_id, keys.clone())
                    .await;
                state.keys = Some(keys);
                if capabilities.contains(Capabilities::ENCRYPTION) {
                    state.encryption_enabled = true;
                }
            }
        }
        debug!(
            session_id,
            encryption = state.encryption_enabled,
            "authenticated"
        );
        Ok(())
    }

    /// Send a request under this session: encrypted when enabled, signed
    /// when keys exist but encryption is off, plaintext otherwise
    pub(crate) async fn send(&self, mut request: Request) -> Result<Response> {
        let client = self.client()?;
        let (session_id, security) = {
            let state = self.inner.state.lock().await;
            let security = match (&state.keys, state.encryption_enabled) {
                (Some(keys), true) => Security::Encrypt(keys.clone()),
                (Some(keys), false) => Security::Sign(keys.clone()),
                (None, _) => Security::None,
            };
            (state.session_id, security)
        };
        request.header.session_id = session_id;
        client.send(request, security).await
    }

    /// Liveness probe
    pub async fn echo(&self) -> Result<()> {
        self.ensure_authenticated().await?;
        self.send(Request::new(Command::Echo, Fields::new())).await?;
        Ok(())
    }

    /// Connect to a share by name
    pub async fn tree_connect(&self, share: &str) -> Result<Tree> {
        self.ensure_authenticated().await?;
        let client = self.client()?;
        let path = format!("{}\\{}", client.share_prefix().await?, share);

        let tree = Tree::new(self.downgrade());
        {
            let mut state = self.inner.state.lock().await;
            state.trees.push(tree.clone());
        }
        if let Err(err) = tree.connect(&path).await {
            let mut state = self.inner.state.lock().await;
            state.trees.retain(|t| !t.same_as(&tree));
            return Err(err);
        }
        Ok(tree)
    }

    /// Whether transform keys were derived for this session
    pub(crate) async fn has_transform_keys(&self) -> bool {
        self.inner.state.lock().await.keys.is_some()
    }

    /// Turn on transform encryption; requires derived keys
    pub(crate) async fn enable_encryption(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.keys.is_none() {
            return Err(Error::Crypto(
                "encryption required but no keys were derived".to_string(),
            ));
        }
        if !state.encryption_enabled {
            state.encryption_enabled = true;
            debug!(session_id = state.session_id, "encryption enabled");
        }
        Ok(())
    }

    /// Disconnect every tree, then log the session off. Idempotent.
    pub async fn logoff(&self) -> Result<()> {
        let (trees, session_id) = {
            let mut state = self.inner.state.lock().await;
            if state.auth != AuthState::Authenticated {
                return Ok(());
            }
            (std::mem::take(&mut state.trees), state.session_id)
        };
        for tree in &trees {
            if let Err(err) = tree.disconnect().await {
                debug!(error = %err, "tree disconnect during logoff failed");
            }
        }

        let result = self
            .send(Request::new(Command::LogOff, Fields::new()))
            .await;
        let mut state = self.inner.state.lock().await;
        state.auth = AuthState::LoggedOff;
        state.keys = None;
        state.encryption_enabled = false;
        drop(state);
        if let Ok(client) = self.client() {
            client.forget_session(session_id).await;
        }
        debug!(session_id, "logged off");
        result.map(|_| ())
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        let state = self.inner.state.lock().await;
        if state.auth != AuthState::Authenticated {
            return Err(Error::InvalidState(
                "session is not authenticated".to_string(),
            ));
        }
        Ok(())
    }
}

fn session_setup_body(blob: Vec<u8>) -> Fields {
    Fields::new()
        .with("flags", Value::Uint(0))
        .with(
            "security_mode",
            Value::Uint(SecurityMode::SIGNING_ENABLED.bits() as u64),
        )
        .with("capabilities", Value::Uint(0))
        .with("channel", Value::Uint(0))
        .with("previous_session_id", Value::Uint(0))
        .with("buffer", Value::Bytes(blob))
}

/// Workstation name sent in the NTLM messages: configuration override or
/// the upper-cased short host name.
fn workstation_name(client: &Shared) -> String {
    if let Some(name) = &client.config.workstation {
        return name.clone();
    }
    let hostname = gethostname::gethostname();
    let hostname = hostname.to_string_lossy();
    hostname
        .split('.')
        .next()
        .filter(|short| !short.is_empty())
        .unwrap_or("WORKSTATION")
        .to_uppercase()
}
