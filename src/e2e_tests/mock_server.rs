//! Scripted in-process SMB2 server
//!
//! Implements just enough of the server side to exercise the client end to
//! end: NTLM challenge/verify, transform decryption with the keys derived
//! from the exchange, and an in-memory file store.

use crate::auth::ntlm::{NtlmAuthenticate, NtlmChallenge, NtlmFlags};
use crate::codec::{self, Fields, Value};
use crate::crypto::ntlm as ntlm_crypto;
use crate::crypto::smb3::{self, SessionKeys};
use crate::netbios;
use crate::protocol::catalog;
use crate::protocol::constants::{header_flags, Command};
use crate::protocol::header::Smb2Header;
use crate::protocol::transform;
use bytes::BytesMut;
use hmac::{Hmac, Mac};
use md5::Md5;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub const TEST_DOMAIN: &str = "EXAMPLE";
pub const TEST_USERNAME: &str = "user";
pub const TEST_PASSWORD: &str = "secret";
pub const SERVER_SESSION_ID: u64 = 0x0011_2233_4455_6677;
pub const SERVER_TREE_ID: u32 = 3;
const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF];

/// Server behavior switches for individual tests
#[derive(Clone, Default)]
pub struct Behavior {
    /// Advertise the encryption capability in Negotiate
    pub advertise_encryption: bool,
    /// Reject plaintext TreeConnect with AccessDenied
    pub require_encrypted_tree_connect: bool,
    /// Set the encrypt-data bit in the TreeConnect share flags
    pub encrypt_data_share: bool,
    /// Hold this many requests, then answer them in reverse order
    pub reverse_batch: Option<usize>,
    /// Delay before answering Echo
    pub echo_delay: Option<Duration>,
    /// Seed files visible in the store (name -> contents)
    pub seed_files: Vec<(String, Vec<u8>)>,
}

type Writer = Arc<Mutex<OwnedWriteHalf>>;

struct OpenEntry {
    name: String,
    closed: bool,
}

struct ServerState {
    behavior: Behavior,
    keys: Option<SessionKeys>,
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    handles: HashMap<[u8; 16], OpenEntry>,
    next_file_id: u8,
    enumerated: HashSet<[u8; 16]>,
    armed_notify: Option<(u64, bool)>,
    held: Vec<(Smb2Header, Vec<u8>, bool)>,
}

/// Handle to a running mock server
pub struct MockServer {
    pub addr: SocketAddr,
    trigger_tx: mpsc::UnboundedSender<Vec<(u32, String)>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(listener, behavior, trigger_rx));
        Self {
            addr,
            trigger_tx,
            handle,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Complete the armed ChangeNotify with these (action, name) entries
    pub fn trigger_change(&self, entries: Vec<(u32, String)>) {
        let _ = self.trigger_tx.send(entries);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The transform key set as the server uses it: the client's outbound key
/// decrypts inbound traffic, and vice versa.
fn server_keys(keys: &SessionKeys) -> SessionKeys {
    SessionKeys {
        encryption: keys.decryption,
        decryption: keys.encryption,
        signing: keys.signing,
    }
}

async fn run(
    listener: TcpListener,
    behavior: Behavior,
    mut trigger_rx: mpsc::UnboundedReceiver<Vec<(u32, String)>>,
) {
    let (stream, _) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(_) => return,
    };
    let (mut read_half, write_half) = stream.into_split();
    let writer: Writer = Arc::new(Mutex::new(write_half));

    let mut state = ServerState {
        files: behavior.seed_files.iter().cloned().collect(),
        dirs: HashSet::new(),
        behavior,
        keys: None,
        handles: HashMap::new(),
        next_file_id: 1,
        enumerated: HashSet::new(),
        armed_notify: None,
        held: Vec::new(),
    };

    let mut residual = BytesMut::with_capacity(8192);
    let mut chunk = [0u8; 8192];
    loop {
        tokio::select! {
            read = read_half.read(&mut chunk) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                residual.extend_from_slice(&chunk[..n]);
                let frames = netbios::unframe(&mut residual).unwrap();
                for frame in frames {
                    handle_frame(&mut state, frame, &writer).await;
                }
            }
            Some(entries) = trigger_rx.recv() => {
                if let Some((message_id, encrypted)) = state.armed_notify.take() {
                    let response = notify_response(message_id, &entries);
                    send(&state, response, encrypted, &writer).await;
                }
            }
        }
    }
}

async fn handle_frame(state: &mut ServerState, frame: Vec<u8>, writer: &Writer) {
    let (plaintext, encrypted) = if netbios::is_transform_header(&frame) {
        let keys = server_keys(state.keys.as_ref().expect("encrypted frame before keys"));
        (transform::decrypt(&keys, &frame).unwrap(), true)
    } else {
        (frame, false)
    };

    let header = Smb2Header::parse(&plaintext).unwrap();
    let body = plaintext[64..].to_vec();

    if !encrypted && header.flags & header_flags::SIGNED != 0 {
        let keys = state.keys.as_ref().expect("signed frame before keys");
        let mut unsigned = plaintext.clone();
        unsigned[48..64].fill(0);
        let expected = smb3::cmac(&keys.signing, &unsigned).unwrap();
        assert_eq!(&plaintext[48..64], &expected, "bad request signature");
    }

    if let Some(batch) = state.behavior.reverse_batch {
        state.held.push((header, body, encrypted));
        if state.held.len() == batch {
            let held = std::mem::take(&mut state.held);
            let mut responses = Vec::new();
            for (header, body, encrypted) in &held {
                if let Some(response) = dispatch(state, header, body, *encrypted) {
                    responses.push((response, *encrypted));
                }
            }
            for (response, encrypted) in responses.into_iter().rev() {
                send(state, response, encrypted, writer).await;
            }
        }
        return;
    }

    if header.command == Command::Echo {
        if let Some(delay) = state.behavior.echo_delay {
            let response = success_response(
                &header,
                codec::encode(catalog::ECHO_RESPONSE, &Fields::new()).unwrap(),
                header.session_id,
                header.tree_id,
            );
            let keys = state.keys.clone();
            // Weak so that dropping the server actually closes the socket
            let writer = Arc::downgrade(writer);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(writer) = writer.upgrade() {
                    let framed = frame_response(response, encrypted, keys.as_ref());
                    let _ = writer.lock().await.write_all(&framed).await;
                }
            });
            return;
        }
    }

    if let Some(response) = dispatch(state, &header, &body, encrypted) {
        send(state, response, encrypted, writer).await;
    }
}

async fn send(state: &ServerState, response: Vec<u8>, encrypted: bool, writer: &Writer) {
    let framed = frame_response(response, encrypted, state.keys.as_ref());
    writer.lock().await.write_all(&framed).await.unwrap();
}

fn frame_response(response: Vec<u8>, encrypted: bool, keys: Option<&SessionKeys>) -> Vec<u8> {
    let payload = if encrypted {
        let keys = server_keys(keys.expect("encrypting without keys"));
        transform::encrypt(&keys, SERVER_SESSION_ID, &response).unwrap()
    } else {
        response
    };
    netbios::frame(&payload).unwrap()
}

fn response_header(request: &Smb2Header, status: u32, session_id: u64, tree_id: u32) -> Smb2Header {
    let mut header = Smb2Header::request(request.command);
    header.flags = header_flags::RESPONSE;
    header.status = status;
    header.message_id = request.message_id;
    header.session_id = session_id;
    header.tree_id = tree_id;
    header.credits = 1;
    header
}

fn success_response(
    request: &Smb2Header,
    body: Vec<u8>,
    session_id: u64,
    tree_id: u32,
) -> Vec<u8> {
    let mut out = response_header(request, 0, session_id, tree_id)
        .serialize()
        .unwrap();
    out.extend_from_slice(&body);
    out
}

fn error_response(request: &Smb2Header, status: u32) -> Vec<u8> {
    let mut out = response_header(request, status, request.session_id, request.tree_id)
        .serialize()
        .unwrap();
    out.extend_from_slice(&[9, 0, 0, 0, 0, 0, 0, 0, 0]);
    out
}

fn notify_response(message_id: u64, entries: &[(u32, String)]) -> Vec<u8> {
    let mut request = Smb2Header::request(Command::ChangeNotify);
    request.message_id = message_id;
    request.session_id = SERVER_SESSION_ID;
    request.tree_id = SERVER_TREE_ID;

    let records: Vec<Fields> = entries
        .iter()
        .map(|(action, name)| {
            Fields::new()
                .with("action", Value::Uint(*action as u64))
                .with("file_name", Value::Str(name.clone()))
        })
        .collect();
    let payload = chain_records(catalog::FILE_NOTIFY_INFORMATION, &records);
    let body = codec::encode(
        catalog::CHANGE_NOTIFY_RESPONSE,
        &Fields::new()
            .with("output_buffer_offset", Value::Uint(72))
            .with("buffer", Value::Bytes(payload)),
    )
    .unwrap();
    success_response(&request, body, SERVER_SESSION_ID, SERVER_TREE_ID)
}

/// Encode chained records, patching each next_entry_offset except the last
fn chain_records(schema: &'static [codec::FieldDef], records: &[Fields]) -> Vec<u8> {
    let mut out = Vec::new();
    for (idx, record) in records.iter().enumerate() {
        let mut encoded = codec::encode(schema, record).unwrap();
        if idx + 1 < records.len() {
            let next = encoded.len() as u32;
            encoded[..4].copy_from_slice(&next.to_le_bytes());
        }
        out.extend_from_slice(&encoded);
    }
    out
}

fn dispatch(
    state: &mut ServerState,
    header: &Smb2Header,
    body: &[u8],
    encrypted: bool,
) -> Option<Vec<u8>> {
    match header.command {
        Command::Negotiate => Some(negotiate(state, header)),
        Command::SessionSetup => Some(session_setup(state, header, body)),
        Command::TreeConnect => Some(tree_connect(state, header, encrypted)),
        Command::Create => Some(create(state, header, body)),
        Command::Read => Some(read(state, header, body)),
        Command::Write => Some(write(state, header, body)),
        Command::Close => Some(close(state, header, body)),
        Command::Flush => Some(success_response(
            header,
            codec::encode(catalog::FLUSH_RESPONSE, &Fields::new()).unwrap(),
            header.session_id,
            header.tree_id,
        )),
        Command::Echo => Some(success_response(
            header,
            codec::encode(catalog::ECHO_RESPONSE, &Fields::new()).unwrap(),
            header.session_id,
            header.tree_id,
        )),
        Command::QueryDirectory => Some(query_directory(state, header, body)),
        Command::ChangeNotify => {
            state.armed_notify = Some((header.message_id, encrypted));
            Some(error_response(header, 0x0000_0103))
        }
        Command::QueryInfo => Some(query_info(state, header, body)),
        Command::SetInfo => Some(set_info(state, header, body)),
        Command::LogOff => Some(success_response(
            header,
            codec::encode(catalog::LOGOFF_RESPONSE, &Fields::new()).unwrap(),
            header.session_id,
            header.tree_id,
        )),
        Command::TreeDisconnect => Some(success_response(
            header,
            codec::encode(catalog::TREE_DISCONNECT_RESPONSE, &Fields::new()).unwrap(),
            header.session_id,
            header.tree_id,
        )),
    }
}

fn negotiate(state: &ServerState, header: &Smb2Header) -> Vec<u8> {
    let capabilities = if state.behavior.advertise_encryption {
        0x40u64
    } else {
        0
    };
    let body = codec::encode(
        catalog::NEGOTIATE_RESPONSE,
        &Fields::new()
            .with("security_mode", Value::Uint(1))
            .with("dialect_revision", Value::Uint(0x0302))
            .with("reserved", Value::Uint(0))
            .with("server_guid", Value::Bytes(vec![0x42; 16]))
            .with("capabilities", Value::Uint(capabilities))
            .with("max_transact_size", Value::Uint(0x0010_0000))
            // Small limits force the client's chunked read/write paths
            .with("max_read_size", Value::Uint(16))
            .with("max_write_size", Value::Uint(16))
            .with("system_time", Value::Uint(0))
            .with("server_start_time", Value::Uint(0))
            .with("security_buffer_offset", Value::Uint(0))
            .with("reserved2", Value::Uint(0))
            .with("buffer", Value::Bytes(Vec::new())),
    )
    .unwrap();
    success_response(header, body, 0, 0)
}

fn session_setup(state: &mut ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::SESSION_SETUP_REQUEST, body).unwrap();
    let blob = request.bytes("buffer").unwrap();
    let message_type = u32::from_le_bytes(blob[8..12].try_into().unwrap());

    if message_type == 1 {
        let challenge = NtlmChallenge {
            flags: NtlmFlags::UNICODE
                | NtlmFlags::EXTENDED_SESSION_SECURITY
                | NtlmFlags::TARGET_INFO,
            challenge: SERVER_CHALLENGE,
            target_name: TEST_DOMAIN.to_string(),
            target_info: sample_target_info(),
        }
        .serialize()
        .unwrap();

        let body = codec::encode(
            catalog::SESSION_SETUP_RESPONSE,
            &Fields::new()
                .with("session_flags", Value::Uint(0))
                .with("security_buffer_offset", Value::Uint(72))
                .with("buffer", Value::Bytes(challenge)),
        )
        .unwrap();
        let mut out = response_header(header, 0xC000_0016, SERVER_SESSION_ID, 0)
            .serialize()
            .unwrap();
        out.extend_from_slice(&body);
        return out;
    }

    // Type 3: verify the NTv2 proof and derive the transform key set
    let auth = NtlmAuthenticate::parse(blob).unwrap();
    if auth.nt_response.len() > 24 {
        let ntowf = ntlm_crypto::ntowf_v2(&auth.username, &auth.domain, TEST_PASSWORD).unwrap();
        let proof = &auth.nt_response[..16];
        let blob_part = &auth.nt_response[16..];
        let mut mac = <Hmac<Md5>>::new_from_slice(&ntowf).unwrap();
        mac.update(&SERVER_CHALLENGE);
        mac.update(blob_part);
        let expected = mac.finalize().into_bytes();
        if proof != expected.as_slice() {
            return error_response(header, 0xC000_006D);
        }
        let session_key = ntlm_crypto::v2_session_key(&ntowf, &auth.nt_response).unwrap();
        state.keys = Some(smb3::derive_keys(&session_key).unwrap());
    }

    let body = codec::encode(
        catalog::SESSION_SETUP_RESPONSE,
        &Fields::new()
            .with("session_flags", Value::Uint(0))
            .with("security_buffer_offset", Value::Uint(0))
            .with("buffer", Value::Bytes(Vec::new())),
    )
    .unwrap();
    success_response(header, body, SERVER_SESSION_ID, 0)
}

fn sample_target_info() -> Vec<u8> {
    let name = ntlm_crypto::utf16le(TEST_DOMAIN);
    let mut info = Vec::new();
    info.extend_from_slice(&2u16.to_le_bytes());
    info.extend_from_slice(&(name.len() as u16).to_le_bytes());
    info.extend_from_slice(&name);
    info.extend_from_slice(&0u32.to_le_bytes());
    info
}

fn tree_connect(state: &ServerState, header: &Smb2Header, encrypted: bool) -> Vec<u8> {
    if state.behavior.require_encrypted_tree_connect && !encrypted {
        return error_response(header, 0xC000_0022);
    }
    let share_flags = if state.behavior.encrypt_data_share {
        0x08u64
    } else {
        0
    };
    let body = codec::encode(
        catalog::TREE_CONNECT_RESPONSE,
        &Fields::new()
            .with("share_type", Value::Uint(1))
            .with("reserved", Value::Uint(0))
            .with("share_flags", Value::Uint(share_flags))
            .with("capabilities", Value::Uint(0))
            .with("maximal_access", Value::Uint(0x001F_01FF)),
    )
    .unwrap();
    success_response(header, body, header.session_id, SERVER_TREE_ID)
}

fn create(state: &mut ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::CREATE_REQUEST, body).unwrap();
    let name = request.string("name").unwrap().to_string();
    let disposition = request.uint("create_disposition").unwrap();
    let options = request.uint("create_options").unwrap();
    let directory = options & 0x01 != 0;

    // The empty name is the share root
    let exists =
        name.is_empty() || state.files.contains_key(&name) || state.dirs.contains(&name);
    match disposition {
        // Open
        0x01 => {
            if !exists {
                return error_response(header, 0xC000_0034);
            }
        }
        // Create
        0x02 => {
            if exists {
                return error_response(header, 0xC000_0035);
            }
            if directory {
                state.dirs.insert(name.clone());
            } else {
                state.files.insert(name.clone(), Vec::new());
            }
        }
        // OpenIf
        0x03 => {
            if !exists {
                if directory {
                    state.dirs.insert(name.clone());
                } else {
                    state.files.insert(name.clone(), Vec::new());
                }
            }
        }
        // Supersede / Overwrite / OverwriteIf truncate
        _ => {
            state.files.insert(name.clone(), Vec::new());
        }
    }

    let file_id = [state.next_file_id; 16];
    state.next_file_id += 1;
    state.handles.insert(
        file_id,
        OpenEntry {
            name: name.clone(),
            closed: false,
        },
    );

    let size = state.files.get(&name).map(|data| data.len()).unwrap_or(0) as u64;
    let attributes = if name.is_empty() || state.dirs.contains(&name) {
        0x10u64
    } else {
        0x80
    };
    let body = codec::encode(
        catalog::CREATE_RESPONSE,
        &Fields::new()
            .with("oplock_level", Value::Uint(0))
            .with("flags", Value::Uint(0))
            .with("create_action", Value::Uint(1))
            .with("creation_time", Value::Uint(0))
            .with("last_access_time", Value::Uint(0))
            .with("last_write_time", Value::Uint(0))
            .with("change_time", Value::Uint(0))
            .with("allocation_size", Value::Uint(size))
            .with("end_of_file", Value::Uint(size))
            .with("file_attributes", Value::Uint(attributes))
            .with("reserved2", Value::Uint(0))
            .with("file_id", Value::Bytes(file_id.to_vec()))
            .with("create_contexts_offset", Value::Uint(0))
            .with("create_contexts_length", Value::Uint(0)),
    )
    .unwrap();
    success_response(header, body, header.session_id, header.tree_id)
}

fn lookup_name(state: &ServerState, body: &Fields) -> Option<String> {
    let raw = body.bytes("file_id").ok()?;
    let mut file_id = [0u8; 16];
    file_id.copy_from_slice(raw);
    state.handles.get(&file_id).map(|entry| entry.name.clone())
}

fn read(state: &ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::READ_REQUEST, body).unwrap();
    let name = match lookup_name(state, &request) {
        Some(name) => name,
        None => return error_response(header, 0xC000_0008),
    };
    let data = state.files.get(&name).cloned().unwrap_or_default();
    let offset = request.uint("offset").unwrap() as usize;
    let length = request.uint("length").unwrap() as usize;
    if offset >= data.len() {
        return error_response(header, 0xC000_0011);
    }
    let end = (offset + length).min(data.len());
    let chunk = data[offset..end].to_vec();

    let body = codec::encode(
        catalog::READ_RESPONSE,
        &Fields::new()
            .with("data_offset", Value::Uint(80))
            .with("data_remaining", Value::Uint(0))
            .with("reserved2", Value::Uint(0))
            .with("buffer", Value::Bytes(chunk)),
    )
    .unwrap();
    success_response(header, body, header.session_id, header.tree_id)
}

fn write(state: &mut ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::WRITE_REQUEST, body).unwrap();
    let name = match lookup_name(state, &request) {
        Some(name) => name,
        None => return error_response(header, 0xC000_0008),
    };
    let offset = request.uint("offset").unwrap() as usize;
    let data = request.bytes("buffer").unwrap();

    let file = state.files.entry(name).or_default();
    if file.len() < offset + data.len() {
        file.resize(offset + data.len(), 0);
    }
    file[offset..offset + data.len()].copy_from_slice(data);

    let body = codec::encode(
        catalog::WRITE_RESPONSE,
        &Fields::new()
            .with("count", Value::Uint(data.len() as u64))
            .with("remaining", Value::Uint(0)),
    )
    .unwrap();
    success_response(header, body, header.session_id, header.tree_id)
}

fn close(state: &mut ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::CLOSE_REQUEST, body).unwrap();
    let raw = request.bytes("file_id").unwrap();
    let mut file_id = [0u8; 16];
    file_id.copy_from_slice(raw);

    let size = match state.handles.get_mut(&file_id) {
        Some(entry) if !entry.closed => {
            entry.closed = true;
            state
                .files
                .get(&entry.name)
                .map(|data| data.len())
                .unwrap_or(0) as u64
        }
        _ => return error_response(header, 0xC000_0128),
    };

    let body = codec::encode(
        catalog::CLOSE_RESPONSE,
        &Fields::new()
            .with("flags", Value::Uint(0))
            .with("reserved", Value::Uint(0))
            .with("creation_time", Value::Uint(0))
            .with("last_access_time", Value::Uint(0))
            .with("last_write_time", Value::Uint(0))
            .with("change_time", Value::Uint(0))
            .with("allocation_size", Value::Uint(size))
            .with("end_of_file", Value::Uint(size))
            .with("file_attributes", Value::Uint(0x80)),
    )
    .unwrap();
    success_response(header, body, header.session_id, header.tree_id)
}

fn query_directory(state: &mut ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::QUERY_DIRECTORY_REQUEST, body).unwrap();
    let raw = request.bytes("file_id").unwrap();
    let mut file_id = [0u8; 16];
    file_id.copy_from_slice(raw);

    if !state.enumerated.insert(file_id) {
        return error_response(header, 0x8000_0006);
    }

    let mut names: Vec<String> = vec![".".to_string(), "..".to_string()];
    let mut files: Vec<&String> = state.files.keys().collect();
    files.sort();
    names.extend(files.into_iter().cloned());

    let records: Vec<Fields> = names
        .iter()
        .map(|name| {
            let size = state.files.get(name).map(|data| data.len()).unwrap_or(0) as u64;
            let attributes = if name.starts_with('.') || state.dirs.contains(name) {
                0x10u64
            } else {
                0x80
            };
            Fields::new()
                .with("file_index", Value::Uint(0))
                .with("creation_time", Value::Uint(0))
                .with("last_access_time", Value::Uint(0))
                .with("last_write_time", Value::Uint(0))
                .with("change_time", Value::Uint(0))
                .with("end_of_file", Value::Uint(size))
                .with("allocation_size", Value::Uint(size))
                .with("file_attributes", Value::Uint(attributes))
                .with("file_name", Value::Str(name.clone()))
        })
        .collect();
    let payload = chain_records(catalog::FILE_DIRECTORY_INFORMATION, &records);

    let body = codec::encode(
        catalog::QUERY_DIRECTORY_RESPONSE,
        &Fields::new()
            .with("output_buffer_offset", Value::Uint(72))
            .with("buffer", Value::Bytes(payload)),
    )
    .unwrap();
    success_response(header, body, header.session_id, header.tree_id)
}

fn query_info(state: &ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::QUERY_INFO_REQUEST, body).unwrap();
    let name = match lookup_name(state, &request) {
        Some(name) => name,
        None => return error_response(header, 0xC000_0008),
    };
    let size = state.files.get(&name).map(|data| data.len()).unwrap_or(0) as u64;

    // FileStandardInformation
    let mut info = Vec::with_capacity(24);
    info.extend_from_slice(&size.to_le_bytes());
    info.extend_from_slice(&size.to_le_bytes());
    info.extend_from_slice(&1u32.to_le_bytes());
    info.push(0);
    info.push(0);
    info.extend_from_slice(&[0u8; 2]);

    let body = codec::encode(
        catalog::QUERY_INFO_RESPONSE,
        &Fields::new()
            .with("output_buffer_offset", Value::Uint(72))
            .with("buffer", Value::Bytes(info)),
    )
    .unwrap();
    success_response(header, body, header.session_id, header.tree_id)
}

fn set_info(state: &mut ServerState, header: &Smb2Header, body: &[u8]) -> Vec<u8> {
    let request = codec::decode(catalog::SET_INFO_REQUEST, body).unwrap();
    let name = match lookup_name(state, &request) {
        Some(name) => name,
        None => return error_response(header, 0xC000_0008),
    };
    let info_class = request.uint("file_info_class").unwrap() as u8;
    let buffer = request.bytes("buffer").unwrap();

    match info_class {
        // FileDispositionInformation: delete on close
        0x0D => {
            if buffer.first() == Some(&1) {
                state.files.remove(&name);
                state.dirs.remove(&name);
            }
        }
        // FileEndOfFileInformation
        0x14 => {
            let mut size = [0u8; 8];
            size.copy_from_slice(&buffer[..8]);
            let size = u64::from_le_bytes(size) as usize;
            state.files.entry(name).or_default().resize(size, 0);
        }
        // FileRenameInformation
        0x0A => {
            let mut len = [0u8; 4];
            len.copy_from_slice(&buffer[16..20]);
            let len = u32::from_le_bytes(len) as usize;
            let new_name: String = String::from_utf16_lossy(
                &buffer[20..20 + len]
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect::<Vec<u16>>(),
            );
            if let Some(contents) = state.files.remove(&name) {
                state.files.insert(new_name.clone(), contents);
            }
            if state.dirs.remove(&name) {
                state.dirs.insert(new_name);
            }
        }
        _ => {}
    }

    let body = codec::encode(catalog::SET_INFO_RESPONSE, &Fields::new()).unwrap();
    success_response(header, body, header.session_id, header.tree_id)
}
