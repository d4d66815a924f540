//! SMB2/SMB3 client in Rust
//!
//! Connects to Windows file servers and Samba over TCP, authenticates with
//! NTLM (v1 and v2), negotiates dialects 2.0.2 through 3.0.2, and speaks the
//! SMB3 secure channel: per-session key derivation, AES-CMAC signing keys,
//! and AES-128-CCM transform encryption.
//!
//! ```no_run
//! use smb2_client::{AuthOptions, Client, ClientConfig};
//!
//! # async fn example() -> smb2_client::Result<()> {
//! let client = Client::connect("fileserver", ClientConfig::default()).await?;
//! let session = client
//!     .authenticate(AuthOptions::new("EXAMPLE", "user", "secret"))
//!     .await?;
//! let tree = session.tree_connect("Documents").await?;
//! let report = tree.read_file("reports\\q3.txt").await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod handle;
pub mod netbios;
pub mod protocol;
pub mod session;
pub mod tree;


pub use auth::NtlmVersion;
pub use client::{ChangeEntry, ChangeNotification, Client, ClientConfig, ClientEvent};
pub use error::{Error, NtStatus, Result};
pub use handle::{DirEntry, DirectoryHandle, FileHandle, HandleAttributes};
pub use session::{AuthOptions, Session};
pub use tree::Tree;
