//! Cryptographic primitives for NTLM authentication and the SMB3 secure channel

pub mod kdf;
pub mod ntlm;
pub mod smb3;
