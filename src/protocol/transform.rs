//! SMB3 Transform envelope
//!
//! Encrypted messages travel as a 52-byte transform header followed by the
//! AES-128-CCM ciphertext. The CCM tag doubles as the envelope signature;
//! the AAD is the header from the nonce through the session ID.

use crate::crypto::smb3::{self, SessionKeys};
use crate::error::{Error, Result};
use crate::netbios::TRANSFORM_MAGIC;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::RngCore;
use std::io;

/// Transform header size
pub const TRANSFORM_HEADER_SIZE: usize = 52;

/// Offset of the AAD region (nonce through session ID)
const AAD_START: usize = 20;

/// Encrypted-message flag
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// The 52-byte transform header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformHeader {
    /// CCM authentication tag over AAD and ciphertext
    pub signature: [u8; 16],
    /// Random per-message nonce; the first 11 bytes feed CCM
    pub nonce: [u8; 16],
    pub original_message_size: u32,
    pub flags: u16,
    pub session_id: u64,
}

impl TransformHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < TRANSFORM_HEADER_SIZE {
            return Err(Error::Framing(format!(
                "transform header truncated: {} bytes",
                buf.len()
            )));
        }
        if buf[..4] != TRANSFORM_MAGIC {
            return Err(Error::Framing(format!(
                "unknown transform protocol id {:02x?}",
                &buf[..4]
            )));
        }

        let mut signature = [0u8; 16];
        signature.copy_from_slice(&buf[4..20]);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&buf[20..36]);

        let mut cursor = io::Cursor::new(&buf[36..TRANSFORM_HEADER_SIZE]);
        let original_message_size = cursor.read_u32::<LittleEndian>()?;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let session_id = cursor.read_u64::<LittleEndian>()?;

        Ok(Self {
            signature,
            nonce,
            original_message_size,
            flags,
            session_id,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(TRANSFORM_HEADER_SIZE);
        buf.extend_from_slice(&TRANSFORM_MAGIC);
        buf.extend_from_slice(&self.signature);
        buf.extend_from_slice(&self.nonce);
        buf.write_u32::<LittleEndian>(self.original_message_size)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u64::<LittleEndian>(self.session_id)?;
        Ok(buf)
    }

    fn ccm_nonce(&self) -> [u8; smb3::NONCE_LEN] {
        let mut nonce = [0u8; smb3::NONCE_LEN];
        nonce.copy_from_slice(&self.nonce[..smb3::NONCE_LEN]);
        nonce
    }
}

/// Session ID of an encrypted frame, read without decrypting
pub fn peek_session_id(frame: &[u8]) -> Result<u64> {
    Ok(TransformHeader::parse(frame)?.session_id)
}

/// Wrap a plaintext SMB2 message in an encrypted transform envelope
pub fn encrypt(keys: &SessionKeys, session_id: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let header = TransformHeader {
        signature: [0; 16],
        nonce,
        original_message_size: plaintext.len() as u32,
        flags: FLAG_ENCRYPTED,
        session_id,
    };

    let mut envelope = header.serialize()?;
    let aad = envelope[AAD_START..TRANSFORM_HEADER_SIZE].to_vec();
    let (ciphertext, tag) =
        smb3::ccm_encrypt(&keys.encryption, &header.ccm_nonce(), &aad, plaintext)?;

    envelope[4..20].copy_from_slice(&tag);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Unwrap an encrypted transform envelope, verifying its tag
pub fn decrypt(keys: &SessionKeys, frame: &[u8]) -> Result<Vec<u8>> {
    let header = TransformHeader::parse(frame)?;
    let ciphertext = &frame[TRANSFORM_HEADER_SIZE..];
    let aad = &frame[AAD_START..TRANSFORM_HEADER_SIZE];

    let plaintext = smb3::ccm_decrypt(
        &keys.decryption,
        &header.ccm_nonce(),
        aad,
        ciphertext,
        &header.signature,
    )?;
    if plaintext.len() != header.original_message_size as usize {
        return Err(Error::Crypto(format!(
            "decrypted length {} disagrees with envelope size {}",
            plaintext.len(),
            header.original_message_size
        )));
    }
    Ok(plaintext)
}
