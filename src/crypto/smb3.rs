//! SMB3 secure-channel primitives
//!
//! AES-128-CMAC signing, AES-128-CCM transform encryption, and the
//! SP800-108 derivation of the per-session key set.

use crate::crypto::kdf;
use crate::error::{Error, Result};
use aes::Aes128;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U11, U16};
use ccm::Ccm;
use cmac::{Cmac, Mac};

/// AES-128-CCM with an 11-byte nonce and 16-byte tag
type Aes128Ccm = Ccm<Aes128, U16, U11>;

/// CCM nonce length used by the transform header
pub const NONCE_LEN: usize = 11;

/// Authentication tag length
pub const TAG_LEN: usize = 16;

/// Keys derived from the NTLMv2 session key at the authenticated transition
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Client-to-server transform key (`"ServerIn "`)
    pub encryption: [u8; 16],
    /// Server-to-client transform key (`"ServerOut "`)
    pub decryption: [u8; 16],
    /// AES-CMAC signing key
    pub signing: [u8; 16],
}

impl std::fmt::Debug for SessionKeys {
    // Key material stays out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Derive the session key set from the 16-byte NTLMv2 session key
pub fn derive_keys(session_key: &[u8; 16]) -> Result<SessionKeys> {
    Ok(SessionKeys {
        encryption: kdf::derive_16(session_key, b"SMB2AESCCM\0", b"ServerIn \0")?,
        decryption: kdf::derive_16(session_key, b"SMB2AESCCM\0", b"ServerOut \0")?,
        signing: kdf::derive_16(session_key, b"SMB2AESCMAC\0", b"ServerIn \0")?,
    })
}

/// AES-128-CMAC (RFC 4493) over `data`
pub fn cmac(key: &[u8; 16], data: &[u8]) -> Result<[u8; 16]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .map_err(|_| Error::Crypto("invalid CMAC key".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Encrypt `plaintext`, returning the ciphertext and the 16-byte tag
pub fn ccm_encrypt(
    key: &[u8; 16],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let cipher = Aes128Ccm::new(key.into());
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce.into(), aad, &mut buffer)
        .map_err(|_| Error::Crypto("CCM encryption failed".to_string()))?;
    Ok((buffer, tag.into()))
}

/// Decrypt `ciphertext`, verifying the tag over ciphertext and AAD
pub fn ccm_decrypt(
    key: &[u8; 16],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>> {
    let cipher = Aes128Ccm::new(key.into());
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce.into(), aad, &mut buffer, tag.into())
        .map_err(|_| Error::Crypto("transform tag verification failed".to_string()))?;
    Ok(buffer)
}
