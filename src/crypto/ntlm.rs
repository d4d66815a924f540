//! NTLM cryptographic functions
//!
//! Covers the v1 DES-based responses, the v2 HMAC-MD5 responses, and
//! session-key derivation.

use crate::error::{Error, Result};
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;

type HmacMd5 = Hmac<Md5>;

/// Fixed plaintext DES-encrypted by each LM key half
const LM_MAGIC: [u8; 8] = *b"KGS!@#$%";

/// NT hash: MD4 of the UTF-16LE password (NTOWFv1)
pub fn nt_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(utf16le(password));
    hasher.finalize().into()
}

/// LM hash: two DES encryptions of `"KGS!@#$%"` keyed by the halves of the
/// upper-cased, 14-byte-padded password
pub fn lm_hash(password: &str) -> Result<[u8; 16]> {
    let upper = password.to_uppercase();
    let mut padded = [0u8; 14];
    for (dst, src) in padded.iter_mut().zip(upper.bytes()) {
        *dst = src;
    }

    let mut hash = [0u8; 16];
    hash[..8].copy_from_slice(&des_encrypt(&expand_des_key(&padded[..7]), &LM_MAGIC)?);
    hash[8..].copy_from_slice(&des_encrypt(&expand_des_key(&padded[7..14]), &LM_MAGIC)?);
    Ok(hash)
}

/// v1 challenge response: the 16-byte hash is zero-padded to 21 bytes, split
/// into three 7-byte DES keys, and each encrypts the server challenge
pub fn v1_response(hash: &[u8; 16], challenge: &[u8; 8]) -> Result<[u8; 24]> {
    let mut padded = [0u8; 21];
    padded[..16].copy_from_slice(hash);

    let mut response = [0u8; 24];
    for i in 0..3 {
        let key = expand_des_key(&padded[i * 7..i * 7 + 7]);
        response[i * 8..i * 8 + 8].copy_from_slice(&des_encrypt(&key, challenge)?);
    }
    Ok(response)
}

/// NTOWFv2: `HMAC_MD5(NTOWFv1, UTF16LE(uppercase(username) || domain))`.
/// The username is uppercased; the domain keeps its supplied casing.
pub fn ntowf_v2(username: &str, domain: &str, password: &str) -> Result<[u8; 16]> {
    let identity = format!("{}{}", username.to_uppercase(), domain);
    let mut mac = hmac_md5(&nt_hash(password))?;
    mac.update(&utf16le(&identity));
    Ok(mac.finalize().into_bytes().into())
}

/// NTLMv2 `temp` blob hashed into the NT response
pub fn v2_blob(timestamp: u64, client_challenge: &[u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(28 + target_info.len() + 4);
    blob.extend_from_slice(&[0x01, 0x01]);
    blob.extend_from_slice(&[0u8; 6]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);
    blob
}

/// NTv2 response: `HMAC_MD5(NTOWFv2, challenge || temp) || temp`
pub fn ntlmv2_response(
    ntowf: &[u8; 16],
    server_challenge: &[u8; 8],
    blob: &[u8],
) -> Result<Vec<u8>> {
    let mut mac = hmac_md5(ntowf)?;
    mac.update(server_challenge);
    mac.update(blob);

    let mut response = mac.finalize().into_bytes().to_vec();
    response.extend_from_slice(blob);
    Ok(response)
}

/// LMv2 response: `HMAC_MD5(NTOWFv2, challenge || client_challenge) || client_challenge`
pub fn lmv2_response(
    ntowf: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>> {
    let mut mac = hmac_md5(ntowf)?;
    mac.update(server_challenge);
    mac.update(client_challenge);

    let mut response = mac.finalize().into_bytes().to_vec();
    response.extend_from_slice(client_challenge);
    Ok(response)
}

/// NTLMv2 session key: `HMAC_MD5(NTOWFv2, NTProofStr)` where `NTProofStr`
/// is the first 16 bytes of the NTv2 response
pub fn v2_session_key(ntowf: &[u8; 16], nt_response: &[u8]) -> Result<[u8; 16]> {
    if nt_response.len() < 16 {
        return Err(Error::Crypto("NT response shorter than proof".to_string()));
    }
    let mut mac = hmac_md5(ntowf)?;
    mac.update(&nt_response[..16]);
    Ok(mac.finalize().into_bytes().into())
}

/// Random 8-byte client challenge from the OS entropy source
pub fn client_challenge() -> [u8; 8] {
    let mut challenge = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Expand a 7-byte key half to an 8-byte DES key, inserting a parity bit
/// after every 7 data bits
pub fn expand_des_key(key: &[u8]) -> [u8; 8] {
    debug_assert_eq!(key.len(), 7);
    let mut out = [0u8; 8];
    out[0] = key[0] >> 1;
    out[1] = ((key[0] & 0x01) << 6) | (key[1] >> 2);
    out[2] = ((key[1] & 0x03) << 5) | (key[2] >> 3);
    out[3] = ((key[2] & 0x07) << 4) | (key[3] >> 4);
    out[4] = ((key[3] & 0x0F) << 3) | (key[4] >> 5);
    out[5] = ((key[4] & 0x1F) << 2) | (key[5] >> 6);
    out[6] = ((key[5] & 0x3F) << 1) | (key[6] >> 7);
    out[7] = key[6] & 0x7F;
    for b in &mut out {
        *b <<= 1;
    }
    out
}

fn des_encrypt(key: &[u8; 8], block: &[u8; 8]) -> Result<[u8; 8]> {
    let des =
        Des::new_from_slice(key).map_err(|_| Error::Crypto("invalid DES key".to_string()))?;
    let mut out = [0u8; 8];
    des.encrypt_block_b2b(block.into(), (&mut out).into());
    Ok(out)
}

fn hmac_md5(key: &[u8]) -> Result<HmacMd5> {
    <HmacMd5 as Mac>::new_from_slice(key).map_err(|_| Error::Crypto("invalid HMAC key".to_string()))
}

/// UTF-16LE bytes of a string
pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}
