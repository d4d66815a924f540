//! NIST SP800-108 counter-mode key derivation over HMAC-SHA256

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derive `bits / 8` bytes from `key`.
///
/// The PRF input is `BE32(i) || label || 0x00 || context || BE32(bits)`;
/// label and context carry their own NUL terminators as the protocol
/// defines them.
pub fn derive(key: &[u8], label: &[u8], context: &[u8], bits: u32) -> Result<Vec<u8>> {
    let mut fixed = Vec::with_capacity(4 + label.len() + 1 + context.len() + 4);
    fixed.extend_from_slice(&[0u8; 4]);
    fixed.extend_from_slice(label);
    fixed.push(0);
    fixed.extend_from_slice(context);
    fixed.extend_from_slice(&bits.to_be_bytes());

    let mut output = Vec::with_capacity((bits as usize) / 8);
    let mut counter: u32 = 1;
    while output.len() < (bits as usize) / 8 {
        fixed[..4].copy_from_slice(&counter.to_be_bytes());
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| Error::Crypto("invalid KDF key".to_string()))?;
        mac.update(&fixed);
        let block = mac.finalize().into_bytes();

        let remaining = (bits as usize) / 8 - output.len();
        output.extend_from_slice(&block[..remaining.min(block.len())]);
        counter += 1;
    }
    Ok(output)
}

/// Derive a 128-bit key
pub fn derive_16(key: &[u8], label: &[u8], context: &[u8]) -> Result<[u8; 16]> {
    let out = derive(key, label, context, 128)?;
    let mut key16 = [0u8; 16];
    key16.copy_from_slice(&out);
    Ok(key16)
}
