//! NTLM authentication
//!
//! Implements the NTLMSSP three-message exchange (negotiate, challenge,
//! authenticate) carried inside SessionSetup, with NTLMv1 and NTLMv2
//! response computation.

use crate::codec::filetime;
use crate::crypto::ntlm as ntlm_crypto;
use crate::error::{Error, Result};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// NTLM signature - "NTLMSSP\0"
pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_TYPE: u32 = 1;
const CHALLENGE_TYPE: u32 = 2;
const AUTHENTICATE_TYPE: u32 = 3;

bitflags! {
    /// NTLM negotiation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmFlags: u32 {
        /// Negotiate Unicode encoding
        const UNICODE = 0x0000_0001;
        /// Negotiate OEM encoding
        const OEM = 0x0000_0002;
        /// Request target name from server
        const REQUEST_TARGET = 0x0000_0004;
        /// Sign messages
        const SIGN = 0x0000_0010;
        /// Seal (encrypt) messages
        const SEAL = 0x0000_0020;
        /// NTLM session security
        const NTLM_SESSION_SECURITY = 0x0000_0200;
        /// Domain name supplied
        const DOMAIN_SUPPLIED = 0x0000_1000;
        /// Workstation name supplied
        const WORKSTATION_SUPPLIED = 0x0000_2000;
        /// Always sign messages
        const ALWAYS_SIGN = 0x0000_8000;
        /// Target type is domain
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        /// NTLMv2 session security
        const EXTENDED_SESSION_SECURITY = 0x0008_0000;
        /// Target info present
        const TARGET_INFO = 0x0080_0000;
        /// Version info present
        const VERSION = 0x0200_0000;
        /// 128-bit encryption
        const NEGOTIATE_128 = 0x2000_0000;
        /// Explicit key exchange
        const KEY_EXCHANGE = 0x4000_0000;
        /// 56-bit encryption
        const NEGOTIATE_56 = 0x8000_0000;
    }
}

/// Forced NTLM protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtlmVersion {
    V1,
    V2,
}

/// Length/max-length/offset descriptor for a variable NTLM field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityBuffer {
    pub length: u16,
    pub max_length: u16,
    pub offset: u32,
}

impl SecurityBuffer {
    pub fn with_data(len: usize, offset: u32) -> Self {
        Self {
            length: len as u16,
            max_length: len as u16,
            offset,
        }
    }

    pub fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        let length = cursor.read_u16::<LittleEndian>()?;
        let max_length = cursor.read_u16::<LittleEndian>()?;
        let offset = cursor.read_u32::<LittleEndian>()?;
        Ok(Self {
            length,
            max_length,
            offset,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u16::<LittleEndian>(self.length)?;
        buf.write_u16::<LittleEndian>(self.max_length)?;
        buf.write_u32::<LittleEndian>(self.offset)?;
        Ok(())
    }

    pub fn extract<'a>(&self, message: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.offset as usize;
        let end = start + self.length as usize;
        if end > message.len() {
            return Err(Error::Authentication(
                "security buffer extends beyond message".into(),
            ));
        }
        Ok(&message[start..end])
    }
}

/// One AV_PAIR record from a challenge's target info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvPair {
    pub id: u16,
    pub value: Vec<u8>,
}

/// Parse a target-info blob into its AV_PAIR records (terminator excluded)
pub fn parse_av_pairs(target_info: &[u8]) -> Result<Vec<AvPair>> {
    let mut pairs = Vec::new();
    let mut cursor = io::Cursor::new(target_info);
    loop {
        let id = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| Error::Authentication("target info missing terminator".into()))?;
        let len = cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| Error::Authentication("truncated AV_PAIR header".into()))?;
        if id == 0 {
            break;
        }
        let mut value = vec![0u8; len as usize];
        cursor
            .read_exact(&mut value)
            .map_err(|_| Error::Authentication("truncated AV_PAIR value".into()))?;
        pairs.push(AvPair { id, value });
    }
    Ok(pairs)
}

/// NTLM Type 1 message - Negotiate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmNegotiate {
    pub flags: NtlmFlags,
    pub domain: String,
    pub workstation: String,
}

impl NtlmNegotiate {
    /// Flag word for the requested version policy
    pub fn flags_for(version: Option<NtlmVersion>) -> NtlmFlags {
        let base = NtlmFlags::UNICODE | NtlmFlags::NTLM_SESSION_SECURITY | NtlmFlags::ALWAYS_SIGN;
        match version {
            Some(NtlmVersion::V1) => base,
            _ => {
                base | NtlmFlags::EXTENDED_SESSION_SECURITY
                    | NtlmFlags::TARGET_INFO
                    | NtlmFlags::VERSION
            }
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(32 + self.domain.len() + self.workstation.len());
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(NEGOTIATE_TYPE)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;

        // ASCII payload follows the 32-byte fixed part: domain then workstation
        let domain_offset = 32u32;
        let workstation_offset = domain_offset + self.domain.len() as u32;
        SecurityBuffer::with_data(self.domain.len(), domain_offset).serialize(&mut buf)?;
        SecurityBuffer::with_data(self.workstation.len(), workstation_offset)
            .serialize(&mut buf)?;

        buf.write_all(self.domain.as_bytes())?;
        buf.write_all(self.workstation.as_bytes())?;
        Ok(buf)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = check_signature(data, NEGOTIATE_TYPE, 32)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let domain_buf = SecurityBuffer::parse(&mut cursor)?;
        let workstation_buf = SecurityBuffer::parse(&mut cursor)?;

        Ok(Self {
            flags,
            domain: String::from_utf8_lossy(domain_buf.extract(data)?).into_owned(),
            workstation: String::from_utf8_lossy(workstation_buf.extract(data)?).into_owned(),
        })
    }
}

/// NTLM Type 2 message - Challenge (from server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallenge {
    pub flags: NtlmFlags,
    pub challenge: [u8; 8],
    pub target_name: String,
    pub target_info: Vec<u8>,
}

impl NtlmChallenge {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = check_signature(data, CHALLENGE_TYPE, 48)?;
        let target_name_buf = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);

        let mut challenge = [0u8; 8];
        cursor.read_exact(&mut challenge)?;
        let _context = cursor.read_u64::<LittleEndian>()?;
        let target_info_buf = SecurityBuffer::parse(&mut cursor)?;

        let target_name = decode_utf16le(target_name_buf.extract(data)?);
        let target_info = target_info_buf.extract(data)?.to_vec();
        Ok(Self {
            flags,
            challenge,
            target_name,
            target_info,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(CHALLENGE_TYPE)?;

        let target_name = ntlm_crypto::utf16le(&self.target_name);
        let target_name_offset = 48u32;
        SecurityBuffer::with_data(target_name.len(), target_name_offset).serialize(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.write_all(&self.challenge)?;
        buf.write_u64::<LittleEndian>(0)?;
        SecurityBuffer::with_data(
            self.target_info.len(),
            target_name_offset + target_name.len() as u32,
        )
        .serialize(&mut buf)?;

        buf.write_all(&target_name)?;
        buf.write_all(&self.target_info)?;
        Ok(buf)
    }
}

/// NTLM Type 3 message - Authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmAuthenticate {
    pub flags: NtlmFlags,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub username: String,
    pub workstation: String,
    pub session_key: Vec<u8>,
}

impl NtlmAuthenticate {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let domain = ntlm_crypto::utf16le(&self.domain);
        let username = ntlm_crypto::utf16le(&self.username);
        let workstation = ntlm_crypto::utf16le(&self.workstation);

        let mut buf = Vec::new();
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(AUTHENTICATE_TYPE)?;

        // Payload order matches the descriptor order, starting after the
        // 64-byte fixed part
        let mut offset = 64u32;
        for data in [
            &self.lm_response,
            &self.nt_response,
            &domain,
            &username,
            &workstation,
            &self.session_key,
        ] {
            SecurityBuffer::with_data(data.len(), offset).serialize(&mut buf)?;
            offset += data.len() as u32;
        }
        buf.write_u32::<LittleEndian>(self.flags.bits())?;

        buf.write_all(&self.lm_response)?;
        buf.write_all(&self.nt_response)?;
        buf.write_all(&domain)?;
        buf.write_all(&username)?;
        buf.write_all(&workstation)?;
        buf.write_all(&self.session_key)?;
        Ok(buf)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = check_signature(data, AUTHENTICATE_TYPE, 64)?;
        let lm = SecurityBuffer::parse(&mut cursor)?;
        let nt = SecurityBuffer::parse(&mut cursor)?;
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let username = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;
        let session_key = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            flags,
            lm_response: lm.extract(data)?.to_vec(),
            nt_response: nt.extract(data)?.to_vec(),
            domain: decode_utf16le(domain.extract(data)?),
            username: decode_utf16le(username.extract(data)?),
            workstation: decode_utf16le(workstation.extract(data)?),
            session_key: session_key.extract(data)?.to_vec(),
        })
    }
}

/// Result of the final authentication step
#[derive(Debug)]
pub struct NtlmOutcome {
    /// Serialized Type 3 message to send
    pub message: Vec<u8>,
    /// NTLMv2 session key; `None` on the v1 path
    pub session_key: Option<[u8; 16]>,
}

/// Authentication state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NtlmState {
    Initial,
    NegotiateSent,
    Completed,
}

/// Client-side NTLM exchange
#[derive(Debug)]
pub struct NtlmContext {
    domain: String,
    username: String,
    password: String,
    workstation: String,
    force_version: Option<NtlmVersion>,
    state: NtlmState,
}

impl NtlmContext {
    /// `workstation` is the client's short host name, upper-cased by the
    /// caller.
    pub fn new(
        domain: &str,
        username: &str,
        password: &str,
        workstation: &str,
        force_version: Option<NtlmVersion>,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            workstation: workstation.to_string(),
            force_version,
            state: NtlmState::Initial,
        }
    }

    /// Produce the Type 1 (negotiate) message
    pub fn negotiate(&mut self) -> Result<Vec<u8>> {
        if self.state != NtlmState::Initial {
            return Err(Error::Authentication("negotiate already sent".to_string()));
        }
        let message = NtlmNegotiate {
            flags: NtlmNegotiate::flags_for(self.force_version),
            domain: self.domain.clone(),
            workstation: self.workstation.clone(),
        }
        .serialize()?;
        self.state = NtlmState::NegotiateSent;
        Ok(message)
    }

    /// Consume the Type 2 (challenge) blob and produce the Type 3 message
    /// plus the v2 session key when applicable.
    pub fn authenticate(&mut self, challenge_blob: &[u8]) -> Result<NtlmOutcome> {
        if self.state != NtlmState::NegotiateSent {
            return Err(Error::Authentication(
                "challenge received before negotiate".to_string(),
            ));
        }
        let challenge = NtlmChallenge::parse(challenge_blob)?;

        // Forced version wins; otherwise the server's extended-session flag
        // selects v2.
        let use_v2 = match self.force_version {
            Some(NtlmVersion::V1) => false,
            Some(NtlmVersion::V2) => true,
            None => challenge
                .flags
                .contains(NtlmFlags::EXTENDED_SESSION_SECURITY),
        };

        let (lm_response, nt_response, session_key) = if use_v2 {
            let ntowf = ntlm_crypto::ntowf_v2(&self.username, &self.domain, &self.password)?;
            let client_challenge = ntlm_crypto::client_challenge();
            let blob = ntlm_crypto::v2_blob(
                filetime::now(),
                &client_challenge,
                &challenge.target_info,
            );
            let nt = ntlm_crypto::ntlmv2_response(&ntowf, &challenge.challenge, &blob)?;
            let lm = ntlm_crypto::lmv2_response(&ntowf, &challenge.challenge, &client_challenge)?;
            let key = ntlm_crypto::v2_session_key(&ntowf, &nt)?;
            (lm, nt, Some(key))
        } else {
            let nt = ntlm_crypto::v1_response(
                &ntlm_crypto::nt_hash(&self.password),
                &challenge.challenge,
            )?;
            let lm = ntlm_crypto::v1_response(
                &ntlm_crypto::lm_hash(&self.password)?,
                &challenge.challenge,
            )?;
            (lm.to_vec(), nt.to_vec(), None)
        };

        let message = NtlmAuthenticate {
            flags: challenge.flags,
            lm_response,
            nt_response,
            domain: self.domain.clone(),
            username: self.username.clone(),
            workstation: self.workstation.clone(),
            session_key: Vec::new(),
        }
        .serialize()?;

        self.state = NtlmState::Completed;
        Ok(NtlmOutcome {
            message,
            session_key,
        })
    }
}

fn check_signature<'a>(
    data: &'a [u8],
    expected_type: u32,
    min_len: usize,
) -> Result<io::Cursor<&'a [u8]>> {
    if data.len() < min_len {
        return Err(Error::Authentication(format!(
            "NTLM message too short: {} bytes",
            data.len()
        )));
    }
    let mut cursor = io::Cursor::new(data);
    let mut signature = [0u8; 8];
    cursor.read_exact(&mut signature)?;
    if &signature != NTLMSSP_SIGNATURE {
        return Err(Error::Authentication("invalid NTLMSSP signature".into()));
    }
    let message_type = cursor.read_u32::<LittleEndian>()?;
    if message_type != expected_type {
        return Err(Error::Authentication(format!(
            "unexpected NTLM message type {} (wanted {})",
            message_type, expected_type
        )));
    }
    Ok(cursor)
}

fn decode_utf16le(data: &[u8]) -> String {
    let words: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&words)
}
