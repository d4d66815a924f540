//! SMB2 protocol definitions

pub mod catalog;
pub mod constants;
pub mod header;
pub mod transform;

use crate::codec::{self, Fields};
use crate::error::{NtStatus, Result};
use self::constants::{Command, SMB2_HEADER_SIZE};
use self::header::Smb2Header;

/// An outbound SMB2 request
#[derive(Debug, Clone)]
pub struct Request {
    pub header: Smb2Header,
    pub body: Fields,
}

impl Request {
    pub fn new(command: Command, body: Fields) -> Self {
        Self {
            header: Smb2Header::request(command),
            body,
        }
    }

    /// Serialize header and body per the command's request schema
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = self.header.serialize()?;
        buf.extend_from_slice(&codec::encode(
            catalog::schema(self.header.command).request,
            &self.body,
        )?);
        Ok(buf)
    }
}

/// An inbound SMB2 response
#[derive(Debug, Clone)]
pub struct Response {
    pub header: Smb2Header,
    pub status: NtStatus,
    /// Decoded body; empty when the status carries an error body instead
    pub body: Fields,
    /// Decoded list payload for enumeration responses
    pub entries: Option<Vec<Fields>>,
}

impl Response {
    /// Parse one de-framed (and decrypted) SMB2 message
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let header = Smb2Header::parse(frame)?;
        let status = NtStatus::from_u32(header.status);
        let schema = catalog::schema(header.command);
        let body_bytes = &frame[SMB2_HEADER_SIZE..];

        // Error-class statuses carry the 9-byte error body, not the
        // command's response structure.
        let decode_body = status.is_success()
            || (status == NtStatus::MoreProcessingRequired
                && header.command == Command::SessionSetup);
        let body = if decode_body {
            codec::decode(schema.response, body_bytes)?
        } else {
            Fields::new()
        };

        let entries = match (status.is_success(), schema.list) {
            (true, Some(record_schema)) => {
                Some(codec::decode_list(record_schema, body.bytes("buffer")?)?)
            }
            _ => None,
        };

        Ok(Self {
            header,
            status,
            body,
            entries,
        })
    }
}
