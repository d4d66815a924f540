//! SMB2 header encode/decode

use crate::error::{Error, Result};
use crate::protocol::constants::{header_flags, Command, DEFAULT_CREDITS, SMB2_HEADER_SIZE, SMB2_MAGIC};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read};

/// SMB2 header (64 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub credit_charge: u16,
    /// Status on responses; channel sequence + reserved on requests
    pub status: u32,
    pub command: Command,
    pub credits: u16,
    pub flags: u32,
    pub next_command: u32,
    pub message_id: u64,
    /// Reserved on sync messages; upper half of the async ID otherwise
    pub reserved: u32,
    /// Tree ID on sync messages; lower half of the async ID otherwise
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    /// Header for an outbound request
    pub fn request(command: Command) -> Self {
        Self {
            credit_charge: 0,
            status: 0,
            command,
            credits: DEFAULT_CREDITS,
            flags: 0,
            next_command: 0,
            message_id: 0,
            reserved: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SMB2_HEADER_SIZE {
            return Err(Error::Framing(format!(
                "SMB2 header truncated: {} bytes",
                buf.len()
            )));
        }

        let mut cursor = io::Cursor::new(buf);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if magic != SMB2_MAGIC {
            return Err(Error::Framing(format!(
                "unknown SMB2 protocol id {:02x?}",
                magic
            )));
        }

        let structure_size = cursor.read_u16::<LittleEndian>()?;
        if structure_size != SMB2_HEADER_SIZE as u16 {
            return Err(Error::Framing(format!(
                "unexpected header structure size {}",
                structure_size
            )));
        }
        let credit_charge = cursor.read_u16::<LittleEndian>()?;
        let status = cursor.read_u32::<LittleEndian>()?;
        let command = Command::from_u16(cursor.read_u16::<LittleEndian>()?)?;
        let credits = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let next_command = cursor.read_u32::<LittleEndian>()?;
        let message_id = cursor.read_u64::<LittleEndian>()?;
        let reserved = cursor.read_u32::<LittleEndian>()?;
        let tree_id = cursor.read_u32::<LittleEndian>()?;
        let session_id = cursor.read_u64::<LittleEndian>()?;
        let mut signature = [0u8; 16];
        cursor.read_exact(&mut signature)?;

        Ok(Self {
            credit_charge,
            status,
            command,
            credits,
            flags,
            next_command,
            message_id,
            reserved,
            tree_id,
            session_id,
            signature,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(SMB2_HEADER_SIZE);
        buf.extend_from_slice(&SMB2_MAGIC);
        buf.write_u16::<LittleEndian>(SMB2_HEADER_SIZE as u16)?;
        buf.write_u16::<LittleEndian>(self.credit_charge)?;
        buf.write_u32::<LittleEndian>(self.status)?;
        buf.write_u16::<LittleEndian>(self.command.to_u16())?;
        buf.write_u16::<LittleEndian>(self.credits)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        buf.write_u32::<LittleEndian>(self.next_command)?;
        buf.write_u64::<LittleEndian>(self.message_id)?;
        buf.write_u32::<LittleEndian>(self.reserved)?;
        buf.write_u32::<LittleEndian>(self.tree_id)?;
        buf.write_u64::<LittleEndian>(self.session_id)?;
        buf.extend_from_slice(&self.signature);
        Ok(buf)
    }

    pub fn is_response(&self) -> bool {
        self.flags & header_flags::RESPONSE != 0
    }

    pub fn is_async(&self) -> bool {
        self.flags & header_flags::ASYNC_COMMAND != 0
    }
}
