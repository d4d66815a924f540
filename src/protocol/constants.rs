//! SMB2/3 protocol constants

use crate::error::{Error, Result};
use bitflags::bitflags;

/// SMB2 magic as bytes (0xFE 'S' 'M' 'B')
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB2 header size
pub const SMB2_HEADER_SIZE: usize = 64;

/// Credits requested in every request header
pub const DEFAULT_CREDITS: u16 = 8191;

/// Default per-message read/write chunk limit (64 KiB)
pub const DEFAULT_CHUNK_SIZE: u32 = 0x0001_0000;

/// SMB2 command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    LogOff = 0x0002,
    TreeConnect = 0x0003,
    TreeDisconnect = 0x0004,
    Create = 0x0005,
    Close = 0x0006,
    Flush = 0x0007,
    Read = 0x0008,
    Write = 0x0009,
    Echo = 0x000D,
    QueryDirectory = 0x000E,
    ChangeNotify = 0x000F,
    QueryInfo = 0x0010,
    SetInfo = 0x0011,
}

impl Command {
    pub fn from_u16(value: u16) -> Result<Self> {
        Ok(match value {
            0x0000 => Command::Negotiate,
            0x0001 => Command::SessionSetup,
            0x0002 => Command::LogOff,
            0x0003 => Command::TreeConnect,
            0x0004 => Command::TreeDisconnect,
            0x0005 => Command::Create,
            0x0006 => Command::Close,
            0x0007 => Command::Flush,
            0x0008 => Command::Read,
            0x0009 => Command::Write,
            0x000D => Command::Echo,
            0x000E => Command::QueryDirectory,
            0x000F => Command::ChangeNotify,
            0x0010 => Command::QueryInfo,
            0x0011 => Command::SetInfo,
            other => {
                return Err(Error::Framing(format!(
                    "unknown SMB2 command 0x{:04x}",
                    other
                )))
            }
        })
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// SMB2 dialect revisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum Dialect {
    Smb202 = 0x0202,
    Smb210 = 0x0210,
    Smb300 = 0x0300,
    Smb302 = 0x0302,
}

impl Dialect {
    /// Dialects offered in Negotiate, oldest first
    pub const SUPPORTED: [Dialect; 4] = [
        Dialect::Smb202,
        Dialect::Smb210,
        Dialect::Smb300,
        Dialect::Smb302,
    ];

    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0x0202 => Ok(Dialect::Smb202),
            0x0210 => Ok(Dialect::Smb210),
            0x0300 => Ok(Dialect::Smb300),
            0x0302 => Ok(Dialect::Smb302),
            other => Err(Error::Framing(format!(
                "unsupported dialect 0x{:04x}",
                other
            ))),
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// SMB 3.x dialects derive per-session keys
    pub fn is_smb3(self) -> bool {
        self >= Dialect::Smb300
    }
}

/// SMB2 header flags
pub mod header_flags {
    pub const RESPONSE: u32 = 0x0000_0001;
    pub const ASYNC_COMMAND: u32 = 0x0000_0002;
    pub const RELATED_OPERATIONS: u32 = 0x0000_0004;
    pub const SIGNED: u32 = 0x0000_0008;
}

bitflags! {
    /// Negotiate security mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x0001;
        const SIGNING_REQUIRED = 0x0002;
    }
}

bitflags! {
    /// Global capabilities exchanged in Negotiate
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const DFS = 0x0000_0001;
        const LEASING = 0x0000_0002;
        const LARGE_MTU = 0x0000_0004;
        const MULTI_CHANNEL = 0x0000_0008;
        const PERSISTENT_HANDLES = 0x0000_0010;
        const DIRECTORY_LEASING = 0x0000_0020;
        const ENCRYPTION = 0x0000_0040;
    }
}

bitflags! {
    /// Share flags from the TreeConnect response
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareFlags: u32 {
        const DFS = 0x0000_0001;
        const DFS_ROOT = 0x0000_0002;
        /// The share requires transform-encrypted messages
        const ENCRYPT_DATA = 0x0000_0008;
        const RESTRICT_EXCLUSIVE_OPENS = 0x0000_0100;
        const FORCE_SHARED_DELETE = 0x0000_0200;
        const ALLOW_NAMESPACE_CACHING = 0x0000_0400;
        const ACCESS_BASED_DIRECTORY_ENUM = 0x0000_0800;
    }
}

bitflags! {
    /// File access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DesiredAccess: u32 {
        const FILE_READ_DATA = 0x0000_0001;
        const FILE_WRITE_DATA = 0x0000_0002;
        const FILE_APPEND_DATA = 0x0000_0004;
        const FILE_READ_EA = 0x0000_0008;
        const FILE_WRITE_EA = 0x0000_0010;
        const FILE_EXECUTE = 0x0000_0020;
        const FILE_READ_ATTRIBUTES = 0x0000_0080;
        const FILE_WRITE_ATTRIBUTES = 0x0000_0100;
        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const SYNCHRONIZE = 0x0010_0000;
        const GENERIC_ALL = 0x1000_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_WRITE = 0x4000_0000;
        const GENERIC_READ = 0x8000_0000;
    }
}

bitflags! {
    /// Share access for Create
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShareAccess: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const DELETE = 0x0000_0004;
    }
}

/// Create dispositions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CreateDisposition {
    /// Overwrite if it exists, create otherwise
    Supersede = 0x0000_0000,
    /// Open only if it exists
    Open = 0x0000_0001,
    /// Create only if it does not exist
    Create = 0x0000_0002,
    /// Open if it exists, create otherwise
    OpenIf = 0x0000_0003,
    /// Open and truncate; fail if missing
    Overwrite = 0x0000_0004,
    /// Truncate if it exists, create otherwise
    OverwriteIf = 0x0000_0005,
}

bitflags! {
    /// Create options
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE = 0x0000_0001;
        const WRITE_THROUGH = 0x0000_0002;
        const SEQUENTIAL_ONLY = 0x0000_0004;
        const NON_DIRECTORY_FILE = 0x0000_0040;
        const NO_EA_KNOWLEDGE = 0x0000_0200;
        const RANDOM_ACCESS = 0x0000_0800;
        const DELETE_ON_CLOSE = 0x0000_1000;
    }
}

bitflags! {
    /// File attributes as defined in MS-FSCC
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const DIRECTORY = 0x0000_0010;
        const ARCHIVE = 0x0000_0020;
        const NORMAL = 0x0000_0080;
        const TEMPORARY = 0x0000_0100;
        const SPARSE_FILE = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
        const COMPRESSED = 0x0000_0800;
    }
}

/// Impersonation level for Create
pub const IMPERSONATION_IMPERSONATION: u32 = 0x0000_0002;

/// Oplock levels (only "none" and the boolean batch request are used)
pub mod oplock_level {
    pub const NONE: u8 = 0x00;
    pub const BATCH: u8 = 0x09;
}

bitflags! {
    /// ChangeNotify completion filter
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompletionFilter: u32 {
        const FILE_NAME = 0x0000_0001;
        const DIR_NAME = 0x0000_0002;
        const ATTRIBUTES = 0x0000_0004;
        const SIZE = 0x0000_0008;
        const LAST_WRITE = 0x0000_0010;
        const LAST_ACCESS = 0x0000_0020;
        const CREATION = 0x0000_0040;
        const EA = 0x0000_0080;
        const SECURITY = 0x0000_0100;
        const STREAM_NAME = 0x0000_0200;
        const STREAM_SIZE = 0x0000_0400;
        const STREAM_WRITE = 0x0000_0800;
    }
}

bitflags! {
    /// QueryDirectory flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryDirectoryFlags: u8 {
        const RESTART_SCANS = 0x01;
        const RETURN_SINGLE_ENTRY = 0x02;
        const INDEX_SPECIFIED = 0x04;
        const REOPEN = 0x10;
    }
}

/// ChangeNotify flags
pub mod change_notify_flags {
    pub const WATCH_TREE: u16 = 0x0001;
}

/// File information classes used by Query/Set/QueryDirectory
pub mod file_info_class {
    pub const FILE_DIRECTORY_INFORMATION: u8 = 0x01;
    pub const FILE_BASIC_INFORMATION: u8 = 0x04;
    pub const FILE_STANDARD_INFORMATION: u8 = 0x05;
    pub const FILE_RENAME_INFORMATION: u8 = 0x0A;
    pub const FILE_DISPOSITION_INFORMATION: u8 = 0x0D;
    pub const FILE_END_OF_FILE_INFORMATION: u8 = 0x14;
}

/// Info types for Query/SetInfo
pub mod info_type {
    pub const FILE: u8 = 0x01;
    pub const FILESYSTEM: u8 = 0x02;
    pub const SECURITY: u8 = 0x03;
    pub const QUOTA: u8 = 0x04;
}
