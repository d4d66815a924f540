//! Error types for the SMB2 client

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SMB client operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TCP connect did not complete within the configured deadline
    #[error("Connect timed out")]
    ConnectTimeout,

    /// A request did not receive its response within the configured deadline
    #[error("Request timed out")]
    RequestTimeout,

    /// Connection closed while requests were outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection was closed locally with requests still in flight
    #[error("Connection aborted")]
    ConnectionAborted,

    /// NetBIOS or SMB2 framing error
    #[error("Framing error: {0}")]
    Framing(String),

    /// Binary structure encode/decode error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Server returned a non-success status outside the tolerated set
    #[error("SMB status {0}")]
    Status(NtStatus),

    /// NTLMSSP exchange failed
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Key derivation, signing, or transform encryption failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Operation issued on a non-connected client/tree or a closed handle
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Status code carried by this error, if it originated from the server.
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            Error::Status(status) => Some(*status),
            _ => None,
        }
    }
}

/// NTSTATUS codes the client recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtStatus {
    /// The operation completed successfully
    Success,
    /// Long-running operation; the real response arrives later
    Pending,
    /// No more files to enumerate
    NoMoreFiles,
    /// Expected after the NTLM challenge leg of SessionSetup
    MoreProcessingRequired,
    /// Access denied
    AccessDenied,
    /// The object name is not found
    ObjectNameNotFound,
    /// A component of the path does not exist
    ObjectPathNotFound,
    /// The file is in use with incompatible share access
    SharingViolation,
    /// The user name or password is incorrect
    LogonFailure,
    /// The handle was already closed
    FileClosed,
    /// Read past the end of the file
    EndOfFile,
    /// Cannot create a file that already exists
    ObjectNameCollision,
    /// The directory is not empty
    DirectoryNotEmpty,
    /// Any status not otherwise recognized
    Other(u32),
}

impl NtStatus {
    /// Create from a raw status word
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0000_0000 => NtStatus::Success,
            0x0000_0103 => NtStatus::Pending,
            0x8000_0006 => NtStatus::NoMoreFiles,
            0xC000_0016 => NtStatus::MoreProcessingRequired,
            0xC000_0022 => NtStatus::AccessDenied,
            0xC000_0034 => NtStatus::ObjectNameNotFound,
            0xC000_003A => NtStatus::ObjectPathNotFound,
            0xC000_0043 => NtStatus::SharingViolation,
            0xC000_006D => NtStatus::LogonFailure,
            0xC000_0011 => NtStatus::EndOfFile,
            0xC000_0101 => NtStatus::DirectoryNotEmpty,
            0xC000_0128 => NtStatus::FileClosed,
            0xC000_0035 => NtStatus::ObjectNameCollision,
            other => NtStatus::Other(other),
        }
    }

    /// Raw status word
    pub fn as_u32(self) -> u32 {
        match self {
            NtStatus::Success => 0x0000_0000,
            NtStatus::Pending => 0x0000_0103,
            NtStatus::NoMoreFiles => 0x8000_0006,
            NtStatus::MoreProcessingRequired => 0xC000_0016,
            NtStatus::AccessDenied => 0xC000_0022,
            NtStatus::ObjectNameNotFound => 0xC000_0034,
            NtStatus::ObjectPathNotFound => 0xC000_003A,
            NtStatus::SharingViolation => 0xC000_0043,
            NtStatus::LogonFailure => 0xC000_006D,
            NtStatus::EndOfFile => 0xC000_0011,
            NtStatus::DirectoryNotEmpty => 0xC000_0101,
            NtStatus::FileClosed => 0xC000_0128,
            NtStatus::ObjectNameCollision => 0xC000_0035,
            NtStatus::Other(value) => value,
        }
    }

    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error-class status (severity bits 0b11)
    pub fn is_error(self) -> bool {
        self.as_u32() & 0xC000_0000 == 0xC000_0000
    }

    /// Statuses that resolve the waiting request rather than failing it
    pub fn resolves_request(self) -> bool {
        matches!(
            self,
            NtStatus::Success | NtStatus::Pending | NtStatus::MoreProcessingRequired
        )
    }

    /// Statuses that mean "the target does not exist"
    pub fn is_not_found(self) -> bool {
        matches!(
            self,
            NtStatus::ObjectNameNotFound | NtStatus::ObjectPathNotFound
        )
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NtStatus::Success => "Success",
            NtStatus::Pending => "Pending",
            NtStatus::NoMoreFiles => "No more files",
            NtStatus::MoreProcessingRequired => "More processing required",
            NtStatus::AccessDenied => "Access denied",
            NtStatus::ObjectNameNotFound => "Object name not found",
            NtStatus::ObjectPathNotFound => "Object path not found",
            NtStatus::SharingViolation => {
                "Sharing violation (the file is open elsewhere with incompatible share access)"
            }
            NtStatus::LogonFailure => "Logon failure",
            NtStatus::EndOfFile => "End of file",
            NtStatus::DirectoryNotEmpty => "Directory not empty",
            NtStatus::FileClosed => "File closed",
            NtStatus::ObjectNameCollision => "Object name collision",
            NtStatus::Other(_) => "Unrecognized status",
        };
        write!(f, "{} (0x{:08X})", msg, self.as_u32())
    }
}
