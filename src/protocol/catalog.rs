//! Per-command request/response schemas
//!
//! Each SMB2 command body is declared as a constant field schema and driven
//! through the structure codec. Commands whose responses carry an
//! enumeration payload also declare the schema of one payload record.

use crate::codec::{bytes, bytes_sized, filetime, u16_list, uint, uint_with, utf16, FieldDef};
use crate::protocol::constants::Command;

/// Schemas for one command
#[derive(Debug, Clone, Copy)]
pub struct CommandSchema {
    pub request: &'static [FieldDef],
    pub response: &'static [FieldDef],
    /// Record schema of the response's list payload, if the command has one
    pub list: Option<&'static [FieldDef]>,
}

pub const NEGOTIATE_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 36),
    uint("dialect_count", 2),
    uint("security_mode", 2),
    uint("reserved", 2),
    uint("capabilities", 4),
    bytes("client_guid", 16),
    uint_with("client_start_time", 8, 0),
    u16_list("dialects", "dialect_count"),
];

pub const NEGOTIATE_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 65),
    uint("security_mode", 2),
    uint("dialect_revision", 2),
    uint("reserved", 2),
    bytes("server_guid", 16),
    uint("capabilities", 4),
    uint("max_transact_size", 4),
    uint("max_read_size", 4),
    uint("max_write_size", 4),
    filetime("system_time"),
    filetime("server_start_time"),
    uint("security_buffer_offset", 2),
    uint("security_buffer_length", 2),
    uint("reserved2", 4),
    bytes_sized("buffer", "security_buffer_length"),
];

pub const SESSION_SETUP_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 25),
    uint("flags", 1),
    uint("security_mode", 1),
    uint("capabilities", 4),
    uint("channel", 4),
    uint_with("security_buffer_offset", 2, 88),
    uint("security_buffer_length", 2),
    uint("previous_session_id", 8),
    bytes_sized("buffer", "security_buffer_length"),
];

pub const SESSION_SETUP_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 9),
    uint("session_flags", 2),
    uint("security_buffer_offset", 2),
    uint("security_buffer_length", 2),
    bytes_sized("buffer", "security_buffer_length"),
];

pub const LOGOFF_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 4),
    uint("reserved", 2),
];

pub const LOGOFF_RESPONSE: &[FieldDef] = LOGOFF_REQUEST;

pub const ECHO_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 4),
    uint("reserved", 2),
];

pub const ECHO_RESPONSE: &[FieldDef] = ECHO_REQUEST;

pub const TREE_CONNECT_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 9),
    uint("reserved", 2),
    uint_with("path_offset", 2, 72),
    uint("path_length", 2),
    utf16("path", "path_length"),
];

pub const TREE_CONNECT_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 16),
    uint("share_type", 1),
    uint("reserved", 1),
    uint("share_flags", 4),
    uint("capabilities", 4),
    uint("maximal_access", 4),
];

pub const TREE_DISCONNECT_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 4),
    uint("reserved", 2),
];

pub const TREE_DISCONNECT_RESPONSE: &[FieldDef] = TREE_DISCONNECT_REQUEST;

pub const CREATE_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 57),
    uint("security_flags", 1),
    uint("requested_oplock_level", 1),
    uint_with("impersonation_level", 4, 2),
    uint("smb_create_flags", 8),
    uint("reserved", 8),
    uint("desired_access", 4),
    uint("file_attributes", 4),
    uint("share_access", 4),
    uint("create_disposition", 4),
    uint("create_options", 4),
    uint_with("name_offset", 2, 120),
    uint("name_length", 2),
    uint("create_contexts_offset", 4),
    uint("create_contexts_length", 4),
    utf16("name", "name_length"),
];

pub const CREATE_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 89),
    uint("oplock_level", 1),
    uint("flags", 1),
    uint("create_action", 4),
    filetime("creation_time"),
    filetime("last_access_time"),
    filetime("last_write_time"),
    filetime("change_time"),
    uint("allocation_size", 8),
    uint("end_of_file", 8),
    uint("file_attributes", 4),
    uint("reserved2", 4),
    bytes("file_id", 16),
    uint("create_contexts_offset", 4),
    uint("create_contexts_length", 4),
];

pub const CLOSE_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 24),
    uint("flags", 2),
    uint("reserved", 4),
    bytes("file_id", 16),
];

pub const CLOSE_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 60),
    uint("flags", 2),
    uint("reserved", 4),
    filetime("creation_time"),
    filetime("last_access_time"),
    filetime("last_write_time"),
    filetime("change_time"),
    uint("allocation_size", 8),
    uint("end_of_file", 8),
    uint("file_attributes", 4),
];

pub const FLUSH_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 24),
    uint("reserved1", 2),
    uint("reserved2", 4),
    bytes("file_id", 16),
];

pub const FLUSH_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 4),
    uint("reserved", 2),
];

pub const READ_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 49),
    uint_with("padding", 1, 0x50),
    uint("flags", 1),
    uint("length", 4),
    uint("offset", 8),
    bytes("file_id", 16),
    uint("minimum_count", 4),
    uint("channel", 4),
    uint("remaining_bytes", 4),
    uint("read_channel_info_offset", 2),
    uint("read_channel_info_length", 2),
    uint("buffer", 1),
];

pub const READ_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 17),
    uint("data_offset", 1),
    uint("reserved", 1),
    uint("data_length", 4),
    uint("data_remaining", 4),
    uint("reserved2", 4),
    bytes_sized("buffer", "data_length"),
];

pub const WRITE_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 49),
    uint_with("data_offset", 2, 112),
    uint("length", 4),
    uint("offset", 8),
    bytes("file_id", 16),
    uint("channel", 4),
    uint("remaining_bytes", 4),
    uint("write_channel_info_offset", 2),
    uint("write_channel_info_length", 2),
    uint("flags", 4),
    bytes_sized("buffer", "length"),
];

pub const WRITE_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 17),
    uint("reserved", 2),
    uint("count", 4),
    uint("remaining", 4),
    uint("write_channel_info_offset", 2),
    uint("write_channel_info_length", 2),
];

pub const QUERY_DIRECTORY_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 33),
    uint("file_information_class", 1),
    uint("flags", 1),
    uint("file_index", 4),
    bytes("file_id", 16),
    uint_with("file_name_offset", 2, 96),
    uint("file_name_length", 2),
    uint_with("output_buffer_length", 4, 0x0001_0000),
    utf16("file_name", "file_name_length"),
];

pub const QUERY_DIRECTORY_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 9),
    uint("output_buffer_offset", 2),
    uint("output_buffer_length", 4),
    bytes_sized("buffer", "output_buffer_length"),
];

/// FileDirectoryInformation record (information class 0x01)
pub const FILE_DIRECTORY_INFORMATION: &[FieldDef] = &[
    uint("next_entry_offset", 4),
    uint("file_index", 4),
    filetime("creation_time"),
    filetime("last_access_time"),
    filetime("last_write_time"),
    filetime("change_time"),
    uint("end_of_file", 8),
    uint("allocation_size", 8),
    uint("file_attributes", 4),
    uint("file_name_length", 4),
    utf16("file_name", "file_name_length"),
];

pub const CHANGE_NOTIFY_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 32),
    uint("flags", 2),
    uint_with("output_buffer_length", 4, 0x0001_0000),
    bytes("file_id", 16),
    uint("completion_filter", 4),
    uint("reserved", 4),
];

pub const CHANGE_NOTIFY_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 9),
    uint("output_buffer_offset", 2),
    uint("output_buffer_length", 4),
    bytes_sized("buffer", "output_buffer_length"),
];

/// FileNotifyInformation record
pub const FILE_NOTIFY_INFORMATION: &[FieldDef] = &[
    uint("next_entry_offset", 4),
    uint("action", 4),
    uint("file_name_length", 4),
    utf16("file_name", "file_name_length"),
];

pub const QUERY_INFO_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 41),
    uint("info_type", 1),
    uint("file_info_class", 1),
    uint_with("output_buffer_length", 4, 0x0001_0000),
    uint("input_buffer_offset", 2),
    uint("reserved", 2),
    uint("input_buffer_length", 4),
    uint("additional_information", 4),
    uint("flags", 4),
    bytes("file_id", 16),
    bytes_sized("buffer", "input_buffer_length"),
];

pub const QUERY_INFO_RESPONSE: &[FieldDef] = &[
    uint_with("structure_size", 2, 9),
    uint("output_buffer_offset", 2),
    uint("output_buffer_length", 4),
    bytes_sized("buffer", "output_buffer_length"),
];

pub const SET_INFO_REQUEST: &[FieldDef] = &[
    uint_with("structure_size", 2, 33),
    uint("info_type", 1),
    uint("file_info_class", 1),
    uint("buffer_length", 4),
    uint_with("buffer_offset", 2, 96),
    uint("reserved", 2),
    uint("additional_information", 4),
    bytes("file_id", 16),
    bytes_sized("buffer", "buffer_length"),
];

pub const SET_INFO_RESPONSE: &[FieldDef] = &[uint_with("structure_size", 2, 2)];

const NEGOTIATE: CommandSchema = CommandSchema {
    request: NEGOTIATE_REQUEST,
    response: NEGOTIATE_RESPONSE,
    list: None,
};
const SESSION_SETUP: CommandSchema = CommandSchema {
    request: SESSION_SETUP_REQUEST,
    response: SESSION_SETUP_RESPONSE,
    list: None,
};
const LOGOFF: CommandSchema = CommandSchema {
    request: LOGOFF_REQUEST,
    response: LOGOFF_RESPONSE,
    list: None,
};
const TREE_CONNECT: CommandSchema = CommandSchema {
    request: TREE_CONNECT_REQUEST,
    response: TREE_CONNECT_RESPONSE,
    list: None,
};
const TREE_DISCONNECT: CommandSchema = CommandSchema {
    request: TREE_DISCONNECT_REQUEST,
    response: TREE_DISCONNECT_RESPONSE,
    list: None,
};
const CREATE: CommandSchema = CommandSchema {
    request: CREATE_REQUEST,
    response: CREATE_RESPONSE,
    list: None,
};
const CLOSE: CommandSchema = CommandSchema {
    request: CLOSE_REQUEST,
    response: CLOSE_RESPONSE,
    list: None,
};
const FLUSH: CommandSchema = CommandSchema {
    request: FLUSH_REQUEST,
    response: FLUSH_RESPONSE,
    list: None,
};
const READ: CommandSchema = CommandSchema {
    request: READ_REQUEST,
    response: READ_RESPONSE,
    list: None,
};
const WRITE: CommandSchema = CommandSchema {
    request: WRITE_REQUEST,
    response: WRITE_RESPONSE,
    list: None,
};
const ECHO: CommandSchema = CommandSchema {
    request: ECHO_REQUEST,
    response: ECHO_RESPONSE,
    list: None,
};
const QUERY_DIRECTORY: CommandSchema = CommandSchema {
    request: QUERY_DIRECTORY_REQUEST,
    response: QUERY_DIRECTORY_RESPONSE,
    list: Some(FILE_DIRECTORY_INFORMATION),
};
const CHANGE_NOTIFY: CommandSchema = CommandSchema {
    request: CHANGE_NOTIFY_REQUEST,
    response: CHANGE_NOTIFY_RESPONSE,
    list: Some(FILE_NOTIFY_INFORMATION),
};
const QUERY_INFO: CommandSchema = CommandSchema {
    request: QUERY_INFO_REQUEST,
    response: QUERY_INFO_RESPONSE,
    list: None,
};
const SET_INFO: CommandSchema = CommandSchema {
    request: SET_INFO_REQUEST,
    response: SET_INFO_RESPONSE,
    list: None,
};

/// Look up the schemas for a command
pub fn schema(command: Command) -> &'static CommandSchema {
    match command {
        Command::Negotiate => &NEGOTIATE,
        Command::SessionSetup => &SESSION_SETUP,
        Command::LogOff => &LOGOFF,
        Command::TreeConnect => &TREE_CONNECT,
        Command::TreeDisconnect => &TREE_DISCONNECT,
        Command::Create => &CREATE,
        Command::Close => &CLOSE,
        Command::Flush => &FLUSH,
        Command::Read => &READ,
        Command::Write => &WRITE,
        Command::Echo => &ECHO,
        Command::QueryDirectory => &QUERY_DIRECTORY,
        Command::ChangeNotify => &CHANGE_NOTIFY,
        Command::QueryInfo => &QUERY_INFO,
        Command::SetInfo => &SET_INFO,
    }
}
