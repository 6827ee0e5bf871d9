//! Wire error taxonomy and the crate's fallible-operation error type.

use std::io;

/// Single-byte wire error codes. Discriminants are stable: they are
/// transmitted as-is in `ErrorRec`/`UploadFail`/handshake `ERROR` payloads,
/// so reordering this enum is a wire-breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Unknown = 0,
    Exists = 1,
    Filter = 2,
    NoSpace = 3,
    Perms = 4,
    Absolute = 5,
    UnsafePath = 6,
    BadPath = 7,
    BadPayload = 8,
    OpenFail = 9,
    WriteFail = 10,
    ReadFail = 11,
    NotFound = 12,
    Timeout = 13,
    Checksum = 14,
    Config = 15,
    Compat = 16,
    Auth = 17,
    Closed = 18,
    Connect = 19,
    Protocol = 20,
    CommitFail = 21,
    Conflict = 22,
    BadRemote = 23,
}

impl ErrorCode {
    pub fn from_byte(b: u8) -> ErrorCode {
        match b {
            0 => ErrorCode::Unknown,
            1 => ErrorCode::Exists,
            2 => ErrorCode::Filter,
            3 => ErrorCode::NoSpace,
            4 => ErrorCode::Perms,
            5 => ErrorCode::Absolute,
            6 => ErrorCode::UnsafePath,
            7 => ErrorCode::BadPath,
            8 => ErrorCode::BadPayload,
            9 => ErrorCode::OpenFail,
            10 => ErrorCode::WriteFail,
            11 => ErrorCode::ReadFail,
            12 => ErrorCode::NotFound,
            13 => ErrorCode::Timeout,
            14 => ErrorCode::Checksum,
            15 => ErrorCode::Config,
            16 => ErrorCode::Compat,
            17 => ErrorCode::Auth,
            18 => ErrorCode::Closed,
            19 => ErrorCode::Connect,
            20 => ErrorCode::Protocol,
            21 => ErrorCode::CommitFail,
            22 => ErrorCode::Conflict,
            23 => ErrorCode::BadRemote,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Session-fatal codes terminate the connection; no further records follow.
    pub fn is_session_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::Closed
                | ErrorCode::Timeout
                | ErrorCode::Protocol
                | ErrorCode::Compat
                | ErrorCode::Auth
                | ErrorCode::Config
                | ErrorCode::Connect
        )
    }

    /// Local-fatal codes abort the current batch but not the whole process.
    pub fn is_local_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::NoSpace
                | ErrorCode::Perms
                | ErrorCode::OpenFail
                | ErrorCode::WriteFail
                | ErrorCode::ReadFail
        )
    }

    /// Per-item codes abort only the current file; the batch continues.
    pub fn is_per_item(self) -> bool {
        matches!(
            self,
            ErrorCode::Exists
                | ErrorCode::NotFound
                | ErrorCode::BadPath
                | ErrorCode::UnsafePath
                | ErrorCode::Absolute
                | ErrorCode::Checksum
                | ErrorCode::Filter
                | ErrorCode::Conflict
        )
    }

    /// Text a client-facing log line should show for this code.
    pub fn client_message(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "an unknown error occurred",
            ErrorCode::Exists => "destination already exists",
            ErrorCode::Filter => "item was filtered out",
            ErrorCode::NoSpace => "server reported no space left",
            ErrorCode::Perms => "permission denied",
            ErrorCode::Absolute => "absolute remote paths are rejected",
            ErrorCode::UnsafePath => "remote path escapes the share root",
            ErrorCode::BadPath => "malformed remote path",
            ErrorCode::BadPayload => "malformed protocol payload",
            ErrorCode::OpenFail => "server failed to open destination file",
            ErrorCode::WriteFail => "server failed to write destination file",
            ErrorCode::ReadFail => "server failed to read source file",
            ErrorCode::NotFound => "remote item not found",
            ErrorCode::Timeout => "connection timed out",
            ErrorCode::Checksum => "checksum mismatch, transfer rejected",
            ErrorCode::Config => "server is not configured correctly",
            ErrorCode::Compat => "incompatible protocol features",
            ErrorCode::Auth => "authentication failed",
            ErrorCode::Closed => "connection closed",
            ErrorCode::Connect => "could not connect to server",
            ErrorCode::Protocol => "protocol violation",
            ErrorCode::CommitFail => "failed to commit received file",
            ErrorCode::Conflict => "conflicting concurrent operation",
            ErrorCode::BadRemote => "remote identity rejected",
        }
    }

    /// Text a server-facing log line should show for this code.
    pub fn server_message(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "unknown error",
            ErrorCode::Exists => "client requested overwrite of existing file",
            ErrorCode::Filter => "item excluded by filter",
            ErrorCode::NoSpace => "local filesystem is full",
            ErrorCode::Perms => "local permission check failed",
            ErrorCode::Absolute => "client sent an absolute path",
            ErrorCode::UnsafePath => "client path resolved outside the share root",
            ErrorCode::BadPath => "client path failed to parse",
            ErrorCode::BadPayload => "received a malformed record payload",
            ErrorCode::OpenFail => "failed to open local file",
            ErrorCode::WriteFail => "failed to write local file",
            ErrorCode::ReadFail => "failed to read local file",
            ErrorCode::NotFound => "requested item does not exist",
            ErrorCode::Timeout => "peer did not respond in time",
            ErrorCode::Checksum => "received content failed checksum verification",
            ErrorCode::Config => "missing or invalid server configuration",
            ErrorCode::Compat => "client advertised incompatible features",
            ErrorCode::Auth => "client failed authentication or pin check",
            ErrorCode::Closed => "peer closed the connection",
            ErrorCode::Connect => "could not accept/establish connection",
            ErrorCode::Protocol => "peer violated the wire protocol",
            ErrorCode::CommitFail => "failed to commit staged file into place",
            ErrorCode::Conflict => "conflicting concurrent operation",
            ErrorCode::BadRemote => "remote identity did not match pinned key",
        }
    }
}

/// Translates an I/O error into the wire code the spec assigns it.
pub fn from_io_error(e: &io::Error, fallback: ErrorCode) -> ErrorCode {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ErrorCode::Perms,
        io::ErrorKind::NotFound => ErrorCode::NotFound,
        io::ErrorKind::AlreadyExists => ErrorCode::Exists,
        _ => {
            #[cfg(unix)]
            {
                if let Some(raw) = e.raw_os_error() {
                    if raw == libc_enospc() {
                        return ErrorCode::NoSpace;
                    }
                }
            }
            fallback
        }
    }
}

#[cfg(unix)]
fn libc_enospc() -> i32 {
    28 // ENOSPC on Linux and most other unix targets
}

/// The crate's error type. Carries either a wire-level code (received from
/// or destined for a peer) or a local condition that never gets a code.
#[derive(Debug, thiserror::Error)]
pub enum DepotError {
    #[error("{0}")]
    Code(ErrorCode),

    #[error("peer reported: {0}")]
    Remote(ErrorCode),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("identity store error: {0}")]
    Identity(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
}

impl DepotError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DepotError::Code(c) | DepotError::Remote(c) => *c,
            DepotError::Io(_) => ErrorCode::Unknown,
            DepotError::Protocol(_) => ErrorCode::Protocol,
            DepotError::Identity(_) => ErrorCode::Config,
            DepotError::Crypto(_) => ErrorCode::Auth,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
