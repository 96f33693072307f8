//! Wire protocol shared by the rkfs server and its clients.
//!
//! Every call travels as one [`FsRequest`] and is answered by one [`FsResponse`].
//! Handles are named only by their [`HandleToken`]; all other state stays on the server.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Largest encoded reply a client accepts.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// Largest payload a single read may return; the rest of a reply frame is
/// left for the envelope.
pub const MAX_READ_PAYLOAD: usize = MAX_RESPONSE_BYTES - 64 * 1024;

/// Opaque name of one open stream on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleToken(Uuid);

impl HandleToken {
    /// A fresh random token. Uniqueness against live handles is checked by the registry.
    pub fn random() -> Self {
        HandleToken(Uuid::new_v4())
    }
}

impl fmt::Display for HandleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error kinds reported to clients. None of them is retried by the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum RkfsError {
    /// Backend unreachable or identity rejected when opening a session.
    #[error("connection error: {0}")]
    Connection(String),
    /// Stream read/write/close failure, or a failed create/delete.
    #[error("io error: {0}")]
    Io(String),
    /// Unknown handle token, or a path the backend reports as missing.
    #[error("not found: {0}")]
    NotFound(String),
}

impl RkfsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RkfsError::NotFound(_))
    }
}

impl From<std::io::Error> for RkfsError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => RkfsError::NotFound(e.to_string()),
            _ => RkfsError::Io(e.to_string()),
        }
    }
}

/// Snapshot of one path at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub is_dir: bool,
    pub name: String,
    pub owner: String,
    pub group: String,
    pub permission: String,
    pub replication: u16,
    /// Milliseconds since the Unix epoch.
    pub mod_time: i64,
    pub block_size: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsRequest {
    /// Caller identity, trusted as-is.
    pub identity: String,
    pub op: FsOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FsOp {
    Create { path: String },
    Open { path: String },
    Write { handle: HandleToken, data: Vec<u8> },
    Read { handle: HandleToken },
    Close { handle: HandleToken },
    ListStatus { path: String },
    Remove { path: String, recursive: bool },
}

impl FsOp {
    pub fn name(&self) -> &'static str {
        match self {
            FsOp::Create { .. } => "create",
            FsOp::Open { .. } => "open",
            FsOp::Write { .. } => "write",
            FsOp::Read { .. } => "read",
            FsOp::Close { .. } => "close",
            FsOp::ListStatus { .. } => "listStatus",
            FsOp::Remove { .. } => "remove",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsReply {
    Handle(HandleToken),
    /// Empty data marks end of stream.
    Data(Vec<u8>),
    Done,
    Status(Vec<FileStatus>),
    Removed(bool),
}

pub type FsResponse = Result<FsReply, RkfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let e: RkfsError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(e.is_not_found());
        let e: RkfsError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no").into();
        assert!(matches!(e, RkfsError::Io(_)));
    }

    #[test]
    fn token_display_is_uuid_text() {
        let token = HandleToken::random();
        let text = token.to_string();
        assert_eq!(Uuid::parse_str(&text).unwrap(), token.0);
        assert_ne!(HandleToken::random(), token);
    }

    #[test]
    fn error_response_survives_bincode() {
        let resp: FsResponse = Err(RkfsError::NotFound("unknown handle".into()));
        let bytes = bincode::serialize(&resp).unwrap();
        let back: FsResponse = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, resp);
    }
}
