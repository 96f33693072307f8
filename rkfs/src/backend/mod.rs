//! Backing filesystem adapter
//!
//! The distributed filesystem is reached through a [`SessionFactory`]: every
//! session is opened under one caller identity and owned by exactly one handle
//! (or one short-lived call). Streams opened on a session are either input or
//! output, never both.
//!
//! Submodules:
//! - `localfs`: directory-backed implementation used for single-node deployments and tests

pub mod localfs;

use async_trait::async_trait;
use common::{FileStatus, RkfsError};

pub use localfs::LocalFsFactory;

#[async_trait]
pub trait InputStream: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` only at end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, RkfsError>;

    async fn close(&mut self) -> Result<(), RkfsError>;
}

#[async_trait]
pub trait OutputStream: Send {
    /// Persist the whole buffer or fail.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), RkfsError>;

    async fn close(&mut self) -> Result<(), RkfsError>;
}

#[async_trait]
pub trait Session: Send + Sync {
    fn identity(&self) -> &str;

    async fn open_read(&self, path: &str) -> Result<Box<dyn InputStream>, RkfsError>;

    async fn open_write(&self, path: &str) -> Result<Box<dyn OutputStream>, RkfsError>;

    /// Children of a directory, or the entry itself when `path` is a file.
    async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>, RkfsError>;

    /// Returns whether anything was deleted. A missing path is `Ok(false)`.
    async fn delete(&self, path: &str, recursive: bool) -> Result<bool, RkfsError>;

    async fn close(&self) -> Result<(), RkfsError>;
}

/// Opens and closes sessions. Holds no per-session state.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, identity: &str) -> Result<Box<dyn Session>, RkfsError>;

    async fn close(&self, session: Box<dyn Session>) -> Result<(), RkfsError> {
        session.close().await
    }
}

/// The single stream a handle carries.
pub enum HandleStream {
    Input(Box<dyn InputStream>),
    Output(Box<dyn OutputStream>),
}

impl HandleStream {
    pub async fn close(&mut self) -> Result<(), RkfsError> {
        match self {
            HandleStream::Input(s) => s.close().await,
            HandleStream::Output(s) => s.close().await,
        }
    }
}
