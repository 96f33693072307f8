//! Stream operations
//!
//! `create`/`open` bind a session and a stream to a new handle; `read`/`write`
//! go through the handle; `close` removes it and tears it down. `list_status`
//! and `remove` keep no state and use a session for the length of one call.

use crate::backend::{HandleStream, Session, SessionFactory};
use crate::buffer::BufferPool;
use crate::registry::Registry;
use common::{FileStatus, FsOp, FsReply, FsRequest, FsResponse, HandleToken, RkfsError};
use log::{debug, error, info, warn};
use std::sync::Arc;

// Idle read buffers kept around between calls.
const MAX_IDLE_BUFFERS: usize = 64;

pub struct StreamService {
    factory: Arc<dyn SessionFactory>,
    registry: Registry,
    buffers: BufferPool,
}

impl StreamService {
    pub fn new(factory: Arc<dyn SessionFactory>, registry: Registry, max_read_bytes: usize) -> Self {
        Self {
            factory,
            registry,
            buffers: BufferPool::new(max_read_bytes, MAX_IDLE_BUFFERS),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn create(&self, path: &str, identity: &str) -> Result<HandleToken, RkfsError> {
        info!("creating file {path} for user {identity}");
        let session = self.factory.open(identity).await?;
        match session.open_write(path).await {
            Ok(stream) => {
                self.register(path, identity, session, HandleStream::Output(stream))
                    .await
            }
            Err(e) => {
                error!("failed to create {path}: {e}");
                self.discard(session).await;
                Err(e)
            }
        }
    }

    pub async fn open(&self, path: &str, identity: &str) -> Result<HandleToken, RkfsError> {
        info!("opening file {path} for user {identity}");
        let session = self.factory.open(identity).await?;
        match session.open_read(path).await {
            Ok(stream) => {
                self.register(path, identity, session, HandleStream::Input(stream))
                    .await
            }
            Err(e) => {
                error!("failed to open {path}: {e}");
                self.discard(session).await;
                Err(e)
            }
        }
    }

    async fn register(
        &self,
        path: &str,
        identity: &str,
        session: Box<dyn Session>,
        stream: HandleStream,
    ) -> Result<HandleToken, RkfsError> {
        let handle = self.registry.register(path, identity, session, stream).await?;
        debug!("handle {} bound to {path}", handle.token());
        Ok(handle.token())
    }

    async fn discard(&self, session: Box<dyn Session>) {
        if let Err(e) = self.factory.close(session).await {
            warn!("failed to close session: {e}");
        }
    }

    pub async fn write(
        &self,
        token: HandleToken,
        data: &[u8],
        identity: &str,
    ) -> Result<(), RkfsError> {
        debug!("write {} bytes to {token} for {identity}", data.len());
        let handle = self.registry.lookup(token).await?;
        handle.write(data).await.inspect_err(|e| {
            error!("write to {} ({}) failed: {e}", token, handle.path());
        })
    }

    /// Up to `max_read_bytes`; an empty result is end of stream.
    pub async fn read(&self, token: HandleToken, identity: &str) -> Result<Vec<u8>, RkfsError> {
        let handle = self.registry.lookup(token).await?;
        let mut buf = self.buffers.acquire();
        let n = handle.read(&mut buf).await.inspect_err(|e| {
            error!("read from {} ({}) failed: {e}", token, handle.path());
        })?;
        debug!("read {n} bytes from {token} for {identity}");
        Ok(buf[..n].to_vec())
    }

    /// Removal decides ownership: a token already removed by another close or
    /// by the reaper reports `NotFound` and is not closed again.
    pub async fn close(&self, token: HandleToken, identity: &str) -> Result<(), RkfsError> {
        debug!("closing {token} for {identity}");
        let handle = self.registry.remove(token).await?;
        handle.teardown(self.factory.as_ref()).await.inspect_err(|e| {
            error!("close of {} ({}) failed: {e}", token, handle.path());
        })
    }

    pub async fn list_status(
        &self,
        path: &str,
        identity: &str,
    ) -> Result<Vec<FileStatus>, RkfsError> {
        info!("listing {path} for user {identity}");
        let session = self.factory.open(identity).await?;
        let listed = session.list_status(path).await;
        let closed = self.factory.close(session).await;
        let entries = listed.inspect_err(|e| error!("could not list {path}: {e}"))?;
        closed?;
        Ok(entries)
    }

    pub async fn remove(
        &self,
        path: &str,
        recursive: bool,
        identity: &str,
    ) -> Result<bool, RkfsError> {
        info!("deleting {path} (recursive: {recursive}) for user {identity}");
        let session = self.factory.open(identity).await?;
        let deleted = session.delete(path, recursive).await;
        let closed = self.factory.close(session).await;
        let deleted = deleted.inspect_err(|e| error!("could not delete {path}: {e}"))?;
        closed?;
        Ok(deleted)
    }

    /// Route one protocol request to its operation.
    pub async fn dispatch(&self, req: FsRequest) -> FsResponse {
        let FsRequest { identity, op } = req;
        let id = identity.as_str();
        match op {
            FsOp::Create { path } => self.create(&path, id).await.map(FsReply::Handle),
            FsOp::Open { path } => self.open(&path, id).await.map(FsReply::Handle),
            FsOp::Write { handle, data } => {
                self.write(handle, &data, id).await.map(|_| FsReply::Done)
            }
            FsOp::Read { handle } => self.read(handle, id).await.map(FsReply::Data),
            FsOp::Close { handle } => self.close(handle, id).await.map(|_| FsReply::Done),
            FsOp::ListStatus { path } => self.list_status(&path, id).await.map(FsReply::Status),
            FsOp::Remove { path, recursive } => self
                .remove(&path, recursive, id)
                .await
                .map(FsReply::Removed),
        }
    }
}
