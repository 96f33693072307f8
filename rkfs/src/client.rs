use crate::tls::make_client_endpoint;
use anyhow::{Context, Result, anyhow};
use common::{
    FileStatus, FsOp, FsReply, FsRequest, FsResponse, HandleToken, MAX_RESPONSE_BYTES, RkfsError,
};
use quinn::{Connection, Endpoint};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// payload of each write issued by upload
const UPLOAD_CHUNK: usize = 1024 * 1024;

pub struct RkfsClient {
    // keeps the socket alive for the connection
    _endpoint: Endpoint,
    conn: Connection,
    identity: String,
}

impl RkfsClient {
    pub async fn connect(server_addr: &str, identity: &str) -> Result<Self> {
        let endpoint = make_client_endpoint()?;
        let addr = server_addr
            .parse()
            .with_context(|| format!("invalid server address {server_addr}"))?;
        let conn = endpoint
            .connect(addr, "localhost")?
            .await
            .with_context(|| format!("failed to connect to rkfs at {server_addr}"))?;
        Ok(Self {
            _endpoint: endpoint,
            conn,
            identity: identity.to_string(),
        })
    }

    /// One call: send the request on a fresh stream and wait for its reply.
    /// Transport failures are `Err`; the server's verdict is the inner result.
    pub async fn call(&self, op: FsOp) -> Result<FsResponse> {
        let req = FsRequest {
            identity: self.identity.clone(),
            op,
        };
        let (mut send, mut recv) = self.conn.open_bi().await?;
        send.write_all(&bincode::serialize(&req)?).await?;
        send.finish()?;
        let raw = recv.read_to_end(MAX_RESPONSE_BYTES).await?;
        Ok(bincode::deserialize(&raw)?)
    }

    async fn call_for<T>(
        &self,
        op: FsOp,
        pick: impl FnOnce(FsReply) -> Option<T>,
    ) -> Result<T> {
        let name = op.name();
        let reply = self.call(op).await??;
        pick(reply).ok_or_else(|| anyhow!("unexpected reply to {name}"))
    }

    pub async fn create(&self, path: &str) -> Result<HandleToken> {
        self.call_for(FsOp::Create { path: path.into() }, |r| match r {
            FsReply::Handle(h) => Some(h),
            _ => None,
        })
        .await
    }

    pub async fn open(&self, path: &str) -> Result<HandleToken> {
        self.call_for(FsOp::Open { path: path.into() }, |r| match r {
            FsReply::Handle(h) => Some(h),
            _ => None,
        })
        .await
    }

    pub async fn write(&self, handle: HandleToken, data: Vec<u8>) -> Result<()> {
        self.call_for(FsOp::Write { handle, data }, |r| {
            matches!(r, FsReply::Done).then_some(())
        })
        .await
    }

    /// Empty result means end of file.
    pub async fn read(&self, handle: HandleToken) -> Result<Vec<u8>> {
        self.call_for(FsOp::Read { handle }, |r| match r {
            FsReply::Data(d) => Some(d),
            _ => None,
        })
        .await
    }

    pub async fn close(&self, handle: HandleToken) -> Result<()> {
        self.call_for(FsOp::Close { handle }, |r| {
            matches!(r, FsReply::Done).then_some(())
        })
        .await
    }

    pub async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>> {
        self.call_for(FsOp::ListStatus { path: path.into() }, |r| match r {
            FsReply::Status(s) => Some(s),
            _ => None,
        })
        .await
    }

    pub async fn remove(&self, path: &str, recursive: bool) -> Result<bool> {
        self.call_for(
            FsOp::Remove {
                path: path.into(),
                recursive,
            },
            |r| match r {
                FsReply::Removed(b) => Some(b),
                _ => None,
            },
        )
        .await
    }

    /// Copy a local file to `remote`. Returns the number of bytes sent.
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let mut file = File::open(local)
            .await
            .with_context(|| format!("cannot open {}", local.display()))?;
        let handle = self.create(remote).await?;
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut total = 0u64;
        let copied: Result<()> = async {
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<(), anyhow::Error>(());
                }
                self.write(handle, buf[..n].to_vec()).await?;
                total += n as u64;
            }
        }
        .await;
        let closed = self.close(handle).await;
        copied?;
        closed?;
        Ok(total)
    }

    /// Copy `remote` into a local file. Returns the number of bytes received.
    pub async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let handle = self.open(remote).await?;
        let mut total = 0u64;
        let copied: Result<()> = async {
            let mut file = File::create(local)
                .await
                .with_context(|| format!("cannot create {}", local.display()))?;
            loop {
                let chunk = self.read(handle).await?;
                if chunk.is_empty() {
                    break;
                }
                file.write_all(&chunk).await?;
                total += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        let closed = self.close(handle).await;
        copied?;
        closed?;
        Ok(total)
    }
}

/// True when `err` is the server reporting an unknown handle or missing path.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RkfsError>()
        .is_some_and(RkfsError::is_not_found)
}
