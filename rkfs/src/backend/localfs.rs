//! Directory-backed filesystem backend, addressed as `file:///<root>`.

use super::{InputStream, OutputStream, Session, SessionFactory};
use async_trait::async_trait;
use common::{FileStatus, RkfsError};
use log::debug;
use nix::unistd::{Gid, Group, Uid, User};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const FILE_SCHEME: &str = "file://";

pub struct LocalFsFactory {
    root: PathBuf,
}

impl LocalFsFactory {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve a backend address such as `file:///var/lib/rkfs`.
    pub fn from_uri(uri: &str) -> Result<Self, RkfsError> {
        match uri.strip_prefix(FILE_SCHEME) {
            Some(root) if !root.is_empty() => Ok(Self::new(root)),
            _ => Err(RkfsError::Connection(format!(
                "unsupported filesystem address {uri}"
            ))),
        }
    }
}

#[async_trait]
impl SessionFactory for LocalFsFactory {
    async fn open(&self, identity: &str) -> Result<Box<dyn Session>, RkfsError> {
        if identity.trim().is_empty() {
            return Err(RkfsError::Connection("empty identity rejected".into()));
        }
        let unreachable = || {
            RkfsError::Connection(format!(
                "filesystem root {} is unreachable",
                self.root.display()
            ))
        };
        let root = fs::canonicalize(&self.root)
            .await
            .map_err(|_| unreachable())?;
        match fs::metadata(&root).await {
            Ok(m) if m.is_dir() => {}
            _ => return Err(unreachable()),
        }
        debug!("opened session on {} for {identity}", root.display());
        Ok(Box::new(LocalSession {
            root,
            identity: identity.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LocalSession {
    // canonical
    root: PathBuf,
    identity: String,
    closed: AtomicBool,
}

impl LocalSession {
    fn ensure_open(&self) -> Result<(), RkfsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RkfsError::Io("session is closed".into()));
        }
        Ok(())
    }

    /// Map `path` below the root. `..` is refused, and so is any path whose
    /// deepest existing ancestor resolves outside the root through a symlink.
    async fn resolve(&self, path: &str) -> Result<PathBuf, RkfsError> {
        let mut out = self.root.clone();
        for comp in Path::new(path).components() {
            match comp {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => out.push(part),
                _ => return Err(RkfsError::Io(format!("invalid path {path}"))),
            }
        }

        let escapes = || RkfsError::Io(format!("{path} leads outside the filesystem root"));
        let mut ancestor = out.as_path();
        loop {
            match fs::canonicalize(ancestor).await {
                Ok(real) if real.starts_with(&self.root) => return Ok(out),
                Ok(_) => return Err(escapes()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // a dangling symlink would be followed by create
                    if fs::symlink_metadata(ancestor).await.is_ok() {
                        return Err(escapes());
                    }
                    match ancestor.parent() {
                        Some(parent) if parent.starts_with(&self.root) => ancestor = parent,
                        _ => return Err(escapes()),
                    }
                }
                Err(e) => return Err(RkfsError::Io(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl Session for LocalSession {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn InputStream>, RkfsError> {
        self.ensure_open()?;
        let full = self.resolve(path).await?;
        let meta = fs::metadata(&full).await?;
        if meta.is_dir() {
            return Err(RkfsError::Io(format!("{path} is a directory")));
        }
        let file = File::open(&full).await?;
        Ok(Box::new(LocalInput { file, closed: false }))
    }

    async fn open_write(&self, path: &str) -> Result<Box<dyn OutputStream>, RkfsError> {
        self.ensure_open()?;
        let full = self.resolve(path).await?;
        // Missing parents are a create failure, not a missing path.
        let file = File::create(&full)
            .await
            .map_err(|e| RkfsError::Io(format!("cannot create {path}: {e}")))?;
        Ok(Box::new(LocalOutput { file, closed: false }))
    }

    async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>, RkfsError> {
        self.ensure_open()?;
        let full = self.resolve(path).await?;
        let meta = fs::metadata(&full).await?;
        if !meta.is_dir() {
            let name = full
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(vec![status_of(name, &meta)]);
        }

        let mut out = Vec::new();
        let mut entries = fs::read_dir(&full).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            out.push(status_of(
                entry.file_name().to_string_lossy().into_owned(),
                &meta,
            ));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool, RkfsError> {
        self.ensure_open()?;
        let full = self.resolve(path).await?;
        if full == self.root {
            return Err(RkfsError::Io("cannot delete filesystem root".into()));
        }
        let meta = match fs::symlink_metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(RkfsError::Io(e.to_string())),
        };
        let res = if !meta.is_dir() {
            fs::remove_file(&full).await
        } else if recursive {
            fs::remove_dir_all(&full).await
        } else {
            fs::remove_dir(&full).await
        };
        res.map_err(|e| RkfsError::Io(format!("cannot delete {path}: {e}")))?;
        Ok(true)
    }

    async fn close(&self) -> Result<(), RkfsError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(RkfsError::Io("session already closed".into()));
        }
        Ok(())
    }
}

struct LocalInput {
    file: File,
    closed: bool,
}

#[async_trait]
impl InputStream for LocalInput {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, RkfsError> {
        if self.closed {
            return Err(RkfsError::Io("stream is closed".into()));
        }
        self.file
            .read(buf)
            .await
            .map_err(|e| RkfsError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), RkfsError> {
        if std::mem::replace(&mut self.closed, true) {
            return Err(RkfsError::Io("stream already closed".into()));
        }
        Ok(())
    }
}

struct LocalOutput {
    file: File,
    closed: bool,
}

#[async_trait]
impl OutputStream for LocalOutput {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), RkfsError> {
        if self.closed {
            return Err(RkfsError::Io("stream is closed".into()));
        }
        self.file
            .write_all(data)
            .await
            .map_err(|e| RkfsError::Io(e.to_string()))?;
        self.file
            .flush()
            .await
            .map_err(|e| RkfsError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), RkfsError> {
        if std::mem::replace(&mut self.closed, true) {
            return Err(RkfsError::Io("stream already closed".into()));
        }
        self.file
            .sync_all()
            .await
            .map_err(|e| RkfsError::Io(e.to_string()))
    }
}

fn status_of(name: String, meta: &std::fs::Metadata) -> FileStatus {
    FileStatus {
        is_dir: meta.is_dir(),
        name,
        owner: user_name(meta.uid()),
        group: group_name(meta.gid()),
        permission: permission_string(meta.mode()),
        replication: 1,
        mod_time: meta.mtime() * 1000 + meta.mtime_nsec() / 1_000_000,
        block_size: meta.blksize(),
        length: if meta.is_dir() { 0 } else { meta.len() },
    }
}

fn user_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(u)) => u.name,
        _ => uid.to_string(),
    }
}

fn group_name(gid: u32) -> String {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(g)) => g.name,
        _ => gid.to_string(),
    }
}

/// `rwxr-x---` style rendering of the permission bits.
fn permission_string(mode: u32) -> String {
    const FLAGS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    FLAGS
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}
