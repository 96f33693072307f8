use crate::backend::{HandleStream, Session, SessionFactory};
use common::{HandleToken, RkfsError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct OpenStream {
    session: Box<dyn Session>,
    stream: HandleStream,
}

/// One open stream and the session it was opened on.
///
/// The stream is taken out exactly once by [`Handle::teardown`]; a caller that
/// still holds the `Arc` afterwards sees `NotFound`, never a closed stream.
pub struct Handle {
    token: HandleToken,
    path: String,
    identity: String,
    opened: Instant,
    // millis after `opened`
    last_used: AtomicU64,
    inner: Mutex<Option<OpenStream>>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("token", &self.token)
            .field("path", &self.path)
            .field("identity", &self.identity)
            .finish()
    }
}

impl Handle {
    pub(crate) fn new(
        token: HandleToken,
        path: String,
        identity: String,
        session: Box<dyn Session>,
        stream: HandleStream,
    ) -> Self {
        Self {
            token,
            path,
            identity,
            opened: Instant::now(),
            last_used: AtomicU64::new(0),
            inner: Mutex::new(Some(OpenStream { session, stream })),
        }
    }

    pub fn token(&self) -> HandleToken {
        self.token
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn touch(&self) {
        let ms = self.opened.elapsed().as_millis() as u64;
        self.last_used.fetch_max(ms, Ordering::AcqRel);
    }

    pub fn last_used(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_used.load(Ordering::Acquire))
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used())
    }

    fn gone(&self) -> RkfsError {
        RkfsError::NotFound(format!("handle {} is closed", self.token))
    }

    /// Read into `buf`; `Ok(0)` means end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, RkfsError> {
        let mut guard = self.inner.lock().await;
        let open = guard.as_mut().ok_or_else(|| self.gone())?;
        let n = match &mut open.stream {
            HandleStream::Input(s) => s.read(buf).await?,
            HandleStream::Output(_) => {
                return Err(RkfsError::Io(format!(
                    "handle {} is open for writing",
                    self.token
                )));
            }
        };
        self.touch();
        Ok(n)
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), RkfsError> {
        let mut guard = self.inner.lock().await;
        let open = guard.as_mut().ok_or_else(|| self.gone())?;
        match &mut open.stream {
            HandleStream::Output(s) => s.write_all(data).await?,
            HandleStream::Input(_) => {
                return Err(RkfsError::Io(format!(
                    "handle {} is open for reading",
                    self.token
                )));
            }
        }
        self.touch();
        Ok(())
    }

    /// Close the stream, then the session, reporting the first failure.
    ///
    /// Only the caller that removed the handle from the registry may call this.
    pub async fn teardown(&self, factory: &dyn SessionFactory) -> Result<(), RkfsError> {
        let OpenStream {
            session,
            mut stream,
        } = self.inner.lock().await.take().ok_or_else(|| self.gone())?;
        let stream_res = stream.close().await;
        let session_res = factory.close(session).await;
        stream_res.and(session_res)
    }
}
