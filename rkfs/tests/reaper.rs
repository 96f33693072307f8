use async_trait::async_trait;
use common::{FileStatus, RkfsError};
use rkfs::backend::{InputStream, LocalFsFactory, OutputStream, Session, SessionFactory};
use rkfs::reaper::Reaper;
use rkfs::registry::Registry;
use rkfs::service::StreamService;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Local backend that counts session closes. Sessions opened as "broken" fail
/// their close; input streams opened as "leaky" fail their close and those
/// opened as "stuck" never finish closing.
struct CountingFactory {
    inner: LocalFsFactory,
    closes: AtomicUsize,
}

struct FaultySession {
    inner: Box<dyn Session>,
}

struct FaultyInput {
    inner: Box<dyn InputStream>,
    identity: String,
}

#[async_trait]
impl InputStream for FaultyInput {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, RkfsError> {
        self.inner.read(buf).await
    }

    async fn close(&mut self) -> Result<(), RkfsError> {
        match self.identity.as_str() {
            "stuck" => std::future::pending().await,
            "leaky" => {
                self.inner.close().await?;
                Err(RkfsError::Io("stream close failed".into()))
            }
            _ => self.inner.close().await,
        }
    }
}

#[async_trait]
impl Session for FaultySession {
    fn identity(&self) -> &str {
        self.inner.identity()
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn InputStream>, RkfsError> {
        Ok(Box::new(FaultyInput {
            inner: self.inner.open_read(path).await?,
            identity: self.identity().to_string(),
        }))
    }

    async fn open_write(&self, path: &str) -> Result<Box<dyn OutputStream>, RkfsError> {
        self.inner.open_write(path).await
    }

    async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>, RkfsError> {
        self.inner.list_status(path).await
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool, RkfsError> {
        self.inner.delete(path, recursive).await
    }

    async fn close(&self) -> Result<(), RkfsError> {
        self.inner.close().await
    }
}

#[async_trait]
impl SessionFactory for CountingFactory {
    async fn open(&self, identity: &str) -> Result<Box<dyn Session>, RkfsError> {
        Ok(Box::new(FaultySession {
            inner: self.inner.open(identity).await?,
        }))
    }

    async fn close(&self, session: Box<dyn Session>) -> Result<(), RkfsError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        session.close().await?;
        if session.identity() == "broken" {
            return Err(RkfsError::Io("close failed".into()));
        }
        Ok(())
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    factory: Arc<CountingFactory>,
    registry: Registry,
    svc: Arc<StreamService>,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("reads.fq"), b"ACGT").unwrap();
    let factory = Arc::new(CountingFactory {
        inner: LocalFsFactory::new(tmp.path()),
        closes: AtomicUsize::new(0),
    });
    let registry = Registry::spawn();
    let svc = Arc::new(StreamService::new(factory.clone(), registry.clone(), 1024));
    Fixture {
        _tmp: tmp,
        factory,
        registry,
        svc,
    }
}

fn reaper(f: &Fixture, idle: Duration, wake: Duration) -> Reaper {
    Reaper::new(f.registry.clone(), f.factory.clone(), idle, wake)
}

#[tokio::test]
async fn test_idle_handle_is_reaped_and_then_not_found() {
    let f = fixture();
    let reaper = reaper(&f, Duration::from_millis(30), Duration::from_secs(3600));

    let idle = f.svc.open("/reads.fq", "alice").await.unwrap();
    let busy = f.svc.open("/reads.fq", "alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.svc.read(busy, "alice").await.unwrap(), b"ACGT");

    assert_eq!(reaper.sweep().await, 1);
    assert!(f.svc.read(idle, "alice").await.unwrap_err().is_not_found());
    assert!(f.svc.close(idle, "alice").await.unwrap_err().is_not_found());
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 1);

    f.svc.close(busy, "alice").await.unwrap();
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sweep_survives_failing_handle() {
    let f = fixture();
    let reaper = reaper(&f, Duration::from_millis(10), Duration::from_secs(3600));

    f.svc.open("/reads.fq", "broken").await.unwrap();
    f.svc.open("/reads.fq", "alice").await.unwrap();
    f.svc.create("/out.sam", "alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(reaper.sweep().await, 3);
    assert_eq!(f.registry.len().await.unwrap(), 0);
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_close_still_removes_handle() {
    let f = fixture();
    let h = f.svc.open("/reads.fq", "broken").await.unwrap();

    assert!(matches!(
        f.svc.close(h, "broken").await,
        Err(RkfsError::Io(_))
    ));
    assert_eq!(f.registry.len().await.unwrap(), 0);
    assert!(f.svc.close(h, "broken").await.unwrap_err().is_not_found());
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_stream_close_still_closes_session() {
    let f = fixture();
    let h = f.svc.open("/reads.fq", "leaky").await.unwrap();

    assert_eq!(
        f.svc.close(h, "leaky").await,
        Err(RkfsError::Io("stream close failed".into()))
    );
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 1);
    assert_eq!(f.registry.len().await.unwrap(), 0);
    assert!(f.svc.read(h, "leaky").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_hung_close_does_not_stall_other_handles() {
    let f = fixture();
    let reaper = reaper(&f, Duration::from_millis(10), Duration::from_secs(3600))
        .with_close_timeout(Duration::from_millis(200));

    f.svc.open("/reads.fq", "stuck").await.unwrap();
    f.svc.open("/reads.fq", "alice").await.unwrap();
    f.svc.open("/reads.fq", "bob").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let swept = tokio::time::timeout(Duration::from_secs(5), reaper.sweep())
        .await
        .expect("sweep stalled on a hung close");
    assert_eq!(swept, 3);
    assert_eq!(f.registry.len().await.unwrap(), 0);
    // the stuck handle never reaches its session close
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 2);

    // later sweeps still run
    let late = f.svc.open("/reads.fq", "carol").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(reaper.sweep().await, 1);
    assert!(f.svc.read(late, "carol").await.unwrap_err().is_not_found());
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_racing_sweep_closes_exactly_once() {
    let f = fixture();
    let reaper = Arc::new(reaper(&f, Duration::from_millis(5), Duration::from_secs(3600)));

    let mut tokens = Vec::new();
    for _ in 0..64 {
        tokens.push(f.svc.open("/reads.fq", "alice").await.unwrap());
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sweeper = {
        let reaper = reaper.clone();
        tokio::spawn(async move { reaper.sweep().await })
    };
    let closers: Vec<_> = tokens
        .iter()
        .map(|&h| {
            let svc = f.svc.clone();
            tokio::spawn(async move { svc.close(h, "alice").await })
        })
        .collect();

    let mut closed_by_client = 0;
    let mut lost_race = 0;
    for c in closers {
        match c.await.unwrap() {
            Ok(()) => closed_by_client += 1,
            Err(e) if e.is_not_found() => lost_race += 1,
            Err(e) => panic!("unexpected close error: {e}"),
        }
    }
    let reaped = sweeper.await.unwrap();

    assert_eq!(lost_race, reaped);
    assert_eq!(closed_by_client + reaped, tokens.len());
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), tokens.len());
    assert_eq!(f.registry.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_spawned_reaper_runs_on_interval() {
    let f = fixture();
    let task = reaper(&f, Duration::from_millis(10), Duration::from_millis(25)).spawn();

    let h = f.svc.open("/reads.fq", "alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(f.svc.read(h, "alice").await.unwrap_err().is_not_found());
    assert_eq!(f.factory.closes.load(Ordering::SeqCst), 1);
    task.abort();
}
