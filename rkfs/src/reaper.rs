//! Idle handle reaper
//!
//! Wakes on a fixed interval and reclaims handles whose last successful
//! read/write is older than the idle threshold. Selection and removal happen
//! in one registry step, so a concurrent `close` either wins and the reaper
//! never sees the handle, or loses and gets `NotFound`. Evicted handles are
//! torn down concurrently, each under its own deadline, so a hung backend close
//! only costs its own handle.

use crate::backend::SessionFactory;
use crate::registry::Registry;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, timeout};

pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Reaper {
    registry: Registry,
    factory: Arc<dyn SessionFactory>,
    idle_threshold: Duration,
    wake_interval: Duration,
    close_timeout: Duration,
}

impl Reaper {
    pub fn new(
        registry: Registry,
        factory: Arc<dyn SessionFactory>,
        idle_threshold: Duration,
        wake_interval: Duration,
    ) -> Self {
        Self {
            registry,
            factory,
            idle_threshold,
            wake_interval,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Bound on one handle's stream and session close during a sweep.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// One pass over the registry. Returns how many handles were evicted.
    ///
    /// Per-handle teardown failures and timeouts are logged and skipped. A
    /// timed out teardown is abandoned; its handle is already out of the registry.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let threshold = self.idle_threshold;
        let idle = match self
            .registry
            .evict_if(move |h| h.idle_for(now) > threshold)
            .await
        {
            Ok(idle) => idle,
            Err(e) => {
                warn!("reaper could not scan handles: {e}");
                return 0;
            }
        };

        let evicted = idle.len();
        let mut closing = JoinSet::new();
        for handle in idle {
            info!(
                "reclaiming idle handle {} ({}) of {}",
                handle.token(),
                handle.path(),
                handle.identity()
            );
            let factory = self.factory.clone();
            let limit = self.close_timeout;
            closing.spawn(async move {
                match timeout(limit, handle.teardown(factory.as_ref())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("failed to close idle handle {}: {e}", handle.token()),
                    Err(_) => warn!(
                        "close of idle handle {} ({}) timed out after {limit:?}",
                        handle.token(),
                        handle.path()
                    ),
                }
            });
        }
        while let Some(res) = closing.join_next().await {
            if let Err(e) = res {
                error!("idle handle teardown task failed: {e}");
            }
        }
        evicted
    }

    /// Run sweeps forever on the wake interval. The first sweep happens one
    /// interval after start.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(self.wake_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;
            loop {
                timer.tick().await;
                let n = self.sweep().await;
                if n > 0 {
                    info!("reaper closed {n} idle handles");
                }
            }
        })
    }
}
