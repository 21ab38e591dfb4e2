//! Polling watcher base
//!
//! A [`PollingWatcher`] drives a [`Poller`] in a poll-then-sleep loop on its
//! own tokio task. A failed or panicking iteration is logged and counted,
//! then the loop sleeps and tries again. Stopping is cooperative: an
//! iteration that is already talking to a chain runs to completion and the
//! loop exits at the next boundary.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BonderError, BonderResult};
use crate::types::{ChainSlug, WatcherStats};

/// One iteration of a chain-scoped observation task.
#[async_trait]
pub trait Poller: Send + Sync {
    /// Short name used in logs and metrics, e.g. `gas_price`.
    fn name(&self) -> &'static str;

    /// Chain this poller is scoped to.
    fn chain(&self) -> ChainSlug;

    /// Perform the reads (and, for acting watchers, the actions) of one cycle.
    async fn poll(&self) -> BonderResult<()>;
}

/// Snapshot of a watcher for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub name: &'static str,
    pub chain: ChainSlug,
    pub running: bool,
    pub interval_ms: u64,
    pub stats: WatcherStats,
}

/// A cancellable repeating task around a [`Poller`].
pub struct PollingWatcher {
    poller: Arc<dyn Poller>,
    interval: Duration,
    running: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<RwLock<WatcherStats>>,
}

impl std::fmt::Debug for PollingWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWatcher")
            .field("name", &self.poller.name())
            .field("chain", &self.poller.chain())
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PollingWatcher {
    pub fn new(poller: Arc<dyn Poller>, interval: Duration) -> Self {
        Self {
            poller,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
            stats: Arc::new(RwLock::new(WatcherStats::default())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.poller.name()
    }

    pub fn chain(&self) -> ChainSlug {
        self.poller.chain()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats.read().clone()
    }

    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            name: self.name(),
            chain: self.chain(),
            running: self.is_running(),
            interval_ms: self.interval.as_millis() as u64,
            stats: self.stats(),
        }
    }

    /// Start the poll loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.poller),
            self.interval,
            Arc::clone(&self.running),
            token,
            Arc::clone(&self.stats),
        ));
        *self.task.lock() = Some(handle);
        true
    }

    /// Ask the loop to exit after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.lock().cancel();
    }

    /// Wait for the loop task to finish. Returns immediately if never started.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(watcher = self.name(), chain = %self.chain(), error = %e, "Watcher task failed");
            }
        }
    }

    /// Run a single iteration in the caller's task, without sleeping.
    pub async fn poll_once(&self) -> BonderResult<()> {
        poll_and_record(self.poller.as_ref(), &self.stats).await
    }
}

async fn run_loop(
    poller: Arc<dyn Poller>,
    interval: Duration,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    stats: Arc<RwLock<WatcherStats>>,
) {
    info!(
        watcher = poller.name(),
        chain = %poller.chain(),
        interval_ms = interval.as_millis() as u64,
        "Watcher started"
    );

    while running.load(Ordering::SeqCst) && !cancel.is_cancelled() {
        // errors are already logged and counted
        let _ = poll_and_record(poller.as_ref(), &stats).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(watcher = poller.name(), chain = %poller.chain(), "Watcher stopped");
}

async fn poll_and_record(poller: &dyn Poller, stats: &RwLock<WatcherStats>) -> BonderResult<()> {
    match AssertUnwindSafe(poller.poll()).catch_unwind().await {
        Ok(Ok(())) => {
            debug!(watcher = poller.name(), chain = %poller.chain(), "Poll complete");
            stats.write().record_success();
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(
                watcher = poller.name(),
                chain = %poller.chain(),
                code = e.error_code(),
                error = %e,
                "Poll failed"
            );
            stats.write().record_failure(e.to_string());
            Err(e)
        }
        Err(_) => {
            error!(watcher = poller.name(), chain = %poller.chain(), "Poll panicked");
            let e = BonderError::Internal(format!("{} poll panicked", poller.name()));
            stats.write().record_failure(e.to_string());
            Err(e)
        }
    }
}
