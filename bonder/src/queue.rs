//! Per-account action queue
//!
//! Every chain-mutating call made on behalf of a signing identity goes
//! through that identity's lane. A lane is a single worker task draining an
//! unbounded channel, so submissions from one account never overlap and run
//! in the order they were enqueued. Lanes for different accounts run
//! independently.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use alloy::primitives::Address;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{BonderError, BonderResult};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO executor of account actions, one lane per identity.
#[derive(Clone, Default)]
pub struct AccountQueue {
    lanes: Arc<Mutex<HashMap<Address, mpsc::UnboundedSender<Job>>>>,
}

impl std::fmt::Debug for AccountQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountQueue")
            .field("lanes", &self.lanes.lock().len())
            .finish()
    }
}

impl AccountQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` once every action previously enqueued for `identity` has
    /// finished, and return its result.
    ///
    /// A failing action only fails its own caller; the next one still runs.
    pub async fn enqueue<F, Fut, T>(&self, identity: Address, action: F) -> BonderResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = BonderResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = action().await;
            // caller may have gone away; nothing to do then
            let _ = tx.send(result);
        });

        self.submit(identity, job)?;

        rx.await.map_err(|_| {
            BonderError::Internal(format!("action for {identity} aborted before completion"))
        })?
    }

    /// Number of identities that have a lane.
    pub fn lanes(&self) -> usize {
        self.lanes.lock().len()
    }

    fn submit(&self, identity: Address, job: Job) -> BonderResult<()> {
        let mut lanes = self.lanes.lock();
        let job = match lanes.get(&identity) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return Ok(()),
                // worker is gone, start a fresh lane below
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let sender = spawn_lane(identity);
        sender
            .send(job)
            .map_err(|_| BonderError::Internal(format!("lane for {identity} closed")))?;
        lanes.insert(identity, sender);
        Ok(())
    }
}

fn spawn_lane(identity: Address) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    debug!(%identity, "Starting account lane");

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!(%identity, "Account action panicked");
            }
        }
    });

    tx
}
