//! Concrete watchers and the fleet that owns them
//!
//! Every watcher is a [`Poller`] run by its own [`PollingWatcher`]. Watchers
//! only observe and decide; anything that writes to a chain goes through the
//! [`Settlement`] engine and from there through the account queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BonderConfig;
use crate::error::{BonderError, BonderResult, PreconditionError};
use crate::gateway::BridgeGateway;
use crate::settlement::{transfer_root_id, Settlement};
use crate::store::StateStore;
use crate::types::{BondedRoot, ChainRecord, ChainSlug, KnownCommitment, RecordKind, RootState};
use crate::watcher::{Poller, PollingWatcher, WatcherStatus};

/// Keeps the first error of an iteration while letting the rest of it run.
#[derive(Default)]
struct FirstError(Option<BonderError>);

impl FirstError {
    fn keep(&mut self, err: BonderError) {
        if self.0.is_none() {
            self.0 = Some(err);
        }
    }

    fn into_result(self) -> BonderResult<()> {
        self.0.map_or(Ok(()), Err)
    }
}

/// Next `[from, to]` block range to scan on `chain`, resuming right after the
/// last scanned block. A chain seen for the first time starts `window` blocks
/// behind `head`.
pub fn next_scan_range(
    store: &dyn StateStore,
    chain: ChainSlug,
    head: u64,
    window: u64,
) -> BonderResult<Option<(u64, u64)>> {
    let window = window.max(1);
    let from = match store.get(chain, RecordKind::LastScannedBlock)? {
        Some(record) => record.value.saturating_to::<u64>().saturating_add(1),
        None => head.saturating_sub(window - 1),
    };
    if from > head {
        return Ok(None);
    }
    Ok(Some((from, head.min(from.saturating_add(window - 1)))))
}

fn record_scanned(store: &dyn StateStore, chain: ChainSlug, to: u64) -> BonderResult<()> {
    store.update(ChainRecord::now(
        chain,
        RecordKind::LastScannedBlock,
        U256::from(to),
    ))
}

/// Records the gas price of one chain.
pub struct GasPriceWatcher {
    gateway: Arc<dyn BridgeGateway>,
    store: Arc<dyn StateStore>,
}

impl GasPriceWatcher {
    pub fn new(gateway: Arc<dyn BridgeGateway>, store: Arc<dyn StateStore>) -> Self {
        Self { gateway, store }
    }
}

#[async_trait]
impl Poller for GasPriceWatcher {
    fn name(&self) -> &'static str {
        "gas_price"
    }

    fn chain(&self) -> ChainSlug {
        self.gateway.chain()
    }

    async fn poll(&self) -> BonderResult<()> {
        let gas_price = self.gateway.gas_price().await?;
        debug!(chain = %self.chain(), %gas_price, "Gas price");
        self.store
            .update(ChainRecord::now(self.chain(), RecordKind::GasPrice, gas_price))
    }
}

/// Tracks pending transfers on a secondary chain and commits them.
pub struct CommitWatcher {
    source: ChainSlug,
    settlement: Arc<Settlement>,
    store: Arc<dyn StateStore>,
    min_pending: usize,
}

impl CommitWatcher {
    pub fn new(
        source: ChainSlug,
        settlement: Arc<Settlement>,
        store: Arc<dyn StateStore>,
        min_pending: usize,
    ) -> Self {
        Self {
            source,
            settlement,
            store,
            min_pending: min_pending.max(1),
        }
    }

    async fn check_destination(&self, destination: ChainSlug) -> BonderResult<()> {
        let batch = self
            .settlement
            .pending_transfers(self.source, destination)
            .await?;
        self.store.update(ChainRecord::now(
            self.source,
            RecordKind::PendingTransfers(destination),
            U256::from(batch.len()),
        ))?;

        if batch.len() < self.min_pending {
            return Ok(());
        }
        self.settlement
            .commit_transfers(self.source, destination)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Poller for CommitWatcher {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn chain(&self) -> ChainSlug {
        self.source
    }

    async fn poll(&self) -> BonderResult<()> {
        let mut first = FirstError::default();
        for destination in self.settlement.chains() {
            if destination == self.source {
                continue;
            }
            match self.check_destination(destination).await {
                Ok(()) => {}
                Err(BonderError::Precondition(reason)) => {
                    debug!(source = %self.source, %destination, %reason, "Commit skipped");
                }
                Err(e) => first.keep(e),
            }
        }
        first.into_result()
    }
}

/// Discovers committed roots on a secondary chain and bonds them.
pub struct BondWatcher {
    source: ChainSlug,
    settlement: Arc<Settlement>,
    store: Arc<dyn StateStore>,
    scan_window: u64,
    bond: bool,
}

impl BondWatcher {
    pub fn new(
        source: ChainSlug,
        settlement: Arc<Settlement>,
        store: Arc<dyn StateStore>,
        scan_window: u64,
        bond: bool,
    ) -> Self {
        Self {
            source,
            settlement,
            store,
            scan_window,
            bond,
        }
    }

    async fn scan(&self) -> BonderResult<()> {
        let gateway = self.settlement.gateway(self.source)?;
        let head = gateway.block_number().await?;
        let Some((from, to)) =
            next_scan_range(self.store.as_ref(), self.source, head, self.scan_window)?
        else {
            return Ok(());
        };

        for root in gateway.committed_roots(from, to).await? {
            self.store.record_commitment(&KnownCommitment {
                source_chain: self.source,
                root: root.clone(),
            })?;
            if self.settlement.book().record_committed(self.source, &root) {
                info!(
                    source = %self.source,
                    root_hash = %root.root_hash,
                    destination_chain_id = root.destination_chain_id,
                    total_amount = %root.total_amount,
                    "Transfer root committed"
                );
            }
        }
        record_scanned(self.store.as_ref(), self.source, to)
    }
}

#[async_trait]
impl Poller for BondWatcher {
    fn name(&self) -> &'static str {
        "bond"
    }

    fn chain(&self) -> ChainSlug {
        self.source
    }

    async fn poll(&self) -> BonderResult<()> {
        self.scan().await?;
        if !self.bond {
            return Ok(());
        }

        let mut first = FirstError::default();
        let committed = self
            .settlement
            .book()
            .in_state(RootState::Committed)
            .into_iter()
            .filter(|r| r.source_chain == Some(self.source));

        for root in committed {
            match self.settlement.sync_bond(root.root_hash, root.total_amount).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    first.keep(e);
                    continue;
                }
            }

            match self
                .settlement
                .bond_transfer_root(root.root_hash, root.destination_chain_id, root.total_amount)
                .await
            {
                Ok(_) => {}
                Err(BonderError::Precondition(PreconditionError::AlreadyBonded { .. })) => {}
                Err(e) => {
                    warn!(
                        source = %self.source,
                        root_hash = %root.root_hash,
                        code = e.error_code(),
                        error = %e,
                        "Bond failed"
                    );
                    first.keep(e);
                }
            }
        }
        first.into_result()
    }
}

/// Watches bonds on the home chain and challenges roots nobody committed.
///
/// A bonded root that matches no observed commitment is held back for one
/// iteration so the bond watchers get a chance to catch up on its commit.
/// Before a challenge goes out, the commitment is also looked up in the full
/// history of every secondary chain.
pub struct ChallengeWatcher {
    settlement: Arc<Settlement>,
    store: Arc<dyn StateStore>,
    scan_window: u64,
    challenge: bool,
    suspects: Mutex<HashMap<B256, BondedRoot>>,
}

impl ChallengeWatcher {
    pub fn new(
        settlement: Arc<Settlement>,
        store: Arc<dyn StateStore>,
        scan_window: u64,
        challenge: bool,
    ) -> Self {
        Self {
            settlement,
            store,
            scan_window,
            challenge,
            suspects: Mutex::new(HashMap::new()),
        }
    }

    pub fn suspects(&self) -> usize {
        self.suspects.lock().len()
    }

    fn is_known(&self, root: &BondedRoot) -> bool {
        self.settlement
            .book()
            .get(&transfer_root_id(root.root_hash, root.total_amount))
            .is_some_and(|r| r.is_known_commitment())
    }

    async fn examine(&self, root: BondedRoot) -> BonderResult<()> {
        self.settlement
            .sync_bond(root.root_hash, root.total_amount)
            .await?;
        if self.is_known(&root) {
            return Ok(());
        }

        if let Some(found) = self
            .settlement
            .find_commitment(root.root_hash, root.total_amount)
            .await?
        {
            self.store.record_commitment(&found)?;
            self.settlement
                .book()
                .record_committed(found.source_chain, &found.root);
            info!(
                root_hash = %root.root_hash,
                source = %found.source_chain,
                block_number = found.root.block_number,
                "Commitment found for bonded root"
            );
            return Ok(());
        }

        warn!(
            root_hash = %root.root_hash,
            total_amount = %root.total_amount,
            challenge = self.challenge,
            "Bonded root matches no commitment on any chain"
        );
        if !self.challenge {
            return Ok(());
        }

        match self
            .settlement
            .challenge_transfer_root(root.root_hash, root.total_amount)
            .await
        {
            Ok(_) => Ok(()),
            Err(BonderError::Precondition(reason)) => {
                debug!(root_hash = %root.root_hash, %reason, "Challenge skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Poller for ChallengeWatcher {
    fn name(&self) -> &'static str {
        "challenge"
    }

    fn chain(&self) -> ChainSlug {
        self.settlement.home().chain()
    }

    async fn poll(&self) -> BonderResult<()> {
        let home = Arc::clone(self.settlement.home());
        let mut first = FirstError::default();

        let previous = std::mem::take(&mut *self.suspects.lock());
        for (id, root) in previous {
            if let Err(e) = self.examine(root.clone()).await {
                if e.is_retryable() {
                    self.suspects.lock().insert(id, root);
                }
                first.keep(e);
            }
        }

        let head = home.block_number().await?;
        if let Some((from, to)) =
            next_scan_range(self.store.as_ref(), home.chain(), head, self.scan_window)?
        {
            for root in home.bonded_roots(from, to).await? {
                if self.is_known(&root) {
                    if let Err(e) = self
                        .settlement
                        .sync_bond(root.root_hash, root.total_amount)
                        .await
                    {
                        first.keep(e);
                    }
                } else {
                    self.suspects
                        .lock()
                        .insert(transfer_root_id(root.root_hash, root.total_amount), root);
                }
            }
            record_scanned(self.store.as_ref(), home.chain(), to)?;
        }

        first.into_result()
    }
}

/// Picks up challenges against tracked roots and resolves them when due.
pub struct ResolutionWatcher {
    settlement: Arc<Settlement>,
}

impl ResolutionWatcher {
    pub fn new(settlement: Arc<Settlement>) -> Self {
        Self { settlement }
    }
}

#[async_trait]
impl Poller for ResolutionWatcher {
    fn name(&self) -> &'static str {
        "resolution"
    }

    fn chain(&self) -> ChainSlug {
        self.settlement.home().chain()
    }

    async fn poll(&self) -> BonderResult<()> {
        let book = self.settlement.book();
        let mut first = FirstError::default();

        for root in book.in_state(RootState::Bonded) {
            if let Err(e) = self
                .settlement
                .sync_challenge(root.root_hash, root.total_amount)
                .await
            {
                first.keep(e);
            }
        }

        let now = self.settlement.now().await?;
        for root in book.in_state(RootState::Challenged) {
            let due = root.challenge.as_ref().is_some_and(|c| c.can_resolve(now));
            if !due {
                continue;
            }

            let result = match self
                .settlement
                .resolve_challenge(root.root_hash, root.total_amount)
                .await
            {
                Err(BonderError::Precondition(PreconditionError::AlreadyResolved { .. })) => {
                    self.settlement
                        .sync_resolution(root.root_hash, root.total_amount)
                        .await
                }
                other => other,
            };

            match result {
                Ok(state) => debug!(root_hash = %root.root_hash, outcome = state.as_str(), "Resolution recorded"),
                Err(BonderError::Precondition(reason)) => {
                    debug!(root_hash = %root.root_hash, %reason, "Resolution deferred");
                }
                Err(e) => first.keep(e),
            }
        }

        first.into_result()
    }
}

/// Moves finished roots to Settled and records how many became settleable.
pub struct SettlementWatcher {
    settlement: Arc<Settlement>,
    store: Arc<dyn StateStore>,
}

impl SettlementWatcher {
    pub fn new(settlement: Arc<Settlement>, store: Arc<dyn StateStore>) -> Self {
        Self { settlement, store }
    }
}

#[async_trait]
impl Poller for SettlementWatcher {
    fn name(&self) -> &'static str {
        "settlement"
    }

    fn chain(&self) -> ChainSlug {
        self.settlement.home().chain()
    }

    async fn poll(&self) -> BonderResult<()> {
        let settleable = self.settlement.settleable_roots().await?;
        let book = self.settlement.book();
        let resolved = book
            .in_state(RootState::ResolvedValid)
            .into_iter()
            .chain(book.in_state(RootState::ResolvedFraudulent));

        for root in settleable.iter().cloned().chain(resolved) {
            self.settlement.mark_settled(&root.transfer_root_id())?;
            self.store
                .forget_commitment(root.root_hash, root.total_amount)?;
            info!(
                root_hash = %root.root_hash,
                from = root.state.as_str(),
                "Transfer root settled"
            );
        }

        self.store.update(ChainRecord::now(
            self.chain(),
            RecordKind::SettleableRoots,
            U256::from(settleable.len()),
        ))
    }
}

/// Knobs the fleet is built from.
#[derive(Debug, Clone)]
pub struct FleetOptions {
    pub gas_price_interval: Duration,
    pub poll_interval: Duration,
    pub min_pending_to_commit: usize,
    pub event_scan_window: u64,
    pub bonder_enabled: bool,
    pub challenger_enabled: bool,
}

impl From<&BonderConfig> for FleetOptions {
    fn from(config: &BonderConfig) -> Self {
        Self {
            gas_price_interval: Duration::from_secs(config.gas_price_interval_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            min_pending_to_commit: config.min_pending_to_commit,
            event_scan_window: config.event_scan_window,
            bonder_enabled: config.bonder_enabled,
            challenger_enabled: config.challenger_enabled,
        }
    }
}

/// Every watcher of the node, one per (chain, kind).
#[derive(Debug, Default)]
pub struct WatcherFleet {
    watchers: Vec<Arc<PollingWatcher>>,
}

impl WatcherFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One gas price watcher per chain, commit and bond watchers per
    /// secondary chain, and the challenge, resolution and settlement
    /// watchers on the home chain.
    ///
    /// Commitments remembered by `store` are put back into the book first.
    pub fn build(
        settlement: Arc<Settlement>,
        store: Arc<dyn StateStore>,
        options: &FleetOptions,
    ) -> BonderResult<Self> {
        let restored = settlement.restore_commitments(&store.commitments()?);
        if restored > 0 {
            info!(restored, "Known commitments restored");
        }

        let mut fleet = Self::new();

        for chain in settlement.chains() {
            let gateway = Arc::clone(settlement.gateway(chain)?);
            fleet.push(
                Arc::new(GasPriceWatcher::new(gateway, Arc::clone(&store))),
                options.gas_price_interval,
            );
        }

        for chain in settlement.secondary_chains() {
            fleet.push(
                Arc::new(CommitWatcher::new(
                    chain,
                    Arc::clone(&settlement),
                    Arc::clone(&store),
                    options.min_pending_to_commit,
                )),
                options.poll_interval,
            );
            fleet.push(
                Arc::new(BondWatcher::new(
                    chain,
                    Arc::clone(&settlement),
                    Arc::clone(&store),
                    options.event_scan_window,
                    options.bonder_enabled,
                )),
                options.poll_interval,
            );
        }

        fleet.push(
            Arc::new(ChallengeWatcher::new(
                Arc::clone(&settlement),
                Arc::clone(&store),
                options.event_scan_window,
                options.challenger_enabled,
            )),
            options.poll_interval,
        );
        fleet.push(
            Arc::new(ResolutionWatcher::new(Arc::clone(&settlement))),
            options.poll_interval,
        );
        fleet.push(
            Arc::new(SettlementWatcher::new(settlement, store)),
            options.poll_interval,
        );

        Ok(fleet)
    }

    pub fn push(&mut self, poller: Arc<dyn Poller>, interval: Duration) -> Arc<PollingWatcher> {
        let watcher = Arc::new(PollingWatcher::new(poller, interval));
        self.watchers.push(Arc::clone(&watcher));
        watcher
    }

    pub fn watchers(&self) -> &[Arc<PollingWatcher>] {
        &self.watchers
    }

    pub fn find(&self, name: &str, chain: ChainSlug) -> Option<Arc<PollingWatcher>> {
        self.watchers
            .iter()
            .find(|w| w.name() == name && w.chain() == chain)
            .cloned()
    }

    pub fn statuses(&self) -> Vec<WatcherStatus> {
        self.watchers.iter().map(|w| w.status()).collect()
    }

    /// Start every watcher. Returns how many were not already running.
    pub fn start_all(&self) -> usize {
        let started = self.watchers.iter().filter(|w| w.start()).count();
        info!(started, total = self.watchers.len(), "Watcher fleet started");
        started
    }

    pub fn stop_all(&self) {
        for watcher in &self.watchers {
            watcher.stop();
        }
    }

    pub async fn join_all(&self) {
        futures::future::join_all(self.watchers.iter().map(|w| w.join())).await;
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}
