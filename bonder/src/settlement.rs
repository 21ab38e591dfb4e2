//! Transfer settlement state machine
//!
//! Drives a transfer root from commitment through bonding, an optional
//! challenge and its resolution, up to settlement. Every governance-mutable
//! parameter (fee floor, challenge periods) is read from the chain right
//! before it is used. Every write is routed through the [`AccountQueue`] of
//! the identity that signs it, and every precondition is checked locally
//! before anything is submitted.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256, U256};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{BonderError, BonderResult, ConfigError, PreconditionError};
use crate::gateway::{BridgeGateway, CommitOutcome, SendRequest};
use crate::queue::AccountQueue;
use crate::types::{
    Bond, BondedRoot, ChainSlug, ChallengeRecord, CommittedRoot, KnownCommitment, RootState,
    TransferBatch, TransferBondInfo, TransferRoot, TxOutcome,
};

/// Basis points denominator used by `minBonderBps`.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Fee floor: `max(amount * min_bps / 10000, min_absolute)`.
///
/// Used both for the bonder fee on sends and for sizing a root bond.
pub fn bond_amount(total_amount: U256, min_bonder_bps: U256, min_bonder_fee_absolute: U256) -> U256 {
    let relative = total_amount.saturating_mul(min_bonder_bps) / U256::from(BPS_DENOMINATOR);
    relative.max(min_bonder_fee_absolute)
}

/// `keccak256(abi.encodePacked(rootHash, totalAmount))`, same as the bridge.
pub fn transfer_root_id(root_hash: B256, total_amount: U256) -> B256 {
    let mut packed = [0u8; 64];
    packed[..32].copy_from_slice(root_hash.as_slice());
    packed[32..].copy_from_slice(&total_amount.to_be_bytes::<32>());
    keccak256(packed)
}

/// Rejects resolution while `now < challenge_started_at + resolution_period`.
pub fn check_resolution_window(
    root_hash: B256,
    challenge_started_at: u64,
    resolution_period: u64,
    now: u64,
) -> Result<(), PreconditionError> {
    let deadline = challenge_started_at.saturating_add(resolution_period);
    if now < deadline {
        return Err(PreconditionError::ResolutionPeriodNotElapsed {
            root_hash,
            deadline,
            now,
        });
    }
    Ok(())
}

/// Fee parameters as currently set on a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub min_bonder_bps: U256,
    pub min_bonder_fee_absolute: U256,
}

impl FeeSchedule {
    /// Read both parameters; never cached.
    pub async fn fetch(gateway: &dyn BridgeGateway) -> BonderResult<Self> {
        Ok(Self {
            min_bonder_bps: gateway.min_bonder_bps().await?,
            min_bonder_fee_absolute: gateway.min_bonder_fee_absolute().await?,
        })
    }

    pub fn fee_for(&self, amount: U256) -> U256 {
        bond_amount(amount, self.min_bonder_bps, self.min_bonder_fee_absolute)
    }
}

impl TransferRoot {
    /// Projection of a root that was just committed on `source_chain`.
    pub fn committed(source_chain: ChainSlug, root: &CommittedRoot) -> Self {
        Self {
            root_hash: root.root_hash,
            source_chain: Some(source_chain),
            destination_chain_id: root.destination_chain_id,
            total_amount: root.total_amount,
            committed_at: root.committed_at,
            state: RootState::Committed,
            bond: None,
            challenge: None,
        }
    }

    /// Projection of a root first seen through its bond, commitment unknown.
    pub fn observed_bonded(root: &BondedRoot, bond: Bond) -> Self {
        Self {
            root_hash: root.root_hash,
            source_chain: None,
            destination_chain_id: 0,
            total_amount: root.total_amount,
            committed_at: 0,
            state: RootState::Bonded,
            bond: Some(bond),
            challenge: None,
        }
    }

    pub fn transfer_root_id(&self) -> B256 {
        transfer_root_id(self.root_hash, self.total_amount)
    }

    /// Whether a commitment for this root was seen on a secondary chain.
    pub fn is_known_commitment(&self) -> bool {
        self.source_chain.is_some()
    }

    /// Committed -> Bonded. A root takes at most one bond.
    pub fn bond(&mut self, bond: Bond) -> BonderResult<()> {
        if self.bond.is_some() {
            return Err(PreconditionError::AlreadyBonded {
                root_hash: self.root_hash,
            }
            .into());
        }
        self.transition(RootState::Committed, RootState::Bonded)?;
        self.bond = Some(bond);
        Ok(())
    }

    /// Bonded -> Challenged
    pub fn challenge(&mut self, record: ChallengeRecord) -> BonderResult<()> {
        if self.challenge.is_some() {
            return Err(PreconditionError::AlreadyChallenged {
                root_hash: self.root_hash,
            }
            .into());
        }
        self.transition(RootState::Bonded, RootState::Challenged)?;
        self.challenge = Some(record);
        Ok(())
    }

    /// Challenged -> Resolved-Valid / Resolved-Fraudulent
    pub fn resolve(&mut self, fraudulent: bool) -> BonderResult<()> {
        let to = if fraudulent {
            RootState::ResolvedFraudulent
        } else {
            RootState::ResolvedValid
        };
        self.transition(RootState::Challenged, to)?;
        if let Some(challenge) = self.challenge.as_mut() {
            challenge.resolved = true;
        }
        Ok(())
    }

    /// Bonded (unchallenged) or Resolved -> Settled
    pub fn settle(&mut self) -> BonderResult<()> {
        match self.state {
            RootState::Bonded | RootState::ResolvedValid | RootState::ResolvedFraudulent => {
                self.state = RootState::Settled;
                Ok(())
            }
            from => Err(self.invalid(from, RootState::Settled)),
        }
    }

    /// Bonded, never challenged, and the challenge period is over.
    pub fn is_settleable(&self, now: u64, challenge_period: u64) -> bool {
        match (&self.state, &self.bond) {
            (RootState::Bonded, Some(bond)) => now >= bond.bonded_at.saturating_add(challenge_period),
            _ => false,
        }
    }

    fn transition(&mut self, from: RootState, to: RootState) -> BonderResult<()> {
        if self.state != from {
            return Err(self.invalid(self.state, to));
        }
        self.state = to;
        Ok(())
    }

    fn invalid(&self, from: RootState, to: RootState) -> BonderError {
        BonderError::InvalidTransition {
            root_hash: self.root_hash,
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

/// Local projection of every root this node knows about, keyed by root id.
#[derive(Clone, Default)]
pub struct RootBook {
    roots: Arc<RwLock<HashMap<B256, TransferRoot>>>,
}

impl std::fmt::Debug for RootBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootBook")
            .field("roots", &self.roots.read().len())
            .finish()
    }
}

impl RootBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commitment. Returns `false` if the root was already known.
    pub fn record_committed(&self, source_chain: ChainSlug, root: &CommittedRoot) -> bool {
        let id = transfer_root_id(root.root_hash, root.total_amount);
        let mut roots = self.roots.write();
        if let Some(existing) = roots.get_mut(&id) {
            // a root first seen through its bond gets its origin filled in
            if existing.source_chain.is_none() {
                existing.source_chain = Some(source_chain);
                existing.destination_chain_id = root.destination_chain_id;
                existing.committed_at = root.committed_at;
            }
            return false;
        }
        roots.insert(id, TransferRoot::committed(source_chain, root));
        true
    }

    pub fn insert(&self, root: TransferRoot) {
        self.roots.write().insert(root.transfer_root_id(), root);
    }

    pub fn get(&self, root_id: &B256) -> Option<TransferRoot> {
        self.roots.read().get(root_id).cloned()
    }

    pub fn contains(&self, root_id: &B256) -> bool {
        self.roots.read().contains_key(root_id)
    }

    /// Apply `f` to the root under `root_id` while holding the write lock.
    pub fn update<T>(
        &self,
        root_id: &B256,
        f: impl FnOnce(&mut TransferRoot) -> BonderResult<T>,
    ) -> BonderResult<T> {
        let mut roots = self.roots.write();
        let root = roots
            .get_mut(root_id)
            .ok_or_else(|| BonderError::Internal(format!("unknown transfer root id {root_id}")))?;
        f(root)
    }

    pub fn in_state(&self, state: RootState) -> Vec<TransferRoot> {
        let mut roots: Vec<_> = self
            .roots
            .read()
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect();
        roots.sort_by_key(|r| (r.committed_at, r.root_hash));
        roots
    }

    pub fn all(&self) -> Vec<TransferRoot> {
        self.roots.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.roots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.read().is_empty()
    }
}

/// Protocol engine: enumerates, commits, bonds, challenges, resolves, settles
/// and sends on behalf of the configured identities.
pub struct Settlement {
    home: Arc<dyn BridgeGateway>,
    gateways: HashMap<ChainSlug, Arc<dyn BridgeGateway>>,
    queue: AccountQueue,
    book: RootBook,
    token: String,
    send_deadline_secs: u64,
}

impl std::fmt::Debug for Settlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut chains: Vec<_> = self.gateways.keys().collect();
        chains.sort();
        f.debug_struct("Settlement")
            .field("chains", &chains)
            .field("token", &self.token)
            .field("book", &self.book)
            .finish()
    }
}

impl Settlement {
    /// Build the engine from one gateway per chain. The home chain is required.
    pub fn new(
        gateways: Vec<Arc<dyn BridgeGateway>>,
        queue: AccountQueue,
        token: impl Into<String>,
        send_deadline_secs: u64,
    ) -> BonderResult<Self> {
        let gateways: HashMap<_, _> = gateways.into_iter().map(|g| (g.chain(), g)).collect();
        let home = gateways
            .values()
            .find(|g| g.chain().is_home())
            .cloned()
            .ok_or(ConfigError::MissingHomeChain)?;

        Ok(Self {
            home,
            gateways,
            queue,
            book: RootBook::new(),
            token: token.into(),
            send_deadline_secs,
        })
    }

    pub fn home(&self) -> &Arc<dyn BridgeGateway> {
        &self.home
    }

    pub fn gateway(&self, chain: ChainSlug) -> BonderResult<&Arc<dyn BridgeGateway>> {
        self.gateways
            .get(&chain)
            .ok_or_else(|| ConfigError::ChainNotConfigured(chain.to_string()).into())
    }

    /// Configured secondary chains, in a stable order.
    pub fn secondary_chains(&self) -> Vec<ChainSlug> {
        let mut chains: Vec<_> = self
            .gateways
            .keys()
            .copied()
            .filter(|c| !c.is_home())
            .collect();
        chains.sort();
        chains
    }

    pub fn chains(&self) -> Vec<ChainSlug> {
        let mut chains: Vec<_> = self.gateways.keys().copied().collect();
        chains.sort();
        chains
    }

    pub fn chain_for_id(&self, chain_id: u64) -> Option<ChainSlug> {
        self.gateways
            .values()
            .find(|g| g.chain_id() == chain_id)
            .map(|g| g.chain())
    }

    pub fn book(&self) -> &RootBook {
        &self.book
    }

    pub fn queue(&self) -> &AccountQueue {
        &self.queue
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Home chain time, in Unix seconds.
    pub async fn now(&self) -> BonderResult<u64> {
        self.home.block_timestamp().await
    }

    /// Bonder fee for sending `amount` out of `chain`, from fresh parameters.
    pub async fn bonder_fee(&self, chain: ChainSlug, amount: U256) -> BonderResult<U256> {
        let gateway = self.gateway(chain)?;
        Ok(FeeSchedule::fetch(gateway.as_ref()).await?.fee_for(amount))
    }

    /// Pending transfer ids on `source` destined for `destination`.
    ///
    /// Indices are read from 0 up to `maxPendingTransfers - 1`; the first
    /// reverted lookup marks the end of the list. Any other failure is
    /// returned so callers never act on a partial view.
    pub async fn pending_transfers(
        &self,
        source: ChainSlug,
        destination: ChainSlug,
    ) -> BonderResult<TransferBatch> {
        let gateway = self.gateway(source)?;
        let destination_chain_id = self.gateway(destination)?.chain_id();
        let max = gateway.max_pending_transfers().await?;

        let mut ids = Vec::new();
        for index in 0..max {
            match gateway.pending_transfer_id(destination_chain_id, index).await {
                Ok(id) => ids.push(id),
                Err(e) if e.is_call_reverted() => break,
                Err(e) => return Err(e),
            }
        }

        let accumulated_amount = if ids.is_empty() {
            U256::ZERO
        } else {
            gateway.pending_amount(destination_chain_id).await?
        };

        Ok(TransferBatch {
            source_chain: source,
            destination_chain: destination,
            token: self.token.clone(),
            pending_transfer_ids: ids,
            accumulated_amount,
        })
    }

    /// Destination must not be paused and, unless it is the home chain itself,
    /// must have a messenger wrapper. Both are read from the home chain on
    /// every call.
    pub async fn validate_chain_id(&self, chain_id: u64) -> BonderResult<()> {
        if self.home.is_chain_id_paused(chain_id).await? {
            return Err(PreconditionError::ChainPaused { chain_id }.into());
        }
        if chain_id == self.home.chain_id() {
            return Ok(());
        }
        if self.home.cross_domain_messenger_wrapper(chain_id).await? == Address::ZERO {
            return Err(PreconditionError::WrapperNotSet { chain_id }.into());
        }
        Ok(())
    }

    /// Roll the pending batch on `source` for `destination` into a root.
    pub async fn commit_transfers(
        &self,
        source: ChainSlug,
        destination: ChainSlug,
    ) -> BonderResult<CommitOutcome> {
        let gateway = Arc::clone(self.gateway(source)?);
        let destination_chain_id = self.gateway(destination)?.chain_id();

        self.validate_chain_id(destination_chain_id).await?;

        let batch = self.pending_transfers(source, destination).await?;
        if batch.is_empty() {
            return Err(PreconditionError::NothingToCommit {
                chain_id: destination_chain_id,
            }
            .into());
        }

        info!(
            source = %source,
            destination = %destination,
            pending = batch.len(),
            amount = %batch.accumulated_amount,
            "Committing transfers"
        );

        let outcome = self
            .queue
            .enqueue(gateway.identity(), move || async move {
                gateway.commit_transfers(destination_chain_id).await
            })
            .await?;

        match &outcome.root {
            Some(root) => {
                self.book.record_committed(source, root);
                info!(
                    source = %source,
                    root_hash = %root.root_hash,
                    total_amount = %root.total_amount,
                    tx_hash = %outcome.tx.tx_hash,
                    "Transfers committed"
                );
            }
            None => warn!(
                source = %source,
                tx_hash = %outcome.tx.tx_hash,
                "Commit mined without a TransfersCommitted event"
            ),
        }

        Ok(outcome)
    }

    /// Stake a bond on a committed root from the home chain identity.
    ///
    /// The bond is `max(getBondForTransferAmount, fee floor)`, both read from
    /// the home chain where the bond is placed. The duplicate check, bond
    /// sizing, credit check and submission all run inside the identity's
    /// queue slot, so two bond attempts for one root cannot both pass the
    /// checks.
    pub async fn bond_transfer_root(
        &self,
        root_hash: B256,
        destination_chain_id: u64,
        total_amount: U256,
    ) -> BonderResult<Bond> {
        if self.chain_for_id(destination_chain_id).is_none() {
            return Err(PreconditionError::UnknownChainId {
                chain_id: destination_chain_id,
            }
            .into());
        }

        let home = Arc::clone(&self.home);
        let book = self.book.clone();
        let local_id = transfer_root_id(root_hash, total_amount);

        self.queue
            .enqueue(home.identity(), move || async move {
                if book.get(&local_id).is_some_and(|r| r.bond.is_some()) {
                    return Err(PreconditionError::AlreadyBonded { root_hash }.into());
                }

                let root_id = home.transfer_root_id(root_hash, total_amount).await?;
                let existing = home.transfer_bond(root_id).await?;
                if existing.is_bonded() {
                    return Err(PreconditionError::AlreadyBonded { root_hash }.into());
                }

                let fee = FeeSchedule::fetch(home.as_ref()).await?.fee_for(total_amount);
                let amount = home.bond_for_transfer_amount(total_amount).await?.max(fee);
                let bonder = home.identity();
                let credit = home.credit(bonder).await?;
                if credit < amount {
                    return Err(PreconditionError::InsufficientCredit {
                        required: amount.to_string(),
                        available: credit.to_string(),
                    }
                    .into());
                }

                debug!(%root_hash, %total_amount, bond = %amount, "Bonding transfer root");
                let tx = home
                    .bond_transfer_root(root_hash, destination_chain_id, total_amount)
                    .await?;
                let bonded_at = home.block_timestamp().await?;

                let bond = Bond {
                    bonder,
                    amount,
                    transfer_root_id: root_id,
                    bonded_at,
                };

                if !book.contains(&local_id) {
                    book.record_committed_unknown(root_hash, destination_chain_id, total_amount);
                }
                book.update(&local_id, |root| root.bond(bond.clone()))?;

                info!(
                    %root_hash,
                    %total_amount,
                    bond = %amount,
                    tx_hash = %tx.tx_hash,
                    "Transfer root bonded"
                );
                Ok(bond)
            })
            .await
    }

    /// Challenge the bond on a root within its challenge period.
    pub async fn challenge_transfer_root(
        &self,
        root_hash: B256,
        total_amount: U256,
    ) -> BonderResult<ChallengeRecord> {
        let root_id = self.home.transfer_root_id(root_hash, total_amount).await?;
        let info = self.home.transfer_bond(root_id).await?;
        if !info.is_bonded() {
            return Err(PreconditionError::NotBonded { root_hash }.into());
        }
        if info.is_challenged() {
            return Err(PreconditionError::AlreadyChallenged { root_hash }.into());
        }

        let challenge_period = self.home.challenge_period().await?;
        let now = self.now().await?;
        let ended_at = info.created_at.saturating_add(challenge_period);
        if now >= ended_at {
            return Err(PreconditionError::ChallengePeriodOver { root_hash, ended_at }.into());
        }

        let stake = self
            .home
            .challenge_amount_for_transfer_amount(total_amount)
            .await?;
        let resolution_period = self.home.challenge_resolution_period().await?;

        let home = Arc::clone(&self.home);
        let tx = self
            .queue
            .enqueue(home.identity(), move || async move {
                ensure_funds(home.as_ref(), stake).await?;
                home.challenge_transfer_bond(root_hash, total_amount, stake)
                    .await
            })
            .await?;

        let record = ChallengeRecord::new(root_hash, total_amount, stake, now, resolution_period);
        self.ensure_bonded_projection(root_hash, total_amount, &info).await?;
        self.book.update(&transfer_root_id(root_hash, total_amount), |root| {
            root.challenge(record.clone())
        })?;

        info!(
            %root_hash,
            %total_amount,
            stake = %stake,
            resolution_deadline = record.resolution_deadline,
            tx_hash = %tx.tx_hash,
            "Transfer bond challenged"
        );
        Ok(record)
    }

    /// Resolve a challenge once its resolution period has fully elapsed.
    pub async fn resolve_challenge(
        &self,
        root_hash: B256,
        total_amount: U256,
    ) -> BonderResult<RootState> {
        let root_id = self.home.transfer_root_id(root_hash, total_amount).await?;
        let info = self.home.transfer_bond(root_id).await?;
        if !info.is_challenged() {
            return Err(PreconditionError::NotChallenged { root_hash }.into());
        }
        if info.challenge_resolved {
            return Err(PreconditionError::AlreadyResolved { root_hash }.into());
        }

        let resolution_period = self.home.challenge_resolution_period().await?;
        let now = self.now().await?;
        check_resolution_window(root_hash, info.challenge_start_time, resolution_period, now)?;

        let home = Arc::clone(&self.home);
        let tx = self
            .queue
            .enqueue(home.identity(), move || async move {
                home.resolve_challenge(root_hash, total_amount).await
            })
            .await?;

        // a root that reached the home chain through the messenger was honest
        let fraudulent = self.home.transfer_root_committed_at(root_id).await? == 0;

        let local_id = transfer_root_id(root_hash, total_amount);
        if self.book.get(&local_id).map(|r| r.state) != Some(RootState::Challenged) {
            self.observe_challenge(root_hash, total_amount, &info, resolution_period)
                .await?;
        }
        self.book.update(&local_id, |root| root.resolve(fraudulent))?;
        let state = if fraudulent {
            RootState::ResolvedFraudulent
        } else {
            RootState::ResolvedValid
        };

        info!(
            %root_hash,
            outcome = state.as_str(),
            tx_hash = %tx.tx_hash,
            "Challenge resolved"
        );
        Ok(state)
    }

    /// Record in the book a challenge raised by someone else.
    pub async fn observe_challenge(
        &self,
        root_hash: B256,
        total_amount: U256,
        info: &TransferBondInfo,
        resolution_period: u64,
    ) -> BonderResult<()> {
        self.ensure_bonded_projection(root_hash, total_amount, info)
            .await?;
        let stake = self
            .home
            .challenge_amount_for_transfer_amount(total_amount)
            .await?;
        let record = ChallengeRecord::new(
            root_hash,
            total_amount,
            stake,
            info.challenge_start_time,
            resolution_period,
        );
        self.book
            .update(&transfer_root_id(root_hash, total_amount), |root| {
                if root.challenge.is_some() {
                    return Ok(());
                }
                root.challenge(record)
            })
    }

    /// Make sure the book holds a Bonded projection of a root bonded on chain.
    pub async fn ensure_bonded_projection(
        &self,
        root_hash: B256,
        total_amount: U256,
        info: &TransferBondInfo,
    ) -> BonderResult<()> {
        let local_id = transfer_root_id(root_hash, total_amount);
        let needs_bond = self
            .book
            .get(&local_id)
            .map(|r| r.bond.is_none())
            .unwrap_or(true);
        if !needs_bond {
            return Ok(());
        }

        let bond = Bond {
            bonder: info.bonder,
            amount: self.home.bond_for_transfer_amount(total_amount).await?,
            transfer_root_id: local_id,
            bonded_at: info.created_at,
        };

        match self.book.get(&local_id) {
            Some(_) => self.book.update(&local_id, |root| root.bond(bond)),
            None => {
                let observed = BondedRoot {
                    root_hash,
                    total_amount,
                    block_number: 0,
                };
                self.book.insert(TransferRoot::observed_bonded(&observed, bond));
                Ok(())
            }
        }
    }

    /// Pick up the on-chain bond of a root, whoever placed it.
    /// Returns whether the root is bonded.
    pub async fn sync_bond(&self, root_hash: B256, total_amount: U256) -> BonderResult<bool> {
        let root_id = self.home.transfer_root_id(root_hash, total_amount).await?;
        let info = self.home.transfer_bond(root_id).await?;
        if !info.is_bonded() {
            return Ok(false);
        }
        self.ensure_bonded_projection(root_hash, total_amount, &info)
            .await?;
        Ok(true)
    }

    /// Pick up a challenge raised on chain against a tracked root.
    /// Returns whether the root is challenged.
    pub async fn sync_challenge(&self, root_hash: B256, total_amount: U256) -> BonderResult<bool> {
        let root_id = self.home.transfer_root_id(root_hash, total_amount).await?;
        let info = self.home.transfer_bond(root_id).await?;
        if !info.is_challenged() {
            return Ok(false);
        }
        let resolution_period = self.home.challenge_resolution_period().await?;
        self.observe_challenge(root_hash, total_amount, &info, resolution_period)
            .await?;
        Ok(true)
    }

    /// Record a resolution submitted by someone else.
    pub async fn sync_resolution(&self, root_hash: B256, total_amount: U256) -> BonderResult<RootState> {
        let root_id = self.home.transfer_root_id(root_hash, total_amount).await?;
        let fraudulent = self.home.transfer_root_committed_at(root_id).await? == 0;
        self.book
            .update(&transfer_root_id(root_hash, total_amount), |root| {
                root.resolve(fraudulent)?;
                Ok(root.state)
            })
    }

    /// Bonded, unchallenged roots whose challenge period is over.
    pub async fn settleable_roots(&self) -> BonderResult<Vec<TransferRoot>> {
        let challenge_period = self.home.challenge_period().await?;
        let now = self.now().await?;
        Ok(self
            .book
            .in_state(RootState::Bonded)
            .into_iter()
            .filter(|r| r.is_settleable(now, challenge_period))
            .collect())
    }

    /// Final state accounting for a root.
    pub fn mark_settled(&self, root_id: &B256) -> BonderResult<()> {
        self.book.update(root_id, |root| root.settle())
    }

    /// Send `amount` from `source` to `destination` for `recipient`.
    pub async fn send(
        &self,
        source: ChainSlug,
        destination: ChainSlug,
        amount: U256,
        recipient: Address,
    ) -> BonderResult<TxOutcome> {
        if source == destination {
            return Err(PreconditionError::SameChain {
                chain: source.to_string(),
            }
            .into());
        }

        let gateway = Arc::clone(self.gateway(source)?);
        let destination_chain_id = self.gateway(destination)?.chain_id();

        self.validate_chain_id(destination_chain_id).await?;

        let now = gateway.block_timestamp().await?;
        let deadline = now.saturating_add(self.send_deadline_secs);

        let request = if source.is_home() {
            SendRequest::ToSecondary {
                destination_chain_id,
                recipient,
                amount,
                amount_out_min: U256::ZERO,
                deadline,
                relayer: Address::ZERO,
                relayer_fee: U256::ZERO,
            }
        } else {
            let bonder_fee = self.bonder_fee(source, amount).await?;
            let destination_deadline = if destination.is_home() { 0 } else { deadline };
            SendRequest::SwapAndSend {
                destination_chain_id,
                recipient,
                amount,
                bonder_fee,
                amount_out_min: U256::ZERO,
                deadline,
                destination_amount_out_min: U256::ZERO,
                destination_deadline,
            }
        };

        info!(
            source = %source,
            destination = %destination,
            %amount,
            %recipient,
            "Sending transfer"
        );

        self.queue
            .enqueue(gateway.identity(), move || async move {
                ensure_funds(gateway.as_ref(), request.amount()).await?;
                gateway.send(&request).await
            })
            .await
    }

    /// Add bonder stake on `chain`.
    pub async fn stake(&self, chain: ChainSlug, amount: U256) -> BonderResult<TxOutcome> {
        let gateway = Arc::clone(self.gateway(chain)?);
        self.queue
            .enqueue(gateway.identity(), move || async move {
                // secondary chains burn their own hop tokens, nothing is pulled
                if gateway.chain().is_home() {
                    ensure_funds(gateway.as_ref(), amount).await?;
                }
                let bonder = gateway.identity();
                gateway.stake(bonder, amount).await
            })
            .await
    }

    /// Put commitments remembered from an earlier run back into the book.
    /// Returns how many were not tracked yet.
    pub fn restore_commitments(&self, commitments: &[KnownCommitment]) -> usize {
        commitments
            .iter()
            .filter(|c| self.book.record_committed(c.source_chain, &c.root))
            .count()
    }

    /// Look the commitment of a bonded root up in the whole history of every
    /// secondary chain. Block range scans only reach back one window on a
    /// first start, so this runs before any challenge is raised.
    pub async fn find_commitment(
        &self,
        root_hash: B256,
        total_amount: U256,
    ) -> BonderResult<Option<KnownCommitment>> {
        for chain in self.secondary_chains() {
            let found = self
                .gateway(chain)?
                .commitments_of(root_hash)
                .await?
                .into_iter()
                .find(|root| root.total_amount == total_amount);
            if let Some(root) = found {
                return Ok(Some(KnownCommitment {
                    source_chain: chain,
                    root,
                }));
            }
        }
        Ok(None)
    }

    pub async fn is_bonder(&self, chain: ChainSlug) -> BonderResult<bool> {
        let gateway = self.gateway(chain)?;
        gateway.is_bonder(gateway.identity()).await
    }

    pub async fn credit(&self, chain: ChainSlug) -> BonderResult<U256> {
        let gateway = self.gateway(chain)?;
        gateway.credit(gateway.identity()).await
    }

    pub async fn set_max_pending_transfers(
        &self,
        chain: ChainSlug,
        max: u64,
    ) -> BonderResult<TxOutcome> {
        let gateway = Arc::clone(self.gateway(chain)?);
        ensure_governance(gateway.as_ref()).await?;
        self.queue
            .enqueue(gateway.identity(), move || async move {
                gateway.set_max_pending_transfers(max).await
            })
            .await
    }

    pub async fn set_challenge_period_and_time_slot_size(
        &self,
        challenge_period: u64,
        time_slot_size: u64,
    ) -> BonderResult<TxOutcome> {
        let home = Arc::clone(&self.home);
        ensure_governance(home.as_ref()).await?;
        self.queue
            .enqueue(home.identity(), move || async move {
                home.set_challenge_period_and_time_slot_size(challenge_period, time_slot_size)
                    .await
            })
            .await
    }

    pub async fn set_challenge_resolution_period(&self, period: u64) -> BonderResult<TxOutcome> {
        let home = Arc::clone(&self.home);
        ensure_governance(home.as_ref()).await?;
        self.queue
            .enqueue(home.identity(), move || async move {
                home.set_challenge_resolution_period(period).await
            })
            .await
    }
}

impl RootBook {
    /// Committed projection for a root we bond without having seen its commit.
    fn record_committed_unknown(&self, root_hash: B256, destination_chain_id: u64, total_amount: U256) {
        let root = TransferRoot {
            root_hash,
            source_chain: None,
            destination_chain_id,
            total_amount,
            committed_at: 0,
            state: RootState::Committed,
            bond: None,
            challenge: None,
        };
        self.roots
            .write()
            .entry(root.transfer_root_id())
            .or_insert(root);
    }
}

/// Balance and allowance checks for a write that pulls `amount` of the
/// bridged token from the signer. Runs inside the signer's queue slot; a
/// short allowance is raised to unlimited before the write goes out.
async fn ensure_funds(gateway: &dyn BridgeGateway, amount: U256) -> BonderResult<()> {
    let owner = gateway.identity();
    let balance = gateway.token_balance(owner).await?;
    if balance < amount {
        return Err(PreconditionError::InsufficientBalance {
            required: amount.to_string(),
            available: balance.to_string(),
        }
        .into());
    }
    if gateway.native_token() {
        return Ok(());
    }

    let spender = gateway.token_spender();
    let allowance = gateway.allowance(owner, spender).await?;
    if allowance < amount {
        info!(
            chain = %gateway.chain(),
            %spender,
            %allowance,
            %amount,
            "Approving bridged token"
        );
        gateway.approve(spender, U256::MAX).await?;
    }
    Ok(())
}

async fn ensure_governance(gateway: &dyn BridgeGateway) -> BonderResult<()> {
    let governance = gateway.governance().await?;
    let caller = gateway.identity();
    if governance != caller {
        return Err(BonderError::Permission { caller, governance });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(hash: u8, amount: u64) -> CommittedRoot {
        CommittedRoot {
            root_hash: B256::repeat_byte(hash),
            destination_chain_id: 5,
            total_amount: U256::from(amount),
            committed_at: 1_000,
            block_number: 10,
        }
    }

    fn bond_at(at: u64) -> Bond {
        Bond {
            bonder: Address::repeat_byte(9),
            amount: U256::from(1),
            transfer_root_id: B256::ZERO,
            bonded_at: at,
        }
    }

    #[test]
    fn test_bond_amount_relative_wins() {
        // 1_000_000 * 10 / 10000 = 1000 > 1
        assert_eq!(
            bond_amount(U256::from(1_000_000u64), U256::from(10), U256::from(1)),
            U256::from(1000)
        );
    }

    #[test]
    fn test_bond_amount_absolute_floor() {
        assert_eq!(
            bond_amount(U256::from(100), U256::from(10), U256::from(1)),
            U256::from(1)
        );
        // zero amount and zero bps both fall back to the absolute fee
        assert_eq!(
            bond_amount(U256::ZERO, U256::from(10), U256::from(7)),
            U256::from(7)
        );
        assert_eq!(
            bond_amount(U256::from(5_000_000u64), U256::ZERO, U256::from(7)),
            U256::from(7)
        );
    }

    #[test]
    fn test_bond_amount_with_wei_scale() {
        let ether = U256::from(10u64).pow(U256::from(18));
        let total = U256::from(100) * ether;
        // 0.1 relative vs 1 absolute
        assert_eq!(bond_amount(total, U256::from(10), ether), ether);
    }

    #[test]
    fn test_resolution_window_boundary() {
        let hash = B256::repeat_byte(1);
        assert!(check_resolution_window(hash, 100, 50, 149).is_err());
        assert!(check_resolution_window(hash, 100, 50, 150).is_ok());
        assert!(check_resolution_window(hash, 100, 50, 151).is_ok());

        let err = check_resolution_window(hash, 100, 50, 120).unwrap_err();
        assert_eq!(
            err,
            PreconditionError::ResolutionPeriodNotElapsed {
                root_hash: hash,
                deadline: 150,
                now: 120
            }
        );
    }

    #[test]
    fn test_transfer_root_id_matches_packed_encoding() {
        let hash = B256::repeat_byte(0xab);
        let amount = U256::from(42);
        let mut expected = hash.to_vec();
        expected.extend_from_slice(&amount.to_be_bytes::<32>());
        assert_eq!(transfer_root_id(hash, amount), keccak256(expected));
        assert_ne!(transfer_root_id(hash, amount), transfer_root_id(hash, U256::from(43)));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut root = TransferRoot::committed(ChainSlug::Optimism, &committed(1, 100));
        assert_eq!(root.state, RootState::Committed);

        root.bond(bond_at(2_000)).unwrap();
        assert_eq!(root.state, RootState::Bonded);
        assert!(!root.is_settleable(2_500, 1_000));
        assert!(root.is_settleable(3_000, 1_000));

        root.settle().unwrap();
        assert_eq!(root.state, RootState::Settled);
    }

    #[test]
    fn test_bond_only_once() {
        let mut root = TransferRoot::committed(ChainSlug::Optimism, &committed(1, 100));
        root.bond(bond_at(1)).unwrap();
        let err = root.bond(bond_at(2)).unwrap_err();
        assert!(matches!(
            err,
            BonderError::Precondition(PreconditionError::AlreadyBonded { .. })
        ));
    }

    #[test]
    fn test_challenge_and_resolve() {
        let mut root = TransferRoot::committed(ChainSlug::Arbitrum, &committed(2, 100));
        root.bond(bond_at(10)).unwrap();

        let record = ChallengeRecord::new(root.root_hash, root.total_amount, U256::from(10), 20, 100);
        assert_eq!(record.resolution_deadline, 120);
        assert!(!record.can_resolve(119));
        assert!(record.can_resolve(120));

        root.challenge(record).unwrap();
        assert_eq!(root.state, RootState::Challenged);
        assert!(!root.is_settleable(u64::MAX, 0));

        root.resolve(true).unwrap();
        assert_eq!(root.state, RootState::ResolvedFraudulent);
        assert!(root.challenge.as_ref().unwrap().resolved);

        root.settle().unwrap();
        assert_eq!(root.state, RootState::Settled);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut root = TransferRoot::committed(ChainSlug::Polygon, &committed(3, 100));
        let record = ChallengeRecord::new(root.root_hash, root.total_amount, U256::ZERO, 0, 0);

        assert!(matches!(
            root.challenge(record),
            Err(BonderError::InvalidTransition { from: "committed", to: "challenged", .. })
        ));
        assert!(root.resolve(false).is_err());
        assert!(root.settle().is_err());
    }

    #[test]
    fn test_book_records_commit_once() {
        let book = RootBook::new();
        let root = committed(4, 100);
        assert!(book.record_committed(ChainSlug::Optimism, &root));
        assert!(!book.record_committed(ChainSlug::Optimism, &root));
        assert_eq!(book.len(), 1);

        let id = transfer_root_id(root.root_hash, root.total_amount);
        assert!(book.get(&id).unwrap().is_known_commitment());
        assert_eq!(book.in_state(RootState::Committed).len(), 1);
    }

    #[test]
    fn test_book_fills_origin_of_observed_root() {
        let book = RootBook::new();
        let bonded = BondedRoot {
            root_hash: B256::repeat_byte(5),
            total_amount: U256::from(100),
            block_number: 1,
        };
        book.insert(TransferRoot::observed_bonded(&bonded, bond_at(1)));

        let id = transfer_root_id(bonded.root_hash, bonded.total_amount);
        assert!(!book.get(&id).unwrap().is_known_commitment());

        book.record_committed(ChainSlug::Xdai, &committed(5, 100));
        let root = book.get(&id).unwrap();
        assert!(root.is_known_commitment());
        assert_eq!(root.state, RootState::Bonded);
    }
}
