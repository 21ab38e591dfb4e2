//! Scripted in-memory bridge for integration testing
//!
//! Implements the chain gateway trait over plain state that tests can poke
//! directly. Every write is recorded in submission order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;

use hop_bonder::{
    error::{BonderResult, GatewayError},
    gateway::{BridgeGateway, CommitOutcome, SendRequest},
    settlement::transfer_root_id,
    BondedRoot, ChainSlug, CommittedRoot, TransferBondInfo, TxOutcome,
};

/// Contract the mock reports as pulling the bridged token
pub const SPENDER: Address = Address::new([0x5e; 20]);

/// A write accepted by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Approve { spender: Address, amount: U256 },
    Send(SendRequest),
    Commit { destination_chain_id: u64 },
    Bond { root_hash: B256, destination_chain_id: u64, total_amount: U256 },
    Challenge { root_hash: B256, total_amount: U256, stake: U256 },
    Resolve { root_hash: B256, total_amount: U256 },
    Stake { bonder: Address, amount: U256 },
    SetMaxPendingTransfers(u64),
    SetChallengePeriod { period: u64, time_slot_size: u64 },
    SetResolutionPeriod(u64),
}

/// Mock bridge state
#[derive(Debug)]
pub struct MockBridgeState {
    pub gas_price: U256,
    pub block_number: u64,
    pub timestamp: u64,
    pub min_bonder_bps: U256,
    pub min_bonder_fee_absolute: U256,
    pub challenge_period: u64,
    pub challenge_resolution_period: u64,
    pub challenge_amount: U256,
    pub bond_for_amount: U256,
    pub credit: U256,
    pub native: bool,
    pub balance: U256,
    pub allowance: U256,
    /// whether commitment lookups reach back to genesis
    pub lookup_history: bool,
    pub governance: Address,
    pub bonders: HashSet<Address>,
    pub paused: HashSet<u64>,
    pub wrappers: HashMap<u64, Address>,
    pub max_pending_transfers: u64,
    /// destination chain id -> pending transfer ids
    pub pending: HashMap<u64, Vec<B256>>,
    pub pending_amounts: HashMap<u64, U256>,
    /// index at which the pending lookup fails with a transport error
    pub flaky_index: Option<u64>,
    pub transfer_bonds: HashMap<B256, TransferBondInfo>,
    pub committed_at: HashMap<B256, u64>,
    pub committed_events: Vec<CommittedRoot>,
    pub bonded_events: Vec<BondedRoot>,
    pub submitted: Vec<Submitted>,
    pub write_delay: Duration,
}

impl Default for MockBridgeState {
    fn default() -> Self {
        Self {
            gas_price: U256::from(1_000_000_000u64),
            block_number: 100,
            timestamp: 1_700_000_000,
            min_bonder_bps: U256::from(10),
            min_bonder_fee_absolute: U256::from(1),
            challenge_period: 86_400,
            challenge_resolution_period: 864_000,
            challenge_amount: U256::from(10),
            bond_for_amount: U256::from(110),
            credit: U256::from(1_000_000u64),
            native: false,
            balance: U256::from(10u64).pow(U256::from(24)),
            allowance: U256::MAX,
            lookup_history: true,
            governance: Address::ZERO,
            bonders: HashSet::new(),
            paused: HashSet::new(),
            wrappers: HashMap::new(),
            max_pending_transfers: 128,
            pending: HashMap::new(),
            pending_amounts: HashMap::new(),
            flaky_index: None,
            transfer_bonds: HashMap::new(),
            committed_at: HashMap::new(),
            committed_events: Vec::new(),
            bonded_events: Vec::new(),
            submitted: Vec::new(),
            write_delay: Duration::ZERO,
        }
    }
}

/// Mock bridge for one chain
pub struct MockBridge {
    chain: ChainSlug,
    chain_id: u64,
    identity: Address,
    pub state: Mutex<MockBridgeState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    tx_counter: AtomicUsize,
}

impl MockBridge {
    pub fn new(chain: ChainSlug, identity: Address) -> Self {
        Self {
            chain,
            chain_id: chain.default_chain_id(),
            identity,
            state: Mutex::new(MockBridgeState {
                governance: identity,
                ..Default::default()
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            tx_counter: AtomicUsize::new(0),
        }
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.state.lock().submitted.clone()
    }

    /// Highest number of writes observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_pending(&self, destination_chain_id: u64, count: usize, amount: u64) {
        let ids = (0..count)
            .map(|i| keccak256(format!("{}-{destination_chain_id}-{i}", self.chain)))
            .collect();
        let mut state = self.state.lock();
        state.pending.insert(destination_chain_id, ids);
        state
            .pending_amounts
            .insert(destination_chain_id, U256::from(amount));
    }

    pub fn bond_of(&self, root_hash: B256, total_amount: U256) -> Option<TransferBondInfo> {
        self.state
            .lock()
            .transfer_bonds
            .get(&transfer_root_id(root_hash, total_amount))
            .cloned()
    }

    fn rpc_error(&self, message: &str) -> hop_bonder::BonderError {
        GatewayError::Rpc {
            chain: self.chain.to_string(),
            message: message.to_string(),
        }
        .into()
    }

    /// Record a write, holding it "in flight" for the configured delay.
    async fn write(&self, submitted: Submitted) -> TxOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.state.lock().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        let block_number = {
            let mut state = self.state.lock();
            state.submitted.push(submitted);
            state.block_number
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        TxOutcome {
            tx_hash: keccak256(format!("{}-tx-{n}", self.chain)),
            block_number,
            gas_used: 21_000,
        }
    }
}

#[async_trait]
impl BridgeGateway for MockBridge {
    fn chain(&self) -> ChainSlug {
        self.chain
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn identity(&self) -> Address {
        self.identity
    }

    fn native_token(&self) -> bool {
        self.state.lock().native
    }

    fn token_spender(&self) -> Address {
        SPENDER
    }

    async fn gas_price(&self) -> BonderResult<U256> {
        Ok(self.state.lock().gas_price)
    }

    async fn block_number(&self) -> BonderResult<u64> {
        Ok(self.state.lock().block_number)
    }

    async fn block_timestamp(&self) -> BonderResult<u64> {
        Ok(self.state.lock().timestamp)
    }

    async fn min_bonder_bps(&self) -> BonderResult<U256> {
        Ok(self.state.lock().min_bonder_bps)
    }

    async fn min_bonder_fee_absolute(&self) -> BonderResult<U256> {
        Ok(self.state.lock().min_bonder_fee_absolute)
    }

    async fn challenge_period(&self) -> BonderResult<u64> {
        Ok(self.state.lock().challenge_period)
    }

    async fn challenge_resolution_period(&self) -> BonderResult<u64> {
        Ok(self.state.lock().challenge_resolution_period)
    }

    async fn challenge_amount_for_transfer_amount(&self, _amount: U256) -> BonderResult<U256> {
        Ok(self.state.lock().challenge_amount)
    }

    async fn credit(&self, _bonder: Address) -> BonderResult<U256> {
        Ok(self.state.lock().credit)
    }

    async fn bond_for_transfer_amount(&self, _amount: U256) -> BonderResult<U256> {
        Ok(self.state.lock().bond_for_amount)
    }

    async fn transfer_root_committed_at(&self, transfer_root_id: B256) -> BonderResult<u64> {
        Ok(self
            .state
            .lock()
            .committed_at
            .get(&transfer_root_id)
            .copied()
            .unwrap_or(0))
    }

    async fn transfer_root_id(&self, root_hash: B256, total_amount: U256) -> BonderResult<B256> {
        Ok(transfer_root_id(root_hash, total_amount))
    }

    async fn transfer_bond(&self, transfer_root_id: B256) -> BonderResult<TransferBondInfo> {
        Ok(self
            .state
            .lock()
            .transfer_bonds
            .get(&transfer_root_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn max_pending_transfers(&self) -> BonderResult<u64> {
        Ok(self.state.lock().max_pending_transfers)
    }

    async fn pending_transfer_id(
        &self,
        destination_chain_id: u64,
        index: u64,
    ) -> BonderResult<B256> {
        let state = self.state.lock();
        if state.flaky_index == Some(index) {
            return Err(self.rpc_error("connection reset"));
        }
        state
            .pending
            .get(&destination_chain_id)
            .and_then(|ids| ids.get(index as usize))
            .copied()
            .ok_or_else(|| {
                GatewayError::CallReverted {
                    chain: self.chain.to_string(),
                    call: "pendingTransferIdsForChainId",
                    message: "execution reverted".into(),
                }
                .into()
            })
    }

    async fn pending_amount(&self, destination_chain_id: u64) -> BonderResult<U256> {
        Ok(self
            .state
            .lock()
            .pending_amounts
            .get(&destination_chain_id)
            .copied()
            .unwrap_or_default())
    }

    async fn is_chain_id_paused(&self, chain_id: u64) -> BonderResult<bool> {
        Ok(self.state.lock().paused.contains(&chain_id))
    }

    async fn cross_domain_messenger_wrapper(&self, chain_id: u64) -> BonderResult<Address> {
        Ok(self
            .state
            .lock()
            .wrappers
            .get(&chain_id)
            .copied()
            .unwrap_or(Address::ZERO))
    }

    async fn is_bonder(&self, address: Address) -> BonderResult<bool> {
        Ok(self.state.lock().bonders.contains(&address))
    }

    async fn governance(&self) -> BonderResult<Address> {
        Ok(self.state.lock().governance)
    }

    async fn token_balance(&self, _owner: Address) -> BonderResult<U256> {
        Ok(self.state.lock().balance)
    }

    async fn allowance(&self, _owner: Address, _spender: Address) -> BonderResult<U256> {
        let state = self.state.lock();
        Ok(if state.native { U256::MAX } else { state.allowance })
    }

    async fn committed_roots(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> BonderResult<Vec<CommittedRoot>> {
        Ok(self
            .state
            .lock()
            .committed_events
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect())
    }

    async fn bonded_roots(&self, from_block: u64, to_block: u64) -> BonderResult<Vec<BondedRoot>> {
        Ok(self
            .state
            .lock()
            .bonded_events
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect())
    }

    async fn commitments_of(&self, root_hash: B256) -> BonderResult<Vec<CommittedRoot>> {
        let state = self.state.lock();
        if !state.lookup_history {
            return Ok(Vec::new());
        }
        Ok(state
            .committed_events
            .iter()
            .filter(|e| e.root_hash == root_hash)
            .cloned()
            .collect())
    }

    async fn approve(&self, spender: Address, amount: U256) -> BonderResult<TxOutcome> {
        let tx = self.write(Submitted::Approve { spender, amount }).await;
        self.state.lock().allowance = amount;
        Ok(tx)
    }

    async fn send(&self, request: &SendRequest) -> BonderResult<TxOutcome> {
        Ok(self.write(Submitted::Send(request.clone())).await)
    }

    async fn commit_transfers(&self, destination_chain_id: u64) -> BonderResult<CommitOutcome> {
        let tx = self
            .write(Submitted::Commit {
                destination_chain_id,
            })
            .await;

        let mut state = self.state.lock();
        let ids = state.pending.remove(&destination_chain_id).unwrap_or_default();
        let total_amount = state
            .pending_amounts
            .remove(&destination_chain_id)
            .unwrap_or_default();
        if ids.is_empty() {
            return Ok(CommitOutcome { tx, root: None });
        }

        let mut packed = Vec::with_capacity(ids.len() * 32);
        for id in &ids {
            packed.extend_from_slice(id.as_slice());
        }
        let root = CommittedRoot {
            root_hash: keccak256(&packed),
            destination_chain_id,
            total_amount,
            committed_at: state.timestamp,
            block_number: state.block_number,
        };
        state.committed_events.push(root.clone());
        Ok(CommitOutcome {
            tx,
            root: Some(root),
        })
    }

    async fn bond_transfer_root(
        &self,
        root_hash: B256,
        destination_chain_id: u64,
        total_amount: U256,
    ) -> BonderResult<TxOutcome> {
        let tx = self
            .write(Submitted::Bond {
                root_hash,
                destination_chain_id,
                total_amount,
            })
            .await;

        let mut state = self.state.lock();
        let info = TransferBondInfo {
            bonder: self.identity,
            created_at: state.timestamp,
            total_amount,
            ..Default::default()
        };
        state
            .transfer_bonds
            .insert(transfer_root_id(root_hash, total_amount), info);
        let block_number = state.block_number;
        state.bonded_events.push(BondedRoot {
            root_hash,
            total_amount,
            block_number,
        });
        Ok(tx)
    }

    async fn challenge_transfer_bond(
        &self,
        root_hash: B256,
        total_amount: U256,
        stake: U256,
    ) -> BonderResult<TxOutcome> {
        let tx = self
            .write(Submitted::Challenge {
                root_hash,
                total_amount,
                stake,
            })
            .await;

        let mut state = self.state.lock();
        let timestamp = state.timestamp;
        if let Some(bond) = state
            .transfer_bonds
            .get_mut(&transfer_root_id(root_hash, total_amount))
        {
            bond.challenge_start_time = timestamp;
            bond.challenger = self.identity;
        }
        Ok(tx)
    }

    async fn resolve_challenge(
        &self,
        root_hash: B256,
        total_amount: U256,
    ) -> BonderResult<TxOutcome> {
        let tx = self
            .write(Submitted::Resolve {
                root_hash,
                total_amount,
            })
            .await;

        if let Some(bond) = self
            .state
            .lock()
            .transfer_bonds
            .get_mut(&transfer_root_id(root_hash, total_amount))
        {
            bond.challenge_resolved = true;
        }
        Ok(tx)
    }

    async fn stake(&self, bonder: Address, amount: U256) -> BonderResult<TxOutcome> {
        Ok(self.write(Submitted::Stake { bonder, amount }).await)
    }

    async fn set_max_pending_transfers(&self, max: u64) -> BonderResult<TxOutcome> {
        Ok(self.write(Submitted::SetMaxPendingTransfers(max)).await)
    }

    async fn set_challenge_period_and_time_slot_size(
        &self,
        challenge_period: u64,
        time_slot_size: u64,
    ) -> BonderResult<TxOutcome> {
        Ok(self
            .write(Submitted::SetChallengePeriod {
                period: challenge_period,
                time_slot_size,
            })
            .await)
    }

    async fn set_challenge_resolution_period(&self, period: u64) -> BonderResult<TxOutcome> {
        Ok(self.write(Submitted::SetResolutionPeriod(period)).await)
    }
}
