//! Chain gateway: the remote bridge surface the engine talks to
//!
//! One gateway per configured chain. Reads have no side effects. Writes
//! submit a transaction and wait for its receipt; they are never called
//! directly by watchers but always through the [`AccountQueue`](crate::queue::AccountQueue).

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::error::BonderResult;
use crate::types::{BondedRoot, ChainSlug, CommittedRoot, TransferBondInfo, TxOutcome};

/// Arguments of a cross-chain send, one variant per destination kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendRequest {
    /// Home chain bridge `sendToL2`
    ToSecondary {
        destination_chain_id: u64,
        recipient: Address,
        amount: U256,
        amount_out_min: U256,
        deadline: u64,
        relayer: Address,
        relayer_fee: U256,
    },
    /// Secondary chain AMM wrapper `swapAndSend`
    SwapAndSend {
        destination_chain_id: u64,
        recipient: Address,
        amount: U256,
        bonder_fee: U256,
        amount_out_min: U256,
        deadline: u64,
        destination_amount_out_min: U256,
        destination_deadline: u64,
    },
}

impl SendRequest {
    pub fn destination_chain_id(&self) -> u64 {
        match self {
            SendRequest::ToSecondary {
                destination_chain_id,
                ..
            }
            | SendRequest::SwapAndSend {
                destination_chain_id,
                ..
            } => *destination_chain_id,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            SendRequest::ToSecondary { amount, .. } | SendRequest::SwapAndSend { amount, .. } => {
                *amount
            }
        }
    }
}

/// Receipt of a successful `commitTransfers`, with the root it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub tx: TxOutcome,
    pub root: Option<CommittedRoot>,
}

#[async_trait]
pub trait BridgeGateway: Send + Sync {
    /// Chain this gateway is connected to.
    fn chain(&self) -> ChainSlug;

    /// Numeric chain id of that chain.
    fn chain_id(&self) -> u64;

    /// Address of the signing identity used for writes.
    fn identity(&self) -> Address;

    /// Whether the bridged token is the chain's native coin, paid as call
    /// value instead of pulled through an allowance.
    fn native_token(&self) -> bool;

    /// Contract that pulls the bridged token on sends, stakes and challenges.
    fn token_spender(&self) -> Address;

    // -- chain reads --

    async fn gas_price(&self) -> BonderResult<U256>;

    async fn block_number(&self) -> BonderResult<u64>;

    /// Timestamp of the latest block, in Unix seconds.
    async fn block_timestamp(&self) -> BonderResult<u64>;

    // -- protocol reads --

    async fn min_bonder_bps(&self) -> BonderResult<U256>;

    async fn min_bonder_fee_absolute(&self) -> BonderResult<U256>;

    async fn challenge_period(&self) -> BonderResult<u64>;

    async fn challenge_resolution_period(&self) -> BonderResult<u64>;

    async fn challenge_amount_for_transfer_amount(&self, amount: U256) -> BonderResult<U256>;

    async fn credit(&self, bonder: Address) -> BonderResult<U256>;

    async fn bond_for_transfer_amount(&self, amount: U256) -> BonderResult<U256>;

    async fn transfer_root_committed_at(&self, transfer_root_id: B256) -> BonderResult<u64>;

    async fn transfer_root_id(&self, root_hash: B256, total_amount: U256) -> BonderResult<B256>;

    async fn transfer_bond(&self, transfer_root_id: B256) -> BonderResult<TransferBondInfo>;

    async fn max_pending_transfers(&self) -> BonderResult<u64>;

    /// Pending transfer id at `index`. Reverts (as `CallReverted`) past the end.
    async fn pending_transfer_id(&self, destination_chain_id: u64, index: u64)
        -> BonderResult<B256>;

    async fn pending_amount(&self, destination_chain_id: u64) -> BonderResult<U256>;

    async fn is_chain_id_paused(&self, chain_id: u64) -> BonderResult<bool>;

    async fn cross_domain_messenger_wrapper(&self, chain_id: u64) -> BonderResult<Address>;

    async fn is_bonder(&self, address: Address) -> BonderResult<bool>;

    async fn governance(&self) -> BonderResult<Address>;

    // -- bridged token --

    async fn token_balance(&self, owner: Address) -> BonderResult<U256>;

    /// Always `U256::MAX` for a native token.
    async fn allowance(&self, owner: Address, spender: Address) -> BonderResult<U256>;

    /// `TransfersCommitted` events in `[from_block, to_block]`.
    async fn committed_roots(&self, from_block: u64, to_block: u64)
        -> BonderResult<Vec<CommittedRoot>>;

    /// `TransferRootBonded` events in `[from_block, to_block]`.
    async fn bonded_roots(&self, from_block: u64, to_block: u64) -> BonderResult<Vec<BondedRoot>>;

    /// Every `TransfersCommitted` for `root_hash` since genesis, found through
    /// the indexed root hash topic rather than a block range scan.
    async fn commitments_of(&self, root_hash: B256) -> BonderResult<Vec<CommittedRoot>>;

    // -- writes --

    async fn approve(&self, spender: Address, amount: U256) -> BonderResult<TxOutcome>;

    async fn send(&self, request: &SendRequest) -> BonderResult<TxOutcome>;

    async fn commit_transfers(&self, destination_chain_id: u64) -> BonderResult<CommitOutcome>;

    async fn bond_transfer_root(
        &self,
        root_hash: B256,
        destination_chain_id: u64,
        total_amount: U256,
    ) -> BonderResult<TxOutcome>;

    async fn challenge_transfer_bond(
        &self,
        root_hash: B256,
        total_amount: U256,
        stake: U256,
    ) -> BonderResult<TxOutcome>;

    async fn resolve_challenge(&self, root_hash: B256, total_amount: U256)
        -> BonderResult<TxOutcome>;

    async fn stake(&self, bonder: Address, amount: U256) -> BonderResult<TxOutcome>;

    async fn set_max_pending_transfers(&self, max: u64) -> BonderResult<TxOutcome>;

    async fn set_challenge_period_and_time_slot_size(
        &self,
        challenge_period: u64,
        time_slot_size: u64,
    ) -> BonderResult<TxOutcome>;

    async fn set_challenge_resolution_period(&self, period: u64) -> BonderResult<TxOutcome>;
}
