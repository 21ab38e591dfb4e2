//! Types for the bonder

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Chains the bridge spans. `Ethereum` is the home chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainSlug {
    Ethereum,
    Optimism,
    Arbitrum,
    Polygon,
    Xdai,
}

impl ChainSlug {
    pub const ALL: [ChainSlug; 5] = [
        ChainSlug::Ethereum,
        ChainSlug::Optimism,
        ChainSlug::Arbitrum,
        ChainSlug::Polygon,
        ChainSlug::Xdai,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainSlug::Ethereum => "ethereum",
            ChainSlug::Optimism => "optimism",
            ChainSlug::Arbitrum => "arbitrum",
            ChainSlug::Polygon => "polygon",
            ChainSlug::Xdai => "xdai",
        }
    }

    /// Whether this is the home chain that holds bonds and challenges
    pub fn is_home(&self) -> bool {
        matches!(self, ChainSlug::Ethereum)
    }

    /// Testnet (Goerli era) network id used when none is configured
    pub fn default_chain_id(&self) -> u64 {
        match self {
            ChainSlug::Ethereum => 5,
            ChainSlug::Optimism => 420,
            ChainSlug::Arbitrum => 421613,
            ChainSlug::Polygon => 80001,
            ChainSlug::Xdai => 77,
        }
    }

    /// Prefix for per-chain environment variables, e.g. `OPTIMISM_RPC_URL`
    pub fn env_prefix(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl fmt::Display for ChainSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainSlug {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ChainSlug::ALL
            .into_iter()
            .find(|slug| slug.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownChain(s.to_string()))
    }
}

/// What a [`ChainRecord`] holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "destination", rename_all = "snake_case")]
pub enum RecordKind {
    GasPrice,
    /// Number of pending transfers towards the given destination
    PendingTransfers(ChainSlug),
    /// Last block scanned for protocol events
    LastScannedBlock,
    /// Number of bonded roots whose challenge period has passed
    SettleableRoots,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::GasPrice => f.write_str("gas_price"),
            RecordKind::PendingTransfers(dest) => write!(f, "pending_transfers:{dest}"),
            RecordKind::LastScannedBlock => f.write_str("last_scanned_block"),
            RecordKind::SettleableRoots => f.write_str("settleable_roots"),
        }
    }
}

/// Latest observation for one (chain, kind) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub chain: ChainSlug,
    pub kind: RecordKind,
    pub value: U256,
    pub observed_at_millis: i64,
}

impl ChainRecord {
    /// Build a record stamped with the current wall clock
    pub fn now(chain: ChainSlug, kind: RecordKind, value: U256) -> Self {
        Self {
            chain,
            kind,
            value,
            observed_at_millis: Utc::now().timestamp_millis(),
        }
    }
}

/// Transfers sitting on a secondary chain waiting to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch {
    pub source_chain: ChainSlug,
    pub destination_chain: ChainSlug,
    pub token: String,
    pub pending_transfer_ids: Vec<B256>,
    pub accumulated_amount: U256,
}

impl TransferBatch {
    pub fn is_empty(&self) -> bool {
        self.pending_transfer_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending_transfer_ids.len()
    }
}

/// Lifecycle of a transfer root as seen by this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootState {
    Committed,
    Bonded,
    Challenged,
    ResolvedValid,
    ResolvedFraudulent,
    Settled,
}

impl RootState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootState::Committed => "committed",
            RootState::Bonded => "bonded",
            RootState::Challenged => "challenged",
            RootState::ResolvedValid => "resolved-valid",
            RootState::ResolvedFraudulent => "resolved-fraudulent",
            RootState::Settled => "settled",
        }
    }
}

/// Bond staked against a transfer root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub bonder: Address,
    pub amount: U256,
    pub transfer_root_id: B256,
    pub bonded_at: u64,
}

/// Dispute raised against a bonded root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub transfer_root_hash: B256,
    pub total_amount: U256,
    pub stake: U256,
    pub challenge_started_at: u64,
    pub resolution_deadline: u64,
    pub resolved: bool,
}

impl ChallengeRecord {
    pub fn new(
        transfer_root_hash: B256,
        total_amount: U256,
        stake: U256,
        challenge_started_at: u64,
        resolution_period: u64,
    ) -> Self {
        Self {
            transfer_root_hash,
            total_amount,
            stake,
            challenge_started_at,
            resolution_deadline: challenge_started_at.saturating_add(resolution_period),
            resolved: false,
        }
    }

    /// Resolution is allowed at and after the deadline
    pub fn can_resolve(&self, now: u64) -> bool {
        !self.resolved && now >= self.resolution_deadline
    }
}

/// Local projection of an on-chain transfer root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRoot {
    pub root_hash: B256,
    /// Secondary chain the commitment was seen on; `None` when only the bond was seen
    pub source_chain: Option<ChainSlug>,
    pub destination_chain_id: u64,
    pub total_amount: U256,
    pub committed_at: u64,
    pub state: RootState,
    pub bond: Option<Bond>,
    pub challenge: Option<ChallengeRecord>,
}

/// `TransfersCommitted` as emitted by a secondary chain bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRoot {
    pub root_hash: B256,
    pub destination_chain_id: u64,
    pub total_amount: U256,
    pub committed_at: u64,
    pub block_number: u64,
}

/// A commitment together with the secondary chain it was emitted on.
///
/// Persisted so that bonds placed after a restart can still be matched
/// against commitments observed before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownCommitment {
    pub source_chain: ChainSlug,
    pub root: CommittedRoot,
}

/// `TransferRootBonded` as emitted by the home chain bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondedRoot {
    pub root_hash: B256,
    pub total_amount: U256,
    pub block_number: u64,
}

/// On-chain `transferBonds(rootId)` entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferBondInfo {
    pub bonder: Address,
    pub created_at: u64,
    pub total_amount: U256,
    pub challenge_start_time: u64,
    pub challenger: Address,
    pub challenge_resolved: bool,
}

impl TransferBondInfo {
    pub fn is_bonded(&self) -> bool {
        self.created_at != 0
    }

    pub fn is_challenged(&self) -> bool {
        self.challenge_start_time != 0
    }
}

/// Receipt summary of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Per-watcher statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatcherStats {
    pub polls_ok: u64,
    pub polls_failed: u64,
    /// Consecutive failures (resets on success)
    pub consecutive_failures: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WatcherStats {
    pub fn record_success(&mut self) {
        self.polls_ok += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
    }

    pub fn record_failure(&mut self, error: String) {
        self.polls_failed += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error);
    }

    pub fn total_polls(&self) -> u64 {
        self.polls_ok + self.polls_failed
    }
}
