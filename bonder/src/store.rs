//! State store for the latest observation per (chain, kind)
//!
//! Every watcher owns the keys it writes; the store only has to make sure a
//! reader never sees a half-written record. Writes replace the whole record.
//! Commitments seen on secondary chains live next to the records, so a
//! restarted node still recognizes honest roots bonded after the restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use alloy::primitives::{B256, U256};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{BonderError, BonderResult};
use crate::types::{ChainRecord, ChainSlug, KnownCommitment, RecordKind};

/// Key-value store of the last observed [`ChainRecord`] for each (chain, kind)
/// and of every commitment still open to dispute.
pub trait StateStore: Send + Sync {
    /// Latest record for that key, if any was ever written.
    fn get(&self, chain: ChainSlug, kind: RecordKind) -> BonderResult<Option<ChainRecord>>;

    /// Replaces the record stored under `(record.chain, record.kind)`.
    fn update(&self, record: ChainRecord) -> BonderResult<()>;

    /// Snapshot of every stored record.
    fn records(&self) -> BonderResult<Vec<ChainRecord>>;

    /// Remember a commitment. Recording the same root twice keeps one entry.
    fn record_commitment(&self, commitment: &KnownCommitment) -> BonderResult<()>;

    /// Drop a commitment whose root can no longer be challenged.
    fn forget_commitment(&self, root_hash: B256, total_amount: U256) -> BonderResult<()>;

    /// Every remembered commitment, oldest first.
    fn commitments(&self) -> BonderResult<Vec<KnownCommitment>>;
}

fn sort_records(records: &mut [ChainRecord]) {
    records.sort_by_key(|r| (r.chain, r.kind.to_string()));
}

fn sort_commitments(commitments: &mut [KnownCommitment]) {
    commitments.sort_by_key(|c| (c.root.committed_at, c.root.root_hash));
}

type RecordMap = HashMap<(ChainSlug, RecordKind), ChainRecord>;
type CommitmentMap = HashMap<(B256, U256), KnownCommitment>;

/// InMemoryStore keeps the records for the lifetime of the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<RecordMap>>,
    commitments: Arc<RwLock<CommitmentMap>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStore {
    fn get(&self, chain: ChainSlug, kind: RecordKind) -> BonderResult<Option<ChainRecord>> {
        Ok(self.records.read().get(&(chain, kind)).cloned())
    }

    #[tracing::instrument(skip(self), fields(chain = %record.chain, kind = %record.kind))]
    fn update(&self, record: ChainRecord) -> BonderResult<()> {
        self.records
            .write()
            .insert((record.chain, record.kind), record);
        Ok(())
    }

    fn records(&self) -> BonderResult<Vec<ChainRecord>> {
        let mut all: Vec<_> = self.records.read().values().cloned().collect();
        sort_records(&mut all);
        Ok(all)
    }

    fn record_commitment(&self, commitment: &KnownCommitment) -> BonderResult<()> {
        self.commitments.write().insert(
            (commitment.root.root_hash, commitment.root.total_amount),
            commitment.clone(),
        );
        Ok(())
    }

    fn forget_commitment(&self, root_hash: B256, total_amount: U256) -> BonderResult<()> {
        self.commitments.write().remove(&(root_hash, total_amount));
        Ok(())
    }

    fn commitments(&self) -> BonderResult<Vec<KnownCommitment>> {
        let mut all: Vec<_> = self.commitments.read().values().cloned().collect();
        sort_commitments(&mut all);
        Ok(all)
    }
}

const RECORDS_PREFIX: &str = "records/";
const COMMITMENTS: &str = "commitments";

/// SledStore keeps the records in a [sled](https://sled.rs) database.
///
/// One tree per record kind, keyed by chain slug, plus a `commitments` tree
/// keyed by `rootHash ++ totalAmount`. Values are JSON.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Open (or create) the database under `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> BonderResult<Self> {
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// A database that is removed when the last handle is dropped.
    pub fn temporary() -> BonderResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Write every pending change to disk.
    pub fn flush(&self) -> BonderResult<()> {
        let bytes = self.db.flush()?;
        debug!(bytes, "State store flushed");
        Ok(())
    }

    fn records_tree(&self, kind: RecordKind) -> BonderResult<sled::Tree> {
        Ok(self.db.open_tree(format!("{RECORDS_PREFIX}{kind}"))?)
    }
}

fn commitment_key(root_hash: B256, total_amount: U256) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(root_hash.as_slice());
    key[32..].copy_from_slice(&total_amount.to_be_bytes::<32>());
    key
}

fn encode<T: Serialize>(value: &T) -> BonderResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| BonderError::Internal(format!("state store encode: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> BonderResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| BonderError::Internal(format!("state store decode: {e}")))
}

impl StateStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, chain: ChainSlug, kind: RecordKind) -> BonderResult<Option<ChainRecord>> {
        let tree = self.records_tree(kind)?;
        tree.get(chain.as_str())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    #[tracing::instrument(skip(self), fields(chain = %record.chain, kind = %record.kind))]
    fn update(&self, record: ChainRecord) -> BonderResult<()> {
        let tree = self.records_tree(record.kind)?;
        tree.insert(record.chain.as_str(), encode(&record)?)?;
        Ok(())
    }

    fn records(&self) -> BonderResult<Vec<ChainRecord>> {
        let mut all = Vec::new();
        for name in self.db.tree_names() {
            if !name.starts_with(RECORDS_PREFIX.as_bytes()) {
                continue;
            }
            for entry in self.db.open_tree(&name)?.iter() {
                let (_, value) = entry?;
                all.push(decode(&value)?);
            }
        }
        sort_records(&mut all);
        Ok(all)
    }

    #[tracing::instrument(skip_all, fields(root_hash = %commitment.root.root_hash, source = %commitment.source_chain))]
    fn record_commitment(&self, commitment: &KnownCommitment) -> BonderResult<()> {
        let tree = self.db.open_tree(COMMITMENTS)?;
        let key = commitment_key(commitment.root.root_hash, commitment.root.total_amount);
        tree.insert(key, encode(commitment)?)?;
        // rare and needed across restarts, so not left to the background flush
        tree.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn forget_commitment(&self, root_hash: B256, total_amount: U256) -> BonderResult<()> {
        let tree = self.db.open_tree(COMMITMENTS)?;
        tree.remove(commitment_key(root_hash, total_amount))?;
        Ok(())
    }

    fn commitments(&self) -> BonderResult<Vec<KnownCommitment>> {
        let tree = self.db.open_tree(COMMITMENTS)?;
        let mut all = tree
            .iter()
            .map(|entry| {
                let (_, value) = entry?;
                decode(&value)
            })
            .collect::<BonderResult<Vec<KnownCommitment>>>()?;
        sort_commitments(&mut all);
        Ok(all)
    }
}
