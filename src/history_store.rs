//! Append-only transfer history, keyed by (account, bucket)

use anyhow::{Context, Result};
use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::sync::{Mutex, PoisonError};

use crate::transfer::types::BucketKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Value left this bucket
    Out,
    /// Value arrived in this bucket
    In,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HistoryOutcome {
    Completed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub account: Address,
    pub bucket: BucketKind,
    pub direction: Direction,
    /// Bucket on the other side of the transfer
    pub counterparty: BucketKind,
    /// Shares for `Out` entries, assets for `In` entries
    pub amount: U256,
    pub tx_hash: Option<TxHash>,
    pub outcome: HistoryOutcome,
    pub timestamp_ms: i64,
}

/// Append-only log of finished transfers
pub trait TransferHistory: Send + Sync {
    fn append(&self, entry: &HistoryEntry) -> Result<()>;

    /// Entries for one bucket of one account, oldest first
    fn entries(&self, account: Address, bucket: BucketKind) -> Result<Vec<HistoryEntry>>;
}

fn key_prefix(account: Address, bucket: BucketKind) -> String {
    format!("history::{:?}::{}::", account, bucket)
}

/// History backed by a sled tree
pub struct SledTransferHistory {
    db: Db,
}

impl SledTransferHistory {
    pub fn open(path: &str) -> Result<Self, sled::Error> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

impl TransferHistory for SledTransferHistory {
    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        // Monotonic id keeps keys in append order under the prefix
        let seq = self.db.generate_id()?;
        let key = format!("{}{:020}", key_prefix(entry.account, entry.bucket), seq);
        let value = serde_json::to_vec(entry)?;

        self.db.insert(key.as_bytes(), value)?;
        self.db.flush().context("history flush failed")?;
        Ok(())
    }

    fn entries(&self, account: Address, bucket: BucketKind) -> Result<Vec<HistoryEntry>> {
        self.db
            .scan_prefix(key_prefix(account, bucket).as_bytes())
            .map(|item| -> Result<HistoryEntry> {
                let (_, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }
}

/// In-process history, for tests and sessions without a data directory
#[derive(Default)]
pub struct MemoryTransferHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryTransferHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferHistory for MemoryTransferHistory {
    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    fn entries(&self, account: Address, bucket: BucketKind) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.account == account && e.bucket == bucket)
            .cloned()
            .collect())
    }
}
