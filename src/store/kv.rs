//! In-memory ordered key-value store with serializable optimistic
//! transactions.
//!
//! Each transaction reads from an O(1) snapshot of the data map taken at
//! begin. Commit validates the read set (point keys and scanned prefixes)
//! against per-key commit versions; versions are retained for cleared keys so
//! a delete invalidates overlapping range reads. A failed validation is a
//! transient conflict, reported to the caller as "retry".

use im::OrdMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("store operation interrupted")]
    Interrupted,
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    #[error("no active transaction on session")]
    NoActiveTransaction,
    #[error("session already has an active transaction")]
    TransactionActive,
}

/// Fault injection for tests: fires once, after skipping `after` store
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    Interrupt { after: u32 },
    Unavailable { after: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed(i64),
}

#[derive(Debug)]
pub struct Transaction {
    read_version: i64,
    data: OrdMap<Vec<u8>, Vec<u8>>,
    point_reads: HashSet<Vec<u8>>,
    prefix_reads: Vec<Vec<u8>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    state: TxnState,
}

impl Transaction {
    pub fn read_version(&self) -> i64 {
        self.read_version
    }

    pub(crate) fn final_version(&self) -> i64 {
        match self.state {
            TxnState::Committed(version) => version,
            TxnState::Active => self.read_version,
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.point_reads.insert(key.to_vec());
        if let Some(overlay) = self.writes.get(key) {
            return overlay.clone();
        }
        self.data.get(key).cloned()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    pub fn clear(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    /// All entries whose key starts with `prefix`, in key order, with this
    /// transaction's own writes overlaid.
    pub fn range_starts_with(&mut self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.prefix_reads.push(prefix.to_vec());
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for (key, value) in self.data.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            merged.insert(key.clone(), value.clone());
        }
        for (key, overlay) in self.writes.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match overlay {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }
}

#[derive(Debug)]
struct StoreInner {
    data: OrdMap<Vec<u8>, Vec<u8>>,
    /// Last commit version per key. Entries survive clears as tombstones.
    committed: OrdMap<Vec<u8>, i64>,
    version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(i64),
    Conflict,
}

pub struct KvStore {
    id: u64,
    inner: Mutex<StoreInner>,
    fault: Mutex<Option<StoreFault>>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").field("id", &self.id).finish()
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(StoreInner {
                data: OrdMap::new(),
                committed: OrdMap::new(),
                version: 0,
            }),
            fault: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Arms fault injection for tests.
    pub fn inject_fault(&self, fault: StoreFault) {
        *self.fault.lock() = Some(fault);
    }

    pub(crate) fn check_fault(&self) -> Result<(), KvError> {
        let mut slot = self.fault.lock();
        match slot.as_mut() {
            None => Ok(()),
            Some(StoreFault::Interrupt { after }) | Some(StoreFault::Unavailable { after })
                if *after > 0 =>
            {
                *after -= 1;
                Ok(())
            }
            Some(StoreFault::Interrupt { .. }) => {
                *slot = None;
                Err(KvError::Interrupted)
            }
            Some(StoreFault::Unavailable { .. }) => {
                *slot = None;
                Err(KvError::Unavailable {
                    message: "injected".into(),
                })
            }
        }
    }

    pub fn begin(&self) -> Transaction {
        let inner = self.inner.lock();
        Transaction {
            read_version: inner.version,
            data: inner.data.clone(),
            point_reads: HashSet::new(),
            prefix_reads: Vec::new(),
            writes: BTreeMap::new(),
            state: TxnState::Active,
        }
    }

    /// Validates the transaction's read set and applies its writes
    /// atomically. Conflicts are transient; the caller is expected to retry
    /// with a fresh transaction.
    pub fn try_commit(&self, txn: &mut Transaction) -> Result<CommitOutcome, KvError> {
        self.check_fault()?;
        let mut inner = self.inner.lock();

        if txn.writes.is_empty() {
            // Read-only transactions serialize at their snapshot: they
            // commit without validation and never retry.
            txn.state = TxnState::Committed(txn.read_version);
            return Ok(CommitOutcome::Committed(txn.read_version));
        }

        for key in &txn.point_reads {
            if let Some(version) = inner.committed.get(key) {
                if *version > txn.read_version {
                    return Ok(CommitOutcome::Conflict);
                }
            }
        }
        for prefix in &txn.prefix_reads {
            for (key, version) in inner.committed.range(prefix.clone()..) {
                if !key.starts_with(prefix.as_slice()) {
                    break;
                }
                if *version > txn.read_version {
                    return Ok(CommitOutcome::Conflict);
                }
            }
        }

        inner.version += 1;
        let commit_version = inner.version;
        let writes = std::mem::take(&mut txn.writes);
        for (key, overlay) in writes {
            match overlay {
                Some(value) => {
                    inner.data.insert(key.clone(), value);
                }
                None => {
                    inner.data.remove(&key);
                }
            }
            inner.committed.insert(key, commit_version);
        }
        txn.state = TxnState::Committed(commit_version);
        Ok(CommitOutcome::Committed(commit_version))
    }

    /// Direct snapshot read outside any transaction. Diagnostic use only.
    pub fn snapshot_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().data.get(key).cloned()
    }

    pub fn current_version(&self) -> i64 {
        self.inner.lock().version
    }
}
