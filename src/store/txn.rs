//! Transaction service: scoped transactions over the KV store, keyed by
//! session, with end-of-transaction callbacks.

use crate::session::{EndCallback, Session};
use crate::store::kv::{CommitOutcome, KvError, KvStore, Transaction};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackType {
    End,
}

pub struct TransactionService {
    id: u64,
    store: Arc<KvStore>,
}

impl std::fmt::Debug for TransactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionService")
            .field("id", &self.id)
            .field("store", &self.store.id())
            .finish()
    }
}

impl TransactionService {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self {
            id: NEXT_TXN_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            store,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    /// Starts a transaction on the session. The guard guarantees
    /// commit-or-abort on every exit path and fires END callbacks exactly
    /// once when it closes.
    pub fn begin_transaction<'a>(
        &'a self,
        session: &'a Session,
    ) -> Result<TxnGuard<'a>, KvError> {
        let mut slot = session.txn.lock();
        if slot.is_some() {
            return Err(KvError::TransactionActive);
        }
        *slot = Some(self.store.begin());
        Ok(TxnGuard { session })
    }

    fn with_txn<T>(
        &self,
        session: &Session,
        f: impl FnOnce(&mut Transaction) -> T,
    ) -> Result<T, KvError> {
        let mut slot = session.txn.lock();
        let txn = slot.as_mut().ok_or(KvError::NoActiveTransaction)?;
        Ok(f(txn))
    }

    pub fn get(&self, session: &Session, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.store.check_fault()?;
        self.with_txn(session, |txn| txn.get(key))
    }

    pub fn set(&self, session: &Session, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvError> {
        self.with_txn(session, |txn| txn.set(key, value))
    }

    pub fn clear(&self, session: &Session, key: Vec<u8>) -> Result<(), KvError> {
        self.with_txn(session, |txn| txn.clear(key))
    }

    pub fn range_starts_with(
        &self,
        session: &Session,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        self.store.check_fault()?;
        self.with_txn(session, |txn| txn.range_starts_with(prefix))
    }

    /// Returns true when the transaction conflicted and the body must rerun:
    /// the session's transaction has already been replaced with a fresh one.
    /// Returns false once committed.
    pub fn commit_or_retry(&self, session: &Session) -> Result<bool, KvError> {
        let mut slot = session.txn.lock();
        let txn = slot.as_mut().ok_or(KvError::NoActiveTransaction)?;
        match self.store.try_commit(txn)? {
            CommitOutcome::Committed(_) => Ok(false),
            CommitOutcome::Conflict => {
                *slot = Some(self.store.begin());
                Ok(true)
            }
        }
    }

    pub fn add_callback(&self, session: &Session, _kind: CallbackType, callback: EndCallback) {
        session.register_end_callback(callback);
    }
}

/// Scoped transaction. Dropping the guard aborts an uncommitted transaction
/// and fires the session's END callbacks with the final timestamp.
pub struct TxnGuard<'a> {
    session: &'a Session,
}

impl TxnGuard<'_> {
    pub fn session(&self) -> &Session {
        self.session
    }
}

impl Drop for TxnGuard<'_> {
    fn drop(&mut self) {
        let final_version = {
            let mut slot = self.session.txn.lock();
            match slot.take() {
                Some(txn) => txn.final_version(),
                None => 0,
            }
        };
        for callback in self.session.drain_end_callbacks() {
            callback(self.session, final_version);
        }
    }
}
