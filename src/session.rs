//! Sessions: the per-caller context a transaction and a cached catalog
//! snapshot hang off of.

use crate::ais::Ais;
use crate::store::kv::Transaction;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Invoked exactly once per transaction, after commit or abort, with the
/// final timestamp (the commit version, or the read version on abort).
pub type EndCallback = Box<dyn FnOnce(&Session, i64) + Send>;

pub struct Session {
    id: u64,
    service_id: u64,
    txn_service_id: u64,
    attached_ais: Mutex<Option<Arc<Ais>>>,
    /// Whether the once-per-transaction clear callback has been registered.
    /// Rearms when the transaction's END callbacks drain.
    clear_callback_armed: Mutex<bool>,
    pub(crate) txn: Mutex<Option<Transaction>>,
    end_callbacks: Mutex<Vec<EndCallback>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("service_id", &self.service_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn service_id(&self) -> u64 {
        self.service_id
    }

    pub(crate) fn transaction_service_id(&self) -> u64 {
        self.txn_service_id
    }

    pub fn attached_ais(&self) -> Option<Arc<Ais>> {
        self.attached_ais.lock().clone()
    }

    /// Attaches a snapshot for the remainder of the current transaction.
    pub fn attach_ais(&self, ais: Arc<Ais>) {
        *self.attached_ais.lock() = Some(ais);
    }

    pub fn clear_attached_ais(&self) {
        *self.attached_ais.lock() = None;
    }

    /// Arms the once-per-transaction clear callback. True only on the first
    /// call within a transaction; clearing the attachment (as a retried
    /// commit loop does) leaves the flag armed, so the callback is never
    /// registered twice for one transaction.
    pub(crate) fn arm_clear_callback(&self) -> bool {
        let mut armed = self.clear_callback_armed.lock();
        if *armed {
            false
        } else {
            *armed = true;
            true
        }
    }

    pub(crate) fn register_end_callback(&self, callback: EndCallback) {
        self.end_callbacks.lock().push(callback);
    }

    pub(crate) fn drain_end_callbacks(&self) -> Vec<EndCallback> {
        *self.clear_callback_armed.lock() = false;
        std::mem::take(&mut *self.end_callbacks.lock())
    }
}

/// Mints sessions bound to one transaction service. The schema manager
/// refuses sessions minted for a different service.
pub struct SessionService {
    service_id: u64,
    txn_service_id: u64,
    next_session_id: AtomicU64,
}

impl SessionService {
    pub fn new(txn_service_id: u64) -> Self {
        Self {
            service_id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            txn_service_id,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> u64 {
        self.service_id
    }

    pub fn transaction_service_id(&self) -> u64 {
        self.txn_service_id
    }

    pub fn create_session(&self) -> Session {
        Session {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            service_id: self.service_id,
            txn_service_id: self.txn_service_id,
            attached_ais: Mutex::new(None),
            clear_callback_armed: Mutex::new(false),
            txn: Mutex::new(None),
            end_callbacks: Mutex::new(Vec::new()),
        }
    }
}
