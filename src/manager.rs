//! The schema manager: owner of the current catalog snapshot, the
//! generation counter in the store, the per-session cached snapshot, and the
//! transactional DDL-apply protocol.
//!
//! Keyspace usage:
//! ```text
//! ("sm/", "ais/", "generation")        => packed i64 generation
//! ("sm/", "ais/", "pb/", schema_name)  => per-schema catalog blob
//! ```
//!
//! Every reader resolves its catalog through the generation key inside its
//! own transaction; every DDL increments the generation in the transaction
//! that writes the blobs. Since the store admits exactly one generation
//! change at a time, committed DDLs are totally ordered and generated names
//! and ids are unique.

use crate::ais::{Ais, validation};
use crate::codec::buffer::GrowableBuffer;
use crate::codec::selector::SaveSelector;
use crate::codec::{AisLoader, save};
use crate::config::AisdbConfig;
use crate::ddl::DdlOperation;
use crate::error::AisdbError;
use crate::names::{DefaultNameGenerator, SyncNameGenerator, TableVersionMap};
use crate::rowdefs::{RowDefCache, TableStatusCache};
use crate::session::{Session, SessionService};
use crate::store::kv::KvError;
use crate::store::txn::{CallbackType, TransactionService};
use crate::tuple::{Tuple, pack_i64, unpack_i64};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

const SM_PREFIX: &str = "sm/";
const AIS_PREFIX: &str = "ais/";
const AIS_GENERATION_KEY: &str = "generation";
const AIS_PB_PREFIX: &str = "pb/";

/// Packed key holding the current generation.
pub fn generation_key() -> Vec<u8> {
    Tuple::from_strs(&[SM_PREFIX, AIS_PREFIX, AIS_GENERATION_KEY]).pack()
}

/// Packed prefix under which all per-schema blobs live.
pub fn schema_blob_prefix() -> Vec<u8> {
    Tuple::from_strs(&[SM_PREFIX, AIS_PREFIX, AIS_PB_PREFIX]).pack()
}

/// Packed key of one schema's blob.
pub fn schema_blob_key(schema: &str) -> Vec<u8> {
    Tuple::from_strs(&[SM_PREFIX, AIS_PREFIX, AIS_PB_PREFIX, schema]).pack()
}

pub struct SchemaManager {
    config: AisdbConfig,
    txn_service: Arc<TransactionService>,
    session_service: Arc<SessionService>,
    table_status_cache: TableStatusCache,
    row_def_cache: RowDefCache,
    /// Swapped only under `ais_lock`; read freely (the snapshot is frozen).
    cur_ais: RwLock<Arc<Ais>>,
    ais_lock: Mutex<()>,
    name_generator: SyncNameGenerator,
    table_version_map: TableVersionMap,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("generation", &self.cur_ais.read().generation())
            .finish_non_exhaustive()
    }
}

impl SchemaManager {
    /// Loads the catalog from storage and installs it. The session service
    /// must be the one bound to `txn_service`; anything else fails fast.
    pub fn open(
        config: AisdbConfig,
        txn_service: Arc<TransactionService>,
        session_service: Arc<SessionService>,
    ) -> Result<Self, AisdbError> {
        if session_service.transaction_service_id() != txn_service.id() {
            return Err(AisdbError::WrongTransactionService);
        }
        let first_table_id = config.first_table_id;
        let mut empty = Ais::new();
        empty.freeze();
        let manager = Self {
            config,
            txn_service,
            session_service,
            table_status_cache: TableStatusCache::new(),
            row_def_cache: RowDefCache::new(),
            cur_ais: RwLock::new(Arc::new(empty)),
            ais_lock: Mutex::new(()),
            name_generator: SyncNameGenerator::new(DefaultNameGenerator::new(first_table_id)),
            table_version_map: TableVersionMap::new(),
        };
        manager.start()?;
        Ok(manager)
    }

    fn start(&self) -> Result<(), AisdbError> {
        let session = self.session_service.create_session();
        let loaded = self.transactionally(&session, |s| self.load_ais_from_storage(s))?;
        self.build_row_def_cache(&loaded);
        *self.cur_ais.write() = Arc::clone(&loaded);
        self.merge_new_ais(&loaded);
        info!(
            generation = loaded.generation(),
            schemas = loaded.schemas().len(),
            "schema manager started"
        );
        Ok(())
    }

    /// Releases the manager. The store keeps the persisted catalog; a later
    /// `open` returns to the same state.
    pub fn stop(self) {
        info!(
            generation = self.cur_ais.read().generation(),
            "schema manager stopped"
        );
    }

    pub fn config(&self) -> &AisdbConfig {
        &self.config
    }

    pub fn session_service(&self) -> &Arc<SessionService> {
        &self.session_service
    }

    pub fn txn_service(&self) -> &Arc<TransactionService> {
        &self.txn_service
    }

    pub fn row_def_cache(&self) -> &RowDefCache {
        &self.row_def_cache
    }

    pub fn table_status_cache(&self) -> &TableStatusCache {
        &self.table_status_cache
    }

    pub fn table_version_map(&self) -> &TableVersionMap {
        &self.table_version_map
    }

    pub fn name_generator(&self) -> &SyncNameGenerator {
        &self.name_generator
    }

    /// The oldest generation any consumer may still observe. Currently the
    /// installed snapshot's generation.
    pub fn oldest_active_ais_generation(&self) -> i64 {
        self.cur_ais.read().generation()
    }

    /// Runs `body` inside a transaction on `session`, rerunning it whenever
    /// the commit reports a transient conflict. Everything `body` builds must
    /// be rebuildable from scratch: the session's cached snapshot is cleared
    /// before each rerun so a retried body observes the fresh state.
    pub fn transactionally<T>(
        &self,
        session: &Session,
        mut body: impl FnMut(&Session) -> Result<T, AisdbError>,
    ) -> Result<T, AisdbError> {
        self.check_session(session)?;
        let _guard = self
            .txn_service
            .begin_transaction(session)
            .map_err(|e| map_kv(session, e))?;
        loop {
            let value = body(session)?;
            if !self
                .txn_service
                .commit_or_retry(session)
                .map_err(|e| map_kv(session, e))?
            {
                return Ok(value);
            }
            session.clear_attached_ais();
        }
    }

    /// The catalog as of the session's transaction. Stable for the duration
    /// of the transaction: repeated calls return the same snapshot until the
    /// end-of-transaction callback clears it.
    pub fn get_ais(&self, session: &Session) -> Result<Arc<Ais>, AisdbError> {
        self.check_session(session)?;
        if let Some(local) = session.attached_ais() {
            return Ok(local);
        }
        let generation = self.transactional_generation(session)?;
        let mut local = Arc::clone(&self.cur_ais.read());
        if generation != local.generation() {
            let _guard = self.ais_lock.lock();
            // May have been waiting on another thread's install.
            let cur = Arc::clone(&self.cur_ais.read());
            if generation == cur.generation() {
                local = cur;
            } else {
                let reloaded = self.load_ais_from_storage(session)?;
                if reloaded.generation() > cur.generation() {
                    // The derived caches follow the installed snapshot, so
                    // they are only rebuilt when cur_ais advances.
                    self.build_row_def_cache(&reloaded);
                    *self.cur_ais.write() = Arc::clone(&reloaded);
                    self.merge_new_ais(&reloaded);
                    debug!(
                        from = cur.generation(),
                        to = reloaded.generation(),
                        "installed newer catalog snapshot"
                    );
                }
                // An older transactional generation is served locally
                // without regressing the installed snapshot.
                local = reloaded;
            }
        }
        self.attach_to_session(session, Arc::clone(&local));
        Ok(local)
    }

    /// Applies one DDL operation end to end: clone the transactional
    /// snapshot, mutate, allocate identifiers, persist, and let the commit
    /// loop absorb conflicts. Returns the installed candidate.
    pub fn apply_ddl(
        &self,
        session: &Session,
        op: &DdlOperation,
    ) -> Result<Arc<Ais>, AisdbError> {
        let result = self.transactionally(session, |s| {
            let base = self.get_ais(s)?;
            let mut draft = base.to_draft();
            op.apply_to(&mut draft)?;
            self.allocate_identifiers(&mut draft)?;
            self.save_ais_change_with_row_defs(s, draft, &op.affected_schemas())
        })?;
        info!(
            generation = result.generation(),
            "ddl committed"
        );
        Ok(result)
    }

    /// Persists a candidate catalog: validate, stamp with generation+1 in
    /// this transaction, write or clear each affected schema's blob, rebuild
    /// the row-definition cache, and attach the candidate to the session.
    /// Must run inside a `transactionally` body.
    pub fn save_ais_change_with_row_defs(
        &self,
        session: &Session,
        mut new_ais: Ais,
        schema_names: &[String],
    ) -> Result<Arc<Ais>, AisdbError> {
        self.check_session(session)?;
        let mut buffer = self.new_ais_buffer();
        self.validate_and_freeze(session, &mut new_ais)?;
        let new_ais = Arc::new(new_ais);
        for schema in schema_names {
            self.save_schema_blob(session, &mut buffer, &new_ais, schema)?;
        }
        self.build_row_def_cache(&new_ais);
        self.attach_to_session(session, Arc::clone(&new_ais));
        Ok(new_ais)
    }

    /// In-memory-only variant: validate, stamp with the *current*
    /// transactional generation, freeze, rebuild the row-definition cache.
    /// No blob is written and the generation is not bumped. Used during
    /// bootstrap and for transient system tables.
    pub fn unsaved_ais_change_with_row_defs(
        &self,
        session: &Session,
        mut new_ais: Ais,
    ) -> Result<Arc<Ais>, AisdbError> {
        self.check_session(session)?;
        validation::validate_live(&new_ais)?;
        let generation = self.transactional_generation(session)?;
        new_ais.set_generation(generation)?;
        new_ais.freeze();
        self.serialize_memory_tables(session, &new_ais);
        let new_ais = Arc::new(new_ais);
        self.build_row_def_cache(&new_ais);
        self.attach_to_session(session, Arc::clone(&new_ais));
        Ok(new_ais)
    }

    pub fn delete_table_statuses(&self, session: &Session, table_ids: &[i32]) -> Result<(), AisdbError> {
        self.check_session(session)?;
        for table_id in table_ids {
            self.table_status_cache.delete_table_status(*table_id);
        }
        Ok(())
    }

    /// Tree removal is immediate in this store; nothing is deferred.
    pub fn tree_removal_is_delayed(&self) -> bool {
        false
    }

    pub fn tree_was_removed(&self, _session: &Session, _schema: &str, _tree_name: &str) {}

    //
    // Helpers
    //

    fn check_session(&self, session: &Session) -> Result<(), AisdbError> {
        if session.transaction_service_id() != self.txn_service.id() {
            return Err(AisdbError::WrongTransactionService);
        }
        Ok(())
    }

    fn new_ais_buffer(&self) -> GrowableBuffer {
        GrowableBuffer::new(
            self.config.initial_ais_buffer_bytes,
            self.config.ais_buffer_cap(),
        )
    }

    fn transactional_generation(&self, session: &Session) -> Result<i64, AisdbError> {
        match self
            .txn_service
            .get(session, &generation_key())
            .map_err(|e| map_kv(session, e))?
        {
            Some(bytes) => unpack_i64(&bytes),
            None => Ok(0),
        }
    }

    /// Validates the candidate, then reads, increments and writes the
    /// generation in the caller's transaction, stamps and freezes the
    /// candidate. Any concurrent DDL committing first turns the caller's
    /// commit into a retry.
    fn validate_and_freeze(&self, session: &Session, new_ais: &mut Ais) -> Result<(), AisdbError> {
        validation::validate_live(new_ais)?;
        let new_generation = 1 + self.transactional_generation(session)?;
        self.txn_service
            .set(session, generation_key(), pack_i64(new_generation))
            .map_err(|e| map_kv(session, e))?;
        new_ais.set_generation(new_generation)?;
        new_ais.freeze();
        Ok(())
    }

    fn save_schema_blob(
        &self,
        session: &Session,
        buffer: &mut GrowableBuffer,
        new_ais: &Arc<Ais>,
        schema: &str,
    ) -> Result<(), AisdbError> {
        let key = schema_blob_key(schema);
        if new_ais.schema(schema).is_some() {
            buffer.clear();
            save(buffer, new_ais, &SaveSelector::for_persisting(schema))?;
            self.txn_service
                .set(session, key, buffer.as_slice().to_vec())
                .map_err(|e| map_kv(session, e))?;
        } else {
            self.txn_service
                .clear(session, key)
                .map_err(|e| map_kv(session, e))?;
        }
        Ok(())
    }

    /// Left intentionally empty: the memory-table blob once produced here
    /// was discarded without ever being read back.
    /// TODO: decide whether memory-table blobs belong in the persisted
    /// catalog, then either write them under their own key or delete this.
    fn serialize_memory_tables(&self, _session: &Session, _new_ais: &Ais) {}

    fn load_ais_from_storage(&self, session: &Session) -> Result<Arc<Ais>, AisdbError> {
        let generation = self.transactional_generation(session)?;
        let mut loader = AisLoader::new();
        let entries = self
            .txn_service
            .range_starts_with(session, &schema_blob_prefix())
            .map_err(|e| map_kv(session, e))?;
        for (_key, blob) in entries {
            loader.load_blob(&blob)?;
        }
        let mut draft = loader.finalize()?;
        validation::validate_live(&draft)?;
        draft.set_generation(generation)?;
        draft.freeze();
        Ok(Arc::new(draft))
    }

    /// Assigns table ids, tree names and constraint names to entries the DDL
    /// layer left unallocated. Runs after the operation's own validation so
    /// a rejected DDL burns nothing.
    fn allocate_identifiers(&self, draft: &mut Ais) -> Result<(), AisdbError> {
        let schema_names: Vec<String> = draft.schemas().keys().cloned().collect();
        for schema_name in schema_names {
            let table_names: Vec<String> = draft
                .schema(&schema_name)
                .map(|s| s.tables.keys().cloned().collect())
                .unwrap_or_default();
            for table_name in table_names {
                let schema = draft.schema_mut(&schema_name)?;
                let Some(table) = schema.tables.get_mut(&table_name) else {
                    continue;
                };
                if table.table_id == 0 {
                    table.table_id = self.name_generator.next_table_id();
                }
                if table.tree_name.is_empty() {
                    table.tree_name =
                        self.name_generator.table_tree_name(&schema_name, &table_name);
                }
                let index_names: Vec<String> = table
                    .indexes
                    .iter()
                    .filter(|(_, index)| index.tree_name.is_empty())
                    .map(|(name, _)| name.clone())
                    .collect();
                for index_name in index_names {
                    let tree_name = self.name_generator.index_tree_name(
                        &schema_name,
                        &table_name,
                        &index_name,
                    );
                    if let Some(index) = table.indexes.get_mut(&index_name) {
                        index.tree_name = tree_name;
                    }
                }
                self.name_unnamed_constraints(draft, &schema_name, &table_name)?;
            }
            let sequence_names: Vec<String> = draft
                .schema(&schema_name)
                .map(|s| {
                    s.sequences
                        .iter()
                        .filter(|(_, sequence)| sequence.tree_name.is_empty())
                        .map(|(name, _)| name.clone())
                        .collect()
                })
                .unwrap_or_default();
            for sequence_name in sequence_names {
                let tree_name = self
                    .name_generator
                    .sequence_tree_name(&schema_name, &sequence_name);
                let schema = draft.schema_mut(&schema_name)?;
                if let Some(sequence) = schema.sequences.get_mut(&sequence_name) {
                    sequence.tree_name = tree_name;
                }
            }
        }
        Ok(())
    }

    fn name_unnamed_constraints(
        &self,
        draft: &mut Ais,
        schema_name: &str,
        table_name: &str,
    ) -> Result<(), AisdbError> {
        use crate::ais::ConstraintKind;
        let schema = draft.schema_mut(schema_name)?;
        let Some(table) = schema.tables.get_mut(table_name) else {
            return Ok(());
        };
        for constraint in &mut table.constraints {
            if constraint.name.is_empty() {
                let kind = match constraint.kind {
                    ConstraintKind::Unique { .. } => "ukey",
                    ConstraintKind::ForeignKey { .. } => "fkey",
                };
                constraint.name =
                    self.name_generator
                        .constraint_name(schema_name, table_name, kind);
            }
        }
        Ok(())
    }

    fn build_row_def_cache(&self, new_ais: &Ais) {
        self.table_status_cache.detach_ais();
        self.row_def_cache.set_ais(new_ais);
    }

    /// Marks the snapshot's identifiers used and folds its table versions
    /// into the version map.
    fn merge_new_ais(&self, new_ais: &Ais) {
        self.name_generator.merge_ais(new_ais);
        let mut claim = self.table_version_map.claim_exclusive();
        for table in new_ais.user_tables() {
            claim.put(table.table_id, table.version);
        }
    }

    fn attach_to_session(&self, session: &Session, ais: Arc<Ais>) {
        session.attach_ais(ais);
        if session.arm_clear_callback() {
            self.txn_service.add_callback(
                session,
                CallbackType::End,
                Box::new(|session, _timestamp| session.clear_attached_ais()),
            );
        }
    }
}

fn map_kv(session: &Session, err: KvError) -> AisdbError {
    match err {
        KvError::Interrupted => AisdbError::QueryCanceled {
            session_id: session.id(),
        },
        KvError::Unavailable { message } => AisdbError::StoreUnavailable { message },
        KvError::NoActiveTransaction => AisdbError::internal("no active transaction on session"),
        KvError::TransactionActive => {
            AisdbError::internal("session already has an active transaction")
        }
    }
}
