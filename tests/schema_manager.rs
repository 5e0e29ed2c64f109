use aisdb::ais::{Ais, ColumnType, INFORMATION_SCHEMA, TableName};
use aisdb::codec::AisLoader;
use aisdb::codec::buffer::GrowableBuffer;
use aisdb::codec::selector::SaveSelector;
use aisdb::config::AisdbConfig;
use aisdb::ddl::{ColumnSpec, DdlOperation, IndexSpec, SequenceSpec, TableSpec};
use aisdb::error::AisdbError;
use aisdb::manager::{SchemaManager, generation_key, schema_blob_key};
use aisdb::session::SessionService;
use aisdb::store::kv::{KvStore, StoreFault};
use aisdb::store::txn::TransactionService;
use aisdb::tuple::unpack_i64;
use std::sync::Arc;

fn open_manager(config: AisdbConfig) -> SchemaManager {
    let store = Arc::new(KvStore::new());
    let txns = Arc::new(TransactionService::new(store));
    let sessions = Arc::new(SessionService::new(txns.id()));
    SchemaManager::open(config, txns, sessions).expect("open")
}

fn users_spec() -> TableSpec {
    TableSpec {
        columns: vec![ColumnSpec {
            name: "id".into(),
            col_type: ColumnType::Int,
            nullable: false,
        }],
        primary_key: vec!["id".into()],
        memory_resident: false,
        constraints: Vec::new(),
    }
}

fn create_users() -> DdlOperation {
    DdlOperation::CreateTable {
        name: TableName::new("app", "users"),
        spec: users_spec(),
    }
}

fn stored_generation(manager: &SchemaManager) -> Option<i64> {
    manager
        .txn_service()
        .store()
        .snapshot_get(&generation_key())
        .map(|bytes| unpack_i64(&bytes).expect("packed generation"))
}

#[test]
fn bootstrap_empty_store_starts_at_generation_zero() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    let ais = manager
        .transactionally(&session, |s| manager.get_ais(s))
        .expect("get ais");
    assert_eq!(ais.generation(), 0);
    assert!(ais.schemas().is_empty());
    assert_eq!(manager.oldest_active_ais_generation(), 0);
    // Bootstrap writes nothing.
    assert_eq!(stored_generation(&manager), None);
}

#[test]
fn create_then_read_persists_generation_and_blob() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    let installed = manager.apply_ddl(&session, &create_users()).expect("ddl");
    assert_eq!(installed.generation(), 1);

    assert_eq!(stored_generation(&manager), Some(1));
    let blob = manager
        .txn_service()
        .store()
        .snapshot_get(&schema_blob_key("app"))
        .expect("blob present");
    assert!(!blob.is_empty());

    let reader = manager.session_service().create_session();
    let ais = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("read");
    assert_eq!(ais.generation(), 1);
    let table = ais
        .schema("app")
        .expect("schema app")
        .user_table("users")
        .expect("table users");
    assert!(table.table_id > 0);
    assert!(!table.tree_name.is_empty());
}

#[test]
fn drop_schema_clears_blob() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("create");

    let dropper = manager.session_service().create_session();
    let installed = manager
        .apply_ddl(
            &dropper,
            &DdlOperation::DropSchema {
                schema: "app".into(),
            },
        )
        .expect("drop");
    assert_eq!(installed.generation(), 2);
    assert_eq!(stored_generation(&manager), Some(2));
    assert_eq!(
        manager
            .txn_service()
            .store()
            .snapshot_get(&schema_blob_key("app")),
        None
    );

    let reader = manager.session_service().create_session();
    let ais = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("read");
    assert!(ais.schema("app").is_none());
}

#[test]
fn oversize_catalog_is_rejected_with_cap_and_no_writes() {
    let manager = open_manager(AisdbConfig::bounded(1024));
    let session = manager.session_service().create_session();

    let columns: Vec<ColumnSpec> = (0..200)
        .map(|i| ColumnSpec {
            name: format!("very_long_descriptive_column_name_{i:04}"),
            col_type: ColumnType::Text,
            nullable: true,
        })
        .collect();
    let pk = columns[0].name.clone();
    let err = manager
        .apply_ddl(
            &session,
            &DdlOperation::CreateTable {
                name: TableName::new("app", "wide"),
                spec: TableSpec {
                    columns,
                    primary_key: vec![pk],
                    memory_resident: false,
                    constraints: Vec::new(),
                },
            },
        )
        .expect_err("too large");
    assert_eq!(err, AisdbError::CatalogTooLarge { cap: 1024 });

    // The aborted transaction left no trace.
    assert_eq!(stored_generation(&manager), None);
    assert_eq!(
        manager
            .txn_service()
            .store()
            .snapshot_get(&schema_blob_key("app")),
        None
    );
    assert_eq!(manager.oldest_active_ais_generation(), 0);
}

#[test]
fn interrupted_load_maps_to_query_canceled_and_preserves_cur_ais() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("ddl");
    // The installed snapshot still predates the DDL: installs happen on read.
    assert_eq!(manager.oldest_active_ais_generation(), 0);

    // First store operation (the generation read) succeeds; the read inside
    // the storage load is the one interrupted.
    manager
        .txn_service()
        .store()
        .inject_fault(StoreFault::Interrupt { after: 1 });
    let reader = manager.session_service().create_session();
    let err = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect_err("interrupted");
    assert_eq!(
        err,
        AisdbError::QueryCanceled {
            session_id: reader.id()
        }
    );
    assert_eq!(manager.oldest_active_ais_generation(), 0);

    // Once the interruption clears, the same session reloads and the newer
    // snapshot is installed.
    let ais = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("recovered");
    assert_eq!(ais.generation(), 1);
    assert_eq!(manager.oldest_active_ais_generation(), 1);
}

#[test]
fn store_unavailable_surfaces_as_such() {
    let manager = open_manager(AisdbConfig::default());
    manager
        .txn_service()
        .store()
        .inject_fault(StoreFault::Unavailable { after: 0 });
    let session = manager.session_service().create_session();
    let err = manager
        .transactionally(&session, |s| manager.get_ais(s))
        .expect_err("unavailable");
    assert!(matches!(err, AisdbError::StoreUnavailable { .. }));
}

#[test]
fn get_ais_is_stable_within_a_transaction() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("ddl");

    let reader = manager.session_service().create_session();
    let (first, second) = manager
        .transactionally(&reader, |s| {
            Ok((manager.get_ais(s)?, manager.get_ais(s)?))
        })
        .expect("reads");
    assert!(Arc::ptr_eq(&first, &second));
    // The end-of-transaction callback cleared the attachment.
    assert!(reader.attached_ais().is_none());

    // A later transaction may observe a newer snapshot.
    manager
        .apply_ddl(
            &session,
            &DdlOperation::AddColumn {
                table: TableName::new("app", "users"),
                column: ColumnSpec {
                    name: "email".into(),
                    col_type: ColumnType::Text,
                    nullable: true,
                },
            },
        )
        .expect("add column");
    let newer = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("read");
    assert!(newer.generation() > first.generation());
}

#[test]
fn older_transaction_is_served_an_older_snapshot_without_regressing_cur_ais() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("create");

    // A read installs generation 1.
    let reader = manager.session_service().create_session();
    manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("read");
    assert_eq!(manager.oldest_active_ais_generation(), 1);

    // Pin a transaction before the next DDL commits.
    let old_session = manager.session_service().create_session();
    let guard = manager
        .txn_service()
        .begin_transaction(&old_session)
        .expect("begin");

    manager
        .apply_ddl(
            &session,
            &DdlOperation::AddColumn {
                table: TableName::new("app", "users"),
                column: ColumnSpec {
                    name: "email".into(),
                    col_type: ColumnType::Text,
                    nullable: true,
                },
            },
        )
        .expect("add column");
    let newer = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("install");
    assert_eq!(manager.oldest_active_ais_generation(), 2);
    let table_id = newer
        .schema("app")
        .expect("schema")
        .user_table("users")
        .expect("table")
        .table_id;

    // The pinned transaction reloads its own older catalog; the installed
    // snapshot does not regress.
    let old_view = manager.get_ais(&old_session).expect("old view");
    assert_eq!(old_view.generation(), 1);
    assert!(
        old_view
            .schema("app")
            .expect("schema")
            .user_table("users")
            .expect("table")
            .column("email")
            .is_none()
    );
    assert_eq!(manager.oldest_active_ais_generation(), 2);

    // The derived caches stayed with the installed snapshot: the row
    // definition still carries the new column.
    let def = manager
        .row_def_cache()
        .row_def(table_id)
        .expect("row def");
    assert_eq!(def.fields.len(), 2);
    assert_eq!(def.version, 1);
    drop(guard);
}

#[test]
fn committed_ddls_have_strictly_increasing_generations() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    let mut last = 0;
    for i in 0..5 {
        let installed = manager
            .apply_ddl(
                &session,
                &DdlOperation::CreateTable {
                    name: TableName::new("app", format!("t{i}")),
                    spec: users_spec(),
                },
            )
            .expect("ddl");
        assert!(installed.generation() > last);
        last = installed.generation();
    }
    assert_eq!(last, 5);
}

#[test]
fn read_your_writes_across_transactions() {
    let manager = open_manager(AisdbConfig::default());
    let writer = manager.session_service().create_session();
    let pre = manager
        .transactionally(&writer, |s| manager.get_ais(s))
        .expect("pre read")
        .generation();
    manager.apply_ddl(&writer, &create_users()).expect("ddl");

    let reader = manager.session_service().create_session();
    let ais = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("post read");
    assert!(ais.generation() > pre);
    assert!(ais.schema("app").expect("schema").user_table("users").is_some());
}

#[test]
fn ddl_within_transaction_sees_its_own_candidate() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager
        .transactionally(&session, |s| {
            let base = manager.get_ais(s)?;
            let mut draft = base.to_draft();
            create_users().apply_to(&mut draft)?;
            // Allocation normally happens in apply_ddl; do it by hand here.
            let schema = draft.schema_mut("app")?;
            let table = schema.tables.get_mut("users").expect("users");
            table.table_id = manager.name_generator().next_table_id();
            table.tree_name = manager.name_generator().table_tree_name("app", "users");
            manager.save_ais_change_with_row_defs(s, draft, &["app".to_string()])?;

            // Subsequent reads in this transaction serve the candidate.
            let visible = manager.get_ais(s)?;
            assert!(visible.schema("app").is_some());
            assert_eq!(visible.generation(), 1);
            Ok(())
        })
        .expect("ddl transaction");
}

#[test]
fn reload_from_persisted_blobs_reconstructs_structure() {
    let store = Arc::new(KvStore::new());
    let txns = Arc::new(TransactionService::new(Arc::clone(&store)));
    let sessions = Arc::new(SessionService::new(txns.id()));
    let manager = SchemaManager::open(AisdbConfig::default(), txns, sessions).expect("open");

    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("create");
    manager
        .apply_ddl(
            &session,
            &DdlOperation::CreateIndex {
                table: TableName::new("app", "users"),
                index_name: "idx_users_id".into(),
                spec: IndexSpec {
                    columns: vec!["id".into()],
                    unique: true,
                },
            },
        )
        .expect("index");
    manager
        .apply_ddl(
            &session,
            &DdlOperation::CreateSequence {
                schema: "billing".into(),
                name: "invoice_ids".into(),
                spec: SequenceSpec::default(),
            },
        )
        .expect("sequence");
    let expected = manager
        .transactionally(&session, |s| manager.get_ais(s))
        .expect("read");

    // A second manager over the same store reconstructs the same catalog.
    let txns2 = Arc::new(TransactionService::new(store));
    let sessions2 = Arc::new(SessionService::new(txns2.id()));
    let reopened = SchemaManager::open(AisdbConfig::default(), txns2, sessions2).expect("reopen");
    let session2 = reopened.session_service().create_session();
    let reloaded = reopened
        .transactionally(&session2, |s| reopened.get_ais(s))
        .expect("read");
    assert!(reloaded.same_structure(&expected));
    assert_eq!(reloaded.generation(), expected.generation());
}

#[test]
fn selector_round_trip_preserves_structure() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("create");
    manager
        .apply_ddl(
            &session,
            &DdlOperation::CreateTable {
                name: TableName::new("aux", "logs"),
                spec: users_spec(),
            },
        )
        .expect("create aux");
    let snapshot = manager
        .transactionally(&session, |s| manager.get_ais(s))
        .expect("read");

    let mut loader = AisLoader::new();
    for schema_name in snapshot.schemas().keys() {
        let mut buffer = GrowableBuffer::new(4096, usize::MAX);
        aisdb::codec::save(
            &mut buffer,
            &snapshot,
            &SaveSelector::single_schema(schema_name.clone()),
        )
        .expect("save");
        loader.load_blob(buffer.as_slice()).expect("load");
    }
    let rebuilt = loader.finalize().expect("finalize");
    assert!(rebuilt.same_structure(&snapshot));
}

#[test]
fn unsaved_change_bumps_nothing_and_stays_in_memory() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("create");

    let memory = manager.session_service().create_session();
    manager
        .transactionally(&memory, |s| {
            let base = manager.get_ais(s)?;
            let mut draft = base.to_draft();
            DdlOperation::CreateTable {
                name: TableName::new(INFORMATION_SCHEMA, "tables"),
                spec: TableSpec {
                    columns: vec![ColumnSpec {
                        name: "name".into(),
                        col_type: ColumnType::Text,
                        nullable: false,
                    }],
                    primary_key: vec!["name".into()],
                    memory_resident: true,
                    constraints: Vec::new(),
                },
            }
            .apply_to(&mut draft)?;
            let schema = draft.schema_mut(INFORMATION_SCHEMA)?;
            let table = schema.tables.get_mut("tables").expect("tables");
            table.table_id = manager.name_generator().next_table_id();
            table.tree_name = manager
                .name_generator()
                .table_tree_name(INFORMATION_SCHEMA, "tables");

            let installed = manager.unsaved_ais_change_with_row_defs(s, draft)?;
            // Same generation as the base: nothing was bumped.
            assert_eq!(installed.generation(), base.generation());
            let visible = manager.get_ais(s)?;
            assert!(
                visible
                    .schema(INFORMATION_SCHEMA)
                    .expect("memory schema")
                    .user_table("tables")
                    .is_some()
            );
            Ok(())
        })
        .expect("unsaved change");

    // Nothing persisted for the memory schema, generation untouched.
    assert_eq!(stored_generation(&manager), Some(1));
    assert_eq!(
        manager
            .txn_service()
            .store()
            .snapshot_get(&schema_blob_key(INFORMATION_SCHEMA)),
        None
    );
}

#[test]
fn row_def_cache_tracks_installed_catalog() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    let installed = manager.apply_ddl(&session, &create_users()).expect("create");
    let table = installed
        .schema("app")
        .expect("schema")
        .user_table("users")
        .expect("table");
    let def = manager
        .row_def_cache()
        .row_def(table.table_id)
        .expect("row def");
    assert_eq!(def.tree_name, table.tree_name);
    assert_eq!(def.fields.len(), 1);

    manager
        .apply_ddl(
            &session,
            &DdlOperation::AddColumn {
                table: TableName::new("app", "users"),
                column: ColumnSpec {
                    name: "email".into(),
                    col_type: ColumnType::Text,
                    nullable: true,
                },
            },
        )
        .expect("add column");
    let def = manager
        .row_def_cache()
        .row_def(table.table_id)
        .expect("row def");
    assert_eq!(def.fields.len(), 2);
    assert_eq!(def.version, 1);
}

#[test]
fn table_version_map_advances_monotonically_on_install() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    let installed = manager.apply_ddl(&session, &create_users()).expect("create");
    let table_id = installed
        .schema("app")
        .expect("schema")
        .user_table("users")
        .expect("table")
        .table_id;

    manager
        .apply_ddl(
            &session,
            &DdlOperation::AddColumn {
                table: TableName::new("app", "users"),
                column: ColumnSpec {
                    name: "email".into(),
                    col_type: ColumnType::Text,
                    nullable: true,
                },
            },
        )
        .expect("add column");
    // Install happens on read.
    let reader = manager.session_service().create_session();
    manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("read");
    assert_eq!(manager.table_version_map().get(table_id), Some(1));
}

#[test]
fn delete_table_statuses_removes_entries() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.table_status_cache().get_or_create(9, false);
    manager
        .delete_table_statuses(&session, &[9])
        .expect("delete statuses");
    assert!(manager.table_status_cache().get(9).is_none());
    assert!(!manager.tree_removal_is_delayed());
    manager.tree_was_removed(&session, "app", "app.users");
}

#[test]
fn validation_failure_aborts_before_any_write() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    let err = manager
        .transactionally(&session, |s| {
            let base = manager.get_ais(s)?;
            let mut draft = base.to_draft();
            create_users().apply_to(&mut draft)?;
            // Skip allocation: validation must reject the unallocated table.
            manager.save_ais_change_with_row_defs(s, draft, &["app".to_string()])
        })
        .expect_err("validation failure");
    assert!(matches!(err, AisdbError::Validation { .. }));
    assert_eq!(stored_generation(&manager), None);
    assert_eq!(
        manager
            .txn_service()
            .store()
            .snapshot_get(&schema_blob_key("app")),
        None
    );
}

#[test]
fn snapshot_mutation_is_rejected_and_invisible() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    let installed = manager.apply_ddl(&session, &create_users()).expect("create");

    // The installed snapshot is frozen: direct mutation fails.
    let mut stolen: Ais = (*installed).clone();
    assert!(stolen.remove_schema("app").is_err());

    // A draft can mutate freely without affecting what readers observe.
    let mut draft = installed.to_draft();
    draft.remove_schema("app").expect("draft mutation");
    let reader = manager.session_service().create_session();
    let observed = manager
        .transactionally(&reader, |s| manager.get_ais(s))
        .expect("read");
    assert!(observed.schema("app").is_some());
}

#[test]
fn stop_releases_the_manager() {
    let manager = open_manager(AisdbConfig::default());
    let session = manager.session_service().create_session();
    manager.apply_ddl(&session, &create_users()).expect("create");
    manager.stop();
}
