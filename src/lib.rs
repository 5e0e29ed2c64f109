//! Transactional schema manager for a SQL catalog stored in an ordered
//! key-value store.
//!
//! The catalog (schemas, tables, sequences, routines) lives in the store as
//! one packed blob per schema plus a generation counter. Readers resolve
//! their snapshot through the generation key inside their own transaction;
//! DDL increments the generation in the same transaction that rewrites the
//! affected blobs, so every observer sees the old catalog or the new one in
//! its entirety, never a mix.
//!
//! ```
//! use aisdb::ais::{ColumnType, TableName};
//! use aisdb::config::AisdbConfig;
//! use aisdb::ddl::{ColumnSpec, DdlOperation, TableSpec};
//! use aisdb::manager::SchemaManager;
//! use aisdb::session::SessionService;
//! use aisdb::store::kv::KvStore;
//! use aisdb::store::txn::TransactionService;
//! use std::sync::Arc;
//!
//! let store = Arc::new(KvStore::new());
//! let txns = Arc::new(TransactionService::new(store));
//! let sessions = Arc::new(SessionService::new(txns.id()));
//! let manager = SchemaManager::open(AisdbConfig::default(), txns, sessions).unwrap();
//!
//! let session = manager.session_service().create_session();
//! manager
//!     .apply_ddl(
//!         &session,
//!         &DdlOperation::CreateTable {
//!             name: TableName::new("app", "users"),
//!             spec: TableSpec {
//!                 columns: vec![ColumnSpec {
//!                     name: "id".into(),
//!                     col_type: ColumnType::Int,
//!                     nullable: false,
//!                 }],
//!                 primary_key: vec!["id".into()],
//!                 memory_resident: false,
//!                 constraints: Vec::new(),
//!             },
//!         },
//!     )
//!     .unwrap();
//!
//! let reader = manager.session_service().create_session();
//! let ais = manager
//!     .transactionally(&reader, |s| manager.get_ais(s))
//!     .unwrap();
//! assert!(ais.schema("app").unwrap().user_table("users").is_some());
//! ```

pub mod ais;
pub mod codec;
pub mod config;
pub mod ddl;
pub mod error;
pub mod manager;
pub mod names;
pub mod rowdefs;
pub mod session;
pub mod store;
pub mod tuple;

pub use crate::config::AisdbConfig;
pub use crate::error::{AisdbError, AisdbErrorCode};
pub use crate::manager::SchemaManager;
