//! Downstream caches derived from the catalog: per-table physical row
//! layouts and table statuses. Rebuilt against every installed snapshot.

use crate::ais::{Ais, ColumnType};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

/// Physical layout of one table's rows, keyed by table id. Consumers hold
/// these across statements and use the version to detect staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDef {
    pub table_id: i32,
    pub version: i32,
    pub tree_name: String,
    pub fields: Vec<FieldDef>,
    /// Positions of the primary-key fields within `fields`.
    pub pk_positions: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct RowDefCache {
    inner: RwLock<HashMap<i32, Arc<RowDef>>>,
}

impl RowDefCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cache contents with definitions derived from `ais`.
    pub fn set_ais(&self, ais: &Ais) {
        let mut defs = HashMap::new();
        for table in ais.user_tables() {
            let fields: Vec<FieldDef> = table
                .columns
                .iter()
                .map(|column| FieldDef {
                    name: column.name.clone(),
                    col_type: column.col_type,
                    nullable: column.nullable,
                })
                .collect();
            let pk_positions = table
                .primary_key
                .iter()
                .filter_map(|pk| table.columns.iter().position(|c| &c.name == pk))
                .collect();
            defs.insert(
                table.table_id,
                Arc::new(RowDef {
                    table_id: table.table_id,
                    version: table.version,
                    tree_name: table.tree_name.clone(),
                    fields,
                    pk_positions,
                }),
            );
        }
        *self.inner.write() = defs;
    }

    pub fn row_def(&self, table_id: i32) -> Option<Arc<RowDef>> {
        self.inner.read().get(&table_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStatus {
    pub table_id: i32,
    pub row_count: i64,
    /// Statuses for memory-resident tables are dropped when the owning
    /// snapshot is detached.
    pub memory_resident: bool,
}

#[derive(Debug, Default)]
pub struct TableStatusCache {
    statuses: Mutex<HashMap<i32, TableStatus>>,
}

impl TableStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, table_id: i32, memory_resident: bool) -> TableStatus {
        *self
            .statuses
            .lock()
            .entry(table_id)
            .or_insert(TableStatus {
                table_id,
                row_count: 0,
                memory_resident,
            })
    }

    pub fn get(&self, table_id: i32) -> Option<TableStatus> {
        self.statuses.lock().get(&table_id).copied()
    }

    pub fn set_row_count(&self, table_id: i32, row_count: i64) {
        if let Some(status) = self.statuses.lock().get_mut(&table_id) {
            status.row_count = row_count;
        }
    }

    pub fn delete_table_status(&self, table_id: i32) {
        self.statuses.lock().remove(&table_id);
    }

    /// Drops statuses bound to the outgoing snapshot (memory-resident
    /// tables); persisted table statuses survive snapshot swaps.
    pub fn detach_ais(&self) {
        self.statuses.lock().retain(|_, status| !status.memory_resident);
    }
}

#[cfg(test)]
mod tests {
    use super::{RowDefCache, TableStatusCache};
    use crate::ais::{Ais, Column, ColumnType, Schema, Table, TableName};

    fn ais_with_users() -> Ais {
        let mut ais = Ais::new();
        let mut schema = Schema::new("app");
        schema.tables.insert(
            "users".into(),
            Table {
                name: TableName::new("app", "users"),
                table_id: 42,
                version: 3,
                tree_name: "app.users".into(),
                memory_resident: false,
                columns: vec![
                    Column {
                        name: "id".into(),
                        position: 0,
                        col_type: ColumnType::Int,
                        nullable: false,
                    },
                    Column {
                        name: "email".into(),
                        position: 1,
                        col_type: ColumnType::Text,
                        nullable: false,
                    },
                ],
                primary_key: vec!["id".into()],
                indexes: im::OrdMap::new(),
                constraints: Vec::new(),
            },
        );
        ais.put_schema(schema).expect("put");
        ais
    }

    #[test]
    fn set_ais_builds_row_defs() {
        let cache = RowDefCache::new();
        cache.set_ais(&ais_with_users());
        let def = cache.row_def(42).expect("row def");
        assert_eq!(def.version, 3);
        assert_eq!(def.fields.len(), 2);
        assert_eq!(def.pk_positions, vec![0]);
        assert_eq!(def.tree_name, "app.users");
    }

    #[test]
    fn set_ais_replaces_previous_contents() {
        let cache = RowDefCache::new();
        cache.set_ais(&ais_with_users());
        cache.set_ais(&Ais::new());
        assert!(cache.is_empty());
    }

    #[test]
    fn detach_drops_only_memory_statuses() {
        let cache = TableStatusCache::new();
        cache.get_or_create(1, false);
        cache.get_or_create(2, true);
        cache.detach_ais();
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
    }

    #[test]
    fn delete_removes_status() {
        let cache = TableStatusCache::new();
        cache.get_or_create(1, false);
        cache.set_row_count(1, 10);
        assert_eq!(cache.get(1).expect("status").row_count, 10);
        cache.delete_table_status(1);
        assert!(cache.get(1).is_none());
    }
}
