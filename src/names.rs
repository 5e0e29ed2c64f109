//! Collision-free identifier allocation and the per-table version map.

use crate::ais::Ais;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Single-threaded identifier generator. Wrap in [`SyncNameGenerator`] for
/// shared use.
///
/// `merge_ais` marks every identifier present in a snapshot as used, so a
/// generator that outlives snapshots never reissues one. Allocation marks
/// the result used immediately; an allocation burned by a retried DDL is
/// skipped, never reused.
#[derive(Debug)]
pub struct DefaultNameGenerator {
    next_table_id: i32,
    used_table_ids: BTreeSet<i32>,
    used_tree_names: HashSet<String>,
    used_constraint_names: HashSet<String>,
}

impl DefaultNameGenerator {
    pub fn new(first_table_id: i32) -> Self {
        Self {
            next_table_id: first_table_id.max(1),
            used_table_ids: BTreeSet::new(),
            used_tree_names: HashSet::new(),
            used_constraint_names: HashSet::new(),
        }
    }

    pub fn next_table_id(&mut self) -> i32 {
        while self.used_table_ids.contains(&self.next_table_id) {
            self.next_table_id += 1;
        }
        let id = self.next_table_id;
        self.used_table_ids.insert(id);
        self.next_table_id += 1;
        id
    }

    pub fn table_tree_name(&mut self, schema: &str, table: &str) -> String {
        self.claim_tree_name(format!("{schema}.{table}"))
    }

    pub fn index_tree_name(&mut self, schema: &str, table: &str, index: &str) -> String {
        self.claim_tree_name(format!("{schema}.{table}.{index}"))
    }

    pub fn sequence_tree_name(&mut self, schema: &str, sequence: &str) -> String {
        self.claim_tree_name(format!("{schema}._sequence.{sequence}"))
    }

    fn claim_tree_name(&mut self, base: String) -> String {
        if self.used_tree_names.insert(base.clone()) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{base}${n}");
            if self.used_tree_names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn constraint_name(&mut self, schema: &str, table: &str, kind: &str) -> String {
        let base = format!("{table}_{kind}");
        let mut n = 0u32;
        loop {
            let candidate = if n == 0 {
                base.clone()
            } else {
                format!("{base}_{n}")
            };
            let qualified = format!("{schema}.{candidate}");
            if self.used_constraint_names.insert(qualified) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn merge_ais(&mut self, ais: &Ais) {
        for table in ais.user_tables() {
            self.used_table_ids.insert(table.table_id);
            if !table.tree_name.is_empty() {
                self.used_tree_names.insert(table.tree_name.clone());
            }
            for index in table.indexes.values() {
                if !index.tree_name.is_empty() {
                    self.used_tree_names.insert(index.tree_name.clone());
                }
            }
            for constraint in &table.constraints {
                self.used_constraint_names
                    .insert(format!("{}.{}", table.name.schema, constraint.name));
            }
        }
        for sequence in ais.sequences() {
            if !sequence.tree_name.is_empty() {
                self.used_tree_names.insert(sequence.tree_name.clone());
            }
        }
    }
}

/// Thread-safe facade: one coarse lock around the default generator. The
/// lock is never held across KV I/O.
#[derive(Debug)]
pub struct SyncNameGenerator {
    inner: Mutex<DefaultNameGenerator>,
}

impl SyncNameGenerator {
    pub fn new(generator: DefaultNameGenerator) -> Self {
        Self {
            inner: Mutex::new(generator),
        }
    }

    pub fn next_table_id(&self) -> i32 {
        self.inner.lock().next_table_id()
    }

    pub fn table_tree_name(&self, schema: &str, table: &str) -> String {
        self.inner.lock().table_tree_name(schema, table)
    }

    pub fn index_tree_name(&self, schema: &str, table: &str, index: &str) -> String {
        self.inner.lock().index_tree_name(schema, table, index)
    }

    pub fn sequence_tree_name(&self, schema: &str, sequence: &str) -> String {
        self.inner.lock().sequence_tree_name(schema, sequence)
    }

    pub fn constraint_name(&self, schema: &str, table: &str, kind: &str) -> String {
        self.inner.lock().constraint_name(schema, table, kind)
    }

    pub fn merge_ais(&self, ais: &Ais) {
        self.inner.lock().merge_ais(ais)
    }
}

/// `table id -> version`, monotonic per key. Batched updates run under an
/// exclusive claim; readers see a consistent state between claims.
#[derive(Debug, Default)]
pub struct TableVersionMap {
    inner: Mutex<HashMap<i32, i32>>,
}

impl TableVersionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim_exclusive(&self) -> TableVersionClaim<'_> {
        TableVersionClaim {
            guard: self.inner.lock(),
        }
    }

    pub fn get(&self, table_id: i32) -> Option<i32> {
        self.inner.lock().get(&table_id).copied()
    }
}

pub struct TableVersionClaim<'a> {
    guard: MutexGuard<'a, HashMap<i32, i32>>,
}

impl TableVersionClaim<'_> {
    pub fn get(&self, table_id: i32) -> Option<i32> {
        self.guard.get(&table_id).copied()
    }

    /// Applies the update only when `version` is strictly greater than the
    /// current value. Returns whether the map changed.
    pub fn put(&mut self, table_id: i32, version: i32) -> bool {
        match self.guard.get(&table_id) {
            Some(current) if *current >= version => false,
            _ => {
                self.guard.insert(table_id, version);
                true
            }
        }
    }
}
