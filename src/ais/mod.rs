//! The catalog graph: an information schema of schemas, tables, sequences
//! and routines, stamped with a generation and frozen before it is shared.

pub mod validation;

use crate::error::AisdbError;
use im::OrdMap;
use serde::{Deserialize, Serialize};

pub const INFORMATION_SCHEMA: &str = "information_schema";
pub const SECURITY_SCHEMA: &str = "security_schema";
pub const SYS_SCHEMA: &str = "sys";
pub const SQLJ_SCHEMA: &str = "sqlj";

pub fn is_protected_schema(name: &str) -> bool {
    matches!(
        name,
        INFORMATION_SCHEMA | SECURITY_SCHEMA | SYS_SCHEMA | SQLJ_SCHEMA
    )
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    BigInt,
    Double,
    Boolean,
    Text,
    Blob,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub position: usize,
    pub col_type: ColumnType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub index_name: String,
    /// Physical storage structure backing this index. Empty until allocated.
    #[serde(default)]
    pub tree_name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Unique {
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        references: TableName,
        referenced_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: TableName,
    /// Unique across the whole catalog. Zero until allocated.
    #[serde(default)]
    pub table_id: i32,
    /// Monotonically non-decreasing per table id across catalog versions.
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub tree_name: String,
    /// Memory-resident tables are never written to persisted blobs for
    /// system and security schemas.
    #[serde(default)]
    pub memory_resident: bool,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: OrdMap<String, Index>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    #[serde(default)]
    pub tree_name: String,
    pub start_with: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    pub name: String,
    pub language: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jar {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub tables: OrdMap<String, Table>,
    #[serde(default)]
    pub sequences: OrdMap<String, Sequence>,
    #[serde(default)]
    pub routines: OrdMap<String, Routine>,
    #[serde(default)]
    pub jars: OrdMap<String, Jar>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: OrdMap::new(),
            sequences: OrdMap::new(),
            routines: OrdMap::new(),
            jars: OrdMap::new(),
        }
    }

    pub fn user_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.sequences.is_empty()
            && self.routines.is_empty()
            && self.jars.is_empty()
    }
}

/// The full catalog. Drafts are mutable; `freeze` makes the instance
/// permanent, after which every mutator fails. Installed snapshots are shared
/// as `Arc<Ais>` so immutability is also structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ais {
    generation: i64,
    frozen: bool,
    schemas: OrdMap<String, Schema>,
}

impl Default for Ais {
    fn default() -> Self {
        Self::new()
    }
}

impl Ais {
    pub fn new() -> Self {
        Self {
            generation: 0,
            frozen: false,
            schemas: OrdMap::new(),
        }
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn schemas(&self) -> &OrdMap<String, Schema> {
        &self.schemas
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn table(&self, name: &TableName) -> Option<&Table> {
        self.schemas
            .get(&name.schema)
            .and_then(|s| s.tables.get(&name.table))
    }

    /// All tables across all schemas, in schema then table order.
    pub fn user_tables(&self) -> impl Iterator<Item = &Table> {
        self.schemas.values().flat_map(|s| s.tables.values())
    }

    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.schemas.values().flat_map(|s| s.sequences.values())
    }

    fn ensure_mutable(&self) -> Result<(), AisdbError> {
        if self.frozen {
            return Err(AisdbError::internal(
                "attempted to mutate a frozen catalog snapshot",
            ));
        }
        Ok(())
    }

    pub fn set_generation(&mut self, generation: i64) -> Result<(), AisdbError> {
        self.ensure_mutable()?;
        self.generation = generation;
        Ok(())
    }

    /// Seals the catalog. Idempotent; there is no unfreeze.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Mutable clone of a (possibly frozen) snapshot, keeping the generation
    /// it was stamped with. Cheap: the schema map is persistent.
    pub fn to_draft(&self) -> Ais {
        Ais {
            generation: self.generation,
            frozen: false,
            schemas: self.schemas.clone(),
        }
    }

    pub fn put_schema(&mut self, schema: Schema) -> Result<(), AisdbError> {
        self.ensure_mutable()?;
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn remove_schema(&mut self, name: &str) -> Result<Option<Schema>, AisdbError> {
        self.ensure_mutable()?;
        Ok(self.schemas.remove(name))
    }

    pub fn schema_mut(&mut self, name: &str) -> Result<&mut Schema, AisdbError> {
        self.ensure_mutable()?;
        self.schemas
            .get_mut(name)
            .ok_or_else(|| AisdbError::SchemaNotFound {
                schema: name.to_string(),
            })
    }

    /// Structural equality that ignores the generation stamp and freeze
    /// state. Used to compare a reloaded catalog with its source.
    pub fn same_structure(&self, other: &Ais) -> bool {
        self.schemas == other.schemas
    }
}
