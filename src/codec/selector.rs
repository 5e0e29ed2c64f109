//! Selectors restrict which catalog entries a save emits.

use crate::ais::{
    INFORMATION_SCHEMA, Jar, Routine, SECURITY_SCHEMA, SQLJ_SCHEMA, SYS_SCHEMA, Sequence, Table,
};

/// Outcome of table selection. `Rewritten` substitutes a modified copy, for
/// callers that persist a table in a reduced form.
#[derive(Debug, Clone)]
pub enum TablePick {
    Included,
    Excluded,
    Rewritten(Table),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveSelector {
    /// Everything in one schema.
    SingleSchema { schema: String },
    /// One schema minus memory-resident tables. Used when persisting the
    /// information and security schemas.
    SingleSchemaWithoutMemoryTables { schema: String },
    /// One schema minus routines. Used when persisting the sys and sqlj
    /// schemas.
    SingleSchemaWithoutRoutines { schema: String },
    /// Only memory-resident tables, plus sys/sqlj/security routines.
    MemoryTablesOnly,
}

impl SaveSelector {
    pub fn single_schema(schema: impl Into<String>) -> Self {
        SaveSelector::SingleSchema {
            schema: schema.into(),
        }
    }

    /// The selector used when persisting `schema`'s blob: protected schemas
    /// drop their memory-resident tables or routines.
    pub fn for_persisting(schema: &str) -> Self {
        match schema {
            INFORMATION_SCHEMA | SECURITY_SCHEMA => SaveSelector::SingleSchemaWithoutMemoryTables {
                schema: schema.to_string(),
            },
            SYS_SCHEMA | SQLJ_SCHEMA => SaveSelector::SingleSchemaWithoutRoutines {
                schema: schema.to_string(),
            },
            _ => SaveSelector::single_schema(schema),
        }
    }

    pub fn pick_schema(&self, name: &str) -> bool {
        match self {
            SaveSelector::SingleSchema { schema }
            | SaveSelector::SingleSchemaWithoutMemoryTables { schema }
            | SaveSelector::SingleSchemaWithoutRoutines { schema } => schema == name,
            SaveSelector::MemoryTablesOnly => true,
        }
    }

    pub fn pick_table(&self, table: &Table) -> TablePick {
        match self {
            SaveSelector::SingleSchema { .. } | SaveSelector::SingleSchemaWithoutRoutines { .. } => {
                TablePick::Included
            }
            SaveSelector::SingleSchemaWithoutMemoryTables { .. } => {
                if table.memory_resident {
                    TablePick::Excluded
                } else {
                    TablePick::Included
                }
            }
            SaveSelector::MemoryTablesOnly => {
                if table.memory_resident {
                    TablePick::Included
                } else {
                    TablePick::Excluded
                }
            }
        }
    }

    pub fn pick_routine(&self, schema: &str, _routine: &Routine) -> bool {
        match self {
            SaveSelector::SingleSchema { .. }
            | SaveSelector::SingleSchemaWithoutMemoryTables { .. } => true,
            SaveSelector::SingleSchemaWithoutRoutines { .. } => false,
            SaveSelector::MemoryTablesOnly => {
                matches!(schema, SYS_SCHEMA | SQLJ_SCHEMA | SECURITY_SCHEMA)
            }
        }
    }

    pub fn pick_sequence(&self, _sequence: &Sequence) -> bool {
        !matches!(self, SaveSelector::MemoryTablesOnly)
    }

    pub fn pick_jar(&self, _jar: &Jar) -> bool {
        !matches!(self, SaveSelector::MemoryTablesOnly)
    }

    /// Whether a picked schema with no surviving entries still emits a
    /// record. Single-schema saves do: an empty schema is catalog state.
    pub fn emit_empty_schemas(&self) -> bool {
        !matches!(self, SaveSelector::MemoryTablesOnly)
    }
}
