//! DDL requests and their application onto a draft catalog.
//!
//! An operation mutates a draft cloned from the caller's transactional
//! snapshot. All user-facing validation happens here, before any identifier
//! is allocated and before anything touches the store; the write path
//! revalidates the whole catalog afterwards.

use crate::ais::{
    Ais, Column, ColumnType, Constraint, ConstraintKind, Index, Routine, Schema, Sequence, Table,
    TableName, is_protected_schema,
};
use crate::error::AisdbError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub memory_resident: bool,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSpec {
    pub start_with: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
}

impl Default for SequenceSpec {
    fn default() -> Self {
        Self {
            start_with: 1,
            increment: 1,
            min_value: 1,
            max_value: i64::MAX,
            cycle: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdlOperation {
    /// Dropping a schema drops everything in it.
    DropSchema { schema: String },
    /// Creates the schema implicitly when absent.
    CreateTable { name: TableName, spec: TableSpec },
    DropTable { name: TableName },
    AddColumn { table: TableName, column: ColumnSpec },
    DropColumn { table: TableName, column: String },
    CreateIndex {
        table: TableName,
        index_name: String,
        spec: IndexSpec,
    },
    DropIndex { table: TableName, index_name: String },
    CreateSequence {
        schema: String,
        name: String,
        spec: SequenceSpec,
    },
    DropSequence { schema: String, name: String },
    CreateRoutine { schema: String, routine: Routine },
    DropRoutine { schema: String, name: String },
}

impl DdlOperation {
    /// Schema names whose blobs must be rewritten (or cleared) when this
    /// operation commits.
    pub fn affected_schemas(&self) -> Vec<String> {
        match self {
            DdlOperation::DropSchema { schema }
            | DdlOperation::CreateSequence { schema, .. }
            | DdlOperation::DropSequence { schema, .. }
            | DdlOperation::CreateRoutine { schema, .. }
            | DdlOperation::DropRoutine { schema, .. } => vec![schema.clone()],
            DdlOperation::CreateTable { name, .. }
            | DdlOperation::DropTable { name }
            | DdlOperation::AddColumn { table: name, .. }
            | DdlOperation::DropColumn { table: name, .. }
            | DdlOperation::CreateIndex { table: name, .. }
            | DdlOperation::DropIndex { table: name, .. } => vec![name.schema.clone()],
        }
    }

    pub fn apply_to(&self, draft: &mut Ais) -> Result<(), AisdbError> {
        match self {
            DdlOperation::DropSchema { schema } => {
                if is_protected_schema(schema) {
                    return Err(AisdbError::validation(format!(
                        "cannot drop protected schema '{schema}'"
                    )));
                }
                if draft.remove_schema(schema)?.is_none() {
                    return Err(AisdbError::SchemaNotFound {
                        schema: schema.clone(),
                    });
                }
                Ok(())
            }
            DdlOperation::CreateTable { name, spec } => create_table(draft, name, spec),
            DdlOperation::DropTable { name } => {
                let schema = lookup_schema(draft, &name.schema)?;
                if schema.tables.remove(&name.table).is_none() {
                    return Err(AisdbError::TableNotFound {
                        schema: name.schema.clone(),
                        table: name.table.clone(),
                    });
                }
                Ok(())
            }
            DdlOperation::AddColumn { table, column } => add_column(draft, table, column),
            DdlOperation::DropColumn { table, column } => drop_column(draft, table, column),
            DdlOperation::CreateIndex {
                table,
                index_name,
                spec,
            } => create_index(draft, table, index_name, spec),
            DdlOperation::DropIndex { table, index_name } => {
                let target = lookup_table(draft, table)?;
                if target.indexes.remove(index_name).is_none() {
                    return Err(AisdbError::IndexNotFound {
                        schema: table.schema.clone(),
                        table: table.table.clone(),
                        index: index_name.clone(),
                    });
                }
                Ok(())
            }
            DdlOperation::CreateSequence { schema, name, spec } => {
                ensure_schema(draft, schema)?;
                let target = draft.schema_mut(schema)?;
                if target.sequences.contains_key(name) {
                    return Err(AisdbError::validation(format!(
                        "sequence '{schema}.{name}' already exists"
                    )));
                }
                target.sequences.insert(
                    name.clone(),
                    Sequence {
                        name: name.clone(),
                        tree_name: String::new(),
                        start_with: spec.start_with,
                        increment: spec.increment,
                        min_value: spec.min_value,
                        max_value: spec.max_value,
                        cycle: spec.cycle,
                    },
                );
                Ok(())
            }
            DdlOperation::DropSequence { schema, name } => {
                let target = lookup_schema(draft, schema)?;
                if target.sequences.remove(name).is_none() {
                    return Err(AisdbError::SequenceNotFound {
                        schema: schema.clone(),
                        sequence: name.clone(),
                    });
                }
                Ok(())
            }
            DdlOperation::CreateRoutine { schema, routine } => {
                ensure_schema(draft, schema)?;
                let target = draft.schema_mut(schema)?;
                if target.routines.contains_key(&routine.name) {
                    return Err(AisdbError::validation(format!(
                        "routine '{schema}.{}' already exists",
                        routine.name
                    )));
                }
                target.routines.insert(routine.name.clone(), routine.clone());
                Ok(())
            }
            DdlOperation::DropRoutine { schema, name } => {
                let target = lookup_schema(draft, schema)?;
                if target.routines.remove(name).is_none() {
                    return Err(AisdbError::RoutineNotFound {
                        schema: schema.clone(),
                        routine: name.clone(),
                    });
                }
                Ok(())
            }
        }
    }
}

fn ensure_schema(draft: &mut Ais, name: &str) -> Result<(), AisdbError> {
    if draft.schema(name).is_none() {
        draft.put_schema(Schema::new(name))?;
    }
    Ok(())
}

fn lookup_schema<'a>(draft: &'a mut Ais, name: &str) -> Result<&'a mut Schema, AisdbError> {
    draft.schema_mut(name)
}

fn lookup_table<'a>(draft: &'a mut Ais, name: &TableName) -> Result<&'a mut Table, AisdbError> {
    let schema = draft.schema_mut(&name.schema)?;
    schema
        .tables
        .get_mut(&name.table)
        .ok_or_else(|| AisdbError::TableNotFound {
            schema: name.schema.clone(),
            table: name.table.clone(),
        })
}

fn create_table(draft: &mut Ais, name: &TableName, spec: &TableSpec) -> Result<(), AisdbError> {
    if spec.columns.is_empty() {
        return Err(AisdbError::validation(format!(
            "table {name} must have at least one column"
        )));
    }
    let mut columns = Vec::with_capacity(spec.columns.len());
    for (position, column) in spec.columns.iter().enumerate() {
        if spec.columns[..position].iter().any(|c| c.name == column.name) {
            return Err(AisdbError::ColumnAlreadyExists {
                schema: name.schema.clone(),
                table: name.table.clone(),
                column: column.name.clone(),
            });
        }
        columns.push(Column {
            name: column.name.clone(),
            position,
            col_type: column.col_type,
            nullable: column.nullable,
        });
    }
    for pk in &spec.primary_key {
        if !columns.iter().any(|c| &c.name == pk) {
            return Err(AisdbError::ColumnNotFound {
                schema: name.schema.clone(),
                table: name.table.clone(),
                column: pk.clone(),
            });
        }
    }
    for constraint in &spec.constraints {
        validate_constraint_columns(name, &columns, constraint)?;
    }
    ensure_schema(draft, &name.schema)?;
    let schema = draft.schema_mut(&name.schema)?;
    if schema.tables.contains_key(&name.table) {
        return Err(AisdbError::TableAlreadyExists {
            schema: name.schema.clone(),
            table: name.table.clone(),
        });
    }
    schema.tables.insert(
        name.table.clone(),
        Table {
            name: name.clone(),
            table_id: 0,
            version: 0,
            tree_name: String::new(),
            memory_resident: spec.memory_resident,
            columns,
            primary_key: spec.primary_key.clone(),
            indexes: im::OrdMap::new(),
            constraints: spec.constraints.clone(),
        },
    );
    Ok(())
}

fn validate_constraint_columns(
    name: &TableName,
    columns: &[Column],
    constraint: &Constraint,
) -> Result<(), AisdbError> {
    let local_columns = match &constraint.kind {
        ConstraintKind::Unique { columns } => columns,
        ConstraintKind::ForeignKey { columns, .. } => columns,
    };
    for column in local_columns {
        if !columns.iter().any(|c| &c.name == column) {
            return Err(AisdbError::ColumnNotFound {
                schema: name.schema.clone(),
                table: name.table.clone(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

fn add_column(draft: &mut Ais, name: &TableName, column: &ColumnSpec) -> Result<(), AisdbError> {
    let table = lookup_table(draft, name)?;
    if table.column(&column.name).is_some() {
        return Err(AisdbError::ColumnAlreadyExists {
            schema: name.schema.clone(),
            table: name.table.clone(),
            column: column.name.clone(),
        });
    }
    let position = table.columns.len();
    table.columns.push(Column {
        name: column.name.clone(),
        position,
        col_type: column.col_type,
        nullable: column.nullable,
    });
    table.version += 1;
    Ok(())
}

fn drop_column(draft: &mut Ais, name: &TableName, column: &str) -> Result<(), AisdbError> {
    let table = lookup_table(draft, name)?;
    if table.column(column).is_none() {
        return Err(AisdbError::ColumnNotFound {
            schema: name.schema.clone(),
            table: name.table.clone(),
            column: column.to_string(),
        });
    }
    if table.primary_key.iter().any(|pk| pk == column) {
        return Err(AisdbError::validation(format!(
            "cannot drop primary key column '{column}' of {name}"
        )));
    }
    if let Some(index) = table
        .indexes
        .values()
        .find(|index| index.columns.iter().any(|c| c == column))
    {
        return Err(AisdbError::validation(format!(
            "cannot drop column '{column}' of {name}: referenced by index '{}'",
            index.index_name
        )));
    }
    table.columns.retain(|c| c.name != column);
    for (position, col) in table.columns.iter_mut().enumerate() {
        col.position = position;
    }
    table.version += 1;
    Ok(())
}

fn create_index(
    draft: &mut Ais,
    name: &TableName,
    index_name: &str,
    spec: &IndexSpec,
) -> Result<(), AisdbError> {
    let table = lookup_table(draft, name)?;
    if table.indexes.contains_key(index_name) {
        return Err(AisdbError::IndexAlreadyExists {
            schema: name.schema.clone(),
            table: name.table.clone(),
            index: index_name.to_string(),
        });
    }
    if spec.columns.is_empty() {
        return Err(AisdbError::validation(format!(
            "index '{index_name}' on {name} must have at least one column"
        )));
    }
    for column in &spec.columns {
        if table.column(column).is_none() {
            return Err(AisdbError::ColumnNotFound {
                schema: name.schema.clone(),
                table: name.table.clone(),
                column: column.clone(),
            });
        }
    }
    table.indexes.insert(
        index_name.to_string(),
        Index {
            index_name: index_name.to_string(),
            tree_name: String::new(),
            columns: spec.columns.clone(),
            unique: spec.unique,
        },
    );
    Ok(())
}
