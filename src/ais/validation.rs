//! Structural checks run against every candidate catalog before it is
//! frozen or persisted. A failure aborts the DDL before any KV write.

use crate::ais::Ais;
use crate::error::AisdbError;
use std::collections::{HashMap, HashSet};

type Rule = fn(&Ais, &mut Vec<String>);

/// The ruleset applied to live catalogs: every rule runs, all failures are
/// reported together.
const LIVE_RULES: &[Rule] = &[
    check_table_identity,
    check_tree_names,
    check_columns,
    check_indexes,
    check_constraints,
    check_references,
];

pub fn validate_live(ais: &Ais) -> Result<(), AisdbError> {
    let mut failures = Vec::new();
    for rule in LIVE_RULES {
        rule(ais, &mut failures);
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(AisdbError::validation(failures.join("; ")))
    }
}

fn check_table_identity(ais: &Ais, failures: &mut Vec<String>) {
    let mut seen_ids: HashMap<i32, String> = HashMap::new();
    for table in ais.user_tables() {
        if table.table_id <= 0 {
            failures.push(format!("table {} has no allocated id", table.name));
            continue;
        }
        if let Some(existing) = seen_ids.insert(table.table_id, table.name.to_string()) {
            failures.push(format!(
                "table id {} assigned to both {} and {}",
                table.table_id, existing, table.name
            ));
        }
        if table.version < 0 {
            failures.push(format!("table {} has negative version", table.name));
        }
    }
}

fn check_tree_names(ais: &Ais, failures: &mut Vec<String>) {
    let mut seen: HashMap<&str, String> = HashMap::new();
    for table in ais.user_tables() {
        if table.tree_name.is_empty() {
            failures.push(format!("table {} has no tree name", table.name));
        } else if let Some(existing) =
            seen.insert(table.tree_name.as_str(), format!("table {}", table.name))
        {
            failures.push(format!(
                "tree name '{}' claimed by both {} and table {}",
                table.tree_name, existing, table.name
            ));
        }
        for index in table.indexes.values() {
            if index.tree_name.is_empty() {
                failures.push(format!(
                    "index {} on {} has no tree name",
                    index.index_name, table.name
                ));
            } else if let Some(existing) = seen.insert(
                index.tree_name.as_str(),
                format!("index {} on {}", index.index_name, table.name),
            ) {
                failures.push(format!(
                    "tree name '{}' claimed by both {} and index {} on {}",
                    index.tree_name, existing, index.index_name, table.name
                ));
            }
        }
    }
    for sequence in ais.sequences() {
        if sequence.tree_name.is_empty() {
            failures.push(format!("sequence {} has no tree name", sequence.name));
        } else if let Some(existing) = seen.insert(
            sequence.tree_name.as_str(),
            format!("sequence {}", sequence.name),
        ) {
            failures.push(format!(
                "tree name '{}' claimed by both {} and sequence {}",
                sequence.tree_name, existing, sequence.name
            ));
        }
    }
}

fn check_columns(ais: &Ais, failures: &mut Vec<String>) {
    for table in ais.user_tables() {
        if table.columns.is_empty() {
            failures.push(format!("table {} has no columns", table.name));
            continue;
        }
        let mut names = HashSet::new();
        for (position, column) in table.columns.iter().enumerate() {
            if !names.insert(column.name.as_str()) {
                failures.push(format!(
                    "table {} declares column '{}' more than once",
                    table.name, column.name
                ));
            }
            if column.position != position {
                failures.push(format!(
                    "table {} column '{}' at position {} declares position {}",
                    table.name, column.name, position, column.position
                ));
            }
        }
        for pk_column in &table.primary_key {
            if table.column(pk_column).is_none() {
                failures.push(format!(
                    "table {} primary key references missing column '{}'",
                    table.name, pk_column
                ));
            }
        }
    }
}

fn check_indexes(ais: &Ais, failures: &mut Vec<String>) {
    for table in ais.user_tables() {
        for (key, index) in &table.indexes {
            if *key != index.index_name {
                failures.push(format!(
                    "index map key '{}' does not match index name '{}' on {}",
                    key, index.index_name, table.name
                ));
            }
            if index.columns.is_empty() {
                failures.push(format!(
                    "index {} on {} has no columns",
                    index.index_name, table.name
                ));
            }
            for column in &index.columns {
                if table.column(column).is_none() {
                    failures.push(format!(
                        "index {} on {} references missing column '{}'",
                        index.index_name, table.name, column
                    ));
                }
            }
        }
    }
}

fn check_constraints(ais: &Ais, failures: &mut Vec<String>) {
    for table in ais.user_tables() {
        let mut names = HashSet::new();
        for constraint in &table.constraints {
            if constraint.name.is_empty() {
                failures.push(format!("table {} has an unnamed constraint", table.name));
            } else if !names.insert(constraint.name.as_str()) {
                failures.push(format!(
                    "table {} declares constraint '{}' more than once",
                    table.name, constraint.name
                ));
            }
        }
    }
}

/// Cross-schema references must resolve within the same catalog.
fn check_references(ais: &Ais, failures: &mut Vec<String>) {
    use crate::ais::ConstraintKind;
    for table in ais.user_tables() {
        for constraint in &table.constraints {
            let ConstraintKind::ForeignKey {
                columns,
                references,
                referenced_columns,
            } = &constraint.kind
            else {
                continue;
            };
            for column in columns {
                if table.column(column).is_none() {
                    failures.push(format!(
                        "foreign key {} on {} references missing local column '{}'",
                        constraint.name, table.name, column
                    ));
                }
            }
            match ais.table(references) {
                None => failures.push(format!(
                    "foreign key {} on {} references missing table {}",
                    constraint.name, table.name, references
                )),
                Some(referenced) => {
                    for column in referenced_columns {
                        if referenced.column(column).is_none() {
                            failures.push(format!(
                                "foreign key {} on {} references missing column '{}' of {}",
                                constraint.name, table.name, column, references
                            ));
                        }
                    }
                }
            }
        }
    }
}
