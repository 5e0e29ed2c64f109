//! Packed blob codec for the catalog graph.
//!
//! A blob is a sequence of framed schema records: `[u32 length][payload]
//! [u32 crc32c]`, payload in MessagePack. Blobs carry no version tag; the
//! frame CRC is integrity only. Loading accumulates blobs in any order and
//! reconstructs the graph; cross-schema references are checked at finalize.

pub mod buffer;
pub mod selector;

use crate::ais::{Ais, Schema};
use crate::codec::buffer::GrowableBuffer;
use crate::codec::selector::{SaveSelector, TablePick};
use crate::error::AisdbError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct SchemaRecord {
    schema: Schema,
}

/// Serializes every schema the selector picks into `buffer`, one framed
/// record per schema. Overflowing the buffer's ceiling is terminal.
pub fn save(
    buffer: &mut GrowableBuffer,
    ais: &Ais,
    selector: &SaveSelector,
) -> Result<(), AisdbError> {
    for schema in ais.schemas().values() {
        if !selector.pick_schema(&schema.name) {
            continue;
        }
        let filtered = filter_schema(schema, selector);
        if filtered.is_empty() && !selector.emit_empty_schemas() {
            continue;
        }
        let record = SchemaRecord { schema: filtered };
        let payload =
            rmp_serde::to_vec(&record).map_err(|e| AisdbError::Encode(e.to_string()))?;
        let frame_len = u32::try_from(payload.len())
            .map_err(|_| AisdbError::Encode("schema record exceeds frame size".into()))?;
        let crc = crc32c::crc32c(&payload);
        write_all(buffer, &frame_len.to_be_bytes())?;
        write_all(buffer, &payload)?;
        write_all(buffer, &crc.to_be_bytes())?;
    }
    Ok(())
}

fn write_all(buffer: &mut GrowableBuffer, bytes: &[u8]) -> Result<(), AisdbError> {
    buffer
        .write(bytes)
        .map_err(|overflow| AisdbError::CatalogTooLarge { cap: overflow.cap })
}

fn filter_schema(schema: &Schema, selector: &SaveSelector) -> Schema {
    let mut filtered = Schema::new(schema.name.clone());
    for table in schema.tables.values() {
        match selector.pick_table(table) {
            TablePick::Included => {
                filtered.tables.insert(table.name.table.clone(), table.clone());
            }
            TablePick::Rewritten(rewritten) => {
                filtered
                    .tables
                    .insert(rewritten.name.table.clone(), rewritten);
            }
            TablePick::Excluded => {}
        }
    }
    for sequence in schema.sequences.values() {
        if selector.pick_sequence(sequence) {
            filtered
                .sequences
                .insert(sequence.name.clone(), sequence.clone());
        }
    }
    for routine in schema.routines.values() {
        if selector.pick_routine(&schema.name, routine) {
            filtered
                .routines
                .insert(routine.name.clone(), routine.clone());
        }
    }
    for jar in schema.jars.values() {
        if selector.pick_jar(jar) {
            filtered.jars.insert(jar.name.clone(), jar.clone());
        }
    }
    filtered
}

/// Accumulates blobs into a draft catalog.
#[derive(Debug, Default)]
pub struct AisLoader {
    draft: Ais,
}

impl AisLoader {
    pub fn new() -> Self {
        Self { draft: Ais::new() }
    }

    /// Decodes every frame in `bytes` and merges the schema records into the
    /// draft. Blobs for the same schema union their entries, so load order
    /// does not matter.
    pub fn load_blob(&mut self, bytes: &[u8]) -> Result<(), AisdbError> {
        let mut pos = 0usize;
        while pos < bytes.len() {
            if pos + 4 > bytes.len() {
                return Err(AisdbError::Decode("truncated catalog blob frame".into()));
            }
            let frame_len = u32::from_be_bytes(
                bytes[pos..pos + 4]
                    .try_into()
                    .map_err(|_| AisdbError::Decode("truncated catalog blob frame".into()))?,
            ) as usize;
            pos += 4;
            if pos + frame_len + 4 > bytes.len() {
                return Err(AisdbError::Decode("truncated catalog blob frame".into()));
            }
            let payload = &bytes[pos..pos + frame_len];
            pos += frame_len;
            let stored_crc = u32::from_be_bytes(
                bytes[pos..pos + 4]
                    .try_into()
                    .map_err(|_| AisdbError::Decode("truncated catalog blob frame".into()))?,
            );
            pos += 4;
            if crc32c::crc32c(payload) != stored_crc {
                return Err(AisdbError::Decode("catalog blob corrupted".into()));
            }
            let record: SchemaRecord =
                rmp_serde::from_slice(payload).map_err(|e| AisdbError::Decode(e.to_string()))?;
            self.merge(record.schema)?;
        }
        Ok(())
    }

    fn merge(&mut self, incoming: Schema) -> Result<(), AisdbError> {
        if self.draft.schema(&incoming.name).is_none() {
            self.draft.put_schema(incoming)?;
            return Ok(());
        }
        let existing = self.draft.schema_mut(&incoming.name)?;
        for (name, table) in incoming.tables {
            existing.tables.insert(name, table);
        }
        for (name, sequence) in incoming.sequences {
            existing.sequences.insert(name, sequence);
        }
        for (name, routine) in incoming.routines {
            existing.routines.insert(name, routine);
        }
        for (name, jar) in incoming.jars {
            existing.jars.insert(name, jar);
        }
        Ok(())
    }

    /// Resolves cross-schema references and yields the draft. References are
    /// by name, so resolution is a lookup check; a dangling reference here
    /// means the stored blobs disagree with each other.
    pub fn finalize(self) -> Result<Ais, AisdbError> {
        use crate::ais::ConstraintKind;
        for table in self.draft.user_tables() {
            for constraint in &table.constraints {
                if let ConstraintKind::ForeignKey { references, .. } = &constraint.kind {
                    if self.draft.table(references).is_none() {
                        return Err(AisdbError::Decode(format!(
                            "loaded catalog references missing table {references}"
                        )));
                    }
                }
            }
        }
        Ok(self.draft)
    }
}
