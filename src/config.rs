/// Runtime configuration for a schema manager instance.
#[derive(Debug, Clone)]
pub struct AisdbConfig {
    /// Hard ceiling for one serialized schema blob. Zero means unlimited.
    pub max_ais_buffer_bytes: usize,
    /// Initial capacity of the blob buffer before any doubling.
    pub initial_ais_buffer_bytes: usize,
    /// First table id handed out by a fresh name generator.
    pub first_table_id: i32,
}

pub const DEFAULT_INITIAL_AIS_BUFFER_BYTES: usize = 4096;

impl Default for AisdbConfig {
    fn default() -> Self {
        Self {
            max_ais_buffer_bytes: 0,
            initial_ais_buffer_bytes: DEFAULT_INITIAL_AIS_BUFFER_BYTES,
            first_table_id: 1,
        }
    }
}

impl AisdbConfig {
    /// Profile with a bounded blob size, for deployments that cap value sizes
    /// at the store level.
    pub fn bounded(max_ais_buffer_bytes: usize) -> Self {
        Self {
            max_ais_buffer_bytes,
            ..Self::default()
        }
    }

    /// Effective buffer ceiling: the configured max, or `usize::MAX` when
    /// unlimited.
    pub fn ais_buffer_cap(&self) -> usize {
        if self.max_ais_buffer_bytes == 0 {
            usize::MAX
        } else {
            self.max_ais_buffer_bytes
        }
    }
}
