//! Growable byte sink with a hard ceiling for serialized catalog blobs.

/// Overflow of the configured ceiling. Carries the cap so the caller can
/// report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOverflow {
    pub cap: usize,
}

/// Starts at a small capacity and doubles on demand, up to `cap`. Writing
/// past the cap fails; the buffer never silently truncates.
#[derive(Debug)]
pub struct GrowableBuffer {
    buf: Vec<u8>,
    capacity: usize,
    cap: usize,
}

impl GrowableBuffer {
    pub fn new(initial: usize, cap: usize) -> Self {
        let capacity = initial.min(cap).max(1);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The configured ceiling, as reported in overflow errors.
    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferOverflow> {
        let needed = self.buf.len() + bytes.len();
        if needed > self.cap {
            return Err(BufferOverflow { cap: self.cap });
        }
        while self.capacity < needed {
            self.capacity = self.capacity.saturating_mul(2).min(self.cap);
        }
        self.buf.reserve(self.capacity - self.buf.len());
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}
