//! Order-preserving tuple packing for persistent keys.
//!
//! Packed tuples compare bytewise in the same order as their elements compare
//! element-wise, so range scans over a packed prefix yield entries in tuple
//! order. Strings are tagged and NUL-terminated with interior NULs escaped;
//! signed integers are tagged and sign-biased big-endian.

use crate::error::AisdbError;
use smallvec::SmallVec;

const TAG_STRING: u8 = 0x02;
const TAG_I64: u8 = 0x15;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tuple {
    bytes: SmallVec<[u8; 64]>,
}

impl Tuple {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_strs(elements: &[&str]) -> Self {
        let mut tuple = Self::new();
        for element in elements {
            tuple.push_str(element);
        }
        tuple
    }

    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.bytes.push(TAG_STRING);
        for byte in value.as_bytes() {
            if *byte == 0 {
                // Escape interior NULs so the terminator remains unambiguous.
                self.bytes.extend_from_slice(&[0x00, 0xFF]);
            } else {
                self.bytes.push(*byte);
            }
        }
        self.bytes.push(0x00);
        self
    }

    pub fn push_i64(&mut self, value: i64) -> &mut Self {
        self.bytes.push(TAG_I64);
        let biased = (value as u64) ^ 0x8000_0000_0000_0000;
        self.bytes.extend_from_slice(&biased.to_be_bytes());
        self
    }

    pub fn pack(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

pub fn pack_i64(value: i64) -> Vec<u8> {
    let mut tuple = Tuple::new();
    tuple.push_i64(value);
    tuple.pack()
}

/// Decodes a packed single-element integer tuple, as stored under the
/// generation key.
pub fn unpack_i64(bytes: &[u8]) -> Result<i64, AisdbError> {
    if bytes.len() != 9 || bytes[0] != TAG_I64 {
        return Err(AisdbError::Decode(format!(
            "expected packed i64 tuple, got {} bytes",
            bytes.len()
        )));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[1..9]);
    let biased = u64::from_be_bytes(raw);
    Ok((biased ^ 0x8000_0000_0000_0000) as i64)
}

/// Decodes the packed string elements of a tuple, in order.
pub fn unpack_strs(bytes: &[u8]) -> Result<Vec<String>, AisdbError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        match bytes[pos] {
            TAG_STRING => {
                pos += 1;
                let mut raw = Vec::new();
                loop {
                    let Some(byte) = bytes.get(pos) else {
                        return Err(AisdbError::Decode("unterminated string element".into()));
                    };
                    pos += 1;
                    if *byte == 0x00 {
                        if bytes.get(pos) == Some(&0xFF) {
                            raw.push(0x00);
                            pos += 1;
                        } else {
                            break;
                        }
                    } else {
                        raw.push(*byte);
                    }
                }
                let element = String::from_utf8(raw)
                    .map_err(|e| AisdbError::Decode(format!("invalid utf8 in tuple: {e}")))?;
                out.push(element);
            }
            TAG_I64 => {
                if pos + 9 > bytes.len() {
                    return Err(AisdbError::Decode("truncated integer element".into()));
                }
                pos += 9;
            }
            other => {
                return Err(AisdbError::Decode(format!("unknown tuple tag {other:#04x}")));
            }
        }
    }
    Ok(out)
}
