//! MSB-first bit reader over a byte slice

use crate::error::{CodecError, Result};

/// Reads fixed-width fields left to right, most significant bit first.
///
/// Every read is bounds checked; running past the end of the buffer is
/// reported as [`CodecError::MalformedConfig`].
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute bit offset of the next read
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader positioned at the first bit of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bits left to read
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.position
    }

    /// Current bit offset
    pub fn position(&self) -> usize {
        self.position
    }

    /// Read up to 32 bits as an unsigned integer
    pub fn read_bits(&mut self, count: u32) -> Result<u32> {
        debug_assert!(count <= 32);
        Ok(self.read_bits_u64(count)? as u32)
    }

    /// Read up to 64 bits as an unsigned integer
    pub fn read_bits_u64(&mut self, count: u32) -> Result<u64> {
        debug_assert!(count <= 64);
        let count = count as usize;
        if count > self.remaining_bits() {
            return Err(CodecError::malformed_config(format!(
                "read of {} bits at bit {} overruns {} byte buffer",
                count,
                self.position,
                self.data.len()
            )));
        }

        let mut value = 0u64;
        for _ in 0..count {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - (self.position % 8))) & 1;
            value = (value << 1) | u64::from(bit);
            self.position += 1;
        }
        Ok(value)
    }

    /// Read a single bit as a flag
    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Read an 8-bit field
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Read a 16-bit field
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    /// Skip `count` bits (reserved fields)
    pub fn skip_bits(&mut self, count: u32) -> Result<()> {
        self.read_bits_u64(count).map(|_| ())
    }

    /// Read `len` whole bytes; the reader must be byte aligned
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if self.position % 8 != 0 {
            return Err(CodecError::malformed_config(format!(
                "byte read at unaligned bit offset {}",
                self.position
            )));
        }
        let start = self.position / 8;
        let end = start + len;
        if end > self.data.len() {
            return Err(CodecError::malformed_config(format!(
                "NAL unit of {} bytes at offset {} overruns {} byte buffer",
                len,
                start,
                self.data.len()
            )));
        }
        self.position = end * 8;
        Ok(self.data[start..end].to_vec())
    }
}
