//! Heap configuration and backing memory

use crate::error::{GcError, GcResult};
use crate::object::HEADER_SIZE_BYTES;

/// Layout of the managed region inside the backing memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// First payload address of the region (must be non-zero)
    pub start: u32,
    /// One past the last payload address
    pub end: u32,
    /// Allocation granule in bytes
    pub block_size: u32,
    /// Address of the header side table. `None` places it at `end`.
    pub header_table: Option<u32>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            start: 1024,
            end: 1024 + 256 * 1024, // 256KB region
            block_size: 8,
            header_table: None,
        }
    }
}

impl HeapConfig {
    /// Region `[start, end)` with the default granule
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            ..Self::default()
        }
    }

    /// Set the allocation granule
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Place the header side table at `addr`
    pub fn with_header_table(mut self, addr: u32) -> Self {
        self.header_table = Some(addr);
        self
    }

    /// Number of granules in the region
    pub fn block_count(&self) -> u32 {
        (self.end - self.start) / self.block_size
    }

    /// Start of the header side table
    pub fn header_table_start(&self) -> u32 {
        self.header_table.unwrap_or(self.end)
    }

    /// Bytes occupied by the header side table
    pub fn header_table_len(&self) -> u64 {
        self.block_count() as u64 * HEADER_SIZE_BYTES as u64
    }

    /// Check the layout against a memory of `memory_len` bytes.
    pub fn validate(&self, memory_len: usize) -> GcResult<()> {
        let invalid = |msg: String| Err(GcError::InvalidConfig(msg));

        if self.start == 0 {
            return invalid("region must not start at address 0".into());
        }
        if self.end <= self.start {
            return invalid(format!("empty region [{}, {})", self.start, self.end));
        }
        if self.block_size == 0 || self.block_size % HEADER_SIZE_BYTES != 0 {
            return invalid(format!(
                "block size {} is not a non-zero multiple of {HEADER_SIZE_BYTES}",
                self.block_size
            ));
        }
        if self.start % HEADER_SIZE_BYTES != 0 {
            return invalid(format!("region start {} is not word-aligned", self.start));
        }
        if (self.end - self.start) % self.block_size != 0 {
            return invalid(format!(
                "region length {} is not a multiple of block size {}",
                self.end - self.start,
                self.block_size
            ));
        }

        let memory_len = memory_len as u64;
        if self.end as u64 > memory_len {
            return invalid(format!(
                "region end {} exceeds memory of {memory_len} bytes",
                self.end
            ));
        }

        let table_start = self.header_table_start() as u64;
        let table_end = table_start + self.header_table_len();
        if table_start % HEADER_SIZE_BYTES as u64 != 0 {
            return invalid(format!("header table {table_start} is not word-aligned"));
        }
        if table_end > memory_len {
            return invalid(format!(
                "header table [{table_start}, {table_end}) exceeds memory of {memory_len} bytes"
            ));
        }
        if table_start < self.end as u64 && (self.start as u64) < table_end {
            return invalid(format!(
                "header table [{table_start}, {table_end}) overlaps region [{}, {})",
                self.start, self.end
            ));
        }
        Ok(())
    }
}

/// When the collector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionTrigger {
    /// Collect once when an allocation fails, then retry it
    #[default]
    RetryOnExhaustion,
    /// Only collect on explicit request; exhaustion is immediately fatal
    Manual,
}

/// Collector configuration
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// Collection trigger policy
    pub trigger: CollectionTrigger,
}

/// Byte-addressable memory with 32-bit little-endian word access.
///
/// The heap never resizes its memory; it is handed a buffer of fixed size.
pub trait Memory {
    /// Whole memory as bytes
    fn bytes(&self) -> &[u8];

    /// Whole memory as mutable bytes
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Memory size in bytes
    fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Whether the memory has no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `len` bytes starting at `addr`
    fn slice(&self, addr: u32, len: u32) -> GcResult<&[u8]> {
        let start = addr as usize;
        let end = start + len as usize;
        self.bytes()
            .get(start..end)
            .ok_or(GcError::OutOfBounds { addr, len })
    }

    /// Read a little-endian word
    fn load_u32(&self, addr: u32) -> GcResult<u32> {
        let bytes = self.slice(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a little-endian word
    fn store_u32(&mut self, addr: u32, value: u32) -> GcResult<()> {
        let start = addr as usize;
        let slot = self
            .bytes_mut()
            .get_mut(start..start + 4)
            .ok_or(GcError::OutOfBounds { addr, len: 4 })?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Zero `len` bytes starting at `addr`
    fn zero(&mut self, addr: u32, len: u32) -> GcResult<()> {
        let start = addr as usize;
        let region = self
            .bytes_mut()
            .get_mut(start..start + len as usize)
            .ok_or(GcError::OutOfBounds { addr, len })?;
        region.fill(0);
        Ok(())
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Memory for T {
    #[inline]
    fn bytes(&self) -> &[u8] {
        self.as_ref()
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.as_mut()
    }
}
