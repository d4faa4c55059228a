//! Block-based allocation over a fixed region.
//!
//! The region `[start, end)` is carved into granules of `block_size` bytes.
//! A block is a run of granules that is either free or allocated; blocks are
//! kept in address order and never overlap. Address space past `frontier` has
//! never been handed out and belongs to no block yet.
//!
//! ## Layout
//!
//! ```text
//! backing memory:
//! ┌──────────────────────────────────────┬──────────────────────────┐
//! │ region [start, end)                  │ header table             │
//! │ [blk 0][blk 1 ....][blk 2] ...       │ [h 0][h 1][h 2] ...      │
//! └──────────────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Each granule owns one header word in the side table, so the address handed
//! out for a block is the first payload byte. Only the header of a block's
//! first granule is meaningful.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{GcError, GcResult};
use crate::heap::{HeapConfig, Memory};
use crate::object::{HEADER_SIZE_BYTES, Header, MAX_PAYLOAD_SIZE, Pointer, Tag};

/// A block handed out by [`BlockAllocator::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// First payload byte
    pub ptr: Pointer,
    /// Footprint in bytes (rounded up to whole granules)
    pub size: u32,
}

/// Allocator usage snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Size of the region in bytes
    pub total_bytes: u32,
    /// Bytes held by allocated blocks
    pub used_bytes: u32,
    /// Bytes held by free blocks
    pub free_bytes: u32,
    /// Bytes never handed out
    pub untouched_bytes: u32,
    /// Number of allocated blocks
    pub allocated_blocks: usize,
    /// Number of free blocks
    pub free_blocks: usize,
}

/// Result of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Blocks released
    pub freed_blocks: usize,
    /// Bytes released (block footprints)
    pub freed_bytes: u32,
    /// Blocks that survived
    pub live_blocks: usize,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    len: u32,
    used: bool,
}

/// First-fit block allocator over a fixed address range.
pub struct BlockAllocator<M> {
    memory: M,
    config: HeapConfig,
    header_table: u32,
    /// Blocks keyed by start address, covering `[start, frontier)`
    spans: BTreeMap<u32, Span>,
    /// First address never handed out
    frontier: u32,
    used_bytes: u32,
    used_blocks: usize,
}

impl<M: Memory> BlockAllocator<M> {
    /// Create an allocator managing `config`'s region inside `memory`.
    ///
    /// The header table is zeroed, so every granule starts out free.
    pub fn new(mut memory: M, config: HeapConfig) -> GcResult<Self> {
        config.validate(memory.len())?;
        let header_table = config.header_table_start();
        memory.zero(header_table, config.header_table_len() as u32)?;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "choco::gc",
            start = config.start,
            end = config.end,
            block_size = config.block_size,
            header_table,
            "block allocator created"
        );

        Ok(Self {
            memory,
            frontier: config.start,
            header_table,
            config,
            spans: BTreeMap::new(),
            used_bytes: 0,
            used_blocks: 0,
        })
    }

    /// Round a payload size up to a block footprint.
    ///
    /// Zero-sized requests still take one granule so that every block has a
    /// distinct address.
    fn footprint(&self, size: u32) -> Option<u32> {
        let block_size = self.config.block_size;
        size.max(1).checked_next_multiple_of(block_size)
    }

    /// Allocate a block for a `size`-byte payload.
    ///
    /// Returns `Ok(None)` when no run of free space is large enough. The
    /// block's header is written as allocated with no tag.
    pub fn alloc(&mut self, size: u32) -> GcResult<Option<BlockDescriptor>> {
        if size > MAX_PAYLOAD_SIZE {
            return Ok(None);
        }
        let Some(need) = self.footprint(size) else {
            return Ok(None);
        };

        let Some(addr) = self.find_fit(need) else {
            #[cfg(feature = "gc_logging")]
            tracing::trace!(target: "choco::gc", size, need, "no free run large enough");
            return Ok(None);
        };
        self.claim(addr, need);
        self.store_header(addr, Header::new(Tag::NONE, size))?;

        #[cfg(feature = "gc_logging")]
        tracing::trace!(target: "choco::gc", addr, size, footprint = need, "block allocated");
        Ok(Some(BlockDescriptor {
            ptr: Pointer::new(addr),
            size: need,
        }))
    }

    /// Lowest address at which `need` bytes are available.
    fn find_fit(&self, need: u32) -> Option<u32> {
        let wilderness = self.config.end - self.frontier;
        for (&addr, span) in &self.spans {
            if span.used {
                continue;
            }
            // A trailing free block can grow into untouched space.
            let available = if addr + span.len == self.frontier {
                span.len + wilderness
            } else {
                span.len
            };
            if available >= need {
                return Some(addr);
            }
        }
        (wilderness >= need).then_some(self.frontier)
    }

    /// Mark `[addr, addr + need)` used, splitting off any remainder.
    fn claim(&mut self, addr: u32, need: u32) {
        match self.spans.get_mut(&addr) {
            Some(span) if span.len >= need => {
                let remainder = span.len - need;
                *span = Span { len: need, used: true };
                if remainder > 0 {
                    self.spans.insert(
                        addr + need,
                        Span {
                            len: remainder,
                            used: false,
                        },
                    );
                }
            }
            Some(span) => {
                // Trailing free block extended into the wilderness.
                *span = Span { len: need, used: true };
                self.frontier = addr + need;
            }
            None => {
                self.spans.insert(addr, Span { len: need, used: true });
                self.frontier = addr + need;
            }
        }
        self.used_bytes += need;
        self.used_blocks += 1;
    }

    /// Release an allocated block, merging it with free neighbours.
    pub fn free(&mut self, ptr: Pointer) -> GcResult<()> {
        let addr = ptr.addr();
        let len = match self.spans.get_mut(&addr) {
            Some(span) if span.used => {
                span.used = false;
                span.len
            }
            _ => return Err(GcError::NotAllocated(ptr)),
        };

        let mut header = self.load_header(addr)?;
        header.free();
        self.store_header(addr, header)?;
        self.used_bytes -= len;
        self.used_blocks -= 1;

        self.coalesce(addr);
        #[cfg(feature = "gc_logging")]
        tracing::trace!(target: "choco::gc", addr, len, "block freed");
        Ok(())
    }

    /// Merge the free block at `addr` with its free neighbours.
    fn coalesce(&mut self, addr: u32) {
        let Some(mut len) = self.spans.get(&addr).map(|s| s.len) else {
            return;
        };

        let next = addr + len;
        if let Some(span) = self.spans.get(&next).copied() {
            if !span.used {
                self.spans.remove(&next);
                len += span.len;
                if let Some(current) = self.spans.get_mut(&addr) {
                    current.len = len;
                }
            }
        }

        let prev = self
            .spans
            .range(..addr)
            .next_back()
            .map(|(&prev_addr, span)| (prev_addr, *span));
        if let Some((prev_addr, span)) = prev {
            if !span.used && prev_addr + span.len == addr {
                self.spans.remove(&addr);
                if let Some(previous) = self.spans.get_mut(&prev_addr) {
                    previous.len += len;
                }
            }
        }
    }

    /// Whether `ptr` is the start of a block currently allocated.
    pub fn owns(&self, ptr: Pointer) -> bool {
        self.spans.get(&ptr.addr()).is_some_and(|span| span.used)
    }

    /// Whether `ptr` is a granule boundary inside the region.
    pub fn is_block_start(&self, ptr: Pointer) -> bool {
        let addr = ptr.addr();
        addr >= self.config.start
            && addr < self.config.end
            && (addr - self.config.start) % self.config.block_size == 0
    }

    /// Header stored for the block starting at `ptr`.
    ///
    /// Granule boundaries in free or untouched space are accepted; granules
    /// never handed out read as a free, untagged header. An address strictly
    /// inside an allocated block is not a block start.
    pub fn header(&self, ptr: Pointer) -> GcResult<Header> {
        if !self.is_block_start(ptr) || self.is_inside_used(ptr.addr()) {
            return Err(GcError::NotABlock(ptr));
        }
        self.load_header(ptr.addr())
    }

    fn is_inside_used(&self, addr: u32) -> bool {
        self.spans
            .range(..=addr)
            .next_back()
            .is_some_and(|(&start, span)| span.used && start < addr && addr < start + span.len)
    }

    /// Overwrite the header of an allocated block.
    ///
    /// The new header must still be allocated; blocks are released through
    /// [`free`](Self::free) or [`sweep`](Self::sweep) only.
    pub fn set_header(&mut self, ptr: Pointer, header: Header) -> GcResult<()> {
        if !self.owns(ptr) {
            return Err(GcError::NotAllocated(ptr));
        }
        if !header.is_alloced() {
            return Err(GcError::CorruptHeader {
                ptr,
                reason: "header write clears the allocated bit",
            });
        }
        self.store_header(ptr.addr(), header)
    }

    /// Payload bytes of an allocated block, as long as its header says.
    pub fn payload(&self, ptr: Pointer) -> GcResult<&[u8]> {
        if !self.owns(ptr) {
            return Err(GcError::NotAllocated(ptr));
        }
        let size = self.load_header(ptr.addr())?.size();
        self.memory.slice(ptr.addr(), size)
    }

    /// Zero the first `len` payload bytes of an allocated block.
    pub fn clear_payload(&mut self, ptr: Pointer, len: u32) -> GcResult<()> {
        if !self.owns(ptr) {
            return Err(GcError::NotAllocated(ptr));
        }
        self.memory.zero(ptr.addr(), len)
    }

    /// Free every allocated, unmarked block and unmark the rest.
    ///
    /// Blocks are visited in address order. Free blocks and untouched space
    /// are left alone. An allocated block whose header reads as free is
    /// reported as corrupt.
    pub fn sweep(&mut self) -> GcResult<SweepStats> {
        let allocated: Vec<(u32, u32)> = self
            .spans
            .iter()
            .filter(|(_, span)| span.used)
            .map(|(&addr, span)| (addr, span.len))
            .collect();

        let mut stats = SweepStats::default();
        for (addr, len) in allocated {
            let mut header = self.load_header(addr)?;
            if !header.is_alloced() {
                return Err(GcError::CorruptHeader {
                    ptr: Pointer::new(addr),
                    reason: "allocated block has a free header",
                });
            }
            if header.is_marked() {
                header.unmark();
                self.store_header(addr, header)?;
                stats.live_blocks += 1;
            } else {
                self.free(Pointer::new(addr))?;
                stats.freed_blocks += 1;
                stats.freed_bytes += len;
            }
        }
        Ok(stats)
    }

    /// Usage snapshot
    pub fn stats(&self) -> HeapStats {
        let free_blocks = self.spans.values().filter(|s| !s.used).count();
        let free_bytes = self
            .spans
            .values()
            .filter(|s| !s.used)
            .map(|s| s.len)
            .sum();
        HeapStats {
            total_bytes: self.config.end - self.config.start,
            used_bytes: self.used_bytes,
            free_bytes,
            untouched_bytes: self.config.end - self.frontier,
            allocated_blocks: self.used_blocks,
            free_blocks,
        }
    }

    /// Region layout
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Backing memory
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Backing memory, mutably. Callers must not write the header table.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Give the backing memory back
    pub fn into_memory(self) -> M {
        self.memory
    }

    #[inline]
    fn header_addr(&self, addr: u32) -> u32 {
        let index = (addr - self.config.start) / self.config.block_size;
        self.header_table + index * HEADER_SIZE_BYTES
    }

    fn load_header(&self, addr: u32) -> GcResult<Header> {
        self.memory
            .load_u32(self.header_addr(addr))
            .map(Header::from_bits)
    }

    fn store_header(&mut self, addr: u32, header: Header) -> GcResult<()> {
        let at = self.header_addr(addr);
        self.memory.store_u32(at, header.bits())
    }
}

impl<M> fmt::Debug for BlockAllocator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockAllocator([{}, {}) x{}: ",
            self.config.start, self.config.end, self.config.block_size
        )?;
        for (addr, span) in &self.spans {
            let state = if span.used { "USED" } else { "FREE" };
            write!(f, "{state}[{addr}+{}] ", span.len)?;
        }
        write!(f, "UNTOUCHED[{}+{}])", self.frontier, self.config.end - self.frontier)
    }
}
