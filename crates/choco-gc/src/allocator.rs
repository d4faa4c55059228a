//! Markable allocator contract

use crate::error::{GcError, GcResult};
use crate::heap::Memory;
use crate::marked_block::{BlockAllocator, HeapStats, SweepStats};
use crate::object::{Header, MAX_PAYLOAD_SIZE, Pointer, Tag};

/// What the collector needs from a heap.
///
/// Any backing store that can hand out tagged blocks, expose their headers and
/// payloads, and sweep in address order can serve as the collector's heap.
/// Wrappers such as [`CheckedAllocator`](crate::checked::CheckedAllocator)
/// layer extra checks on top of a real heap without duplicating its logic.
pub trait MarkableAllocator {
    /// Allocate a `size`-byte payload tagged `tag`.
    ///
    /// The header is written allocated and unmarked, and the payload is
    /// zeroed. Returns [`Pointer::NULL`] when the heap is exhausted; this
    /// never collects.
    fn gcalloc(&mut self, tag: Tag, size: u32) -> GcResult<Pointer>;

    /// Header of the block at `ptr`
    fn header(&self, ptr: Pointer) -> GcResult<Header>;

    /// Overwrite the header of the allocated block at `ptr`
    fn set_header(&mut self, ptr: Pointer, header: Header) -> GcResult<()>;

    /// Payload bytes of the allocated block at `ptr`
    fn payload(&self, ptr: Pointer) -> GcResult<&[u8]>;

    /// Free allocated, unmarked blocks and clear the mark on the rest
    fn sweep(&mut self) -> GcResult<SweepStats>;

    /// Whether `ptr` is an allocated block of this heap
    fn owns(&self, ptr: Pointer) -> bool;

    /// Usage snapshot
    fn stats(&self) -> HeapStats;
}

impl<M: Memory> MarkableAllocator for BlockAllocator<M> {
    fn gcalloc(&mut self, tag: Tag, size: u32) -> GcResult<Pointer> {
        if size > MAX_PAYLOAD_SIZE {
            return Err(GcError::PayloadTooLarge(size));
        }
        let Some(block) = self.alloc(size)? else {
            return Ok(Pointer::NULL);
        };
        self.set_header(block.ptr, Header::new(tag, size))?;
        self.clear_payload(block.ptr, size)?;
        Ok(block.ptr)
    }

    fn header(&self, ptr: Pointer) -> GcResult<Header> {
        BlockAllocator::header(self, ptr)
    }

    fn set_header(&mut self, ptr: Pointer, header: Header) -> GcResult<()> {
        BlockAllocator::set_header(self, ptr, header)
    }

    fn payload(&self, ptr: Pointer) -> GcResult<&[u8]> {
        BlockAllocator::payload(self, ptr)
    }

    fn sweep(&mut self) -> GcResult<SweepStats> {
        BlockAllocator::sweep(self)
    }

    fn owns(&self, ptr: Pointer) -> bool {
        BlockAllocator::owns(self, ptr)
    }

    fn stats(&self) -> HeapStats {
        BlockAllocator::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn heap() -> BlockAllocator<Vec<u8>> {
        let config = HeapConfig::new(100, 200).with_block_size(4);
        BlockAllocator::new(vec![0u8; 512], config).unwrap()
    }

    #[test]
    fn test_gcalloc_writes_tagged_header() {
        let mut heap = heap();
        let ptr = heap.gcalloc(Tag::LIST, 12).unwrap();
        assert_eq!(ptr.addr(), 100);

        let header = MarkableAllocator::header(&heap, ptr).unwrap();
        assert!(header.is_alloced());
        assert!(!header.is_marked());
        assert_eq!(header.tag(), Tag::LIST);
        assert_eq!(header.size(), 12);
    }

    #[test]
    fn test_gcalloc_zeroes_reused_payload() {
        let mut heap = heap();
        let ptr = heap.gcalloc(Tag::STRING, 8).unwrap();
        heap.memory_mut().store_u32(ptr.addr(), 0xdead_beef).unwrap();
        heap.memory_mut().store_u32(ptr.addr() + 4, 0xdead_beef).unwrap();
        heap.free(ptr).unwrap();

        let again = heap.gcalloc(Tag::REF, 8).unwrap();
        assert_eq!(again, ptr);
        assert_eq!(MarkableAllocator::payload(&heap, again).unwrap(), &[0; 8]);
    }

    #[test]
    fn test_gcalloc_exhaustion_returns_null() {
        let mut heap = heap();
        assert!(!heap.gcalloc(Tag::OPAQUE, 96).unwrap().is_null());
        assert!(heap.gcalloc(Tag::OPAQUE, 8).unwrap().is_null());
        assert!(!heap.gcalloc(Tag::OPAQUE, 4).unwrap().is_null());
    }

    #[test]
    fn test_gcalloc_rejects_oversized_payload() {
        let mut heap = heap();
        assert!(matches!(
            heap.gcalloc(Tag::BIGINT, MAX_PAYLOAD_SIZE + 1),
            Err(GcError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_sweep_through_trait() {
        let mut heap = heap();
        let ptr = heap.gcalloc(Tag::CLASS, 4).unwrap();
        let stats = MarkableAllocator::sweep(&mut heap).unwrap();
        assert_eq!(stats.freed_blocks, 1);
        assert!(!MarkableAllocator::owns(&heap, ptr));
        assert_eq!(MarkableAllocator::stats(&heap).allocated_blocks, 0);
    }
}
