//! Mark-sweep garbage collector
//!
//! ## Design
//!
//! - **Precise roots**: the root set is the explicit [`Roots`] structure that
//!   generated code maintains; no stack scanning
//! - **Type-directed marking**: child pointers are found through the
//!   [`TraceTable`] entry for each object's tag
//! - **Mark bit in the header**: an object is traced at most once per cycle,
//!   which bounds marking on cyclic graphs
//! - **Sweep delegated**: reclamation is the heap's address-ordered sweep
//! - **Collect on exhaustion**: a failed allocation collects once and retries
//!   once before reporting out-of-memory

use std::collections::VecDeque;
use std::time::Instant;

use crate::allocator::MarkableAllocator;
use crate::error::{GcError, GcResult};
use crate::heap::{CollectionTrigger, GcConfig};
use crate::object::{Pointer, Tag};
use crate::roots::Roots;
use crate::trace::TraceTable;

/// Garbage collector
pub struct Collector<A> {
    heap: A,
    roots: Roots,
    trace: TraceTable,
    config: GcConfig,
    /// Gray worklist
    worklist: VecDeque<Pointer>,
    /// Statistics
    stats: GcStats,
}

/// GC statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Number of collections
    pub collections: u64,
    /// Successful tagged allocations
    pub allocations: u64,
    /// Total time spent in GC (nanoseconds)
    pub total_time_ns: u64,
    /// Duration of the last collection (nanoseconds)
    pub last_pause_ns: u64,
    /// Objects marked in last collection
    pub last_marked: usize,
    /// Blocks freed in last collection
    pub last_freed: usize,
    /// Bytes reclaimed in last collection
    pub last_reclaimed: u32,
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Objects reached from the roots
    pub marked: usize,
    /// Blocks freed by the sweep
    pub freed_blocks: usize,
    /// Bytes freed by the sweep
    pub freed_bytes: u32,
    /// Blocks still allocated after the sweep
    pub live_blocks: usize,
}

impl<A: MarkableAllocator> Collector<A> {
    /// Collector over `heap` with the built-in trace table
    pub fn new(heap: A) -> Self {
        Self::with_trace_table(heap, TraceTable::default())
    }

    /// Collector over `heap` using `trace` to find child pointers
    pub fn with_trace_table(heap: A, trace: TraceTable) -> Self {
        Self::with_config(heap, trace, GcConfig::default())
    }

    /// Collector with a custom configuration
    pub fn with_config(heap: A, trace: TraceTable, config: GcConfig) -> Self {
        Self {
            heap,
            roots: Roots::new(),
            trace,
            config,
            worklist: VecDeque::new(),
            stats: GcStats::default(),
        }
    }

    /// Allocate a `size`-byte object tagged `tag`.
    ///
    /// On exhaustion, runs one collection and retries once (unless the
    /// trigger is [`CollectionTrigger::Manual`]). While a temporary scope is
    /// open, the new object is registered in it.
    pub fn gcalloc(&mut self, tag: Tag, size: u32) -> GcResult<Pointer> {
        let mut ptr = self.heap.gcalloc(tag, size)?;

        if ptr.is_null() && self.config.trigger == CollectionTrigger::RetryOnExhaustion {
            #[cfg(feature = "gc_logging")]
            tracing::debug!(target: "choco::gc", size, %tag, "allocation failed, collecting");
            self.collect()?;
            ptr = self.heap.gcalloc(tag, size)?;
        }

        if ptr.is_null() {
            #[cfg(feature = "gc_logging")]
            tracing::warn!(
                target: "choco::gc",
                size,
                %tag,
                used_bytes = self.heap.stats().used_bytes,
                "out of memory"
            );
            return Err(GcError::OutOfMemory { requested: size });
        }

        self.roots.push_temp(ptr);
        self.stats.allocations += 1;
        Ok(ptr)
    }

    /// Run a full mark/sweep cycle
    pub fn collect(&mut self) -> GcResult<CollectStats> {
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "choco::gc",
            frames = self.roots.depth(),
            temps = self.roots.temp_count(),
            live_blocks = self.heap.stats().allocated_blocks,
            "GC cycle starting"
        );

        // Phase 1: Mark
        let marked = self.mark()?;

        // Phase 2: Sweep
        let sweep = self.heap.sweep()?;

        let elapsed = start.elapsed();
        let elapsed_nanos = elapsed.as_nanos() as u64;

        self.stats.collections += 1;
        self.stats.total_time_ns += elapsed_nanos;
        self.stats.last_pause_ns = elapsed_nanos;
        self.stats.last_marked = marked;
        self.stats.last_freed = sweep.freed_blocks;
        self.stats.last_reclaimed = sweep.freed_bytes;

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "choco::gc",
            collection = self.stats.collections,
            marked,
            freed_blocks = sweep.freed_blocks,
            reclaimed_bytes = sweep.freed_bytes,
            live_blocks = sweep.live_blocks,
            pause_us = elapsed.as_micros() as u64,
            "GC cycle complete"
        );

        Ok(CollectStats {
            marked,
            freed_blocks: sweep.freed_blocks,
            freed_bytes: sweep.freed_bytes,
            live_blocks: sweep.live_blocks,
        })
    }

    /// Mark phase: set the mark bit on everything reachable from the roots.
    ///
    /// Returns the number of objects marked. An error leaves marks behind;
    /// the heap must not be used afterwards.
    fn mark(&mut self) -> GcResult<usize> {
        self.worklist.clear();

        for root in self.roots.live_roots() {
            if root.is_null() {
                continue;
            }
            if !self.heap.owns(root) {
                return Err(GcError::DanglingRoot(root));
            }
            self.worklist.push_back(root);
        }

        let mut marked = 0;
        while let Some(ptr) = self.worklist.pop_front() {
            let mut header = self.heap.header(ptr)?;
            if header.is_marked() {
                continue;
            }
            header.mark();
            self.heap.set_header(ptr, header)?;
            marked += 1;

            let heap = &self.heap;
            let worklist = &mut self.worklist;
            let mut failure = None;
            let payload = heap.payload(ptr)?;
            self.trace
                .trace(header.tag(), payload, &mut |child| {
                    if child.is_null() || failure.is_some() {
                        return;
                    }
                    if !heap.owns(child) {
                        failure = Some(GcError::DanglingReference { parent: ptr, child });
                        return;
                    }
                    // Already-marked children are not re-enqueued.
                    match heap.header(child) {
                        Ok(h) if !h.is_marked() => worklist.push_back(child),
                        Ok(_) => {}
                        Err(err) => failure = Some(err),
                    }
                })
                .map_err(|source| GcError::MalformedObject {
                    ptr,
                    tag: header.tag(),
                    source,
                })?;

            if let Some(err) = failure {
                return Err(err);
            }
        }

        Ok(marked)
    }

    /// Root set
    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    /// Root set, for the frame and temporary-scope protocol
    pub fn roots_mut(&mut self) -> &mut Roots {
        &mut self.roots
    }

    /// Managed heap
    pub fn heap(&self) -> &A {
        &self.heap
    }

    /// Managed heap, mutably (for writing payloads)
    pub fn heap_mut(&mut self) -> &mut A {
        &mut self.heap
    }

    /// Give the heap back
    pub fn into_heap(self) -> A {
        self.heap
    }

    /// Trace table in use
    pub fn trace_table(&self) -> &TraceTable {
        &self.trace
    }

    /// Configuration
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{HeapConfig, Memory};
    use crate::marked_block::BlockAllocator;

    type TestHeap = BlockAllocator<Vec<u8>>;

    fn collector() -> Collector<TestHeap> {
        let config = HeapConfig::new(100, 200).with_block_size(4);
        Collector::new(BlockAllocator::new(vec![0u8; 512], config).unwrap())
    }

    fn write(gc: &mut Collector<TestHeap>, ptr: Pointer, index: u32, value: u32) {
        gc.heap_mut()
            .memory_mut()
            .store_u32(ptr.addr() + 4 * index, value)
            .unwrap();
    }

    #[test]
    fn test_collector_creation() {
        let gc = collector();
        assert_eq!(gc.stats().collections, 0);
        assert_eq!(gc.roots().depth(), 0);
    }

    #[test]
    fn test_collect_empty() {
        let mut gc = collector();
        let stats = gc.collect().unwrap();
        assert_eq!(stats, CollectStats::default());
        assert_eq!(gc.stats().collections, 1);
    }

    #[test]
    fn test_unrooted_objects_are_collected() {
        let mut gc = collector();
        let ptr = gc.gcalloc(Tag::STRING, 8).unwrap();
        let stats = gc.collect().unwrap();
        assert_eq!(stats.freed_blocks, 1);
        assert_eq!(stats.freed_bytes, 8);
        assert!(!gc.heap().owns(ptr));
    }

    #[test]
    fn test_mark_follows_ref_chain() {
        let mut gc = collector();
        gc.roots_mut().push_frame();

        let target = gc.gcalloc(Tag::STRING, 4).unwrap();
        gc.roots_mut().add_local(0, target).unwrap();
        let cell = gc.gcalloc(Tag::REF, 4).unwrap();
        write(&mut gc, cell, 0, target.addr());
        gc.roots_mut().add_local(0, cell).unwrap();

        let stats = gc.collect().unwrap();
        assert_eq!(stats.marked, 2);
        assert_eq!(stats.freed_blocks, 0);
        assert!(gc.heap().owns(target));
    }

    #[test]
    fn test_cycles_are_marked_once() {
        let mut gc = collector();
        gc.roots_mut().push_frame();

        let a = gc.gcalloc(Tag::REF, 4).unwrap();
        gc.roots_mut().add_local(0, a).unwrap();
        let b = gc.gcalloc(Tag::REF, 4).unwrap();
        write(&mut gc, a, 0, b.addr());
        write(&mut gc, b, 0, a.addr());
        gc.roots_mut().add_local(1, b).unwrap();

        let stats = gc.collect().unwrap();
        assert_eq!(stats.marked, 2);
        assert_eq!(stats.live_blocks, 2);

        // Unreachable cycle goes away.
        gc.roots_mut().clear_locals().unwrap();
        let stats = gc.collect().unwrap();
        assert_eq!(stats.marked, 0);
        assert_eq!(stats.freed_blocks, 2);
    }

    #[test]
    fn test_dangling_root_is_fatal() {
        let mut gc = collector();
        gc.roots_mut().push_frame();
        gc.roots_mut().add_local(0, Pointer::new(104)).unwrap();
        assert!(matches!(gc.collect(), Err(GcError::DanglingRoot(_))));
    }

    #[test]
    fn test_dangling_child_is_fatal() {
        let mut gc = collector();
        gc.roots_mut().push_frame();
        let cell = gc.gcalloc(Tag::REF, 4).unwrap();
        gc.roots_mut().add_local(0, cell).unwrap();
        write(&mut gc, cell, 0, 160);

        assert!(matches!(
            gc.collect(),
            Err(GcError::DanglingReference { child, .. }) if child.addr() == 160
        ));
    }

    #[test]
    fn test_malformed_payload_is_fatal() {
        let mut gc = collector();
        gc.roots_mut().push_frame();
        let list = gc.gcalloc(Tag::LIST, 8).unwrap();
        gc.roots_mut().add_local(0, list).unwrap();
        write(&mut gc, list, 0, 5);

        assert!(matches!(
            gc.collect(),
            Err(GcError::MalformedObject { tag: Tag::LIST, .. })
        ));
    }

    #[test]
    fn test_exhaustion_collects_and_retries() {
        let mut gc = collector();
        for _ in 0..25 {
            gc.gcalloc(Tag::OPAQUE, 4).unwrap();
        }
        assert_eq!(gc.stats().collections, 0);

        // Region full of garbage: the next allocation collects first.
        let ptr = gc.gcalloc(Tag::OPAQUE, 4).unwrap();
        assert_eq!(ptr.addr(), 100);
        assert_eq!(gc.stats().collections, 1);
        assert_eq!(gc.stats().last_freed, 25);
    }

    #[test]
    fn test_out_of_memory_after_one_retry() {
        let mut gc = collector();
        gc.roots_mut().push_frame();
        let ptr = gc.gcalloc(Tag::OPAQUE, 96).unwrap();
        gc.roots_mut().add_local(0, ptr).unwrap();

        assert!(matches!(
            gc.gcalloc(Tag::OPAQUE, 8),
            Err(GcError::OutOfMemory { requested: 8 })
        ));
        assert_eq!(gc.stats().collections, 1);
        assert!(gc.heap().owns(ptr));
    }

    #[test]
    fn test_manual_trigger_never_collects() {
        let config = HeapConfig::new(100, 200).with_block_size(4);
        let heap = BlockAllocator::new(vec![0u8; 512], config).unwrap();
        let gc_config = GcConfig {
            trigger: CollectionTrigger::Manual,
        };
        let mut gc = Collector::with_config(heap, TraceTable::default(), gc_config);

        gc.gcalloc(Tag::OPAQUE, 100).unwrap();
        assert!(matches!(
            gc.gcalloc(Tag::OPAQUE, 4),
            Err(GcError::OutOfMemory { .. })
        ));
        assert_eq!(gc.stats().collections, 0);

        gc.collect().unwrap();
        assert!(gc.gcalloc(Tag::OPAQUE, 4).is_ok());
    }

    #[test]
    fn test_allocations_register_in_open_temp_scope() {
        let mut gc = collector();
        let outside = gc.gcalloc(Tag::STRING, 4).unwrap();
        assert_eq!(gc.roots().temp_count(), 0);

        gc.roots_mut().capture_temps();
        let inside = gc.gcalloc(Tag::STRING, 4).unwrap();
        assert_eq!(gc.roots().temp_count(), 1);

        gc.collect().unwrap();
        assert!(!gc.heap().owns(outside));
        assert!(gc.heap().owns(inside));
        assert_eq!(gc.stats().allocations, 2);
    }
}
