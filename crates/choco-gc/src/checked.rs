//! Invariant-checking allocator wrapper
//!
//! [`CheckedAllocator`] shadows every block the wrapped heap hands out and
//! cross-checks the heap's answers against that shadow copy. Any disagreement
//! means memory safety is already lost, so it is reported as an error instead
//! of being papered over.

use std::cell::Cell;

use rustc_hash::FxHashMap;

use crate::allocator::MarkableAllocator;
use crate::error::{GcError, GcResult};
use crate::marked_block::{HeapStats, SweepStats};
use crate::object::{Header, Pointer, Tag};

/// Shadow record of a block handed out by the wrapped heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shadow {
    tag: Tag,
    size: u32,
}

/// A [`MarkableAllocator`] that verifies the heap it wraps.
#[derive(Debug)]
pub struct CheckedAllocator<A> {
    inner: A,
    tracked: FxHashMap<Pointer, Shadow>,
    /// First ownership disagreement seen by `owns`, reported by every later call
    mismatch: Cell<Option<(Pointer, bool)>>,
}

impl<A: MarkableAllocator> CheckedAllocator<A> {
    /// Wrap `inner`, which must not have any live allocations yet
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            tracked: FxHashMap::default(),
            mismatch: Cell::new(None),
        }
    }

    /// Wrapped heap
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Wrapped heap, mutably, for writing payloads.
    ///
    /// Allocating or freeing through this reference bypasses the shadow and
    /// is reported by the next [`verify`](Self::verify).
    pub fn inner_mut(&mut self) -> &mut A {
        &mut self.inner
    }

    /// Unwrap
    pub fn into_inner(self) -> A {
        self.inner
    }

    /// Whether `ptr` was handed out and not yet swept
    pub fn is_tracked(&self, ptr: Pointer) -> bool {
        self.tracked.contains_key(&ptr)
    }

    /// Number of blocks believed live
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Check every shadowed block against the wrapped heap.
    pub fn verify(&self) -> GcResult<()> {
        self.check_mismatch()?;
        for (&ptr, shadow) in &self.tracked {
            if !self.inner.owns(ptr) {
                return Err(GcError::OwnershipMismatch {
                    ptr,
                    heap: false,
                    tracked: true,
                });
            }
            let header = self.inner.header(ptr)?;
            check_live(ptr, header, *shadow)?;
        }
        Ok(())
    }
}

impl<A> CheckedAllocator<A> {
    /// Report the ownership disagreement recorded by `owns`, if any.
    fn check_mismatch(&self) -> GcResult<()> {
        match self.mismatch.get() {
            Some((ptr, heap)) => Err(GcError::OwnershipMismatch {
                ptr,
                heap,
                tracked: !heap,
            }),
            None => Ok(()),
        }
    }
}

fn check_live(ptr: Pointer, header: Header, shadow: Shadow) -> GcResult<()> {
    if !header.is_alloced() {
        return Err(GcError::CorruptHeader {
            ptr,
            reason: "live block is not marked allocated",
        });
    }
    if header.is_marked() {
        return Err(GcError::CorruptHeader {
            ptr,
            reason: "mark bit survived a sweep",
        });
    }
    if header.tag() != shadow.tag || header.size() != shadow.size {
        return Err(GcError::CorruptHeader {
            ptr,
            reason: "tag or size changed after allocation",
        });
    }
    Ok(())
}

impl<A: MarkableAllocator> MarkableAllocator for CheckedAllocator<A> {
    fn gcalloc(&mut self, tag: Tag, size: u32) -> GcResult<Pointer> {
        self.check_mismatch()?;
        let ptr = self.inner.gcalloc(tag, size)?;
        if ptr.is_null() {
            #[cfg(feature = "gc_logging")]
            tracing::debug!(target: "choco::gc", size, %tag, "checked heap exhausted");
            return Ok(ptr);
        }
        if self.tracked.contains_key(&ptr) {
            return Err(GcError::OwnershipMismatch {
                ptr,
                heap: true,
                tracked: true,
            });
        }

        let header = self.inner.header(ptr)?;
        if !header.is_alloced() || header.is_marked() {
            return Err(GcError::CorruptHeader {
                ptr,
                reason: "fresh allocation is not allocated and unmarked",
            });
        }
        if header.tag() != tag || header.size() != size {
            return Err(GcError::CorruptHeader {
                ptr,
                reason: "fresh allocation has the wrong tag or size",
            });
        }
        self.tracked.insert(ptr, Shadow { tag, size });
        Ok(ptr)
    }

    fn header(&self, ptr: Pointer) -> GcResult<Header> {
        self.check_mismatch()?;
        let header = self.inner.header(ptr)?;
        let tracked = self.tracked.contains_key(&ptr);
        if header.is_alloced() != tracked {
            return Err(GcError::OwnershipMismatch {
                ptr,
                heap: header.is_alloced(),
                tracked,
            });
        }
        Ok(header)
    }

    fn set_header(&mut self, ptr: Pointer, header: Header) -> GcResult<()> {
        self.check_mismatch()?;
        let Some(shadow) = self.tracked.get(&ptr) else {
            return Err(GcError::NotAllocated(ptr));
        };
        if !header.is_alloced() || header.tag() != shadow.tag || header.size() != shadow.size {
            return Err(GcError::CorruptHeader {
                ptr,
                reason: "header write changes more than the mark bit",
            });
        }
        self.inner.set_header(ptr, header)
    }

    fn payload(&self, ptr: Pointer) -> GcResult<&[u8]> {
        self.check_mismatch()?;
        if !self.tracked.contains_key(&ptr) {
            return Err(GcError::NotAllocated(ptr));
        }
        self.inner.payload(ptr)
    }

    fn sweep(&mut self) -> GcResult<SweepStats> {
        self.check_mismatch()?;
        let stats = self.inner.sweep()?;

        let mut freed = 0;
        let mut survivors = FxHashMap::default();
        for (ptr, shadow) in self.tracked.drain() {
            if self.inner.owns(ptr) {
                survivors.insert(ptr, shadow);
                continue;
            }
            let header = self.inner.header(ptr)?;
            if header.is_alloced() || header.is_marked() {
                return Err(GcError::CorruptHeader {
                    ptr,
                    reason: "freed block still marked allocated or marked",
                });
            }
            freed += 1;
        }
        self.tracked = survivors;

        if freed != stats.freed_blocks {
            #[cfg(feature = "gc_logging")]
            tracing::error!(
                target: "choco::gc",
                reported = stats.freed_blocks,
                observed = freed,
                "sweep statistics disagree with shadow bookkeeping"
            );
        }
        self.verify()?;
        Ok(stats)
    }

    fn owns(&self, ptr: Pointer) -> bool {
        let heap = self.inner.owns(ptr);
        let tracked = self.tracked.contains_key(&ptr);
        if heap != tracked {
            #[cfg(feature = "gc_logging")]
            tracing::error!(target: "choco::gc", %ptr, heap, tracked, "ownership mismatch");
            if self.mismatch.get().is_none() {
                self.mismatch.set(Some((ptr, heap)));
            }
        }
        heap && tracked
    }

    fn stats(&self) -> HeapStats {
        self.inner.stats()
    }
}
