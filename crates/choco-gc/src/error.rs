//! GC errors

use crate::object::{Pointer, Tag};
use thiserror::Error;

/// Errors raised by the allocator, the root tracker and the collector.
///
/// Every variant except [`GcError::OutOfMemory`] indicates a bug in the code
/// that drives the heap (usually the code generator) rather than a runtime
/// condition; callers are expected to abort on them.
#[derive(Debug, Error)]
pub enum GcError {
    /// No block could be found even after a collection cycle
    #[error("out of memory: cannot allocate {requested} bytes")]
    OutOfMemory {
        /// Requested payload size in bytes
        requested: u32,
    },

    /// Payload size does not fit in a header
    #[error("payload of {0} bytes exceeds the maximum object size")]
    PayloadTooLarge(u32),

    /// Pointer is not the start of a block this heap currently has allocated
    #[error("pointer {0} is not an allocated block")]
    NotAllocated(Pointer),

    /// Address is outside the region or not aligned to a block boundary
    #[error("pointer {0} is not a block start in this heap")]
    NotABlock(Pointer),

    /// A root refers to memory the heap does not own
    #[error("root {0} does not refer to an allocated object")]
    DanglingRoot(Pointer),

    /// A traced object refers to memory the heap does not own
    #[error("object {parent} refers to unallocated address {child}")]
    DanglingReference {
        /// Object whose payload held the reference
        parent: Pointer,
        /// The offending child pointer
        child: Pointer,
    },

    /// Ownership bookkeeping disagrees between two layers
    #[error("ownership mismatch at {ptr}: heap={heap}, tracked={tracked}")]
    OwnershipMismatch {
        /// Pointer being queried
        ptr: Pointer,
        /// Whether the underlying heap claims ownership
        heap: bool,
        /// Whether the tracking layer claims ownership
        tracked: bool,
    },

    /// Header contents contradict the allocator's bookkeeping
    #[error("corrupt header at {ptr}: {reason}")]
    CorruptHeader {
        /// Block address
        ptr: Pointer,
        /// What was inconsistent
        reason: &'static str,
    },

    /// Payload could not be decoded for its tag
    #[error("malformed {tag} object at {ptr}: {source}")]
    MalformedObject {
        /// Object address
        ptr: Pointer,
        /// Tag read from the header
        tag: Tag,
        /// Decoding failure
        #[source]
        source: PayloadError,
    },

    /// `pop_frame` with no active frame
    #[error("pop_frame on an empty frame stack")]
    EmptyFrameStack,

    /// Local-variable operation with no active frame
    #[error("no active frame for local-variable access")]
    NoActiveFrame,

    /// `release_temps` without a matching `capture_temps`
    #[error("release_temps without a matching capture_temps")]
    UnbalancedTempRelease,

    /// Access outside the backing memory
    #[error("memory access out of bounds: {len} bytes at {addr}")]
    OutOfBounds {
        /// First byte address
        addr: u32,
        /// Access width in bytes
        len: u32,
    },

    /// Heap configuration rejected
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(String),
}

/// Failures decoding a payload into child pointers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Payload is shorter than its declared shape
    #[error("word {index} lies beyond a {len}-byte payload")]
    Truncated {
        /// Word index that was requested
        index: usize,
        /// Payload length in bytes
        len: usize,
    },

    /// Class id has no registered layout
    #[error("unknown class id {0}")]
    UnknownClass(u32),

    /// Tag has no registered trace function
    #[error("no trace function registered for this tag")]
    UntracedTag,
}

/// Result type for GC operations
pub type GcResult<T> = std::result::Result<T, GcError>;
