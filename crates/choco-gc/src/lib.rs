//! # ChocoPy Runtime Garbage Collector
//!
//! Heap management for compiled ChocoPy programs running in WebAssembly
//! linear memory.
//!
//! ## Design
//!
//! - **Fixed region**: one contiguous `[start, end)` range carved into
//!   equal-size granules, first-fit with coalescing
//! - **Side-table headers**: one 32-bit header word per granule, outside the
//!   region, so payload pointers are block starts
//! - **Precise roots**: a frame stack plus nested temporary scopes maintained
//!   by generated code
//! - **Stop-the-world mark-sweep**: type-directed marking, address-ordered
//!   sweep, one collection on allocation failure

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allocator;
pub mod checked;
pub mod collector;
pub mod error;
pub mod heap;
pub mod marked_block;
pub mod object;
pub mod roots;
pub mod trace;

pub use allocator::MarkableAllocator;
pub use checked::CheckedAllocator;
pub use collector::{CollectStats, Collector, GcStats};
pub use error::{GcError, GcResult, PayloadError};
pub use heap::{CollectionTrigger, GcConfig, HeapConfig, Memory};
pub use marked_block::{BlockAllocator, BlockDescriptor, HeapStats, SweepStats};
pub use object::{HEADER_SIZE_BYTES, Header, MAX_PAYLOAD_SIZE, Pointer, Tag};
pub use roots::{Frame, Roots};
pub use trace::{ClassLayout, ClassLayouts, TraceFn, TraceTable, payload_word};
