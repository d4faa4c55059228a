//! GC object layout
//!
//! Every allocated block is described by a single 32-bit header word:
//!
//! ```text
//!  31                             8 7          2   1      0
//! ┌────────────────────────────────┬────────────┬──────┬───────┐
//! │ payload size (bytes)           │ tag        │ mark │ alloc │
//! └────────────────────────────────┴────────────┴──────┴───────┘
//! ```

use std::fmt;

/// Size of a header word in bytes.
pub const HEADER_SIZE_BYTES: u32 = 4;

const ALLOC_BIT: u32 = 1 << 0;
const MARK_BIT: u32 = 1 << 1;
const TAG_SHIFT: u32 = 2;
const TAG_MASK: u32 = 0x3f;
const SIZE_SHIFT: u32 = 8;

/// Largest payload size a header can describe.
pub const MAX_PAYLOAD_SIZE: u32 = (1 << (32 - SIZE_SHIFT)) - 1;

/// Address of an object's payload in the heap region.
///
/// Address `0` is never handed out and stands for "no object".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pointer(u32);

impl Pointer {
    /// The null pointer
    pub const NULL: Pointer = Pointer(0);

    /// Wrap a raw address
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Raw address
    #[inline]
    pub const fn addr(self) -> u32 {
        self.0
    }

    /// Whether this is the null pointer
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Pointer {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Object shape tag.
///
/// The set is open: any value in `1..=63` is a valid tag and can be given a
/// trace function in a [`TraceTable`](crate::trace::TraceTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u8);

impl Tag {
    /// Tag value of a header that was never written
    pub const NONE: Tag = Tag(0);
    /// Class instance: fixed field slots
    pub const CLASS: Tag = Tag(1);
    /// List: length-prefixed element pointers
    pub const LIST: Tag = Tag(2);
    /// String: raw bytes
    pub const STRING: Tag = Tag(3);
    /// Dictionary: bucket heads of entry chains
    pub const DICT: Tag = Tag(4);
    /// Arbitrary-precision integer: digit words
    pub const BIGINT: Tag = Tag(5);
    /// Mutable cell holding one pointer
    pub const REF: Tag = Tag(6);
    /// Dictionary entry: key, value, next
    pub const DICT_ENTRY: Tag = Tag(7);
    /// Raw bytes with no pointers
    pub const OPAQUE: Tag = Tag(8);

    /// Number of distinct tag values a header can hold
    pub const COUNT: usize = TAG_MASK as usize + 1;

    /// Create a tag, rejecting `0` and values that do not fit in a header.
    pub const fn new(value: u8) -> Option<Self> {
        if value == 0 || value as u32 > TAG_MASK {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Raw tag value
    #[inline]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Index into per-tag tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Tag::NONE => "NONE",
            Tag::CLASS => "CLASS",
            Tag::LIST => "LIST",
            Tag::STRING => "STRING",
            Tag::DICT => "DICT",
            Tag::BIGINT => "BIGINT",
            Tag::REF => "REF",
            Tag::DICT_ENTRY => "DICT_ENTRY",
            Tag::OPAQUE => "OPAQUE",
            Tag(other) => return write!(f, "TAG({other})"),
        };
        f.write_str(name)
    }
}

/// Packed block header.
///
/// This is a plain value; reading and writing it to memory is done by the
/// allocator that owns the header table.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Header(u32);

impl Header {
    /// Header for a fresh allocation: allocated, unmarked.
    ///
    /// `size` is truncated to [`MAX_PAYLOAD_SIZE`]; callers check the limit
    /// before allocating.
    pub const fn new(tag: Tag, size: u32) -> Self {
        Self(
            ALLOC_BIT
                | ((tag.0 as u32 & TAG_MASK) << TAG_SHIFT)
                | ((size & MAX_PAYLOAD_SIZE) << SIZE_SHIFT),
        )
    }

    /// Decode a header word
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Encoded header word
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether the block holds a live (unswept) allocation
    #[inline]
    pub const fn is_alloced(self) -> bool {
        self.0 & ALLOC_BIT != 0
    }

    /// Whether the mark phase reached this block
    #[inline]
    pub const fn is_marked(self) -> bool {
        self.0 & MARK_BIT != 0
    }

    /// Object tag
    #[inline]
    pub const fn tag(self) -> Tag {
        Tag(((self.0 >> TAG_SHIFT) & TAG_MASK) as u8)
    }

    /// Payload size in bytes
    #[inline]
    pub const fn size(self) -> u32 {
        self.0 >> SIZE_SHIFT
    }

    /// Set the mark bit
    #[inline]
    pub fn mark(&mut self) {
        self.0 |= MARK_BIT;
    }

    /// Clear the mark bit
    #[inline]
    pub fn unmark(&mut self) {
        self.0 &= !MARK_BIT;
    }

    /// Release the block. Tag and size are left in place.
    #[inline]
    pub fn free(&mut self) {
        self.0 &= !(ALLOC_BIT | MARK_BIT);
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("alloc", &self.is_alloced())
            .field("mark", &self.is_marked())
            .field("tag", &self.tag())
            .field("size", &self.size())
            .finish()
    }
}
