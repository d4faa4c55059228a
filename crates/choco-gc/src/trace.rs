//! Type-directed tracing
//!
//! The mark phase never hard-codes object layouts. A [`TraceTable`] maps each
//! [`Tag`] to a function that reads an object's payload and reports the words
//! that may hold child pointers. Null words are filtered out by the collector.
//!
//! Built-in payload layouts (32-bit little-endian words):
//!
//! | tag          | payload                                          |
//! |--------------|--------------------------------------------------|
//! | `CLASS`      | class id, then fields (see [`ClassLayout`])      |
//! | `LIST`       | length `n`, then `n` elements                    |
//! | `DICT`       | bucket count `n`, then `n` bucket head entries   |
//! | `DICT_ENTRY` | key, value, next entry                           |
//! | `REF`        | target                                           |
//! | `STRING`, `BIGINT`, `OPAQUE` | no pointers                      |

use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::PayloadError;
use crate::object::{HEADER_SIZE_BYTES, Pointer, Tag};

/// Trace function: decode `payload` and report each candidate child.
pub type TraceFn = Box<dyn Fn(&[u8], &mut dyn FnMut(Pointer)) -> Result<(), PayloadError>>;

/// Read word `index` of a payload.
pub fn payload_word(payload: &[u8], index: usize) -> Result<u32, PayloadError> {
    let start = index * HEADER_SIZE_BYTES as usize;
    payload
        .get(start..start + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(PayloadError::Truncated {
            index,
            len: payload.len(),
        })
}

/// Report the first `count` words.
fn trace_words(
    payload: &[u8],
    count: usize,
    visit: &mut dyn FnMut(Pointer),
) -> Result<(), PayloadError> {
    for index in 0..count {
        visit(Pointer::new(payload_word(payload, index)?));
    }
    Ok(())
}

/// Word 0 is a count `n`; report words `1..=n`. An empty payload has no children.
fn trace_counted(payload: &[u8], visit: &mut dyn FnMut(Pointer)) -> Result<(), PayloadError> {
    if payload.is_empty() {
        return Ok(());
    }
    let count = payload_word(payload, 0)? as usize;
    for index in 1..=count {
        visit(Pointer::new(payload_word(payload, index)?));
    }
    Ok(())
}

fn trace_nothing(_payload: &[u8], _visit: &mut dyn FnMut(Pointer)) -> Result<(), PayloadError> {
    Ok(())
}

/// Field layout of one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLayout {
    field_count: u32,
    pointer_fields: Box<[u32]>,
}

impl ClassLayout {
    /// `field_count` fields, of which the listed indices hold pointers.
    pub fn new(field_count: u32, pointer_fields: impl IntoIterator<Item = u32>) -> Self {
        let mut pointer_fields: Vec<u32> = pointer_fields
            .into_iter()
            .filter(|&field| field < field_count)
            .collect();
        pointer_fields.sort_unstable();
        pointer_fields.dedup();
        Self {
            field_count,
            pointer_fields: pointer_fields.into_boxed_slice(),
        }
    }

    /// Number of fields
    pub fn field_count(&self) -> u32 {
        self.field_count
    }

    /// Indices of fields holding pointers
    pub fn pointer_fields(&self) -> &[u32] {
        &self.pointer_fields
    }

    /// Payload size of an instance: class id word plus one word per field
    pub fn payload_size(&self) -> u32 {
        (1 + self.field_count) * HEADER_SIZE_BYTES
    }
}

/// Registry of class layouts, keyed by the class id stored in word 0 of a
/// `CLASS` payload.
///
/// Class id 0 is never registered: it is the id of an instance whose
/// descriptor has not been written yet, and has no pointer fields.
#[derive(Debug, Clone, Default)]
pub struct ClassLayouts {
    layouts: FxHashMap<u32, ClassLayout>,
}

impl ClassLayouts {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `layout` under `class_id`. Id 0 is ignored.
    pub fn register(&mut self, class_id: u32, layout: ClassLayout) -> &mut Self {
        if class_id != 0 {
            self.layouts.insert(class_id, layout);
        }
        self
    }

    /// Layout for `class_id`
    pub fn get(&self, class_id: u32) -> Option<&ClassLayout> {
        self.layouts.get(&class_id)
    }

    fn trace(&self, payload: &[u8], visit: &mut dyn FnMut(Pointer)) -> Result<(), PayloadError> {
        if payload.is_empty() {
            return Ok(());
        }
        let class_id = payload_word(payload, 0)?;
        if class_id == 0 {
            return Ok(());
        }
        let layout = self
            .get(class_id)
            .ok_or(PayloadError::UnknownClass(class_id))?;
        for &field in layout.pointer_fields() {
            visit(Pointer::new(payload_word(payload, 1 + field as usize)?));
        }
        Ok(())
    }
}

/// Tag -> trace function table.
pub struct TraceTable {
    entries: Vec<Option<TraceFn>>,
}

impl TraceTable {
    /// Table with no tags registered
    pub fn empty() -> Self {
        let mut entries = Vec::with_capacity(Tag::COUNT);
        entries.resize_with(Tag::COUNT, || None);
        Self { entries }
    }

    /// Table for the built-in tags, using `classes` for `CLASS` objects
    pub fn standard(classes: ClassLayouts) -> Self {
        Self::empty()
            .with(Tag::CLASS, move |payload, visit| classes.trace(payload, visit))
            .with(Tag::LIST, trace_counted)
            .with(Tag::DICT, trace_counted)
            .with(Tag::DICT_ENTRY, |payload, visit| trace_words(payload, 3, visit))
            .with(Tag::REF, |payload, visit| trace_words(payload, 1, visit))
            .with(Tag::STRING, trace_nothing)
            .with(Tag::BIGINT, trace_nothing)
            .with(Tag::OPAQUE, trace_nothing)
    }

    /// Register (or replace) the trace function for `tag`
    pub fn register<F>(&mut self, tag: Tag, trace: F)
    where
        F: Fn(&[u8], &mut dyn FnMut(Pointer)) -> Result<(), PayloadError> + 'static,
    {
        self.entries[tag.index()] = Some(Box::new(trace));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, tag: Tag, trace: F) -> Self
    where
        F: Fn(&[u8], &mut dyn FnMut(Pointer)) -> Result<(), PayloadError> + 'static,
    {
        self.register(tag, trace);
        self
    }

    /// Whether `tag` has a trace function
    pub fn is_registered(&self, tag: Tag) -> bool {
        self.entries[tag.index()].is_some()
    }

    /// Report the children of a `tag` object with the given payload
    pub fn trace(
        &self,
        tag: Tag,
        payload: &[u8],
        visit: &mut dyn FnMut(Pointer),
    ) -> Result<(), PayloadError> {
        let trace = self.entries[tag.index()]
            .as_ref()
            .ok_or(PayloadError::UntracedTag)?;
        trace(payload, visit)
    }
}

impl Default for TraceTable {
    fn default() -> Self {
        Self::standard(ClassLayouts::default())
    }
}

impl fmt::Debug for TraceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some())
            .filter_map(|(index, _)| Tag::new(index as u8));
        f.debug_set().entries(registered).finish()
    }
}
