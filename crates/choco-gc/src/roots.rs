//! GC roots mirroring the generated code's call stack
//!
//! Generated code keeps the root set exact by bracketing its own execution:
//!
//! - one [`Frame`] per function activation (`push_frame` / `pop_frame`),
//!   holding the heap pointers currently bound to local-variable slots;
//! - a temporary stack of nested scopes (`capture_temps` / `release_temps`)
//!   that keeps freshly allocated, not-yet-bound objects alive while a
//!   multi-step expression such as `f(C(), C(), C())` is evaluated.
//!
//! While a temporary scope is open, the collector registers every new
//! allocation in it. Outside any scope, the caller must bind a new pointer
//! before allocating again.

use rustc_hash::FxHashMap;

use crate::error::{GcError, GcResult};
use crate::object::Pointer;

/// Root record for one function activation.
#[derive(Debug, Default, Clone)]
pub struct Frame {
    /// Slot index -> bound pointer
    locals: FxHashMap<u32, Pointer>,
}

impl Frame {
    /// Pointer bound to `slot`
    pub fn local(&self, slot: u32) -> Option<Pointer> {
        self.locals.get(&slot).copied()
    }

    /// Number of bound slots
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    /// Whether no slot is bound
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// Bound pointers, in no particular order
    pub fn pointers(&self) -> impl Iterator<Item = Pointer> + '_ {
        self.locals.values().copied()
    }
}

/// The live-reference set of the running program.
#[derive(Debug, Default, Clone)]
pub struct Roots {
    frames: Vec<Frame>,
    temps: Vec<Pointer>,
    /// Length of `temps` at each open `capture_temps`
    temp_marks: Vec<usize>,
}

impl Roots {
    /// Empty root set: no frames, no temporary scopes
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a function activation
    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Leave the current function activation, dropping its bindings
    pub fn pop_frame(&mut self) -> GcResult<Frame> {
        self.frames.pop().ok_or(GcError::EmptyFrameStack)
    }

    /// Bind `slot` in the current frame, replacing any previous binding
    pub fn add_local(&mut self, slot: u32, ptr: Pointer) -> GcResult<()> {
        let frame = self.frames.last_mut().ok_or(GcError::NoActiveFrame)?;
        frame.locals.insert(slot, ptr);
        Ok(())
    }

    /// Drop every binding of the current frame, keeping the frame itself
    pub fn clear_locals(&mut self) -> GcResult<()> {
        let frame = self.frames.last_mut().ok_or(GcError::NoActiveFrame)?;
        frame.locals.clear();
        Ok(())
    }

    /// Pointer bound to `slot` in the current frame
    pub fn local(&self, slot: u32) -> Option<Pointer> {
        self.frames.last().and_then(|frame| frame.local(slot))
    }

    /// Open a temporary scope
    pub fn capture_temps(&mut self) {
        self.temp_marks.push(self.temps.len());
    }

    /// Close the innermost temporary scope, un-rooting everything
    /// registered since the matching `capture_temps`
    pub fn release_temps(&mut self) -> GcResult<()> {
        let mark = self.temp_marks.pop().ok_or(GcError::UnbalancedTempRelease)?;
        self.temps.truncate(mark);
        Ok(())
    }

    /// Whether at least one temporary scope is open
    pub fn in_temp_scope(&self) -> bool {
        !self.temp_marks.is_empty()
    }

    /// Register `ptr` in the innermost temporary scope.
    ///
    /// Returns `false` (and registers nothing) when no scope is open.
    pub fn push_temp(&mut self, ptr: Pointer) -> bool {
        if self.in_temp_scope() {
            self.temps.push(ptr);
            true
        } else {
            false
        }
    }

    /// Number of active frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of open temporary scopes
    pub fn temp_scope_depth(&self) -> usize {
        self.temp_marks.len()
    }

    /// Number of pointers held by open temporary scopes
    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    /// Active frames, outermost first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Every root: all frames' bindings, then all temporaries.
    ///
    /// May yield duplicates and null pointers.
    pub fn live_roots(&self) -> impl Iterator<Item = Pointer> + '_ {
        self.frames
            .iter()
            .flat_map(|frame| frame.pointers())
            .chain(self.temps.iter().copied())
    }
}
