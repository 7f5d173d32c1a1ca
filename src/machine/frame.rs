//! Stack frame information
//!
//! Tracks the stack objects created for spilled registers. Slot layout
//! (actual frame offsets) is decided by frame lowering after allocation.

use std::fmt;

/// Index of an abstract stack object within a function's frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackSlot(pub u32);

impl StackSlot {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StackSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ss{}", self.0)
    }
}

#[derive(Clone, Copy, Debug)]
struct StackObject {
    size: u32,
    align: u32,
}

/// Per-function frame state: the abstract stack objects allocated so far.
#[derive(Clone, Debug, Default)]
pub struct FrameInfo {
    objects: Vec<StackObject>,
}

impl FrameInfo {
    pub fn new() -> Self {
        FrameInfo {
            objects: Vec::new(),
        }
    }

    /// Allocate a fresh stack object of the given size and alignment.
    pub fn create_stack_object(&mut self, size: u32, align: u32) -> StackSlot {
        assert!(size > 0 && align.is_power_of_two());
        let slot = StackSlot(self.objects.len() as u32);
        self.objects.push(StackObject { size, align });
        slot
    }

    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn object_size(&self, slot: StackSlot) -> u32 {
        self.objects[slot.index()].size
    }

    pub fn object_align(&self, slot: StackSlot) -> u32 {
        self.objects[slot.index()].align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_objects_get_fresh_slots() {
        let mut frame = FrameInfo::new();
        let a = frame.create_stack_object(8, 8);
        let b = frame.create_stack_object(4, 4);

        assert_ne!(a, b);
        assert_eq!(frame.num_objects(), 2);
        assert_eq!(frame.object_size(a), 8);
        assert_eq!(frame.object_align(b), 4);
    }
}
