//! Live ranges and live intervals
//!
//! A `LiveRange` is one half-open span of program points over which a
//! register holds a single value. A `LiveInterval` collects all ranges of
//! one register across a function, keeping them sorted and disjoint.
//!
//! Value numbers are interval-local: two ranges sharing a value number carry
//! the same definition's value through control flow. That relation is what
//! lets the coalescer prove two copy-connected intervals can merge.

use crate::machine::frame::StackSlot;
use crate::machine::instr::Reg;
use crate::regalloc::numbering::ProgramPoint;
use std::fmt;

/// A half-open span `[start, end)` carrying value `val_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiveRange {
    pub start: ProgramPoint,
    pub end: ProgramPoint,
    pub val_id: u32,
}

impl LiveRange {
    pub fn new(start: ProgramPoint, end: ProgramPoint, val_id: u32) -> Self {
        LiveRange { start, end, val_id }
    }

    pub fn contains(&self, point: ProgramPoint) -> bool {
        self.start <= point && point < self.end
    }

    pub fn intersects(&self, other: &LiveRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for LiveRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{},{}):{}", self.start, self.end, self.val_id)
    }
}

/// All live ranges of one register (or one stack slot).
#[derive(Clone, Debug)]
pub struct LiveInterval {
    /// Register id, or the slot index when `is_stack_slot` is set. The two
    /// id spaces are disjoint.
    pub reg: Reg,
    /// Spill cost. Infinite for physical registers and for intervals that
    /// already carry spill traffic; those are never evicted.
    pub weight: f32,
    /// Sorted, pairwise disjoint.
    pub ranges: Vec<LiveRange>,
    pub is_stack_slot: bool,
    num_values: u32,
}

impl LiveInterval {
    pub fn new(reg: Reg, weight: f32) -> Self {
        LiveInterval {
            reg,
            weight,
            ranges: Vec::new(),
            is_stack_slot: false,
            num_values: 0,
        }
    }

    /// An interval tracking the lifetime of a stack slot rather than a
    /// register.
    pub fn new_stack_slot(slot: StackSlot) -> Self {
        LiveInterval {
            reg: Reg(slot.0),
            weight: f32::INFINITY,
            ranges: Vec::new(),
            is_stack_slot: true,
            num_values: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Allocate the next interval-local value number.
    pub fn next_value(&mut self) -> u32 {
        let v = self.num_values;
        self.num_values += 1;
        v
    }

    pub fn contains_one_value(&self) -> bool {
        self.num_values == 1
    }

    /// Start of the first range. The interval must be non-empty.
    pub fn begin_number(&self) -> ProgramPoint {
        assert!(!self.is_empty(), "empty interval for {}", self.reg);
        self.ranges[0].start
    }

    /// End of the last range. The interval must be non-empty.
    pub fn end_number(&self) -> ProgramPoint {
        assert!(!self.is_empty(), "empty interval for {}", self.reg);
        self.ranges[self.ranges.len() - 1].end
    }

    pub fn is_live_at(&self, point: ProgramPoint) -> bool {
        self.range_containing(point).is_some()
    }

    /// True once every range ends at or before `point`.
    pub fn expired_at(&self, point: ProgramPoint) -> bool {
        self.end_number() <= point
    }

    pub fn range_containing(&self, point: ProgramPoint) -> Option<&LiveRange> {
        let i = self.ranges.partition_point(|r| r.end <= point);
        self.ranges.get(i).filter(|r| r.contains(point))
    }

    /// Insert a range, merging it with adjacent or overlapping ranges that
    /// carry the same value. Overlap between different values means the
    /// producer handed us inconsistent liveness and is fatal.
    pub fn add_range(&mut self, lr: LiveRange) {
        assert!(lr.start < lr.end, "empty live range for {}", self.reg);

        let mut merged = lr;
        // First existing range that could touch or overlap the new one.
        let mut lo = self.ranges.partition_point(|r| r.end < merged.start);
        // A touching predecessor with a different value stays separate.
        if lo < self.ranges.len()
            && self.ranges[lo].end == merged.start
            && self.ranges[lo].val_id != merged.val_id
        {
            lo += 1;
        }
        let mut hi = lo;
        while hi < self.ranges.len() && self.ranges[hi].start <= merged.end {
            let r = &self.ranges[hi];
            if r.val_id == merged.val_id {
                merged.start = merged.start.min(r.start);
                merged.end = merged.end.max(r.end);
                hi += 1;
            } else {
                assert!(
                    !r.intersects(&merged),
                    "overlapping live ranges with different values in {}",
                    self.reg
                );
                break;
            }
        }
        self.ranges.splice(lo..hi, std::iter::once(merged));
    }

    /// Clip away everything in `[start, end)`, deleting, trimming, or
    /// splitting ranges as needed.
    pub fn remove_range(&mut self, start: ProgramPoint, end: ProgramPoint) {
        assert!(start < end);
        let mut i = self.ranges.partition_point(|r| r.end <= start);
        while i < self.ranges.len() {
            let r = self.ranges[i];
            if r.start >= end {
                break;
            }
            if r.start < start && r.end > end {
                // Interior removal splits the range in two.
                let tail = LiveRange::new(end, r.end, r.val_id);
                self.ranges[i].end = start;
                self.ranges.insert(i + 1, tail);
                return;
            } else if r.start < start {
                self.ranges[i].end = start;
                i += 1;
            } else if r.end > end {
                self.ranges[i].start = end;
                i += 1;
            } else {
                self.ranges.remove(i);
            }
        }
    }

    /// True if any range of `self` intersects any range of `other`.
    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = &self.ranges[i];
            let b = &other.ranges[j];
            if a.intersects(b) {
                return true;
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        false
    }

    /// Check whether `other` (the copy source) can merge into `self` (the
    /// copy destination) for a copy defined at `copy_point`: every
    /// overlapping range pair must carry exactly the two values the copy
    /// connects.
    pub fn joinable(&self, other: &LiveInterval, copy_point: ProgramPoint) -> bool {
        let dest_lr = self
            .range_containing(copy_point)
            .expect("copy destination not live at the copy");
        let src_lr = other
            .range_containing(copy_point.prev())
            .expect("copy source not live into the copy");
        let this_val = dest_lr.val_id;
        let other_val = src_lr.val_id;

        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = &self.ranges[i];
            let b = &other.ranges[j];
            if a.intersects(b) && (a.val_id != this_val || b.val_id != other_val) {
                return false;
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        true
    }

    /// Absorb `other`'s ranges. The value the copy carries collapses into
    /// the destination's value; any other value of `other` is renumbered
    /// into a fresh value of `self`.
    pub fn join(&mut self, other: &LiveInterval, copy_point: ProgramPoint) {
        let dst_val = self
            .range_containing(copy_point)
            .expect("copy destination not live at the copy")
            .val_id;
        let src_val = other
            .range_containing(copy_point.prev())
            .expect("copy source not live into the copy")
            .val_id;

        let mut renumbered: Vec<Option<u32>> = vec![None; other.num_values as usize];
        for r in &other.ranges {
            let v = if r.val_id == src_val {
                dst_val
            } else {
                *renumbered[r.val_id as usize].get_or_insert_with(|| {
                    let v = self.num_values;
                    self.num_values += 1;
                    v
                })
            };
            self.add_range(LiveRange::new(r.start, r.end, v));
        }
        self.weight = if self.weight.is_infinite() || other.weight.is_infinite() {
            f32::INFINITY
        } else {
            self.weight + other.weight
        };
    }
}

impl fmt::Display for LiveInterval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_stack_slot {
            write!(f, "{}:", StackSlot(self.reg.0))?;
        } else {
            write!(f, "{}:", self.reg)?;
        }
        for r in &self.ranges {
            write!(f, " {}", r)?;
        }
        write!(f, " w={}", self.weight)
    }
}
