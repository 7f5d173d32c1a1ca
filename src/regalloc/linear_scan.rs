//! Linear-scan register allocation
//!
//! Scans the live intervals in start order, keeping the classic four sets:
//! `unhandled` (waiting, ordered by start), `active` (holding a register at
//! the scan point), `inactive` (assigned but in a lifetime gap), and
//! `handled` (finished, kept for rollback). Physical intervals sit in
//! `fixed` and pin their registers for the whole scan.
//!
//! When no register of the class is free the accumulated spill weights
//! decide: either the current interval spills itself, or the cheapest busy
//! register is evicted and every allocation decision made since the evicted
//! interval began is rolled back and redone. Spill code synthesized along
//! the way re-enters the queue as infinite-weight intervals that can never
//! be evicted again, which bounds the retries.

use crate::machine::frame::StackSlot;
use crate::machine::function::MachineFunction;
use crate::machine::instr::Reg;
use crate::regalloc::interval::LiveInterval;
use crate::regalloc::intervals::LiveIntervals;
use crate::regalloc::numbering::ProgramPoint;
use crate::regalloc::tracker::PhysRegTracker;
use crate::regalloc::virt_reg_map::VirtRegMap;
use crate::regalloc::RegAllocStats;
use crate::target::{RegisterInfo, TargetInstrInfo};
use log::{debug, trace};
use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Allocate every virtual interval in `lis` a physical register or a stack
/// slot.
pub fn run_on_function(
    mf: &mut MachineFunction,
    ri: &RegisterInfo,
    tii: &dyn TargetInstrInfo,
    lis: &mut LiveIntervals,
    stats: &mut RegAllocStats,
) -> VirtRegMap {
    let intervals = lis.take_intervals();
    let mut scan = Scan {
        ri,
        tii,
        arena: Vec::with_capacity(intervals.len()),
        unhandled: BinaryHeap::new(),
        fixed: Vec::new(),
        active: Vec::new(),
        inactive: Vec::new(),
        handled: Vec::new(),
        tracker: PhysRegTracker::new(ri),
        vrm: VirtRegMap::new(),
    };
    scan.init(intervals);
    scan.linear_scan(mf, lis, stats);
    scan.vrm
}

/// Min-heap key for the unhandled queue.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    start: ProgramPoint,
    reg: Reg,
    idx: usize,
}

struct Scan<'a> {
    ri: &'a RegisterInfo,
    tii: &'a dyn TargetInstrInfo,
    /// Owns every interval; the sets below hold indices into it.
    arena: Vec<LiveInterval>,
    unhandled: BinaryHeap<Reverse<QueueEntry>>,
    fixed: Vec<usize>,
    active: Vec<usize>,
    inactive: Vec<usize>,
    handled: Vec<usize>,
    tracker: PhysRegTracker,
    vrm: VirtRegMap,
}

impl<'a> Scan<'a> {
    fn init(&mut self, intervals: Vec<LiveInterval>) {
        for iv in intervals {
            debug_assert!(!iv.is_empty(), "empty interval for {}", iv.reg);
            let idx = self.arena.len();
            let reg = iv.reg;
            self.arena.push(iv);
            if reg.is_physical() {
                self.fixed.push(idx);
                self.tracker.add_reg_use(self.ri, reg);
            } else {
                self.push_unhandled(idx);
            }
        }
    }

    fn push_unhandled(&mut self, idx: usize) {
        let iv = &self.arena[idx];
        self.unhandled.push(Reverse(QueueEntry {
            start: iv.begin_number(),
            reg: iv.reg,
            idx,
        }));
    }

    /// Physical register currently backing an assigned interval.
    fn assigned_phys(&self, idx: usize) -> Reg {
        let reg = self.arena[idx].reg;
        if reg.is_virtual() {
            self.vrm
                .phys(reg)
                .unwrap_or_else(|| panic!("{} has no register binding", reg))
        } else {
            reg
        }
    }

    fn linear_scan(
        &mut self,
        mf: &mut MachineFunction,
        lis: &LiveIntervals,
        stats: &mut RegAllocStats,
    ) {
        while let Some(Reverse(entry)) = self.unhandled.pop() {
            let cur = entry.idx;
            let start = self.arena[cur].begin_number();
            debug!("processing {}", self.arena[cur]);

            // Retire or suspend active intervals the scan point has passed.
            let mut i = 0;
            while i < self.active.len() {
                let idx = self.active[i];
                if self.arena[idx].expired_at(start) {
                    self.active.remove(i);
                    let reg = self.assigned_phys(idx);
                    self.tracker.del_reg_use(self.ri, reg);
                } else if !self.arena[idx].is_live_at(start) {
                    self.active.remove(i);
                    let reg = self.assigned_phys(idx);
                    self.tracker.del_reg_use(self.ri, reg);
                    self.inactive.push(idx);
                } else {
                    i += 1;
                }
            }

            // Resume inactive intervals whose next range has begun.
            let mut i = 0;
            while i < self.inactive.len() {
                let idx = self.inactive[i];
                if self.arena[idx].expired_at(start) {
                    self.inactive.remove(i);
                } else if self.arena[idx].is_live_at(start) {
                    self.inactive.remove(i);
                    let reg = self.assigned_phys(idx);
                    self.tracker.add_reg_use(self.ri, reg);
                    self.active.push(idx);
                } else {
                    i += 1;
                }
            }

            if self.arena[cur].reg.is_physical() {
                self.tracker.add_reg_use(self.ri, self.arena[cur].reg);
                self.active.push(cur);
                self.handled.push(cur);
            } else {
                self.assign_reg_or_stack_slot(mf, lis, stats, cur);
            }
        }
    }

    fn assign_reg_or_stack_slot(
        &mut self,
        mf: &mut MachineFunction,
        lis: &LiveIntervals,
        stats: &mut RegAllocStats,
        cur: usize,
    ) {
        let start = self.arena[cur].begin_number();
        let mut spill_weights = vec![0.0f32; self.ri.num_regs()];

        for &idx in &self.active {
            let phys = self.assigned_phys(idx);
            update_spill_weights(&mut spill_weights, self.ri, phys, self.arena[idx].weight);
        }

        // Inactive and fixed intervals only matter where they overlap the
        // current one; their registers are marked busy for this decision
        // only.
        let saved_tracker = self.tracker.clone();
        let inactive_snapshot: Vec<usize> = self.inactive.clone();
        for idx in inactive_snapshot {
            if self.arena[cur].overlaps(&self.arena[idx]) {
                let phys = self.assigned_phys(idx);
                update_spill_weights(&mut spill_weights, self.ri, phys, self.arena[idx].weight);
                self.tracker.add_reg_use(self.ri, phys);
            }
        }
        let fixed_snapshot: Vec<usize> = self.fixed.clone();
        for idx in fixed_snapshot {
            if self.arena[idx].overlaps(&self.arena[cur]) {
                let phys = self.arena[idx].reg;
                update_spill_weights(&mut spill_weights, self.ri, phys, self.arena[idx].weight);
                self.tracker.add_reg_use(self.ri, phys);
            }
        }

        let rc = mf.reg_class(self.arena[cur].reg);
        let free = self
            .ri
            .alloc_order(rc)
            .iter()
            .copied()
            .find(|&r| self.tracker.is_reg_avail(r));
        self.tracker = saved_tracker;

        if let Some(phys) = free {
            trace!("  assigned {}", self.ri.name(phys));
            self.bind(cur, phys);
            return;
        }

        debug!("no free register for {}", self.arena[cur]);

        // Cheapest busy register; `<=` keeps the last minimal register in
        // allocation order, a deterministic tie-break.
        let mut min_weight = f32::INFINITY;
        let mut min_reg = Reg::NONE;
        for &r in self.ri.alloc_order(rc) {
            if spill_weights[r.0 as usize] <= min_weight {
                min_weight = spill_weights[r.0 as usize];
                min_reg = r;
            }
        }
        debug!(
            "  cheapest busy register: {} ({})",
            self.ri.name(min_reg),
            min_weight
        );

        // A zero accumulated weight means nothing live between here and the
        // register: it is only pinned by fixed traffic elsewhere in the
        // function, and the current interval fits in the gap.
        if min_weight == 0.0 {
            trace!("  {} is free over this lifetime", self.ri.name(min_reg));
            self.bind(cur, min_reg);
            return;
        }

        if self.arena[cur].weight <= min_weight {
            // The current interval is the cheapest thing on this register:
            // spill it and queue its replacement intervals.
            debug!("  spilling current {}", self.arena[cur]);
            let reg = self.arena[cur].reg;
            let slot = self.stack_slot_for(mf, reg);
            let added =
                lis.add_intervals_for_spills(mf, self.tii, &mut self.vrm, &self.arena[cur], slot, stats);
            for iv in added {
                let idx = self.arena.len();
                self.arena.push(iv);
                self.push_unhandled(idx);
            }
            return;
        }

        self.evict_and_rollback(mf, lis, stats, cur, min_reg);
    }

    fn bind(&mut self, cur: usize, phys: Reg) {
        self.vrm.assign_virt_to_phys(self.arena[cur].reg, phys);
        self.tracker.add_reg_use(self.ri, phys);
        self.active.push(cur);
        self.handled.push(cur);
    }

    fn stack_slot_for(&mut self, mf: &mut MachineFunction, reg: Reg) -> StackSlot {
        let rc = mf.reg_class(reg);
        let desc = self.ri.class(rc);
        let slot = mf.frame.create_stack_object(desc.spill_size, desc.spill_align);
        self.vrm.assign_virt_to_stack_slot(reg, slot);
        slot
    }

    /// Clear `min_reg` by spilling every overlapping interval assigned to
    /// it, then roll the scan back to the earliest point an evicted
    /// interval covered and redo everything allocated since.
    fn evict_and_rollback(
        &mut self,
        mf: &mut MachineFunction,
        lis: &LiveIntervals,
        stats: &mut RegAllocStats,
        cur: usize,
        min_reg: Reg,
    ) {
        let start = self.arena[cur].begin_number();
        debug!("  evicting {}", self.ri.name(min_reg));

        let mut to_spill = vec![false; self.ri.num_regs()];
        to_spill[min_reg.0 as usize] = true;
        for &a in self.ri.aliases(min_reg) {
            to_spill[a.0 as usize] = true;
        }

        // The current interval goes back in the queue untouched; it sorts
        // right back to the front and retries once the register is clear.
        self.push_unhandled(cur);

        let mut earliest_start = start;
        let mut spilled: FxHashSet<Reg> = FxHashSet::default();
        let mut added: Vec<LiveInterval> = Vec::new();

        // Spill assigned intervals mapped to the evicted register or its
        // aliases. Only those overlapping the current interval matter; the
        // rest cannot affect its allocation.
        let candidates: Vec<usize> = self
            .active
            .iter()
            .chain(self.inactive.iter())
            .copied()
            .collect();
        for idx in candidates {
            let reg = self.arena[idx].reg;
            if !reg.is_virtual() {
                continue;
            }
            let phys = self.assigned_phys(idx);
            if !to_spill[phys.0 as usize] || !self.arena[cur].overlaps(&self.arena[idx]) {
                continue;
            }
            debug!("  spilling evicted {}", self.arena[idx]);
            earliest_start = earliest_start.min(self.arena[idx].begin_number());
            let slot = self.stack_slot_for(mf, reg);
            let new_intervals =
                lis.add_intervals_for_spills(mf, self.tii, &mut self.vrm, &self.arena[idx], slot, stats);
            added.extend(new_intervals);
            spilled.insert(reg);
        }
        assert!(
            !spilled.is_empty(),
            "eviction of {} freed no interval",
            self.ri.name(min_reg)
        );

        debug!("  rolling back to {}", earliest_start);

        // Undo every decision made at or after the rollback point. Spilled
        // intervals are gone for good; everything else gets re-queued and
        // re-decided.
        while let Some(&last) = self.handled.last() {
            if self.arena[last].begin_number() < earliest_start {
                break;
            }
            self.handled.pop();
            let reg = self.arena[last].reg;
            if let Some(pos) = self.active.iter().position(|&i| i == last) {
                self.active.remove(pos);
                if reg.is_physical() {
                    self.tracker.del_reg_use(self.ri, reg);
                    self.push_unhandled(last);
                } else {
                    let phys = self.assigned_phys(last);
                    self.tracker.del_reg_use(self.ri, phys);
                    self.vrm.clear_virt(reg);
                    if !spilled.contains(&reg) {
                        self.push_unhandled(last);
                    }
                }
            } else if let Some(pos) = self.inactive.iter().position(|&i| i == last) {
                self.inactive.remove(pos);
                // Inactive intervals do not hold their register busy, so
                // there is nothing to release in the tracker.
                if reg.is_virtual() {
                    self.vrm.clear_virt(reg);
                    if !spilled.contains(&reg) {
                        self.push_unhandled(last);
                    }
                } else {
                    self.push_unhandled(last);
                }
            } else {
                // Finished before the eviction; its turn comes again.
                if reg.is_virtual() {
                    self.vrm.clear_virt(reg);
                }
                self.push_unhandled(last);
            }
        }

        // Intervals that finished inside the gap between the rollback point
        // and the current start still hold valid bindings; put them back on
        // their registers so the re-scan sees a consistent picture.
        for i in 0..self.handled.len() {
            let idx = self.handled[i];
            if !self.arena[idx].expired_at(earliest_start) && self.arena[idx].expired_at(start) {
                trace!("  re-activating {}", self.arena[idx]);
                let phys = self.assigned_phys(idx);
                self.tracker.add_reg_use(self.ri, phys);
                self.active.push(idx);
            }
        }

        for iv in added {
            let idx = self.arena.len();
            self.arena.push(iv);
            self.push_unhandled(idx);
        }
    }
}

fn update_spill_weights(weights: &mut [f32], ri: &RegisterInfo, reg: Reg, weight: f32) {
    weights[reg.0 as usize] += weight;
    for &a in ri.aliases(reg) {
        weights[a.0 as usize] += weight;
    }
}
