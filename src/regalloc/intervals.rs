//! Live interval construction and spill-code synthesis
//!
//! `LiveIntervals` builds one `LiveInterval` per virtual register and per
//! allocatable physical register in a single forward pass over the numbered
//! instruction stream. Numbering order places every definition before the
//! uses it reaches, so no iterative fixpoint is needed: when a definition is
//! processed, the flow summary already tells the whole story of its
//! lifetime.
//!
//! The same table later serves the allocator's spill path:
//! [`LiveIntervals::add_intervals_for_spills`] rewrites a spilled interval
//! into folded memory operands where the target allows it, and into tight
//! load/store intervals around each remaining use or def everywhere else.

use crate::machine::frame::StackSlot;
use crate::machine::function::{BlockId, InstrId, MachineFunction};
use crate::machine::instr::Reg;
use crate::regalloc::interval::{LiveInterval, LiveRange};
use crate::regalloc::liveness::LiveVariables;
use crate::regalloc::numbering::{InstrNumbering, ProgramPoint};
use crate::regalloc::virt_reg_map::VirtRegMap;
use crate::regalloc::RegAllocStats;
use crate::target::{RegisterInfo, TargetInstrInfo};
use log::{debug, trace};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// The live interval table for one function, keyed by register id.
pub struct LiveIntervals {
    numbering: InstrNumbering,
    intervals: BTreeMap<Reg, LiveInterval>,
}

impl LiveIntervals {
    /// Build intervals for every register defined in `mf`.
    pub fn compute(
        mf: &MachineFunction,
        ri: &RegisterInfo,
        tii: &dyn TargetInstrInfo,
        lv: &LiveVariables,
        numbering: InstrNumbering,
    ) -> LiveIntervals {
        let mut intervals = BTreeMap::new();
        Builder {
            mf,
            ri,
            tii,
            lv,
            numbering: &numbering,
            intervals: &mut intervals,
        }
        .compute_intervals();

        if log::log_enabled!(log::Level::Debug) {
            debug!("live intervals for {}:", mf.name);
            for iv in intervals.values() {
                debug!("  {}", iv);
            }
        }
        LiveIntervals {
            numbering,
            intervals,
        }
    }

    pub fn numbering(&self) -> &InstrNumbering {
        &self.numbering
    }

    pub fn numbering_mut(&mut self) -> &mut InstrNumbering {
        &mut self.numbering
    }

    pub fn interval(&self, reg: Reg) -> Option<&LiveInterval> {
        self.intervals.get(&reg)
    }

    pub fn interval_mut(&mut self, reg: Reg) -> Option<&mut LiveInterval> {
        self.intervals.get_mut(&reg)
    }

    pub fn remove_interval(&mut self, reg: Reg) -> Option<LiveInterval> {
        self.intervals.remove(&reg)
    }

    pub fn insert_interval(&mut self, iv: LiveInterval) {
        let prev = self.intervals.insert(iv.reg, iv);
        debug_assert!(prev.is_none(), "interval table entry clobbered");
    }

    pub fn intervals(&self) -> impl Iterator<Item = &LiveInterval> {
        self.intervals.values()
    }

    pub fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    /// Drain the table in register order, handing ownership to the
    /// allocator. The numbering stays behind for the spill path.
    pub fn take_intervals(&mut self) -> Vec<LiveInterval> {
        std::mem::take(&mut self.intervals).into_values().collect()
    }

    /// Rewrite a spilled interval into spill code. Every instruction the
    /// interval covers that touches its register is either folded to
    /// address `slot` in place, or has the one operand occurrence rewritten
    /// to a fresh register with a minimal interval around the access.
    /// Returned intervals are sorted by start point and can never be chosen
    /// for eviction again.
    pub fn add_intervals_for_spills(
        &self,
        mf: &mut MachineFunction,
        tii: &dyn TargetInstrInfo,
        vrm: &mut VirtRegMap,
        interval: &LiveInterval,
        slot: StackSlot,
        stats: &mut RegAllocStats,
    ) -> Vec<LiveInterval> {
        assert!(
            interval.weight < f32::INFINITY,
            "attempt to spill an already spilled interval: {}",
            interval
        );
        debug!("synthesizing spill code for {} into {}", interval, slot);

        let reg = interval.reg;
        let rc = mf.reg_class(reg);
        let mut added = Vec::new();

        for lr in &interval.ranges {
            let mut index = lr.start.base();
            let end = lr.end.prev().next_instr();
            while index < end {
                // Deleted instructions leave holes in the numbering.
                let Some(id) = self.numbering.instruction_at(index) else {
                    index = index.next_instr();
                    continue;
                };

                'rescan: loop {
                    for op_idx in 0..mf.inst(id).operands.len() {
                        let Some(ro) = mf.inst(id).operands[op_idx].as_reg().copied() else {
                            continue;
                        };
                        if ro.reg != reg {
                            continue;
                        }

                        if let Some(folded) = tii.fold_memory_operand(mf.inst(id), op_idx, slot) {
                            // The folded form replaces the instruction in
                            // place and keeps its program point.
                            *mf.inst_mut(id) = folded;
                            vrm.record_folded(id, reg);
                            stats.folded += 1;
                            trace!("  folded access at {} into {}", index, slot);
                            continue 'rescan;
                        }

                        // No memory form: route this one access through a
                        // fresh register live only across the instruction,
                        // with room for the load before and the store after.
                        let start = if ro.is_use {
                            index.load_slot()
                        } else {
                            index.def_slot()
                        };
                        let stop = if ro.is_def {
                            index.store_slot().next()
                        } else {
                            index.use_slot().next()
                        };
                        let nreg = mf.create_virtual_register(rc);
                        {
                            let op = mf.inst_mut(id).operands[op_idx].as_reg_mut().unwrap();
                            op.reg = nreg;
                            if op.is_use {
                                op.is_kill = true;
                            }
                        }
                        vrm.assign_virt_to_stack_slot(nreg, slot);
                        let mut ni = LiveInterval::new(nreg, f32::INFINITY);
                        let val = ni.next_value();
                        ni.add_range(LiveRange::new(start, stop, val));
                        trace!("  new spill interval {}", ni);
                        added.push(ni);
                    }
                    break;
                }

                index = index.next_instr();
            }
        }

        added.sort_by_key(|iv| iv.begin_number());
        added
    }
}

struct Builder<'a> {
    mf: &'a MachineFunction,
    ri: &'a RegisterInfo,
    tii: &'a dyn TargetInstrInfo,
    lv: &'a LiveVariables,
    numbering: &'a InstrNumbering,
    intervals: &'a mut BTreeMap<Reg, LiveInterval>,
}

impl<'a> Builder<'a> {
    fn compute_intervals(&mut self) {
        // One pass over defs, explicit and implicit, in numbering order.
        let order = self.numbering.order().to_vec();
        for bid in order {
            let live_ins: SmallVec<[Reg; 4]> =
                self.mf.block(bid).live_ins.iter().copied().collect();
            for li_reg in live_ins {
                if self.ri.is_allocatable(li_reg) {
                    self.handle_live_in(bid, li_reg);
                }
            }
            for i in 0..self.mf.block(bid).len() {
                let id = InstrId::new(bid, i);
                let defs: SmallVec<[Reg; 4]> = self
                    .mf
                    .inst(id)
                    .reg_operands()
                    .filter(|(_, ro)| ro.is_def && ro.reg != Reg::NONE)
                    .map(|(_, ro)| ro.reg)
                    .collect();
                for reg in defs {
                    self.handle_register_def(bid, id, reg);
                }
            }
        }
    }

    fn get_or_create(intervals: &mut BTreeMap<Reg, LiveInterval>, reg: Reg) -> &mut LiveInterval {
        intervals.entry(reg).or_insert_with(|| {
            let weight = if reg.is_physical() {
                f32::INFINITY
            } else {
                0.0
            };
            LiveInterval::new(reg, weight)
        })
    }

    fn handle_register_def(&mut self, bid: BlockId, id: InstrId, reg: Reg) {
        if reg.is_virtual() {
            self.handle_virtual_register_def(bid, id, reg);
        } else if self.ri.is_allocatable(reg) {
            let copy = self.tii.is_move(self.mf.inst(id));
            let live_in = self.mf.block(bid).live_ins.contains(&reg);
            self.handle_physical_register_def(bid, id, reg, copy, live_in);
            // A def of a register also defines its sub-registers, unless
            // the instruction writes the sub-register explicitly itself.
            let subs: SmallVec<[Reg; 2]> = self.ri.sub_regs(reg).iter().copied().collect();
            for sub in subs {
                if !self.mf.inst(id).modifies_register(sub) {
                    let sub_live_in = self.mf.block(bid).live_ins.contains(&sub);
                    self.handle_physical_register_def(bid, id, sub, copy, sub_live_in);
                }
            }
        }
    }

    fn handle_virtual_register_def(&mut self, bid: BlockId, id: InstrId, reg: Reg) {
        let vi = self.lv.var_info(reg);
        let def_idx = self.numbering.point_of(id).def_slot();
        trace!("  def of {} at {}", reg, def_idx);

        let is_first = self.intervals.get(&reg).map_or(true, |iv| iv.is_empty());
        if is_first {
            // Block-local lifetime: one kill, in the defining block.
            if vi.kills.len() == 1 && vi.kills[0].block == bid {
                let kill = vi.kills[0];
                let kill_idx = if kill == id {
                    // Never read: the value dies on its own def slot.
                    def_idx.next()
                } else {
                    self.numbering.point_of(kill).use_slot().next()
                };
                // A "kill" numbered before the def is a loop-carried read
                // of the previous iteration's value, not a local lifetime.
                if kill_idx > def_idx {
                    assert!(
                        vi.alive_blocks.is_empty(),
                        "block-local {} reported alive across blocks",
                        reg
                    );
                    let iv = Self::get_or_create(self.intervals, reg);
                    let val = iv.next_value();
                    iv.add_range(LiveRange::new(def_idx, kill_idx, val));
                    return;
                }
            }

            // The value escapes its defining block: live to the block's
            // end, across every alive-through block whole, and from the top
            // of each killing block to the kill's use slot. One definition,
            // one value; contiguous pieces merge on insert.
            let mut spans: SmallVec<[(ProgramPoint, ProgramPoint); 4]> = SmallVec::new();
            let block_end = self
                .numbering
                .block_end(bid)
                .expect("defining block is numbered");
            spans.push((def_idx, block_end));
            for &ab in &vi.alive_blocks {
                if let (Some(s), Some(e)) = (
                    self.numbering.block_start(ab),
                    self.numbering.block_end(ab),
                ) {
                    spans.push((s, e));
                }
            }
            for &kill in &vi.kills {
                let s = self
                    .numbering
                    .block_start(kill.block)
                    .expect("killing block is numbered");
                let e = self.numbering.point_of(kill).use_slot().next();
                spans.push((s, e));
            }
            let iv = Self::get_or_create(self.intervals, reg);
            let val = iv.next_value();
            for (s, e) in spans {
                iv.add_range(LiveRange::new(s, e, val));
            }
            return;
        }

        // A redefinition, from two-address rewriting or phi elimination
        // upstream.
        let mi = self.mf.inst(id);
        if mi.def_is_tied_to_use(reg) {
            let first_def = vi
                .def_inst
                .expect("redefined register has a recorded definition");
            let def_index = self.numbering.point_of(first_def).def_slot();
            let redef_index = def_idx;
            let dead = mi.register_def_is_dead(reg);

            // The span up to the redefinition now carries its own value;
            // from the redefinition on, the old ranges describe the new
            // value.
            let iv = Self::get_or_create(self.intervals, reg);
            iv.remove_range(def_index, redef_index);
            let val = iv.next_value();
            iv.add_range(LiveRange::new(def_index, redef_index, val));
            if dead {
                let val = iv.next_value();
                iv.add_range(LiveRange::new(redef_index, redef_index.next(), val));
            }
        } else {
            let one_value = self
                .intervals
                .get(&reg)
                .map_or(false, |iv| iv.contains_one_value());
            // First redefinition of a phi destination: the prior value
            // reaches exactly one read, the copy out of the join. From the
            // join block's top to that read the register holds the merged
            // value, distinct from either incoming one. Loop shapes fold
            // the read into alive-through blocks instead and need no
            // renumbering.
            let prior_kill = {
                let mut prior = vi.kills.iter().filter(|&&k| k != id);
                match (prior.next(), prior.next()) {
                    (Some(&k), None) => Some(k),
                    _ => None,
                }
            };
            if one_value {
                if let Some(kill) = prior_kill {
                    let start = self
                        .numbering
                        .block_start(kill.block)
                        .expect("killing block is numbered");
                    let end = self.numbering.point_of(kill).use_slot().next();
                    let iv = Self::get_or_create(self.intervals, reg);
                    iv.remove_range(start, end);
                    let val = iv.next_value();
                    iv.add_range(LiveRange::new(start, end, val));
                }
            }

            // Each phi copy keeps the register live only to the end of its
            // own block; the join block's range is already in place.
            let block_end = self
                .numbering
                .block_end(bid)
                .expect("defining block is numbered");
            let iv = Self::get_or_create(self.intervals, reg);
            let val = iv.next_value();
            iv.add_range(LiveRange::new(def_idx, block_end, val));
        }
    }

    fn handle_physical_register_def(
        &mut self,
        bid: BlockId,
        id: InstrId,
        reg: Reg,
        copy: Option<(Reg, Reg)>,
        live_in: bool,
    ) {
        let mi = self.mf.inst(id);
        let base = self.numbering.point_of(id);
        let start = base.def_slot();

        let end = if mi.register_def_is_dead(reg) {
            // Dead at the defining instruction.
            start.next()
        } else {
            // Otherwise a later instruction in the block must kill it;
            // physical values never cross block boundaries unannounced.
            let block = self.mf.block(bid);
            let mut found = None;
            for j in (id.index as usize + 1)..block.insts.len() {
                if block.insts[j].kills_register(reg) {
                    found = Some(
                        self.numbering
                            .point_of(InstrId::new(bid, j))
                            .use_slot()
                            .next(),
                    );
                    break;
                }
            }
            match found {
                Some(e) => e,
                None => {
                    assert!(
                        live_in,
                        "{} not killed in its defining block",
                        self.ri.name(reg)
                    );
                    start.next()
                }
            }
        };
        assert!(start < end, "empty physical range for {}", self.ri.name(reg));

        // If this def copies a virtual register that itself was copied from
        // this same physical register, the fragment carries the value
        // already numbered on the first leg of the chain. Best effort: any
        // mismatch in the chain's shape falls through to a fresh value.
        let reused = self.copy_chain_value(reg, copy);
        let iv = Self::get_or_create(self.intervals, reg);
        match reused {
            Some((chain_start, val)) => iv.add_range(LiveRange::new(chain_start, end, val)),
            None => {
                let val = iv.next_value();
                iv.add_range(LiveRange::new(start, end, val));
            }
        }
    }

    /// Recognize `reg = copy src` where `src` is a virtual register whose
    /// single value was defined by `src = copy reg`. Returns the start of
    /// the chain and the physical interval's value number there.
    fn copy_chain_value(&self, reg: Reg, copy: Option<(Reg, Reg)>) -> Option<(ProgramPoint, u32)> {
        let (src, dst) = copy?;
        if dst != reg || !src.is_virtual() {
            return None;
        }
        let phys_iv = self.intervals.get(&reg)?;
        if phys_iv.is_empty() {
            return None;
        }
        let src_iv = self.intervals.get(&src)?;
        if src_iv.is_empty() || !src_iv.contains_one_value() {
            return None;
        }
        let src_def = src_iv.ranges[0].start;
        let src_def_mi = self.numbering.instruction_at(src_def)?;
        let (chain_src, chain_dst) = self.tii.is_move(self.mf.inst(src_def_mi))?;
        if chain_dst != src || chain_src != reg {
            return None;
        }
        // The chain must be unbroken: the physical register's latest range
        // is the one the value left through. An intermediate clobber makes
        // the shapes differ and the fragment gets a fresh value instead.
        let range = phys_iv.ranges.last()?;
        if !range.contains(src_def.prev()) {
            return None;
        }
        Some((src_def, range.val_id))
    }

    /// A physical register carrying a value into `bid` is live from the
    /// block's top to its first kill, or dead on arrival when the block
    /// never reads it.
    fn handle_live_in(&mut self, bid: BlockId, reg: Reg) {
        let Some(start) = self.numbering.block_start(bid) else {
            return;
        };
        let block = self.mf.block(bid);
        let mut end = start.next();
        for (i, mi) in block.insts.iter().enumerate() {
            if mi.kills_register(reg) {
                end = self
                    .numbering
                    .point_of(InstrId::new(bid, i))
                    .use_slot()
                    .next();
                break;
            }
            if mi.modifies_register(reg) {
                // Overwritten before any read.
                break;
            }
        }
        trace!("  live-in {} covers [{},{})", self.ri.name(reg), start, end);
        let iv = Self::get_or_create(self.intervals, reg);
        let val = iv.next_value();
        iv.add_range(LiveRange::new(start, end, val));
    }
}
