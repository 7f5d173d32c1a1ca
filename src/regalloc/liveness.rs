//! Liveness analysis
//!
//! Computes the def/kill/alive-through summary the interval builder
//! consumes. Because virtual registers are in single-assignment form and
//! blocks are walked in the same traversal order used for numbering, every
//! definition is seen before its uses and a single forward pass suffices —
//! no iterative fixpoint is needed.
//!
//! For each virtual register the summary records:
//! - the defining instruction (the first one, under upstream phi/two-address
//!   rewriting a register can be written again),
//! - the kill instructions: the last read on each path out of the live
//!   region, or the final definition itself when its value is never read
//!   ("defaults to dead"),
//! - the blocks the value is live *through* (live on entry and exit without
//!   being read).
//!
//! Physical registers never live across blocks here (block live-ins are
//! declared explicitly on `MachineBlock`); a block-local scan marks their
//! kill and dead flags directly on the operands.

use crate::machine::function::{BlockId, InstrId, MachineFunction};
use crate::machine::instr::{MachineOperand, Reg, RegOperand};
use crate::target::RegisterInfo;
use log::trace;
use smallvec::SmallVec;
use std::collections::HashSet;

/// Flow summary for one virtual register.
#[derive(Clone, Debug, Default)]
pub struct VarInfo {
    /// First (dominating) definition.
    pub def_inst: Option<InstrId>,
    /// Every block containing a definition. More than one only for
    /// registers rewritten upstream by phi elimination.
    pub def_blocks: SmallVec<[BlockId; 2]>,
    /// Last read on each path out of the live region; the final definition
    /// itself when its value is never read. At most one entry per block.
    pub kills: SmallVec<[InstrId; 4]>,
    /// Blocks the value passes through without being read, excluding the
    /// defining blocks and the killing blocks.
    pub alive_blocks: HashSet<BlockId>,
}

/// Def/kill/alive-through summary for a function.
#[derive(Debug)]
pub struct LiveVariables {
    virt_info: Vec<VarInfo>,
}

impl LiveVariables {
    /// Analyze `mf`, walking blocks in `order` (the numbering traversal
    /// order). Sets kill/dead flags on register operands as a side effect.
    pub fn compute(mf: &mut MachineFunction, ri: &RegisterInfo, order: &[BlockId]) -> LiveVariables {
        let mut lv = LiveVariables {
            virt_info: vec![VarInfo::default(); mf.num_virtual_regs()],
        };

        // Defining blocks first: the backward walk below must stop at any
        // block that writes the register, including blocks the traversal
        // has not reached yet (phi copies on a loop's back edge).
        for &b in order {
            for i in 0..mf.block(b).len() {
                let id = InstrId::new(b, i);
                for (_, ro) in mf.inst(id).reg_operands() {
                    if ro.is_def && ro.reg.is_virtual() {
                        let vi = &mut lv.virt_info[ro.reg.virt_index()];
                        if vi.def_inst.is_none() {
                            vi.def_inst = Some(id);
                        }
                        if !vi.def_blocks.contains(&b) {
                            vi.def_blocks.push(b);
                        }
                    }
                }
            }
        }

        // Last-touch tracking per virtual register: the instruction and
        // whether it read the value. A def replaces its block's entry,
        // flagging the replaced def dead if nothing read it in between.
        let mut kill_state: Vec<SmallVec<[KillEntry; 4]>> =
            vec![SmallVec::new(); mf.num_virtual_regs()];

        let num_regs = ri.num_regs();
        for &b in order {
            // Block-local physical register state: the last instruction to
            // touch each register, and whether that touch was a read.
            let mut phys_last: Vec<Option<InstrId>> = vec![None; num_regs];
            let mut phys_used: Vec<bool> = vec![false; num_regs];

            for i in 0..mf.block(b).len() {
                let id = InstrId::new(b, i);

                // Uses before defs: a read of the value being overwritten
                // belongs to the old value.
                let (uses, defs) = operand_regs(mf, id);

                for reg in uses {
                    if reg.is_virtual() {
                        let vi = &mut lv.virt_info[reg.virt_index()];
                        let ks = &mut kill_state[reg.virt_index()];
                        handle_virt_reg_use(mf, vi, ks, reg, b, id);
                    } else if ri.is_allocatable(reg) {
                        handle_phys_reg_use(ri, &mut phys_last, &mut phys_used, reg, id);
                    }
                }
                for reg in defs {
                    if reg.is_virtual() {
                        // In a block the value loops through, the last def
                        // feeds the next iteration's read and is not a
                        // kill candidate.
                        let wraps = lv.virt_info[reg.virt_index()].alive_blocks.contains(&b);
                        let ks = &mut kill_state[reg.virt_index()];
                        match ks.last_mut() {
                            Some(last) if last.id.block == b => {
                                if !last.read {
                                    // Overwritten before any read.
                                    mark_dead_def(mf, last.id, reg);
                                }
                                *last = KillEntry { id, read: wraps };
                            }
                            _ => ks.push(KillEntry { id, read: wraps }),
                        }
                    } else if ri.is_allocatable(reg) {
                        handle_phys_reg_def(mf, ri, &mut phys_last, &mut phys_used, reg, Some(id));
                    }
                }
            }

            // Everything still pending at the block's end dies here.
            for r in 1..num_regs {
                let reg = Reg(r as u32);
                if phys_last[r].is_some() {
                    finish_phys_reg(mf, &mut phys_last, &mut phys_used, reg);
                }
            }
        }

        // Finalize: publish the kill lists and translate them into operand
        // flags.
        for (idx, ks) in kill_state.into_iter().enumerate() {
            let reg = Reg::virt(idx as u32);
            for e in &ks {
                if e.read {
                    let mi = mf.inst_mut(e.id);
                    if let Some(ro) = find_reg_operand(mi.operands.iter_mut(), reg, false) {
                        ro.is_kill = true;
                    }
                } else {
                    mark_dead_def(mf, e.id, reg);
                }
            }
            lv.virt_info[idx].kills = ks.into_iter().map(|e| e.id).collect();
        }
        lv
    }

    /// Summary for one virtual register.
    pub fn var_info(&self, reg: Reg) -> &VarInfo {
        &self.virt_info[reg.virt_index()]
    }
}

/// Last touch of a virtual register in some block, and whether it was a
/// read.
#[derive(Clone, Copy, Debug)]
struct KillEntry {
    id: InstrId,
    read: bool,
}

fn handle_virt_reg_use(
    mf: &MachineFunction,
    vi: &mut VarInfo,
    ks: &mut SmallVec<[KillEntry; 4]>,
    reg: Reg,
    block: BlockId,
    id: InstrId,
) {
    assert!(vi.def_inst.is_some(), "{} used but never defined", reg);

    // Blocks are contiguous in the walk, so an entry for the current block
    // can only sit at the end of the list.
    if let Some(last) = ks.last_mut() {
        if last.id.block == block {
            *last = KillEntry { id, read: true };
            return;
        }
    }
    debug_assert!(ks.iter().all(|k| k.id.block != block));
    ks.push(KillEntry { id, read: true });

    // The value flows into this block: mark every path back to a
    // definition alive, clearing stale kills along the way. The walk stops
    // at defining blocks without marking them; the value leaves them
    // part-way through, not end to end. Reaching the use's own block again
    // means the value loops around, and that block stays live end to end.
    let mut worklist: Vec<BlockId> = mf.block(block).preds.clone();
    while let Some(p) = worklist.pop() {
        if let Some(pos) = ks.iter().position(|k| k.id.block == p) {
            // A previously recorded kill in a block the value flows out of
            // is no longer a kill.
            ks.remove(pos);
        }
        if p == block {
            if !vi.alive_blocks.contains(&p) {
                vi.alive_blocks.insert(p);
                worklist.extend(mf.block(p).preds.iter().copied());
            }
            continue;
        }
        if vi.def_blocks.contains(&p) || vi.alive_blocks.contains(&p) {
            continue;
        }
        vi.alive_blocks.insert(p);
        worklist.extend(mf.block(p).preds.iter().copied());
    }
    trace!(
        "liveness: {} killed at {}, alive through {} block(s)",
        reg,
        id,
        vi.alive_blocks.len()
    );
}

fn mark_dead_def(mf: &mut MachineFunction, id: InstrId, reg: Reg) {
    let mi = mf.inst_mut(id);
    if let Some(ro) = find_reg_operand(mi.operands.iter_mut(), reg, true) {
        ro.is_dead = true;
    }
}

/// Split an instruction's register operands into (uses, defs).
fn operand_regs(mf: &MachineFunction, id: InstrId) -> (SmallVec<[Reg; 4]>, SmallVec<[Reg; 4]>) {
    let mut uses = SmallVec::new();
    let mut defs = SmallVec::new();
    for (_, ro) in mf.inst(id).reg_operands() {
        if ro.reg == Reg::NONE {
            continue;
        }
        if ro.is_use {
            uses.push(ro.reg);
        }
        if ro.is_def {
            defs.push(ro.reg);
        }
    }
    (uses, defs)
}

fn find_reg_operand<'a>(
    operands: impl Iterator<Item = &'a mut MachineOperand>,
    reg: Reg,
    want_def: bool,
) -> Option<&'a mut RegOperand> {
    operands
        .filter_map(|op| op.as_reg_mut())
        .find(|ro| ro.reg == reg && if want_def { ro.is_def } else { ro.is_use })
}

fn handle_phys_reg_use(
    ri: &RegisterInfo,
    phys_last: &mut [Option<InstrId>],
    phys_used: &mut [bool],
    reg: Reg,
    id: InstrId,
) {
    phys_last[reg.0 as usize] = Some(id);
    phys_used[reg.0 as usize] = true;
    for &alias in ri.aliases(reg) {
        phys_last[alias.0 as usize] = Some(id);
        phys_used[alias.0 as usize] = true;
    }
}

/// A (re)definition of `reg` ends the previous value: flag its last touch
/// as a kill (if it was read) or a dead def. `id == None` finishes a
/// register at block end without starting a new value.
fn handle_phys_reg_def(
    mf: &mut MachineFunction,
    ri: &RegisterInfo,
    phys_last: &mut [Option<InstrId>],
    phys_used: &mut [bool],
    reg: Reg,
    id: Option<InstrId>,
) {
    finish_phys_reg(mf, phys_last, phys_used, reg);
    phys_last[reg.0 as usize] = id;
    phys_used[reg.0 as usize] = false;
    for &alias in ri.aliases(reg) {
        finish_phys_reg(mf, phys_last, phys_used, alias);
        phys_last[alias.0 as usize] = id;
        phys_used[alias.0 as usize] = false;
    }
}

fn finish_phys_reg(
    mf: &mut MachineFunction,
    phys_last: &mut [Option<InstrId>],
    phys_used: &mut [bool],
    reg: Reg,
) {
    let Some(last) = phys_last[reg.0 as usize] else {
        return;
    };
    let mi = mf.inst_mut(last);
    if phys_used[reg.0 as usize] {
        if let Some(ro) = find_reg_operand(mi.operands.iter_mut(), reg, false) {
            ro.is_kill = true;
        } else {
            // The last touch read an aliasing register; record the kill as
            // an implicit operand so interval construction sees it.
            let mut op = MachineOperand::implicit_use(reg);
            op.as_reg_mut().unwrap().is_kill = true;
            mi.operands.push(op);
        }
    } else if let Some(ro) = find_reg_operand(mi.operands.iter_mut(), reg, true) {
        ro.is_dead = true;
    } else {
        let mut op = MachineOperand::implicit_def(reg);
        op.as_reg_mut().unwrap().is_dead = true;
        mi.operands.push(op);
    }
    phys_last[reg.0 as usize] = None;
    phys_used[reg.0 as usize] = false;
}
