//! Register coalescing
//!
//! Walks copy instructions and merges the two sides' live intervals when
//! they provably cannot interfere, so the copy becomes an identity move. A
//! union-find table maps every coalesced register to its representative;
//! physical registers are always canonical. Deeply nested blocks are
//! visited first so the copies on hot paths get coalesced before cold code
//! can claim their registers.
//!
//! After joining, a final pass rewrites every operand to its
//! representative, deletes the moves that became identities, and folds each
//! register occurrence into its interval's spill weight, scaled by loop
//! depth.

use crate::machine::function::{BlockId, InstrId, MachineFunction};
use crate::machine::instr::Reg;
use crate::machine::loops::LoopInfo;
use crate::regalloc::interval::LiveInterval;
use crate::regalloc::intervals::LiveIntervals;
use crate::regalloc::RegAllocStats;
use crate::target::{RegisterInfo, TargetInstrInfo};
use log::{debug, trace};

/// Path-compressing union-find over the dense register id space.
#[derive(Debug)]
pub struct RegMap {
    parent: Vec<u32>,
}

impl RegMap {
    pub fn new(num_virtual: usize) -> RegMap {
        let n = Reg::FIRST_VIRTUAL as usize + num_virtual;
        RegMap {
            parent: (0..n as u32).collect(),
        }
    }

    /// Representative of `reg`. Registers created after the table (spill
    /// temporaries) are their own representatives.
    pub fn rep(&mut self, reg: Reg) -> Reg {
        let i = reg.0 as usize;
        if i >= self.parent.len() {
            return reg;
        }
        if self.parent[i] != reg.0 {
            let root = self.rep(Reg(self.parent[i]));
            self.parent[i] = root.0;
        }
        Reg(self.parent[i])
    }

    /// Map `from` (and everything already mapped to it) to `to`.
    pub fn union(&mut self, from: Reg, to: Reg) {
        debug_assert!(
            !from.is_physical(),
            "physical registers stay canonical in the remap table"
        );
        let f = self.rep(from);
        let t = self.rep(to);
        debug_assert_ne!(f, t);
        self.parent[f.0 as usize] = t.0;
    }
}

/// Coalesce copy-connected intervals in `lis`, returning the remap table.
pub fn join_intervals(
    lis: &mut LiveIntervals,
    mf: &mut MachineFunction,
    ri: &RegisterInfo,
    tii: &dyn TargetInstrInfo,
    loops: &LoopInfo,
    stats: &mut RegAllocStats,
) -> RegMap {
    debug!("joining intervals for {}", mf.name);
    let mut remap = RegMap::new(mf.num_virtual_regs());

    let order: Vec<BlockId> = if !loops.has_loops() {
        mf.layout_order()
    } else {
        let mut blocks = mf.layout_order();
        blocks.sort_by_key(|&b| (std::cmp::Reverse(loops.depth(b)), b.0));
        blocks
    };

    for &b in &order {
        join_intervals_in_block(lis, mf, ri, tii, &mut remap, b, stats);
    }

    rewrite_to_representatives(lis, mf, tii, loops, &mut remap);
    remap
}

fn join_intervals_in_block(
    lis: &mut LiveIntervals,
    mf: &MachineFunction,
    ri: &RegisterInfo,
    tii: &dyn TargetInstrInfo,
    remap: &mut RegMap,
    bid: BlockId,
    stats: &mut RegAllocStats,
) {
    for i in 0..mf.block(bid).len() {
        let id = InstrId::new(bid, i);
        let mi = mf.inst(id);
        if mi.deleted {
            continue;
        }
        let Some((src, dst)) = tii.is_move(mi) else {
            continue;
        };
        // Only registers with liveness information can be joined: virtual
        // registers and allocatable physical ones.
        if !(src.is_virtual() || ri.is_allocatable(src))
            || !(dst.is_virtual() || ri.is_allocatable(dst))
        {
            continue;
        }

        let a = remap.rep(src);
        let b = remap.rep(dst);
        if a == b {
            continue;
        }
        if a.is_physical() && b.is_physical() {
            continue;
        }
        if differing_reg_classes(mf, ri, a, b) {
            continue;
        }

        let copy_pt = lis.numbering().point_of(id).def_slot();
        let ok = {
            let a_iv = lis.interval(a).expect("copy source has an interval");
            let b_iv = lis.interval(b).expect("copy destination has an interval");
            trace!("inspecting {} and {} at {}", a_iv, b_iv, copy_pt);
            // Two single-value intervals joined by a copy hold the same
            // value outright; overlap between them cannot be real
            // interference.
            let trivially = a_iv.contains_one_value() && b_iv.contains_one_value();
            trivially
                || (b_iv.joinable(a_iv, copy_pt) && !overlaps_aliases(lis, ri, a_iv, b_iv))
        };
        if !ok {
            trace!("  interference, not joining");
            continue;
        }

        let a_iv = lis.remove_interval(a).expect("source interval present");
        let b_iv = lis.interval_mut(b).expect("destination interval present");
        b_iv.join(&a_iv, copy_pt);
        trace!("  joined into {}", b_iv);

        if a.is_virtual() {
            remap.union(a, b);
        } else {
            // The physical side becomes the representative and takes over
            // the merged interval's storage.
            remap.union(b, a);
            let mut joined = lis.remove_interval(b).expect("destination interval present");
            joined.reg = a;
            lis.insert_interval(joined);
        }
        stats.joins += 1;
    }
}

/// True if the two registers have no common allocatable class.
fn differing_reg_classes(mf: &MachineFunction, ri: &RegisterInfo, a: Reg, b: Reg) -> bool {
    if a.is_physical() {
        !ri.class_contains(mf.reg_class(b), a)
    } else if b.is_physical() {
        !ri.class_contains(mf.reg_class(a), b)
    } else {
        mf.reg_class(a) != mf.reg_class(b)
    }
}

/// Alias-level interference: a physical side must not overlap the other
/// side through any aliasing register's interval.
fn overlaps_aliases(
    lis: &LiveIntervals,
    ri: &RegisterInfo,
    a_iv: &LiveInterval,
    b_iv: &LiveInterval,
) -> bool {
    let (phys, other) = if a_iv.reg.is_physical() {
        (a_iv, b_iv)
    } else if b_iv.reg.is_physical() {
        (b_iv, a_iv)
    } else {
        return false;
    };
    for &alias in ri.aliases(phys.reg) {
        if let Some(alias_iv) = lis.interval(alias) {
            if other.overlaps(alias_iv) {
                return true;
            }
        }
    }
    false
}

/// Rewrite operands to their representatives, drop identity moves, and
/// accumulate spill weights.
fn rewrite_to_representatives(
    lis: &mut LiveIntervals,
    mf: &mut MachineFunction,
    tii: &dyn TargetInstrInfo,
    loops: &LoopInfo,
    remap: &mut RegMap,
) {
    for b in 0..mf.blocks.len() {
        let bid = BlockId(b as u32);
        let weight = 10f32.powi(loops.depth(bid) as i32);
        for i in 0..mf.block(bid).len() {
            let id = InstrId::new(bid, i);
            if mf.inst(id).deleted {
                continue;
            }

            for op in mf.inst_mut(id).operands.iter_mut() {
                if let Some(ro) = op.as_reg_mut() {
                    if ro.reg.is_virtual() {
                        ro.reg = remap.rep(ro.reg);
                    }
                }
            }

            if let Some((src, dst)) = tii.is_move(mf.inst(id)) {
                if src == dst {
                    let pt = lis.numbering().point_of(id);
                    trace!("deleting identity move at {}", pt);
                    mf.inst_mut(id).deleted = true;
                    lis.numbering_mut().clear_point(pt);
                    continue;
                }
            }

            for idx in 0..mf.inst(id).operands.len() {
                let Some(ro) = mf.inst(id).operands[idx].as_reg() else {
                    continue;
                };
                let reg = ro.reg;
                if reg.is_virtual() {
                    if let Some(iv) = lis.interval_mut(reg) {
                        iv.weight += weight;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::instr::{MachineInst, MachineOperand};
    use crate::regalloc::liveness::LiveVariables;
    use crate::regalloc::numbering::InstrNumbering;
    use crate::target::x86_64::{self, opcodes};

    fn push(mf: &mut MachineFunction, b: BlockId, mi: MachineInst) -> InstrId {
        let id = InstrId::new(b, mf.block(b).len());
        mf.block_mut(b).insts.push(mi);
        id
    }

    fn def_imm(reg: Reg, value: i64) -> MachineInst {
        MachineInst::new(
            opcodes::MOV64RI,
            vec![MachineOperand::def_reg(reg), MachineOperand::imm(value)],
        )
    }

    fn copy(dst: Reg, src: Reg) -> MachineInst {
        MachineInst::new(
            opcodes::MOV64RR,
            vec![MachineOperand::def_reg(dst), MachineOperand::use_reg(src)],
        )
    }

    fn run_coalescer(mf: &mut MachineFunction) -> (LiveIntervals, RegMap, RegAllocStats) {
        let ri = x86_64::register_info();
        let tii = x86_64::instr_info();
        let order = mf.dfs_order();
        let lv = LiveVariables::compute(mf, &ri, &order);
        let numbering = InstrNumbering::compute(mf, order);
        let mut lis = LiveIntervals::compute(mf, &ri, &tii, &lv, numbering);
        let loops = LoopInfo::compute(mf);
        let mut stats = RegAllocStats::default();
        let remap = join_intervals(&mut lis, mf, &ri, &tii, &loops, &mut stats);
        (lis, remap, stats)
    }

    #[test]
    fn test_copy_connected_intervals_merge() {
        let mut mf = MachineFunction::new("merge");
        let b = mf.add_block("entry");
        let v0 = mf.create_virtual_register(x86_64::GR64);
        let v1 = mf.create_virtual_register(x86_64::GR64);
        let v2 = mf.create_virtual_register(x86_64::GR64);

        push(&mut mf, b, def_imm(v0, 1));
        let mov = push(&mut mf, b, copy(v1, v0));
        push(&mut mf, b, copy(v2, v1));
        push(&mut mf, b, MachineInst::new(opcodes::RET, vec![]));

        let (lis, mut remap, stats) = run_coalescer(&mut mf);

        assert_eq!(remap.rep(v0), remap.rep(v1));
        assert!(lis.interval(v0).is_none() || lis.interval(v1).is_none());
        assert!(stats.joins >= 1);
        // The copy became an identity move and was deleted, leaving a
        // numbering hole.
        assert!(mf.inst(mov).deleted);
        assert!(lis
            .numbering()
            .instruction_at(crate::regalloc::numbering::ProgramPoint(4))
            .is_none());
    }

    #[test]
    fn test_physical_register_becomes_representative() {
        let mut mf = MachineFunction::new("physrep");
        let b = mf.add_block("entry");
        let v0 = mf.create_virtual_register(x86_64::GR64);

        push(&mut mf, b, def_imm(v0, 1));
        push(&mut mf, b, copy(x86_64::RAX, v0));
        push(
            &mut mf,
            b,
            MachineInst::new(
                opcodes::RET,
                vec![MachineOperand::implicit_use(x86_64::RAX)],
            ),
        );

        let (lis, mut remap, _) = run_coalescer(&mut mf);

        assert_eq!(remap.rep(v0), x86_64::RAX);
        assert!(lis.interval(v0).is_none());
        let iv = lis.interval(x86_64::RAX).unwrap();
        assert_eq!(iv.reg, x86_64::RAX);
        assert!(iv.weight.is_infinite());
        // The merged interval covers the virtual register's definition.
        assert!(iv.is_live_at(crate::regalloc::numbering::ProgramPoint(2)));
    }

    #[test]
    fn test_interfering_copies_stay_separate() {
        // v1 is redefined while v0 stays live to a later read, so the
        // copy's two sides hold different values over an overlapping span.
        let mut mf = MachineFunction::new("interfere");
        let b = mf.add_block("entry");
        let v0 = mf.create_virtual_register(x86_64::GR64);
        let v1 = mf.create_virtual_register(x86_64::GR64);
        let v2 = mf.create_virtual_register(x86_64::GR64);

        push(&mut mf, b, def_imm(v0, 1));
        push(&mut mf, b, def_imm(v2, 9));
        let mov = push(&mut mf, b, copy(v1, v0));
        push(
            &mut mf,
            b,
            MachineInst::new(
                opcodes::ADD64RR,
                vec![
                    MachineOperand::def_use_reg(v1),
                    MachineOperand::use_reg(v2),
                ],
            ),
        );
        push(
            &mut mf,
            b,
            MachineInst::new(
                opcodes::CMP64RR,
                vec![MachineOperand::use_reg(v1), MachineOperand::use_reg(v0)],
            ),
        );
        push(&mut mf, b, MachineInst::new(opcodes::RET, vec![]));

        let (lis, mut remap, _) = run_coalescer(&mut mf);

        assert_ne!(remap.rep(v0), remap.rep(v1));
        assert!(lis.interval(v0).is_some());
        assert!(lis.interval(v1).is_some());
        assert!(!mf.inst(mov).deleted);
    }

    #[test]
    fn test_spill_weights_scale_with_loop_depth() {
        // entry -> loop <-> loop -> exit; v0 lives across the loop and is
        // read inside it, v1 is entry-only.
        let mut mf = MachineFunction::new("weights");
        let entry = mf.add_block("entry");
        let header = mf.add_block("header");
        let exit = mf.add_block("exit");
        mf.add_edge(entry, header);
        mf.add_edge(header, header);
        mf.add_edge(header, exit);
        let v0 = mf.create_virtual_register(x86_64::GR64);
        let v1 = mf.create_virtual_register(x86_64::GR64);
        let v2 = mf.create_virtual_register(x86_64::GR64);

        push(&mut mf, entry, def_imm(v0, 1));
        push(&mut mf, entry, def_imm(v1, 2));
        push(
            &mut mf,
            header,
            MachineInst::new(
                opcodes::ADD64RR,
                vec![
                    MachineOperand::def_use_reg(v2),
                    MachineOperand::use_reg(v0),
                ],
            ),
        );
        push(&mut mf, exit, def_imm(v2, 0));
        // v2 is defined in exit only; give the loop one in entry too.
        mf.block_mut(entry)
            .insts
            .push(def_imm(v2, 5));

        let (lis, _, _) = run_coalescer(&mut mf);

        // v1: one def occurrence outside any loop.
        assert_eq!(lis.interval(v1).unwrap().weight, 1.0);
        // v0: one def outside, one use inside the loop.
        assert_eq!(lis.interval(v0).unwrap().weight, 11.0);
    }
}
