//! Target descriptions
//!
//! The allocator is target-independent; everything target-specific it needs
//! comes through two descriptions:
//!
//! - [`RegisterInfo`]: the physical register file — names, alias sets,
//!   sub-registers, and register classes with their allocation order.
//! - [`TargetInstrInfo`]: the instruction properties the allocator queries —
//!   copy recognition and memory-operand folding.

pub mod x86_64;

use crate::machine::frame::StackSlot;
use crate::machine::instr::{MachineInst, Reg};

/// Index of a register class in the target's class table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegClass(pub u8);

impl RegClass {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Static description of one physical register.
#[derive(Clone, Debug)]
pub struct RegDesc {
    pub name: &'static str,
    /// Registers sharing storage with this one, excluding itself.
    pub aliases: Vec<Reg>,
    /// Registers wholly contained in this one.
    pub sub_regs: Vec<Reg>,
}

/// One register class: spill geometry plus the allocation order of a set of
/// interchangeable registers.
#[derive(Clone, Debug)]
pub struct RegClassDesc {
    pub name: &'static str,
    pub spill_size: u32,
    pub spill_align: u32,
    /// Physical registers of the class, in preferred allocation order.
    pub alloc_order: Vec<Reg>,
}

/// The physical register file of a target.
#[derive(Clone, Debug)]
pub struct RegisterInfo {
    /// Indexed by register id; entry 0 stands in for `Reg::NONE`.
    regs: Vec<RegDesc>,
    classes: Vec<RegClassDesc>,
    allocatable: Vec<bool>,
}

impl RegisterInfo {
    /// Build a register file from descriptions of registers `1..=n` (in id
    /// order) and the class table. A register is allocatable iff it appears
    /// in some class's allocation order.
    pub fn new(regs: Vec<RegDesc>, classes: Vec<RegClassDesc>) -> RegisterInfo {
        let mut table = Vec::with_capacity(regs.len() + 1);
        table.push(RegDesc {
            name: "none",
            aliases: Vec::new(),
            sub_regs: Vec::new(),
        });
        table.extend(regs);

        let mut allocatable = vec![false; table.len()];
        for rc in &classes {
            for &reg in &rc.alloc_order {
                assert!(
                    (reg.0 as usize) < table.len(),
                    "allocation order of {} names unknown register {}",
                    rc.name,
                    reg.0
                );
                allocatable[reg.0 as usize] = true;
            }
        }

        // Alias sets must be symmetric: interval construction and the
        // availability tracker walk them from either end.
        for (i, desc) in table.iter().enumerate().skip(1) {
            for &a in &desc.aliases {
                debug_assert!(
                    table[a.0 as usize].aliases.contains(&Reg(i as u32)),
                    "asymmetric alias pair {} / {}",
                    desc.name,
                    table[a.0 as usize].name
                );
            }
        }

        RegisterInfo {
            regs: table,
            classes,
            allocatable,
        }
    }

    /// Number of register ids, including the invalid id 0.
    pub fn num_regs(&self) -> usize {
        self.regs.len()
    }

    pub fn name(&self, reg: Reg) -> &'static str {
        self.regs[reg.0 as usize].name
    }

    pub fn aliases(&self, reg: Reg) -> &[Reg] {
        &self.regs[reg.0 as usize].aliases
    }

    pub fn sub_regs(&self, reg: Reg) -> &[Reg] {
        &self.regs[reg.0 as usize].sub_regs
    }

    pub fn is_allocatable(&self, reg: Reg) -> bool {
        reg.is_physical() && self.allocatable[reg.0 as usize]
    }

    pub fn class(&self, rc: RegClass) -> &RegClassDesc {
        &self.classes[rc.index()]
    }

    pub fn alloc_order(&self, rc: RegClass) -> &[Reg] {
        &self.classes[rc.index()].alloc_order
    }

    /// True if `reg` is one of the class's allocatable registers.
    pub fn class_contains(&self, rc: RegClass, reg: Reg) -> bool {
        self.alloc_order(rc).contains(&reg)
    }
}

/// Instruction properties the allocator needs from the target.
pub trait TargetInstrInfo {
    /// Recognize a register-to-register copy, returning `(src, dst)`.
    fn is_move(&self, mi: &MachineInst) -> Option<(Reg, Reg)>;

    /// Rewrite operand `op_idx` of `mi` to address `slot` in memory,
    /// returning the folded instruction. `None` when the target has no
    /// memory form for this operand.
    fn fold_memory_operand(
        &self,
        mi: &MachineInst,
        op_idx: usize,
        slot: StackSlot,
    ) -> Option<MachineInst>;
}
