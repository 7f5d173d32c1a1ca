//! Machine instructions and operands
//!
//! Instructions are target-generic: an opcode number plus an operand list.
//! The meaning of an opcode is supplied by the target's instruction info
//! (see `target::TargetInstrInfo`); the allocator itself only inspects
//! register operands and their def/use/kill/dead flags.

use crate::machine::frame::StackSlot;
use crate::machine::function::BlockId;
use smallvec::SmallVec;
use std::fmt;

/// A register id in one dense numbering space.
///
/// `Reg(0)` is the invalid register. Ids below `FIRST_VIRTUAL` name physical
/// registers of the target; ids at or above it name virtual registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

impl Reg {
    /// The invalid register.
    pub const NONE: Reg = Reg(0);

    /// First id in the virtual register space.
    pub const FIRST_VIRTUAL: u32 = 1024;

    /// The `index`-th virtual register.
    pub fn virt(index: u32) -> Reg {
        Reg(Self::FIRST_VIRTUAL + index)
    }

    pub fn is_virtual(self) -> bool {
        self.0 >= Self::FIRST_VIRTUAL
    }

    pub fn is_physical(self) -> bool {
        self.0 != 0 && self.0 < Self::FIRST_VIRTUAL
    }

    /// Index of a virtual register within the virtual space.
    pub fn virt_index(self) -> usize {
        debug_assert!(self.is_virtual());
        (self.0 - Self::FIRST_VIRTUAL) as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_virtual() {
            write!(f, "%v{}", self.0 - Self::FIRST_VIRTUAL)
        } else if self.is_physical() {
            write!(f, "%p{}", self.0)
        } else {
            write!(f, "%none")
        }
    }
}

/// A target-defined opcode number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Opcode(pub u16);

/// A register operand with its access flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegOperand {
    pub reg: Reg,
    /// The instruction writes this register.
    pub is_def: bool,
    /// The instruction reads this register. A def that is also a use models
    /// a two-address (read-modify-write) operand.
    pub is_use: bool,
    /// Last read of the current value. Set by liveness analysis.
    pub is_kill: bool,
    /// Definition whose value is never read. Set by liveness analysis.
    pub is_dead: bool,
    /// Operand not encoded in the instruction (ABI side effects).
    pub is_implicit: bool,
}

impl RegOperand {
    fn new(reg: Reg, is_def: bool, is_use: bool, is_implicit: bool) -> Self {
        RegOperand {
            reg,
            is_def,
            is_use,
            is_kill: false,
            is_dead: false,
            is_implicit,
        }
    }
}

/// One operand of a machine instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum MachineOperand {
    Register(RegOperand),
    Immediate(i64),
    /// A direct stack-slot reference, produced by memory-operand folding.
    Slot(StackSlot),
    Block(BlockId),
}

impl MachineOperand {
    pub fn use_reg(reg: Reg) -> Self {
        MachineOperand::Register(RegOperand::new(reg, false, true, false))
    }

    pub fn def_reg(reg: Reg) -> Self {
        MachineOperand::Register(RegOperand::new(reg, true, false, false))
    }

    /// A two-address operand: written and read by the same instruction.
    pub fn def_use_reg(reg: Reg) -> Self {
        MachineOperand::Register(RegOperand::new(reg, true, true, false))
    }

    pub fn implicit_use(reg: Reg) -> Self {
        MachineOperand::Register(RegOperand::new(reg, false, true, true))
    }

    pub fn implicit_def(reg: Reg) -> Self {
        MachineOperand::Register(RegOperand::new(reg, true, false, true))
    }

    pub fn imm(value: i64) -> Self {
        MachineOperand::Immediate(value)
    }

    pub fn slot(slot: StackSlot) -> Self {
        MachineOperand::Slot(slot)
    }

    pub fn block(block: BlockId) -> Self {
        MachineOperand::Block(block)
    }

    pub fn as_reg(&self) -> Option<&RegOperand> {
        match self {
            MachineOperand::Register(ro) => Some(ro),
            _ => None,
        }
    }

    pub fn as_reg_mut(&mut self) -> Option<&mut RegOperand> {
        match self {
            MachineOperand::Register(ro) => Some(ro),
            _ => None,
        }
    }
}

/// A single machine instruction.
#[derive(Clone, Debug)]
pub struct MachineInst {
    pub opcode: Opcode,
    pub operands: SmallVec<[MachineOperand; 4]>,
    /// Tombstone left behind when a pass deletes the instruction. The slot
    /// is kept so instruction numbering stays stable for the whole pass.
    pub deleted: bool,
}

impl MachineInst {
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item = MachineOperand>) -> Self {
        MachineInst {
            opcode,
            operands: operands.into_iter().collect(),
            deleted: false,
        }
    }

    /// Iterate register operands with their operand indices.
    pub fn reg_operands(&self) -> impl Iterator<Item = (usize, &RegOperand)> {
        self.operands
            .iter()
            .enumerate()
            .filter_map(|(i, op)| op.as_reg().map(|ro| (i, ro)))
    }

    /// True if some use operand of `reg` is flagged as its last read.
    pub fn kills_register(&self, reg: Reg) -> bool {
        self.reg_operands()
            .any(|(_, ro)| ro.reg == reg && ro.is_use && ro.is_kill)
    }

    /// True if some def operand of `reg` is flagged dead.
    pub fn register_def_is_dead(&self, reg: Reg) -> bool {
        self.reg_operands()
            .any(|(_, ro)| ro.reg == reg && ro.is_def && ro.is_dead)
    }

    /// True if the instruction has a def operand of exactly `reg`.
    pub fn modifies_register(&self, reg: Reg) -> bool {
        self.reg_operands().any(|(_, ro)| ro.reg == reg && ro.is_def)
    }

    /// True if the definition of `reg` is tied to a use of the same register
    /// in this instruction (read-modify-write operand).
    pub fn def_is_tied_to_use(&self, reg: Reg) -> bool {
        self.reg_operands()
            .any(|(_, ro)| ro.reg == reg && ro.is_def && ro.is_use)
    }
}
