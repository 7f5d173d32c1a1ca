//! x86-64 register file and instruction info
//!
//! The general-purpose subset the backend allocates over: the sixteen 64-bit
//! registers with their 32-bit sub-registers, grouped into the GR64 and GR32
//! classes, plus the instruction shapes the allocator recognizes and
//! rewrites. Allocation order puts caller-saved registers first so leaf
//! functions avoid save/restore traffic; R11 stays out of the order because
//! emission uses it as the scratch register.

use super::{RegClass, RegClassDesc, RegDesc, RegisterInfo, TargetInstrInfo};
use crate::machine::frame::StackSlot;
use crate::machine::instr::{MachineInst, MachineOperand, Opcode, Reg};

// 64-bit general purpose registers.
pub const RAX: Reg = Reg(1);
pub const RCX: Reg = Reg(2);
pub const RDX: Reg = Reg(3);
pub const RBX: Reg = Reg(4);
pub const RSI: Reg = Reg(5);
pub const RDI: Reg = Reg(6);
pub const R8: Reg = Reg(7);
pub const R9: Reg = Reg(8);
pub const R10: Reg = Reg(9);
pub const R11: Reg = Reg(10);
pub const R12: Reg = Reg(11);
pub const R13: Reg = Reg(12);
pub const R14: Reg = Reg(13);
pub const R15: Reg = Reg(14);
pub const RSP: Reg = Reg(15);
pub const RBP: Reg = Reg(16);

// 32-bit sub-registers, in the same order as their parents.
pub const EAX: Reg = Reg(17);
pub const ECX: Reg = Reg(18);
pub const EDX: Reg = Reg(19);
pub const EBX: Reg = Reg(20);
pub const ESI: Reg = Reg(21);
pub const EDI: Reg = Reg(22);
pub const R8D: Reg = Reg(23);
pub const R9D: Reg = Reg(24);
pub const R10D: Reg = Reg(25);
pub const R11D: Reg = Reg(26);
pub const R12D: Reg = Reg(27);
pub const R13D: Reg = Reg(28);
pub const R14D: Reg = Reg(29);
pub const R15D: Reg = Reg(30);

pub const GR64: RegClass = RegClass(0);
pub const GR32: RegClass = RegClass(1);

const NAMES64: [&str; 14] = [
    "rax", "rcx", "rdx", "rbx", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];
const NAMES32: [&str; 14] = [
    "eax", "ecx", "edx", "ebx", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d", "r13d",
    "r14d", "r15d",
];

/// Build the x86-64 register file description.
pub fn register_info() -> RegisterInfo {
    let sub32 = |i: u32| Reg(EAX.0 + i);
    let parent64 = |i: u32| Reg(RAX.0 + i);

    let mut regs = Vec::new();
    for (i, &name) in NAMES64.iter().enumerate() {
        regs.push(RegDesc {
            name,
            aliases: vec![sub32(i as u32)],
            sub_regs: vec![sub32(i as u32)],
        });
    }
    regs.push(RegDesc {
        name: "rsp",
        aliases: vec![],
        sub_regs: vec![],
    });
    regs.push(RegDesc {
        name: "rbp",
        aliases: vec![],
        sub_regs: vec![],
    });
    for (i, &name) in NAMES32.iter().enumerate() {
        regs.push(RegDesc {
            name,
            aliases: vec![parent64(i as u32)],
            sub_regs: vec![],
        });
    }

    let gr64_order = vec![
        RAX, RCX, RDX, RSI, RDI, R8, R9, R10, RBX, R12, R13, R14, R15,
    ];
    let gr32_order = vec![
        EAX, ECX, EDX, ESI, EDI, R8D, R9D, R10D, EBX, R12D, R13D, R14D, R15D,
    ];

    RegisterInfo::new(
        regs,
        vec![
            RegClassDesc {
                name: "GR64",
                spill_size: 8,
                spill_align: 8,
                alloc_order: gr64_order,
            },
            RegClassDesc {
                name: "GR32",
                spill_size: 4,
                spill_align: 4,
                alloc_order: gr32_order,
            },
        ],
    )
}

/// Opcode numbers for the instruction shapes the backend emits.
pub mod opcodes {
    use crate::machine::instr::Opcode;

    pub const MOV64RR: Opcode = Opcode(0);
    pub const MOV64RI: Opcode = Opcode(1);
    /// Load: `reg <- [slot]`.
    pub const MOV64RM: Opcode = Opcode(2);
    /// Store: `[slot] <- reg`.
    pub const MOV64MR: Opcode = Opcode(3);
    pub const MOV32RR: Opcode = Opcode(4);
    pub const MOV32RI: Opcode = Opcode(5);
    pub const MOV32RM: Opcode = Opcode(6);
    pub const MOV32MR: Opcode = Opcode(7);
    pub const ADD64RR: Opcode = Opcode(8);
    pub const ADD64RM: Opcode = Opcode(9);
    pub const CMP64RR: Opcode = Opcode(10);
    pub const CMP64RM: Opcode = Opcode(11);
    pub const JMP: Opcode = Opcode(12);
    pub const JCC: Opcode = Opcode(13);
    pub const CALL: Opcode = Opcode(14);
    pub const RET: Opcode = Opcode(15);
}

/// Instruction info for the x86-64 backend.
pub struct X86InstrInfo;

pub fn instr_info() -> X86InstrInfo {
    X86InstrInfo
}

impl X86InstrInfo {
    fn explicit_reg_pair(mi: &MachineInst) -> Option<(Reg, Reg)> {
        let dst = mi.operands.first()?.as_reg()?;
        let src = mi.operands.get(1)?.as_reg()?;
        if dst.is_def && !dst.is_implicit && src.is_use && !src.is_implicit {
            Some((src.reg, dst.reg))
        } else {
            None
        }
    }

    fn with_slot_operand(mi: &MachineInst, opcode: Opcode, op_idx: usize, slot: StackSlot) -> MachineInst {
        let mut folded = mi.clone();
        folded.opcode = opcode;
        folded.operands[op_idx] = MachineOperand::slot(slot);
        folded
    }
}

impl TargetInstrInfo for X86InstrInfo {
    fn is_move(&self, mi: &MachineInst) -> Option<(Reg, Reg)> {
        if mi.opcode != opcodes::MOV64RR && mi.opcode != opcodes::MOV32RR {
            return None;
        }
        Self::explicit_reg_pair(mi)
    }

    fn fold_memory_operand(
        &self,
        mi: &MachineInst,
        op_idx: usize,
        slot: StackSlot,
    ) -> Option<MachineInst> {
        let ro = *mi.operands.get(op_idx)?.as_reg()?;
        match mi.opcode {
            opcodes::MOV64RR | opcodes::MOV32RR => {
                let is64 = mi.opcode == opcodes::MOV64RR;
                if op_idx == 0 && ro.is_def {
                    // Store the source straight to the slot.
                    let op = if is64 {
                        opcodes::MOV64MR
                    } else {
                        opcodes::MOV32MR
                    };
                    Some(Self::with_slot_operand(mi, op, op_idx, slot))
                } else if op_idx == 1 && ro.is_use {
                    // Load the destination straight from the slot.
                    let op = if is64 {
                        opcodes::MOV64RM
                    } else {
                        opcodes::MOV32RM
                    };
                    Some(Self::with_slot_operand(mi, op, op_idx, slot))
                } else {
                    None
                }
            }
            // The plain-use side of these has a memory form; the tied
            // destination of ADD does not get folded here.
            opcodes::ADD64RR if op_idx == 1 => {
                Some(Self::with_slot_operand(mi, opcodes::ADD64RM, op_idx, slot))
            }
            opcodes::CMP64RR if op_idx == 1 => {
                Some(Self::with_slot_operand(mi, opcodes::CMP64RM, op_idx, slot))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_register_aliasing_is_symmetric() {
        let ri = register_info();
        assert_eq!(ri.aliases(RAX), &[EAX]);
        assert_eq!(ri.aliases(EAX), &[RAX]);
        assert_eq!(ri.sub_regs(RAX), &[EAX]);
        assert!(ri.sub_regs(EAX).is_empty());
        assert_eq!(ri.name(R15D), "r15d");
    }

    #[test]
    fn test_reserved_registers_are_not_allocatable() {
        let ri = register_info();
        assert!(!ri.is_allocatable(RSP));
        assert!(!ri.is_allocatable(RBP));
        assert!(!ri.is_allocatable(R11));
        assert!(!ri.is_allocatable(R11D));
        assert!(ri.is_allocatable(RAX));
        assert!(ri.is_allocatable(R15D));
    }

    #[test]
    fn test_move_recognition() {
        let tii = instr_info();
        let copy = MachineInst::new(
            opcodes::MOV64RR,
            vec![
                MachineOperand::def_reg(RAX),
                MachineOperand::use_reg(Reg::virt(0)),
            ],
        );
        assert_eq!(tii.is_move(&copy), Some((Reg::virt(0), RAX)));

        let imm = MachineInst::new(
            opcodes::MOV64RI,
            vec![MachineOperand::def_reg(RAX), MachineOperand::imm(1)],
        );
        assert_eq!(tii.is_move(&imm), None);
    }

    #[test]
    fn test_fold_rewrites_moves_to_memory_forms() {
        let tii = instr_info();
        let slot = StackSlot(2);
        let copy = MachineInst::new(
            opcodes::MOV64RR,
            vec![
                MachineOperand::def_reg(Reg::virt(0)),
                MachineOperand::use_reg(Reg::virt(1)),
            ],
        );

        let load = tii.fold_memory_operand(&copy, 1, slot).unwrap();
        assert_eq!(load.opcode, opcodes::MOV64RM);
        assert_eq!(load.operands[1], MachineOperand::slot(slot));

        let store = tii.fold_memory_operand(&copy, 0, slot).unwrap();
        assert_eq!(store.opcode, opcodes::MOV64MR);
        assert_eq!(store.operands[0], MachineOperand::slot(slot));
    }

    #[test]
    fn test_fold_rejects_tied_add_destination() {
        let tii = instr_info();
        let add = MachineInst::new(
            opcodes::ADD64RR,
            vec![
                MachineOperand::def_use_reg(Reg::virt(0)),
                MachineOperand::use_reg(Reg::virt(1)),
            ],
        );
        assert!(tii.fold_memory_operand(&add, 0, StackSlot(0)).is_none());
        let folded = tii.fold_memory_operand(&add, 1, StackSlot(0)).unwrap();
        assert_eq!(folded.opcode, opcodes::ADD64RM);
    }
}
