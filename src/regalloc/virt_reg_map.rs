//! Virtual register map
//!
//! The durable product of allocation: every virtual register ends up mapped
//! to either a physical register or a stack slot. The map also records which
//! instructions had a spill access folded into a memory operand, so the
//! rewriting pass downstream does not emit a redundant load or store for
//! them.

use crate::machine::frame::StackSlot;
use crate::machine::function::InstrId;
use crate::machine::instr::Reg;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct VirtRegMap {
    v2p: FxHashMap<Reg, Reg>,
    v2slot: FxHashMap<Reg, StackSlot>,
    folded: FxHashMap<InstrId, Reg>,
}

impl VirtRegMap {
    pub fn new() -> VirtRegMap {
        VirtRegMap::default()
    }

    pub fn assign_virt_to_phys(&mut self, vreg: Reg, phys: Reg) {
        assert!(vreg.is_virtual() && phys.is_physical());
        let prev = self.v2p.insert(vreg, phys);
        debug_assert!(prev.is_none(), "{} already had a register", vreg);
    }

    pub fn phys(&self, vreg: Reg) -> Option<Reg> {
        debug_assert!(vreg.is_virtual());
        self.v2p.get(&vreg).copied()
    }

    /// Undo a physical-register binding during rollback. The stack-slot
    /// binding, if any, stays.
    pub fn clear_virt(&mut self, vreg: Reg) {
        self.v2p.remove(&vreg);
    }

    pub fn assign_virt_to_stack_slot(&mut self, vreg: Reg, slot: StackSlot) {
        assert!(vreg.is_virtual());
        let prev = self.v2slot.insert(vreg, slot);
        debug_assert!(prev.is_none(), "{} already had a stack slot", vreg);
    }

    pub fn stack_slot(&self, vreg: Reg) -> Option<StackSlot> {
        debug_assert!(vreg.is_virtual());
        self.v2slot.get(&vreg).copied()
    }

    pub fn has_stack_slot(&self, vreg: Reg) -> bool {
        self.v2slot.contains_key(&vreg)
    }

    /// Note that `id` was rewritten in place to address `vreg`'s slot.
    pub fn record_folded(&mut self, id: InstrId, vreg: Reg) {
        self.folded.insert(id, vreg);
    }

    pub fn is_folded(&self, id: InstrId) -> bool {
        self.folded.contains_key(&id)
    }

    pub fn phys_assignments(&self) -> impl Iterator<Item = (Reg, Reg)> + '_ {
        self.v2p.iter().map(|(&v, &p)| (v, p))
    }

    pub fn stack_assignments(&self) -> impl Iterator<Item = (Reg, StackSlot)> + '_ {
        self.v2slot.iter().map(|(&v, &s)| (v, s))
    }
}
