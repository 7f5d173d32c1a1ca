//! Physical register availability tracking
//!
//! Reference counts per physical register id. Marking a register busy also
//! marks everything it aliases, so a 32-bit sub-register and its 64-bit
//! parent can never be handed out at the same time. Counts rather than bits:
//! a register can be busy through several overlapping aliases at once.

use crate::machine::instr::Reg;
use crate::target::RegisterInfo;

#[derive(Clone, Debug)]
pub struct PhysRegTracker {
    uses: Vec<u32>,
}

impl PhysRegTracker {
    pub fn new(ri: &RegisterInfo) -> PhysRegTracker {
        PhysRegTracker {
            uses: vec![0; ri.num_regs()],
        }
    }

    pub fn add_reg_use(&mut self, ri: &RegisterInfo, reg: Reg) {
        assert!(reg.is_physical());
        self.uses[reg.0 as usize] += 1;
        for &a in ri.aliases(reg) {
            self.uses[a.0 as usize] += 1;
        }
    }

    pub fn del_reg_use(&mut self, ri: &RegisterInfo, reg: Reg) {
        assert!(reg.is_physical());
        assert!(self.uses[reg.0 as usize] > 0, "freeing an unused register");
        self.uses[reg.0 as usize] -= 1;
        for &a in ri.aliases(reg) {
            assert!(self.uses[a.0 as usize] > 0, "freeing an unused register");
            self.uses[a.0 as usize] -= 1;
        }
    }

    pub fn is_reg_avail(&self, reg: Reg) -> bool {
        debug_assert!(reg.is_physical());
        self.uses[reg.0 as usize] == 0
    }
}
