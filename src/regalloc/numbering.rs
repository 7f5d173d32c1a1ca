//! Program point numbering
//!
//! Every instruction gets a dense block of four consecutive program points
//! in CFG traversal order:
//!
//! ```text
//! LOAD < USE < DEF < STORE
//! ```
//!
//! The extra LOAD and STORE slots give spill code room to live before the
//! use and after the def of the instruction it surrounds. Numbering is
//! assigned once per allocation pass and never shifts: deleting an
//! instruction leaves a hole, and a replacement reuses the replaced
//! instruction's point.

use crate::machine::function::{BlockId, InstrId, MachineFunction};
use rustc_hash::FxHashMap;
use std::fmt;

/// Point slots within one instruction's block of four.
pub mod slots {
    pub const LOAD: u32 = 0;
    pub const USE: u32 = 1;
    pub const DEF: u32 = 2;
    pub const STORE: u32 = 3;
    pub const COUNT: u32 = 4;
}

/// A position in the numbered instruction stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramPoint(pub u32);

impl ProgramPoint {
    /// First point of the owning instruction's block of four.
    pub fn base(self) -> ProgramPoint {
        ProgramPoint(self.0 / slots::COUNT * slots::COUNT)
    }

    pub fn load_slot(self) -> ProgramPoint {
        ProgramPoint(self.base().0 + slots::LOAD)
    }

    pub fn use_slot(self) -> ProgramPoint {
        ProgramPoint(self.base().0 + slots::USE)
    }

    pub fn def_slot(self) -> ProgramPoint {
        ProgramPoint(self.base().0 + slots::DEF)
    }

    pub fn store_slot(self) -> ProgramPoint {
        ProgramPoint(self.base().0 + slots::STORE)
    }

    pub fn next(self) -> ProgramPoint {
        ProgramPoint(self.0 + 1)
    }

    pub fn prev(self) -> ProgramPoint {
        debug_assert!(self.0 > 0);
        ProgramPoint(self.0 - 1)
    }

    /// Base point of the next instruction.
    pub fn next_instr(self) -> ProgramPoint {
        ProgramPoint(self.base().0 + slots::COUNT)
    }

    /// Ordinal of the owning instruction in numbering order.
    pub fn instr_number(self) -> usize {
        (self.0 / slots::COUNT) as usize
    }
}

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal order used to lay out program points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NumberingOrder {
    /// Depth-first preorder from the entry block.
    #[default]
    DepthFirst,
    /// Block layout order.
    Layout,
}

/// The point assignment for one function.
#[derive(Clone, Debug)]
pub struct InstrNumbering {
    order: Vec<BlockId>,
    point_of: FxHashMap<InstrId, ProgramPoint>,
    at_point: Vec<Option<InstrId>>,
    /// First and last instruction base points per block; empty blocks absent.
    block_bounds: FxHashMap<BlockId, (ProgramPoint, ProgramPoint)>,
}

impl InstrNumbering {
    /// Number every instruction of `mf` in the given traversal order.
    pub fn compute(mf: &MachineFunction, order: Vec<BlockId>) -> InstrNumbering {
        let mut point_of = FxHashMap::default();
        let mut at_point = Vec::new();
        let mut block_bounds = FxHashMap::default();

        let mut next = 0u32;
        for &b in &order {
            let block = mf.block(b);
            if block.is_empty() {
                continue;
            }
            let first = ProgramPoint(next);
            for (i, _) in block.insts.iter().enumerate() {
                let id = InstrId::new(b, i);
                let prior = point_of.insert(id, ProgramPoint(next));
                assert!(prior.is_none(), "duplicate numbering for {}", id);
                at_point.push(Some(id));
                next += slots::COUNT;
            }
            let last = ProgramPoint(next - slots::COUNT);
            block_bounds.insert(b, (first, last));
        }

        InstrNumbering {
            order,
            point_of,
            at_point,
            block_bounds,
        }
    }

    /// Blocks in the traversal order used for numbering.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// Base point of an instruction. The instruction must be numbered.
    pub fn point_of(&self, id: InstrId) -> ProgramPoint {
        match self.point_of.get(&id) {
            Some(&p) => p,
            None => panic!("instruction {} was never numbered", id),
        }
    }

    /// The instruction at a point, or `None` for a deletion hole.
    pub fn instruction_at(&self, point: ProgramPoint) -> Option<InstrId> {
        self.at_point.get(point.instr_number()).copied().flatten()
    }

    /// Mark the instruction at `point` as deleted; the point endures as a
    /// hole.
    pub fn clear_point(&mut self, point: ProgramPoint) {
        let n = point.instr_number();
        if let Some(id) = self.at_point[n].take() {
            self.point_of.remove(&id);
        }
    }

    /// First base point of a block, if it has instructions.
    pub fn block_start(&self, block: BlockId) -> Option<ProgramPoint> {
        self.block_bounds.get(&block).map(|&(first, _)| first)
    }

    /// One past the last point of a block: last instruction's base plus the
    /// slot count.
    pub fn block_end(&self, block: BlockId) -> Option<ProgramPoint> {
        self.block_bounds
            .get(&block)
            .map(|&(_, last)| last.next_instr())
    }

    /// Total number of numbered instruction slots (including holes).
    pub fn num_instr_slots(&self) -> usize {
        self.at_point.len()
    }
}
