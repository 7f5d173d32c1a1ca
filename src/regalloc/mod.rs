//! Register allocation
//!
//! The allocation pipeline for one machine function:
//!
//! 1. [`liveness`]: def/kill/alive-through summary per virtual register
//! 2. [`numbering`]: four program points per instruction in traversal order
//! 3. [`intervals`]: one live interval per register
//! 4. [`coalesce`]: merge copy-connected intervals, delete identity moves
//! 5. [`linear_scan`]: assign registers, spilling and rolling back under
//!    pressure
//!
//! The durable product is the [`VirtRegMap`]: every virtual register mapped
//! to a physical register or a stack slot, consumed by the rewriting pass
//! downstream. Everything else is rebuilt per function.

pub mod coalesce;
pub mod interval;
pub mod intervals;
pub mod linear_scan;
pub mod liveness;
pub mod numbering;
pub mod tracker;
pub mod virt_reg_map;

#[cfg(test)]
mod tests;

pub use intervals::LiveIntervals;
pub use virt_reg_map::VirtRegMap;

use crate::machine::function::MachineFunction;
use crate::machine::loops::LoopInfo;
use crate::target::{RegisterInfo, TargetInstrInfo};
use log::debug;
use numbering::NumberingOrder;

/// Knobs for one allocation pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocatorConfig {
    /// Traversal order used for instruction numbering.
    pub numbering: NumberingOrder,
}

/// Observability counters for one pass invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RegAllocStats {
    /// Intervals built before coalescing.
    pub intervals: usize,
    /// Interval joins performed by the coalescer.
    pub joins: usize,
    /// Spill accesses folded into memory operands.
    pub folded: usize,
}

/// Run the full allocation pipeline on `mf`.
pub fn run_linear_scan(
    mf: &mut MachineFunction,
    ri: &RegisterInfo,
    tii: &dyn TargetInstrInfo,
    config: &AllocatorConfig,
) -> (VirtRegMap, RegAllocStats) {
    debug!("allocating registers for {}", mf.name);
    let mut stats = RegAllocStats::default();

    let order = match config.numbering {
        NumberingOrder::DepthFirst => mf.dfs_order(),
        NumberingOrder::Layout => mf.layout_order(),
    };
    let lv = liveness::LiveVariables::compute(mf, ri, &order);
    let numbering = numbering::InstrNumbering::compute(mf, order);
    let mut lis = LiveIntervals::compute(mf, ri, tii, &lv, numbering);
    stats.intervals = lis.num_intervals();

    let loops = LoopInfo::compute(mf);
    coalesce::join_intervals(&mut lis, mf, ri, tii, &loops, &mut stats);

    let vrm = linear_scan::run_on_function(mf, ri, tii, &mut lis, &mut stats);
    debug!(
        "{}: {} intervals, {} joins, {} folded",
        mf.name, stats.intervals, stats.joins, stats.folded
    );
    (vrm, stats)
}
