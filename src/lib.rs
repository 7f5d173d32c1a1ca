//! Cinder Compiler Backend — Register Allocation
//!
//! This crate implements the register allocation subsystem of the Cinder
//! retargetable compiler backend: it maps the virtual registers of a machine
//! function onto physical registers, spilling to stack slots when the
//! register file is exhausted.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Liveness    │──▶│ Live Interval│──▶│  Coalescer   │──▶│ Linear Scan  │
//! │  (def/kill)  │   │  Builder     │   │ (copy elim)  │   │  Allocator   │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                                 │
//!                                                          ┌──────▼───────┐
//!                                                          │ VirtRegMap   │
//!                                                          └──────────────┘
//! ```
//!
//! # Modules
//!
//! - `machine`: the machine-level IR the allocator operates on (functions,
//!   blocks, instructions, stack frame, loop info)
//! - `target`: target register descriptions and the instruction-info seam
//! - `regalloc`: liveness, live intervals, coalescing, linear-scan allocation

pub mod machine;
pub mod regalloc;
pub mod target;

pub use machine::{MachineBlock, MachineFunction, MachineInst, MachineOperand, Reg};
pub use regalloc::{run_linear_scan, AllocatorConfig, RegAllocStats, VirtRegMap};
pub use target::{RegClass, RegisterInfo, TargetInstrInfo};
