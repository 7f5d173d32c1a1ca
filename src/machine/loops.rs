//! Loop nesting information
//!
//! Detects natural loops from the CFG and records each block's loop nesting
//! depth. The coalescer visits deeply nested blocks first so hot-path copies
//! are eliminated preferentially, and spill weights scale with depth.

use crate::machine::function::{BlockId, MachineFunction};
use std::collections::HashSet;

/// Per-block loop nesting depth for one function.
#[derive(Clone, Debug)]
pub struct LoopInfo {
    depth: Vec<u32>,
    has_loops: bool,
}

impl LoopInfo {
    /// Compute dominators, find back edges, and collect natural loop bodies.
    pub fn compute(mf: &MachineFunction) -> LoopInfo {
        let n = mf.blocks.len();
        let mut depth = vec![0u32; n];
        if n == 0 {
            return LoopInfo {
                depth,
                has_loops: false,
            };
        }

        let reachable: HashSet<BlockId> = mf.dfs_order().into_iter().collect();

        // Iterative dominator sets: dom[b] = {b} ∪ ⋂ dom[pred].
        let full: HashSet<BlockId> = reachable.iter().copied().collect();
        let mut dom: Vec<HashSet<BlockId>> = (0..n)
            .map(|i| {
                let b = BlockId(i as u32);
                if b == mf.entry {
                    [b].into_iter().collect()
                } else {
                    full.clone()
                }
            })
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &reachable {
                if b == mf.entry {
                    continue;
                }
                let mut new_dom: Option<HashSet<BlockId>> = None;
                for &p in &mf.block(b).preds {
                    if !reachable.contains(&p) {
                        continue;
                    }
                    new_dom = Some(match new_dom {
                        None => dom[p.index()].clone(),
                        Some(acc) => acc.intersection(&dom[p.index()]).copied().collect(),
                    });
                }
                let mut new_dom = new_dom.unwrap_or_default();
                new_dom.insert(b);
                if new_dom != dom[b.index()] {
                    dom[b.index()] = new_dom;
                    changed = true;
                }
            }
        }

        // A back edge tail -> header (header dominates tail) closes a natural
        // loop; its body is everything that reaches the tail without passing
        // through the header.
        let mut loops: Vec<HashSet<BlockId>> = Vec::new();
        for &tail in &reachable {
            for &header in &mf.block(tail).succs {
                if !reachable.contains(&header) || !dom[tail.index()].contains(&header) {
                    continue;
                }
                let mut body: HashSet<BlockId> = [header].into_iter().collect();
                let mut worklist = vec![tail];
                while let Some(b) = worklist.pop() {
                    if body.insert(b) {
                        for &p in &mf.block(b).preds {
                            if reachable.contains(&p) {
                                worklist.push(p);
                            }
                        }
                    }
                }
                loops.push(body);
            }
        }

        for body in &loops {
            for &b in body {
                depth[b.index()] += 1;
            }
        }

        LoopInfo {
            depth,
            has_loops: !loops.is_empty(),
        }
    }

    /// Nesting depth of a block; 0 for blocks outside any loop.
    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth[block.index()]
    }

    pub fn has_loops(&self) -> bool {
        self.has_loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line_has_no_loops() {
        let mut mf = MachineFunction::new("straight");
        let a = mf.add_block("a");
        let b = mf.add_block("b");
        mf.add_edge(a, b);

        let loops = LoopInfo::compute(&mf);
        assert!(!loops.has_loops());
        assert_eq!(loops.depth(a), 0);
        assert_eq!(loops.depth(b), 0);
    }

    #[test]
    fn test_single_loop_depth() {
        // entry -> header <-> body, header -> exit
        let mut mf = MachineFunction::new("loop");
        let entry = mf.add_block("entry");
        let header = mf.add_block("header");
        let body = mf.add_block("body");
        let exit = mf.add_block("exit");
        mf.add_edge(entry, header);
        mf.add_edge(header, body);
        mf.add_edge(body, header);
        mf.add_edge(header, exit);

        let loops = LoopInfo::compute(&mf);
        assert!(loops.has_loops());
        assert_eq!(loops.depth(entry), 0);
        assert_eq!(loops.depth(header), 1);
        assert_eq!(loops.depth(body), 1);
        assert_eq!(loops.depth(exit), 0);
    }

    #[test]
    fn test_nested_loop_depth() {
        // entry -> outer <-> inner (inner also loops on itself)
        let mut mf = MachineFunction::new("nested");
        let entry = mf.add_block("entry");
        let outer = mf.add_block("outer");
        let inner = mf.add_block("inner");
        let exit = mf.add_block("exit");
        mf.add_edge(entry, outer);
        mf.add_edge(outer, inner);
        mf.add_edge(inner, inner);
        mf.add_edge(inner, outer);
        mf.add_edge(outer, exit);

        let loops = LoopInfo::compute(&mf);
        assert_eq!(loops.depth(outer), 1);
        assert_eq!(loops.depth(inner), 2);
        assert_eq!(loops.depth(exit), 0);
    }
}
