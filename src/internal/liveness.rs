//! Per-block liveness analysis.
//!
//! A forward scan over each block computes the upward-exposed reads
//! (`live_gen`) and the definitions (`live_kill`); a backward dataflow
//! fixpoint over the block graph, including exception edges, then computes
//! `live_in`/`live_out`. Only virtual registers participate; fixed physical
//! registers are never live across block boundaries.

use alloc::vec::Vec;

use crate::entity::{EntitySet, SecondaryMap};
use crate::lir::{Block, BlockFlags, Lir, OperandRole, VirtReg};
use crate::{AllocError, Stats};

/// Iteration bound for the fixpoint. A well-formed block graph converges in
/// far fewer passes; hitting the bound means the input CFG is malformed.
const MAX_ITERATIONS: u32 = 50;

/// Liveness bit sets of one block.
#[derive(Clone, Default)]
pub(crate) struct BlockLive {
    /// Values read before any write in this block.
    pub r#gen: EntitySet<VirtReg>,
    /// Values written in this block.
    pub kill: EntitySet<VirtReg>,
    /// Values live at block entry.
    pub live_in: EntitySet<VirtReg>,
    /// Values live at block exit.
    pub live_out: EntitySet<VirtReg>,
}

/// Liveness analysis results, reused across allocation runs.
pub(crate) struct Liveness {
    pub blocks: SecondaryMap<Block, BlockLive>,

    /// For each loop index, the set of values live at some point inside the
    /// loop. Drives the loop-end markers of the interval builder.
    loops: Vec<EntitySet<VirtReg>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            blocks: SecondaryMap::new(),
            loops: Vec::new(),
        }
    }

    /// Whether the value is used or defined somewhere inside the given loop.
    pub fn in_loop(&self, vreg: VirtReg, loop_index: u32) -> bool {
        self.loops
            .get(loop_index as usize)
            .is_some_and(|set| set.contains(vreg))
    }

    pub fn compute(&mut self, lir: &Lir, stats: &mut Stats) -> Result<(), AllocError> {
        self.compute_local(lir);
        self.compute_global(lir, stats)
    }

    /// Computes `gen`/`kill` for every block and the value-in-loop map.
    fn compute_local(&mut self, lir: &Lir) {
        let num_vregs = lir.num_vregs();
        self.blocks.clear_and_resize(lir.num_blocks());
        for live in self.blocks.values_mut() {
            live.r#gen.clear_and_resize(num_vregs);
            live.kill.clear_and_resize(num_vregs);
            live.live_in.clear_and_resize(num_vregs);
            live.live_out.clear_and_resize(num_vregs);
        }

        let num_loops = lir
            .block_order()
            .iter()
            .map(|&b| lir.block(b).loop_index)
            .filter(|&idx| idx != u32::MAX)
            .map(|idx| idx + 1)
            .max()
            .unwrap_or(0);
        self.loops.clear();
        self.loops
            .resize_with(num_loops as usize, EntitySet::new);
        for set in &mut self.loops {
            set.clear_and_resize(num_vregs);
        }

        for &block in lir.block_order() {
            let data = lir.block(block);
            let loop_index = data.loop_index;
            let live = &mut self.blocks[block];

            // Phi values of an exception entry are defined on entry, before
            // any instruction.
            if data.flags.contains(BlockFlags::EXCEPTION_ENTRY) {
                for &phi in &data.exception_phis {
                    live.kill.insert(phi);
                }
            }

            for &inst in &data.insts {
                let inst = lir.inst(inst);
                inst.for_each_operand(OperandRole::Input, |opr| {
                    if let Some(vreg) = opr.as_virt() {
                        if !live.kill.contains(vreg) {
                            live.r#gen.insert(vreg);
                        }
                    }
                });
                if let Some(info) = &inst.info {
                    for &vreg in &info.live_values {
                        if !live.kill.contains(vreg) {
                            live.r#gen.insert(vreg);
                        }
                    }
                }
                inst.for_each_operand(OperandRole::Temp, |opr| {
                    if let Some(vreg) = opr.as_virt() {
                        live.kill.insert(vreg);
                    }
                });
                inst.for_each_operand(OperandRole::Output, |opr| {
                    if let Some(vreg) = opr.as_virt() {
                        live.kill.insert(vreg);
                    }
                });
            }

            // Phi inputs on exception edges are read at the end of the
            // throwing block.
            for &handler in &data.handlers {
                for inputs in &lir.block(handler).phi_inputs {
                    if inputs.from != block {
                        continue;
                    }
                    for opr in &inputs.operands {
                        if let Some(vreg) = opr.as_virt() {
                            if !live.kill.contains(vreg) {
                                live.r#gen.insert(vreg);
                            }
                        }
                    }
                }
            }

            if loop_index != u32::MAX {
                let in_loop = &mut self.loops[loop_index as usize];
                in_loop.union_with(&live.r#gen);
                in_loop.union_with(&live.kill);
            }
        }
    }

    /// Backward fixpoint over the block graph including exception edges.
    fn compute_global(&mut self, lir: &Lir, stats: &mut Stats) -> Result<(), AllocError> {
        let num_vregs = lir.num_vregs();
        let mut live_out = EntitySet::with_max_index(num_vregs);
        let mut live_in = EntitySet::with_max_index(num_vregs);

        let mut iteration = 0;
        loop {
            let mut change_occurred = false;

            for &block in lir.block_order().iter().rev() {
                let data = lir.block(block);

                live_out.clear_and_resize(num_vregs);
                for &succ in data.succs.iter().chain(&data.handlers) {
                    live_out.union_with(&self.blocks[succ].live_in);
                }

                let block_changed = live_out != self.blocks[block].live_out;
                if iteration == 0 || block_changed {
                    // live_in = gen | (live_out - kill)
                    let live = &self.blocks[block];
                    live_in.copy_from(&live_out);
                    for vreg in &live.kill {
                        live_in.remove(vreg);
                    }
                    live_in.union_with(&live.r#gen);

                    let live = &mut self.blocks[block];
                    live.live_out.copy_from(&live_out);
                    live.live_in.copy_from(&live_in);
                    change_occurred |= block_changed;
                }
            }

            iteration += 1;
            stat!(stats, liveness_iterations);
            if !change_occurred {
                break;
            }
            if iteration > MAX_ITERATIONS {
                return Err(AllocError::LivenessNotConverged);
            }
        }

        // A value live into the entry block is used before it is defined.
        let entry = lir.block_order()[0];
        if let Some(vreg) = self.blocks[entry].live_in.iter().next() {
            return Err(AllocError::LiveIntoEntry(vreg));
        }
        Ok(())
    }
}
