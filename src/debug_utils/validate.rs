//! Input function validation.

use alloc::format;
use alloc::string::String;
use core::fmt;

use hashbrown::{HashMap, HashSet};
use rustc_hash::FxBuildHasher;

use crate::lir::{Block, Inst, Lir, Op, Operand, OperandRole};
use crate::target::TargetDesc;

/// Error returned when the input function fails validation.
#[derive(Debug)]
pub struct ValidationError(String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! ensure {
    ($cond:expr, $($fmt:tt)*) => {
        if !$cond {
            return Err(ValidationError(format!($($fmt)*)));
        }
    };
}

/// Checks a function against the pre-conditions required by the register
/// allocator.
///
/// As long as validation succeeds, the allocator will not panic on the
/// input. It may still return an error, for example when an instruction
/// needs more registers than the target has.
pub fn validate_lir(lir: &Lir, target: &TargetDesc) -> Result<(), ValidationError> {
    let ctx = Context { lir, target };
    ctx.check_block_order()?;
    ctx.check_edges()?;
    ctx.check_blocks()?;
    Ok(())
}

struct Context<'a> {
    lir: &'a Lir,
    target: &'a TargetDesc,
}

impl Context<'_> {
    fn check_block_order(&self) -> Result<(), ValidationError> {
        let order = self.lir.block_order();
        ensure!(!order.is_empty(), "the block order is empty");
        let mut seen: HashSet<Block, FxBuildHasher> = HashSet::default();
        for &block in order {
            ensure!(
                block.index() < self.lir.num_blocks(),
                "{block}: invalid block reference"
            );
            ensure!(seen.insert(block), "{block} appears twice in the block order");
        }
        let entry = order[0];
        ensure!(
            self.lir.block(entry).preds.is_empty(),
            "the entry block {entry} has predecessors"
        );
        Ok(())
    }

    /// Successor, handler and predecessor lists must describe the same edge
    /// multiset.
    fn check_edges(&self) -> Result<(), ValidationError> {
        let mut edges: HashMap<(Block, Block), i32, FxBuildHasher> = HashMap::default();
        for &block in self.lir.block_order() {
            let data = self.lir.block(block);
            for &succ in data.succs.iter().chain(&data.handlers) {
                *edges.entry((block, succ)).or_default() += 1;
            }
            for &pred in &data.preds {
                *edges.entry((pred, block)).or_default() -= 1;
            }
        }
        for (&(from, to), &count) in &edges {
            ensure!(
                count == 0,
                "the edge {from} -> {to} is recorded asymmetrically"
            );
        }
        Ok(())
    }

    fn check_blocks(&self) -> Result<(), ValidationError> {
        let mut inst_owner: HashMap<Inst, Block, FxBuildHasher> = HashMap::default();
        for &block in self.lir.block_order() {
            let data = self.lir.block(block);

            for &inst in &data.insts {
                if let Some(&other) = inst_owner.get(&inst) {
                    return Err(ValidationError(format!(
                        "{inst} appears in both {other} and {block}"
                    )));
                }
                inst_owner.insert(inst, block);
            }

            self.check_terminators(block)?;
            self.check_operands(block)?;
            self.check_exception_entry(block)?;

            // Critical edges must have been split by the client.
            if data.succs.len() > 1 {
                for &succ in &data.succs {
                    ensure!(
                        self.lir.block(succ).preds.len() == 1,
                        "the edge {block} -> {succ} is critical"
                    );
                }
            }

            if data.loop_depth > 0 {
                ensure!(
                    data.loop_index != u32::MAX,
                    "{block} has a loop depth but no loop index"
                );
            }
        }
        Ok(())
    }

    fn check_terminators(&self, block: Block) -> Result<(), ValidationError> {
        let data = self.lir.block(block);
        ensure!(!data.insts.is_empty(), "{block} has no terminator");
        let len = data.insts.len();
        for (index, &inst) in data.insts.iter().enumerate() {
            match self.lir.inst(inst).op {
                Op::Jump { target } | Op::Branch { target, .. } => {
                    ensure!(
                        data.succs.contains(&target),
                        "{block} branches to {target} which is not a successor"
                    );
                }
                _ => {}
            }
            match self.lir.inst(inst).op {
                Op::Jump { .. } | Op::Return { .. } => {
                    ensure!(
                        index == len - 1,
                        "{inst} terminates {block} before its last position"
                    );
                }
                Op::Branch { .. } => {
                    ensure!(
                        index == len - 2,
                        "{inst}: a conditional branch must immediately precede \
                         the terminator of {block}"
                    );
                }
                _ => {}
            }
        }
        if let Some(&last) = data.insts.last() {
            ensure!(
                matches!(self.lir.inst(last).op, Op::Jump { .. } | Op::Return { .. }),
                "{block} does not end in a jump or return"
            );
        }
        Ok(())
    }

    fn check_operands(&self, block: Block) -> Result<(), ValidationError> {
        for &inst in &self.lir.block(block).insts {
            let mut bad: Option<Operand> = None;
            for role in [OperandRole::Input, OperandRole::Temp, OperandRole::Output] {
                self.lir.inst(inst).for_each_operand(role, |operand| {
                    let ok = match operand {
                        Operand::Virt(vreg) => vreg.index() < self.lir.num_vregs(),
                        Operand::Reg(reg) => (reg.index() as u32) < self.target.num_regs(),
                        Operand::Stack(_) | Operand::Const(_) => true,
                    };
                    if !ok && bad.is_none() {
                        bad = Some(operand);
                    }
                });
            }
            if let Some(operand) = bad {
                return Err(ValidationError(format!(
                    "{inst}: invalid operand {operand}"
                )));
            }
        }
        Ok(())
    }

    fn check_exception_entry(&self, block: Block) -> Result<(), ValidationError> {
        let data = self.lir.block(block);
        for inputs in &data.phi_inputs {
            ensure!(
                data.preds.contains(&inputs.from),
                "{block} has phi inputs for {} which is not a predecessor",
                inputs.from
            );
            ensure!(
                inputs.operands.len() == data.exception_phis.len(),
                "{block}: phi inputs for {} do not match the phi count",
                inputs.from
            );
        }
        Ok(())
    }
}
