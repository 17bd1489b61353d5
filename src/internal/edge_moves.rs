//! Move hoisting and sinking across block boundaries.
//!
//! Data-flow resolution emits the same move on several edges when all
//! predecessors of a join leave a value in the same wrong place. This pass
//! hoists a move shared by every predecessor into the join block and,
//! symmetrically, sinks a move shared by both targets of a two-way branch
//! into the branching block.

use crate::Stats;
use crate::lir::{Block, BlockFlags, Inst, Lir, Op};

pub(crate) fn optimize(lir: &mut Lir, stats: &mut Stats) {
    for index in 0..lir.block_order().len() {
        let block = lir.block_order()[index];
        if lir.block(block).preds.len() > 1
            && !lir.block(block).flags.contains(BlockFlags::EXCEPTION_ENTRY)
        {
            hoist_predecessor_moves(lir, block, stats);
        }
        if lir.block(block).succs.len() == 2 {
            sink_successor_moves(lir, block, stats);
        }
    }
}

/// A move that can migrate across an edge: no debug info and not a control
/// transfer.
fn migratable_move(lir: &Lir, inst: Inst) -> bool {
    lir.inst(inst).as_move().is_some() && lir.inst(inst).info.is_none()
}

/// Index of the instruction feeding the edge out of `pred`, just before its
/// final jump. Returns `None` when the block does not end in a lone
/// unconditional jump to `block`.
fn edge_move_index(lir: &Lir, pred: Block, block: Block) -> Option<usize> {
    if lir.block(pred).succs.len() != 1 {
        return None;
    }
    let insts = &lir.block(pred).insts;
    let &last = insts.last()?;
    match lir.inst(last).op {
        Op::Jump { target } if target == block => insts.len().checked_sub(2),
        _ => None,
    }
}

/// Moves a trailing move shared by all predecessors into the head of the
/// join block, repeating while the predecessors keep agreeing.
fn hoist_predecessor_moves(lir: &mut Lir, block: Block, stats: &mut Stats) {
    let preds = lir.block(block).preds.clone();
    if preds.iter().any(|&pred| pred == block) {
        return;
    }

    loop {
        let mut shared: Option<Inst> = None;
        let mut same = true;
        for &pred in &preds {
            let candidate = edge_move_index(lir, pred, block)
                .map(|index| lir.block(pred).insts[index])
                .filter(|&inst| migratable_move(lir, inst));
            match (candidate, shared) {
                (Some(inst), None) => shared = Some(inst),
                (Some(inst), Some(first)) if lir.inst(inst).op == lir.inst(first).op => {}
                _ => {
                    same = false;
                    break;
                }
            }
        }
        let Some(first) = shared else { break };
        if !same {
            break;
        }

        for &pred in &preds {
            let index = lir.block(pred).insts.len() - 2;
            lir.block_mut(pred).insts.remove(index);
        }
        // Hoisting walks the predecessor tails backwards, so each move goes
        // in front of the ones hoisted before it.
        lir.block_mut(block).insts.insert(0, first);
        stat!(stats, moves_hoisted);
        trace!("hoisted a shared move into {block}");
    }
}

/// Sinks a leading move shared by both targets of a two-way branch to just
/// before the branch, repeating while the targets keep agreeing.
fn sink_successor_moves(lir: &mut Lir, block: Block, stats: &mut Stats) {
    let insts = &lir.block(block).insts;
    let len = insts.len();
    if len < 2 {
        return;
    }
    // Expect the conditional branch followed by the unconditional jump.
    let branch = insts[len - 2];
    let jump = insts[len - 1];
    let (Op::Branch { target: taken, .. }, Op::Jump { target: fallthrough }) =
        (&lir.inst(branch).op, &lir.inst(jump).op)
    else {
        return;
    };
    let (taken, fallthrough) = (*taken, *fallthrough);
    if taken == fallthrough || taken == block || fallthrough == block {
        return;
    }
    // Either target reachable from elsewhere pins its moves in place.
    if lir.block(taken).preds.len() != 1 || lir.block(fallthrough).preds.len() != 1 {
        return;
    }

    loop {
        let first_taken = lir
            .block(taken)
            .insts
            .first()
            .copied()
            .filter(|&inst| migratable_move(lir, inst));
        let first_fall = lir
            .block(fallthrough)
            .insts
            .first()
            .copied()
            .filter(|&inst| migratable_move(lir, inst));
        let (Some(a), Some(b)) = (first_taken, first_fall) else {
            break;
        };
        if lir.inst(a).op != lir.inst(b).op {
            break;
        }

        lir.block_mut(taken).insts.remove(0);
        lir.block_mut(fallthrough).insts.remove(0);
        let at = lir.block(block).insts.len() - 2;
        lir.block_mut(block).insts.insert(at, a);
        stat!(stats, moves_sunk);
        trace!("sunk a shared move out of {taken} and {fallthrough}");
    }
}
