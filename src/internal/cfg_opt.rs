//! Control-flow cleanup after allocation.
//!
//! Allocation and resolution leave jump-only blocks and branches to the
//! fall-through block behind. This pass reorders short loops so the header
//! sits behind the body, deletes jump-only blocks with target forwarding,
//! removes jumps to the next block in the layout and threads jumps to
//! return-only blocks.

use alloc::vec::Vec;

use crate::Stats;
use crate::entity::{PackedOption, SecondaryMap};
use crate::lir::{Block, BlockFlags, Lir, Op};

pub(crate) fn optimize(lir: &mut Lir, short_loop_blocks: usize, stats: &mut Stats) {
    reorder_short_loops(lir, short_loop_blocks, stats);
    delete_jump_only_blocks(lir, stats);
    delete_fall_through_jumps(lir, stats);
    thread_jumps_to_return(lir, stats);
}

fn is_jump_only(lir: &Lir, block: Block) -> bool {
    let data = lir.block(block);
    data.insts.len() == 1 && matches!(lir.inst(data.insts[0]).op, Op::Jump { .. })
}

fn branch_targets_mut(lir: &mut Lir, block: Block, mut f: impl FnMut(&mut Block)) {
    for index in 0..lir.block(block).insts.len() {
        let inst = lir.block(block).insts[index];
        match &mut lir.inst_mut(inst).op {
            Op::Branch { target, .. } | Op::Jump { target } => f(target),
            _ => {}
        }
    }
}

/// Moves the header of a short loop behind its body, so the loop closes
/// with a single backward branch instead of branching over the header on
/// every iteration. Loops of up to `short_loop_blocks` blocks are rotated.
fn reorder_short_loops(lir: &mut Lir, short_loop_blocks: usize, stats: &mut Stats) {
    let order: Vec<Block> = lir.block_order().to_vec();
    for (header_index, &header) in order.iter().enumerate() {
        if !lir.block(header).flags.contains(BlockFlags::LOOP_HEADER) {
            continue;
        }
        let depth = lir.block(header).loop_depth;

        // The loop body follows the header in the layout.
        let mut end_index = header_index;
        while end_index + 1 < order.len()
            && end_index + 1 - header_index < short_loop_blocks
            && lir.block(order[end_index + 1]).loop_depth >= depth
        {
            end_index += 1;
        }
        if end_index == header_index {
            continue;
        }
        // Only complete short loops are rotated.
        if end_index + 1 < order.len() && lir.block(order[end_index + 1]).loop_depth >= depth {
            continue;
        }
        // The last body block must close the loop.
        let back_edge = lir
            .block(order[end_index])
            .succs
            .iter()
            .any(|&succ| succ == header);
        if !back_edge {
            continue;
        }

        trace!("rotating short loop headed by {header}");
        lir.order[header_index..=end_index].rotate_left(1);
        // The header's branch into the body is now the backward branch.
        let new_first = lir.order[header_index];
        lir.block_mut(header).flags -= BlockFlags::BACKWARD_BRANCH_TARGET;
        lir.block_mut(new_first).flags |= BlockFlags::BACKWARD_BRANCH_TARGET;
        stat!(stats, short_loops_rotated);
    }
}

/// Deletes blocks holding nothing but a jump, redirecting every branch to
/// them at their final destination.
fn delete_jump_only_blocks(lir: &mut Lir, stats: &mut Stats) {
    let mut forward: SecondaryMap<Block, PackedOption<Block>> = SecondaryMap::new();
    forward.clear_and_resize(lir.num_blocks());

    let order: Vec<Block> = lir.block_order().to_vec();
    let mut deleted = 0usize;
    for (index, &block) in order.iter().enumerate() {
        if index == 0 || !is_jump_only(lir, block) {
            continue;
        }
        let data = lir.block(block);
        if !data.handlers.is_empty() || data.flags.contains(BlockFlags::EXCEPTION_ENTRY) {
            continue;
        }
        let target = data.succs[0];
        if target == block {
            continue;
        }
        forward[block] = target.into();
        if lir
            .block(block)
            .flags
            .contains(BlockFlags::BACKWARD_BRANCH_TARGET)
        {
            lir.block_mut(target).flags |= BlockFlags::BACKWARD_BRANCH_TARGET;
        }
        deleted += 1;
    }
    if deleted == 0 {
        return;
    }

    // Chains of jump-only blocks collapse to their last target. The hop
    // limit covers jump-only blocks forming an unreachable cycle.
    let max_hops = lir.num_blocks();
    let resolve = |forward: &SecondaryMap<Block, PackedOption<Block>>, mut block: Block| {
        for _ in 0..max_hops {
            match forward[block].expand() {
                Some(next) => block = next,
                None => break,
            }
        }
        block
    };

    let kept: Vec<Block> = order
        .iter()
        .copied()
        .filter(|&block| forward[block].is_none())
        .collect();
    for &block in &kept {
        branch_targets_mut(lir, block, |target| *target = resolve(&forward, *target));
        for index in 0..lir.block(block).succs.len() {
            let succ = lir.block(block).succs[index];
            lir.block_mut(block).succs[index] = resolve(&forward, succ);
        }
        for index in 0..lir.block(block).handlers.len() {
            let handler = lir.block(block).handlers[index];
            lir.block_mut(block).handlers[index] = resolve(&forward, handler);
        }
    }
    // Rebuild predecessor lists from the surviving edges.
    for &block in &kept {
        lir.block_mut(block).preds.clear();
    }
    for &block in &kept {
        for index in 0..lir.block(block).succs.len() {
            let succ = lir.block(block).succs[index];
            lir.block_mut(succ).preds.push(block);
        }
        for index in 0..lir.block(block).handlers.len() {
            let handler = lir.block(block).handlers[index];
            lir.block_mut(handler).preds.push(block);
        }
    }
    lir.order = kept;
    trace!("deleted {deleted} jump-only blocks");
    stat!(stats, blocks_deleted, deleted);
}

/// Removes a trailing jump to the next block in the layout. A conditional
/// branch to the fall-through block is negated first when that lets the
/// following jump fall through instead.
fn delete_fall_through_jumps(lir: &mut Lir, stats: &mut Stats) {
    for index in 0..lir.block_order().len() {
        let block = lir.block_order()[index];
        let next = match lir.block_order().get(index + 1) {
            Some(&next) => next,
            None => continue,
        };
        let insts = &lir.block(block).insts;
        let len = insts.len();
        if len == 0 {
            continue;
        }

        let last = insts[len - 1];
        let Op::Jump { target } = lir.inst(last).op else {
            continue;
        };
        if target == next {
            lir.block_mut(block).insts.pop();
            stat!(stats, jumps_removed);
            continue;
        }
        if len >= 2 {
            let branch = lir.block(block).insts[len - 2];
            if let Op::Branch { cond, target: taken } = lir.inst(branch).op {
                if taken == next {
                    // Swap the two targets so the jump falls through.
                    lir.inst_mut(branch).op = Op::Branch {
                        cond: cond.negate(),
                        target,
                    };
                    lir.block_mut(block).insts.pop();
                    stat!(stats, jumps_removed);
                }
            }
        }
    }
}

/// Replaces a jump to a block holding only a return with that return. The
/// return block itself stays for its remaining predecessors.
fn thread_jumps_to_return(lir: &mut Lir, stats: &mut Stats) {
    for index in 0..lir.block_order().len() {
        let block = lir.block_order()[index];
        let Some(&last) = lir.block(block).insts.last() else {
            continue;
        };
        let Op::Jump { target } = lir.inst(last).op else {
            continue;
        };
        let target_insts = &lir.block(target).insts;
        if target_insts.len() != 1 {
            continue;
        }
        let Op::Return { value } = lir.inst(target_insts[0]).op else {
            continue;
        };

        trace!("threading jump in {block} to the return in {target}");
        lir.inst_mut(last).op = Op::Return { value };
        lir.block_mut(block).succs.retain(|&mut succ| succ != target);
        let position = lir.block(target).preds.iter().position(|&pred| pred == block);
        if let Some(position) = position {
            lir.block_mut(target).preds.swap_remove(position);
        }
        stat!(stats, jumps_to_return_threaded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{Cond, Operand, PhysReg};

    fn jump(lir: &mut Lir, from: Block, to: Block) {
        lir.push_inst(from, Op::Jump { target: to });
        lir.add_edge(from, to);
    }

    #[test]
    fn short_loop_header_moves_behind_the_body() {
        let mut lir = Lir::new();
        let entry = lir.create_block();
        let header = lir.create_block();
        let body_a = lir.create_block();
        let body_b = lir.create_block();
        let exit = lir.create_block();

        jump(&mut lir, entry, header);
        lir.push_inst(
            header,
            Op::Branch {
                cond: Cond::Eq,
                target: exit,
            },
        );
        lir.add_edge(header, exit);
        jump(&mut lir, header, body_a);
        jump(&mut lir, body_a, body_b);
        jump(&mut lir, body_b, header);

        for (block, depth) in [(header, 1), (body_a, 1), (body_b, 1)] {
            lir.block_mut(block).loop_depth = depth;
            lir.block_mut(block).loop_index = 0;
        }
        lir.block_mut(header).flags |= BlockFlags::LOOP_HEADER | BlockFlags::BACKWARD_BRANCH_TARGET;
        lir.block_mut(body_b).flags |= BlockFlags::LOOP_END;
        lir.set_block_order(alloc::vec![entry, header, body_a, body_b, exit]);

        let mut stats = Stats::default();
        reorder_short_loops(&mut lir, 5, &mut stats);

        assert_eq!(lir.block_order(), &[entry, body_a, body_b, header, exit]);
        assert!(
            lir.block(body_a)
                .flags
                .contains(BlockFlags::BACKWARD_BRANCH_TARGET)
        );
        assert!(
            !lir.block(header)
                .flags
                .contains(BlockFlags::BACKWARD_BRANCH_TARGET)
        );
        assert_eq!(stats.short_loops_rotated, 1);
    }

    #[test]
    fn oversized_loops_stay_in_place() {
        let mut lir = Lir::new();
        let entry = lir.create_block();
        let header = lir.create_block();
        let body: Vec<Block> = (0..5).map(|_| lir.create_block()).collect();
        let exit = lir.create_block();

        jump(&mut lir, entry, header);
        jump(&mut lir, header, body[0]);
        for pair in body.windows(2) {
            jump(&mut lir, pair[0], pair[1]);
        }
        jump(&mut lir, body[4], header);
        lir.block_mut(header).flags |= BlockFlags::LOOP_HEADER;
        lir.block_mut(header).loop_depth = 1;
        for &block in &body {
            lir.block_mut(block).loop_depth = 1;
        }
        let mut order = alloc::vec![entry, header];
        order.extend(&body);
        order.push(exit);
        lir.set_block_order(order.clone());

        let mut stats = Stats::default();
        reorder_short_loops(&mut lir, 5, &mut stats);
        assert_eq!(lir.block_order(), &order[..]);
        assert_eq!(stats.short_loops_rotated, 0);
    }

    #[test]
    fn jump_only_blocks_are_deleted_and_forwarded() {
        let mut lir = Lir::new();
        let entry = lir.create_block();
        let hop = lir.create_block();
        let exit = lir.create_block();
        jump(&mut lir, entry, hop);
        jump(&mut lir, hop, exit);
        lir.push_inst(exit, Op::Return { value: None });
        lir.set_block_order(alloc::vec![entry, hop, exit]);

        let mut stats = Stats::default();
        delete_jump_only_blocks(&mut lir, &mut stats);

        assert_eq!(lir.block_order(), &[entry, exit]);
        let last = *lir.block(entry).insts.last().unwrap();
        assert!(matches!(lir.inst(last).op, Op::Jump { target } if target == exit));
        assert_eq!(lir.block(entry).succs[..], [exit]);
        assert_eq!(lir.block(exit).preds[..], [entry]);
        assert_eq!(stats.blocks_deleted, 1);
    }

    #[test]
    fn every_reachable_block_stays_reachable() {
        // A diamond whose arms are jump-only collapses onto the join block.
        let mut lir = Lir::new();
        let entry = lir.create_block();
        let left = lir.create_block();
        let right = lir.create_block();
        let join = lir.create_block();
        lir.push_inst(
            entry,
            Op::Branch {
                cond: Cond::Lt,
                target: left,
            },
        );
        lir.add_edge(entry, left);
        jump(&mut lir, entry, right);
        jump(&mut lir, left, join);
        jump(&mut lir, right, join);
        lir.push_inst(join, Op::Return { value: None });
        lir.set_block_order(alloc::vec![entry, left, right, join]);

        let mut stats = Stats::default();
        delete_jump_only_blocks(&mut lir, &mut stats);

        assert_eq!(lir.block_order(), &[entry, join]);
        assert_eq!(lir.block(entry).succs[..], [join, join]);
        assert_eq!(lir.block(join).preds[..], [entry, entry]);
        for index in 0..lir.block(entry).insts.len() {
            let inst = lir.block(entry).insts[index];
            if let Op::Branch { target, .. } | Op::Jump { target } = lir.inst(inst).op {
                assert_eq!(target, join);
            }
        }
    }

    #[test]
    fn fall_through_jump_is_removed() {
        let mut lir = Lir::new();
        let a = lir.create_block();
        let b = lir.create_block();
        jump(&mut lir, a, b);
        lir.push_inst(b, Op::Return { value: None });
        lir.set_block_order(alloc::vec![a, b]);

        let mut stats = Stats::default();
        delete_fall_through_jumps(&mut lir, &mut stats);
        assert!(lir.block(a).insts.is_empty());
        assert_eq!(stats.jumps_removed, 1);
    }

    #[test]
    fn branch_to_fall_through_is_negated() {
        let mut lir = Lir::new();
        let a = lir.create_block();
        let b = lir.create_block();
        let c = lir.create_block();
        lir.push_inst(
            a,
            Op::Branch {
                cond: Cond::Lt,
                target: b,
            },
        );
        lir.add_edge(a, b);
        jump(&mut lir, a, c);
        lir.push_inst(b, Op::Return { value: None });
        lir.push_inst(c, Op::Return { value: None });
        lir.set_block_order(alloc::vec![a, b, c]);

        let mut stats = Stats::default();
        delete_fall_through_jumps(&mut lir, &mut stats);

        assert_eq!(lir.block(a).insts.len(), 1);
        let branch = lir.block(a).insts[0];
        assert_eq!(
            lir.inst(branch).op,
            Op::Branch {
                cond: Cond::Ge,
                target: c,
            }
        );
    }

    #[test]
    fn jump_to_return_block_becomes_a_return() {
        let mut lir = Lir::new();
        let a = lir.create_block();
        let b = lir.create_block();
        let ret = lir.create_block();
        jump(&mut lir, a, ret);
        jump(&mut lir, b, ret);
        lir.push_inst(
            ret,
            Op::Return {
                value: Some(Operand::Reg(PhysReg::new(0))),
            },
        );
        lir.set_block_order(alloc::vec![a, b, ret]);

        let mut stats = Stats::default();
        thread_jumps_to_return(&mut lir, &mut stats);

        for block in [a, b] {
            let last = *lir.block(block).insts.last().unwrap();
            assert_eq!(
                lir.inst(last).op,
                Op::Return {
                    value: Some(Operand::Reg(PhysReg::new(0)))
                }
            );
            assert!(lir.block(block).succs.is_empty());
        }
        assert!(lir.block(ret).preds.is_empty());
        assert_eq!(stats.jumps_to_return_threaded, 2);
    }
}
