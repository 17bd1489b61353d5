//! Final rewriting of the instruction stream.
//!
//! After resolution every interval has a location, but the instructions
//! still name virtual registers. This pass first removes spill moves made
//! redundant by the store-at-definition optimization, then rewrites every
//! operand to the location of the split child live at that instruction and
//! computes the oop map of each instruction carrying debug info.

use alloc::vec::Vec;

use smallvec::SmallVec;

use crate::AllocError;
use crate::Stats;
use crate::internal::builder::IntervalMaps;
use crate::internal::interval::{IntervalId, Intervals, SpillState};
use crate::internal::move_resolver::MoveResolver;
use crate::lir::{Inst, Lir, Location, Numbering, Op, Operand, OperandRole, VirtReg};

fn location_operand(location: Option<Location>) -> Operand {
    match location {
        Some(Location::Reg(reg)) => Operand::Reg(reg),
        Some(Location::Stack(slot)) => Operand::Stack(slot),
        None => unreachable!("interval has no location after allocation"),
    }
}

/// Removes register-to-stack moves whose target slot is already correct and
/// inserts the single store of each store-at-definition family right after
/// its defining instruction.
pub(crate) fn eliminate_spill_moves(
    lir: &mut Lir,
    numbering: &Numbering,
    intervals: &Intervals,
    resolver: &MoveResolver,
    stats: &mut Stats,
) {
    // Families storing at their definition, in definition order. The walk
    // below consumes this list front to back.
    let mut stores: Vec<IntervalId> = intervals
        .intervals
        .keys()
        .filter(|&id| {
            intervals.is_split_parent(id)
                && intervals.spill_state(id) == SpillState::StoreAtDefinition
        })
        .collect();
    stores.sort_unstable_by_key(|&id| intervals.spill_definition_pos(id));
    let mut next_store = 0;

    let mut kept: Vec<Inst> = Vec::new();
    for index in 0..lir.block_order().len() {
        let block = lir.block_order()[index];
        kept.clear();
        kept.reserve(lir.block(block).insts.len());

        for inst_index in 0..lir.block(block).insts.len() {
            let inst = lir.block(block).insts[inst_index];
            match numbering.pos(inst) {
                None => {
                    // A move inserted during allocation. If it stores to a
                    // slot that is always correct, the store at the
                    // definition already covers it.
                    let redundant = resolver.dst_interval[inst].expand().is_some_and(|dst| {
                        matches!(intervals.get(dst).location, Some(Location::Stack(_)))
                            && intervals.always_in_memory(dst)
                    });
                    if redundant {
                        trace!("removing redundant spill move in {block}");
                        stat!(stats, spill_moves_removed);
                    } else {
                        kept.push(inst);
                    }
                }
                Some(pos) => {
                    kept.push(inst);
                    while next_store < stores.len()
                        && intervals.spill_definition_pos(stores[next_store]) == pos
                    {
                        let id = stores[next_store];
                        next_store += 1;
                        let Some(Location::Reg(reg)) = intervals.get(id).location else {
                            debug_assert!(false, "store-at-definition interval not in a register");
                            continue;
                        };
                        let Some(slot) = intervals.spill_slot(id) else {
                            debug_assert!(false, "store-at-definition interval has no spill slot");
                            continue;
                        };
                        trace!("storing {id} to {slot} at its definition");
                        let store = lir.new_inst(Op::Move {
                            from: Operand::Reg(reg),
                            to: Operand::Stack(slot),
                        });
                        kept.push(store);
                        stat!(stats, spill_stores);
                    }
                }
            }
        }
        core::mem::swap(&mut lir.block_mut(block).insts, &mut kept);
    }
    debug_assert_eq!(next_store, stores.len());
}

/// Rewrites all virtual operands to their allocated locations, fills in oop
/// maps and drops moves that became identities.
pub(crate) fn assign_locations(
    lir: &mut Lir,
    numbering: &Numbering,
    intervals: &Intervals,
    maps: &IntervalMaps,
    stats: &mut Stats,
) -> Result<(), AllocError> {
    let mut kept: Vec<Inst> = Vec::new();
    for index in 0..lir.block_order().len() {
        let block = lir.block_order()[index];
        kept.clear();
        kept.reserve(lir.block(block).insts.len());

        for inst_index in 0..lir.block(block).insts.len() {
            let inst = lir.block(block).insts[inst_index];
            // Moves inserted during allocation already carry locations.
            if let Some(pos) = numbering.pos(inst) {
                rewrite_operands(lir, intervals, maps, inst, pos)?;
                if lir.inst(inst).info.is_some() {
                    compute_oop_map(lir, intervals, maps, inst, pos)?;
                }
            }
            if let Some((from, to)) = lir.inst(inst).as_move() {
                if from == to {
                    stat!(stats, identity_moves_removed);
                    continue;
                }
            }
            kept.push(inst);
        }
        core::mem::swap(&mut lir.block_mut(block).insts, &mut kept);
    }
    Ok(())
}

/// An output written at `pos` belongs to the child starting there, while an
/// input read at `pos` belongs to the child ending there.
fn rewrite_operands(
    lir: &mut Lir,
    intervals: &Intervals,
    maps: &IntervalMaps,
    inst: Inst,
    pos: u32,
) -> Result<(), AllocError> {
    let mut failed = None;
    for (role, inclusive_to) in [
        (OperandRole::Input, true),
        (OperandRole::Temp, true),
        (OperandRole::Output, false),
    ] {
        lir.inst_mut(inst).for_each_operand_mut(role, |operand| {
            if let Operand::Virt(vreg) = *operand {
                match child_location(intervals, maps, vreg, pos, inclusive_to) {
                    Ok(location) => *operand = location_operand(location),
                    Err(err) => failed = Some(err),
                }
            }
        });
    }
    match failed {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn child_location(
    intervals: &Intervals,
    maps: &IntervalMaps,
    vreg: VirtReg,
    pos: u32,
    inclusive_to: bool,
) -> Result<Option<Location>, AllocError> {
    let Some(parent) = maps.vreg_interval(vreg) else {
        return Err(AllocError::NoSplitChild { pos });
    };
    let child = intervals.split_child_at(parent, pos, inclusive_to)?;
    Ok(intervals.get(child).location)
}

/// Records the location of every live object reference at an instruction
/// with debug info. A value whose spill slot is always correct is reported
/// in its slot as well, even while it sits in a register.
fn compute_oop_map(
    lir: &mut Lir,
    intervals: &Intervals,
    maps: &IntervalMaps,
    inst: Inst,
    pos: u32,
) -> Result<(), AllocError> {
    let live_values: SmallVec<[VirtReg; 4]> = match &lir.inst(inst).info {
        Some(info) => info.live_values.clone(),
        None => return Ok(()),
    };

    let mut oop_map: SmallVec<[Location; 4]> = SmallVec::new();
    for vreg in live_values {
        if !lir.kind_of(vreg).is_oop() {
            continue;
        }
        let Some(parent) = maps.vreg_interval(vreg) else {
            continue;
        };
        let child = intervals.split_child_at(parent, pos, true)?;
        // Values defined by this instruction are not yet live; values ending
        // here are consumed before a safepoint can be taken.
        if intervals.from(child) >= pos || pos >= intervals.to(child) {
            continue;
        }
        // At a call position the location is never a caller-saved register;
        // the fixed clobber ranges at each call keep intervals out of them
        // there.
        let location = intervals.get(child).location;
        match location {
            Some(location) => oop_map.push(location),
            None => unreachable!("live reference has no location"),
        }

        if intervals.always_in_memory(child)
            && pos > intervals.spill_definition_pos(child)
            && matches!(location, Some(Location::Reg(_)))
        {
            if let Some(slot) = intervals.spill_slot(child) {
                oop_map.push(Location::Stack(slot));
            }
        }
    }

    if let Some(info) = &mut lir.inst_mut(inst).info {
        info.oop_map = oop_map;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::builder::number_instructions;
    use crate::internal::interval::IntervalOperand;
    use crate::lir::{Block, DebugInfo, PhysReg, StackSlot, ValueKind};

    fn setup(lir: &Lir) -> (Numbering, IntervalMaps, Intervals) {
        let mut numbering = Numbering::default();
        number_instructions(lir, &mut numbering);
        let mut maps = IntervalMaps::new();
        maps.vreg.clear_and_resize(lir.num_vregs());
        (numbering, maps, Intervals::new())
    }

    fn single_block(lir: &mut Lir) -> Block {
        let block = lir.create_block();
        lir.set_block_order(alloc::vec![block]);
        block
    }

    #[test]
    fn redundant_spill_move_is_removed() {
        let mut lir = Lir::new();
        let block = single_block(&mut lir);
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(block, Op::Return { value: None });
        let (numbering, _, mut intervals) = setup(&lir);

        let id = intervals.create(IntervalOperand::Virt(v), ValueKind::Int);
        intervals.add_range(id, 2, 5);
        intervals.set_spill_state(id, SpillState::StartInMemory);
        intervals.set_spill_slot(id, StackSlot::new(0));
        intervals.get_mut(id).location = Some(Location::Stack(StackSlot::new(0)));

        // A move inserted by the resolver, storing to the always-correct
        // slot.
        let mv = lir.new_inst(Op::Move {
            from: Operand::Reg(PhysReg::new(0)),
            to: Operand::Stack(StackSlot::new(0)),
        });
        lir.block_mut(block).insts.insert(1, mv);
        let mut resolver = MoveResolver::new();
        resolver.clear(8);
        resolver.dst_interval.grow_to(lir.num_insts());
        resolver.dst_interval[mv] = id.into();

        let mut stats = Stats::default();
        eliminate_spill_moves(&mut lir, &numbering, &intervals, &resolver, &mut stats);

        assert_eq!(lir.block(block).insts.len(), 2);
        assert!(
            lir.block(block)
                .insts
                .iter()
                .all(|&inst| lir.inst(inst).as_move().is_none())
        );
        assert_eq!(stats.spill_moves_removed, 1);
    }

    #[test]
    fn store_at_definition_inserts_one_store() {
        let mut lir = Lir::new();
        let block = single_block(&mut lir);
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(block, Op::Return { value: None });
        let (numbering, _, mut intervals) = setup(&lir);

        let id = intervals.create(IntervalOperand::Virt(v), ValueKind::Int);
        intervals.add_range(id, 2, 5);
        intervals.get_mut(id).location = Some(Location::Reg(PhysReg::new(3)));
        intervals.get_mut(id).spill_definition_pos = 2;
        intervals.set_spill_state(id, SpillState::StoreAtDefinition);
        intervals.set_spill_slot(id, StackSlot::new(1));

        let resolver = MoveResolver::new();
        let mut stats = Stats::default();
        eliminate_spill_moves(&mut lir, &numbering, &intervals, &resolver, &mut stats);

        // def, store, return
        assert_eq!(lir.block(block).insts.len(), 3);
        let store = lir.block(block).insts[1];
        assert_eq!(
            lir.inst(store).as_move(),
            Some((
                Operand::Reg(PhysReg::new(3)),
                Operand::Stack(StackSlot::new(1))
            ))
        );
        assert_eq!(stats.spill_stores, 1);
    }

    #[test]
    fn operands_take_the_location_of_the_covering_child() {
        let mut lir = Lir::new();
        let block = single_block(&mut lir);
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![Operand::Virt(v)],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![],
            },
        );
        lir.push_inst(block, Op::Return { value: None });
        let (numbering, mut maps, mut intervals) = setup(&lir);

        // In a register at the definition, on the stack by the use.
        let parent = intervals.create(IntervalOperand::Virt(v), ValueKind::Int);
        intervals.add_range(parent, 2, 5);
        let tail = intervals.split(parent, 4);
        intervals.get_mut(parent).location = Some(Location::Reg(PhysReg::new(0)));
        intervals.get_mut(tail).location = Some(Location::Stack(StackSlot::new(2)));
        maps.vreg[v] = parent.into();

        let mut stats = Stats::default();
        assign_locations(&mut lir, &numbering, &intervals, &maps, &mut stats).unwrap();

        let def = lir.block(block).insts[0];
        let Op::Compute { outputs, .. } = &lir.inst(def).op else {
            panic!("expected compute");
        };
        assert_eq!(outputs[0], Operand::Reg(PhysReg::new(0)));
        let usage = lir.block(block).insts[1];
        let Op::Compute { inputs, .. } = &lir.inst(usage).op else {
            panic!("expected compute");
        };
        assert_eq!(inputs[0], Operand::Stack(StackSlot::new(2)));
    }

    #[test]
    fn identity_moves_are_dropped() {
        let mut lir = Lir::new();
        let block = single_block(&mut lir);
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(
            block,
            Op::Move {
                from: Operand::Virt(v),
                to: Operand::Virt(v),
            },
        );
        lir.push_inst(block, Op::Return { value: None });
        let (numbering, mut maps, mut intervals) = setup(&lir);

        let parent = intervals.create(IntervalOperand::Virt(v), ValueKind::Int);
        intervals.add_range(parent, 2, 5);
        intervals.get_mut(parent).location = Some(Location::Reg(PhysReg::new(1)));
        maps.vreg[v] = parent.into();

        let mut stats = Stats::default();
        assign_locations(&mut lir, &numbering, &intervals, &maps, &mut stats).unwrap();

        assert_eq!(lir.block(block).insts.len(), 2);
        assert_eq!(stats.identity_moves_removed, 1);
    }

    #[test]
    fn oop_map_lists_live_references_and_shadow_slots() {
        let mut lir = Lir::new();
        let block = single_block(&mut lir);
        let obj = lir.new_vreg(ValueKind::Object);
        let plain = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(obj), Operand::Virt(plain)],
            },
        );
        lir.push_inst_with_info(
            block,
            Op::Call {
                args: smallvec::smallvec![],
                result: None,
            },
            DebugInfo {
                live_values: smallvec::smallvec![obj, plain],
                oop_map: smallvec::smallvec![],
            },
        );
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![Operand::Virt(obj), Operand::Virt(plain)],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![],
            },
        );
        lir.push_inst(block, Op::Return { value: None });
        let (numbering, mut maps, mut intervals) = setup(&lir);

        let obj_it = intervals.create(IntervalOperand::Virt(obj), ValueKind::Object);
        intervals.add_range(obj_it, 2, 7);
        intervals.get_mut(obj_it).location = Some(Location::Reg(PhysReg::new(0)));
        intervals.get_mut(obj_it).spill_definition_pos = 2;
        intervals.set_spill_state(obj_it, SpillState::StoreAtDefinition);
        intervals.set_spill_slot(obj_it, StackSlot::new(0));
        maps.vreg[obj] = obj_it.into();

        let plain_it = intervals.create(IntervalOperand::Virt(plain), ValueKind::Int);
        intervals.add_range(plain_it, 2, 7);
        intervals.get_mut(plain_it).location = Some(Location::Reg(PhysReg::new(1)));
        maps.vreg[plain] = plain_it.into();

        let mut stats = Stats::default();
        assign_locations(&mut lir, &numbering, &intervals, &maps, &mut stats).unwrap();

        let call = lir.block(block).insts[1];
        let info = lir.inst(call).info.as_ref().unwrap();
        // The reference is reported in its register and in its
        // always-correct spill slot; the plain int is not reported at all.
        assert_eq!(
            &info.oop_map[..],
            &[
                Location::Reg(PhysReg::new(0)),
                Location::Stack(StackSlot::new(0))
            ]
        );
    }
}
