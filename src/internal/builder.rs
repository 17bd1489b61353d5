//! Instruction numbering and lifetime interval construction.
//!
//! Instructions are numbered in linear block order with a stride of two so
//! that odd positions denote the point just after an instruction. Intervals
//! are then built in a single backward pass over the numbered stream:
//! live-out values get a range spanning the whole block, uses extend ranges
//! back to the block entry, and definitions narrow the open range down to
//! the definition position. Operands bound to a fixed physical register
//! produce ranges on that register's fixed interval.

use crate::entity::{PackedOption, SecondaryMap};
use crate::internal::interval::{
    IntervalId, IntervalOperand, Intervals, SpillState, UseKind,
};
use crate::internal::liveness::Liveness;
use crate::lir::{BlockFlags, Lir, Numbering, Operand, OperandRole, PhysReg, ValueKind, VirtReg};
use crate::target::TargetDesc;
use crate::Stats;

/// Numbers all instructions in linear block order.
///
/// Every block is preceded by a synthetic entry position with no
/// instruction, so moves resolving block boundaries have a position to
/// anchor to and a use by the first real instruction still has a nonempty
/// range before it.
pub(crate) fn number_instructions(lir: &Lir, numbering: &mut Numbering) {
    let num_slots: usize = lir
        .block_order()
        .iter()
        .map(|&block| lir.block(block).insts.len() + 1)
        .sum();
    numbering.pos_of.clear_and_resize(lir.num_insts());
    numbering.inst_at.clear();
    numbering.inst_at.reserve(num_slots);
    numbering.block_at.clear();
    numbering.block_at.reserve(num_slots);
    numbering.block_range.clear_and_resize(lir.num_blocks());
    numbering.order_index.clear_and_resize(lir.num_blocks());

    let mut pos = 0;
    for (index, &block) in lir.block_order().iter().enumerate() {
        numbering.order_index[block] = index as u32;
        let insts = &lir.block(block).insts;
        debug_assert!(!insts.is_empty(), "{block} has no instructions");
        let entry = pos;
        numbering.inst_at.push(None.into());
        numbering.block_at.push(block);
        pos += 2;
        for &inst in insts {
            numbering.pos_of[inst] = pos;
            numbering.inst_at.push(inst.into());
            numbering.block_at.push(block);
            pos += 2;
        }
        numbering.block_range[block] = (entry, pos - 2);
    }
}

/// Interval lookup tables produced by the builder.
pub(crate) struct IntervalMaps {
    /// Interval of each virtual register, `None` for values that never
    /// appear in reachable code.
    pub vreg: SecondaryMap<VirtReg, PackedOption<IntervalId>>,

    /// Fixed interval of each physical register, created on demand.
    pub fixed: SecondaryMap<PhysReg, PackedOption<IntervalId>>,
}

impl IntervalMaps {
    pub fn new() -> Self {
        Self {
            vreg: SecondaryMap::new(),
            fixed: SecondaryMap::new(),
        }
    }

    #[inline]
    pub fn vreg_interval(&self, vreg: VirtReg) -> Option<IntervalId> {
        self.vreg[vreg].expand()
    }
}

pub(crate) struct IntervalBuilder<'a> {
    pub lir: &'a Lir,
    pub numbering: &'a Numbering,
    pub liveness: &'a Liveness,
    pub target: &'a TargetDesc,
    pub intervals: &'a mut Intervals,
    pub maps: &'a mut IntervalMaps,
}

impl IntervalBuilder<'_> {
    pub fn build(&mut self, stats: &mut Stats) {
        self.intervals.clear();
        self.maps.vreg.clear_and_resize(self.lir.num_vregs());
        self.maps
            .fixed
            .clear_and_resize(self.target.num_regs() as usize);

        for &block in self.lir.block_order().iter().rev() {
            let data = self.lir.block(block);
            let block_from = self.numbering.block_from(block);
            let block_to = self.numbering.block_to(block);
            let is_loop_end = data.flags.contains(BlockFlags::LOOP_END);

            // Values live at the end of the block span the whole block for
            // now; definitions below narrow the range. The position just
            // after the last instruction carries a loop end marker when the
            // value is used anywhere inside the loop ending here.
            let live = &self.liveness.blocks[block];
            for vreg in &live.live_out {
                let id = self.vreg_interval(vreg);
                self.intervals.add_range(id, block_from, block_to + 2);
                if is_loop_end
                    && data.loop_index != u32::MAX
                    && self.liveness.in_loop(vreg, data.loop_index)
                {
                    self.intervals
                        .add_use_pos(id, block_to + 1, UseKind::LoopEndMarker);
                }
            }

            // Definitions are processed before uses of the same instruction.
            for &inst in data.insts.iter().rev() {
                let pos = self.numbering.pos_of[inst];
                let inst_data = self.lir.inst(inst);

                if inst_data.has_call() {
                    for reg in self.target.caller_saved() {
                        let id = self.fixed_interval(reg);
                        self.intervals.add_range(id, pos, pos + 1);
                    }
                }

                let out_kind = self.output_use_kind(inst_data.as_move());
                inst_data.for_each_operand(OperandRole::Output, |opr| {
                    self.add_def(opr, pos, out_kind, stats);
                });
                inst_data.for_each_operand(OperandRole::Temp, |opr| {
                    self.add_temp(opr, pos, UseKind::MustHaveRegister);
                });
                let in_kind = self.input_use_kind(inst_data.as_move());
                inst_data.for_each_operand(OperandRole::Input, |opr| {
                    self.add_use(opr, block_from, pos, in_kind);
                });

                // Values the runtime may inspect at this instruction must
                // stay live until just after it, but need no register.
                if let Some(info) = &inst_data.info {
                    for &vreg in &info.live_values {
                        let id = self.vreg_interval(vreg);
                        self.intervals.add_range(id, block_from, pos + 1);
                    }
                }

                self.handle_stack_argument(inst_data.as_move());
                self.add_register_hints(inst_data.as_move());
            }
        }

        // Fixed intervals start with a base range so the walker never sees
        // them as unhandled.
        for reg in self.maps.fixed.keys() {
            if let Some(id) = self.maps.fixed[reg].expand() {
                self.intervals.add_range(id, 0, 1);
            }
        }

        stat!(stats, intervals_built, self.intervals.intervals.len());
    }

    fn vreg_interval(&mut self, vreg: VirtReg) -> IntervalId {
        if let Some(id) = self.maps.vreg[vreg].expand() {
            return id;
        }
        let id = self
            .intervals
            .create(IntervalOperand::Virt(vreg), self.lir.kind_of(vreg));
        self.maps.vreg[vreg] = id.into();
        id
    }

    fn fixed_interval(&mut self, reg: PhysReg) -> IntervalId {
        if let Some(id) = self.maps.fixed[reg].expand() {
            return id;
        }
        let id = self
            .intervals
            .create(IntervalOperand::Fixed(reg), ValueKind::Word);
        self.intervals.get_mut(id).location = Some(crate::lir::Location::Reg(reg));
        self.maps.fixed[reg] = id.into();
        id
    }

    fn interval_for_operand(&mut self, opr: Operand) -> Option<IntervalId> {
        match opr {
            Operand::Virt(vreg) => Some(self.vreg_interval(vreg)),
            Operand::Reg(reg) if self.target.is_allocatable(reg) => {
                Some(self.fixed_interval(reg))
            }
            _ => None,
        }
    }

    fn add_use(&mut self, opr: Operand, block_from: u32, pos: u32, kind: UseKind) {
        if let Some(id) = self.interval_for_operand(opr) {
            self.intervals.add_range(id, block_from, pos);
            self.intervals.add_use_pos(id, pos, kind);
        }
    }

    fn add_temp(&mut self, opr: Operand, pos: u32, kind: UseKind) {
        if let Some(id) = self.interval_for_operand(opr) {
            self.intervals.add_range(id, pos, pos + 1);
            self.intervals.add_use_pos(id, pos, kind);
        }
    }

    fn add_def(&mut self, opr: Operand, pos: u32, kind: UseKind, stats: &mut Stats) {
        let Some(id) = self.interval_for_operand(opr) else {
            return;
        };
        let first = self.intervals.get(id).first.expand();
        match first {
            Some(range) if self.intervals.ranges[range].from <= pos => {
                // Narrow the range opened by a later use down to its
                // definition.
                self.intervals.set_from(id, pos);
                self.intervals.add_use_pos(id, pos, kind);
            }
            _ => {
                // The value is never used; keep a minimal range so the dead
                // definition still gets an operand assigned.
                self.intervals.add_range(id, pos, pos + 1);
                self.intervals.add_use_pos(id, pos, kind);
                stat!(stats, dead_defs);
            }
        }

        self.change_spill_definition_pos(id, pos);
        if kind == UseKind::None
            && self.intervals.get(id).spill_state != SpillState::NoOptimization
        {
            // Definition via a stack-to-register move; the value already
            // lives in memory and never needs a spill store.
            self.intervals.get_mut(id).spill_state = SpillState::StartInMemory;
        }
    }

    /// Tracks whether all definitions of the interval are close enough
    /// together that a single store at the definition can cover every later
    /// spill.
    fn change_spill_definition_pos(&mut self, id: IntervalId, def_pos: u32) {
        let interval = self.intervals.get_mut(id);
        match interval.spill_state {
            SpillState::NoDefinitionFound => {
                interval.spill_definition_pos = def_pos;
                interval.spill_state = SpillState::NoSpillStore;
            }
            SpillState::NoSpillStore => {
                debug_assert!(def_pos <= interval.spill_definition_pos);
                if def_pos + 2 < interval.spill_definition_pos {
                    // A second definition exists, storing once at the
                    // definition would miss the later one.
                    interval.spill_state = SpillState::NoOptimization;
                }
                // Otherwise the two definitions are consecutive, which the
                // two-operand instruction form produces for one logical
                // definition.
            }
            _ => {}
        }
    }

    fn output_use_kind(&self, mv: Option<(Operand, Operand)>) -> UseKind {
        if let Some((Operand::Stack(_), _)) = mv {
            // Incoming argument; the value starts on the stack and is
            // reloaded lazily when first used.
            return UseKind::None;
        }
        UseKind::MustHaveRegister
    }

    fn input_use_kind(&self, mv: Option<(Operand, Operand)>) -> UseKind {
        match mv {
            // Register-to-register moves can take their source from a stack
            // slot, it is just slower.
            Some((Operand::Virt(_) | Operand::Reg(_), Operand::Virt(_) | Operand::Reg(_))) => {
                UseKind::ShouldHaveRegister
            }
            _ => UseKind::MustHaveRegister,
        }
    }

    /// A move from a reserved stack slot defines an incoming argument. The
    /// interval starts out assigned to that slot and is split before its
    /// first real use.
    fn handle_stack_argument(&mut self, mv: Option<(Operand, Operand)>) {
        if let Some((Operand::Stack(slot), Operand::Virt(vreg))) = mv {
            debug_assert!(slot.index() < self.lir.reserved_slots as usize);
            let id = self.vreg_interval(vreg);
            let interval = self.intervals.get_mut(id);
            interval.spill_slot = slot.into();
            interval.location = Some(crate::lir::Location::Stack(slot));
        }
    }

    fn add_register_hints(&mut self, mv: Option<(Operand, Operand)>) {
        let Some((from, to)) = mv else { return };
        if !matches!(from, Operand::Virt(_) | Operand::Reg(_)) {
            return;
        }
        let Some(from_id) = self.interval_for_operand(from) else {
            return;
        };
        let Some(to_id) = self.interval_for_operand(to) else {
            return;
        };
        self.intervals.get_mut(to_id).register_hint = from_id.into();
        trace!("hint: {to_id} prefers the register of {from_id}");
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::internal::interval::MAX_POS;
    use crate::lir::{Block, Location, Op, ValueKind};

    fn build(
        lir: &Lir,
        target: &TargetDesc,
    ) -> (Numbering, Intervals, IntervalMaps) {
        let mut stats = Stats::default();
        let mut numbering = Numbering::default();
        number_instructions(lir, &mut numbering);
        let mut liveness = Liveness::new();
        liveness.compute(lir, &mut stats).unwrap();
        let mut intervals = Intervals::new();
        let mut maps = IntervalMaps::new();
        IntervalBuilder {
            lir,
            numbering: &numbering,
            liveness: &liveness,
            target,
            intervals: &mut intervals,
            maps: &mut maps,
        }
        .build(&mut stats);
        (numbering, intervals, maps)
    }

    fn small_target() -> TargetDesc {
        let regs: Vec<PhysReg> = (0..4).map(PhysReg::new).collect();
        TargetDesc::new(4, regs.clone(), alloc::vec![], regs[..2].iter().copied())
    }

    fn ranges_of(intervals: &Intervals, id: IntervalId) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut cur = intervals.get(id).first;
        while let Some(range) = cur.expand() {
            out.push((intervals.ranges[range].from, intervals.ranges[range].to));
            cur = intervals.ranges[range].next;
        }
        out
    }

    #[test]
    fn numbering_reserves_block_entries() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let b1 = lir.create_block();
        let i0 = lir.push_inst(b0, Op::Jump { target: b1 });
        let i1 = lir.push_inst(b1, Op::Return { value: None });
        lir.add_edge(b0, b1);
        lir.set_block_order(alloc::vec![b0, b1]);

        let mut numbering = Numbering::default();
        number_instructions(&lir, &mut numbering);
        assert_eq!(numbering.block_from(b0), 0);
        assert_eq!(numbering.pos(i0), Some(2));
        assert_eq!(numbering.block_to(b0), 2);
        assert_eq!(numbering.block_from(b1), 4);
        assert_eq!(numbering.pos(i1), Some(6));
        assert_eq!(numbering.inst_at(0), None);
        assert_eq!(numbering.inst_at(2), Some(i0));
        assert_eq!(numbering.block_at(5), b1);
        assert_eq!(numbering.max_pos(), 6);
    }

    #[test]
    fn def_narrows_range_to_definition() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            b0,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(
            b0,
            Op::Compute {
                inputs: smallvec::smallvec![Operand::Virt(v)],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![],
            },
        );
        lir.push_inst(b0, Op::Return { value: None });
        lir.set_block_order(alloc::vec![b0]);

        let target = small_target();
        let (_, intervals, maps) = build(&lir, &target);
        let id = maps.vreg_interval(v).unwrap();
        // Defined at 2, used at 4.
        assert_eq!(ranges_of(&intervals, id), alloc::vec![(2, 4)]);
        assert_eq!(intervals.first_usage(id, UseKind::MustHaveRegister), 2);
        assert_eq!(
            intervals.next_usage(id, UseKind::MustHaveRegister, 3),
            4
        );
        assert_eq!(
            intervals.get(id).spill_state,
            SpillState::NoSpillStore
        );
        assert_eq!(intervals.get(id).spill_definition_pos, 2);
    }

    #[test]
    fn dead_def_gets_minimal_range() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            b0,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(b0, Op::Return { value: None });
        lir.set_block_order(alloc::vec![b0]);

        let target = small_target();
        let (_, intervals, maps) = build(&lir, &target);
        let id = maps.vreg_interval(v).unwrap();
        assert_eq!(ranges_of(&intervals, id), alloc::vec![(2, 3)]);
    }

    #[test]
    fn call_adds_caller_saved_temp_ranges() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        lir.push_inst(
            b0,
            Op::Call {
                args: smallvec::smallvec![],
                result: None,
            },
        );
        lir.push_inst(b0, Op::Return { value: None });
        lir.set_block_order(alloc::vec![b0]);

        let target = small_target();
        let (_, intervals, maps) = build(&lir, &target);
        let saved = maps.fixed[PhysReg::new(0)].expand().unwrap();
        // Base range [0, 1) plus the clobber at the call.
        assert_eq!(ranges_of(&intervals, saved), alloc::vec![(0, 1), (2, 3)]);
        assert!(maps.fixed[PhysReg::new(2)].is_none());
    }

    #[test]
    fn loop_end_block_gets_marker() {
        // B0 -> B1 -> B1 (self loop, uses v), B1 -> B2
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let b1 = lir.create_block();
        let b2 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            b0,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(b0, Op::Jump { target: b1 });
        lir.push_inst(
            b1,
            Op::Compute {
                inputs: smallvec::smallvec![Operand::Virt(v)],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![],
            },
        );
        lir.push_inst(
            b1,
            Op::Branch {
                cond: crate::lir::Cond::Ne,
                target: b1,
            },
        );
        lir.push_inst(b1, Op::Jump { target: b2 });
        lir.push_inst(b2, Op::Return { value: None });
        lir.add_edge(b0, b1);
        lir.add_edge(b1, b1);
        lir.add_edge(b1, b2);
        lir.set_loop(b1, 0, 1);
        lir.block_mut(b1).flags |= BlockFlags::LOOP_END | BlockFlags::LOOP_HEADER;
        lir.set_block_order(alloc::vec![b0, b1, b2]);

        let (numbering, intervals, maps) = build(&lir, &small_target());
        let id = maps.vreg_interval(v).unwrap();
        let marker = intervals.next_usage_exact(id, UseKind::LoopEndMarker, 0);
        assert_eq!(marker, numbering.block_to(b1) + 1);
    }

    #[test]
    fn stack_argument_starts_in_memory() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        let slot = lir.reserve_stack_slots(1);
        lir.push_inst(
            b0,
            Op::Move {
                from: Operand::Stack(slot),
                to: Operand::Virt(v),
            },
        );
        lir.push_inst(
            b0,
            Op::Compute {
                inputs: smallvec::smallvec![Operand::Virt(v)],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![],
            },
        );
        lir.push_inst(b0, Op::Return { value: None });
        lir.set_block_order(alloc::vec![b0]);

        let (_, intervals, maps) = build(&lir, &small_target());
        let id = maps.vreg_interval(v).unwrap();
        assert_eq!(intervals.get(id).spill_state, SpillState::StartInMemory);
        assert_eq!(intervals.spill_slot(id), Some(slot));
        assert_eq!(intervals.get(id).location, Some(Location::Stack(slot)));
        // The definition itself needs no register.
        assert_eq!(intervals.first_usage(id, UseKind::MustHaveRegister), 4);
    }

    #[test]
    fn move_records_register_hint() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let v0 = lir.new_vreg(ValueKind::Int);
        let v1 = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            b0,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v0)],
            },
        );
        lir.push_inst(
            b0,
            Op::Move {
                from: Operand::Virt(v0),
                to: Operand::Virt(v1),
            },
        );
        lir.push_inst(
            b0,
            Op::Return {
                value: Some(Operand::Virt(v1)),
            },
        );
        lir.set_block_order(alloc::vec![b0]);

        let (_, intervals, maps) = build(&lir, &small_target());
        let from = maps.vreg_interval(v0).unwrap();
        let to = maps.vreg_interval(v1).unwrap();
        assert_eq!(intervals.get(to).register_hint.expand(), Some(from));
        // Move inputs prefer but do not require a register.
        assert_eq!(intervals.first_usage(from, UseKind::MustHaveRegister), 2);
        assert_eq!(
            intervals.first_usage(from, UseKind::ShouldHaveRegister),
            2
        );
        assert_eq!(intervals.next_usage(from, UseKind::ShouldHaveRegister, 3), 4);
        assert_eq!(intervals.next_usage(from, UseKind::MustHaveRegister, 3), MAX_POS);
    }

    #[test]
    fn distant_second_def_disables_spill_optimization() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        for _ in 0..2 {
            lir.push_inst(
                b0,
                Op::Compute {
                    inputs: smallvec::smallvec![],
                    temps: smallvec::smallvec![],
                    outputs: smallvec::smallvec![Operand::Virt(v)],
                },
            );
            lir.push_inst(
                b0,
                Op::Compute {
                    inputs: smallvec::smallvec![Operand::Virt(v)],
                    temps: smallvec::smallvec![],
                    outputs: smallvec::smallvec![],
                },
            );
        }
        lir.push_inst(b0, Op::Return { value: None });
        lir.set_block_order(alloc::vec![b0]);

        let (_, intervals, maps) = build(&lir, &small_target());
        let id = maps.vreg_interval(v).unwrap();
        assert_eq!(intervals.get(id).spill_state, SpillState::NoOptimization);
    }

    #[test]
    fn live_out_value_spans_block_with_hole() {
        // v defined in B0, unused in B1, used in B2.
        let mut lir = Lir::new();
        let blocks: Vec<Block> = (0..3).map(|_| lir.create_block()).collect();
        let (b0, b1, b2) = (blocks[0], blocks[1], blocks[2]);
        let v = lir.new_vreg(ValueKind::Int);
        lir.push_inst(
            b0,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(v)],
            },
        );
        lir.push_inst(b0, Op::Jump { target: b1 });
        lir.push_inst(b1, Op::Jump { target: b2 });
        lir.push_inst(
            b2,
            Op::Return {
                value: Some(Operand::Virt(v)),
            },
        );
        lir.add_edge(b0, b1);
        lir.add_edge(b1, b2);
        lir.set_block_order(blocks.clone());

        let (numbering, intervals, maps) = build(&lir, &small_target());
        let id = maps.vreg_interval(v).unwrap();
        // One contiguous span: the whole-block ranges of B0..B2 merge.
        assert_eq!(intervals.from(id), 2);
        assert_eq!(intervals.to(id), numbering.pos(lir.block(b2).insts[0]).unwrap());
    }
}
