//! Data-flow resolution at block boundaries.
//!
//! Allocation assigns locations per split child, so a value can sit in
//! different locations at the two ends of a control-flow edge. This pass
//! walks every edge, looks up the interval live at the source block's end
//! and at the target block's start, and feeds the mismatches to the move
//! resolver. Exception edges are resolved the same way, except that the
//! moves run on an out-of-line stub spliced into the edge and that phi
//! sources are selected per throwing predecessor.

use alloc::vec::Vec;

use crate::Stats;
use crate::entity::EntitySet;
use crate::internal::builder::IntervalMaps;
use crate::internal::interval::{IntervalId, Intervals};
use crate::internal::liveness::Liveness;
use crate::internal::move_resolver::{MoveResolver, MoveSrc};
use crate::internal::walker::SpillSlots;
use crate::lir::{Block, BlockFlags, Lir, Location, Numbering, Op, Operand, VirtReg};
use crate::AllocError;

pub(crate) struct ResolveCtx<'a> {
    pub lir: &'a mut Lir,
    pub numbering: &'a Numbering,
    pub liveness: &'a Liveness,
    pub intervals: &'a mut Intervals,
    pub maps: &'a IntervalMaps,
    pub resolver: &'a mut MoveResolver,
    pub spill_slots: &'a mut SpillSlots,
    pub stats: &'a mut Stats,
}

impl ResolveCtx<'_> {
    /// The family member holding `vreg` at the start of a block.
    fn interval_at_block_begin(&self, block: Block, parent: IntervalId) -> Result<IntervalId, AllocError> {
        self.intervals
            .split_child_at(parent, self.numbering.block_from(block), false)
    }

    /// The family member holding `vreg` at the end of a block, just after
    /// its last instruction.
    fn interval_at_block_end(&self, block: Block, parent: IntervalId) -> Result<IntervalId, AllocError> {
        self.intervals
            .split_child_at(parent, self.numbering.block_to(block) + 1, false)
    }

    /// The family member holding `vreg` when the instruction at `pos`
    /// reads its inputs.
    fn interval_at_pos(&self, parent: IntervalId, pos: u32) -> Result<IntervalId, AllocError> {
        self.intervals.split_child_at(parent, pos, true)
    }

    /// Collects the location mismatches of all values live across the edge.
    fn collect_mappings(
        &mut self,
        from: Block,
        to: Block,
        out: &mut Vec<(IntervalId, IntervalId)>,
    ) -> Result<(), AllocError> {
        out.clear();
        for vreg in self.liveness.blocks[to].live_in.iter() {
            let Some(parent) = self.maps.vreg_interval(vreg) else {
                continue;
            };
            let from_it = self.interval_at_block_end(from, parent)?;
            let to_it = self.interval_at_block_begin(to, parent)?;
            if from_it != to_it
                && self.intervals.get(from_it).location != self.intervals.get(to_it).location
            {
                out.push((from_it, to_it));
            }
        }
        Ok(())
    }

    /// Where the moves for an edge go: at the end of the source block when
    /// it has a single successor, else at the head of the target block.
    /// Critical edges were split by block layout, so one of the two always
    /// works.
    fn find_insert_pos(&self, from: Block, to: Block) -> (Block, usize) {
        let from_data = self.lir.block(from);
        if from_data.succs.len() <= 1 {
            let len = from_data.insts.len();
            match from_data.insts.last().map(|&inst| &self.lir.inst(inst).op) {
                Some(Op::Jump { .. }) => (from, len - 1),
                _ => (from, len),
            }
        } else {
            debug_assert!(
                self.lir.block(to).preds.iter().all(|&pred| pred == from),
                "critical edge was not split"
            );
            (to, 0)
        }
    }

    fn emit_mappings(&mut self, at: (Block, usize), pairs: &[(IntervalId, IntervalId)]) {
        self.resolver.set_insert_position(
            &mut *self.lir,
            &mut *self.intervals,
            &mut *self.spill_slots,
            &mut *self.stats,
            at.0,
            at.1,
        );
        for &(from_it, to_it) in pairs {
            self.resolver
                .add_mapping(self.intervals, MoveSrc::Interval(from_it), to_it);
        }
        self.resolver.resolve_mappings(
            &mut *self.lir,
            &mut *self.intervals,
            &mut *self.spill_slots,
            &mut *self.stats,
        );
    }

    /// Resolves every ordinary control-flow edge.
    pub fn resolve_data_flow(&mut self) -> Result<(), AllocError> {
        let num_blocks = self.lir.num_blocks();
        let mut completed = EntitySet::<Block>::with_max_index(num_blocks);
        let mut already_resolved = EntitySet::<Block>::with_max_index(num_blocks);
        let mut pairs = Vec::new();

        // Blocks holding nothing but a jump can take the moves of their
        // unique pred-to-succ path, saving a move on the other path out of
        // the predecessor.
        for index in 0..self.lir.block_order().len() {
            let block = self.lir.block_order()[index];
            let data = self.lir.block(block);
            let jump_only = data.insts.len() == 1
                && matches!(self.lir.inst(data.insts[0]).op, Op::Jump { .. });
            if !jump_only
                || data.preds.len() != 1
                || data.succs.len() != 1
                || !data.handlers.is_empty()
                || data.flags.contains(BlockFlags::EXCEPTION_ENTRY)
            {
                continue;
            }
            let pred = data.preds[0];
            let succ = data.succs[0];

            // Two short-circuited blocks in a row would resolve one edge
            // twice.
            if completed.contains(pred) || completed.contains(succ) {
                continue;
            }
            trace!("resolving straight through empty {block}");
            completed.insert(block);
            self.collect_mappings(pred, succ, &mut pairs)?;
            if !pairs.is_empty() {
                let moves = core::mem::take(&mut pairs);
                self.emit_mappings((block, 0), &moves);
                pairs = moves;
            }
        }

        for index in 0..self.lir.block_order().len() {
            let from = self.lir.block_order()[index];
            if completed.contains(from) {
                continue;
            }
            already_resolved.copy_from(&completed);
            for succ_index in 0..self.lir.block(from).succs.len() {
                let to = self.lir.block(from).succs[succ_index];
                // Switch-like constructs can produce duplicate edges.
                if already_resolved.contains(to) {
                    continue;
                }
                already_resolved.insert(to);

                self.collect_mappings(from, to, &mut pairs)?;
                if !pairs.is_empty() {
                    let at = self.find_insert_pos(from, to);
                    let moves = core::mem::take(&mut pairs);
                    self.emit_mappings(at, &moves);
                    pairs = moves;
                }
            }
        }
        Ok(())
    }

    /// Resolves exception entries and all exception edges.
    pub fn resolve_exception_handlers(&mut self) -> Result<(), AllocError> {
        let num_blocks = self.lir.block_order().len();

        for index in 0..num_blocks {
            let block = self.lir.block_order()[index];
            if self
                .lir
                .block(block)
                .flags
                .contains(BlockFlags::EXCEPTION_ENTRY)
            {
                self.resolve_exception_entry(block)?;
            }
        }

        for index in 0..num_blocks {
            let block = self.lir.block_order()[index];
            if self.lir.block(block).handlers.is_empty() {
                continue;
            }
            // The throwing instruction is the one carrying debug info.
            let throwing = self
                .lir
                .block(block)
                .insts
                .iter()
                .copied()
                .find_map(|inst| {
                    self.lir.inst(inst).info.as_ref()?;
                    self.numbering.pos(inst)
                });
            let Some(throwing_pos) = throwing else {
                continue;
            };
            for handler_index in 0..self.lir.block(block).handlers.len() {
                let handler = self.lir.block(block).handlers[handler_index];
                self.resolve_exception_edge(block, throwing_pos, handler)?;
            }
        }
        Ok(())
    }

    /// Forces values that are correct in memory into a short stack-resident
    /// split at the handler entry, so the throw path never has to save
    /// registers.
    fn resolve_exception_entry(&mut self, block: Block) -> Result<(), AllocError> {
        self.resolver.set_insert_position(
            &mut *self.lir,
            &mut *self.intervals,
            &mut *self.spill_slots,
            &mut *self.stats,
            block,
            0,
        );

        // The phi values of the entry are pre-killed and so never in the
        // live-in set; visit them separately.
        let mut values: Vec<VirtReg> = self.liveness.blocks[block].live_in.iter().collect();
        values.extend(self.lir.block(block).exception_phis.iter().copied());
        for vreg in values {
            self.resolve_exception_entry_value(block, vreg)?;
        }

        if self.resolver.has_mappings() {
            self.resolver.resolve_mappings(
                &mut *self.lir,
                &mut *self.intervals,
                &mut *self.spill_slots,
                &mut *self.stats,
            );
        }
        Ok(())
    }

    fn resolve_exception_entry_value(
        &mut self,
        block: Block,
        vreg: VirtReg,
    ) -> Result<(), AllocError> {
        let Some(parent) = self.maps.vreg_interval(vreg) else {
            return Ok(());
        };
        let interval = self.interval_at_block_begin(block, parent)?;
        let Some(Location::Reg(reg)) = self.intervals.get(interval).location else {
            return Ok(());
        };
        if !self.intervals.always_in_memory(interval) {
            return Ok(());
        }

        // Split out the range [entry, entry + 1) and put it on the stack;
        // the register part is reloaded from it by the mapping below.
        let from_op = self.numbering.block_from(block);
        let to_op = from_op + 1;
        debug_assert!(
            self.intervals.from(interval) <= from_op && self.intervals.to(interval) >= to_op,
            "split between exception entry and first instruction"
        );

        let mut part = interval;
        if self.intervals.from(part) != from_op {
            part = self.intervals.split(part, from_op);
            self.intervals.get_mut(part).location = Some(Location::Reg(reg));
        }
        let spilled = if self.intervals.to(part) != to_op {
            let head = self.intervals.split_from_start(part, to_op);
            self.resolver
                .add_mapping(self.intervals, MoveSrc::Interval(head), part);
            head
        } else {
            part
        };

        let slot = match self.intervals.spill_slot(spilled) {
            Some(slot) => slot,
            None => {
                let slot = self
                    .spill_slots
                    .allocate(self.intervals.get(spilled).kind.is_double_word());
                self.intervals.set_spill_slot(spilled, slot);
                slot
            }
        };
        self.intervals.get_mut(spilled).location = Some(Location::Stack(slot));
        trace!("{vreg} held on the stack across the entry of {block}");
        Ok(())
    }

    fn resolve_exception_edge(
        &mut self,
        from: Block,
        throwing_pos: u32,
        handler: Block,
    ) -> Result<(), AllocError> {
        let mut mappings: Vec<(MoveSrc, IntervalId)> = Vec::new();

        for vreg in self.liveness.blocks[handler].live_in.iter() {
            let Some(parent) = self.maps.vreg_interval(vreg) else {
                continue;
            };
            let to_it = self.interval_at_block_begin(handler, parent)?;
            let from_it = self.interval_at_pos(parent, throwing_pos)?;
            if from_it == to_it {
                continue;
            }
            // A value whose spill slot is always correct needs no move when
            // the handler expects it in that slot.
            if self.intervals.always_in_memory(from_it) {
                if let Some(Location::Stack(slot)) = self.intervals.get(to_it).location {
                    if self.intervals.spill_slot(from_it) == Some(slot) {
                        continue;
                    }
                }
            }
            if self.intervals.get(from_it).location != self.intervals.get(to_it).location {
                mappings.push((MoveSrc::Interval(from_it), to_it));
            }
        }

        // Phi sources depend on which predecessor throws.
        let phis: Vec<VirtReg> = self.lir.block(handler).exception_phis.to_vec();
        let inputs: Option<Vec<Operand>> = self
            .lir
            .block(handler)
            .phi_inputs_for(from)
            .map(<[Operand]>::to_vec);
        let mut phi_fanout = false;
        for (index, phi) in phis.into_iter().enumerate() {
            let Some(parent) = self.maps.vreg_interval(phi) else {
                continue;
            };
            let Some(inputs) = &inputs else { continue };
            let to_it = self.interval_at_block_begin(handler, parent)?;
            // One source may feed several phis of the same handler.
            phi_fanout = true;
            match inputs[index] {
                Operand::Const(value) => mappings.push((MoveSrc::Const(value), to_it)),
                Operand::Virt(src) => {
                    let Some(src_parent) = self.maps.vreg_interval(src) else {
                        continue;
                    };
                    let from_it = self.interval_at_pos(src_parent, throwing_pos)?;
                    mappings.push((MoveSrc::Interval(from_it), to_it));
                }
                _ => debug_assert!(false, "phi input must be a value or constant"),
            }
        }

        if mappings.is_empty() {
            return Ok(());
        }

        // The moves run out of line, on a stub spliced into the edge.
        let stub = self.create_handler_stub(from, handler);
        self.resolver.set_insert_position(
            &mut *self.lir,
            &mut *self.intervals,
            &mut *self.spill_slots,
            &mut *self.stats,
            stub,
            0,
        );
        if phi_fanout {
            self.resolver.set_multiple_reads_allowed();
        }
        for (src, dst) in mappings {
            self.resolver.add_mapping(self.intervals, src, dst);
        }
        self.resolver.resolve_mappings(
            &mut *self.lir,
            &mut *self.intervals,
            &mut *self.spill_slots,
            &mut *self.stats,
        );
        stat!(self.stats, exception_edges);
        Ok(())
    }

    /// Redirects the exception edge through a new block that will carry the
    /// edge's moves and jumps on to the handler.
    fn create_handler_stub(&mut self, from: Block, handler: Block) -> Block {
        let stub = self.lir.create_block();
        self.lir.push_inst(stub, Op::Jump { target: handler });
        trace!("created {stub} on the edge {from} -> {handler}");

        let from_data = self.lir.block_mut(from);
        if let Some(edge) = from_data.handlers.iter_mut().find(|h| **h == handler) {
            *edge = stub;
        }
        self.lir.block_mut(stub).succs.push(handler);
        self.lir.block_mut(stub).preds.push(from);
        let handler_data = self.lir.block_mut(handler);
        if let Some(pred) = handler_data.preds.iter_mut().find(|p| **p == from) {
            *pred = stub;
        }
        // Stubs live out of line, after the ordinary layout.
        self.lir.order.push(stub);
        stub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::builder::number_instructions;
    use crate::internal::interval::{IntervalOperand, SpillState};
    use crate::lir::{DebugInfo, PhiInputs, PhysReg, StackSlot, ValueKind};

    fn interval_split_at(
        intervals: &mut Intervals,
        vreg: VirtReg,
        range: (u32, u32),
        split_pos: u32,
        head_loc: Location,
        tail_loc: Location,
    ) -> IntervalId {
        let id = intervals.create(IntervalOperand::Virt(vreg), ValueKind::Int);
        intervals.add_range(id, range.0, range.1);
        let tail = intervals.split(id, split_pos);
        intervals.get_mut(id).location = Some(head_loc);
        intervals.get_mut(tail).location = Some(tail_loc);
        id
    }

    struct Fixture {
        lir: Lir,
        numbering: Numbering,
        liveness: Liveness,
        intervals: Intervals,
        maps: IntervalMaps,
        resolver: MoveResolver,
        spill_slots: SpillSlots,
        stats: Stats,
    }

    impl Fixture {
        fn new(lir: Lir) -> Self {
            let mut stats = Stats::default();
            let mut numbering = Numbering::default();
            number_instructions(&lir, &mut numbering);
            let mut liveness = Liveness::new();
            liveness.compute(&lir, &mut stats).unwrap();
            let mut maps = IntervalMaps::new();
            maps.vreg.clear_and_resize(lir.num_vregs());
            let mut resolver = MoveResolver::new();
            resolver.clear(8);
            let mut spill_slots = SpillSlots::new();
            spill_slots.clear(0);
            Fixture {
                lir,
                numbering,
                liveness,
                intervals: Intervals::new(),
                maps,
                resolver,
                spill_slots,
                stats,
            }
        }

        fn resolve(&mut self) {
            let mut ctx = ResolveCtx {
                lir: &mut self.lir,
                numbering: &self.numbering,
                liveness: &self.liveness,
                intervals: &mut self.intervals,
                maps: &self.maps,
                resolver: &mut self.resolver,
                spill_slots: &mut self.spill_slots,
                stats: &mut self.stats,
            };
            ctx.resolve_data_flow().unwrap();
            ctx.resolve_exception_handlers().unwrap();
            self.resolver.append_moves(
                &mut self.lir,
                &mut self.intervals,
                &mut self.spill_slots,
                &mut self.stats,
            );
        }
    }

    fn moves_in(lir: &Lir, block: Block) -> Vec<(Operand, Operand)> {
        lir.block(block)
            .insts
            .iter()
            .filter_map(|&inst| lir.inst(inst).as_move())
            .collect()
    }

    fn def_of(lir: &mut Lir, block: Block, vreg: VirtReg) {
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![Operand::Virt(vreg)],
            },
        );
    }

    fn use_of(lir: &mut Lir, block: Block, vreg: VirtReg) {
        lir.push_inst(
            block,
            Op::Compute {
                inputs: smallvec::smallvec![Operand::Virt(vreg)],
                temps: smallvec::smallvec![],
                outputs: smallvec::smallvec![],
            },
        );
    }

    #[test]
    fn edge_mismatch_inserts_move_before_branch() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let b1 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        def_of(&mut lir, b0, v);
        lir.push_inst(b0, Op::Jump { target: b1 });
        use_of(&mut lir, b1, v);
        lir.push_inst(b1, Op::Return { value: None });
        lir.add_edge(b0, b1);
        lir.set_block_order(alloc::vec![b0, b1]);

        let mut fx = Fixture::new(lir);
        // v is in r0 in b0 but was split to the stack at the boundary.
        let parent = interval_split_at(
            &mut fx.intervals,
            v,
            (2, 9),
            6,
            Location::Reg(PhysReg::new(0)),
            Location::Stack(StackSlot::new(0)),
        );
        fx.maps.vreg[v] = parent.into();
        fx.resolve();

        assert_eq!(
            moves_in(&fx.lir, b0),
            alloc::vec![(
                Operand::Reg(PhysReg::new(0)),
                Operand::Stack(StackSlot::new(0))
            )]
        );
        // The move sits before the jump.
        let last = *fx.lir.block(b0).insts.last().unwrap();
        assert!(matches!(fx.lir.inst(last).op, Op::Jump { .. }));
    }

    #[test]
    fn empty_block_carries_the_edge_moves() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let b1 = lir.create_block();
        let b2 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        def_of(&mut lir, b0, v);
        lir.push_inst(b0, Op::Jump { target: b1 });
        lir.push_inst(b1, Op::Jump { target: b2 });
        use_of(&mut lir, b2, v);
        lir.push_inst(b2, Op::Return { value: None });
        lir.add_edge(b0, b1);
        lir.add_edge(b1, b2);
        lir.set_block_order(alloc::vec![b0, b1, b2]);

        let mut fx = Fixture::new(lir);
        let parent = interval_split_at(
            &mut fx.intervals,
            v,
            (2, 13),
            10,
            Location::Reg(PhysReg::new(0)),
            Location::Stack(StackSlot::new(0)),
        );
        fx.maps.vreg[v] = parent.into();
        fx.resolve();

        // The pred and succ blocks stay clean; the jump-only block hosts
        // the move.
        assert!(moves_in(&fx.lir, b0).is_empty());
        assert!(moves_in(&fx.lir, b2).is_empty());
        assert_eq!(fx.lir.block(b1).insts.len(), 2);
        assert_eq!(
            moves_in(&fx.lir, b1),
            alloc::vec![(
                Operand::Reg(PhysReg::new(0)),
                Operand::Stack(StackSlot::new(0))
            )]
        );
    }

    #[test]
    fn matching_locations_need_no_moves() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let b1 = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        def_of(&mut lir, b0, v);
        lir.push_inst(b0, Op::Jump { target: b1 });
        use_of(&mut lir, b1, v);
        lir.push_inst(b1, Op::Return { value: None });
        lir.add_edge(b0, b1);
        lir.set_block_order(alloc::vec![b0, b1]);

        let mut fx = Fixture::new(lir);
        let parent = interval_split_at(
            &mut fx.intervals,
            v,
            (2, 9),
            6,
            Location::Reg(PhysReg::new(3)),
            Location::Reg(PhysReg::new(3)),
        );
        fx.maps.vreg[v] = parent.into();
        fx.resolve();

        assert!(moves_in(&fx.lir, b0).is_empty());
        assert!(moves_in(&fx.lir, b1).is_empty());
    }

    #[test]
    fn memory_resident_value_leaves_its_register_at_handler_entry() {
        // v sits in r0 when the call throws, but its spill slot is always
        // correct. The handler entry pins v to the slot for one position
        // and reloads it, so the throw path itself moves nothing.
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let handler = lir.create_block();
        let exit = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);

        def_of(&mut lir, b0, v);
        lir.push_inst_with_info(
            b0,
            Op::Call {
                args: smallvec::smallvec![],
                result: None,
            },
            DebugInfo::default(),
        );
        lir.push_inst(b0, Op::Jump { target: exit });
        use_of(&mut lir, handler, v);
        lir.push_inst(handler, Op::Jump { target: exit });
        lir.push_inst(exit, Op::Return { value: None });
        lir.add_edge(b0, exit);
        lir.add_edge(handler, exit);
        lir.add_exception_edge(b0, handler);
        lir.set_block_order(alloc::vec![b0, handler, exit]);

        let mut fx = Fixture::new(lir);
        let v_it = fx
            .intervals
            .create(IntervalOperand::Virt(v), ValueKind::Int);
        fx.intervals.add_range(v_it, 2, 13);
        fx.intervals.get_mut(v_it).location = Some(Location::Reg(PhysReg::new(0)));
        fx.intervals.set_spill_state(v_it, SpillState::StartInMemory);
        fx.maps.vreg[v] = v_it.into();
        fx.resolve();

        // A stack-resident split covers exactly the entry position.
        let entry = fx.numbering.block_from(handler);
        let head = fx.intervals.split_child_at(v_it, entry, false).unwrap();
        assert_eq!(fx.intervals.from(head), entry);
        assert_eq!(fx.intervals.to(head), entry + 1);
        let slot = fx.intervals.spill_slot(v_it).unwrap();
        assert_eq!(fx.intervals.get(head).location, Some(Location::Stack(slot)));

        // The register part resumes right after the entry via a reload at
        // the head of the handler.
        let tail = fx.intervals.split_child_at(v_it, entry + 2, true).unwrap();
        assert_eq!(
            fx.intervals.get(tail).location,
            Some(Location::Reg(PhysReg::new(0)))
        );
        assert_eq!(
            moves_in(&fx.lir, handler),
            alloc::vec![(Operand::Stack(slot), Operand::Reg(PhysReg::new(0)))]
        );

        // The edge needed no moves of its own, so no stub was spliced in.
        assert_eq!(fx.lir.block(b0).handlers[0], handler);
        assert_eq!(fx.stats.exception_edges, 0);
    }

    #[test]
    fn exception_edge_moves_run_on_a_stub() {
        let mut lir = Lir::new();
        let b0 = lir.create_block();
        let handler = lir.create_block();
        let exit = lir.create_block();
        let v = lir.new_vreg(ValueKind::Int);
        let phi = lir.new_vreg(ValueKind::Int);

        def_of(&mut lir, b0, v);
        lir.push_inst_with_info(
            b0,
            Op::Call {
                args: smallvec::smallvec![],
                result: None,
            },
            DebugInfo::default(),
        );
        lir.push_inst(b0, Op::Jump { target: exit });
        use_of(&mut lir, handler, phi);
        lir.push_inst(handler, Op::Jump { target: exit });
        lir.push_inst(exit, Op::Return { value: None });
        lir.add_edge(b0, exit);
        lir.add_edge(handler, exit);
        lir.add_exception_edge(b0, handler);
        lir.block_mut(handler).exception_phis.push(phi);
        lir.block_mut(handler).phi_inputs.push(PhiInputs {
            from: b0,
            operands: smallvec::smallvec![Operand::Virt(v)],
        });
        lir.set_block_order(alloc::vec![b0, handler, exit]);

        let mut fx = Fixture::new(lir);
        let v_it = fx
            .intervals
            .create(IntervalOperand::Virt(v), ValueKind::Int);
        fx.intervals.add_range(v_it, 2, 7);
        fx.intervals.get_mut(v_it).location = Some(Location::Reg(PhysReg::new(0)));
        fx.maps.vreg[v] = v_it.into();
        let phi_it = fx
            .intervals
            .create(IntervalOperand::Virt(phi), ValueKind::Int);
        fx.intervals.add_range(phi_it, 8, 11);
        fx.intervals.get_mut(phi_it).location = Some(Location::Reg(PhysReg::new(1)));
        fx.maps.vreg[phi] = phi_it.into();
        fx.resolve();

        // The edge now goes through a stub holding the phi move.
        let stub = fx.lir.block(b0).handlers[0];
        assert_ne!(stub, handler);
        assert_eq!(
            moves_in(&fx.lir, stub),
            alloc::vec![(
                Operand::Reg(PhysReg::new(0)),
                Operand::Reg(PhysReg::new(1))
            )]
        );
        let last = *fx.lir.block(stub).insts.last().unwrap();
        assert!(matches!(fx.lir.inst(last).op, Op::Jump { target } if target == handler));
        assert!(fx.lir.block(handler).preds.contains(&stub));
        assert_eq!(fx.lir.block_order().last(), Some(&stub));
        assert_eq!(fx.stats.exception_edges, 1);
    }
}
