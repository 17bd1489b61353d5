//! Ordering and insertion of resolving moves.
//!
//! Moves between split children of the same value, across block boundaries
//! and into exception handlers are collected as mappings and only
//! materialized once all mappings for one insertion point are known.
//! Emission order matters: a move may not overwrite a register that another
//! pending move still reads. The resolver repeatedly emits safe moves; when
//! only cycles remain it breaks one by diverting a source through its spill
//! slot.

use alloc::vec::Vec;

use crate::Stats;
use crate::entity::{PackedOption, SecondaryMap};
use crate::internal::interval::{IntervalId, Intervals, State};
use crate::internal::walker::SpillSlots;
use crate::lir::{Block, Inst, Lir, Location, Op, Operand, PhysReg};

/// The source of one resolving move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MoveSrc {
    Interval(IntervalId),
    Const(i64),
}

struct Mapping {
    from: MoveSrc,
    to: IntervalId,
}

pub(crate) struct MoveResolver {
    mappings: Vec<Mapping>,

    insert_block: PackedOption<Block>,
    insert_idx: usize,

    /// Number of pending moves reading each register.
    register_blocked: Vec<u32>,

    /// Whether one source may feed several mappings. Only exception edges
    /// need this; move cycles cannot occur there.
    multiple_reads_allowed: bool,

    /// Buffered insertions, spliced into the instruction lists at the end so
    /// that earlier insertions do not shift later indices.
    pending: Vec<(Block, usize, Inst)>,

    /// Destination interval of every inserted move, for the spill-store
    /// elimination pass.
    pub dst_interval: SecondaryMap<Inst, PackedOption<IntervalId>>,
}

impl MoveResolver {
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
            insert_block: None.into(),
            insert_idx: 0,
            register_blocked: Vec::new(),
            multiple_reads_allowed: false,
            pending: Vec::new(),
            dst_interval: SecondaryMap::new(),
        }
    }

    pub fn clear(&mut self, num_regs: u32) {
        debug_assert!(self.mappings.is_empty());
        self.insert_block = None.into();
        self.insert_idx = 0;
        self.register_blocked.clear();
        self.register_blocked.resize(num_regs as usize, 0);
        self.multiple_reads_allowed = false;
        self.pending.clear();
        self.dst_interval.clear_and_resize(0);
    }

    pub fn set_multiple_reads_allowed(&mut self) {
        self.multiple_reads_allowed = true;
    }

    pub fn has_mappings(&self) -> bool {
        !self.mappings.is_empty()
    }

    /// Sets the position at which subsequent mappings are inserted: just
    /// before `block.insts[index]`. Pending mappings for a different
    /// position are resolved first.
    pub fn set_insert_position(
        &mut self,
        lir: &mut Lir,
        intervals: &mut Intervals,
        spill_slots: &mut SpillSlots,
        stats: &mut Stats,
        block: Block,
        index: usize,
    ) {
        if self.insert_block.expand() == Some(block) && self.insert_idx == index {
            return;
        }
        if self.insert_block.is_some() {
            self.resolve_mappings(lir, intervals, spill_slots, stats);
        }
        self.insert_block = block.into();
        self.insert_idx = index;
    }

    pub fn add_mapping(&mut self, intervals: &Intervals, from: MoveSrc, to: IntervalId) {
        if let MoveSrc::Interval(from) = from {
            if intervals.get(from).location == intervals.get(to).location {
                // Same location, nothing to do.
                return;
            }
        }
        trace!("mapping {from:?} -> {to}");
        debug_assert!(self.insert_block.is_some());
        self.mappings.push(Mapping { from, to });
    }

    /// Emits all pending mappings at the current insertion point.
    pub fn resolve_mappings(
        &mut self,
        lir: &mut Lir,
        intervals: &mut Intervals,
        spill_slots: &mut SpillSlots,
        stats: &mut Stats,
    ) {
        // Locations may have changed since a mapping was added (a family
        // member can lose its register to a later spill), so the sources are
        // only pinned down now.
        for i in 0..self.mappings.len() {
            let from = self.mappings[i].from;
            self.block_source(intervals, from);
        }

        while !self.mappings.is_empty() {
            let mut progress = false;
            let mut i = 0;
            while i < self.mappings.len() {
                if self.safe_to_process(intervals, i) {
                    let mapping = self.mappings.remove(i);
                    self.unblock_source(intervals, mapping.from);
                    self.emit_move(lir, intervals, stats, mapping.from, mapping.to);
                    progress = true;
                } else {
                    i += 1;
                }
            }

            if !progress {
                // Only cycles remain. Diverting one register source through
                // its spill slot unblocks that register for the other moves
                // of the cycle.
                debug_assert!(!self.multiple_reads_allowed);
                self.break_cycle(lir, intervals, spill_slots, stats);
            }
        }
        self.multiple_reads_allowed = false;
    }

    /// Splices all buffered moves into the instruction lists.
    pub fn append_moves(
        &mut self,
        lir: &mut Lir,
        intervals: &mut Intervals,
        spill_slots: &mut SpillSlots,
        stats: &mut Stats,
    ) {
        if self.has_mappings() {
            self.resolve_mappings(lir, intervals, spill_slots, stats);
        }
        debug_assert!(self.register_blocked.iter().all(|&count| count == 0));

        // Insert back to front so earlier indices stay valid. The sort is
        // stable, preserving emission order within one insertion point.
        self.pending.sort_by_key(|&(block, index, _)| (block, index));
        for &(block, index, inst) in self.pending.iter().rev() {
            lir.block_mut(block).insts.insert(index, inst);
        }
        self.pending.clear();
        self.insert_block = None.into();
    }

    fn source_reg(intervals: &Intervals, src: MoveSrc) -> Option<PhysReg> {
        match src {
            MoveSrc::Interval(id) => match intervals.get(id).location {
                Some(Location::Reg(reg)) => Some(reg),
                _ => None,
            },
            MoveSrc::Const(_) => None,
        }
    }

    fn block_source(&mut self, intervals: &Intervals, src: MoveSrc) {
        if let Some(reg) = Self::source_reg(intervals, src) {
            debug_assert!(
                self.register_blocked[reg.index()] == 0 || self.multiple_reads_allowed,
                "register read by two different moves"
            );
            self.register_blocked[reg.index()] += 1;
        }
    }

    fn unblock_source(&mut self, intervals: &Intervals, src: MoveSrc) {
        if let Some(reg) = Self::source_reg(intervals, src) {
            debug_assert!(self.register_blocked[reg.index()] > 0);
            self.register_blocked[reg.index()] -= 1;
        }
    }

    /// A mapping is safe to emit when no pending move still reads its
    /// destination register, except its own source.
    fn safe_to_process(&self, intervals: &Intervals, i: usize) -> bool {
        let mapping = &self.mappings[i];
        match intervals.get(mapping.to).location {
            Some(Location::Reg(reg)) => {
                let blocked = self.register_blocked[reg.index()];
                blocked == 0
                    || (blocked == 1 && Self::source_reg(intervals, mapping.from) == Some(reg))
            }
            _ => true,
        }
    }

    fn emit_move(
        &mut self,
        lir: &mut Lir,
        intervals: &Intervals,
        stats: &mut Stats,
        from: MoveSrc,
        to: IntervalId,
    ) {
        let from_opr = match from {
            MoveSrc::Interval(id) => location_operand(intervals, id),
            MoveSrc::Const(value) => Operand::Const(value),
        };
        let to_opr = location_operand(intervals, to);
        if from_opr == to_opr {
            // Both ended up in the same place after all.
            return;
        }
        debug_assert!(
            !(from_opr.is_stack() && to_opr.is_stack()),
            "memory-to-memory moves are not expressible"
        );
        let block = self.insert_block.unwrap();
        trace!("inserting move {from_opr} -> {to_opr} at {block}:{}", self.insert_idx);

        let inst = lir.new_inst(Op::Move {
            from: from_opr,
            to: to_opr,
        });
        self.dst_interval.grow_to(lir.num_insts());
        self.dst_interval[inst] = to.into();
        self.pending.push((block, self.insert_idx, inst));
        stat!(stats, resolving_moves);
    }

    /// Breaks a move cycle by storing one register source to its family's
    /// spill slot and reading the cycle's move from there instead.
    fn break_cycle(
        &mut self,
        lir: &mut Lir,
        intervals: &mut Intervals,
        spill_slots: &mut SpillSlots,
        stats: &mut Stats,
    ) {
        let candidate = self
            .mappings
            .iter()
            .position(|mapping| Self::source_reg(intervals, mapping.from).is_some())
            .expect("move cycle with no register source");
        let MoveSrc::Interval(from) = self.mappings[candidate].from else {
            unreachable!()
        };
        trace!("breaking move cycle by spilling {from}");

        // The family's canonical spill slot keeps the temporary copy, so no
        // stack-to-stack move can arise when the family spills elsewhere.
        let slot = match intervals.spill_slot(from) {
            Some(slot) => slot,
            None => {
                let slot = spill_slots.allocate(intervals.get(from).kind.is_double_word());
                intervals.set_spill_slot(from, slot);
                slot
            }
        };

        // A synthetic interval represents the stacked copy so the cycle's
        // move has a source to read. Its dummy range [1, 2) marks it as
        // synthetic for the verifier.
        let operand = intervals.get(from).operand;
        let kind = intervals.get(from).kind;
        let spill = intervals.create(operand, kind);
        intervals.add_range(spill, 1, 2);
        intervals.get_mut(spill).location = Some(Location::Stack(slot));
        intervals.get_mut(spill).state = State::Handled;

        self.unblock_source(intervals, MoveSrc::Interval(from));
        self.emit_move(lir, intervals, stats, MoveSrc::Interval(from), spill);
        self.mappings[candidate].from = MoveSrc::Interval(spill);
        stat!(stats, broken_cycles);
    }
}

fn location_operand(intervals: &Intervals, id: IntervalId) -> Operand {
    match intervals.get(id).location {
        Some(loc) => loc.operand(),
        None => unreachable!("resolving move references unallocated interval"),
    }
}
