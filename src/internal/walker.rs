//! The linear scan itself.
//!
//! Intervals are processed in order of increasing start position. At each
//! interval the walker first tries a register that is free for the whole
//! lifetime, then a partially free one, and finally evicts other intervals
//! by splitting and spilling them. Split-off tails go back into the
//! unhandled queue and are allocated on their own when the scan reaches
//! them.
//!
//! The walker keeps active and inactive lists per interval kind (fixed and
//! ordinary) and advances a private range cursor per interval; the interval
//! data itself is never mutated by mere list transitions.

use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Reverse;

use smallvec::SmallVec;

use crate::entity::{PackedOption, SecondaryMap};
use crate::internal::interval::{
    IntervalId, Intervals, MAX_POS, RangeId, SpillState, State, UseKind,
};
use crate::internal::move_resolver::{MoveResolver, MoveSrc};
use crate::lir::{Lir, Location, Numbering, Operand, PhysReg, StackSlot};
use crate::target::{RegClass, TargetDesc};
use crate::{AllocError, Stats};

/// Spill slot allocator for one frame.
///
/// Slots below `reserved` belong to incoming arguments; spill slots are
/// handed out after them. Double-word values take an even-aligned pair; the
/// odd slot skipped by alignment is remembered and reused for the next
/// single-word spill.
pub(crate) struct SpillSlots {
    reserved: u32,
    max_spills: u32,
    unused_slot: PackedOption<StackSlot>,
}

impl SpillSlots {
    pub fn new() -> Self {
        Self {
            reserved: 0,
            max_spills: 0,
            unused_slot: None.into(),
        }
    }

    pub fn clear(&mut self, reserved: u32) {
        self.reserved = reserved;
        self.max_spills = 0;
        self.unused_slot = None.into();
    }

    pub fn allocate(&mut self, double_word: bool) -> StackSlot {
        if double_word {
            if self.max_spills % 2 != 0 {
                self.unused_slot =
                    StackSlot::new((self.reserved + self.max_spills) as usize).into();
                self.max_spills += 1;
            }
            let slot = StackSlot::new((self.reserved + self.max_spills) as usize);
            self.max_spills += 2;
            slot
        } else if let Some(slot) = self.unused_slot.take() {
            slot
        } else {
            let slot = StackSlot::new((self.reserved + self.max_spills) as usize);
            self.max_spills += 1;
            slot
        }
    }

    /// Number of spill slots allocated so far.
    pub fn num_spill_slots(&self) -> u32 {
        self.max_spills
    }

    /// Frame size in slots, including the reserved argument area.
    pub fn total_slots(&self) -> u32 {
        self.reserved + self.max_spills
    }
}

const FIXED: usize = 0;
const ANY: usize = 1;

#[inline]
fn kind_index(fixed: bool) -> usize {
    if fixed { FIXED } else { ANY }
}

pub(crate) struct Walker<'a> {
    pub lir: &'a mut Lir,
    pub numbering: &'a Numbering,
    pub target: &'a TargetDesc,
    pub intervals: &'a mut Intervals,
    pub resolver: &'a mut MoveResolver,
    pub spill_slots: &'a mut SpillSlots,
    pub stats: &'a mut Stats,

    /// Unhandled intervals as packed entries: start position, then a bit
    /// putting fixed intervals first at equal starts, then the id.
    unhandled: BinaryHeap<Reverse<u64>>,

    active: [Vec<IntervalId>; 2],
    inactive: [Vec<IntervalId>; 2],

    /// Current range of each interval on the active or inactive lists.
    cursor: SecondaryMap<IntervalId, PackedOption<RangeId>>,

    position: u32,

    /// Per register: position up to which it is free for the current
    /// candidate. 0 means not usable at all.
    use_pos: Vec<u32>,

    /// Per register: position at which a fixed interval definitely blocks
    /// it, limiting how far a partial assignment may reach.
    block_pos: Vec<u32>,

    /// Per register: intervals that could be evicted to free it.
    spill_candidates: Vec<SmallVec<[IntervalId; 2]>>,
}

/// Packed unhandled-queue entry: start position, then a bit putting fixed
/// intervals first at equal starts, then the id as the final tie-break.
fn unhandled_entry(from: u32, fixed: bool, id: IntervalId) -> u64 {
    ((from as u64) << 33) | ((!fixed as u64) << 32) | id.index() as u64
}

pub(crate) fn allocate_registers(
    lir: &mut Lir,
    numbering: &Numbering,
    target: &TargetDesc,
    intervals: &mut Intervals,
    resolver: &mut MoveResolver,
    spill_slots: &mut SpillSlots,
    stats: &mut Stats,
) -> Result<(), AllocError> {
    let num_regs = target.num_regs() as usize;
    Walker {
        lir,
        numbering,
        target,
        intervals,
        resolver,
        spill_slots,
        stats,
        unhandled: BinaryHeap::new(),
        active: [Vec::new(), Vec::new()],
        inactive: [Vec::new(), Vec::new()],
        cursor: SecondaryMap::new(),
        position: 0,
        use_pos: alloc::vec![0; num_regs],
        block_pos: alloc::vec![0; num_regs],
        spill_candidates: alloc::vec![SmallVec::new(); num_regs],
    }
    .run()
}

impl Walker<'_> {
    fn run(mut self) -> Result<(), AllocError> {
        for index in 0..self.intervals.intervals.len() {
            let id = IntervalId::new(index);
            if self.intervals.get(id).first.is_some() {
                self.enqueue(id);
            }
        }

        while let Some(Reverse(entry)) = self.unhandled.pop() {
            let current = IntervalId::new((entry & 0xffff_ffff) as usize);
            let from = self.intervals.from(current);
            debug_assert!(from >= self.position);
            self.walk_to(from);
            trace!(
                "allocating {current} [{from}, {})",
                self.intervals.to(current)
            );
            self.intervals.get_mut(current).state = State::Active;
            self.activate_current(current)?;
        }

        self.resolver.append_moves(
            &mut *self.lir,
            &mut *self.intervals,
            &mut *self.spill_slots,
            &mut *self.stats,
        );
        Ok(())
    }

    fn enqueue(&mut self, id: IntervalId) {
        let from = self.intervals.from(id);
        let fixed = self.intervals.get(id).operand.is_fixed();
        self.unhandled.push(Reverse(unhandled_entry(from, fixed, id)));
    }

    /// Updates the active and inactive lists for the new scan position.
    fn walk_to(&mut self, pos: u32) {
        debug_assert!(pos >= self.position);
        self.position = pos;

        for kind in [FIXED, ANY] {
            let mut active = core::mem::take(&mut self.active[kind]);
            active.retain(|&it| {
                self.advance_cursor(it, pos);
                match self.cursor[it].expand() {
                    None => {
                        trace!("{it} handled");
                        self.intervals.get_mut(it).state = State::Handled;
                        false
                    }
                    Some(range) if self.intervals.ranges[range].from > pos => {
                        self.intervals.get_mut(it).state = State::Inactive;
                        self.inactive[kind].push(it);
                        false
                    }
                    Some(_) => true,
                }
            });
            self.active[kind] = active;

            let mut inactive = core::mem::take(&mut self.inactive[kind]);
            inactive.retain(|&it| {
                self.advance_cursor(it, pos);
                match self.cursor[it].expand() {
                    None => {
                        trace!("{it} handled");
                        self.intervals.get_mut(it).state = State::Handled;
                        false
                    }
                    Some(range) if self.intervals.ranges[range].from <= pos => {
                        self.intervals.get_mut(it).state = State::Active;
                        self.active[kind].push(it);
                        false
                    }
                    Some(_) => true,
                }
            });
            self.inactive[kind] = inactive;
        }
    }

    fn advance_cursor(&mut self, it: IntervalId, pos: u32) {
        while let Some(range) = self.cursor[it].expand() {
            if self.intervals.ranges[range].to > pos {
                break;
            }
            self.cursor[it] = self.intervals.ranges[range].next;
        }
    }

    fn activate_current(&mut self, cur: IntervalId) -> Result<(), AllocError> {
        let mut activated = true;
        match self.intervals.get(cur).location {
            Some(Location::Stack(_)) => {
                // Starts out in memory (incoming argument); keep it there
                // until a use wants a register.
                self.split_stack_interval(cur);
                activated = false;
            }
            Some(Location::Reg(_)) => {
                // Fixed interval blocking its register.
            }
            None => {
                self.combine_spilled_intervals(cur);
                let class = RegClass::for_kind(self.intervals.get(cur).kind);
                if self.no_allocation_possible(cur) || !self.alloc_free_reg(cur, class) {
                    self.alloc_locked_reg(cur, class)?;
                }
                if !matches!(self.intervals.get(cur).location, Some(Location::Reg(_))) {
                    activated = false;
                }
            }
        }

        if self.intervals.get(cur).insert_move_when_activated {
            // The split position had no lifetime hole, so the value must be
            // carried over from the previously active family member.
            let src = self.intervals.current_split_child(cur);
            self.insert_move(self.intervals.from(cur), src, cur);
        }
        self.intervals.make_current_split_child(cur);

        if activated {
            let kind = kind_index(self.intervals.get(cur).operand.is_fixed());
            self.cursor.grow_to(self.intervals.intervals.len());
            self.cursor[cur] = self.intervals.get(cur).first;
            self.active[kind].push(cur);
        } else {
            self.intervals.get_mut(cur).state = State::Handled;
        }
        Ok(())
    }

    /// An interval starting just before a call can never get a register; the
    /// call clobbers them all.
    fn no_allocation_possible(&self, cur: IntervalId) -> bool {
        let from = self.intervals.from(cur);
        from % 2 == 1
            && from < self.numbering.max_pos()
            && self
                .numbering
                .inst_at(from + 1)
                .is_some_and(|inst| self.lir.inst(inst).has_call())
    }

    fn reg_of(&self, it: IntervalId) -> Option<PhysReg> {
        match self.intervals.get(it).location {
            Some(Location::Reg(reg)) => Some(reg),
            _ => None,
        }
    }

    fn cursor_from(&self, it: IntervalId) -> u32 {
        let range = self.cursor[it].unwrap();
        self.intervals.ranges[range].from
    }

    /// First intersection of an in-progress interval (from its cursor) with
    /// the current candidate.
    fn current_intersection(&self, it: IntervalId, cur: IntervalId) -> Option<u32> {
        self.intervals
            .intersection_from(self.cursor[it].expand(), self.intervals.get(cur).first.expand())
    }

    fn init_use_lists(&mut self, class: RegClass) {
        let num_regs = self.target.num_regs() as usize;
        self.use_pos.clear();
        self.use_pos.resize(num_regs, 0);
        self.block_pos.clear();
        self.block_pos.resize(num_regs, 0);
        for &reg in self.target.allocatable(class) {
            self.use_pos[reg.index()] = MAX_POS;
            self.block_pos[reg.index()] = MAX_POS;
        }
        for list in &mut self.spill_candidates {
            list.clear();
        }
    }

    fn exclude_from_use(&mut self, it: IntervalId) {
        if let Some(reg) = self.reg_of(it) {
            self.use_pos[reg.index()] = 0;
        }
    }

    fn set_use_pos(&mut self, it: IntervalId, pos: Option<u32>, only_process_use_pos: bool) {
        let Some(pos) = pos else { return };
        debug_assert!(pos != 0);
        if let Some(reg) = self.reg_of(it) {
            let index = reg.index();
            if self.use_pos[index] > pos {
                self.use_pos[index] = pos;
            }
            if !only_process_use_pos {
                self.spill_candidates[index].push(it);
            }
        }
    }

    fn set_block_pos(&mut self, it: IntervalId, pos: Option<u32>) {
        let Some(pos) = pos else { return };
        if let Some(reg) = self.reg_of(it) {
            let index = reg.index();
            if self.block_pos[index] > pos {
                self.block_pos[index] = pos;
            }
            if self.use_pos[index] > pos {
                self.use_pos[index] = pos;
            }
        }
    }

    /// Tries to assign a register that no overlapping interval holds.
    fn alloc_free_reg(&mut self, cur: IntervalId, class: RegClass) -> bool {
        self.init_use_lists(class);

        for kind in [FIXED, ANY] {
            for index in 0..self.active[kind].len() {
                let it = self.active[kind][index];
                self.exclude_from_use(it);
            }
        }
        for index in 0..self.inactive[FIXED].len() {
            let it = self.inactive[FIXED][index];
            // A fixed interval resuming after cur ends does not restrict the
            // register within cur at all.
            let pos = if self.intervals.to(cur) <= self.cursor_from(it) {
                Some(self.cursor_from(it))
            } else {
                self.current_intersection(it, cur)
            };
            self.set_use_pos(it, pos, true);
        }
        for index in 0..self.inactive[ANY].len() {
            let it = self.inactive[ANY][index];
            let pos = self.current_intersection(it, cur);
            self.set_use_pos(it, pos, true);
        }

        let hint_reg = self
            .intervals
            .location_hint(cur)
            .and_then(|hint| self.reg_of(hint));
        trace!("trying free register for {cur}, hint {hint_reg:?}");

        // The register must stay free at least past the definition.
        let reg_needed_until = self.intervals.from(cur) + 1;
        let interval_to = self.intervals.to(cur);

        let mut min_full: Option<PhysReg> = None;
        let mut max_partial: Option<PhysReg> = None;
        for &reg in self.target.allocatable(class) {
            let use_pos = self.use_pos[reg.index()];
            if use_pos >= interval_to {
                // Free for the whole interval. Prefer the hint; otherwise
                // keep long-free registers for longer intervals.
                let better = match min_full {
                    None => true,
                    Some(best) => {
                        Some(reg) == hint_reg
                            || (use_pos < self.use_pos[best.index()] && Some(best) != hint_reg)
                    }
                };
                if better {
                    min_full = Some(reg);
                }
            } else if use_pos > reg_needed_until {
                let better = match max_partial {
                    None => true,
                    Some(best) => {
                        Some(reg) == hint_reg
                            || (use_pos > self.use_pos[best.index()] && Some(best) != hint_reg)
                    }
                };
                if better {
                    max_partial = Some(reg);
                }
            }
        }

        let (reg, need_split) = match (min_full, max_partial) {
            (Some(reg), _) => (reg, false),
            (None, Some(reg)) => (reg, true),
            (None, None) => return false,
        };
        let split_pos = self.use_pos[reg.index()];
        trace!("assigned free {reg} to {cur}");
        self.intervals.get_mut(cur).location = Some(Location::Reg(reg));
        if need_split {
            // The register is only free for the first part of the interval.
            self.split_when_partial_register_available(cur, split_pos);
        }
        true
    }

    /// Assigns a register held by other intervals, evicting them, or spills
    /// the current interval when every register is used sooner.
    fn alloc_locked_reg(&mut self, cur: IntervalId, class: RegClass) -> Result<(), AllocError> {
        self.init_use_lists(class);

        for index in 0..self.active[FIXED].len() {
            let it = self.active[FIXED][index];
            self.exclude_from_use(it);
        }
        for index in 0..self.inactive[FIXED].len() {
            let it = self.inactive[FIXED][index];
            if self.intervals.to(cur) > self.cursor_from(it) {
                let pos = self.current_intersection(it, cur);
                self.set_block_pos(it, pos);
            }
        }
        for index in 0..self.active[ANY].len() {
            let it = self.active[ANY][index];
            let pos = self
                .intervals
                .next_usage(it, UseKind::LoopEndMarker, self.position)
                .min(self.intervals.to(it));
            self.set_use_pos(it, Some(pos), false);
        }
        for index in 0..self.inactive[ANY].len() {
            let it = self.inactive[ANY][index];
            if self.current_intersection(it, cur).is_some() {
                let pos = self
                    .intervals
                    .next_usage(it, UseKind::LoopEndMarker, self.position)
                    .min(self.intervals.to(it));
                self.set_use_pos(it, Some(pos), false);
            }
        }

        let first_usage = self.intervals.first_usage(cur, UseKind::MustHaveRegister);
        let reg_needed_until = first_usage.min(self.intervals.from(cur) + 1);
        let interval_to = self.intervals.to(cur);

        // The register whose next use lies furthest away.
        let mut best: Option<PhysReg> = None;
        let mut best_pos = 0;
        for &reg in self.target.allocatable(class) {
            let use_pos = self.use_pos[reg.index()];
            if use_pos > reg_needed_until && use_pos > best_pos {
                best = Some(reg);
                best_pos = use_pos;
            }
        }

        let reg = match best {
            Some(reg) if best_pos > first_usage => reg,
            _ => {
                // Every register is used before cur's first register use, so
                // cur is the cheapest interval to spill.
                if first_usage <= self.intervals.from(cur) + 1 {
                    // The definition itself requires a register that does
                    // not exist; the input is unallocatable.
                    return Err(AllocError::OutOfRegisters { pos: self.position });
                }
                trace!("no register available, spilling {cur}");
                self.split_and_spill_interval(cur);
                return Ok(());
            }
        };

        let split_pos = self.block_pos[reg.index()];
        let need_split = split_pos <= interval_to;
        trace!("evicting intervals to give {reg} to {cur}");
        self.intervals.get_mut(cur).location = Some(Location::Reg(reg));
        if need_split {
            // A fixed use blocks this register before cur ends.
            self.split_when_partial_register_available(cur, split_pos);
        }
        self.split_and_spill_intersecting(reg);
        Ok(())
    }

    fn split_and_spill_intersecting(&mut self, reg: PhysReg) {
        let candidates = core::mem::take(&mut self.spill_candidates[reg.index()]);
        for it in candidates {
            self.remove_from_lists(it);
            self.split_and_spill_interval(it);
        }
    }

    fn remove_from_lists(&mut self, it: IntervalId) {
        for kind in [FIXED, ANY] {
            self.active[kind].retain(|&other| other != it);
            self.inactive[kind].retain(|&other| other != it);
        }
    }

    fn split_and_spill_interval(&mut self, it: IntervalId) {
        let pos = self.position;
        if self.intervals.get(it).state == State::Inactive {
            // Currently in a hole; the remainder just goes back to the
            // unhandled queue and is allocated on its own.
            self.split_before_usage(it, pos + 1, pos + 1);
        } else {
            debug_assert!(self.intervals.get(it).state == State::Active);
            let min_split = pos + 1;
            let max_split = self
                .intervals
                .next_usage(it, UseKind::MustHaveRegister, min_split)
                .min(self.intervals.to(it));
            self.split_before_usage(it, min_split, max_split);
            self.split_for_spilling(it);
        }
    }

    /// Splits `it` somewhere in `[min_split, max_split]` and requeues the
    /// tail. No split happens when the remainder needs no register anyway.
    fn split_before_usage(&mut self, it: IntervalId, min_split: u32, max_split: u32) {
        debug_assert!(self.intervals.from(it) < min_split);
        debug_assert!(min_split <= max_split);

        let optimal = self.find_optimal_split_pos(it, min_split, max_split, true);
        if optimal == self.intervals.to(it)
            && self.intervals.next_usage(it, UseKind::MustHaveRegister, min_split) == MAX_POS
        {
            // The remainder never needs a register; leave it whole.
            return;
        }

        let move_necessary = !self.numbering.is_block_begin(optimal)
            && !self.intervals.has_hole_between(it, optimal - 1, optimal);
        let optimal = if self.numbering.is_block_begin(optimal) {
            optimal
        } else {
            // Splits inside a block land on the odd position before the next
            // instruction.
            (optimal - 1) | 1
        };
        debug_assert!(self.intervals.from(it) < optimal && optimal < self.intervals.to(it));

        trace!("splitting {it} at {optimal}");
        let tail = self.intervals.split(it, optimal);
        self.intervals.get_mut(tail).insert_move_when_activated = move_necessary;
        self.cursor.grow_to(self.intervals.intervals.len());
        self.enqueue(tail);
        stat!(self.stats, interval_splits);
    }

    /// Moves the part of `it` that reaches the current position out of its
    /// register and into the family's spill slot.
    fn split_for_spilling(&mut self, it: IntervalId) {
        let max_split = self.position;
        let min_split = (self
            .intervals
            .previous_usage(it, UseKind::ShouldHaveRegister, max_split)
            + 1)
        .max(self.intervals.from(it));

        if min_split == self.intervals.from(it) {
            // No register use between the start and the current position;
            // the whole part lives in memory.
            trace!("spilling all of {it}");
            self.assign_spill_slot(it);
            self.change_spill_state(it, min_split);

            // Earlier family members without any register use can give up
            // their registers too.
            let mut cur = it;
            while !self.intervals.is_split_parent(cur) {
                let parent = self.intervals.split_parent(cur);
                let prev = self
                    .intervals
                    .split_child_before(parent, self.intervals.from(cur));
                if prev == cur {
                    break;
                }
                if self.reg_of(prev).is_some() {
                    if self.intervals.first_usage(prev, UseKind::ShouldHaveRegister) == MAX_POS {
                        trace!("kicking unused {prev} out of its register");
                        self.assign_spill_slot(prev);
                    } else {
                        break;
                    }
                }
                cur = prev;
            }
        } else {
            let optimal = self.find_optimal_split_pos(it, min_split, max_split, false);
            debug_assert!(min_split <= optimal && optimal <= max_split);
            let optimal = if self.numbering.is_block_begin(optimal) {
                optimal
            } else {
                (optimal - 1) | 1
            };

            trace!("splitting {it} at {optimal} for spilling");
            let spilled = self.intervals.split(it, optimal);
            self.cursor.grow_to(self.intervals.intervals.len());
            self.assign_spill_slot(spilled);
            self.change_spill_state(spilled, optimal);
            if !self.numbering.is_block_begin(optimal) {
                // The value is still in the old register just before the
                // split position.
                self.insert_move(optimal, it, spilled);
            }
            // The spilled part is finished; any later part that needs a
            // register again was already split off and requeued.
            self.intervals.get_mut(spilled).state = State::Handled;
            self.intervals.make_current_split_child(spilled);
        }
        stat!(self.stats, spilled_intervals);
    }

    /// An interval that begins in memory is split before its first use that
    /// wants a register; the tail is requeued and allocated then.
    fn split_stack_interval(&mut self, it: IntervalId) {
        let min_split = self.position + 1;
        let max_split = self
            .intervals
            .first_usage(it, UseKind::ShouldHaveRegister)
            .min(self.intervals.to(it));
        self.split_before_usage(it, min_split, max_split);
    }

    fn split_when_partial_register_available(&mut self, it: IntervalId, available_until: u32) {
        let min_split = self
            .intervals
            .previous_usage(it, UseKind::ShouldHaveRegister, available_until)
            .max(self.intervals.from(it) + 1);
        self.split_before_usage(it, min_split, available_until);
    }

    fn assign_spill_slot(&mut self, it: IntervalId) {
        let slot = match self.intervals.spill_slot(it) {
            Some(slot) => slot,
            None => {
                let slot = self
                    .spill_slots
                    .allocate(self.intervals.get(it).kind.is_double_word());
                self.intervals.set_spill_slot(it, slot);
                slot
            }
        };
        self.intervals.get_mut(it).location = Some(Location::Stack(slot));
    }

    /// Feeds one observed spill into the family's store-at-definition state
    /// machine.
    fn change_spill_state(&mut self, it: IntervalId, spill_pos: u32) {
        match self.intervals.spill_state(it) {
            SpillState::NoSpillStore => {
                let def_pos = self.intervals.spill_definition_pos(it);
                let def_depth = self.lir.block(self.numbering.block_at(def_pos)).loop_depth;
                let spill_depth = self.lir.block(self.numbering.block_at(spill_pos)).loop_depth;
                if def_depth < spill_depth {
                    // The spill sits in a deeper loop than the definition;
                    // storing once at the definition is cheaper.
                    self.intervals
                        .set_spill_state(it, SpillState::StoreAtDefinition);
                } else {
                    self.intervals.set_spill_state(it, SpillState::OneSpillStore);
                }
            }
            SpillState::OneSpillStore => {
                // Spilled a second time; store at the definition instead.
                self.intervals
                    .set_spill_state(it, SpillState::StoreAtDefinition);
            }
            _ => {}
        }
    }

    /// Best split position in `[min_split, max_split]`: block boundaries
    /// beat mid-block positions, lower loop depth beats higher.
    fn find_optimal_split_pos(
        &self,
        it: IntervalId,
        min_split: u32,
        max_split: u32,
        do_loop_opt: bool,
    ) -> u32 {
        if min_split == max_split {
            return min_split;
        }
        debug_assert!(min_split < max_split);

        // The move inserted at a split executes before the instruction at
        // the split position, hence the -1 when mapping to blocks.
        let min_block = self.numbering.block_at(min_split - 1);
        let max_block = self.numbering.block_at(max_split - 1);
        if min_block == max_block {
            return max_split;
        }

        if self.intervals.has_hole_between(it, max_split - 1, max_split)
            && !self.numbering.is_block_begin(max_split)
        {
            // Splitting in a lifetime hole needs no move at all.
            return max_split;
        }

        if do_loop_opt {
            let loop_end = self.intervals.next_usage_exact(
                it,
                UseKind::LoopEndMarker,
                self.numbering.block_to(min_block) + 2,
            );
            if loop_end < max_split {
                // The interval crosses a loop boundary; splitting before the
                // loop keeps the reload out of the loop body.
                let loop_block = self.numbering.block_at(loop_end);
                debug_assert!(loop_block != min_block);
                let loop_limit = self.numbering.block_to(loop_block) + 2;
                let candidate = self.optimal_split_boundary(min_block, loop_block, loop_limit);
                if candidate != loop_limit {
                    return candidate;
                }
            }
        }

        self.optimal_split_boundary(min_block, max_block, max_split)
    }

    /// Best block boundary between two blocks: the end of the last block
    /// with minimal loop depth.
    fn optimal_split_boundary(
        &self,
        min_block: crate::lir::Block,
        max_block: crate::lir::Block,
        max_split: u32,
    ) -> u32 {
        debug_assert!(self.numbering.order_index[min_block] < self.numbering.order_index[max_block]);

        let mut optimal = self.numbering.block_to(max_block) + 2;
        if optimal > max_split {
            optimal = self.numbering.block_from(max_block);
        }
        let mut min_depth = self.lir.block(max_block).loop_depth;
        let from = self.numbering.order_index[min_block] as usize;
        let to = self.numbering.order_index[max_block] as usize;
        for index in (from..to).rev() {
            let block = self.lir.block_order()[index];
            if self.lir.block(block).loop_depth < min_depth {
                min_depth = self.lir.block(block).loop_depth;
                optimal = self.numbering.block_to(block) + 2;
            }
        }
        optimal
    }

    /// Records a move between two family members, to be inserted before the
    /// instruction at (the even position after) `op_id`.
    fn insert_move(&mut self, op_id: u32, src: IntervalId, dst: IntervalId) {
        let op_id = (op_id + 1) & !1;
        let block = self.numbering.block_at(op_id);
        debug_assert!(op_id > self.numbering.block_from(block));

        // Index within the block, past the synthetic entry position.
        let index = ((op_id - self.numbering.block_from(block)) / 2 - 1) as usize;
        self.resolver.set_insert_position(
            &mut *self.lir,
            &mut *self.intervals,
            &mut *self.spill_slots,
            &mut *self.stats,
            block,
            index,
        );
        self.resolver
            .add_mapping(self.intervals, MoveSrc::Interval(src), dst);
    }

    /// When an interval is the middle of a spill-move chain (value spilled,
    /// reloaded into `cur`, spilled again), allocating the family the same
    /// slot makes both chain moves redundant.
    fn combine_spilled_intervals(&mut self, cur: IntervalId) {
        if !self.intervals.is_split_parent(cur) {
            return;
        }
        let Some(hint) = self.intervals.get(cur).register_hint.expand() else {
            return;
        };
        if self.intervals.spill_state(cur) != SpillState::NoOptimization
            || self.intervals.spill_state(hint) != SpillState::NoOptimization
        {
            // Both values are redefined by the chain moves, which is exactly
            // the multiple-definition state.
            return;
        }

        let begin = self.intervals.from(cur);
        let end = self.intervals.to(cur);
        if end > self.numbering.max_pos() || begin % 2 != 0 || end % 2 != 0 {
            return;
        }
        let (Some(hint_vreg), Some(cur_vreg)) = (
            self.intervals.get(hint).operand.as_virt(),
            self.intervals.get(cur).operand.as_virt(),
        ) else {
            return;
        };
        let (Some(begin_inst), Some(end_inst)) =
            (self.numbering.inst_at(begin), self.numbering.inst_at(end))
        else {
            return;
        };
        // cur must be defined by a reload of hint and die into a store back
        // to hint.
        let begin_ok = self.lir.inst(begin_inst).as_move()
            == Some((Operand::Virt(hint_vreg), Operand::Virt(cur_vreg)));
        let end_ok = self.lir.inst(end_inst).as_move()
            == Some((Operand::Virt(cur_vreg), Operand::Virt(hint_vreg)));
        if !begin_ok || !end_ok {
            return;
        }

        let Ok(begin_hint) = self.intervals.split_child_at(hint, begin, true) else {
            return;
        };
        let Ok(end_hint) = self.intervals.split_child_at(hint, end, false) else {
            return;
        };
        if begin_hint == end_hint
            || self.intervals.to(begin_hint) != begin
            || self.intervals.from(end_hint) != end
        {
            return;
        }
        if self.reg_of(begin_hint).is_some() {
            // Only worthwhile when the value sits in memory at the chain
            // boundary.
            return;
        }
        let Some(slot) = self.intervals.spill_slot(hint) else {
            return;
        };

        trace!("sharing spill slot of {hint} with {cur}");
        self.intervals.set_spill_slot(cur, slot);
        // With both families in one slot the chain moves become identities;
        // dropping the end uses stops them from demanding registers.
        self.intervals.remove_first_use(cur);
        self.intervals.remove_first_use(end_hint);
    }
}
