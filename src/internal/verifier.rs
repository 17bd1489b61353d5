//! Post-resolution sanity checks.
//!
//! Run after data-flow resolution, before the spill moves are cleaned up
//! and operands rewritten. Two layers: structural checks over the interval
//! arenas, and a simulated register file walked over the control-flow graph
//! that verifies every register read really holds the value the interval
//! data claims.

use alloc::vec::Vec;

use crate::AllocError;
use crate::entity::{PackedOption, SecondaryMap};
use crate::internal::builder::IntervalMaps;
use crate::internal::interval::{IntervalId, Intervals};
use crate::internal::move_resolver::MoveResolver;
use crate::lir::{Block, Lir, Location, Numbering, Operand, OperandRole};
use crate::target::TargetDesc;

fn fail(reason: &'static str) -> AllocError {
    AllocError::Verification { reason }
}

/// Checks range structure, split-family structure and that no two
/// intersecting intervals share a register.
pub(crate) fn verify_intervals(intervals: &Intervals) -> Result<(), AllocError> {
    for id in intervals.intervals.keys() {
        let interval = intervals.get(id);
        if interval.first.is_none() {
            return Err(fail("interval without ranges"));
        }
        let mut cursor = interval.first;
        while let Some(range) = cursor.expand() {
            let range = &intervals.ranges[range];
            if range.from >= range.to {
                return Err(fail("zero length range"));
            }
            cursor = range.next;
        }
        if intervals.is_split_parent(id) && !intervals.check_split_children(id) {
            return Err(fail("malformed split family"));
        }
    }

    // A synthetic cycle-break interval has the dummy range [1, 2) and never
    // holds a register.
    let synthetic =
        |id: IntervalId| intervals.from(id) == 1 && intervals.to(id) == 2;

    for a in intervals.intervals.keys() {
        let Some(Location::Reg(reg_a)) = intervals.get(a).location else {
            continue;
        };
        if synthetic(a) {
            continue;
        }
        for b in intervals.intervals.keys().skip(a.index() + 1) {
            let Some(Location::Reg(reg_b)) = intervals.get(b).location else {
                continue;
            };
            if synthetic(b) || reg_a != reg_b {
                continue;
            }
            if intervals.intersects(a, b) {
                return Err(fail("intersecting intervals share a register"));
            }
        }
    }
    Ok(())
}

/// One value slot per physical register: the split parent of the interval
/// whose value the register currently holds.
type RegState = Vec<PackedOption<IntervalId>>;

pub(crate) struct RegisterVerifier<'a> {
    lir: &'a Lir,
    numbering: &'a Numbering,
    target: &'a TargetDesc,
    intervals: &'a Intervals,
    maps: &'a IntervalMaps,
    resolver: &'a MoveResolver,

    entry_state: SecondaryMap<Block, Option<RegState>>,
    worklist: Vec<Block>,
}

impl<'a> RegisterVerifier<'a> {
    pub fn new(
        lir: &'a Lir,
        numbering: &'a Numbering,
        target: &'a TargetDesc,
        intervals: &'a Intervals,
        maps: &'a IntervalMaps,
        resolver: &'a MoveResolver,
    ) -> Self {
        let mut entry_state = SecondaryMap::new();
        entry_state.clear_and_resize(lir.num_blocks());
        Self {
            lir,
            numbering,
            target,
            intervals,
            maps,
            resolver,
            entry_state,
            worklist: Vec::new(),
        }
    }

    pub fn verify(&mut self) -> Result<(), AllocError> {
        let Some(&entry) = self.lir.block_order().first() else {
            return Ok(());
        };
        let empty: RegState = alloc::vec![None.into(); self.target.num_regs() as usize];
        self.entry_state[entry] = Some(empty);
        self.worklist.push(entry);

        while let Some(block) = self.worklist.pop() {
            let Some(state) = self.entry_state[block].clone() else {
                continue;
            };
            self.process_block(block, state)?;
        }
        Ok(())
    }

    fn process_block(&mut self, block: Block, mut state: RegState) -> Result<(), AllocError> {
        trace!("verifying {block}");
        for &inst in &self.lir.block(block).insts {
            match self.numbering.pos(inst) {
                None => self.process_inserted_move(&mut state, inst),
                Some(pos) => {
                    self.check_inputs(&state, inst, pos)?;
                    self.clobber_temps(&mut state, inst, pos)?;
                    if self.lir.inst(inst).has_call() {
                        for reg in self.target.caller_saved() {
                            state[reg.index()] = None.into();
                        }
                    }
                    self.record_outputs(&mut state, inst, pos)?;
                    // The handler sees the state at the throw point.
                    if self.lir.inst(inst).info.is_some() {
                        for &handler in &self.lir.block(block).handlers {
                            self.merge_into(handler, &state);
                        }
                    }
                }
            }
        }
        for &succ in &self.lir.block(block).succs {
            self.merge_into(succ, &state);
        }
        Ok(())
    }

    fn process_inserted_move(&self, state: &mut RegState, inst: crate::lir::Inst) {
        let Some((_, to)) = self.lir.inst(inst).as_move() else {
            return;
        };
        if let Operand::Reg(reg) = to {
            state[reg.index()] = match self.resolver.dst_interval[inst].expand() {
                Some(dst) => self.intervals.split_parent(dst).into(),
                None => None.into(),
            };
        }
    }

    fn check_inputs(
        &self,
        state: &RegState,
        inst: crate::lir::Inst,
        pos: u32,
    ) -> Result<(), AllocError> {
        let mut bad = false;
        self.lir.inst(inst).for_each_operand(OperandRole::Input, |operand| {
            if let Operand::Virt(vreg) = operand {
                match self.child_at(vreg, pos, true) {
                    Some(child) => {
                        if let Some(Location::Reg(reg)) = self.intervals.get(child).location {
                            let parent = self.intervals.split_parent(child);
                            if state[reg.index()].expand() != Some(parent) {
                                bad = true;
                            }
                        }
                    }
                    None => bad = true,
                }
            }
        });
        if bad {
            return Err(fail("register read holds a different value"));
        }
        Ok(())
    }

    fn clobber_temps(
        &self,
        state: &mut RegState,
        inst: crate::lir::Inst,
        pos: u32,
    ) -> Result<(), AllocError> {
        let mut bad = false;
        self.lir.inst(inst).for_each_operand(OperandRole::Temp, |operand| {
            match operand {
                Operand::Reg(reg) => state[reg.index()] = None.into(),
                Operand::Virt(vreg) => match self.child_at(vreg, pos, true) {
                    Some(child) => {
                        if let Some(Location::Reg(reg)) = self.intervals.get(child).location {
                            state[reg.index()] = None.into();
                        }
                    }
                    None => bad = true,
                },
                _ => {}
            }
        });
        if bad {
            return Err(fail("temp operand has no covering interval"));
        }
        Ok(())
    }

    fn record_outputs(
        &self,
        state: &mut RegState,
        inst: crate::lir::Inst,
        pos: u32,
    ) -> Result<(), AllocError> {
        let mut bad = false;
        self.lir
            .inst(inst)
            .for_each_operand(OperandRole::Output, |operand| match operand {
                Operand::Virt(vreg) => match self.child_at(vreg, pos, false) {
                    Some(child) => {
                        if let Some(Location::Reg(reg)) = self.intervals.get(child).location {
                            let parent = self.intervals.split_parent(child);
                            state[reg.index()] = parent.into();
                        }
                    }
                    None => bad = true,
                },
                Operand::Reg(reg) => state[reg.index()] = None.into(),
                _ => {}
            });
        if bad {
            return Err(fail("output operand has no covering interval"));
        }
        Ok(())
    }

    fn child_at(&self, vreg: crate::lir::VirtReg, pos: u32, inclusive_to: bool) -> Option<IntervalId> {
        let parent = self.maps.vreg_interval(vreg)?;
        self.intervals.split_child_at(parent, pos, inclusive_to).ok()
    }

    /// Registers whose value differs between two paths hold no known value
    /// at the join.
    fn merge_into(&mut self, block: Block, state: &RegState) {
        match &mut self.entry_state[block] {
            slot @ None => {
                *slot = Some(state.clone());
                self.worklist.push(block);
            }
            Some(existing) => {
                let mut changed = false;
                for (have, new) in existing.iter_mut().zip(state) {
                    if have.expand() != new.expand() && have.is_some() {
                        *have = None.into();
                        changed = true;
                    }
                }
                if changed {
                    self.worklist.push(block);
                }
            }
        }
    }
}
