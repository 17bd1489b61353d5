//! Lifetime intervals and their ranges.
//!
//! An interval represents the set of positions at which one value (a virtual
//! register or a fixed physical register) is live. It owns a list of
//! disjoint, strictly increasing ranges plus a list of use positions sorted
//! by decreasing position, which is the natural insertion order during the
//! builder's backward traversal.
//!
//! Intervals and ranges live in arenas ([`PrimaryMap`]) and link to each
//! other through [`PackedOption`] indices. Splitting an interval produces a
//! child interval in the same arena; all children of a split parent share one
//! canonical spill slot and are kept sorted by start position so lookups can
//! binary search.
//!
//! Walk state (the "current range" of an interval during a linear walk) is
//! deliberately not stored here; each walker owns its own cursors.

use alloc::vec::Vec;

use smallvec::SmallVec;

use crate::AllocError;
use crate::entity::{PackedOption, PrimaryMap};
use crate::lir::{Location, PhysReg, StackSlot, ValueKind, VirtReg};

entity_def! {
    /// An interval in the interval arena.
    pub(crate) entity IntervalId(u32, "iv");

    /// A range in the range arena.
    pub(crate) entity RangeId(u32, "range");
}

/// Sentinel position, larger than any real instruction position.
pub(crate) const MAX_POS: u32 = u32::MAX;

/// One contiguous span `[from, to)` of positions at which a value is live.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RangeData {
    pub from: u32,
    pub to: u32,
    pub next: PackedOption<RangeId>,
}

/// How strongly a use position needs a register.
///
/// The order matters: queries filter by minimum strictness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum UseKind {
    /// The value is mentioned (e.g. in debug info) but no register is
    /// required.
    None,
    /// Marks a loop end so the walker avoids splitting right at the back
    /// edge.
    LoopEndMarker,
    /// A register is preferred but a stack operand works.
    ShouldHaveRegister,
    /// A register is required.
    MustHaveRegister,
}

/// A recorded use of a value.
#[derive(Clone, Copy, Debug)]
pub(crate) struct UsePos {
    pub pos: u32,
    pub kind: UseKind,
}

/// Allocation state of an interval during the linear scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    /// Not yet reached by the scan.
    Unhandled,
    /// Live at the current scan position.
    Active,
    /// Started but currently in a lifetime hole.
    Inactive,
    /// Fully processed.
    Handled,
}

/// Tracks how a value's definitions relate to its spill stores, enabling the
/// store-once-at-definition optimization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SpillState {
    /// No definition seen yet.
    NoDefinitionFound,
    /// One definition found; no spill store emitted yet.
    NoSpillStore,
    /// One spill store emitted after the definition.
    OneSpillStore,
    /// The value should be stored to its spill slot right at the definition
    /// and never again.
    StoreAtDefinition,
    /// The value begins its life in memory (e.g. an incoming stack
    /// argument), so loads are fine but no store is needed.
    StartInMemory,
    /// Multiple definitions or stores; the optimization does not apply.
    NoOptimization,
}

/// The value an interval stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IntervalOperand {
    /// A physical register; the interval models when that register is
    /// unavailable.
    Fixed(PhysReg),
    /// A virtual register.
    Virt(VirtReg),
}

impl IntervalOperand {
    #[inline]
    pub fn is_fixed(self) -> bool {
        matches!(self, IntervalOperand::Fixed(_))
    }

    #[inline]
    pub fn as_virt(self) -> Option<VirtReg> {
        match self {
            IntervalOperand::Virt(vreg) => Some(vreg),
            IntervalOperand::Fixed(_) => None,
        }
    }
}

/// One lifetime interval.
#[derive(Clone, Debug)]
pub(crate) struct Interval {
    /// The value this interval represents. Shared by all split children of a
    /// family.
    pub operand: IntervalOperand,

    /// Value kind. Irrelevant for fixed intervals, which never spill.
    pub kind: ValueKind,

    /// Head of the range list, lowest range first.
    pub first: PackedOption<RangeId>,

    /// End of the last range. Maintained by range insertion and splitting.
    pub cached_to: u32,

    /// Use positions sorted by decreasing position, at most one per exact
    /// position.
    pub uses: SmallVec<[UsePos; 4]>,

    /// Assigned location, once allocation decides.
    pub location: Option<Location>,

    /// Canonical spill slot, stored on the split parent and shared by the
    /// whole family.
    pub spill_slot: PackedOption<StackSlot>,

    /// The family root. Points to itself for unsplit intervals.
    pub split_parent: IntervalId,

    /// The family member most recently activated or split off. Stored on the
    /// split parent; reload moves read their source from it.
    pub current_split_child: IntervalId,

    /// Children of this family, sorted by start position. Only non-empty on
    /// a split parent.
    pub split_children: Vec<IntervalId>,

    /// Preferred source interval copied into this one by a move; used to
    /// bias register selection.
    pub register_hint: PackedOption<IntervalId>,

    /// Spill-store optimization state. Meaningful on the split parent.
    pub spill_state: SpillState,

    /// Position of the single definition used for store-at-definition.
    pub spill_definition_pos: u32,

    /// A reload move must be inserted when this split child is activated,
    /// because the split position had no lifetime hole.
    pub insert_move_when_activated: bool,

    /// Allocation state during the scan.
    pub state: State,
}

/// Arena holding all intervals and ranges of one allocation run.
pub(crate) struct Intervals {
    pub intervals: PrimaryMap<IntervalId, Interval>,
    pub ranges: PrimaryMap<RangeId, RangeData>,
}

impl Intervals {
    pub fn new() -> Self {
        Self {
            intervals: PrimaryMap::new(),
            ranges: PrimaryMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
        self.ranges.clear();
    }

    /// Creates a fresh interval with no ranges.
    pub fn create(&mut self, operand: IntervalOperand, kind: ValueKind) -> IntervalId {
        let id = self.intervals.next_key();
        self.intervals.push(Interval {
            operand,
            kind,
            first: None.into(),
            cached_to: 0,
            uses: SmallVec::new(),
            location: None,
            spill_slot: None.into(),
            split_parent: id,
            current_split_child: id,
            split_children: Vec::new(),
            register_hint: None.into(),
            spill_state: SpillState::NoDefinitionFound,
            spill_definition_pos: MAX_POS,
            insert_move_when_activated: false,
            state: State::Unhandled,
        });
        id
    }

    #[inline]
    pub fn get(&self, id: IntervalId) -> &Interval {
        &self.intervals[id]
    }

    #[inline]
    pub fn get_mut(&mut self, id: IntervalId) -> &mut Interval {
        &mut self.intervals[id]
    }

    /// Start position of the interval, `MAX_POS` if it has no ranges.
    #[inline]
    pub fn from(&self, id: IntervalId) -> u32 {
        match self.intervals[id].first.expand() {
            Some(range) => self.ranges[range].from,
            None => MAX_POS,
        }
    }

    /// End position of the interval's last range.
    #[inline]
    pub fn to(&self, id: IntervalId) -> u32 {
        self.intervals[id].cached_to
    }

    #[inline]
    pub fn is_split_parent(&self, id: IntervalId) -> bool {
        self.intervals[id].split_parent == id
    }

    #[inline]
    pub fn split_parent(&self, id: IntervalId) -> IntervalId {
        self.intervals[id].split_parent
    }

    /// Spill optimization state of the family.
    #[inline]
    pub fn spill_state(&self, id: IntervalId) -> SpillState {
        self.intervals[self.split_parent(id)].spill_state
    }

    #[inline]
    pub fn set_spill_state(&mut self, id: IntervalId, state: SpillState) {
        let parent = self.split_parent(id);
        self.intervals[parent].spill_state = state;
    }

    /// Position of the family's single definition, for store-at-definition.
    #[inline]
    pub fn spill_definition_pos(&self, id: IntervalId) -> u32 {
        self.intervals[self.split_parent(id)].spill_definition_pos
    }

    /// The family member most recently activated or split off.
    #[inline]
    pub fn current_split_child(&self, id: IntervalId) -> IntervalId {
        self.intervals[self.split_parent(id)].current_split_child
    }

    #[inline]
    pub fn make_current_split_child(&mut self, id: IntervalId) {
        let parent = self.split_parent(id);
        self.intervals[parent].current_split_child = id;
    }

    /// Drops the earliest use position. Spill-slot sharing uses this to stop
    /// an interval from competing for a register at the dropped use.
    pub fn remove_first_use(&mut self, id: IntervalId) {
        self.intervals[id].uses.pop();
    }

    /// Whether this interval's family has a spill slot and the value is
    /// guaranteed correct in memory from its definition onward.
    pub fn always_in_memory(&self, id: IntervalId) -> bool {
        let parent = &self.intervals[self.split_parent(id)];
        matches!(
            parent.spill_state,
            SpillState::StoreAtDefinition | SpillState::StartInMemory
        )
    }

    /// The canonical spill slot of the family, if one has been assigned.
    #[inline]
    pub fn spill_slot(&self, id: IntervalId) -> Option<StackSlot> {
        self.intervals[self.split_parent(id)].spill_slot.expand()
    }

    /// Assigns the canonical spill slot for the whole family.
    pub fn set_spill_slot(&mut self, id: IntervalId, slot: StackSlot) {
        let parent = self.split_parent(id);
        debug_assert!(self.intervals[parent].spill_slot.is_none());
        self.intervals[parent].spill_slot = slot.into();
    }

    /// Adds `[from, to)` to the front of the range list, merging with the
    /// current first range if they touch or overlap.
    pub fn add_range(&mut self, id: IntervalId, from: u32, to: u32) {
        debug_assert!(from < to);
        let interval = &mut self.intervals[id];
        interval.cached_to = interval.cached_to.max(to);
        match interval.first.expand() {
            Some(first) if self.ranges[first].from <= to => {
                let range = &mut self.ranges[first];
                range.from = range.from.min(from);
                range.to = range.to.max(to);
            }
            old_first => {
                let range = self.ranges.push(RangeData {
                    from,
                    to,
                    next: old_first.into(),
                });
                self.intervals[id].first = range.into();
            }
        }
    }

    /// Narrows the start of the first range to a definition position.
    pub fn set_from(&mut self, id: IntervalId, from: u32) {
        let first = self.intervals[id].first.expand().unwrap();
        debug_assert!(self.ranges[first].from <= from);
        debug_assert!(from < self.ranges[first].to);
        self.ranges[first].from = from;
    }

    /// Records a use position. Positions must be added in decreasing order;
    /// at the same exact position only the strictest kind is kept.
    ///
    /// `None` uses and uses of fixed intervals are not recorded; nothing
    /// queries them.
    pub fn add_use_pos(&mut self, id: IntervalId, pos: u32, kind: UseKind) {
        let interval = &mut self.intervals[id];
        if kind == UseKind::None || interval.operand.is_fixed() {
            return;
        }
        if let Some(last) = interval.uses.last_mut() {
            debug_assert!(last.pos >= pos);
            if last.pos == pos {
                last.kind = last.kind.max(kind);
                return;
            }
        }
        interval.uses.push(UsePos { pos, kind });
    }

    /// Lowest use position with at least the given strictness.
    pub fn first_usage(&self, id: IntervalId, min_kind: UseKind) -> u32 {
        self.next_usage(id, min_kind, 0)
    }

    /// Lowest use position `>= from` with at least the given strictness.
    pub fn next_usage(&self, id: IntervalId, min_kind: UseKind, from: u32) -> u32 {
        self.intervals[id]
            .uses
            .iter()
            .rev()
            .find(|use_pos| use_pos.pos >= from && use_pos.kind >= min_kind)
            .map_or(MAX_POS, |use_pos| use_pos.pos)
    }

    /// Lowest use position `>= from` with exactly the given strictness.
    pub fn next_usage_exact(&self, id: IntervalId, kind: UseKind, from: u32) -> u32 {
        self.intervals[id]
            .uses
            .iter()
            .rev()
            .find(|use_pos| use_pos.pos >= from && use_pos.kind == kind)
            .map_or(MAX_POS, |use_pos| use_pos.pos)
    }

    /// Highest use position `< to` with at least the given strictness, or 0.
    pub fn previous_usage(&self, id: IntervalId, min_kind: UseKind, to: u32) -> u32 {
        self.intervals[id]
            .uses
            .iter()
            .find(|use_pos| use_pos.pos < to && use_pos.kind >= min_kind)
            .map_or(0, |use_pos| use_pos.pos)
    }

    pub fn has_must_register_use(&self, id: IntervalId) -> bool {
        self.first_usage(id, UseKind::MustHaveRegister) != MAX_POS
    }

    /// Whether the interval is live at `pos`. When `inclusive_to` is set the
    /// end of each range counts as covered; input operands are read at the
    /// end position of the defining move's range.
    pub fn covers(&self, id: IntervalId, pos: u32, inclusive_to: bool) -> bool {
        let mut cur = self.intervals[id].first;
        while let Some(range) = cur.expand() {
            let range = self.ranges[range];
            if range.to > pos || (inclusive_to && range.to == pos) {
                return range.from <= pos;
            }
            cur = range.next;
        }
        false
    }

    /// Whether the interval has no live positions in `[hole_from, hole_to)`.
    ///
    /// Both endpoints must lie within the interval's overall span.
    pub fn has_hole_between(&self, id: IntervalId, hole_from: u32, hole_to: u32) -> bool {
        debug_assert!(hole_from < hole_to);
        let mut cur = self.intervals[id].first;
        while let Some(range_id) = cur.expand() {
            let range = self.ranges[range_id];
            if range.to <= hole_from {
                match range.next.expand() {
                    // Hole must fit in the gap before the next range.
                    Some(next) => {
                        if self.ranges[next].from >= hole_to {
                            return true;
                        }
                    }
                    None => return false,
                }
            } else if range.from >= hole_to {
                return true;
            } else if range.from <= hole_from && range.to >= hole_to {
                return false;
            }
            cur = range.next;
        }
        false
    }

    /// First position at which the ranges starting at `a_first` intersect
    /// interval `b`, or `None`.
    pub fn intersection_from(
        &self,
        a_first: Option<RangeId>,
        b_first: Option<RangeId>,
    ) -> Option<u32> {
        let mut a = a_first;
        let mut b = b_first;
        while let (Some(ra), Some(rb)) = (a, b) {
            let ra = self.ranges[ra];
            let rb = self.ranges[rb];
            if ra.from < rb.from {
                if ra.to > rb.from {
                    return Some(rb.from);
                }
                a = ra.next.expand();
            } else if rb.from < ra.from {
                if rb.to > ra.from {
                    return Some(ra.from);
                }
                b = rb.next.expand();
            } else {
                return Some(ra.from);
            }
        }
        None
    }

    /// First intersection of two whole intervals.
    pub fn first_intersection(&self, a: IntervalId, b: IntervalId) -> Option<u32> {
        self.intersection_from(self.intervals[a].first.expand(), self.intervals[b].first.expand())
    }

    pub fn intersects(&self, a: IntervalId, b: IntervalId) -> bool {
        self.first_intersection(a, b).is_some()
    }

    /// Splits the interval at `split_pos` and returns the new child holding
    /// `[split_pos, to)`. Use positions at or after the split move to the
    /// child.
    ///
    /// `split_pos` must lie strictly inside the interval's span.
    pub fn split(&mut self, id: IntervalId, split_pos: u32) -> IntervalId {
        debug_assert!(self.from(id) < split_pos && split_pos < self.to(id));

        let child = self.new_split_child(id);

        // Find the first range affected by the split.
        let mut prev: Option<RangeId> = None;
        let mut cur = self.intervals[id].first.expand();
        while let Some(range_id) = cur {
            if self.ranges[range_id].to > split_pos {
                break;
            }
            prev = cur;
            cur = self.ranges[range_id].next.expand();
        }
        let range_id = cur.expect("split position after end of interval");

        let child_first = if self.ranges[range_id].from < split_pos {
            // The split lands inside this range; divide it in two.
            let tail = RangeData {
                from: split_pos,
                to: self.ranges[range_id].to,
                next: self.ranges[range_id].next,
            };
            let tail = self.ranges.push(tail);
            let head = &mut self.ranges[range_id];
            head.to = split_pos;
            head.next = None.into();
            tail
        } else {
            // The split falls in a hole; the whole range moves to the child.
            match prev {
                Some(prev) => self.ranges[prev].next = None.into(),
                None => self.intervals[id].first = None.into(),
            }
            range_id
        };

        self.intervals[child].first = child_first.into();

        // Move the use positions at or after the split to the child. The
        // list is sorted descending, so they form a prefix.
        let split_idx = self.intervals[id]
            .uses
            .iter()
            .position(|use_pos| use_pos.pos < split_pos)
            .unwrap_or(self.intervals[id].uses.len());
        let moved: SmallVec<[UsePos; 4]> =
            self.intervals[id].uses.drain(..split_idx).collect();
        self.intervals[child].uses = moved;

        // Fix cached ends.
        self.intervals[child].cached_to = self.intervals[id].cached_to;
        self.recompute_cached_to(id);

        self.register_split_child(child);
        child
    }

    /// Splits off `[from, split_pos)` as a new child and keeps the tail in
    /// `id`. Requires the split position to lie inside the first range and
    /// no use positions before it.
    pub fn split_from_start(&mut self, id: IntervalId, split_pos: u32) -> IntervalId {
        debug_assert!(self.from(id) < split_pos && split_pos < self.to(id));
        let first = self.intervals[id].first.expand().unwrap();
        debug_assert!(self.ranges[first].to > split_pos);
        debug_assert!(
            self.intervals[id]
                .uses
                .iter()
                .all(|use_pos| use_pos.pos >= split_pos)
        );

        let child = self.new_split_child(id);
        let head = self.ranges.push(RangeData {
            from: self.ranges[first].from,
            to: split_pos,
            next: None.into(),
        });
        self.ranges[first].from = split_pos;
        self.intervals[child].first = head.into();
        self.intervals[child].cached_to = split_pos;

        self.register_split_child(child);
        child
    }

    fn new_split_child(&mut self, id: IntervalId) -> IntervalId {
        let parent = self.split_parent(id);
        let operand = self.intervals[id].operand;
        let kind = self.intervals[id].kind;
        let child = self.create(operand, kind);
        self.intervals[child].split_parent = parent;
        // The child prefers whatever register an earlier family member got.
        self.intervals[child].register_hint = parent.into();
        child
    }

    fn register_split_child(&mut self, child: IntervalId) {
        let parent = self.split_parent(child);
        if self.intervals[parent].split_children.is_empty() {
            // The parent itself becomes the first member of the family list.
            self.intervals[parent].split_children.push(parent);
        }
        // Splitting off an interval's head can change the start of an
        // existing member, so re-sort rather than insert.
        let mut children = core::mem::take(&mut self.intervals[parent].split_children);
        children.push(child);
        children.sort_by_key(|&c| self.from(c));
        self.intervals[parent].split_children = children;
    }

    fn recompute_cached_to(&mut self, id: IntervalId) {
        let mut to = 0;
        let mut cur = self.intervals[id].first;
        while let Some(range) = cur.expand() {
            to = self.ranges[range].to;
            cur = self.ranges[range].next;
        }
        self.intervals[id].cached_to = to;
    }

    /// The member of `parent`'s family that covers `pos`. Children are
    /// sorted by start, so binary search finds the candidate.
    ///
    /// A missing child here means the allocator's split bookkeeping is
    /// corrupt, which is fatal for this compilation.
    pub fn split_child_at(
        &self,
        parent: IntervalId,
        pos: u32,
        inclusive_to: bool,
    ) -> Result<IntervalId, AllocError> {
        debug_assert!(self.is_split_parent(parent));
        let children = &self.intervals[parent].split_children;
        if children.is_empty() {
            if self.covers(parent, pos, inclusive_to) {
                return Ok(parent);
            }
            return Err(AllocError::NoSplitChild { pos });
        }
        // Candidates start at or before pos; the last such child is the only
        // one that can cover it, except at inclusive boundaries where the
        // previous child may end exactly at pos.
        let idx = children.partition_point(|&c| self.from(c) <= pos);
        for &child in children[..idx].iter().rev().take(2) {
            if self.covers(child, pos, inclusive_to) {
                return Ok(child);
            }
        }
        Err(AllocError::NoSplitChild { pos })
    }

    /// The last member of `parent`'s family that ends at or before `pos`.
    pub fn split_child_before(&self, parent: IntervalId, pos: u32) -> IntervalId {
        debug_assert!(self.is_split_parent(parent));
        let children = &self.intervals[parent].split_children;
        if children.is_empty() {
            return parent;
        }
        let mut best = *children.first().unwrap();
        for &child in children {
            if self.to(child) <= pos && self.to(child) > self.to(best) {
                best = child;
            }
        }
        best
    }

    /// Resolves the register hint for an interval: the hinted interval
    /// itself if it has a register, else its first family member with one.
    pub fn location_hint(&self, id: IntervalId) -> Option<IntervalId> {
        let hint = self.intervals[id].register_hint.expand()?;
        let hint = self.split_parent(hint);
        if matches!(self.intervals[hint].location, Some(Location::Reg(_))) {
            return Some(hint);
        }
        self.intervals[hint]
            .split_children
            .iter()
            .copied()
            .find(|&child| matches!(self.intervals[child].location, Some(Location::Reg(_))))
    }

    /// Checks the structural invariants of a split family.
    #[cfg(any(test, debug_assertions))]
    pub fn check_split_children(&self, parent: IntervalId) -> bool {
        let children = &self.intervals[parent].split_children;
        if children.is_empty() {
            return true;
        }
        for pair in children.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if self.from(a) > self.from(b) {
                return false;
            }
            if self.intersects(a, b) {
                return false;
            }
        }
        children.iter().all(|&c| self.split_parent(c) == parent)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::lir::VirtReg;

    fn store_with_interval() -> (Intervals, IntervalId) {
        let mut store = Intervals::new();
        let id = store.create(IntervalOperand::Virt(VirtReg::new(0)), ValueKind::Int);
        (store, id)
    }

    fn ranges_of(store: &Intervals, id: IntervalId) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut cur = store.get(id).first;
        while let Some(range) = cur.expand() {
            out.push((store.ranges[range].from, store.ranges[range].to));
            cur = store.ranges[range].next;
        }
        out
    }

    #[test]
    fn add_range_merges_touching_front() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 10, 20);
        store.add_range(id, 4, 10);
        assert_eq!(ranges_of(&store, id), vec![(4, 20)]);
        store.add_range(id, 0, 2);
        assert_eq!(ranges_of(&store, id), vec![(0, 2), (4, 20)]);
        assert_eq!(store.from(id), 0);
        assert_eq!(store.to(id), 20);
    }

    #[test]
    fn use_positions_keep_strictest_kind() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 0, 30);
        store.add_use_pos(id, 20, UseKind::ShouldHaveRegister);
        store.add_use_pos(id, 10, UseKind::ShouldHaveRegister);
        store.add_use_pos(id, 10, UseKind::MustHaveRegister);
        assert_eq!(store.first_usage(id, UseKind::MustHaveRegister), 10);
        assert_eq!(store.next_usage(id, UseKind::ShouldHaveRegister, 11), 20);
        assert_eq!(store.previous_usage(id, UseKind::MustHaveRegister, 20), 10);
        assert_eq!(store.next_usage(id, UseKind::MustHaveRegister, 11), MAX_POS);
    }

    #[test]
    fn covers_respects_range_ends() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 10, 20);
        assert!(store.covers(id, 10, false));
        assert!(store.covers(id, 19, false));
        assert!(!store.covers(id, 20, false));
        assert!(store.covers(id, 20, true));
        assert!(!store.covers(id, 21, true));
    }

    #[test]
    fn hole_detection() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 30, 40);
        store.add_range(id, 10, 20);
        assert!(store.has_hole_between(id, 20, 30));
        assert!(store.has_hole_between(id, 22, 28));
        assert!(!store.has_hole_between(id, 12, 18));
        assert!(!store.has_hole_between(id, 15, 35));
    }

    #[test]
    fn split_inside_range() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 10, 40);
        store.add_use_pos(id, 30, UseKind::MustHaveRegister);
        store.add_use_pos(id, 12, UseKind::MustHaveRegister);
        let child = store.split(id, 20);
        assert_eq!(ranges_of(&store, id), vec![(10, 20)]);
        assert_eq!(ranges_of(&store, child), vec![(20, 40)]);
        assert_eq!(store.first_usage(id, UseKind::MustHaveRegister), 12);
        assert_eq!(store.first_usage(child, UseKind::MustHaveRegister), 30);
        assert_eq!(store.split_parent(child), id);
        assert!(store.check_split_children(id));
    }

    #[test]
    fn split_in_hole_moves_whole_range() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 30, 40);
        store.add_range(id, 10, 20);
        let child = store.split(id, 24);
        assert_eq!(ranges_of(&store, id), vec![(10, 20)]);
        assert_eq!(ranges_of(&store, child), vec![(30, 40)]);
        assert_eq!(store.to(id), 20);
        assert_eq!(store.to(child), 40);
    }

    #[test]
    fn split_child_lookup() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 10, 60);
        let c1 = store.split(id, 30);
        let c2 = store.split(c1, 50);
        assert_eq!(store.split_child_at(id, 12, false).unwrap(), id);
        assert_eq!(store.split_child_at(id, 30, false).unwrap(), c1);
        assert_eq!(store.split_child_at(id, 30, true).unwrap(), c1);
        assert_eq!(store.split_child_at(id, 55, false).unwrap(), c2);
        // The end of a child is covered in inclusive mode only.
        assert_eq!(store.split_child_at(id, 60, true).unwrap(), c2);
        assert!(store.split_child_at(id, 60, false).is_err());
        assert_eq!(store.split_child_before(id, 30), id);
        assert!(store.check_split_children(id));
    }

    #[test]
    fn split_from_start_keeps_tail() {
        let (mut store, id) = store_with_interval();
        store.add_range(id, 10, 40);
        store.add_use_pos(id, 30, UseKind::MustHaveRegister);
        let head = store.split_from_start(id, 12);
        assert_eq!(ranges_of(&store, head), vec![(10, 12)]);
        assert_eq!(ranges_of(&store, id), vec![(12, 40)]);
        assert_eq!(store.first_usage(id, UseKind::MustHaveRegister), 30);
    }
}
