//! The low-level IR that the allocator consumes and rewrites.
//!
//! A function is an ordered sequence of [`Block`]s, each holding an ordered
//! list of instructions. Instructions are a closed enum ([`Op`]) which
//! exposes its register operands through [`InstData::for_each_operand`],
//! partitioned into [`OperandRole`]s. Blocks record their successor and
//! predecessor edges, exception-handler edges and loop metadata; the
//! allocator requires critical edges to have been split by the block layout
//! phase that produced the linear block order.
//!
//! The allocator rewrites virtual operands in place to physical registers or
//! stack slots and splices move instructions into the block instruction
//! lists.

use alloc::vec::Vec;
use core::fmt;

use smallvec::SmallVec;

use crate::entity::{PackedOption, PrimaryMap, SecondaryMap};

entity_def! {
    /// A basic block in the function being compiled.
    pub entity Block(u32, "B");

    /// An instruction. This is an index into an arena; the order of
    /// instructions is defined by the per-block instruction lists, not by
    /// index order.
    pub entity Inst(u32, "i");

    /// A virtual register produced by instruction selection.
    pub entity VirtReg(u32, "v");

    /// A physical register, as numbered by the target description.
    pub entity PhysReg(u32, "r");

    /// A stack slot in the spill area of the current frame.
    pub entity StackSlot(u32, "stack");
}

/// The kind of value held in a virtual register.
///
/// This determines spill slot sizing and whether the value must appear in
/// oop maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Object reference, tracked by the garbage collector.
    Object,
    /// Machine word (pointer-sized, not an object reference).
    Word,
}

impl ValueKind {
    /// Whether values of this kind are object references that must be
    /// visible to the garbage collector.
    #[inline]
    pub fn is_oop(self) -> bool {
        matches!(self, ValueKind::Object)
    }

    /// Whether values of this kind occupy two stack slots.
    #[inline]
    pub fn is_double_word(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }
}

/// A physical register or stack slot assigned by the allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    /// A physical register.
    Reg(PhysReg),
    /// A stack slot.
    Stack(StackSlot),
}

impl Location {
    /// Whether this location is a stack slot.
    #[inline]
    pub fn is_stack(self) -> bool {
        matches!(self, Location::Stack(_))
    }

    /// The operand form of this location.
    #[inline]
    pub fn operand(self) -> Operand {
        match self {
            Location::Reg(reg) => Operand::Reg(reg),
            Location::Stack(slot) => Operand::Stack(slot),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Reg(reg) => reg.fmt(f),
            Location::Stack(slot) => slot.fmt(f),
        }
    }
}

/// An instruction operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A virtual register, to be replaced by the allocator.
    Virt(VirtReg),
    /// A fixed physical register required by the target or calling
    /// convention.
    Reg(PhysReg),
    /// A stack slot. Used for incoming arguments and, after allocation, for
    /// spilled values.
    Stack(StackSlot),
    /// A constant. The representation is opaque to the allocator.
    Const(i64),
}

impl Operand {
    /// The virtual register of this operand, if it is one.
    #[inline]
    pub fn as_virt(self) -> Option<VirtReg> {
        match self {
            Operand::Virt(vreg) => Some(vreg),
            _ => None,
        }
    }

    /// Whether this operand is a stack slot.
    #[inline]
    pub fn is_stack(self) -> bool {
        matches!(self, Operand::Stack(_))
    }

    /// Whether this operand is a constant.
    #[inline]
    pub fn is_const(self) -> bool {
        matches!(self, Operand::Const(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Virt(vreg) => vreg.fmt(f),
            Operand::Reg(reg) => reg.fmt(f),
            Operand::Stack(slot) => slot.fmt(f),
            Operand::Const(c) => write!(f, "#{c}"),
        }
    }
}

/// Branch condition for conditional branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cond {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    Lt,
    /// Signed less than or equal.
    Le,
    /// Signed greater than.
    Gt,
    /// Signed greater than or equal.
    Ge,
}

impl Cond {
    /// The negated condition.
    #[inline]
    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
        }
    }
}

/// The role an operand plays in its instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandRole {
    /// The operand is read at the start of the instruction.
    Input,
    /// The operand is clobbered during the instruction: it must not share a
    /// register with any input or output.
    Temp,
    /// The operand is written at the end of the instruction.
    Output,
}

/// An instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Copy a value between two locations.
    Move {
        /// Source operand.
        from: Operand,
        /// Destination operand.
        to: Operand,
    },

    /// A generic computation with explicit operand lists.
    Compute {
        /// Operands read by the instruction.
        inputs: SmallVec<[Operand; 2]>,
        /// Registers clobbered mid-instruction.
        temps: SmallVec<[Operand; 1]>,
        /// Operands written by the instruction.
        outputs: SmallVec<[Operand; 1]>,
    },

    /// A call. Clobbers every caller-saved register of the target.
    Call {
        /// Argument operands.
        args: SmallVec<[Operand; 2]>,
        /// Result operand, if the callee returns a value.
        result: Option<Operand>,
    },

    /// Conditional branch. Falls through to the following terminator when
    /// the condition does not hold.
    Branch {
        /// Branch condition.
        cond: Cond,
        /// Taken target.
        target: Block,
    },

    /// Unconditional jump.
    Jump {
        /// Jump target.
        target: Block,
    },

    /// Return from the function.
    Return {
        /// Returned operand, if any.
        value: Option<Operand>,
    },
}

/// Debug information attached to an instruction.
///
/// The allocator extends the live ranges of `live_values` so their state can
/// be recovered at this point, and fills in `oop_map` with the locations
/// holding live object references.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DebugInfo {
    /// Values whose state must be recoverable at this instruction.
    pub live_values: SmallVec<[VirtReg; 4]>,

    /// Locations holding live object references, computed after allocation.
    pub oop_map: SmallVec<[Location; 4]>,
}

/// An instruction together with its attached debug information.
#[derive(Clone, Debug, PartialEq)]
pub struct InstData {
    /// The operation.
    pub op: Op,

    /// Attached debug information, if any.
    pub info: Option<DebugInfo>,
}

impl InstData {
    /// Creates an instruction with no debug information.
    #[inline]
    pub fn new(op: Op) -> Self {
        Self { op, info: None }
    }

    /// Whether this instruction is a call that clobbers caller-saved
    /// registers.
    #[inline]
    pub fn has_call(&self) -> bool {
        matches!(self.op, Op::Call { .. })
    }

    /// The source and destination of this instruction if it is a move.
    #[inline]
    pub fn as_move(&self) -> Option<(Operand, Operand)> {
        match self.op {
            Op::Move { from, to } => Some((from, to)),
            _ => None,
        }
    }

    /// Visits every operand with the given role, in operand-list order.
    pub fn for_each_operand(&self, role: OperandRole, mut f: impl FnMut(Operand)) {
        match (&self.op, role) {
            (Op::Move { from, .. }, OperandRole::Input) => f(*from),
            (Op::Move { to, .. }, OperandRole::Output) => f(*to),
            (Op::Compute { inputs, .. }, OperandRole::Input) => {
                inputs.iter().copied().for_each(f);
            }
            (Op::Compute { temps, .. }, OperandRole::Temp) => {
                temps.iter().copied().for_each(f);
            }
            (Op::Compute { outputs, .. }, OperandRole::Output) => {
                outputs.iter().copied().for_each(f);
            }
            (Op::Call { args, .. }, OperandRole::Input) => {
                args.iter().copied().for_each(f);
            }
            (Op::Call { result, .. }, OperandRole::Output) => {
                if let Some(result) = result {
                    f(*result);
                }
            }
            (Op::Return { value }, OperandRole::Input) => {
                if let Some(value) = value {
                    f(*value);
                }
            }
            _ => {}
        }
    }

    /// Visits every operand with the given role, allowing it to be rewritten.
    pub fn for_each_operand_mut(&mut self, role: OperandRole, mut f: impl FnMut(&mut Operand)) {
        match (&mut self.op, role) {
            (Op::Move { from, .. }, OperandRole::Input) => f(from),
            (Op::Move { to, .. }, OperandRole::Output) => f(to),
            (Op::Compute { inputs, .. }, OperandRole::Input) => {
                inputs.iter_mut().for_each(f);
            }
            (Op::Compute { temps, .. }, OperandRole::Temp) => {
                temps.iter_mut().for_each(f);
            }
            (Op::Compute { outputs, .. }, OperandRole::Output) => {
                outputs.iter_mut().for_each(f);
            }
            (Op::Call { args, .. }, OperandRole::Input) => {
                args.iter_mut().for_each(f);
            }
            (Op::Call { result, .. }, OperandRole::Output) => {
                if let Some(result) = result {
                    f(result);
                }
            }
            (Op::Return { value }, OperandRole::Input) => {
                if let Some(value) = value {
                    f(value);
                }
            }
            _ => {}
        }
    }
}

bitflags::bitflags! {
    /// Flags attached to a block.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        /// The block is the target of a backward branch. Relevant for code
        /// alignment, so the control-flow optimizer preserves it when blocks
        /// are deleted or reordered.
        const BACKWARD_BRANCH_TARGET = 1 << 0;

        /// The block is the entry of an exception handler.
        const EXCEPTION_ENTRY = 1 << 1;

        /// First block of a natural loop in the linear block order.
        const LOOP_HEADER = 1 << 2;

        /// Last block of a natural loop in the linear block order.
        const LOOP_END = 1 << 3;
    }
}

/// Per-predecessor inputs to the phi functions of an exception entry block.
#[derive(Clone, Debug, Default)]
pub struct PhiInputs {
    /// The throwing predecessor these inputs apply to.
    pub from: Block,

    /// One source operand per phi, parallel to
    /// [`BlockData::exception_phis`].
    pub operands: SmallVec<[Operand; 2]>,
}

/// A basic block.
#[derive(Clone, Debug)]
pub struct BlockData {
    /// Instructions in execution order. The final instructions are the
    /// terminators: an optional conditional branch followed by a jump or
    /// return.
    pub insts: Vec<Inst>,

    /// Successor blocks, in branch order.
    pub succs: SmallVec<[Block; 2]>,

    /// Predecessor blocks.
    pub preds: SmallVec<[Block; 4]>,

    /// Exception handler entries reachable from this block.
    pub handlers: SmallVec<[Block; 1]>,

    /// For exception entry blocks: the values defined by the block's phi
    /// functions.
    pub exception_phis: SmallVec<[VirtReg; 2]>,

    /// For exception entry blocks: phi inputs, one entry per throwing
    /// predecessor.
    pub phi_inputs: SmallVec<[PhiInputs; 2]>,

    /// Loop nesting depth of this block, 0 outside any loop.
    pub loop_depth: u32,

    /// Index of the innermost loop containing this block, `u32::MAX` if
    /// none.
    pub loop_index: u32,

    /// Block flags.
    pub flags: BlockFlags,
}

impl Default for BlockData {
    fn default() -> Self {
        Self {
            insts: Vec::new(),
            succs: SmallVec::new(),
            preds: SmallVec::new(),
            handlers: SmallVec::new(),
            exception_phis: SmallVec::new(),
            phi_inputs: SmallVec::new(),
            loop_depth: 0,
            loop_index: u32::MAX,
            flags: BlockFlags::empty(),
        }
    }
}

impl BlockData {
    /// Phi input operands for the given predecessor.
    pub fn phi_inputs_for(&self, pred: Block) -> Option<&[Operand]> {
        self.phi_inputs
            .iter()
            .find(|inputs| inputs.from == pred)
            .map(|inputs| &inputs.operands[..])
    }
}

/// A function in low-level IR form.
pub struct Lir {
    /// Block definitions.
    pub(crate) blocks: PrimaryMap<Block, BlockData>,

    /// Instruction arena. Ordering comes from the block instruction lists.
    pub(crate) insts: PrimaryMap<Inst, InstData>,

    /// Value kind of each virtual register.
    pub(crate) vreg_kinds: PrimaryMap<VirtReg, ValueKind>,

    /// Blocks in linear code-layout order. The entry block is first.
    pub(crate) order: Vec<Block>,

    /// Number of stack slots reserved before allocation, e.g. for incoming
    /// arguments. Spill slots are numbered after these.
    pub(crate) reserved_slots: u32,
}

impl Lir {
    /// Creates an empty function.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            vreg_kinds: PrimaryMap::new(),
            order: Vec::new(),
            reserved_slots: 0,
        }
    }

    /// Creates a new empty block.
    pub fn create_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    /// Creates a new virtual register of the given kind.
    pub fn new_vreg(&mut self, kind: ValueKind) -> VirtReg {
        self.vreg_kinds.push(kind)
    }

    /// The value kind of a virtual register.
    #[inline]
    pub fn kind_of(&self, vreg: VirtReg) -> ValueKind {
        self.vreg_kinds[vreg]
    }

    /// Number of virtual registers.
    #[inline]
    pub fn num_vregs(&self) -> usize {
        self.vreg_kinds.len()
    }

    /// Number of blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instructions in the arena, including removed ones.
    #[inline]
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Appends an instruction to a block.
    pub fn push_inst(&mut self, block: Block, op: Op) -> Inst {
        let inst = self.insts.push(InstData::new(op));
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Appends an instruction with debug information to a block.
    pub fn push_inst_with_info(&mut self, block: Block, op: Op, info: DebugInfo) -> Inst {
        let inst = self.insts.push(InstData {
            op,
            info: Some(info),
        });
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Creates an instruction in the arena without adding it to any block.
    pub(crate) fn new_inst(&mut self, op: Op) -> Inst {
        self.insts.push(InstData::new(op))
    }

    /// Adds a control-flow edge.
    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    /// Adds an exception edge from a throwing block to a handler entry.
    pub fn add_exception_edge(&mut self, from: Block, handler: Block) {
        self.blocks[from].handlers.push(handler);
        self.blocks[handler].preds.push(from);
        self.blocks[handler].flags |= BlockFlags::EXCEPTION_ENTRY;
    }

    /// Sets the linear block order. The entry block must be first.
    pub fn set_block_order(&mut self, order: Vec<Block>) {
        self.order = order;
    }

    /// Marks a block as belonging to a loop.
    pub fn set_loop(&mut self, block: Block, loop_index: u32, loop_depth: u32) {
        let data = &mut self.blocks[block];
        data.loop_index = loop_index;
        data.loop_depth = loop_depth;
    }

    /// Reserves stack slots for incoming arguments. Returns the first
    /// reserved slot.
    pub fn reserve_stack_slots(&mut self, count: u32) -> StackSlot {
        let first = StackSlot::new(self.reserved_slots as usize);
        self.reserved_slots += count;
        first
    }

    /// The blocks in linear order.
    #[inline]
    pub fn block_order(&self) -> &[Block] {
        &self.order
    }

    /// Block contents.
    #[inline]
    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    /// Block contents, mutable edition.
    #[inline]
    pub(crate) fn block_mut(&mut self, block: Block) -> &mut BlockData {
        &mut self.blocks[block]
    }

    /// Instruction contents.
    #[inline]
    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    /// Instruction contents, mutable edition.
    #[inline]
    pub(crate) fn inst_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst]
    }
}

impl Default for Lir {
    fn default() -> Self {
        Self::new()
    }
}

/// The numbering assigned to the instruction stream before allocation.
///
/// Instructions are numbered with an even stride in linear block order so
/// that odd positions can denote the point just after an instruction. Each
/// block starts with a synthetic entry position holding no instruction;
/// live-in ranges and block-boundary lookups use it. Moves inserted during
/// allocation carry no position.
#[derive(Default)]
pub(crate) struct Numbering {
    /// Position of each numbered instruction. 0 marks instructions inserted
    /// after numbering; no real instruction sits at position 0 because every
    /// block starts with an entry slot.
    pub pos_of: SecondaryMap<Inst, u32>,

    /// Instruction at each even position, indexed by `pos / 2`. `None` at
    /// block entry positions.
    pub inst_at: Vec<PackedOption<Inst>>,

    /// Block containing each even position, indexed by `pos / 2`.
    pub block_at: Vec<Block>,

    /// Entry position and last instruction position of each block.
    pub block_range: SecondaryMap<Block, (u32, u32)>,

    /// Index of each block in the linear block order.
    pub order_index: SecondaryMap<Block, u32>,
}

impl Numbering {
    /// Position of an instruction, or `None` for inserted moves.
    #[inline]
    pub fn pos(&self, inst: Inst) -> Option<u32> {
        match self.pos_of[inst] {
            0 => None,
            pos => Some(pos),
        }
    }

    /// The instruction at an even position, `None` at block entries.
    #[inline]
    pub fn inst_at(&self, pos: u32) -> Option<Inst> {
        debug_assert!(pos % 2 == 0);
        self.inst_at[(pos / 2) as usize].expand()
    }

    /// The block containing a position.
    #[inline]
    pub fn block_at(&self, pos: u32) -> Block {
        self.block_at[(pos / 2) as usize]
    }

    /// Entry position of a block, just before its first instruction.
    #[inline]
    pub fn block_from(&self, block: Block) -> u32 {
        self.block_range[block].0
    }

    /// Position of the last instruction of a block.
    #[inline]
    pub fn block_to(&self, block: Block) -> u32 {
        self.block_range[block].1
    }

    /// The highest assigned position.
    #[inline]
    pub fn max_pos(&self) -> u32 {
        (self.inst_at.len() as u32 - 1) * 2
    }

    /// Whether a position is the entry of a block.
    #[inline]
    pub fn is_block_begin(&self, pos: u32) -> bool {
        pos == 0 || self.block_at(pos) != self.block_at(pos - 1)
    }
}
