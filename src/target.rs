//! Static description of the target registers and ABI.
//!
//! The allocator consumes this as read-only configuration: which physical
//! registers exist, how they are partitioned into classes, which of them are
//! clobbered by calls, and how many stack slots each value kind occupies.

use alloc::vec::Vec;

use crate::entity::EntitySet;
use crate::lir::{PhysReg, ValueKind};

/// A register class. Values are only ever allocated to registers of the
/// class matching their kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// General-purpose integer registers.
    Int,
    /// Floating-point registers.
    Float,
}

impl RegClass {
    /// The register class used for values of the given kind.
    #[inline]
    pub fn for_kind(kind: ValueKind) -> RegClass {
        match kind {
            ValueKind::Float | ValueKind::Double => RegClass::Float,
            _ => RegClass::Int,
        }
    }
}

/// Description of the target register file.
///
/// Physical registers are numbered `0..num_regs` in a single namespace
/// covering all classes. Registers not listed in any allocation order are
/// reserved (e.g. stack pointer) and never assigned, but may still appear as
/// fixed operands.
pub struct TargetDesc {
    num_regs: u32,
    int_regs: Vec<PhysReg>,
    float_regs: Vec<PhysReg>,
    allocatable: EntitySet<PhysReg>,
    caller_saved: EntitySet<PhysReg>,
}

impl TargetDesc {
    /// Creates a target description.
    ///
    /// `int_regs` and `float_regs` list the allocatable registers of each
    /// class in allocation preference order; `caller_saved` lists the
    /// registers clobbered by calls.
    pub fn new(
        num_regs: u32,
        int_regs: Vec<PhysReg>,
        float_regs: Vec<PhysReg>,
        caller_saved: impl IntoIterator<Item = PhysReg>,
    ) -> Self {
        let mut saved = EntitySet::with_max_index(num_regs as usize);
        saved.extend(caller_saved);
        debug_assert!(
            int_regs
                .iter()
                .chain(&float_regs)
                .all(|reg| reg.index() < num_regs as usize)
        );
        let mut allocatable = EntitySet::with_max_index(num_regs as usize);
        allocatable.extend(int_regs.iter().chain(&float_regs).copied());
        Self {
            num_regs,
            int_regs,
            float_regs,
            allocatable,
            caller_saved: saved,
        }
    }

    /// Total number of physical registers, including reserved ones.
    #[inline]
    pub fn num_regs(&self) -> u32 {
        self.num_regs
    }

    /// The allocatable registers of a class, in allocation order.
    #[inline]
    pub fn allocatable(&self, class: RegClass) -> &[PhysReg] {
        match class {
            RegClass::Int => &self.int_regs,
            RegClass::Float => &self.float_regs,
        }
    }

    /// Whether a register takes part in allocation. Reserved registers such
    /// as the stack pointer are not allocatable but may appear as fixed
    /// operands.
    #[inline]
    pub fn is_allocatable(&self, reg: PhysReg) -> bool {
        self.allocatable.contains(reg)
    }

    /// Whether a register is clobbered by calls.
    #[inline]
    pub fn is_caller_saved(&self, reg: PhysReg) -> bool {
        self.caller_saved.contains(reg)
    }

    /// Iterates over the caller-saved registers.
    #[inline]
    pub fn caller_saved(&self) -> impl Iterator<Item = PhysReg> + '_ {
        self.caller_saved.iter()
    }

    /// Number of stack slots occupied by a spilled value of the given kind.
    #[inline]
    pub fn spill_slots(&self, kind: ValueKind) -> u32 {
        if kind.is_double_word() { 2 } else { 1 }
    }
}
