//! A linear-scan register allocator designed to be embedded in the backend
//! of an existing compiler.
//!
//! This crate is compatible with `#![no_std]` and only requires `alloc`.
//!
//! # Usage
//!
//! The allocator consumes a function in the low-level IR defined by the
//! [`lir`] module: basic blocks in a linear code-layout order, instructions
//! over virtual registers, and explicit control-flow and exception edges.
//! Critical edges must have been split by the block layout phase that
//! produced the order.
//!
//! A [`TargetDesc`] describes the registers available for allocation, which
//! of them a call clobbers, and how many stack slots each value kind needs
//! when spilled. Generally you will have one description per target
//! architecture supported by your compiler.
//!
//! The allocator is invoked by creating an instance of [`LinearScan`] and
//! calling [`LinearScan::allocate`]. On success the function has been
//! rewritten in place: every virtual operand carries a physical register or
//! stack slot, spill and resolution moves have been spliced into the
//! instruction lists, and oop maps have been filled in for every
//! instruction carrying debug information. The returned [`Output`] reports
//! how many spill slots the frame needs.
//!
//! # Reusing allocations
//!
//! For performance reasons, the [`LinearScan`] type doesn't free temporary
//! allocations after a call to [`LinearScan::allocate`].
//!
//! This allows register allocation to be run on multiple functions without
//! the need for further calls to the memory allocator, which can be slow. If
//! the memory usage is a concern or if you are finished compiling functions
//! then you can simply drop [`LinearScan`] to free all temporary memory.
//!
//! # Validation
//!
//! When developing a new client of the allocator, it is highly recommended
//! to use [`debug_utils::validate_lir`] to ensure that the input function is
//! well-formed. If inputs fail validation then the allocator may panic or
//! just produce garbage results.
//!
//! Note that even code that passes validation may cause the allocator to
//! return an [`AllocError`]. This usually indicates impossible fixed
//! register constraints on an instruction.

#![no_std]
#![warn(rust_2018_idioms, missing_docs)]
#![allow(
    clippy::too_many_arguments,
    clippy::collapsible_if,
    clippy::collapsible_else_if,
    clippy::cast_possible_truncation,
    clippy::too_many_lines,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::doc_markdown
)]
#![warn(
    clippy::explicit_iter_loop,
    clippy::range_plus_one,
    clippy::map_unwrap_or,
    clippy::cloned_instead_of_copied,
    clippy::semicolon_if_nothing_returned,
    clippy::must_use_candidate,
    clippy::iter_without_into_iter,
    clippy::uninlined_format_args,
    clippy::ignored_unit_patterns
)]

extern crate alloc;

use core::fmt;

use internal::builder::{IntervalBuilder, IntervalMaps, number_instructions};
use internal::interval::Intervals;
use internal::liveness::Liveness;
use internal::move_resolver::MoveResolver;
use internal::resolve::ResolveCtx;
use internal::walker::SpillSlots;
use lir::{Lir, Numbering, VirtReg};
use target::TargetDesc;

// Even when trace logging is disabled, the trace macro has a significant
// performance cost so we disable it in release builds.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}
macro_rules! trace_enabled {
    () => {
        cfg!(feature = "trace-log") && ::log::log_enabled!(::log::Level::Trace)
    };
}

// Macro for collecting statistics.
//
// If this turns out to be too much overhead then we can put it under a cfg().
macro_rules! stat {
    ($stats:expr, $field:ident) => {
        $stats.$field += 1
    };
    ($stats:expr, $field:ident, $count:expr) => {
        $stats.$field += $count
    };
}

#[macro_use]
pub mod entity;

pub mod debug_utils;
pub mod lir;
pub mod target;

mod internal;

/// Structure holding persistent memory allocations that can be reused across
/// multiple invocations of the register allocator.
///
/// This avoids repeated calls to the memory allocator when compiling multiple
/// functions.
pub struct LinearScan {
    numbering: Numbering,
    liveness: Liveness,
    intervals: Intervals,
    maps: IntervalMaps,
    resolver: MoveResolver,
    spill_slots: SpillSlots,
    stats: Stats,
}

impl Default for LinearScan {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl LinearScan {
    /// Creates a new `LinearScan` instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            numbering: Numbering::default(),
            liveness: Liveness::new(),
            intervals: Intervals::new(),
            maps: IntervalMaps::new(),
            resolver: MoveResolver::new(),
            spill_slots: SpillSlots::new(),
            stats: Stats::default(),
        }
    }

    /// Runs the register allocator on the given function, rewriting it in
    /// place.
    pub fn allocate(
        &mut self,
        lir: &mut Lir,
        target: &TargetDesc,
        options: &Options,
    ) -> Result<Output, AllocError> {
        if trace_enabled!() {
            trace!("Input function:\n{}", debug_utils::DisplayLir(lir));
        }

        // Reset stats and gather initial information.
        self.stats = Default::default();
        stat!(self.stats, blocks, lir.num_blocks());
        stat!(self.stats, input_insts, lir.num_insts());
        stat!(self.stats, vregs, lir.num_vregs());

        // Number the instruction stream and compute liveness.
        number_instructions(lir, &mut self.numbering);
        self.liveness.compute(lir, &mut self.stats)?;

        // Build one lifetime interval per virtual register plus the fixed
        // intervals of the physical registers.
        IntervalBuilder {
            lir: &*lir,
            numbering: &self.numbering,
            liveness: &self.liveness,
            target,
            intervals: &mut self.intervals,
            maps: &mut self.maps,
        }
        .build(&mut self.stats);

        // Walk the intervals in start order, assigning registers and
        // splitting or spilling on conflicts.
        self.resolver.clear(target.num_regs());
        self.spill_slots.clear(lir.reserved_slots);
        internal::walker::allocate_registers(
            lir,
            &self.numbering,
            target,
            &mut self.intervals,
            &mut self.resolver,
            &mut self.spill_slots,
            &mut self.stats,
        )?;

        // Reconcile locations across control-flow and exception edges.
        let mut resolve = ResolveCtx {
            lir: &mut *lir,
            numbering: &self.numbering,
            liveness: &self.liveness,
            intervals: &mut self.intervals,
            maps: &self.maps,
            resolver: &mut self.resolver,
            spill_slots: &mut self.spill_slots,
            stats: &mut self.stats,
        };
        resolve.resolve_data_flow()?;
        resolve.resolve_exception_handlers()?;
        self.resolver
            .append_moves(lir, &mut self.intervals, &mut self.spill_slots, &mut self.stats);

        if cfg!(debug_assertions) {
            internal::verifier::verify_intervals(&self.intervals)?;
            internal::verifier::RegisterVerifier::new(
                lir,
                &self.numbering,
                target,
                &self.intervals,
                &self.maps,
                &self.resolver,
            )
            .verify()?;
        }

        // Rewrite the function: drop redundant spill stores, replace virtual
        // operands with their assigned locations and fill in oop maps.
        internal::assign::eliminate_spill_moves(
            lir,
            &self.numbering,
            &self.intervals,
            &self.resolver,
            &mut self.stats,
        );
        internal::assign::assign_locations(
            lir,
            &self.numbering,
            &self.intervals,
            &self.maps,
            &mut self.stats,
        )?;

        // Post-allocation cleanup.
        if options.optimize_edge_moves {
            internal::edge_moves::optimize(lir, &mut self.stats);
        }
        if options.optimize_control_flow {
            internal::cfg_opt::optimize(lir, options.short_loop_blocks, &mut self.stats);
        }

        let output = Output {
            num_spill_slots: self.spill_slots.num_spill_slots(),
        };
        if trace_enabled!() {
            trace!("Output:\n{}", debug_utils::DisplayLir(lir));
        }
        trace!("{}", self.stats);
        Ok(output)
    }

    /// Statistics collected during the most recent allocation.
    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Configuration options for the register allocator.
#[derive(Debug, Clone)]
pub struct Options {
    /// Hoist and sink moves shared by all sides of a branch or join after
    /// allocation.
    pub optimize_edge_moves: bool,

    /// Run the control-flow cleanup passes after allocation: short-loop
    /// rotation, jump-only block deletion, fall-through jump removal and
    /// jump-to-return threading.
    pub optimize_control_flow: bool,

    /// Loops of up to this many blocks have their header rotated behind the
    /// body by the control-flow cleanup.
    pub short_loop_blocks: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            optimize_edge_moves: true,
            optimize_control_flow: true,
            short_loop_blocks: 5,
        }
    }
}

/// Result of a successful allocation.
///
/// The function itself is rewritten in place; this reports the frame
/// requirements of the rewritten code.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// Number of stack slots used for spills, on top of the slots the input
    /// function had already reserved.
    pub num_spill_slots: u32,
}

/// Error returned by the register allocator if allocation is impossible.
///
/// This does not cover malformed input functions. If invalid inputs are
/// given then register allocation may panic or not terminate; see
/// [`debug_utils::validate_lir`].
#[derive(Debug)]
#[non_exhaustive]
pub enum AllocError {
    /// The liveness fixpoint did not converge within its iteration bound,
    /// which means the block graph is malformed.
    LivenessNotConverged,

    /// A value is live into the entry block, i.e. it is read before any
    /// definition on some path.
    LiveIntoEntry(VirtReg),

    /// An interval needs a register at a position where every register is
    /// blocked by a fixed interval.
    ///
    /// Generally this can only occur due to excessive fixed constraints on
    /// an instruction, and should be considered a bug in the client.
    OutOfRegisters {
        /// Position of the unsatisfiable interval start.
        pos: u32,
    },

    /// No split child of an interval covers a position where the value is
    /// used.
    NoSplitChild {
        /// The uncovered position.
        pos: u32,
    },

    /// The post-allocation verifier rejected the assignment.
    Verification {
        /// Why the assignment was rejected.
        reason: &'static str,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::LivenessNotConverged => {
                write!(f, "liveness analysis did not converge")
            }
            AllocError::LiveIntoEntry(vreg) => {
                write!(f, "{vreg} is live into the entry block")
            }
            AllocError::OutOfRegisters { pos } => {
                write!(f, "no register available at position {pos}")
            }
            AllocError::NoSplitChild { pos } => {
                write!(f, "no split child covers position {pos}")
            }
            AllocError::Verification { reason } => {
                write!(f, "verification failed: {reason}")
            }
        }
    }
}

/// Statistics collected by the register allocator.
///
/// This is an opaque type since the set of statistics may vary between
/// different versions of the register allocator, even across minor versions.
///
/// The only supported operations on this type are:
/// * Default initialization
/// * Printing with `Debug` or `Display`
#[derive(Debug, Default, Clone)]
pub struct Stats {
    // Stats from the input function.
    blocks: usize,
    input_insts: usize,
    vregs: usize,

    // Stats from liveness analysis.
    liveness_iterations: usize,

    // Stats from interval building.
    intervals_built: usize,
    dead_defs: usize,

    // Stats from the allocation walk.
    interval_splits: usize,
    spilled_intervals: usize,

    // Stats from move resolution.
    resolving_moves: usize,
    broken_cycles: usize,
    exception_edges: usize,

    // Stats from spill-store elimination and location assignment.
    spill_moves_removed: usize,
    spill_stores: usize,
    identity_moves_removed: usize,

    // Stats from the post-allocation cleanup passes.
    moves_hoisted: usize,
    moves_sunk: usize,
    short_loops_rotated: usize,
    blocks_deleted: usize,
    jumps_removed: usize,
    jumps_to_return_threaded: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:#?}")
    }
}

#[cfg(test)]
mod tests;
