//! Utility functions and types for debugging register allocation.
//!
//! These are not needed for normal compilation, but are useful during
//! development of both the register allocator itself and the compiler
//! backend feeding it.

mod display;
mod validate;

pub use display::*;
pub use validate::*;
