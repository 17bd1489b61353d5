//! Support for displaying a human-readable representation of a [`Lir`]
//! function.

use core::cell::Cell;
use core::fmt;

use crate::lir::{BlockFlags, Cond, InstData, Lir, Op};

/// Helper type to display a space-separated list of displayable values.
pub(crate) struct DisplayIter<T> {
    iter: Cell<Option<T>>,
    separator: &'static str,
}
impl<T: IntoIterator> fmt::Display for DisplayIter<T>
where
    T::Item: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, val) in self.iter.take().unwrap().into_iter().enumerate() {
            if i == 0 {
                write!(f, "{val}")?;
            } else {
                write!(f, "{}{val}", self.separator)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn display_iter<I: IntoIterator<Item = impl fmt::Display>>(
    iter: I,
    separator: &'static str,
) -> DisplayIter<I> {
    DisplayIter {
        iter: Cell::new(Some(iter)),
        separator,
    }
}

fn cond_str(cond: Cond) -> &'static str {
    match cond {
        Cond::Eq => "eq",
        Cond::Ne => "ne",
        Cond::Lt => "lt",
        Cond::Le => "le",
        Cond::Gt => "gt",
        Cond::Ge => "ge",
    }
}

fn write_inst(f: &mut fmt::Formatter<'_>, data: &InstData) -> fmt::Result {
    match &data.op {
        Op::Move { from, to } => write!(f, "move {from} -> {to}")?,
        Op::Compute {
            inputs,
            temps,
            outputs,
        } => {
            write!(f, "compute {}", display_iter(inputs, ", "))?;
            if !temps.is_empty() {
                write!(f, " temps({})", display_iter(temps, ", "))?;
            }
            write!(f, " -> {}", display_iter(outputs, ", "))?;
        }
        Op::Call { args, result } => {
            write!(f, "call {}", display_iter(args, ", "))?;
            if let Some(result) = result {
                write!(f, " -> {result}")?;
            }
        }
        Op::Branch { cond, target } => write!(f, "branch.{} {target}", cond_str(*cond))?,
        Op::Jump { target } => write!(f, "jump {target}")?,
        Op::Return { value } => {
            write!(f, "return")?;
            if let Some(value) = value {
                write!(f, " {value}")?;
            }
        }
    }
    if let Some(info) = &data.info {
        write!(f, " live[{}]", display_iter(&info.live_values, " "))?;
        if !info.oop_map.is_empty() {
            write!(f, " oops[{}]", display_iter(&info.oop_map, " "))?;
        }
    }
    Ok(())
}

/// Wrapper around [`Lir`] that provides a [`Display`] implementation which
/// dumps the function in a human-readable format.
///
/// [`Display`]: core::fmt::Display
pub struct DisplayLir<'a>(pub &'a Lir);

impl fmt::Debug for DisplayLir<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for DisplayLir<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &block in self.0.block_order() {
            let data = self.0.block(block);
            write!(f, "{block}")?;
            if data.loop_depth != 0 {
                write!(f, " loop({}, depth {})", data.loop_index, data.loop_depth)?;
            }
            for (flag, name) in [
                (BlockFlags::LOOP_HEADER, "header"),
                (BlockFlags::LOOP_END, "loop_end"),
                (BlockFlags::EXCEPTION_ENTRY, "ex_entry"),
                (BlockFlags::BACKWARD_BRANCH_TARGET, "back_target"),
            ] {
                if data.flags.contains(flag) {
                    write!(f, " [{name}]")?;
                }
            }
            writeln!(f, ":")?;
            if !data.preds.is_empty() {
                writeln!(f, "    preds: {}", display_iter(&data.preds, " "))?;
            }
            if !data.handlers.is_empty() {
                writeln!(f, "    handlers: {}", display_iter(&data.handlers, " "))?;
            }
            if !data.exception_phis.is_empty() {
                writeln!(f, "    phis: {}", display_iter(&data.exception_phis, " "))?;
            }
            for &inst in &data.insts {
                write!(f, "    {inst}: ")?;
                write_inst(f, self.0.inst(inst))?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
