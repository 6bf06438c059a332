use std::io::{self, Write};

use crate::vm::{CallInfo, ExeState, Exception, Proc};

/// Frame index used when the recorded one is out of range.
const CIIDX_GUARD: usize = 10;

/// Prints the call frames active when `exc` was raised, innermost first.
pub fn show_call_info(exc: &Exception, cis: &[CallInfo], out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "trace:")?;
    let ciidx = if exc.ciidx >= cis.len() {
        CIIDX_GUARD
    } else {
        exc.ciidx
    };

    for i in (0..=ciidx).rev() {
        let Some(ci) = cis.get(i) else {
            continue;
        };
        let Proc::Irep { proto, class } = &ci.proc else {
            continue;
        };
        let pc = if i < ciidx {
            cis.get(i + 1).map_or(exc.last_pc, |next| next.pc)
        } else {
            exc.last_pc
        };
        let Some(line) = proto.line_at(pc) else {
            continue;
        };
        let filename = proto.filename.as_deref().unwrap_or("(unknown)");

        match (&ci.mid, class) {
            (Some(method), Some(cn)) => {
                let sep = if ci.target_class.as_ref() == Some(cn) {
                    "."
                } else {
                    "#"
                };
                writeln!(out, "\t[{i}] {filename}:{line}:in {cn}{sep}{method}")?
            }
            (Some(method), None) => writeln!(out, "\t[{i}] {filename}:{line}:in {method}")?,
            (None, _) => writeln!(out, "\t[{i}] {filename}:{line}")?,
        }
    }
    Ok(())
}

/// Prints the trace and the inspected form of the pending exception.
pub fn report(state: &ExeState, out: &mut dyn Write) -> io::Result<()> {
    let Some(exc) = state.exception() else {
        return Ok(());
    };
    show_call_info(exc, state.call_infos(), out)?;
    writeln!(out, "{}", exc.inspect())
}
