use std::{
    io::{self, BufRead, Write},
    rc::Rc,
};

use anyhow::Context;

use crate::{
    args::{Args, Input},
    repl, trace,
    value::Value,
    vm::{CompileContext, ExeState, Loaded},
};

/// Standard streams of the process, passed in so runs can be driven from
/// tests.
pub struct Io<'a> {
    pub stdin: &'a mut dyn BufRead,
    /// Standard input is an empty regular file or a terminal.
    pub interactive: bool,
    pub out: &'a mut dyn Write,
    pub err: &'a mut dyn Write,
}

/// Executes one configured invocation. Returns whether it succeeded.
pub fn run(state: &mut ExeState, args: &mut Args, io: Io) -> anyhow::Result<bool> {
    if args.output.is_none() {
        state.init_libs();
    }

    if args.output.is_none() && matches!(args.input, Input::Stdin) && io.interactive {
        log::debug!("stdin is interactive, starting repl");
        return repl::run(state, io.stdin, io.out, !args.show_version);
    }

    let argv = args.argv.iter().map(|a| Value::from(a.as_str())).collect();
    state.define_global_const("ARGV", Value::Array(Rc::new(argv)));

    if args.mrbfile {
        run_bytecode(state, args, io)
    } else {
        run_source(state, args, io)
    }
}

fn run_bytecode(state: &mut ExeState, args: &mut Args, io: Io) -> anyhow::Result<bool> {
    let bytes = args
        .input
        .read_all(io.stdin)
        .with_context(|| format!("failed to read {}", args.input.describe()))?;
    let index = match state.read_irep(&bytes) {
        Ok(index) => index,
        Err(err) => {
            log::debug!("read_irep: {err:#}");
            writeln!(io.err, "failed to load mrb file: {}", args.filename)?;
            return Ok(false);
        }
    };
    if args.check_syntax {
        return Ok(true);
    }

    state.run(index);
    if state.exception().is_some() {
        trace::report(state, io.out)?;
        return Ok(false);
    }
    Ok(true)
}

fn run_source(state: &mut ExeState, args: &mut Args, io: Io) -> anyhow::Result<bool> {
    let cxt = CompileContext {
        filename: Some(args.filename.clone()),
        dump_result: args.verbose,
        no_exec: args.check_syntax || args.output.is_some(),
    };
    let src = args
        .input
        .read_all(io.stdin)
        .with_context(|| format!("failed to read {}", args.input.describe()))?;
    let loaded = state.load(&src, &cxt);
    log::debug!("loaded {}: {loaded:?}", args.filename);

    if let Some(output) = args.output.as_mut() {
        if !args.check_syntax {
            let Loaded::Compiled(index) = loaded else {
                return Ok(false);
            };
            match &args.initname {
                Some(symbol) => state.dump_irep_c(index, output, symbol)?,
                None => state.dump_irep(index, output)?,
            }
            log::debug!("dumped irep {index} to {}", output.name());
        }
    }

    if state.exception().is_some() {
        if !matches!(loaded, Loaded::Undef) {
            trace::report(state, io.out)?;
        }
        return Ok(false);
    }
    if args.check_syntax {
        writeln!(io.out, "Syntax OK")?;
    }
    Ok(true)
}

/// Whether standard input should start the interactive loop: anything that
/// is neither a pipe nor a file with content.
#[cfg(unix)]
pub fn stdin_is_interactive() -> bool {
    use std::{fs::File, os::fd::AsFd, os::unix::fs::FileTypeExt};

    let Ok(fd) = io::stdin().as_fd().try_clone_to_owned() else {
        return false;
    };
    match File::from(fd).metadata() {
        Ok(meta) => !meta.file_type().is_fifo() && meta.len() == 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn stdin_is_interactive() -> bool {
    use std::io::IsTerminal;

    io::stdin().is_terminal()
}
