use std::io::{self, Write};
use std::process::ExitCode;

mod args;
mod bytecode;
mod dump;
mod lex;
mod parse;
mod repl;
mod run;
mod trace;
mod value;
mod vm;

use args::Command;
use vm::ExeState;

fn main() -> ExitCode {
    env_logger::init();

    let argv: Vec<String> = std::env::args().collect();
    let prog = argv.first().cloned().unwrap_or_else(|| "rite".to_owned());
    let mut state = ExeState::new();

    match execute(&mut state, &prog, argv, &mut io::stdout()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err:#}");
            println!("{prog}: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(state: &mut ExeState, prog: &str, argv: Vec<String>, out: &mut dyn Write) -> anyhow::Result<bool> {
    let options = match args::parse(argv) {
        Ok(Command::Version) => {
            state.show_version(out)?;
            return Ok(true);
        }
        Ok(Command::Copyright) => {
            state.show_copyright(out)?;
            return Ok(true);
        }
        Ok(Command::Run(options)) => options,
        Err(err) => {
            writeln!(out, "{prog}: {err}")?;
            args::usage(prog, out)?;
            return Ok(false);
        }
    };

    if options.show_version {
        state.show_version(out)?;
    }

    let mut args = match options.open() {
        Ok(args) => args,
        Err(err) => {
            writeln!(out, "{prog}: {err}")?;
            if err.shows_usage() {
                args::usage(prog, out)?;
            }
            return Ok(false);
        }
    };
    out.flush()?;

    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    let io = run::Io {
        stdin: &mut stdin,
        interactive: run::stdin_is_interactive(),
        out,
        err: &mut io::stderr(),
    };
    let ok = run::run(state, &mut args, io)?;
    log::debug!("finished with success={ok}");
    Ok(ok)
}
