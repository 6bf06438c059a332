use std::io::{BufRead, Write};

use crate::vm::{CompileContext, ExeState, Loaded};

const PROMPT: &str = "> ";

/// Line-at-a-time interactive loop. Globals persist between lines, locals
/// do not.
pub fn run(
    state: &mut ExeState,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
    banner: bool,
) -> anyhow::Result<bool> {
    if banner {
        state.show_version(out)?;
    }
    writeln!(out, "type 'quit' or 'exit' to leave")?;

    let cxt = CompileContext {
        filename: Some("(repl)".into()),
        ..Default::default()
    };
    let mut line = String::new();
    loop {
        write!(out, "{PROMPT}")?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            break;
        }
        let code = line.trim();
        match code {
            "" => continue,
            "quit" | "exit" => break,
            _ => {}
        }

        // Expressions print their value.
        let expr = format!("return {code}");
        let src = if state.check_syntax(expr.as_bytes()) {
            expr
        } else {
            code.to_owned()
        };

        if let Loaded::Value(v) = state.load(src.as_bytes(), &cxt) {
            match state.exception() {
                Some(exc) => writeln!(out, "{}", exc.inspect())?,
                None => writeln!(out, " => {}", v.inspect())?,
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::state;

    fn session(input: &str) -> (String, String) {
        let (mut state, engine) = state();
        let mut out = Vec::new();
        let ok = run(&mut state, &mut input.as_bytes(), &mut out, true).unwrap();
        assert!(ok);
        (String::from_utf8(out).unwrap(), engine.text())
    }

    #[test]
    fn evaluates_lines() {
        let (out, engine) = session("x = 40\nx + 2\nprint(\"hi\")\nquit\nprint(\"never\")\n");
        assert!(out.starts_with("rite "));
        assert!(out.contains(" => 42\n"));
        assert!(out.contains(" => nil\n"));
        assert_eq!(engine, "hi\n");
    }

    #[test]
    fn reports_errors_and_continues() {
        let (out, engine) = session("1 // 0\nprint(\n\"ok\"\n");
        assert!(out.contains("(repl):1: divided by 0 (ZeroDivisionError)\n"));
        assert!(engine.starts_with("(repl):1: "));
        assert!(out.contains(" => \"ok\"\n"));
    }

    #[test]
    fn eof_leaves() {
        let (out, _) = session("");
        assert!(out.ends_with("> \n"));
    }
}
