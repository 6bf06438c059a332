use std::{
    fs::{self, File},
    io::Write,
    path::Path,
    process::{Command, Output, Stdio},
};

fn rite(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rite"))
        .current_dir(dir)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn version_and_copyright() {
    let dir = tempfile::tempdir().unwrap();
    let out = rite(dir.path(), &["--version", "missing.lua"]);
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("rite "));

    let out = rite(dir.path(), &["--copyright"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("Copyright"));
}

#[test]
fn runs_script_with_arguments() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.lua"), "print(\"hello\", ARGV[1], #ARGV)\n").unwrap();
    let out = rite(dir.path(), &["hello.lua", "a", "-b"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "hello\ta\t2\n");
}

#[test]
fn inline_lines_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let out = rite(dir.path(), &["-e", "x = 20", "-e", "p(x + 1)"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "21\n");
}

#[test]
fn compile_then_run_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("foo.lua"), "function twice(n)\n  return n * 2\nend\nprint(twice(21))\n").unwrap();

    let out = rite(dir.path(), &["-O", "foo.lua"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "");
    let bytes = fs::read(dir.path().join("foo.mrb")).unwrap();
    assert!(bytes.starts_with(b"RITE0001"));

    let out = rite(dir.path(), &["-b", "foo.mrb"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "42\n");
}

#[test]
fn c_symbol_output() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("foo.lua"), "print(1)\n").unwrap();
    let out = rite(dir.path(), &["-Binit_foo", "foo.lua"]);
    assert!(out.status.success());
    let c = fs::read_to_string(dir.path().join("foo.c")).unwrap();
    assert!(c.contains("const uint8_t init_foo[] = {"));
}

#[test]
fn missing_function_name() {
    let dir = tempfile::tempdir().unwrap();
    let out = rite(dir.path(), &["-B"]);
    assert!(!out.status.success());
    let text = stdout(&out);
    assert!(text.contains("Function name is not specified."));
    assert!(text.contains("Usage:"));
}

#[test]
fn unknown_option() {
    let dir = tempfile::tempdir().unwrap();
    let out = rite(dir.path(), &["-x"]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("Usage:"));
}

#[test]
fn missing_script() {
    let dir = tempfile::tempdir().unwrap();
    let out = rite(dir.path(), &["-O", "nope.lua"]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("Cannot open program file. (nope.lua)"));
    assert!(!dir.path().join("nope.mrb").exists());
}

#[test]
fn exception_trace() {
    let dir = tempfile::tempdir().unwrap();
    let script = "\
function inner()
  error(\"boom\")
end
function outer()
  inner()
end
outer()
";
    fs::write(dir.path().join("t.lua"), script).unwrap();
    let out = rite(dir.path(), &["t.lua"]);
    assert!(!out.status.success());
    assert_eq!(
        stdout(&out),
        "trace:\n\
         \t[2] t.lua:2:in Object.inner\n\
         \t[1] t.lua:5:in Object.outer\n\
         \t[0] t.lua:7\n\
         t.lua:2: boom (RuntimeError)\n"
    );
}

#[test]
fn check_syntax() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ok.lua"), "error(\"not run\")\n").unwrap();
    let out = rite(dir.path(), &["-c", "ok.lua"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "Syntax OK\n");

    fs::write(dir.path().join("bad.lua"), "x = 1\nif x then\n").unwrap();
    let out = rite(dir.path(), &["-c", "bad.lua"]);
    assert!(!out.status.success());
    let text = stdout(&out);
    assert!(text.starts_with("bad.lua:"));
    assert!(!text.contains("trace:"));
    assert!(!text.contains("Syntax OK"));
}

#[test]
fn piped_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_rite"))
        .current_dir(dir.path())
        .args(["-", "piped"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"print(ARGV[1])\n")
        .unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success());
    assert_eq!(stdout(&out), "piped\n");
}

#[test]
fn empty_stdin_file_starts_repl() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty");
    File::create(&empty).unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_rite"))
        .current_dir(dir.path())
        .stdin(File::open(&empty).unwrap())
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(stdout(&out).contains("> "));
}

#[test]
fn detached_output_path_leaves_script_alone() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("script.lua");
    fs::write(&script, "print(\"hi\")\n").unwrap();

    let out = rite(dir.path(), &["-o", "script.lua"]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("Cannot open output file. ()"));
    assert_eq!(fs::read_to_string(&script).unwrap(), "print(\"hi\")\n");
}

#[test]
fn deep_nesting_is_a_syntax_error() {
    let dir = tempfile::tempdir().unwrap();
    let src = format!("x = {}1\n", "- ".repeat(100_000));
    fs::write(dir.path().join("deep.lua"), src).unwrap();
    let out = rite(dir.path(), &["-c", "deep.lua"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("nested too deeply"));
}

#[test]
fn nested_functions_round_trip_or_fail_early() {
    let dir = tempfile::tempdir().unwrap();
    let nested = |n: usize| {
        let mut src = String::new();
        for i in 0..n {
            src += &format!("function f{i}()\n");
        }
        src + &"end\n".repeat(n) + "print(\"ok\")\n"
    };

    fs::write(dir.path().join("deep.lua"), nested(199)).unwrap();
    assert!(rite(dir.path(), &["-O", "deep.lua"]).status.success());
    let out = rite(dir.path(), &["-b", "deep.mrb"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "ok\n");

    fs::write(dir.path().join("deeper.lua"), nested(200)).unwrap();
    let out = rite(dir.path(), &["-O", "deeper.lua"]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("functions nested too deeply"));
    assert_eq!(fs::read(dir.path().join("deeper.mrb")).unwrap(), b"");
}

#[test]
fn bad_bytecode_reports_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bad.mrb"), "print(1)").unwrap();
    let out = rite(dir.path(), &["-b", "bad.mrb"]);
    assert!(!out.status.success());
    assert_eq!(stdout(&out), "");
    assert_eq!(
        String::from_utf8_lossy(&out.stderr),
        "failed to load mrb file: bad.mrb\n"
    );
}

#[test]
fn dash_v_repl_prints_one_banner() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty");
    File::create(&empty).unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_rite"))
        .current_dir(dir.path())
        .arg("-v")
        .stdin(File::open(&empty).unwrap())
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(stdout(&out).matches("rite ").count(), 1);
}
