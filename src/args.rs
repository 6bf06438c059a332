use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use clap::{
    error::{ContextKind, ContextValue, ErrorKind},
    Parser,
};
use thiserror::Error;

const USAGE_MSG: &[&str] = &[
    "switches:",
    "-b           load and execute RiteBinary (mrb) file",
    "-c           check syntax only",
    "-e 'command' one line of script",
    "-O           compile",
    "-o<outfile>  place the output into <outfile>",
    "-B<symbol>   binary <symbol> output in C language format",
    "-v           print version number, then run in verbose mode",
    "--verbose    run in verbose mode",
    "--version    print the version",
    "--copyright  print the copyright",
];

pub fn usage(name: &str, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Usage: {name} [switches] programfile")?;
    for line in USAGE_MSG {
        writeln!(out, "  {line}")?;
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
struct Cli {
    /// load and execute RiteBinary (mrb) file
    #[arg(short = 'b')]
    mrbfile: bool,

    /// check syntax only
    #[arg(short = 'c')]
    check_syntax: bool,

    /// one line of script
    #[arg(short = 'e', value_name = "command", allow_hyphen_values = true)]
    cmdline: Vec<String>,

    /// compile
    #[arg(short = 'O')]
    compile: bool,

    /// place the output into <outfile>
    #[arg(short = 'o', value_name = "outfile", allow_hyphen_values = true)]
    outfile: Option<String>,

    /// binary <symbol> output in C language format
    #[arg(short = 'B', value_name = "symbol")]
    initname: Option<String>,

    /// print version number, then run in verbose mode
    #[arg(short = 'v')]
    show_version: bool,

    /// run in verbose mode
    #[arg(long)]
    verbose: bool,

    /// print the version
    #[arg(long)]
    version: bool,

    /// print the copyright
    #[arg(long)]
    copyright: bool,

    /// programfile and its arguments
    #[arg(trailing_var_arg = true)]
    rest: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("No code specified for -e")]
    NoCode,
    #[error("Function name is not specified.")]
    NoFunctionName,
    #[error("unknown long option: {0}")]
    UnknownLongOption(String),
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("{0}")]
    Invalid(String),
    #[error("Cannot open program file. ({})", path.display())]
    OpenInput { path: PathBuf, source: io::Error },
    #[error("Cannot open output file. ()")]
    NoOutputFile,
    #[error("Cannot open output file. ({})", path.display())]
    OpenOutput { path: PathBuf, source: io::Error },
}

impl ArgsError {
    /// Whether the usage text should follow the message.
    pub fn shows_usage(&self) -> bool {
        !matches!(
            self,
            Self::NoOutputFile | Self::OpenInput { .. } | Self::OpenOutput { .. }
        )
    }
}

impl From<clap::Error> for ArgsError {
    fn from(err: clap::Error) -> Self {
        let arg = match err.get(ContextKind::InvalidArg) {
            Some(ContextValue::String(arg)) => arg.clone(),
            _ => String::new(),
        };
        match err.kind() {
            ErrorKind::UnknownArgument if arg.starts_with("--") => Self::UnknownLongOption(arg),
            ErrorKind::UnknownArgument => Self::UnknownOption(arg),
            ErrorKind::InvalidValue if arg.starts_with("-e") => Self::NoCode,
            ErrorKind::InvalidValue if arg.starts_with("-B") => Self::NoFunctionName,
            _ => Self::Invalid(err.to_string().trim_end().to_owned()),
        }
    }
}

/// What the command line asks for.
#[derive(Debug)]
pub enum Command {
    Version,
    Copyright,
    Run(Options),
}

/// Parsed switches, before any file is touched.
#[derive(Debug, Default, PartialEq)]
pub struct Options {
    pub mrbfile: bool,
    pub check_syntax: bool,
    pub verbose: bool,
    /// `-v` was given.
    pub show_version: bool,
    /// Inline script, `-e` values joined by newlines.
    pub cmdline: Option<String>,
    /// Compiled output was requested with `-O` or `-B`.
    pub compile: bool,
    pub outfile: Option<String>,
    pub initname: Option<String>,
    /// Positionals: the program file (unless inline) then its arguments.
    pub rest: Vec<String>,
}

/// Where compiled output goes.
#[derive(Debug, PartialEq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

/// Parses the argument list, program name first.
pub fn parse<I, T>(argv: I) -> Result<Command, ArgsError>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
    check_attached_values(&argv)?;

    let cli = Cli::try_parse_from(&argv)?;
    if cli.version {
        return Ok(Command::Version);
    }
    if cli.copyright {
        return Ok(Command::Copyright);
    }
    if cli.initname.as_deref() == Some("") {
        return Err(ArgsError::NoFunctionName);
    }

    let options = Options {
        mrbfile: cli.mrbfile,
        check_syntax: cli.check_syntax,
        verbose: cli.verbose || cli.show_version,
        show_version: cli.show_version,
        cmdline: (!cli.cmdline.is_empty()).then(|| cli.cmdline.join("\n")),
        compile: cli.compile || cli.initname.is_some(),
        outfile: cli.outfile,
        initname: cli.initname,
        rest: cli.rest,
    };
    log::debug!("parsed {options:?}");
    Ok(Command::Run(options))
}

/// `-B` and `-o` take their value only from the same token, also when
/// they close a cluster of flags such as `-cBsym`.
fn check_attached_values(argv: &[String]) -> Result<(), ArgsError> {
    let mut it = argv.iter().skip(1);
    while let Some(arg) = it.next() {
        if arg == "-" || arg == "--" || !arg.starts_with('-') {
            break;
        }
        if arg.starts_with("--") {
            continue;
        }
        for (i, c) in arg.char_indices().skip(1) {
            let attached = &arg[i + c.len_utf8()..];
            match c {
                'B' if attached.is_empty() => return Err(ArgsError::NoFunctionName),
                'o' if attached.is_empty() => return Err(ArgsError::NoOutputFile),
                'e' if attached.is_empty() => {
                    it.next();
                    break;
                }
                'B' | 'o' | 'e' => break,
                _ => {}
            }
        }
    }
    Ok(())
}

impl Options {
    pub fn ext(&self) -> &'static str {
        if self.initname.is_some() {
            "c"
        } else {
            "mrb"
        }
    }

    /// The program file named on the command line, if input comes from one.
    fn script(&self) -> Option<&str> {
        match self.rest.first() {
            Some(path) if self.cmdline.is_none() && path != "-" => Some(path),
            _ => None,
        }
    }

    pub fn output_target(&self) -> Option<OutputTarget> {
        if self.check_syntax {
            return None;
        }
        match (&self.outfile, self.script()) {
            (Some(path), _) if path == "-" => Some(OutputTarget::Stdout),
            (Some(path), _) => Some(OutputTarget::File(PathBuf::from(path))),
            (None, _) if !self.compile => None,
            (None, None) => Some(OutputTarget::Stdout),
            (None, Some(script)) => Some(OutputTarget::File(
                Path::new(script).with_extension(self.ext()),
            )),
        }
    }

    /// Opens the input and, when compiling, the output.
    pub fn open(self) -> Result<Args, ArgsError> {
        let target = if self.mrbfile {
            None
        } else {
            self.output_target()
        };

        let script = self.script().map(str::to_owned);
        let (input, filename, argv) = match (self.cmdline, script) {
            (Some(code), _) => (Input::Inline(code), "-e".to_owned(), self.rest),
            (None, Some(script)) => {
                let path = PathBuf::from(&script);
                let file = File::open(&path).map_err(|source| ArgsError::OpenInput {
                    path: path.clone(),
                    source,
                })?;
                let argv = self.rest[1..].to_vec();
                (Input::File { path, file }, script, argv)
            }
            (None, None) => {
                let argv = self.rest.iter().skip(1).cloned().collect();
                (Input::Stdin, "-".to_owned(), argv)
            }
        };

        let output = match target {
            None => None,
            Some(OutputTarget::Stdout) => Some(Output::Stdout),
            Some(OutputTarget::File(path)) => {
                let file = File::create(&path).map_err(|source| ArgsError::OpenOutput {
                    path: path.clone(),
                    source,
                })?;
                Some(Output::File { path, file })
            }
        };

        let args = Args {
            input,
            output,
            filename,
            initname: self.initname,
            mrbfile: self.mrbfile,
            check_syntax: self.check_syntax,
            verbose: self.verbose,
            show_version: self.show_version,
            argv,
        };
        log::debug!(
            "input {} output {:?}",
            args.filename,
            args.output.as_ref().map(Output::name)
        );
        Ok(args)
    }
}

#[derive(Debug)]
pub enum Input {
    File { path: PathBuf, file: File },
    Stdin,
    Inline(String),
}

impl Input {
    /// Where the input comes from, for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::File { path, .. } => path.display().to_string(),
            Self::Stdin => "standard input".to_owned(),
            Self::Inline(_) => "-e".to_owned(),
        }
    }

    pub fn read_all<R: Read + ?Sized>(&mut self, stdin: &mut R) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::File { file, .. } => {
                file.read_to_end(&mut buf)?;
            }
            Self::Stdin => {
                stdin.read_to_end(&mut buf)?;
            }
            Self::Inline(code) => buf.extend_from_slice(code.as_bytes()),
        }
        Ok(buf)
    }
}

#[derive(Debug)]
pub enum Output {
    Stdout,
    File { path: PathBuf, file: File },
}

impl Output {
    pub fn name(&self) -> String {
        match self {
            Self::Stdout => "-".to_owned(),
            Self::File { path, .. } => path.display().to_string(),
        }
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout => io::stdout().write(buf),
            Self::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout => io::stdout().flush(),
            Self::File { file, .. } => file.flush(),
        }
    }
}

/// Run configuration for one invocation.
#[derive(Debug)]
pub struct Args {
    pub input: Input,
    pub output: Option<Output>,
    /// Name reported for the input: the path, `-` or `-e`.
    pub filename: String,
    pub initname: Option<String>,
    pub mrbfile: bool,
    pub check_syntax: bool,
    pub verbose: bool,
    /// The version banner was already printed by `-v`.
    pub show_version: bool,
    /// Arguments forwarded to the script as `ARGV`.
    pub argv: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> Options {
        let argv = std::iter::once("rite").chain(args.iter().copied());
        match parse(argv).unwrap() {
            Command::Run(options) => options,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn error(args: &[&str]) -> ArgsError {
        parse(std::iter::once("rite").chain(args.iter().copied())).unwrap_err()
    }

    #[test]
    fn inline_code_accumulates() {
        let o = options(&["-e", "a = 1", "-eprint(a)", "x", "-y"]);
        assert_eq!(o.cmdline.as_deref(), Some("a = 1\nprint(a)"));
        assert_eq!(o.rest, ["x", "-y"]);
    }

    #[test]
    fn inline_code_may_start_with_dash() {
        let o = options(&["-e", "-1"]);
        assert_eq!(o.cmdline.as_deref(), Some("-1"));
    }

    #[test]
    fn version_wins() {
        assert!(matches!(parse(["rite", "-b", "--version", "x.rb"]), Ok(Command::Version)));
        assert!(matches!(parse(["rite", "--copyright"]), Ok(Command::Copyright)));
    }

    #[test]
    fn flags() {
        let o = options(&["-b", "-c", "-v", "prog.mrb"]);
        assert!(o.mrbfile && o.check_syntax && o.verbose && o.show_version);
        assert!(!o.compile);
        assert_eq!(o.rest, ["prog.mrb"]);

        let o = options(&["--verbose"]);
        assert!(o.verbose && !o.show_version);
    }

    #[test]
    fn function_name_required() {
        assert!(matches!(error(&["-B"]), ArgsError::NoFunctionName));
        assert!(matches!(error(&["-B", "foo.rb"]), ArgsError::NoFunctionName));
        assert!(matches!(error(&["-B="]), ArgsError::NoFunctionName));
        assert!(matches!(error(&["-cB", "sym", "foo.rb"]), ArgsError::NoFunctionName));
        let o = options(&["-cBsym", "foo.rb"]);
        assert!(o.check_syntax);
        assert_eq!(o.initname.as_deref(), Some("sym"));
        let o = options(&["-Binit_foo", "foo.rb"]);
        assert_eq!(o.initname.as_deref(), Some("init_foo"));
        assert!(o.compile);
        assert_eq!(o.ext(), "c");
    }

    #[test]
    fn output_path_must_be_attached() {
        let err = error(&["-o", "script.lua"]);
        assert!(matches!(err, ArgsError::NoOutputFile));
        assert_eq!(err.to_string(), "Cannot open output file. ()");
        assert!(!err.shows_usage());
        assert!(matches!(error(&["-co", "out.mrb"]), ArgsError::NoOutputFile));

        let o = options(&["-e", "-o", "x"]);
        assert_eq!(o.cmdline.as_deref(), Some("-o"));
        assert_eq!(o.outfile, None);
        assert_eq!(o.rest, ["x"]);
    }

    #[test]
    fn equals_after_short_flag_is_dropped() {
        let o = options(&["-e=p(1)"]);
        assert_eq!(o.cmdline.as_deref(), Some("p(1)"));
        let o = options(&["-oout.mrb", "-e=p(1)"]);
        assert_eq!(o.outfile.as_deref(), Some("out.mrb"));
    }

    #[test]
    fn unknown_options() {
        match error(&["-x"]) {
            ArgsError::UnknownOption(arg) => assert_eq!(arg, "-x"),
            err => panic!("unexpected {err:?}"),
        }
        match error(&["--bogus"]) {
            ArgsError::UnknownLongOption(arg) => assert_eq!(arg, "--bogus"),
            err => panic!("unexpected {err:?}"),
        }
        assert!(error(&["-x"]).shows_usage());
    }

    #[test]
    fn missing_inline_code() {
        let err = error(&["-e"]);
        assert!(matches!(err, ArgsError::NoCode));
        assert_eq!(err.to_string(), "No code specified for -e");
    }

    #[test]
    fn stops_at_first_operand() {
        let o = options(&["script.rb", "-c", "--version", "-"]);
        assert!(!o.check_syntax);
        assert_eq!(o.rest, ["script.rb", "-c", "--version", "-"]);
    }

    #[test]
    fn output_paths() {
        let target = |args: &[&str]| options(args).output_target();
        let file = |p: &str| Some(OutputTarget::File(PathBuf::from(p)));

        assert_eq!(target(&["-O", "foo.rb"]), file("foo.mrb"));
        assert_eq!(target(&["-O", "foo"]), file("foo.mrb"));
        assert_eq!(target(&["-Binit", "foo.rb"]), file("foo.c"));
        assert_eq!(target(&["-O", "-obar.out", "foo.rb"]), file("bar.out"));
        assert_eq!(target(&["-O", "-o-", "foo.rb"]), Some(OutputTarget::Stdout));
        assert_eq!(target(&["-O", "-e", "p 1"]), Some(OutputTarget::Stdout));
        assert_eq!(target(&["-O"]), Some(OutputTarget::Stdout));
        assert_eq!(target(&["-O", "-"]), Some(OutputTarget::Stdout));
        assert_eq!(target(&["-O", "-c", "foo.rb"]), None);
        assert_eq!(target(&["foo.rb"]), None);
    }

    #[test]
    fn stdin_input() {
        let args = options(&["-", "a", "b"]).open().unwrap();
        assert!(matches!(args.input, Input::Stdin));
        assert_eq!(args.filename, "-");
        assert_eq!(args.argv, ["a", "b"]);

        let args = options(&[]).open().unwrap();
        assert!(matches!(args.input, Input::Stdin));
        assert!(args.output.is_none());
    }

    #[test]
    fn inline_forwards_all_operands() {
        let mut args = options(&["-e", "p 1", "-", "x"]).open().unwrap();
        assert_eq!(args.filename, "-e");
        assert_eq!(args.argv, ["-", "x"]);
        let code = args.input.read_all(&mut io::empty()).unwrap();
        assert_eq!(code, b"p 1");
    }

    #[test]
    fn opens_script_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("foo.rb");
        std::fs::write(&script, "print(1)").unwrap();

        let mut args = options(&["-O", script.to_str().unwrap(), "arg"]).open().unwrap();
        assert_eq!(args.argv, ["arg"]);
        assert_eq!(args.filename, script.to_str().unwrap());
        assert_eq!(args.input.read_all(&mut io::empty()).unwrap(), b"print(1)");
        assert_eq!(args.input.describe(), script.display().to_string());
        match &args.output {
            Some(Output::File { path, .. }) => assert_eq!(path, &dir.path().join("foo.mrb")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(dir.path().join("foo.mrb").exists());
    }

    #[test]
    fn missing_script_opens_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("nope.rb");
        let err = options(&["-O", script.to_str().unwrap()]).open().unwrap_err();
        assert!(matches!(err, ArgsError::OpenInput { .. }));
        assert!(!err.shows_usage());
        assert!(err.to_string().starts_with("Cannot open program file. ("));
        assert!(!dir.path().join("nope.mrb").exists());
    }

    #[test]
    fn bytecode_input_opens_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("prog.mrb");
        std::fs::write(&script, b"RITE").unwrap();
        let args = options(&["-b", "-O", script.to_str().unwrap()]).open().unwrap();
        assert!(args.output.is_none());
        assert!(args.mrbfile);
    }
}
