use std::{
    collections::{HashMap, HashSet},
    io::{self, Write},
    rc::Rc,
};

use crate::{
    bytecode::{BinOp, ByteCode, FuncProto, UnOp},
    dump, parse,
    value::{Builtin, Value},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Class every script-level function is defined on.
pub const OBJECT_CLASS: &str = "Object";

const CALL_DEPTH_MAX: usize = 200;

/// Marker for a raised exception; the exception itself is pending in
/// [`ExeState::exception`].
#[derive(Debug)]
pub struct Raised;

pub type Exec<T> = Result<T, Raised>;

#[derive(Debug, Clone)]
pub enum Proc {
    Native(&'static str),
    Irep {
        proto: Rc<FuncProto>,
        class: Option<String>,
    },
}

/// One call frame.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub proc: Proc,
    /// Program counter of the caller when this frame was entered.
    pub pc: usize,
    pub mid: Option<String>,
    pub target_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub class: String,
    pub message: String,
    /// Index of the innermost call frame when raised.
    pub ciidx: usize,
    /// Program counter of the innermost frame when raised.
    pub last_pc: usize,
    pub position: Option<(String, u32)>,
}

impl Exception {
    pub fn inspect(&self) -> String {
        match &self.position {
            Some((file, line)) => format!("{file}:{line}: {} ({})", self.message, self.class),
            None => format!("{} ({})", self.message, self.class),
        }
    }
}

/// Options for compiling one chunk.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    pub filename: Option<String>,
    /// Print the code listing before running and the result after.
    pub dump_result: bool,
    /// Compile only.
    pub no_exec: bool,
}

#[derive(Debug)]
pub enum Loaded {
    /// Compilation failed; a `SyntaxError` is pending.
    Undef,
    /// Compiled and registered under this irep index, not executed.
    Compiled(usize),
    /// Executed; the chunk's return value.
    Value(Value),
}

/// Interpreter context. Holds globals, registered compiled units and the
/// call-info records of the last run.
pub struct ExeState {
    globals: HashMap<String, Value>,
    constants: HashSet<String>,
    stack: Vec<Value>,
    callinfo: Vec<CallInfo>,
    ireps: Vec<Rc<FuncProto>>,
    exc: Option<Exception>,
    out: Box<dyn Write>,
}

impl ExeState {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self {
            globals: HashMap::new(),
            constants: HashSet::new(),
            stack: Vec::new(),
            callinfo: Vec::new(),
            ireps: Vec::new(),
            exc: None,
            out,
        }
    }

    pub fn show_version(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "rite {VERSION} (kailua engine)")
    }

    pub fn show_copyright(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "rite - Copyright (c) 2023 the rite developers")
    }

    pub fn init_libs(&mut self) {
        let libs: [(&'static str, crate::value::BuiltinFn); 5] = [
            ("print", lib_print),
            ("p", lib_p),
            ("error", lib_error),
            ("tostring", lib_tostring),
            ("type", lib_type),
        ];
        for (name, func) in libs {
            self.globals
                .insert(name.into(), Value::Builtin(Builtin { name, func }));
        }
    }

    /// Defines a global that scripts may read but not reassign.
    pub fn define_global_const(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_owned(), value);
        self.constants.insert(name.to_owned());
    }

    pub fn exception(&self) -> Option<&Exception> {
        self.exc.as_ref()
    }

    pub fn call_infos(&self) -> &[CallInfo] {
        &self.callinfo
    }

    /// Whether `src` compiles, without reporting anything.
    pub fn check_syntax(&self, src: &[u8]) -> bool {
        parse::load(src, None).is_ok()
    }

    pub fn load(&mut self, src: &[u8], cxt: &CompileContext) -> Loaded {
        self.reset();
        let proto = match parse::load(src, cxt.filename.as_deref()) {
            Ok(proto) => Rc::new(proto),
            Err(err) => {
                let file = cxt.filename.as_deref().unwrap_or("-").to_owned();
                self.write_out(format_args!("{file}:{}: {}", err.line, err.message));
                self.exc = Some(Exception {
                    class: "SyntaxError".into(),
                    message: err.message,
                    ciidx: 0,
                    last_pc: 0,
                    position: Some((file, err.line)),
                });
                return Loaded::Undef;
            }
        };

        if cxt.dump_result {
            if let Err(err) = proto.dump_codes(&mut *self.out) {
                log::warn!("failed to write code listing: {err}");
            }
        }
        let index = self.register(proto);
        log::debug!("compiled {:?} as irep {index}", cxt.filename);
        if cxt.no_exec {
            return Loaded::Compiled(index);
        }

        let v = self.run(index);
        if cxt.dump_result && self.exc.is_none() {
            self.write_out(format_args!("{}", v.inspect()));
        }
        Loaded::Value(v)
    }

    /// Decodes a dumped unit and registers it.
    pub fn read_irep(&mut self, bytes: &[u8]) -> anyhow::Result<usize> {
        let proto = dump::load(bytes)?;
        Ok(self.register(Rc::new(proto)))
    }

    pub fn dump_irep(&self, index: usize, out: &mut dyn Write) -> anyhow::Result<()> {
        dump::write_irep(self.irep(index)?, out)
    }

    pub fn dump_irep_c(&self, index: usize, out: &mut dyn Write, symbol: &str) -> anyhow::Result<()> {
        dump::write_irep_c(self.irep(index)?, out, symbol)
    }

    /// Runs a registered unit at top level. A raised exception is left
    /// pending and `nil` is returned.
    pub fn run(&mut self, index: usize) -> Value {
        self.reset();
        let Some(proto) = self.ireps.get(index).cloned() else {
            self.raise("ArgumentError", format!("no irep {index}"), 0);
            return Value::Nil;
        };
        self.callinfo.push(CallInfo {
            proc: Proc::Irep {
                proto: proto.clone(),
                class: Some(OBJECT_CLASS.into()),
            },
            pc: 0,
            mid: None,
            target_class: Some(OBJECT_CLASS.into()),
        });
        match self.execute(&proto, 0) {
            Ok(v) => {
                self.callinfo.pop();
                v
            }
            Err(Raised) => Value::Nil,
        }
    }

    fn irep(&self, index: usize) -> anyhow::Result<&FuncProto> {
        self.ireps
            .get(index)
            .map(|p| p.as_ref())
            .ok_or_else(|| anyhow::anyhow!("no irep {index}"))
    }

    fn register(&mut self, proto: Rc<FuncProto>) -> usize {
        self.ireps.push(proto);
        self.ireps.len() - 1
    }

    fn reset(&mut self) {
        self.exc = None;
        self.callinfo.clear();
        self.stack.clear();
    }

    fn write_out(&mut self, args: std::fmt::Arguments) {
        if let Err(err) = writeln!(self.out, "{args}") {
            log::warn!("failed to write output: {err}");
        }
    }

    fn execute(&mut self, proto: &Rc<FuncProto>, base: usize) -> Exec<Value> {
        let mut pc = 0;
        while let Some(&code) = proto.byte_codes.get(pc) {
            pc += 1;
            match code {
                ByteCode::GetGlobal(dst, name) => {
                    let v = match <&str>::try_from(&proto.constants[name as usize]) {
                        Ok(key) => self.globals.get(key).cloned().unwrap_or(Value::Nil),
                        Err(err) => return Err(self.raise("TypeError", err.to_string(), pc)),
                    };
                    self.set_stack(base + dst as usize, v);
                }
                ByteCode::SetGlobal(name, src) => {
                    let key = match <&str>::try_from(&proto.constants[name as usize]) {
                        Ok(key) => key,
                        Err(err) => return Err(self.raise("TypeError", err.to_string(), pc)),
                    };
                    if self.constants.contains(key) {
                        let msg = format!("cannot reassign constant {key}");
                        return Err(self.raise("NameError", msg, pc));
                    }
                    let v = self.reg(base + src as usize);
                    self.globals.insert(key.to_owned(), v);
                }
                ByteCode::LoadConst(dst, c) => {
                    let v = proto.constants[c as usize].clone();
                    self.set_stack(base + dst as usize, v);
                }
                ByteCode::LoadNil(dst) => self.set_stack(base + dst as usize, Value::Nil),
                ByteCode::LoadBool(dst, b) => self.set_stack(base + dst as usize, b.into()),
                ByteCode::LoadInt(dst, i) => {
                    self.set_stack(base + dst as usize, (i as i64).into())
                }
                ByteCode::Move(dst, src) => {
                    let v = self.reg(base + src as usize);
                    self.set_stack(base + dst as usize, v);
                }
                ByteCode::Closure(dst, i) => {
                    let f = Value::Function(proto.protos[i as usize].clone());
                    self.set_stack(base + dst as usize, f);
                }
                ByteCode::NewArray(dst, n) => {
                    let first = base + dst as usize + 1;
                    let items = self.args(first, n as usize);
                    self.set_stack(base + dst as usize, Value::Array(Rc::new(items)));
                }
                ByteCode::Index(dst, obj, key) => {
                    let obj = self.reg(base + obj as usize);
                    let key = self.reg(base + key as usize);
                    let v = match (&obj, &key) {
                        (Value::Array(items), Value::Integer(i)) => usize::try_from(*i - 1)
                            .ok()
                            .and_then(|i| items.get(i).cloned())
                            .unwrap_or(Value::Nil),
                        (Value::Array(_), k) => {
                            let msg = format!("array index must be an integer, got {}", k.type_name());
                            return Err(self.raise("TypeError", msg, pc));
                        }
                        (o, _) => {
                            let msg = format!("attempt to index a {} value", o.type_name());
                            return Err(self.raise("TypeError", msg, pc));
                        }
                    };
                    self.set_stack(base + dst as usize, v);
                }
                ByteCode::Unary(op, dst, src) => {
                    let v = self.reg(base + src as usize);
                    match unary(op, &v) {
                        Ok(v) => self.set_stack(base + dst as usize, v),
                        Err((class, msg)) => return Err(self.raise(class, msg, pc)),
                    }
                }
                ByteCode::Binary(op, dst, a, b) => {
                    let a = self.reg(base + a as usize);
                    let b = self.reg(base + b as usize);
                    match binary(op, &a, &b) {
                        Ok(v) => self.set_stack(base + dst as usize, v),
                        Err((class, msg)) => return Err(self.raise(class, msg, pc)),
                    }
                }
                ByteCode::Test(r, target) => {
                    let truthy = self.stack.get(base + r as usize).map_or(false, Value::is_truthy);
                    if !truthy {
                        pc = target as usize;
                    }
                }
                ByteCode::Jump(target) => pc = target as usize,
                ByteCode::Call(func, nargs) => {
                    let func = base + func as usize;
                    let v = self.call(func, nargs as usize, pc)?;
                    self.set_stack(func, v);
                }
                ByteCode::Return(src) => return Ok(self.reg(base + src as usize)),
                ByteCode::ReturnNil => return Ok(Value::Nil),
            }
        }
        Ok(Value::Nil)
    }

    fn call(&mut self, func: usize, nargs: usize, ret_pc: usize) -> Exec<Value> {
        if self.callinfo.len() >= CALL_DEPTH_MAX {
            return Err(self.raise("SystemStackError", "stack level too deep", ret_pc));
        }
        match self.reg(func) {
            Value::Function(proto) => {
                log::trace!("call {:?} depth {}", proto.name, self.callinfo.len());
                self.callinfo.push(CallInfo {
                    proc: Proc::Irep {
                        proto: proto.clone(),
                        class: Some(OBJECT_CLASS.into()),
                    },
                    pc: ret_pc,
                    mid: proto.name.clone(),
                    target_class: Some(OBJECT_CLASS.into()),
                });
                let base = func + 1;
                for i in nargs..proto.params as usize {
                    self.set_stack(base + i, Value::Nil);
                }
                let v = self.execute(&proto, base)?;
                self.callinfo.pop();
                Ok(v)
            }
            Value::Builtin(b) => {
                self.callinfo.push(CallInfo {
                    proc: Proc::Native(b.name),
                    pc: ret_pc,
                    mid: Some(b.name.into()),
                    target_class: Some(OBJECT_CLASS.into()),
                });
                let args = self.args(func + 1, nargs);
                let v = (b.func)(self, &args)?;
                self.callinfo.pop();
                Ok(v)
            }
            v => {
                let msg = format!("attempt to call a {} value", v.type_name());
                Err(self.raise("NoMethodError", msg, ret_pc))
            }
        }
    }

    /// Records a pending exception raised at `last_pc` of the innermost frame.
    pub fn raise(&mut self, class: &str, message: impl Into<String>, last_pc: usize) -> Raised {
        let message = message.into();
        log::debug!("raise {class}: {message}");
        self.exc = Some(Exception {
            class: class.to_owned(),
            message,
            ciidx: self.callinfo.len().saturating_sub(1),
            last_pc,
            position: self.position(last_pc),
        });
        Raised
    }

    /// Source position of the innermost frame that has one.
    fn position(&self, last_pc: usize) -> Option<(String, u32)> {
        let mut pc = last_pc;
        for ci in self.callinfo.iter().rev() {
            if let Proc::Irep { proto, .. } = &ci.proc {
                if let Some(line) = proto.line_at(pc) {
                    let file = proto.filename.as_deref().unwrap_or("(unknown)");
                    return Some((file.to_owned(), line));
                }
            }
            pc = ci.pc;
        }
        None
    }

    fn reg(&self, i: usize) -> Value {
        self.stack.get(i).cloned().unwrap_or(Value::Nil)
    }

    fn args(&self, first: usize, n: usize) -> Vec<Value> {
        (first..first + n).map(|i| self.reg(i)).collect()
    }

    fn set_stack(&mut self, dst: usize, v: Value) {
        if self.stack.len() <= dst {
            self.stack.resize(dst + 1, Value::Nil);
        }
        self.stack[dst] = v;
    }
}

impl Default for ExeState {
    fn default() -> Self {
        Self::new()
    }
}

type OpError = (&'static str, String);

fn arith_error(v: &Value) -> OpError {
    ("TypeError", format!("attempt to perform arithmetic on a {} value", v.type_name()))
}

fn to_float(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

fn unary(op: UnOp, v: &Value) -> Result<Value, OpError> {
    match (op, v) {
        (UnOp::Neg, Value::Integer(i)) => Ok(Value::Integer(i.wrapping_neg())),
        (UnOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnOp::Neg, v) => Err(arith_error(v)),
        (UnOp::Not, v) => Ok(Value::Boolean(!v.is_truthy())),
        (UnOp::Len, Value::String(s)) => Ok(Value::Integer(s.len() as i64)),
        (UnOp::Len, Value::Array(items)) => Ok(Value::Integer(items.len() as i64)),
        (UnOp::Len, v) => Err(("TypeError", format!("attempt to get length of a {} value", v.type_name()))),
    }
}

fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, OpError> {
    use Value::{Float, Integer};

    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul => match (a, b) {
            (Integer(x), Integer(y)) => Ok(Integer(match op {
                BinOp::Add => x.wrapping_add(*y),
                BinOp::Sub => x.wrapping_sub(*y),
                _ => x.wrapping_mul(*y),
            })),
            _ => {
                let x = to_float(a).ok_or_else(|| arith_error(a))?;
                let y = to_float(b).ok_or_else(|| arith_error(b))?;
                Ok(Float(match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    _ => x * y,
                }))
            }
        },
        BinOp::Idiv | BinOp::Mod => match (a, b) {
            (Integer(_), Integer(0)) => Err(("ZeroDivisionError", "divided by 0".into())),
            (Integer(x), Integer(y)) => {
                let (q, r) = (x.wrapping_div(*y), x.wrapping_rem(*y));
                let floor = r != 0 && (r < 0) != (*y < 0);
                Ok(Integer(match (op, floor) {
                    (BinOp::Idiv, true) => q - 1,
                    (BinOp::Idiv, false) => q,
                    (_, true) => r + y,
                    (_, false) => r,
                }))
            }
            _ => {
                let x = to_float(a).ok_or_else(|| arith_error(a))?;
                let y = to_float(b).ok_or_else(|| arith_error(b))?;
                let q = (x / y).floor();
                Ok(Float(if op == BinOp::Idiv { q } else { x - q * y }))
            }
        },
        BinOp::Div | BinOp::Pow => {
            let x = to_float(a).ok_or_else(|| arith_error(a))?;
            let y = to_float(b).ok_or_else(|| arith_error(b))?;
            Ok(Float(if op == BinOp::Div { x / y } else { x.powf(y) }))
        }
        BinOp::Concat => match (a, b) {
            (
                Value::String(_) | Integer(_) | Float(_),
                Value::String(_) | Integer(_) | Float(_),
            ) => Ok(Value::String(format!("{a}{b}"))),
            (Value::String(_) | Integer(_) | Float(_), v) | (v, _) => Err((
                "TypeError",
                format!("attempt to concatenate a {} value", v.type_name()),
            )),
        },
        BinOp::Equal => Ok(Value::Boolean(a == b)),
        BinOp::NotEq => Ok(Value::Boolean(a != b)),
        BinOp::Less | BinOp::LesEq | BinOp::Greater | BinOp::GreEq => {
            let ord = match (a, b) {
                (Integer(x), Integer(y)) => x.partial_cmp(y),
                (Value::String(x), Value::String(y)) => x.partial_cmp(y),
                _ => match (to_float(a), to_float(b)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => {
                        return Err((
                            "ArgumentError",
                            format!("comparison of {} with {} failed", a.type_name(), b.type_name()),
                        ))
                    }
                },
            };
            let r = match (op, ord) {
                (_, None) => false,
                (BinOp::Less, Some(o)) => o.is_lt(),
                (BinOp::LesEq, Some(o)) => o.is_le(),
                (BinOp::Greater, Some(o)) => o.is_gt(),
                (_, Some(o)) => o.is_ge(),
            };
            Ok(Value::Boolean(r))
        }
    }
}

fn lib_print(state: &mut ExeState, args: &[Value]) -> Exec<Value> {
    let line: Vec<String> = args.iter().map(Value::to_string).collect();
    if let Err(err) = writeln!(state.out, "{}", line.join("\t")) {
        return Err(state.raise("IOError", err.to_string(), 0));
    }
    Ok(Value::Nil)
}

fn lib_p(state: &mut ExeState, args: &[Value]) -> Exec<Value> {
    for v in args {
        if let Err(err) = writeln!(state.out, "{}", v.inspect()) {
            return Err(state.raise("IOError", err.to_string(), 0));
        }
    }
    Ok(args.first().cloned().unwrap_or(Value::Nil))
}

fn lib_error(state: &mut ExeState, args: &[Value]) -> Exec<Value> {
    let message = match args.first() {
        Some(v) => v.to_string(),
        None => "unhandled exception".to_string(),
    };
    Err(state.raise("RuntimeError", message, 0))
}

fn lib_tostring(_state: &mut ExeState, args: &[Value]) -> Exec<Value> {
    Ok(Value::String(args.first().unwrap_or(&Value::Nil).to_string()))
}

fn lib_type(_state: &mut ExeState, args: &[Value]) -> Exec<Value> {
    Ok(Value::String(args.first().unwrap_or(&Value::Nil).type_name().into()))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    /// Output sink shared between the test and the interpreter.
    #[derive(Clone, Default)]
    pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl SharedBuf {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub fn state() -> (ExeState, SharedBuf) {
        let buf = SharedBuf::default();
        let mut state = ExeState::with_output(Box::new(buf.clone()));
        state.init_libs();
        (state, buf)
    }

    fn eval(state: &mut ExeState, src: &str) -> Loaded {
        let cxt = CompileContext {
            filename: Some("test.lua".into()),
            ..Default::default()
        };
        state.load(src.as_bytes(), &cxt)
    }

    #[test]
    fn prints_values() {
        let (mut state, out) = state();
        eval(&mut state, r#"print("a", 1, 2.5, nil, true, {1, "x"})"#);
        assert!(state.exception().is_none());
        assert_eq!(out.text(), "a\t1\t2.5\tnil\ttrue\t[1, \"x\"]\n");
    }

    #[test]
    fn arithmetic_and_concat() {
        let (mut state, out) = state();
        eval(
            &mut state,
            "print(7 // 2, -7 // 2, 7 % -3, 2 ^ 10, 1 / 2, \"n=\" .. 1 + 2, 3 > 2)",
        );
        assert_eq!(out.text(), "3\t-4\t-2\t1024.0\t0.5\tn=3\ttrue\n");
    }

    #[test]
    fn functions_and_conditionals() {
        let (mut state, out) = state();
        let src = "
function sign(x)
  if x < 0 then
    return -1
  elseif x == 0 then
    return 0
  else
    return 1
  end
end
print(sign(-5), sign(0), sign(9))
";
        eval(&mut state, src);
        assert!(state.exception().is_none(), "{:?}", state.exception());
        assert_eq!(out.text(), "-1\t0\t1\n");
    }

    #[test]
    fn chunk_return_value() {
        let (mut state, _) = state();
        match eval(&mut state, "local t = {10, 20}\nreturn t[2] + #t") {
            Loaded::Value(v) => assert_eq!(v, Value::Integer(22)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn no_exec_only_compiles() {
        let (mut state, out) = state();
        let cxt = CompileContext {
            no_exec: true,
            ..Default::default()
        };
        assert!(matches!(state.load(b"print(1)", &cxt), Loaded::Compiled(0)));
        assert_eq!(out.text(), "");
    }

    #[test]
    fn syntax_error_is_pending() {
        let (mut state, out) = state();
        assert!(matches!(eval(&mut state, "print(1"), Loaded::Undef));
        let exc = state.exception().unwrap();
        assert_eq!(exc.class, "SyntaxError");
        assert!(out.text().starts_with("test.lua:1: "));
    }

    #[test]
    fn error_keeps_call_frames() {
        let (mut state, _) = state();
        eval(&mut state, "function f()\n  error(\"boom\")\nend\nf()\n");
        let exc = state.exception().unwrap().clone();
        assert_eq!(exc.class, "RuntimeError");
        assert_eq!(exc.message, "boom");
        assert_eq!(exc.position, Some(("test.lua".into(), 2)));
        assert_eq!(exc.inspect(), "test.lua:2: boom (RuntimeError)");

        let cis = state.call_infos();
        assert_eq!(cis.len(), 3);
        assert_eq!(exc.ciidx, 2);
        assert!(matches!(cis[2].proc, Proc::Native("error")));
        assert_eq!(cis[1].mid.as_deref(), Some("f"));
        assert_eq!(cis[0].mid, None);
    }

    #[test]
    fn calling_nil_raises_in_caller() {
        let (mut state, _) = state();
        eval(&mut state, "x = 1\nmissing(x)\n");
        let exc = state.exception().unwrap();
        assert_eq!(exc.class, "NoMethodError");
        assert_eq!(exc.ciidx, 0);
        assert_eq!(exc.position, Some(("test.lua".into(), 2)));
    }

    #[test]
    fn constants_cannot_be_reassigned() {
        let (mut state, _) = state();
        state.define_global_const("ARGV", Value::Array(Rc::new(vec![])));
        eval(&mut state, "ARGV = 1");
        assert_eq!(state.exception().unwrap().class, "NameError");
    }

    #[test]
    fn deep_recursion_is_stopped() {
        let (mut state, _) = state();
        eval(&mut state, "function f()\n  f()\nend\nf()");
        assert_eq!(state.exception().unwrap().class, "SystemStackError");
    }

    #[test]
    fn division_by_zero() {
        let (mut state, _) = state();
        eval(&mut state, "x = 1 // 0");
        assert_eq!(state.exception().unwrap().class, "ZeroDivisionError");
    }

    #[test]
    fn dump_result_prints_listing_and_result() {
        let (mut state, out) = state();
        let cxt = CompileContext {
            filename: Some("v.lua".into()),
            dump_result: true,
            no_exec: false,
        };
        state.load(b"return 1 + 1", &cxt);
        let text = out.text();
        assert!(text.starts_with("irep (main) file=v.lua params=0\n"));
        assert!(text.ends_with("\n2\n"));
    }
}
