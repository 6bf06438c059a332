use std::{fmt, io::Write, rc::Rc};

use crate::value::Value;

/// Deepest nesting accepted for functions and for syntax within a unit.
pub const NESTING_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Idiv,
    Mod,
    Pow,
    Concat,
    Equal,
    NotEq,
    Less,
    LesEq,
    Greater,
    GreEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

/// Register machine instructions. Registers are relative to the frame base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ByteCode {
    GetGlobal(u8, u16),
    SetGlobal(u16, u8),
    LoadConst(u8, u16),
    LoadNil(u8),
    LoadBool(u8, bool),
    LoadInt(u8, i16),
    Move(u8, u8),
    Closure(u8, u16),
    /// Builds an array in the first register from the `n` registers after it.
    NewArray(u8, u8),
    Index(u8, u8, u8),
    Unary(UnOp, u8, u8),
    Binary(BinOp, u8, u8, u8),
    /// Jumps to the absolute target when the register is falsy.
    Test(u8, u16),
    Jump(u16),
    /// Calls the function in the register with `n` following arguments;
    /// the result replaces the function.
    Call(u8, u8),
    Return(u8),
    ReturnNil,
}

/// A compiled unit: the top-level chunk or one function body.
#[derive(Debug, Default)]
pub struct FuncProto {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub params: u8,
    pub constants: Vec<Value>,
    pub byte_codes: Vec<ByteCode>,
    /// Source line of each instruction, parallel to `byte_codes`.
    pub lines: Vec<u32>,
    pub protos: Vec<Rc<FuncProto>>,
}

impl FuncProto {
    /// Line of the instruction just executed when the program counter
    /// stands at `pc`.
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        if pc >= 1 && pc <= self.lines.len() {
            Some(self.lines[pc - 1])
        } else {
            None
        }
    }

    /// Writes a readable listing of this unit and its children.
    pub fn dump_codes(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "irep {} file={} params={}",
            self.name.as_deref().unwrap_or("(main)"),
            self.filename.as_deref().unwrap_or("(unknown)"),
            self.params
        )?;
        for (i, c) in self.constants.iter().enumerate() {
            writeln!(out, "  const[{i}] {}", c.inspect())?;
        }
        for (pc, (code, line)) in self.byte_codes.iter().zip(&self.lines).enumerate() {
            writeln!(out, "  {pc:04} {line:>4}  {code}")?;
        }
        for p in &self.protos {
            p.dump_codes(out)?;
        }
        Ok(())
    }
}

impl fmt::Display for ByteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(op, a, b) => write!(f, "{op:?} R{a} R{b}"),
            Self::Binary(op, a, b, c) => write!(f, "{op:?} R{a} R{b} R{c}"),
            code => write!(f, "{code:?}"),
        }
    }
}
