use std::{mem::discriminant, rc::Rc};

use anyhow::bail;

use crate::{
    bytecode::{BinOp, ByteCode, FuncProto, UnOp, NESTING_MAX},
    lex::{Lex, Token},
    value::Value,
};

const UNARY_PRIORITY: u8 = 12;

#[derive(Debug, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

/// Compiles a whole chunk into its top-level unit.
pub fn load(src: &[u8], filename: Option<&str>) -> Result<FuncProto, SyntaxError> {
    let mut lex = Lex::new(src);
    let result = ParseProto::new(&mut lex, None, filename.map(str::to_owned), Vec::new()).chunk();
    result.map_err(|err| SyntaxError {
        line: lex.current_line(),
        message: format!("{err:#}"),
    })
}

struct ParseProto<'l, 'a> {
    name: Option<String>,
    filename: Option<String>,
    params: u8,
    constants: Vec<Value>,
    byte_codes: Vec<ByteCode>,
    lines: Vec<u32>,
    protos: Vec<Rc<FuncProto>>,
    locals: Vec<String>,
    /// First free register.
    sp: usize,
    /// Function nesting; the chunk is 0.
    depth: usize,
    /// Open expressions and blocks, counted across enclosing functions.
    level: usize,
    lex: &'l mut Lex<'a>,
}

impl<'l, 'a> ParseProto<'l, 'a> {
    fn new(
        lex: &'l mut Lex<'a>,
        name: Option<String>,
        filename: Option<String>,
        params: Vec<String>,
    ) -> Self {
        Self {
            name,
            filename,
            params: params.len() as u8,
            constants: Vec::new(),
            byte_codes: Vec::new(),
            lines: Vec::new(),
            protos: Vec::new(),
            sp: params.len(),
            locals: params,
            depth: 0,
            level: 0,
            lex,
        }
    }

    fn chunk(mut self) -> anyhow::Result<FuncProto> {
        match self.block()? {
            Token::Eos => {}
            t => bail!("unexpected token: {t:?}"),
        }
        self.emit(ByteCode::ReturnNil);
        Ok(self.into_proto())
    }

    fn into_proto(self) -> FuncProto {
        FuncProto {
            name: self.name,
            filename: self.filename,
            params: self.params,
            constants: self.constants,
            byte_codes: self.byte_codes,
            lines: self.lines,
            protos: self.protos,
        }
    }

    /// Parses statements until a block terminator, which is returned.
    fn block(&mut self) -> anyhow::Result<Token> {
        loop {
            match self.lex.next()? {
                Token::SemiColon => {}
                Token::Local => self.local_stat()?,
                Token::Function => self.function_stat()?,
                Token::Return => self.return_stat()?,
                Token::If => self.if_stat()?,
                Token::Name(name) => self.assign_or_call(name)?,
                t @ (Token::End | Token::Else | Token::Elseif | Token::Eos) => return Ok(t),
                t => bail!("unexpected token: {t:?}"),
            }
            self.sp = self.locals.len();
        }
    }

    fn scoped_block(&mut self) -> anyhow::Result<Token> {
        let nlocals = self.locals.len();
        let t = self.block()?;
        self.locals.truncate(nlocals);
        self.sp = nlocals;
        Ok(t)
    }

    // local name [= exp]
    fn local_stat(&mut self) -> anyhow::Result<()> {
        let var = self.expect_name()?;
        if self.lex.peek()? == &Token::Assign {
            self.lex.next()?;
            self.exp()?;
        } else {
            let dst = self.reserve()?;
            self.emit(ByteCode::LoadNil(dst));
        }
        self.locals.push(var);
        Ok(())
    }

    // function name(params) block end
    fn function_stat(&mut self) -> anyhow::Result<()> {
        let name = self.expect_name()?;
        let proto = self.function_body(name.clone())?;
        let dst = self.reserve()?;
        let index = self.protos.len();
        if index > u16::MAX as usize {
            bail!("too many functions");
        }
        self.protos.push(Rc::new(proto));
        self.emit(ByteCode::Closure(dst, index as u16));
        self.set_var(name, dst)
    }

    fn function_body(&mut self, name: String) -> anyhow::Result<FuncProto> {
        self.expect(Token::ParL)?;
        let mut params = Vec::new();
        if self.lex.peek()? == &Token::ParR {
            self.lex.next()?;
        } else {
            loop {
                params.push(self.expect_name()?);
                match self.lex.next()? {
                    Token::Comma => {}
                    Token::ParR => break,
                    t => bail!("expected `,` or `)`, got {t:?}"),
                }
            }
        }
        if params.len() > u8::MAX as usize {
            bail!("too many parameters");
        }

        if self.depth + 1 >= NESTING_MAX {
            bail!("functions nested too deeply");
        }
        self.enter("function")?;
        let filename = self.filename.clone();
        let mut child = ParseProto::new(&mut *self.lex, Some(name), filename, params);
        child.depth = self.depth + 1;
        child.level = self.level;
        match child.block()? {
            Token::End => {}
            t => bail!("expected `end`, got {t:?}"),
        }
        child.emit(ByteCode::ReturnNil);
        let proto = child.into_proto();
        self.leave();
        Ok(proto)
    }

    // return [exp]
    fn return_stat(&mut self) -> anyhow::Result<()> {
        match self.lex.peek()? {
            Token::End | Token::Else | Token::Elseif | Token::Eos | Token::SemiColon => {
                self.emit(ByteCode::ReturnNil);
            }
            _ => {
                let src = self.exp()?;
                self.emit(ByteCode::Return(src));
            }
        }
        Ok(())
    }

    // if exp then block {elseif exp then block} [else block] end
    fn if_stat(&mut self) -> anyhow::Result<()> {
        self.enter("block")?;
        let mut jumps = Vec::new();
        loop {
            let cond = self.exp()?;
            self.expect(Token::Then)?;
            self.sp = self.locals.len();
            let test = self.emit(ByteCode::Test(cond, 0));

            match self.scoped_block()? {
                Token::End => {
                    self.patch_jump(test)?;
                    break;
                }
                Token::Else => {
                    jumps.push(self.emit(ByteCode::Jump(0)));
                    self.patch_jump(test)?;
                    match self.scoped_block()? {
                        Token::End => break,
                        t => bail!("expected `end`, got {t:?}"),
                    }
                }
                Token::Elseif => {
                    jumps.push(self.emit(ByteCode::Jump(0)));
                    self.patch_jump(test)?;
                }
                t => bail!("expected `end`, got {t:?}"),
            }
        }
        for jump in jumps {
            self.patch_jump(jump)?;
        }
        self.leave();
        Ok(())
    }

    fn assign_or_call(&mut self, name: String) -> anyhow::Result<()> {
        if self.lex.peek()? == &Token::Assign {
            self.lex.next()?;
            let src = self.exp()?;
            return self.set_var(name, src);
        }

        let dst = self.reserve()?;
        self.load_var(dst, &name)?;
        if !self.suffixes(dst)? {
            bail!("syntax error near `{name}`: expected assignment or call");
        }
        Ok(())
    }

    /// Call, index and string-call suffixes applied to the value in `dst`.
    /// Returns whether the last suffix was a call.
    fn suffixes(&mut self, dst: u8) -> anyhow::Result<bool> {
        let mut called = false;
        loop {
            match self.lex.peek()? {
                Token::ParL => {
                    self.lex.next()?;
                    let nargs = self.explist(Token::ParR)?;
                    self.emit(ByteCode::Call(dst, nargs));
                    called = true;
                }
                Token::String(_) => {
                    if let Token::String(s) = self.lex.next()? {
                        let arg = self.reserve()?;
                        self.load_const(arg, Value::String(s))?;
                    }
                    self.emit(ByteCode::Call(dst, 1));
                    called = true;
                }
                Token::SqurL => {
                    self.lex.next()?;
                    let key = self.exp()?;
                    self.expect(Token::SqurR)?;
                    self.emit(ByteCode::Index(dst, dst, key));
                    called = false;
                }
                _ => return Ok(called),
            }
            self.sp = dst as usize + 1;
        }
    }

    /// Comma separated expressions up to `close`, each in its own register.
    fn explist(&mut self, close: Token) -> anyhow::Result<u8> {
        if self.lex.peek()? == &close {
            self.lex.next()?;
            return Ok(0);
        }
        let mut n = 0usize;
        loop {
            self.exp()?;
            n += 1;
            let t = self.lex.next()?;
            if t == close {
                break;
            }
            if t != Token::Comma {
                bail!("expected `,` or {close:?}, got {t:?}");
            }
        }
        u8::try_from(n).map_err(|_| anyhow::anyhow!("too many values in list"))
    }

    fn exp(&mut self) -> anyhow::Result<u8> {
        self.exp_limit(0)
    }

    fn exp_limit(&mut self, limit: u8) -> anyhow::Result<u8> {
        self.enter("expression")?;
        let dst = match self.lex.peek()? {
            Token::Sub | Token::Not | Token::Len => {
                let op = match self.lex.next()? {
                    Token::Sub => UnOp::Neg,
                    Token::Not => UnOp::Not,
                    _ => UnOp::Len,
                };
                let dst = self.exp_limit(UNARY_PRIORITY)?;
                self.emit(ByteCode::Unary(op, dst, dst));
                dst
            }
            _ => self.simple_exp()?,
        };

        while let Some((op, left, right)) = binop_priority(self.lex.peek()?) {
            if left <= limit {
                break;
            }
            self.lex.next()?;
            let rhs = self.exp_limit(right)?;
            self.emit(ByteCode::Binary(op, dst, dst, rhs));
            self.sp = dst as usize + 1;
        }
        self.leave();
        Ok(dst)
    }

    fn simple_exp(&mut self) -> anyhow::Result<u8> {
        let dst = self.reserve()?;
        match self.lex.next()? {
            Token::Nil => {
                self.emit(ByteCode::LoadNil(dst));
            }
            Token::True => {
                self.emit(ByteCode::LoadBool(dst, true));
            }
            Token::False => {
                self.emit(ByteCode::LoadBool(dst, false));
            }
            Token::Integer(i) => {
                if let Ok(ii) = i16::try_from(i) {
                    self.emit(ByteCode::LoadInt(dst, ii));
                } else {
                    self.load_const(dst, Value::Integer(i))?;
                }
            }
            Token::Float(f) => self.load_const(dst, Value::Float(f))?,
            Token::String(s) => self.load_const(dst, Value::String(s))?,
            Token::Name(var) => {
                self.load_var(dst, &var)?;
                self.suffixes(dst)?;
            }
            Token::ParL => {
                self.sp = dst as usize;
                self.exp()?;
                self.expect(Token::ParR)?;
                self.suffixes(dst)?;
            }
            Token::CurlyL => {
                let n = self.explist(Token::CurlyR)?;
                self.emit(ByteCode::NewArray(dst, n));
                self.sp = dst as usize + 1;
                self.suffixes(dst)?;
            }
            t => bail!("unexpected token: {t:?}"),
        }
        Ok(dst)
    }

    fn set_var(&mut self, name: String, src: u8) -> anyhow::Result<()> {
        if let Some(i) = self.locals.iter().rposition(|v| v == &name) {
            self.emit(ByteCode::Move(i as u8, src));
        } else {
            let ic = self.add_const(Value::String(name))?;
            self.emit(ByteCode::SetGlobal(ic, src));
        }
        Ok(())
    }

    fn load_var(&mut self, dst: u8, name: &str) -> anyhow::Result<()> {
        if let Some(i) = self.locals.iter().rposition(|v| v == name) {
            self.emit(ByteCode::Move(dst, i as u8));
        } else {
            let ic = self.add_const(Value::String(name.to_owned()))?;
            self.emit(ByteCode::GetGlobal(dst, ic));
        }
        Ok(())
    }

    fn load_const(&mut self, dst: u8, c: Value) -> anyhow::Result<()> {
        let ic = self.add_const(c)?;
        self.emit(ByteCode::LoadConst(dst, ic));
        Ok(())
    }

    fn add_const(&mut self, c: Value) -> anyhow::Result<u16> {
        let index = self
            .constants
            .iter()
            .position(|v| discriminant(v) == discriminant(&c) && v == &c)
            .unwrap_or_else(|| {
                self.constants.push(c);
                self.constants.len() - 1
            });
        u16::try_from(index).map_err(|_| anyhow::anyhow!("too many constants"))
    }

    fn enter(&mut self, what: &str) -> anyhow::Result<()> {
        self.level += 1;
        if self.level > NESTING_MAX {
            bail!("{what} nested too deeply");
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.level -= 1;
    }

    fn reserve(&mut self) -> anyhow::Result<u8> {
        let r = self.sp;
        if r >= u8::MAX as usize {
            bail!("expression too complex");
        }
        self.sp += 1;
        Ok(r as u8)
    }

    fn emit(&mut self, code: ByteCode) -> usize {
        self.byte_codes.push(code);
        self.lines.push(self.lex.line());
        self.byte_codes.len() - 1
    }

    fn patch_jump(&mut self, at: usize) -> anyhow::Result<()> {
        let target = u16::try_from(self.byte_codes.len())
            .map_err(|_| anyhow::anyhow!("function body too long"))?;
        if let ByteCode::Test(_, t) | ByteCode::Jump(t) = &mut self.byte_codes[at] {
            *t = target;
        }
        Ok(())
    }

    fn expect(&mut self, want: Token) -> anyhow::Result<()> {
        let t = self.lex.next()?;
        if t != want {
            bail!("expected {want:?}, got {t:?}");
        }
        Ok(())
    }

    fn expect_name(&mut self) -> anyhow::Result<String> {
        match self.lex.next()? {
            Token::Name(name) => Ok(name),
            t => bail!("expected name, got {t:?}"),
        }
    }
}

fn binop_priority(t: &Token) -> Option<(BinOp, u8, u8)> {
    let p = match t {
        Token::Pow => (BinOp::Pow, 14, 13),
        Token::Mul => (BinOp::Mul, 11, 11),
        Token::Div => (BinOp::Div, 11, 11),
        Token::Idiv => (BinOp::Idiv, 11, 11),
        Token::Mod => (BinOp::Mod, 11, 11),
        Token::Add => (BinOp::Add, 10, 10),
        Token::Sub => (BinOp::Sub, 10, 10),
        Token::Concat => (BinOp::Concat, 9, 8),
        Token::Equal => (BinOp::Equal, 3, 3),
        Token::NotEq => (BinOp::NotEq, 3, 3),
        Token::Less => (BinOp::Less, 3, 3),
        Token::LesEq => (BinOp::LesEq, 3, 3),
        Token::Greater => (BinOp::Greater, 3, 3),
        Token::GreEq => (BinOp::GreEq, 3, 3),
        _ => return None,
    };
    Some(p)
}
