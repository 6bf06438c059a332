//! Binary form of compiled units.
//!
//! Layout: `RITE` magic, `0001` version, then one unit. A unit is its
//! name, filename, parameter count, constants, instructions, line table
//! and child units, in that order. Integers are little-endian and strings
//! are a `u32` length followed by UTF-8 bytes.

use std::{io::Write, rc::Rc};

use anyhow::{bail, ensure, Context};

use crate::{
    bytecode::{BinOp, ByteCode, FuncProto, UnOp, NESTING_MAX},
    value::Value,
};

pub const MAGIC: &[u8; 4] = b"RITE";
pub const FORMAT_VERSION: &[u8; 4] = b"0001";

const BINOPS: [BinOp; 14] = [
    BinOp::Add,
    BinOp::Sub,
    BinOp::Mul,
    BinOp::Div,
    BinOp::Idiv,
    BinOp::Mod,
    BinOp::Pow,
    BinOp::Concat,
    BinOp::Equal,
    BinOp::NotEq,
    BinOp::Less,
    BinOp::LesEq,
    BinOp::Greater,
    BinOp::GreEq,
];
const UNOPS: [UnOp; 3] = [UnOp::Neg, UnOp::Not, UnOp::Len];

pub fn dump(proto: &FuncProto) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(FORMAT_VERSION);
    write_proto(&mut buf, proto, 0)?;
    Ok(buf)
}

pub fn write_irep(proto: &FuncProto, out: &mut dyn Write) -> anyhow::Result<()> {
    out.write_all(&dump(proto)?)?;
    out.flush()?;
    Ok(())
}

/// Writes the dumped unit as a C array named `symbol`.
pub fn write_irep_c(proto: &FuncProto, out: &mut dyn Write, symbol: &str) -> anyhow::Result<()> {
    let bytes = dump(proto)?;
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out, "const uint8_t {symbol}[] = {{")?;
    for chunk in bytes.chunks(16) {
        let line: Vec<String> = chunk.iter().map(|b| format!("0x{b:02x}")).collect();
        writeln!(out, "{},", line.join(","))?;
    }
    writeln!(out, "}};")?;
    out.flush()?;
    Ok(())
}

pub fn load(bytes: &[u8]) -> anyhow::Result<FuncProto> {
    let mut r = Reader { bytes, pos: 0 };
    ensure!(r.take(4)? == MAGIC, "not a bytecode file");
    let version = r.take(4)?;
    ensure!(
        version == FORMAT_VERSION,
        "unsupported bytecode version {}",
        String::from_utf8_lossy(version)
    );
    let proto = read_proto(&mut r, 0)?;
    ensure!(r.pos == bytes.len(), "trailing data after unit");
    Ok(proto)
}

fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_len(buf: &mut Vec<u8>, len: usize) -> anyhow::Result<()> {
    write_u32(buf, u32::try_from(len).context("unit too large")?);
    Ok(())
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> anyhow::Result<()> {
    write_len(buf, s.len())?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_opt_str(buf: &mut Vec<u8>, s: Option<&str>) -> anyhow::Result<()> {
    match s {
        Some(s) => {
            write_u8(buf, 1);
            write_str(buf, s)
        }
        None => {
            write_u8(buf, 0);
            Ok(())
        }
    }
}

fn write_proto(buf: &mut Vec<u8>, proto: &FuncProto, depth: usize) -> anyhow::Result<()> {
    ensure!(depth < NESTING_MAX, "units nested too deeply");
    write_opt_str(buf, proto.name.as_deref())?;
    write_opt_str(buf, proto.filename.as_deref())?;
    write_u8(buf, proto.params);

    write_len(buf, proto.constants.len())?;
    for c in &proto.constants {
        match c {
            Value::Nil => write_u8(buf, 0),
            Value::Boolean(false) => write_u8(buf, 1),
            Value::Boolean(true) => write_u8(buf, 2),
            Value::Integer(i) => {
                write_u8(buf, 3);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(n) => {
                write_u8(buf, 4);
                buf.extend_from_slice(&n.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                write_u8(buf, 5);
                write_str(buf, s)?;
            }
            v => bail!("cannot dump {} constant", v.type_name()),
        }
    }

    write_len(buf, proto.byte_codes.len())?;
    for code in &proto.byte_codes {
        write_code(buf, *code);
    }
    for line in &proto.lines {
        write_u32(buf, *line);
    }

    write_len(buf, proto.protos.len())?;
    for p in &proto.protos {
        write_proto(buf, p, depth + 1)?;
    }
    Ok(())
}

fn binop_index(op: BinOp) -> u8 {
    BINOPS.iter().position(|o| *o == op).unwrap_or(0) as u8
}

fn unop_index(op: UnOp) -> u8 {
    UNOPS.iter().position(|o| *o == op).unwrap_or(0) as u8
}

fn write_code(buf: &mut Vec<u8>, code: ByteCode) {
    match code {
        ByteCode::GetGlobal(a, b) => {
            write_u8(buf, 0);
            write_u8(buf, a);
            write_u16(buf, b);
        }
        ByteCode::SetGlobal(a, b) => {
            write_u8(buf, 1);
            write_u16(buf, a);
            write_u8(buf, b);
        }
        ByteCode::LoadConst(a, b) => {
            write_u8(buf, 2);
            write_u8(buf, a);
            write_u16(buf, b);
        }
        ByteCode::LoadNil(a) => {
            write_u8(buf, 3);
            write_u8(buf, a);
        }
        ByteCode::LoadBool(a, b) => {
            write_u8(buf, 4);
            write_u8(buf, a);
            write_u8(buf, b as u8);
        }
        ByteCode::LoadInt(a, i) => {
            write_u8(buf, 5);
            write_u8(buf, a);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        ByteCode::Move(a, b) => {
            write_u8(buf, 6);
            write_u8(buf, a);
            write_u8(buf, b);
        }
        ByteCode::Closure(a, b) => {
            write_u8(buf, 7);
            write_u8(buf, a);
            write_u16(buf, b);
        }
        ByteCode::NewArray(a, n) => {
            write_u8(buf, 8);
            write_u8(buf, a);
            write_u8(buf, n);
        }
        ByteCode::Index(a, b, c) => {
            write_u8(buf, 9);
            buf.extend_from_slice(&[a, b, c]);
        }
        ByteCode::Unary(op, a, b) => {
            write_u8(buf, 10);
            buf.extend_from_slice(&[unop_index(op), a, b]);
        }
        ByteCode::Binary(op, a, b, c) => {
            write_u8(buf, 11);
            buf.extend_from_slice(&[binop_index(op), a, b, c]);
        }
        ByteCode::Test(a, t) => {
            write_u8(buf, 12);
            write_u8(buf, a);
            write_u16(buf, t);
        }
        ByteCode::Jump(t) => {
            write_u8(buf, 13);
            write_u16(buf, t);
        }
        ByteCode::Call(a, n) => {
            write_u8(buf, 14);
            write_u8(buf, a);
            write_u8(buf, n);
        }
        ByteCode::Return(a) => {
            write_u8(buf, 15);
            write_u8(buf, a);
        }
        ByteCode::ReturnNil => write_u8(buf, 16),
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .context("truncated bytecode")?;
        let s = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        let mut a = [0; N];
        a.copy_from_slice(self.take(N)?);
        Ok(a)
    }

    fn u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> anyhow::Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn len(&mut self) -> anyhow::Result<usize> {
        Ok(self.u32()? as usize)
    }

    fn string(&mut self) -> anyhow::Result<String> {
        let n = self.len()?;
        let s = self.take(n)?;
        Ok(std::str::from_utf8(s).context("invalid string")?.to_owned())
    }

    fn opt_string(&mut self) -> anyhow::Result<Option<String>> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.string()?)),
            t => bail!("invalid string tag {t}"),
        }
    }
}

fn read_proto(r: &mut Reader, depth: usize) -> anyhow::Result<FuncProto> {
    ensure!(depth < NESTING_MAX, "units nested too deeply");
    let name = r.opt_string()?;
    let filename = r.opt_string()?;
    let params = r.u8()?;

    let n = r.len()?;
    let mut constants = Vec::new();
    for _ in 0..n {
        let c = match r.u8()? {
            0 => Value::Nil,
            1 => Value::Boolean(false),
            2 => Value::Boolean(true),
            3 => Value::Integer(i64::from_le_bytes(r.array()?)),
            4 => Value::Float(f64::from_bits(u64::from_le_bytes(r.array()?))),
            5 => Value::String(r.string()?),
            t => bail!("invalid constant tag {t}"),
        };
        constants.push(c);
    }

    let n = r.len()?;
    let mut byte_codes = Vec::new();
    for _ in 0..n {
        byte_codes.push(read_code(r)?);
    }
    let mut lines = Vec::new();
    for _ in 0..n {
        lines.push(r.u32()?);
    }

    let n = r.len()?;
    let mut protos = Vec::new();
    for _ in 0..n {
        protos.push(Rc::new(read_proto(r, depth + 1)?));
    }

    let proto = FuncProto {
        name,
        filename,
        params,
        constants,
        byte_codes,
        lines,
        protos,
    };
    validate(&proto)?;
    Ok(proto)
}

fn read_code(r: &mut Reader) -> anyhow::Result<ByteCode> {
    let code = match r.u8()? {
        0 => ByteCode::GetGlobal(r.u8()?, r.u16()?),
        1 => ByteCode::SetGlobal(r.u16()?, r.u8()?),
        2 => ByteCode::LoadConst(r.u8()?, r.u16()?),
        3 => ByteCode::LoadNil(r.u8()?),
        4 => ByteCode::LoadBool(r.u8()?, r.u8()? != 0),
        5 => ByteCode::LoadInt(r.u8()?, i16::from_le_bytes(r.array()?)),
        6 => ByteCode::Move(r.u8()?, r.u8()?),
        7 => ByteCode::Closure(r.u8()?, r.u16()?),
        8 => ByteCode::NewArray(r.u8()?, r.u8()?),
        9 => ByteCode::Index(r.u8()?, r.u8()?, r.u8()?),
        10 => {
            let op = *UNOPS.get(r.u8()? as usize).context("invalid operator")?;
            ByteCode::Unary(op, r.u8()?, r.u8()?)
        }
        11 => {
            let op = *BINOPS.get(r.u8()? as usize).context("invalid operator")?;
            ByteCode::Binary(op, r.u8()?, r.u8()?, r.u8()?)
        }
        12 => ByteCode::Test(r.u8()?, r.u16()?),
        13 => ByteCode::Jump(r.u16()?),
        14 => ByteCode::Call(r.u8()?, r.u8()?),
        15 => ByteCode::Return(r.u8()?),
        16 => ByteCode::ReturnNil,
        op => bail!("invalid opcode {op}"),
    };
    Ok(code)
}

/// Rejects references the interpreter would index out of range.
fn validate(proto: &FuncProto) -> anyhow::Result<()> {
    let n = proto.byte_codes.len();
    for code in &proto.byte_codes {
        let ok = match *code {
            ByteCode::GetGlobal(_, c) | ByteCode::SetGlobal(c, _) => {
                matches!(proto.constants.get(c as usize), Some(Value::String(_)))
            }
            ByteCode::LoadConst(_, c) => (c as usize) < proto.constants.len(),
            ByteCode::Closure(_, p) => (p as usize) < proto.protos.len(),
            ByteCode::Test(_, t) | ByteCode::Jump(t) => t as usize <= n,
            _ => true,
        };
        ensure!(ok, "invalid instruction {code}");
    }
    Ok(())
}
