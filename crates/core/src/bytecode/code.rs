//! `Code` attribute and instruction decoding.

use std::collections::BTreeSet;

use crate::bytecode::opcodes::*;
use crate::bytecode::reader::{be_i16, be_i32, ByteReader};
use crate::bytecode::AttributeInfo;
use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

/// Decoded `Code` attribute body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    Byte(i8),
    Short(i16),
    Local(u16),
    /// Constant pool index (1 or 2 bytes wide in the encoding).
    Pool(u16),
    Branch(usize),
    Iinc { local: u16, delta: i16 },
    NewArray(u8),
    MultiNewArray { class: u16, dims: u8 },
    Switch { default: usize, targets: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: u8,
    pub len: usize,
    pub operand: Operand,
}

impl Instruction {
    pub fn pool_index(&self) -> Option<u16> {
        match self.operand {
            Operand::Pool(idx) | Operand::MultiNewArray { class: idx, .. } => Some(idx),
            _ => None,
        }
    }

    pub fn branch_target(&self) -> Option<usize> {
        match self.operand {
            Operand::Branch(t) => Some(t),
            _ => None,
        }
    }

    pub fn next_offset(&self) -> usize {
        self.offset + self.len
    }
}

impl CodeAttribute {
    pub(crate) fn parse(info: &[u8]) -> Result<Self, ParseError> {
        let mut r = ByteReader::new(info);
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_len = r.u32()? as usize;
        if code_len == 0 || code_len > 65535 {
            return Err(ParseError::MalformedCode(format!("code length {code_len}")));
        }
        let code = r.bytes(code_len)?.to_vec();
        let table_len = r.u16()? as usize;
        let mut exception_table = Vec::with_capacity(table_len);
        for _ in 0..table_len {
            exception_table.push(ExceptionEntry {
                start_pc: r.u16()?,
                end_pc: r.u16()?,
                handler_pc: r.u16()?,
                catch_type: r.u16()?,
            });
        }
        let attributes = AttributeInfo::parse_list(&mut r)?;
        if r.remaining() != 0 {
            return Err(ParseError::MalformedCode(format!(
                "{} unread byte(s) in Code attribute",
                r.remaining()
            )));
        }
        let attr = Self { max_stack, max_locals, code, exception_table, attributes };
        attr.instructions()?;
        Ok(attr)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.code.len());
        out.extend_from_slice(&self.max_stack.to_be_bytes());
        out.extend_from_slice(&self.max_locals.to_be_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&(self.exception_table.len() as u16).to_be_bytes());
        for e in &self.exception_table {
            for v in [e.start_pc, e.end_pc, e.handler_pc, e.catch_type] {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        AttributeInfo::write_list(&self.attributes, &mut out);
        out
    }

    /// Decode the instruction stream.
    pub fn instructions(&self) -> Result<Vec<Instruction>, ParseError> {
        decode(&self.code)
    }

    /// Offsets that some branch, switch or exception handler can transfer control to.
    pub fn jump_targets(&self, insns: &[Instruction]) -> BTreeSet<usize> {
        let mut targets = BTreeSet::new();
        for insn in insns {
            match &insn.operand {
                Operand::Branch(t) => {
                    targets.insert(*t);
                }
                Operand::Switch { default, targets: ts } => {
                    targets.insert(*default);
                    targets.extend(ts.iter().copied());
                }
                _ => {}
            }
        }
        for e in &self.exception_table {
            targets.insert(e.handler_pc as usize);
        }
        targets
    }

    /// Rewrite the branch operand of `insn` to jump to `target`.
    ///
    /// Returns `false` (and leaves the code untouched) if the new offset does not fit.
    pub fn retarget(&mut self, insn: &Instruction, target: usize) -> bool {
        let delta = target as i64 - insn.offset as i64;
        match insn.opcode {
            GOTO_W | JSR_W => {
                let Ok(delta) = i32::try_from(delta) else { return false };
                self.code[insn.offset + 1..insn.offset + 5].copy_from_slice(&delta.to_be_bytes());
                true
            }
            op if is_conditional(op) || op == GOTO || op == JSR => {
                let Ok(delta) = i16::try_from(delta) else { return false };
                self.code[insn.offset + 1..insn.offset + 3].copy_from_slice(&delta.to_be_bytes());
                true
            }
            _ => false,
        }
    }

    /// Overwrite `insn` with `nop`s.
    pub fn nop_out(&mut self, insn: &Instruction) {
        for b in &mut self.code[insn.offset..insn.offset + insn.len] {
            *b = NOP;
        }
    }
}

/// Decode a raw instruction stream, validating opcodes and branch targets.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>, ParseError> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let insn = decode_one(code, pc)?;
        pc = insn.next_offset();
        out.push(insn);
    }
    let starts: BTreeSet<usize> = out.iter().map(|i| i.offset).collect();
    for insn in &out {
        let check = |t: usize| -> Result<(), ParseError> {
            if starts.contains(&t) {
                Ok(())
            } else {
                Err(ParseError::BadBranch { offset: insn.offset, target: t as i64 })
            }
        };
        match &insn.operand {
            Operand::Branch(t) => check(*t)?,
            Operand::Switch { default, targets } => {
                check(*default)?;
                for t in targets {
                    check(*t)?;
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn need(code: &[u8], pc: usize, len: usize) -> Result<(), ParseError> {
    if pc + len > code.len() {
        Err(ParseError::Truncated { offset: pc, needed: pc + len - code.len() })
    } else {
        Ok(())
    }
}

fn branch(code: &[u8], pc: usize, delta: i64) -> Result<usize, ParseError> {
    let target = pc as i64 + delta;
    if target < 0 || target >= code.len() as i64 {
        return Err(ParseError::BadBranch { offset: pc, target });
    }
    Ok(target as usize)
}

fn decode_one(code: &[u8], pc: usize) -> Result<Instruction, ParseError> {
    let opcode = code[pc];
    let u16_at = |at: usize| u16::from_be_bytes([code[at], code[at + 1]]);
    let (len, operand) = match opcode {
        0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe | 0xbf
        | 0xc2 | 0xc3 => (1, Operand::None),
        BIPUSH => {
            need(code, pc, 2)?;
            (2, Operand::Byte(code[pc + 1] as i8))
        }
        SIPUSH => {
            need(code, pc, 3)?;
            (3, Operand::Short(be_i16(code, pc + 1)))
        }
        LDC => {
            need(code, pc, 2)?;
            (2, Operand::Pool(code[pc + 1] as u16))
        }
        LDC_W | LDC2_W | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
            need(code, pc, 3)?;
            (3, Operand::Pool(u16_at(pc + 1)))
        }
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
            need(code, pc, 2)?;
            (2, Operand::Local(code[pc + 1] as u16))
        }
        IINC => {
            need(code, pc, 3)?;
            (3, Operand::Iinc { local: code[pc + 1] as u16, delta: code[pc + 2] as i8 as i16 })
        }
        IFEQ..=JSR | IFNULL | IFNONNULL => {
            need(code, pc, 3)?;
            (3, Operand::Branch(branch(code, pc, be_i16(code, pc + 1) as i64)?))
        }
        GOTO_W | JSR_W => {
            need(code, pc, 5)?;
            (5, Operand::Branch(branch(code, pc, be_i32(code, pc + 1) as i64)?))
        }
        TABLESWITCH => {
            let base = pc + 1 + (3 - (pc % 4));
            need(code, base, 12)?;
            let default = branch(code, pc, be_i32(code, base) as i64)?;
            let low = be_i32(code, base + 4) as i64;
            let high = be_i32(code, base + 8) as i64;
            if high < low {
                return Err(ParseError::MalformedCode(format!("tableswitch at {pc}: high < low")));
            }
            let count = (high - low + 1) as usize;
            need(code, base + 12, count.saturating_mul(4))?;
            let mut targets = Vec::with_capacity(count);
            for i in 0..count {
                targets.push(branch(code, pc, be_i32(code, base + 12 + i * 4) as i64)?);
            }
            (base + 12 + count * 4 - pc, Operand::Switch { default, targets })
        }
        LOOKUPSWITCH => {
            let base = pc + 1 + (3 - (pc % 4));
            need(code, base, 8)?;
            let default = branch(code, pc, be_i32(code, base) as i64)?;
            let npairs = be_i32(code, base + 4);
            if npairs < 0 {
                return Err(ParseError::MalformedCode(format!("lookupswitch at {pc}: npairs < 0")));
            }
            let npairs = npairs as usize;
            need(code, base + 8, npairs.saturating_mul(8))?;
            let mut targets = Vec::with_capacity(npairs);
            for i in 0..npairs {
                targets.push(branch(code, pc, be_i32(code, base + 12 + i * 8) as i64)?);
            }
            (base + 8 + npairs * 8 - pc, Operand::Switch { default, targets })
        }
        INVOKEINTERFACE | INVOKEDYNAMIC => {
            need(code, pc, 5)?;
            (5, Operand::Pool(u16_at(pc + 1)))
        }
        NEWARRAY => {
            need(code, pc, 2)?;
            (2, Operand::NewArray(code[pc + 1]))
        }
        MULTIANEWARRAY => {
            need(code, pc, 4)?;
            (4, Operand::MultiNewArray { class: u16_at(pc + 1), dims: code[pc + 3] })
        }
        WIDE => {
            need(code, pc, 2)?;
            match code[pc + 1] {
                IINC => {
                    need(code, pc, 6)?;
                    (6, Operand::Iinc { local: u16_at(pc + 2), delta: be_i16(code, pc + 4) })
                }
                ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
                    need(code, pc, 4)?;
                    (4, Operand::Local(u16_at(pc + 2)))
                }
                other => return Err(ParseError::BadOpcode { opcode: other, offset: pc + 1 }),
            }
        }
        other => return Err(ParseError::BadOpcode { opcode: other, offset: pc }),
    };
    Ok(Instruction { offset: pc, opcode, len, operand })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_branches_to_absolute_targets() {
        // 0: iconst_0, 1: ifeq +4 -> 5, 4: nop, 5: return
        let code = [0x03, IFEQ, 0x00, 0x04, NOP, RETURN];
        let insns = decode(&code).unwrap();
        assert_eq!(insns.len(), 4);
        assert_eq!(insns[1].branch_target(), Some(5));
    }

    #[test]
    fn tableswitch_respects_alignment() {
        // 0: iconst_0, 1: tableswitch (pad 2) default=+23 low=0 high=1 -> +23, +23 ; 24: return
        let mut code = vec![0x03, TABLESWITCH, 0, 0];
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&23i32.to_be_bytes());
        code.push(RETURN);
        let insns = decode(&code).unwrap();
        assert_eq!(insns[1].len, 23);
        assert_eq!(insns[2].offset, 24);
        match &insns[1].operand {
            Operand::Switch { default, targets } => {
                assert_eq!(*default, 24);
                assert_eq!(targets, &vec![24, 24]);
            }
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn branch_into_middle_of_instruction_is_rejected() {
        // 0: goto +2 (into the operand bytes of itself)
        let code = [GOTO, 0x00, 0x02, RETURN];
        assert!(matches!(decode(&code), Err(ParseError::BadBranch { offset: 0, .. })));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(matches!(decode(&[0xcb]), Err(ParseError::BadOpcode { opcode: 0xcb, .. })));
    }

    #[test]
    fn wide_iinc_is_six_bytes() {
        let code = [WIDE, IINC, 0x01, 0x00, 0x00, 0x05, RETURN];
        let insns = decode(&code).unwrap();
        assert_eq!(insns[0].len, 6);
        assert_eq!(insns[0].operand, Operand::Iinc { local: 256, delta: 5 });
    }
}
