//! Control-flow cleanup inside a single method body.
//!
//! Both rewrites keep every instruction at its original offset: jump threading only patches
//! branch operands, and a collapsed branch becomes `pop`/`pop2` followed by `nop`s.

use std::collections::{BTreeMap, BTreeSet};

use crate::bytecode::opcodes::*;
use crate::bytecode::{CodeAttribute, Instruction, Operand};
use crate::error::ParseError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlowStats {
    pub jumps_threaded: usize,
    pub branches_collapsed: usize,
}

impl FlowStats {
    pub fn is_empty(&self) -> bool {
        self.jumps_threaded == 0 && self.branches_collapsed == 0
    }

    pub fn merge(&mut self, other: FlowStats) {
        self.jumps_threaded += other.jumps_threaded;
        self.branches_collapsed += other.branches_collapsed;
    }
}

struct Body<'a> {
    insns: &'a [Instruction],
    by_offset: BTreeMap<usize, usize>,
}

impl<'a> Body<'a> {
    fn new(insns: &'a [Instruction]) -> Self {
        let by_offset = insns.iter().enumerate().map(|(i, insn)| (insn.offset, i)).collect();
        Self { insns, by_offset }
    }

    fn at(&self, offset: usize) -> Option<&'a Instruction> {
        self.by_offset.get(&offset).map(|&i| &self.insns[i])
    }

    /// Final destination of a chain of unconditional jumps starting at `offset`.
    fn resolve(&self, offset: usize) -> usize {
        let mut seen = BTreeSet::new();
        let mut current = offset;
        while seen.insert(current) {
            match self.at(current) {
                Some(insn) if matches!(insn.opcode, GOTO | GOTO_W) => match insn.branch_target() {
                    Some(next) => current = next,
                    None => return current,
                },
                _ => return current,
            }
        }
        // Cycle of gotos: leave the branch alone.
        offset
    }

    /// Byte range of the straight-line block at `offset` ending in a return or `athrow`.
    fn terminal_block(&self, offset: usize) -> Option<(usize, usize)> {
        let mut i = *self.by_offset.get(&offset)?;
        loop {
            let insn = self.insns.get(i)?;
            if is_return(insn.opcode) || insn.opcode == ATHROW {
                return Some((offset, insn.next_offset()));
            }
            let transfers = matches!(insn.operand, Operand::Branch(_) | Operand::Switch { .. })
                || ends_block(insn.opcode)
                || matches!(insn.opcode, JSR | JSR_W | RET);
            if transfers {
                return None;
            }
            i += 1;
        }
    }
}

fn covered_by_handler(code: &CodeAttribute, (start, end): (usize, usize)) -> bool {
    code.exception_table
        .iter()
        .any(|e| (e.start_pc as usize) < end && start < e.end_pc as usize)
}

/// Thread jump chains, then collapse branches whose arms do the same thing.
pub fn simplify(code: &mut CodeAttribute) -> Result<FlowStats, ParseError> {
    let mut stats = FlowStats::default();

    let insns = code.instructions()?;
    let body = Body::new(&insns);
    let mut patches = Vec::new();
    for insn in &insns {
        if !(is_conditional(insn.opcode) || matches!(insn.opcode, GOTO | GOTO_W)) {
            continue;
        }
        let Some(target) = insn.branch_target() else { continue };
        let resolved = body.resolve(target);
        if resolved != target {
            patches.push((insn.clone(), resolved));
        }
    }
    for (insn, target) in patches {
        if code.retarget(&insn, target) {
            stats.jumps_threaded += 1;
        }
    }

    let insns = code.instructions()?;
    let body = Body::new(&insns);
    let mut collapse = Vec::new();
    for insn in &insns {
        if !is_conditional(insn.opcode) {
            continue;
        }
        let Some(target) = insn.branch_target() else { continue };
        let taken = body.resolve(target);
        let fall = body.resolve(insn.next_offset());
        let same = taken == fall
            || match (body.terminal_block(taken), body.terminal_block(fall)) {
                (Some(a), Some(b)) => {
                    code.code[a.0..a.1] == code.code[b.0..b.1]
                        && !covered_by_handler(code, a)
                        && !covered_by_handler(code, b)
                }
                _ => false,
            };
        if same {
            collapse.push(insn.clone());
        }
    }
    for insn in collapse {
        code.nop_out(&insn);
        code.code[insn.offset] = if is_binary_if(insn.opcode) { POP2 } else { POP };
        stats.branches_collapsed += 1;
    }

    Ok(stats)
}
