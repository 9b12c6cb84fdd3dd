//! Disassembler: converts a [`FuncDef`] back to a human-readable listing.
//!
//! Used by `insta` snapshot tests and by diagnostic tooling; never by the
//! (out-of-scope) VM interpreter itself.

use super::{Instruction, Opcode};
use crate::funcdef::FuncDef;
use std::fmt::Write;

/// Disassemble a function and, recursively, every nested `fn` it defines.
///
/// # Format
/// ```text
/// === Constants ===
/// 0: 42
/// 1: "hello"
///
/// === Instructions ===
/// 0000  loadconst r0 <- 0
/// 0001  return r0
/// ```
pub fn disassemble(def: &FuncDef) -> String {
    let mut out = String::new();
    disassemble_into(&mut out, def, 0);
    out
}

fn disassemble_into(out: &mut String, def: &FuncDef, depth: usize) {
    let indent = "  ".repeat(depth);
    writeln!(
        out,
        "{indent}fn arity={} frame_size={} envs={:?}",
        def.arity, def.frame_size, def.envs
    )
    .unwrap();

    if !def.constants.is_empty() {
        writeln!(out, "{indent}=== Constants ===").unwrap();
        for (idx, constant) in def.constants.iter().enumerate() {
            writeln!(out, "{indent}{}: {}", idx, constant.to_display_string()).unwrap();
        }
    }

    writeln!(out, "{indent}=== Instructions ===").unwrap();
    for (offset, instr) in def.bytecode.iter().enumerate() {
        writeln!(out, "{indent}{:04}  {}", offset, format_instruction(*instr, offset)).unwrap();
    }

    for (idx, nested) in def.defs.iter().enumerate() {
        writeln!(out, "{indent}--- nested def {} ---", idx).unwrap();
        disassemble_into(out, nested, depth + 1);
    }
}

fn format_instruction(instr: Instruction, offset: usize) -> String {
    let op = instr.opcode();
    match op {
        Opcode::Noop | Opcode::ReturnNil => op.mnemonic().to_string(),

        Opcode::LoadConst | Opcode::Closure => {
            format!("{} r{} <- #{}", op.mnemonic(), instr.a(), instr.bx())
        }

        Opcode::LoadNil | Opcode::Return => {
            format!("{} r{}", op.mnemonic(), instr.a())
        }

        Opcode::Move => format!("{} r{} <- r{}", op.mnemonic(), instr.a(), instr.b()),

        Opcode::GetUpvalue => format!(
            "{} r{} <- env[{}][{}]",
            op.mnemonic(),
            instr.a(),
            instr.b(),
            instr.c()
        ),
        Opcode::SetUpvalue => format!(
            "{} env[{}][{}] <- r{}",
            op.mnemonic(),
            instr.b(),
            instr.c(),
            instr.a()
        ),
        Opcode::SetRef => format!("{} *r{} <- r{}", op.mnemonic(), instr.a(), instr.b()),

        Opcode::Jump => {
            let target = (offset as i64 + 1 + instr.sbx() as i64).max(0) as usize;
            format!("{} {} (-> {:04})", op.mnemonic(), instr.sbx(), target)
        }
        Opcode::JumpIfFalse => {
            let target = (offset as i64 + 1 + instr.sbx() as i64).max(0) as usize;
            format!(
                "{} r{} {} (-> {:04})",
                op.mnemonic(),
                instr.a(),
                instr.sbx(),
                target
            )
        }

        Opcode::Call | Opcode::TailCall => format!(
            "{} r{} argc={}",
            op.mnemonic(),
            instr.a(),
            instr.c()
        ),

        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Lt
        | Opcode::Lte
        | Opcode::Eq => format!(
            "{} r{} <- r{}, r{}",
            op.mnemonic(),
            instr.a(),
            instr.b(),
            instr.c()
        ),

        Opcode::AddImmediate => format!(
            "{} r{} <- r{}, #{}",
            op.mnemonic(),
            instr.a(),
            instr.b(),
            instr.c()
        ),
    }
}
