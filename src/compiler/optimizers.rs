//! C-function optimizer table (§4.5).
//!
//! Tried after the special-form table and before a generic call: each entry
//! inspects `argv` *still in source form* and may return a compiled slot
//! (accepting the optimization) or decline by returning `Ok(None)`, in
//! which case the dispatcher falls through to a plain call.
//!
//! Grounded in the teacher's constant-folding pass (`src/optimizer/
//! constant_folding.rs`), generalized from an AST-walking post-pass into a
//! compile-time dispatch entry that also recognizes the narrower
//! add-immediate shape.

use super::{Compiler, FormOptions};
use crate::error::CompileError;
use crate::slot::Slot;
use crate::value::Value;

pub struct Optimizer {
    pub name: &'static str,
    pub try_optimize: fn(&mut Compiler, &FormOptions, &[Value]) -> Result<Option<Slot>, CompileError>,
}

pub fn lookup(name: &str) -> Option<&'static Optimizer> {
    TABLE.iter().find(|o| o.name == name)
}

static TABLE: &[Optimizer] = &[Optimizer { name: "+", try_optimize: optimize_plus }];

/// Resolve `v` to a compile-time-known number, either a literal or a symbol
/// already bound to a constant numeric slot. Read-only: never registers an
/// upvalue, so declining has no side effect.
fn as_constant_number(c: &Compiler, v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => Some(n.0),
        Value::Symbol(name) => {
            let slot = c.peek(name)?;
            match (slot.is_constant(), &slot.constant) {
                (true, Some(Value::Number(n))) => Some(n.0),
                _ => None,
            }
        }
        _ => None,
    }
}

/// `(+ a b)`: constant-fold when both operands are compile-time numbers,
/// else specialize to `ADD_IMMEDIATE` when the right operand is a small
/// integer literal, else decline.
fn optimize_plus(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Option<Slot>, CompileError> {
    if argv.len() != 2 {
        return Ok(None);
    }

    if let (Some(a), Some(b)) = (as_constant_number(c, &argv[0]), as_constant_number(c, &argv[1])) {
        return Ok(Some(Slot::constant(Value::number(a + b))));
    }

    if let Value::Number(b) = &argv[1] {
        if b.fract() == 0.0 && (0.0..=255.0).contains(&b.0) {
            let span = opts.sourcemap.span();
            let lhs_opts = c.child_opts(argv[0].clone(), opts, 1, super::FoptsFlags::empty());
            let lhs_slot = c.compile_sub(lhs_opts)?;
            let lhs_idx = c.preread_default(span, &lhs_slot)?;
            let dest = c.gettarget(opts);
            c.emit_add_immediate(span, &dest, lhs_idx, b.0 as u8);
            c.postread_default(&lhs_slot, lhs_idx);
            return Ok(Some(dest));
        }
    }

    Ok(None)
}
