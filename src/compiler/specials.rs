//! Special-form dispatch table (§4.4).
//!
//! Every entry here is tried before the C-function optimizer table and
//! before falling through to a generic call — a symbol shadowing one of
//! these names in user code cannot override it (§4.4 "special forms bind
//! tighter than any scope").

use super::{Compiler, FoptsFlags, FormOptions};
use crate::error::CompileError;
use crate::slot::{Slot, SlotFlags};
use crate::value::Value;

pub struct Special {
    pub name: &'static str,
    pub compile: fn(&mut Compiler, &FormOptions, &[Value]) -> Result<Slot, CompileError>,
}

pub fn lookup(name: &str) -> Option<&'static Special> {
    SPECIALS.iter().find(|s| s.name == name)
}

static SPECIALS: &[Special] = &[
    Special { name: "quote", compile: compile_quote },
    Special { name: "do", compile: compile_do },
    Special { name: "def", compile: compile_def },
    Special { name: "var", compile: compile_var },
    Special { name: "varset", compile: compile_varset },
    Special { name: "if", compile: compile_if },
    Special { name: "while", compile: compile_while },
    Special { name: "break", compile: compile_break },
    Special { name: "continue", compile: compile_continue },
    Special { name: "fn", compile: compile_fn },
    Special { name: "apply", compile: compile_apply },
];

fn arity_error(form: &str, expected: &str, argv: &[Value], span: crate::span::Span) -> CompileError {
    CompileError::Arity {
        form: form.to_string(),
        expected: expected.to_string(),
        got: argv.len(),
        span,
    }
}

fn bad_args(form: &str, reason: &str, span: crate::span::Span) -> CompileError {
    CompileError::BadSpecialArgs {
        form: form.to_string(),
        reason: reason.to_string(),
        span,
    }
}

/// `(quote x)` — the literal `x`, uncompiled.
fn compile_quote(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.len() != 1 {
        return Err(arity_error("quote", "1", argv, span));
    }
    Ok(Slot::constant(argv[0].clone()))
}

/// `(do a b ... z)` — compile every form but the last with `DROP`, the last
/// inheriting the caller's flags; an empty body is `nil`.
fn compile_do(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    if argv.is_empty() {
        return Ok(Slot::constant(Value::Nil));
    }
    for (i, expr) in argv[..argv.len() - 1].iter().enumerate() {
        let sub = c.child_opts(expr.clone(), opts, i + 1, FoptsFlags::DROP);
        c.compile_sub(sub)?;
    }
    let last_idx = argv.len() - 1;
    let sub = c.child_opts(argv[last_idx].clone(), opts, last_idx + 1, opts.flags);
    c.compile_sub(sub)
}

/// `(def sym expr)` — compile `expr`, bind the result under `sym` with
/// `NAMED` set; the result is that same slot.
fn compile_def(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.len() != 2 {
        return Err(arity_error("def", "2", argv, span));
    }
    let name = argv[0]
        .as_symbol()
        .ok_or_else(|| bad_args("def", "first argument must be a symbol", span))?
        .to_string();
    let expr_opts = c.child_opts(argv[1].clone(), opts, 2, FoptsFlags::empty());
    let slot = c.compile_sub(expr_opts)?.with_flags(SlotFlags::NAMED);
    c.scope_define(&name, slot.clone());
    Ok(slot)
}

/// `(var sym expr)` — like `def`, but always materializes a fresh mutable
/// local (never a constant slot), so `varset` has somewhere to write.
fn compile_var(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.len() != 2 {
        return Err(arity_error("var", "2", argv, span));
    }
    let name = argv[0]
        .as_symbol()
        .ok_or_else(|| bad_args("var", "first argument must be a symbol", span))?
        .to_string();
    let expr_opts = c.child_opts(argv[1].clone(), opts, 2, FoptsFlags::empty());
    let expr_slot = c.compile_sub(expr_opts)?;
    let local_index = c.alloc_local();
    c.copy_to_register(span, local_index, &expr_slot)?;
    let slot = Slot::local(local_index).with_flags(SlotFlags::MUTABLE | SlotFlags::NAMED);
    c.scope_define(&name, slot.clone());
    Ok(slot)
}

/// `(varset sym expr)` — requires `sym` to resolve to a `MUTABLE` binding.
fn compile_varset(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.len() != 2 {
        return Err(arity_error("varset", "2", argv, span));
    }
    let name = argv[0]
        .as_symbol()
        .ok_or_else(|| bad_args("varset", "first argument must be a symbol", span))?;
    let dest = c.resolve_mutable(name, span)?;
    let expr_opts = c.child_opts(argv[1].clone(), opts, 2, FoptsFlags::empty());
    let expr_slot = c.compile_sub(expr_opts)?;
    c.copy(span, &dest, &expr_slot)?;
    Ok(dest)
}

/// `(if test then else?)` — both branches compile with the caller's
/// `TAIL`/`DROP` flags, unified into a shared target register when not in
/// tail position.
fn compile_if(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.is_empty() || argv.len() > 3 {
        return Err(arity_error("if", "2 or 3", argv, span));
    }

    let test_opts = c.child_opts(argv[0].clone(), opts, 1, FoptsFlags::empty());
    let test_slot = c.compile_sub(test_opts)?;
    let test_idx = c.preread_default(span, &test_slot)?;
    let jf_pos = c.emit_placeholder_jump(span, true, test_idx);
    c.postread_default(&test_slot, test_idx);

    let tail = opts.flags.contains(FoptsFlags::TAIL);
    let target = if tail { None } else { Some(c.gettarget(opts)) };

    let then_opts = c.branch_opts(argv[1].clone(), opts, 2, target.clone());
    let then_slot = c.compile_sub(then_opts)?;
    if let Some(t) = &target {
        c.copy(span, t, &then_slot)?;
    }
    let jmp_pos = if tail { None } else { Some(c.emit_placeholder_jump(span, false, 0)) };

    let else_start = c.bytecode_len();
    c.patch_jump(jf_pos, else_start);

    let else_value = argv.get(2).cloned().unwrap_or(Value::Nil);
    let else_opts = c.branch_opts(else_value, opts, 3, target.clone());
    let else_slot = c.compile_sub(else_opts)?;
    if let Some(t) = &target {
        c.copy(span, t, &else_slot)?;
    }

    if let Some(pos) = jmp_pos {
        let after = c.bytecode_len();
        c.patch_jump(pos, after);
    }

    if tail {
        Ok(Slot::constant(Value::Nil).with_flags(SlotFlags::RETURNED))
    } else {
        Ok(target.expect("non-tail if always allocates a target"))
    }
}

/// `(while test body...)` — pushes a loop-labeled scope so nested
/// `break`/`continue` can find it; the test's slot is managed manually
/// (not `DROP`ped by the dispatcher) since it's read after compilation.
fn compile_while(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.is_empty() {
        return Err(bad_args("while", "expects a test and zero or more body forms", span));
    }

    let l0 = c.bytecode_len();
    let test_opts = c.child_opts(argv[0].clone(), opts, 1, FoptsFlags::empty());
    let test_slot = c.compile_sub(test_opts)?;
    let test_idx = c.preread_default(span, &test_slot)?;
    let jf_pos = c.emit_placeholder_jump(span, true, test_idx);
    c.postread_default(&test_slot, test_idx);

    c.push_loop_scope(l0);
    let mut body_err = None;
    for (i, expr) in argv[1..].iter().enumerate() {
        let body_opts = c.child_opts(expr.clone(), opts, i + 2, FoptsFlags::DROP);
        if let Err(e) = c.compile_sub(body_opts) {
            body_err = Some(e);
            break;
        }
    }
    let break_patches = c.pop_loop_scope();
    if let Some(e) = body_err {
        return Err(e);
    }

    c.emit_jump_to(span, l0);
    let l1 = c.bytecode_len();
    c.patch_jump(jf_pos, l1);
    for pos in break_patches {
        c.patch_jump(pos, l1);
    }

    Ok(Slot::constant(Value::Nil))
}

/// `(break)` — unconditional jump to the nearest enclosing loop's exit,
/// patched once `while` knows where that is.
fn compile_break(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if !argv.is_empty() {
        return Err(arity_error("break", "0", argv, span));
    }
    let pos = c.emit_placeholder_jump(span, false, 0);
    c.register_break(pos, span)?;
    Ok(Slot::constant(Value::Nil))
}

/// `(continue)` — unconditional jump back to the loop's test.
fn compile_continue(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if !argv.is_empty() {
        return Err(arity_error("continue", "0", argv, span));
    }
    let l0 = c
        .nearest_loop_start()
        .ok_or_else(|| CompileError::NoLoop { keyword: "continue".to_string(), span })?;
    c.emit_jump_to(span, l0);
    Ok(Slot::constant(Value::Nil))
}

/// `(fn [params...] body...)` — pushes a `FUNCTION|ENV` scope, binds each
/// parameter to a fresh local, compiles the body as an implicit tail `do`,
/// and finalizes it into a nested `FuncDef` referenced by a `CLOSURE`.
fn compile_fn(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.is_empty() {
        return Err(bad_args("fn", "expects a parameter vector and a body", span));
    }
    let params = match &argv[0] {
        Value::Array(items) | Value::Form(items) => items.borrow().clone(),
        _ => return Err(bad_args("fn", "first argument must be a parameter list", span)),
    };

    c.push_function_scope();
    for p in &params {
        let name = match p.as_symbol() {
            Some(n) => n.to_string(),
            None => {
                let _ = c.pop_funcdef(0, false);
                return Err(bad_args("fn", "parameters must be symbols", span));
            }
        };
        let idx = c.alloc_local();
        c.scope_define(&name, Slot::local(idx).with_flags(SlotFlags::NAMED));
    }

    // The synthetic `(do body...)` wrapper's child `k` is `argv[k]`, which is
    // the real `fn` form's own child `k + 1` (child 0 is the parameter
    // vector) — descend from `opts.sourcemap` at that offset so every
    // instruction inside the body still blames its real span instead of
    // collapsing to a dummy one. Child 0 of this node is never queried by
    // `compile_do` (it indexes bodies starting at 1) so its value doesn't
    // matter.
    let body_children: Vec<_> =
        (0..argv.len()).map(|k| crate::sourcemap::getindex(&opts.sourcemap, k + 1)).collect();
    let body_opts = FormOptions {
        x: Value::form(std::iter::once(Value::symbol("do")).chain(argv[1..].to_vec()).collect()),
        sourcemap: crate::sourcemap::SourceMap::node(span, body_children),
        flags: FoptsFlags::TAIL,
        hint: None,
    };
    let body_result = c.compile_sub(body_opts);
    if let Err(e) = body_result {
        let _ = c.pop_funcdef(0, false);
        return Err(e);
    }

    let def = c.pop_funcdef(params.len() as u32, false);
    let def_index = c.register_nested_def(def);
    let dest = c.gettarget(opts);
    c.emit_closure(span, &dest, def_index);
    Ok(dest)
}

/// `(apply f a b ... z)` — reserved: compiles exactly like a generic call
/// `(f a b ... z)` (§4.4 "generic call fallthrough"). Spreading the last
/// argument at call time is a VM concern and out of scope here.
fn compile_apply(c: &mut Compiler, opts: &FormOptions, argv: &[Value]) -> Result<Slot, CompileError> {
    let span = opts.sourcemap.span();
    if argv.is_empty() {
        return Err(bad_args("apply", "expects a function and zero or more arguments", span));
    }
    c.compile_call(argv[0].clone(), 1, &argv[1..], 2, opts)
}
