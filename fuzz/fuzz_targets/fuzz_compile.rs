#![no_main]

use arbitrary::Unstructured;
use libfuzzer_sys::fuzz_target;
use loom_compiler::{compile, sourcemap, CompileError, Env, Value};

const SYMBOLS: &[&str] = &[
    "x", "y", "z", "n", "+", "-", "if", "do", "quote", "fn", "def", "var", "varset", "while",
    "break", "continue", "apply",
];

/// A bounded-depth arbitrary form: a literal, a symbol (from a small pool
/// heavy with special-form names, so the generator actually exercises every
/// special-form/optimizer path and not just unbound-symbol errors), or a
/// short call/form of recursively generated children.
fn gen_form(u: &mut Unstructured, depth: u32) -> arbitrary::Result<Value> {
    if depth == 0 || u.is_empty() {
        return gen_leaf(u);
    }
    if u.int_in_range(0u8..=2)? != 2 {
        return gen_leaf(u);
    }
    let n = u.int_in_range(1u8..=4)? as usize;
    let mut items = Vec::with_capacity(n);
    for _ in 0..n {
        items.push(gen_form(u, depth - 1)?);
    }
    Ok(Value::form(items))
}

fn gen_leaf(u: &mut Unstructured) -> arbitrary::Result<Value> {
    match u.int_in_range(0u8..=2)? {
        0 => Ok(Value::number(f64::from_bits(u.arbitrary::<u64>()?))),
        1 => Ok(Value::Bool(u.arbitrary::<bool>()?)),
        _ => {
            let idx = u.int_in_range(0usize..=SYMBOLS.len() - 1)?;
            Ok(Value::symbol(SYMBOLS[idx]))
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let Ok(leaf) = gen_form(&mut u, 4) else { return };
    let Ok(wrap_depth) = u.int_in_range(0u32..=4000) else { return };

    // Wrap the arbitrary leaf in up to 4000 nested `do`s — deep enough to
    // blow a real call stack if the recursion guard (§7 `RECURSION_LIMIT`)
    // didn't fire first. `compile` must return `Err` gracefully, never
    // panic or overflow the stack, well before that depth is reached.
    let mut form = leaf;
    for _ in 0..wrap_depth {
        form = Value::form(vec![Value::symbol("do"), form]);
    }

    let sm = sourcemap::dummy_for(&form);
    match compile(form, sm, Env::new()) {
        Ok(def) => {
            let _ = loom_compiler::bytecode::validate(&def);
        }
        Err(CompileError::RecursionLimit { .. }) => {}
        Err(_) => {}
    }
});
