//! The compiler core (§3.5, §4.3-§4.7).
//!
//! `Compiler` lowers a single [`Value`] tree into a [`FuncDef`]. It owns the
//! scope stack, the growing instruction/source-map buffers, the toplevel
//! [`Env`], and the single error cell (§7): the first `CompileError`
//! encountered wins, every form compiled afterward degrades to a nil
//! constant slot with no further emission, and recursion unwinds normally
//! instead of threading a `Result` through every call site.

mod optimizers;
mod specials;

use crate::bytecode::{Instruction, Opcode};
use crate::env::Env;
use crate::error::CompileError;
use crate::funcdef::FuncDef;
use crate::scope::ScopeStack;
use crate::slot::{Slot, SlotFlags};
use crate::sourcemap::SourceMap;
use crate::span::Span;
use crate::value::Value;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::rc::Rc;

/// §3.3 flag bits carried alongside a form as it is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoptsFlags(u32);

impl FoptsFlags {
    /// Compile this form's result straight into a `RETURN`.
    pub const TAIL: FoptsFlags = FoptsFlags(0x10000);
    /// `hint` names a register the result should land in.
    pub const HINT: FoptsFlags = FoptsFlags(0x20000);
    /// The result is unused; free it once computed.
    pub const DROP: FoptsFlags = FoptsFlags(0x40000);

    pub const fn empty() -> Self {
        FoptsFlags(0)
    }

    pub fn contains(self, other: FoptsFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FoptsFlags {
    type Output = FoptsFlags;
    fn bitor(self, rhs: FoptsFlags) -> FoptsFlags {
        FoptsFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FoptsFlags {
    fn bitor_assign(&mut self, rhs: FoptsFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FoptsFlags {
    type Output = FoptsFlags;
    fn bitand(self, rhs: FoptsFlags) -> FoptsFlags {
        FoptsFlags(self.0 & rhs.0)
    }
}

/// A form together with the compile-time context it's compiled under
/// (§3.3). `sourcemap` is this form's own node, already descended from
/// whatever contained it; `hint`, when present, is a register the caller
/// would like the result placed in.
#[derive(Clone)]
pub struct FormOptions {
    pub x: Value,
    pub sourcemap: SourceMap,
    pub flags: FoptsFlags,
    pub hint: Option<Slot>,
}

/// Tunables for a single compilation (§A.3).
#[derive(Debug, Clone, Copy)]
pub struct CompilerOptions {
    /// Guards against unbounded recursion on deeply nested forms.
    pub recursion_limit: u32,
    /// Largest register index a one-byte operand can address.
    pub max_register: u8,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            recursion_limit: 1024,
            max_register: 0xFF,
        }
    }
}

impl CompilerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursion_limit(mut self, limit: u32) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_max_register(mut self, max: u8) -> Self {
        self.max_register = max;
        self
    }
}

/// Lowers one `Value` tree into a `FuncDef`. See the module doc for the
/// single-error-cell model.
pub struct Compiler {
    scopes: ScopeStack,
    bytecode: Vec<Instruction>,
    sourcemap: Vec<Rc<SourceMap>>,
    env: Env,
    recursion_depth: u32,
    options: CompilerOptions,
    error: Option<CompileError>,
}

/// Compile `root` to a closed-over-nothing `FuncDef`, resolving free
/// symbols against `env`. `sourcemap` must mirror `root`'s shape (see
/// [`crate::sourcemap::dummy_for`] when there is no real parser backing it).
pub fn compile(root: Value, sourcemap: SourceMap, env: Env) -> Result<Rc<FuncDef>, CompileError> {
    Compiler::new(env).compile_root(root, sourcemap)
}

impl Compiler {
    pub fn new(env: Env) -> Self {
        Self::with_options(env, CompilerOptions::default())
    }

    pub fn with_options(env: Env, options: CompilerOptions) -> Self {
        Compiler {
            scopes: ScopeStack::new(),
            bytecode: Vec::new(),
            sourcemap: Vec::new(),
            env,
            recursion_depth: 0,
            options,
            error: None,
        }
    }

    pub fn compile_root(&mut self, root: Value, sourcemap: SourceMap) -> Result<Rc<FuncDef>, CompileError> {
        self.scopes.push(true, 0);
        let opts = FormOptions {
            x: root,
            sourcemap,
            flags: FoptsFlags::TAIL,
            hint: None,
        };
        self.compile_value(opts);
        if let Some(err) = self.error.clone() {
            return Err(err);
        }
        let def = self.pop_funcdef(0, false);
        Ok(Rc::new(def))
    }

    /// The dispatcher (§4.3). Infallible at its own boundary: every error is
    /// funneled into the single error cell and a nil constant slot is
    /// returned so callers can keep unwinding without matching on `Result`.
    pub fn compile_value(&mut self, opts: FormOptions) -> Slot {
        if self.error.is_some() {
            return Slot::nil();
        }
        if self.recursion_depth >= self.options.recursion_limit {
            let span = opts.sourcemap.span();
            self.record_error(CompileError::RecursionLimit { span });
            return Slot::nil();
        }
        self.recursion_depth += 1;
        let result = self.try_compile_value(opts);
        self.recursion_depth -= 1;
        match result {
            Ok(slot) => slot,
            Err(err) => {
                self.record_error(err);
                Slot::nil()
            }
        }
    }

    /// Like [`Compiler::compile_value`] but surfaces the error cell through
    /// `?`, for internal callers (special forms, call compilation) that need
    /// to stop emitting as soon as a nested form fails.
    fn compile_sub(&mut self, opts: FormOptions) -> Result<Slot, CompileError> {
        let slot = self.compile_value(opts);
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        Ok(slot)
    }

    fn record_error(&mut self, err: CompileError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn try_compile_value(&mut self, opts: FormOptions) -> Result<Slot, CompileError> {
        let slot = match opts.x.clone() {
            Value::Symbol(name) => self.compile_symbol(&name, &opts)?,
            Value::Form(items) => {
                let items: Vec<Value> = items.borrow().clone();
                self.compile_form(items, &opts)?
            }
            literal => Slot::constant(literal),
        };
        self.finish_result(&opts, slot)
    }

    fn compile_symbol(&mut self, name: &str, opts: &FormOptions) -> Result<Slot, CompileError> {
        let span = opts.sourcemap.span();
        if let Some(slot) = self.scopes.resolve(name, span)? {
            return Ok(slot);
        }
        if let Some(value) = self.env.lookup(name) {
            return Ok(Slot::constant(value));
        }
        Err(CompileError::UnboundSymbol {
            name: name.to_string(),
            span,
        })
    }

    fn compile_form(&mut self, items: Vec<Value>, opts: &FormOptions) -> Result<Slot, CompileError> {
        if items.is_empty() {
            return Ok(Slot::constant(Value::Nil));
        }
        let head = items[0].clone();
        let rest = &items[1..];

        if let Some(name) = head.as_symbol() {
            if let Some(special) = specials::lookup(name) {
                return (special.compile)(self, opts, rest);
            }
            if let Some(optimizer) = optimizers::lookup(name) {
                if let Some(slot) = (optimizer.try_optimize)(self, opts, rest)? {
                    return Ok(slot);
                }
            }
        }

        self.compile_call(head, 0, rest, 1, opts)
    }

    /// Generic call compilation (§4.3 rule 4): callee and arguments land in
    /// one contiguous register run, `head_idx`/`args_start_idx` are the
    /// indices into `opts.sourcemap`'s children the callee/args came from
    /// (so `apply`, whose argv is offset by the `apply` symbol itself, can
    /// reuse this with different indices).
    fn compile_call(
        &mut self,
        head: Value,
        head_idx: usize,
        args: &[Value],
        args_start_idx: usize,
        opts: &FormOptions,
    ) -> Result<Slot, CompileError> {
        let span = opts.sourcemap.span();
        let base = self.scopes.top_mut().slots.alloc_contiguous(args.len() as i32 + 1);

        let head_opts = self.child_opts(head, opts, head_idx, FoptsFlags::empty());
        let head_slot = self.compile_sub(head_opts)?;
        self.copy_to_register(span, base, &head_slot)?;

        for (i, arg) in args.iter().enumerate() {
            let arg_opts = self.child_opts(arg.clone(), opts, args_start_idx + i, FoptsFlags::empty());
            let arg_slot = self.compile_sub(arg_opts)?;
            self.copy_to_register(span, base + 1 + i as i32, &arg_slot)?;
        }

        let op = if opts.flags.contains(FoptsFlags::TAIL) {
            Opcode::TailCall
        } else {
            Opcode::Call
        };
        self.emit(span, Instruction::abc(op, base as u8, 0, args.len() as u8));

        for i in 0..args.len() {
            self.scopes.top_mut().slots.free(base + 1 + i as i32);
        }

        let mut result = Slot::local(base);
        if opts.flags.contains(FoptsFlags::TAIL) {
            result.flags |= SlotFlags::RETURNED;
        }
        Ok(result)
    }

    /// Result handling (§4.3 tail): emits `RETURN` for `TAIL`, a `MOVE` into
    /// the hint for `HINT`, and frees the slot for `DROP`.
    fn finish_result(&mut self, opts: &FormOptions, slot: Slot) -> Result<Slot, CompileError> {
        let span = opts.sourcemap.span();

        if opts.flags.contains(FoptsFlags::TAIL) {
            if slot.is_returned() {
                return Ok(slot);
            }
            let idx = self.preread(span, self.options.max_register as i32, 0, &slot)?;
            self.emit(span, Instruction::abc(Opcode::Return, idx as u8, 0, 0));
            self.postread(&slot, idx);
            let mut returned = slot;
            returned.flags |= SlotFlags::RETURNED;
            return Ok(returned);
        }

        let mut slot = slot;
        if opts.flags.contains(FoptsFlags::HINT) {
            if let Some(hint) = &opts.hint {
                let differs = hint.index != slot.index
                    || hint.envindex != slot.envindex
                    || hint.is_constant() != slot.is_constant();
                if differs {
                    self.copy(span, hint, &slot)?;
                    slot = hint.clone();
                }
            }
        }
        if opts.flags.contains(FoptsFlags::DROP) {
            self.free_slot(&slot);
        }
        Ok(slot)
    }

    // --- emitter helpers (§4.6) -------------------------------------------

    /// Append an instruction, recording its source-map entry in lockstep.
    fn emit(&mut self, span: Span, instr: Instruction) -> usize {
        let pos = self.bytecode.len();
        self.bytecode.push(instr);
        self.sourcemap.push(Rc::new(SourceMap::leaf(span)));
        pos
    }

    fn bytecode_len(&self) -> usize {
        self.bytecode.len()
    }

    /// Rewrite the `sbx` operand of a previously emitted jump so it lands at
    /// `target_pc`, keeping the jump's opcode and `A` operand untouched.
    fn patch_jump(&mut self, pos: usize, target_pc: usize) {
        let old = self.bytecode[pos];
        let offset = target_pc as i64 - (pos as i64 + 1);
        self.bytecode[pos] = Instruction::asbx(old.opcode(), old.a(), offset as i16);
    }

    /// Materialize `slot` into some register `<= max` (the `nth` one free,
    /// for callers allocating several in sequence), emitting whatever load
    /// is needed. Returns the register actually holding the value; already-
    /// local slots within range are returned unchanged with no emission.
    fn preread(&mut self, span: Span, max: i32, nth: i32, slot: &Slot) -> Result<i32, CompileError> {
        if slot.is_constant() {
            let idx = self.alloc_near_or_local(max, nth);
            let cidx = self.scopes.top_mut().add_constant(
                slot.constant.clone().expect("CONSTANT slot always carries a value"),
            );
            self.emit(span, Instruction::abx(Opcode::LoadConst, idx as u8, cidx as u16));
            return Ok(idx);
        }
        if slot.is_upvalue() {
            let idx = self.alloc_near_or_local(max, nth);
            self.emit(
                span,
                Instruction::abc(Opcode::GetUpvalue, idx as u8, (slot.envindex - 1) as u8, slot.index as u8),
            );
            return Ok(idx);
        }
        if slot.index <= max {
            return Ok(slot.index);
        }
        let idx = self.alloc_near_or_local(max, nth);
        self.emit(span, Instruction::abc(Opcode::Move, idx as u8, slot.index as u8, 0));
        Ok(idx)
    }

    fn alloc_near_or_local(&mut self, max: i32, nth: i32) -> i32 {
        let top = self.scopes.top_mut();
        top.slots.alloc_near(max, nth).unwrap_or_else(|| top.slots.alloc_local())
    }

    /// Release a temporary materialized by `preread`, iff `preread` actually
    /// allocated one (a plain local already in range is a no-op to free).
    fn postread(&mut self, slot: &Slot, index: i32) {
        if slot.is_constant() || slot.is_upvalue() || slot.index != index {
            self.scopes.top_mut().slots.free(index);
        }
    }

    /// Place `src`'s value into the plain register `dest` (used for call
    /// argument/callee setup, where `dest` is a bare index, not a `Slot`).
    fn copy_to_register(&mut self, span: Span, dest: i32, src: &Slot) -> Result<(), CompileError> {
        if src.is_constant() {
            let cidx = self.scopes.top_mut().add_constant(
                src.constant.clone().expect("CONSTANT slot always carries a value"),
            );
            self.emit(span, Instruction::abx(Opcode::LoadConst, dest as u8, cidx as u16));
        } else if src.is_upvalue() {
            self.emit(
                span,
                Instruction::abc(Opcode::GetUpvalue, dest as u8, (src.envindex - 1) as u8, src.index as u8),
            );
        } else if src.index != dest {
            self.emit(span, Instruction::abc(Opcode::Move, dest as u8, src.index as u8, 0));
        }
        Ok(())
    }

    /// Write `src` into the location named by `dest` (§4.6 `copy`), refusing
    /// to target a `CONSTANT` slot and routing through `SETUPVALUE`/`SETREF`
    /// as `dest`'s flags require.
    fn copy(&mut self, span: Span, dest: &Slot, src: &Slot) -> Result<(), CompileError> {
        if dest.is_constant() {
            return Err(CompileError::Internal {
                reason: "copy: destination is a constant slot".to_string(),
                span,
            });
        }
        if dest.is_upvalue() {
            let idx = self.preread(span, self.options.max_register as i32, 0, src)?;
            self.emit(
                span,
                Instruction::abc(Opcode::SetUpvalue, idx as u8, (dest.envindex - 1) as u8, dest.index as u8),
            );
            self.postread(src, idx);
            return Ok(());
        }
        if dest.flags.contains(SlotFlags::REF) {
            let idx = self.preread(span, self.options.max_register as i32, 0, src)?;
            self.emit(span, Instruction::abc(Opcode::SetRef, dest.index as u8, idx as u8, 0));
            self.postread(src, idx);
            return Ok(());
        }
        self.copy_to_register(span, dest.index, src)
    }

    /// Choose a destination register for a form's result: the caller's hint
    /// when it's already a plain, writable local, else a fresh one.
    fn gettarget(&mut self, opts: &FormOptions) -> Slot {
        if let Some(hint) = &opts.hint {
            if !hint.is_constant() && !hint.is_upvalue() {
                return hint.clone();
            }
        }
        let idx = self.scopes.top_mut().slots.alloc_local();
        Slot::local(idx)
    }

    /// Free `slot`'s register, unless it's a constant or a named (bound)
    /// binding — those outlive the expression that produced them (§4.1).
    fn free_slot(&mut self, slot: &Slot) {
        if slot.is_constant() || slot.is_named() {
            return;
        }
        if slot.envindex == 0 && slot.index >= 0 {
            self.scopes.top_mut().slots.free(slot.index);
        }
    }

    /// Build a `FormOptions` for the `index`th child of `parent`, carrying
    /// only `extra` flags forward (no hint).
    fn child_opts(&self, value: Value, parent: &FormOptions, index: usize, extra: FoptsFlags) -> FormOptions {
        FormOptions {
            x: value,
            sourcemap: crate::sourcemap::getindex(&parent.sourcemap, index),
            flags: extra,
            hint: None,
        }
    }

    /// Build a `FormOptions` for a branch of a two-way form (`if`'s
    /// then/else) that should write into a shared `target`, inheriting the
    /// caller's `TAIL`/`DROP` flags.
    fn branch_opts(&self, value: Value, parent: &FormOptions, index: usize, target: Option<Slot>) -> FormOptions {
        let mut flags = FoptsFlags::empty();
        if parent.flags.contains(FoptsFlags::TAIL) {
            flags |= FoptsFlags::TAIL;
        }
        if parent.flags.contains(FoptsFlags::DROP) {
            flags |= FoptsFlags::DROP;
        }
        if target.is_some() {
            flags |= FoptsFlags::HINT;
        }
        FormOptions {
            x: value,
            sourcemap: crate::sourcemap::getindex(&parent.sourcemap, index),
            flags,
            hint: target,
        }
    }

    /// Read-only speculative lookup for C-function optimizers (§4.5): finds
    /// a binding without registering an upvalue forwarding entry, since an
    /// optimizer precondition check must have no side effects on decline.
    fn peek(&self, name: &str) -> Option<Slot> {
        self.scopes.peek(name)
    }

    /// Resolve `name` through the scope stack, requiring it to already be
    /// `MUTABLE` (used by `varset`).
    fn resolve_mutable(&mut self, name: &str, span: Span) -> Result<Slot, CompileError> {
        let slot = self
            .scopes
            .resolve(name, span)?
            .ok_or_else(|| CompileError::UnboundSymbol {
                name: name.to_string(),
                span,
            })?;
        if !slot.is_mutable() {
            return Err(CompileError::BadAssign {
                name: name.to_string(),
                span,
            });
        }
        Ok(slot)
    }

    /// §4.4 `break`: jump to the nearest enclosing loop's exit, recorded for
    /// the `while` compiler to patch once the loop's end is known.
    fn register_break(&mut self, pos: usize, span: Span) -> Result<(), CompileError> {
        match self.scopes.nearest_loop_mut() {
            Some((_, patches)) => {
                patches.push(pos);
                Ok(())
            }
            None => Err(CompileError::NoLoop {
                keyword: "break".to_string(),
                span,
            }),
        }
    }

    fn nearest_loop_start(&self) -> Option<usize> {
        self.scopes.nearest_loop_start()
    }

    fn push_loop_scope(&mut self, l0: usize) {
        let start = self.bytecode_len();
        self.scopes.push(false, start);
        self.scopes.top_mut().loop_labels = Some((l0, Vec::new()));
    }

    fn pop_loop_scope(&mut self) -> Vec<usize> {
        self.scopes
            .pop()
            .loop_labels
            .expect("pop_loop_scope called without a matching push_loop_scope")
            .1
    }

    // --- convenience wrappers used by special forms --------------------

    fn scope_define(&mut self, name: &str, slot: Slot) {
        self.scopes.top_mut().define(name.to_string(), slot);
    }

    fn alloc_local(&mut self) -> i32 {
        self.scopes.top_mut().slots.alloc_local()
    }

    fn push_function_scope(&mut self) {
        let start = self.bytecode_len();
        self.scopes.push(true, start);
    }

    /// Append a just-finalized nested `FuncDef` to the *current* (parent)
    /// scope's `defs`, returning its index for a `CLOSURE` instruction.
    fn register_nested_def(&mut self, def: FuncDef) -> u16 {
        let parent = self.scopes.top_mut();
        parent.defs.push(Rc::new(def));
        (parent.defs.len() - 1) as u16
    }

    fn emit_closure(&mut self, span: Span, dest: &Slot, def_index: u16) {
        self.emit(span, Instruction::abx(Opcode::Closure, dest.index as u8, def_index));
    }

    fn emit_add_immediate(&mut self, span: Span, dest: &Slot, lhs_reg: i32, imm: u8) {
        self.emit(span, Instruction::abc(Opcode::AddImmediate, dest.index as u8, lhs_reg as u8, imm));
    }

    fn preread_default(&mut self, span: Span, slot: &Slot) -> Result<i32, CompileError> {
        let max = self.options.max_register as i32;
        self.preread(span, max, 0, slot)
    }

    fn postread_default(&mut self, slot: &Slot, index: i32) {
        self.postread(slot, index);
    }

    /// Emit a jump with a placeholder offset, to be rewritten later by
    /// `patch_jump` once the target address is known.
    fn emit_placeholder_jump(&mut self, span: Span, conditional: bool, test_reg: i32) -> usize {
        if conditional {
            self.emit(span, Instruction::asbx(Opcode::JumpIfFalse, test_reg as u8, 0))
        } else {
            self.emit(span, Instruction::asbx(Opcode::Jump, 0, 0))
        }
    }

    /// Emit an unconditional jump whose target is already known (a loop's
    /// back-edge or `continue`).
    fn emit_jump_to(&mut self, span: Span, target_pc: usize) {
        let pos = self.emit(span, Instruction::asbx(Opcode::Jump, 0, 0));
        self.patch_jump(pos, target_pc);
    }

    /// The finalizer (§4.7): slice this function's bytecode/sourcemap back
    /// to its own `bytecode_start`, package everything the scope
    /// accumulated, and pop it off the stack.
    fn pop_funcdef(&mut self, arity: u32, variadic: bool) -> FuncDef {
        let scope = self.scopes.pop();
        let bytecode = self.bytecode.split_off(scope.bytecode_start);
        let sourcemap = self.sourcemap.split_off(scope.bytecode_start);
        FuncDef {
            constants: scope.consts,
            bytecode,
            sourcemap,
            defs: scope.defs,
            envs: scope.envs,
            arity,
            variadic,
            frame_size: scope.slots.smax() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::dummy_for;

    fn compile_value_form(value: Value) -> Result<Rc<FuncDef>, CompileError> {
        let sourcemap = dummy_for(&value);
        compile(value, sourcemap, Env::new())
    }

    #[test]
    fn literal_number_compiles_to_a_single_return() {
        let def = compile_value_form(Value::number(3.0)).unwrap();
        assert_eq!(def.bytecode.len(), 2, "loadconst + return");
        assert_eq!(def.constants.len(), 1);
    }

    #[test]
    fn unbound_symbol_is_an_error() {
        let err = compile_value_form(Value::symbol("nowhere")).unwrap_err();
        assert_eq!(err.code(), "C0001");
    }

    #[test]
    fn do_with_defs_then_call_folds_constants() {
        let form = Value::form(vec![
            Value::symbol("do"),
            Value::form(vec![Value::symbol("def"), Value::symbol("x"), Value::number(1.0)]),
            Value::form(vec![Value::symbol("def"), Value::symbol("y"), Value::number(2.0)]),
            Value::form(vec![Value::symbol("+"), Value::symbol("x"), Value::symbol("y")]),
        ]);
        let def = compile_value_form(form).unwrap();
        assert!(def.is_closed());
        assert!(
            def.constants.iter().any(|c| c.equal(&Value::number(3.0))),
            "+ folds x and y to the constant 3"
        );
    }

    #[test]
    fn fn_with_free_variable_captures_an_upvalue() {
        // `n` must be a non-constant binding (a parameter, not `def` of a
        // literal) to actually require capture — a constant is recompiled
        // as its own LOADCONST in the inner fn instead (see scope::tests::
        // constant_binding_crosses_function_boundary_without_an_upvalue).
        let form = Value::form(vec![
            Value::symbol("fn"),
            Value::array(vec![Value::symbol("n")]),
            Value::form(vec![Value::symbol("fn"), Value::array(vec![]), Value::symbol("n")]),
        ]);
        let def = compile_value_form(form).unwrap();
        assert_eq!(def.defs.len(), 1, "root registers the outer fn");
        let outer = &def.defs[0];
        assert!(outer.is_closed(), "outer fn's own parameter is local, not captured");
        assert_eq!(outer.defs.len(), 1, "outer registers the inner fn");
        assert!(!outer.defs[0].is_closed(), "inner fn captures n as an upvalue");
        assert_eq!(outer.defs[0].envs, vec![0]);
    }

    #[test]
    fn fn_body_sourcemap_descends_from_the_real_form_instead_of_a_dummy() {
        // `(fn [] 42)` with a hand-built map (not `dummy_for`) carrying a
        // distinctive span on the body literal. A correct `compile_fn` must
        // route that exact span into the nested `FuncDef`'s own sourcemap,
        // not collapse it to `Span::dummy()`.
        let body_span = Span::new(100, 102);
        let form = Value::form(vec![Value::symbol("fn"), Value::array(vec![]), Value::number(42.0)]);
        let sourcemap = SourceMap::node(
            Span::new(0, 10),
            vec![SourceMap::leaf(Span::new(0, 2)), SourceMap::leaf(Span::new(3, 5)), SourceMap::leaf(body_span)],
        );
        let def = compile(form, sourcemap, Env::new()).unwrap();
        let inner = &def.defs[0];
        assert!(
            inner.sourcemap.iter().any(|m| m.span() == body_span),
            "expected the body literal's real span {body_span:?} among {:?}",
            inner.sourcemap.iter().map(|m| m.span()).collect::<Vec<_>>()
        );
        assert!(
            inner.sourcemap.iter().all(|m| m.span() != Span::dummy()),
            "no instruction in the fn body should fall back to a dummy span"
        );
    }

    #[test]
    fn if_with_missing_else_defaults_to_nil() {
        let form = Value::form(vec![Value::symbol("if"), Value::Bool(true), Value::number(1.0)]);
        let def = compile_value_form(form).unwrap();
        assert!(!def.bytecode.is_empty());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let form = Value::form(vec![Value::symbol("break")]);
        let err = compile_value_form(form).unwrap_err();
        assert_eq!(err.code(), "C0005");
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let mut form = Value::number(0.0);
        for _ in 0..2000 {
            form = Value::form(vec![Value::symbol("do"), form]);
        }
        let err = compile_value_form(form).unwrap_err();
        assert_eq!(err.code(), "C0006");
    }
}
