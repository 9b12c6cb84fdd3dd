//! Lexical scope and the scope stack (§3.2, §4.2).
//!
//! `ScopeStack::resolve` is the symbol-resolution algorithm, including the
//! upvalue capture chain: when a name is found outside the innermost scope
//! and at least one `FUNCTION` boundary separates the use site from the
//! definition, every function scope in between registers a forwarding
//! entry in its own `envs` list. The chain is expressed as "where to get
//! env K from in my parent" (§9 Design Notes), so the VM reconstructs
//! captures by index lookup alone without cyclic `FuncDef` references.

use crate::bitset::SlotBitset;
use crate::error::CompileError;
use crate::funcdef::FuncDef;
use crate::slot::Slot;
use crate::span::Span;
use crate::value::Value;
use std::ops::{BitOr, BitOrAssign};
use std::rc::Rc;

/// §3.2 flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeFlags(u32);

impl ScopeFlags {
    /// Scope boundary for closures.
    pub const FUNCTION: ScopeFlags = ScopeFlags(1);
    /// This scope may be captured (an environment).
    pub const ENV: ScopeFlags = ScopeFlags(2);
    /// Outermost scope of the whole compilation.
    pub const TOP: ScopeFlags = ScopeFlags(4);
    /// Entered but produced no code.
    pub const UNUSED: ScopeFlags = ScopeFlags(8);

    pub const fn empty() -> Self {
        ScopeFlags(0)
    }

    pub fn contains(self, other: ScopeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ScopeFlags {
    type Output = ScopeFlags;
    fn bitor(self, rhs: ScopeFlags) -> ScopeFlags {
        ScopeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ScopeFlags {
    fn bitor_assign(&mut self, rhs: ScopeFlags) {
        self.0 |= rhs.0;
    }
}

/// A lexical frame on the compiler's scope stack.
#[derive(Debug)]
pub struct Scope {
    pub consts: Vec<Value>,
    /// Newest-last; lookup scans backward so shadowing wins.
    pub syms: Vec<(Rc<str>, Slot)>,
    pub slots: SlotBitset,
    pub defs: Vec<Rc<FuncDef>>,
    /// For each captured env, the index to fetch it from in the parent's
    /// own locals-or-envs. Index 0 of `envs` is not reserved space — the
    /// *value* `0` stored in an entry means "parent's own locals".
    pub envs: Vec<i32>,
    pub bytecode_start: usize,
    pub flags: ScopeFlags,
    /// Set while compiling a `while` body; `break`/`continue` resolve
    /// against this when present (§4.4 state machine).
    pub loop_labels: Option<(usize, Vec<usize>)>,
}

impl Scope {
    pub fn new(bytecode_start: usize, flags: ScopeFlags) -> Self {
        Scope {
            consts: Vec::new(),
            syms: Vec::new(),
            slots: SlotBitset::new(),
            defs: Vec::new(),
            envs: Vec::new(),
            bytecode_start,
            flags,
            loop_labels: None,
        }
    }

    pub fn is_function(&self) -> bool {
        self.flags.contains(ScopeFlags::FUNCTION)
    }

    /// Intern a constant by value equality, returning its pool index.
    pub fn add_constant(&mut self, value: Value) -> i32 {
        if let Some(idx) = self.consts.iter().position(|c| c.equal(&value)) {
            return idx as i32;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as i32
    }

    pub fn define(&mut self, name: impl Into<Rc<str>>, slot: Slot) {
        self.syms.push((name.into(), slot));
    }

    /// Newest-first scan, as lookups within a single scope must see later
    /// `def`s/`var`s shadow earlier ones (§4.4 "Redefinition... shadows").
    pub fn lookup_local(&self, name: &str) -> Option<Slot> {
        self.syms.iter().rev().find(|(n, _)| &**n == name).map(|(_, s)| s.clone())
    }

    /// Register (deduplicated) an env forwarding entry, returning its
    /// position in this scope's `envs` list.
    fn register_env(&mut self, parent_value: i32) -> i32 {
        if let Some(pos) = self.envs.iter().position(|&v| v == parent_value) {
            return pos as i32;
        }
        self.envs.push(parent_value);
        (self.envs.len() - 1) as i32
    }
}

/// The compiler's stack of lexical frames, innermost last.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack { scopes: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Push an empty scope. `new_function_frame` sets `FUNCTION|ENV`
    /// (§4.2); the very first scope of a compilation additionally gets
    /// `TOP`.
    pub fn push(&mut self, new_function_frame: bool, bytecode_start: usize) {
        let mut flags = if new_function_frame {
            ScopeFlags::FUNCTION | ScopeFlags::ENV
        } else {
            ScopeFlags::empty()
        };
        if self.scopes.is_empty() {
            flags |= ScopeFlags::TOP;
        }
        self.scopes.push(Scope::new(bytecode_start, flags));
    }

    /// Pop a non-function scope, returning it for the caller to discard
    /// (its slots are simply abandoned — the parent's bitmap already owns
    /// the bits it allocated).
    pub fn pop(&mut self) -> Scope {
        self.scopes.pop().expect("pop called with no open scope")
    }

    pub fn top(&self) -> &Scope {
        self.scopes.last().expect("scope stack is never empty during compilation")
    }

    pub fn top_mut(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack is never empty during compilation")
    }

    /// The nearest enclosing loop's labels, searching outward but stopping
    /// at a function boundary (a loop in an outer function is not "this"
    /// loop — §4.4's `break`/`continue` legality rule).
    pub fn nearest_loop_start(&self) -> Option<usize> {
        for scope in self.scopes.iter().rev() {
            if let Some((l0, _)) = &scope.loop_labels {
                return Some(*l0);
            }
            if scope.is_function() {
                return None;
            }
        }
        None
    }

    /// Mutable counterpart of [`ScopeStack::nearest_loop_start`], for
    /// `break` to append its patch site to the loop's break list.
    pub fn nearest_loop_mut(&mut self) -> Option<&mut (usize, Vec<usize>)> {
        for scope in self.scopes.iter_mut().rev() {
            if scope.loop_labels.is_some() {
                return scope.loop_labels.as_mut();
            }
            if scope.is_function() {
                return None;
            }
        }
        None
    }

    /// Read-only lookup with no upvalue side effects, for C-function
    /// optimizer preconditions that must stay inert when they decline.
    pub fn peek(&self, name: &str) -> Option<Slot> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.lookup_local(name) {
                return Some(slot);
            }
        }
        None
    }

    /// Symbol resolution (§4.2). Returns `Ok(None)` when not found in any
    /// compile-time scope — the caller falls back to the environment
    /// handle (toplevel bindings) per step 3.
    pub fn resolve(&mut self, name: &str, span: Span) -> Result<Option<Slot>, CompileError> {
        let innermost = self.scopes.len() - 1;
        if let Some(slot) = self.scopes[innermost].lookup_local(name) {
            return Ok(Some(slot));
        }

        let mut defining = None;
        for i in (0..innermost).rev() {
            if let Some(slot) = self.scopes[i].lookup_local(name) {
                defining = Some((i, slot));
                break;
            }
        }
        let Some((def_idx, slot)) = defining else {
            return Ok(None);
        };

        // A constant has no stack location to capture — it's just as valid
        // recompiled as a fresh LOADCONST in whatever function references it
        // as it is in its defining scope, so crossing a function boundary to
        // reach one never needs an upvalue.
        if slot.is_constant() {
            return Ok(Some(slot));
        }

        let crossed: Vec<usize> = (def_idx + 1..=innermost)
            .filter(|&i| self.scopes[i].is_function())
            .collect();

        if crossed.is_empty() {
            // A plain outer lexical scope within the same function frame.
            return Ok(Some(slot));
        }

        let orig_index = slot.index;
        // `0` in a scope's own `envs` list is reserved for "capture my
        // direct parent's own stack" (matches the original's comment: "the
        // environment that corresponds to the direct parent's stack will
        // always have value 0"). A forwarding entry — "capture whatever my
        // parent already captured at position P" — must therefore be
        // stored as `P + 1` so it can never collide with that reserved 0,
        // hence the `forwarded_pos + 1` on every hop after the first.
        let mut forwarded_pos = 0i32;
        for (k, &scope_idx) in crossed.iter().enumerate() {
            let parent_value = if k == 0 { 0 } else { forwarded_pos + 1 };
            forwarded_pos = self.scopes[scope_idx].register_env(parent_value);
        }

        let _ = span; // kept for parity with the original's sourcemap-carrying resolve; no diagnostic needed on the success path
        Ok(Some(Slot::upvalue(orig_index, forwarded_pos + 1)))
    }
}
