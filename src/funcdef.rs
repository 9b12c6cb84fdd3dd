//! `FuncDef`: the compiler's output (§3.4, §6.3).
//!
//! Immutable once finalized — the scope stack (`crate::scope`) accumulates
//! everything below in mutable form and `Compiler::pop_funcdef` (§3.6/§4.7)
//! packages it. Mutation after publishing is forbidden (§5); nothing here
//! exposes `&mut` accessors for that reason.

use crate::bytecode::Instruction;
use crate::sourcemap::SourceMap;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// For each captured environment slot, which index to fetch it from in the
/// *parent* frame's own environment list. `0` means "the parent's own stack
/// frame"; an index forwards further up the chain. See the Design Notes'
/// "upvalue capture chain" entry (§9) and `crate::scope::Scope::resolve`.
pub type EnvMap = Vec<i32>;

/// A compiled function template, ready for the VM to instantiate as a
/// [`crate::value::Closure`] once paired with a captured-environment vector.
///
/// `constants`, `sourcemap`, and `defs` are excluded from (de)serialization:
/// `Value` carries runtime-only variants (`CFunction`, `Closure`, `Thread`)
/// that have no sensible wire representation, and `sourcemap` is a
/// diagnostics aid with no bearing on the bytecode itself. The derive here
/// covers the bytecode/envs/arity shape alone, for tooling that wants that
/// much without a whole `FuncDef` round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDef {
    /// Constants referenced by `LOADCONST`, deduplicated by the owning scope.
    #[serde(skip)]
    pub constants: Vec<Value>,
    /// Packed 32-bit instruction stream.
    pub bytecode: Vec<Instruction>,
    /// Parallel to `bytecode`: the source-map node blamed for each emitted
    /// instruction, for post-hoc diagnostics (disassembly, stack traces).
    #[serde(skip)]
    pub sourcemap: Vec<Rc<SourceMap>>,
    /// Nested `fn` scopes, referenced by `CLOSURE` via index.
    #[serde(skip)]
    pub defs: Vec<Rc<FuncDef>>,
    /// Upvalue forwarding table; see [`EnvMap`].
    pub envs: EnvMap,
    /// Fixed parameter count.
    pub arity: u32,
    /// Whether the last parameter collects extra arguments into an array.
    pub variadic: bool,
    /// Number of registers the VM must reserve for this frame (the scope's
    /// `smax`, §3.2).
    pub frame_size: u32,
}

impl FuncDef {
    /// A `FuncDef` has no free variables iff its upvalue table is empty —
    /// the end-to-end property from §8 row 6 ("a `fn` whose body never
    /// references an outer binding produces a `FuncDef` with empty `envs`").
    pub fn is_closed(&self) -> bool {
        self.envs.is_empty()
    }
}
