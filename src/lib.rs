//! loom-compiler — lowers tagged-value forms into register-machine
//! bytecode for a VM it does not itself run (§1).
//!
//! The public surface is small: build an [`Env`] of toplevel bindings, a
//! [`Value`] tree with a matching [`SourceMap`], and call [`compile`].
//! Everything else (scopes, slots, the instruction set) is exposed for
//! tooling — disassemblers, validators, diagnostic renderers — that needs
//! to inspect what the compiler produced.

pub mod bitset;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod env;
pub mod error;
pub mod funcdef;
pub mod scope;
pub mod slot;
pub mod sourcemap;
pub mod span;
pub mod value;

pub use bytecode::{Instruction, Opcode};
pub use compiler::{compile, Compiler, CompilerOptions, FoptsFlags, FormOptions};
pub use diagnostic::{Diagnostic, DiagnosticLevel, DIAG_VERSION};
pub use env::Env;
pub use error::CompileError;
pub use funcdef::FuncDef;
pub use scope::{Scope, ScopeFlags, ScopeStack};
pub use slot::{Slot, SlotFlags};
pub use sourcemap::SourceMap;
pub use span::Span;
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_form_end_to_end() {
        let form = Value::form(vec![Value::symbol("+"), Value::number(1.0), Value::number(2.0)]);
        let sourcemap = sourcemap::dummy_for(&form);
        let def = compile(form, sourcemap, Env::new()).unwrap();
        assert!(def.constants.iter().any(|c| c.equal(&Value::number(3.0))));
    }
}
