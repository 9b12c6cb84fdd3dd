//! Top-level environment handle (§3.5, §4.2 step 3).
//!
//! The last resort in symbol resolution: names not found in any compile-time
//! scope are looked up here before giving up with `UNBOUND_SYMBOL`. This
//! models the host's global bindings table (what a REPL or module loader
//! would populate); the compiler core only ever reads it.

use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// Toplevel symbol → value bindings visible to a compilation.
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: HashMap<Rc<str>, Value>,
}

impl Env {
    pub fn new() -> Self {
        Env { bindings: HashMap::new() }
    }

    pub fn define(&mut self, name: impl Into<Rc<str>>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Resolve `name` to its bound value, if any. Per §4.2 step 3, a hit
    /// here is materialized as a constant slot — the compiler core treats
    /// toplevel bindings as a frozen snapshot at compile time.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_on_undefined_name() {
        let env = Env::new();
        assert!(env.lookup("undefined").is_none());
    }

    #[test]
    fn define_then_lookup_round_trips() {
        let mut env = Env::new();
        env.define("pi", Value::number(3.0));
        assert!(env.lookup("pi").unwrap().equal(&Value::number(3.0)));
    }
}
