//! A minimal reference interpreter for the end-to-end tests under
//! `tests/`. It exists only so the integration suite can assert on
//! *observable* behavior (§8's "result 7", "i == 3", ...); the crate itself
//! never executes a `FuncDef` (§1 Non-goals).
//!
//! Closures follow the full-frame-capture model implied by
//! `crate::scope::Scope::resolve` and `original_source/core/compile.h`: a
//! function's own register file is a `Value::FuncEnv`, and `def.envs[i] == 0`
//! means "capture the currently executing frame's `FuncEnv` itself", while
//! `def.envs[i] == N > 0` means "reuse whatever the executing frame already
//! captured at its own `envs[N - 1]`".

use loom_compiler::value::Closure;
use loom_compiler::{FuncDef, Instruction, Opcode, Value};
use std::cell::RefCell;
use std::rc::Rc;

type Frame = Rc<RefCell<Vec<Value>>>;

/// Run a zero-argument, zero-upvalue top-level `FuncDef` (what
/// `loom_compiler::compile` produces) to completion.
pub fn run(def: &Rc<FuncDef>) -> Value {
    exec(def, &[], Vec::new())
}

fn exec(def: &Rc<FuncDef>, envs: &[Value], args: Vec<Value>) -> Value {
    let size = (def.frame_size as usize).max(args.len()).max(1);
    let mut initial = vec![Value::Nil; size];
    for (i, a) in args.into_iter().enumerate() {
        initial[i] = a;
    }
    let regs: Frame = Rc::new(RefCell::new(initial));

    let mut pc = 0usize;
    loop {
        let instr = def.bytecode[pc];
        match instr.opcode() {
            Opcode::Noop => {}
            Opcode::LoadConst => {
                let v = def.constants[instr.bx() as usize].clone();
                regs.borrow_mut()[instr.a() as usize] = v;
            }
            Opcode::LoadNil => regs.borrow_mut()[instr.a() as usize] = Value::Nil,
            Opcode::Move => {
                let v = regs.borrow()[instr.b() as usize].clone();
                regs.borrow_mut()[instr.a() as usize] = v;
            }
            Opcode::GetUpvalue => {
                let v = read_env(envs, instr);
                regs.borrow_mut()[instr.a() as usize] = v;
            }
            Opcode::SetUpvalue => {
                let v = regs.borrow()[instr.a() as usize].clone();
                write_env(envs, instr, v);
            }
            Opcode::SetRef => panic!("setref has no emission path exercised by these tests"),
            Opcode::Jump => {
                pc = jump_target(pc, instr.sbx());
                continue;
            }
            Opcode::JumpIfFalse => {
                let test = regs.borrow()[instr.a() as usize].clone();
                if !test.is_truthy() {
                    pc = jump_target(pc, instr.sbx());
                    continue;
                }
            }
            Opcode::Call | Opcode::TailCall => {
                let base = instr.a() as usize;
                let argc = instr.c() as usize;
                let callee = regs.borrow()[base].clone();
                let call_args: Vec<Value> =
                    (0..argc).map(|i| regs.borrow()[base + 1 + i].clone()).collect();
                let result = apply(&callee, call_args);
                if instr.opcode() == Opcode::TailCall {
                    return result;
                }
                regs.borrow_mut()[base] = result;
            }
            Opcode::Return => return regs.borrow()[instr.a() as usize].clone(),
            Opcode::ReturnNil => return Value::Nil,
            Opcode::Closure => {
                let nested = def.defs[instr.bx() as usize].clone();
                let captured: Vec<Value> = nested
                    .envs
                    .iter()
                    .map(|&e| {
                        if e == 0 {
                            Value::FuncEnv(regs.clone())
                        } else {
                            envs[(e - 1) as usize].clone()
                        }
                    })
                    .collect();
                let closure = Value::Closure(Rc::new(Closure { def: nested, captured }));
                regs.borrow_mut()[instr.a() as usize] = closure;
            }
            op @ (Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Lt | Opcode::Lte | Opcode::Eq) => {
                let a = regs.borrow()[instr.b() as usize].clone();
                let b = regs.borrow()[instr.c() as usize].clone();
                regs.borrow_mut()[instr.a() as usize] = binop(op, &a, &b);
            }
            Opcode::AddImmediate => {
                let a = regs.borrow()[instr.b() as usize].clone();
                let Value::Number(n) = a else { panic!("add-immediate on a non-number") };
                regs.borrow_mut()[instr.a() as usize] = Value::number(n.0 + instr.c() as f64);
            }
        }
        pc += 1;
    }
}

fn jump_target(pc: usize, sbx: i16) -> usize {
    (pc as i64 + 1 + sbx as i64) as usize
}

fn read_env(envs: &[Value], instr: Instruction) -> Value {
    match &envs[instr.b() as usize] {
        Value::FuncEnv(frame) => frame.borrow()[instr.c() as usize].clone(),
        _ => panic!("getupvalue target is not a captured frame"),
    }
}

fn write_env(envs: &[Value], instr: Instruction, value: Value) {
    match &envs[instr.b() as usize] {
        Value::FuncEnv(frame) => frame.borrow_mut()[instr.c() as usize] = value,
        _ => panic!("setupvalue target is not a captured frame"),
    }
}

fn apply(callee: &Value, args: Vec<Value>) -> Value {
    match callee {
        Value::Closure(c) => exec(&c.def, &c.captured, args),
        Value::CFunction(f) => native(&f.name, &args),
        other => panic!("attempted to call a non-callable value: {other:?}"),
    }
}

fn native(name: &str, args: &[Value]) -> Value {
    let nums: Vec<f64> = args
        .iter()
        .map(|v| match v {
            Value::Number(n) => n.0,
            other => panic!("native {name}: non-number argument {other:?}"),
        })
        .collect();
    match name {
        "+" => Value::number(nums[0] + nums[1]),
        "-" => Value::number(nums[0] - nums[1]),
        "*" => Value::number(nums[0] * nums[1]),
        "/" => Value::number(nums[0] / nums[1]),
        "<" => Value::Bool(nums[0] < nums[1]),
        "<=" => Value::Bool(nums[0] <= nums[1]),
        "=" => Value::Bool(nums[0] == nums[1]),
        _ => panic!("native: unbound builtin {name}"),
    }
}

fn binop(op: Opcode, a: &Value, b: &Value) -> Value {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        panic!("arithmetic opcode on non-number operands")
    };
    match op {
        Opcode::Add => Value::number(x.0 + y.0),
        Opcode::Sub => Value::number(x.0 - y.0),
        Opcode::Mul => Value::number(x.0 * y.0),
        Opcode::Div => Value::number(x.0 / y.0),
        Opcode::Lt => Value::Bool(x.0 < y.0),
        Opcode::Lte => Value::Bool(x.0 <= y.0),
        Opcode::Eq => Value::Bool(x.0 == y.0),
        _ => unreachable!("only arithmetic opcodes dispatch here"),
    }
}

/// A toplevel [`loom_compiler::Env`] with `+`, `-`, `*`, `/`, `<`, `<=`, `=`
/// bound as native callables, for scenarios whose arithmetic isn't fully
/// constant-foldable at compile time (§8 row 4: `(+ x y)` over two
/// parameters).
pub fn arithmetic_env() -> loom_compiler::Env {
    let mut env = loom_compiler::Env::new();
    for name in ["+", "-", "*", "/", "<", "<=", "="] {
        env.define(name, Value::CFunction(Rc::new(loom_compiler::value::CFunction { name: Rc::from(name) })));
    }
    env
}
