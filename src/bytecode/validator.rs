//! `FuncDef` validator — static checks independent of VM execution.
//!
//! Validates a compiler-produced `FuncDef` against its own declared
//! `frame_size`/`consts`/`defs`/`envs`, catching a malformed finalizer
//! (§4.7) before it reaches the VM. Advisory only: callers are free to
//! ignore the result and hand the `FuncDef` to the VM anyway.

use crate::bytecode::Opcode;
use crate::funcdef::FuncDef;

/// A validation error with the instruction offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub offset: usize,
    pub kind: ValidationErrorKind,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instruction {}: {}", self.offset, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A register operand names a slot beyond `frame_size`.
    RegisterOutOfBounds { register: u8, frame_size: u32 },
    /// A `loadconst`/`closure` index exceeds the pool it indexes into.
    PoolIndexOutOfBounds { index: u16, pool_size: usize },
    /// A jump target falls outside `[0, bytecode.len())`.
    JumpOutOfBounds { target: i64, len: usize },
    /// An `envs` forwarding entry names an env index the parent can't have.
    EnvIndexOutOfBounds { index: i32 },
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegisterOutOfBounds { register, frame_size } => write!(
                f,
                "register r{} is outside the declared frame size {}",
                register, frame_size
            ),
            Self::PoolIndexOutOfBounds { index, pool_size } => {
                write!(f, "index {} out of bounds (pool size={})", index, pool_size)
            }
            Self::JumpOutOfBounds { target, len } => {
                write!(f, "jump target {} out of bounds (len={})", target, len)
            }
            Self::EnvIndexOutOfBounds { index } => {
                write!(f, "envs forwarding entry {} is negative", index)
            }
        }
    }
}

/// Validate `def` and, recursively, every nested def it owns.
///
/// Returns `Ok(())` if no issues are found, otherwise every problem
/// detected (does not short-circuit on the first error).
pub fn validate(def: &FuncDef) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    validate_into(def, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_into(def: &FuncDef, errors: &mut Vec<ValidationError>) {
    for &env in &def.envs {
        if env < 0 {
            errors.push(ValidationError {
                offset: 0,
                kind: ValidationErrorKind::EnvIndexOutOfBounds { index: env },
            });
        }
    }

    for (offset, instr) in def.bytecode.iter().enumerate() {
        let mut check_reg = |reg: u8, errors: &mut Vec<ValidationError>| {
            if reg as u32 >= def.frame_size {
                errors.push(ValidationError {
                    offset,
                    kind: ValidationErrorKind::RegisterOutOfBounds {
                        register: reg,
                        frame_size: def.frame_size,
                    },
                });
            }
        };

        match instr.opcode() {
            Opcode::Noop => {}
            Opcode::LoadConst => {
                check_reg(instr.a(), errors);
                if instr.bx() as usize >= def.constants.len() {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::PoolIndexOutOfBounds {
                            index: instr.bx(),
                            pool_size: def.constants.len(),
                        },
                    });
                }
            }
            Opcode::Closure => {
                check_reg(instr.a(), errors);
                if instr.bx() as usize >= def.defs.len() {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::PoolIndexOutOfBounds {
                            index: instr.bx(),
                            pool_size: def.defs.len(),
                        },
                    });
                }
            }
            Opcode::LoadNil | Opcode::Return => check_reg(instr.a(), errors),
            Opcode::ReturnNil => {}
            Opcode::Move | Opcode::SetRef => {
                check_reg(instr.a(), errors);
                check_reg(instr.b(), errors);
            }
            Opcode::GetUpvalue => {
                check_reg(instr.a(), errors);
                if instr.b() as usize >= def.envs.len() {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::EnvIndexOutOfBounds {
                            index: instr.b() as i32,
                        },
                    });
                }
            }
            Opcode::SetUpvalue => check_reg(instr.a(), errors),
            Opcode::Jump | Opcode::JumpIfFalse => {
                if matches!(instr.opcode(), Opcode::JumpIfFalse) {
                    check_reg(instr.a(), errors);
                }
                let target = offset as i64 + 1 + instr.sbx() as i64;
                if target < 0 || target as usize > def.bytecode.len() {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::JumpOutOfBounds {
                            target,
                            len: def.bytecode.len(),
                        },
                    });
                }
            }
            Opcode::Call | Opcode::TailCall => check_reg(instr.a(), errors),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Lt
            | Opcode::Lte
            | Opcode::Eq
            | Opcode::AddImmediate => {
                check_reg(instr.a(), errors);
                check_reg(instr.b(), errors);
            }
        }
    }

    for nested in &def.defs {
        validate_into(nested, errors);
    }
}
