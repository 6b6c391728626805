//! Evaluation of constant initializer expressions (global initializers,
//! element/data segment offsets).
//!
//! Restricted to `Const` and `GetGlobal` of an already-allocated global, so
//! this doesn't need the stepper's full machinery: a constant expression
//! never branches, calls, or touches memory.

use crate::ast::Instr;
use crate::{Error, GlobalRef, RuntimeValue};

/// Evaluate a constant initializer against the globals allocated so far for
/// the instantiating module.
pub(crate) fn eval_const(expr: &[Instr], globals: &[GlobalRef]) -> Result<RuntimeValue, Error> {
    if expr.len() != 1 {
        return Err(Error::crash("constant initializer must be a single instruction"));
    }
    match &expr[0] {
        Instr::I32Const(v) => Ok(RuntimeValue::I32(*v)),
        Instr::I64Const(v) => Ok(RuntimeValue::I64(*v)),
        Instr::F32Const(v) => Ok(RuntimeValue::F32(*v)),
        Instr::F64Const(v) => Ok(RuntimeValue::F64(*v)),
        Instr::GetGlobal(idx) => globals
            .get(*idx as usize)
            .map(|g| g.get())
            .ok_or_else(|| Error::crash(format!("constant initializer referenced undefined global {}", idx))),
        other => Err(Error::crash(format!("illegal constant initializer instruction {:?}", other))),
    }
}

/// Evaluate a constant initializer expected to produce an `i32` (element and
/// data segment offsets).
pub(crate) fn eval_const_i32(expr: &[Instr], globals: &[GlobalRef]) -> Result<i32, Error> {
    match eval_const(expr, globals)? {
        RuntimeValue::I32(v) => Ok(v),
        other => Err(Error::crash(format!("expected i32 offset, found {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_evaluates_directly() {
        assert_eq!(eval_const(&[Instr::I32Const(42)], &[]).unwrap(), RuntimeValue::I32(42));
    }

    #[test]
    fn get_global_reads_allocated_global() {
        use crate::types::{GlobalDescriptor, ValueType};
        use crate::GlobalInstance;
        let g = GlobalInstance::alloc(GlobalDescriptor::new(ValueType::I32, false), RuntimeValue::I32(9));
        assert_eq!(eval_const(&[Instr::GetGlobal(0)], &[g]).unwrap(), RuntimeValue::I32(9));
    }

    #[test]
    fn rejects_non_constant_expressions() {
        assert!(eval_const(&[Instr::I32Add], &[]).is_err());
        assert!(eval_const(&[Instr::I32Const(1), Instr::I32Const(2)], &[]).is_err());
    }
}
