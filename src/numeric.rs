//! Pure evaluation of Wasm's test/compare/unary/binary/convert instructions.
//!
//! Every function here takes operands already popped off the value stack by
//! the stepper, in the order the operator wants them (for binary ops, the
//! first-pushed operand first). A type mismatch between the instruction and
//! its operand (which a validated module never produces) surfaces as
//! [`NumericError::Type`] instead of panicking, since this crate assumes but
//! does not itself enforce validation.

use crate::ast::Instr;
use crate::nan_preserving_float::{F32, F64};
use crate::value::{ArithmeticOps, ExtendInto, Float, Integer, RuntimeValue, TransmuteInto, TryTruncateInto, WrapInto};
use crate::TrapKind;
use std::fmt;

/// Failure of a numeric dispatch.
#[derive(Debug)]
pub enum NumericError {
    /// An operand had a runtime type the instruction doesn't accept.
    Type(String),
    /// The operation itself trapped (division by zero, bad int conversion, ...).
    Trap(TrapKind),
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NumericError::Type(msg) => write!(f, "{}", msg),
            NumericError::Trap(kind) => write!(f, "{}", kind),
        }
    }
}

impl From<TrapKind> for NumericError {
    fn from(kind: TrapKind) -> Self {
        NumericError::Trap(kind)
    }
}

macro_rules! extract {
    ($name:ident, $variant:ident, $ty:ty) => {
        fn $name(v: RuntimeValue) -> Result<$ty, NumericError> {
            match v {
                RuntimeValue::$variant(x) => Ok(x),
                other => Err(NumericError::Type(format!(
                    "expected {}, found {:?}",
                    stringify!($variant),
                    other.value_type()
                ))),
            }
        }
    };
}

extract!(as_i32, I32, i32);
extract!(as_i64, I64, i64);
extract!(as_f32, F32, F32);
extract!(as_f64, F64, F64);

fn bool_to_i32(b: bool) -> RuntimeValue {
    RuntimeValue::I32(if b { 1 } else { 0 })
}

/// `testOp`: i32/i64 `eqz`.
pub fn eval_test(instr: &Instr, a: RuntimeValue) -> Result<RuntimeValue, NumericError> {
    match instr {
        Instr::I32Eqz => Ok(bool_to_i32(as_i32(a)? == 0)),
        Instr::I64Eqz => Ok(bool_to_i32(as_i64(a)? == 0)),
        other => Err(NumericError::Type(format!("{:?} is not a test op", other))),
    }
}

/// `compareOp`: two same-typed operands, i32 boolean result.
pub fn eval_compare(instr: &Instr, a: RuntimeValue, b: RuntimeValue) -> Result<RuntimeValue, NumericError> {
    macro_rules! cmp_i32 {
        ($op:tt) => {{
            let (a, b) = (as_i32(a)?, as_i32(b)?);
            Ok(bool_to_i32(a $op b))
        }};
    }
    macro_rules! cmp_u32 {
        ($op:tt) => {{
            let (a, b) = (as_i32(a)? as u32, as_i32(b)? as u32);
            Ok(bool_to_i32(a $op b))
        }};
    }
    macro_rules! cmp_i64 {
        ($op:tt) => {{
            let (a, b) = (as_i64(a)?, as_i64(b)?);
            Ok(bool_to_i32(a $op b))
        }};
    }
    macro_rules! cmp_u64 {
        ($op:tt) => {{
            let (a, b) = (as_i64(a)? as u64, as_i64(b)? as u64);
            Ok(bool_to_i32(a $op b))
        }};
    }
    macro_rules! cmp_f32 {
        ($op:tt) => {{
            let (a, b) = (as_f32(a)?, as_f32(b)?);
            Ok(bool_to_i32(a $op b))
        }};
    }
    macro_rules! cmp_f64 {
        ($op:tt) => {{
            let (a, b) = (as_f64(a)?, as_f64(b)?);
            Ok(bool_to_i32(a $op b))
        }};
    }

    match instr {
        Instr::I32Eq => cmp_i32!(==),
        Instr::I32Ne => cmp_i32!(!=),
        Instr::I32LtS => cmp_i32!(<),
        Instr::I32GtS => cmp_i32!(>),
        Instr::I32LeS => cmp_i32!(<=),
        Instr::I32GeS => cmp_i32!(>=),
        Instr::I32LtU => cmp_u32!(<),
        Instr::I32GtU => cmp_u32!(>),
        Instr::I32LeU => cmp_u32!(<=),
        Instr::I32GeU => cmp_u32!(>=),

        Instr::I64Eq => cmp_i64!(==),
        Instr::I64Ne => cmp_i64!(!=),
        Instr::I64LtS => cmp_i64!(<),
        Instr::I64GtS => cmp_i64!(>),
        Instr::I64LeS => cmp_i64!(<=),
        Instr::I64GeS => cmp_i64!(>=),
        Instr::I64LtU => cmp_u64!(<),
        Instr::I64GtU => cmp_u64!(>),
        Instr::I64LeU => cmp_u64!(<=),
        Instr::I64GeU => cmp_u64!(>=),

        Instr::F32Eq => cmp_f32!(==),
        Instr::F32Ne => cmp_f32!(!=),
        Instr::F32Lt => cmp_f32!(<),
        Instr::F32Gt => cmp_f32!(>),
        Instr::F32Le => cmp_f32!(<=),
        Instr::F32Ge => cmp_f32!(>=),

        Instr::F64Eq => cmp_f64!(==),
        Instr::F64Ne => cmp_f64!(!=),
        Instr::F64Lt => cmp_f64!(<),
        Instr::F64Gt => cmp_f64!(>),
        Instr::F64Le => cmp_f64!(<=),
        Instr::F64Ge => cmp_f64!(>=),

        other => Err(NumericError::Type(format!("{:?} is not a compare op", other))),
    }
}

/// `unaryOp`: single same-typed operand and result.
pub fn eval_unary(instr: &Instr, a: RuntimeValue) -> Result<RuntimeValue, NumericError> {
    match instr {
        Instr::I32Clz => Ok(RuntimeValue::I32(as_i32(a)?.leading_zeros())),
        Instr::I32Ctz => Ok(RuntimeValue::I32(as_i32(a)?.trailing_zeros())),
        Instr::I32Popcnt => Ok(RuntimeValue::I32(as_i32(a)?.count_ones())),

        Instr::I64Clz => Ok(RuntimeValue::I64(as_i64(a)?.leading_zeros())),
        Instr::I64Ctz => Ok(RuntimeValue::I64(as_i64(a)?.trailing_zeros())),
        Instr::I64Popcnt => Ok(RuntimeValue::I64(as_i64(a)?.count_ones())),

        Instr::F32Abs => Ok(RuntimeValue::F32(as_f32(a)?.abs())),
        Instr::F32Neg => Ok(RuntimeValue::F32(-as_f32(a)?)),
        Instr::F32Ceil => Ok(RuntimeValue::F32(as_f32(a)?.ceil())),
        Instr::F32Floor => Ok(RuntimeValue::F32(as_f32(a)?.floor())),
        Instr::F32Trunc => Ok(RuntimeValue::F32(as_f32(a)?.trunc())),
        Instr::F32Nearest => Ok(RuntimeValue::F32(as_f32(a)?.nearest())),
        Instr::F32Sqrt => Ok(RuntimeValue::F32(as_f32(a)?.sqrt())),

        Instr::F64Abs => Ok(RuntimeValue::F64(as_f64(a)?.abs())),
        Instr::F64Neg => Ok(RuntimeValue::F64(-as_f64(a)?)),
        Instr::F64Ceil => Ok(RuntimeValue::F64(as_f64(a)?.ceil())),
        Instr::F64Floor => Ok(RuntimeValue::F64(as_f64(a)?.floor())),
        Instr::F64Trunc => Ok(RuntimeValue::F64(as_f64(a)?.trunc())),
        Instr::F64Nearest => Ok(RuntimeValue::F64(as_f64(a)?.nearest())),
        Instr::F64Sqrt => Ok(RuntimeValue::F64(as_f64(a)?.sqrt())),

        other => Err(NumericError::Type(format!("{:?} is not a unary op", other))),
    }
}

/// `binaryOp`: two same-typed operands, same-typed result. The second
/// operand (`b`) is the one that was on top of the stack.
pub fn eval_binary(instr: &Instr, a: RuntimeValue, b: RuntimeValue) -> Result<RuntimeValue, NumericError> {
    match instr {
        Instr::I32Add => Ok(RuntimeValue::I32(as_i32(a)?.add(as_i32(b)?))),
        Instr::I32Sub => Ok(RuntimeValue::I32(as_i32(a)?.sub(as_i32(b)?))),
        Instr::I32Mul => Ok(RuntimeValue::I32(as_i32(a)?.mul(as_i32(b)?))),
        Instr::I32DivS => Ok(RuntimeValue::I32(as_i32(a)?.div(as_i32(b)?)?)),
        Instr::I32DivU => {
            let (a, b) = (as_i32(a)? as u32, as_i32(b)? as u32);
            Ok(RuntimeValue::I32(a.div(b)? as i32))
        }
        Instr::I32RemS => Ok(RuntimeValue::I32(as_i32(a)?.rem(as_i32(b)?)?)),
        Instr::I32RemU => {
            let (a, b) = (as_i32(a)? as u32, as_i32(b)? as u32);
            Ok(RuntimeValue::I32(a.rem(b)? as i32))
        }
        Instr::I32And => Ok(RuntimeValue::I32(as_i32(a)? & as_i32(b)?)),
        Instr::I32Or => Ok(RuntimeValue::I32(as_i32(a)? | as_i32(b)?)),
        Instr::I32Xor => Ok(RuntimeValue::I32(as_i32(a)? ^ as_i32(b)?)),
        Instr::I32Shl => Ok(RuntimeValue::I32(as_i32(a)?.wrapping_shl(as_i32(b)? as u32))),
        Instr::I32ShrS => Ok(RuntimeValue::I32(as_i32(a)?.wrapping_shr(as_i32(b)? as u32))),
        Instr::I32ShrU => {
            let (a, b) = (as_i32(a)? as u32, as_i32(b)? as u32);
            Ok(RuntimeValue::I32(a.wrapping_shr(b) as i32))
        }
        Instr::I32Rotl => Ok(RuntimeValue::I32(as_i32(a)?.rotl(as_i32(b)?))),
        Instr::I32Rotr => Ok(RuntimeValue::I32(as_i32(a)?.rotr(as_i32(b)?))),

        Instr::I64Add => Ok(RuntimeValue::I64(as_i64(a)?.add(as_i64(b)?))),
        Instr::I64Sub => Ok(RuntimeValue::I64(as_i64(a)?.sub(as_i64(b)?))),
        Instr::I64Mul => Ok(RuntimeValue::I64(as_i64(a)?.mul(as_i64(b)?))),
        Instr::I64DivS => Ok(RuntimeValue::I64(as_i64(a)?.div(as_i64(b)?)?)),
        Instr::I64DivU => {
            let (a, b) = (as_i64(a)? as u64, as_i64(b)? as u64);
            Ok(RuntimeValue::I64(a.div(b)? as i64))
        }
        Instr::I64RemS => Ok(RuntimeValue::I64(as_i64(a)?.rem(as_i64(b)?)?)),
        Instr::I64RemU => {
            let (a, b) = (as_i64(a)? as u64, as_i64(b)? as u64);
            Ok(RuntimeValue::I64(a.rem(b)? as i64))
        }
        Instr::I64And => Ok(RuntimeValue::I64(as_i64(a)? & as_i64(b)?)),
        Instr::I64Or => Ok(RuntimeValue::I64(as_i64(a)? | as_i64(b)?)),
        Instr::I64Xor => Ok(RuntimeValue::I64(as_i64(a)? ^ as_i64(b)?)),
        Instr::I64Shl => Ok(RuntimeValue::I64(as_i64(a)?.wrapping_shl(as_i64(b)? as u32))),
        Instr::I64ShrS => Ok(RuntimeValue::I64(as_i64(a)?.wrapping_shr(as_i64(b)? as u32))),
        Instr::I64ShrU => {
            let (a, b) = (as_i64(a)? as u64, as_i64(b)? as u64);
            Ok(RuntimeValue::I64(a.wrapping_shr(b as u32) as i64))
        }
        Instr::I64Rotl => Ok(RuntimeValue::I64(as_i64(a)?.rotl(as_i64(b)?))),
        Instr::I64Rotr => Ok(RuntimeValue::I64(as_i64(a)?.rotr(as_i64(b)?))),

        Instr::F32Add => Ok(RuntimeValue::F32(as_f32(a)?.add(as_f32(b)?))),
        Instr::F32Sub => Ok(RuntimeValue::F32(as_f32(a)?.sub(as_f32(b)?))),
        Instr::F32Mul => Ok(RuntimeValue::F32(as_f32(a)?.mul(as_f32(b)?))),
        Instr::F32Div => Ok(RuntimeValue::F32(as_f32(a)?.div(as_f32(b)?)?)),
        // F32/F64 carry inherent `min`/`max` with plain (non-NaN-propagating)
        // semantics; go through the trait explicitly for Wasm's NaN rules.
        Instr::F32Min => Ok(RuntimeValue::F32(Float::min(as_f32(a)?, as_f32(b)?))),
        Instr::F32Max => Ok(RuntimeValue::F32(Float::max(as_f32(a)?, as_f32(b)?))),
        Instr::F32Copysign => Ok(RuntimeValue::F32(as_f32(a)?.copysign(as_f32(b)?))),

        Instr::F64Add => Ok(RuntimeValue::F64(as_f64(a)?.add(as_f64(b)?))),
        Instr::F64Sub => Ok(RuntimeValue::F64(as_f64(a)?.sub(as_f64(b)?))),
        Instr::F64Mul => Ok(RuntimeValue::F64(as_f64(a)?.mul(as_f64(b)?))),
        Instr::F64Div => Ok(RuntimeValue::F64(as_f64(a)?.div(as_f64(b)?)?)),
        Instr::F64Min => Ok(RuntimeValue::F64(Float::min(as_f64(a)?, as_f64(b)?))),
        Instr::F64Max => Ok(RuntimeValue::F64(Float::max(as_f64(a)?, as_f64(b)?))),
        Instr::F64Copysign => Ok(RuntimeValue::F64(as_f64(a)?.copysign(as_f64(b)?))),

        other => Err(NumericError::Type(format!("{:?} is not a binary op", other))),
    }
}

/// `intCvtOp` / `floatCvtOp`: type-directed conversion (wrap, extend,
/// truncate, demote, promote, reinterpret).
pub fn eval_convert(instr: &Instr, a: RuntimeValue) -> Result<RuntimeValue, NumericError> {
    match instr {
        Instr::I32WrapI64 => Ok(RuntimeValue::I32(as_i64(a)?.wrap_into())),
        Instr::I32TruncSF32 => Ok(RuntimeValue::I32(as_f32(a)?.try_truncate_into()?)),
        Instr::I32TruncUF32 => {
            let u: u32 = as_f32(a)?.try_truncate_into()?;
            Ok(RuntimeValue::I32(u as i32))
        }
        Instr::I32TruncSF64 => Ok(RuntimeValue::I32(as_f64(a)?.try_truncate_into()?)),
        Instr::I32TruncUF64 => {
            let u: u32 = as_f64(a)?.try_truncate_into()?;
            Ok(RuntimeValue::I32(u as i32))
        }

        Instr::I64ExtendSI32 => Ok(RuntimeValue::I64(as_i32(a)?.extend_into())),
        Instr::I64ExtendUI32 => Ok(RuntimeValue::I64((as_i32(a)? as u32).extend_into())),
        Instr::I64TruncSF32 => Ok(RuntimeValue::I64(as_f32(a)?.try_truncate_into()?)),
        Instr::I64TruncUF32 => {
            let u: u64 = as_f32(a)?.try_truncate_into()?;
            Ok(RuntimeValue::I64(u as i64))
        }
        Instr::I64TruncSF64 => Ok(RuntimeValue::I64(as_f64(a)?.try_truncate_into()?)),
        Instr::I64TruncUF64 => {
            let u: u64 = as_f64(a)?.try_truncate_into()?;
            Ok(RuntimeValue::I64(u as i64))
        }

        Instr::F32ConvertSI32 => Ok(RuntimeValue::F32(as_i32(a)?.extend_into())),
        Instr::F32ConvertUI32 => Ok(RuntimeValue::F32((as_i32(a)? as u32).extend_into())),
        Instr::F32ConvertSI64 => Ok(RuntimeValue::F32(as_i64(a)?.wrap_into())),
        Instr::F32ConvertUI64 => Ok(RuntimeValue::F32((as_i64(a)? as u64).wrap_into())),
        Instr::F32DemoteF64 => Ok(RuntimeValue::F32(as_f64(a)?.wrap_into())),

        Instr::F64ConvertSI32 => Ok(RuntimeValue::F64(as_i32(a)?.extend_into())),
        Instr::F64ConvertUI32 => Ok(RuntimeValue::F64((as_i32(a)? as u32).extend_into())),
        Instr::F64ConvertSI64 => Ok(RuntimeValue::F64(as_i64(a)?.extend_into())),
        Instr::F64ConvertUI64 => Ok(RuntimeValue::F64((as_i64(a)? as u64).extend_into())),
        Instr::F64PromoteF32 => Ok(RuntimeValue::F64(as_f32(a)?.extend_into())),

        Instr::I32ReinterpretF32 => Ok(RuntimeValue::I32(as_f32(a)?.transmute_into())),
        Instr::I64ReinterpretF64 => Ok(RuntimeValue::I64(as_f64(a)?.transmute_into())),
        Instr::F32ReinterpretI32 => Ok(RuntimeValue::F32(as_i32(a)?.transmute_into())),
        Instr::F64ReinterpretI64 => Ok(RuntimeValue::F64(as_i64(a)?.transmute_into())),

        other => Err(NumericError::Type(format!("{:?} is not a convert op", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wraps() {
        let r = eval_binary(&Instr::I32Add, RuntimeValue::I32(i32::MAX), RuntimeValue::I32(1)).unwrap();
        assert_eq!(r, RuntimeValue::I32(i32::MIN));
    }

    #[test]
    fn div_by_zero_traps() {
        let err = eval_binary(&Instr::I32DivS, RuntimeValue::I32(1), RuntimeValue::I32(0)).unwrap_err();
        assert!(matches!(err, NumericError::Trap(TrapKind::DivisionByZero)));
    }

    #[test]
    fn unsigned_division_ignores_sign() {
        let r = eval_binary(&Instr::I32DivU, RuntimeValue::I32(-1), RuntimeValue::I32(2)).unwrap();
        assert_eq!(r, RuntimeValue::I32(((u32::MAX) / 2) as i32));
    }

    #[test]
    fn eqz_detects_zero() {
        assert_eq!(eval_test(&Instr::I32Eqz, RuntimeValue::I32(0)).unwrap(), RuntimeValue::I32(1));
        assert_eq!(eval_test(&Instr::I32Eqz, RuntimeValue::I32(4)).unwrap(), RuntimeValue::I32(0));
    }

    #[test]
    fn unsigned_compare_treats_negative_as_large() {
        let r = eval_compare(&Instr::I32LtU, RuntimeValue::I32(-1), RuntimeValue::I32(1)).unwrap();
        assert_eq!(r, RuntimeValue::I32(0));
    }

    #[test]
    fn wrap_truncates_high_bits() {
        let r = eval_convert(&Instr::I32WrapI64, RuntimeValue::I64(0x1_0000_0001)).unwrap();
        assert_eq!(r, RuntimeValue::I32(1));
    }

    #[test]
    fn reinterpret_round_trips() {
        let bits = eval_convert(&Instr::I32ReinterpretF32, RuntimeValue::F32(1.5f32.into())).unwrap();
        let back = eval_convert(&Instr::F32ReinterpretI32, bits).unwrap();
        assert_eq!(back, RuntimeValue::F32(1.5f32.into()));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let err = eval_binary(&Instr::I32Add, RuntimeValue::F32(1.0f32.into()), RuntimeValue::I32(1)).unwrap_err();
        assert!(matches!(err, NumericError::Type(_)));
    }
}
