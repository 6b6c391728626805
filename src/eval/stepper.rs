//! The small-step interpreter loop: one admin-instruction at a time, using
//! the host call stack to mirror Wasm's label/frame nesting. A `Label` or
//! `Framed` admin-instruction is handled by recursively running its own
//! inner [`Code`] to completion and interpreting what comes back: a trap
//! propagates straight through, a branch or return either gets consumed at
//! the right boundary or keeps climbing outward.

use super::{AdminInstr, Code, Config, Frame};
use crate::ast::Instr;
use crate::global::GlobalError;
use crate::memory::MemoryError;
use crate::numeric::{self, NumericError};
use crate::types::ValueType;
use crate::{Error, RuntimeValue, TrapKind};
use std::cell::Cell;

/// What running a [`Code`] to the end of its instruction stream produced.
pub(super) enum Signal {
    /// The instruction stream ran dry; `Code::values` holds whatever is left
    /// on the stack.
    Done,
    Trap(TrapKind),
    Return(Vec<RuntimeValue>),
    Break(u32, Vec<RuntimeValue>),
}

/// Drive `code` until its instruction stream is empty or it produces a
/// signal that isn't consumed by a `Label`/`Framed` nested within it.
pub(super) fn run(ctx: &Config, code: &mut Code) -> Result<Signal, Error> {
    loop {
        let instr = match code.instrs.pop_front() {
            None => return Ok(Signal::Done),
            Some(instr) => instr,
        };
        match instr {
            AdminInstr::Plain(instr) => exec_plain(ctx, code, instr)?,
            AdminInstr::Invoke(func) => exec_invoke(ctx, code, func)?,
            AdminInstr::Trapping(kind) => return Ok(Signal::Trap(kind)),
            AdminInstr::Returning(vs) => return Ok(Signal::Return(vs)),
            AdminInstr::Breaking(depth, vs) => return Ok(Signal::Break(depth, vs)),
            AdminInstr::Label { arity, continuation, inner } => {
                let mut inner = inner;
                match run(ctx, &mut inner)? {
                    Signal::Done => code.values.extend(inner.values),
                    Signal::Trap(kind) => return Ok(Signal::Trap(kind)),
                    Signal::Return(vs) => return Ok(Signal::Return(vs)),
                    Signal::Break(0, vs) => {
                        code.values.extend(take_top(vs, arity_count(arity))?);
                        for instr in continuation.iter().rev() {
                            code.instrs.push_front(AdminInstr::Plain(instr.clone()));
                        }
                    }
                    Signal::Break(depth, vs) => return Ok(Signal::Break(depth - 1, vs)),
                }
            }
            AdminInstr::Framed { arity, frame, inner } => {
                let budget = ctx.budget.get() - 1;
                if budget <= 0 {
                    return Err(Error::exhausted("call stack exhausted"));
                }
                ctx.budget.set(budget);
                let mut inner = inner;
                let frame_ctx = ctx.with_frame(frame);
                let outcome = run(&frame_ctx, &mut inner)?;
                ctx.budget.set(ctx.budget.get() + 1);
                match outcome {
                    Signal::Done => code.values.extend(inner.values),
                    Signal::Trap(kind) => return Ok(Signal::Trap(kind)),
                    Signal::Return(vs) => code.values.extend(take_top(vs, arity_count(arity))?),
                    Signal::Break(_, _) => return Err(Error::crash("undefined label")),
                }
            }
        }
    }
}

fn arity_count(arity: Option<ValueType>) -> usize {
    if arity.is_some() {
        1
    } else {
        0
    }
}

fn take_top(mut vs: Vec<RuntimeValue>, n: usize) -> Result<Vec<RuntimeValue>, Error> {
    if vs.len() < n {
        return Err(Error::crash("stack underflow at label/frame boundary"));
    }
    Ok(vs.split_off(vs.len() - n))
}

fn pop(code: &mut Code) -> Result<RuntimeValue, Error> {
    code.values.pop().ok_or_else(|| Error::crash("stack underflow"))
}

fn pop_i32(code: &mut Code) -> Result<i32, Error> {
    match pop(code)? {
        RuntimeValue::I32(v) => Ok(v),
        other => Err(Error::crash(format!("expected i32 operand, found {}", other.value_type()))),
    }
}

fn current_memory(ctx: &Config) -> Result<crate::MemoryRef, Error> {
    ctx.modules
        .get(&ctx.frame.module)
        .ok_or_else(|| Error::crash("current module missing from store"))?
        .memory_by_index(0)
        .ok_or_else(|| Error::crash("no memory 0 in current module"))
}

fn mem_trap(e: MemoryError) -> TrapKind {
    match e {
        MemoryError::Bounds => TrapKind::MemoryAccessOutOfBounds,
        MemoryError::SizeOverflow => TrapKind::MemorySizeOverflow,
        MemoryError::SizeLimit => TrapKind::MemorySizeLimitReached,
        MemoryError::Type => TrapKind::MemoryTypeMismatch,
        MemoryError::OutOfMemory => TrapKind::OutOfMemory,
    }
}

fn exec_load(ctx: &Config, code: &mut Code, ty: ValueType, offset: u32) -> Result<(), Error> {
    let base = pop_i32(code)?;
    let mem = current_memory(ctx)?;
    match mem.load_value(ty, base, offset) {
        Ok(v) => code.values.push(v),
        Err(e) => code.instrs.push_front(AdminInstr::Trapping(mem_trap(e))),
    }
    Ok(())
}

fn exec_load_packed(ctx: &Config, code: &mut Code, width: u32, sign_extend: bool, result_ty: ValueType, offset: u32) -> Result<(), Error> {
    let base = pop_i32(code)?;
    let mem = current_memory(ctx)?;
    match mem.load_packed(width, sign_extend, result_ty, base, offset) {
        Ok(v) => code.values.push(v),
        Err(e) => code.instrs.push_front(AdminInstr::Trapping(mem_trap(e))),
    }
    Ok(())
}

fn exec_store(ctx: &Config, code: &mut Code, offset: u32) -> Result<(), Error> {
    let val = pop(code)?;
    let base = pop_i32(code)?;
    let mem = current_memory(ctx)?;
    if let Err(e) = mem.store_value(val, base, offset) {
        code.instrs.push_front(AdminInstr::Trapping(mem_trap(e)));
    }
    Ok(())
}

fn exec_store_packed(ctx: &Config, code: &mut Code, width: u32, offset: u32) -> Result<(), Error> {
    let val = pop(code)?;
    let base = pop_i32(code)?;
    let mem = current_memory(ctx)?;
    if let Err(e) = mem.store_packed(width, val, base, offset) {
        code.instrs.push_front(AdminInstr::Trapping(mem_trap(e)));
    }
    Ok(())
}

/// Execute one plain Wasm instruction, mutating `code`'s value stack and/or
/// prepending follow-up admin-instructions onto its instruction stream.
fn exec_plain(ctx: &Config, code: &mut Code, instr: Instr) -> Result<(), Error> {
    use Instr::*;
    match instr {
        Unreachable => code.instrs.push_front(AdminInstr::Trapping(TrapKind::Unreachable)),
        Nop => {}
        Drop => {
            pop(code)?;
        }
        Select => {
            let cond = pop_i32(code)?;
            let on_zero = pop(code)?;
            let on_nonzero = pop(code)?;
            code.values.push(if cond != 0 { on_nonzero } else { on_zero });
        }

        Block(ty, body) => {
            code.instrs.push_front(AdminInstr::Label {
                arity: ty,
                continuation: Vec::new().into(),
                inner: Code::plain(&body),
            });
        }
        Loop(ty, body) => {
            let continuation: std::rc::Rc<[Instr]> = vec![Instr::Loop(ty, std::rc::Rc::clone(&body))].into();
            code.instrs.push_front(AdminInstr::Label {
                arity: None,
                continuation,
                inner: Code::plain(&body),
            });
        }
        If(ty, then_body, else_body) => {
            let cond = pop_i32(code)?;
            let chosen = if cond != 0 { then_body } else { else_body };
            code.instrs.push_front(AdminInstr::Plain(Instr::Block(ty, chosen)));
        }
        Br(depth) => {
            let vs = std::mem::take(&mut code.values);
            code.instrs.push_front(AdminInstr::Breaking(depth, vs));
        }
        BrIf(depth) => {
            let cond = pop_i32(code)?;
            if cond != 0 {
                code.instrs.push_front(AdminInstr::Plain(Instr::Br(depth)));
            }
        }
        BrTable(table, default) => {
            let i = pop_i32(code)?;
            let target = if i < 0 || i as usize >= table.len() { default } else { table[i as usize] };
            code.instrs.push_front(AdminInstr::Plain(Instr::Br(target)));
        }
        Return => {
            let vs = std::mem::take(&mut code.values);
            code.instrs.push_front(AdminInstr::Returning(vs));
        }

        Call(idx) => {
            let func = ctx
                .modules
                .get(&ctx.frame.module)
                .and_then(|inst| inst.func_by_index(idx))
                .ok_or_else(|| Error::crash("call referenced undefined function"))?;
            code.instrs.push_front(AdminInstr::Invoke(func));
        }
        CallIndirect(type_idx) => {
            let i = pop_i32(code)?;
            let inst = ctx.modules.get(&ctx.frame.module).ok_or_else(|| Error::crash("current module missing from store"))?;
            let table = inst.table_by_index(0).ok_or_else(|| Error::crash("call_indirect with no table 0"))?;
            let expected = inst
                .signature_by_index(type_idx)
                .ok_or_else(|| Error::crash("call_indirect referenced undefined type"))?;
            if i < 0 {
                code.instrs.push_front(AdminInstr::Trapping(TrapKind::UninitializedElement(i as u32)));
                return Ok(());
            }
            let slot = table.load(i as u32).map_err(|_| Error::trap_kind(TrapKind::UninitializedElement(i as u32)))?;
            match slot {
                None => code.instrs.push_front(AdminInstr::Trapping(TrapKind::UninitializedElement(i as u32))),
                Some(func) if func.signature() != expected => {
                    code.instrs.push_front(AdminInstr::Trapping(TrapKind::IndirectCallTypeMismatch));
                }
                Some(func) => code.instrs.push_front(AdminInstr::Invoke(func)),
            }
        }

        GetLocal(idx) => {
            let v = ctx
                .frame
                .locals
                .get(idx as usize)
                .ok_or_else(|| Error::crash("local index out of bounds"))?
                .get();
            code.values.push(v);
        }
        SetLocal(idx) => {
            let v = pop(code)?;
            set_local(ctx, idx, v)?;
        }
        TeeLocal(idx) => {
            let v = pop(code)?;
            set_local(ctx, idx, v)?;
            code.values.push(v);
        }
        GetGlobal(idx) => {
            let inst = ctx.modules.get(&ctx.frame.module).ok_or_else(|| Error::crash("current module missing from store"))?;
            let g = inst.global_by_index(idx).ok_or_else(|| Error::crash("global index out of bounds"))?;
            code.values.push(g.get());
        }
        SetGlobal(idx) => {
            let v = pop(code)?;
            let inst = ctx.modules.get(&ctx.frame.module).ok_or_else(|| Error::crash("current module missing from store"))?;
            let g = inst.global_by_index(idx).ok_or_else(|| Error::crash("global index out of bounds"))?;
            match g.set(v) {
                Ok(()) => {}
                Err(GlobalError::NotMutable) => code.instrs.push_front(AdminInstr::Trapping(TrapKind::ImmutableGlobalWrite)),
                Err(GlobalError::TypeError) => code.instrs.push_front(AdminInstr::Trapping(TrapKind::GlobalTypeMismatch)),
            }
        }

        I32Load(offset) => exec_load(ctx, code, ValueType::I32, offset)?,
        I64Load(offset) => exec_load(ctx, code, ValueType::I64, offset)?,
        F32Load(offset) => exec_load(ctx, code, ValueType::F32, offset)?,
        F64Load(offset) => exec_load(ctx, code, ValueType::F64, offset)?,
        I32Load8S(offset) => exec_load_packed(ctx, code, 1, true, ValueType::I32, offset)?,
        I32Load8U(offset) => exec_load_packed(ctx, code, 1, false, ValueType::I32, offset)?,
        I32Load16S(offset) => exec_load_packed(ctx, code, 2, true, ValueType::I32, offset)?,
        I32Load16U(offset) => exec_load_packed(ctx, code, 2, false, ValueType::I32, offset)?,
        I64Load8S(offset) => exec_load_packed(ctx, code, 1, true, ValueType::I64, offset)?,
        I64Load8U(offset) => exec_load_packed(ctx, code, 1, false, ValueType::I64, offset)?,
        I64Load16S(offset) => exec_load_packed(ctx, code, 2, true, ValueType::I64, offset)?,
        I64Load16U(offset) => exec_load_packed(ctx, code, 2, false, ValueType::I64, offset)?,
        I64Load32S(offset) => exec_load_packed(ctx, code, 4, true, ValueType::I64, offset)?,
        I64Load32U(offset) => exec_load_packed(ctx, code, 4, false, ValueType::I64, offset)?,
        I32Store(offset) => exec_store(ctx, code, offset)?,
        I64Store(offset) => exec_store(ctx, code, offset)?,
        F32Store(offset) => exec_store(ctx, code, offset)?,
        F64Store(offset) => exec_store(ctx, code, offset)?,
        I32Store8(offset) => exec_store_packed(ctx, code, 1, offset)?,
        I32Store16(offset) => exec_store_packed(ctx, code, 2, offset)?,
        I64Store8(offset) => exec_store_packed(ctx, code, 1, offset)?,
        I64Store16(offset) => exec_store_packed(ctx, code, 2, offset)?,
        I64Store32(offset) => exec_store_packed(ctx, code, 4, offset)?,

        MemorySize => {
            let mem = current_memory(ctx)?;
            code.values.push(RuntimeValue::I32(mem.size() as i32));
        }
        MemoryGrow => {
            let delta = pop_i32(code)?;
            let mem = current_memory(ctx)?;
            match mem.grow(delta as u32) {
                Ok(prior) => code.values.push(RuntimeValue::I32(prior as i32)),
                Err(_) => code.values.push(RuntimeValue::I32(-1)),
            }
        }

        I32Const(v) => code.values.push(RuntimeValue::I32(v)),
        I64Const(v) => code.values.push(RuntimeValue::I64(v)),
        F32Const(v) => code.values.push(RuntimeValue::F32(v)),
        F64Const(v) => code.values.push(RuntimeValue::F64(v)),

        other => exec_numeric(code, &other)?,
    }
    Ok(())
}

fn set_local(ctx: &Config, idx: u32, v: RuntimeValue) -> Result<(), Error> {
    let cell: &Cell<RuntimeValue> = ctx.frame.locals.get(idx as usize).ok_or_else(|| Error::crash("local index out of bounds"))?;
    cell.set(v);
    Ok(())
}

/// Dispatch a test/compare/unary/binary/convert opcode through the numeric
/// layer. Operand count and evaluation order follow §4.2/§4.3: a binary
/// op's second operand is the one that was on top of the stack.
fn exec_numeric(code: &mut Code, instr: &Instr) -> Result<(), Error> {
    use Instr::*;
    let result = match instr {
        I32Eqz | I64Eqz => {
            let a = pop(code)?;
            numeric::eval_test(instr, a)
        }
        I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU | I64Eq | I64Ne | I64LtS | I64LtU | I64GtS
        | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU | F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge | F64Eq | F64Ne | F64Lt | F64Gt
        | F64Le | F64Ge => {
            let b = pop(code)?;
            let a = pop(code)?;
            numeric::eval_compare(instr, a, b)
        }
        I32Clz | I32Ctz | I32Popcnt | I64Clz | I64Ctz | I64Popcnt | F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest
        | F32Sqrt | F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => {
            let a = pop(code)?;
            numeric::eval_unary(instr, a)
        }
        I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or | I32Xor | I32Shl | I32ShrS | I32ShrU
        | I32Rotl | I32Rotr | I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or | I64Xor | I64Shl
        | I64ShrS | I64ShrU | I64Rotl | I64Rotr | F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign | F64Add | F64Sub
        | F64Mul | F64Div | F64Min | F64Max | F64Copysign => {
            let b = pop(code)?;
            let a = pop(code)?;
            numeric::eval_binary(instr, a, b)
        }
        I32WrapI64 | I32TruncSF32 | I32TruncUF32 | I32TruncSF64 | I32TruncUF64 | I64ExtendSI32 | I64ExtendUI32 | I64TruncSF32
        | I64TruncUF32 | I64TruncSF64 | I64TruncUF64 | F32ConvertSI32 | F32ConvertUI32 | F32ConvertSI64 | F32ConvertUI64 | F32DemoteF64
        | F64ConvertSI32 | F64ConvertUI32 | F64ConvertSI64 | F64ConvertUI64 | F64PromoteF32 | I32ReinterpretF32 | I64ReinterpretF64
        | F32ReinterpretI32 | F64ReinterpretI64 => {
            let a = pop(code)?;
            numeric::eval_convert(instr, a)
        }
        other => return Err(Error::crash(format!("{:?} is not a recognized instruction", other))),
    };
    match result {
        Ok(v) => code.values.push(v),
        Err(NumericError::Trap(kind)) => code.instrs.push_front(AdminInstr::Trapping(kind)),
        Err(NumericError::Type(msg)) => code.instrs.push_front(AdminInstr::Trapping(TrapKind::Numeric(msg))),
    }
    Ok(())
}

/// Marshal arguments, dispatch to an Ast function's body or a host
/// function, and install the resulting activation (or its result) onto
/// `code`.
fn exec_invoke(ctx: &Config, code: &mut Code, func: crate::FuncRef) -> Result<(), Error> {
    let sig = func.signature().clone();
    let n = sig.params().len();
    if code.values.len() < n {
        return Err(Error::crash("stack underflow calling function"));
    }
    let split_at = code.values.len() - n;
    let args = code.values.split_off(split_at);
    for (arg, expected) in args.iter().zip(sig.params()) {
        if arg.value_type() != *expected {
            return Err(Error::crash("argument type mismatch"));
        }
    }

    if let Some(module) = func.module() {
        let body = func.body().expect("an Ast function always has a body");
        let mut locals: Vec<Cell<RuntimeValue>> = args.into_iter().map(Cell::new).collect();
        for ty in body.locals.iter() {
            locals.push(Cell::new(RuntimeValue::default(*ty)));
        }
        let frame = Frame { module, locals };
        let block = Instr::Block(sig.return_type(), std::rc::Rc::clone(&body.body));
        code.instrs.push_front(AdminInstr::Framed {
            arity: sig.return_type(),
            frame,
            inner: Code::plain(&[block]),
        });
    } else {
        match func.call_host(&args) {
            Ok(results) => {
                let ok = match sig.return_type() {
                    Some(rt) => results.len() == 1 && results[0].value_type() == rt,
                    None => results.is_empty(),
                };
                if !ok {
                    return Err(Error::crash("host function result type mismatch"));
                }
                code.values.extend(results);
            }
            Err(kind) => code.instrs.push_front(AdminInstr::Trapping(kind)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleStore;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn empty_config() -> Config<'static> {
        Config {
            modules: Box::leak(Box::new(ModuleStore::new())),
            frame: Frame { module: crate::ModuleRef(0), locals: vec![] },
            budget: Rc::new(Cell::new(300)),
        }
    }

    #[test]
    fn const_and_add_evaluate() {
        let ctx = empty_config();
        let mut code = Code { values: vec![], instrs: VecDeque::new() };
        exec_plain(&ctx, &mut code, Instr::I32Const(2)).unwrap();
        exec_plain(&ctx, &mut code, Instr::I32Const(3)).unwrap();
        exec_numeric(&mut code, &Instr::I32Add).unwrap();
        assert_eq!(code.values, vec![RuntimeValue::I32(5)]);
    }

    #[test]
    fn select_picks_operand_by_condition() {
        // stack (bottom to top): val1=10, val2=20, c=1; a nonzero condition
        // selects val1, the operand pushed first.
        let mut code = Code {
            values: vec![RuntimeValue::I32(10), RuntimeValue::I32(20), RuntimeValue::I32(1)],
            instrs: VecDeque::new(),
        };
        let ctx = empty_config();
        exec_plain(&ctx, &mut code, Instr::Select).unwrap();
        assert_eq!(code.values, vec![RuntimeValue::I32(10)]);
    }

    #[test]
    fn br_table_picks_default_out_of_range() {
        let mut code = Code {
            values: vec![RuntimeValue::I32(9)],
            instrs: VecDeque::new(),
        };
        let ctx = empty_config();
        exec_plain(&ctx, &mut code, Instr::BrTable(vec![1, 2].into(), 7)).unwrap();
        match code.instrs.front() {
            Some(AdminInstr::Plain(Instr::Br(7))) => {}
            other => panic!("expected Br(7), got branch to a different depth or instruction ({})", matches!(other, Some(_))),
        }
    }

    #[test]
    fn division_by_zero_traps_via_numeric_layer() {
        let mut code = Code {
            values: vec![RuntimeValue::I32(1), RuntimeValue::I32(0)],
            instrs: VecDeque::new(),
        };
        exec_numeric(&mut code, &Instr::I32DivS).unwrap();
        match code.instrs.front() {
            Some(AdminInstr::Trapping(TrapKind::DivisionByZero)) => {}
            _ => panic!("expected a division-by-zero trap queued"),
        }
    }

    #[test]
    fn br_if_breaks_out_of_a_block() {
        let ctx = empty_config();
        let block_body: Rc<[Instr]> = vec![Instr::I32Const(1), Instr::BrIf(0), Instr::I32Const(99)].into();
        let mut code = Code { values: vec![], instrs: VecDeque::new() };
        exec_plain(&ctx, &mut code, Instr::Block(None, block_body)).unwrap();
        match run(&ctx, &mut code).unwrap() {
            Signal::Done => {}
            _ => panic!("expected the block to run to completion"),
        }
        assert!(code.values.is_empty(), "branching out of a zero-arity block carries nothing forward");
    }
}
