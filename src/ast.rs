//! The decoded module representation this crate consumes.
//!
//! Binary/text parsing and validation happen upstream of this crate (see the
//! crate-level docs); everything here is produced by an external decoder and
//! handed to [`crate::initialize`] already well-formed. Control flow is kept
//! as a tree (`Block`/`Loop`/`If` own their bodies directly) rather than
//! flattened into a goto-addressed bytecode, because the stepper's `Label`
//! administrative instruction needs to hold a body it can re-enter wholesale
//! on a backward branch.

use crate::nan_preserving_float::{F32, F64};
use crate::types::{GlobalDescriptor, MemoryDescriptor, Signature, TableDescriptor, ValueType};
use std::rc::Rc;

/// A possibly-empty sequence of result types. Wasm (pre multi-value) allows
/// at most one result per block.
pub type BlockType = Option<ValueType>;

/// A body of instructions shared between a `Block`/`Loop`/`If` arm and the
/// `Label` administrative instruction built from it. `Rc`-shared so that
/// re-entering a `Loop` on a backward branch is a pointer clone, not a deep
/// copy of the loop body.
pub type InstrSeq = Rc<[Instr]>;

/// A plain Wasm instruction, pre-admin-instruction.
///
/// Opcode names follow the one-variant-per-type-and-operation convention
/// (`I32Add`, `F64Sqrt`, ...) rather than a generic `Binary(Type, Op)` pair;
/// this keeps the numeric dispatch in `crate::numeric` a flat match instead
/// of a nested one.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Unreachable,
    Nop,
    Drop,
    Select,

    Block(BlockType, InstrSeq),
    Loop(BlockType, InstrSeq),
    If(BlockType, InstrSeq, InstrSeq),
    Br(u32),
    BrIf(u32),
    BrTable(Rc<[u32]>, u32),
    Return,

    Call(u32),
    CallIndirect(u32),

    GetLocal(u32),
    SetLocal(u32),
    TeeLocal(u32),
    GetGlobal(u32),
    SetGlobal(u32),

    I32Load(u32),
    I64Load(u32),
    F32Load(u32),
    F64Load(u32),
    I32Load8S(u32),
    I32Load8U(u32),
    I32Load16S(u32),
    I32Load16U(u32),
    I64Load8S(u32),
    I64Load8U(u32),
    I64Load16S(u32),
    I64Load16U(u32),
    I64Load32S(u32),
    I64Load32U(u32),
    I32Store(u32),
    I64Store(u32),
    F32Store(u32),
    F64Store(u32),
    I32Store8(u32),
    I32Store16(u32),
    I64Store8(u32),
    I64Store16(u32),
    I64Store32(u32),

    MemorySize,
    MemoryGrow,

    I32Const(i32),
    I64Const(i64),
    F32Const(F32),
    F64Const(F64),

    I32Eqz,
    I64Eqz,

    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,

    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    I32WrapI64,
    I32TruncSF32,
    I32TruncUF32,
    I32TruncSF64,
    I32TruncUF64,
    I64ExtendSI32,
    I64ExtendUI32,
    I64TruncSF32,
    I64TruncUF32,
    I64TruncSF64,
    I64TruncUF64,
    F32ConvertSI32,
    F32ConvertUI32,
    F32ConvertSI64,
    F32ConvertUI64,
    F32DemoteF64,
    F64ConvertSI32,
    F64ConvertUI32,
    F64ConvertSI64,
    F64ConvertUI64,
    F64PromoteF32,

    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
}

/// A constant initializer: either a function body's implicit tail evaluator
/// or a global/offset initializer. Evaluated once, not re-entered, so it
/// doesn't need `InstrSeq`'s sharing.
pub type Expr = Vec<Instr>;

/// A module-defined function: its declared type together with its body.
#[derive(Debug, Clone)]
pub struct FuncBody {
    pub type_idx: u32,
    pub locals: Vec<ValueType>,
    pub body: InstrSeq,
}

/// What an import names and the type the importing module expects it to have.
#[derive(Debug, Clone)]
pub enum ImportDesc {
    Func(u32),
    Table(TableDescriptor),
    Memory(MemoryDescriptor),
    Global(GlobalDescriptor),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

/// A module-defined global together with its constant initializer.
#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub desc: GlobalDescriptor,
    pub init: Expr,
}

#[derive(Debug, Clone)]
pub enum ExportDesc {
    Func(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub desc: ExportDesc,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table_index: u32,
    pub offset: Expr,
    pub funcs: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub memory_index: u32,
    pub offset: Expr,
    pub bytes: Vec<u8>,
}

/// An already-decoded module, ready for [`crate::initialize`].
///
/// `types`/`funcs`/`tables`/`memories`/`globals` below list only
/// module-*defined* entities: indices carried by instructions (`Call`,
/// `GetGlobal`, ...) already live in the combined index space where
/// imported entities of the same kind come first, exactly as the Wasm
/// encoding represents them. The instantiation pipeline doesn't renumber
/// anything; it just has to build `ModuleInst`'s `funcs`/`tables`/
/// `memories`/`globals` vectors in that same order (imports prepended,
/// module-defined entries appended after) so that an index already
/// present in the AST keeps addressing the right entry once resolved.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: Vec<Signature>,
    pub imports: Vec<Import>,
    pub funcs: Vec<FuncBody>,
    pub tables: Vec<TableDescriptor>,
    pub memories: Vec<MemoryDescriptor>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<Export>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub start: Option<u32>,
}
