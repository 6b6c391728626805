//! # wasmush
//!
//! A small-step WebAssembly interpreter core: instantiation and execution
//! over an already-decoded module AST.
//!
//! Wasm code is distributed in the form of modules that contain definitions
//! of functions, global variables, linear memory instances and tables. Each
//! of these definitions can be imported and exported. In addition, modules
//! can define initialization data for their memory or tables (element and
//! data segments) and an optional `start` function run automatically once
//! the module is instantiated.
//!
//! ## What this crate does *not* do
//!
//! Binary/text decoding and module validation happen upstream: the
//! [`ast::Module`] this crate consumes is assumed to already be the output
//! of a validated decoder. If a validated module somehow still manages to
//! violate a runtime invariant (an out-of-bounds index, say), this crate
//! reports that as a [`Error::Crash`] rather than silently doing the wrong
//! thing.
//!
//! ## Instantiation
//!
//! 1. Creating an empty module instance.
//! 2. Resolving the definition instances for each declared import.
//! 3. Allocating the definitions declared by the module itself (functions,
//!    tables, memories, globals).
//! 4. Initializing memory and table contents from element/data segments.
//! 5. Executing the `start` function, if any.
//!
//! ## Execution
//!
//! Only functions exported by a module can be invoked from the outside.
//! Invoking one either returns the declared result values or produces a
//! well-defined [`Trap`]; it cannot leave the store in an inconsistent
//! state.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_ret_no_self)]

extern crate num_rational;
extern crate num_traits;

use std::fmt;

pub mod ast;
mod eval;
mod func;
mod global;
mod imports;
mod memory;
mod module;
pub mod nan_preserving_float;
mod numeric;
mod table;
mod types;
mod value;

pub use crate::eval::{invoke, Code, Config};
pub use crate::func::{create_host_func, create_host_func_eff, FuncInstance, FuncRef};
pub use crate::global::{GlobalError, GlobalInstance, GlobalRef};
pub use crate::imports::ImportsBuilder;
pub use crate::memory::{MemoryError, MemoryInstance, MemoryRef, LINEAR_MEMORY_PAGE_SIZE};
pub use crate::module::{initialize, ExternVal, ModuleInst, ModuleRef, ModuleStore};
pub use crate::table::{TableError, TableInstance, TableRef};
pub use crate::types::{ExternType, GlobalDescriptor, MemoryDescriptor, Signature, TableDescriptor, ValueType};
pub use crate::value::{Error as ValueError, FromRuntimeValue, LittleEndianConvert, RuntimeValue};

/// WebAssembly-specific sizes and units.
pub mod memory_units {
    pub use memory_units::wasm32::*;
    pub use memory_units::{size_of, ByteSize, Bytes, RoundUpTo};
}

/// A source-code span an error is attributed to, or the absence of one.
///
/// The decoder this crate assumes upstream (see the crate-level docs) is
/// out of scope here, so the [`ast::Module`] this crate consumes carries no
/// span information of its own; every [`Error`] in this crate is therefore
/// built with [`Region::unknown`]. The field exists so that an embedder
/// wiring a real decoder's source spans through a richer AST can do so
/// without changing this crate's error shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region(Option<(u32, u32)>);

impl Region {
    /// A region with no known source span.
    pub fn unknown() -> Region {
        Region(None)
    }

    /// A region spanning `[start, end)` bytes in the original source.
    pub fn new(start: u32, end: u32) -> Region {
        Region(Some((start, end)))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some((start, end)) => write!(f, "{}..{}", start, end),
            None => write!(f, "<unknown>"),
        }
    }
}

/// A well-defined runtime trap per Wasm semantics.
///
/// A trap aborts the computation that produced it but leaves the store in a
/// consistent state (any side effects already committed by the time the
/// trap was raised remain in place). Traps can't be handled by WebAssembly
/// code; they're reported straight to the embedder.
#[derive(Debug)]
pub enum TrapKind {
    /// Wasm code executed `unreachable`.
    Unreachable,
    /// `call_indirect` reached a function whose signature doesn't match the
    /// expected type at the call site.
    IndirectCallTypeMismatch,
    /// `call_indirect` reached a table slot with no function in it (or the
    /// index itself lay outside the table).
    UninitializedElement(u32),
    /// A `load`/`store` effective address plus access width overran the
    /// memory's current bound.
    MemoryAccessOutOfBounds,
    /// `memory.grow`'s requested size overflowed the page-count arithmetic.
    MemorySizeOverflow,
    /// `memory.grow` would exceed the memory's declared maximum.
    MemorySizeLimitReached,
    /// A `store` was attempted with a value whose type doesn't match the
    /// instruction's declared access type.
    MemoryTypeMismatch,
    /// The host allocator couldn't satisfy a `memory.grow` request.
    OutOfMemory,
    /// Integer division or remainder by zero.
    DivisionByZero,
    /// A float-to-int truncation whose source was NaN, infinite, or out of
    /// the target integer's representable range.
    InvalidConversionToInt,
    /// `global.set` targeted a global that wasn't declared mutable.
    ImmutableGlobalWrite,
    /// `global.set` supplied a value whose type doesn't match the global's
    /// declared type.
    GlobalTypeMismatch,
    /// A host function (registered via [`create_host_func_eff`]) reported
    /// failure.
    Host(String),
    /// A numeric operator's operand had a runtime type the instruction
    /// doesn't accept. Unreachable on a validated module; surfaced as a trap
    /// rather than a crash because the operator layer can't tell the two
    /// apart.
    Numeric(String),
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrapKind::Unreachable => write!(f, "unreachable executed"),
            TrapKind::IndirectCallTypeMismatch => write!(f, "indirect call type mismatch"),
            TrapKind::UninitializedElement(i) => write!(f, "uninitialized element {}", i),
            TrapKind::MemoryAccessOutOfBounds => write!(f, "out of bounds memory access"),
            TrapKind::MemorySizeOverflow => write!(f, "memory size overflow"),
            TrapKind::MemorySizeLimitReached => write!(f, "memory size limit reached"),
            TrapKind::MemoryTypeMismatch => write!(f, "type mismatch at memory access"),
            TrapKind::OutOfMemory => write!(f, "out of memory"),
            TrapKind::DivisionByZero => write!(f, "integer divide by zero"),
            TrapKind::InvalidConversionToInt => write!(f, "invalid conversion to integer"),
            TrapKind::ImmutableGlobalWrite => write!(f, "write to immutable global"),
            TrapKind::GlobalTypeMismatch => write!(f, "type mismatch at global write"),
            TrapKind::Host(msg) => write!(f, "{}", msg),
            TrapKind::Numeric(msg) => write!(f, "{}", msg),
        }
    }
}

/// A trap, tagged with the region it occurred at.
#[derive(Debug)]
pub struct Trap {
    region: Region,
    kind: TrapKind,
}

impl Trap {
    pub fn new(region: Region, kind: TrapKind) -> Trap {
        Trap { region, kind }
    }

    pub fn kind(&self) -> &TrapKind {
        &self.kind
    }

    pub fn region(&self) -> Region {
        self.region
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "trap at {}: {}", self.region, self.kind)
    }
}

/// Everything that can go wrong instantiating a module or invoking a
/// function through it.
///
/// The four variants mirror the error taxonomy this crate is built around:
/// a [`Link`](Error::Link) failure means the module was never registered at
/// all, a [`Trap`](Error::Trap) is a well-defined runtime error that leaves
/// the store consistent, a [`Crash`](Error::Crash) means a validated module
/// somehow still broke a runtime invariant (a bug in the toolchain or this
/// crate, not in the Wasm program), and [`Exhaustion`](Error::Exhaustion) is
/// the one resource limit this interpreter enforces on its own: call depth.
#[derive(Debug)]
pub enum Error {
    /// Instantiation failed (import resolution, segment that doesn't fit,
    /// malformed limits, ...). The module was never registered in the
    /// store.
    Link(Region, String),
    /// A well-defined runtime trap.
    Trap(Trap),
    /// An invariant a validator should have enforced was violated at
    /// runtime.
    Crash(Region, String),
    /// The 300-frame call budget reached zero on frame entry.
    Exhaustion(Region, String),
}

impl Error {
    pub(crate) fn trap(region: Region, kind: TrapKind) -> Error {
        Error::Trap(Trap::new(region, kind))
    }

    pub(crate) fn crash(msg: impl Into<String>) -> Error {
        Error::Crash(Region::unknown(), msg.into())
    }

    pub(crate) fn link(msg: impl Into<String>) -> Error {
        Error::Link(Region::unknown(), msg.into())
    }

    pub(crate) fn trap_kind(kind: TrapKind) -> Error {
        Error::trap(Region::unknown(), kind)
    }

    pub(crate) fn exhausted(msg: impl Into<String>) -> Error {
        Error::Exhaustion(Region::unknown(), msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Link(region, msg) => write!(f, "link error at {}: {}", region, msg),
            Error::Trap(trap) => write!(f, "{}", trap),
            Error::Crash(region, msg) => write!(f, "crash at {}: {}", region, msg),
            Error::Exhaustion(region, msg) => write!(f, "resource exhausted at {}: {}", region, msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<Trap> for Error {
    fn from(t: Trap) -> Error {
        Error::Trap(t)
    }
}

/// Look up `name` among `inst`'s exports and invoke it as a function.
///
/// `args` must already be well-typed for the export's signature; a type
/// mismatch is reported as [`Error::Crash`] rather than a trap, since a
/// caller driving a validated module against its own exports should never
/// produce one.
pub fn invoke_by_name(store: &ModuleStore, inst: &ModuleInst, name: &str, args: &[RuntimeValue]) -> Result<Vec<RuntimeValue>, Error> {
    let export = inst
        .export_by_name(name)
        .ok_or_else(|| Error::link(format!("no export named {:?}", name)))?;
    let func = match export {
        ExternVal::Func(f) => f,
        other => return Err(Error::link(format!("export {:?} is a {}, not a function", name, other.extern_type_name()))),
    };
    eval::invoke(store, func, args)
}

/// Look up `name` among `inst`'s exports and read its current value.
pub fn get_by_name(inst: &ModuleInst, name: &str) -> Result<RuntimeValue, Error> {
    let export = inst
        .export_by_name(name)
        .ok_or_else(|| Error::link(format!("no export named {:?}", name)))?;
    match export {
        ExternVal::Global(g) => Ok(g.get()),
        other => Err(Error::link(format!("export {:?} is a {}, not a global", name, other.extern_type_name()))),
    }
}
