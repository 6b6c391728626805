use std::borrow::Cow;
use std::fmt;

/// Wasm's four value types (pre reference-types: no `funcref`/`externref`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ValueType::I32 => write!(f, "i32"),
            ValueType::I64 => write!(f, "i64"),
            ValueType::F32 => write!(f, "f32"),
            ValueType::F64 => write!(f, "f64"),
        }
    }
}

/// Signature of a function.
///
/// A signature consists of zero or more parameter types and zero or one
/// return type; multi-value results aren't supported.
///
/// Two signatures are considered equal if they have equal parameter lists
/// and equal return types.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    params: Cow<'static, [ValueType]>,
    return_type: Option<ValueType>,
}

impl Signature {
    pub fn new<C: Into<Cow<'static, [ValueType]>>>(params: C, return_type: Option<ValueType>) -> Signature {
        Signature {
            params: params.into(),
            return_type,
        }
    }

    pub fn params(&self) -> &[ValueType] {
        self.params.as_ref()
    }

    pub fn return_type(&self) -> Option<ValueType> {
        self.return_type
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")?;
        if let Some(result) = self.return_type {
            write!(f, " -> {}", result)?;
        }
        Ok(())
    }
}

/// Description of a global variable's type: its value type and mutability.
///
/// Primarily used to describe imports and exports of globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalDescriptor {
    value_type: ValueType,
    mutable: bool,
}

impl GlobalDescriptor {
    pub fn new(value_type: ValueType, mutable: bool) -> GlobalDescriptor {
        GlobalDescriptor { value_type, mutable }
    }

    /// Returns the [`ValueType`] of the requested global.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Returns whether the requested global is mutable.
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }
}

/// Description of a table's type: initial/maximum element count.
///
/// Primarily used to describe imports and exports of tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    initial: u32,
    maximum: Option<u32>,
}

impl TableDescriptor {
    pub fn new(initial: u32, maximum: Option<u32>) -> TableDescriptor {
        TableDescriptor { initial, maximum }
    }

    /// Returns initial size of the requested table.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Returns maximum size of the requested table.
    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }
}

/// Description of a linear memory's type: initial/maximum page count.
///
/// A page is 65536 bytes (see [`crate::memory::LINEAR_MEMORY_PAGE_SIZE`]).
/// Primarily used to describe imports and exports of memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDescriptor {
    initial: u32,
    maximum: Option<u32>,
}

impl MemoryDescriptor {
    pub fn new(initial: u32, maximum: Option<u32>) -> MemoryDescriptor {
        MemoryDescriptor { initial, maximum }
    }

    /// Returns initial size (in pages) of the requested memory.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Returns maximum size (in pages) of the requested memory.
    pub fn maximum(&self) -> Option<u32> {
        self.maximum
    }
}

/// The type of any importable/exportable entity. The instantiation pipeline
/// uses this to check an actual extern's type against what a module's import
/// declaration expects (`match_extern_type` in `src/module.rs`).
#[derive(Debug, Clone)]
pub enum ExternType {
    Func(Signature),
    Table(TableDescriptor),
    Memory(MemoryDescriptor),
    Global(GlobalDescriptor),
}

impl fmt::Display for ExternType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExternType::Func(sig) => write!(f, "func {}", sig),
            ExternType::Table(_) => write!(f, "table"),
            ExternType::Memory(_) => write!(f, "memory"),
            ExternType::Global(_) => write!(f, "global"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_display() {
        assert_eq!(ValueType::I32.to_string(), "i32");
        assert_eq!(ValueType::F64.to_string(), "f64");
    }

    #[test]
    fn signature_display() {
        let sig = Signature::new(vec![ValueType::I32, ValueType::I64], Some(ValueType::F32));
        assert_eq!(sig.to_string(), "(i32, i64) -> f32");
    }
}
