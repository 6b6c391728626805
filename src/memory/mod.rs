//! Runtime representation of a Wasm linear memory: a contiguous, mutable
//! byte buffer sized in page-size (64KiB) multiples.

use crate::types::MemoryDescriptor;
use crate::value::LittleEndianConvert;
use crate::{RuntimeValue, ValueType};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[path = "vec_bytebuf.rs"]
mod bytebuf;
use self::bytebuf::ByteBuf;

/// Size of a linear memory page: 64KiB. A memory's size is always an
/// integer multiple of this.
pub const LINEAR_MEMORY_PAGE_SIZE: u64 = 65536;

/// Failure of a memory-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// An access's effective address plus width overran the memory's
    /// current bound.
    Bounds,
    /// `effective address + width` overflowed `u64` arithmetic.
    SizeOverflow,
    /// `memory.grow` would exceed the declared maximum.
    SizeLimit,
    /// A value's runtime type didn't match the access's declared type.
    Type,
    /// The host couldn't satisfy the allocation.
    OutOfMemory,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::Bounds => write!(f, "out of bounds memory access"),
            MemoryError::SizeOverflow => write!(f, "memory size overflow"),
            MemoryError::SizeLimit => write!(f, "memory size limit reached"),
            MemoryError::Type => write!(f, "type mismatch at memory access"),
            MemoryError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// Reference-counted handle to a [`MemoryInstance`].
#[derive(Clone, Debug)]
pub struct MemoryRef(Rc<MemoryInstance>);

impl std::ops::Deref for MemoryRef {
    type Target = MemoryInstance;
    fn deref(&self) -> &MemoryInstance {
        &self.0
    }
}

/// A linear memory: a contiguous array of bytes Wasm code can load and
/// store through at any byte address. An access that isn't within the
/// memory's current bound traps.
///
/// A memory is created with an initial page count and can grow, bounded by
/// an optional declared maximum; Wasm provides no way to shrink it.
pub struct MemoryInstance {
    descriptor: MemoryDescriptor,
    buffer: RefCell<ByteBuf>,
}

impl fmt::Debug for MemoryInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryInstance")
            .field("descriptor", &self.descriptor)
            .field("bound", &self.buffer.borrow().len())
            .finish()
    }
}

impl MemoryInstance {
    /// Allocate a zeroed, page-aligned memory from its declared type.
    pub fn alloc(descriptor: MemoryDescriptor) -> Result<MemoryRef, MemoryError> {
        if let Some(max) = descriptor.maximum() {
            if descriptor.initial() > max {
                return Err(MemoryError::SizeLimit);
            }
        }
        let bytes = (descriptor.initial() as u64) * LINEAR_MEMORY_PAGE_SIZE;
        Ok(MemoryRef(Rc::new(MemoryInstance {
            descriptor,
            buffer: RefCell::new(ByteBuf::new(bytes as usize)),
        })))
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        (self.buffer.borrow().len() as u64 / LINEAR_MEMORY_PAGE_SIZE) as u32
    }

    /// Current size in bytes.
    pub fn bound(&self) -> u64 {
        self.buffer.borrow().len() as u64
    }

    /// Grow by `delta` pages, returning the prior page count on success.
    pub fn grow(&self, delta: u32) -> Result<u32, MemoryError> {
        let prior = self.size();
        let maximum = self.descriptor.maximum().unwrap_or(65536);
        let new_size = prior.checked_add(delta).filter(|&n| n <= maximum && n <= 65536).ok_or(MemoryError::SizeLimit)?;
        let new_bytes = (new_size as u64) * LINEAR_MEMORY_PAGE_SIZE;
        if new_bytes > usize::MAX as u64 {
            return Err(MemoryError::SizeOverflow);
        }
        self.buffer.borrow_mut().realloc(new_bytes as usize);
        Ok(prior)
    }

    fn checked_region(&self, base: i32, offset: u32, width: u64) -> Result<usize, MemoryError> {
        let effective = (base as u32 as u64).checked_add(offset as u64).ok_or(MemoryError::SizeOverflow)?;
        let end = effective.checked_add(width).ok_or(MemoryError::SizeOverflow)?;
        if end > self.bound() {
            return Err(MemoryError::Bounds);
        }
        Ok(effective as usize)
    }

    /// Load a full-width value (`i32`/`i64`/`f32`/`f64.load`).
    pub fn load_value(&self, ty: ValueType, base: i32, offset: u32) -> Result<RuntimeValue, MemoryError> {
        let width = match ty {
            ValueType::I32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::F64 => 8,
        };
        let start = self.checked_region(base, offset, width)?;
        let buffer = self.buffer.borrow();
        let bytes = &buffer.as_slice()[start..start + width as usize];
        Ok(match ty {
            ValueType::I32 => RuntimeValue::I32(i32::from_little_endian(bytes).expect("width checked")),
            ValueType::I64 => RuntimeValue::I64(i64::from_little_endian(bytes).expect("width checked")),
            ValueType::F32 => RuntimeValue::F32(crate::nan_preserving_float::F32::from_little_endian(bytes).expect("width checked")),
            ValueType::F64 => RuntimeValue::F64(crate::nan_preserving_float::F64::from_little_endian(bytes).expect("width checked")),
        })
    }

    /// Store a full-width value (`i32`/`i64`/`f32`/`f64.store`).
    pub fn store_value(&self, val: RuntimeValue, base: i32, offset: u32) -> Result<(), MemoryError> {
        let expected = match val {
            RuntimeValue::I32(_) => ValueType::I32,
            RuntimeValue::I64(_) => ValueType::I64,
            RuntimeValue::F32(_) => ValueType::F32,
            RuntimeValue::F64(_) => ValueType::F64,
        };
        let width = match expected {
            ValueType::I32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::F64 => 8,
        };
        let start = self.checked_region(base, offset, width)?;
        let mut buffer = self.buffer.borrow_mut();
        let bytes = &mut buffer.as_slice_mut()[start..start + width as usize];
        match val {
            RuntimeValue::I32(v) => v.into_little_endian(bytes),
            RuntimeValue::I64(v) => v.into_little_endian(bytes),
            RuntimeValue::F32(v) => v.into_little_endian(bytes),
            RuntimeValue::F64(v) => v.into_little_endian(bytes),
        }
        Ok(())
    }

    /// Load a packed (sub-width) integer access, sign- or zero-extended to
    /// `result_ty` (`i32` or `i64`).
    pub fn load_packed(&self, width: u32, sign_extend: bool, result_ty: ValueType, base: i32, offset: u32) -> Result<RuntimeValue, MemoryError> {
        let start = self.checked_region(base, offset, width as u64)?;
        let buffer = self.buffer.borrow();
        let bytes = &buffer.as_slice()[start..start + width as usize];
        let mut padded = [0u8; 8];
        padded[..width as usize].copy_from_slice(bytes);
        let sign_bit_set = sign_extend && width > 0 && (bytes[width as usize - 1] & 0x80) != 0;
        if sign_bit_set {
            for b in padded[width as usize..].iter_mut() {
                *b = 0xff;
            }
        }
        let raw = u64::from_le_bytes(padded);
        Ok(match result_ty {
            ValueType::I32 => RuntimeValue::I32(raw as i32),
            ValueType::I64 => RuntimeValue::I64(raw as i64),
            _ => unreachable!("packed loads only ever target i32/i64"),
        })
    }

    /// Store the low `width` bytes of an integer value.
    pub fn store_packed(&self, width: u32, val: RuntimeValue, base: i32, offset: u32) -> Result<(), MemoryError> {
        let raw: u64 = match val {
            RuntimeValue::I32(v) => v as u32 as u64,
            RuntimeValue::I64(v) => v as u64,
            _ => return Err(MemoryError::Type),
        };
        let start = self.checked_region(base, offset, width as u64)?;
        let mut buffer = self.buffer.borrow_mut();
        let bytes = &mut buffer.as_slice_mut()[start..start + width as usize];
        bytes.copy_from_slice(&raw.to_le_bytes()[..width as usize]);
        Ok(())
    }

    /// Commit a data segment: write `bytes` starting at byte address
    /// `effective_base`.
    pub fn store_bytes(&self, effective_base: u64, bytes: &[u8]) -> Result<(), MemoryError> {
        let end = effective_base.checked_add(bytes.len() as u64).ok_or(MemoryError::SizeOverflow)?;
        if end > self.bound() {
            return Err(MemoryError::Bounds);
        }
        let mut buffer = self.buffer.borrow_mut();
        buffer.as_slice_mut()[effective_base as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    pub fn descriptor(&self) -> MemoryDescriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_returns_prior_size() {
        let mem = MemoryInstance::alloc(MemoryDescriptor::new(1, None)).unwrap();
        assert_eq!(mem.size(), 1);
        assert_eq!(mem.grow(2).unwrap(), 1);
        assert_eq!(mem.size(), 3);
    }

    #[test]
    fn grow_past_maximum_fails_without_mutating_size() {
        let mem = MemoryInstance::alloc(MemoryDescriptor::new(1, Some(1))).unwrap();
        assert_eq!(mem.grow(1).unwrap_err(), MemoryError::SizeLimit);
        assert_eq!(mem.size(), 1);
    }

    #[test]
    fn store_then_load_roundtrips() {
        let mem = MemoryInstance::alloc(MemoryDescriptor::new(1, None)).unwrap();
        mem.store_value(RuntimeValue::I32(0x1234_5678), 0, 0).unwrap();
        assert_eq!(mem.load_value(ValueType::I32, 0, 0).unwrap(), RuntimeValue::I32(0x1234_5678));
    }

    #[test]
    fn out_of_bounds_access_is_reported() {
        let mem = MemoryInstance::alloc(MemoryDescriptor::new(1, None)).unwrap();
        assert_eq!(mem.load_value(ValueType::I64, 65530, 0).unwrap_err(), MemoryError::Bounds);
    }

    #[test]
    fn packed_load_sign_extends() {
        let mem = MemoryInstance::alloc(MemoryDescriptor::new(1, None)).unwrap();
        mem.store_packed(1, RuntimeValue::I32(-1i32), 0, 0).unwrap();
        assert_eq!(mem.load_packed(1, true, ValueType::I32, 0, 0).unwrap(), RuntimeValue::I32(-1));
        assert_eq!(mem.load_packed(1, false, ValueType::I32, 0, 0).unwrap(), RuntimeValue::I32(0xff));
    }
}
