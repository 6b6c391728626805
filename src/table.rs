//! Runtime representation of a Wasm table: a fixed-max bounded sequence of
//! optional function references, addressed by `call_indirect`.

use crate::func::FuncRef;
use crate::types::TableDescriptor;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Failure of a table-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// `min` declared greater than `max`, or growth would exceed `max`.
    SizeLimit,
    /// An index (or an element-segment's `offset + len`) fell outside the
    /// table's current bounds.
    OutOfBounds,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TableError::SizeLimit => write!(f, "table size limit exceeded"),
            TableError::OutOfBounds => write!(f, "table access out of bounds"),
        }
    }
}

/// Reference-counted handle to a [`TableInstance`].
#[derive(Clone, Debug)]
pub struct TableRef(Rc<TableInstance>);

impl std::ops::Deref for TableRef {
    type Target = TableInstance;
    fn deref(&self) -> &TableInstance {
        &self.0
    }
}

/// A table is an array of untyped function references. Wasm code calls
/// functions indirectly through a dynamic index into a table, which is how
/// function pointers are emulated.
///
/// A table is created with an initial size but can grow, bounded by an
/// optional declared maximum.
pub struct TableInstance {
    descriptor: TableDescriptor,
    buffer: RefCell<Vec<Option<FuncRef>>>,
}

impl fmt::Debug for TableInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TableInstance")
            .field("descriptor", &self.descriptor)
            .field("size", &self.buffer.borrow().len())
            .finish()
    }
}

impl TableInstance {
    /// Allocate a table instance from its declared type. Rejects a
    /// `min > max` declaration.
    pub fn alloc(descriptor: TableDescriptor) -> Result<TableRef, TableError> {
        if let Some(max) = descriptor.maximum() {
            if descriptor.initial() > max {
                return Err(TableError::SizeLimit);
            }
        }
        Ok(TableRef(Rc::new(TableInstance {
            buffer: RefCell::new(vec![None; descriptor.initial() as usize]),
            descriptor,
        })))
    }

    pub fn descriptor(&self) -> TableDescriptor {
        self.descriptor
    }

    /// Current number of elements.
    pub fn size(&self) -> u32 {
        self.buffer.borrow().len() as u32
    }

    /// Grow the table by `delta` elements, bounded by the declared maximum.
    pub fn grow(&self, delta: u32) -> Result<(), TableError> {
        let mut buffer = self.buffer.borrow_mut();
        let maximum = self.descriptor.maximum().unwrap_or(u32::MAX);
        let new_size = (buffer.len() as u32).checked_add(delta).filter(|&n| n <= maximum).ok_or(TableError::SizeLimit)?;
        buffer.resize(new_size as usize, None);
        Ok(())
    }

    /// Read the function reference at `index`, if any.
    pub fn load(&self, index: u32) -> Result<Option<FuncRef>, TableError> {
        self.buffer.borrow().get(index as usize).cloned().ok_or(TableError::OutOfBounds)
    }

    /// Overwrite `values` starting at `offset`, failing without partial
    /// effect if they don't all fit.
    pub fn blit(&self, offset: u32, values: &[FuncRef]) -> Result<(), TableError> {
        let mut buffer = self.buffer.borrow_mut();
        let end = (offset as u64) + (values.len() as u64);
        if end > buffer.len() as u64 {
            return Err(TableError::OutOfBounds);
        }
        for (slot, value) in buffer[offset as usize..].iter_mut().zip(values) {
            *slot = Some(value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Signature, ValueType};

    fn dummy_func() -> FuncRef {
        crate::func::create_host_func(Signature::new(vec![], Some(ValueType::I32)), |_| vec![crate::RuntimeValue::I32(1)])
    }

    #[test]
    fn alloc_rejects_min_greater_than_max() {
        let err = TableInstance::alloc(TableDescriptor::new(4, Some(2))).unwrap_err();
        assert_eq!(err, TableError::SizeLimit);
    }

    #[test]
    fn grow_respects_maximum() {
        let table = TableInstance::alloc(TableDescriptor::new(1, Some(2))).unwrap();
        table.grow(1).unwrap();
        assert_eq!(table.size(), 2);
        assert_eq!(table.grow(1).unwrap_err(), TableError::SizeLimit);
    }

    #[test]
    fn blit_fills_and_rejects_overflow() {
        let table = TableInstance::alloc(TableDescriptor::new(2, None)).unwrap();
        table.blit(0, &[dummy_func()]).unwrap();
        assert!(table.load(0).unwrap().is_some());
        assert!(table.load(1).unwrap().is_none());
        assert_eq!(table.blit(1, &[dummy_func(), dummy_func()]).unwrap_err(), TableError::OutOfBounds);
    }
}
