//! Instantiation: turn a decoded [`ast::Module`] plus a set of resolved
//! imports into a registered [`ModuleInst`].

use crate::ast::{self, ElementSegment, Instr};
use crate::eval::{self, const_eval::{eval_const, eval_const_i32}};
use crate::func::{FuncInstance, FuncRef};
use crate::global::GlobalInstance;
use crate::imports::ImportsBuilder;
use crate::memory::MemoryInstance;
use crate::table::TableInstance;
use crate::types::{ExternType, GlobalDescriptor, MemoryDescriptor, Signature, TableDescriptor};
use crate::{Error, GlobalRef, MemoryRef, RuntimeValue, TableRef};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Opaque key naming a [`ModuleInst`] in a [`ModuleStore`].
///
/// Functions close over their owning module by this key rather than an
/// `Rc` pointer, since a module's functions and the module itself would
/// otherwise form a reference cycle (see the crate-level design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleRef(pub(crate) u32);

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The module store: every currently-instantiated module, keyed by
/// [`ModuleRef`].
pub type ModuleStore = BTreeMap<ModuleRef, ModuleInst>;

/// An external value: the runtime representation of anything a module can
/// import or export.
#[derive(Clone, Debug)]
pub enum ExternVal {
    Func(FuncRef),
    Table(TableRef),
    Memory(MemoryRef),
    Global(GlobalRef),
}

impl ExternVal {
    pub fn as_func(&self) -> Option<&FuncRef> {
        match self {
            ExternVal::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            ExternVal::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryRef> {
        match self {
            ExternVal::Memory(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<&GlobalRef> {
        match self {
            ExternVal::Global(g) => Some(g),
            _ => None,
        }
    }

    /// A short human-readable name of this value's kind, for error messages.
    pub fn extern_type_name(&self) -> &'static str {
        match self {
            ExternVal::Func(_) => "function",
            ExternVal::Table(_) => "table",
            ExternVal::Memory(_) => "memory",
            ExternVal::Global(_) => "global",
        }
    }

    fn extern_type(&self) -> ExternType {
        match self {
            ExternVal::Func(f) => ExternType::Func(f.signature().clone()),
            ExternVal::Table(t) => ExternType::Table(t.descriptor()),
            ExternVal::Memory(m) => ExternType::Memory(m.descriptor()),
            ExternVal::Global(g) => ExternType::Global(g.descriptor()),
        }
    }
}

/// A runtime instantiation of a [`ast::Module`]: the module's own AST plus
/// every function/table/memory/global it closes over, imports prepended
/// ahead of the module's own definitions so that AST-local indices continue
/// to address correctly.
#[derive(Clone)]
pub struct ModuleInst {
    pub(crate) module: Rc<ast::Module>,
    pub(crate) types: Vec<Signature>,
    pub(crate) funcs: Vec<FuncRef>,
    pub(crate) tables: Vec<TableRef>,
    pub(crate) memories: Vec<MemoryRef>,
    pub(crate) globals: Vec<GlobalRef>,
    pub(crate) exports: BTreeMap<String, ExternVal>,
}

impl fmt::Debug for ModuleInst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ModuleInst")
            .field("funcs", &self.funcs.len())
            .field("tables", &self.tables.len())
            .field("memories", &self.memories.len())
            .field("globals", &self.globals.len())
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleInst {
    pub fn func_by_index(&self, idx: u32) -> Option<FuncRef> {
        self.funcs.get(idx as usize).cloned()
    }

    pub fn table_by_index(&self, idx: u32) -> Option<TableRef> {
        self.tables.get(idx as usize).cloned()
    }

    pub fn memory_by_index(&self, idx: u32) -> Option<MemoryRef> {
        self.memories.get(idx as usize).cloned()
    }

    pub fn global_by_index(&self, idx: u32) -> Option<GlobalRef> {
        self.globals.get(idx as usize).cloned()
    }

    pub fn signature_by_index(&self, idx: u32) -> Option<&Signature> {
        self.types.get(idx as usize)
    }

    pub fn export_by_name(&self, name: &str) -> Option<ExternVal> {
        self.exports.get(name).cloned()
    }
}

/// Smallest positive key not currently in `store`, searched starting at
/// `max(1, store.len())`.
fn next_key(store: &ModuleStore) -> ModuleRef {
    let mut candidate = std::cmp::max(1, store.len()) as u32;
    while store.contains_key(&ModuleRef(candidate)) {
        candidate += 1;
    }
    ModuleRef(candidate)
}

/// Wasm's import subtyping relation: is an extern of `actual` type
/// acceptable where `expected` was declared?
fn match_extern_type(actual: &ExternType, expected: &ExternType) -> Result<(), String> {
    match (actual, expected) {
        (ExternType::Func(a), ExternType::Func(e)) => {
            if a == e {
                Ok(())
            } else {
                Err(format!("expected function of type {}, found {}", e, a))
            }
        }
        (ExternType::Table(a), ExternType::Table(e)) => match_limits(a.initial(), a.maximum(), e.initial(), e.maximum()),
        (ExternType::Memory(a), ExternType::Memory(e)) => match_limits(a.initial(), a.maximum(), e.initial(), e.maximum()),
        (ExternType::Global(a), ExternType::Global(e)) => {
            if a.value_type() == e.value_type() && a.is_mutable() == e.is_mutable() {
                Ok(())
            } else {
                Err("global type mismatch".to_string())
            }
        }
        _ => Err(format!("expected a {}, found a {}", expected, actual)),
    }
}

fn match_limits(actual_initial: u32, actual_max: Option<u32>, expected_initial: u32, expected_max: Option<u32>) -> Result<(), String> {
    if actual_initial < expected_initial {
        return Err(format!("initial size {} is smaller than required {}", actual_initial, expected_initial));
    }
    match (actual_max, expected_max) {
        (_, None) => Ok(()),
        (Some(a), Some(e)) if a <= e => Ok(()),
        _ => Err(format!("maximum size {:?} exceeds required {:?}", actual_max, expected_max)),
    }
}

/// Run the instantiation pipeline for `module`, resolving its imports
/// through `names` against `store`. Returns the fresh [`ModuleRef`] and its
/// [`ModuleInst`]; the caller is responsible for inserting them into its own
/// copy of the store (matching the non-transactional semantics: segment
/// initialization and the start function see the provided `store` with this
/// module already present, but the caller's outer store is not implicitly
/// mutated).
pub fn initialize(module: Rc<ast::Module>, names: &ImportsBuilder, store: &ModuleStore) -> Result<(ModuleRef, ModuleInst), Error> {
    let types = module.types.clone();

    let mut funcs = Vec::new();
    let mut tables = Vec::new();
    let mut memories = Vec::new();
    let mut globals = Vec::new();

    for import in &module.imports {
        let provider_ref = names
            .resolve(&import.module)
            .ok_or_else(|| Error::link(format!("Missing module for import: {}", import.module)))?;
        let provider = store
            .get(&provider_ref)
            .ok_or_else(|| Error::link(format!("Missing module for import: {}", import.module)))?;
        let extern_val = provider
            .export_by_name(&import.field)
            .ok_or_else(|| Error::link(format!("Missing extern for import: {}.{}", import.module, import.field)))?;

        let expected = match &import.desc {
            ast::ImportDesc::Func(type_idx) => ExternType::Func(
                types
                    .get(*type_idx as usize)
                    .cloned()
                    .ok_or_else(|| Error::crash("import referenced undefined type"))?,
            ),
            ast::ImportDesc::Table(desc) => ExternType::Table(*desc),
            ast::ImportDesc::Memory(desc) => ExternType::Memory(*desc),
            ast::ImportDesc::Global(desc) => ExternType::Global(*desc),
        };
        match_extern_type(&extern_val.extern_type(), &expected).map_err(|msg| Error::link(format!("incompatible import type: {}", msg)))?;

        match extern_val {
            ExternVal::Func(f) => funcs.push(f),
            ExternVal::Table(t) => tables.push(t),
            ExternVal::Memory(m) => memories.push(m),
            ExternVal::Global(g) => globals.push(g),
        }
    }

    let module_ref = next_key(store);

    for desc in &module.tables {
        tables.push(TableInstance::alloc(*desc).map_err(|e| Error::link(e.to_string()))?);
    }
    for desc in &module.memories {
        memories.push(MemoryInstance::alloc(*desc).map_err(|e| Error::link(e.to_string()))?);
    }
    for body in &module.funcs {
        let signature = types
            .get(body.type_idx as usize)
            .cloned()
            .ok_or_else(|| Error::crash("function referenced undefined type"))?;
        funcs.push(FuncInstance::alloc_ast(signature, module_ref, Rc::new(body.clone())));
    }
    for def in &module.globals {
        let val = eval_const(&def.init, &globals)?;
        if val.value_type() != def.desc.value_type() {
            return Err(Error::crash("global initializer type mismatch"));
        }
        globals.push(GlobalInstance::alloc(def.desc, val));
    }

    let mut inst = ModuleInst {
        module: Rc::clone(&module),
        types,
        funcs,
        tables,
        memories,
        globals,
        exports: BTreeMap::new(),
    };

    let mut work_store = store.clone();
    work_store.insert(module_ref, inst.clone());

    for segment in &module.elements {
        init_element_segment(segment, &inst)?;
    }
    for segment in &module.data {
        init_data_segment(segment, &inst)?;
    }

    for export in &module.exports {
        let extern_val = match &export.desc {
            ast::ExportDesc::Func(idx) => ExternVal::Func(
                inst.func_by_index(*idx)
                    .ok_or_else(|| Error::crash("export referenced undefined function"))?,
            ),
            ast::ExportDesc::Table(idx) => ExternVal::Table(
                inst.table_by_index(*idx)
                    .ok_or_else(|| Error::crash("export referenced undefined table"))?,
            ),
            ast::ExportDesc::Memory(idx) => ExternVal::Memory(
                inst.memory_by_index(*idx)
                    .ok_or_else(|| Error::crash("export referenced undefined memory"))?,
            ),
            ast::ExportDesc::Global(idx) => ExternVal::Global(
                inst.global_by_index(*idx)
                    .ok_or_else(|| Error::crash("export referenced undefined global"))?,
            ),
        };
        inst.exports.insert(export.name.clone(), extern_val);
    }

    work_store.insert(module_ref, inst.clone());

    if let Some(start_idx) = module.start {
        let start_func = inst
            .func_by_index(start_idx)
            .ok_or_else(|| Error::crash("start function index out of bounds"))?;
        eval::invoke(&work_store, &start_func, &[])?;
    }

    Ok((module_ref, inst))
}

fn init_element_segment(segment: &ElementSegment, inst: &ModuleInst) -> Result<(), Error> {
    let table = inst
        .table_by_index(segment.table_index)
        .ok_or_else(|| Error::crash("element segment referenced undefined table"))?;
    let offset = eval_const_i32(&segment.offset, &inst.globals)? as u32;
    let funcs: Vec<FuncRef> = segment
        .funcs
        .iter()
        .map(|&idx| inst.func_by_index(idx).ok_or_else(|| Error::crash("element segment referenced undefined function")))
        .collect::<Result<_, _>>()?;
    table.blit(offset, &funcs).map_err(|_| Error::link("elements segment does not fit table"))
}

fn init_data_segment(segment: &ast::DataSegment, inst: &ModuleInst) -> Result<(), Error> {
    let memory = inst
        .memory_by_index(segment.memory_index)
        .ok_or_else(|| Error::crash("data segment referenced undefined memory"))?;
    let offset = eval_const_i32(&segment.offset, &inst.globals)?;
    let effective_base = offset as u32 as u64;
    memory.store_bytes(effective_base, &segment.bytes).map_err(|_| Error::link("data segment does not fit memory"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DataSegment, ExportDesc, Import, ImportDesc, Module};
    use crate::types::ValueType;

    fn empty_module() -> Rc<ast::Module> {
        Rc::new(Module::default())
    }

    #[test]
    fn next_key_starts_at_one() {
        let store = ModuleStore::new();
        assert_eq!(next_key(&store), ModuleRef(1));
    }

    #[test]
    fn next_key_fills_gaps() {
        let mut store = ModuleStore::new();
        let (r, inst) = initialize(empty_module(), &ImportsBuilder::new(), &store).unwrap();
        store.insert(r, inst);
        assert_eq!(next_key(&store), ModuleRef(2));
    }

    #[test]
    fn instantiate_empty_module() {
        let store = ModuleStore::new();
        let (r, inst) = initialize(empty_module(), &ImportsBuilder::new(), &store).unwrap();
        assert_eq!(r, ModuleRef(1));
        assert!(inst.exports.is_empty());
    }

    #[test]
    fn missing_import_module_is_a_link_error() {
        let mut module = Module::default();
        module.imports.push(Import {
            module: "env".to_string(),
            field: "f".to_string(),
            desc: ImportDesc::Func(0),
        });
        module.types.push(Signature::new(vec![], None));
        let store = ModuleStore::new();
        match initialize(Rc::new(module), &ImportsBuilder::new(), &store) {
            Err(Error::Link(_, msg)) => assert!(msg.contains("env")),
            other => panic!("expected link error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn data_segment_out_of_bounds_is_a_link_error() {
        let mut module = Module::default();
        module.memories.push(MemoryDescriptor::new(1, None));
        module.data.push(DataSegment {
            memory_index: 0,
            offset: vec![Instr::I32Const(65535)],
            bytes: vec![1, 2, 3, 4],
        });
        let store = ModuleStore::new();
        match initialize(Rc::new(module), &ImportsBuilder::new(), &store) {
            Err(Error::Link(_, msg)) => assert!(msg.contains("data segment")),
            other => panic!("expected link error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn export_resolves_module_defined_global() {
        let mut module = Module::default();
        module.globals.push(ast::GlobalDef {
            desc: GlobalDescriptor::new(ValueType::I32, false),
            init: vec![Instr::I32Const(7)],
        });
        module.exports.push(ast::Export {
            name: "g".to_string(),
            desc: ExportDesc::Global(0),
        });
        let store = ModuleStore::new();
        let (_, inst) = initialize(Rc::new(module), &ImportsBuilder::new(), &store).unwrap();
        let g = inst.export_by_name("g").unwrap();
        assert_eq!(g.as_global().unwrap().get(), RuntimeValue::I32(7));
    }
}
