//! Execution: drives the small-step stepper over a function's instructions
//! until it returns, traps, or runs out of call budget.
//!
//! The core data types here mirror the interpreter's working state one to
//! one: a [`Frame`] is a call's locals plus the module it closes over, a
//! [`Code`] is a value stack paired with the stream of administrative
//! instructions still to run, and a [`Config`] threads the module store, the
//! current frame, and the remaining call budget through the recursion.

pub(crate) mod const_eval;
mod stepper;

use crate::ast::Instr;
use crate::func::FuncRef;
use crate::module::{ModuleRef, ModuleStore};
use crate::{Error, Region, RuntimeValue, TrapKind, ValueType};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Frame entries before an `ExhaustionError`. Preserved verbatim as the
/// interpreter's only protection against unbounded recursion.
const CALL_BUDGET: i32 = 300;

/// A function activation: the locals it was called with (arguments followed
/// by zero-valued declared locals) and the module it was defined in, which
/// `Call`/`GetGlobal`/... inside its body resolve against.
pub(crate) struct Frame {
    pub(crate) module: ModuleRef,
    pub(crate) locals: Vec<Cell<RuntimeValue>>,
}

/// The stepper's working alphabet. Every admin-instruction is either a plain
/// Wasm instruction still to execute, or a signal produced by one (a trap, a
/// return, a branch) that propagates outward through enclosing labels and
/// frames until something is positioned to consume it.
pub(crate) enum AdminInstr {
    Plain(Instr),
    Invoke(FuncRef),
    Trapping(TrapKind),
    Returning(Vec<RuntimeValue>),
    Breaking(u32, Vec<RuntimeValue>),
    Label {
        arity: Option<ValueType>,
        continuation: Rc<[Instr]>,
        inner: Code,
    },
    Framed {
        arity: Option<ValueType>,
        frame: Frame,
        inner: Code,
    },
}

/// A value stack paired with the admin-instruction stream still to run.
/// `values` is a conventional LIFO stack (the last element is the top);
/// pushing and popping happen at the end, not the front (an ordinary `Vec`
/// rather than the head-prepending list the operational semantics describe,
/// since the two are equivalent and a `Vec` is the idiomatic choice here).
pub struct Code {
    pub(crate) values: Vec<RuntimeValue>,
    pub(crate) instrs: VecDeque<AdminInstr>,
}

impl Code {
    fn plain(instrs: &[Instr]) -> Code {
        Code {
            values: Vec::new(),
            instrs: instrs.iter().cloned().map(AdminInstr::Plain).collect(),
        }
    }
}

/// The evaluator's working state for one call: the store it reads functions,
/// tables, memories and globals through, the frame currently executing, and
/// the call budget shared across every nested frame of this invocation.
pub struct Config<'a> {
    modules: &'a ModuleStore,
    frame: Frame,
    budget: Rc<Cell<i32>>,
}

impl<'a> Config<'a> {
    fn with_frame(&self, frame: Frame) -> Config<'a> {
        Config {
            modules: self.modules,
            frame,
            budget: Rc::clone(&self.budget),
        }
    }
}

/// Invoke `func` with `args`, driving the stepper until it produces a result,
/// a well-defined trap, or a crash/exhaustion error.
///
/// `args` must already be well-typed for `func`'s signature; a mismatch is
/// reported as [`Error::Crash`], matching [`crate::invoke_by_name`]'s
/// contract that only a validated caller ever reaches here.
pub fn invoke(store: &ModuleStore, func: &FuncRef, args: &[RuntimeValue]) -> Result<Vec<RuntimeValue>, Error> {
    let config = Config {
        modules: store,
        frame: Frame {
            module: ModuleRef(0),
            locals: Vec::new(),
        },
        budget: Rc::new(Cell::new(CALL_BUDGET)),
    };
    let mut code = Code {
        values: args.to_vec(),
        instrs: VecDeque::from(vec![AdminInstr::Invoke(func.clone())]),
    };
    match stepper::run(&config, &mut code)? {
        stepper::Signal::Done => Ok(code.values),
        stepper::Signal::Trap(kind) => Err(Error::trap_kind(kind)),
        stepper::Signal::Return(_) => Err(Error::crash("undefined frame")),
        stepper::Signal::Break(_, _) => Err(Error::crash("undefined label")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FuncBody, Module};
    use crate::func::FuncInstance;
    use crate::imports::ImportsBuilder;
    use crate::types::{Signature, ValueType};
    use std::rc::Rc as StdRc;

    fn add_module() -> StdRc<Module> {
        let mut module = Module::default();
        module.types.push(Signature::new(vec![ValueType::I32, ValueType::I32], Some(ValueType::I32)));
        module.funcs.push(FuncBody {
            type_idx: 0,
            locals: vec![],
            body: StdRc::from(vec![Instr::GetLocal(0), Instr::GetLocal(1), Instr::I32Add]),
        });
        module.exports.push(crate::ast::Export {
            name: "add".to_string(),
            desc: crate::ast::ExportDesc::Func(0),
        });
        StdRc::new(module)
    }

    #[test]
    fn invokes_ast_function() {
        let store = ModuleStore::new();
        let (module_ref, inst) = crate::module::initialize(add_module(), &ImportsBuilder::new(), &store).unwrap();
        let mut store = store;
        store.insert(module_ref, inst.clone());
        let func = inst.export_by_name("add").unwrap().as_func().unwrap().clone();
        let result = invoke(&store, &func, &[RuntimeValue::I32(2), RuntimeValue::I32(3)]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I32(5)]);
    }

    #[test]
    fn br_to_function_label_returns_instead_of_crashing() {
        let store = ModuleStore::new();
        let mut module = Module::default();
        module.types.push(Signature::new(vec![], Some(ValueType::I32)));
        let (module_ref, inst) = crate::module::initialize(StdRc::new(module), &ImportsBuilder::new(), &store).unwrap();
        let mut store = store;
        store.insert(module_ref, inst);
        // (func (result i32) i32.const 5 br 0) -- branching to depth 0 here
        // targets the function's own implicit label, not an enclosing block.
        let func = FuncInstance::alloc_ast(
            Signature::new(vec![], Some(ValueType::I32)),
            module_ref,
            StdRc::new(FuncBody {
                type_idx: 0,
                locals: vec![],
                body: StdRc::from(vec![Instr::I32Const(5), Instr::Br(0)]),
            }),
        );
        let result = invoke(&store, &func, &[]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I32(5)]);
    }

    #[test]
    fn unreachable_traps() {
        let store = ModuleStore::new();
        let mut module = Module::default();
        module.types.push(Signature::new(vec![], None));
        let (module_ref, inst) = crate::module::initialize(StdRc::new(module), &ImportsBuilder::new(), &store).unwrap();
        let mut store = store;
        store.insert(module_ref, inst);
        let func = FuncInstance::alloc_ast(
            Signature::new(vec![], None),
            module_ref,
            StdRc::new(FuncBody {
                type_idx: 0,
                locals: vec![],
                body: StdRc::from(vec![Instr::Unreachable]),
            }),
        );
        match invoke(&store, &func, &[]) {
            Err(Error::Trap(t)) => assert!(matches!(t.kind(), TrapKind::Unreachable)),
            other => panic!("expected trap, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn exhausts_on_unbounded_recursion() {
        let mut module = Module::default();
        module.types.push(Signature::new(vec![], None));
        module.funcs.push(FuncBody {
            type_idx: 0,
            locals: vec![],
            body: StdRc::from(vec![Instr::Call(0)]),
        });
        module.exports.push(crate::ast::Export {
            name: "loop_forever".to_string(),
            desc: crate::ast::ExportDesc::Func(0),
        });
        let store = ModuleStore::new();
        let (module_ref, inst) = crate::module::initialize(StdRc::new(module), &ImportsBuilder::new(), &store).unwrap();
        let mut store = store;
        store.insert(module_ref, inst.clone());
        let func = inst.export_by_name("loop_forever").unwrap().as_func().unwrap().clone();
        match invoke(&store, &func, &[]) {
            Err(Error::Exhaustion(_, msg)) => assert_eq!(msg, "call stack exhausted"),
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }
    }
}
