//! Runtime representation of a function: either a module-defined function
//! body paired with the module instance it closes over, or a host function
//! supplied by the embedder.

use crate::ast::FuncBody;
use crate::module::ModuleRef;
use crate::types::Signature;
use crate::{RuntimeValue, TrapKind};
use std::fmt;
use std::rc::Rc;

/// Reference-counted handle to a [`FuncInstance`].
#[derive(Clone, Debug)]
pub struct FuncRef(Rc<FuncInstance>);

impl std::ops::Deref for FuncRef {
    type Target = FuncInstance;
    fn deref(&self) -> &FuncInstance {
        &self.0
    }
}

/// A function is either defined by a module (a [`FuncBody`] from its AST,
/// closed over the module instance its `Call`/`GetGlobal`/... instructions
/// index into) or provided by the host.
///
/// A module-defined function doesn't hold its owning module by an `Rc` back
/// reference: the module instance owns its functions already, so an `Rc`
/// cycle would never drop. Instead it holds the module's integer key in the
/// store ([`ModuleRef`]), looked up afresh whenever the function is invoked.
pub enum FuncInstance {
    Ast {
        signature: Signature,
        module: ModuleRef,
        body: Rc<FuncBody>,
    },
    Host {
        signature: Signature,
        func: Rc<dyn Fn(&[RuntimeValue]) -> Vec<RuntimeValue>>,
    },
    HostEff {
        signature: Signature,
        func: Rc<dyn Fn(&[RuntimeValue]) -> Result<Vec<RuntimeValue>, String>>,
    },
}

impl fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FuncInstance::Ast { signature, .. } => write!(f, "Ast {{ signature: {:?} }}", signature),
            FuncInstance::Host { signature, .. } => write!(f, "Host {{ signature: {:?} }}", signature),
            FuncInstance::HostEff { signature, .. } => write!(f, "HostEff {{ signature: {:?} }}", signature),
        }
    }
}

impl FuncInstance {
    pub(crate) fn alloc_ast(signature: Signature, module: ModuleRef, body: Rc<FuncBody>) -> FuncRef {
        FuncRef(Rc::new(FuncInstance::Ast { signature, module, body }))
    }

    pub fn signature(&self) -> &Signature {
        match self {
            FuncInstance::Ast { signature, .. } => signature,
            FuncInstance::Host { signature, .. } => signature,
            FuncInstance::HostEff { signature, .. } => signature,
        }
    }

    pub(crate) fn module(&self) -> Option<ModuleRef> {
        match self {
            FuncInstance::Ast { module, .. } => Some(*module),
            FuncInstance::Host { .. } | FuncInstance::HostEff { .. } => None,
        }
    }

    pub(crate) fn body(&self) -> Option<Rc<FuncBody>> {
        match self {
            FuncInstance::Ast { body, .. } => Some(Rc::clone(body)),
            FuncInstance::Host { .. } | FuncInstance::HostEff { .. } => None,
        }
    }

    /// Call a host function (infallible variant), mapping it to the same
    /// `Result` shape a trapping call would produce.
    pub(crate) fn call_host(&self, args: &[RuntimeValue]) -> Result<Vec<RuntimeValue>, TrapKind> {
        match self {
            FuncInstance::Host { func, .. } => Ok(func(args)),
            FuncInstance::HostEff { func, .. } => func(args).map_err(TrapKind::Host),
            FuncInstance::Ast { .. } => panic!("call_host invoked on an Ast function"),
        }
    }
}

/// Register a host function that cannot fail.
///
/// `f` receives the call arguments, already checked against `ty` by the
/// caller, and returns the result values (empty if `ty.return_type()` is
/// `None`).
pub fn create_host_func(ty: Signature, f: impl Fn(&[RuntimeValue]) -> Vec<RuntimeValue> + 'static) -> FuncRef {
    FuncRef(Rc::new(FuncInstance::Host {
        signature: ty,
        func: Rc::new(f),
    }))
}

/// Register a host function that can report failure.
///
/// An `Err(msg)` from `f` surfaces to the caller as [`crate::TrapKind::Host`].
pub fn create_host_func_eff(
    ty: Signature,
    f: impl Fn(&[RuntimeValue]) -> Result<Vec<RuntimeValue>, String> + 'static,
) -> FuncRef {
    FuncRef(Rc::new(FuncInstance::HostEff {
        signature: ty,
        func: Rc::new(f),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    #[test]
    fn host_func_roundtrips() {
        let f = create_host_func(Signature::new(vec![ValueType::I32], Some(ValueType::I32)), |args| {
            vec![RuntimeValue::I32(match args[0] {
                RuntimeValue::I32(v) => v + 1,
                _ => unreachable!(),
            })]
        });
        assert_eq!(f.call_host(&[RuntimeValue::I32(41)]).unwrap(), vec![RuntimeValue::I32(42)]);
    }

    #[test]
    fn host_func_eff_reports_failure() {
        let f = create_host_func_eff(Signature::new(vec![], None), |_| Err("boom".to_string()));
        match f.call_host(&[]).unwrap_err() {
            TrapKind::Host(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
