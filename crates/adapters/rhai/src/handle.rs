//! Calling back into a unit's script after its body has returned.

use std::sync::{Arc, OnceLock, Weak};

use busscripts_app::router::{Callback, Delivery, Predicate};
use busscripts_app::scheduler::Job;
use busscripts_app::supervisor::Fault;
use rhai::{AST, Dynamic, Engine, FnPtr};

use crate::convert::{delivery_args, from_script};
use crate::error::RhaiError;
use crate::trace::fault_from;

/// Set once the unit compiled; read by every registered capability.
pub(crate) type HandleSlot = Arc<OnceLock<ScriptHandle>>;

/// The engine and AST a unit's function pointers resolve against.
///
/// Holds the engine weakly: the compiled unit owns it.
#[derive(Clone)]
pub(crate) struct ScriptHandle {
    engine: Weak<Engine>,
    ast: Arc<AST>,
}

impl ScriptHandle {
    pub(crate) fn new(engine: &Arc<Engine>, ast: &Arc<AST>) -> Self {
        Self {
            engine: Arc::downgrade(engine),
            ast: Arc::clone(ast),
        }
    }

    /// Declared parameter count of the script function behind `f`, not
    /// counting curried captures.
    fn arity(&self, f: &FnPtr) -> Option<usize> {
        let curried = f.curry().len();
        self.ast
            .iter_functions()
            .find(|meta| meta.name == f.fn_name())
            .map(|meta| meta.params.len().saturating_sub(curried))
    }

    /// Call `f`, dropping trailing arguments it does not declare.
    pub(crate) fn call(&self, f: &FnPtr, mut args: Vec<Dynamic>) -> Result<Dynamic, Fault> {
        let engine = self.engine.upgrade().ok_or(RhaiError::Detached)?;
        if let Some(arity) = self.arity(f) {
            args.truncate(arity);
        }
        f.call::<Dynamic>(&engine, &self.ast, args)
            .map_err(|err| fault_from(&err))
    }

    pub(crate) fn callback(&self, f: FnPtr) -> Callback {
        let script = self.clone();
        Arc::new(move |delivery: &Delivery| -> Result<(), Fault> {
            script.call(&f, delivery_args(delivery)?).map(drop)
        })
    }

    pub(crate) fn predicate(&self, f: FnPtr) -> Predicate {
        let script = self.clone();
        Arc::new(move |delivery: &Delivery| -> Result<bool, Fault> {
            let verdict = script.call(&f, delivery_args(delivery)?)?;
            Ok(busscripts_app::capabilities::truthy(&from_script(&verdict)?))
        })
    }

    pub(crate) fn job(&self, f: FnPtr) -> Job {
        let script = self.clone();
        Arc::new(move || -> Result<(), Fault> { script.call(&f, Vec::new()).map(drop) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(code: &str) -> (Arc<Engine>, ScriptHandle, Dynamic) {
        let engine = Arc::new(Engine::new());
        let ast = Arc::new(engine.compile(code).unwrap());
        let handle = ScriptHandle::new(&engine, &ast);
        let value = engine.eval_ast::<Dynamic>(&ast).unwrap();
        (engine, handle, value)
    }

    #[test]
    fn should_trim_arguments_to_declared_arity() {
        let (_engine, handle, f) = compiled("|a, b| a + b");
        let f = f.cast::<FnPtr>();
        let args = vec![
            Dynamic::from(1_i64),
            Dynamic::from(2_i64),
            Dynamic::from(100_i64),
        ];
        let sum = handle.call(&f, args).unwrap();
        assert_eq!(sum.as_int().unwrap(), 3);
    }

    #[test]
    fn should_account_for_curried_captures() {
        let (_engine, handle, f) = compiled("let base = 10; |x| base + x");
        let f = f.cast::<FnPtr>();
        let args = vec![Dynamic::from(5_i64), Dynamic::from(99_i64)];
        assert_eq!(handle.call(&f, args).unwrap().as_int().unwrap(), 15);
    }

    #[test]
    fn should_fault_once_engine_is_dropped() {
        let (engine, handle, f) = compiled("|| 1");
        drop(engine);
        let err = handle.call(&f.cast::<FnPtr>(), Vec::new()).unwrap_err();
        assert_eq!(err.message, "script engine detached");
    }

    #[test]
    fn should_surface_thrown_errors_as_faults() {
        let (_engine, handle, f) = compiled(r#"|| throw "bad""#);
        let err = handle.call(&f.cast::<FnPtr>(), Vec::new()).unwrap_err();
        assert_eq!(err.message, "bad");
    }
}
