//! # busscripts-adapter-rhai
//!
//! Rhai adapter: implements the [`ScriptCompiler`] port for `.rhai` units.
//!
//! ## Responsibilities
//! - Give every unit its own [`rhai::Engine`] with the capability surface
//!   registered against that unit's [`Capabilities`]
//! - Resolve `import "x" as m;` relative to the unit's directory
//! - Route `print`/`debug` and the `log` object to the unit's log
//! - Expose the shared registry as the `registry` object
//! - Convert values between Rhai and JSON, and evaluation errors into faults
//!
//! Scope variables (`log`, `registry`) are visible to the top-level body and
//! the closures it creates, not to `fn` definitions.
//!
//! ## Dependency rule
//! Depends on `busscripts-app` and `busscripts-domain`.

mod bindings;
pub mod convert;
pub mod error;
mod handle;
pub mod trace;

use std::path::Path;
use std::sync::{Arc, OnceLock};

use busscripts_app::capabilities::Capabilities;
use busscripts_app::ports::{CompileError, CompiledUnit, ScriptCompiler, UnitSource};
use busscripts_app::supervisor::Fault;
use rhai::module_resolvers::FileModuleResolver;
use rhai::{AST, Engine, Scope};

pub use bindings::{LOG_VARIABLE, REGISTRY_VARIABLE, SharedTable, UnitLog};
pub use error::RhaiError;
use handle::{HandleSlot, ScriptHandle};

/// File extension of Rhai units.
pub const EXTENSION: &str = "rhai";

/// Compiles `.rhai` sources, one engine per unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct RhaiCompiler;

impl RhaiCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ScriptCompiler for RhaiCompiler {
    fn recognizes(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == EXTENSION)
    }

    fn compile(
        &self,
        source: &UnitSource,
        capabilities: Capabilities,
    ) -> Result<Box<dyn CompiledUnit>, CompileError> {
        let slot: HandleSlot = Arc::new(OnceLock::new());
        let mut engine = Engine::new();
        if let Some(dir) = source.path.parent() {
            engine.set_module_resolver(FileModuleResolver::new_with_path(dir));
        }
        bindings::register(&mut engine, &capabilities, &slot);

        let mut ast = engine.compile(&source.code).map_err(RhaiError::from)?;
        ast.set_source(source.id.as_str());

        let engine = Arc::new(engine);
        let ast = Arc::new(ast);
        // The slot is created above; nothing else fills it.
        if slot.set(ScriptHandle::new(&engine, &ast)).is_err() {
            tracing::debug!(unit = %source.id, "script handle already set");
        }
        tracing::debug!(unit = %source.id, "compiled");
        Ok(Box::new(RhaiUnit {
            engine,
            ast,
            capabilities,
        }))
    }
}

/// A compiled unit. Owns its engine; the callbacks it registered hold it
/// weakly.
pub struct RhaiUnit {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    capabilities: Capabilities,
}

impl CompiledUnit for RhaiUnit {
    fn run(&self) -> Result<(), Fault> {
        let mut scope = Scope::new();
        scope.push(LOG_VARIABLE, UnitLog::new(self.capabilities.clone()));
        scope.push(
            REGISTRY_VARIABLE,
            SharedTable::new(Arc::clone(self.capabilities.registry())),
        );
        self.engine
            .run_ast_with_scope(&mut scope, &self.ast)
            .map_err(|err| trace::fault_from(&err))
    }
}
