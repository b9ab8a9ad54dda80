//! Compiler port: turns extension source into a runnable unit, or fails.

use std::path::{Path, PathBuf};

use busscripts_domain::id::UnitId;

use crate::capabilities::Capabilities;
use crate::supervisor::Fault;

/// One extension source file, read and ready to compile.
#[derive(Debug, Clone)]
pub struct UnitSource {
    pub id: UnitId,
    pub path: PathBuf,
    pub code: String,
}

/// The source did not compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A compiled unit, bound to its capability surface.
pub trait CompiledUnit: Send + Sync {
    /// Execute the unit's top-level body once.
    ///
    /// # Errors
    ///
    /// Returns the [`Fault`] raised by the body; the caller's failure domain
    /// logs it.
    fn run(&self) -> Result<(), Fault>;
}

/// Compiles extension sources of the file types it recognises.
pub trait ScriptCompiler: Send + Sync {
    /// Whether `path` has a source extension this compiler handles.
    fn recognizes(&self, path: &Path) -> bool;

    /// Compile `source` exactly once, wiring `capabilities` into its
    /// isolated environment.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] when the source does not parse.
    fn compile(
        &self,
        source: &UnitSource,
        capabilities: Capabilities,
    ) -> Result<Box<dyn CompiledUnit>, CompileError>;
}
