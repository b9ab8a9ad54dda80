//! Rhai adapter error types.

use busscripts_app::ports::CompileError;
use busscripts_app::supervisor::Fault;
use rhai::EvalAltResult;

/// Errors specific to the Rhai adapter.
#[derive(Debug, thiserror::Error)]
pub enum RhaiError {
    /// The unit source does not parse.
    #[error("{0}")]
    Parse(#[from] rhai::ParseError),

    /// A value cannot cross between the script and the state store.
    #[error("value conversion failed: {0}")]
    Conversion(String),

    /// The unit's engine is gone; its callbacks can no longer run.
    #[error("script engine detached")]
    Detached,
}

impl From<RhaiError> for CompileError {
    fn from(err: RhaiError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<RhaiError> for Fault {
    fn from(err: RhaiError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<RhaiError> for Box<EvalAltResult> {
    fn from(err: RhaiError) -> Self {
        err.to_string().into()
    }
}
