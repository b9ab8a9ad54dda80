//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`BusScriptsError`] via `#[from]` when it crosses a boundary.

/// Top-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum BusScriptsError {
    /// Bad arity or type on a capability call.
    #[error("argument error")]
    Argument(#[from] ArgumentError),

    /// Unknown solar event, out-of-range shift, malformed trigger.
    #[error("configuration error")]
    Configuration(#[from] ConfigurationError),

    /// A fault raised while a unit's code was running.
    #[error("runtime error in {unit}: {message}")]
    Runtime { unit: String, message: String },

    /// The bus transport failed.
    #[error("transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A capability was called with the wrong arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    /// No topic (or an empty topic list) was given.
    #[error("argument topic missing")]
    MissingTopic,

    /// No trigger (or an empty trigger list) was given.
    #[error("argument trigger missing")]
    MissingTrigger,

    /// The callback argument is not callable.
    #[error("callback is not a function")]
    NotCallable,

    /// An argument has the wrong type.
    #[error("argument {argument} must be {expected}")]
    TypeMismatch {
        argument: &'static str,
        expected: &'static str,
    },

    /// Too many or too few arguments.
    #[error("wrong number of arguments")]
    WrongArity,
}

/// A registration was rejected because its specification is invalid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    /// The solar event name is not one of the supported events.
    #[error("unknown solar event {0:?}")]
    UnknownSolarEvent(String),

    /// A solar shift outside of ±86400 seconds.
    #[error("shift of {0} seconds is out of range (±86400)")]
    ShiftOutOfRange(f64),

    /// A trigger specification could not be parsed.
    #[error("malformed trigger {spec:?}: {reason}")]
    MalformedTrigger { spec: String, reason: String },

    /// A topic pattern uses wildcards illegally.
    #[error("invalid topic pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_argument_errors() {
        assert_eq!(
            ArgumentError::MissingTopic.to_string(),
            "argument topic missing"
        );
        assert_eq!(
            ArgumentError::NotCallable.to_string(),
            "callback is not a function"
        );
        let err = ArgumentError::TypeMismatch {
            argument: "options",
            expected: "a map",
        };
        assert_eq!(err.to_string(), "argument options must be a map");
    }

    #[test]
    fn should_display_configuration_errors() {
        let err = ConfigurationError::UnknownSolarEvent("moonrise".to_string());
        assert_eq!(err.to_string(), "unknown solar event \"moonrise\"");
        let err = ConfigurationError::ShiftOutOfRange(90000.0);
        assert!(err.to_string().contains("90000"));
    }

    #[test]
    fn should_convert_argument_error_into_top_level_error() {
        let err: BusScriptsError = ArgumentError::WrongArity.into();
        assert!(matches!(err, BusScriptsError::Argument(_)));
    }

    #[test]
    fn should_convert_configuration_error_into_top_level_error() {
        let err: BusScriptsError = ConfigurationError::ShiftOutOfRange(1e6).into();
        assert!(matches!(err, BusScriptsError::Configuration(_)));
    }
}
