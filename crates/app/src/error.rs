//! Errors raised by capability calls.

use busscripts_domain::error::{ArgumentError, BusScriptsError, ConfigurationError};

use crate::ports::PublishError;

/// Why a capability call was rejected. Aborts only that call.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("ArgumentError: {0}")]
    Argument(#[from] ArgumentError),

    #[error("ConfigurationError: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
}

impl From<CapabilityError> for BusScriptsError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Argument(err) => Self::Argument(err),
            CapabilityError::Configuration(err) => Self::Configuration(err),
            CapabilityError::Publish(err) => Self::Transport(Box::new(err)),
        }
    }
}
