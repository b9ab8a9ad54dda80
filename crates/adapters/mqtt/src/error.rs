//! MQTT adapter error types.

use busscripts_app::ports::PublishError;
use busscripts_domain::error::BusScriptsError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The broker URL does not parse.
    #[error("invalid broker url")]
    InvalidUrl(#[source] url::ParseError),

    /// The broker URL uses a scheme other than `mqtt` or `tcp`.
    #[error("unsupported broker url scheme {0:?}")]
    UnsupportedScheme(String),

    /// The broker URL has no host.
    #[error("broker url has no host")]
    MissingHost,

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),
}

impl From<MqttError> for BusScriptsError {
    fn from(err: MqttError) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl From<MqttError> for PublishError {
    fn from(err: MqttError) -> Self {
        Self::Rejected(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_missing_host_error() {
        assert_eq!(MqttError::MissingHost.to_string(), "broker url has no host");
    }

    #[test]
    fn should_convert_to_transport_error() {
        let err: BusScriptsError = MqttError::MissingHost.into();
        assert!(matches!(err, BusScriptsError::Transport(_)));
    }

    #[test]
    fn should_convert_to_rejected_publish() {
        let err: PublishError = MqttError::UnsupportedScheme("ws".to_string()).into();
        assert!(matches!(err, PublishError::Rejected(_)));
    }
}
