//! Bus port: inbound and outbound messages of the publish/subscribe bus.
//!
//! Publishing is synchronous: capability calls made from unit code cannot
//! await, so implementations must enqueue rather than block.

use std::sync::Arc;

/// Delivery guarantee requested for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Map a numeric level (0, 1, 2) to a [`QoS`].
    #[must_use]
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }
}

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    /// Whether the broker flagged it as a retained (last known) value.
    pub retained: bool,
}

impl InboundMessage {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained,
        }
    }
}

/// A message to send to the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub qos: QoS,
}

/// Why a message could not be handed to the bus.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("bus not connected")]
    NotConnected,

    #[error("bus rejected message")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Sends messages to the bus.
pub trait BusPublisher: Send + Sync {
    /// Queue a message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the transport refuses the message.
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;
}

impl<T: BusPublisher + ?Sized> BusPublisher for Arc<T> {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        (**self).publish(message)
    }
}

/// Consumes messages received from the bus, one at a time.
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, message: InboundMessage);
}

impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    fn handle_message(&self, message: InboundMessage) {
        (**self).handle_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_map_qos_levels() {
        assert_eq!(QoS::from_level(0), Some(QoS::AtMostOnce));
        assert_eq!(QoS::from_level(1), Some(QoS::AtLeastOnce));
        assert_eq!(QoS::from_level(2), Some(QoS::ExactlyOnce));
        assert_eq!(QoS::from_level(3), None);
    }

    #[test]
    fn should_default_to_at_most_once() {
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn should_display_publish_errors() {
        assert_eq!(PublishError::NotConnected.to_string(), "bus not connected");
    }
}
