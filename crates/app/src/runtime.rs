//! Runtime: the inbound pipeline and the variable write semantics.
//!
//! Inbound messages are decoded, stored and dispatched one at a time. Under
//! the variable root the daemon is authoritative: writes go straight into
//! the store and the resulting record is published retained.

use std::sync::Arc;

use busscripts_domain::solar::Location;
use busscripts_domain::state::Decoded;
use busscripts_domain::time::{Timestamp, from_millis, now, to_millis};
use busscripts_domain::topic::{TopicCodec, WriteTarget};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::CapabilityError;
use crate::ports::{BusPublisher, InboundMessage, MessageHandler, OutboundMessage, QoS};
use crate::registry::SharedRegistry;
use crate::router::{Delivery, Router};
use crate::scheduler::Scheduler;
use crate::state_store::{StateStore, Update};
use crate::sun_scheduler::SunScheduler;

/// Static settings of a runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub variable_root: String,
    /// Variable feedback: write variables locally instead of asking the bus.
    pub variables_enabled: bool,
    pub location: Location,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            variable_root: "var".to_string(),
            variables_enabled: true,
            location: Location {
                latitude: 48.7408,
                longitude: 9.1778,
            },
        }
    }
}

/// Shared core every unit's capability surface is built on.
pub struct Runtime {
    codec: TopicCodec,
    variables_enabled: bool,
    store: StateStore,
    router: Router,
    scheduler: Scheduler,
    sun: Arc<SunScheduler>,
    registry: Arc<SharedRegistry>,
    publisher: Arc<dyn BusPublisher>,
}

impl Runtime {
    #[must_use]
    pub fn new(settings: RuntimeSettings, publisher: Arc<dyn BusPublisher>) -> Self {
        let codec = TopicCodec::new(settings.variable_root);
        Self {
            router: Router::new(codec.clone()),
            codec,
            variables_enabled: settings.variables_enabled,
            store: StateStore::new(),
            scheduler: Scheduler::new(),
            sun: Arc::new(SunScheduler::new(settings.location)),
            registry: Arc::new(SharedRegistry::new()),
            publisher,
        }
    }

    #[must_use]
    pub fn codec(&self) -> &TopicCodec {
        &self.codec
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn sun(&self) -> &Arc<SunScheduler> {
        &self.sun
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn variables_enabled(&self) -> bool {
        self.variables_enabled
    }

    /// Start background work (the daily solar recompute).
    pub fn start(&self) -> JoinHandle<()> {
        self.sun.start()
    }

    /// Process one inbound bus message.
    pub fn handle(&self, message: InboundMessage) {
        let InboundMessage {
            topic,
            payload,
            retained,
        } = message;
        tracing::trace!(%topic, retained, "message received");

        if self.variables_enabled {
            if let Some(status) = self.codec.variable_set_to_status(&topic) {
                if let Err(err) = self.write_variable(&status, Decoded::from_payload(&payload), false) {
                    tracing::warn!(%err, %topic, "failed to apply variable set request");
                }
                return;
            }
            if self.codec.is_variable(&topic) {
                match self.store.write_unless_echo(&topic, Decoded::from_payload(&payload)) {
                    Some(update) => self.dispatch(&topic, update, retained),
                    None => tracing::trace!(%topic, "own variable echo ignored"),
                }
                return;
            }
        }

        let update = self.store.update(&topic, &payload);
        self.dispatch(&topic, update, retained);
    }

    /// Write `value` to `topic` following the variable rules.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Publish`] when the bus refuses the message.
    pub fn set_value(&self, topic: &str, value: Value, force: bool) -> Result<(), CapabilityError> {
        match self.codec.write_target(topic) {
            WriteTarget::Variable { status, .. } if self.variables_enabled => {
                self.write_variable(&status, Decoded::from_value(value), force)
            }
            WriteTarget::Variable { status, set } => {
                let wanted = Decoded::from_value(value.clone()).value;
                if self.store.value(&status).as_ref() == Some(&wanted) {
                    tracing::debug!(%topic, "value unchanged, set request suppressed");
                    return Ok(());
                }
                self.send(&set, &value, false, QoS::default())
            }
            WriteTarget::Remote { topic } => self.send(&topic, &value, false, QoS::default()),
        }
    }

    /// Publish `payload` on `topic` (`root//path` resolves to the status
    /// namespace). Strings go out raw, everything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Publish`] when the bus refuses the message.
    pub fn publish(
        &self,
        topic: &str,
        payload: &Value,
        retain: bool,
        qos: QoS,
    ) -> Result<(), CapabilityError> {
        self.send(&self.codec.status_topic(topic), payload, retain, qos)
    }

    #[must_use]
    pub fn get_value(&self, topic: &str) -> Option<Value> {
        self.store.value(&self.codec.status_topic(topic))
    }

    /// Walk `path` into the record of `topic`; an empty path returns the
    /// whole record in wire form.
    #[must_use]
    pub fn get_prop(&self, topic: &str, path: &[&str]) -> Option<Value> {
        self.store
            .get(&self.codec.status_topic(topic))
            .and_then(|record| record.prop(path))
    }

    /// Seconds since the value of `topic` last changed, rounded.
    #[must_use]
    pub fn age(&self, topic: &str) -> Option<i64> {
        let record = self.store.get(&self.codec.status_topic(topic))?;
        let millis = (now() - record.last_changed).num_milliseconds();
        Some((millis + 500).div_euclid(1000))
    }

    fn write_variable(&self, status: &str, decoded: Decoded, force: bool) -> Result<(), CapabilityError> {
        let decoded = Decoded {
            timestamp: Some(stamp()),
            ..decoded
        };
        let update = self.store.write(status, decoded);
        let changed = update.changed();
        let wire = update.record.to_json();
        self.dispatch(status, update, false);
        if changed || force {
            self.send(status, &wire, true, QoS::default())
        } else {
            tracing::debug!(topic = %status, "variable unchanged, publish suppressed");
            Ok(())
        }
    }

    fn dispatch(&self, topic: &str, update: Update, retained: bool) {
        let delivery = Delivery::new(topic, update.record, update.previous, retained);
        let scheduled = self.router.dispatch(delivery);
        if scheduled > 0 {
            tracing::debug!(%topic, scheduled, "dispatched");
        }
    }

    fn send(&self, topic: &str, payload: &Value, retain: bool, qos: QoS) -> Result<(), CapabilityError> {
        tracing::debug!(%topic, retain, "publish");
        self.publisher.publish(OutboundMessage {
            topic: topic.to_string(),
            payload: payload_text(payload),
            retain,
            qos,
        })?;
        Ok(())
    }
}

impl MessageHandler for Runtime {
    fn handle_message(&self, message: InboundMessage) {
        self.handle(message);
    }
}

/// Current time truncated to the wire resolution, so an echoed record
/// compares equal to the stored one.
fn stamp() -> Timestamp {
    let now = now();
    from_millis(to_millis(now)).unwrap_or(now)
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
