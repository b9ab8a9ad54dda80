//! # busscripts-adapter-mqtt
//!
//! MQTT adapter: the bus collaborator of busscripts, built on rumqttc.
//!
//! ## Responsibilities
//! - Connect with a last will of `0` on `<name>/connected` (retained)
//! - On every connection publish `2` on `<name>/connected` and subscribe `#`
//! - Feed every received message to a [`MessageHandler`], one at a time
//! - Signal readiness once retained messages have settled after the first
//!   connection ([`warmup::WarmupGate`])
//! - Implement [`BusPublisher`] on top of the client request queue
//!
//! ## Dependency rule
//! Depends on `busscripts-app` and `busscripts-domain`.

pub mod config;
pub mod error;
pub mod warmup;

use std::time::Duration;

use busscripts_app::ports::{
    BusPublisher, InboundMessage, MessageHandler, OutboundMessage, PublishError, QoS,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use config::MqttConfig;
pub use error::MqttError;
use warmup::WarmupGate;

const SUBSCRIBE_ALL: &str = "#";
const LIVENESS_DISCONNECTED: &str = "0";
const LIVENESS_STARTING: &str = "2";

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// [`BusPublisher`] queueing onto the rumqttc client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl BusPublisher for MqttPublisher {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.client
            .try_publish(
                message.topic,
                to_rumqttc(message.qos),
                message.retain,
                message.payload.into_bytes(),
            )
            .map_err(|err| MqttError::Client(err).into())
    }
}

/// A configured, not yet running, broker connection.
pub struct MqttBus {
    config: MqttConfig,
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttBus {
    /// Build the client. No connection is made until [`spawn`](Self::spawn).
    ///
    /// # Errors
    ///
    /// Returns [`MqttError`] when the broker URL is invalid.
    pub fn new(config: MqttConfig) -> Result<Self, MqttError> {
        let endpoint = config.endpoint()?;
        let client_id = format!("{}_{:08x}", config.name, rand::random::<u32>());
        let mut options = MqttOptions::new(client_id, endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
        options.set_last_will(LastWill::new(
            config.connected_topic(),
            LIVENESS_DISCONNECTED,
            rumqttc::QoS::AtMostOnce,
            true,
        ));
        if let Some((username, password)) = endpoint.credentials {
            options.set_credentials(username, password);
        }
        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity.max(1));
        Ok(Self {
            config,
            client,
            eventloop,
        })
    }

    #[must_use]
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    /// Run the event loop on its own task, feeding `handler`.
    ///
    /// The receiver resolves once the first connection's retained messages
    /// have settled.
    pub fn spawn<H>(self, handler: H) -> (JoinHandle<()>, oneshot::Receiver<()>)
    where
        H: MessageHandler + 'static,
    {
        let (ready, settled) = oneshot::channel();
        let task = tokio::spawn(self.run(handler, ready));
        (task, settled)
    }

    async fn run<H: MessageHandler>(mut self, handler: H, ready: oneshot::Sender<()>) {
        let mut gate = WarmupGate::new(Duration::from_millis(self.config.warmup_ms));
        let mut ready = Some(ready);
        let mut connected = false;
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);

        loop {
            let deadline = gate.deadline();
            tokio::select! {
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        connected = true;
                        tracing::info!(url = %self.config.url, "mqtt connected");
                        self.announce();
                        gate.arm(Instant::now());
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if publish.retain {
                            gate.on_retained(Instant::now());
                        }
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        handler.handle_message(InboundMessage::new(publish.topic, payload, publish.retain));
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        connected = false;
                        tracing::info!(url = %self.config.url, "mqtt closed");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if connected {
                            connected = false;
                            tracing::warn!(%err, url = %self.config.url, "mqtt connection lost");
                        } else {
                            tracing::error!(%err, url = %self.config.url, "mqtt error");
                        }
                        tokio::time::sleep(reconnect_delay).await;
                    }
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if gate.try_open(Instant::now()) {
                        tracing::debug!("retained messages settled");
                        if let Some(ready) = ready.take() {
                            if ready.send(()).is_err() {
                                tracing::debug!("warm-up receiver dropped, nobody waits for scripts");
                            }
                        }
                    }
                }
            }
        }
    }

    fn announce(&self) {
        let topic = self.config.connected_topic();
        if let Err(err) =
            self.client
                .try_publish(topic, rumqttc::QoS::AtMostOnce, true, LIVENESS_STARTING)
        {
            tracing::warn!(%err, "failed to publish liveness");
        }
        tracing::debug!("mqtt subscribe #");
        if let Err(err) = self
            .client
            .try_subscribe(SUBSCRIBE_ALL, rumqttc::QoS::AtMostOnce)
        {
            tracing::warn!(%err, "failed to subscribe");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str) -> OutboundMessage {
        OutboundMessage {
            topic: topic.to_string(),
            payload: "1".to_string(),
            retain: false,
            qos: QoS::AtMostOnce,
        }
    }

    #[test]
    fn should_map_qos_levels() {
        assert_eq!(to_rumqttc(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(to_rumqttc(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(to_rumqttc(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[test]
    fn should_reject_invalid_url() {
        let config = MqttConfig {
            url: "ftp://broker".to_string(),
            ..MqttConfig::default()
        };
        assert!(matches!(
            MqttBus::new(config),
            Err(MqttError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn should_queue_publish_until_request_channel_is_full() {
        let config = MqttConfig {
            channel_capacity: 1,
            ..MqttConfig::default()
        };
        let bus = MqttBus::new(config).unwrap();
        let publisher = bus.publisher();
        assert!(publisher.publish(message("a")).is_ok());
        assert!(matches!(
            publisher.publish(message("b")),
            Err(PublishError::Rejected(_))
        ));
    }
}
