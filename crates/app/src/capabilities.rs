//! The capability surface a unit programs against.
//!
//! One [`Capabilities`] value is built per unit. Every registration it makes
//! is owned by that unit's failure domain, so a fault in a callback is
//! logged against the unit that registered it.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use busscripts_domain::error::ArgumentError;
use busscripts_domain::id::UnitId;
use busscripts_domain::solar::SolarEvent;
use busscripts_domain::state::Decoded;
use busscripts_domain::time::{now, to_millis};
use busscripts_domain::trigger::Trigger;
use serde_json::Value;

use crate::error::CapabilityError;
use crate::ports::QoS;
use crate::registry::SharedRegistry;
use crate::router::{Callback, Delivery, PatternSource, SubscribeOptions};
use crate::runtime::Runtime;
use crate::scheduler::{Job, ScheduleOptions};
use crate::sun_scheduler::check_shift;
use crate::supervisor::{FailureDomain, Fault};

/// Severity of a unit's log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A trigger as given by unit code.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    /// Cron expression, RFC 3339 instant or solar event name.
    Text(String),
    /// Absolute instant in milliseconds since the epoch.
    Millis(i64),
    /// Structured recurrence rule.
    Recurrence(Value),
}

/// Options of `publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub retain: bool,
    pub qos: QoS,
}

enum Planned {
    Clock(Trigger),
    Solar(SolarEvent),
}

/// Capability surface bound to one unit.
#[derive(Clone)]
pub struct Capabilities {
    runtime: Arc<Runtime>,
    domain: FailureDomain,
}

impl Capabilities {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>, domain: FailureDomain) -> Self {
        Self { runtime, domain }
    }

    #[must_use]
    pub fn unit(&self) -> &UnitId {
        self.domain.unit()
    }

    #[must_use]
    pub fn domain(&self) -> &FailureDomain {
        &self.domain
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SharedRegistry> {
        self.runtime.registry()
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        let unit = self.unit();
        match level {
            LogLevel::Debug => tracing::debug!(%unit, "{message}"),
            LogLevel::Info => tracing::info!(%unit, "{message}"),
            LogLevel::Warn => tracing::warn!(%unit, "{message}"),
            LogLevel::Error => tracing::error!(%unit, "{message}"),
        }
    }

    /// # Errors
    ///
    /// See [`Router::subscribe`](crate::router::Router::subscribe).
    pub fn subscribe(
        &self,
        patterns: &[PatternSource],
        options: SubscribeOptions,
        callback: Callback,
    ) -> Result<usize, CapabilityError> {
        self.runtime
            .router()
            .subscribe(patterns, options, callback, &self.domain)
    }

    /// Schedule `job` on every trigger. Solar event names are handed to the
    /// sun scheduler, everything else to the clock scheduler. Nothing is
    /// armed unless every trigger is valid.
    ///
    /// # Errors
    ///
    /// - [`ArgumentError::MissingTrigger`] for an empty list.
    /// - A configuration error for a malformed trigger or shift.
    pub fn schedule(
        &self,
        triggers: &[TriggerSpec],
        options: ScheduleOptions,
        job: Job,
    ) -> Result<usize, CapabilityError> {
        if triggers.is_empty() {
            return Err(ArgumentError::MissingTrigger.into());
        }
        let planned = triggers
            .iter()
            .map(|spec| match spec {
                TriggerSpec::Text(text) => match SolarEvent::from_str(text) {
                    Ok(event) => Ok(Planned::Solar(event)),
                    Err(_) => Trigger::parse(text).map(Planned::Clock),
                },
                TriggerSpec::Millis(ms) => Trigger::at_millis(*ms).map(Planned::Clock),
                TriggerSpec::Recurrence(rule) => Trigger::recurrence(rule).map(Planned::Clock),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if planned.iter().any(|plan| matches!(plan, Planned::Solar(_))) {
            check_shift(options.shift)?;
        }

        let count = planned.len();
        for plan in planned {
            match plan {
                Planned::Clock(trigger) => {
                    self.runtime
                        .scheduler()
                        .schedule(trigger, options, Arc::clone(&job), &self.domain);
                }
                Planned::Solar(event) => {
                    self.runtime
                        .sun()
                        .register(event, options, Arc::clone(&job), &self.domain)?;
                }
            }
        }
        Ok(count)
    }

    /// Bind `job` to each named solar event.
    ///
    /// # Errors
    ///
    /// - [`ArgumentError::MissingTrigger`] for an empty list.
    /// - A configuration error for an unknown event or out-of-range shift.
    pub fn sun_schedule(
        &self,
        events: &[String],
        options: ScheduleOptions,
        job: Job,
    ) -> Result<usize, CapabilityError> {
        if events.is_empty() {
            return Err(ArgumentError::MissingTrigger.into());
        }
        let parsed = events
            .iter()
            .map(|name| name.parse::<SolarEvent>())
            .collect::<Result<Vec<_>, _>>()?;
        check_shift(options.shift)?;
        for event in &parsed {
            self.runtime
                .sun()
                .register(*event, options, Arc::clone(&job), &self.domain)?;
        }
        Ok(parsed.len())
    }

    /// # Errors
    ///
    /// [`ArgumentError::MissingTopic`] for an empty list, or the bus error.
    pub fn publish(
        &self,
        topics: &[String],
        payload: &Value,
        options: PublishOptions,
    ) -> Result<(), CapabilityError> {
        if topics.is_empty() {
            return Err(ArgumentError::MissingTopic.into());
        }
        for topic in topics {
            self.runtime
                .publish(topic, payload, options.retain, options.qos)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// [`ArgumentError::MissingTopic`] for an empty list, or the bus error.
    pub fn set_value(&self, topics: &[String], value: &Value, force: bool) -> Result<(), CapabilityError> {
        if topics.is_empty() {
            return Err(ArgumentError::MissingTopic.into());
        }
        for topic in topics {
            self.runtime.set_value(topic, value.clone(), force)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_value(&self, topic: &str) -> Option<Value> {
        self.runtime.get_value(topic)
    }

    #[must_use]
    pub fn get_prop(&self, topic: &str, path: &[&str]) -> Option<Value> {
        self.runtime.get_prop(topic, path)
    }

    /// Mirror every change of `sources` onto `targets`, with `value` in
    /// place of the source value when given.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub fn link(
        &self,
        sources: &[PatternSource],
        targets: Vec<String>,
        value: Option<Value>,
    ) -> Result<usize, CapabilityError> {
        if targets.is_empty() {
            return Err(ArgumentError::MissingTopic.into());
        }
        let this = self.clone();
        let callback: Callback = Arc::new(move |delivery: &Delivery| -> Result<(), Fault> {
            let value = value.clone().unwrap_or_else(|| delivery.value().clone());
            tracing::debug!(unit = %this.unit(), source = %delivery.topic, "link");
            this.set_value(&targets, &value, false).map_err(Fault::from)
        });
        self.subscribe(sources, SubscribeOptions::default(), callback)
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        to_millis(now())
    }

    #[must_use]
    pub fn age(&self, topic: &str) -> Option<i64> {
        self.runtime.age(topic)
    }

    /// Run `f` once after `delay`. Cannot be cancelled.
    pub fn set_timeout<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() -> Result<(), Fault> + Send + 'static,
    {
        self.domain.spawn_after("timeout", delay, f);
    }

    /// Keep `target` at 1 while any of `sources` is truthy, 0 otherwise.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub fn combine_bool(&self, sources: &[String], target: String) -> Result<usize, CapabilityError> {
        self.combine(sources, target, |values| {
            Value::from(u8::from(values.iter().any(truthy)))
        })
    }

    /// Keep `target` at the largest numeric value of `sources`, never below 0.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub fn combine_max(&self, sources: &[String], target: String) -> Result<usize, CapabilityError> {
        self.combine(sources, target, |values| {
            let max = values
                .iter()
                .filter_map(Value::as_f64)
                .fold(0.0_f64, f64::max);
            Decoded::from_value(Value::from(max)).value
        })
    }

    /// Retriggerable on-delay: a truthy source sets `target` to 1; `target`
    /// drops back to 0 once no source has been truthy for `delay`.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub fn timer(&self, sources: &[String], target: String, delay: Duration) -> Result<usize, CapabilityError> {
        let patterns = topic_patterns(sources);
        let generation = Arc::new(AtomicU64::new(0));
        let target = Arc::new(target);

        let count = {
            let this = self.clone();
            let generation = Arc::clone(&generation);
            let target = Arc::clone(&target);
            let callback: Callback = Arc::new(move |delivery: &Delivery| -> Result<(), Fault> {
                if !truthy(delivery.value()) {
                    return Ok(());
                }
                if !this.get_value(&target).as_ref().is_some_and(truthy) {
                    this.runtime.set_value(&target, Value::from(1), false)?;
                }
                this.arm_release(&generation, &target, delay);
                Ok(())
            });
            let options = SubscribeOptions {
                replay_retained: false,
                ..SubscribeOptions::default()
            };
            self.subscribe(&patterns, options, callback)?
        };
        self.arm_release(&generation, &target, delay);
        Ok(count)
    }

    fn arm_release(&self, generation: &Arc<AtomicU64>, target: &Arc<String>, delay: Duration) {
        let armed = generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();
        let generation = Arc::clone(generation);
        let target = Arc::clone(target);
        self.set_timeout(delay, move || {
            if generation.load(Ordering::SeqCst) != armed {
                return Ok(());
            }
            if this.get_value(&target).as_ref().is_some_and(truthy) {
                this.runtime.set_value(&target, Value::from(0), false)?;
            }
            Ok(())
        });
    }

    fn combine<F>(&self, sources: &[String], target: String, merge: F) -> Result<usize, CapabilityError>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let patterns = topic_patterns(sources);
        let sources = sources.to_vec();
        let this = self.clone();
        let update = move || -> Result<(), CapabilityError> {
            let values: Vec<Value> = sources
                .iter()
                .map(|source| this.get_value(source).unwrap_or(Value::Null))
                .collect();
            this.runtime.set_value(&target, merge(&values), false)
        };
        update()?;
        let callback: Callback =
            Arc::new(move |_: &Delivery| -> Result<(), Fault> { update().map_err(Fault::from) });
        let options = SubscribeOptions {
            replay_retained: true,
            ..SubscribeOptions::default()
        };
        self.subscribe(&patterns, options, callback)
    }
}

fn topic_patterns(topics: &[String]) -> Vec<PatternSource> {
    topics.iter().cloned().map(PatternSource::Topic).collect()
}

/// Truthiness of a value as unit code sees it.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{BusPublisher, InboundMessage};
    use crate::runtime::RuntimeSettings;
    use crate::testing::RecordingPublisher;
    use serde_json::json;
    use std::sync::Mutex;

    fn capabilities() -> (Arc<RecordingPublisher>, Arc<Runtime>, Capabilities) {
        let publisher = Arc::new(RecordingPublisher::default());
        let runtime = Arc::new(Runtime::new(
            RuntimeSettings::default(),
            Arc::clone(&publisher) as Arc<dyn BusPublisher>,
        ));
        let caps = Capabilities::new(
            Arc::clone(&runtime),
            FailureDomain::new(UnitId::new("unit.rhai")),
        );
        (publisher, runtime, caps)
    }

    fn topics(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_string()).collect()
    }

    fn noop_job() -> Job {
        Arc::new(|| -> Result<(), Fault> { Ok(()) })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // ── Registration errors ──

    #[tokio::test]
    async fn should_reject_empty_trigger_list() {
        let (_, _, caps) = capabilities();
        let err = caps
            .schedule(&[], ScheduleOptions::default(), noop_job())
            .unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Argument(ArgumentError::MissingTrigger)
        ));
    }

    #[tokio::test]
    async fn should_reject_malformed_trigger_without_arming_others() {
        let (_, runtime, caps) = capabilities();
        let triggers = [
            TriggerSpec::Text("*/5 * * * *".to_string()),
            TriggerSpec::Text("not a trigger".to_string()),
        ];
        let err = caps
            .schedule(&triggers, ScheduleOptions::default(), noop_job())
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Configuration(_)));
        assert!(runtime.scheduler().is_empty());
    }

    #[tokio::test]
    async fn should_route_solar_names_to_sun_scheduler() {
        let (_, runtime, caps) = capabilities();
        let triggers = [
            TriggerSpec::Text("sunset".to_string()),
            TriggerSpec::Text("0 7 * * *".to_string()),
        ];
        assert_eq!(
            caps.schedule(&triggers, ScheduleOptions::default(), noop_job())
                .unwrap(),
            2
        );
        assert_eq!(runtime.sun().len(), 1);
        assert_eq!(runtime.scheduler().len(), 1);
    }

    #[tokio::test]
    async fn should_reject_unknown_solar_event() {
        let (_, runtime, caps) = capabilities();
        let err = caps
            .sun_schedule(&topics(&["sunrise", "moonrise"]), ScheduleOptions::default(), noop_job())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ConfigurationError: unknown solar event \"moonrise\""
        );
        assert!(runtime.sun().is_empty());
    }

    #[tokio::test]
    async fn should_reject_publish_without_topic() {
        let (_, _, caps) = capabilities();
        let err = caps
            .publish(&[], &json!(1), PublishOptions::default())
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Argument(_)));
    }

    // ── Composition ──

    #[tokio::test]
    async fn should_link_source_to_target_set_topic() {
        let (publisher, runtime, caps) = capabilities();
        caps.link(
            &[PatternSource::Topic("a//src".to_string())],
            topics(&["a//target"]),
            None,
        )
        .unwrap();

        runtime.handle(InboundMessage::new("a/status/src", "hi", false));
        settle().await;
        let sent = publisher.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "a/set/target");
        assert_eq!(sent[0].payload, "hi");
    }

    #[tokio::test]
    async fn should_link_with_fixed_value() {
        let (publisher, runtime, caps) = capabilities();
        caps.link(
            &[PatternSource::Topic("a//button".to_string())],
            topics(&["a//lamp", "b//lamp"]),
            Some(json!(true)),
        )
        .unwrap();
        runtime.handle(InboundMessage::new("a/status/button", "pressed", false));
        settle().await;
        let sent = publisher.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.payload == "true"));
    }

    #[tokio::test]
    async fn should_combine_bool_across_sources() {
        let (_, runtime, caps) = capabilities();
        caps.combine_bool(&topics(&["$a", "$b"]), "$any".to_string())
            .unwrap();
        assert_eq!(runtime.get_value("$any"), Some(json!(0)));

        runtime.set_value("$b", json!(true), false).unwrap();
        settle().await;
        assert_eq!(runtime.get_value("$any"), Some(json!(1)));

        runtime.set_value("$b", json!(false), false).unwrap();
        settle().await;
        assert_eq!(runtime.get_value("$any"), Some(json!(0)));
    }

    #[tokio::test]
    async fn should_combine_max_across_sources() {
        let (_, runtime, caps) = capabilities();
        runtime.set_value("$a", json!(3), false).unwrap();
        caps.combine_max(&topics(&["$a", "$b"]), "$max".to_string())
            .unwrap();
        assert_eq!(runtime.get_value("$max"), Some(json!(3)));

        runtime.set_value("$b", json!(7.5), false).unwrap();
        settle().await;
        assert_eq!(runtime.get_value("$max"), Some(json!(7.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_hold_timer_target_until_delay_after_last_trigger() {
        let (_, runtime, caps) = capabilities();
        caps.timer(&topics(&["$motion"]), "$light".to_string(), Duration::from_secs(10))
            .unwrap();

        runtime.set_value("$motion", json!(true), false).unwrap();
        settle().await;
        assert_eq!(runtime.get_value("$light"), Some(json!(1)));

        tokio::time::sleep(Duration::from_secs(6)).await;
        runtime.set_value("$motion", json!(false), false).unwrap();
        runtime.set_value("$motion", json!(true), false).unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(runtime.get_value("$light"), Some(json!(1)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runtime.get_value("$light"), Some(json!(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_run_timeout_once() {
        let (_, _, caps) = capabilities();
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        caps.set_timeout(Duration::from_millis(500), move || {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn should_attribute_callback_faults_to_owning_unit() {
        let (_, runtime, caps) = capabilities();
        let failing: Callback = Arc::new(|_: &Delivery| -> Result<(), Fault> {
            Err(Fault::new("callback failed"))
        });
        caps.subscribe(
            &[PatternSource::Topic("t".to_string())],
            SubscribeOptions::default(),
            failing,
        )
        .unwrap();
        runtime.handle(InboundMessage::new("t", "1", false));
        settle().await;
        assert_eq!(caps.domain().fault_count(), 1);
    }

    #[test]
    fn should_follow_script_truthiness() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(false)));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!(0.1)));
        assert!(truthy(&json!([])));
    }
}
