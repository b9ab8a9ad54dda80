//! Router: subscriptions and the dispatch policy applied to each match.
//!
//! Subscriptions are never removed. Dispatch walks them in registration
//! order on a snapshot of the list, so callbacks may subscribe again without
//! deadlocking or changing the current iteration.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use busscripts_domain::error::ArgumentError;
use busscripts_domain::pattern::TopicPattern;
use busscripts_domain::state::StateRecord;
use busscripts_domain::topic::TopicCodec;
use serde_json::Value;

use crate::error::CapabilityError;
use crate::supervisor::{FailureDomain, Fault};

/// Invoked for every delivery that passes the subscription's policy.
pub type Callback = Arc<dyn Fn(&Delivery) -> Result<(), Fault> + Send + Sync>;

/// A subscription condition. A fault counts as `false`.
pub type Predicate = Arc<dyn Fn(&Delivery) -> Result<bool, Fault> + Send + Sync>;

/// Per-subscription delivery policy.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Fixed delay in seconds; negative values are clamped to zero.
    pub shift: f64,
    /// Upper bound in seconds of an additional random delay.
    pub jitter: f64,
    /// Skip deliveries whose value equals the previous one.
    pub change_only: bool,
    /// Also deliver retained messages.
    pub replay_retained: bool,
    pub condition: Option<Predicate>,
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("shift", &self.shift)
            .field("jitter", &self.jitter)
            .field("change_only", &self.change_only)
            .field("replay_retained", &self.replay_retained)
            .field("condition", &self.condition.is_some())
            .finish()
    }
}

/// What a callback receives.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Topic in display form (`root//path` for status topics).
    pub topic: String,
    /// Canonical topic the record is stored under.
    pub canonical: String,
    pub record: StateRecord,
    /// Absent on first sight of the topic.
    pub previous: Option<StateRecord>,
    /// The message was a retained replay.
    pub retained: bool,
}

impl Delivery {
    #[must_use]
    pub fn new(
        canonical: impl Into<String>,
        record: StateRecord,
        previous: Option<StateRecord>,
        retained: bool,
    ) -> Self {
        let canonical = canonical.into();
        Self {
            topic: TopicCodec::display_topic(&canonical),
            canonical,
            record,
            previous,
            retained,
        }
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.record.value
    }

    fn unchanged(&self) -> bool {
        self.previous
            .as_ref()
            .is_some_and(|prev| prev.value == self.record.value)
    }
}

/// A pattern as given by unit code, before compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSource {
    /// Topic string, possibly with aliases and wildcards.
    Topic(String),
    /// Regular expression matched against the canonical topic.
    Regex(String),
}

struct Subscription {
    pattern: TopicPattern,
    options: SubscribeOptions,
    callback: Callback,
    owner: FailureDomain,
}

/// Holds subscriptions and dispatches state changes to them.
pub struct Router {
    codec: TopicCodec,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
}

impl Router {
    #[must_use]
    pub fn new(codec: TopicCodec) -> Self {
        Self {
            codec,
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Register one subscription per pattern, all sharing `callback`.
    ///
    /// Either every pattern is registered or none is.
    ///
    /// # Errors
    ///
    /// - [`ArgumentError::MissingTopic`] for an empty list or empty topic.
    /// - A configuration error for an invalid wildcard or regex.
    pub fn subscribe(
        &self,
        patterns: &[PatternSource],
        options: SubscribeOptions,
        callback: Callback,
        owner: &FailureDomain,
    ) -> Result<usize, CapabilityError> {
        if patterns.is_empty() {
            return Err(ArgumentError::MissingTopic.into());
        }
        let compiled = patterns
            .iter()
            .map(|source| self.compile(source))
            .collect::<Result<Vec<_>, _>>()?;

        let count = compiled.len();
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for pattern in compiled {
            tracing::debug!(unit = %owner.unit(), %pattern, "subscribed");
            subscriptions.push(Arc::new(Subscription {
                pattern,
                options: options.clone(),
                callback: Arc::clone(&callback),
                owner: owner.clone(),
            }));
        }
        Ok(count)
    }

    /// Apply every matching subscription's policy to `delivery` and schedule
    /// the callbacks that pass. Returns how many were scheduled.
    ///
    /// Callbacks always run on their own task inside their owner's failure
    /// domain, never on the caller's stack.
    pub fn dispatch(&self, delivery: Delivery) -> usize {
        let snapshot: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let delivery = Arc::new(delivery);

        let mut scheduled = 0;
        for subscription in snapshot {
            if !subscription.pattern.matches(&delivery.canonical) {
                continue;
            }
            let options = &subscription.options;
            if delivery.retained && !options.replay_retained {
                continue;
            }
            if options.change_only && delivery.unchanged() {
                continue;
            }
            if let Some(condition) = &options.condition {
                let passed = subscription
                    .owner
                    .evaluate("condition", || condition(&delivery));
                if passed != Some(true) {
                    continue;
                }
            }

            let delay = delivery_delay(options.shift, options.jitter, rand::random::<f64>());
            let callback = Arc::clone(&subscription.callback);
            let payload = Arc::clone(&delivery);
            subscription
                .owner
                .spawn_after("subscription", delay, move || callback(&payload));
            scheduled += 1;
        }
        scheduled
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn compile(&self, source: &PatternSource) -> Result<TopicPattern, CapabilityError> {
        match source {
            PatternSource::Topic(topic) if topic.is_empty() => {
                Err(ArgumentError::MissingTopic.into())
            }
            PatternSource::Topic(topic) => {
                Ok(TopicPattern::parse(&self.codec.status_topic(topic))?)
            }
            PatternSource::Regex(expression) => Ok(TopicPattern::regex(expression)?),
        }
    }
}

/// `floor(shift * 1000 + jitter * 1000 * sample)` milliseconds, where
/// `sample` is drawn from `[0, 1)`. Negative results become zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn delivery_delay(shift: f64, jitter: f64, sample: f64) -> Duration {
    let millis = (shift * 1000.0 + jitter.max(0.0) * 1000.0 * sample).floor();
    if millis.is_finite() && millis > 0.0 {
        Duration::from_millis(millis as u64)
    } else {
        Duration::ZERO
    }
}
