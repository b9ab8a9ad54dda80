//! Moving values and arguments between Rhai and the capability surface.

use busscripts_app::capabilities::{PublishOptions, TriggerSpec};
use busscripts_app::ports::QoS;
use busscripts_app::router::{Delivery, PatternSource};
use busscripts_app::scheduler::ScheduleOptions;
use busscripts_domain::error::ArgumentError;
use rhai::{Dynamic, FnPtr, Map};
use serde_json::Value;

use crate::error::RhaiError;

/// A regular-expression topic matcher, created in scripts with `regex(…)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRegex(pub String);

/// JSON value to script value.
///
/// # Errors
///
/// Returns [`RhaiError::Conversion`] when the value cannot be represented.
pub fn to_script(value: &Value) -> Result<Dynamic, RhaiError> {
    rhai::serde::to_dynamic(value).map_err(|err| RhaiError::Conversion(err.to_string()))
}

/// Script value to JSON value. Unit becomes `null`.
///
/// # Errors
///
/// Returns [`RhaiError::Conversion`] for values without a JSON form, such as
/// function pointers.
pub fn from_script(value: &Dynamic) -> Result<Value, RhaiError> {
    rhai::serde::from_dynamic(value).map_err(|err| RhaiError::Conversion(err.to_string()))
}

pub(crate) fn optional(value: Option<Value>) -> Result<Dynamic, RhaiError> {
    value.map_or(Ok(Dynamic::UNIT), |value| to_script(&value))
}

/// `(topic, value, record, previous, meta)` as a subscription callback
/// receives them.
pub(crate) fn delivery_args(delivery: &Delivery) -> Result<Vec<Dynamic>, RhaiError> {
    let mut meta = Map::new();
    meta.insert("retain".into(), Dynamic::from(delivery.retained));
    Ok(vec![
        Dynamic::from(delivery.topic.clone()),
        to_script(delivery.value())?,
        to_script(&delivery.record.to_json())?,
        optional(delivery.previous.as_ref().map(|previous| previous.to_json()))?,
        Dynamic::from_map(meta),
    ])
}

fn mismatch(argument: &'static str, expected: &'static str) -> ArgumentError {
    ArgumentError::TypeMismatch { argument, expected }
}

/// A topic or a list of topics.
pub(crate) fn topics(arg: &Dynamic) -> Result<Vec<String>, ArgumentError> {
    if arg.is_unit() {
        return Err(ArgumentError::MissingTopic);
    }
    let items = if arg.is_array() {
        arg.clone()
            .into_array()
            .map_err(|_| mismatch("topic", "a string or an array of strings"))?
    } else {
        vec![arg.clone()]
    };
    items
        .into_iter()
        .map(|item| {
            let topic = item
                .into_string()
                .map_err(|_| mismatch("topic", "a string or an array of strings"))?;
            if topic.is_empty() {
                Err(ArgumentError::MissingTopic)
            } else {
                Ok(topic)
            }
        })
        .collect()
}

/// Like [`topics`], but entries may also be [`TopicRegex`] matchers.
pub(crate) fn patterns(arg: &Dynamic) -> Result<Vec<PatternSource>, ArgumentError> {
    if arg.is_unit() {
        return Err(ArgumentError::MissingTopic);
    }
    let items = if arg.is_array() {
        arg.clone()
            .into_array()
            .map_err(|_| mismatch("topic", "a string, a regex or an array of them"))?
    } else {
        vec![arg.clone()]
    };
    items
        .into_iter()
        .map(|item| {
            if let Some(TopicRegex(expr)) = item.clone().try_cast::<TopicRegex>() {
                return Ok(PatternSource::Regex(expr));
            }
            item.into_string()
                .map(PatternSource::Topic)
                .map_err(|_| mismatch("topic", "a string, a regex or an array of them"))
        })
        .collect()
}

/// A trigger or a list of triggers.
pub(crate) fn triggers(arg: &Dynamic) -> Result<Vec<TriggerSpec>, ArgumentError> {
    if arg.is_unit() {
        return Err(ArgumentError::MissingTrigger);
    }
    if arg.is_array() {
        let items = arg
            .clone()
            .into_array()
            .map_err(|_| mismatch("trigger", "a string, a number or a map"))?;
        return items.iter().map(trigger).collect();
    }
    trigger(arg).map(|spec| vec![spec])
}

fn trigger(item: &Dynamic) -> Result<TriggerSpec, ArgumentError> {
    let invalid = || mismatch("trigger", "a string, a number or a map");
    if let Ok(ms) = item.as_int() {
        return Ok(TriggerSpec::Millis(ms));
    }
    if item.is_map() {
        return from_script(item)
            .map(TriggerSpec::Recurrence)
            .map_err(|_| invalid());
    }
    item.clone()
        .into_string()
        .map(TriggerSpec::Text)
        .map_err(|_| invalid())
}

pub(crate) fn callable(arg: &Dynamic) -> Result<FnPtr, ArgumentError> {
    arg.clone()
        .try_cast::<FnPtr>()
        .ok_or(ArgumentError::NotCallable)
}

pub(crate) fn options_map(arg: &Dynamic) -> Result<Map, ArgumentError> {
    if arg.is_unit() {
        return Ok(Map::new());
    }
    arg.clone()
        .try_cast::<Map>()
        .ok_or_else(|| mismatch("options", "a map"))
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn number(value: &Dynamic, argument: &'static str) -> Result<f64, ArgumentError> {
    if let Ok(int) = value.as_int() {
        return Ok(int as f64);
    }
    value.as_float().map_err(|_| mismatch(argument, "a number"))
}

fn flag(value: &Dynamic, argument: &'static str) -> Result<bool, ArgumentError> {
    value.as_bool().map_err(|_| mismatch(argument, "a boolean"))
}

fn number_entry(map: &Map, key: &'static str) -> Result<f64, ArgumentError> {
    map.get(key).map_or(Ok(0.0), |value| number(value, key))
}

fn flag_entry(map: &Map, key: &'static str) -> Result<bool, ArgumentError> {
    map.get(key).map_or(Ok(false), |value| flag(value, key))
}

/// `#{shift, random}`.
pub(crate) fn schedule_options(map: &Map) -> Result<ScheduleOptions, ArgumentError> {
    Ok(ScheduleOptions {
        shift: number_entry(map, "shift")?,
        jitter: number_entry(map, "random")?,
    })
}

/// `#{retain, qos}`.
pub(crate) fn publish_options(map: &Map) -> Result<PublishOptions, ArgumentError> {
    let qos = match map.get("qos") {
        None => QoS::default(),
        Some(level) => level
            .as_int()
            .ok()
            .and_then(QoS::from_level)
            .ok_or_else(|| mismatch("qos", "0, 1 or 2"))?,
    };
    Ok(PublishOptions {
        retain: flag_entry(map, "retain")?,
        qos,
    })
}

/// The subscription flags of `#{shift, random, change, retain, condition}`;
/// the condition is read by the caller, which owns the script handle.
pub(crate) struct SubscribeFlags {
    pub shift: f64,
    pub jitter: f64,
    pub change_only: bool,
    pub replay_retained: bool,
    pub condition: Option<FnPtr>,
}

pub(crate) fn subscribe_flags(map: &Map) -> Result<SubscribeFlags, ArgumentError> {
    let condition = match map.get("condition") {
        None => None,
        Some(value) if value.is_unit() => None,
        Some(value) => Some(
            value
                .clone()
                .try_cast::<FnPtr>()
                .ok_or_else(|| mismatch("condition", "a function"))?,
        ),
    };
    Ok(SubscribeFlags {
        shift: number_entry(map, "shift")?,
        jitter: number_entry(map, "random")?,
        change_only: flag_entry(map, "change")?,
        replay_retained: flag_entry(map, "retain")?,
        condition,
    })
}

/// Render all arguments of a log call as one line.
pub(crate) fn log_line(parts: &[Dynamic]) -> String {
    parts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
