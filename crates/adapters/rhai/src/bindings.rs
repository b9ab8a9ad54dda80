//! Registers the capability surface as Rhai functions of one unit's engine.
//!
//! Every function follows the same shape: convert the script arguments,
//! call the matching [`Capabilities`] method, and turn a rejection into a
//! script error raised at the call site.

use std::sync::Arc;
use std::time::Duration;

use busscripts_app::capabilities::{Capabilities, LogLevel, TriggerSpec};
use busscripts_app::error::CapabilityError;
use busscripts_app::registry::SharedRegistry;
use busscripts_app::router::SubscribeOptions;
use busscripts_domain::error::ArgumentError;
use rhai::{Dynamic, Engine, EvalAltResult, INT, ImmutableString, Position};

use crate::convert::{self, TopicRegex, from_script, log_line, optional};
use crate::error::RhaiError;
use crate::handle::{HandleSlot, ScriptHandle};

/// Script-visible names of the capability functions.
pub(crate) const CAPABILITY_NAMES: &[&str] = &[
    "subscribe",
    "schedule",
    "sunSchedule",
    "publish",
    "setValue",
    "getValue",
    "getProp",
    "link",
    "now",
    "age",
    "setTimeout",
    "combineBool",
    "combineMax",
    "timer",
    "regex",
];

/// Scope variable holding the unit's [`UnitLog`].
pub const LOG_VARIABLE: &str = "log";
/// Scope variable holding the [`SharedTable`]. `global` and `shared` are
/// reserved words in Rhai.
pub const REGISTRY_VARIABLE: &str = "registry";

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn reject(err: impl Into<CapabilityError>) -> Box<EvalAltResult> {
    let err: CapabilityError = err.into();
    err.to_string().into()
}

fn millis(ms: INT) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

/// The `log` object: `log.verbose/info/warn/error(…)`, one to three
/// arguments. `debug` is a Rhai keyword, so the debug level is spelled
/// `verbose`; the built-in `debug(…)` statement logs at the same level.
#[derive(Clone)]
pub struct UnitLog {
    caps: Capabilities,
}

impl UnitLog {
    #[must_use]
    pub fn new(caps: Capabilities) -> Self {
        Self { caps }
    }

    fn write(&self, level: LogLevel, parts: &[Dynamic]) {
        self.caps.log(level, &log_line(parts));
    }
}

/// The `registry` object: indexable view of the [`SharedRegistry`].
#[derive(Clone)]
pub struct SharedTable {
    registry: Arc<SharedRegistry>,
}

impl SharedTable {
    #[must_use]
    pub fn new(registry: Arc<SharedRegistry>) -> Self {
        Self { registry }
    }
}

#[derive(Clone)]
struct Binding {
    caps: Capabilities,
    slot: HandleSlot,
}

impl Binding {
    fn script(&self) -> ScriptResult<ScriptHandle> {
        self.slot
            .get()
            .cloned()
            .ok_or_else(|| RhaiError::Detached.into())
    }

    fn subscribe(&self, topics: &Dynamic, options: &Dynamic, callback: &Dynamic) -> ScriptResult<()> {
        let patterns = convert::patterns(topics).map_err(reject)?;
        let callback = convert::callable(callback).map_err(reject)?;
        let flags = convert::options_map(options)
            .and_then(|map| convert::subscribe_flags(&map))
            .map_err(reject)?;
        let script = self.script()?;
        let options = SubscribeOptions {
            shift: flags.shift,
            jitter: flags.jitter,
            change_only: flags.change_only,
            replay_retained: flags.replay_retained,
            condition: flags.condition.map(|f| script.predicate(f)),
        };
        self.caps
            .subscribe(&patterns, options, script.callback(callback))
            .map_err(reject)?;
        Ok(())
    }

    fn schedule(&self, triggers: &Dynamic, options: &Dynamic, callback: &Dynamic) -> ScriptResult<()> {
        let triggers = convert::triggers(triggers).map_err(reject)?;
        let callback = convert::callable(callback).map_err(reject)?;
        let options = convert::options_map(options)
            .and_then(|map| convert::schedule_options(&map))
            .map_err(reject)?;
        let script = self.script()?;
        self.caps
            .schedule(&triggers, options, script.job(callback))
            .map_err(reject)?;
        Ok(())
    }

    fn sun_schedule(&self, events: &Dynamic, options: &Dynamic, callback: &Dynamic) -> ScriptResult<()> {
        let events = convert::triggers(events)
            .and_then(|specs| {
                specs
                    .into_iter()
                    .map(|spec| match spec {
                        TriggerSpec::Text(name) => Ok(name),
                        _ => Err(ArgumentError::TypeMismatch {
                            argument: "event",
                            expected: "a solar event name",
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(reject)?;
        let callback = convert::callable(callback).map_err(reject)?;
        let options = convert::options_map(options)
            .and_then(|map| convert::schedule_options(&map))
            .map_err(reject)?;
        let script = self.script()?;
        self.caps
            .sun_schedule(&events, options, script.job(callback))
            .map_err(reject)?;
        Ok(())
    }

    fn publish(&self, topics: &Dynamic, payload: &Dynamic, options: &Dynamic) -> ScriptResult<()> {
        let topics = convert::topics(topics).map_err(reject)?;
        let options = convert::options_map(options)
            .and_then(|map| convert::publish_options(&map))
            .map_err(reject)?;
        let payload = from_script(payload)?;
        self.caps
            .publish(&topics, &payload, options)
            .map_err(reject)
    }

    fn set_value(&self, topics: &Dynamic, value: &Dynamic, force: bool) -> ScriptResult<()> {
        let topics = convert::topics(topics).map_err(reject)?;
        let value = from_script(value)?;
        self.caps
            .set_value(&topics, &value, force)
            .map_err(reject)
    }

    fn get_value(&self, topic: &str) -> ScriptResult<Dynamic> {
        optional(self.caps.get_value(topic)).map_err(Into::into)
    }

    fn get_prop(&self, topic: &str, path: &[Dynamic]) -> ScriptResult<Dynamic> {
        let segments: Vec<String> = path.iter().map(ToString::to_string).collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        optional(self.caps.get_prop(topic, &segments)).map_err(Into::into)
    }

    fn link(&self, sources: &Dynamic, targets: &Dynamic, value: Option<&Dynamic>) -> ScriptResult<()> {
        let sources = convert::patterns(sources).map_err(reject)?;
        let targets = convert::topics(targets).map_err(reject)?;
        let value = value.map(from_script).transpose()?;
        self.caps.link(&sources, targets, value).map_err(reject)?;
        Ok(())
    }

    fn age(&self, topic: &str) -> Dynamic {
        self.caps.age(topic).map_or(Dynamic::UNIT, Dynamic::from)
    }

    fn set_timeout(&self, callback: &Dynamic, ms: INT) -> ScriptResult<()> {
        let callback = convert::callable(callback).map_err(reject)?;
        let script = self.script()?;
        self.caps
            .set_timeout(millis(ms), move || script.call(&callback, Vec::new()).map(drop));
        Ok(())
    }

    fn combine_bool(&self, sources: &Dynamic, target: &str) -> ScriptResult<()> {
        let sources = convert::topics(sources).map_err(reject)?;
        self.caps
            .combine_bool(&sources, target.to_string())
            .map_err(reject)?;
        Ok(())
    }

    fn combine_max(&self, sources: &Dynamic, target: &str) -> ScriptResult<()> {
        let sources = convert::topics(sources).map_err(reject)?;
        self.caps
            .combine_max(&sources, target.to_string())
            .map_err(reject)?;
        Ok(())
    }

    fn timer(&self, sources: &Dynamic, target: &str, ms: INT) -> ScriptResult<()> {
        let sources = convert::topics(sources).map_err(reject)?;
        self.caps
            .timer(&sources, target.to_string(), millis(ms))
            .map_err(reject)?;
        Ok(())
    }
}

/// Wire `caps` into `engine`. Function pointers passed to the capabilities
/// resolve through `slot`, which the compiler fills once the AST exists.
pub(crate) fn register(engine: &mut Engine, caps: &Capabilities, slot: &HandleSlot) {
    register_output(engine, caps);
    register_shared(engine);
    register_registrations(engine, caps, slot);
    register_queries(engine, caps, slot);
}

fn register_output(engine: &mut Engine, caps: &Capabilities) {
    let printer = caps.clone();
    engine.on_print(move |text: &str| printer.log(LogLevel::Info, text));
    let debugger = caps.clone();
    engine.on_debug(move |text: &str, _source: Option<&str>, _pos: Position| {
        debugger.log(LogLevel::Debug, text);
    });

    engine.register_type_with_name::<UnitLog>("Log");
    for (name, level) in [
        ("verbose", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ] {
        engine.register_fn(name, move |log: &mut UnitLog, a: Dynamic| {
            log.write(level, &[a]);
        });
        engine.register_fn(name, move |log: &mut UnitLog, a: Dynamic, b: Dynamic| {
            log.write(level, &[a, b]);
        });
        engine.register_fn(
            name,
            move |log: &mut UnitLog, a: Dynamic, b: Dynamic, c: Dynamic| {
                log.write(level, &[a, b, c]);
            },
        );
    }
}

fn register_shared(engine: &mut Engine) {
    engine
        .register_type_with_name::<SharedTable>("Registry")
        .register_indexer_get(
            |table: &mut SharedTable, key: ImmutableString| -> ScriptResult<Dynamic> {
                optional(table.registry.get(&key)).map_err(Into::into)
            },
        )
        .register_indexer_set(
            |table: &mut SharedTable, key: ImmutableString, value: Dynamic| -> ScriptResult<()> {
                table.registry.set(key.to_string(), from_script(&value)?);
                Ok(())
            },
        )
        .register_fn("contains", |table: &mut SharedTable, key: &str| {
            table.registry.contains(key)
        })
        .register_fn(
            "remove",
            |table: &mut SharedTable, key: &str| -> ScriptResult<Dynamic> {
                optional(table.registry.remove(key)).map_err(Into::into)
            },
        );
}

fn register_registrations(engine: &mut Engine, caps: &Capabilities, slot: &HandleSlot) {
    let binding = Binding {
        caps: caps.clone(),
        slot: Arc::clone(slot),
    };

    engine.register_type_with_name::<TopicRegex>("Regex");
    engine.register_fn("regex", |expr: &str| TopicRegex(expr.to_string()));

    for name in ["subscribe", "schedule", "sunSchedule"] {
        engine.register_fn(name, |_: Dynamic| -> ScriptResult<()> {
            Err(reject(ArgumentError::NotCallable))
        });
        engine.register_fn(
            name,
            |_: Dynamic, _: Dynamic, _: Dynamic, _: Dynamic| -> ScriptResult<()> {
                Err(reject(ArgumentError::WrongArity))
            },
        );
    }

    let b = binding.clone();
    engine.register_fn("subscribe", move |topics: Dynamic, callback: Dynamic| {
        b.subscribe(&topics, &Dynamic::UNIT, &callback)
    });
    let b = binding.clone();
    engine.register_fn(
        "subscribe",
        move |topics: Dynamic, options: Dynamic, callback: Dynamic| {
            b.subscribe(&topics, &options, &callback)
        },
    );

    let b = binding.clone();
    engine.register_fn("schedule", move |triggers: Dynamic, callback: Dynamic| {
        b.schedule(&triggers, &Dynamic::UNIT, &callback)
    });
    let b = binding.clone();
    engine.register_fn(
        "schedule",
        move |triggers: Dynamic, options: Dynamic, callback: Dynamic| {
            b.schedule(&triggers, &options, &callback)
        },
    );

    let b = binding.clone();
    engine.register_fn("sunSchedule", move |events: Dynamic, callback: Dynamic| {
        b.sun_schedule(&events, &Dynamic::UNIT, &callback)
    });
    let b = binding.clone();
    engine.register_fn(
        "sunSchedule",
        move |events: Dynamic, options: Dynamic, callback: Dynamic| {
            b.sun_schedule(&events, &options, &callback)
        },
    );

    let b = binding.clone();
    engine.register_fn("link", move |sources: Dynamic, targets: Dynamic| {
        b.link(&sources, &targets, None)
    });
    let b = binding.clone();
    engine.register_fn(
        "link",
        move |sources: Dynamic, targets: Dynamic, value: Dynamic| {
            b.link(&sources, &targets, Some(&value))
        },
    );

    let b = binding.clone();
    engine.register_fn("setTimeout", move |callback: Dynamic, ms: INT| {
        b.set_timeout(&callback, ms)
    });

    let b = binding.clone();
    engine.register_fn("combineBool", move |sources: Dynamic, target: &str| {
        b.combine_bool(&sources, target)
    });
    let b = binding.clone();
    engine.register_fn("combineMax", move |sources: Dynamic, target: &str| {
        b.combine_max(&sources, target)
    });
    let b = binding;
    engine.register_fn(
        "timer",
        move |sources: Dynamic, target: &str, ms: INT| b.timer(&sources, target, ms),
    );
}

fn register_queries(engine: &mut Engine, caps: &Capabilities, slot: &HandleSlot) {
    let binding = Binding {
        caps: caps.clone(),
        slot: Arc::clone(slot),
    };

    let b = binding.clone();
    engine.register_fn("publish", move |topics: Dynamic, payload: Dynamic| {
        b.publish(&topics, &payload, &Dynamic::UNIT)
    });
    let b = binding.clone();
    engine.register_fn(
        "publish",
        move |topics: Dynamic, payload: Dynamic, options: Dynamic| {
            b.publish(&topics, &payload, &options)
        },
    );

    let b = binding.clone();
    engine.register_fn("setValue", move |topics: Dynamic, value: Dynamic| {
        b.set_value(&topics, &value, false)
    });
    let b = binding.clone();
    engine.register_fn(
        "setValue",
        move |topics: Dynamic, value: Dynamic, force: bool| b.set_value(&topics, &value, force),
    );

    let b = binding.clone();
    engine.register_fn("getValue", move |topic: &str| b.get_value(topic));

    let b = binding.clone();
    engine.register_fn("getProp", move |topic: &str| b.get_prop(topic, &[]));
    let b = binding.clone();
    engine.register_fn("getProp", move |topic: &str, a: Dynamic| {
        b.get_prop(topic, &[a])
    });
    let b = binding.clone();
    engine.register_fn("getProp", move |topic: &str, a: Dynamic, c: Dynamic| {
        b.get_prop(topic, &[a, c])
    });
    let b = binding.clone();
    engine.register_fn(
        "getProp",
        move |topic: &str, a: Dynamic, c: Dynamic, d: Dynamic| b.get_prop(topic, &[a, c, d]),
    );

    let b = binding.clone();
    engine.register_fn("age", move |topic: &str| b.age(topic));
    let b = binding;
    engine.register_fn("now", move || b.caps.now_millis());
}
