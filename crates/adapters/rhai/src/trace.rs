//! Turning a Rhai evaluation error into a [`Fault`] with a trimmed trace.

use busscripts_app::supervisor::Fault;
use rhai::{EvalAltResult, Position};

use crate::bindings::CAPABILITY_NAMES;

const ANONYMOUS_PREFIX: &str = "anon$";

fn is_host_frame(name: &str) -> bool {
    CAPABILITY_NAMES.contains(&name)
}

fn frame(name: &str, source: &str, pos: Position) -> String {
    let name = if name.starts_with(ANONYMOUS_PREFIX) {
        "<closure>"
    } else {
        name
    };
    match (source.is_empty(), pos.is_none()) {
        (true, true) => name.to_string(),
        (true, false) => format!("{name} ({pos})"),
        (false, true) => format!("{name} ({source})"),
        (false, false) => format!("{name} ({source}, {pos})"),
    }
}

/// Unwrap nested call errors into a message and frames, innermost first.
#[must_use]
pub fn fault_from(err: &EvalAltResult) -> Fault {
    let mut frames = Vec::new();
    let mut current = err;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
                if !is_host_frame(name) {
                    frames.push(frame(name, source, *pos));
                }
                current = inner;
            }
            EvalAltResult::ErrorInModule(path, inner, pos) => {
                frames.push(frame(&format!("import {path:?}"), "", *pos));
                current = inner;
            }
            _ => break,
        }
    }

    let (message, pos) = match current {
        EvalAltResult::ErrorRuntime(value, pos) => (value.to_string(), *pos),
        other => (other.to_string(), Position::NONE),
    };
    if !pos.is_none() {
        frames.push(format!("at {pos}"));
    }
    frames.reverse();
    Fault::new(message).with_trace(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Engine;

    fn eval_err(code: &str) -> Box<EvalAltResult> {
        Engine::new().run(code).unwrap_err()
    }

    #[test]
    fn should_use_thrown_value_as_message() {
        let fault = fault_from(&eval_err(r#"throw "boom";"#));
        assert_eq!(fault.message, "boom");
        assert_eq!(fault.trace.len(), 1);
        assert!(fault.trace[0].starts_with("at line 1"));
    }

    #[test]
    fn should_collect_script_function_frames_innermost_first() {
        let code = r#"
            fn inner() { throw "deep"; }
            fn outer() { inner() }
            outer();
        "#;
        let fault = fault_from(&eval_err(code));
        assert_eq!(fault.message, "deep");
        assert!(fault.trace[0].starts_with("at "));
        assert!(fault.trace[1].starts_with("inner"));
        assert!(fault.trace[2].starts_with("outer"));
    }

    #[test]
    fn should_name_closures() {
        assert_eq!(frame("anon$1234", "", Position::NONE), "<closure>");
        assert_eq!(frame("f", "a.rhai", Position::NONE), "f (a.rhai)");
    }

    #[test]
    fn should_trim_capability_frames() {
        let inner = EvalAltResult::ErrorRuntime("nope".into(), Position::NONE);
        let wrapped = EvalAltResult::ErrorInFunctionCall(
            "subscribe".to_string(),
            String::new(),
            Box::new(inner),
            Position::NONE,
        );
        let fault = fault_from(&wrapped);
        assert_eq!(fault.message, "nope");
        assert!(fault.trace.is_empty());
    }

    #[test]
    fn should_describe_non_runtime_errors() {
        let fault = fault_from(&eval_err("undefined_function_xyz();"));
        assert!(fault.message.contains("undefined_function_xyz"));
    }
}
