//! Python wrapper blocks and the JSON-to-Python literal renderer.

use serde_json::{Map, Value};

use super::{BlockKind, WrapperBlock, MAX_LOG_CHARS};

const SETUP: &str = include_str!("../../../scripts/wrapper/python_setup.py");
const GRAPHICS: &str = include_str!("../../../scripts/wrapper/python_graphics.py");
const GUARD: &str = include_str!("../../../scripts/wrapper/python_guard.py");

/// Render a JSON value as an equal Python literal.
///
/// `null`, `true` and `false` become `None`, `True` and `False`; strings use
/// JSON escapes, which Python string literals accept unchanged.
pub fn python_literal(value: &Value) -> String {
    let mut out = String::new();
    write_literal(&mut out, value);
    out
}

fn write_literal(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(out, key);
                out.push_str(": ");
                write_literal(out, item);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // Serializing a str cannot fail.
    out.push_str(&Value::String(s.to_string()).to_string());
}

pub(super) fn setup_block(dpi: u32) -> WrapperBlock {
    WrapperBlock {
        kind: BlockKind::Setup,
        text: format!(
            "__sandbox_dpi = {}\n__sandbox_log_limit = {}\n{}",
            dpi, MAX_LOG_CHARS, SETUP
        ),
    }
}

pub(super) fn graphics_block(fonts: &[String], dpi: u32) -> WrapperBlock {
    let fonts = Value::Array(fonts.iter().cloned().map(Value::String).collect());
    WrapperBlock {
        kind: BlockKind::Graphics,
        text: format!(
            "__sandbox_fonts = {}\n__sandbox_graphics_dpi = {}\n{}",
            python_literal(&fonts),
            dpi,
            GRAPHICS
        ),
    }
}

pub(super) fn guard_block(denied: &[&str]) -> WrapperBlock {
    let denied = Value::Array(denied.iter().map(|m| Value::String(m.to_string())).collect());
    WrapperBlock {
        kind: BlockKind::Guard,
        text: format!(
            "__sandbox_denied = frozenset({})\n{}",
            python_literal(&denied),
            GUARD
        ),
    }
}

pub(super) fn bindings_block(variables: &Map<String, Value>) -> WrapperBlock {
    let mut text = String::new();
    for (name, value) in variables {
        text.push_str(name);
        text.push_str(" = ");
        write_literal(&mut text, value);
        text.push('\n');
    }
    text.push_str("__sandbox_variables = ");
    write_literal(&mut text, &Value::Object(variables.clone()));
    text.push('\n');
    WrapperBlock {
        kind: BlockKind::Bindings,
        text,
    }
}

/// The setup block leaves one runtime handle in the module namespace; the
/// adapter hands it the calling convention once the user code has run.
pub(super) fn adapter_block(convention: &Value) -> WrapperBlock {
    WrapperBlock {
        kind: BlockKind::Adapter,
        text: format!("__sandbox_finish({})\n", python_literal(convention)),
    }
}
