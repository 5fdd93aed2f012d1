//! JavaScript (CommonJS) wrapper blocks.

use serde_json::{Map, Value};

use super::{BlockKind, WrapperBlock, MAX_LOG_CHARS};

const SETUP: &str = include_str!("../../../scripts/wrapper/javascript_setup.js");
const GUARD: &str = include_str!("../../../scripts/wrapper/javascript_guard.js");

/// Render a JSON value as a JavaScript expression.
///
/// JSON is valid JavaScript except that older engines reject raw U+2028 and
/// U+2029 in string literals, so those are escaped.
pub fn javascript_literal(value: &Value) -> String {
    value
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

pub(super) fn setup_block() -> WrapperBlock {
    WrapperBlock {
        kind: BlockKind::Setup,
        text: format!("const __sandboxLogLimit = {};\n{}", MAX_LOG_CHARS, SETUP),
    }
}

pub(super) fn guard_block(denied: &[&str]) -> WrapperBlock {
    let denied = Value::Array(denied.iter().map(|m| Value::String(m.to_string())).collect());
    WrapperBlock {
        kind: BlockKind::Guard,
        text: format!(
            "const __sandboxDenied = {};\n{}",
            javascript_literal(&denied),
            GUARD
        ),
    }
}

pub(super) fn bindings_block(variables: &Map<String, Value>) -> WrapperBlock {
    let mut text = String::new();
    for (name, value) in variables {
        // Global properties rather than declarations, so user code may shadow them.
        text.push_str(&format!(
            "globalThis[{}] = {};\n",
            javascript_literal(&Value::String(name.clone())),
            javascript_literal(value)
        ));
    }
    text.push_str(&format!(
        "const __sandboxVariables = {};\n",
        javascript_literal(&Value::Object(variables.clone()))
    ));
    WrapperBlock {
        kind: BlockKind::Bindings,
        text,
    }
}

/// `typeof` keeps an undeclared `main` from throwing before the runtime can
/// report it.
pub(super) fn adapter_block(convention: &Value) -> WrapperBlock {
    WrapperBlock {
        kind: BlockKind::Adapter,
        text: format!(
            "__sandboxRuntime.finish(typeof main === 'undefined' ? undefined : main, {}, __sandboxVariables);\n",
            javascript_literal(convention)
        ),
    }
}
