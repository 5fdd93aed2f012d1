//! Supported target languages and their per-language facts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Prefix reserved for identifiers the wrapper itself defines.
pub const RESERVED_PREFIX: &str = "__sandbox";

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const JAVASCRIPT_RESERVED: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
    "undefined", "NaN", "Infinity", "globalThis",
];

/// A language the sandbox can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// CPython 3.
    #[default]
    #[serde(alias = "py")]
    Python,
    /// Node.js, CommonJS.
    #[serde(alias = "js", alias = "node")]
    JavaScript,
}

impl Language {
    /// All supported languages.
    pub const ALL: [Language; 2] = [Language::Python, Language::JavaScript];

    /// Lowercase name used in requests and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }

    /// File extension of the generated wrapper.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
        }
    }

    /// Separator between a module and its submodules.
    pub fn module_separator(&self) -> char {
        match self {
            Language::Python => '.',
            Language::JavaScript => '/',
        }
    }

    /// Normalize an import specifier as written in source.
    ///
    /// JavaScript drops the `node:` scheme so `node:fs` and `fs` compare equal.
    pub fn normalize_specifier<'a>(&self, specifier: &'a str) -> &'a str {
        match self {
            Language::Python => specifier,
            Language::JavaScript => specifier.strip_prefix("node:").unwrap_or(specifier),
        }
    }

    /// The installable root of an import specifier.
    ///
    /// `a.b.c` yields `a` for Python; `@scope/pkg/sub` yields `@scope/pkg`
    /// and `pkg/sub` yields `pkg` for JavaScript.
    pub fn root_module<'a>(&self, specifier: &'a str) -> &'a str {
        let specifier = self.normalize_specifier(specifier);
        match self {
            Language::Python => specifier.split('.').next().unwrap_or(specifier),
            Language::JavaScript => {
                if specifier.starts_with('@') {
                    let mut slashes = specifier.match_indices('/').map(|(i, _)| i);
                    match (slashes.next(), slashes.next()) {
                        (Some(_), Some(end)) => &specifier[..end],
                        _ => specifier,
                    }
                } else {
                    specifier.split('/').next().unwrap_or(specifier)
                }
            }
        }
    }

    /// Whether `module` is `denied` or one of its submodules.
    pub fn module_matches(&self, module: &str, denied: &str) -> bool {
        let module = self.normalize_specifier(module);
        let denied = self.normalize_specifier(denied);
        module == denied
            || (module.starts_with(denied)
                && module[denied.len()..].starts_with(self.module_separator()))
    }

    /// Whether `name` is a syntactically valid, non-reserved identifier.
    pub fn is_valid_identifier(&self, name: &str) -> bool {
        let mut chars = name.chars();
        let first_ok = match chars.next() {
            Some(c) => c == '_' || c.is_alphabetic() || (c == '$' && *self == Language::JavaScript),
            None => false,
        };
        if !first_ok {
            return false;
        }
        let rest_ok = chars.all(|c| {
            c == '_' || c.is_alphanumeric() || (c == '$' && *self == Language::JavaScript)
        });
        rest_ok && !self.is_reserved_word(name)
    }

    /// Whether `name` is a keyword or a name the runtime itself interprets.
    pub fn is_reserved_word(&self, name: &str) -> bool {
        match self {
            Language::Python => {
                let dunder = name.len() > 4 && name.starts_with("__") && name.ends_with("__");
                dunder || PYTHON_KEYWORDS.contains(&name)
            }
            Language::JavaScript => name == "__proto__" || JAVASCRIPT_RESERVED.contains(&name),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            other => Err(SandboxError::InvalidRequest(format!(
                "unsupported language '{}'",
                other
            ))),
        }
    }
}
